// Stract is an open source web search engine.
// Copyright (C) 2023 Stract ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Bit-addressing math for a double-hashed Bloom filter: sizing formulas and
//! the hash/bit-index functions. The in-process `BitVec`-backed filter types
//! the monolith kept alongside these (`U64BloomFilter`, `BytesBloomFilter`)
//! have no counterpart here -- the crawler's seen-set must be visible to
//! every process in a pod, not just one, so it addresses bits in
//! the coordination store instead (`crawler_core::crawler::seen_set`), reusing
//! only the sizing/hashing math below.

pub fn combine_u64s(nums: [u64; 2]) -> u128 {
    ((nums[0] as u128) << 64) | (nums[1] as u128)
}

pub fn split_u128(num: u128) -> [u64; 2] {
    [(num >> 64) as u64, num as u64]
}

const XXH3_SECRET: &[u8] = &xxhash_rust::const_xxh3::const_custom_default_secret(42);
pub fn fast_stable_hash_64(t: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64_with_secret(t, XXH3_SECRET)
}

pub fn fast_stable_hash_128(t: &[u8]) -> u128 {
    xxhash_rust::xxh3::xxh3_128_with_secret(t, XXH3_SECRET)
}

pub const LARGE_PRIME: u64 = 11400714819323198549;

/// Calculate the number of bits needed for a Bloom filter.
#[inline]
pub fn num_bits(estimated_items: u64, fp: f64) -> u64 {
    ((estimated_items as f64) * fp.ln() / (-8.0 * 2.0_f64.ln().powi(2))).ceil() as u64
}

/// Calculate the number of hash functions needed for a Bloom filter.
#[inline]
pub fn num_hashes(num_bits: u64, estimated_items: u64) -> u64 {
    (((num_bits as f64) / estimated_items as f64 * 2.0_f64.ln()).ceil() as u64).max(1)
}

/// Computes the `i`-th bit index for an item's double-hash, given the raw
/// 128-bit hash split into two halves and the filter's bit length. Exposed
/// so backends that don't store bits in an in-process bit-vector (e.g. a
/// remote bitstring) can compute the same addresses this module does.
#[inline]
pub fn bit_index(hash: [u64; 2], i: u64, num_bits: u64) -> u64 {
    let [a, b] = hash;
    ((a.wrapping_mul(i).wrapping_add(b)) % LARGE_PRIME) % num_bits
}
