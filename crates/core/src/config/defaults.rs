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

pub struct Politeness;

impl Politeness {
    /// Follows the spec's stated TTL, not the unrelated 3600s value the
    /// monolith's crawler config used.
    pub fn robots_txt_ttl_sec() -> u64 {
        86_400
    }

    pub fn min_crawl_delay_sec() -> u64 {
        70
    }

    pub fn robots_cache_capacity() -> usize {
        100_000
    }

    pub fn exclusion_cache_capacity() -> usize {
        100_000
    }

    pub fn max_robots_txt_len_bytes() -> usize {
        500 * 1024
    }

    pub fn fetch_timeout_sec() -> u64 {
        30
    }
}

pub struct Frontier;

impl Frontier {
    pub fn max_url_len_bytes() -> usize {
        2_000
    }

    pub fn max_urls_per_batch_insert() -> usize {
        10_000
    }

    pub fn bloom_expected_items() -> usize {
        100_000_000
    }

    pub fn bloom_false_positive_rate() -> f64 {
        0.001
    }
}

pub struct Backpressure;

impl Backpressure {
    pub fn soft_limit() -> usize {
        10_000
    }

    pub fn hard_limit() -> usize {
        50_000
    }

    pub fn sleep_base_ms() -> u64 {
        50
    }

    pub fn sleep_max_ms() -> u64 {
        2_000
    }
}

pub struct Pod;

impl Pod {
    pub fn num_shards() -> usize {
        16
    }

    pub fn num_fetchers() -> usize {
        4
    }

    pub fn num_parsers() -> usize {
        2
    }

    pub fn fetcher_workers() -> usize {
        16
    }

    pub fn parser_workers() -> usize {
        8
    }

    pub fn restart_backoff_ms() -> u64 {
        1_000
    }

    pub fn shutdown_grace_sec() -> u64 {
        30
    }

    pub fn startup_stagger_ms() -> u64 {
        250
    }

    pub fn restart_storm_threshold() -> u32 {
        5
    }

    pub fn restart_storm_window_sec() -> u64 {
        60
    }
}

pub struct Locking;

impl Locking {
    pub fn process_local_write_locks() -> bool {
        true
    }

    pub fn lock_backoff_base_ms() -> u64 {
        20
    }

    pub fn lock_backoff_max_ms() -> u64 {
        500
    }

    pub fn lock_ttl_ms() -> u64 {
        30_000
    }

    pub fn lock_acquire_timeout_ms() -> u64 {
        5_000
    }
}
