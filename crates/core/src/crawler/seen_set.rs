//! The global approximate-membership filter. Reuses the `bloom`
//! crate's double-hashing sizing/addressing math, but addresses bits in the
//! coordination store's `seen:bloom` bitstring instead of an in-process
//! bit-vector, so every fetcher/parser in a pod shares one filter.

use crate::coordination::CoordinationStore;
use crate::Result;
use std::sync::Arc;

const SEEN_KEY: &str = "seen:bloom";

pub struct SeenSet {
    store: Arc<dyn CoordinationStore>,
    num_bits: u64,
    num_hashes: u64,
}

impl SeenSet {
    pub fn new(store: Arc<dyn CoordinationStore>, expected_items: usize, fp_rate: f64) -> Self {
        let num_bits = bloom::num_bits(expected_items as u64, fp_rate).max(1);
        let num_hashes = bloom::num_hashes(num_bits, expected_items as u64);
        Self {
            store,
            num_bits,
            num_hashes,
        }
    }

    fn bit_indices(&self, item: &str) -> Vec<u64> {
        let hash = stdx::split_u128(bloom::fast_stable_hash_128(item.as_bytes()));
        (0..self.num_hashes)
            .map(|i| bloom::bit_index(hash, i, self.num_bits))
            .collect()
    }

    /// `true` if `item` was possibly already seen. False positives are
    /// possible by construction; false negatives are not.
    pub async fn contains(&self, item: &str) -> Result<bool> {
        for idx in self.bit_indices(item) {
            if !self.store.getbit(SEEN_KEY, idx).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn insert(&self, item: &str) -> Result<()> {
        for idx in self.bit_indices(item) {
            self.store.setbit(SEEN_KEY, idx, true).await?;
        }
        Ok(())
    }

    /// Checks-then-inserts in one call so callers that only care about "is
    /// this new" don't issue the round trip twice.
    pub async fn insert_if_absent(&self, item: &str) -> Result<bool> {
        if self.contains(item).await? {
            return Ok(false);
        }
        self.insert(item).await?;
        Ok(true)
    }

    /// `batch_add`: one `was_new` bit per input, in input order.
    /// Each item still round-trips through the coordination store
    /// individually -- the store has no native "check all these bits, then
    /// set all these bits" primitive -- but batching the call itself saves
    /// every caller from looping over `insert_if_absent` one item at a time.
    pub async fn batch_add(&self, items: &[&str]) -> Result<Vec<bool>> {
        let mut was_new = Vec::with_capacity(items.len());
        for item in items {
            was_new.push(self.insert_if_absent(item).await?);
        }
        Ok(was_new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        bits: Mutex<HashMap<u64, bool>>,
    }

    #[async_trait::async_trait]
    impl CoordinationStore for FakeStore {
        async fn hget(&self, _: &str, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn hset(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn hmget(&self, _: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
            Ok(vec![None; fields.len()])
        }
        async fn hmset(&self, _: &str, _: &[(&str, &str)]) -> Result<()> {
            Ok(())
        }
        async fn hincr_by(&self, _: &str, _: &str, by: i64) -> Result<i64> {
            Ok(by)
        }
        async fn incr(&self, _: &str, by: i64) -> Result<i64> {
            Ok(by)
        }
        async fn get(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn lpush(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn rpush(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn lpop(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn llen(&self, _: &str) -> Result<usize> {
            Ok(0)
        }
        async fn zadd(&self, _: &str, _: &str, _: f64) -> Result<()> {
            Ok(())
        }
        async fn zcard(&self, _: &str) -> Result<usize> {
            Ok(0)
        }
        async fn setbit(&self, _: &str, offset: u64, value: bool) -> Result<bool> {
            let mut bits = self.bits.lock().unwrap();
            Ok(bits.insert(offset, value).unwrap_or(false))
        }
        async fn getbit(&self, _: &str, offset: u64) -> Result<bool> {
            Ok(*self.bits.lock().unwrap().get(&offset).unwrap_or(&false))
        }
        async fn setnx_with_expiry(
            &self,
            _: &str,
            _: &str,
            _: std::time::Duration,
        ) -> Result<bool> {
            Ok(true)
        }
        async fn delete(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn flush_all(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn never_false_negative() {
        let store = Arc::new(FakeStore::default());
        let set = SeenSet::new(store, 1000, 0.01);

        for i in 0..50 {
            let url = format!("https://example.com/page-{i}");
            assert!(set.insert_if_absent(&url).await.unwrap());
        }

        for i in 0..50 {
            let url = format!("https://example.com/page-{i}");
            assert!(set.contains(&url).await.unwrap());
        }
    }

    #[tokio::test]
    async fn insert_if_absent_is_false_on_second_call() {
        let store = Arc::new(FakeStore::default());
        let set = SeenSet::new(store, 1000, 0.01);

        assert!(set.insert_if_absent("https://example.com/a").await.unwrap());
        assert!(!set.insert_if_absent("https://example.com/a").await.unwrap());
    }

    #[tokio::test]
    async fn batch_add_reports_one_bit_per_input_in_order() {
        let store = Arc::new(FakeStore::default());
        let set = SeenSet::new(store, 1000, 0.01);

        set.insert("https://example.com/a").await.unwrap();

        let result = set
            .batch_add(&["https://example.com/a", "https://example.com/b", "https://example.com/b"])
            .await
            .unwrap();

        assert_eq!(result, vec![false, true, false]);
    }
}
