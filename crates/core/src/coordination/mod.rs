//! The coordination store: a small async key/value surface shared by every
//! process in a pod (fetchers, parsers, the supervisor). Every subsystem
//! (frontier, seen-set, politeness, stats, locking) goes through this trait
//! rather than talking to Redis directly, so the backing store is swappable
//! and the subsystems stay testable against an in-memory fake.

mod lock;
mod redis_store;

pub use lock::{LockManager, LockTimeoutError, WriteLockGuard};
pub use redis_store::RedisStore;

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Async primitives the frontier/politeness/pipeline subsystems are built on.
/// All methods fail open in the sense that a transient store error surfaces
/// as `Err` and callers decide whether that means "treat as absent" (most
/// reads) or "deny" (`can_fetch_domain_now`, per spec).
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>>;
    async fn hmset(&self, key: &str, fields: &[(&str, &str)]) -> Result<()>;
    async fn hincr_by(&self, key: &str, field: &str, by: i64) -> Result<i64>;

    async fn incr(&self, key: &str, by: i64) -> Result<i64>;
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn lpush(&self, key: &str, value: &str) -> Result<()>;
    async fn rpush(&self, key: &str, value: &str) -> Result<()>;
    async fn lpop(&self, key: &str) -> Result<Option<String>>;
    async fn llen(&self, key: &str) -> Result<usize>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    async fn zcard(&self, key: &str) -> Result<usize>;

    async fn setbit(&self, key: &str, offset: u64, value: bool) -> Result<bool>;
    async fn getbit(&self, key: &str, offset: u64) -> Result<bool>;

    /// Sets `key` = `value` only if absent, with a TTL, returning whether the
    /// set happened. The primitive behind the coordination-store write lock.
    async fn setnx_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<()>;

    /// Wipes every key in this pod's store. Used only by `initialize()` on a
    /// non-resuming start: since a pod owns exactly one coordination store,
    /// clearing domain hashes, shard queues, and the seen-set bloom filter
    /// is the same operation as clearing the whole store.
    async fn flush_all(&self) -> Result<()>;
}
