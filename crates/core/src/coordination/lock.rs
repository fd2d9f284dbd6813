//! Per-domain locking. Write locks serialize the
//! frontier-log append for a single domain; read locks only ever need to be
//! process-local, since concurrent readers never corrupt anything -- only a
//! concurrent writer racing a reader against the same file offset would.

use super::CoordinationStore;
use crate::config::LockingConfig;
use crate::distributed::retry_strategy::ExponentialBackoff;
use crate::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("timed out acquiring write lock for domain {domain:?} after {waited:?}")]
pub struct LockTimeoutError {
    pub domain: String,
    pub waited: Duration,
}

pub enum WriteLockGuard {
    Local(OwnedMutexGuard<()>),
    Remote { store: Arc<dyn CoordinationStore>, key: String },
}

impl Drop for WriteLockGuard {
    fn drop(&mut self) {
        if let WriteLockGuard::Remote { store, key } = self {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _ = store.delete(&key).await;
            });
        }
    }
}

pub struct LockManager {
    store: Arc<dyn CoordinationStore>,
    config: LockingConfig,
    local_write_locks: DashMap<String, Arc<Mutex<()>>>,
    local_read_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LockManager {
    pub fn new(store: Arc<dyn CoordinationStore>, config: LockingConfig) -> Self {
        Self {
            store,
            config,
            local_write_locks: DashMap::new(),
            local_read_locks: DashMap::new(),
        }
    }

    /// Read locks are always process-local: every process only ever reads
    /// its own in-process frontier-log file handles, so there is nothing for
    /// a remote lock to coordinate.
    pub async fn acquire_read(&self, domain: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .local_read_locks
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    pub async fn acquire_write(&self, domain: &str) -> Result<WriteLockGuard> {
        if self.config.process_local_write_locks {
            let mutex = self
                .local_write_locks
                .entry(domain.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            return Ok(WriteLockGuard::Local(mutex.lock_owned().await));
        }

        let key = format!("lock:domain:{domain}:writer");
        let ttl = Duration::from_millis(self.config.lock_ttl_ms);
        let acquire_timeout = Duration::from_millis(self.config.lock_acquire_timeout_ms);
        let backoff = ExponentialBackoff::from_millis(self.config.lock_backoff_base_ms)
            .with_limit(Duration::from_millis(self.config.lock_backoff_max_ms));
        let started = Instant::now();

        for delay in backoff {
            if self.store.setnx_with_expiry(&key, "1", ttl).await? {
                return Ok(WriteLockGuard::Remote {
                    store: self.store.clone(),
                    key,
                });
            }

            let waited = started.elapsed();
            if waited >= acquire_timeout {
                return Err(LockTimeoutError {
                    domain: domain.to_string(),
                    waited,
                }
                .into());
            }

            tokio::time::sleep(delay).await;
        }

        unreachable!("ExponentialBackoff is an infinite iterator")
    }
}
