//! The bounded per-pod parse queue: a single list in the
//! coordination store (`fetch:queue`) that fetchers push serialized fetch
//! payloads onto and parsers drain, with soft/hard backpressure thresholds
//! and a counter of backpressure events for observability.

use crate::config::BackpressureConfig;
use crate::coordination::CoordinationStore;
use crate::crawler::ContentType;
use crate::Result;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const QUEUE_KEY: &str = "fetch:queue";
const BACKPRESSURE_COUNTER_KEY: &str = "stats:backpressure_events";

/// A fetched page, serialized onto the parse queue as
/// `{url, domain, depth, body, content_type, timestamp, status}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ParsePayload {
    pub url: Url,
    pub domain: String,
    pub depth: u32,
    pub body: String,
    pub content_type: ContentType,
    pub timestamp: u64,
    pub status: u16,
}

impl serde::Serialize for ContentType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        let v = match self {
            ContentType::Html => "html",
            ContentType::Other => "other",
        };
        s.serialize_str(v)
    }
}

impl<'de> serde::Deserialize<'de> for ContentType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(match s.as_str() {
            "html" => ContentType::Html,
            _ => ContentType::Other,
        })
    }
}

pub struct ParseQueue {
    store: Arc<dyn CoordinationStore>,
    config: BackpressureConfig,
}

impl ParseQueue {
    pub fn new(store: Arc<dyn CoordinationStore>, config: BackpressureConfig) -> Self {
        Self { store, config }
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.llen(QUEUE_KEY).await
    }

    pub async fn push(&self, payload: &ParsePayload) -> Result<()> {
        let encoded = serde_json::to_string(payload).map_err(|e| anyhow::anyhow!(e))?;
        self.store.rpush(QUEUE_KEY, &encoded).await
    }

    /// Non-blocking pop. Returns `None` if the queue is currently empty; the
    /// parser loop sleeps and retries, checking the shutdown signal between
    /// attempts, mapped onto the coordination store's non-blocking `lpop`.
    pub async fn pop(&self) -> Result<Option<ParsePayload>> {
        let Some(raw) = self.store.lpop(QUEUE_KEY).await? else {
            return Ok(None);
        };
        let payload = serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!(e))?;
        Ok(Some(payload))
    }

    /// Backpressure sleep duration for a fetcher observing `len` items ahead
    /// of it in the queue: no sleep below the soft limit, a sleep linear in
    /// how far past soft we are (plus jitter) above
    /// it, and a full block above hard until the parser drains back under
    /// soft.
    pub async fn backpressure_sleep(&self) -> Result<()> {
        loop {
            let len = self.len().await?;

            if len <= self.config.soft_limit {
                return Ok(());
            }

            self.store.incr(BACKPRESSURE_COUNTER_KEY, 1).await?;

            if len >= self.config.hard_limit {
                tokio::time::sleep(Duration::from_millis(self.config.sleep_max_ms)).await;
                continue;
            }

            let span = (self.config.hard_limit - self.config.soft_limit).max(1);
            let fraction = (len - self.config.soft_limit) as f64 / span as f64;
            let base = (self.config.sleep_max_ms as f64 * fraction) as u64;
            let jitter = rand::thread_rng().gen_range(0..=self.config.sleep_base_ms);
            tokio::time::sleep(Duration::from_millis(base + jitter)).await;
            return Ok(());
        }
    }
}
