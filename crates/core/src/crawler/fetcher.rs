//! The fetcher worker loop: claim a ready URL from the frontier, perform
//! the HTTP fetch, and either push the payload onto the parse queue
//! (HTML success) or write a visited record directly (everything else).
//! Request handling -- the https-priority retry, header validation, and
//! per-fetch politeness delay bookkeeping -- follows the monolith's
//! `WorkerThread`/`JobExecutor` (`crates/core/src/crawler/worker.rs`), with
//! the job-claim step swapped for `Frontier::get_next_url`.

use crate::coordination::CoordinationStore;
use crate::crawler::frontier::Frontier;
use crate::crawler::parse_queue::{ParsePayload, ParseQueue};
use crate::crawler::{decode_body, write_visited_record, ContentType, Error, Result, VisitedRecord};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

const MAX_CONTENT_LENGTH: usize = 32 * 1024 * 1024;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub struct FetcherWorker {
    shard_id: usize,
    frontier: Arc<Frontier>,
    parse_queue: Arc<ParseQueue>,
    store: Arc<dyn CoordinationStore>,
    client: reqwest::Client,
    shutdown: watch::Receiver<bool>,
}

impl FetcherWorker {
    /// Builds the one long-lived client a fetcher process shares across all
    /// of its `fetcher_workers` tasks: a bounded per-host connection pool
    /// and DNS cache per process, never shared across processes. Call once
    /// per process and hand the result to every
    /// `FetcherWorker::with_client` on that process's tasks.
    pub fn build_client(user_agent: &str) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .pool_max_idle_per_host(4)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Store(anyhow::anyhow!(e)))
    }

    /// Constructs a worker around a client already shared with the rest of
    /// this process's fetcher tasks.
    pub fn with_client(
        shard_id: usize,
        frontier: Arc<Frontier>,
        parse_queue: Arc<ParseQueue>,
        store: Arc<dyn CoordinationStore>,
        client: reqwest::Client,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            shard_id,
            frontier,
            parse_queue,
            store,
            client,
            shutdown,
        }
    }

    /// Convenience constructor for a single isolated worker (tests, or a
    /// process running exactly one fetcher task) that builds its own client.
    pub fn new(
        shard_id: usize,
        frontier: Arc<Frontier>,
        parse_queue: Arc<ParseQueue>,
        store: Arc<dyn CoordinationStore>,
        user_agent: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let client = Self::build_client(user_agent)?;

        Ok(Self {
            shard_id,
            frontier,
            parse_queue,
            store,
            client,
            shutdown,
        })
    }

    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                return;
            }

            match self.frontier.get_next_url(self.shard_id).await {
                Ok(Some(claimed)) => {
                    tracing::debug!(url = %claimed.url, "fetcher claimed url");
                    if let Err(err) = self.process(claimed.url, claimed.domain.as_str(), claimed.depth).await {
                        tracing::warn!(error = %err, "error processing claimed url");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                        _ = self.shutdown.changed() => {}
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "frontier claim failed");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }

            self.parse_queue.backpressure_sleep().await.ok();
        }
    }

    async fn process(&self, url: url::Url, domain: &str, depth: u32) -> Result<()> {
        let start = Instant::now();
        let res = self.fetch_with_https_priority(url.clone()).await;
        let fetch_time = start.elapsed();

        let response = match res {
            Ok(response) => response,
            Err(err) => {
                write_visited_record(
                    self.store.as_ref(),
                    &url,
                    VisitedRecord {
                        status_code: None,
                        error: Some(&err.to_string()),
                        ..Default::default()
                    },
                )
                .await?;
                return Ok(());
            }
        };

        let status = response.status();
        if !status.is_success() {
            write_visited_record(
                self.store.as_ref(),
                &url,
                VisitedRecord {
                    status_code: Some(status.as_u16()),
                    error: Some("non-2xx response"),
                    ..Default::default()
                },
            )
            .await?;
            return Ok(());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if let Some(len) = response.content_length() {
            if len as usize > MAX_CONTENT_LENGTH {
                write_visited_record(
                    self.store.as_ref(),
                    &url,
                    VisitedRecord {
                        status_code: Some(status.as_u16()),
                        error: Some("content too large"),
                        ..Default::default()
                    },
                )
                .await?;
                return Ok(());
            }
        }

        let final_url = response.url().clone();
        let bytes = response.bytes().await.map_err(|e| Error::Store(anyhow::anyhow!(e)))?;
        let body = decode_body(&bytes);

        if content_type.contains("text/html") {
            let payload = ParsePayload {
                url: final_url,
                domain: domain.to_string(),
                depth,
                body,
                content_type: ContentType::Html,
                timestamp: now_unix(),
                status: status.as_u16(),
            };
            self.parse_queue.push(&payload).await?;
        } else {
            write_visited_record(
                self.store.as_ref(),
                &url,
                VisitedRecord {
                    status_code: Some(status.as_u16()),
                    content_type: Some(&content_type),
                    ..Default::default()
                },
            )
            .await?;
        }

        tracing::debug!(url = %url, elapsed_ms = fetch_time.as_millis() as u64, "fetched");
        Ok(())
    }

    /// Tries https first when the URL is plain http, falling back to the
    /// original scheme on failure -- matches the monolith's
    /// `fetch_with_https_priority`.
    async fn fetch_with_https_priority(&self, url: url::Url) -> Result<reqwest::Response> {
        if url.scheme() == "http" {
            let mut https = url.clone();
            let _ = https.set_scheme("https");

            match self.client.get(https).send().await {
                Ok(res) => return Ok(res),
                Err(_) => {
                    return self
                        .client
                        .get(url)
                        .send()
                        .await
                        .map_err(|e| Error::Store(anyhow::anyhow!(e)));
                }
            }
        }

        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Store(anyhow::anyhow!(e)))
    }
}
