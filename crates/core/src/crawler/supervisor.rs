//! The process supervisor: brings a pod's coordination-store state up to
//! date, fans the pod out into `num_fetchers` fetcher and `num_parsers`
//! parser OS processes by re-`exec`ing this same binary under the
//! `fetcher`/`parser` subcommands, restarts any child that exits, and
//! watches the pod's stopping conditions (`max_pages`/`max_duration_sec`/
//! frontier drained) to trigger a cooperative shutdown. Grounded on the
//! monolith's `Crawler`/`CrawlCoordinator` pairing (staggered spawn,
//! liveness polling, graceful-then-forced shutdown), ported from in-process
//! task supervision to `tokio::process::Command` child processes, one OS
//! process per worker.

use crate::config::CrawlerConfig;
use crate::coordination::{CoordinationStore, LockManager};
use crate::crawler::frontier::{shard_queue_key, Frontier};
use crate::crawler::frontier_log::FrontierLog;
use crate::crawler::politeness::PolitenessEnforcer;
use crate::crawler::seed;
use crate::crawler::seen_set::SeenSet;
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

#[derive(Debug, Clone, Copy)]
enum Role {
    Fetcher(usize),
    Parser,
}

struct Worker {
    role: Role,
    child: Child,
}

/// Tracks restart timestamps within a sliding window across every worker in
/// the pod, so a crash loop on one child (or several at once) trips the
/// same "restart storm" threshold.
#[derive(Default)]
struct RestartStorm {
    recent: std::collections::VecDeque<Instant>,
}

impl RestartStorm {
    fn record_and_check(&mut self, threshold: u32, window: Duration) -> bool {
        let now = Instant::now();
        self.recent.push_back(now);
        while let Some(&front) = self.recent.front() {
            if now.duration_since(front) > window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.recent.len() as u32 >= threshold
    }
}

/// Builds the one-off `Frontier` handle the supervisor needs purely to load
/// seeds on first start -- the fetcher/parser processes build their own.
async fn build_frontier(config: &CrawlerConfig, store: Arc<dyn CoordinationStore>) -> Result<Frontier> {
    let log = FrontierLog::new(&config.frontier.frontier_dir);
    let seen = Arc::new(SeenSet::new(
        store.clone(),
        config.frontier.bloom_expected_items,
        config.frontier.bloom_false_positive_rate,
    ));
    let politeness = Arc::new(PolitenessEnforcer::new(
        store.clone(),
        config.politeness.clone(),
        config.user_agent(),
    )?);
    let locks = Arc::new(LockManager::new(store.clone(), config.locking.clone()));

    Ok(Frontier::new(
        store,
        log,
        seen,
        politeness,
        locks,
        config.frontier.clone(),
        config.pod.num_shards,
    ))
}

pub struct ProcessSupervisor {
    config: CrawlerConfig,
    config_path: String,
    store: Arc<dyn CoordinationStore>,
}

impl ProcessSupervisor {
    pub fn new(config: CrawlerConfig, config_path: String, store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            config,
            config_path,
            store,
        }
    }

    /// Brings the pod's coordination-store state up to date before any
    /// worker is spawned. Unless `resume` is set: flush the coordination
    /// store (domain hashes, shard queues, the
    /// seen-set bloom filter, stale locks all live there) and delete the
    /// frontier directory, so a fresh crawl never inherits a previous run's
    /// state. Manual exclusions always re-apply (idempotent); seeds load
    /// once unless `resume` is set, since re-seeding a resumed crawl would
    /// re-enqueue everything the frontier has already drained.
    pub async fn initialize(&self) -> Result<()> {
        if !self.config.resume {
            tracing::info!("resume=false, clearing coordination store and frontier directory");
            self.store.flush_all().await?;
            match tokio::fs::remove_dir_all(&self.config.frontier.frontier_dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        tokio::fs::create_dir_all(&self.config.frontier.frontier_dir).await?;

        let politeness = Arc::new(PolitenessEnforcer::new(
            self.store.clone(),
            self.config.politeness.clone(),
            self.config.user_agent(),
        )?);

        if let Some(exclude_file) = &self.config.exclude_file {
            let count = seed::load_exclusions(exclude_file, &politeness).await?;
            tracing::info!(count, "loaded manual exclusions");
        }

        if !self.config.resume {
            if let Some(seed_file) = &self.config.seed_file {
                let urls = seed::load_seed_urls(seed_file).await?;
                let frontier = build_frontier(&self.config, self.store.clone()).await?;
                let added = frontier.initialize(&urls).await?;
                tracing::info!(loaded = urls.len(), added, "loaded seed urls");
            }
        } else {
            tracing::info!("resume=true, skipping seed load");
        }

        Ok(())
    }

    /// Spawns every fetcher and parser process (staggered by
    /// `startup_stagger_ms`), then loops monitoring liveness, restarting
    /// crashed children, and checking stopping conditions, until either a
    /// stopping condition trips or a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let mut workers = Vec::new();
        let stagger = Duration::from_millis(self.config.pod.startup_stagger_ms);

        for shard in 0..self.config.pod.num_fetchers {
            workers.push(Worker {
                role: Role::Fetcher(shard),
                child: self.spawn(Role::Fetcher(shard))?,
            });
            tokio::time::sleep(stagger).await;
        }
        for _ in 0..self.config.pod.num_parsers {
            workers.push(Worker {
                role: Role::Parser,
                child: self.spawn(Role::Parser)?,
            });
            tokio::time::sleep(stagger).await;
        }

        let started_at = Instant::now();
        let mut sigint = tokio::signal::ctrl_c();
        let mut restart_storm = RestartStorm::default();
        let mut aborted = false;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                _ = &mut sigint => {
                    tracing::info!("received interrupt, beginning shutdown");
                    break;
                }
            }

            if self.restart_dead_workers(&mut workers, &mut restart_storm).await? {
                tracing::error!(
                    threshold = self.config.pod.restart_storm_threshold,
                    window_sec = self.config.pod.restart_storm_window_sec,
                    "restart storm threshold exceeded, aborting run"
                );
                aborted = true;
                break;
            }

            if self.should_stop(started_at).await? {
                tracing::info!("stopping condition met, beginning shutdown");
                break;
            }
        }

        self.shutdown(workers).await?;

        if aborted {
            anyhow::bail!("pod aborted after exceeding the restart storm threshold");
        }
        Ok(())
    }

    fn spawn(&self, role: Role) -> Result<Child> {
        let exe = std::env::current_exe()?;
        let mut cmd = Command::new(exe);
        cmd.kill_on_drop(true);

        match role {
            Role::Fetcher(shard) => {
                cmd.arg("fetcher")
                    .arg(&self.config_path)
                    .arg("--shard")
                    .arg(shard.to_string());
            }
            Role::Parser => {
                cmd.arg("parser").arg(&self.config_path);
            }
        }

        tracing::info!(?role, "spawning worker process");
        Ok(cmd.spawn()?)
    }

    /// Restarts any worker whose process has exited, recording each restart
    /// against the pod-wide sliding-window counter. Returns `true` once that
    /// counter crosses `restart_storm_threshold` within
    /// `restart_storm_window_sec`.
    async fn restart_dead_workers(&self, workers: &mut [Worker], storm: &mut RestartStorm) -> Result<bool> {
        let window = Duration::from_secs(self.config.pod.restart_storm_window_sec);
        let mut tripped = false;

        for worker in workers.iter_mut() {
            if worker.child.try_wait()?.is_some() {
                tracing::warn!(role = ?worker.role, "worker process exited, restarting");
                tokio::time::sleep(Duration::from_millis(self.config.pod.restart_backoff_ms)).await;
                worker.child = self.spawn(worker.role)?;

                if storm.record_and_check(self.config.pod.restart_storm_threshold, window) {
                    tripped = true;
                }
            }
        }
        Ok(tripped)
    }

    /// `max_pages`/`max_duration_sec`/drained-frontier stopping conditions.
    /// The drained check is "every shard queue is empty" -- an
    /// approximation, same caveat as `Frontier::is_empty`/`Frontier::count`:
    /// never used for correctness, only here to decide when a finite crawl
    /// is done.
    async fn should_stop(&self, started_at: Instant) -> Result<bool> {
        if let Some(max_duration) = self.config.pod.max_duration_sec {
            if started_at.elapsed() >= Duration::from_secs(max_duration) {
                return Ok(true);
            }
        }

        if let Some(max_pages) = self.config.pod.max_pages {
            let fetched: u64 = self
                .store
                .get("stats:pages_fetched")
                .await?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if fetched >= max_pages {
                return Ok(true);
            }
        }

        for shard in 0..self.config.pod.num_shards {
            if self.store.llen(&shard_queue_key(shard)).await? > 0 {
                return Ok(false);
            }
        }
        let parse_queue_empty = self.store.llen("fetch:queue").await? == 0;

        Ok(parse_queue_empty)
    }

    /// Cooperative shutdown: each child process runs its own signal handler
    /// feeding a local `tokio::sync::watch` flag that its fetcher/parser
    /// loop polls between claims, so a `SIGINT` delivered to the process
    /// group reaches every child directly. This waits up to
    /// `shutdown_grace_sec` for children to exit on their own before
    /// force-killing whatever's left.
    async fn shutdown(self, mut workers: Vec<Worker>) -> Result<()> {
        let grace = Duration::from_secs(self.config.pod.shutdown_grace_sec);
        let deadline = Instant::now() + grace;

        loop {
            workers.retain_mut(|w| w.child.try_wait().ok().flatten().is_none());
            if workers.is_empty() || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        for worker in workers.iter_mut() {
            if worker.child.try_wait()?.is_none() {
                tracing::warn!(role = ?worker.role, "force-killing worker past shutdown grace period");
                worker.child.start_kill()?;
            }
        }

        Ok(())
    }
}
