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

//! The four wiring functions behind the `crawld` subcommands: `supervisor`
//! fans a pod out into separate fetcher/parser OS processes; `fetcher`/
//! `parser` are what those child processes actually run; `run` collapses
//! the whole pod into one process's tokio tasks for local development and
//! end-to-end scenarios.

use crate::config::CrawlerConfig;
use crate::coordination::{CoordinationStore, LockManager, RedisStore};
use crate::crawler::fetcher::FetcherWorker;
use crate::crawler::frontier::Frontier;
use crate::crawler::frontier_log::FrontierLog;
use crate::crawler::parse_queue::ParseQueue;
use crate::crawler::parser::ParserWorker;
use crate::crawler::politeness::PolitenessEnforcer;
use crate::crawler::router::{PodHandleBuilder, PodRouter};
use crate::crawler::seen_set::SeenSet;
use crate::crawler::supervisor::ProcessSupervisor;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Newly discovered links carry a page's whole link set in principle; this
/// caps how many a single parse takes, matching the monolith's own
/// `MAX_LINKS_PER_PAGE`-style guard against pathological link farms.
const MAX_LINKS_PER_PAGE: usize = 500;

async fn connect_store(redis_url: &str) -> Result<Arc<dyn CoordinationStore>> {
    Ok(Arc::new(RedisStore::connect(redis_url).await?))
}

async fn build_frontier(
    config: &CrawlerConfig,
    store: Arc<dyn CoordinationStore>,
    frontier_dir: &str,
) -> Result<Arc<Frontier>> {
    let log = FrontierLog::new(frontier_dir);
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

    Ok(Arc::new(Frontier::new(
        store,
        log,
        seen,
        politeness,
        locks,
        config.frontier.clone(),
        config.pod.num_shards,
    )))
}

/// Connects every other pod named in `config.pods` up front and wraps them
/// in a `PodRouter`. Eager rather than lazy: a deployment's pod count is
/// small and this keeps `PodRouter::frontier_for` synchronous instead of
/// threading an async connect through the parser's hot path.
async fn build_router(
    config: &CrawlerConfig,
    own_frontier: Arc<Frontier>,
) -> Result<Arc<PodRouter>> {
    let mut handles = HashMap::new();
    for (pod_id, endpoint) in config.pods.iter().enumerate() {
        if pod_id == config.pod.pod_id {
            continue;
        }
        let store = connect_store(&endpoint.redis_url).await?;
        let frontier = build_frontier(config, store, &endpoint.frontier_dir).await?;
        handles.insert(pod_id, frontier);
    }

    let build_handle: PodHandleBuilder = Arc::new(move |pod_id| {
        handles
            .get(&pod_id)
            .cloned()
            .unwrap_or_else(|| panic!("no pod configured for pod id {pod_id} in `pods`"))
    });

    Ok(Arc::new(PodRouter::new(
        config.pod.pod_id,
        config.pod.num_pods,
        own_frontier,
        build_handle,
    )))
}

/// Forwards `SIGINT` into the shared shutdown flag every fetcher/parser loop
/// polls between claims.
fn spawn_shutdown_listener(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt, signalling workers to stop");
            let _ = tx.send(true);
        }
    });
}

/// `crawld supervisor <config>`: one-time pod initialization, then spawn and
/// monitor every fetcher/parser child process until a stopping condition
/// trips.
pub async fn supervisor(config: CrawlerConfig, config_path: String) -> Result<()> {
    let store = connect_store(&config.redis_url).await?;
    let supervisor = ProcessSupervisor::new(config, config_path, store);
    supervisor.initialize().await?;
    supervisor.run().await
}

/// `crawld fetcher <config> --shard <n>`: what one fetcher child process
/// actually runs -- `fetcher_workers` concurrent tasks, all claiming from
/// shard `shard` and sharing this process's one HTTP client.
pub async fn fetcher(config: CrawlerConfig, shard: usize) -> Result<()> {
    let store = connect_store(&config.redis_url).await?;
    let frontier = build_frontier(&config, store.clone(), &config.frontier.frontier_dir).await?;
    let parse_queue = Arc::new(ParseQueue::new(store.clone(), config.backpressure.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_shutdown_listener(shutdown_tx);

    let client = FetcherWorker::build_client(&config.user_agent().full)?;

    let mut tasks = Vec::with_capacity(config.pod.fetcher_workers);
    for _ in 0..config.pod.fetcher_workers {
        let worker = FetcherWorker::with_client(
            shard,
            frontier.clone(),
            parse_queue.clone(),
            store.clone(),
            client.clone(),
            shutdown_rx.clone(),
        );
        tasks.push(tokio::spawn(worker.run()));
    }

    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

/// `crawld parser <config>`: what one parser child process actually runs --
/// `parser_workers` concurrent tasks draining the pod's shared parse queue.
pub async fn parser(config: CrawlerConfig) -> Result<()> {
    let store = connect_store(&config.redis_url).await?;
    let frontier = build_frontier(&config, store.clone(), &config.frontier.frontier_dir).await?;
    let router = build_router(&config, frontier).await?;
    let parse_queue = Arc::new(ParseQueue::new(store.clone(), config.backpressure.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_shutdown_listener(shutdown_tx);

    let mut tasks = Vec::with_capacity(config.pod.parser_workers);
    for _ in 0..config.pod.parser_workers {
        let worker = ParserWorker::new(
            parse_queue.clone(),
            store.clone(),
            router.clone(),
            config.pod.data_dirs.clone(),
            MAX_LINKS_PER_PAGE,
            shutdown_rx.clone(),
        );
        tasks.push(tokio::spawn(worker.run()));
    }

    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

/// `crawld run <config>`: single-process mode. Every fetcher/parser task the
/// supervisor would otherwise hand to a separate OS process runs as a tokio
/// task in this one process instead, useful for local iteration without
/// standing up a multi-process deployment.
pub async fn run(config: CrawlerConfig, config_path: String) -> Result<()> {
    let store = connect_store(&config.redis_url).await?;

    let supervisor = ProcessSupervisor::new(config.clone(), config_path, store.clone());
    supervisor.initialize().await?;

    let frontier = build_frontier(&config, store.clone(), &config.frontier.frontier_dir).await?;
    let router = build_router(&config, frontier.clone()).await?;
    let parse_queue = Arc::new(ParseQueue::new(store.clone(), config.backpressure.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_shutdown_listener(shutdown_tx.clone());

    let client = FetcherWorker::build_client(&config.user_agent().full)?;
    let num_shards = config.pod.num_shards.max(1);

    let mut tasks = Vec::new();
    for shard in 0..num_shards {
        for _ in 0..config.pod.fetcher_workers {
            let worker = FetcherWorker::with_client(
                shard,
                frontier.clone(),
                parse_queue.clone(),
                store.clone(),
                client.clone(),
                shutdown_rx.clone(),
            );
            tasks.push(tokio::spawn(worker.run()));
        }
    }

    for _ in 0..config.pod.parser_workers {
        let worker = ParserWorker::new(
            parse_queue.clone(),
            store.clone(),
            router.clone(),
            config.pod.data_dirs.clone(),
            MAX_LINKS_PER_PAGE,
            shutdown_rx.clone(),
        );
        tasks.push(tokio::spawn(worker.run()));
    }

    let started_at = Instant::now();
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        if let Some(max_duration) = config.pod.max_duration_sec {
            if started_at.elapsed() >= Duration::from_secs(max_duration) {
                tracing::info!("max_duration_sec reached, shutting down");
                break;
            }
        }
        if let Some(max_pages) = config.pod.max_pages {
            let fetched: u64 = store
                .get("stats:pages_fetched")
                .await?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if fetched >= max_pages {
                tracing::info!(fetched, "max_pages reached, shutting down");
                break;
            }
        }
        if frontier.is_empty().await? && parse_queue.len().await? == 0 {
            tracing::info!("frontier drained and parse queue empty, shutting down");
            break;
        }
    }

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}
