// Stract is an open source web search engine.
// Copyright (C) 2024 Stract ApS
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

pub mod defaults;

use crate::Result;
use std::path::Path;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct UserAgent {
    pub full: String,
    pub token: String,
}

impl UserAgent {
    /// Builds the full user-agent string from `user_agent_template`
    /// (default `"ExperimentalCrawler/1.0 ({email})"`, per the spec's
    /// `{email}`-templated config) and the operator's contact `email` (spec
    /// §6 `email`/`user_agent_template`). `token` is the bare product name
    /// robots.txt rules are matched against, taken as the template's first
    /// whitespace-separated word.
    pub fn from_template(template: &str, email: &str) -> Self {
        let full = template.replace("{email}", email);
        let token = full.split_whitespace().next().unwrap_or(&full).to_string();
        Self { full, token }
    }
}

fn default_user_agent_template() -> String {
    "ExperimentalCrawler/1.0 ({email})".to_string()
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct PolitenessConfig {
    #[serde(default = "defaults::Politeness::robots_txt_ttl_sec")]
    pub robots_txt_ttl_sec: u64,

    #[serde(default = "defaults::Politeness::min_crawl_delay_sec")]
    pub min_crawl_delay_sec: u64,

    #[serde(default = "defaults::Politeness::robots_cache_capacity")]
    pub robots_cache_capacity: usize,

    #[serde(default = "defaults::Politeness::exclusion_cache_capacity")]
    pub exclusion_cache_capacity: usize,

    #[serde(default = "defaults::Politeness::max_robots_txt_len_bytes")]
    pub max_robots_txt_len_bytes: usize,

    #[serde(default = "defaults::Politeness::fetch_timeout_sec")]
    pub fetch_timeout_sec: u64,

    /// Domains allowed regardless of robots.txt/exclusion checks, if crawling
    /// should be restricted to an explicit seed set.
    #[serde(default)]
    pub seeded_urls_only: bool,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            robots_txt_ttl_sec: defaults::Politeness::robots_txt_ttl_sec(),
            min_crawl_delay_sec: defaults::Politeness::min_crawl_delay_sec(),
            robots_cache_capacity: defaults::Politeness::robots_cache_capacity(),
            exclusion_cache_capacity: defaults::Politeness::exclusion_cache_capacity(),
            max_robots_txt_len_bytes: defaults::Politeness::max_robots_txt_len_bytes(),
            fetch_timeout_sec: defaults::Politeness::fetch_timeout_sec(),
            seeded_urls_only: false,
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct FrontierConfig {
    #[serde(default = "defaults::Frontier::max_url_len_bytes")]
    pub max_url_len_bytes: usize,

    #[serde(default = "defaults::Frontier::max_urls_per_batch_insert")]
    pub max_urls_per_batch_insert: usize,

    #[serde(default = "defaults::Frontier::bloom_expected_items")]
    pub bloom_expected_items: usize,

    #[serde(default = "defaults::Frontier::bloom_false_positive_rate")]
    pub bloom_false_positive_rate: f64,

    /// Directory holding the per-domain append-only frontier log files.
    pub frontier_dir: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BackpressureConfig {
    #[serde(default = "defaults::Backpressure::soft_limit")]
    pub soft_limit: usize,

    #[serde(default = "defaults::Backpressure::hard_limit")]
    pub hard_limit: usize,

    #[serde(default = "defaults::Backpressure::sleep_base_ms")]
    pub sleep_base_ms: u64,

    #[serde(default = "defaults::Backpressure::sleep_max_ms")]
    pub sleep_max_ms: u64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            soft_limit: defaults::Backpressure::soft_limit(),
            hard_limit: defaults::Backpressure::hard_limit(),
            sleep_base_ms: defaults::Backpressure::sleep_base_ms(),
            sleep_max_ms: defaults::Backpressure::sleep_max_ms(),
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct LockingConfig {
    #[serde(default = "defaults::Locking::process_local_write_locks")]
    pub process_local_write_locks: bool,

    #[serde(default = "defaults::Locking::lock_backoff_base_ms")]
    pub lock_backoff_base_ms: u64,

    #[serde(default = "defaults::Locking::lock_backoff_max_ms")]
    pub lock_backoff_max_ms: u64,

    #[serde(default = "defaults::Locking::lock_ttl_ms")]
    pub lock_ttl_ms: u64,

    /// Bounded wall-clock wait for a remote write-lock acquisition before
    /// giving up on this write batch; the batch is dropped and logged rather
    /// than retried inline.
    #[serde(default = "defaults::Locking::lock_acquire_timeout_ms")]
    pub lock_acquire_timeout_ms: u64,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            process_local_write_locks: defaults::Locking::process_local_write_locks(),
            lock_backoff_base_ms: defaults::Locking::lock_backoff_base_ms(),
            lock_backoff_max_ms: defaults::Locking::lock_backoff_max_ms(),
            lock_ttl_ms: defaults::Locking::lock_ttl_ms(),
            lock_acquire_timeout_ms: defaults::Locking::lock_acquire_timeout_ms(),
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct PodConfig {
    /// Identifies this pod among the deployment; domains are routed to pods
    /// by `pod_for_domain`.
    pub pod_id: usize,
    pub num_pods: usize,

    #[serde(default = "defaults::Pod::num_shards")]
    pub num_shards: usize,

    #[serde(default = "defaults::Pod::num_fetchers")]
    pub num_fetchers: usize,

    #[serde(default = "defaults::Pod::num_parsers")]
    pub num_parsers: usize,

    /// Concurrent tasks run inside a single fetcher process. Each task is
    /// assigned its own shard id, so this must not exceed `num_shards`.
    #[serde(default = "defaults::Pod::fetcher_workers")]
    pub fetcher_workers: usize,

    /// Concurrent tasks run inside a single parser process, all draining
    /// the same pod-local parse queue.
    #[serde(default = "defaults::Pod::parser_workers")]
    pub parser_workers: usize,

    #[serde(default = "defaults::Pod::restart_backoff_ms")]
    pub restart_backoff_ms: u64,

    #[serde(default = "defaults::Pod::shutdown_grace_sec")]
    pub shutdown_grace_sec: u64,

    #[serde(default = "defaults::Pod::startup_stagger_ms")]
    pub startup_stagger_ms: u64,

    /// How many child-process restarts within `restart_storm_window_sec` are
    /// tolerated before the supervisor gives up and aborts the whole run.
    #[serde(default = "defaults::Pod::restart_storm_threshold")]
    pub restart_storm_threshold: u32,

    #[serde(default = "defaults::Pod::restart_storm_window_sec")]
    pub restart_storm_window_sec: u64,

    /// Directories pages are persisted into, sharded by `sha256(url) % len`.
    pub data_dirs: Vec<String>,

    pub max_pages: Option<u64>,
    pub max_duration_sec: Option<u64>,
}

/// One entry of the `pods` config list: pod id is the entry's index. Used
/// by the pod router to lazily open a `Frontier` handle onto a
/// pod other than our own when a parser discovers a link that belongs there.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct PodEndpoint {
    pub redis_url: String,
    pub frontier_dir: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct CrawlerConfig {
    /// Contact email embedded into the user-agent string.
    pub email: String,

    #[serde(default = "default_user_agent_template")]
    pub user_agent_template: String,

    pub redis_url: String,

    /// The full deployment's pod list, indexed by pod id. Used only to
    /// resolve cross-pod routing targets; this pod's own
    /// store/frontier_dir keep coming from `redis_url`/`frontier.frontier_dir`
    /// above so a single-pod config doesn't need to repeat itself here.
    #[serde(default)]
    pub pods: Vec<PodEndpoint>,

    pub seed_file: Option<String>,
    pub exclude_file: Option<String>,

    /// Keep existing frontier/seen-set state instead of clearing it on init.
    #[serde(default)]
    pub resume: bool,

    #[serde(default)]
    pub politeness: PolitenessConfig,

    pub frontier: FrontierConfig,

    #[serde(default)]
    pub backpressure: BackpressureConfig,

    #[serde(default)]
    pub locking: LockingConfig,

    pub pod: PodConfig,
}

impl CrawlerConfig {
    /// Materializes the `UserAgent` this pod's fetcher/politeness enforcer
    /// send, from `user_agent_template` + `email`.
    pub fn user_agent(&self) -> UserAgent {
        UserAgent::from_template(&self.user_agent_template, &self.email)
    }
}

/// Loads a TOML config file from disk, the way every subcommand in the CLI does.
pub fn load_toml_config<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let raw = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}
