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
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crawler_core::config::{self, CrawlerConfig};
use crawler_core::entrypoint;
use tracing_subscriber::prelude::*;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run this pod's supervisor: one-time initialization, then spawn and
    /// monitor its fetcher/parser child processes.
    Supervisor { config_path: String },

    /// Run a single fetcher process for one shard of this pod's ready queue.
    /// Spawned by `supervisor`; can also be run directly for debugging one
    /// shard in isolation.
    Fetcher {
        config_path: String,

        #[clap(long)]
        shard: usize,
    },

    /// Run a single parser process draining this pod's parse queue. Spawned
    /// by `supervisor`; can also be run directly for debugging.
    Parser { config_path: String },

    /// Run an entire pod -- initialization plus every fetcher/parser worker
    /// -- as tokio tasks inside this one process, instead of spawning
    /// separate OS processes. Intended for local development and
    /// single-machine crawls.
    Run { config_path: String },
}

fn load_config(path: &str) -> Result<CrawlerConfig> {
    config::load_toml_config(path).with_context(|| format!("failed to load config: '{path}'"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .with_target(false)
        .finish()
        .init();

    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    match args.command {
        Commands::Supervisor { config_path } => {
            let config = load_config(&config_path)?;
            runtime.block_on(entrypoint::crawler::supervisor(config, config_path))?;
        }
        Commands::Fetcher { config_path, shard } => {
            let config = load_config(&config_path)?;
            runtime.block_on(entrypoint::crawler::fetcher(config, shard))?;
        }
        Commands::Parser { config_path } => {
            let config = load_config(&config_path)?;
            runtime.block_on(entrypoint::crawler::parser(config))?;
        }
        Commands::Run { config_path } => {
            let config = load_config(&config_path)?;
            runtime.block_on(entrypoint::crawler::run(config, config_path))?;
        }
    }

    Ok(())
}
