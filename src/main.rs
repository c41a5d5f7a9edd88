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
use crawl_frontier::config::Config;
use crawl_frontier::coordinator::Coordinator;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a fixed number of scheduling cycles against a config file,
    /// printing each batch of URLs it would hand to a fetcher.
    Run {
        config_path: PathBuf,

        /// Number of `tick` cycles to run before exiting.
        #[clap(long, default_value_t = 10)]
        cycles: usize,

        /// Max URLs requested per cycle.
        #[clap(long, default_value_t = 50)]
        batch_size: usize,
    },
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(
                    format!("crawl_frontier={log_level}")
                        .parse()
                        .expect("default log directive is always valid"),
                )
                .from_env_lossy(),
        )
        .without_time()
        .with_target(false)
        .finish()
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Run {
            config_path,
            cycles,
            batch_size,
        } => {
            let config = Config::load_from_file(&config_path).with_context(|| {
                format!("failed to load config from {}", config_path.display())
            })?;
            init_tracing(&config.log_level);

            info!(
                seeds = config.seed_urls.len(),
                data_directory = %config.data_directory,
                "starting crawl scheduler"
            );

            let coordinator = Coordinator::new(&config)?;

            for cycle in 0..cycles {
                let fetched = coordinator.tick(batch_size, |url| {
                    info!(cycle, url, "would fetch");
                    Vec::new()
                })?;
                info!(cycle, fetched, "cycle complete");
            }

            coordinator.shutdown();
        }
    }

    Ok(())
}
