// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # gpumem
//!
//! Command-line interface for the recorded GPU allocator.
//!
//! ## Usage
//! ```bash
//! # Devices, versions and limit-clamped memory
//! gpumem status --limit-mb 4096
//!
//! # Reservation sizes a caching allocator would pick
//! gpumem sizing --config gpumem.toml
//!
//! # Hammer the soft limit from 16 threads on two simulated devices
//! gpumem --simulate 16G,16G --limit-mb 512 stress --workers 16 --iterations 5000
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "gpumem",
    about = "Soft-limited, device-scoped GPU memory accounting",
    version,
    author
)]
struct Cli {
    /// Path to a TOML allocator configuration.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use simulated devices with these capacities (e.g., "16G,8G").
    #[arg(long, global = true)]
    simulate: Option<String>,

    /// Per-device soft limit in MiB, overriding the configuration.
    #[arg(long, global = true)]
    limit_mb: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show devices, capabilities and limit-clamped memory.
    Status {
        /// Print JSON instead of the table.
        #[arg(long)]
        json: bool,
    },

    /// Show initial, growth and max-chunk reservation sizes per device.
    Sizing,

    /// Run concurrent random allocate/free cycles against the soft limit.
    Stress {
        /// Device to allocate on.
        #[arg(short, long, default_value_t = 0)]
        device: i32,

        /// Number of concurrent workers.
        #[arg(short, long, default_value_t = 8)]
        workers: usize,

        /// Allocate/free steps per worker.
        #[arg(short, long, default_value_t = 1000)]
        iterations: usize,

        /// Largest single block (e.g., "64M").
        #[arg(long, default_value = "64M")]
        max_block: String,

        /// RNG seed; workers use consecutive seeds.
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);

    let registry = commands::install_registry(
        cli.config.as_deref(),
        cli.simulate.as_deref(),
        cli.limit_mb,
    )?;

    let result = match cli.command {
        Commands::Status { json } => commands::status::execute(registry, json).await,
        Commands::Sizing => commands::sizing::execute(registry).await,
        Commands::Stress {
            device,
            workers,
            iterations,
            max_block,
            seed,
        } => commands::stress::execute(registry, device, workers, iterations, max_block, seed).await,
    };

    gpu_memory::global::log_peak_usage();
    result
}
