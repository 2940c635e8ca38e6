// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Sub-command implementations and shared setup.

pub mod sizing;
pub mod status;
pub mod stress;

use anyhow::Context;
use gpu_backend::{Backend, SimulatedBackend};
use gpu_memory::{global, AllocatorConfig, ByteSize, DeviceLimitRegistry};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose > 1)
        .init();
}

/// Builds the process-wide registry from the configuration file,
/// `GPUMEM_*` overrides and command-line flags, in that order.
pub fn install_registry(
    config_path: Option<&Path>,
    simulate: Option<&str>,
    limit_mb: Option<u64>,
) -> anyhow::Result<&'static DeviceLimitRegistry> {
    let config = match config_path {
        Some(path) => AllocatorConfig::from_file(path)?,
        None => AllocatorConfig::default(),
    };
    let mut config = config
        .with_env_overrides()
        .context("applying GPUMEM_* overrides")?;
    if let Some(limit) = limit_mb {
        config.memory_limit_mb = limit;
    }
    config.validate()?;

    let backend: Arc<dyn Backend> = match simulate {
        Some(sizes) => {
            let capacities: Vec<u64> = ByteSize::parse_list(sizes)
                .with_context(|| format!("invalid --simulate '{sizes}'"))?
                .iter()
                .map(ByteSize::as_bytes)
                .collect();
            anyhow::ensure!(!capacities.is_empty(), "--simulate needs at least one size");
            Arc::new(SimulatedBackend::with_capacities(&capacities))
        }
        None => global::default_backend(),
    };

    tracing::info!(backend = backend.name(), limit_mb = config.memory_limit_mb, "allocator configured");
    global::install(DeviceLimitRegistry::new(config, backend))?;
    Ok(global::registry())
}

/// Formats a byte count as MiB with two decimals.
pub fn mib(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / (1u64 << 20) as f64)
}
