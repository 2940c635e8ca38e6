// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `gpumem stress` command: concurrent random allocate/free cycles.
//!
//! Each worker runs on a blocking thread and keeps its own set of live
//! blocks. After every successful allocation it samples the recorded total;
//! the largest sample above the soft limit is the observed overshoot from
//! the unsynchronised limit check.

use super::mib;
use gpu_backend::DevicePtr;
use gpu_memory::{AllocError, ByteSize, DeviceLimitRegistry, OomReason};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

/// Blocks are multiples of this.
const GRANULE: usize = 4096;

#[derive(Debug, Default)]
struct WorkerReport {
    allocations: u64,
    frees: u64,
    limit_ooms: u64,
    device_ooms: u64,
    max_recorded: u64,
}

pub async fn execute(
    registry: &'static DeviceLimitRegistry,
    device: i32,
    workers: usize,
    iterations: usize,
    max_block: String,
    seed: u64,
) -> anyhow::Result<()> {
    let max_block = ByteSize::parse(&max_block)
        .map_err(|e| anyhow::anyhow!("invalid --max-block '{max_block}': {e}"))?;
    anyhow::ensure!(
        max_block.as_bytes() >= GRANULE as u64,
        "--max-block must be at least {GRANULE} bytes"
    );
    let max_block = usize::try_from(max_block.as_bytes())?;
    let allocator = registry.instance(device)?;
    let limit = allocator.limit_bytes();

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║            gpumem · Soft Limit Stress               ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
    println!("  Device:         {device}");
    println!("  Workers:        {workers} x {iterations} steps");
    println!("  Max block:      {} MB", mib(max_block as u64));
    if limit == 0 {
        println!("  Soft limit:     none (not recording)");
    } else {
        println!("  Soft limit:     {} MB", mib(limit));
    }
    println!();

    let start = Instant::now();
    let handles: Vec<_> = (0..workers)
        .map(|w| {
            tokio::task::spawn_blocking(move || {
                run_worker(registry, device, iterations, max_block, seed + w as u64)
            })
        })
        .collect();

    let mut total = WorkerReport::default();
    for handle in handles {
        let report = handle.await??;
        total.allocations += report.allocations;
        total.frees += report.frees;
        total.limit_ooms += report.limit_ooms;
        total.device_ooms += report.device_ooms;
        total.max_recorded = total.max_recorded.max(report.max_recorded);
    }
    let elapsed = start.elapsed();

    let snapshot = allocator.stats().snapshot();
    let overshoot = if limit == 0 {
        0
    } else {
        total.max_recorded.saturating_sub(limit)
    };

    println!("  Results");
    println!("   Elapsed:      {:.1} ms", elapsed.as_secs_f64() * 1000.0);
    println!("   Allocations:  {}", total.allocations);
    println!("   Frees:        {}", total.frees);
    println!(
        "   OOMs:         {} soft limit, {} device",
        total.limit_ooms, total.device_ooms,
    );
    println!("   Max recorded: {} MB", mib(total.max_recorded));
    println!("   Overshoot:    {} MB", mib(overshoot));
    println!("   Final:        {} MB recorded", mib(allocator.recorded_bytes()));
    println!();
    println!("{}", snapshot.summary());

    if allocator.is_recording() {
        anyhow::ensure!(
            allocator.recorded_bytes() == 0,
            "recorded total did not return to zero after all blocks were freed"
        );
    }
    Ok(())
}

fn run_worker(
    registry: &DeviceLimitRegistry,
    device: i32,
    iterations: usize,
    max_block: usize,
    seed: u64,
) -> Result<WorkerReport, AllocError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut live: Vec<(DevicePtr, usize)> = Vec::new();
    let mut report = WorkerReport::default();

    for _ in 0..iterations {
        if live.is_empty() || rng.gen_bool(0.6) {
            let size = rng.gen_range(1..=max_block / GRANULE) * GRANULE;
            match registry.allocate(device, size, false) {
                Ok(ptr) => {
                    live.push((ptr, size));
                    report.allocations += 1;
                    report.max_recorded = report.max_recorded.max(registry.recorded_size(device)?);
                }
                Err(AllocError::OutOfMemory { reason, .. }) => match reason {
                    OomReason::SoftLimit => report.limit_ooms += 1,
                    OomReason::Device => report.device_ooms += 1,
                },
                Err(e) => return Err(e),
            }
        } else {
            let (ptr, size) = live.swap_remove(rng.gen_range(0..live.len()));
            registry.free(device, ptr, size)?;
            report.frees += 1;
        }
    }

    for (ptr, size) in live.drain(..) {
        registry.free(device, ptr, size)?;
        report.frees += 1;
    }
    tracing::debug!(seed, ?report, "worker finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_backend::SimulatedBackend;
    use gpu_memory::AllocatorConfig;
    use std::sync::Arc;

    #[test]
    fn test_worker_returns_everything() {
        let config = AllocatorConfig {
            memory_limit_mb: 8,
            ..Default::default()
        };
        let backend = Arc::new(SimulatedBackend::single(1 << 30));
        let registry = DeviceLimitRegistry::new(config, backend.clone());

        let report = run_worker(&registry, 0, 500, 1 << 20, 3).unwrap();
        assert_eq!(report.allocations, report.frees);
        assert!(report.max_recorded <= 8 << 20);
        assert_eq!(registry.recorded_size(0).unwrap(), 0);
        assert_eq!(backend.live_allocations(0), 0);
    }

    #[test]
    fn test_worker_bad_device() {
        let backend = Arc::new(SimulatedBackend::single(1 << 30));
        let registry = DeviceLimitRegistry::new(AllocatorConfig::default(), backend);
        assert!(matches!(
            run_worker(&registry, 4, 10, 1 << 20, 0),
            Err(AllocError::OutOfRange { device_id: 4, .. })
        ));
    }
}
