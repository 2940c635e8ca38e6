// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `gpumem sizing` command: reservation sizes per selected device.
//!
//! Shows what a caching allocator on top of the recorded allocator would
//! reserve first, on each growth step and at most per chunk, given the
//! current configuration and live device memory.

use super::mib;
use gpu_memory::{AllocError, DeviceLimitRegistry};

pub async fn execute(registry: &DeviceLimitRegistry) -> anyhow::Result<()> {
    let config = registry.config();

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║            gpumem · Reservation Sizing              ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
    println!("  Fraction:       {:.2}", config.fraction_of_memory_to_use);
    println!("  Initial:        {}", fixed_or_fraction(config.initial_reserve_mb));
    println!("  Growth:         {}", fixed_or_fraction(config.growth_reserve_mb));
    println!();

    println!(
        "  {:<8} {:>14} {:>14} {:>14} {:>14} {:>10}",
        "Device", "Avail MB", "Initial MB", "Growth MB", "Max chunk MB", "Min chunk",
    );
    println!("  {}", "-".repeat(80));

    for id in registry.query().selected_devices()? {
        let policy = registry.sizing(id)?;
        println!(
            "  {:<8} {:>14} {:>14} {:>14} {:>14} {:>10}",
            id,
            mib(policy.available_to_alloc() as u64),
            cell(policy.initial_reserve()),
            cell(policy.growth_reserve()),
            cell(policy.max_chunk_size()),
            policy.min_chunk_size(),
        );
    }
    println!();

    Ok(())
}

fn fixed_or_fraction(mb: u64) -> String {
    if mb == 0 {
        "fraction of available".into()
    } else {
        format!("fixed {mb} MB")
    }
}

fn cell(size: Result<usize, AllocError>) -> String {
    match size {
        Ok(bytes) => mib(bytes as u64),
        Err(AllocError::ResourceExhausted { .. }) => "exhausted".into(),
        Err(e) => e.to_string(),
    }
}
