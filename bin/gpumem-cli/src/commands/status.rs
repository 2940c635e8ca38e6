// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `gpumem status` command: device inventory and limit-clamped memory.

use super::mib;
use gpu_memory::DeviceLimitRegistry;
use serde_json::json;

pub async fn execute(registry: &DeviceLimitRegistry, json_output: bool) -> anyhow::Result<()> {
    let query = registry.query();
    let count = query.device_count();

    if json_output {
        let mut devices = Vec::with_capacity(count);
        for id in 0..count as i32 {
            devices.push(json!({
                "device_id": id,
                "properties": query.properties(id)?,
                "driver_version": query.driver_version(id)?,
                "runtime_version": query.runtime_version(id)?,
                "managed_oversubscription": query.is_managed_memory_oversubscription_supported(id)?,
                "limit_bytes": registry.limit_size(id)?,
                "recorded_bytes": registry.recorded_size(id)?,
                "mem_info": registry.mem_info(id)?,
            }));
        }
        let report = json!({
            "backend": registry.backend().name(),
            "config": registry.config(),
            "selected_devices": query.selected_devices()?,
            "devices": devices,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║            gpumem · Device Memory Status            ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
    println!("  Backend:        {}", registry.backend().name());
    println!("  Devices:        {count}");
    println!("  Selected:       {:?}", query.selected_devices()?);
    if count == 0 {
        println!();
        println!("  No devices visible.");
        return Ok(());
    }
    println!("  Current:        {}", query.current_device_id());
    println!(
        "  Tensor cores:   {}",
        if query.tensor_core_available() { "yes" } else { "no" }
    );
    println!();

    for id in 0..count as i32 {
        let props = query.properties(id)?;
        let info = registry.mem_info(id)?;
        let (major, minor) = (props.compute_major, props.compute_minor);

        // ── Device ─────────────────────────────────────────────
        println!("  Device {id}: {}", props.name);
        println!("   Compute:      sm_{major}{minor} ({} SMs)", props.multiprocessor_count);
        println!(
            "   Threads:      {} / SM, {} / block",
            props.max_threads_per_multiprocessor, props.max_threads_per_block,
        );
        let [gx, gy, gz] = props.max_grid_dim;
        println!("   Grid:         {gx} x {gy} x {gz}");
        println!(
            "   Versions:     driver {}, runtime {}",
            version(query.driver_version(id)?),
            version(query.runtime_version(id)?),
        );
        println!(
            "   Managed:      {} (oversubscription: {})",
            yes_no(props.managed_memory),
            yes_no(query.is_managed_memory_oversubscription_supported(id)?),
        );

        // ── Memory ─────────────────────────────────────────────
        let limit = registry.limit_size(id)?;
        if limit == 0 {
            println!("   Soft limit:   none (not recording)");
        } else {
            println!(
                "   Soft limit:   {} MB, {} MB recorded",
                mib(limit),
                mib(registry.recorded_size(id)?),
            );
        }
        println!(
            "   Available:    {} / {} MB{}",
            mib(info.available as u64),
            mib(info.total as u64),
            if info.clamped { "  (clamped)" } else { "" },
        );
        println!(
            "   Physical:     {} / {} MB",
            mib(info.actual_available as u64),
            mib(info.actual_total as u64),
        );
        println!();
    }

    Ok(())
}

/// Formats `1000 * major + 10 * minor` as `major.minor`.
fn version(encoded: i32) -> String {
    format!("{}.{}", encoded / 1000, (encoded % 1000) / 10)
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        assert_eq!(version(12020), "12.2");
        assert_eq!(version(11080), "11.8");
    }
}
