// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `hetero-rt partition` command: partition a synthetic network and
//! print the execution DAG.

use super::{resolve_devices, synthetic_module};
use device_registry::{BackendRegistry, DeviceInfo, MemSize};
use host_runtime::sim::SimBackend;
use partitioner::{CompilationContext, Partitioner, PartitionerOptions};
use std::path::PathBuf;
use std::sync::Arc;

pub async fn execute(
    config: Option<PathBuf>,
    devices: usize,
    device_memory: String,
    layers: usize,
    weight_size: String,
    dump_dot: bool,
) -> anyhow::Result<()> {
    let (device_configs, _host_config) = resolve_devices(config, devices, &device_memory)?;
    let weight_bytes = MemSize::parse(&weight_size)
        .map_err(|e| anyhow::anyhow!("invalid weight size: {e}"))?
        .as_bytes();

    // One simulated backend per distinct backend name in the table.
    let mut registry = BackendRegistry::new();
    let mut device_info = Vec::new();
    for cfg in &device_configs {
        if !registry.contains(&cfg.backend_name) {
            registry.register(Arc::new(SimBackend::new(cfg.backend_name.clone())));
        }
        let mut info = DeviceInfo::new(cfg.backend_name.clone(), cfg.device_memory_or(1 << 30));
        if let Some(kinds) = cfg.parameters.get("supported_nodes") {
            info.supported_nodes = kinds.clone();
        }
        if let Some(kinds) = cfg.parameters.get("non_supported_nodes") {
            info.non_supported_nodes = kinds.clone();
        }
        device_info.push(info);
    }

    let mut module = synthetic_module("synthetic", layers, weight_bytes);
    let total_weights: u64 = weight_bytes * layers as u64;

    println!("Partitioning a synthetic network:");
    println!("  layers: {layers} ({} nodes)", layers * 2 + 1);
    println!("  weights: {}", MemSize::from_bytes(total_weights));
    println!("  devices: {}", device_info.len());
    println!();

    let options = PartitionerOptions {
        dump_partition: dump_dot,
        log_partition: dump_dot,
        ..Default::default()
    };
    let partitioner = Partitioner::new(device_info, registry).with_options(options);
    let dags = partitioner.partition(&mut module, &CompilationContext::new())?;

    for dag in &dags {
        println!("Network '{}':", dag.name());
        println!(
            "  {:<28} {:<10} {:<14} {:<10}",
            "Partition", "Backend", "Logical", "Children"
        );
        println!("  {}", "-".repeat(66));
        for (_, node) in dag.sub_networks() {
            let logical: Vec<usize> = node.logical_devices.iter().map(|l| l.index()).collect();
            let children: Vec<&str> = node
                .children
                .iter()
                .map(|&c| dag.node(c).name.as_str())
                .collect();
            println!(
                "  {:<28} {:<10} {:<14} {:<10}",
                node.name,
                node.backend_name,
                format!("{logical:?}"),
                children.join(","),
            );
            if let Some(func) = module.function(&node.name) {
                println!("    {}", func.summary());
            }
        }
        if dump_dot {
            println!("  DOT dumps written to the current directory.");
        }
        println!();
    }

    Ok(())
}
