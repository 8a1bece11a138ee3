// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `hetero-rt run` command: drive the full host stack over simulated
//! devices.

use super::{resolve_devices, synthetic_module};
use device_registry::{BackendRegistry, DeviceManager, MemSize};
use graph_ir::ExecutionContext;
use host_runtime::sim::{SimBackend, SimDeviceManagerFactory};
use host_runtime::HostManager;
use partitioner::CompilationContext;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    config: Option<PathBuf>,
    devices: usize,
    device_memory: String,
    layers: usize,
    weight_size: String,
    requests: usize,
    saturate: bool,
) -> anyhow::Result<()> {
    let (device_configs, host_config) = resolve_devices(config, devices, &device_memory)?;
    let weight_bytes = MemSize::parse(&weight_size)
        .map_err(|e| anyhow::anyhow!("invalid weight size: {e}"))?
        .as_bytes();

    let mut registry = BackendRegistry::new();
    for cfg in &device_configs {
        if !registry.contains(&cfg.backend_name) {
            registry.register(Arc::new(SimBackend::new(cfg.backend_name.clone())));
        }
    }

    let factory = SimDeviceManagerFactory::new(1 << 30);
    let host = HostManager::init(device_configs, registry, &factory, host_config).await?;

    let module = synthetic_module("synthetic", layers, weight_bytes);
    let admit_start = Instant::now();
    host.add_network(module, &CompilationContext::new(), saturate)
        .await?;
    println!(
        "Network admitted in {:.1} ms.",
        admit_start.elapsed().as_secs_f64() * 1000.0
    );

    let dag = host.get_network_dag("synthetic")?;
    println!(
        "  {} sub-networks across {} devices{}",
        dag.sub_networks().count(),
        factory.created().len(),
        if saturate { " (saturated)" } else { "" },
    );

    let run_start = Instant::now();
    for i in 0..requests {
        let ctx = ExecutionContext::new();
        if let Err(err) = host.run_network_blocking("synthetic", ctx).await {
            anyhow::bail!("request {i} failed: {err}");
        }
    }
    let elapsed = run_start.elapsed();
    println!(
        "Completed {requests} requests in {:.1} ms ({:.0} req/s).",
        elapsed.as_secs_f64() * 1000.0,
        requests as f64 / elapsed.as_secs_f64().max(1e-9),
    );

    println!("Per-device run counts:");
    for device in factory.created() {
        println!(
            "  {}: {} runs, {} loaded",
            device.device_id(),
            device.run_count(),
            device.loaded_networks().len(),
        );
    }

    host.clear_host().await?;
    Ok(())
}
