// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! CLI subcommands and shared helpers.

pub mod partition;
pub mod run;

use device_registry::{DeviceConfig, MemSize};
use graph_ir::{ElemType, Function, Module, Node, NodeKind, Shape, TypeDesc, ValueRef};
use host_runtime::HostFileConfig;
use std::path::PathBuf;

/// Initializes tracing based on `-v` count: warn by default, then
/// info, debug, trace.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Resolves the device table: an explicit config file wins, otherwise
/// `count` identical simulated devices.
pub fn resolve_devices(
    config: Option<PathBuf>,
    count: usize,
    device_memory: &str,
) -> anyhow::Result<(Vec<DeviceConfig>, host_runtime::HostConfig)> {
    if let Some(path) = config {
        let file = HostFileConfig::from_file(&path)?;
        if file.devices.is_empty() {
            anyhow::bail!("config '{}' declares no devices", path.display());
        }
        return Ok((file.devices, file.host));
    }

    let memory = MemSize::parse(device_memory)
        .map_err(|e| anyhow::anyhow!("invalid device memory: {e}"))?;
    let devices = (0..count)
        .map(|_| {
            let mut cfg = DeviceConfig::new("cpu");
            cfg.device_memory = memory.as_bytes();
            cfg
        })
        .collect();
    Ok((devices, host_runtime::HostConfig::default()))
}

/// Builds a synthetic conv/relu network with `layers` operator pairs and
/// one weight constant per conv.
pub fn synthetic_module(name: &str, layers: usize, weight_bytes: u64) -> Module {
    let elems = (weight_bytes / 4).max(1) as usize;
    let ty = |n: usize| TypeDesc::new(Shape::vector(n), ElemType::F32);

    let mut module = Module::new();
    let input = module.add_placeholder("input", ty(1024));
    let result = module.add_placeholder("result", ty(1024));
    let mut func = Function::new(name);
    let mut prev = None;
    for i in 0..layers.max(1) {
        let weight = module.add_constant(format!("w{i}"), ty(elems));
        let src = match prev {
            None => ValueRef::Placeholder(input),
            Some(p) => ValueRef::output_of(p),
        };
        let conv = func
            .add_node(Node::new(
                format!("conv{i}"),
                NodeKind::Conv,
                vec![src, ValueRef::Constant(weight)],
                vec![ty(1024)],
            ))
            .expect("synthetic graph is well-formed");
        let relu = func
            .add_node(Node::new(
                format!("relu{i}"),
                NodeKind::Relu,
                vec![ValueRef::output_of(conv)],
                vec![ty(1024)],
            ))
            .expect("synthetic graph is well-formed");
        prev = Some(relu);
    }
    func.add_node(Node::new(
        "out",
        NodeKind::Save,
        vec![
            ValueRef::output_of(prev.expect("at least one layer")),
            ValueRef::Placeholder(result),
        ],
        vec![ty(1024)],
    ))
    .expect("synthetic graph is well-formed");
    module.insert_function(func).expect("fresh module");
    module
}
