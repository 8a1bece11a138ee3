// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device identifiers, constraint records, and configuration.

use std::collections::BTreeMap;
use std::fmt;

/// Identifies one physical device. Dense, 0-based, process-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct DeviceId(pub usize);

impl DeviceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{}", self.0)
    }
}

/// A partitioning-time device slot, later bound to one or more physical
/// devices. Multiple logical devices on one DAG node mean replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct LogicalDeviceId(pub usize);

impl LogicalDeviceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for LogicalDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "logical:{}", self.0)
    }
}

/// Constraint information for one physical device, consumed by the
/// partitioner to communicate memory limits and roofline costs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeviceInfo {
    /// Available memory on the device in bytes.
    pub available_memory: u64,
    /// Backend name (e.g. `"cpu"`, an accelerator name).
    pub backend_name: String,
    /// Comma-separated node kinds this backend will not run (e.g.
    /// `"Div,Add"`).
    #[serde(default)]
    pub non_supported_nodes: String,
    /// Comma-separated node kinds this backend supports; the empty string
    /// means every kind.
    #[serde(default)]
    pub supported_nodes: String,
    /// Available SRAM capacity in bytes.
    #[serde(default)]
    pub sram_capacity: u64,
    /// Peak compute on the device in ops/second (int8).
    #[serde(default)]
    pub peak_compute: f64,
    /// Peak DRAM bandwidth in bytes/second.
    #[serde(default)]
    pub peak_dram_bw: f64,
    /// Peak SRAM bandwidth in bytes/second.
    #[serde(default)]
    pub peak_sram_bw: f64,
    /// Peak ingress/egress PCIe bandwidth in bytes/second.
    #[serde(default)]
    pub peak_pcie_bw: f64,
}

impl DeviceInfo {
    /// Creates a record with the required fields; bandwidth and capability
    /// fields default to zero/empty.
    pub fn new(backend_name: impl Into<String>, available_memory: u64) -> Self {
        Self {
            available_memory,
            backend_name: backend_name.into(),
            non_supported_nodes: String::new(),
            supported_nodes: String::new(),
            sram_capacity: 0,
            peak_compute: 0.0,
            peak_dram_bw: 0.0,
            peak_sram_bw: 0.0,
            peak_pcie_bw: 0.0,
        }
    }
}

/// Configuration for instantiating one device manager.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeviceConfig {
    /// Backend used for this device. Required.
    pub backend_name: String,
    /// A human-readable label for the device.
    #[serde(default)]
    pub name: Option<String>,
    /// Runtime-assigned id, used for stats reporting.
    #[serde(default)]
    pub device_id: usize,
    /// Device memory size in bytes; 0 means "use the backend default".
    #[serde(default)]
    pub device_memory: u64,
    /// Free-form parameters passed through to the device manager.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl DeviceConfig {
    pub fn new(backend_name: impl Into<String>) -> Self {
        Self {
            backend_name: backend_name.into(),
            name: None,
            device_id: 0,
            device_memory: 0,
            parameters: BTreeMap::new(),
        }
    }

    /// Returns `true` if a human-readable label was provided.
    pub fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.is_empty())
    }

    /// Returns the configured memory, falling back to `default_memory`
    /// when unset (0).
    pub fn device_memory_or(&self, default_memory: u64) -> u64 {
        if self.device_memory == 0 {
            default_memory
        } else {
            self.device_memory
        }
    }
}
