// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The backend interface and the per-backend aggregate consumed by the
//! partitioner.
//!
//! A backend is the code generator + capability predicate for one class of
//! devices. The partitioner never talks to devices directly: it asks
//! backends which operators they accept, and the provisioner asks them to
//! compile sub-functions into [`RuntimeBundle`]s.

use crate::DeviceError;
use graph_ir::{Function, KindSet, Module, Node};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Free-form options handed to backends at compile time.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct BackendOptions {
    pub opts: BTreeMap<String, String>,
}

impl BackendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.opts.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.opts.get(key).map(String::as_str)
    }
}

/// The compiled artifact for one sub-function: symbol table plus the
/// total constant payload size. Opaque to everything but the device layer.
#[derive(Debug, Clone)]
pub struct RuntimeBundle {
    /// Name of the compiled sub-function.
    pub name: String,
    /// Placeholder symbol table: name → byte size.
    pub symbol_table: BTreeMap<String, u64>,
    /// Total bytes of constants baked into the artifact.
    pub constant_bytes: u64,
}

/// A code generator + runtime pair for a class of devices.
pub trait Backend: Send + Sync {
    /// The backend name devices reference in their configuration.
    fn name(&self) -> &str;

    /// Whether this backend can execute the given operator node.
    fn is_op_supported(&self, node: &Node) -> bool;

    /// Whether this backend lowers the node into simpler operators it
    /// does support.
    fn should_lower(&self, _node: &Node) -> bool {
        false
    }

    /// Compiles a sub-function into a loadable artifact.
    fn compile(
        &self,
        func: &Function,
        module: &Module,
        opts: &BackendOptions,
    ) -> Result<RuntimeBundle, DeviceError>;
}

/// Aggregated description of one backend across all devices using it.
///
/// Memory size and bandwidths are assumed identical across devices of the
/// same backend.
#[derive(Clone)]
pub struct BackendInfo {
    /// Number of physical devices with this backend.
    pub num_devices: usize,
    /// Per-device memory in bytes.
    pub mem_size: u64,
    /// Per-device SRAM capacity in bytes.
    pub sram_capacity: u64,
    /// Peak compute in ops/second.
    pub peak_compute: f64,
    /// Peak DRAM bandwidth in bytes/second.
    pub peak_dram_bw: f64,
    /// Peak SRAM bandwidth in bytes/second.
    pub peak_sram_bw: f64,
    /// Kinds this backend supports; empty means all.
    pub supported_kinds: KindSet,
    /// Kinds this backend refuses.
    pub non_supported_kinds: KindSet,
    /// The backend implementation.
    pub backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for BackendInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendInfo")
            .field("num_devices", &self.num_devices)
            .field("mem_size", &self.mem_size)
            .field("supported_kinds", &self.supported_kinds)
            .field("non_supported_kinds", &self.non_supported_kinds)
            .finish()
    }
}

/// Resolves backend names to backend implementations.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend under its own name, replacing any previous
    /// registration.
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    /// Resolves a backend by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Backend>, DeviceError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownBackend(name.to_string()))
    }

    /// Returns `true` if a backend with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Registered backend names, in order.
    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_ir::NodeKind;

    struct NullBackend;

    impl Backend for NullBackend {
        fn name(&self) -> &str {
            "null"
        }

        fn is_op_supported(&self, _node: &Node) -> bool {
            true
        }

        fn compile(
            &self,
            func: &Function,
            _module: &Module,
            _opts: &BackendOptions,
        ) -> Result<RuntimeBundle, DeviceError> {
            Ok(RuntimeBundle {
                name: func.name().to_string(),
                symbol_table: BTreeMap::new(),
                constant_bytes: 0,
            })
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut reg = BackendRegistry::new();
        reg.register(Arc::new(NullBackend));
        assert!(reg.contains("null"));
        assert_eq!(reg.get("null").unwrap().name(), "null");
        assert!(reg.get("missing").is_err());
    }

    #[test]
    fn test_backend_options() {
        let mut opts = BackendOptions::new();
        opts.set("fast-math", "true");
        assert_eq!(opts.get("fast-math"), Some("true"));
        assert_eq!(opts.get("absent"), None);
    }

    #[test]
    fn test_kind_set_defaults() {
        let set = KindSet::new();
        assert!(set.is_empty());
        assert!(!set.contains(NodeKind::Add));
    }
}
