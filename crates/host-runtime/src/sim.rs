// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Simulated backend and device manager.
//!
//! A functional skeleton of the device layer: compilation records real
//! symbol tables and constant sizes, loading enforces the device memory
//! ceiling, and runs complete instantly (optionally failing by name, for
//! tests). The simulation exercises the full admission, provisioning,
//! and dispatch machinery without accelerator hardware.

use async_trait::async_trait;
use device_registry::{
    Backend, BackendOptions, DeviceConfig, DeviceError, DeviceId, DeviceManager, RuntimeBundle,
};
use graph_ir::{ExecutionContext, Function, KindSet, Module, Node, ValueRef};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::host::DeviceManagerFactory;

/// A backend accepting a configurable kind set.
pub struct SimBackend {
    name: String,
    supported: KindSet,
    non_supported: KindSet,
}

impl SimBackend {
    /// A backend accepting every operator kind.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supported: KindSet::new(),
            non_supported: KindSet::new(),
        }
    }

    /// Restricts the backend to the given kinds.
    pub fn with_supported(mut self, kinds: KindSet) -> Self {
        self.supported = kinds;
        self
    }

    /// Excludes the given kinds.
    pub fn with_non_supported(mut self, kinds: KindSet) -> Self {
        self.non_supported = kinds;
        self
    }
}

impl Backend for SimBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_op_supported(&self, node: &Node) -> bool {
        if self.non_supported.contains(node.kind) {
            return false;
        }
        self.supported.is_empty() || self.supported.contains(node.kind)
    }

    fn compile(
        &self,
        func: &Function,
        module: &Module,
        _opts: &BackendOptions,
    ) -> Result<RuntimeBundle, DeviceError> {
        let mut symbol_table = BTreeMap::new();
        let mut constant_bytes = 0;
        let mut seen_constants = HashSet::new();
        for (_, node) in func.nodes() {
            for input in &node.inputs {
                match *input {
                    ValueRef::Placeholder(p) => {
                        if let Some(ph) = module.placeholder(p) {
                            symbol_table.insert(ph.name.clone(), ph.size_bytes());
                        }
                    }
                    ValueRef::Constant(c) => {
                        if seen_constants.insert(c) {
                            if let Some(constant) = module.constant(c) {
                                constant_bytes += constant.size_bytes();
                            }
                        }
                    }
                    ValueRef::NodeOutput { .. } => {}
                }
            }
        }
        Ok(RuntimeBundle {
            name: func.name().to_string(),
            symbol_table,
            constant_bytes,
        })
    }
}

/// An in-process device manager with a memory ceiling.
pub struct SimDeviceManager {
    id: DeviceId,
    backend_name: String,
    max_memory: u64,
    loaded: Mutex<HashMap<String, u64>>,
    run_count: AtomicUsize,
    run_log: Mutex<Vec<String>>,
    fail_on: Option<String>,
    run_delay: Duration,
}

impl SimDeviceManager {
    pub fn new(id: DeviceId, backend_name: impl Into<String>, max_memory: u64) -> Self {
        Self {
            id,
            backend_name: backend_name.into(),
            max_memory,
            loaded: Mutex::new(HashMap::new()),
            run_count: AtomicUsize::new(0),
            run_log: Mutex::new(Vec::new()),
            fail_on: None,
            run_delay: Duration::ZERO,
        }
    }

    /// Makes `run_function` fail for the named sub-network.
    pub fn with_fail_on(mut self, name: impl Into<String>) -> Self {
        self.fail_on = Some(name.into());
        self
    }

    /// Adds latency to every run.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    /// Number of completed runs on this device.
    pub fn run_count(&self) -> usize {
        self.run_count.load(Ordering::Relaxed)
    }

    /// Names of the sub-networks run on this device, in order.
    pub fn runs(&self) -> Vec<String> {
        self.run_log.lock().expect("run log lock").clone()
    }

    /// Names of the currently loaded sub-networks.
    pub fn loaded_networks(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .loaded
            .lock()
            .expect("load table lock")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn used_memory(&self) -> u64 {
        self.loaded.lock().expect("load table lock").values().sum()
    }
}

#[async_trait]
impl DeviceManager for SimDeviceManager {
    fn device_id(&self) -> DeviceId {
        self.id
    }

    fn backend_name(&self) -> &str {
        &self.backend_name
    }

    async fn add_network(&self, name: &str, bundle: Arc<RuntimeBundle>) -> Result<(), DeviceError> {
        let mut loaded = self.loaded.lock().expect("load table lock");
        if loaded.contains_key(name) {
            return Err(DeviceError::NetworkAlreadyLoaded(name.to_string()));
        }
        let used: u64 = loaded.values().sum();
        let needed = bundle.constant_bytes;
        if used + needed > self.max_memory {
            return Err(DeviceError::OutOfMemory {
                needed,
                available: self.max_memory - used,
            });
        }
        loaded.insert(name.to_string(), needed);
        Ok(())
    }

    async fn evict_network(&self, name: &str) -> Result<(), DeviceError> {
        self.loaded
            .lock()
            .expect("load table lock")
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DeviceError::NetworkNotFound(name.to_string()))
    }

    async fn run_function(
        &self,
        name: &str,
        ctx: ExecutionContext,
    ) -> (Result<(), DeviceError>, ExecutionContext) {
        if !self.run_delay.is_zero() {
            tokio::time::sleep(self.run_delay).await;
        }
        if !self.loaded.lock().expect("load table lock").contains_key(name) {
            return (Err(DeviceError::NetworkNotFound(name.to_string())), ctx);
        }
        if self.fail_on.as_deref() == Some(name) {
            return (
                Err(DeviceError::RunFailed(format!(
                    "simulated failure in '{name}'"
                ))),
                ctx,
            );
        }
        self.run_log.lock().expect("run log lock").push(name.to_string());
        self.run_count.fetch_add(1, Ordering::Relaxed);
        (Ok(()), ctx)
    }

    fn available_memory(&self) -> u64 {
        self.max_memory.saturating_sub(self.used_memory())
    }

    fn maximum_memory(&self) -> u64 {
        self.max_memory
    }

    async fn stop(&self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Builds one [`SimDeviceManager`] per device config and keeps handles
/// to the created devices so tests can inspect run logs.
pub struct SimDeviceManagerFactory {
    /// Memory for devices whose config leaves `device_memory` unset.
    default_memory: u64,
    run_delay: Duration,
    fail_on: Option<String>,
    created: Mutex<Vec<Arc<SimDeviceManager>>>,
}

impl SimDeviceManagerFactory {
    pub fn new(default_memory: u64) -> Self {
        Self {
            default_memory,
            run_delay: Duration::ZERO,
            fail_on: None,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Adds latency to every run on every created device.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    /// Makes every created device fail the named sub-network.
    pub fn with_fail_on(mut self, name: impl Into<String>) -> Self {
        self.fail_on = Some(name.into());
        self
    }

    /// Handles to the devices created so far, in creation order.
    pub fn created(&self) -> Vec<Arc<SimDeviceManager>> {
        self.created.lock().expect("created list lock").clone()
    }
}

impl DeviceManagerFactory for SimDeviceManagerFactory {
    fn create(&self, config: &DeviceConfig) -> Result<Arc<dyn DeviceManager>, DeviceError> {
        let mut manager = SimDeviceManager::new(
            DeviceId(config.device_id),
            config.backend_name.clone(),
            config.device_memory_or(self.default_memory),
        )
        .with_run_delay(self.run_delay);
        if let Some(name) = &self.fail_on {
            manager = manager.with_fail_on(name.clone());
        }
        let manager = Arc::new(manager);
        self.created
            .lock()
            .expect("created list lock")
            .push(manager.clone());
        Ok(manager)
    }
}
