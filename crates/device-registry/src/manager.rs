// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The device-manager interface: one per physical device.
//!
//! A device manager owns the artifacts loaded onto its device and issues
//! runs. Implementations must be safe under concurrent `run_function`
//! calls from multiple executor workers.

use crate::{DeviceError, DeviceId, RuntimeBundle};
use async_trait::async_trait;
use graph_ir::ExecutionContext;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Map of device id → device manager, ordered for stable iteration.
pub type DeviceManagerMap = BTreeMap<DeviceId, Arc<dyn DeviceManager>>;

/// Runtime wrapper for one physical device.
#[async_trait]
pub trait DeviceManager: Send + Sync {
    /// The id assigned to this device by the host.
    fn device_id(&self) -> DeviceId;

    /// The backend this device executes.
    fn backend_name(&self) -> &str;

    /// Loads a compiled sub-network onto the device under `name`.
    async fn add_network(&self, name: &str, bundle: Arc<RuntimeBundle>)
        -> Result<(), DeviceError>;

    /// Evicts a previously loaded sub-network.
    async fn evict_network(&self, name: &str) -> Result<(), DeviceError>;

    /// Runs a loaded sub-network with the given context.
    ///
    /// The context is returned to the caller in both the success and the
    /// error case so request buffers can be recovered.
    async fn run_function(
        &self,
        name: &str,
        ctx: ExecutionContext,
    ) -> (Result<(), DeviceError>, ExecutionContext);

    /// Bytes still available for new networks.
    fn available_memory(&self) -> u64;

    /// Total memory of the device.
    fn maximum_memory(&self) -> u64;

    /// Stops the device; outstanding work is drained best-effort.
    async fn stop(&self) -> Result<(), DeviceError>;
}
