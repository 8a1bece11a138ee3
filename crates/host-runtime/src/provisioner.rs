// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compiles each sub-network for its backend and loads it onto the
//! physical devices its logical assignment maps to.

use crate::HostError;
use async_trait::async_trait;
use device_registry::{
    BackendRegistry, DeviceId, DeviceManager, DeviceManagerMap, LogicalDeviceId,
};
use graph_ir::Module;
use partitioner::{CompilationContext, DagList, DagNodeId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Turns an unprovisioned DAG into a runnable one: every node gains a
/// compiled bundle and at least one physical device id.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(
        &self,
        dags: &mut DagList,
        module: &Module,
        devices: &DeviceManagerMap,
        cctx: &CompilationContext,
    ) -> Result<(), HostError>;
}

/// The standard provisioner.
///
/// Logical device ids of one backend map onto that backend's physical
/// devices in ascending order, so two sub-networks sharing a logical id
/// always land on the same device, and saturation replicas spread over
/// the spares. Any load failure rolls back everything already loaded.
pub struct DefaultProvisioner {
    registry: BackendRegistry,
}

impl DefaultProvisioner {
    pub fn new(registry: BackendRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Provisioner for DefaultProvisioner {
    async fn provision(
        &self,
        dags: &mut DagList,
        module: &Module,
        devices: &DeviceManagerMap,
        cctx: &CompilationContext,
    ) -> Result<(), HostError> {
        // Physical devices per backend, in device-id order.
        let mut physical: BTreeMap<String, Vec<DeviceId>> = BTreeMap::new();
        for (id, manager) in devices.iter() {
            physical
                .entry(manager.backend_name().to_string())
                .or_default()
                .push(*id);
        }

        // Distinct logical ids per backend across all DAGs.
        let mut logical: BTreeMap<String, BTreeSet<LogicalDeviceId>> = BTreeMap::new();
        for dag in dags.iter() {
            for (_, node) in dag.sub_networks() {
                logical
                    .entry(node.backend_name.clone())
                    .or_default()
                    .extend(node.logical_devices.iter().copied());
            }
        }

        // Bind logical → physical, in order.
        let mut binding: BTreeMap<(String, LogicalDeviceId), DeviceId> = BTreeMap::new();
        for (backend_name, ids) in &logical {
            let Some(phys) = physical.get(backend_name) else {
                return Err(HostError::ProvisioningFailed(format!(
                    "no devices available for backend '{backend_name}'"
                )));
            };
            if ids.len() > phys.len() {
                return Err(HostError::ProvisioningFailed(format!(
                    "backend '{backend_name}' needs {} devices but has {}",
                    ids.len(),
                    phys.len()
                )));
            }
            for (i, &lid) in ids.iter().enumerate() {
                binding.insert((backend_name.clone(), lid), phys[i]);
            }
        }

        // Compile and load, tracking loads for rollback.
        let mut loaded: Vec<(Arc<dyn DeviceManager>, String)> = Vec::new();
        for dag in dags.iter_mut() {
            let node_ids: Vec<DagNodeId> = dag.sub_networks().map(|(id, _)| id).collect();
            for id in node_ids {
                let (name, backend_name, logical_devices) = {
                    let node = dag.node(id);
                    (
                        node.name.clone(),
                        node.backend_name.clone(),
                        node.logical_devices.clone(),
                    )
                };

                let backend = self.registry.get(&backend_name).map_err(|e| {
                    HostError::ProvisioningFailed(format!(
                        "cannot compile '{name}': {e}"
                    ))
                })?;
                let func = module.function(&name).ok_or_else(|| {
                    HostError::ProvisioningFailed(format!(
                        "sub-function '{name}' missing from the module"
                    ))
                })?;
                let bundle = Arc::new(
                    backend
                        .compile(func, module, &cctx.backend_opts)
                        .map_err(|e| HostError::ProvisioningFailed(e.to_string()))?,
                );

                let mut device_ids = Vec::with_capacity(logical_devices.len());
                for lid in &logical_devices {
                    let device = binding
                        .get(&(backend_name.clone(), *lid))
                        .copied()
                        .ok_or_else(|| {
                            HostError::ProvisioningFailed(format!(
                                "no binding for {lid} of backend '{backend_name}'"
                            ))
                        })?;
                    device_ids.push(device);
                }

                for &device in &device_ids {
                    let manager = devices.get(&device).ok_or_else(|| {
                        HostError::ProvisioningFailed(format!("{device} has no manager"))
                    })?;
                    if let Err(err) = manager.add_network(&name, bundle.clone()).await {
                        tracing::warn!(network = %name, %device, %err, "load failed, rolling back");
                        for (m, n) in &loaded {
                            let _ = m.evict_network(n).await;
                        }
                        return Err(HostError::ProvisioningFailed(err.to_string()));
                    }
                    loaded.push((manager.clone(), name.clone()));
                }

                let node = dag.node_mut(id);
                node.device_ids = device_ids;
                node.runtime_bundle = Some(bundle);
                tracing::debug!(
                    network = %node.name,
                    backend = %node.backend_name,
                    devices = ?node.device_ids,
                    "sub-network provisioned"
                );
            }
        }
        Ok(())
    }
}
