// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The host manager: network lifecycle, admission control, and the
//! dispatch loop.

use crate::queue::InferRequest;
use crate::{DefaultProvisioner, HostConfig, HostError, Provisioner};
use dag_executor::{Executor, RequestId};
use device_registry::{
    BackendRegistry, DeviceConfig, DeviceError, DeviceId, DeviceInfo, DeviceManager,
    DeviceManagerMap,
};
use graph_ir::{ExecutionContext, Module};
use partitioner::{CompilationContext, Dag, Partitioner, PartitionerOptions};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Gauge names for aggregate device-memory reporting.
const DEVICE_MEMORY_USED: &str = "hetero_rt.devices.used_memory.total";
const DEVICE_MEMORY_AVAILABLE: &str = "hetero_rt.devices.available_memory.total";
const DEVICE_MEMORY_MAX: &str = "hetero_rt.devices.maximum_memory.total";

/// Passes the result of an inference request back to the caller.
pub type ResultCallback =
    Box<dyn FnOnce(RequestId, Result<(), HostError>, ExecutionContext) + Send + 'static>;

/// Creates device managers from device configurations during host
/// initialization.
pub trait DeviceManagerFactory: Send + Sync {
    fn create(&self, config: &DeviceConfig) -> Result<Arc<dyn DeviceManager>, DeviceError>;
}

/// Everything the runtime tracks about one admitted network.
struct NetworkData {
    dag: Arc<Dag>,
    /// The post-partition module; sub-functions stay alive as long as
    /// the network does.
    #[allow(dead_code)]
    module: Arc<Module>,
    /// In-flight request count; removal requires zero.
    refcount: Arc<AtomicUsize>,
}

/// Networks plus the names currently being added; one lock guards both
/// so a concurrent add of the same name is caught atomically.
#[derive(Default)]
struct NetworkTable {
    networks: HashMap<String, NetworkData>,
    processing: HashSet<String>,
}

struct HostInner {
    config: HostConfig,
    table: Mutex<NetworkTable>,
    infer_queue: Mutex<BinaryHeap<Reverse<InferRequest>>>,
    active_request_count: AtomicUsize,
    total_request_count: AtomicU64,
    devices: Arc<DeviceManagerMap>,
    device_info: Vec<DeviceInfo>,
    registry: BackendRegistry,
    executor: Executor,
    provisioner: Box<dyn Provisioner>,
    partitioner_options: PartitionerOptions,
}

/// The entry point into the runtime: add, run, and evict networks.
///
/// All methods are callable concurrently; `run_network` is designed for
/// submission from many threads at once. Cloning shares the host.
#[derive(Clone)]
pub struct HostManager {
    inner: Arc<HostInner>,
}

impl HostManager {
    /// Initializes the host with one device manager per config.
    ///
    /// Device ids are assigned densely in config order. If any manager
    /// fails to come up, every already-created manager is stopped before
    /// the error returns.
    pub async fn init(
        device_configs: Vec<DeviceConfig>,
        registry: BackendRegistry,
        factory: &dyn DeviceManagerFactory,
        config: HostConfig,
    ) -> Result<Self, HostError> {
        config.validate()?;

        let mut devices = DeviceManagerMap::new();
        let mut device_info = Vec::new();
        for (i, mut device_config) in device_configs.into_iter().enumerate() {
            device_config.device_id = i;
            let manager = match factory.create(&device_config) {
                Ok(manager) => manager,
                Err(err) => {
                    for manager in devices.values() {
                        let _ = manager.stop().await;
                    }
                    return Err(HostError::Device(err));
                }
            };

            let mut info = DeviceInfo::new(
                device_config.backend_name.clone(),
                manager.maximum_memory(),
            );
            if let Some(kinds) = device_config.parameters.get("supported_nodes") {
                info.supported_nodes = kinds.clone();
            }
            if let Some(kinds) = device_config.parameters.get("non_supported_nodes") {
                info.non_supported_nodes = kinds.clone();
            }
            device_info.push(info);
            devices.insert(DeviceId(i), manager);
        }

        let devices = Arc::new(devices);
        let executor = Executor::new(devices.clone(), config.executor_threads);
        let provisioner = Box::new(DefaultProvisioner::new(registry.clone()));
        tracing::info!(
            devices = devices.len(),
            max_active = config.max_active_requests,
            max_queue = config.max_queue_size,
            "host manager initialized"
        );
        Ok(Self {
            inner: Arc::new(HostInner {
                config,
                table: Mutex::new(NetworkTable::default()),
                infer_queue: Mutex::new(BinaryHeap::new()),
                active_request_count: AtomicUsize::new(0),
                total_request_count: AtomicU64::new(0),
                devices,
                device_info,
                registry,
                executor,
                provisioner,
                partitioner_options: PartitionerOptions::default(),
            }),
        })
    }

    /// Partitions, compiles, and loads a module; registers one network
    /// per produced DAG.
    ///
    /// On any error the host rolls back completely: no partial network
    /// is ever observable.
    pub async fn add_network(
        &self,
        mut module: Module,
        cctx: &CompilationContext,
        saturate_host: bool,
    ) -> Result<(), HostError> {
        let names = module.function_names();
        {
            let mut table = self.inner.table.lock().expect("network table lock");
            for name in &names {
                if table.networks.contains_key(name) || table.processing.contains(name) {
                    return Err(HostError::NetworkNameCollision(name.clone()));
                }
            }
            for name in &names {
                table.processing.insert(name.clone());
            }
        }

        // The table lock is released while the partitioner and
        // provisioner run.
        let result = async {
            let partitioner = Partitioner::new(
                self.inner.device_info.clone(),
                self.inner.registry.clone(),
            )
            .with_saturate_host(saturate_host)
            .with_options(self.inner.partitioner_options.clone());
            let mut dags = partitioner.partition(&mut module, cctx)?;
            self.inner
                .provisioner
                .provision(&mut dags, &module, &self.inner.devices, cctx)
                .await?;
            Ok::<_, HostError>(dags)
        }
        .await;

        match result {
            Ok(dags) => {
                let module = Arc::new(module);
                {
                    let mut table = self.inner.table.lock().expect("network table lock");
                    for dag in dags {
                        let name = dag.name().to_string();
                        table.networks.insert(
                            name,
                            NetworkData {
                                dag: Arc::new(dag),
                                module: module.clone(),
                                refcount: Arc::new(AtomicUsize::new(0)),
                            },
                        );
                    }
                    for name in &names {
                        table.processing.remove(name);
                    }
                }
                self.export_memory_counters();
                Ok(())
            }
            Err(err) => {
                self.cleanup_add_network(&names).await;
                Err(err)
            }
        }
    }

    /// Rolls back a failed `add_network`: evicts anything loaded, drops
    /// partial entries, and releases the in-progress names.
    async fn cleanup_add_network(&self, names: &[String]) {
        let mut evict: Vec<(Arc<dyn DeviceManager>, String)> = Vec::new();
        {
            let mut table = self.inner.table.lock().expect("network table lock");
            for name in names {
                table.processing.remove(name);
                if let Some(data) = table.networks.remove(name) {
                    for (_, node) in data.dag.sub_networks() {
                        for device in &node.device_ids {
                            if let Some(manager) = self.inner.devices.get(device) {
                                evict.push((manager.clone(), node.name.clone()));
                            }
                        }
                    }
                }
            }
        }
        for (manager, network) in evict {
            let _ = manager.evict_network(&network).await;
        }
        self.export_memory_counters();
    }

    /// Removes a network, evicting its sub-networks from their devices.
    /// Fails while requests are in flight.
    pub async fn remove_network(&self, name: &str) -> Result<(), HostError> {
        let evict: Vec<(Arc<dyn DeviceManager>, String)>;
        {
            let mut table = self.inner.table.lock().expect("network table lock");
            let Some(data) = table.networks.get(name) else {
                return Ok(());
            };
            if data.refcount.load(Ordering::Acquire) != 0 {
                return Err(HostError::NetworkInUse(name.to_string()));
            }
            let data = table
                .networks
                .remove(name)
                .expect("checked present under the same lock");
            evict = data
                .dag
                .sub_networks()
                .flat_map(|(_, node)| {
                    node.device_ids.iter().filter_map(|device| {
                        self.inner
                            .devices
                            .get(device)
                            .map(|m| (m.clone(), node.name.clone()))
                    })
                })
                .collect();
        }

        let mut first_error = None;
        for (manager, network) in evict {
            if let Err(err) = manager.evict_network(&network).await {
                tracing::warn!(%network, %err, "eviction failed");
                first_error.get_or_insert(HostError::Device(err));
            }
        }
        self.export_memory_counters();
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Returns `true` if a network with this name is registered.
    pub fn network_added(&self, name: &str) -> bool {
        self.inner
            .table
            .lock()
            .expect("network table lock")
            .networks
            .contains_key(name)
    }

    /// Removes every network, then stops every device manager.
    ///
    /// A coarse cancel: callers should quiesce submissions first, or
    /// in-flight callbacks may fire after this returns. Best-effort —
    /// teardown always completes and the first error is returned.
    pub async fn clear_host(&self) -> Result<(), HostError> {
        let evict: Vec<(Arc<dyn DeviceManager>, String)> = {
            let mut table = self.inner.table.lock().expect("network table lock");
            let drained: Vec<NetworkData> = table.networks.drain().map(|(_, d)| d).collect();
            table.processing.clear();
            drained
                .iter()
                .flat_map(|data| {
                    data.dag.sub_networks().flat_map(|(_, node)| {
                        node.device_ids.iter().filter_map(|device| {
                            self.inner
                                .devices
                                .get(device)
                                .map(|m| (m.clone(), node.name.clone()))
                        })
                    })
                })
                .collect()
        };

        let mut first_error = None;
        for (manager, network) in evict {
            if let Err(err) = manager.evict_network(&network).await {
                first_error.get_or_insert(HostError::Device(err));
            }
        }
        for manager in self.inner.devices.values() {
            if let Err(err) = manager.stop().await {
                first_error.get_or_insert(HostError::Device(err));
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Submits one inference request.
    ///
    /// Thread-safe and non-blocking. Returns the request id on
    /// admission; admission failures (unknown network, full queue)
    /// invoke `callback` with the error and return `None`. Lower
    /// `priority` values dispatch first; ties dispatch in submission
    /// order.
    ///
    /// Must be called within the host's tokio runtime.
    pub fn run_network(
        &self,
        name: &str,
        ctx: ExecutionContext,
        callback: ResultCallback,
        priority: u64,
    ) -> Option<RequestId> {
        let request_id = RequestId(
            self.inner
                .total_request_count
                .fetch_add(1, Ordering::Relaxed),
        );

        let known = self
            .inner
            .table
            .lock()
            .expect("network table lock")
            .networks
            .contains_key(name);
        if !known {
            callback(
                request_id,
                Err(HostError::NetworkNotFound(name.to_string())),
                ctx,
            );
            return None;
        }

        {
            let mut queue = self.inner.infer_queue.lock().expect("infer queue lock");
            if queue.len() >= self.inner.config.max_queue_size {
                drop(queue);
                callback(request_id, Err(HostError::QueueFull), ctx);
                return None;
            }
            queue.push(Reverse(InferRequest {
                network_name: name.to_string(),
                context: ctx,
                callback,
                priority,
                request_id,
            }));
        }

        if self.inner.active_request_count.load(Ordering::Acquire)
            < self.inner.config.max_active_requests
        {
            HostInner::dispatch_next_run(self.inner.clone());
        }
        Some(request_id)
    }

    /// Blocking wrapper around [`run_network`](Self::run_network):
    /// submits at default priority and waits for completion, returning
    /// the context the callback carried.
    pub async fn run_network_blocking(
        &self,
        name: &str,
        ctx: ExecutionContext,
    ) -> Result<ExecutionContext, HostError> {
        let (tx, rx) = oneshot::channel();
        let callback: ResultCallback = Box::new(move |_, result, ctx| {
            let _ = tx.send((result, ctx));
        });
        let _ = self.run_network(name, ctx, callback, 0);
        let (result, ctx) = rx
            .await
            .map_err(|_| HostError::Internal("completion channel closed".to_string()))?;
        result.map(|()| ctx)
    }

    /// Blocking-run convenience taking bare placeholder bindings.
    pub async fn run_network_blocking_with_bindings(
        &self,
        name: &str,
        bindings: graph_ir::PlaceholderBindings,
    ) -> Result<ExecutionContext, HostError> {
        self.run_network_blocking(name, ExecutionContext::with_bindings(bindings))
            .await
    }

    /// Read-only access to a network's DAG.
    pub fn get_network_dag(&self, name: &str) -> Result<Arc<Dag>, HostError> {
        self.inner
            .table
            .lock()
            .expect("network table lock")
            .networks
            .get(name)
            .map(|data| data.dag.clone())
            .ok_or_else(|| HostError::NetworkNotFound(name.to_string()))
    }

    /// Publishes aggregate device-memory gauges.
    fn export_memory_counters(&self) {
        let mut used = 0u64;
        let mut available = 0u64;
        let mut maximum = 0u64;
        for manager in self.inner.devices.values() {
            let max = manager.maximum_memory();
            let avail = manager.available_memory();
            used += max.saturating_sub(avail);
            available += avail;
            maximum += max;
        }
        tracing::info!(target: "metrics", gauge = DEVICE_MEMORY_USED, value = used);
        tracing::info!(target: "metrics", gauge = DEVICE_MEMORY_AVAILABLE, value = available);
        tracing::info!(target: "metrics", gauge = DEVICE_MEMORY_MAX, value = maximum);
    }
}

impl HostInner {
    /// Pops and dispatches the highest-priority request when an active
    /// slot is free. The completion callback re-enters this function, so
    /// the dispatch chain runs entirely on the executor's pool.
    fn dispatch_next_run(inner: Arc<HostInner>) {
        let request = {
            let mut queue = inner.infer_queue.lock().expect("infer queue lock");
            if inner.active_request_count.load(Ordering::Acquire)
                >= inner.config.max_active_requests
            {
                return;
            }
            let Some(Reverse(request)) = queue.pop() else {
                return;
            };
            // Claimed under the queue lock so concurrent dispatchers
            // cannot overshoot the active cap.
            inner.active_request_count.fetch_add(1, Ordering::AcqRel);
            request
        };

        let network = {
            let table = inner.table.lock().expect("network table lock");
            table
                .networks
                .get(&request.network_name)
                .map(|data| (data.dag.clone(), data.refcount.clone()))
        };
        let Some((dag, refcount)) = network else {
            inner.active_request_count.fetch_sub(1, Ordering::AcqRel);
            (request.callback)(
                request.request_id,
                Err(HostError::NetworkNotFound(request.network_name)),
                request.context,
            );
            return Self::dispatch_next_run(inner);
        };

        refcount.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(request = %request.request_id, network = %request.network_name, "dispatching");

        let chain = inner.clone();
        let user_callback = request.callback;
        inner.executor.run(
            dag,
            request.context,
            request.request_id,
            Box::new(move |request_id, result, ctx| {
                refcount.fetch_sub(1, Ordering::AcqRel);
                chain.active_request_count.fetch_sub(1, Ordering::AcqRel);
                user_callback(request_id, result.map_err(HostError::from), ctx);
                Self::dispatch_next_run(chain.clone());
            }),
        );
    }
}
