// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # dag-executor
//!
//! Walks a provisioned execution [`Dag`] for one inference request,
//! honouring parent→child dependencies and dispatching each sub-network
//! run to the device manager owning a chosen replica.
//!
//! # Guarantees
//!
//! - Every node except the synthetic root runs exactly once, only after
//!   all of its parents completed.
//! - Device choice per node is round-robin over the provisioned replicas
//!   ([`DagNode::next_device`]), atomic under concurrent dispatch.
//! - Independent nodes run in parallel, bounded by the executor's worker
//!   budget.
//! - On the first sub-network error no further nodes dispatch; the
//!   outstanding runs drain, and the latched error reaches the
//!   completion callback together with the request's context.
//!
//! # Threading
//!
//! [`Executor::run`] returns immediately: the walk happens on a spawned
//! coordinator task and the completion callback fires from the worker
//! pool, never from the caller. The worker budget maps to a semaphore
//! over the ambient tokio runtime.

mod error;

pub use error::ExecutorError;

use device_registry::DeviceManagerMap;
use graph_ir::ExecutionContext;
use partitioner::{Dag, DagNode, DagNodeId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// Identifies one inference request for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request:{}", self.0)
    }
}

/// Invoked once per request with the final status and the request's
/// context.
pub type CompletionFn =
    Box<dyn FnOnce(RequestId, Result<(), ExecutorError>, ExecutionContext) + Send + 'static>;

/// Dispatches DAG walks across the host's device managers.
pub struct Executor {
    devices: Arc<DeviceManagerMap>,
    slots: Arc<Semaphore>,
}

impl Executor {
    /// `worker_slots` bounds how many sub-network runs may be in flight
    /// at once across all requests.
    pub fn new(devices: Arc<DeviceManagerMap>, worker_slots: usize) -> Self {
        Self {
            devices,
            slots: Arc::new(Semaphore::new(worker_slots.max(1))),
        }
    }

    /// Starts executing `dag` for one request. Must be called within a
    /// tokio runtime; returns once the coordinator task is spawned.
    pub fn run(
        &self,
        dag: Arc<Dag>,
        ctx: ExecutionContext,
        request_id: RequestId,
        done: CompletionFn,
    ) {
        let devices = self.devices.clone();
        let slots = self.slots.clone();
        tokio::spawn(coordinate(dag, devices, slots, ctx, request_id, done));
    }
}

/// Runs one node on its next replica and reports back to the coordinator.
fn dispatch_node(
    dag: &Arc<Dag>,
    devices: &Arc<DeviceManagerMap>,
    slots: &Arc<Semaphore>,
    ctx: &ExecutionContext,
    id: DagNodeId,
    results: &mpsc::UnboundedSender<(DagNodeId, Result<(), ExecutorError>)>,
) {
    let dag = dag.clone();
    let devices = devices.clone();
    let slots = slots.clone();
    let ctx = ctx.clone();
    let results = results.clone();
    tokio::spawn(async move {
        let node: &DagNode = dag.node(id);
        let outcome = run_node(node, &devices, &slots, ctx).await;
        // The coordinator may already be gone after a latched error.
        let _ = results.send((id, outcome));
    });
}

async fn run_node(
    node: &DagNode,
    devices: &DeviceManagerMap,
    slots: &Arc<Semaphore>,
    ctx: ExecutionContext,
) -> Result<(), ExecutorError> {
    let _permit = slots
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ExecutorError::WorkerPoolUnavailable)?;

    let device_id = node.next_device().ok_or_else(|| ExecutorError::NoDeviceAssigned {
        node: node.name.clone(),
    })?;
    let manager = devices
        .get(&device_id)
        .ok_or_else(|| ExecutorError::UnknownDevice {
            node: node.name.clone(),
            device: device_id,
        })?;

    tracing::trace!(node = %node.name, device = %device_id, "dispatching sub-network");
    let (result, _ctx) = manager.run_function(&node.name, ctx).await;
    result.map_err(ExecutorError::from)
}

/// Marks `id` complete: its children's parent counts drop, and any child
/// reaching zero is dispatched.
#[allow(clippy::too_many_arguments)]
fn release_children(
    dag: &Arc<Dag>,
    devices: &Arc<DeviceManagerMap>,
    slots: &Arc<Semaphore>,
    ctx: &ExecutionContext,
    results: &mpsc::UnboundedSender<(DagNodeId, Result<(), ExecutorError>)>,
    waiting: &mut HashMap<DagNodeId, usize>,
    inflight: &mut usize,
    id: DagNodeId,
) {
    for &child in &dag.node(id).children {
        let count = waiting
            .get_mut(&child)
            .expect("every non-root node has a waiting entry");
        *count -= 1;
        if *count == 0 {
            dispatch_node(dag, devices, slots, ctx, child, results);
            *inflight += 1;
        }
    }
}

async fn coordinate(
    dag: Arc<Dag>,
    devices: Arc<DeviceManagerMap>,
    slots: Arc<Semaphore>,
    ctx: ExecutionContext,
    request_id: RequestId,
    done: CompletionFn,
) {
    let (results_tx, mut results_rx) = mpsc::unbounded_channel();

    let mut waiting_parents: HashMap<DagNodeId, usize> = dag
        .sub_networks()
        .map(|(id, node)| (id, node.parents.len()))
        .collect();
    let mut inflight = 0usize;
    let mut first_error: Option<ExecutorError> = None;

    // The synthetic root completes immediately, releasing its children.
    release_children(
        &dag,
        &devices,
        &slots,
        &ctx,
        &results_tx,
        &mut waiting_parents,
        &mut inflight,
        dag.root(),
    );

    while inflight > 0 {
        let Some((id, outcome)) = results_rx.recv().await else {
            break;
        };
        inflight -= 1;
        match outcome {
            Err(err) if first_error.is_none() => {
                tracing::warn!(%request_id, node = %dag.node(id).name, %err, "sub-network failed, cancelling request");
                first_error = Some(err);
            }
            Err(_) => {}
            Ok(()) => {
                // Stop feeding the walk once an error is latched; the
                // remaining in-flight runs drain through this loop.
                if first_error.is_none() {
                    release_children(
                        &dag,
                        &devices,
                        &slots,
                        &ctx,
                        &results_tx,
                        &mut waiting_parents,
                        &mut inflight,
                        id,
                    );
                }
            }
        }
    }

    let status = match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    };
    done(request_id, status, ctx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use device_registry::{DeviceError, DeviceId, DeviceManager, RuntimeBundle};
    use partitioner::DagNode;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// Records run order; optionally fails named sub-networks.
    struct MockDevice {
        id: DeviceId,
        log: Arc<Mutex<Vec<(usize, String)>>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl DeviceManager for MockDevice {
        fn device_id(&self) -> DeviceId {
            self.id
        }
        fn backend_name(&self) -> &str {
            "mock"
        }
        async fn add_network(
            &self,
            _name: &str,
            _bundle: Arc<RuntimeBundle>,
        ) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn evict_network(&self, _name: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn run_function(
            &self,
            name: &str,
            ctx: ExecutionContext,
        ) -> (Result<(), DeviceError>, ExecutionContext) {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            self.log.lock().unwrap().push((self.id.index(), name.to_string()));
            if self.fail_on.as_deref() == Some(name) {
                return (Err(DeviceError::RunFailed(format!("{name} exploded"))), ctx);
            }
            (Ok(()), ctx)
        }
        fn available_memory(&self) -> u64 {
            u64::MAX
        }
        fn maximum_memory(&self) -> u64 {
            u64::MAX
        }
        async fn stop(&self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    fn devices(
        count: usize,
        fail_on: Option<&str>,
    ) -> (Arc<DeviceManagerMap>, Arc<Mutex<Vec<(usize, String)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut map = DeviceManagerMap::new();
        for i in 0..count {
            map.insert(
                DeviceId(i),
                Arc::new(MockDevice {
                    id: DeviceId(i),
                    log: log.clone(),
                    fail_on: fail_on.map(str::to_string),
                }) as Arc<dyn DeviceManager>,
            );
        }
        (Arc::new(map), log)
    }

    /// root -> a -> b, root -> c; every node on device 0.
    fn diamondish(device_count: usize) -> Dag {
        let mut root = DagNode::new("net", "");
        root.children = vec![DagNodeId::from_index(1), DagNodeId::from_index(3)];
        let mut a = DagNode::new("a", "mock");
        a.parents = vec![DagNodeId::from_index(0)];
        a.children = vec![DagNodeId::from_index(2)];
        let mut b = DagNode::new("b", "mock");
        b.parents = vec![DagNodeId::from_index(1)];
        let mut c = DagNode::new("c", "mock");
        c.parents = vec![DagNodeId::from_index(0)];
        for node in [&mut a, &mut b, &mut c] {
            node.device_ids = (0..device_count).map(DeviceId).collect();
        }
        Dag::new(DagNodeId::from_index(0), vec![root, a, b, c])
    }

    async fn run_and_wait(
        executor: &Executor,
        dag: Arc<Dag>,
        id: u64,
    ) -> Result<(), ExecutorError> {
        let (tx, rx) = oneshot::channel();
        executor.run(
            dag,
            ExecutionContext::new(),
            RequestId(id),
            Box::new(move |_, res, _| {
                let _ = tx.send(res);
            }),
        );
        rx.await.expect("completion callback fires")
    }

    #[tokio::test]
    async fn test_parents_run_before_children() {
        let (devices, log) = devices(1, None);
        let executor = Executor::new(devices, 4);
        run_and_wait(&executor, Arc::new(diamondish(1)), 0)
            .await
            .unwrap();

        let order: Vec<String> = log.lock().unwrap().iter().map(|(_, n)| n.clone()).collect();
        assert_eq!(order.len(), 3);
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("a") < pos("b"));
    }

    #[tokio::test]
    async fn test_round_robin_across_replicas() {
        let (devices, log) = devices(2, None);
        let executor = Executor::new(devices, 4);
        let dag = Arc::new(diamondish(2));
        for i in 0..4 {
            run_and_wait(&executor, dag.clone(), i).await.unwrap();
        }

        // Node "a" ran four times, alternating devices 0 and 1.
        let a_devices: Vec<usize> = log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, n)| n == "a")
            .map(|(d, _)| *d)
            .collect();
        assert_eq!(a_devices.len(), 4);
        assert_eq!(a_devices.iter().filter(|&&d| d == 0).count(), 2);
        assert_eq!(a_devices.iter().filter(|&&d| d == 1).count(), 2);
    }

    #[tokio::test]
    async fn test_first_error_cancels_descendants() {
        let (devices, log) = devices(1, Some("a"));
        let executor = Executor::new(devices, 4);
        let err = run_and_wait(&executor, Arc::new(diamondish(1)), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Device(_)));

        // "b" depends on the failed "a" and must never run.
        let ran: Vec<String> = log.lock().unwrap().iter().map(|(_, n)| n.clone()).collect();
        assert!(!ran.contains(&"b".to_string()));
    }

    #[tokio::test]
    async fn test_unprovisioned_node_reports_error() {
        let (devices, _) = devices(1, None);
        let executor = Executor::new(devices, 4);
        let mut dag = diamondish(1);
        dag.node_mut(DagNodeId::from_index(1)).device_ids.clear();
        let err = run_and_wait(&executor, Arc::new(dag), 0).await.unwrap_err();
        assert!(matches!(err, ExecutorError::NoDeviceAssigned { .. }));
    }

    #[tokio::test]
    async fn test_root_only_dag_completes_immediately() {
        let (devices, _) = devices(1, None);
        let executor = Executor::new(devices, 1);
        let dag = Dag::new(DagNodeId::from_index(0), vec![DagNode::new("empty", "")]);
        run_and_wait(&executor, Arc::new(dag), 0).await.unwrap();
    }
}
