// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The partitioner entry point and shared flow machinery.
//!
//! [`Partitioner::partition`] selects a flow (first match wins): a
//! user-defined [`crate::PartitionConfig`], the profiling flow, the
//! load-balanced flow, or the default heterogeneous flow. Everything the
//! flows share lives here: the per-backend aggregation, representative
//! function selection, the pre-partition cleanup pass, the no-partition
//! fast path, and finalization diagnostics.

mod backend_split;
mod from_config;
mod heterogeneous;
mod load_balanced;
mod profiling;

use crate::assign::saturate_host;
use crate::{
    CompilationContext, Dag, DagList, DagNode, DagNodeId, PartitionConfig, PartitionError,
    PartitionMap, QuantizationMode,
};
use device_registry::{BackendInfo, BackendRegistry, DeviceInfo, LogicalDeviceId};
use graph_ir::{Function, KindSet, Module, Node, NodeId, ValueRef};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

/// The backend every partition is routed to while profiling.
pub const PROFILING_BACKEND: &str = "interpreter";

/// Flags controlling optional partitioner behaviour and diagnostics.
#[derive(Debug, Clone)]
pub struct PartitionerOptions {
    /// Optimize for load balance in addition to memory constraints
    /// (single-backend hosts only).
    pub load_balance: bool,
    /// Log the node-to-partition assignment and per-partition memory, and
    /// dump the DAG in DOT format.
    pub log_partition: bool,
    /// Dump each partition's operator graph in DOT format.
    pub dump_partition: bool,
    /// Directory receiving DOT dumps.
    pub dump_dir: PathBuf,
}

impl Default for PartitionerOptions {
    fn default() -> Self {
        Self {
            load_balance: false,
            log_partition: false,
            dump_partition: false,
            dump_dir: PathBuf::from("."),
        }
    }
}

/// Per-backend aggregates in declared device order.
#[derive(Debug, Clone, Default)]
pub struct BackendMap {
    order: Vec<String>,
    infos: BTreeMap<String, BackendInfo>,
}

impl BackendMap {
    /// Backend names in first-appearance order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Looks up a backend aggregate by name.
    pub fn get(&self, name: &str) -> Option<&BackendInfo> {
        self.infos.get(name)
    }

    /// Number of distinct backends.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Splits modules into device-sized sub-networks.
///
/// Construction takes the host's device descriptions and the backend
/// registry; behaviour flags chain through `with_*` builders:
///
/// ```no_run
/// # use partitioner::{Partitioner, CompilationContext};
/// # use device_registry::{BackendRegistry, DeviceInfo};
/// # let mut module = graph_ir::Module::new();
/// let partitioner = Partitioner::new(
///     vec![DeviceInfo::new("cpu", 1 << 30)],
///     BackendRegistry::new(),
/// )
/// .with_saturate_host(true);
/// let dags = partitioner.partition(&mut module, &CompilationContext::new());
/// ```
pub struct Partitioner {
    pub(crate) device_info: Vec<DeviceInfo>,
    pub(crate) registry: BackendRegistry,
    pub(crate) saturate: bool,
    pub(crate) optimized: bool,
    pub(crate) partition_config: Option<PartitionConfig>,
    pub(crate) options: PartitionerOptions,
}

impl Partitioner {
    pub fn new(device_info: Vec<DeviceInfo>, registry: BackendRegistry) -> Self {
        Self {
            device_info,
            registry,
            saturate: false,
            optimized: false,
            partition_config: None,
            options: PartitionerOptions::default(),
        }
    }

    /// Replicate the partition set across spare devices after assignment.
    pub fn with_saturate_host(mut self, on: bool) -> Self {
        self.saturate = on;
        self
    }

    /// Mark the module as already optimized; skips the cleanup pass.
    pub fn with_optimized(mut self, on: bool) -> Self {
        self.optimized = on;
        self
    }

    /// Use a user-defined partition plan.
    pub fn with_partition_config(mut self, config: PartitionConfig) -> Self {
        self.partition_config = Some(config);
        self
    }

    pub fn with_options(mut self, options: PartitionerOptions) -> Self {
        self.options = options;
        self
    }

    /// `true` when the devices span more than one backend.
    pub(crate) fn multi_backend(&self) -> bool {
        self.device_info
            .windows(2)
            .any(|w| w[0].backend_name != w[1].backend_name)
    }

    /// Partitions `module`, returning one DAG per admitted network.
    ///
    /// Mode selection is first-match: user-defined config, profiling,
    /// load-balanced (single backend + flag), heterogeneous.
    pub fn partition(
        &self,
        module: &mut Module,
        cctx: &CompilationContext,
    ) -> Result<DagList, PartitionError> {
        cctx.verify()?;

        if let Some(config) = &self.partition_config {
            if config.enabled() {
                return self.partition_from_config(module, config.clone());
            }
        }

        if cctx.precision_config.quant_mode == QuantizationMode::Profile {
            return self.quantization_profiling_partition(module, cctx);
        }

        if !self.multi_backend() && self.options.load_balance {
            return self.load_balanced_partition(module, cctx, self.device_info.len());
        }

        self.heterogeneous_partition(module, cctx)
    }

    /// Folds device descriptions into per-backend aggregates, resolving
    /// each backend through the registry and parsing its capability
    /// strings into kind sets.
    pub(crate) fn gen_backend_map(&self) -> Result<BackendMap, PartitionError> {
        let mut map = BackendMap::default();
        for device in &self.device_info {
            let name = device.backend_name.clone();
            if let Some(info) = map.infos.get_mut(&name) {
                info.num_devices += 1;
                continue;
            }
            let backend = self.registry.get(&name)?;
            let info = BackendInfo {
                num_devices: 1,
                // Memory and bandwidths are assumed identical across
                // devices of one backend.
                mem_size: device.available_memory,
                sram_capacity: device.sram_capacity,
                peak_compute: device.peak_compute,
                peak_dram_bw: device.peak_dram_bw,
                peak_sram_bw: device.peak_sram_bw,
                supported_kinds: KindSet::parse_list(&device.supported_nodes)?,
                non_supported_kinds: KindSet::parse_list(&device.non_supported_nodes)?,
                backend,
            };
            map.order.push(name.clone());
            map.infos.insert(name, info);
        }
        Ok(map)
    }

    /// Picks the function with the largest estimated working set as the
    /// representative driving partitioning decisions. Returns its name
    /// and the estimate (module constants plus distinct input
    /// placeholder sizes).
    pub(crate) fn select_rep_func(
        &self,
        module: &Module,
    ) -> Result<(String, u64), PartitionError> {
        let base = module.constants_size();
        let mut best: Option<(String, u64)> = None;
        for func in module.functions() {
            let mut size = base;
            let mut seen: HashSet<usize> = HashSet::new();
            for (_, node) in func.nodes() {
                if node.kind.is_save() {
                    continue;
                }
                for input in &node.inputs {
                    if let ValueRef::Placeholder(p) = *input {
                        if seen.insert(p.index()) {
                            if let Some(ph) = module.placeholder(p) {
                                size += ph.size_bytes();
                            }
                        }
                    }
                }
            }
            let replace = best.as_ref().map_or(true, |(_, max)| size > *max);
            if replace {
                best = Some((func.name().to_string(), size));
            }
        }
        best.ok_or_else(|| {
            PartitionError::UnsupportedModule("module contains no functions".to_string())
        })
    }

    /// Errors unless the module holds exactly one function (profiling,
    /// load-balanced, and heterogeneous flows).
    pub(crate) fn expect_single_function(
        &self,
        module: &Module,
        flow: &str,
    ) -> Result<(), PartitionError> {
        let n = module.num_functions();
        if n != 1 {
            return Err(PartitionError::UnsupportedModule(format!(
                "{n} functions in the module; the {flow} partition flow requires exactly 1"
            )));
        }
        Ok(())
    }

    /// Fast path: one backend, whole function fits. Emits a dummy root
    /// with a single child carrying each function unpartitioned.
    pub(crate) fn create_dag_without_partition(
        &self,
        backend_name: &str,
        module: &mut Module,
        cctx: &CompilationContext,
    ) -> Result<DagList, PartitionError> {
        let mut dags = Vec::new();
        for fname in module.function_names() {
            if !self.optimized {
                if let Some(func) = module.function_mut(&fname) {
                    optimize_function(func, cctx)?;
                }
            }
            let mut root = DagNode::new(fname.clone(), "");
            root.logical_devices = vec![LogicalDeviceId(0)];
            root.children.push(DagNodeId(1));
            let mut child = DagNode::new(fname.clone(), backend_name);
            child.logical_devices = vec![LogicalDeviceId(0)];
            child.parents.push(DagNodeId(0));
            dags.push(Dag::new(DagNodeId(0), vec![root, child]));
        }
        if self.saturate {
            saturate_host(self.device_info.len(), 1, &mut dags);
        }
        self.finalize(&dags, &PartitionMap::new(), module)?;
        Ok(dags)
    }

    /// Verifies every function and emits the flag-gated diagnostics.
    pub(crate) fn finalize(
        &self,
        dags: &DagList,
        map: &PartitionMap,
        module: &Module,
    ) -> Result<(), PartitionError> {
        for func in module.functions() {
            func.verify()?;
        }

        if self.options.log_partition {
            tracing::info!(
                functions = module.num_functions(),
                dags = dags.len(),
                "partitioning complete"
            );
            for (pid, info) in map.partitions() {
                tracing::info!(
                    partition = %info.name,
                    backend = %info.backend_name,
                    logical_devices = ?info.logical_devices,
                    memory = %info.mem_info,
                    nodes = map.node_set(pid).len(),
                    "partition assignment"
                );
            }
            for dag in dags {
                let path = self.options.dump_dir.join(format!("{}_dag.dot", dag.name()));
                if let Err(err) = std::fs::write(&path, dag.dump_dot()) {
                    tracing::warn!(path = %path.display(), %err, "failed to dump DAG");
                }
            }
        }

        if self.options.dump_partition {
            for dag in dags {
                for (_, node) in dag.sub_networks() {
                    let Some(func) = module.function(&node.name) else {
                        continue;
                    };
                    let logical = node
                        .logical_devices
                        .first()
                        .map(|l| l.index())
                        .unwrap_or(0);
                    let path = self.options.dump_dir.join(format!(
                        "partition_logical{}__{}__{}.dot",
                        logical, node.name, node.backend_name
                    ));
                    if let Err(err) = std::fs::write(&path, func.dump_dot(module)) {
                        tracing::warn!(path = %path.display(), %err, "failed to dump partition");
                    }
                }
            }
        }
        Ok(())
    }
}

/// Pre-partition cleanup: removes computation nothing consumes.
///
/// Stands in for the full backend optimization pipeline, which is an
/// external collaborator; gated on the constant-folding optimization
/// option like the rest of the compile-time rewrites.
pub(crate) fn optimize_function(
    func: &mut Function,
    cctx: &CompilationContext,
) -> Result<(), PartitionError> {
    if !cctx.optimization_opts.enable_constant_folding {
        return Ok(());
    }
    loop {
        let users = func.consumers();
        let dead: HashSet<usize> = func
            .nodes()
            .filter(|(id, node)| users[id.index()].is_empty() && !node.kind.is_save())
            .map(|(id, _)| id.index())
            .collect();
        if dead.is_empty() {
            return Ok(());
        }

        let mut rebuilt = Function::new(func.name());
        let mut remap: HashMap<NodeId, NodeId> = HashMap::new();
        for (id, node) in func.nodes() {
            if dead.contains(&id.index()) {
                continue;
            }
            let inputs = node
                .inputs
                .iter()
                .map(|&input| match input {
                    ValueRef::NodeOutput { node, output } => ValueRef::NodeOutput {
                        node: remap[&node],
                        output,
                    },
                    other => other,
                })
                .collect();
            let new_id = rebuilt.add_node(Node::new(
                node.name.clone(),
                node.kind,
                inputs,
                node.outputs.clone(),
            ))?;
            remap.insert(id, new_id);
        }
        tracing::debug!(func = func.name(), removed = dead.len(), "dead nodes eliminated");
        *func = rebuilt;
    }
}

#[cfg(test)]
pub(crate) fn test_backend_map(specs: &[(&str, u64, usize)]) -> BackendMap {
    use device_registry::{Backend, BackendOptions, DeviceError, RuntimeBundle};
    use std::sync::Arc;

    struct TestBackend(String);
    impl Backend for TestBackend {
        fn name(&self) -> &str {
            &self.0
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

    let mut map = BackendMap::default();
    for &(name, mem, num) in specs {
        map.order.push(name.to_string());
        map.infos.insert(
            name.to_string(),
            BackendInfo {
                num_devices: num,
                mem_size: mem,
                sram_capacity: 0,
                peak_compute: 0.0,
                peak_dram_bw: 0.0,
                peak_sram_bw: 0.0,
                supported_kinds: KindSet::new(),
                non_supported_kinds: KindSet::new(),
                backend: Arc::new(TestBackend(name.to_string())),
            },
        );
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_ir::{ElemType, NodeKind, Shape, TypeDesc};

    fn ty(n: usize) -> TypeDesc {
        TypeDesc::new(Shape::vector(n), ElemType::F32)
    }

    #[test]
    fn test_optimize_function_removes_dead_chain() {
        let mut m = Module::new();
        let input = m.add_placeholder("in", ty(8));
        let result = m.add_placeholder("out", ty(8));
        let mut f = Function::new("main");
        let a = f
            .add_node(Node::new(
                "live",
                NodeKind::Relu,
                vec![ValueRef::Placeholder(input)],
                vec![ty(8)],
            ))
            .unwrap();
        // Dead branch: consumed by nothing.
        let d1 = f
            .add_node(Node::new(
                "dead1",
                NodeKind::Sigmoid,
                vec![ValueRef::Placeholder(input)],
                vec![ty(8)],
            ))
            .unwrap();
        f.add_node(Node::new(
            "dead2",
            NodeKind::Tanh,
            vec![ValueRef::output_of(d1)],
            vec![ty(8)],
        ))
        .unwrap();
        f.add_node(Node::new(
            "save",
            NodeKind::Save,
            vec![ValueRef::output_of(a), ValueRef::Placeholder(result)],
            vec![ty(8)],
        ))
        .unwrap();

        optimize_function(&mut f, &CompilationContext::new()).unwrap();
        assert_eq!(f.num_nodes(), 2);
        assert!(f.node_by_name("live").is_some());
        assert!(f.node_by_name("dead1").is_none());
        assert!(f.node_by_name("dead2").is_none());
    }

    #[test]
    fn test_optimize_function_respects_flag() {
        let mut f = Function::new("main");
        f.add_node(Node::new("dead", NodeKind::Relu, vec![], vec![ty(4)]))
            .unwrap();
        let mut cctx = CompilationContext::new();
        cctx.optimization_opts.enable_constant_folding = false;
        optimize_function(&mut f, &cctx).unwrap();
        assert_eq!(f.num_nodes(), 1);
    }

    #[test]
    fn test_multi_backend_detection() {
        let registry = BackendRegistry::new();
        let single = Partitioner::new(
            vec![DeviceInfo::new("a", 1), DeviceInfo::new("a", 1)],
            registry.clone(),
        );
        assert!(!single.multi_backend());
        let multi = Partitioner::new(
            vec![DeviceInfo::new("a", 1), DeviceInfo::new("b", 1)],
            registry,
        );
        assert!(multi.multi_backend());
    }

    #[test]
    fn test_select_rep_func_prefers_larger_inputs() {
        let mut m = Module::new();
        let small = m.add_placeholder("small", ty(4));
        let big = m.add_placeholder("big", ty(4096));

        let mut f1 = Function::new("small_fn");
        f1.add_node(Node::new(
            "n",
            NodeKind::Relu,
            vec![ValueRef::Placeholder(small)],
            vec![ty(4)],
        ))
        .unwrap();
        m.insert_function(f1).unwrap();

        let mut f2 = Function::new("big_fn");
        f2.add_node(Node::new(
            "n",
            NodeKind::Relu,
            vec![ValueRef::Placeholder(big)],
            vec![ty(4096)],
        ))
        .unwrap();
        m.insert_function(f2).unwrap();

        let p = Partitioner::new(vec![DeviceInfo::new("a", 1)], BackendRegistry::new());
        let (name, size) = p.select_rep_func(&m).unwrap();
        assert_eq!(name, "big_fn");
        assert_eq!(size, 4096 * 4);
    }
}
