// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Flow-level tests: the partitioner's public surface driven end to end
//! over synthetic modules and simulated backends.

use device_registry::{
    Backend, BackendOptions, BackendRegistry, DeviceError, DeviceInfo, LogicalDeviceId,
    RuntimeBundle,
};
use graph_ir::{
    ElemType, Function, KindSet, Module, Node, NodeKind, Shape, TypeDesc, ValueRef,
};
use partitioner::{
    dag_validation, CompilationContext, PartitionConfig, PartitionError, Partitioner,
};
use std::collections::BTreeMap;
use std::sync::Arc;

// ── Helpers ────────────────────────────────────────────────────

/// A backend accepting exactly the kinds in its set (or everything when
/// the set is empty).
struct FixedBackend {
    name: String,
    supported: KindSet,
}

impl FixedBackend {
    fn any(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            supported: KindSet::new(),
        })
    }

    fn only(name: &str, kinds: KindSet) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            supported: kinds,
        })
    }
}

impl Backend for FixedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_op_supported(&self, node: &Node) -> bool {
        self.supported.is_empty() || self.supported.contains(node.kind)
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

fn ty(n: usize) -> TypeDesc {
    TypeDesc::new(Shape::vector(n), ElemType::F32)
}

/// A chain of conv nodes with per-node weights, ending in a save.
fn chain_module(name: &str, n: usize, weight_elems: usize) -> Module {
    let mut m = Module::new();
    let input = m.add_placeholder("input", ty(16));
    let result = m.add_placeholder("result", ty(16));
    let mut f = Function::new(name);
    let mut prev = None;
    for i in 0..n {
        let w = m.add_constant(format!("w{i}"), ty(weight_elems));
        let src = match prev {
            None => ValueRef::Placeholder(input),
            Some(p) => ValueRef::output_of(p),
        };
        let id = f
            .add_node(Node::new(
                format!("conv{i}"),
                NodeKind::Conv,
                vec![src, ValueRef::Constant(w)],
                vec![ty(16)],
            ))
            .unwrap();
        prev = Some(id);
    }
    f.add_node(Node::new(
        "out",
        NodeKind::Save,
        vec![
            ValueRef::output_of(prev.unwrap()),
            ValueRef::Placeholder(result),
        ],
        vec![ty(16)],
    ))
    .unwrap();
    m.insert_function(f).unwrap();
    m
}

fn registry_with(backends: Vec<Arc<FixedBackend>>) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    for b in backends {
        registry.register(b);
    }
    registry
}

// ── Heterogeneous flow ─────────────────────────────────────────

#[test]
fn small_network_single_backend_skips_partitioning() {
    // One 1 GiB device; ~10 MiB of weights.
    let mut module = chain_module("net", 4, 512 * 1024);
    let devices = vec![DeviceInfo::new("a", 1 << 30)];
    let partitioner = Partitioner::new(devices, registry_with(vec![FixedBackend::any("a")]));

    let dags = partitioner
        .partition(&mut module, &CompilationContext::new())
        .unwrap();
    assert_eq!(dags.len(), 1);
    let dag = &dags[0];
    assert_eq!(dag.name(), "net");
    // One synthetic root plus one child carrying the whole function.
    assert_eq!(dag.len(), 2);
    let child = dag.node(dag.node(dag.root()).children[0]);
    assert_eq!(child.name, "net");
    assert_eq!(child.logical_devices, vec![LogicalDeviceId(0)]);
    // The original function is still the network body.
    assert!(module.has_function("net"));
}

#[test]
fn memory_driven_split_respects_device_memory() {
    // 100 KiB device; three 60 KiB weight chains force a split.
    let mut module = chain_module("net", 6, 4 * 1024); // 16 KiB per conv
    let device_mem = 48 * 1024;
    let devices = vec![
        DeviceInfo::new("a", device_mem),
        DeviceInfo::new("a", device_mem),
        DeviceInfo::new("a", device_mem),
    ];
    let partitioner = Partitioner::new(devices, registry_with(vec![FixedBackend::any("a")]));

    let dags = partitioner
        .partition(&mut module, &CompilationContext::new())
        .unwrap();
    let dag = &dags[0];
    dag_validation(dag).unwrap();
    assert!(dag.sub_networks().count() > 1);

    // Every sub-function exists, and the original is gone.
    assert!(!module.has_function("net"));
    let mut kinds = Vec::new();
    for (_, node) in dag.sub_networks() {
        let func = module.function(&node.name).unwrap();
        assert!(!node.logical_devices.is_empty());
        for (_, n) in func.nodes() {
            if !n.kind.is_save() {
                kinds.push(n.kind);
            }
        }
    }
    // Round-trip of operator kinds (the original conv bodies survive).
    assert_eq!(kinds.iter().filter(|k| **k == NodeKind::Conv).count(), 6);
}

#[test]
fn heterogeneous_backends_chain_linearly() {
    // Conv -> Add -> Relu with backend A = {Conv, Relu, Save} and
    // backend B = {Add, Mul}.
    let mut module = Module::new();
    let input = module.add_placeholder("input", ty(8));
    let result = module.add_placeholder("result", ty(8));
    let mut f = Function::new("net");
    let conv = f
        .add_node(Node::new(
            "conv",
            NodeKind::Conv,
            vec![ValueRef::Placeholder(input)],
            vec![ty(8)],
        ))
        .unwrap();
    let add = f
        .add_node(Node::new(
            "add",
            NodeKind::Add,
            vec![ValueRef::output_of(conv)],
            vec![ty(8)],
        ))
        .unwrap();
    let relu = f
        .add_node(Node::new(
            "relu",
            NodeKind::Relu,
            vec![ValueRef::output_of(add)],
            vec![ty(8)],
        ))
        .unwrap();
    f.add_node(Node::new(
        "out",
        NodeKind::Save,
        vec![ValueRef::output_of(relu), ValueRef::Placeholder(result)],
        vec![ty(8)],
    ))
    .unwrap();
    module.insert_function(f).unwrap();

    let a_kinds = KindSet::new()
        .with(NodeKind::Conv)
        .with(NodeKind::Relu)
        .with(NodeKind::Save);
    let b_kinds = KindSet::new().with(NodeKind::Add).with(NodeKind::Mul);
    let mut devices = vec![DeviceInfo::new("a", 1 << 30), DeviceInfo::new("b", 1 << 30)];
    devices[0].supported_nodes = "Conv,Relu,Save".to_string();
    devices[1].supported_nodes = "Add,Mul".to_string();

    let registry = registry_with(vec![
        FixedBackend::only("a", a_kinds),
        FixedBackend::only("b", b_kinds),
    ]);
    let partitioner = Partitioner::new(devices, registry);
    let dags = partitioner
        .partition(&mut module, &CompilationContext::new())
        .unwrap();

    let dag = &dags[0];
    dag_validation(dag).unwrap();
    assert_eq!(dag.sub_networks().count(), 3);

    // Linear chain: root -> partA -> partB -> partA.
    let root_children = &dag.node(dag.root()).children;
    assert_eq!(root_children.len(), 1);
    let first = dag.node(root_children[0]);
    assert_eq!(first.backend_name, "a");
    let second = dag.node(first.children[0]);
    assert_eq!(second.backend_name, "b");
    let third = dag.node(second.children[0]);
    assert_eq!(third.backend_name, "a");
    assert!(third.children.is_empty());
}

#[test]
fn unsupported_kind_fails_and_leaves_no_partitions() {
    let mut module = Module::new();
    let input = module.add_placeholder("input", ty(8));
    let mut f = Function::new("net");
    let conv = f
        .add_node(Node::new(
            "conv",
            NodeKind::Conv,
            vec![ValueRef::Placeholder(input)],
            vec![ty(8)],
        ))
        .unwrap();
    f.add_node(Node::new(
        "soft",
        NodeKind::Softmax,
        vec![ValueRef::output_of(conv)],
        vec![ty(8)],
    ))
    .unwrap();
    module.insert_function(f).unwrap();

    let mut devices = vec![DeviceInfo::new("a", 1 << 10), DeviceInfo::new("b", 1 << 10)];
    devices[0].supported_nodes = "Conv,Relu".to_string();
    devices[1].supported_nodes = "Add,Mul".to_string();
    let registry = registry_with(vec![
        FixedBackend::only("a", KindSet::new().with(NodeKind::Conv).with(NodeKind::Relu)),
        FixedBackend::only("b", KindSet::new().with(NodeKind::Add).with(NodeKind::Mul)),
    ]);

    let partitioner = Partitioner::new(devices, registry);
    let err = partitioner
        .partition(&mut module, &CompilationContext::new())
        .unwrap_err();
    assert!(matches!(err, PartitionError::NodeNotSupported { .. }));
    // The failed split created nothing.
    assert_eq!(module.num_functions(), 1);
    assert!(module.has_function("net"));
}

// ── Saturation ─────────────────────────────────────────────────

#[test]
fn saturation_replicates_across_spare_devices() {
    // Fits on one device out of four: expect 4 logical replicas.
    let mut module = chain_module("net", 2, 1024);
    let devices = vec![
        DeviceInfo::new("a", 1 << 30),
        DeviceInfo::new("a", 1 << 30),
        DeviceInfo::new("a", 1 << 30),
        DeviceInfo::new("a", 1 << 30),
    ];
    let partitioner = Partitioner::new(devices, registry_with(vec![FixedBackend::any("a")]))
        .with_saturate_host(true);

    let dags = partitioner
        .partition(&mut module, &CompilationContext::new())
        .unwrap();
    let dag = &dags[0];
    for (_, node) in dag.sub_networks() {
        assert_eq!(node.logical_devices.len(), 4);
    }
}

// ── User-defined flow ──────────────────────────────────────────

fn two_partition_config() -> PartitionConfig {
    let mut node_to_partition = BTreeMap::new();
    node_to_partition.insert("conv0".to_string(), 0);
    node_to_partition.insert("conv1".to_string(), 0);
    PartitionConfig {
        func_name: "net".to_string(),
        num_of_partitions: 2,
        backend_names: vec!["a".to_string(), "a".to_string()],
        partition_names: vec!["p0".to_string(), "p1".to_string()],
        node_to_partition,
    }
}

#[test]
fn user_defined_partition_places_unmapped_nodes() {
    let mut module = chain_module("net", 4, 64);
    let devices = vec![DeviceInfo::new("a", 1 << 30), DeviceInfo::new("a", 1 << 30)];
    let partitioner = Partitioner::new(devices, registry_with(vec![FixedBackend::any("a")]))
        .with_partition_config(two_partition_config());

    let dags = partitioner
        .partition(&mut module, &CompilationContext::new())
        .unwrap();
    let dag = &dags[0];
    dag_validation(dag).unwrap();
    assert_eq!(dag.sub_networks().count(), 2);
    assert!(module.has_function("p0"));
    assert!(module.has_function("p1"));

    // conv2, conv3, out landed in the unused partition p1.
    let p1 = module.function("p1").unwrap();
    assert!(p1.node_by_name("conv2").is_some());
    assert!(p1.node_by_name("conv3").is_some());
}

#[test]
fn user_defined_partition_with_unreferenced_index_drops_it_at_materialization() {
    // Every node is mapped to partition 0; partition 1 is declared but
    // never referenced and there are no unmapped nodes to place in it.
    let mut node_to_partition = BTreeMap::new();
    for name in ["conv0", "conv1", "out"] {
        node_to_partition.insert(name.to_string(), 0);
    }
    let config = PartitionConfig {
        func_name: "net".to_string(),
        num_of_partitions: 2,
        backend_names: vec!["a".to_string(), "a".to_string()],
        partition_names: vec!["p0".to_string(), "p1".to_string()],
        node_to_partition,
    };

    let mut module = chain_module("net", 2, 64);
    let devices = vec![DeviceInfo::new("a", 1 << 30), DeviceInfo::new("a", 1 << 30)];
    let partitioner = Partitioner::new(devices, registry_with(vec![FixedBackend::any("a")]))
        .with_partition_config(config);

    let dags = partitioner
        .partition(&mut module, &CompilationContext::new())
        .unwrap();
    let dag = &dags[0];
    dag_validation(dag).unwrap();
    // The empty partition yields neither a sub-function nor a DAG node.
    assert_eq!(dag.sub_networks().count(), 1);
    assert!(module.has_function("p0"));
    assert!(!module.has_function("p1"));
}

#[test]
fn user_defined_partition_rejects_size_mismatch() {
    let mut config = two_partition_config();
    config.backend_names.pop();
    let mut module = chain_module("net", 4, 64);
    let devices = vec![DeviceInfo::new("a", 1 << 30)];
    let partitioner = Partitioner::new(devices, registry_with(vec![FixedBackend::any("a")]))
        .with_partition_config(config);
    let err = partitioner
        .partition(&mut module, &CompilationContext::new())
        .unwrap_err();
    assert!(matches!(err, PartitionError::InvalidPartitionConfig(_)));
}

#[test]
fn user_defined_partition_rejects_ambiguous_unused() {
    // Three partitions, only partition 0 referenced: two unused but
    // unmapped nodes exist.
    let mut config = two_partition_config();
    config.num_of_partitions = 3;
    config.backend_names = vec!["a".into(), "a".into(), "a".into()];
    config.partition_names = vec!["p0".into(), "p1".into(), "p2".into()];
    let mut module = chain_module("net", 4, 64);
    let devices = vec![DeviceInfo::new("a", 1 << 30)];
    let partitioner = Partitioner::new(devices, registry_with(vec![FixedBackend::any("a")]))
        .with_partition_config(config);
    let err = partitioner
        .partition(&mut module, &CompilationContext::new())
        .unwrap_err();
    assert!(matches!(err, PartitionError::InvalidPartitionConfig(_)));
}

// ── Load-balanced flow ─────────────────────────────────────────

#[test]
fn load_balanced_spreads_over_devices() {
    let mut module = chain_module("net", 8, 1024);
    let mut devices = Vec::new();
    for _ in 0..2 {
        let mut d = DeviceInfo::new("a", 1 << 30);
        d.peak_compute = 1e9;
        d.peak_dram_bw = 1e9;
        devices.push(d);
    }
    let mut options = partitioner::PartitionerOptions::default();
    options.load_balance = true;
    let partitioner = Partitioner::new(devices, registry_with(vec![FixedBackend::any("a")]))
        .with_options(options);

    let dags = partitioner
        .partition(&mut module, &CompilationContext::new())
        .unwrap();
    let dag = &dags[0];
    dag_validation(dag).unwrap();
    // The roofline walk spreads the operators over two partitions; the
    // logical colouring then packs by memory, and both fit one device.
    assert_eq!(dag.sub_networks().count(), 2);
    let mut logicals: Vec<usize> = dag
        .sub_networks()
        .flat_map(|(_, n)| n.logical_devices.iter().map(|l| l.index()))
        .collect();
    logicals.sort_unstable();
    assert_eq!(logicals, vec![0, 0]);
}

// ── Compile-context gates ──────────────────────────────────────

#[test]
fn malformed_profile_context_is_rejected() {
    let mut module = chain_module("net", 2, 64);
    let devices = vec![DeviceInfo::new("a", 1 << 30)];
    let partitioner = Partitioner::new(devices, registry_with(vec![FixedBackend::any("a")]));

    let mut cctx = CompilationContext::new();
    cctx.precision_config.quant_mode = partitioner::QuantizationMode::Profile;
    let err = partitioner.partition(&mut module, &cctx).unwrap_err();
    assert!(matches!(err, PartitionError::CompileContextMalformed(_)));
}
