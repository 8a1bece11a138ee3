// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Partition memory accounting and roofline cost estimates.
//!
//! [`GraphMemInfo`] tracks the three components of a partition's device
//! working set: cross-partition input edges, outgoing/terminal outputs,
//! and weight constants. [`update_graph_mem_info_by_adding_node`] is the
//! incremental update used during the memory-driven cut; the totals it
//! produces are authoritative for every admission decision.

use device_registry::BackendInfo;
use graph_ir::{Function, Module, NodeId, NodeKind, TypeDesc, ValueRef};
use std::collections::HashSet;

/// Byte totals estimating a partition's device-memory working set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphMemInfo {
    /// Bytes entering the partition across its cut (including original
    /// network inputs).
    pub input_bytes: u64,
    /// Bytes leaving the partition across its cut, plus terminal outputs.
    pub output_bytes: u64,
    /// Bytes of weight constants owned by the partition.
    pub constant_bytes: u64,
}

impl GraphMemInfo {
    /// Total working-set estimate.
    pub fn total(&self) -> u64 {
        self.input_bytes + self.output_bytes + self.constant_bytes
    }
}

impl std::fmt::Display for GraphMemInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "in={} out={} const={} total={}",
            self.input_bytes,
            self.output_bytes,
            self.constant_bytes,
            self.total()
        )
    }
}

/// Resolves the type of a value reference within `func`.
pub fn value_type(func: &Function, module: &Module, vref: ValueRef) -> TypeDesc {
    match vref {
        ValueRef::NodeOutput { node, output } => func
            .node(node)
            .expect("value ref validated at insertion")
            .outputs[output]
            .clone(),
        ValueRef::Placeholder(p) => module
            .placeholder(p)
            .expect("placeholder id validated at insertion")
            .ty
            .clone(),
        ValueRef::Constant(c) => module
            .constant(c)
            .expect("constant id validated at insertion")
            .ty
            .clone(),
    }
}

/// Nodes consuming a specific output of `src`.
fn users_of_value(func: &Function, src: NodeId, output: usize) -> Vec<NodeId> {
    let mut users = Vec::new();
    for (id, node) in func.nodes() {
        if node
            .inputs
            .iter()
            .any(|i| matches!(i, ValueRef::NodeOutput { node, output: o } if *node == src && *o == output))
        {
            users.push(id);
        }
    }
    users
}

/// `true` when some node already in `partition` consumes `vref`.
fn consumed_inside(func: &Function, partition: &HashSet<NodeId>, vref: ValueRef) -> bool {
    partition.iter().any(|&p| {
        func.node(p)
            .expect("partition members are valid ids")
            .inputs
            .contains(&vref)
    })
}

/// Computes the new working-set sizes after tentatively adding `id` to a
/// partition currently holding `partition` with tallied sizes `prev`.
///
/// - A cross-edge input is added when the node consumes a value produced
///   outside the partition (placeholders included), unless another member
///   already consumes the same value.
/// - Constants count once, on first inclusion.
/// - An output counts when any consumer lies outside the partition or the
///   node is a terminal [`NodeKind::Save`].
/// - Edges internalized by this addition are subtracted from the side of
///   the cut where they were previously tallied.
pub fn update_graph_mem_info_by_adding_node(
    func: &Function,
    module: &Module,
    partition: &HashSet<NodeId>,
    prev: &GraphMemInfo,
    id: NodeId,
) -> GraphMemInfo {
    let node = func.node(id).expect("node id in range");
    let mut info = *prev;

    let mut seen = HashSet::new();
    for &input in &node.inputs {
        if !seen.insert(input) {
            continue;
        }
        let size = value_type(func, module, input).size_bytes();
        match input {
            ValueRef::Constant(_) => {
                if !consumed_inside(func, partition, input) {
                    info.constant_bytes += size;
                }
            }
            ValueRef::Placeholder(_) => {
                if !consumed_inside(func, partition, input) {
                    info.input_bytes += size;
                }
            }
            ValueRef::NodeOutput { node: src, output } => {
                if partition.contains(&src) {
                    // The producer lives here. If the last outside consumer
                    // of this value is the node being added, the value no
                    // longer crosses the cut.
                    let all_inside = users_of_value(func, src, output)
                        .iter()
                        .all(|u| partition.contains(u) || *u == id);
                    if all_inside {
                        info.output_bytes = info.output_bytes.saturating_sub(size);
                    }
                } else if !consumed_inside(func, partition, input) {
                    info.input_bytes += size;
                }
            }
        }
    }

    for (oi, out) in node.outputs.iter().enumerate() {
        let users = users_of_value(func, id, oi);
        let escapes = users.iter().any(|u| !partition.contains(u));
        if escapes || node.kind.is_save() {
            info.output_bytes += out.size_bytes();
        }
        // Consumers already inside tallied this value as a cross input.
        if users.iter().any(|u| partition.contains(u)) {
            info.input_bytes = info.input_bytes.saturating_sub(out.size_bytes());
        }
    }

    info
}

/// Folds the incremental update over a whole node set.
pub fn graph_mem_info(func: &Function, module: &Module, set: &HashSet<NodeId>) -> GraphMemInfo {
    let mut ordered: Vec<NodeId> = set.iter().copied().collect();
    ordered.sort();
    let mut partition = HashSet::new();
    let mut info = GraphMemInfo::default();
    for id in ordered {
        info = update_graph_mem_info_by_adding_node(func, module, &partition, &info, id);
        partition.insert(id);
    }
    info
}

/// Memory the device must hold for one node alone: its constants plus its
/// outputs. Used by the load-balanced flow's per-partition budget.
pub fn node_mem_usage(func: &Function, module: &Module, id: NodeId) -> u64 {
    let node = func.node(id).expect("node id in range");
    let mut seen = HashSet::new();
    let mut bytes = node.output_bytes();
    for &input in &node.inputs {
        if let ValueRef::Constant(_) = input {
            if seen.insert(input) {
                bytes += value_type(func, module, input).size_bytes();
            }
        }
    }
    bytes
}

/// Approximate operation count for one node.
fn node_flops(func: &Function, module: &Module, id: NodeId) -> f64 {
    let node = func.node(id).expect("node id in range");
    let out_elems: f64 = node
        .outputs
        .iter()
        .map(|t| t.shape.num_elements() as f64)
        .sum();
    match node.kind {
        NodeKind::Conv | NodeKind::FullyConnected | NodeKind::MatMul => {
            // 2 · output elements · reduction depth; the depth comes from
            // the innermost dimension of the first data input.
            let k = node
                .inputs
                .first()
                .map(|&i| value_type(func, module, i))
                .and_then(|t| t.shape.dims().last().copied())
                .unwrap_or(1) as f64;
            2.0 * out_elems * k
        }
        NodeKind::BatchNorm => 4.0 * out_elems,
        NodeKind::Softmax => 5.0 * out_elems,
        NodeKind::Add
        | NodeKind::Mul
        | NodeKind::Relu
        | NodeKind::Sigmoid
        | NodeKind::Tanh
        | NodeKind::MaxPool
        | NodeKind::AvgPool => out_elems,
        NodeKind::Concat | NodeKind::Reshape | NodeKind::Transpose | NodeKind::Save => 0.0,
    }
}

/// Roofline execution-time estimate for one node on the given backend:
/// the larger of compute time (flops over peak compute) and memory time
/// (bytes moved over peak DRAM bandwidth). Returns seconds; zero when the
/// backend publishes no rates.
pub fn node_compute_time(
    func: &Function,
    module: &Module,
    id: NodeId,
    backend: &BackendInfo,
) -> f64 {
    let node = func.node(id).expect("node id in range");
    let flops = node_flops(func, module, id);

    let mut bytes = node.output_bytes() as f64;
    let mut seen = HashSet::new();
    for &input in &node.inputs {
        if seen.insert(input) {
            bytes += value_type(func, module, input).size_bytes() as f64;
        }
    }

    let compute_t = if backend.peak_compute > 0.0 {
        flops / backend.peak_compute
    } else {
        0.0
    };
    let mem_t = if backend.peak_dram_bw > 0.0 {
        bytes / backend.peak_dram_bw
    } else {
        0.0
    };
    compute_t.max(mem_t)
}
