// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Backend-capability split: colour every node with the first backend
//! that accepts it, then cut the BFS traversal wherever the colour
//! changes.

use super::{BackendMap, PROFILING_BACKEND};
use crate::materialize::do_partitioning;
use crate::{
    CompilationContext, DagList, NodeRef, PartitionError, PartitionMap, QuantizationMode,
};
use device_registry::LogicalDeviceId;
use graph_ir::{Module, NodeId};

/// Assigns every node of `func_name` to exactly one backend and
/// materializes one sub-function per contiguous backend run.
///
/// Backend choice walks the declared backend order: a backend is skipped
/// when its non-supported set names the node's kind, or when a non-empty
/// supported set omits it; it is accepted when it lowers the node or
/// reports it supported. A node no backend accepts fails the whole
/// partition.
///
/// In profiling mode every recorded backend is overwritten with
/// [`PROFILING_BACKEND`] (boundaries still reflect true affinity), the
/// partitions get sequential logical devices, and the DAG is built
/// immediately.
///
/// Returns the `(sub-function, backend)` pairs in traversal order and,
/// in profiling mode, the DAG list.
pub(crate) fn backend_based_partition(
    module: &mut Module,
    func_name: &str,
    backend_map: &BackendMap,
    cctx: &CompilationContext,
) -> Result<(Vec<(String, String)>, Option<DagList>), PartitionError> {
    let profiling = cctx.precision_config.quant_mode == QuantizationMode::Profile;

    // Phase 1: per-node backend choice, in declared backend order.
    let (node_backend, traversal) = {
        let func = module
            .function(func_name)
            .ok_or_else(|| PartitionError::FunctionNotFound(func_name.to_string()))?;

        let mut node_backend: Vec<Option<&str>> = vec![None; func.num_nodes()];
        for (id, node) in func.nodes() {
            for backend_name in backend_map.order() {
                let info = backend_map
                    .get(backend_name)
                    .expect("order and infos stay in sync");
                if info.non_supported_kinds.contains(node.kind) {
                    continue;
                }
                if !info.supported_kinds.is_empty() && !info.supported_kinds.contains(node.kind) {
                    continue;
                }
                if info.backend.should_lower(node) || info.backend.is_op_supported(node) {
                    node_backend[id.index()] = Some(backend_name);
                    break;
                }
            }
            if node_backend[id.index()].is_none() {
                return Err(PartitionError::NodeNotSupported {
                    node: node.name.clone(),
                    kind: node.kind,
                });
            }
        }

        let traversal: Vec<NodeId> = func
            .bfs_levels()
            .iter()
            .rev()
            .flatten()
            .copied()
            .collect();
        let node_backend: Vec<String> = node_backend
            .into_iter()
            .map(|b| b.expect("checked above").to_string())
            .collect();
        (node_backend, traversal)
    };

    // Phase 2: contiguous-by-traversal colouring into partitions.
    let mut mapping = PartitionMap::new();
    let mut func_to_backend = Vec::new();
    let mut color = 0;
    let mut current_backend: Option<&str> = None;
    let mut current = None;
    for &id in &traversal {
        let backend = node_backend[id.index()].as_str();
        if current_backend != Some(backend) {
            current_backend = Some(backend);
            color += 1;
            let name = format!("{func_name}_part{color}");
            let recorded = if profiling { PROFILING_BACKEND } else { backend };
            let pid = mapping.create_partition(name.clone(), recorded, func_name);
            func_to_backend.push((name, recorded.to_string()));
            current = Some(pid);
        }
        mapping.add(
            NodeRef::new(func_name, id),
            current.expect("partition opened before first node"),
        );
    }

    if profiling {
        let pids: Vec<_> = mapping.partitions().map(|(pid, _)| pid).collect();
        for (i, pid) in pids.into_iter().enumerate() {
            mapping.append_logical_device(pid, LogicalDeviceId(i));
        }
    }

    let dag = do_partitioning(func_name, &[func_name.to_string()], module, &mapping, profiling)?;
    Ok((func_to_backend, dag.map(|d| vec![d])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::test_backend_map;
    use graph_ir::{ElemType, Function, KindSet, Node, NodeKind, Shape, TypeDesc, ValueRef};

    fn ty(n: usize) -> TypeDesc {
        TypeDesc::new(Shape::vector(n), ElemType::F32)
    }

    /// conv -> add -> relu, with backend "a" taking conv/relu and "b"
    /// taking add.
    fn conv_add_relu() -> Module {
        let mut m = Module::new();
        let input = m.add_placeholder("input", ty(8));
        let result = m.add_placeholder("result", ty(8));
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
        m.insert_function(f).unwrap();
        m
    }

    fn two_backend_map() -> BackendMap {
        let mut map = test_backend_map(&[("a", 1 << 30, 1), ("b", 1 << 30, 1)]);
        let a = map.infos.get_mut("a").unwrap();
        a.supported_kinds = KindSet::new()
            .with(NodeKind::Conv)
            .with(NodeKind::Relu)
            .with(NodeKind::Save);
        let b = map.infos.get_mut("b").unwrap();
        b.supported_kinds = KindSet::new().with(NodeKind::Add).with(NodeKind::Mul);
        map
    }

    #[test]
    fn test_alternating_backends_split() {
        let mut m = conv_add_relu();
        let bm = two_backend_map();
        let (ftb, dag) =
            backend_based_partition(&mut m, "net", &bm, &CompilationContext::new()).unwrap();
        assert!(dag.is_none());
        // conv | add | relu+save → three partitions a, b, a.
        let backends: Vec<&str> = ftb.iter().map(|(_, b)| b.as_str()).collect();
        assert_eq!(backends, vec!["a", "b", "a"]);
        assert!(m.has_function("net_part1"));
        assert!(m.has_function("net_part2"));
        assert!(m.has_function("net_part3"));
    }

    #[test]
    fn test_unsupported_kind_fails() {
        let mut m = Module::new();
        let input = m.add_placeholder("input", ty(8));
        let mut f = Function::new("net");
        f.add_node(Node::new(
            "soft",
            NodeKind::Softmax,
            vec![ValueRef::Placeholder(input)],
            vec![ty(8)],
        ))
        .unwrap();
        m.insert_function(f).unwrap();

        let bm = two_backend_map();
        let err = backend_based_partition(&mut m, "net", &bm, &CompilationContext::new());
        assert!(matches!(err, Err(PartitionError::NodeNotSupported { .. })));
    }

    #[test]
    fn test_profiling_overwrites_backend_and_builds_dag() {
        let mut m = conv_add_relu();
        let bm = two_backend_map();
        let mut cctx = CompilationContext::new();
        cctx.precision_config.quant_mode = QuantizationMode::Profile;
        cctx.bindings = Some(graph_ir::PlaceholderBindings::new());
        cctx.lowered_info = Some(Default::default());

        let (ftb, dags) = backend_based_partition(&mut m, "net", &bm, &cctx).unwrap();
        assert!(ftb.iter().all(|(_, b)| b == PROFILING_BACKEND));
        // Boundaries still reflect true affinity: three partitions.
        assert_eq!(ftb.len(), 3);
        let dags = dags.unwrap();
        assert_eq!(dags.len(), 1);
        assert_eq!(dags[0].sub_networks().count(), 3);
    }
}
