// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Materializes a partition map into real sub-functions and the
//! execution DAG.
//!
//! Every cross-partition edge becomes an intermediate module placeholder:
//! the producer partition gains a save node writing it, and the consumer
//! partition reads it as an ordinary placeholder input. The DAG edges are
//! derived from exactly these transfers, which is what makes the
//! producer-is-ancestor invariant hold by construction.

use crate::{Dag, DagNode, DagNodeId, NodeRef, PartitionError, PartitionId, PartitionMap};
use graph_ir::{Function, Module, Node, NodeId, NodeKind, ValueRef};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Materializes each partition as a new function in `module` and builds
/// the DAG when `save_dag` is set.
///
/// `network_name` becomes the DAG root's name; `source_funcs` are the
/// functions whose nodes the map covers (left in place — callers erase
/// them afterwards). Empty partitions are dropped.
pub(crate) fn do_partitioning(
    network_name: &str,
    source_funcs: &[String],
    module: &mut Module,
    map: &PartitionMap,
    save_dag: bool,
) -> Result<Option<Dag>, PartitionError> {
    // Clone sources up front so the module can take new placeholders
    // while we read them.
    let mut sources: Vec<(String, Function)> = Vec::with_capacity(source_funcs.len());
    for name in source_funcs {
        let func = module
            .function(name)
            .ok_or_else(|| PartitionError::FunctionNotFound(name.clone()))?
            .clone();
        sources.push((name.clone(), func));
    }

    let live: Vec<PartitionId> = map
        .partitions()
        .filter(|(pid, _)| !map.node_set(*pid).is_empty())
        .map(|(pid, _)| pid)
        .collect();
    let mut out_funcs: BTreeMap<PartitionId, Function> = live
        .iter()
        .map(|&pid| (pid, Function::new(map.info(pid).name.clone())))
        .collect();

    // Old node → new id within its partition's function.
    let mut remap: HashMap<NodeRef, NodeId> = HashMap::new();
    // Values already saved across the cut: (func, node, output) → placeholder.
    let mut saved: HashMap<(String, NodeId, usize), graph_ir::PlaceholderId> = HashMap::new();

    for (fname, func) in &sources {
        for (old_id, node) in func.nodes() {
            let nref = NodeRef::new(fname.clone(), old_id);
            let pid = map.partition_of(&nref).ok_or_else(|| {
                PartitionError::InvalidPartitionConfig(format!(
                    "node '{}' of function '{fname}' is not mapped to any partition",
                    node.name
                ))
            })?;

            let mut inputs = Vec::with_capacity(node.inputs.len());
            for &input in &node.inputs {
                match input {
                    ValueRef::Placeholder(_) | ValueRef::Constant(_) => inputs.push(input),
                    ValueRef::NodeOutput { node: src, output } => {
                        let src_ref = NodeRef::new(fname.clone(), src);
                        let src_pid = map.partition_of(&src_ref).ok_or_else(|| {
                            PartitionError::InvalidPartitionConfig(format!(
                                "producer of '{}' is not mapped to any partition",
                                node.name
                            ))
                        })?;
                        let new_src = remap[&src_ref];
                        if src_pid == pid {
                            inputs.push(ValueRef::NodeOutput {
                                node: new_src,
                                output,
                            });
                        } else {
                            // Cross edge: route through a transfer
                            // placeholder written by the producer side.
                            let key = (fname.clone(), src, output);
                            let ph = match saved.get(&key) {
                                Some(&ph) => ph,
                                None => {
                                    let src_node =
                                        func.node(src).expect("validated at insertion");
                                    let ty = src_node.outputs[output].clone();
                                    let ph_name = format!(
                                        "{}__{}_o{}__xfer",
                                        fname, src_node.name, output
                                    );
                                    let ph = module.add_placeholder(ph_name.clone(), ty.clone());
                                    let producer_func = out_funcs
                                        .get_mut(&src_pid)
                                        .expect("producer partition is live");
                                    producer_func.add_node(Node::new(
                                        format!("save_{ph_name}"),
                                        NodeKind::Save,
                                        vec![
                                            ValueRef::NodeOutput {
                                                node: new_src,
                                                output,
                                            },
                                            ValueRef::Placeholder(ph),
                                        ],
                                        vec![ty],
                                    ))?;
                                    saved.insert(key, ph);
                                    ph
                                }
                            };
                            inputs.push(ValueRef::Placeholder(ph));
                        }
                    }
                }
            }

            let target = out_funcs.get_mut(&pid).expect("owning partition is live");
            let new_id = target.add_node(Node::new(
                node.name.clone(),
                node.kind,
                inputs,
                node.outputs.clone(),
            ))?;
            remap.insert(nref, new_id);
        }
    }

    // Derive partition-level edges from placeholder transfers: a save's
    // target operand is a write, anything else reading the placeholder is
    // a read. This also picks up transfers created by earlier passes.
    let mut writers: BTreeMap<usize, PartitionId> = BTreeMap::new();
    let mut readers: BTreeMap<usize, BTreeSet<PartitionId>> = BTreeMap::new();
    for (&pid, func) in &out_funcs {
        for (_, node) in func.nodes() {
            for (i, input) in node.inputs.iter().enumerate() {
                if let ValueRef::Placeholder(ph) = *input {
                    if node.kind == NodeKind::Save && i == 1 {
                        writers.insert(ph.index(), pid);
                    } else {
                        readers.entry(ph.index()).or_default().insert(pid);
                    }
                }
            }
        }
    }
    let mut edges: BTreeSet<(PartitionId, PartitionId)> = BTreeSet::new();
    for (ph, &writer) in &writers {
        if let Some(parts) = readers.get(ph) {
            for &reader in parts {
                if reader != writer {
                    edges.insert((writer, reader));
                }
            }
        }
    }

    // Install the materialized functions.
    for (_, func) in out_funcs.iter() {
        func.verify()?;
    }
    for (_, func) in out_funcs {
        module.insert_function(func)?;
    }

    if !save_dag {
        return Ok(None);
    }

    // Arena layout: root at 0, partitions in live order after it.
    let mut nodes = Vec::with_capacity(live.len() + 1);
    nodes.push(DagNode::new(network_name, ""));
    let index_of: BTreeMap<PartitionId, DagNodeId> = live
        .iter()
        .enumerate()
        .map(|(i, &pid)| (pid, DagNodeId(i + 1)))
        .collect();
    for &pid in &live {
        let info = map.info(pid);
        let mut node = DagNode::new(info.name.clone(), info.backend_name.clone());
        node.logical_devices = info.logical_devices.clone();
        nodes.push(node);
    }
    for &(from, to) in &edges {
        let (f, t) = (index_of[&from], index_of[&to]);
        nodes[f.index()].children.push(t);
        nodes[t.index()].parents.push(f);
    }
    // Entry partitions hang off the synthetic root.
    for &pid in &live {
        let id = index_of[&pid];
        if nodes[id.index()].parents.is_empty() {
            nodes[id.index()].parents.push(DagNodeId(0));
            nodes[0].children.push(id);
        }
    }

    Ok(Some(Dag::new(DagNodeId(0), nodes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag_validation;
    use graph_ir::{ElemType, Shape, TypeDesc};

    fn ty(n: usize) -> TypeDesc {
        TypeDesc::new(Shape::vector(n), ElemType::F32)
    }

    /// conv -> relu chain split into two partitions.
    fn split_module() -> (Module, PartitionMap) {
        let mut m = Module::new();
        let input = m.add_placeholder("input", ty(8));
        let result = m.add_placeholder("result", ty(8));
        let mut f = Function::new("net");
        let a = f
            .add_node(Node::new(
                "conv",
                NodeKind::Conv,
                vec![ValueRef::Placeholder(input)],
                vec![ty(8)],
            ))
            .unwrap();
        let b = f
            .add_node(Node::new(
                "relu",
                NodeKind::Relu,
                vec![ValueRef::output_of(a)],
                vec![ty(8)],
            ))
            .unwrap();
        f.add_node(Node::new(
            "out",
            NodeKind::Save,
            vec![ValueRef::output_of(b), ValueRef::Placeholder(result)],
            vec![ty(8)],
        ))
        .unwrap();
        m.insert_function(f).unwrap();

        let mut map = PartitionMap::new();
        let p1 = map.create_partition("net_part1", "a", "net");
        let p2 = map.create_partition("net_part2", "b", "net");
        map.add(NodeRef::new("net", a), p1);
        map.add(NodeRef::new("net", b), p2);
        map.add(NodeRef::new("net", NodeId::from_index(2)), p2);
        (m, map)
    }

    #[test]
    fn test_materializes_sub_functions() {
        let (mut m, map) = split_module();
        let dag = do_partitioning("net", &["net".to_string()], &mut m, &map, true)
            .unwrap()
            .unwrap();
        assert!(m.has_function("net_part1"));
        assert!(m.has_function("net_part2"));

        // The producer side got a save node for the transfer.
        let part1 = m.function("net_part1").unwrap();
        assert!(part1
            .nodes()
            .any(|(_, n)| n.kind == NodeKind::Save && n.name.contains("xfer")));

        // DAG: root -> part1 -> part2.
        dag_validation(&dag).unwrap();
        assert_eq!(dag.name(), "net");
        let root_children = &dag.node(dag.root()).children;
        assert_eq!(root_children.len(), 1);
        let p1 = dag.node(root_children[0]);
        assert_eq!(p1.name, "net_part1");
        assert_eq!(p1.children.len(), 1);
        assert_eq!(dag.node(p1.children[0]).name, "net_part2");
    }

    #[test]
    fn test_node_kinds_preserved() {
        let (mut m, map) = split_module();
        do_partitioning("net", &["net".to_string()], &mut m, &map, false).unwrap();
        let mut kinds: Vec<NodeKind> = ["net_part1", "net_part2"]
            .iter()
            .flat_map(|n| {
                m.function(n)
                    .unwrap()
                    .nodes()
                    .map(|(_, node)| node.kind)
                    .collect::<Vec<_>>()
            })
            .filter(|k| !k.is_save())
            .collect();
        kinds.sort_by_key(|k| k.as_str());
        assert_eq!(kinds, vec![NodeKind::Conv, NodeKind::Relu]);
    }

    #[test]
    fn test_consumer_reads_transfer_placeholder() {
        let (mut m, map) = split_module();
        do_partitioning("net", &["net".to_string()], &mut m, &map, false).unwrap();
        let part2 = m.function("net_part2").unwrap();
        let relu_id = part2.node_by_name("relu").unwrap();
        let relu = part2.node(relu_id).unwrap();
        assert!(matches!(relu.inputs[0], ValueRef::Placeholder(_)));
    }

    #[test]
    fn test_unmapped_node_is_error() {
        let (mut m, mut map) = split_module();
        // Rebuild the map missing the save node.
        map = {
            let mut fresh = PartitionMap::new();
            let p1 = fresh.create_partition("net_part1", "a", "net");
            fresh.add(NodeRef::new("net", NodeId::from_index(0)), p1);
            fresh
        };
        let err = do_partitioning("net", &["net".to_string()], &mut m, &map, true);
        assert!(err.is_err());
    }
}
