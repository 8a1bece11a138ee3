// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Logical-device assignment, the partition quotient graph, memory and
//! device-count validation, and host saturation.

use crate::flows::BackendMap;
use crate::{DagList, NodeRef, PartitionError, PartitionId, PartitionMap};
use device_registry::LogicalDeviceId;
use graph_ir::{Module, NodeKind, ValueRef};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashSet};

/// Edges of the partition quotient graph: `(producer, consumer)` pairs.
///
/// Covers direct node-output edges within each source function and
/// placeholder-mediated transfers (a save node writing a placeholder that
/// another partition reads).
pub(crate) fn partition_dependencies(
    module: &Module,
    map: &PartitionMap,
) -> BTreeSet<(PartitionId, PartitionId)> {
    let mut edges = BTreeSet::new();
    let mut funcs: BTreeSet<&str> = BTreeSet::new();
    for (_, info) in map.partitions() {
        funcs.insert(info.source_func.as_str());
    }

    // Placeholder writers/readers across all source functions.
    let mut writers: BTreeMap<usize, PartitionId> = BTreeMap::new();
    let mut readers: BTreeMap<usize, BTreeSet<PartitionId>> = BTreeMap::new();

    for &fname in &funcs {
        let Some(func) = module.function(fname) else {
            continue;
        };
        for (id, node) in func.nodes() {
            let Some(pc) = map.partition_of(&NodeRef::new(fname, id)) else {
                continue;
            };
            for (i, input) in node.inputs.iter().enumerate() {
                match *input {
                    ValueRef::NodeOutput { node: src, .. } => {
                        if let Some(pp) = map.partition_of(&NodeRef::new(fname, src)) {
                            if pp != pc {
                                edges.insert((pp, pc));
                            }
                        }
                    }
                    ValueRef::Placeholder(ph) => {
                        // A save's target operand is a write, not a read.
                        if node.kind == NodeKind::Save && i == 1 {
                            writers.insert(ph.index(), pc);
                        } else {
                            readers.entry(ph.index()).or_default().insert(pc);
                        }
                    }
                    ValueRef::Constant(_) => {}
                }
            }
        }
    }

    for (ph, writer) in writers {
        if let Some(parts) = readers.get(&ph) {
            for &reader in parts {
                if reader != writer {
                    edges.insert((writer, reader));
                }
            }
        }
    }
    edges
}

/// `true` if merging `absorb` into `keep` keeps the quotient graph acyclic.
pub(crate) fn merge_keeps_acyclic(
    edges: &BTreeSet<(PartitionId, PartitionId)>,
    num_partitions: usize,
    keep: PartitionId,
    absorb: PartitionId,
) -> bool {
    let relabel = |p: PartitionId| if p == absorb { keep } else { p };
    let mut adj = vec![BTreeSet::new(); num_partitions];
    for &(a, b) in edges {
        let (a, b) = (relabel(a), relabel(b));
        if a != b {
            adj[a.index()].insert(b.index());
        }
    }

    // Iterative colour DFS over the contracted graph.
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }
    let mut marks = vec![Mark::White; num_partitions];
    for start in 0..num_partitions {
        if marks[start] != Mark::White {
            continue;
        }
        let mut stack = vec![(start, false)];
        while let Some((v, processed)) = stack.pop() {
            if processed {
                marks[v] = Mark::Black;
                continue;
            }
            if marks[v] == Mark::Black {
                continue;
            }
            marks[v] = Mark::Grey;
            stack.push((v, true));
            for &w in &adj[v] {
                match marks[w] {
                    Mark::Grey => return false,
                    Mark::White => stack.push((w, false)),
                    Mark::Black => {}
                }
            }
        }
    }
    true
}

/// Verifies that every partition's working set fits its backend's
/// per-device memory (invariant: no sub-network can ever outgrow the
/// device it targets).
pub(crate) fn memory_usage_validation(
    map: &PartitionMap,
    backend_map: &BackendMap,
) -> Result<(), PartitionError> {
    for (_, info) in map.partitions() {
        let Some(backend) = backend_map.get(&info.backend_name) else {
            continue;
        };
        if info.mem_info.total() > backend.mem_size {
            return Err(PartitionError::PartitionMemoryExceeded {
                partition: info.name.clone(),
                backend: info.backend_name.clone(),
                needed: info.mem_info.total(),
                available: backend.mem_size,
            });
        }
    }
    Ok(())
}

/// Assigns each partition the lowest logical device id (of its backend)
/// whose running memory total still admits the partition's footprint.
///
/// Walks partitions in topological order of the quotient graph so that a
/// shared device never has to hold two partitions that are live at once
/// more than the colouring accounts for. Returns the number of distinct
/// logical ids used.
pub(crate) fn assign_logical_device_id(
    map: &mut PartitionMap,
    module: &Module,
    backend_map: &BackendMap,
) -> usize {
    map.clear_logical_devices();
    let n = map.num_partitions();
    let edges = partition_dependencies(module, map);

    // Kahn's algorithm, lowest partition id first for determinism.
    let mut indegree = vec![0usize; n];
    let mut adj = vec![Vec::new(); n];
    for &(a, b) in &edges {
        adj[a.index()].push(b.index());
        indegree[b.index()] += 1;
    }
    let mut heap: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&i| indegree[i] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(v)) = heap.pop() {
        order.push(v);
        for &w in &adj[v] {
            indegree[w] -= 1;
            if indegree[w] == 0 {
                heap.push(Reverse(w));
            }
        }
    }
    // A cycle cannot happen for maps built by the flows; fall back to
    // creation order for any stragglers.
    for i in 0..n {
        if !order.contains(&i) {
            order.push(i);
        }
    }

    // Logical ids are global; each carries its backend and running total.
    let mut id_backend: Vec<String> = Vec::new();
    let mut id_used: Vec<u64> = Vec::new();
    for idx in order {
        let pid = PartitionId(idx);
        let (backend_name, need) = {
            let info = map.info(pid);
            (info.backend_name.clone(), info.mem_info.total())
        };
        let cap = backend_map
            .get(&backend_name)
            .map_or(u64::MAX, |b| b.mem_size);

        let mut chosen = None;
        for (lid, &used) in id_used.iter().enumerate() {
            if id_backend[lid] == backend_name && used + need <= cap {
                chosen = Some(lid);
                break;
            }
        }
        let lid = match chosen {
            Some(lid) => lid,
            None => {
                id_backend.push(backend_name);
                id_used.push(0);
                id_used.len() - 1
            }
        };
        id_used[lid] += need;
        map.append_logical_device(pid, LogicalDeviceId(lid));
    }
    id_used.len()
}

/// Verifies that no backend needs more logical devices than it has
/// physical devices.
pub(crate) fn logical_devices_validation(
    map: &PartitionMap,
    backend_map: &BackendMap,
) -> Result<(), PartitionError> {
    let mut per_backend: BTreeMap<&str, HashSet<LogicalDeviceId>> = BTreeMap::new();
    for (_, info) in map.partitions() {
        per_backend
            .entry(info.backend_name.as_str())
            .or_default()
            .extend(info.logical_devices.iter().copied());
    }
    for (backend_name, logical) in per_backend {
        let Some(backend) = backend_map.get(backend_name) else {
            continue;
        };
        if logical.len() > backend.num_devices {
            return Err(PartitionError::InsufficientPhysicalDevices {
                backend: backend_name.to_string(),
                logical: logical.len(),
                physical: backend.num_devices,
            });
        }
    }
    Ok(())
}

/// Duplicates the partition set across otherwise-idle devices.
///
/// With `duplications = total_devices / logical_device_count ≥ 2`, every
/// node gains logical ids `L + i·logical_device_count` for each existing
/// `L` and `i ∈ [1, duplications)`; the executor round-robins across the
/// replicas at dispatch time.
pub fn saturate_host(total_devices: usize, logical_device_count: usize, dags: &mut DagList) {
    if logical_device_count == 0 {
        return;
    }
    let duplications = total_devices / logical_device_count;
    if duplications < 2 {
        return;
    }
    for dag in dags.iter_mut() {
        let root = dag.root();
        let ids: Vec<_> = dag.nodes().map(|(id, _)| id).collect();
        for id in ids {
            if id == root {
                continue;
            }
            let node = dag.node_mut(id);
            let mut new_devices = Vec::new();
            for &logical in &node.logical_devices {
                for i in 1..duplications {
                    new_devices.push(LogicalDeviceId(
                        logical.index() + i * logical_device_count,
                    ));
                }
            }
            node.logical_devices.extend(new_devices);
        }
    }
}
