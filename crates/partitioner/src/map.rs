// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The node-to-partition mapping built by the partition flows.

use crate::GraphMemInfo;
use device_registry::LogicalDeviceId;
use graph_ir::NodeId;
use std::collections::{HashMap, HashSet};

/// Dense index of a partition within a [`PartitionMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(pub(crate) usize);

impl PartitionId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A node addressed across functions: partitions may draw nodes from
/// several source functions after a backend split.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub func: String,
    pub node: NodeId,
}

impl NodeRef {
    pub fn new(func: impl Into<String>, node: NodeId) -> Self {
        Self {
            func: func.into(),
            node,
        }
    }
}

/// Metadata for one partition.
#[derive(Debug, Clone)]
pub struct PartitionInfo {
    /// Name of the sub-function this partition will materialize into.
    pub name: String,
    /// Target backend.
    pub backend_name: String,
    /// Logical device slots this partition is replicated onto.
    pub logical_devices: Vec<LogicalDeviceId>,
    /// Working-set estimate.
    pub mem_info: GraphMemInfo,
    /// The function whose nodes this partition draws from.
    pub source_func: String,
}

/// Mapping from every node of the input function(s) to the sub-function
/// that will own it, plus per-partition metadata.
#[derive(Debug, Clone, Default)]
pub struct PartitionMap {
    partitions: Vec<PartitionInfo>,
    assignment: HashMap<NodeRef, PartitionId>,
}

impl PartitionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new partition.
    pub fn create_partition(
        &mut self,
        name: impl Into<String>,
        backend_name: impl Into<String>,
        source_func: impl Into<String>,
    ) -> PartitionId {
        self.partitions.push(PartitionInfo {
            name: name.into(),
            backend_name: backend_name.into(),
            logical_devices: Vec::new(),
            mem_info: GraphMemInfo::default(),
            source_func: source_func.into(),
        });
        PartitionId(self.partitions.len() - 1)
    }

    /// Assigns a node to a partition.
    pub fn add(&mut self, node: NodeRef, partition: PartitionId) {
        self.assignment.insert(node, partition);
    }

    /// Returns the partition owning a node, if assigned.
    pub fn partition_of(&self, node: &NodeRef) -> Option<PartitionId> {
        self.assignment.get(node).copied()
    }

    /// Replaces a partition's working-set estimate.
    pub fn set_graph_mem_info(&mut self, partition: PartitionId, info: GraphMemInfo) {
        self.partitions[partition.0].mem_info = info;
    }

    /// Appends a logical device slot to a partition.
    pub fn append_logical_device(&mut self, partition: PartitionId, device: LogicalDeviceId) {
        self.partitions[partition.0].logical_devices.push(device);
    }

    /// Clears all logical device assignments (before re-assignment).
    pub fn clear_logical_devices(&mut self) {
        for p in &mut self.partitions {
            p.logical_devices.clear();
        }
    }

    /// Returns a partition's metadata.
    pub fn info(&self, partition: PartitionId) -> &PartitionInfo {
        &self.partitions[partition.0]
    }

    pub(crate) fn info_mut(&mut self, partition: PartitionId) -> &mut PartitionInfo {
        &mut self.partitions[partition.0]
    }

    /// Number of partitions.
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Iterates `(id, info)` pairs in creation order.
    pub fn partitions(&self) -> impl Iterator<Item = (PartitionId, &PartitionInfo)> {
        self.partitions
            .iter()
            .enumerate()
            .map(|(i, p)| (PartitionId(i), p))
    }

    /// The node ids of one partition (all from its source function).
    pub fn node_set(&self, partition: PartitionId) -> HashSet<NodeId> {
        self.assignment
            .iter()
            .filter(|(_, &p)| p == partition)
            .map(|(n, _)| n.node)
            .collect()
    }

    /// All node refs of one partition.
    pub fn nodes_of(&self, partition: PartitionId) -> Vec<NodeRef> {
        let mut refs: Vec<NodeRef> = self
            .assignment
            .iter()
            .filter(|(_, &p)| p == partition)
            .map(|(n, _)| n.clone())
            .collect();
        refs.sort_by(|a, b| (&a.func, a.node).cmp(&(&b.func, b.node)));
        refs
    }

    /// Appends all partitions of another map, reindexing its ids.
    pub fn insert(&mut self, other: PartitionMap) {
        let offset = self.partitions.len();
        self.partitions.extend(other.partitions);
        for (node, pid) in other.assignment {
            self.assignment.insert(node, PartitionId(pid.0 + offset));
        }
    }

    /// Moves every node of `absorb` into `keep` and deletes `absorb`.
    ///
    /// The caller recomputes `keep`'s memory info afterwards. All
    /// partition ids greater than `absorb` shift down by one.
    pub fn merge_partitions(&mut self, keep: PartitionId, absorb: PartitionId) {
        debug_assert_ne!(keep, absorb);
        for pid in self.assignment.values_mut() {
            if *pid == absorb {
                *pid = keep;
            }
        }
        self.partitions.remove(absorb.0);
        for pid in self.assignment.values_mut() {
            if pid.0 > absorb.0 {
                pid.0 -= 1;
            }
        }
    }

    /// Drops partitions that own no nodes, reindexing the rest.
    pub fn retain_nonempty(&mut self) {
        let used: HashSet<usize> = self.assignment.values().map(|p| p.0).collect();
        let mut remap = vec![usize::MAX; self.partitions.len()];
        let mut next = 0;
        let mut kept = Vec::with_capacity(self.partitions.len());
        for (i, info) in self.partitions.drain(..).enumerate() {
            if used.contains(&i) {
                remap[i] = next;
                next += 1;
                kept.push(info);
            }
        }
        self.partitions = kept;
        for pid in self.assignment.values_mut() {
            pid.0 = remap[pid.0];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(f: &str, i: usize) -> NodeRef {
        NodeRef::new(f, NodeId::from_index(i))
    }

    #[test]
    fn test_create_and_assign() {
        let mut map = PartitionMap::new();
        let p0 = map.create_partition("f_part1", "cpu", "f");
        let p1 = map.create_partition("f_part2", "cpu", "f");
        map.add(node("f", 0), p0);
        map.add(node("f", 1), p1);
        assert_eq!(map.partition_of(&node("f", 0)), Some(p0));
        assert_eq!(map.partition_of(&node("f", 1)), Some(p1));
        assert_eq!(map.num_partitions(), 2);
        assert_eq!(map.node_set(p0).len(), 1);
    }

    #[test]
    fn test_insert_reindexes() {
        let mut a = PartitionMap::new();
        let pa = a.create_partition("x", "cpu", "f");
        a.add(node("f", 0), pa);

        let mut b = PartitionMap::new();
        let pb = b.create_partition("y", "npu", "g");
        b.add(node("g", 0), pb);

        a.insert(b);
        assert_eq!(a.num_partitions(), 2);
        let merged_pid = a.partition_of(&node("g", 0)).unwrap();
        assert_eq!(a.info(merged_pid).name, "y");
    }

    #[test]
    fn test_merge_partitions() {
        let mut map = PartitionMap::new();
        let p0 = map.create_partition("a", "cpu", "f");
        let p1 = map.create_partition("b", "cpu", "f");
        let p2 = map.create_partition("c", "cpu", "f");
        map.add(node("f", 0), p0);
        map.add(node("f", 1), p1);
        map.add(node("f", 2), p2);

        map.merge_partitions(p0, p1);
        assert_eq!(map.num_partitions(), 2);
        assert_eq!(map.partition_of(&node("f", 1)), Some(p0));
        // The old p2 shifted down by one.
        let p2_new = map.partition_of(&node("f", 2)).unwrap();
        assert_eq!(map.info(p2_new).name, "c");
        assert_eq!(p2_new.index(), 1);
    }

    #[test]
    fn test_retain_nonempty() {
        let mut map = PartitionMap::new();
        let p0 = map.create_partition("a", "cpu", "f");
        let _empty = map.create_partition("b", "cpu", "f");
        let p2 = map.create_partition("c", "cpu", "f");
        map.add(node("f", 0), p0);
        map.add(node("f", 5), p2);

        map.retain_nonempty();
        assert_eq!(map.num_partitions(), 2);
        let p_last = map.partition_of(&node("f", 5)).unwrap();
        assert_eq!(map.info(p_last).name, "c");
        assert_eq!(p_last.index(), 1);
    }
}
