// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The memory-driven cut: BFS traversal with incremental accounting.

use crate::adjust::partitions_adjust;
use crate::{update_graph_mem_info_by_adding_node, GraphMemInfo, NodeRef, PartitionError, PartitionMap};
use graph_ir::Module;
use std::collections::HashSet;

/// Assigns the nodes of one function to memory-bounded partitions for a
/// single backend.
///
/// Walks BFS levels leaves-to-roots keeping a running [`GraphMemInfo`];
/// whenever tentatively adding a node would push the current partition
/// past `available_memory`, the partition is closed and a new one named
/// `<func>_part<k>` opens. A post-pass merges partitions back together
/// where that reduces communication or packs memory better.
pub(crate) fn select_partitions(
    module: &Module,
    func_name: &str,
    available_memory: u64,
    backend_name: &str,
) -> Result<PartitionMap, PartitionError> {
    let func = module
        .function(func_name)
        .ok_or_else(|| PartitionError::FunctionNotFound(func_name.to_string()))?;

    let mut mapping = PartitionMap::new();
    let mut color = 1;
    let mut current = mapping.create_partition(
        format!("{func_name}_part{color}"),
        backend_name,
        func_name,
    );
    let mut current_nodes = HashSet::new();
    let mut graph_mem = GraphMemInfo::default();

    let levels = func.bfs_levels();
    for level in levels.iter().rev() {
        for &id in level {
            let mut tentative =
                update_graph_mem_info_by_adding_node(func, module, &current_nodes, &graph_mem, id);
            if tentative.total() > available_memory && !current_nodes.is_empty() {
                color += 1;
                current = mapping.create_partition(
                    format!("{func_name}_part{color}"),
                    backend_name,
                    func_name,
                );
                current_nodes.clear();
                tentative = update_graph_mem_info_by_adding_node(
                    func,
                    module,
                    &current_nodes,
                    &GraphMemInfo::default(),
                    id,
                );
            }
            graph_mem = tentative;
            current_nodes.insert(id);
            mapping.add(NodeRef::new(func_name, id), current);
            mapping.set_graph_mem_info(current, graph_mem);
        }
    }

    partitions_adjust(&mut mapping, module, available_memory);
    tracing::debug!(
        func = func_name,
        partitions = mapping.num_partitions(),
        "memory-driven cut complete"
    );
    Ok(mapping)
}
