// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Load-balanced flow: roofline-time-driven placement for hosts whose
//! devices all share one backend.

use super::{optimize_function, Partitioner};
use crate::assign::{
    assign_logical_device_id, logical_devices_validation, memory_usage_validation, saturate_host,
};
use crate::materialize::do_partitioning;
use crate::select::select_partitions;
use crate::{
    node_compute_time, node_mem_usage, update_graph_mem_info_by_adding_node, CompilationContext,
    DagList, GraphMemInfo, NodeRef, PartitionError, PartitionMap,
};
use device_registry::LogicalDeviceId;
use graph_ir::{NodeId, Module, ValueRef};
use std::collections::HashSet;

/// Slack applied to the per-partition time budget: an operator may exceed
/// the budget by up to half its own cost before spilling to the next
/// partition, preventing flapping on near-boundary operators.
const ALLOWED_LOAD_IMBALANCE_FRACTION: f64 = 0.5;

impl Partitioner {
    /// Spreads operators across `num_devices` partitions so each carries
    /// roughly `1/num_devices` of the total roofline runtime.
    ///
    /// The per-node start partition is the maximum partition of its
    /// inputs, which keeps the partition graph acyclic. A node that fits
    /// no partition under the memory and balance rules fails the flow.
    pub(crate) fn load_balanced_partition(
        &self,
        module: &mut Module,
        cctx: &CompilationContext,
        requested_devices: usize,
    ) -> Result<DagList, PartitionError> {
        self.expect_single_function(module, "load-balanced")?;
        let backend_map = self.gen_backend_map()?;
        let (rep_name, _) = self.select_rep_func(module)?;
        let backend_name = backend_map.order()[0].clone();
        let backend = backend_map
            .get(&backend_name)
            .expect("order and infos stay in sync")
            .clone();
        let available_memory = backend.mem_size;

        if !self.optimized {
            if let Some(func) = module.function_mut(&rep_name) {
                optimize_function(func, cctx)?;
            }
        }

        // Step 1: the memory-only cut sets a floor on the partition count.
        let mut probe = select_partitions(module, &rep_name, available_memory, &backend_name)?;
        let floor = assign_logical_device_id(&mut probe, module, &backend_map);
        let num_devices = requested_devices.max(floor).max(1);

        // Step 2: roofline-balanced placement.
        let func = module
            .function(&rep_name)
            .ok_or_else(|| PartitionError::FunctionNotFound(rep_name.clone()))?;

        let total_time: f64 = func
            .nodes()
            .map(|(id, _)| node_compute_time(func, module, id, &backend))
            .sum();
        let time_per_partition = total_time / num_devices as f64;

        let mut mapping = PartitionMap::new();
        let pids: Vec<_> = (0..num_devices)
            .map(|i| {
                let pid = mapping.create_partition(
                    format!("{rep_name}_part{}", i + 1),
                    &backend_name,
                    &rep_name,
                );
                mapping.append_logical_device(pid, LogicalDeviceId(i));
                pid
            })
            .collect();

        let mut device_time = vec![0f64; num_devices];
        let mut memory_available = vec![available_memory; num_devices];
        let mut node_sets: Vec<HashSet<NodeId>> = vec![HashSet::new(); num_devices];
        let mut graph_mem = vec![GraphMemInfo::default(); num_devices];

        let levels = func.bfs_levels();
        for level in levels.iter().rev() {
            for &id in level {
                let node = func.node(id).expect("level ids are valid");

                // Acyclicity: never place a node below any of its inputs.
                let start = node
                    .inputs
                    .iter()
                    .filter_map(|input| match input {
                        ValueRef::NodeOutput { node: src, .. } => mapping
                            .partition_of(&NodeRef::new(rep_name.clone(), *src))
                            .map(|p| p.index()),
                        _ => None,
                    })
                    .max()
                    .unwrap_or(0);

                let op_time = node_compute_time(func, module, id, &backend);
                let op_mem = node_mem_usage(func, module, id);

                let mut placed = false;
                for p in start..num_devices {
                    let balance_ok = device_time[p]
                        + op_time * ALLOWED_LOAD_IMBALANCE_FRACTION
                        < time_per_partition;
                    let mem_ok = memory_available[p] >= op_mem;
                    if mem_ok && (balance_ok || p == num_devices - 1) {
                        mapping.add(NodeRef::new(rep_name.clone(), id), pids[p]);
                        device_time[p] += op_time;
                        memory_available[p] -= op_mem;
                        graph_mem[p] = update_graph_mem_info_by_adding_node(
                            func,
                            module,
                            &node_sets[p],
                            &graph_mem[p],
                            id,
                        );
                        node_sets[p].insert(id);
                        mapping.set_graph_mem_info(pids[p], graph_mem[p]);
                        placed = true;
                        break;
                    }
                }
                if !placed {
                    return Err(PartitionError::LoadBalanceInfeasible {
                        node: node.name.clone(),
                    });
                }
            }
        }
        for (p, time) in device_time.iter().enumerate() {
            tracing::debug!(partition = p, estimated_runtime = time, "load balance result");
        }

        memory_usage_validation(&mapping, &backend_map)?;
        let logical_count = assign_logical_device_id(&mut mapping, module, &backend_map);
        logical_devices_validation(&mapping, &backend_map)?;

        let dag = do_partitioning(&rep_name, &[rep_name.clone()], module, &mapping, true)?
            .expect("save_dag requested");
        module.erase_function(&rep_name)?;

        let mut dags = vec![dag];
        if self.saturate && mapping.num_partitions() < self.device_info.len() {
            saturate_host(self.device_info.len(), logical_count, &mut dags);
        }

        self.finalize(&dags, &mapping, module)?;
        Ok(dags)
    }
}
