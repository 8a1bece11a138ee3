// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! User-defined partitioning from an explicit [`PartitionConfig`].

use super::{optimize_function, Partitioner};
use crate::assign::{
    assign_logical_device_id, logical_devices_validation, memory_usage_validation,
};
use crate::materialize::do_partitioning;
use crate::{
    dag_validation, graph_mem_info, CompilationContext, DagList, NodeRef, PartitionConfig,
    PartitionError, PartitionMap,
};
use graph_ir::{Module, NodeId};
use std::collections::{BTreeSet, HashSet};

impl Partitioner {
    /// Builds partitions exactly as the user described them.
    ///
    /// Nodes named in `node_to_partition` go where the mapping says; all
    /// remaining nodes go into the single partition index the mapping
    /// never references. Size mismatches, duplicate names, out-of-range
    /// ids, and a missing or ambiguous unused partition are configuration
    /// errors.
    pub(crate) fn partition_from_config(
        &self,
        module: &mut Module,
        config: PartitionConfig,
    ) -> Result<DagList, PartitionError> {
        let backend_map = self.gen_backend_map()?;
        let n = config.num_of_partitions;

        if config.backend_names.len() != n || config.partition_names.len() != n {
            return Err(PartitionError::InvalidPartitionConfig(format!(
                "{n} partitions but {} backends and {} names",
                config.backend_names.len(),
                config.partition_names.len()
            )));
        }
        {
            let unique: HashSet<&str> =
                config.partition_names.iter().map(String::as_str).collect();
            if unique.len() != n {
                return Err(PartitionError::InvalidPartitionConfig(
                    "duplicate partition names".to_string(),
                ));
            }
        }
        for backend in &config.backend_names {
            if backend_map.get(backend).is_none() {
                return Err(PartitionError::InvalidPartitionConfig(format!(
                    "backend '{backend}' has no devices on this host"
                )));
            }
        }

        let func_name = config.func_name.clone();
        let mut mapping = PartitionMap::new();
        let pids: Vec<_> = (0..n)
            .map(|i| {
                mapping.create_partition(
                    config.partition_names[i].clone(),
                    config.backend_names[i].clone(),
                    func_name.clone(),
                )
            })
            .collect();

        // Assign named nodes; remember which partition indices the
        // mapping never uses.
        let mut node_sets: Vec<HashSet<NodeId>> = vec![HashSet::new(); n];
        {
            let func = module
                .function(&func_name)
                .ok_or_else(|| PartitionError::FunctionNotFound(func_name.clone()))?;
            let mut unused: BTreeSet<usize> = (0..n).collect();
            let mut unmapped: Vec<NodeId> = Vec::new();
            for (id, node) in func.nodes() {
                match config.node_to_partition.get(&node.name) {
                    None => unmapped.push(id),
                    Some(&p) => {
                        if p >= n {
                            return Err(PartitionError::InvalidPartitionConfig(format!(
                                "node '{}' maps to partition {p}, but only {n} exist",
                                node.name
                            )));
                        }
                        mapping.add(NodeRef::new(func_name.clone(), id), pids[p]);
                        node_sets[p].insert(id);
                        unused.remove(&p);
                    }
                }
            }

            if !unmapped.is_empty() {
                if unused.len() != 1 {
                    return Err(PartitionError::InvalidPartitionConfig(format!(
                        "{} unmapped nodes require exactly 1 unused partition, found {}",
                        unmapped.len(),
                        unused.len()
                    )));
                }
                let p = *unused.iter().next().expect("checked non-empty");
                for id in unmapped {
                    mapping.add(NodeRef::new(func_name.clone(), id), pids[p]);
                    node_sets[p].insert(id);
                }
            }

            for (i, set) in node_sets.iter().enumerate() {
                let info = graph_mem_info(func, module, set);
                mapping.set_graph_mem_info(pids[i], info);
            }
        }

        memory_usage_validation(&mapping, &backend_map)?;
        assign_logical_device_id(&mut mapping, module, &backend_map);
        logical_devices_validation(&mapping, &backend_map)?;

        let dag = do_partitioning(&func_name, &[func_name.clone()], module, &mapping, true)?
            .expect("save_dag requested");
        module.erase_function(&func_name)?;

        dag_validation(&dag)?;

        if !self.optimized {
            let names: Vec<String> = mapping.partitions().map(|(_, i)| i.name.clone()).collect();
            let cctx = CompilationContext::new();
            for name in names {
                if let Some(func) = module.function_mut(&name) {
                    optimize_function(func, &cctx)?;
                }
            }
        }

        let dags = vec![dag];
        self.finalize(&dags, &mapping, module)?;
        Ok(dags)
    }
}
