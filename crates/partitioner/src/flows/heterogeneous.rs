// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The default flow: backend-capability split followed by a memory-driven
//! cut per backend.

use super::backend_split::backend_based_partition;
use super::{optimize_function, Partitioner};
use crate::assign::{
    assign_logical_device_id, logical_devices_validation, memory_usage_validation, saturate_host,
};
use crate::materialize::do_partitioning;
use crate::select::select_partitions;
use crate::{CompilationContext, DagList, PartitionError, PartitionMap};
use graph_ir::Module;

impl Partitioner {
    /// Heterogeneous partition:
    ///
    /// 1. With a single backend and a function that fits its memory, skip
    ///    partitioning entirely.
    /// 2. Otherwise split by backend capability, erase the original, and
    ///    run the memory-driven cut per resulting sub-function.
    /// 3. Validate memory, assign logical devices, validate device
    ///    counts, materialize, and optionally saturate the host.
    pub(crate) fn heterogeneous_partition(
        &self,
        module: &mut Module,
        cctx: &CompilationContext,
    ) -> Result<DagList, PartitionError> {
        let backend_map = self.gen_backend_map()?;
        let (rep_name, mem_size) = self.select_rep_func(module)?;

        let func_to_backend: Vec<(String, String)>;
        if backend_map.len() == 1 {
            let backend_name = backend_map.order()[0].clone();
            let backend_mem = backend_map
                .get(&backend_name)
                .expect("order and infos stay in sync")
                .mem_size;
            if mem_size < backend_mem {
                tracing::info!(
                    model_size = mem_size,
                    backend = %backend_name,
                    device_memory = backend_mem,
                    "model fits a single device, skipping partition"
                );
                return self.create_dag_without_partition(&backend_name, module, cctx);
            }
            self.expect_single_function(module, "heterogeneous")?;
            func_to_backend = vec![(rep_name.clone(), backend_name)];
        } else {
            self.expect_single_function(module, "heterogeneous")?;
            let (ftb, _) = backend_based_partition(module, &rep_name, &backend_map, cctx)?;
            module.erase_function(&rep_name)?;
            func_to_backend = ftb;
        }

        // Memory-driven cut per backend-homogeneous sub-function.
        let mut mapping = PartitionMap::new();
        for (fname, backend_name) in &func_to_backend {
            if !self.optimized {
                if let Some(func) = module.function_mut(fname) {
                    optimize_function(func, cctx)?;
                }
            }
            let avail_mem = backend_map
                .get(backend_name)
                .map_or(u64::MAX, |b| b.mem_size);
            let sub_map = select_partitions(module, fname, avail_mem, backend_name)?;
            mapping.insert(sub_map);
        }

        memory_usage_validation(&mapping, &backend_map)?;
        let logical_count = assign_logical_device_id(&mut mapping, module, &backend_map);
        logical_devices_validation(&mapping, &backend_map)?;

        let source_names: Vec<String> = func_to_backend.iter().map(|(f, _)| f.clone()).collect();
        let dag = do_partitioning(&rep_name, &source_names, module, &mapping, true)?
            .expect("save_dag requested");
        for name in &source_names {
            module.erase_function(name)?;
        }

        let mut dags = vec![dag];
        if self.saturate
            && backend_map.len() == 1
            && mapping.num_partitions() < self.device_info.len()
        {
            saturate_host(self.device_info.len(), logical_count, &mut dags);
        }

        self.finalize(&dags, &mapping, module)?;
        Ok(dags)
    }
}
