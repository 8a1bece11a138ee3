// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Quantization-profiling flow: partition boundaries follow true backend
//! affinity, but every sub-network runs on the profiling backend.

use super::backend_split::backend_based_partition;
use super::{optimize_function, Partitioner};
use crate::{CompilationContext, DagList, PartitionError};
use graph_ir::Module;

impl Partitioner {
    /// Profiling needs the node-to-sub-function mapping the backend split
    /// produces (to relate quantized tensors back to originals) but not a
    /// concrete device placement, so the flow stops after the split.
    pub(crate) fn quantization_profiling_partition(
        &self,
        module: &mut Module,
        cctx: &CompilationContext,
    ) -> Result<DagList, PartitionError> {
        self.expect_single_function(module, "quantization profiling")?;
        let backend_map = self.gen_backend_map()?;
        let (rep_name, _) = self.select_rep_func(module)?;

        let (func_to_backend, dags) =
            backend_based_partition(module, &rep_name, &backend_map, cctx)?;
        module.erase_function(&rep_name)?;

        for (fname, _) in &func_to_backend {
            if !self.optimized {
                if let Some(func) = module.function_mut(fname) {
                    optimize_function(func, cctx)?;
                }
            }
            if let Some(func) = module.function(fname) {
                func.verify()?;
            }
        }

        if self.options.log_partition {
            tracing::info!(
                sub_networks = func_to_backend.len(),
                "profiling a model to be partitioned across backends; every \
                 sub-network will be optimized for and run on the profiling backend"
            );
        }

        dags.ok_or_else(|| {
            PartitionError::InvalidDag("profiling partition produced no DAG".to_string())
        })
    }
}
