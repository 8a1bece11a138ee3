// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compilation context: precision, optimization, and partition settings
//! carried alongside a module through partitioning and provisioning.

use crate::PartitionError;
use device_registry::BackendOptions;
use graph_ir::{KindSet, PlaceholderBindings};
use std::collections::BTreeMap;

/// What kind of transformation quantization should perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuantizationMode {
    /// Perform no transformations for quantization.
    #[default]
    None,
    /// Quantize the graph using previously gathered statistics.
    Quantize,
    /// Add profiling nodes for quantization statistics gathering.
    Profile,
}

/// Whether the graph is compiled for training or inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompilationMode {
    Train,
    #[default]
    Infer,
}

/// Configuration for the different precision modes.
#[derive(Debug, Clone, Default)]
pub struct PrecisionConfiguration {
    pub quant_mode: QuantizationMode,
    /// Whether to convert f32 to f16 in the function.
    pub convert_to_fp16: bool,
    /// Whether to convert fused quantized types to their fp16 variants.
    pub convert_fused_to_fp16: bool,
    /// Whether to clip out-of-range values to the fp16 min/max.
    pub clip_fp16: bool,
    /// Kinds whose precision is kept unchanged. A blacklist by default; a
    /// whitelist iff `use_set_as_whitelist` (only valid with
    /// `convert_to_fp16`).
    pub precision_mode_kind_set: KindSet,
    pub use_set_as_whitelist: bool,
}

/// Options for the optimizations applied before partitioning.
#[derive(Debug, Clone)]
pub struct OptimizationOptions {
    /// If true, perform compile-time elimination of dead computation.
    pub enable_constant_folding: bool,
}

impl Default for OptimizationOptions {
    fn default() -> Self {
        Self {
            enable_constant_folding: true,
        }
    }
}

/// Mapping from original to lowered node names gathered during lowering;
/// required by the profiling and quantization flows.
pub type LoweredInfoMap = BTreeMap<String, Vec<String>>;

/// Context for compilation of one module.
#[derive(Debug, Clone, Default)]
pub struct CompilationContext {
    /// Selects training or inference compilation.
    pub comp_mode: CompilationMode,
    /// Options handed through to backends.
    pub backend_opts: BackendOptions,
    /// Options for pre-partition optimization.
    pub optimization_opts: OptimizationOptions,
    /// Precision configuration.
    pub precision_config: PrecisionConfiguration,
    /// Placeholder bindings; required when profiling.
    pub bindings: Option<PlaceholderBindings>,
    /// Lowered-node bookkeeping; required when profiling or quantizing.
    pub lowered_info: Option<LoweredInfoMap>,
}

impl CompilationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the context is well-formed for its configuration.
    pub fn verify(&self) -> Result<(), PartitionError> {
        if self.precision_config.use_set_as_whitelist && !self.precision_config.convert_to_fp16 {
            return Err(PartitionError::CompileContextMalformed(
                "the precision kind set can only be a whitelist in fp16-conversion mode"
                    .to_string(),
            ));
        }

        match self.precision_config.quant_mode {
            QuantizationMode::Profile => {
                if self.bindings.is_none() {
                    return Err(PartitionError::CompileContextMalformed(
                        "profiling mode requires placeholder bindings".to_string(),
                    ));
                }
                if self.lowered_info.is_none() {
                    return Err(PartitionError::CompileContextMalformed(
                        "profiling mode requires a lowered-info map".to_string(),
                    ));
                }
                if self.precision_config.convert_to_fp16 {
                    return Err(PartitionError::CompileContextMalformed(
                        "converting to fp16 while profiling is unsupported".to_string(),
                    ));
                }
            }
            QuantizationMode::Quantize => {
                if self.lowered_info.is_none() {
                    return Err(PartitionError::CompileContextMalformed(
                        "quantization mode requires a lowered-info map".to_string(),
                    ));
                }
            }
            QuantizationMode::None => {}
        }

        Ok(())
    }
}

/// A user-defined partition plan.
///
/// Partition ids run from 0 to `num_of_partitions - 1`. Nodes absent from
/// `node_to_partition` are placed into the single partition id that never
/// appears among the mapping's values.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PartitionConfig {
    /// Name of the function to partition.
    pub func_name: String,
    /// Number of user-defined partitions; 0 disables the config.
    pub num_of_partitions: usize,
    /// Backend per partition; length must equal `num_of_partitions`.
    pub backend_names: Vec<String>,
    /// Name per partition; length must equal `num_of_partitions`.
    pub partition_names: Vec<String>,
    /// Node name → partition id.
    pub node_to_partition: BTreeMap<String, usize>,
}

impl PartitionConfig {
    /// Returns `true` when the config drives partitioning.
    pub fn enabled(&self) -> bool {
        self.num_of_partitions > 0
    }
}
