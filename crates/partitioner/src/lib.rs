// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # partitioner
//!
//! Splits a compiled computation graph into sub-graphs that each fit a
//! single device's memory and capability profile, assigns the sub-graphs
//! to logical devices, and emits a directed-acyclic execution [`Dag`].
//!
//! # Partition Flows
//!
//! Mode selection is first-match:
//!
//! 1. **User-defined** — a [`PartitionConfig`] names every partition and
//!    maps nodes explicitly.
//! 2. **Profiling** — all sub-networks are routed to the profiling backend
//!    while partition boundaries still reflect true backend affinity.
//! 3. **Load-balanced** — one backend across all devices; roofline time
//!    estimates spread operators evenly.
//! 4. **Heterogeneous** (default) — backend capability split, then a
//!    memory-driven cut per backend, then merge passes.
//!
//! # Memory Model
//!
//! A partition's working set is `input_bytes + output_bytes +
//! constant_bytes` as tracked by [`GraphMemInfo`]; cross-partition edges
//! count on both sides of the cut. This total is authoritative for every
//! admission decision the partitioner makes.

mod adjust;
mod assign;
mod cctx;
mod dag;
mod error;
mod flows;
mod map;
mod materialize;
mod mem;
mod select;

pub use assign::saturate_host;
pub use cctx::{
    CompilationContext, CompilationMode, LoweredInfoMap, OptimizationOptions, PartitionConfig,
    PrecisionConfiguration, QuantizationMode,
};
pub use dag::{dag_validation, BackendHints, Dag, DagList, DagNode, DagNodeId};
pub use error::PartitionError;
pub use flows::{BackendMap, Partitioner, PartitionerOptions, PROFILING_BACKEND};
pub use map::{NodeRef, PartitionId, PartitionInfo, PartitionMap};
pub use mem::{
    graph_mem_info, node_compute_time, node_mem_usage, update_graph_mem_info_by_adding_node,
    value_type, GraphMemInfo,
};
