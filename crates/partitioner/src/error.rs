// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the partitioner.

use graph_ir::NodeKind;

/// Errors that can occur while partitioning a module.
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    /// No backend accepts the given operator kind.
    #[error("node '{node}' of kind {kind} is not supported by any of the provided backends")]
    NodeNotSupported { node: String, kind: NodeKind },

    /// After all merges a partition still exceeds its backend's memory.
    #[error("partition '{partition}' needs {needed} bytes but backend '{backend}' devices hold {available}")]
    PartitionMemoryExceeded {
        partition: String,
        backend: String,
        needed: u64,
        available: u64,
    },

    /// More logical devices were assigned than physical devices exist.
    #[error("backend '{backend}' needs {logical} logical devices but only {physical} physical devices exist")]
    InsufficientPhysicalDevices {
        backend: String,
        logical: usize,
        physical: usize,
    },

    /// No partition can take an operator under its remaining budget.
    #[error("load-balanced partition failed: no partition can accept node '{node}'")]
    LoadBalanceInfeasible { node: String },

    /// The user-defined partition configuration is malformed.
    #[error("invalid partition config: {0}")]
    InvalidPartitionConfig(String),

    /// The named function does not exist in the module.
    #[error("function '{0}' not found in the module")]
    FunctionNotFound(String),

    /// The compilation context is malformed for its configuration.
    #[error("malformed compilation context: {0}")]
    CompileContextMalformed(String),

    /// DAG validation failed.
    #[error("invalid DAG: {0}")]
    InvalidDag(String),

    /// The module shape is not accepted by the selected flow.
    #[error("unsupported module: {0}")]
    UnsupportedModule(String),

    /// A graph operation failed while rewriting the module.
    #[error(transparent)]
    Graph(#[from] graph_ir::GraphError),

    /// A backend lookup or compile step failed.
    #[error(transparent)]
    Device(#[from] device_registry::DeviceError),
}
