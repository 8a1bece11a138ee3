// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the graph IR.

/// Errors that can occur while building or verifying graphs.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A function with this name already exists in the module.
    #[error("function '{0}' already exists in the module")]
    DuplicateFunction(String),

    /// No function with this name exists in the module.
    #[error("function '{0}' not found in the module")]
    FunctionNotFound(String),

    /// Two nodes in one function share a name.
    #[error("duplicate node name '{node}' in function '{func}'")]
    DuplicateNodeName { func: String, node: String },

    /// A node input references a missing node or an out-of-range output.
    #[error("node '{node}' has an invalid input: {detail}")]
    InvalidValueRef { node: String, detail: String },

    /// A node declares no outputs.
    #[error("node '{0}' declares no outputs")]
    NoOutputs(String),

    /// A kind label could not be parsed.
    #[error("unknown node kind '{0}'")]
    UnknownKind(String),
}
