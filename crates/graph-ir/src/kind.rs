// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operator node kinds and kind-set parsing.
//!
//! Device capability descriptions name kinds in comma-separated strings
//! (e.g. `"Conv,Relu"`); [`KindSet::parse_list`] turns those into typed
//! sets for the partitioner.

use crate::GraphError;
use std::collections::BTreeSet;

/// The closed set of operator kinds understood by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    Conv,
    MaxPool,
    AvgPool,
    FullyConnected,
    MatMul,
    BatchNorm,
    Add,
    Mul,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
    Concat,
    Reshape,
    Transpose,
    /// Terminal node writing a value into an output placeholder.
    Save,
}

impl NodeKind {
    /// Returns the canonical label for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Conv => "Conv",
            NodeKind::MaxPool => "MaxPool",
            NodeKind::AvgPool => "AvgPool",
            NodeKind::FullyConnected => "FullyConnected",
            NodeKind::MatMul => "MatMul",
            NodeKind::BatchNorm => "BatchNorm",
            NodeKind::Add => "Add",
            NodeKind::Mul => "Mul",
            NodeKind::Relu => "Relu",
            NodeKind::Sigmoid => "Sigmoid",
            NodeKind::Tanh => "Tanh",
            NodeKind::Softmax => "Softmax",
            NodeKind::Concat => "Concat",
            NodeKind::Reshape => "Reshape",
            NodeKind::Transpose => "Transpose",
            NodeKind::Save => "Save",
        }
    }

    /// Parses a kind from its canonical label (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "conv" => Some(NodeKind::Conv),
            "maxpool" => Some(NodeKind::MaxPool),
            "avgpool" => Some(NodeKind::AvgPool),
            "fullyconnected" | "fc" => Some(NodeKind::FullyConnected),
            "matmul" => Some(NodeKind::MatMul),
            "batchnorm" => Some(NodeKind::BatchNorm),
            "add" => Some(NodeKind::Add),
            "mul" => Some(NodeKind::Mul),
            "relu" => Some(NodeKind::Relu),
            "sigmoid" => Some(NodeKind::Sigmoid),
            "tanh" => Some(NodeKind::Tanh),
            "softmax" => Some(NodeKind::Softmax),
            "concat" => Some(NodeKind::Concat),
            "reshape" => Some(NodeKind::Reshape),
            "transpose" => Some(NodeKind::Transpose),
            "save" => Some(NodeKind::Save),
            _ => None,
        }
    }

    /// Returns `true` for the terminal output-writing kind.
    pub fn is_save(self) -> bool {
        matches!(self, NodeKind::Save)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable set of node kinds.
///
/// An empty set carries meaning decided by its consumer: an empty
/// *supported* set means "all kinds supported", while an empty
/// *non-supported* set means "nothing excluded".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindSet {
    kinds: BTreeSet<NodeKind>,
}

impl KindSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a comma-separated list of kind labels.
    ///
    /// The empty string (or a string of only separators/whitespace) parses
    /// to the empty set. Unknown labels are an error.
    pub fn parse_list(s: &str) -> Result<Self, GraphError> {
        let mut kinds = BTreeSet::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let kind = NodeKind::parse(part)
                .ok_or_else(|| GraphError::UnknownKind(part.to_string()))?;
            kinds.insert(kind);
        }
        Ok(Self { kinds })
    }

    /// Inserts a kind, returning `self` for chaining in tests and builders.
    pub fn with(mut self, kind: NodeKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    /// Returns `true` if the set contains `kind`.
    pub fn contains(&self, kind: NodeKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Returns the number of kinds in the set.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Iterates the kinds in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = NodeKind> + '_ {
        self.kinds.iter().copied()
    }
}

impl FromIterator<NodeKind> for KindSet {
    fn from_iter<T: IntoIterator<Item = NodeKind>>(iter: T) -> Self {
        Self {
            kinds: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(NodeKind::parse("Conv"), Some(NodeKind::Conv));
        assert_eq!(NodeKind::parse("relu"), Some(NodeKind::Relu));
        assert_eq!(NodeKind::parse(" MatMul "), Some(NodeKind::MatMul));
        assert_eq!(NodeKind::parse("bogus"), None);
    }

    #[test]
    fn test_parse_list() {
        let set = KindSet::parse_list("Conv,Relu").unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(NodeKind::Conv));
        assert!(set.contains(NodeKind::Relu));
        assert!(!set.contains(NodeKind::Add));
    }

    #[test]
    fn test_parse_list_empty() {
        assert!(KindSet::parse_list("").unwrap().is_empty());
        assert!(KindSet::parse_list(" , ,").unwrap().is_empty());
    }

    #[test]
    fn test_parse_list_unknown() {
        let err = KindSet::parse_list("Conv,Frobnicate").unwrap_err();
        assert!(err.to_string().contains("Frobnicate"));
    }

    #[test]
    fn test_is_save() {
        assert!(NodeKind::Save.is_save());
        assert!(!NodeKind::Add.is_save());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", NodeKind::FullyConnected), "FullyConnected");
    }
}
