// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operator nodes, value references, placeholders, and constants.

use crate::{ElemType, NodeKind, Shape};

/// Dense index of a [`Node`] within its owning [`crate::Function`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Builds an id from a raw arena index. The caller is responsible for
    /// the index being in range for the function it is used with.
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw arena index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Dense index of a [`Placeholder`] within its owning [`crate::Module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaceholderId(pub(crate) usize);

impl PlaceholderId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Dense index of a [`Constant`] within its owning [`crate::Module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstantId(pub(crate) usize);

impl ConstantId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The type of a graph value: shape plus element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TypeDesc {
    pub shape: Shape,
    pub elem: ElemType,
}

impl TypeDesc {
    pub fn new(shape: Shape, elem: ElemType) -> Self {
        Self { shape, elem }
    }

    /// Byte footprint of a value of this type.
    pub fn size_bytes(&self) -> u64 {
        self.shape.size_bytes(self.elem)
    }
}

impl std::fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.elem, self.shape)
    }
}

/// Reference to a value consumed by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRef {
    /// The `output`-th result of another node in the same function.
    NodeOutput { node: NodeId, output: usize },
    /// An external-input placeholder owned by the module.
    Placeholder(PlaceholderId),
    /// A weight constant owned by the module.
    Constant(ConstantId),
}

impl ValueRef {
    /// Shorthand for the first output of a node.
    pub fn output_of(node: NodeId) -> Self {
        ValueRef::NodeOutput { node, output: 0 }
    }

    /// Returns the producing node, if this reference points at one.
    pub fn producer(&self) -> Option<NodeId> {
        match self {
            ValueRef::NodeOutput { node, .. } => Some(*node),
            _ => None,
        }
    }
}

/// An external-input node carrying a shape and element type.
#[derive(Debug, Clone)]
pub struct Placeholder {
    pub name: String,
    pub ty: TypeDesc,
}

impl Placeholder {
    /// Byte size of the bound tensor.
    pub fn size_bytes(&self) -> u64 {
        self.ty.size_bytes()
    }
}

/// A weight constant carrying a shape and element type.
///
/// Constant payloads live with the compiled artifact; the IR only tracks
/// typing and byte size for memory accounting.
#[derive(Debug, Clone)]
pub struct Constant {
    pub name: String,
    pub ty: TypeDesc,
}

impl Constant {
    pub fn size_bytes(&self) -> u64 {
        self.ty.size_bytes()
    }
}

/// A single operator node.
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique name within the owning function.
    pub name: String,
    /// Operator kind.
    pub kind: NodeKind,
    /// Consumed values, in operator-defined order.
    pub inputs: Vec<ValueRef>,
    /// Result types, one per output.
    pub outputs: Vec<TypeDesc>,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        kind: NodeKind,
        inputs: Vec<ValueRef>,
        outputs: Vec<TypeDesc>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs,
            outputs,
        }
    }

    /// Total byte size of all outputs.
    pub fn output_bytes(&self) -> u64 {
        self.outputs.iter().map(TypeDesc::size_bytes).sum()
    }
}
