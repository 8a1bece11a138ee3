// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A function: an arena of operator nodes forming a DAG.
//!
//! # Acyclicity By Construction
//!
//! [`Function::add_node`] only accepts inputs referencing nodes that are
//! already in the arena, so the node graph can never contain a cycle and
//! every traversal can rely on `NodeId` order being a topological order
//! (producers before consumers).

use crate::{GraphError, Module, Node, NodeId, ValueRef};
use std::collections::HashSet;
use std::fmt;

/// An ordered collection of operator nodes forming a DAG.
#[derive(Debug, Clone, Default)]
pub struct Function {
    name: String,
    nodes: Vec<Node>,
}

impl Function {
    /// Creates an empty function with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Returns the function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a node to the arena.
    ///
    /// Inputs referencing node outputs must point at already-inserted
    /// nodes with an in-range output index; node names must be unique.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        if node.outputs.is_empty() {
            return Err(GraphError::NoOutputs(node.name.clone()));
        }
        if self.nodes.iter().any(|n| n.name == node.name) {
            return Err(GraphError::DuplicateNodeName {
                func: self.name.clone(),
                node: node.name.clone(),
            });
        }
        for input in &node.inputs {
            if let ValueRef::NodeOutput { node: src, output } = input {
                let Some(producer) = self.nodes.get(src.0) else {
                    return Err(GraphError::InvalidValueRef {
                        node: node.name.clone(),
                        detail: format!("references missing node {src}"),
                    });
                };
                if *output >= producer.outputs.len() {
                    return Err(GraphError::InvalidValueRef {
                        node: node.name.clone(),
                        detail: format!(
                            "output index {output} out of range for node '{}'",
                            producer.name
                        ),
                    });
                }
            }
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        Ok(id)
    }

    /// Returns a node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Returns the number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Iterates `(id, node)` pairs in arena (topological) order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Looks up a node id by name.
    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    /// Returns, for each node, the ids of the nodes consuming its outputs.
    pub fn consumers(&self) -> Vec<Vec<NodeId>> {
        let mut users = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            let mut seen = HashSet::new();
            for input in &node.inputs {
                if let Some(src) = input.producer() {
                    if seen.insert(src) {
                        users[src.0].push(NodeId(i));
                    }
                }
            }
        }
        users
    }

    /// Groups nodes into BFS levels.
    ///
    /// Level 0 holds the sink nodes (no consumers); each remaining node
    /// sits one level above the highest level among its consumers. Walking
    /// the returned levels from the last down to level 0 therefore visits
    /// every producer before all of its consumers. Nodes within a level
    /// are ordered by id.
    pub fn bfs_levels(&self) -> Vec<Vec<NodeId>> {
        let users = self.consumers();
        let mut level = vec![0usize; self.nodes.len()];
        // Consumers always have larger ids, so a reverse id sweep sees
        // every consumer's level before its producer's.
        for i in (0..self.nodes.len()).rev() {
            level[i] = users[i]
                .iter()
                .map(|u| level[u.0] + 1)
                .max()
                .unwrap_or(0);
        }
        let depth = level.iter().copied().max().map_or(0, |m| m + 1);
        let mut levels = vec![Vec::new(); depth];
        for (i, &l) in level.iter().enumerate() {
            levels[l].push(NodeId(i));
        }
        levels
    }

    /// Structural well-formedness check.
    ///
    /// `add_node` already enforces reference validity; this re-checks the
    /// arena as a whole so materialized sub-functions can be verified
    /// after construction.
    pub fn verify(&self) -> Result<(), GraphError> {
        let mut names = HashSet::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if !names.insert(node.name.as_str()) {
                return Err(GraphError::DuplicateNodeName {
                    func: self.name.clone(),
                    node: node.name.clone(),
                });
            }
            if node.outputs.is_empty() {
                return Err(GraphError::NoOutputs(node.name.clone()));
            }
            for input in &node.inputs {
                if let ValueRef::NodeOutput { node: src, .. } = input {
                    if src.0 >= i {
                        return Err(GraphError::InvalidValueRef {
                            node: node.name.clone(),
                            detail: format!("forward reference to {src}"),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Renders the operator graph in DOT format.
    ///
    /// Placeholder and constant operands resolve through the owning module.
    pub fn dump_dot(&self, module: &Module) -> String {
        let mut out = String::new();
        out.push_str(&format!("digraph \"{}\" {{\n", self.name));
        for (i, node) in self.nodes.iter().enumerate() {
            out.push_str(&format!(
                "  n{i} [label=\"{}\\n{}\"];\n",
                node.name, node.kind
            ));
            for input in &node.inputs {
                match input {
                    ValueRef::NodeOutput { node: src, .. } => {
                        out.push_str(&format!("  n{} -> n{i};\n", src.0));
                    }
                    ValueRef::Placeholder(p) => {
                        if let Some(ph) = module.placeholder(*p) {
                            out.push_str(&format!(
                                "  \"ph_{}\" [shape=box]; \"ph_{}\" -> n{i};\n",
                                ph.name, ph.name
                            ));
                        }
                    }
                    ValueRef::Constant(_) => {}
                }
            }
        }
        out.push_str("}\n");
        out
    }

    /// Returns a one-line summary for logs.
    pub fn summary(&self) -> String {
        format!("Function '{}': {} nodes", self.name, self.nodes.len())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.name)?;
        for (id, node) in self.nodes() {
            writeln!(f, "  {id} = {} '{}'", node.kind, node.name)?;
        }
        Ok(())
    }
}
