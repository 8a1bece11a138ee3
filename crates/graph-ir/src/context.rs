// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-request binding of placeholders to tensor buffers.
//!
//! Buffers are reference-counted so a context can be cloned cheaply when a
//! request fans out across the sub-networks of a partitioned DAG.

use std::collections::BTreeMap;
use std::sync::Arc;

/// Maps placeholder names to their bound byte buffers.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderBindings {
    buffers: BTreeMap<String, Arc<Vec<u8>>>,
}

impl PlaceholderBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a buffer to a placeholder name, replacing any previous binding.
    pub fn insert(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.buffers.insert(name.into(), Arc::new(data));
    }

    /// Returns the buffer bound to `name`, if any.
    pub fn get(&self, name: &str) -> Option<&Arc<Vec<u8>>> {
        self.buffers.get(name)
    }

    /// Returns the number of bindings.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Iterates bound placeholder names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }

    /// Total bytes across all bound buffers.
    pub fn total_bytes(&self) -> u64 {
        self.buffers.values().map(|b| b.len() as u64).sum()
    }
}

/// The state carried through one inference request.
///
/// Cloning shares the underlying buffers, so handing a context to several
/// sub-network runs does not copy tensor data.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    bindings: PlaceholderBindings,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bindings(bindings: PlaceholderBindings) -> Self {
        Self { bindings }
    }

    pub fn bindings(&self) -> &PlaceholderBindings {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut PlaceholderBindings {
        &mut self.bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut b = PlaceholderBindings::new();
        b.insert("input", vec![1, 2, 3]);
        assert_eq!(b.get("input").unwrap().as_slice(), &[1, 2, 3]);
        assert!(b.get("missing").is_none());
        assert_eq!(b.total_bytes(), 3);
    }

    #[test]
    fn test_clone_shares_buffers() {
        let mut b = PlaceholderBindings::new();
        b.insert("x", vec![0u8; 128]);
        let ctx = ExecutionContext::with_bindings(b);
        let copy = ctx.clone();
        let a = ctx.bindings().get("x").unwrap();
        let b = copy.bindings().get("x").unwrap();
        assert!(Arc::ptr_eq(a, b));
    }
}
