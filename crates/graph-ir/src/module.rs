// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A module: named functions plus shared placeholders and constants.
//!
//! Placeholders and constants are module-level so that the sub-functions
//! produced by partitioning can keep referencing them without copying.

use crate::{Constant, ConstantId, Function, GraphError, Placeholder, PlaceholderId, TypeDesc};
use std::collections::BTreeMap;

/// A collection of functions sharing storage declarations.
#[derive(Debug, Clone, Default)]
pub struct Module {
    functions: BTreeMap<String, Function>,
    placeholders: Vec<Placeholder>,
    constants: Vec<Constant>,
}

impl Module {
    /// Creates an empty module.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Functions ──────────────────────────────────────────────

    /// Inserts a function; the name must be unused.
    pub fn insert_function(&mut self, func: Function) -> Result<(), GraphError> {
        if self.functions.contains_key(func.name()) {
            return Err(GraphError::DuplicateFunction(func.name().to_string()));
        }
        self.functions.insert(func.name().to_string(), func);
        Ok(())
    }

    /// Removes a function by name.
    pub fn erase_function(&mut self, name: &str) -> Result<Function, GraphError> {
        self.functions
            .remove(name)
            .ok_or_else(|| GraphError::FunctionNotFound(name.to_string()))
    }

    /// Returns a function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    /// Returns a mutable function by name.
    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.get_mut(name)
    }

    /// Returns `true` if a function with this name exists.
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Iterates functions in name order.
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    /// Returns the function names in order.
    pub fn function_names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    /// Returns the number of functions.
    pub fn num_functions(&self) -> usize {
        self.functions.len()
    }

    // ── Storage ────────────────────────────────────────────────

    /// Registers a placeholder, reusing an existing one with the same name.
    pub fn add_placeholder(&mut self, name: impl Into<String>, ty: TypeDesc) -> PlaceholderId {
        let name = name.into();
        if let Some(i) = self.placeholders.iter().position(|p| p.name == name) {
            return PlaceholderId(i);
        }
        self.placeholders.push(Placeholder { name, ty });
        PlaceholderId(self.placeholders.len() - 1)
    }

    /// Registers a constant, reusing an existing one with the same name.
    pub fn add_constant(&mut self, name: impl Into<String>, ty: TypeDesc) -> ConstantId {
        let name = name.into();
        if let Some(i) = self.constants.iter().position(|c| c.name == name) {
            return ConstantId(i);
        }
        self.constants.push(Constant { name, ty });
        ConstantId(self.constants.len() - 1)
    }

    /// Returns a placeholder by id.
    pub fn placeholder(&self, id: PlaceholderId) -> Option<&Placeholder> {
        self.placeholders.get(id.0)
    }

    /// Returns a constant by id.
    pub fn constant(&self, id: ConstantId) -> Option<&Constant> {
        self.constants.get(id.0)
    }

    /// Iterates placeholders.
    pub fn placeholders(&self) -> impl Iterator<Item = (PlaceholderId, &Placeholder)> {
        self.placeholders
            .iter()
            .enumerate()
            .map(|(i, p)| (PlaceholderId(i), p))
    }

    /// Iterates constants.
    pub fn constants(&self) -> impl Iterator<Item = (ConstantId, &Constant)> {
        self.constants
            .iter()
            .enumerate()
            .map(|(i, c)| (ConstantId(i), c))
    }

    /// Total byte size of all constants in the module.
    pub fn constants_size(&self) -> u64 {
        self.constants.iter().map(Constant::size_bytes).sum()
    }

    /// Returns a one-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "Module: {} functions, {} placeholders, {} constants ({} bytes)",
            self.functions.len(),
            self.placeholders.len(),
            self.constants.len(),
            self.constants_size(),
        )
    }
}
