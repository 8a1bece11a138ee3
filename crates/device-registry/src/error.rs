// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for devices and backends.

/// Errors surfaced by backends and device managers.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The device has insufficient free memory to load a network.
    #[error("device out of memory: need {needed} bytes, {available} available")]
    OutOfMemory { needed: u64, available: u64 },

    /// No network with this name is loaded on the device.
    #[error("network '{0}' is not loaded on this device")]
    NetworkNotFound(String),

    /// A network with this name is already loaded on the device.
    #[error("network '{0}' is already loaded on this device")]
    NetworkAlreadyLoaded(String),

    /// The device reported a failure while running a sub-network.
    #[error("device run failed: {0}")]
    RunFailed(String),

    /// Backend compilation failed.
    #[error("compilation failed for '{name}': {detail}")]
    CompileFailed { name: String, detail: String },

    /// No backend is registered under this name.
    #[error("no backend registered under name '{0}'")]
    UnknownBackend(String),

    /// A device or memory-size configuration value is malformed.
    #[error("invalid device configuration: {0}")]
    InvalidConfig(String),
}
