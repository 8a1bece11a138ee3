// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the host manager.

/// Errors surfaced by host-manager operations and request callbacks.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// A network with this name already exists or is being added.
    #[error("a network named '{0}' already exists on this host")]
    NetworkNameCollision(String),

    /// No network with this name is registered.
    #[error("network '{0}' not found on this host")]
    NetworkNotFound(String),

    /// The inference queue is at capacity.
    #[error("inference queue is full")]
    QueueFull,

    /// The network still has in-flight requests.
    #[error("network '{0}' has in-flight requests")]
    NetworkInUse(String),

    /// Compiling or loading a sub-network onto a device failed.
    #[error("provisioning failed: {0}")]
    ProvisioningFailed(String),

    /// The host configuration is malformed.
    #[error("invalid host configuration: {0}")]
    InvalidConfig(String),

    /// An internal invariant broke (a dropped completion channel).
    #[error("internal host error: {0}")]
    Internal(String),

    /// The partitioner rejected the module.
    #[error(transparent)]
    Partition(#[from] partitioner::PartitionError),

    /// A device operation failed.
    #[error(transparent)]
    Device(#[from] device_registry::DeviceError),

    /// The executor reported a run failure.
    #[error(transparent)]
    Executor(#[from] dag_executor::ExecutorError),
}
