// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for DAG execution.

use device_registry::DeviceId;

/// Errors that can occur while executing a partitioned network.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Provisioning never bound this node to a physical device.
    #[error("sub-network '{node}' has no provisioned device")]
    NoDeviceAssigned { node: String },

    /// The chosen device id has no registered device manager.
    #[error("sub-network '{node}' chose {device}, which has no manager")]
    UnknownDevice { node: String, device: DeviceId },

    /// The worker pool is shutting down.
    #[error("executor worker pool is unavailable")]
    WorkerPoolUnavailable,

    /// A device manager reported a run failure.
    #[error(transparent)]
    Device(#[from] device_registry::DeviceError),
}
