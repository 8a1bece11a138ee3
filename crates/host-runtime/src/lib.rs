// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # host-runtime
//!
//! The entry point into the inference runtime. The [`HostManager`]
//! accepts networks, drives the partitioner and provisioner, and
//! schedules inference requests across the host's devices:
//!
//! - [`HostManager::add_network`] — partition, compile, and load a
//!   module; all-or-nothing with full rollback.
//! - [`HostManager::run_network`] — enqueue one inference request under
//!   admission control; results arrive through a callback.
//! - [`HostConfig`] — admission limits and the executor worker budget.
//! - [`Provisioner`] — compiles each sub-network and loads it onto the
//!   devices its logical assignment maps to.
//! - [`sim`] — in-process simulated backend and device manager used by
//!   tests and the CLI.
//!
//! # Concurrency
//!
//! `run_network` never blocks: requests park in a priority queue (lowest
//! priority value first, FIFO within a priority) and dispatch on the
//! executor's pool as active slots free up. The network table lock is
//! never held across partitioning, provisioning, execution, or a user
//! callback.

mod config;
mod error;
mod host;
mod provisioner;
mod queue;
pub mod sim;

pub use config::{HostConfig, HostFileConfig};
pub use dag_executor::RequestId;
pub use error::HostError;
pub use host::{DeviceManagerFactory, HostManager, ResultCallback};
pub use provisioner::{DefaultProvisioner, Provisioner};
