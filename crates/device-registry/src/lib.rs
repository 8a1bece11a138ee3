// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device-registry
//!
//! Static descriptions of the accelerators attached to a host, and the
//! interfaces through which the runtime talks to them:
//!
//! - [`DeviceInfo`] — per-device capacity, bandwidth, and capability record
//!   consumed by the partitioner.
//! - [`DeviceConfig`] — the configuration surface used to instantiate a
//!   device manager.
//! - [`Backend`] — code generator + capability predicate for one backend
//!   name; [`BackendRegistry`] resolves names to backends.
//! - [`BackendInfo`] — per-backend aggregate folded from all devices of
//!   that backend.
//! - [`DeviceManager`] — the async runtime wrapper for one physical
//!   device: load, evict, and run compiled sub-networks.
//! - [`MemSize`] — human-readable byte sizes (`"512M"`, `"1G"`) for
//!   configuration ergonomics.

mod backend;
mod device;
mod error;
mod manager;
mod mem;

pub use backend::{Backend, BackendInfo, BackendOptions, BackendRegistry, RuntimeBundle};
pub use device::{DeviceConfig, DeviceId, DeviceInfo, LogicalDeviceId};
pub use error::DeviceError;
pub use manager::{DeviceManager, DeviceManagerMap};
pub use mem::MemSize;
