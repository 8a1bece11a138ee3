// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host configuration loaded from TOML files or constructed
//! programmatically.
//!
//! # TOML Format
//! ```toml
//! [host]
//! max_active_requests = 10
//! max_queue_size = 100
//! executor_threads = 3
//!
//! [[devices]]
//! backend_name = "cpu"
//! device_memory = 1073741824
//! ```

use crate::HostError;
use device_registry::DeviceConfig;
use std::path::Path;

/// Options configuring the host's admission control and executor.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HostConfig {
    /// Number of outstanding or concurrent requests before queueing.
    #[serde(default = "default_max_active")]
    pub max_active_requests: usize,
    /// Number of queued requests before refusing further submissions.
    #[serde(default = "default_max_queue")]
    pub max_queue_size: usize,
    /// Worker budget of the executor.
    #[serde(default = "default_executor_threads")]
    pub executor_threads: usize,
}

fn default_max_active() -> usize {
    10
}

fn default_max_queue() -> usize {
    100
}

fn default_executor_threads() -> usize {
    3
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_active_requests: default_max_active(),
            max_queue_size: default_max_queue(),
            executor_threads: default_executor_threads(),
        }
    }
}

impl HostConfig {
    /// Checks the configured limits are usable.
    pub fn validate(&self) -> Result<(), HostError> {
        if self.max_active_requests == 0 {
            return Err(HostError::InvalidConfig(
                "max_active_requests must be at least 1".to_string(),
            ));
        }
        if self.executor_threads == 0 {
            return Err(HostError::InvalidConfig(
                "executor_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// The on-disk configuration: host limits plus the device table.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct HostFileConfig {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl HostFileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, HostError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HostError::InvalidConfig(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, HostError> {
        toml::from_str(toml_str)
            .map_err(|e| HostError::InvalidConfig(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, HostError> {
        toml::to_string_pretty(self)
            .map_err(|e| HostError::InvalidConfig(format!("TOML serialise error: {e}")))
    }
}
