// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # hetero-rt
//!
//! Command-line interface for the heterogeneous inference host runtime.
//!
//! ## Usage
//! ```bash
//! # Partition a synthetic network across the configured devices and
//! # print the resulting DAG.
//! hetero-rt partition --devices 4 --device-memory 64M --layers 32
//!
//! # Drive the full host stack over simulated devices.
//! hetero-rt run --devices 2 --device-memory 512M --layers 16 --requests 20
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "hetero-rt",
    about = "Heterogeneous inference host runtime",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file with host limits and devices.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Partition a synthetic network and print the execution DAG.
    Partition {
        /// Number of simulated devices.
        #[arg(short, long, default_value_t = 4)]
        devices: usize,

        /// Memory per device (e.g., "64M", "1G").
        #[arg(short = 'm', long, default_value = "64M")]
        device_memory: String,

        /// Number of operator layers in the synthetic network.
        #[arg(short, long, default_value_t = 32)]
        layers: usize,

        /// Weight size per layer (e.g., "4M").
        #[arg(short, long, default_value = "4M")]
        weight_size: String,

        /// Write DOT dumps of the DAG and each partition.
        #[arg(long)]
        dump_dot: bool,
    },

    /// Run inference requests through the full host stack on simulated
    /// devices.
    Run {
        /// Number of simulated devices.
        #[arg(short, long, default_value_t = 2)]
        devices: usize,

        /// Memory per device (e.g., "512M").
        #[arg(short = 'm', long, default_value = "512M")]
        device_memory: String,

        /// Number of operator layers in the synthetic network.
        #[arg(short, long, default_value_t = 16)]
        layers: usize,

        /// Weight size per layer (e.g., "4M").
        #[arg(short, long, default_value = "4M")]
        weight_size: String,

        /// Number of inference requests to submit.
        #[arg(short, long, default_value_t = 16)]
        requests: usize,

        /// Replicate the network across idle devices.
        #[arg(long)]
        saturate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Partition {
            devices,
            device_memory,
            layers,
            weight_size,
            dump_dot,
        } => {
            commands::partition::execute(
                cli.config,
                devices,
                device_memory,
                layers,
                weight_size,
                dump_dot,
            )
            .await
        }
        Commands::Run {
            devices,
            device_memory,
            layers,
            weight_size,
            requests,
            saturate,
        } => {
            commands::run::execute(
                cli.config,
                devices,
                device_memory,
                layers,
                weight_size,
                requests,
                saturate,
            )
            .await
        }
    }
}
