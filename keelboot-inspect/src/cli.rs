// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "keelboot-inspect")]
#[command(about = "Image and record inspector for the keelboot trust core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Decode a 16-byte NV record given as hex
    Nv {
        /// 32 hex digits
        #[arg(value_name = "HEX")]
        hex: String,
    },

    /// Inspect the GBB region inside an image
    Gbb {
        /// Image file containing the GBB
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Byte offset of the GBB within the file
        #[arg(short, long, default_value = "0", value_parser = commands::parse_offset)]
        offset: u64,
    },

    /// Parse a slot's key block and preamble (structure only, no crypto)
    Slot {
        /// Slot image (key block + preamble + body)
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Run the full verification pipeline over slot images
    Verify {
        /// File holding the GBB region
        #[arg(long)]
        gbb: PathBuf,

        /// Slot A image
        #[arg(long)]
        slot_a: PathBuf,

        /// Slot B image (slot A is reused if omitted)
        #[arg(long)]
        slot_b: Option<PathBuf>,

        /// Firmware rollback floor to simulate
        #[arg(long, default_value = "0", value_parser = commands::parse_offset)]
        floor: u64,

        /// Verify as a developer-mode boot
        #[arg(long)]
        dev: bool,
    },
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Nv { hex } => commands::nv(&hex),
        Commands::Gbb { file, offset } => commands::gbb(&file, offset),
        Commands::Slot { file } => commands::slot(&file),
        Commands::Verify { gbb, slot_a, slot_b, floor, dev } => {
            commands::verify(&gbb, &slot_a, slot_b.as_deref(), floor as u32, dev)
        }
    }
}
