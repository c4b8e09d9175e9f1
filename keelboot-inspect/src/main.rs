// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Image and record inspector for the keelboot trust core.
//!
//! Usage:
//!   keelboot-inspect nv 401000000008000000000000000000xx
//!   keelboot-inspect gbb image.bin --offset 0x4000
//!   keelboot-inspect slot slot_a.bin
//!   keelboot-inspect verify --gbb gbb.bin --slot-a a.bin --slot-b b.bin

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    env_logger::init();
    let args = cli::Cli::parse();
    cli::run(args)
}
