// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Core of the keelboot verified-boot trust pipeline.
//!
//! At every power-on this crate decides which main-processor firmware slot
//! to execute, proves it against the root key in the GBB, and brings the
//! embedded controller's firmware into line with the verified image. The
//! caller owns all hardware: flash regions arrive as read-only slices,
//! platform operations (accelerated crypto, EC I/O, secure storage) arrive
//! as a [`platform::Platform`] capability set, and outcomes leave as
//! [`Signal`] values plus a [`Handoff`] record.
//!
//! This crate supports both `no_std` (firmware) and `std` (host)
//! environments:
//! - Default: `no_std` mode for firmware targets (requires `alloc`)
//! - `std` feature: enables host tooling support

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;
#[cfg(any(feature = "std", test))]
extern crate std;

pub mod boot;
pub mod bounds;
pub mod containers;
pub mod crypto;
pub mod ecsync;
pub mod gbb;
pub mod handoff;
pub mod nvdata;
pub mod pipeline;
pub mod platform;
pub mod recovery;
pub mod secdata;
pub mod selector;
pub mod state;
pub mod workbuf;

// Re-export the boot-flow surface callers drive.
pub use boot::{firmware_phase, handoff, init, Signal, SlotRegions};
pub use ecsync::{ec_sync_all, ec_sync_phase1, ec_sync_phase2, ec_will_update_slowly};
pub use handoff::Handoff;
pub use platform::Platform;
pub use recovery::{RecoveryMode, RecoveryReason};
pub use state::{BootInput, Context, FwSlot};
