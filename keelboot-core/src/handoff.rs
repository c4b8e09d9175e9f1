// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! The record handed to the OS when the trust pipeline is done.
//!
//! Everything the next stage needs to know about this boot: which slot
//! runs, at what version, whether recovery was entered and why, and the
//! status/flag bits for diagnostics. Encoded with postcard into a
//! caller-supplied buffer; the OS side decodes it with the same schema.

use serde::{Deserialize, Serialize};

use crate::recovery::{RecoveryMode, RecoveryReason};
use crate::state::{FwSlot, SharedState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handoff {
    /// Slot the device will run; `None` when recovery preempted selection.
    pub slot: Option<FwSlot>,
    /// Combined version of the verified firmware (0 in recovery).
    pub fw_version: u32,
    pub recovery_reason: RecoveryReason,
    pub recovery_mode: Option<RecoveryMode>,
    pub status: u32,
    pub flags: u32,
    pub preamble_flags: u32,
    pub gbb_offset: u32,
}

impl Handoff {
    pub fn from_state(sd: &SharedState) -> Self {
        Self {
            slot: sd.this_slot,
            fw_version: sd.fw_version,
            recovery_reason: sd.recovery_reason,
            recovery_mode: sd.recovery_mode,
            status: sd.status,
            flags: sd.flags,
            preamble_flags: sd.preamble_flags,
            gbb_offset: sd.gbb_offset,
        }
    }

    /// Serialize into `buf`, returning the used prefix.
    pub fn encode<'a>(&self, buf: &'a mut [u8]) -> Result<&'a [u8], postcard::Error> {
        postcard::to_slice(self, buf).map(|s| &*s)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
