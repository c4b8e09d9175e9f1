// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Per-boot shared state and the context value that carries it.
//!
//! One [`Context`] is built at boot start and threaded through every core
//! operation; there is no ambient state. [`SharedState`] is the working
//! record of the boot (status bits for what has been done, flag bits for
//! what has been decided, the chosen slot and version) and feeds the
//! handoff record at the end.

use serde::{Deserialize, Serialize};

use crate::nvdata::{FwResult, NvData, NV_SIZE};
use crate::recovery::{RecoveryMode, RecoveryReason};
use crate::secdata::Secdata;
use crate::workbuf::{Alloc, WorkBuf};

pub const SHARED_MAGIC: u32 = 0x4B45_454C; // "KEEL"
pub const SHARED_VERSION: u32 = 1;

/// Main-processor firmware slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FwSlot {
    A = 0,
    B = 1,
}

impl FwSlot {
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    pub fn from_bit(bit: bool) -> Self {
        if bit { Self::B } else { Self::A }
    }

    pub fn bit(self) -> bool {
        self == Self::B
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

// Status bits: what this boot has done so far.
pub const STATUS_NV_INIT: u32 = 1 << 0;
pub const STATUS_NV_REINIT: u32 = 1 << 1;
pub const STATUS_SECDATA_INIT: u32 = 1 << 2;
pub const STATUS_GBB_INIT: u32 = 1 << 3;
pub const STATUS_CHOSE_SLOT: u32 = 1 << 4;
pub const STATUS_EC_SYNC_COMPLETE: u32 = 1 << 5;

// Flag bits: what this boot has decided.
pub const FLAG_DEVELOPER_MODE: u32 = 1 << 0;
pub const FLAG_RECOVERY_MODE: u32 = 1 << 1;
pub const FLAG_ALLOW_HW_CRYPTO: u32 = 1 << 2;
pub const FLAG_DISPLAY_REQUESTED: u32 = 1 << 3;
pub const FLAG_EC_RW_NEEDS_UPDATE: u32 = 1 << 4;
pub const FLAG_EC_RO_NEEDS_UPDATE: u32 = 1 << 5;
pub const FLAG_EC_SLOW_UPDATE: u32 = 1 << 6;
/// EC jumps are locked out for the rest of this boot.
pub const FLAG_EC_JUMP_DISABLED: u32 = 1 << 7;

/// The working record of one boot.
pub struct SharedState {
    pub magic: u32,
    pub version: u32,
    /// Why recovery was entered; [`RecoveryReason::None`] otherwise.
    pub recovery_reason: RecoveryReason,
    pub recovery_mode: Option<RecoveryMode>,
    /// Slot the previous boot ran, from NV.
    pub last_slot: FwSlot,
    /// Slot chosen this boot, once the selector has run.
    pub this_slot: Option<FwSlot>,
    /// Result the previous boot recorded.
    pub last_result: FwResult,
    /// Combined version of the verified firmware, once known.
    pub fw_version: u32,
    /// Firmware rollback floor loaded from secure storage.
    pub fw_version_secdata: u32,
    /// Kernel rollback floor loaded from secure storage.
    pub kernel_version_secdata: u32,
    pub status: u32,
    pub flags: u32,
    /// Where the GBB sits in the flash image, for the handoff record.
    pub gbb_offset: u32,
    /// GBB policy flags, captured while the GBB borrow was alive.
    pub gbb_flags: u32,
    /// Kernel subkey published by the pipeline, staged in the work buffer.
    pub kernel_subkey: Option<Alloc>,
    /// Preamble flags of the verified slot.
    pub preamble_flags: u32,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            magic: SHARED_MAGIC,
            version: SHARED_VERSION,
            recovery_reason: RecoveryReason::None,
            recovery_mode: None,
            last_slot: FwSlot::A,
            this_slot: None,
            last_result: FwResult::Unknown,
            fw_version: 0,
            fw_version_secdata: 0,
            kernel_version_secdata: 0,
            status: 0,
            flags: 0,
            gbb_offset: 0,
            gbb_flags: 0,
            kernel_subkey: None,
            preamble_flags: 0,
        }
    }

    pub fn set_status(&mut self, bit: u32) {
        self.status |= bit;
    }

    pub fn has_status(&self, bit: u32) -> bool {
        self.status & bit != 0
    }

    pub fn set_flag(&mut self, bit: u32) {
        self.flags |= bit;
    }

    pub fn clear_flag(&mut self, bit: u32) {
        self.flags &= !bit;
    }

    pub fn has_flag(&self, bit: u32) -> bool {
        self.flags & bit != 0
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Boot-time inputs sampled by the caller before the core runs: straps,
/// switches, and the raw NV bytes read from the platform.
#[derive(Clone, Copy)]
pub struct BootInput {
    /// Physical recovery signal (keyboard combo, jumper) seen this boot.
    pub physical_recovery: bool,
    /// Developer switch position.
    pub developer_switch: bool,
    /// Hardware crypto acceleration permitted for this boot's keys.
    pub allow_hw_crypto: bool,
    /// Offset of the GBB inside the flash image.
    pub gbb_offset: u32,
    /// NV record as read from the platform.
    pub nv_bytes: [u8; NV_SIZE],
}

/// Everything a boot carries, threaded through every core operation.
pub struct Context<'a> {
    pub shared: SharedState,
    pub nv: NvData,
    pub secdata: Secdata,
    pub workbuf: WorkBuf<'a>,
    pub input: BootInput,
}
