// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Rollback-counter storage behind the platform's integrity protection.
//!
//! A 10-byte record holds the highest firmware and kernel versions ever
//! successfully booted, a lock bit, and a last-boot-good bit, with a CRC-8
//! at the tail. The platform's cryptographic storage keeps attackers from
//! writing it; this facade keeps the core honest: version writes may only
//! go up, and nothing is writable after the lock bit is set. The lock
//! clears on a fresh boot: the platform drops it at reset, so a loaded
//! record always starts unlocked.

use crc::{Crc, CRC_8_SMBUS};
use thiserror::Error;

use crate::platform::{SecureStore, StoreError};

pub const RECORD_SIZE: usize = 10;

const FLAGS_OFFSET: usize = 0;
const FW_VERSIONS_OFFSET: usize = 1;
const KERNEL_VERSIONS_OFFSET: usize = 5;
const CRC_OFFSET: usize = 9;

pub const SECDATA_FLAG_LOCK: u8 = 0x1;
pub const SECDATA_FLAG_LAST_BOOT_GOOD: u8 = 0x2;

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SecdataError {
    /// Record failed its CRC. Fatal for the boot.
    #[error("secure storage record corrupt")]
    Corrupt,
    /// Write attempted after the lock bit was set.
    #[error("secure storage locked")]
    Locked,
    /// Write would decrease a version floor.
    #[error("version rollback rejected")]
    Rollback,
    /// The facade was never successfully initialized.
    #[error("secure storage unavailable")]
    Unavailable,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// In-memory copy of the secure-storage record with write policy applied.
#[derive(Debug)]
pub struct Secdata {
    raw: [u8; RECORD_SIZE],
    dirty: bool,
    valid: bool,
}

impl Secdata {
    /// Read and CRC-check the record. Corruption is fatal; the caller
    /// translates it into a recovery reason.
    pub fn init(store: &mut dyn SecureStore) -> Result<Self, SecdataError> {
        let mut raw = [0u8; RECORD_SIZE];
        store.read(&mut raw)?;
        if CRC8.checksum(&raw[..CRC_OFFSET]) != raw[CRC_OFFSET] {
            return Err(SecdataError::Corrupt);
        }
        // Fresh boot: the platform has dropped the lock at reset.
        raw[FLAGS_OFFSET] &= !SECDATA_FLAG_LOCK;
        Ok(Self { raw, dirty: false, valid: true })
    }

    /// Placeholder used after a fatal init failure so the boot can still
    /// carry a context into recovery. Every access reports unavailable.
    pub fn unavailable() -> Self {
        Self { raw: [0u8; RECORD_SIZE], dirty: false, valid: false }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn flags(&self) -> u8 {
        self.raw[FLAGS_OFFSET]
    }

    fn locked(&self) -> bool {
        self.raw[FLAGS_OFFSET] & SECDATA_FLAG_LOCK != 0
    }

    /// Refuse further writes until the next boot.
    pub fn set_lock(&mut self) {
        self.raw[FLAGS_OFFSET] |= SECDATA_FLAG_LOCK;
    }

    pub fn fw_versions(&self) -> u32 {
        u32::from_le_bytes(self.raw[FW_VERSIONS_OFFSET..FW_VERSIONS_OFFSET + 4].try_into().expect("validated"))
    }

    /// Raise the firmware version floor. Decreases and post-lock writes are
    /// rejected; writing the current value is a no-op.
    pub fn set_fw_versions(&mut self, v: u32) -> Result<(), SecdataError> {
        self.set_version_at(FW_VERSIONS_OFFSET, v)
    }

    pub fn kernel_versions(&self) -> u32 {
        u32::from_le_bytes(
            self.raw[KERNEL_VERSIONS_OFFSET..KERNEL_VERSIONS_OFFSET + 4].try_into().expect("validated"),
        )
    }

    pub fn set_kernel_versions(&mut self, v: u32) -> Result<(), SecdataError> {
        self.set_version_at(KERNEL_VERSIONS_OFFSET, v)
    }

    pub fn last_boot_good(&self) -> bool {
        self.raw[FLAGS_OFFSET] & SECDATA_FLAG_LAST_BOOT_GOOD != 0
    }

    pub fn set_last_boot_good(&mut self, good: bool) -> Result<(), SecdataError> {
        if !self.valid {
            return Err(SecdataError::Unavailable);
        }
        if self.locked() {
            return Err(SecdataError::Locked);
        }
        let new = if good {
            self.raw[FLAGS_OFFSET] | SECDATA_FLAG_LAST_BOOT_GOOD
        } else {
            self.raw[FLAGS_OFFSET] & !SECDATA_FLAG_LAST_BOOT_GOOD
        };
        if new != self.raw[FLAGS_OFFSET] {
            self.raw[FLAGS_OFFSET] = new;
            self.dirty = true;
        }
        Ok(())
    }

    fn set_version_at(&mut self, off: usize, v: u32) -> Result<(), SecdataError> {
        if !self.valid {
            return Err(SecdataError::Unavailable);
        }
        if self.locked() {
            return Err(SecdataError::Locked);
        }
        let current = u32::from_le_bytes(self.raw[off..off + 4].try_into().expect("validated"));
        if v < current {
            return Err(SecdataError::Rollback);
        }
        if v != current {
            self.raw[off..off + 4].copy_from_slice(&v.to_le_bytes());
            self.dirty = true;
        }
        Ok(())
    }

    /// Write the record back through the platform if anything changed.
    /// Returns whether a write happened. The lock bit is not persisted; it
    /// exists only until the next reset anyway.
    pub fn commit_if_dirty(&mut self, store: &mut dyn SecureStore) -> Result<bool, SecdataError> {
        if !self.dirty {
            return Ok(false);
        }
        let mut out = self.raw;
        out[FLAGS_OFFSET] &= !SECDATA_FLAG_LOCK;
        out[CRC_OFFSET] = CRC8.checksum(&out[..CRC_OFFSET]);
        store.write(&out)?;
        self.dirty = false;
        Ok(true)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
