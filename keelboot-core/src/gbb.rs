// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Read-only access to the Google Binary Block.
//!
//! The GBB lives in read-only firmware and carries boot policy flags, the
//! root and recovery public keys, and hardware identification. Read-only
//! does not mean trusted: a reflashed image can hold anything, so every
//! offset/size pair is bounds-checked against the GBB region before use.
//! Unknown flag bits are preserved and ignored.

use crate::bounds;
use crate::containers::{ContainerError, PackedKey};
use thiserror::Error;

pub const GBB_MAGIC: [u8; 4] = *b"$GBB";
pub const GBB_HEADER_SIZE: usize = 128;
pub const GBB_VERSION_MAJOR: u16 = 1;

/// Boot into developer mode regardless of the switch position.
pub const GBB_FLAG_FORCE_DEV_MODE: u32 = 0x8;
/// Skip the secure-storage rollback floor during verification.
pub const GBB_FLAG_DISABLE_FW_ROLLBACK_CHECK: u32 = 0x20;
/// Skip EC software sync entirely.
pub const GBB_FLAG_DISABLE_EC_SYNC: u32 = 0x200;
/// Never enter recovery. Test builds only.
pub const GBB_FLAG_DISABLE_RECOVERY: u32 = 0x1000;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GbbError {
    #[error("GBB region too short")]
    TooShort,
    #[error("bad GBB magic")]
    BadMagic,
    #[error("unsupported GBB version {major}.{minor}")]
    BadVersion { major: u16, minor: u16 },
    #[error("GBB header size field invalid")]
    HeaderSize,
    #[error(transparent)]
    Bounds(#[from] bounds::BoundsError),
    #[error(transparent)]
    Key(#[from] ContainerError),
}

fn u32_at(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(b[off..off + 4].try_into().expect("validated"))
}

fn u16_at(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(b[off..off + 2].try_into().expect("validated"))
}

/// Borrowed view of a validated GBB region.
#[derive(Clone, Copy, Debug)]
pub struct Gbb<'a> {
    raw: &'a [u8],
}

impl<'a> Gbb<'a> {
    /// Validate the header at the start of `region` and bounds-check all
    /// four (offset, size) pairs.
    pub fn verify_and_open(region: &'a [u8]) -> Result<Self, GbbError> {
        if region.len() < GBB_HEADER_SIZE {
            return Err(GbbError::TooShort);
        }
        if region[..4] != GBB_MAGIC {
            return Err(GbbError::BadMagic);
        }
        let major = u16_at(region, 4);
        let minor = u16_at(region, 6);
        if major != GBB_VERSION_MAJOR {
            return Err(GbbError::BadVersion { major, minor });
        }
        let header_size = u32_at(region, 8) as usize;
        if header_size < GBB_HEADER_SIZE || header_size as u64 > region.len() as u64 {
            return Err(GbbError::HeaderSize);
        }
        for pair_off in [16usize, 24, 32, 40] {
            bounds::check_member(
                region.len() as u64,
                u32_at(region, pair_off),
                u32_at(region, pair_off + 4),
            )?;
        }
        Ok(Self { raw: region })
    }

    pub fn minor_version(&self) -> u16 {
        u16_at(self.raw, 6)
    }

    /// Policy flags, raw. Unknown bits stay set; callers test only the bits
    /// they know.
    pub fn flags(&self) -> u32 {
        u32_at(self.raw, 12)
    }

    pub fn hwid(&self) -> &'a [u8] {
        self.pair(16)
    }

    pub fn root_key(&self) -> Result<PackedKey<'a>, GbbError> {
        Ok(PackedKey::verify_and_open(self.pair(24))?)
    }

    pub fn recovery_key(&self) -> Result<PackedKey<'a>, GbbError> {
        Ok(PackedKey::verify_and_open(self.pair(40))?)
    }

    /// SHA-256 of the HWID string, present from GBB 1.2 on.
    pub fn hwid_digest(&self) -> Option<&'a [u8]> {
        if self.minor_version() >= 2 {
            Some(&self.raw[48..80])
        } else {
            None
        }
    }

    /// Compare a caller-computed HWID digest against the stored one.
    /// Absent digest (pre-1.2) counts as a mismatch.
    pub fn check_hwid_digest(&self, computed: &[u8]) -> bool {
        match self.hwid_digest() {
            Some(stored) => bounds::ct_eq(stored, computed),
            None => false,
        }
    }

    fn pair(&self, off: usize) -> &'a [u8] {
        let start = u32_at(self.raw, off) as usize;
        let size = u32_at(self.raw, off + 4) as usize;
        &self.raw[start..start + size]
    }
}

/// GBB assembly for tests and host tooling.
pub mod build {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// Assemble a v1.2 GBB region: header, then HWID, root key, recovery
    /// key back to back. The deprecated bitmap-FV pair stays empty.
    pub fn gbb(flags: u32, hwid: &[u8], root_key: &[u8], recovery_key: &[u8], hwid_digest: &[u8; 32]) -> Vec<u8> {
        let hwid_off = GBB_HEADER_SIZE;
        let root_off = hwid_off + hwid.len();
        let rec_off = root_off + root_key.len();
        let total = rec_off + recovery_key.len();

        let mut out = vec![0u8; total];
        out[0..4].copy_from_slice(&GBB_MAGIC);
        out[4..6].copy_from_slice(&GBB_VERSION_MAJOR.to_le_bytes());
        out[6..8].copy_from_slice(&2u16.to_le_bytes());
        out[8..12].copy_from_slice(&(GBB_HEADER_SIZE as u32).to_le_bytes());
        out[12..16].copy_from_slice(&flags.to_le_bytes());
        for (pair_off, (start, len)) in [
            (16usize, (hwid_off, hwid.len())),
            (24, (root_off, root_key.len())),
            (32, (0, 0)),
            (40, (rec_off, recovery_key.len())),
        ] {
            out[pair_off..pair_off + 4].copy_from_slice(&(start as u32).to_le_bytes());
            out[pair_off + 4..pair_off + 8].copy_from_slice(&(len as u32).to_le_bytes());
        }
        out[48..80].copy_from_slice(hwid_digest);
        out[hwid_off..hwid_off + hwid.len()].copy_from_slice(hwid);
        out[root_off..root_off + root_key.len()].copy_from_slice(root_key);
        out[rec_off..rec_off + recovery_key.len()].copy_from_slice(recovery_key);
        out
    }
}
