// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! End-to-end verification of one firmware slot against the root key.
//!
//! A slot is laid out key block, then preamble, then body. The pipeline
//! walks the trust chain in order: root key authenticates the key block,
//! the key block's data key authenticates the preamble, the preamble's body
//! signature authenticates the firmware body. Mode flags and rollback
//! floors are enforced between the steps, each failure mapping to its own
//! recovery reason so two dead slots can still tell the operator what
//! happened. On success the kernel subkey is staged into the work buffer
//! for the kernel verification stage that runs after handoff.

use crate::containers::{KeyBlock, PackedKey, Preamble};
use crate::crypto::{self, SigError};
use crate::platform::HwCrypto;
use crate::recovery::RecoveryReason;
use crate::workbuf::{Alloc, WorkBuf};
use thiserror::Error;

/// Per-slot verification failure, each with a distinct recovery reason.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    #[error("key block invalid")]
    KeyBlock,
    #[error("key block flags forbid this boot mode")]
    KeyBlockFlags,
    #[error("data key below rollback floor")]
    KeyRollback,
    #[error("preamble invalid")]
    Preamble,
    #[error("firmware version below rollback floor")]
    FwRollback,
    #[error("firmware body signature invalid")]
    BodySignature,
    #[error("hardware crypto failed")]
    Hardware,
}

impl SlotError {
    pub fn recovery_reason(self) -> RecoveryReason {
        match self {
            Self::KeyBlock => RecoveryReason::InvalidKeyBlock,
            Self::KeyBlockFlags => RecoveryReason::KeyBlockFlags,
            Self::KeyRollback => RecoveryReason::KeyRollback,
            Self::Preamble => RecoveryReason::InvalidPreamble,
            Self::FwRollback => RecoveryReason::FwRollback,
            Self::BodySignature => RecoveryReason::BodySignature,
            Self::Hardware => RecoveryReason::HwCryptoFailed,
        }
    }
}

fn map_sig(e: SigError, step: SlotError) -> SlotError {
    if e == SigError::Hardware { SlotError::Hardware } else { step }
}

/// Boot-mode and policy inputs the pipeline enforces.
#[derive(Debug, Clone, Copy)]
pub struct VerifyParams {
    pub developer: bool,
    pub recovery: bool,
    /// Combined-version rollback floor from secure storage.
    pub floor: u32,
    /// GBB test override: skip both rollback checks.
    pub ignore_rollback: bool,
    /// Hardware crypto permitted for these keys.
    pub allow_hw: bool,
}

/// What a successfully verified slot yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedSlot {
    /// Combined version (key epoch | firmware epoch) from the preamble.
    pub version: u32,
    pub preamble_flags: u32,
    /// Kernel subkey bytes staged in the work buffer.
    pub kernel_subkey: Alloc,
}

/// Verify `slot` bottom to top. Leaves no work-buffer residue except the
/// published kernel subkey on success.
pub fn verify_slot(
    slot: &[u8],
    root_key: &PackedKey<'_>,
    params: &VerifyParams,
    wb: &mut WorkBuf<'_>,
    hw: &mut dyn HwCrypto,
) -> Result<VerifiedSlot, SlotError> {
    let mark = wb.mark();
    let result = verify_slot_inner(slot, root_key, params, wb, hw);
    if result.is_err() {
        // Failed slots leave nothing behind.
        let _ = wb.release_to(mark);
    }
    result
}

fn verify_slot_inner(
    slot: &[u8],
    root_key: &PackedKey<'_>,
    params: &VerifyParams,
    wb: &mut WorkBuf<'_>,
    hw: &mut dyn HwCrypto,
) -> Result<VerifiedSlot, SlotError> {
    // 1. Key block, authenticated by the root key.
    let kb = KeyBlock::verify_and_open(slot).map_err(|_| SlotError::KeyBlock)?;
    let kb_region = &slot[..kb.size() as usize];
    crypto::verify_data(kb_region, &kb.signature(), root_key, wb, hw, params.allow_hw)
        .map_err(|e| map_sig(e, SlotError::KeyBlock))?;

    // 2. Mode gate.
    if !kb.allows_mode(params.developer, params.recovery) {
        log::debug!(
            "key block flags {:#x} reject dev={} rec={}",
            kb.flags(),
            params.developer,
            params.recovery
        );
        return Err(SlotError::KeyBlockFlags);
    }

    // 3. Data-key epoch against the high half of the floor.
    let data_key = kb.data_key();
    if !params.ignore_rollback && (data_key.key_version() as u32) < params.floor >> 16 {
        return Err(SlotError::KeyRollback);
    }

    // 4. Preamble, authenticated by the data key.
    let pre_bytes = &slot[kb.size() as usize..];
    let pre = Preamble::verify_and_open(pre_bytes).map_err(|_| SlotError::Preamble)?;
    crypto::verify_data(pre_bytes, &pre.own_signature(), &data_key, wb, hw, params.allow_hw)
        .map_err(|e| map_sig(e, SlotError::Preamble))?;

    // 5. Combined version against the floor.
    if !params.ignore_rollback && pre.firmware_version() < params.floor {
        return Err(SlotError::FwRollback);
    }

    // 6. Firmware body.
    let body = &slot[kb.size() as usize + pre.size() as usize..];
    crypto::verify_data(body, &pre.body_signature(), &data_key, wb, hw, params.allow_hw)
        .map_err(|e| map_sig(e, SlotError::BodySignature))?;

    // 7. Publish the kernel subkey for the next stage.
    let subkey_bytes = pre.kernel_subkey().as_bytes();
    let staged = wb.alloc(subkey_bytes.len()).map_err(|_| SlotError::Preamble)?;
    wb.bytes_mut(&staged).copy_from_slice(subkey_bytes);

    Ok(VerifiedSlot {
        version: pre.firmware_version(),
        preamble_flags: pre.flags(),
        kernel_subkey: staged,
    })
}

/// Claimed combined version of a slot, from a bounds-checked but unverified
/// parse. Selection-order input only; never trusted for rollback.
pub fn claimed_version(slot: &[u8]) -> Option<u32> {
    let kb = KeyBlock::verify_and_open(slot).ok()?;
    let pre = Preamble::verify_and_open(&slot[kb.size() as usize..]).ok()?;
    Some(pre.firmware_version())
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use crate::containers::{PackedKey, KEYBLOCK_FLAG_DEV_ON, KEYBLOCK_FLAG_REC_OFF};
    use crate::crypto::tests::test_rsa_key;
    use crate::platform::NoHwCrypto;
    use alloc::vec;

    fn params() -> VerifyParams {
        VerifyParams {
            developer: false,
            recovery: false,
            floor: 0,
            ignore_rollback: false,
            allow_hw: false,
        }
    }

    #[test]
    fn test_good_slot_verifies() {
        let key = test_rsa_key();
        let body = vec![0xEE; 2048];
        let slot = build_slot(key, key, 2, 0x0002_0003, normal_kb_flags(), &body);
        let root_packed = packed_from(key, 1);
        let root = PackedKey::verify_and_open(&root_packed).unwrap();

        let mut mem = [0u8; 4096];
        let mut wb = WorkBuf::new(&mut mem);
        let v = verify_slot(&slot, &root, &params(), &mut wb, &mut NoHwCrypto).unwrap();
        assert_eq!(v.version, 0x0002_0003);
        assert_eq!(v.preamble_flags, 0);
        // Only the published subkey remains in the work buffer.
        assert_eq!(wb.bytes(&v.kernel_subkey).len(), v.kernel_subkey.len());
        assert!(wb.used() > 0);
    }

    #[test]
    fn test_tampered_keyblock_rejected() {
        let key = test_rsa_key();
        let body = vec![0xEE; 512];
        let mut slot = build_slot(key, key, 2, 1, normal_kb_flags(), &body);
        slot[17] ^= 0x40; // flags byte inside the signed region
        let root_packed = packed_from(key, 1);
        let root = PackedKey::verify_and_open(&root_packed).unwrap();

        let mut mem = [0u8; 4096];
        let mut wb = WorkBuf::new(&mut mem);
        assert_eq!(
            verify_slot(&slot, &root, &params(), &mut wb, &mut NoHwCrypto),
            Err(SlotError::KeyBlock)
        );
        assert_eq!(wb.used(), 0);
    }

    #[test]
    fn test_mode_flags_enforced() {
        let key = test_rsa_key();
        let body = vec![0xEE; 512];
        // Developer-only key block on a normal-mode boot.
        let slot = build_slot(key, key, 2, 1, KEYBLOCK_FLAG_DEV_ON | KEYBLOCK_FLAG_REC_OFF, &body);
        let root_packed = packed_from(key, 1);
        let root = PackedKey::verify_and_open(&root_packed).unwrap();

        let mut mem = [0u8; 4096];
        let mut wb = WorkBuf::new(&mut mem);
        assert_eq!(
            verify_slot(&slot, &root, &params(), &mut wb, &mut NoHwCrypto),
            Err(SlotError::KeyBlockFlags)
        );

        let mut dev = params();
        dev.developer = true;
        assert!(verify_slot(&slot, &root, &dev, &mut wb, &mut NoHwCrypto).is_ok());
    }

    #[test]
    fn test_key_rollback() {
        let key = test_rsa_key();
        let body = vec![0xEE; 512];
        let slot = build_slot(key, key, 1, 0x0001_0005, normal_kb_flags(), &body);
        let root_packed = packed_from(key, 1);
        let root = PackedKey::verify_and_open(&root_packed).unwrap();

        let mut p = params();
        p.floor = 0x0002_0000;
        let mut mem = [0u8; 4096];
        let mut wb = WorkBuf::new(&mut mem);
        assert_eq!(
            verify_slot(&slot, &root, &p, &mut wb, &mut NoHwCrypto),
            Err(SlotError::KeyRollback)
        );
    }

    #[test]
    fn test_fw_rollback() {
        let key = test_rsa_key();
        let body = vec![0xEE; 512];
        // Data key epoch passes, combined version does not.
        let slot = build_slot(key, key, 2, 0x0001_0005, normal_kb_flags(), &body);
        let root_packed = packed_from(key, 1);
        let root = PackedKey::verify_and_open(&root_packed).unwrap();

        let mut p = params();
        p.floor = 0x0002_0000;
        let mut mem = [0u8; 4096];
        let mut wb = WorkBuf::new(&mut mem);
        assert_eq!(
            verify_slot(&slot, &root, &p, &mut wb, &mut NoHwCrypto),
            Err(SlotError::FwRollback)
        );

        p.ignore_rollback = true;
        assert!(verify_slot(&slot, &root, &p, &mut wb, &mut NoHwCrypto).is_ok());
    }

    #[test]
    fn test_corrupt_body_rejected() {
        let key = test_rsa_key();
        let body = vec![0xEE; 2048];
        let mut slot = build_slot(key, key, 2, 1, normal_kb_flags(), &body);
        let n = slot.len();
        slot[n - 1] ^= 0x01; // flip the body's last byte
        let root_packed = packed_from(key, 1);
        let root = PackedKey::verify_and_open(&root_packed).unwrap();

        let mut mem = [0u8; 4096];
        let mut wb = WorkBuf::new(&mut mem);
        assert_eq!(
            verify_slot(&slot, &root, &params(), &mut wb, &mut NoHwCrypto),
            Err(SlotError::BodySignature)
        );
        assert_eq!(wb.used(), 0);
    }

    #[test]
    fn test_wrong_root_key_rejected() {
        let key = test_rsa_key();
        let body = vec![0xEE; 512];
        let slot = build_slot(key, key, 2, 1, normal_kb_flags(), &body);

        // A root key with a different modulus must not verify the block.
        let mut bogus = packed_from(key, 1);
        let len = bogus.len();
        bogus[len - 10] ^= 0xFF;
        let root = PackedKey::verify_and_open(&bogus).unwrap();

        let mut mem = [0u8; 4096];
        let mut wb = WorkBuf::new(&mut mem);
        assert_eq!(
            verify_slot(&slot, &root, &params(), &mut wb, &mut NoHwCrypto),
            Err(SlotError::KeyBlock)
        );
    }

    #[test]
    fn test_claimed_version() {
        let key = test_rsa_key();
        let body = vec![0xEE; 512];
        let slot = build_slot(key, key, 2, 0x0002_0007, normal_kb_flags(), &body);
        assert_eq!(claimed_version(&slot), Some(0x0002_0007));
        assert_eq!(claimed_version(&slot[..40]), None);
    }

    #[test]
    fn test_determinism() {
        let key = test_rsa_key();
        let body = vec![0xEE; 1024];
        let slot = build_slot(key, key, 2, 0x0002_0003, normal_kb_flags(), &body);
        let root_packed = packed_from(key, 1);
        let root = PackedKey::verify_and_open(&root_packed).unwrap();

        let mut out = alloc::vec::Vec::new();
        for _ in 0..2 {
            let mut mem = [0u8; 4096];
            let mut wb = WorkBuf::new(&mut mem);
            let v = verify_slot(&slot, &root, &params(), &mut wb, &mut NoHwCrypto).unwrap();
            out.push((v.version, v.preamble_flags));
        }
        assert_eq!(out[0], out[1]);
    }
}
