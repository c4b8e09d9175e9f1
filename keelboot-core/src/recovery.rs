// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Recovery reason codes and the decision that sets them.
//!
//! A recovery reason is a small integer surfaced to the user and to
//! diagnostics; 0 means no recovery. Reasons are grouped by origin:
//! 0x02 user request, 0x20+ per-slot verification, 0x30+ secure storage,
//! 0x40+ EC sync.

use serde::{Deserialize, Serialize};

use crate::gbb::GBB_FLAG_DISABLE_RECOVERY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecoveryReason {
    None = 0x00,
    /// The user asked for recovery (NV request plus physical presence).
    Requested = 0x02,
    /// Key block structure or signature did not verify.
    InvalidKeyBlock = 0x20,
    /// Key block flags forbid the current boot mode.
    KeyBlockFlags = 0x21,
    /// Data-key epoch below the secure-storage floor.
    KeyRollback = 0x22,
    /// Preamble structure or signature did not verify.
    InvalidPreamble = 0x23,
    /// Preamble firmware version below the secure-storage floor.
    FwRollback = 0x24,
    /// Firmware body signature did not verify.
    BodySignature = 0x25,
    /// Hardware crypto capability failed hard during verification.
    HwCryptoFailed = 0x26,
    /// No slot has ever booted successfully and no tries remain.
    TriesExhausted = 0x27,
    /// Every candidate slot sits below the rollback floor.
    RollbackFloor = 0x28,
    /// Secure storage unreadable or corrupt.
    SecdataError = 0x30,
    /// GBB region malformed; the RO image itself is suspect.
    GbbInvalid = 0x31,
    /// Cannot tell which image the EC is running.
    EcUnknownImage = 0x40,
    EcHashFailed = 0x41,
    EcUpdateFailed = 0x42,
    EcJumpFailed = 0x43,
    EcProtectFailed = 0x44,
}

impl RecoveryReason {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::None),
            0x02 => Some(Self::Requested),
            0x20 => Some(Self::InvalidKeyBlock),
            0x21 => Some(Self::KeyBlockFlags),
            0x22 => Some(Self::KeyRollback),
            0x23 => Some(Self::InvalidPreamble),
            0x24 => Some(Self::FwRollback),
            0x25 => Some(Self::BodySignature),
            0x26 => Some(Self::HwCryptoFailed),
            0x27 => Some(Self::TriesExhausted),
            0x28 => Some(Self::RollbackFloor),
            0x30 => Some(Self::SecdataError),
            0x31 => Some(Self::GbbInvalid),
            0x40 => Some(Self::EcUnknownImage),
            0x41 => Some(Self::EcHashFailed),
            0x42 => Some(Self::EcUpdateFailed),
            0x43 => Some(Self::EcJumpFailed),
            0x44 => Some(Self::EcProtectFailed),
            _ => None,
        }
    }

    /// Ordering used when several slots failed for different reasons:
    /// hardware error > signature > rollback > flags.
    pub fn severity(self) -> u8 {
        match self {
            Self::HwCryptoFailed | Self::SecdataError | Self::GbbInvalid => 4,
            Self::InvalidKeyBlock | Self::InvalidPreamble | Self::BodySignature => 3,
            Self::KeyRollback | Self::FwRollback | Self::RollbackFloor => 2,
            Self::KeyBlockFlags => 1,
            _ => 0,
        }
    }
}

/// Whether the user chose recovery or the device fell into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryMode {
    Manual,
    Broken,
}

/// Everything the recovery decision looks at.
pub struct RecoveryInputs {
    /// NV recovery-request bit.
    pub nv_request: bool,
    /// Physical recovery signal (keyboard combo, jumper) this boot.
    pub physical_request: bool,
    /// Why each slot was rejected, if it was.
    pub slot_reasons: [Option<RecoveryReason>; 2],
    /// GBB policy flags.
    pub gbb_flags: u32,
}

/// Translate verification outcomes and user intent into a recovery reason.
///
/// Returns `None` when this boot should not enter recovery. A GBB policy
/// override can disable recovery entirely; that flag only exists on test
/// builds.
pub fn decide(inp: &RecoveryInputs) -> Option<(RecoveryReason, RecoveryMode)> {
    if inp.gbb_flags & GBB_FLAG_DISABLE_RECOVERY != 0 {
        return None;
    }

    if inp.nv_request {
        let mode = if inp.physical_request { RecoveryMode::Manual } else { RecoveryMode::Broken };
        return Some((RecoveryReason::Requested, mode));
    }

    if let [Some(a), Some(b)] = inp.slot_reasons {
        // Both candidates failed verification. Report the worse one; on a
        // severity tie, slot A's reason wins.
        let reason = if b.severity() > a.severity() { b } else { a };
        return Some((reason, RecoveryMode::Broken));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_request_is_manual_with_presence() {
        let inp = RecoveryInputs {
            nv_request: true,
            physical_request: true,
            slot_reasons: [None, None],
            gbb_flags: 0,
        };
        assert_eq!(
            decide(&inp),
            Some((RecoveryReason::Requested, RecoveryMode::Manual))
        );
    }

    #[test]
    fn test_nv_request_without_presence_is_broken() {
        let inp = RecoveryInputs {
            nv_request: true,
            physical_request: false,
            slot_reasons: [None, None],
            gbb_flags: 0,
        };
        assert_eq!(
            decide(&inp),
            Some((RecoveryReason::Requested, RecoveryMode::Broken))
        );
    }

    #[test]
    fn test_both_slots_failed_picks_most_severe() {
        let inp = RecoveryInputs {
            nv_request: false,
            physical_request: false,
            slot_reasons: [
                Some(RecoveryReason::KeyBlockFlags),
                Some(RecoveryReason::BodySignature),
            ],
            gbb_flags: 0,
        };
        assert_eq!(
            decide(&inp),
            Some((RecoveryReason::BodySignature, RecoveryMode::Broken))
        );
    }

    #[test]
    fn test_severity_tie_prefers_slot_a() {
        let inp = RecoveryInputs {
            nv_request: false,
            physical_request: false,
            slot_reasons: [
                Some(RecoveryReason::KeyRollback),
                Some(RecoveryReason::FwRollback),
            ],
            gbb_flags: 0,
        };
        assert_eq!(
            decide(&inp),
            Some((RecoveryReason::KeyRollback, RecoveryMode::Broken))
        );
    }

    #[test]
    fn test_one_good_slot_means_no_recovery() {
        let inp = RecoveryInputs {
            nv_request: false,
            physical_request: false,
            slot_reasons: [Some(RecoveryReason::BodySignature), None],
            gbb_flags: 0,
        };
        assert_eq!(decide(&inp), None);
    }

    #[test]
    fn test_gbb_override_disables_recovery() {
        let inp = RecoveryInputs {
            nv_request: true,
            physical_request: true,
            slot_reasons: [
                Some(RecoveryReason::BodySignature),
                Some(RecoveryReason::BodySignature),
            ],
            gbb_flags: GBB_FLAG_DISABLE_RECOVERY,
        };
        assert_eq!(decide(&inp), None);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(RecoveryReason::HwCryptoFailed.severity() > RecoveryReason::BodySignature.severity());
        assert!(RecoveryReason::BodySignature.severity() > RecoveryReason::FwRollback.severity());
        assert!(RecoveryReason::FwRollback.severity() > RecoveryReason::KeyBlockFlags.severity());
    }
}
