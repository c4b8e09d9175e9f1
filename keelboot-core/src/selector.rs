// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware slot selection - pure logic without platform dependencies.
//!
//! The selector decides which A/B slot this boot should attempt, from the
//! NV trial state (tries-remaining, try-slot), each slot's last known
//! result, and the rollback floor. It operates on snapshots rather than
//! live records so every path is testable without hardware; the caller
//! applies the returned NV updates. Slot versions here are the *claimed*
//! versions from an unverified preamble parse: a forged claim can only
//! reorder candidates, because the pipeline re-checks the floor after the
//! signatures verify.

use crate::nvdata::{FwResult, NvData};
use crate::recovery::RecoveryReason;
use crate::state::FwSlot;

/// What the selector knows about one slot.
#[derive(Debug, Clone, Copy)]
pub struct SlotStatus {
    /// Claimed combined version, `None` when the preamble does not even
    /// parse. An unparseable slot stays a candidate; verification will
    /// reject it with a precise reason.
    pub version: Option<u32>,
    /// Last known boot result for this slot.
    pub last_result: FwResult,
}

/// Snapshot of everything the selection looks at.
#[derive(Debug, Clone, Copy)]
pub struct SelectorInputs {
    /// Recovery already requested or forced; no slot will be chosen.
    pub recovery_requested: bool,
    pub tries_remaining: u8,
    pub try_slot: FwSlot,
    pub slots: [SlotStatus; 2],
    /// Firmware rollback floor from secure storage.
    pub floor: u32,
    /// GBB test override: skip the floor filter.
    pub ignore_rollback: bool,
}

/// NV mutations the caller must apply for the chosen slot.
///
/// `fw_result` is `None` when the result field should stay as it is: a
/// boot that re-picks the known-good slot must leave a clean NV record
/// clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvUpdates {
    pub tries_remaining: u8,
    pub try_slot: FwSlot,
    pub fw_result: Option<FwResult>,
}

impl NvUpdates {
    pub fn apply_to(&self, nv: &mut NvData) {
        nv.set_tries_remaining(self.tries_remaining);
        nv.set_try_slot(self.try_slot);
        if let Some(r) = self.fw_result {
            nv.set_fw_result(r);
        }
    }
}

/// Outcome of slot selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Attempt this slot; apply the NV updates first.
    Slot { slot: FwSlot, nv: NvUpdates },
    /// No slot is bootable; enter recovery for this reason.
    Recovery(RecoveryReason),
}

fn below_floor(inp: &SelectorInputs, slot: FwSlot) -> bool {
    if inp.ignore_rollback {
        return false;
    }
    match inp.slots[slot.index()].version {
        Some(v) => v < inp.floor,
        None => false,
    }
}

/// Choose the slot for this boot.
pub fn select_slot(inp: &SelectorInputs) -> Selection {
    if inp.recovery_requested {
        return Selection::Recovery(RecoveryReason::Requested);
    }

    // An update in flight: burn one try on the slot under trial.
    if inp.tries_remaining > 0 && !below_floor(inp, inp.try_slot) {
        log::debug!(
            "trying slot {:?}, {} tries left",
            inp.try_slot,
            inp.tries_remaining - 1
        );
        return Selection::Slot {
            slot: inp.try_slot,
            nv: NvUpdates {
                tries_remaining: inp.tries_remaining - 1,
                try_slot: inp.try_slot,
                fw_result: Some(FwResult::Trying),
            },
        };
    }

    // Fall back to known-good history: prefer the slot that succeeded; if
    // both did, the higher claimed version; tie goes to A.
    let succeeded = |s: FwSlot| {
        inp.slots[s.index()].last_result == FwResult::Success && !below_floor(inp, s)
    };
    let candidate = match (succeeded(FwSlot::A), succeeded(FwSlot::B)) {
        (true, true) => {
            let va = inp.slots[0].version.unwrap_or(0);
            let vb = inp.slots[1].version.unwrap_or(0);
            Some(if vb > va { FwSlot::B } else { FwSlot::A })
        }
        (true, false) => Some(FwSlot::A),
        (false, true) => Some(FwSlot::B),
        (false, false) => None,
    };

    if let Some(slot) = candidate {
        return Selection::Slot {
            slot,
            nv: NvUpdates {
                tries_remaining: 0,
                try_slot: slot,
                fw_result: None,
            },
        };
    }

    // A known-good slot that fell below the floor still leaves the other
    // slot worth consulting; verification will give the real verdict.
    let succeeded_but_skipped = |s: FwSlot| {
        inp.slots[s.index()].last_result == FwResult::Success && below_floor(inp, s)
    };
    if succeeded_but_skipped(FwSlot::A) || succeeded_but_skipped(FwSlot::B) {
        for slot in [FwSlot::A, FwSlot::B] {
            if !below_floor(inp, slot) {
                return Selection::Slot {
                    slot,
                    nv: NvUpdates {
                        tries_remaining: 0,
                        try_slot: slot,
                        fw_result: None,
                    },
                };
            }
        }
        return Selection::Recovery(RecoveryReason::RollbackFloor);
    }

    // Nothing bootable. Distinguish "everything rolled back" from "nothing
    // ever worked and no tries remain".
    let all_skipped = below_floor(inp, FwSlot::A) && below_floor(inp, FwSlot::B);
    if all_skipped {
        return Selection::Recovery(RecoveryReason::RollbackFloor);
    }
    Selection::Recovery(RecoveryReason::TriesExhausted)
}
