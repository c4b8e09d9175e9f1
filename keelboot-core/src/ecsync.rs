// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! EC software sync: bring the embedded controller's firmware into line
//! with the hashes carried in the verified main image.
//!
//! The flow is an explicit state machine,
//! `INIT -> HASH_CHECK_RW -> (UPDATE_RW) -> JUMP_RW -> (HASH_CHECK_RO ->
//! UPDATE_RO) -> PROTECT -> DONE`, driven one [`step`] at a time so tests
//! can exercise every transition. It is split into two phases at the
//! update boundary: phase 1 decides whether a reflash is coming (and
//! whether it will be slow, so the caller can put up a wait indicator),
//! phase 2 performs it. Terminal outcomes are success or one of the reboot
//! signals: an EC that must reset to RO, or a device that must cold-reset
//! to switch RW slots.
//!
//! Recovery requests raised here go through the NV record (request bit plus
//! the reason as subcode), because the EC cannot be trusted again until
//! after a reboot anyway.

use crate::platform::{EcController, EcError, EcHash, EcSlot};
use crate::recovery::RecoveryReason;
use crate::state::{
    Context, FLAG_EC_JUMP_DISABLED, FLAG_EC_RO_NEEDS_UPDATE, FLAG_EC_RW_NEEDS_UPDATE,
    FLAG_EC_SLOW_UPDATE, STATUS_EC_SYNC_COMPLETE,
};
use crate::gbb::GBB_FLAG_DISABLE_EC_SYNC;
use crate::Signal;

/// States of the sync machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Init,
    HashCheckRw,
    UpdateRw,
    JumpRw,
    HashCheckRo,
    UpdateRo,
    Protect,
    Done,
}

/// One transition's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Next(SyncState),
    Terminal(Signal),
}

fn request_recovery(ctx: &mut Context<'_>, reason: RecoveryReason) {
    log::warn!("EC sync requesting recovery: {:?}", reason);
    ctx.nv.set_recovery_request(true);
    ctx.nv.set_recovery_subcode(reason.code());
    ctx.shared.recovery_reason = reason;
}

/// Which RW slot hash checks and updates target on this device.
fn rw_target(ec: &dyn EcController) -> EcSlot {
    if ec.supports_late_switch() { EcSlot::RwUpdate } else { EcSlot::RwActive }
}

fn fetch_hashes(
    ec: &mut dyn EcController,
    slot: EcSlot,
) -> Result<(EcHash, EcHash), EcError> {
    let live = ec.live_hash(slot)?;
    let expected = ec.expected_hash(slot)?;
    if live.len() != expected.len() {
        return Err(EcError::HashSizeMismatch);
    }
    Ok((live, expected))
}

/// Run one transition of the machine.
pub fn step(state: SyncState, ctx: &mut Context<'_>, ec: &mut dyn EcController) -> StepOutcome {
    match state {
        SyncState::Init => {
            if !ec.sync_supported() || ctx.shared.gbb_flags & GBB_FLAG_DISABLE_EC_SYNC != 0 {
                log::debug!("EC sync disabled, skipping");
                return StepOutcome::Next(SyncState::Done);
            }
            match ec.running_rw() {
                Ok(_) => StepOutcome::Next(SyncState::HashCheckRw),
                Err(_) => {
                    request_recovery(ctx, RecoveryReason::EcUnknownImage);
                    StepOutcome::Terminal(Signal::RebootToRo)
                }
            }
        }

        SyncState::HashCheckRw => {
            let slot = rw_target(ec);
            match fetch_hashes(ec, slot) {
                Ok((live, expected)) => {
                    if live != expected {
                        log::info!("EC RW image out of date");
                        ctx.shared.set_flag(FLAG_EC_RW_NEEDS_UPDATE);
                        if ec.updates_slowly() {
                            ctx.shared.set_flag(FLAG_EC_SLOW_UPDATE);
                        }
                        StepOutcome::Next(SyncState::UpdateRw)
                    } else {
                        StepOutcome::Next(SyncState::JumpRw)
                    }
                }
                Err(_) => {
                    request_recovery(ctx, RecoveryReason::EcHashFailed);
                    StepOutcome::Terminal(Signal::RebootToRo)
                }
            }
        }

        SyncState::UpdateRw => {
            let slot = rw_target(ec);
            if let Err(e) = ec.update_image(slot) {
                if e == EcError::RebootToRoRequired {
                    return StepOutcome::Terminal(Signal::RebootToRo);
                }
                request_recovery(ctx, RecoveryReason::EcUpdateFailed);
                return StepOutcome::Terminal(Signal::RebootToRo);
            }
            // Re-hash: the write must actually have taken.
            match fetch_hashes(ec, slot) {
                Ok((live, expected)) if live == expected => {
                    ctx.shared.clear_flag(FLAG_EC_RW_NEEDS_UPDATE);
                    if ec.supports_late_switch() {
                        // The new image only runs after the EC swaps slots.
                        StepOutcome::Terminal(Signal::RebootSwitchRw)
                    } else {
                        StepOutcome::Next(SyncState::JumpRw)
                    }
                }
                _ => {
                    request_recovery(ctx, RecoveryReason::EcUpdateFailed);
                    StepOutcome::Terminal(Signal::RebootToRo)
                }
            }
        }

        SyncState::JumpRw => {
            match ec.running_rw() {
                Ok(true) => {}
                Ok(false) => {
                    if let Err(e) = ec.jump_to_rw() {
                        if e == EcError::RebootToRoRequired {
                            // A prior boot disabled jumps; the EC needs a
                            // reset, nothing is broken.
                            return StepOutcome::Terminal(Signal::RebootToRo);
                        }
                        request_recovery(ctx, RecoveryReason::EcJumpFailed);
                        return StepOutcome::Terminal(Signal::RebootToRo);
                    }
                }
                Err(_) => {
                    request_recovery(ctx, RecoveryReason::EcUnknownImage);
                    return StepOutcome::Terminal(Signal::RebootToRo);
                }
            }
            if ctx.nv.try_ro_sync() {
                StepOutcome::Next(SyncState::HashCheckRo)
            } else {
                StepOutcome::Next(SyncState::Protect)
            }
        }

        SyncState::HashCheckRo => match fetch_hashes(ec, EcSlot::Ro) {
            Ok((live, expected)) => {
                if live != expected {
                    log::info!("EC RO image out of date");
                    ctx.shared.set_flag(FLAG_EC_RO_NEEDS_UPDATE);
                    StepOutcome::Next(SyncState::UpdateRo)
                } else {
                    StepOutcome::Next(SyncState::Protect)
                }
            }
            Err(_) => {
                request_recovery(ctx, RecoveryReason::EcHashFailed);
                StepOutcome::Terminal(Signal::RebootToRo)
            }
        },

        SyncState::UpdateRo => {
            // Two attempts. A failure raises a recovery request immediately;
            // a subsequent success restores the pre-attempt request so a
            // recovered retry does not strand the device in recovery.
            let saved_request = ctx.nv.recovery_request();
            let saved_subcode = ctx.nv.recovery_subcode();
            let mut failed = false;
            for _ in 0..2 {
                let ok = ec.update_image(EcSlot::Ro).is_ok()
                    && matches!(fetch_hashes(ec, EcSlot::Ro), Ok((l, e)) if l == e);
                if ok {
                    if failed {
                        ctx.nv.set_recovery_request(saved_request);
                        ctx.nv.set_recovery_subcode(saved_subcode);
                        ctx.shared.recovery_reason = RecoveryReason::None;
                    }
                    ctx.shared.clear_flag(FLAG_EC_RO_NEEDS_UPDATE);
                    return StepOutcome::Next(SyncState::Protect);
                }
                failed = true;
                request_recovery(ctx, RecoveryReason::EcUpdateFailed);
            }
            StepOutcome::Terminal(Signal::RebootToRo)
        }

        SyncState::Protect => {
            for slot in [EcSlot::Ro, EcSlot::RwActive] {
                if let Err(e) = ec.set_protect(slot) {
                    if e == EcError::RebootToRoRequired {
                        return StepOutcome::Terminal(Signal::RebootToRo);
                    }
                    request_recovery(ctx, RecoveryReason::EcProtectFailed);
                    return StepOutcome::Terminal(Signal::RebootToRo);
                }
            }
            StepOutcome::Next(SyncState::Done)
        }

        SyncState::Done => {
            if let Err(e) = ec.disable_jump() {
                log::warn!("EC disable-jump failed: {:?}", e);
            }
            ctx.shared.set_flag(FLAG_EC_JUMP_DISABLED);
            ec.sync_complete();
            ctx.shared.set_status(STATUS_EC_SYNC_COMPLETE);
            StepOutcome::Terminal(Signal::Success)
        }
    }
}

/// Phase 1: decide what the sync will do, without writing anything.
///
/// Returns `Some(signal)` when the flow ends here (sync disabled, or an
/// early failure), `None` when phase 2 should run. Call
/// [`ec_will_update_slowly`] between the phases to know whether to show a
/// wait indicator.
pub fn ec_sync_phase1(ctx: &mut Context<'_>, ec: &mut dyn EcController) -> Option<Signal> {
    if ctx.shared.has_status(STATUS_EC_SYNC_COMPLETE) {
        return Some(Signal::Success);
    }
    let mut state = SyncState::Init;
    loop {
        match step(state, ctx, ec) {
            StepOutcome::Terminal(sig) => return Some(sig),
            StepOutcome::Next(SyncState::UpdateRw) | StepOutcome::Next(SyncState::JumpRw) => {
                return None;
            }
            StepOutcome::Next(next) => state = next,
        }
    }
}

/// Will phase 2 reflash slowly enough to warrant a wait indicator? The
/// answer is fixed by phase 1 and does not change once phase 2 starts,
/// even when the update ends in a switch-RW reboot.
pub fn ec_will_update_slowly(ctx: &Context<'_>) -> bool {
    ctx.shared.has_flag(FLAG_EC_SLOW_UPDATE)
}

/// Phase 2: update, jump, protect.
pub fn ec_sync_phase2(ctx: &mut Context<'_>, ec: &mut dyn EcController) -> Signal {
    if ctx.shared.has_status(STATUS_EC_SYNC_COMPLETE) {
        return Signal::Success;
    }
    let mut state = if ctx.shared.has_flag(FLAG_EC_RW_NEEDS_UPDATE) {
        SyncState::UpdateRw
    } else {
        SyncState::JumpRw
    };
    loop {
        match step(state, ctx, ec) {
            StepOutcome::Terminal(sig) => return sig,
            StepOutcome::Next(next) => state = next,
        }
    }
}

/// Both phases back to back, for callers with nothing to display.
pub fn ec_sync_all(ctx: &mut Context<'_>, ec: &mut dyn EcController) -> Signal {
    match ec_sync_phase1(ctx, ec) {
        Some(sig) => sig,
        None => ec_sync_phase2(ctx, ec),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use alloc::collections::VecDeque;
    use alloc::vec::Vec;

    /// Scripted EC double. Hashes are per-slot; updates copy expected over
    /// live on success. Every call is logged for transition assertions.
    pub struct FakeEc {
        pub running_rw: Result<bool, EcError>,
        pub live: [Vec<u8>; 3],
        pub expected: [Vec<u8>; 3],
        pub hash_error: Option<EcError>,
        pub update_results: VecDeque<Result<(), EcError>>,
        pub jump_result: Result<(), EcError>,
        pub protect_results: VecDeque<Result<(), EcError>>,
        pub late_switch: bool,
        pub slow: bool,
        pub supported: bool,
        pub log: Vec<&'static str>,
        pub sync_completed: bool,
    }

    fn idx(slot: EcSlot) -> usize {
        match slot {
            EcSlot::Ro => 0,
            EcSlot::RwActive => 1,
            EcSlot::RwUpdate => 2,
        }
    }

    impl FakeEc {
        pub fn in_sync() -> Self {
            Self {
                running_rw: Ok(false),
                live: [
                    Vec::from(&b"ro-hash"[..]),
                    Vec::from(&b"rw-hash"[..]),
                    Vec::from(&b"rw-hash"[..]),
                ],
                expected: [
                    Vec::from(&b"ro-hash"[..]),
                    Vec::from(&b"rw-hash"[..]),
                    Vec::from(&b"rw-hash"[..]),
                ],
                hash_error: None,
                update_results: VecDeque::new(),
                jump_result: Ok(()),
                protect_results: VecDeque::new(),
                late_switch: false,
                slow: false,
                supported: true,
                log: Vec::new(),
                sync_completed: false,
            }
        }

        pub fn stale_rw(late_switch: bool) -> Self {
            let mut ec = Self::in_sync();
            ec.late_switch = late_switch;
            let slot = if late_switch { 2 } else { 1 };
            ec.live[slot] = Vec::from(&b"rw-old!"[..]);
            ec
        }
    }

    impl EcController for FakeEc {
        fn sync_supported(&self) -> bool {
            self.supported
        }

        fn running_rw(&mut self) -> Result<bool, EcError> {
            self.log.push("running_rw");
            self.running_rw
        }

        fn live_hash(&mut self, slot: EcSlot) -> Result<EcHash, EcError> {
            self.log.push("live_hash");
            if let Some(e) = self.hash_error {
                return Err(e);
            }
            Ok(EcHash::from_slice(&self.live[idx(slot)]).expect("hash fits"))
        }

        fn expected_hash(&mut self, slot: EcSlot) -> Result<EcHash, EcError> {
            self.log.push("expected_hash");
            Ok(EcHash::from_slice(&self.expected[idx(slot)]).expect("hash fits"))
        }

        fn update_image(&mut self, slot: EcSlot) -> Result<(), EcError> {
            self.log.push("update_image");
            match self.update_results.pop_front().unwrap_or(Ok(())) {
                Ok(()) => {
                    self.live[idx(slot)] = self.expected[idx(slot)].clone();
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }

        fn jump_to_rw(&mut self) -> Result<(), EcError> {
            self.log.push("jump_to_rw");
            if self.jump_result.is_ok() {
                self.running_rw = Ok(true);
            }
            self.jump_result
        }

        fn disable_jump(&mut self) -> Result<(), EcError> {
            self.log.push("disable_jump");
            Ok(())
        }

        fn set_protect(&mut self, _slot: EcSlot) -> Result<(), EcError> {
            self.log.push("set_protect");
            self.protect_results.pop_front().unwrap_or(Ok(()))
        }

        fn supports_late_switch(&self) -> bool {
            self.late_switch
        }

        fn updates_slowly(&self) -> bool {
            self.slow
        }

        fn sync_complete(&mut self) {
            self.sync_completed = true;
        }
    }
}
