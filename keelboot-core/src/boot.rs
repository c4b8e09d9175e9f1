// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Per-boot orchestration: build the context, pick and verify a slot,
//! record the outcome.
//!
//! The caller owns the hardware and the persistence: it samples switches,
//! reads the NV bytes and the flash regions, then drives
//! [`init`] -> [`firmware_phase`] -> EC sync ([`crate::ecsync`]) -> handoff,
//! persisting the NV record whenever [`crate::nvdata::NvData::commit_if_dirty`]
//! says so and translating the returned [`Signal`] into a hardware action.
//! Reboot signals are values, not errors; nothing in this module panics on
//! a bad image.

use crate::containers::PackedKey;
use crate::gbb::{Gbb, GBB_FLAG_DISABLE_FW_ROLLBACK_CHECK, GBB_FLAG_FORCE_DEV_MODE};
use crate::handoff::Handoff;
use crate::nvdata::{FwResult, NvData};
use crate::pipeline::{self, VerifyParams};
use crate::platform::Platform;
use crate::recovery::{self, RecoveryInputs, RecoveryMode, RecoveryReason};
use crate::secdata::Secdata;
use crate::selector::{self, Selection, SelectorInputs, SlotStatus};
use crate::state::{
    BootInput, Context, FwSlot, SharedState, FLAG_ALLOW_HW_CRYPTO, FLAG_DEVELOPER_MODE,
    FLAG_RECOVERY_MODE, STATUS_CHOSE_SLOT, STATUS_GBB_INIT, STATUS_NV_INIT, STATUS_NV_REINIT,
    STATUS_SECDATA_INIT,
};
use crate::workbuf::WorkBuf;
use serde::{Deserialize, Serialize};

/// What the caller must do next. Every variant terminates the current boot
/// flow; callers surface these, they never convert them into errors.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// Keep going (or, from a whole phase, hand off to the OS).
    Success,
    /// Ordinary reboot.
    Reboot,
    /// Cold-reset the EC into RO, then restart the flow.
    RebootToRo,
    /// Cold-reset so the EC swaps to its freshly written RW slot.
    RebootSwitchRw,
    /// Reboot into recovery for this reason.
    Recovery(RecoveryReason),
}

/// The two firmware slot regions, caller-owned read-only borrows.
pub struct SlotRegions<'a> {
    pub a: &'a [u8],
    pub b: &'a [u8],
}

impl<'a> SlotRegions<'a> {
    fn get(&self, slot: FwSlot) -> &'a [u8] {
        match slot {
            FwSlot::A => self.a,
            FwSlot::B => self.b,
        }
    }
}

/// Build the boot context: shared state, NV record, secure storage.
///
/// Never fails; a secure-storage failure is recorded as a pending fatal
/// recovery that [`firmware_phase`] will surface, so the NV request still
/// reaches the caller for persisting.
pub fn init<'a>(mem: &'a mut [u8], input: BootInput, pf: &mut Platform<'_>) -> Context<'a> {
    let mut shared = SharedState::new();
    shared.gbb_offset = input.gbb_offset;
    if input.allow_hw_crypto {
        shared.set_flag(FLAG_ALLOW_HW_CRYPTO);
    }

    let (nv, reinit) = NvData::init(input.nv_bytes);
    shared.set_status(STATUS_NV_INIT);
    if reinit {
        shared.set_status(STATUS_NV_REINIT);
    }
    shared.last_slot = nv.try_slot();
    shared.last_result = nv.fw_result();

    let secdata = match Secdata::init(pf.secure) {
        Ok(sd) => {
            shared.set_status(STATUS_SECDATA_INIT);
            shared.fw_version_secdata = sd.fw_versions();
            shared.kernel_version_secdata = sd.kernel_versions();
            sd
        }
        Err(e) => {
            log::error!("secure storage init failed: {}", e);
            shared.recovery_reason = RecoveryReason::SecdataError;
            shared.recovery_mode = Some(RecoveryMode::Broken);
            Secdata::unavailable()
        }
    };

    let mut ctx = Context { shared, nv, secdata, workbuf: WorkBuf::new(mem), input };
    if ctx.shared.recovery_reason == RecoveryReason::SecdataError {
        ctx.nv.set_recovery_request(true);
        ctx.nv.set_recovery_subcode(RecoveryReason::SecdataError.code());
    }
    ctx
}

fn enter_recovery(ctx: &mut Context<'_>, reason: RecoveryReason, mode: RecoveryMode) -> Signal {
    log::warn!("entering recovery: {:?} ({:?})", reason, mode);
    ctx.shared.recovery_reason = reason;
    ctx.shared.recovery_mode = Some(mode);
    ctx.shared.set_flag(FLAG_RECOVERY_MODE);
    ctx.nv.set_recovery_request(true);
    ctx.nv.set_recovery_subcode(reason.code());
    Signal::Recovery(reason)
}

/// Select and verify a firmware slot; commit the outcome.
///
/// On success the shared state carries the chosen slot, version, preamble
/// flags and staged kernel subkey, the NV trial state is settled, and the
/// secure-storage floor has been advanced as far as both slots allow.
pub fn firmware_phase(
    ctx: &mut Context<'_>,
    gbb_region: &[u8],
    slots: &SlotRegions<'_>,
    pf: &mut Platform<'_>,
) -> Signal {
    if ctx.shared.recovery_reason == RecoveryReason::SecdataError {
        return Signal::Recovery(RecoveryReason::SecdataError);
    }

    let gbb = match Gbb::verify_and_open(gbb_region) {
        Ok(g) => g,
        Err(e) => {
            log::error!("GBB invalid: {}", e);
            return enter_recovery(ctx, RecoveryReason::GbbInvalid, RecoveryMode::Broken);
        }
    };
    ctx.shared.set_status(STATUS_GBB_INIT);
    ctx.shared.gbb_flags = gbb.flags();
    if ctx.input.developer_switch || gbb.flags() & GBB_FLAG_FORCE_DEV_MODE != 0 {
        ctx.shared.set_flag(FLAG_DEVELOPER_MODE);
    }

    let root_key: PackedKey<'_> = match gbb.root_key() {
        Ok(k) => k,
        Err(e) => {
            log::error!("GBB root key invalid: {}", e);
            return enter_recovery(ctx, RecoveryReason::GbbInvalid, RecoveryMode::Broken);
        }
    };

    // A pending NV recovery request preempts slot selection.
    if ctx.nv.recovery_request() {
        let d = recovery::decide(&RecoveryInputs {
            nv_request: true,
            physical_request: ctx.input.physical_recovery,
            slot_reasons: [None, None],
            gbb_flags: gbb.flags(),
        });
        match d {
            Some((mut reason, mode)) => {
                // A software-raised request carries its original reason in
                // the subcode; surface that instead of the generic one.
                if mode == RecoveryMode::Broken {
                    match RecoveryReason::from_code(ctx.nv.recovery_subcode()) {
                        Some(stored) if stored != RecoveryReason::None => reason = stored,
                        _ => {}
                    }
                }
                // The request is honored now; don't loop on it next boot.
                ctx.nv.set_recovery_request(false);
                ctx.shared.recovery_reason = reason;
                ctx.shared.recovery_mode = Some(mode);
                ctx.shared.set_flag(FLAG_RECOVERY_MODE);
                return Signal::Recovery(reason);
            }
            None => {
                log::info!("recovery request overridden by GBB policy");
                ctx.nv.set_recovery_request(false);
            }
        }
    }

    // Selection order from trial state, history, and claimed versions.
    let claims = [
        pipeline::claimed_version(slots.a),
        pipeline::claimed_version(slots.b),
    ];
    let mut statuses = [
        SlotStatus { version: claims[0], last_result: FwResult::Unknown },
        SlotStatus { version: claims[1], last_result: FwResult::Unknown },
    ];
    statuses[ctx.nv.try_slot().index()].last_result = ctx.nv.fw_result();

    let ignore_rollback = gbb.flags() & GBB_FLAG_DISABLE_FW_ROLLBACK_CHECK != 0;
    let first = match selector::select_slot(&SelectorInputs {
        recovery_requested: false,
        tries_remaining: ctx.nv.tries_remaining(),
        try_slot: ctx.nv.try_slot(),
        slots: statuses,
        floor: ctx.shared.fw_version_secdata,
        ignore_rollback,
    }) {
        Selection::Slot { slot, nv } => {
            nv.apply_to(&mut ctx.nv);
            slot
        }
        Selection::Recovery(reason) => {
            return enter_recovery(ctx, reason, RecoveryMode::Broken);
        }
    };

    let params = VerifyParams {
        developer: ctx.shared.has_flag(FLAG_DEVELOPER_MODE),
        recovery: false,
        floor: ctx.shared.fw_version_secdata,
        ignore_rollback,
        allow_hw: ctx.shared.has_flag(FLAG_ALLOW_HW_CRYPTO),
    };

    // Verify the chosen slot; a rejected slot falls through to the other.
    let mut slot_reasons: [Option<RecoveryReason>; 2] = [None, None];
    let mut verified = None;
    for slot in [first, first.other()] {
        match pipeline::verify_slot(slots.get(slot), &root_key, &params, &mut ctx.workbuf, pf.crypto) {
            Ok(v) => {
                verified = Some((slot, v));
                break;
            }
            Err(e) => {
                log::warn!("slot {:?} rejected: {}", slot, e);
                slot_reasons[slot.index()] = Some(e.recovery_reason());
            }
        }
    }

    let Some((slot, v)) = verified else {
        let d = recovery::decide(&RecoveryInputs {
            nv_request: false,
            physical_request: ctx.input.physical_recovery,
            slot_reasons,
            gbb_flags: gbb.flags(),
        });
        return match d {
            Some((reason, mode)) => enter_recovery(ctx, reason, mode),
            None => Signal::Reboot,
        };
    };

    log::info!("chose slot {:?}, version {:#010x}", slot, v.version);
    ctx.shared.this_slot = Some(slot);
    ctx.shared.fw_version = v.version;
    ctx.shared.preamble_flags = v.preamble_flags;
    ctx.shared.kernel_subkey = Some(v.kernel_subkey);
    ctx.shared.set_status(STATUS_CHOSE_SLOT);

    // Settle the trial state: this slot is the known-good one now.
    ctx.nv.set_try_slot(slot);
    ctx.nv.set_fw_result(FwResult::Success);
    ctx.nv.set_tries_remaining(0);

    // Advance the rollback floor as far as both slots allow, so the other
    // slot stays bootable until an update replaces it.
    let target = match pipeline::claimed_version(slots.get(slot.other())) {
        Some(other) => v.version.min(other),
        None => v.version,
    };
    if ctx.secdata.is_valid() && target > ctx.shared.fw_version_secdata {
        if let Err(e) = ctx.secdata.set_fw_versions(target) {
            log::warn!("rollback floor update rejected: {}", e);
        }
    }
    if let Err(e) = ctx.secdata.set_last_boot_good(true) {
        log::warn!("last-boot-good update rejected: {}", e);
    }
    match ctx.secdata.commit_if_dirty(pf.secure) {
        Ok(_) => {}
        // A failed floor write weakens future rollback protection but does
        // not invalidate this boot's verification.
        Err(e) => log::warn!("secure storage write failed: {}", e),
    }
    // No further version writes until the next boot.
    ctx.secdata.set_lock();

    Signal::Success
}

/// The record the OS receives.
pub fn handoff(ctx: &Context<'_>) -> Handoff {
    Handoff::from_state(&ctx.shared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::SigAlg;
    use crate::crypto::tests::test_rsa_key;
    use crate::ecsync::{self, testutil::FakeEc};
    use crate::gbb::build as gbuild;
    use crate::nvdata::NV_SIZE;
    use crate::pipeline::testutil::{build_slot, normal_kb_flags, packed_from};
    use crate::platform::NoHwCrypto;
    use crate::secdata::testutil::MemStore;
    use crate::state::STATUS_EC_SYNC_COMPLETE;
    use alloc::vec;
    use alloc::vec::Vec;
    use sha2::{Digest, Sha256};

    fn gbb_region(flags: u32) -> Vec<u8> {
        let key = test_rsa_key();
        let root = packed_from(key, 1);
        let rec = crate::containers::build::packed_key(SigAlg::Rsa2048Sha256, 1, 65537, &[0x22; 16]);
        let hwid = b"KEEL A1B2";
        let digest: [u8; 32] = Sha256::digest(hwid).into();
        gbuild::gbb(flags, hwid, &root, &rec, &digest)
    }

    fn input() -> BootInput {
        BootInput {
            physical_recovery: false,
            developer_switch: false,
            allow_hw_crypto: false,
            gbb_offset: 0x4000,
            nv_bytes: [0u8; NV_SIZE],
        }
    }

    #[test]
    fn test_full_boot_happy_path() {
        let key = test_rsa_key();
        let gbb = gbb_region(0);
        let slot_a = build_slot(key, key, 2, 0x0002_0003, normal_kb_flags(), &vec![0xAA; 1024]);
        let slot_b = build_slot(key, key, 2, 0x0002_0002, normal_kb_flags(), &vec![0xBB; 1024]);
        let slots = SlotRegions { a: &slot_a, b: &slot_b };

        let mut store = MemStore::new();
        let mut ec = FakeEc::in_sync();
        let mut hw = NoHwCrypto;
        let mut pf = Platform { crypto: &mut hw, ec: &mut ec, secure: &mut store };

        let mut mem = [0u8; 8192];
        let mut ctx = init(&mut mem, input(), &mut pf);
        assert_eq!(firmware_phase(&mut ctx, &gbb, &slots, &mut pf), Signal::Success);
        assert_eq!(ctx.shared.this_slot, Some(FwSlot::A));
        assert_eq!(ctx.shared.fw_version, 0x0002_0003);
        assert!(ctx.shared.has_status(STATUS_CHOSE_SLOT));
        assert!(ctx.shared.kernel_subkey.is_some());

        assert_eq!(ecsync::ec_sync_all(&mut ctx, &mut *pf.ec), Signal::Success);
        assert!(ctx.shared.has_status(STATUS_EC_SYNC_COMPLETE));

        let h = handoff(&ctx);
        assert_eq!(h.slot, Some(FwSlot::A));
        assert_eq!(h.recovery_reason, RecoveryReason::None);
        assert_eq!(h.gbb_offset, 0x4000);
    }

    #[test]
    fn test_corrupt_primary_falls_back() {
        let key = test_rsa_key();
        let gbb = gbb_region(0);
        let mut slot_a = build_slot(key, key, 2, 0x0002_0003, normal_kb_flags(), &vec![0xAA; 1024]);
        let n = slot_a.len();
        slot_a[n - 1] ^= 1;
        let slot_b = build_slot(key, key, 2, 0x0002_0002, normal_kb_flags(), &vec![0xBB; 1024]);
        let slots = SlotRegions { a: &slot_a, b: &slot_b };

        let mut store = MemStore::new();
        let mut ec = FakeEc::in_sync();
        let mut hw = NoHwCrypto;
        let mut pf = Platform { crypto: &mut hw, ec: &mut ec, secure: &mut store };

        let mut mem = [0u8; 8192];
        let mut ctx = init(&mut mem, input(), &mut pf);
        assert_eq!(firmware_phase(&mut ctx, &gbb, &slots, &mut pf), Signal::Success);
        assert_eq!(ctx.shared.this_slot, Some(FwSlot::B));
        assert!(!ctx.nv.recovery_request());
    }

    #[test]
    fn test_nv_recovery_request_honored() {
        let key = test_rsa_key();
        let gbb = gbb_region(0);
        let slot_a = build_slot(key, key, 2, 1, normal_kb_flags(), &vec![0xAA; 256]);
        let slots = SlotRegions { a: &slot_a, b: &slot_a };

        let mut store = MemStore::new();
        let mut ec = FakeEc::in_sync();
        let mut hw = NoHwCrypto;
        let mut pf = Platform { crypto: &mut hw, ec: &mut ec, secure: &mut store };

        let mut inp = input();
        inp.physical_recovery = true;
        let mut mem = [0u8; 8192];
        let mut ctx = init(&mut mem, inp, &mut pf);
        ctx.nv.set_recovery_request(true);

        assert_eq!(
            firmware_phase(&mut ctx, &gbb, &slots, &mut pf),
            Signal::Recovery(RecoveryReason::Requested)
        );
        assert_eq!(ctx.shared.recovery_mode, Some(RecoveryMode::Manual));
        // Honored, so the stored request is consumed.
        assert!(!ctx.nv.recovery_request());
    }

    #[test]
    fn test_stored_broken_request_keeps_its_reason() {
        let key = test_rsa_key();
        let gbb = gbb_region(0);
        let slot = build_slot(key, key, 2, 1, normal_kb_flags(), &vec![0xAA; 256]);
        let slots = SlotRegions { a: &slot, b: &slot };

        let mut store = MemStore::new();
        let mut ec = FakeEc::in_sync();
        let mut hw = NoHwCrypto;
        let mut pf = Platform { crypto: &mut hw, ec: &mut ec, secure: &mut store };

        // A previous boot's EC sync raised this request.
        let mut mem = [0u8; 8192];
        let mut ctx = init(&mut mem, input(), &mut pf);
        ctx.nv.set_recovery_request(true);
        ctx.nv.set_recovery_subcode(RecoveryReason::EcJumpFailed.code());

        assert_eq!(
            firmware_phase(&mut ctx, &gbb, &slots, &mut pf),
            Signal::Recovery(RecoveryReason::EcJumpFailed)
        );
        assert_eq!(ctx.shared.recovery_mode, Some(RecoveryMode::Broken));
    }

    #[test]
    fn test_secdata_failure_is_fatal() {
        let gbb = gbb_region(0);
        let key = test_rsa_key();
        let slot = build_slot(key, key, 2, 1, normal_kb_flags(), &vec![0xAA; 256]);
        let slots = SlotRegions { a: &slot, b: &slot };

        let mut store = MemStore::new();
        store.fail_read = true;
        let mut ec = FakeEc::in_sync();
        let mut hw = NoHwCrypto;
        let mut pf = Platform { crypto: &mut hw, ec: &mut ec, secure: &mut store };

        let mut mem = [0u8; 8192];
        let mut ctx = init(&mut mem, input(), &mut pf);
        assert_eq!(
            firmware_phase(&mut ctx, &gbb, &slots, &mut pf),
            Signal::Recovery(RecoveryReason::SecdataError)
        );
        // The request is staged in NV for the caller to persist.
        assert!(ctx.nv.recovery_request());
        assert_eq!(ctx.nv.recovery_subcode(), RecoveryReason::SecdataError.code());
    }

    #[test]
    fn test_corrupt_gbb_is_fatal() {
        let key = test_rsa_key();
        let mut gbb = gbb_region(0);
        gbb[0] = b'X';
        let slot = build_slot(key, key, 2, 1, normal_kb_flags(), &vec![0xAA; 256]);
        let slots = SlotRegions { a: &slot, b: &slot };

        let mut store = MemStore::new();
        let mut ec = FakeEc::in_sync();
        let mut hw = NoHwCrypto;
        let mut pf = Platform { crypto: &mut hw, ec: &mut ec, secure: &mut store };

        let mut mem = [0u8; 8192];
        let mut ctx = init(&mut mem, input(), &mut pf);
        assert_eq!(
            firmware_phase(&mut ctx, &gbb, &slots, &mut pf),
            Signal::Recovery(RecoveryReason::GbbInvalid)
        );
    }

    #[test]
    fn test_floor_advances_to_lower_of_both_slots() {
        let key = test_rsa_key();
        let gbb = gbb_region(0);
        let slot_a = build_slot(key, key, 2, 0x0002_0005, normal_kb_flags(), &vec![0xAA; 512]);
        let slot_b = build_slot(key, key, 2, 0x0002_0002, normal_kb_flags(), &vec![0xBB; 512]);
        let slots = SlotRegions { a: &slot_a, b: &slot_b };

        let mut store = MemStore::new();
        let mut ec = FakeEc::in_sync();
        let mut hw = NoHwCrypto;
        let mut pf = Platform { crypto: &mut hw, ec: &mut ec, secure: &mut store };

        let mut mem = [0u8; 8192];
        let mut ctx = init(&mut mem, input(), &mut pf);
        assert_eq!(firmware_phase(&mut ctx, &gbb, &slots, &mut pf), Signal::Success);
        // Floor rose to B's version, not A's, so B can still boot.
        assert_eq!(store.raw[1..5], 0x0002_0002u32.to_le_bytes());
    }
}
