// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! The 16-byte boot-persistent NV record.
//!
//! Bit-packed flags and counters that must survive reboot but not power
//! loss protection: recovery request, slot tries, last firmware result, and
//! a small opaque client area. The last byte is a modular-sum checksum; a
//! record that fails it is zeroed and reported as reinitialized. The actual
//! persistence is external: [`NvData::commit_if_dirty`] hands the caller a
//! finalized record when (and only when) something changed.

use crate::state::FwSlot;

pub const NV_SIZE: usize = 16;

const HEADER_OFFSET: usize = 0;
const HEADER_MASK: u8 = 0xC0;
const HEADER_SIGNATURE: u8 = 0x40;
const HEADER_FIRMWARE_RESET: u8 = 0x20;
const HEADER_KERNEL_RESET: u8 = 0x10;

const BOOT_OFFSET: usize = 1;
const BOOT_RECOVERY_REQUEST: u8 = 0x80;
const BOOT_LOCALIZATION_MASK: u8 = 0x70;
const BOOT_TRIES_MASK: u8 = 0x0F;

const SUBCODE_OFFSET: usize = 2;

const FW_OFFSET: usize = 3;
const FW_TRY_SLOT: u8 = 0x01;
const FW_TRY_NEXT: u8 = 0x02;
const FW_RESULT_MASK: u8 = 0x0C;
const FW_DISPLAY_REQUEST: u8 = 0x10;
const FW_BOOT_ON_AC: u8 = 0x20;
const FW_TRY_RO_SYNC: u8 = 0x40;

const CLIENT_OFFSET: usize = 4;
const CHECKSUM_OFFSET: usize = 15;

/// Bytes available to the kernel-side client area.
pub const NV_CLIENT_SIZE: usize = CHECKSUM_OFFSET - CLIENT_OFFSET;

/// Outcome of the last firmware boot attempt, as recorded across reboots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FwResult {
    Unknown = 0,
    Trying = 1,
    Success = 2,
    Failure = 3,
}

impl FwResult {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            1 => Self::Trying,
            2 => Self::Success,
            3 => Self::Failure,
            _ => Self::Unknown,
        }
    }
}

/// In-memory copy of the NV record with dirty tracking.
///
/// Setting a field to its current value does not dirty the record, so a
/// boot that changes nothing costs no NV write cycle.
pub struct NvData {
    raw: [u8; NV_SIZE],
    dirty: bool,
}

impl NvData {
    /// Adopt a record read from the platform. A bad checksum or header
    /// signature zero-initializes the record; the second return value says
    /// whether that happened so the caller can set the reinit status bit.
    pub fn init(raw: [u8; NV_SIZE]) -> (Self, bool) {
        let good = raw[CHECKSUM_OFFSET] == Self::checksum(&raw)
            && raw[HEADER_OFFSET] & HEADER_MASK == HEADER_SIGNATURE;
        if good {
            return (Self { raw, dirty: false }, false);
        }

        log::warn!("NV record invalid, reinitializing");
        let mut fresh = [0u8; NV_SIZE];
        fresh[HEADER_OFFSET] = HEADER_SIGNATURE | HEADER_FIRMWARE_RESET | HEADER_KERNEL_RESET;
        (Self { raw: fresh, dirty: true }, true)
    }

    /// Modular sum over bytes 0–14.
    pub fn checksum(raw: &[u8; NV_SIZE]) -> u8 {
        raw[..CHECKSUM_OFFSET].iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Finalize the checksum and return the record for persisting, if
    /// anything changed since the last commit.
    pub fn commit_if_dirty(&mut self) -> Option<[u8; NV_SIZE]> {
        if !self.dirty {
            return None;
        }
        self.raw[CHECKSUM_OFFSET] = Self::checksum(&self.raw);
        self.dirty = false;
        Some(self.raw)
    }

    // -- byte 0: header --

    pub fn fw_settings_reset(&self) -> bool {
        self.raw[HEADER_OFFSET] & HEADER_FIRMWARE_RESET != 0
    }

    pub fn set_fw_settings_reset(&mut self, v: bool) {
        self.set_bit(HEADER_OFFSET, HEADER_FIRMWARE_RESET, v);
    }

    pub fn kernel_settings_reset(&self) -> bool {
        self.raw[HEADER_OFFSET] & HEADER_KERNEL_RESET != 0
    }

    pub fn set_kernel_settings_reset(&mut self, v: bool) {
        self.set_bit(HEADER_OFFSET, HEADER_KERNEL_RESET, v);
    }

    // -- byte 1: recovery request, localization, tries --

    pub fn recovery_request(&self) -> bool {
        self.raw[BOOT_OFFSET] & BOOT_RECOVERY_REQUEST != 0
    }

    pub fn set_recovery_request(&mut self, v: bool) {
        self.set_bit(BOOT_OFFSET, BOOT_RECOVERY_REQUEST, v);
    }

    pub fn localization(&self) -> u8 {
        (self.raw[BOOT_OFFSET] & BOOT_LOCALIZATION_MASK) >> 4
    }

    pub fn set_localization(&mut self, v: u8) {
        self.set_field(BOOT_OFFSET, BOOT_LOCALIZATION_MASK, v << 4);
    }

    pub fn tries_remaining(&self) -> u8 {
        self.raw[BOOT_OFFSET] & BOOT_TRIES_MASK
    }

    pub fn set_tries_remaining(&mut self, v: u8) {
        self.set_field(BOOT_OFFSET, BOOT_TRIES_MASK, v);
    }

    // -- byte 2 --

    pub fn recovery_subcode(&self) -> u8 {
        self.raw[SUBCODE_OFFSET]
    }

    pub fn set_recovery_subcode(&mut self, v: u8) {
        self.set_field(SUBCODE_OFFSET, 0xFF, v);
    }

    // -- byte 3: firmware flags --

    pub fn try_slot(&self) -> FwSlot {
        FwSlot::from_bit(self.raw[FW_OFFSET] & FW_TRY_SLOT != 0)
    }

    pub fn set_try_slot(&mut self, slot: FwSlot) {
        self.set_bit(FW_OFFSET, FW_TRY_SLOT, slot.bit());
    }

    /// Slot an updater staged for the following boot.
    pub fn try_next(&self) -> FwSlot {
        FwSlot::from_bit(self.raw[FW_OFFSET] & FW_TRY_NEXT != 0)
    }

    pub fn set_try_next(&mut self, slot: FwSlot) {
        self.set_bit(FW_OFFSET, FW_TRY_NEXT, slot.bit());
    }

    pub fn fw_result(&self) -> FwResult {
        FwResult::from_bits((self.raw[FW_OFFSET] & FW_RESULT_MASK) >> 2)
    }

    pub fn set_fw_result(&mut self, r: FwResult) {
        self.set_field(FW_OFFSET, FW_RESULT_MASK, (r as u8) << 2);
    }

    pub fn display_request(&self) -> bool {
        self.raw[FW_OFFSET] & FW_DISPLAY_REQUEST != 0
    }

    pub fn set_display_request(&mut self, v: bool) {
        self.set_bit(FW_OFFSET, FW_DISPLAY_REQUEST, v);
    }

    pub fn boot_on_ac(&self) -> bool {
        self.raw[FW_OFFSET] & FW_BOOT_ON_AC != 0
    }

    pub fn set_boot_on_ac(&mut self, v: bool) {
        self.set_bit(FW_OFFSET, FW_BOOT_ON_AC, v);
    }

    pub fn try_ro_sync(&self) -> bool {
        self.raw[FW_OFFSET] & FW_TRY_RO_SYNC != 0
    }

    pub fn set_try_ro_sync(&mut self, v: bool) {
        self.set_bit(FW_OFFSET, FW_TRY_RO_SYNC, v);
    }

    // -- bytes 4..14: opaque client area --

    pub fn client(&self) -> &[u8] {
        &self.raw[CLIENT_OFFSET..CHECKSUM_OFFSET]
    }

    /// Write one client byte. `idx` < [`NV_CLIENT_SIZE`]; out-of-range
    /// writes are ignored rather than corrupting neighbors.
    pub fn set_client_byte(&mut self, idx: usize, v: u8) {
        if idx < NV_CLIENT_SIZE {
            self.set_field(CLIENT_OFFSET + idx, 0xFF, v);
        }
    }

    fn set_bit(&mut self, off: usize, mask: u8, v: bool) {
        self.set_field(off, mask, if v { mask } else { 0 });
    }

    fn set_field(&mut self, off: usize, mask: u8, bits: u8) {
        let new = (self.raw[off] & !mask) | (bits & mask);
        if new != self.raw[off] {
            self.raw[off] = new;
            self.dirty = true;
        }
    }
}
