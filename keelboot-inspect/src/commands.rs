// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations over the keelboot core.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context as _, Result};
use crc::{Crc, CRC_8_SMBUS};
use sha2::{Digest, Sha256};

use keelboot_core::containers::{KeyBlock, Preamble};
use keelboot_core::gbb::Gbb;
use keelboot_core::nvdata::{NvData, NV_SIZE};
use keelboot_core::platform::{
    EcController, EcError, EcHash, EcSlot, NoHwCrypto, SecureStore, StoreError,
};
use keelboot_core::secdata::RECORD_SIZE;
use keelboot_core::{firmware_phase, handoff, init, BootInput, Platform, Signal, SlotRegions};

/// Accept decimal or 0x-prefixed hex offsets.
pub fn parse_offset(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid offset {s:?}: {e}"))
}

fn hex_line(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decode and print an NV record.
pub fn nv(hex: &str) -> Result<()> {
    let digits: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() != NV_SIZE * 2 {
        bail!("expected {} hex digits, got {}", NV_SIZE * 2, digits.len());
    }
    let mut raw = [0u8; NV_SIZE];
    for (i, byte) in raw.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
            .with_context(|| format!("bad hex at byte {i}"))?;
    }

    let checksum_ok = raw[NV_SIZE - 1] == NvData::checksum(&raw);
    let (nv, reinit) = NvData::init(raw);

    println!("NV record:");
    println!("  Checksum:          {}", if checksum_ok { "ok" } else { "BAD (decoded as reinitialized)" });
    if reinit {
        println!("  (record was invalid; fields below are the fresh record)");
    }
    println!("  Recovery request:  {}", nv.recovery_request());
    println!("  Recovery subcode:  {:#04x}", nv.recovery_subcode());
    println!("  Localization:      {}", nv.localization());
    println!("  Tries remaining:   {}", nv.tries_remaining());
    println!("  Try slot:          {:?}", nv.try_slot());
    println!("  Try next:          {:?}", nv.try_next());
    println!("  Firmware result:   {:?}", nv.fw_result());
    println!("  Display request:   {}", nv.display_request());
    println!("  Boot on AC:        {}", nv.boot_on_ac());
    println!("  Try RO sync:       {}", nv.try_ro_sync());
    println!("  Client bytes:      {}", hex_line(nv.client()));
    Ok(())
}

/// Validate and print a GBB region.
pub fn gbb(file: &Path, offset: u64) -> Result<()> {
    let image = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let region = image
        .get(offset as usize..)
        .with_context(|| format!("offset {offset:#x} past end of file"))?;

    let gbb = match Gbb::verify_and_open(region) {
        Ok(g) => g,
        Err(e) => bail!("GBB invalid: {e}"),
    };

    println!("GBB at {:#x}:", offset);
    println!("  Version:        1.{}", gbb.minor_version());
    println!("  Flags:          {:#010x}", gbb.flags());
    println!("  HWID:           {}", String::from_utf8_lossy(gbb.hwid()));
    match gbb.root_key() {
        Ok(k) => println!(
            "  Root key:       {:?}, version {}, {} data bytes",
            k.algorithm(),
            k.key_version(),
            k.key_data().len()
        ),
        Err(e) => println!("  Root key:       INVALID ({e})"),
    }
    match gbb.recovery_key() {
        Ok(k) => println!(
            "  Recovery key:   {:?}, version {}",
            k.algorithm(),
            k.key_version()
        ),
        Err(e) => println!("  Recovery key:   INVALID ({e})"),
    }
    if let Some(stored) = gbb.hwid_digest() {
        let computed: [u8; 32] = Sha256::digest(gbb.hwid()).into();
        println!("  HWID digest:    {}", hex_line(stored));
        println!(
            "  Digest check:   {}",
            if gbb.check_hwid_digest(&computed) { "ok" } else { "MISMATCH" }
        );
    }
    Ok(())
}

/// Structure-parse a slot and print what it claims to be.
pub fn slot(file: &Path) -> Result<()> {
    let image = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let kb = match KeyBlock::verify_and_open(&image) {
        Ok(kb) => kb,
        Err(e) => bail!("key block invalid: {e}"),
    };
    println!("Key block:");
    println!("  Size:           {} bytes", kb.size());
    println!("  Flags:          {:#x}", kb.flags());
    println!(
        "  Boot modes:     normal={} dev={} rec={} dev+rec={}",
        kb.allows_mode(false, false),
        kb.allows_mode(true, false),
        kb.allows_mode(false, true),
        kb.allows_mode(true, true)
    );
    let dk = kb.data_key();
    println!(
        "  Data key:       {:?}, version {}",
        dk.algorithm(),
        dk.key_version()
    );

    let pre = match Preamble::verify_and_open(&image[kb.size() as usize..]) {
        Ok(p) => p,
        Err(e) => bail!("preamble invalid: {e}"),
    };
    println!("Preamble:");
    println!("  Size:           {} bytes", pre.size());
    println!("  Version:        {:#010x}", pre.firmware_version());
    println!("  Flags:          {:#x}", pre.flags());
    println!("  Body covers:    {} bytes", pre.body_signature().signed_length());
    let sk = pre.kernel_subkey();
    println!(
        "  Kernel subkey:  {:?}, version {}",
        sk.algorithm(),
        sk.key_version()
    );

    let body = image.len() as u64 - kb.size() as u64 - pre.size() as u64;
    println!("Body:             {} bytes present", body);
    println!();
    println!("(structure only; run 'verify' to check the signatures)");
    Ok(())
}

/// In-memory secure storage seeded with a simulated rollback floor.
struct SimStore {
    raw: [u8; RECORD_SIZE],
}

impl SimStore {
    fn with_floor(floor: u32) -> Self {
        const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);
        let mut raw = [0u8; RECORD_SIZE];
        raw[1..5].copy_from_slice(&floor.to_le_bytes());
        raw[RECORD_SIZE - 1] = CRC8.checksum(&raw[..RECORD_SIZE - 1]);
        Self { raw }
    }
}

impl SecureStore for SimStore {
    fn read(&mut self, out: &mut [u8; RECORD_SIZE]) -> Result<(), StoreError> {
        *out = self.raw;
        Ok(())
    }

    fn write(&mut self, rec: &[u8; RECORD_SIZE]) -> Result<(), StoreError> {
        self.raw = *rec;
        Ok(())
    }
}

/// There is no EC on the bench; sync reports unsupported.
struct NoEc;

impl EcController for NoEc {
    fn sync_supported(&self) -> bool {
        false
    }

    fn running_rw(&mut self) -> Result<bool, EcError> {
        Err(EcError::UnknownImage)
    }

    fn live_hash(&mut self, _: EcSlot) -> Result<EcHash, EcError> {
        Err(EcError::HashReadFailed)
    }

    fn expected_hash(&mut self, _: EcSlot) -> Result<EcHash, EcError> {
        Err(EcError::HashReadFailed)
    }

    fn update_image(&mut self, _: EcSlot) -> Result<(), EcError> {
        Err(EcError::UpdateFailed)
    }

    fn jump_to_rw(&mut self) -> Result<(), EcError> {
        Err(EcError::JumpFailed)
    }

    fn disable_jump(&mut self) -> Result<(), EcError> {
        Ok(())
    }

    fn set_protect(&mut self, _: EcSlot) -> Result<(), EcError> {
        Err(EcError::ProtectFailed)
    }

    fn supports_late_switch(&self) -> bool {
        false
    }

    fn updates_slowly(&self) -> bool {
        false
    }
}

/// Run the firmware phase over image files and report the outcome.
pub fn verify(
    gbb_file: &Path,
    slot_a_file: &Path,
    slot_b_file: Option<&Path>,
    floor: u32,
    dev: bool,
) -> Result<()> {
    let gbb_region =
        fs::read(gbb_file).with_context(|| format!("Failed to read {}", gbb_file.display()))?;
    let slot_a =
        fs::read(slot_a_file).with_context(|| format!("Failed to read {}", slot_a_file.display()))?;
    let slot_b = match slot_b_file {
        Some(p) => fs::read(p).with_context(|| format!("Failed to read {}", p.display()))?,
        None => slot_a.clone(),
    };

    let mut store = SimStore::with_floor(floor);
    let mut ec = NoEc;
    let mut hw = NoHwCrypto;
    let mut pf = Platform { crypto: &mut hw, ec: &mut ec, secure: &mut store };

    let input = BootInput {
        physical_recovery: false,
        developer_switch: dev,
        allow_hw_crypto: false,
        gbb_offset: 0,
        nv_bytes: [0u8; NV_SIZE],
    };

    let mut mem = vec![0u8; 16 * 1024];
    let mut ctx = init(&mut mem, input, &mut pf);
    let slots = SlotRegions { a: &slot_a, b: &slot_b };
    let signal = firmware_phase(&mut ctx, &gbb_region, &slots, &mut pf);

    let h = handoff(&ctx);
    println!("Verification result:");
    match signal {
        Signal::Success => {
            println!("  Outcome:        OK");
            println!("  Chosen slot:    {:?}", h.slot.expect("slot set on success"));
            println!("  Version:        {:#010x}", h.fw_version);
            println!("  Preamble flags: {:#x}", h.preamble_flags);
        }
        Signal::Recovery(reason) => {
            println!("  Outcome:        RECOVERY");
            println!("  Reason:         {:?} ({:#04x})", reason, reason.code());
            if let Some(mode) = h.recovery_mode {
                println!("  Mode:           {:?}", mode);
            }
        }
        other => println!("  Outcome:        {:?}", other),
    }
    println!("  Status bits:    {:#x}", h.status);
    println!("  Flag bits:      {:#x}", h.flags);

    if signal != Signal::Success {
        std::process::exit(1);
    }
    Ok(())
}
