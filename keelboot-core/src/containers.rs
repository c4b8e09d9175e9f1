// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Zero-copy views over the layered signed-image containers.
//!
//! The trust chain is: root key (from the GBB) signs the key block; the key
//! block carries the data key; the data key signs the firmware preamble; the
//! preamble carries the body signature and the kernel subkey for the next
//! stage. Each container type has a `verify_and_open` that checks magic and
//! header-version compatibility, proves every embedded (offset, size) pair
//! in-bounds via [`crate::bounds`], and hands back a borrow with typed
//! accessors. Nothing is copied; mutating the backing bytes while a view is
//! alive is outside the contract.
//!
//! `verify_and_open` proves structure, not authenticity. Signature checking
//! happens in [`crate::crypto`] and [`crate::pipeline`].

use crate::bounds::{self, BoundsError};
use thiserror::Error;

/// Signature algorithm tag: one RSA width paired with one hash.
///
/// The tag is stored in the packed key and fixes the signature size, the
/// digest size, and the modulus width. Anything outside this closed set is
/// rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SigAlg {
    Rsa2048Sha256 = 0,
    Rsa4096Sha256 = 1,
    Rsa4096Sha512 = 2,
    Rsa8192Sha512 = 3,
}

impl SigAlg {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Rsa2048Sha256),
            1 => Some(Self::Rsa4096Sha256),
            2 => Some(Self::Rsa4096Sha512),
            3 => Some(Self::Rsa8192Sha512),
            _ => None,
        }
    }

    /// Signature length in bytes (equals the modulus length).
    pub fn sig_size(self) -> usize {
        match self {
            Self::Rsa2048Sha256 => 256,
            Self::Rsa4096Sha256 | Self::Rsa4096Sha512 => 512,
            Self::Rsa8192Sha512 => 1024,
        }
    }

    /// Digest length in bytes for the paired hash.
    pub fn digest_size(self) -> usize {
        match self {
            Self::Rsa2048Sha256 | Self::Rsa4096Sha256 => 32,
            Self::Rsa4096Sha512 | Self::Rsa8192Sha512 => 64,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContainerError {
    #[error("container too short")]
    TooShort,
    #[error("bad magic")]
    BadMagic,
    #[error("incompatible header version {major}.{minor}")]
    IncompatibleVersion { major: u16, minor: u16 },
    #[error("unknown algorithm tag {0}")]
    UnsupportedAlgorithm(u32),
    #[error("declared size impossible")]
    SizeField,
    #[error("signed region does not cover the container fields")]
    SignedRangeTooSmall,
    #[error("signature bytes inside the signed region")]
    SignatureInsideSignedRange,
    #[error(transparent)]
    Bounds(#[from] BoundsError),
}

// Field reads below index into ranges already proven in-bounds, so the
// conversions cannot fail.
fn u32_at(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(b[off..off + 4].try_into().expect("validated"))
}

fn u16_at(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(b[off..off + 2].try_into().expect("validated"))
}

fn check_version(major: u16, minor: u16, want_major: u16, want_minor: u16) -> Result<(), ContainerError> {
    if major != want_major || minor < want_minor {
        return Err(ContainerError::IncompatibleVersion { major, minor });
    }
    Ok(())
}

// --- Packed public key ---

/// 32-byte packed-key header: key-data-offset, reserved, key-data-size,
/// reserved, algorithm, reserved, key-version, reserved (all u32 LE),
/// followed by the key bytes at the stated offset.
pub const PACKED_KEY_HEADER_SIZE: usize = 32;

/// Borrowed view of a packed public key.
///
/// `raw` starts at the key struct and extends to the end of the parent
/// container; the key bytes must lie inside it without touching the header.
#[derive(Clone, Copy, Debug)]
pub struct PackedKey<'a> {
    raw: &'a [u8],
    alg: SigAlg,
}

impl<'a> PackedKey<'a> {
    pub fn verify_and_open(raw: &'a [u8]) -> Result<Self, ContainerError> {
        if raw.len() < PACKED_KEY_HEADER_SIZE {
            return Err(ContainerError::TooShort);
        }
        let alg_raw = u32_at(raw, 16);
        let alg = SigAlg::from_raw(alg_raw).ok_or(ContainerError::UnsupportedAlgorithm(alg_raw))?;
        bounds::check_data(
            raw.len() as u64,
            0,
            PACKED_KEY_HEADER_SIZE as u32,
            u32_at(raw, 0),
            u32_at(raw, 8),
        )?;
        Ok(Self { raw, alg })
    }

    pub fn algorithm(&self) -> SigAlg {
        self.alg
    }

    /// Key epoch. The upper 16 bits of the stored word are reserved.
    pub fn key_version(&self) -> u16 {
        u32_at(self.raw, 24) as u16
    }

    pub fn key_data(&self) -> &'a [u8] {
        let off = u32_at(self.raw, 0) as usize;
        let size = u32_at(self.raw, 8) as usize;
        &self.raw[off..off + size]
    }

    /// The header plus key bytes as one slice, for re-embedding the key into
    /// shared state or the handoff.
    pub fn as_bytes(&self) -> &'a [u8] {
        let end = u32_at(self.raw, 0) as usize + u32_at(self.raw, 8) as usize;
        &self.raw[..end.max(PACKED_KEY_HEADER_SIZE)]
    }
}

// --- Signature ---

/// 16-byte signature header: signed-data-offset, signed-length,
/// signature-data-offset, signature-size (all u32 LE), followed by the
/// signature bytes at the stated offset.
pub const SIG_HEADER_SIZE: usize = 16;

/// Borrowed view of a signature struct. `raw` starts at the struct and
/// extends to the end of the parent container.
#[derive(Clone, Copy)]
pub struct SignatureView<'a> {
    raw: &'a [u8],
}

impl<'a> SignatureView<'a> {
    pub fn verify_and_open(raw: &'a [u8]) -> Result<Self, ContainerError> {
        if raw.len() < SIG_HEADER_SIZE {
            return Err(ContainerError::TooShort);
        }
        bounds::check_data(
            raw.len() as u64,
            0,
            SIG_HEADER_SIZE as u32,
            u32_at(raw, 8),
            u32_at(raw, 12),
        )?;
        Ok(Self { raw })
    }

    /// Offset of the signed plaintext, relative to the signed container.
    pub fn signed_data_offset(&self) -> u32 {
        u32_at(self.raw, 0)
    }

    /// Bytes of plaintext the signature covers.
    pub fn signed_length(&self) -> u32 {
        u32_at(self.raw, 4)
    }

    pub fn sig_size(&self) -> u32 {
        u32_at(self.raw, 12)
    }

    pub fn sig_bytes(&self) -> &'a [u8] {
        let off = u32_at(self.raw, 8) as usize;
        let size = u32_at(self.raw, 12) as usize;
        &self.raw[off..off + size]
    }
}

// --- Key block ---

pub const KEYBLOCK_MAGIC: [u8; 8] = *b"KEYBLK\0\0";
pub const KEYBLOCK_VERSION_MAJOR: u16 = 2;
pub const KEYBLOCK_VERSION_MINOR: u16 = 1;
pub const KEYBLOCK_HEADER_SIZE: usize = 68;

const KB_SIG_OFFSET: usize = 20;
const KB_KEY_OFFSET: usize = 36;

// Compile-time layout checks
const _: () = assert!(KB_SIG_OFFSET + SIG_HEADER_SIZE == KB_KEY_OFFSET);
const _: () = assert!(KB_KEY_OFFSET + PACKED_KEY_HEADER_SIZE == KEYBLOCK_HEADER_SIZE);

/// Key-block flag bits: which (developer, recovery) mode combinations this
/// block may boot in.
pub const KEYBLOCK_FLAG_DEV_OFF: u32 = 0x1;
pub const KEYBLOCK_FLAG_DEV_ON: u32 = 0x2;
pub const KEYBLOCK_FLAG_REC_OFF: u32 = 0x4;
pub const KEYBLOCK_FLAG_REC_ON: u32 = 0x8;

/// Borrowed view of a verified-structure key block.
#[derive(Clone, Copy, Debug)]
pub struct KeyBlock<'a> {
    raw: &'a [u8],
}

impl<'a> KeyBlock<'a> {
    /// Open a key block at the start of `bytes`.
    ///
    /// Layout checks only; the signature itself is verified by the pipeline
    /// against the root key. The signed region must start at offset 0, cover
    /// the header and the contained data key, and exclude the signature
    /// bytes.
    pub fn verify_and_open(bytes: &'a [u8]) -> Result<Self, ContainerError> {
        if bytes.len() < KEYBLOCK_HEADER_SIZE {
            return Err(ContainerError::TooShort);
        }
        if bytes[..8] != KEYBLOCK_MAGIC {
            return Err(ContainerError::BadMagic);
        }
        check_version(
            u16_at(bytes, 8),
            u16_at(bytes, 10),
            KEYBLOCK_VERSION_MAJOR,
            KEYBLOCK_VERSION_MINOR,
        )?;

        let kb_size = u32_at(bytes, 12) as usize;
        if kb_size < KEYBLOCK_HEADER_SIZE || kb_size > bytes.len() {
            return Err(ContainerError::SizeField);
        }
        let raw = &bytes[..kb_size];

        let sig = SignatureView::verify_and_open(&raw[KB_SIG_OFFSET..])?;
        PackedKey::verify_and_open(&raw[KB_KEY_OFFSET..])?;

        // The signed region is [0, signed_length): it must reach past the
        // header and the data-key payload, and the signature bytes must sit
        // entirely after it.
        if sig.signed_data_offset() != 0 {
            return Err(ContainerError::SignedRangeTooSmall);
        }
        let signed_len = sig.signed_length() as u64;
        let key_end = KB_KEY_OFFSET as u64
            + u32_at(&raw[KB_KEY_OFFSET..], 0) as u64
            + u32_at(&raw[KB_KEY_OFFSET..], 8) as u64;
        if signed_len < KEYBLOCK_HEADER_SIZE as u64 || signed_len < key_end {
            return Err(ContainerError::SignedRangeTooSmall);
        }
        if signed_len > kb_size as u64 {
            return Err(ContainerError::SizeField);
        }
        let sig_start = KB_SIG_OFFSET as u64 + u32_at(&raw[KB_SIG_OFFSET..], 8) as u64;
        if sig_start < signed_len {
            return Err(ContainerError::SignatureInsideSignedRange);
        }

        Ok(Self { raw })
    }

    pub fn size(&self) -> u32 {
        u32_at(self.raw, 12)
    }

    pub fn flags(&self) -> u32 {
        u32_at(self.raw, 16)
    }

    /// Does the flags bitmap permit booting in this (developer, recovery)
    /// mode combination?
    pub fn allows_mode(&self, developer: bool, recovery: bool) -> bool {
        let dev_bit = if developer { KEYBLOCK_FLAG_DEV_ON } else { KEYBLOCK_FLAG_DEV_OFF };
        let rec_bit = if recovery { KEYBLOCK_FLAG_REC_ON } else { KEYBLOCK_FLAG_REC_OFF };
        self.flags() & dev_bit != 0 && self.flags() & rec_bit != 0
    }

    pub fn signature(&self) -> SignatureView<'a> {
        // Structure proven in verify_and_open.
        SignatureView { raw: &self.raw[KB_SIG_OFFSET..] }
    }

    pub fn data_key(&self) -> PackedKey<'a> {
        PackedKey::verify_and_open(&self.raw[KB_KEY_OFFSET..]).expect("validated")
    }

    /// The plaintext the key-block signature covers.
    pub fn signed_body(&self) -> &'a [u8] {
        &self.raw[..self.signature().signed_length() as usize]
    }
}

// --- Firmware preamble ---

pub const PREAMBLE_VERSION_MAJOR: u16 = 2;
pub const PREAMBLE_VERSION_MINOR: u16 = 1;
pub const PREAMBLE_HEADER_SIZE: usize = 80;

const PRE_SIG_OFFSET: usize = 16;
const PRE_BODY_SIG_OFFSET: usize = 32;
const PRE_SUBKEY_OFFSET: usize = 48;

const _: () = assert!(PRE_SIG_OFFSET + SIG_HEADER_SIZE == PRE_BODY_SIG_OFFSET);
const _: () = assert!(PRE_SUBKEY_OFFSET + PACKED_KEY_HEADER_SIZE == PREAMBLE_HEADER_SIZE);

/// Borrowed view of a firmware preamble.
///
/// The preamble is signed by the key block's data key. Its own signature
/// covers everything up to `signed_length` (header, body-signature struct
/// and bytes, kernel subkey and key bytes), with the preamble signature
/// bytes placed after that region. The body signature describes the
/// firmware body, which lives outside the preamble.
#[derive(Clone, Copy, Debug)]
pub struct Preamble<'a> {
    raw: &'a [u8],
}

impl<'a> Preamble<'a> {
    pub fn verify_and_open(bytes: &'a [u8]) -> Result<Self, ContainerError> {
        if bytes.len() < PREAMBLE_HEADER_SIZE {
            return Err(ContainerError::TooShort);
        }
        check_version(
            u16_at(bytes, 0),
            u16_at(bytes, 2),
            PREAMBLE_VERSION_MAJOR,
            PREAMBLE_VERSION_MINOR,
        )?;

        let pre_size = u32_at(bytes, 4) as usize;
        if pre_size < PREAMBLE_HEADER_SIZE || pre_size > bytes.len() {
            return Err(ContainerError::SizeField);
        }
        let raw = &bytes[..pre_size];

        let own_sig = SignatureView::verify_and_open(&raw[PRE_SIG_OFFSET..])?;
        SignatureView::verify_and_open(&raw[PRE_BODY_SIG_OFFSET..])?;
        PackedKey::verify_and_open(&raw[PRE_SUBKEY_OFFSET..])?;

        // Own signature covers [0, signed_length): header, body-signature
        // bytes, and the kernel subkey payload must all be inside it; the
        // preamble's own signature bytes must be after it.
        if own_sig.signed_data_offset() != 0 {
            return Err(ContainerError::SignedRangeTooSmall);
        }
        let signed_len = own_sig.signed_length() as u64;
        if signed_len > pre_size as u64 {
            return Err(ContainerError::SizeField);
        }
        let subkey_end = PRE_SUBKEY_OFFSET as u64
            + u32_at(&raw[PRE_SUBKEY_OFFSET..], 0) as u64
            + u32_at(&raw[PRE_SUBKEY_OFFSET..], 8) as u64;
        let body_sig_end = PRE_BODY_SIG_OFFSET as u64
            + u32_at(&raw[PRE_BODY_SIG_OFFSET..], 8) as u64
            + u32_at(&raw[PRE_BODY_SIG_OFFSET..], 12) as u64;
        if signed_len < PREAMBLE_HEADER_SIZE as u64
            || signed_len < subkey_end
            || signed_len < body_sig_end
        {
            return Err(ContainerError::SignedRangeTooSmall);
        }
        let own_sig_start = PRE_SIG_OFFSET as u64 + u32_at(&raw[PRE_SIG_OFFSET..], 8) as u64;
        if own_sig_start < signed_len {
            return Err(ContainerError::SignatureInsideSignedRange);
        }

        Ok(Self { raw })
    }

    pub fn size(&self) -> u32 {
        u32_at(self.raw, 4)
    }

    /// Combined version: key epoch in the high half, firmware epoch in the
    /// low half. Compared as one 32-bit value against the rollback floor.
    pub fn firmware_version(&self) -> u32 {
        u32_at(self.raw, 8)
    }

    pub fn flags(&self) -> u32 {
        u32_at(self.raw, 12)
    }

    pub fn own_signature(&self) -> SignatureView<'a> {
        SignatureView { raw: &self.raw[PRE_SIG_OFFSET..] }
    }

    pub fn body_signature(&self) -> SignatureView<'a> {
        SignatureView { raw: &self.raw[PRE_BODY_SIG_OFFSET..] }
    }

    pub fn kernel_subkey(&self) -> PackedKey<'a> {
        PackedKey::verify_and_open(&self.raw[PRE_SUBKEY_OFFSET..]).expect("validated")
    }

    /// The plaintext the preamble's own signature covers.
    pub fn signed_body(&self) -> &'a [u8] {
        &self.raw[..self.own_signature().signed_length() as usize]
    }
}

/// Container assembly for tests and host tooling. The on-device code only
/// ever parses; building images is a host concern.
pub mod build {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// Serialize a packed key: `[u32 LE exponent][u32 LE modulus length]
    /// [modulus big-endian]` behind the 32-byte header.
    pub fn packed_key(alg: SigAlg, key_version: u16, exponent: u32, modulus_be: &[u8]) -> Vec<u8> {
        let data_len = 8 + modulus_be.len();
        let mut out = vec![0u8; PACKED_KEY_HEADER_SIZE + data_len];
        out[0..4].copy_from_slice(&(PACKED_KEY_HEADER_SIZE as u32).to_le_bytes());
        out[8..12].copy_from_slice(&(data_len as u32).to_le_bytes());
        out[16..20].copy_from_slice(&(alg as u32).to_le_bytes());
        out[24..28].copy_from_slice(&(key_version as u32).to_le_bytes());
        out[32..36].copy_from_slice(&exponent.to_le_bytes());
        out[36..40].copy_from_slice(&(modulus_be.len() as u32).to_le_bytes());
        out[40..].copy_from_slice(modulus_be);
        out
    }

    fn signature_struct(signed_data_offset: u32, signed_length: u32, sig_data_offset: u32, sig_size: u32) -> [u8; SIG_HEADER_SIZE] {
        let mut s = [0u8; SIG_HEADER_SIZE];
        s[0..4].copy_from_slice(&signed_data_offset.to_le_bytes());
        s[4..8].copy_from_slice(&signed_length.to_le_bytes());
        s[8..12].copy_from_slice(&sig_data_offset.to_le_bytes());
        s[12..16].copy_from_slice(&sig_size.to_le_bytes());
        s
    }

    /// Assemble a key block around `data_key` (a serialized packed key) and
    /// sign it with `signer`, which receives the signed plaintext and must
    /// return exactly `sig_size` signature bytes.
    pub fn key_block(
        flags: u32,
        data_key: &[u8],
        sig_size: u32,
        mut signer: impl FnMut(&[u8]) -> Vec<u8>,
    ) -> Vec<u8> {
        let signed_len = (KB_KEY_OFFSET + data_key.len()) as u32;
        let kb_size = signed_len + sig_size;
        let mut out = vec![0u8; kb_size as usize];
        out[0..8].copy_from_slice(&KEYBLOCK_MAGIC);
        out[8..10].copy_from_slice(&KEYBLOCK_VERSION_MAJOR.to_le_bytes());
        out[10..12].copy_from_slice(&KEYBLOCK_VERSION_MINOR.to_le_bytes());
        out[12..16].copy_from_slice(&kb_size.to_le_bytes());
        out[16..20].copy_from_slice(&flags.to_le_bytes());
        let sig_data_offset = signed_len - KB_SIG_OFFSET as u32;
        out[KB_SIG_OFFSET..KB_SIG_OFFSET + SIG_HEADER_SIZE]
            .copy_from_slice(&signature_struct(0, signed_len, sig_data_offset, sig_size));
        out[KB_KEY_OFFSET..KB_KEY_OFFSET + data_key.len()].copy_from_slice(data_key);

        let sig = signer(&out[..signed_len as usize]);
        debug_assert_eq!(sig.len(), sig_size as usize);
        out[signed_len as usize..].copy_from_slice(&sig);
        out
    }

    /// Assemble a firmware preamble. `body_sig` are the raw signature bytes
    /// over the firmware body (`body_len` plaintext bytes); `kernel_subkey`
    /// is a serialized packed key; `signer` signs the preamble itself with
    /// the data key.
    pub fn preamble(
        fw_version: u32,
        flags: u32,
        body_sig: &[u8],
        body_len: u32,
        kernel_subkey: &[u8],
        own_sig_size: u32,
        mut signer: impl FnMut(&[u8]) -> Vec<u8>,
    ) -> Vec<u8> {
        let subkey_end = PRE_SUBKEY_OFFSET + kernel_subkey.len();
        let body_sig_data_off = (subkey_end - PRE_BODY_SIG_OFFSET) as u32;
        let signed_len = (subkey_end + body_sig.len()) as u32;
        let pre_size = signed_len + own_sig_size;
        let mut out = vec![0u8; pre_size as usize];
        out[0..2].copy_from_slice(&PREAMBLE_VERSION_MAJOR.to_le_bytes());
        out[2..4].copy_from_slice(&PREAMBLE_VERSION_MINOR.to_le_bytes());
        out[4..8].copy_from_slice(&pre_size.to_le_bytes());
        out[8..12].copy_from_slice(&fw_version.to_le_bytes());
        out[12..16].copy_from_slice(&flags.to_le_bytes());
        let own_sig_data_off = signed_len - PRE_SIG_OFFSET as u32;
        out[PRE_SIG_OFFSET..PRE_SIG_OFFSET + SIG_HEADER_SIZE]
            .copy_from_slice(&signature_struct(0, signed_len, own_sig_data_off, own_sig_size));
        out[PRE_BODY_SIG_OFFSET..PRE_BODY_SIG_OFFSET + SIG_HEADER_SIZE].copy_from_slice(
            &signature_struct(0, body_len, body_sig_data_off, body_sig.len() as u32),
        );
        out[PRE_SUBKEY_OFFSET..subkey_end].copy_from_slice(kernel_subkey);
        out[subkey_end..signed_len as usize].copy_from_slice(body_sig);

        let sig = signer(&out[..signed_len as usize]);
        debug_assert_eq!(sig.len(), own_sig_size as usize);
        out[signed_len as usize..].copy_from_slice(&sig);
        out
    }
}
