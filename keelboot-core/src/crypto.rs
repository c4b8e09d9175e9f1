// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! RSA-PKCS#1 v1.5 signature verification with hardware dispatch.
//!
//! Verification prefers the platform's accelerator when the caller permits
//! it; an "unsupported" answer falls through to the software path, any other
//! hardware error is returned verbatim. The software path does the modular
//! exponentiation with the key's public exponent, strips the v1.5 padding
//! itself, and compares the embedded digest with the constant-time compare,
//! so padding-malformed and digest-mismatch stay distinct failures.

use crate::bounds::ct_eq;
use crate::containers::{PackedKey, SigAlg, SignatureView};
use crate::platform::{CapError, HwCrypto};
use crate::workbuf::{WorkBuf, WorkBufError};
use alloc::vec::Vec;
use digest::Digest;
use rsa::BigUint;
use sha2::{Sha256, Sha512};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SigError {
    /// Signature byte-count differs from the algorithm's expected size.
    #[error("wrong signature size")]
    WrongSize,
    /// Digest length is zero or not the algorithm's digest size.
    #[error("unsupported digest size")]
    DigestSize,
    /// Signed length exceeds the payload actually provided.
    #[error("signed range exceeds payload")]
    SignedRange,
    /// No scratch room left for the decrypted signature or digest.
    #[error("work buffer exhausted")]
    WorkbufExhausted,
    /// The decrypted signature is not a well-formed v1.5 block.
    #[error("signature padding malformed")]
    PaddingMalformed,
    /// Padding is fine, the embedded digest is not ours.
    #[error("digest mismatch")]
    Mismatch,
    /// Key bytes do not decode to (exponent, modulus) of the tagged width.
    #[error("packed key data malformed")]
    KeyMalformed,
    /// The hardware path failed for a reason other than "unsupported".
    #[error("hardware crypto failed")]
    Hardware,
}

impl From<WorkBufError> for SigError {
    fn from(_: WorkBufError) -> Self {
        SigError::WorkbufExhausted
    }
}

/// ASN.1 DigestInfo prefixes for the supported hashes.
const SHA256_PREFIX: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    0x05, 0x00, 0x04, 0x20,
];
const SHA512_PREFIX: [u8; 19] = [
    0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03,
    0x05, 0x00, 0x04, 0x40,
];

fn digest_prefix(alg: SigAlg) -> &'static [u8] {
    match alg.digest_size() {
        32 => &SHA256_PREFIX,
        _ => &SHA512_PREFIX,
    }
}

/// Split packed-key data into (public exponent, big-endian modulus).
///
/// Layout: `[u32 LE exponent][u32 LE modulus length][modulus]`, with the
/// modulus length required to match the algorithm tag.
pub fn decode_key<'a>(key: &'a PackedKey<'a>) -> Result<(u32, &'a [u8]), SigError> {
    let data = key.key_data();
    if data.len() < 8 {
        return Err(SigError::KeyMalformed);
    }
    let exponent = u32::from_le_bytes(data[0..4].try_into().expect("validated"));
    let mod_len = u32::from_le_bytes(data[4..8].try_into().expect("validated")) as usize;
    if mod_len != key.algorithm().sig_size() || data.len() - 8 != mod_len {
        return Err(SigError::KeyMalformed);
    }
    if exponent == 0 {
        return Err(SigError::KeyMalformed);
    }
    Ok((exponent, &data[8..]))
}

/// Verify `sig` over an already-computed `digest` with `key`.
///
/// `allow_hw` reflects whether the key permits hardware acceleration for
/// this verification; the fallback rules are in the module docs.
pub fn verify_digest(
    key: &PackedKey<'_>,
    sig: &SignatureView<'_>,
    digest: &[u8],
    wb: &mut WorkBuf<'_>,
    hw: &mut dyn HwCrypto,
    allow_hw: bool,
) -> Result<(), SigError> {
    let alg = key.algorithm();
    let sig_bytes = sig.sig_bytes();
    if sig_bytes.len() != alg.sig_size() {
        return Err(SigError::WrongSize);
    }
    if digest.is_empty() || digest.len() != alg.digest_size() {
        return Err(SigError::DigestSize);
    }

    if allow_hw {
        match hw.rsa_verify(alg, key.key_data(), sig_bytes, digest) {
            Ok(()) => return Ok(()),
            Err(CapError::Unsupported) => {}
            Err(CapError::Failed) => return Err(SigError::Hardware),
        }
    }

    software_verify(key, sig_bytes, digest, wb)
}

fn software_verify(
    key: &PackedKey<'_>,
    sig_bytes: &[u8],
    digest: &[u8],
    wb: &mut WorkBuf<'_>,
) -> Result<(), SigError> {
    let (exponent, modulus_be) = decode_key(key)?;
    let k = modulus_be.len();

    let n = BigUint::from_bytes_be(modulus_be);
    let s = BigUint::from_bytes_be(sig_bytes);
    if s >= n {
        return Err(SigError::Mismatch);
    }

    // em = s^e mod n, left-padded back out to the modulus width.
    let em_big: Vec<u8> = s.modpow(&BigUint::from(exponent), &n).to_bytes_be();
    let em_alloc = wb.alloc(k)?;
    {
        let em = wb.bytes_mut(&em_alloc);
        em.fill(0);
        em[k - em_big.len()..].copy_from_slice(&em_big);
    }

    let result = check_padding(wb.bytes(&em_alloc), digest_prefix(key.algorithm()), digest);
    wb.free(k)?;
    result
}

/// Parse `0x00 0x01 FF.. 0x00 DigestInfo digest` and compare the tail.
fn check_padding(em: &[u8], prefix: &[u8], digest: &[u8]) -> Result<(), SigError> {
    let tail = prefix.len() + digest.len();
    // At least 8 bytes of 0xFF padding per PKCS#1 v1.5.
    if em.len() < tail + 11 {
        return Err(SigError::PaddingMalformed);
    }
    if em[0] != 0x00 || em[1] != 0x01 {
        return Err(SigError::PaddingMalformed);
    }
    let pad_end = em.len() - tail - 1;
    if em[2..pad_end].iter().any(|&b| b != 0xFF) || em[pad_end] != 0x00 {
        return Err(SigError::PaddingMalformed);
    }
    if !ct_eq(&em[pad_end + 1..pad_end + 1 + prefix.len()], prefix) {
        return Err(SigError::PaddingMalformed);
    }
    if !ct_eq(&em[em.len() - digest.len()..], digest) {
        return Err(SigError::Mismatch);
    }
    Ok(())
}

/// Digest `data` with the hash half of `alg`, preferring hardware.
///
/// The digest lands in a work-buffer allocation the caller must free
/// (`alg.digest_size()` bytes).
pub fn digest_data(
    data: &[u8],
    alg: SigAlg,
    wb: &mut WorkBuf<'_>,
    hw: &mut dyn HwCrypto,
    allow_hw: bool,
) -> Result<crate::workbuf::Alloc, SigError> {
    let out = wb.alloc(alg.digest_size())?;

    if allow_hw {
        match hw.digest(alg, data, wb.bytes_mut(&out)) {
            Ok(()) => return Ok(out),
            Err(CapError::Unsupported) => {}
            Err(CapError::Failed) => {
                wb.free(alg.digest_size())?;
                return Err(SigError::Hardware);
            }
        }
    }

    match alg.digest_size() {
        32 => wb.bytes_mut(&out).copy_from_slice(&Sha256::digest(data)),
        _ => wb.bytes_mut(&out).copy_from_slice(&Sha512::digest(data)),
    }
    Ok(out)
}

/// Digest `data` and verify `sig` over it in one step.
///
/// Only the first `signed_length` bytes of `data` are covered; the caller
/// passes the whole region and the signature says how much of it counts.
pub fn verify_data(
    data: &[u8],
    sig: &SignatureView<'_>,
    key: &PackedKey<'_>,
    wb: &mut WorkBuf<'_>,
    hw: &mut dyn HwCrypto,
    allow_hw: bool,
) -> Result<(), SigError> {
    let signed_len = sig.signed_length() as usize;
    if signed_len > data.len() {
        return Err(SigError::SignedRange);
    }
    let alg = key.algorithm();
    let digest = digest_data(&data[..signed_len], alg, wb, hw, allow_hw)?;
    let result = {
        // The digest allocation is read back out of the work buffer before
        // verify_digest allocates on top of it.
        let mut digest_copy = [0u8; 64];
        let d = &mut digest_copy[..alg.digest_size()];
        d.copy_from_slice(wb.bytes(&digest));
        verify_digest(key, sig, d, wb, hw, allow_hw)
    };
    wb.free(alg.digest_size())?;
    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::containers::build;
    use crate::platform::NoHwCrypto;
    use alloc::vec;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rsa::traits::{PrivateKeyParts, PublicKeyParts};
    use rsa::{Pkcs1v15Sign, RsaPrivateKey};
    use std::sync::OnceLock;

    pub(crate) fn test_rsa_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| {
            let mut rng = StdRng::seed_from_u64(0x6b65656c);
            RsaPrivateKey::new(&mut rng, 2048).expect("keygen")
        })
    }

    fn packed(key: &RsaPrivateKey, version: u16) -> alloc::vec::Vec<u8> {
        let exponent = key.e().to_bytes_be().iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
        build::packed_key(SigAlg::Rsa2048Sha256, version, exponent, &key.n().to_bytes_be())
    }

    fn sig_struct_over(sig: &[u8], signed_len: u32) -> alloc::vec::Vec<u8> {
        let mut raw = vec![0u8; 16 + sig.len()];
        raw[0..4].copy_from_slice(&0u32.to_le_bytes());
        raw[4..8].copy_from_slice(&signed_len.to_le_bytes());
        raw[8..12].copy_from_slice(&16u32.to_le_bytes());
        raw[12..16].copy_from_slice(&(sig.len() as u32).to_le_bytes());
        raw
    }

    fn sign_digest(key: &RsaPrivateKey, digest: &[u8]) -> alloc::vec::Vec<u8> {
        key.sign(Pkcs1v15Sign::new::<sha2::Sha256>(), digest).expect("sign")
    }

    #[test]
    fn test_verify_digest_good() {
        let key = test_rsa_key();
        let packed_bytes = packed(key, 1);
        let pk = PackedKey::verify_and_open(&packed_bytes).unwrap();

        let digest = Sha256::digest(b"firmware body");
        let sig = sign_digest(key, &digest);
        let raw = sig_struct_over(&sig, 13);
        let sv = SignatureView::verify_and_open(&raw).unwrap();

        let mut mem = [0u8; 2048];
        let mut wb = WorkBuf::new(&mut mem);
        assert_eq!(
            verify_digest(&pk, &sv, &digest, &mut wb, &mut NoHwCrypto, true),
            Ok(())
        );
        // All scratch released.
        assert_eq!(wb.used(), 0);
    }

    #[test]
    fn test_verify_digest_mismatch() {
        let key = test_rsa_key();
        let packed_bytes = packed(key, 1);
        let pk = PackedKey::verify_and_open(&packed_bytes).unwrap();

        let digest = Sha256::digest(b"firmware body");
        let sig = sign_digest(key, &digest);
        let raw = sig_struct_over(&sig, 13);
        let sv = SignatureView::verify_and_open(&raw).unwrap();

        let other = Sha256::digest(b"other body");
        let mut mem = [0u8; 2048];
        let mut wb = WorkBuf::new(&mut mem);
        assert_eq!(
            verify_digest(&pk, &sv, &other, &mut wb, &mut NoHwCrypto, false),
            Err(SigError::Mismatch)
        );
    }

    #[test]
    fn test_verify_digest_wrong_sig_size() {
        let key = test_rsa_key();
        let packed_bytes = packed(key, 1);
        let pk = PackedKey::verify_and_open(&packed_bytes).unwrap();

        let raw = sig_struct_over(&[0u8; 128], 13);
        let sv = SignatureView::verify_and_open(&raw).unwrap();
        let digest = Sha256::digest(b"x");
        let mut mem = [0u8; 2048];
        let mut wb = WorkBuf::new(&mut mem);
        assert_eq!(
            verify_digest(&pk, &sv, &digest, &mut wb, &mut NoHwCrypto, false),
            Err(SigError::WrongSize)
        );
    }

    #[test]
    fn test_verify_digest_bad_digest_size() {
        let key = test_rsa_key();
        let packed_bytes = packed(key, 1);
        let pk = PackedKey::verify_and_open(&packed_bytes).unwrap();

        let sig = sign_digest(key, &Sha256::digest(b"x"));
        let raw = sig_struct_over(&sig, 1);
        let sv = SignatureView::verify_and_open(&raw).unwrap();
        let mut mem = [0u8; 2048];
        let mut wb = WorkBuf::new(&mut mem);
        assert_eq!(
            verify_digest(&pk, &sv, &[0u8; 20], &mut wb, &mut NoHwCrypto, false),
            Err(SigError::DigestSize)
        );
        assert_eq!(
            verify_digest(&pk, &sv, &[], &mut wb, &mut NoHwCrypto, false),
            Err(SigError::DigestSize)
        );
    }

    #[test]
    fn test_padding_malformed_detected() {
        let key = test_rsa_key();
        let packed_bytes = packed(key, 1);
        let pk = PackedKey::verify_and_open(&packed_bytes).unwrap();

        // Forge a raw signature over a block with broken padding: flip the
        // 0x01 marker. s = em^d mod n.
        let digest = Sha256::digest(b"payload");
        let k = 256;
        let mut em = vec![0xFFu8; k];
        em[0] = 0x00;
        em[1] = 0x02; // wrong marker
        let tail = SHA256_PREFIX.len() + 32;
        em[k - tail - 1] = 0x00;
        em[k - tail..k - 32].copy_from_slice(&SHA256_PREFIX);
        em[k - 32..].copy_from_slice(&digest);

        let s = BigUint::from_bytes_be(&em).modpow(key.d(), key.n());
        let mut sig = vec![0u8; k];
        let s_bytes = s.to_bytes_be();
        sig[k - s_bytes.len()..].copy_from_slice(&s_bytes);

        let raw = sig_struct_over(&sig, 7);
        let sv = SignatureView::verify_and_open(&raw).unwrap();
        let mut mem = [0u8; 2048];
        let mut wb = WorkBuf::new(&mut mem);
        assert_eq!(
            verify_digest(&pk, &sv, &digest, &mut wb, &mut NoHwCrypto, false),
            Err(SigError::PaddingMalformed)
        );
    }

    #[test]
    fn test_workbuf_exhausted() {
        let key = test_rsa_key();
        let packed_bytes = packed(key, 1);
        let pk = PackedKey::verify_and_open(&packed_bytes).unwrap();

        let digest = Sha256::digest(b"firmware body");
        let sig = sign_digest(key, &digest);
        let raw = sig_struct_over(&sig, 13);
        let sv = SignatureView::verify_and_open(&raw).unwrap();

        let mut mem = [0u8; 64];
        let mut wb = WorkBuf::new(&mut mem);
        assert_eq!(
            verify_digest(&pk, &sv, &digest, &mut wb, &mut NoHwCrypto, false),
            Err(SigError::WorkbufExhausted)
        );
    }

    #[test]
    fn test_verify_data_end_to_end() {
        let key = test_rsa_key();
        let packed_bytes = packed(key, 1);
        let pk = PackedKey::verify_and_open(&packed_bytes).unwrap();

        let body = vec![0xC3u8; 4096];
        let digest = Sha256::digest(&body);
        let sig = sign_digest(key, &digest);
        let raw = sig_struct_over(&sig, body.len() as u32);
        let sv = SignatureView::verify_and_open(&raw).unwrap();

        let mut mem = [0u8; 2048];
        let mut wb = WorkBuf::new(&mut mem);
        assert_eq!(
            verify_data(&body, &sv, &pk, &mut wb, &mut NoHwCrypto, true),
            Ok(())
        );
        assert_eq!(wb.used(), 0);

        // One flipped body byte flips the verdict.
        let mut bad = body.clone();
        bad[100] ^= 1;
        assert_eq!(
            verify_data(&bad, &sv, &pk, &mut wb, &mut NoHwCrypto, true),
            Err(SigError::Mismatch)
        );
    }

    #[test]
    fn test_verify_data_signed_range() {
        let key = test_rsa_key();
        let packed_bytes = packed(key, 1);
        let pk = PackedKey::verify_and_open(&packed_bytes).unwrap();
        let sig = sign_digest(key, &Sha256::digest(b"x"));
        let raw = sig_struct_over(&sig, 100);
        let sv = SignatureView::verify_and_open(&raw).unwrap();
        let mut mem = [0u8; 2048];
        let mut wb = WorkBuf::new(&mut mem);
        assert_eq!(
            verify_data(&[0u8; 50], &sv, &pk, &mut wb, &mut NoHwCrypto, false),
            Err(SigError::SignedRange)
        );
    }

    struct FailingHw;
    impl HwCrypto for FailingHw {
        fn rsa_verify(&mut self, _: SigAlg, _: &[u8], _: &[u8], _: &[u8]) -> Result<(), CapError> {
            Err(CapError::Failed)
        }
    }

    #[test]
    fn test_hardware_failure_is_fatal_not_fallback() {
        let key = test_rsa_key();
        let packed_bytes = packed(key, 1);
        let pk = PackedKey::verify_and_open(&packed_bytes).unwrap();
        let digest = Sha256::digest(b"firmware body");
        let sig = sign_digest(key, &digest);
        let raw = sig_struct_over(&sig, 13);
        let sv = SignatureView::verify_and_open(&raw).unwrap();
        let mut mem = [0u8; 2048];
        let mut wb = WorkBuf::new(&mut mem);

        // Permitted + hardware fails hard: surfaced, not retried in software.
        assert_eq!(
            verify_digest(&pk, &sv, &digest, &mut wb, &mut FailingHw, true),
            Err(SigError::Hardware)
        );
        // Not permitted: hardware never consulted, software verifies.
        assert_eq!(
            verify_digest(&pk, &sv, &digest, &mut wb, &mut FailingHw, false),
            Ok(())
        );
    }
}
