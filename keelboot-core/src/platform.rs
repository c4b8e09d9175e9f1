// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Platform capability set.
//!
//! The core never touches hardware directly. Everything the platform can do
//! for us (accelerated crypto, EC I/O, integrity-protected storage) is an
//! operation handle passed in at initialization. "Unsupported" is a
//! first-class answer distinct from "failed": an unsupported capability
//! falls back to the software path, a failed one is surfaced.

use crate::containers::SigAlg;
use heapless::Vec;
use thiserror::Error;

/// Answer from a hardware capability.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CapError {
    /// The platform does not offer this operation; use the software path.
    #[error("operation unsupported by platform")]
    Unsupported,
    /// The platform offers it and it went wrong. Never silently retried.
    #[error("platform operation failed")]
    Failed,
}

/// Hardware crypto acceleration hooks.
///
/// Implementations that accelerate nothing can rely on the defaults, which
/// answer [`CapError::Unsupported`] for everything.
pub trait HwCrypto {
    /// Compute the digest pairing of `alg` over `data` into `out`
    /// (`out.len()` equals the algorithm digest size).
    fn digest(&mut self, alg: SigAlg, data: &[u8], out: &mut [u8]) -> Result<(), CapError> {
        let _ = (alg, data, out);
        Err(CapError::Unsupported)
    }

    /// Verify `sig` over `digest` with the packed key bytes in `key_data`.
    /// A verified signature is `Ok(())`; a mismatch is [`CapError::Failed`].
    fn rsa_verify(
        &mut self,
        alg: SigAlg,
        key_data: &[u8],
        sig: &[u8],
        digest: &[u8],
    ) -> Result<(), CapError> {
        let _ = (alg, key_data, sig, digest);
        Err(CapError::Unsupported)
    }
}

/// A platform with no crypto acceleration at all.
pub struct NoHwCrypto;

impl HwCrypto for NoHwCrypto {}

/// Which EC firmware copy an operation targets. `RwUpdate` exists only on
/// devices that update one RW slot while running the other and switch on
/// reboot; everywhere else the active RW copy is rewritten in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcSlot {
    Ro,
    RwActive,
    RwUpdate,
}

/// EC operation failures. `RebootToRoRequired` is flow control, not damage:
/// the EC has locked out further jumps and must be cold-reset before the
/// sync flow can continue.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EcError {
    #[error("EC must reboot to RO")]
    RebootToRoRequired,
    #[error("EC image hash read failed")]
    HashReadFailed,
    #[error("EC hash size mismatch")]
    HashSizeMismatch,
    #[error("EC flash update failed")]
    UpdateFailed,
    #[error("EC jump to RW failed")]
    JumpFailed,
    #[error("EC write-protect failed")]
    ProtectFailed,
    #[error("cannot determine which EC image is running")]
    UnknownImage,
}

/// Longest digest the EC sync protocol carries.
pub const EC_HASH_MAX: usize = 64;

/// An EC image digest as reported over the host interface.
pub type EcHash = Vec<u8, EC_HASH_MAX>;

/// The embedded controller, as seen from the application processor.
pub trait EcController {
    /// Does this device do EC software sync at all?
    fn sync_supported(&self) -> bool {
        true
    }

    /// Is the EC currently executing its RW image?
    fn running_rw(&mut self) -> Result<bool, EcError>;

    /// Digest of what is actually in the given EC flash slot right now.
    fn live_hash(&mut self, slot: EcSlot) -> Result<EcHash, EcError>;

    /// Digest the main firmware expects for the given slot.
    fn expected_hash(&mut self, slot: EcSlot) -> Result<EcHash, EcError>;

    /// Reflash the slot from the image bundled with main firmware.
    fn update_image(&mut self, slot: EcSlot) -> Result<(), EcError>;

    /// Ask the EC to jump from RO into its RW image.
    fn jump_to_rw(&mut self) -> Result<(), EcError>;

    /// Lock out further jumps until the next EC reset.
    fn disable_jump(&mut self) -> Result<(), EcError>;

    /// Enable write protection on the given slot.
    fn set_protect(&mut self, slot: EcSlot) -> Result<(), EcError>;

    /// Device updates the inactive RW slot and switches on reboot.
    fn supports_late_switch(&self) -> bool;

    /// Reflashing is slow enough that the caller should put up a wait
    /// indicator before phase 2 runs.
    fn updates_slowly(&self) -> bool;

    /// Sync finished for this boot; the platform may release EC resources.
    fn sync_complete(&mut self) {}
}

/// Integrity-protected storage failures are never retried within a boot.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("secure storage read failed")]
    ReadFailed,
    #[error("secure storage write failed")]
    WriteFailed,
}

/// The platform's integrity-protected storage (TPM or equivalent). The
/// record content is opaque to the platform; CRC and monotonicity policy
/// live in [`crate::secdata`].
pub trait SecureStore {
    fn read(&mut self, out: &mut [u8; crate::secdata::RECORD_SIZE]) -> Result<(), StoreError>;
    fn write(&mut self, rec: &[u8; crate::secdata::RECORD_SIZE]) -> Result<(), StoreError>;
}

/// Operation handles for one boot, threaded through the core as one record.
pub struct Platform<'a> {
    pub crypto: &'a mut dyn HwCrypto,
    pub ec: &'a mut dyn EcController,
    pub secure: &'a mut dyn SecureStore,
}
