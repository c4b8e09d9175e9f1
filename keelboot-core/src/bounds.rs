// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Overflow-safe containment checks for offsets taken from untrusted images.
//!
//! Every container in a firmware image describes its own layout with
//! (offset, size) pairs. Nothing here trusts those pairs: a member must be
//! proven to lie inside its parent, and a member's payload must be proven to
//! lie inside the parent without overlapping the member's fixed header,
//! before a single payload byte is read. All arithmetic is done in `u64` so
//! a 32-bit offset plus a 32-bit size cannot wrap; an end that does not fit
//! back into 32 bits is reported as a wrap, distinct from merely falling
//! outside the parent.

use thiserror::Error;

/// Containment-check failures, one kind per way an untrusted layout can lie.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BoundsError {
    /// Parent region length is not addressable with 32-bit offsets.
    #[error("parent region wraps 32-bit address arithmetic")]
    ParentWraps,
    /// member_offset + member_size overflows the offset width.
    #[error("member range wraps")]
    MemberWraps,
    /// Member range ends past the parent region.
    #[error("member outside parent")]
    MemberOutside,
    /// data_offset + data_size overflows the offset width.
    #[error("data range wraps")]
    DataWraps,
    /// Data range ends past the parent region.
    #[error("data outside parent")]
    DataOutside,
    /// Data range intersects the member's fixed header.
    #[error("data overlaps member header")]
    DataOverlapsMember,
}

const OFFSET_MAX: u64 = u32::MAX as u64;

/// Check that `[member_offset, member_offset + member_size)` lies inside a
/// parent of `parent_size` bytes.
pub fn check_member(parent_size: u64, member_offset: u32, member_size: u32) -> Result<(), BoundsError> {
    if parent_size > OFFSET_MAX {
        return Err(BoundsError::ParentWraps);
    }
    let end = member_offset as u64 + member_size as u64;
    if end > OFFSET_MAX {
        return Err(BoundsError::MemberWraps);
    }
    if end > parent_size {
        return Err(BoundsError::MemberOutside);
    }
    Ok(())
}

/// Check a member and its payload in one step.
///
/// The payload at `[member_offset + data_offset, + data_size)` must lie
/// inside the parent and must not intersect the member's fixed header at
/// `[member_offset, member_offset + member_size)`. `data_offset` is relative
/// to the member start, as stored in the container headers.
pub fn check_data(
    parent_size: u64,
    member_offset: u32,
    member_size: u32,
    data_offset: u32,
    data_size: u32,
) -> Result<(), BoundsError> {
    check_member(parent_size, member_offset, member_size)?;

    let data_start = member_offset as u64 + data_offset as u64;
    let data_end = data_start + data_size as u64;
    if data_end > OFFSET_MAX {
        return Err(BoundsError::DataWraps);
    }
    if data_end > parent_size {
        return Err(BoundsError::DataOutside);
    }
    if data_size > 0 && (data_offset as u64) < member_size as u64 {
        return Err(BoundsError::DataOverlapsMember);
    }
    Ok(())
}

/// Borrow the payload slice described by a checked (offset, size) pair.
///
/// Runs [`check_data`] first; on success the returned slice is guaranteed to
/// be in-bounds, so the indexing cannot panic.
pub fn payload<'a>(
    parent: &'a [u8],
    member_offset: u32,
    member_size: u32,
    data_offset: u32,
    data_size: u32,
) -> Result<&'a [u8], BoundsError> {
    check_data(parent.len() as u64, member_offset, member_size, data_offset, data_size)?;
    let start = member_offset as usize + data_offset as usize;
    Ok(&parent[start..start + data_size as usize])
}

/// Constant-time byte-slice equality for digests and signatures.
///
/// Accumulates XOR over the full length and compares once at the end, so the
/// position of the first differing byte does not change the work done.
/// Lengths are public; a length mismatch returns early.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}
