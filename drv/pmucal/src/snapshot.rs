// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-layout failure records for a debug snapshot region.
//!
//! A [`FailureRecord`] is what gets copied into memory that survives a
//! reset (or is scraped by a debugger) when a power sequence fails. It is a
//! plain `repr(C)` block of words: a magic number, a checksum, and the
//! failure detail. The checksum is the XOR of every payload word, so a
//! reader can tell a real record from stale or torn memory.

use drv_pmucal_api::{ErrorCode, SeqKind, SequenceFailure};
use enum_map::Enum;
use num_traits::FromPrimitive;
use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const FAILURE_RECORD_MAGIC: u32 = 0x504d_4346; // "PMCF"

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct FailurePayload {
    pub pd: u32,
    pub kind: u32,
    pub step_index: u32,
    pub code: u32,
    pub addr: u32,
    pub expected: u32,
    pub observed: u32,
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct FailureRecord {
    pub magic: u32,
    pub checksum: u32,
    pub payload: FailurePayload,
}

const_assert_eq!(core::mem::size_of::<FailureRecord>(), 36);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SnapshotError {
    /// The region is smaller than a record.
    TooSmall,
    BadMagic,
    BadChecksum,
    /// Magic and checksum are fine but a field holds a value we never write.
    Malformed,
}

impl FailureRecord {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn from_failure(f: &SequenceFailure) -> Self {
        let payload = FailurePayload {
            pd: f.pd,
            kind: f.kind.into_usize() as u32,
            step_index: f.step_index as u32,
            code: f.code as u32,
            addr: f.addr,
            expected: f.expected,
            observed: f.observed,
        };
        Self {
            magic: FAILURE_RECORD_MAGIC,
            checksum: Self::checksum(&payload),
            payload,
        }
    }

    /// Copies the record into the start of `region`.
    pub fn write_to(&self, region: &mut [u8]) -> Result<(), SnapshotError> {
        self.write_to_prefix(region)
            .map_err(|_| SnapshotError::TooSmall)
    }

    /// Reads and checks a record from the start of `region`.
    pub fn read_from(region: &[u8]) -> Result<Self, SnapshotError> {
        let (rec, _) = Self::read_from_prefix(region)
            .map_err(|_| SnapshotError::TooSmall)?;
        if rec.magic != FAILURE_RECORD_MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        if rec.checksum != Self::checksum(&rec.payload) {
            return Err(SnapshotError::BadChecksum);
        }
        Ok(rec)
    }

    /// Decodes the payload back into the failure it was made from.
    pub fn failure(&self) -> Result<SequenceFailure, SnapshotError> {
        let p = &self.payload;
        let kind = p.kind as usize;
        if kind >= SeqKind::LENGTH {
            return Err(SnapshotError::Malformed);
        }
        let code = u8::try_from(p.code)
            .ok()
            .and_then(ErrorCode::from_u8)
            .ok_or(SnapshotError::Malformed)?;

        Ok(SequenceFailure {
            pd: p.pd,
            kind: SeqKind::from_usize(kind),
            step_index: p.step_index as usize,
            code,
            addr: p.addr,
            expected: p.expected,
            observed: p.observed,
        })
    }

    /// XOR of every word of the payload.
    pub fn checksum(payload: &FailurePayload) -> u32 {
        payload
            .as_bytes()
            .chunks_exact(4)
            .map(|w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
            .fold(0, |acc, w| acc ^ w)
    }
}
