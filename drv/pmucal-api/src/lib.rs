// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! API crate for the PMUCAL power-domain sequencer.
//!
//! This holds everything a platform power-management layer needs to describe
//! its power domains and talk to the engine in `drv-pmucal`: the static
//! domain table types, the sequence step vocabulary, the collaborator traits
//! the engine is handed at construction, and the error types it returns.

#![no_std]

mod backend;
mod desc;

pub use backend::{BackendFault, HookError, NoHooks, PmuBackend, PmucalHooks, Timer};
pub use desc::{PowerDomainDesc, Sequence, Step};

use core::fmt;
use enum_map::Enum;
use num_derive::{FromPrimitive, ToPrimitive};

/// Power domain identifier. Ids are small and dense; they index the registry
/// directly.
pub type PdId = u32;

/// Upper bound on domain ids. On Exynos parts the number of power domains is
/// well below this.
pub const PMUCAL_NUM_PDS: usize = 40;

/// Upper bound on `Save` steps in one domain's save sequence.
pub const PMUCAL_MAX_SAVE_REGS: usize = 32;

/// The transitions a domain descriptor can carry a sequence for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum)]
pub enum SeqKind {
    On,
    Off,
    Save,
    Status,
    CmuInit,
}

/// What the engine believes about a domain's power.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PdState {
    On,
    Off,
    /// A transition failed partway, or nothing has been learned yet. Cleared
    /// by the next successful transition or status read.
    Unknown,
}

impl From<bool> for PdState {
    fn from(on: bool) -> Self {
        if on {
            PdState::On
        } else {
            PdState::Off
        }
    }
}

/// Value observed by the final step of a `status` sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatusValue {
    /// Register contents after masking.
    pub value: u32,
    /// Whether `value` equalled the step's expectation; for a status
    /// sequence this is the "domain is on" answer.
    pub matched: bool,
}

/// How the engine reacts to enable-while-on and disable-while-off.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TransitionPolicy {
    /// Record the oddity in the trace buffer and run the sequence anyway.
    #[default]
    Permissive,
    /// Refuse with `InvalidStateTransition`.
    Strict,
}

/// Engine tunables.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub policy: TransitionPolicy,
    /// Spacing between reads of a `Poll` step.
    pub poll_interval_us: u32,
}

impl Config {
    pub const DEFAULT: Self = Self {
        policy: TransitionPolicy::Permissive,
        poll_interval_us: 10,
    };

    pub const fn strict() -> Self {
        Self {
            policy: TransitionPolicy::Strict,
            ..Self::DEFAULT
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Failure of a single step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepError {
    /// A `Poll` never saw `(read & mask) == expected` within `timeout_ms`.
    Timeout {
        addr: u32,
        mask: u32,
        expected: u32,
        observed: u32,
        timeout_ms: u32,
    },
    /// The secure monitor returned a non-zero status.
    SmcFailure { id: u32, status: i64 },
    /// The backend refused the access.
    Fault(BackendFault),
    /// More `Save` steps ran than the save area holds.
    SaveAreaFull,
}

impl From<BackendFault> for StepError {
    fn from(f: BackendFault) -> Self {
        StepError::Fault(f)
    }
}

impl StepError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StepError::Timeout { .. } => ErrorCode::StepTimeout,
            StepError::SmcFailure { .. } => ErrorCode::SmcFailure,
            StepError::Fault(_) => ErrorCode::BackendFault,
            StepError::SaveAreaFull => ErrorCode::SaveAreaFull,
        }
    }
}

/// A step failed, which aborted the rest of its sequence. Steps before
/// `step_index` have taken effect and are not undone.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SequenceError {
    pub pd: PdId,
    pub kind: SeqKind,
    pub step_index: usize,
    pub cause: StepError,
}

/// Problems found while validating a domain table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    EmptyTable,
    IdOutOfRange,
    DuplicateId,
    /// A `Read` or `Poll` expects bits its mask discards.
    ExpectOutsideMask { kind: SeqKind, step_index: usize },
    /// A `Poll` with a zero timeout could never succeed after a miss.
    ZeroTimeout { kind: SeqKind, step_index: usize },
    /// The last step of a non-empty `status` sequence reads nothing.
    StatusNotObservable,
    TooManySavedRegisters,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PmucalError {
    UnknownDomain(PdId),
    NotInitialized,
    AlreadyInitialized,
    InvalidConfig { pd: PdId, error: ConfigError },
    /// A setter was called after the domain's first transition.
    LateConfiguration(PdId),
    /// Strict mode refused enable-while-on or disable-while-off.
    InvalidStateTransition { pd: PdId, from: PdState, to: PdState },
    /// There is no status sequence and the tracked state is unknown.
    StateUnknown(PdId),
    Sequence(SequenceError),
}

impl From<SequenceError> for PmucalError {
    fn from(e: SequenceError) -> Self {
        PmucalError::Sequence(e)
    }
}

impl PmucalError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PmucalError::UnknownDomain(_) => ErrorCode::UnknownDomain,
            PmucalError::NotInitialized => ErrorCode::NotInitialized,
            PmucalError::AlreadyInitialized => ErrorCode::AlreadyInitialized,
            PmucalError::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            PmucalError::LateConfiguration(_) => ErrorCode::LateConfiguration,
            PmucalError::InvalidStateTransition { .. } => {
                ErrorCode::InvalidStateTransition
            }
            PmucalError::StateUnknown(_) => ErrorCode::StateUnknown,
            PmucalError::Sequence(e) => e.cause.code(),
        }
    }
}

impl fmt::Display for PmucalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PmucalError::UnknownDomain(pd) => write!(f, "unknown power domain {pd}"),
            PmucalError::NotInitialized => write!(f, "pmucal not initialized"),
            PmucalError::AlreadyInitialized => {
                write!(f, "pmucal already initialized")
            }
            PmucalError::InvalidConfig { pd, error } => {
                write!(f, "domain {pd}: bad descriptor: {error:?}")
            }
            PmucalError::LateConfiguration(pd) => {
                write!(f, "domain {pd}: configured after first transition")
            }
            PmucalError::InvalidStateTransition { pd, from, to } => {
                write!(f, "domain {pd}: refusing {from:?} -> {to:?}")
            }
            PmucalError::StateUnknown(pd) => {
                write!(f, "domain {pd}: power state unknown")
            }
            PmucalError::Sequence(e) => write!(
                f,
                "domain {}: {:?} sequence failed at step {}: {:?}",
                e.pd, e.kind, e.step_index, e.cause
            ),
        }
    }
}

/// Compact, integer-representable error kind, for trace entries and for
/// callers that speak C-style return codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum ErrorCode {
    UnknownDomain = 1,
    NotInitialized,
    AlreadyInitialized,
    InvalidConfig,
    LateConfiguration,
    InvalidStateTransition,
    StateUnknown,
    StepTimeout,
    SmcFailure,
    BackendFault,
    SaveAreaFull,
}

impl ErrorCode {
    /// Negative errno equivalent, as the platform power-domain framework
    /// expects from its callbacks.
    pub fn to_errno(self) -> i32 {
        const EPERM: i32 = 1;
        const EIO: i32 = 5;
        const EBUSY: i32 = 16;
        const ENODEV: i32 = 19;
        const EINVAL: i32 = 22;
        const ENOSPC: i32 = 28;
        const ETIMEDOUT: i32 = 110;
        const EALREADY: i32 = 114;

        let errno = match self {
            ErrorCode::UnknownDomain => ENODEV,
            ErrorCode::NotInitialized => EPERM,
            ErrorCode::AlreadyInitialized => EALREADY,
            ErrorCode::InvalidConfig => EINVAL,
            ErrorCode::LateConfiguration => EBUSY,
            ErrorCode::InvalidStateTransition => EINVAL,
            ErrorCode::StateUnknown => EIO,
            ErrorCode::StepTimeout => ETIMEDOUT,
            ErrorCode::SmcFailure => EIO,
            ErrorCode::BackendFault => EIO,
            ErrorCode::SaveAreaFull => ENOSPC,
        };
        -errno
    }
}

/// Failure detail handed to the debug/snapshot collaborator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SequenceFailure {
    pub pd: PdId,
    pub kind: SeqKind,
    pub step_index: usize,
    pub code: ErrorCode,
    /// Register (or SMC function id) the failing step touched.
    pub addr: u32,
    pub expected: u32,
    pub observed: u32,
}

impl From<&SequenceError> for SequenceFailure {
    fn from(e: &SequenceError) -> Self {
        let (addr, expected, observed) = match e.cause {
            StepError::Timeout {
                addr,
                expected,
                observed,
                ..
            } => (addr, expected, observed),
            // The status word is truncated; the low bits are what secure
            // monitors put their error codes in.
            StepError::SmcFailure { id, status } => (id, 0, status as u32),
            StepError::Fault(f) => (f.addr, 0, 0),
            StepError::SaveAreaFull => (0, 0, 0),
        };
        Self {
            pd: e.pd,
            kind: e.kind,
            step_index: e.step_index,
            code: e.cause.code(),
            addr,
            expected,
            observed,
        }
    }
}
