// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Collaborators the engine is handed rather than owning.

use crate::{PdId, SequenceFailure};

/// The backend refused a register access, e.g. because `addr` lies outside
/// the window it was given.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BackendFault {
    pub addr: u32,
}

/// Register and secure-monitor access. The engine never maps memory itself;
/// implementations are handed valid accessors by the platform layer.
///
/// Methods take `&self` because the engine is shared between callers; an
/// implementation that needs mutable state must synchronize it.
pub trait PmuBackend {
    fn read32(&self, addr: u32) -> Result<u32, BackendFault>;
    fn write32(&self, addr: u32, value: u32) -> Result<(), BackendFault>;

    /// Issues secure monitor call `id`. Returns the status word (zero on
    /// success) and the first result word.
    fn smc_call(&self, id: u32, args: [u64; 3]) -> (i64, u64);
}

/// Monotonic time and busy delays, in microseconds.
pub trait Timer {
    fn now_us(&self) -> u64;
    fn delay_us(&self, us: u32);
}

/// A hook declined a notification. The transition that triggered it still
/// stands.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HookError;

/// Optional observers of the engine. Every method defaults to doing nothing.
///
/// Hooks run after the engine has let go of the domain, so they may call
/// back into it (to read `last_failure` or `state`, say).
pub trait PmucalHooks {
    /// A domain with `bts_sync` set finished turning on (`on == true`) or
    /// off. Failures are recorded and otherwise ignored.
    fn pd_sync(&self, _pd: PdId, _on: bool) -> Result<(), HookError> {
        Ok(())
    }

    /// Bandwidth scenario update that follows `pd_sync`. Platforms without
    /// scenario support leave this alone.
    fn update_scenario(&self, _pd: PdId, _on: bool) {}

    /// A sequence failed; `failure` is what a snapshot facility would want
    /// to persist.
    fn sequence_failed(&self, _failure: &SequenceFailure) {}
}

/// Hooks that observe nothing.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoHooks;

impl PmucalHooks for NoHooks {}
