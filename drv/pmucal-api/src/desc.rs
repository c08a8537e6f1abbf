// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static description of power domains and the steps that move them.
//!
//! Tables are meant to live in `static`s and be built with the `const`
//! constructors here, e.g.:
//!
//! ```
//! static MFC_ON: [Step; 2] = [
//!     Step::write(0x1000, 0x1),
//!     Step::poll(0x1004, 0x1, 0x1, 50),
//! ];
//! static PDS: [PowerDomainDesc; 1] =
//!     [PowerDomainDesc::new(3, "MFC").on(&MFC_ON)];
//! ```

use crate::{PdId, SeqKind};

/// One primitive hardware action.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Write `value` to the bits of `addr` selected by `mask`. With an
    /// all-ones mask this is a plain store; otherwise the register is read,
    /// the masked bits replaced, and the result written back.
    Write { addr: u32, mask: u32, value: u32 },
    /// Read `addr` and compare the masked value to `expect`. A mismatch is
    /// reported, not treated as failure.
    Read { addr: u32, mask: u32, expect: u32 },
    /// Read `addr` until `(value & mask) == expect`, giving up after
    /// `timeout_ms`.
    Poll {
        addr: u32,
        mask: u32,
        expect: u32,
        timeout_ms: u32,
    },
    Delay { us: u32 },
    /// Secure monitor call; any non-zero status is a failure.
    Smc { id: u32, args: [u64; 3] },
    /// Read `addr` into the domain's save area, to be written back after the
    /// next power-on.
    Save { addr: u32 },
}

impl Step {
    pub const fn write(addr: u32, value: u32) -> Self {
        Step::Write {
            addr,
            mask: u32::MAX,
            value,
        }
    }

    pub const fn write_masked(addr: u32, mask: u32, value: u32) -> Self {
        Step::Write { addr, mask, value }
    }

    pub const fn read(addr: u32, mask: u32, expect: u32) -> Self {
        Step::Read { addr, mask, expect }
    }

    pub const fn poll(addr: u32, mask: u32, expect: u32, timeout_ms: u32) -> Self {
        Step::Poll {
            addr,
            mask,
            expect,
            timeout_ms,
        }
    }

    pub const fn delay_us(us: u32) -> Self {
        Step::Delay { us }
    }

    pub const fn smc(id: u32, args: [u64; 3]) -> Self {
        Step::Smc { id, args }
    }

    pub const fn save(addr: u32) -> Self {
        Step::Save { addr }
    }

    /// Whether this step produces an observed register value.
    pub fn observes(&self) -> bool {
        matches!(self, Step::Read { .. } | Step::Poll { .. } | Step::Save { .. })
    }
}

/// An ordered run of steps. Each step may depend on the hardware state the
/// previous one left behind, so order is significant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Sequence(pub &'static [Step]);

impl Sequence {
    pub const EMPTY: Self = Sequence(&[]);

    pub fn steps(&self) -> &'static [Step] {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A power domain: identity, its sequences, and control flags.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PowerDomainDesc {
    pub id: PdId,
    /// For diagnostics only.
    pub name: &'static str,
    pub cmu_init: Option<Sequence>,
    pub on: Sequence,
    pub save: Sequence,
    pub off: Sequence,
    pub status: Sequence,
    /// Route this domain's register accesses through the secure monitor.
    pub need_smc: bool,
    /// Assume the domain is powered when the engine starts.
    pub first_on: bool,
    /// Tell the bandwidth/traffic-shaping collaborator about transitions.
    pub bts_sync: bool,
}

impl PowerDomainDesc {
    pub const fn new(id: PdId, name: &'static str) -> Self {
        Self {
            id,
            name,
            cmu_init: None,
            on: Sequence::EMPTY,
            save: Sequence::EMPTY,
            off: Sequence::EMPTY,
            status: Sequence::EMPTY,
            need_smc: false,
            first_on: false,
            bts_sync: false,
        }
    }

    pub const fn on(mut self, steps: &'static [Step]) -> Self {
        self.on = Sequence(steps);
        self
    }

    pub const fn off(mut self, steps: &'static [Step]) -> Self {
        self.off = Sequence(steps);
        self
    }

    pub const fn save(mut self, steps: &'static [Step]) -> Self {
        self.save = Sequence(steps);
        self
    }

    pub const fn status(mut self, steps: &'static [Step]) -> Self {
        self.status = Sequence(steps);
        self
    }

    pub const fn cmu_init(mut self, steps: &'static [Step]) -> Self {
        self.cmu_init = Some(Sequence(steps));
        self
    }

    pub const fn need_smc(mut self, need_smc: bool) -> Self {
        self.need_smc = need_smc;
        self
    }

    pub const fn first_on(mut self, first_on: bool) -> Self {
        self.first_on = first_on;
        self
    }

    pub const fn bts_sync(mut self, bts_sync: bool) -> Self {
        self.bts_sync = bts_sync;
        self
    }

    /// The sequence for `kind`; an absent `cmu_init` reads as empty.
    pub fn sequence(&self, kind: SeqKind) -> Sequence {
        match kind {
            SeqKind::On => self.on,
            SeqKind::Off => self.off,
            SeqKind::Save => self.save,
            SeqKind::Status => self.status,
            SeqKind::CmuInit => self.cmu_init.unwrap_or(Sequence::EMPTY),
        }
    }
}
