// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The domain registry: the validated descriptor table, indexed by id, plus
//! the runtime state the engine keeps for each domain.

use drv_pmucal_api::{
    ConfigError, PdId, PdState, PmucalError, PowerDomainDesc, SeqKind,
    SequenceFailure, Step, PMUCAL_MAX_SAVE_REGS, PMUCAL_NUM_PDS,
};
use spin::Mutex;

use crate::dbg::DomainStats;

/// Mutable per-domain state. Each slot sits behind its own lock, which is
/// held for the whole of any sequence run on that domain.
pub(crate) struct DomainSlot {
    pub need_smc: bool,
    pub first_on: bool,
    pub state: PdState,
    /// Set once an on or off sequence has been attempted; the setters are
    /// refused after that.
    pub transitioned: bool,
    pub cmu_init_pending: bool,
    /// (address, value) pairs captured by the last save sequence.
    pub saved: heapless::Vec<(u32, u32), PMUCAL_MAX_SAVE_REGS>,
    pub stats: DomainStats,
    pub last_failure: Option<SequenceFailure>,
}

impl DomainSlot {
    fn vacant() -> Self {
        Self {
            need_smc: false,
            first_on: false,
            state: PdState::Unknown,
            transitioned: false,
            cmu_init_pending: false,
            saved: heapless::Vec::new(),
            stats: DomainStats::default(),
            last_failure: None,
        }
    }

    fn load(desc: &PowerDomainDesc) -> Self {
        Self {
            need_smc: desc.need_smc,
            first_on: desc.first_on,
            state: PdState::from(desc.first_on),
            cmu_init_pending: desc.cmu_init.is_some_and(|s| !s.is_empty()),
            ..Self::vacant()
        }
    }
}

pub(crate) struct Registry {
    descs: [Option<&'static PowerDomainDesc>; PMUCAL_NUM_PDS],
    slots: [Mutex<DomainSlot>; PMUCAL_NUM_PDS],
    count: usize,
}

impl Registry {
    pub fn load(table: &'static [PowerDomainDesc]) -> Result<Self, PmucalError> {
        validate(table)?;

        let mut descs = [None; PMUCAL_NUM_PDS];
        let slots = core::array::from_fn(|i| {
            match table.iter().find(|d| d.id as usize == i) {
                Some(desc) => {
                    descs[i] = Some(desc);
                    Mutex::new(DomainSlot::load(desc))
                }
                None => Mutex::new(DomainSlot::vacant()),
            }
        });

        Ok(Self {
            descs,
            slots,
            count: table.len(),
        })
    }

    pub fn lookup(
        &self,
        pd: PdId,
    ) -> Result<(&'static PowerDomainDesc, &Mutex<DomainSlot>), PmucalError> {
        let i = pd as usize;
        match (self.descs.get(i).copied().flatten(), self.slots.get(i)) {
            (Some(desc), Some(slot)) => Ok((desc, slot)),
            _ => Err(PmucalError::UnknownDomain(pd)),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Checks a descriptor table before it is loaded.
pub fn validate(table: &[PowerDomainDesc]) -> Result<(), PmucalError> {
    if table.is_empty() {
        return Err(PmucalError::InvalidConfig {
            pd: 0,
            error: ConfigError::EmptyTable,
        });
    }

    for (n, desc) in table.iter().enumerate() {
        let fail = |error| PmucalError::InvalidConfig { pd: desc.id, error };

        if desc.id as usize >= PMUCAL_NUM_PDS {
            return Err(fail(ConfigError::IdOutOfRange));
        }
        if table[..n].iter().any(|d| d.id == desc.id) {
            return Err(fail(ConfigError::DuplicateId));
        }

        for kind in [
            SeqKind::On,
            SeqKind::Off,
            SeqKind::Save,
            SeqKind::Status,
            SeqKind::CmuInit,
        ] {
            for (step_index, step) in desc.sequence(kind).steps().iter().enumerate() {
                match *step {
                    Step::Read { mask, expect, .. }
                    | Step::Poll { mask, expect, .. }
                        if expect & !mask != 0 =>
                    {
                        return Err(fail(ConfigError::ExpectOutsideMask {
                            kind,
                            step_index,
                        }));
                    }
                    Step::Poll { timeout_ms: 0, .. } => {
                        return Err(fail(ConfigError::ZeroTimeout {
                            kind,
                            step_index,
                        }));
                    }
                    _ => (),
                }
            }
        }

        if let Some(last) = desc.status.steps().last() {
            if !last.observes() {
                return Err(fail(ConfigError::StatusNotObservable));
            }
        }

        let saves = desc
            .save
            .steps()
            .iter()
            .filter(|s| matches!(s, Step::Save { .. }))
            .count();
        if saves > PMUCAL_MAX_SAVE_REGS {
            return Err(fail(ConfigError::TooManySavedRegisters));
        }
    }

    Ok(())
}
