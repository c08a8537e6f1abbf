// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The sequencer: runs a domain's sequence step by step and folds the result
//! back into the domain's tracked state.
//!
//! Callers hold the domain's slot lock for the duration, so nothing here
//! worries about other callers touching the same domain. For the same reason
//! nothing here calls the hooks: what they should hear about is collected in
//! [`Notices`] and handed over once the lock is released.

use drv_pmucal_api::{
    Config, ErrorCode, PdId, PdState, PmuBackend, PmucalHooks, PowerDomainDesc,
    SeqKind, SequenceError, SequenceFailure, StatusValue, Step, StepError,
    Timer,
};
use ringbuf::{ringbuf, ringbuf_entry};
use spin::Mutex;

use crate::rae::{self, StepContext, StepOutcome};
use crate::registry::DomainSlot;

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Start { pd: PdId, kind: SeqKind, steps: usize },
    Done { pd: PdId, kind: SeqKind, us: u64 },
    Failed {
        pd: PdId,
        kind: SeqKind,
        step_index: usize,
        code: ErrorCode,
    },
    Status { pd: PdId, value: u32, on: bool },
    Saved { pd: PdId, count: usize },
    Restored { pd: PdId, count: usize },
    SyncRefused { pd: PdId, on: bool },
}

ringbuf!(Trace, 64, Trace::None);

/// Hook calls owed for one engine request.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Notices {
    /// BTS sync for the last successful transition of a `bts_sync` domain.
    pub sync: Option<bool>,
    pub failure: Option<SequenceFailure>,
}

impl Notices {
    /// Delivers everything collected. Must be called without the domain's
    /// slot lock held, since hooks may call back into the engine.
    pub fn deliver<H: PmucalHooks>(self, pd: PdId, hooks: &H) {
        if let Some(on) = self.sync {
            if hooks.pd_sync(pd, on).is_err() {
                ringbuf_entry!(Trace::SyncRefused { pd, on });
            }
            hooks.update_scenario(pd, on);
        }
        if let Some(failure) = &self.failure {
            hooks.sequence_failed(failure);
        }
    }
}

pub(crate) struct Sequencer<'a, B, T> {
    pub backend: &'a B,
    pub timer: &'a T,
    pub config: &'a Config,
    pub smc_lock: &'a Mutex<()>,
}

impl<B: PmuBackend, T: Timer> Sequencer<'_, B, T> {
    fn context(&self, slot: &DomainSlot) -> StepContext<'_, B, T> {
        StepContext {
            backend: self.backend,
            timer: self.timer,
            smc_lock: self.smc_lock,
            access: slot.need_smc.into(),
            poll_interval_us: self.config.poll_interval_us,
        }
    }

    /// Runs `kind` for `desc`. An empty sequence succeeds without touching
    /// the hardware, though an empty `on` or `off` still counts as a
    /// transition. Only `status` sequences produce a value.
    pub fn run(
        &self,
        desc: &PowerDomainDesc,
        slot: &mut DomainSlot,
        kind: SeqKind,
        notices: &mut Notices,
    ) -> Result<Option<StatusValue>, SequenceError> {
        let seq = desc.sequence(kind);
        ringbuf_entry!(Trace::Start {
            pd: desc.id,
            kind,
            steps: seq.len()
        });

        if matches!(kind, SeqKind::On | SeqKind::Off) {
            slot.transitioned = true;
        }
        if kind == SeqKind::Save {
            slot.saved.clear();
        }

        let start = self.timer.now_us();
        let result = self.execute_all(desc.id, seq.steps(), kind, slot);
        let elapsed = self.timer.now_us().saturating_sub(start);
        slot.stats.record(kind, elapsed, result.is_ok());

        match result {
            Ok(status) => {
                ringbuf_entry!(Trace::Done {
                    pd: desc.id,
                    kind,
                    us: elapsed
                });
                self.settle(desc, slot, kind, status, notices);
                Ok(status)
            }
            Err(e) => {
                self.fail(slot, &e, notices);
                Err(e)
            }
        }
    }

    fn execute_all(
        &self,
        pd: PdId,
        steps: &[Step],
        kind: SeqKind,
        slot: &mut DomainSlot,
    ) -> Result<Option<StatusValue>, SequenceError> {
        let ctx = self.context(slot);
        let wrap = |step_index: usize, cause: StepError| SequenceError {
            pd,
            kind,
            step_index,
            cause,
        };

        let mut last = None;
        for (step_index, step) in steps.iter().enumerate() {
            let outcome =
                rae::execute(step, &ctx).map_err(|cause| wrap(step_index, cause))?;
            last = match outcome {
                StepOutcome::Observed(v) => Some(v),
                StepOutcome::Done => None,
            };

            if let (SeqKind::Save, Step::Save { addr }, Some(v)) = (kind, step, last) {
                slot.saved
                    .push((*addr, v.value))
                    .map_err(|_| wrap(step_index, StepError::SaveAreaFull))?;
            }
        }

        if kind == SeqKind::Save {
            ringbuf_entry!(Trace::Saved {
                pd,
                count: slot.saved.len()
            });
        }

        Ok(if kind == SeqKind::Status { last } else { None })
    }

    /// Writes back whatever the last save sequence captured, in capture
    /// order. On failure the reported `step_index` is the position of the
    /// register in the save area.
    pub fn restore(
        &self,
        desc: &PowerDomainDesc,
        slot: &mut DomainSlot,
        notices: &mut Notices,
    ) -> Result<(), SequenceError> {
        if slot.saved.is_empty() {
            return Ok(());
        }

        let ctx = self.context(slot);
        let result = slot.saved.iter().enumerate().try_for_each(
            |(step_index, &(addr, value))| {
                ctx.write(addr, value).map_err(|cause| SequenceError {
                    pd: desc.id,
                    kind: SeqKind::Save,
                    step_index,
                    cause,
                })
            },
        );

        match result {
            Ok(()) => {
                ringbuf_entry!(Trace::Restored {
                    pd: desc.id,
                    count: slot.saved.len()
                });
                slot.saved.clear();
                Ok(())
            }
            Err(e) => {
                self.fail(slot, &e, notices);
                Err(e)
            }
        }
    }

    fn settle(
        &self,
        desc: &PowerDomainDesc,
        slot: &mut DomainSlot,
        kind: SeqKind,
        status: Option<StatusValue>,
        notices: &mut Notices,
    ) {
        match kind {
            SeqKind::On | SeqKind::Off => {
                let on = kind == SeqKind::On;
                slot.state = PdState::from(on);
                if desc.bts_sync {
                    notices.sync = Some(on);
                }
            }
            SeqKind::Status => {
                if let Some(v) = status {
                    ringbuf_entry!(Trace::Status {
                        pd: desc.id,
                        value: v.value,
                        on: v.matched
                    });
                    slot.state = PdState::from(v.matched);
                }
            }
            SeqKind::Save | SeqKind::CmuInit => (),
        }
    }

    fn fail(&self, slot: &mut DomainSlot, e: &SequenceError, notices: &mut Notices) {
        ringbuf_entry!(Trace::Failed {
            pd: e.pd,
            kind: e.kind,
            step_index: e.step_index,
            code: e.cause.code()
        });
        let failure = SequenceFailure::from(e);
        slot.state = PdState::Unknown;
        slot.last_failure = Some(failure);
        notices.failure = Some(failure);
    }
}
