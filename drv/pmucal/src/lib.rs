// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PMUCAL: table-driven power-domain sequencing.
//!
//! A platform describes each of its power domains once, as a static
//! [`PowerDomainDesc`] carrying short sequences of register writes, polls,
//! delays and secure monitor calls. The [`Pmucal`] engine owns nothing but
//! that table and the collaborators it is handed (register access, a clock,
//! optional hooks), and turns `enable`/`disable`/`is_enabled` requests into
//! runs of those sequences.
//!
//! Requests for the same domain are serialized on a per-domain lock, held
//! for the whole of a transition. Requests for different domains run in
//! parallel, except that all secure monitor traffic shares one channel
//! lock. Nothing here sleeps cooperatively: a poll blocks its caller for at
//! most the step's timeout.
//!
//! A failed step aborts its sequence without undoing the steps before it,
//! and leaves the domain's tracked state `Unknown` until the next successful
//! transition or status read.

#![cfg_attr(not(test), no_std)]

pub mod dbg;
pub mod mmio;
pub mod rae;
mod registry;
mod seq;
pub mod snapshot;

#[cfg(test)]
mod fakes;

pub use dbg::{DomainStats, SeqStats};
pub use drv_pmucal_api::*;
pub use registry::validate;

use ringbuf::{ringbuf, ringbuf_entry};
use spin::{Mutex, Once};

use crate::registry::{DomainSlot, Registry};
use crate::seq::{Notices, Sequencer};

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Init { domains: usize },
    InitRejected(ErrorCode),
    AlreadyInit,
    Enable(PdId),
    Disable(PdId),
    RedundantTransition { pd: PdId, state: PdState },
    RefusedTransition { pd: PdId, state: PdState },
    SaveSkipped(PdId),
    LateConfig(PdId),
    CmuInit(PdId),
    Failed { pd: PdId, code: ErrorCode },
}

ringbuf!(Trace, 32, Trace::None);

/// The power-domain engine.
///
/// Construct it with [`Pmucal::new`], call [`Pmucal::init`] once, and share
/// it by reference between callers; every operation takes `&self`.
pub struct Pmucal<B, T, H = NoHooks> {
    table: &'static [PowerDomainDesc],
    backend: B,
    timer: T,
    hooks: H,
    config: Config,
    registry: Once<Registry>,
    smc_lock: Mutex<()>,
}

impl<B, T, H> Pmucal<B, T, H> {
    pub const fn new(
        table: &'static [PowerDomainDesc],
        backend: B,
        timer: T,
        hooks: H,
        config: Config,
    ) -> Self {
        Self {
            table,
            backend,
            timer,
            hooks,
            config,
            registry: Once::new(),
            smc_lock: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl<B: PmuBackend, T: Timer, H: PmucalHooks> Pmucal<B, T, H> {
    /// Validates the domain table and loads the registry. Succeeds exactly
    /// once; later calls fail with `AlreadyInitialized` and change nothing.
    pub fn init(&self) -> Result<(), PmucalError> {
        if self.registry.is_completed() {
            ringbuf_entry!(Trace::AlreadyInit);
            return Err(PmucalError::AlreadyInitialized);
        }

        let registry = Registry::load(self.table).map_err(|e| {
            ringbuf_entry!(Trace::InitRejected(e.code()));
            e
        })?;
        let domains = registry.count();

        // Two racing callers can both get this far; only one of them loads.
        let mut loaded = false;
        self.registry.call_once(|| {
            loaded = true;
            registry
        });
        if !loaded {
            ringbuf_entry!(Trace::AlreadyInit);
            return Err(PmucalError::AlreadyInitialized);
        }

        ringbuf_entry!(Trace::Init { domains });
        Ok(())
    }

    /// Powers `pd` on: runs its `on` sequence, then its `cmu_init` sequence
    /// if this is the first power-on under our control, then writes back
    /// whatever the last `disable` saved.
    pub fn enable(&self, pd: PdId) -> Result<(), PmucalError> {
        self.with_slot(pd, |desc, slot, notices| {
            self.check_transition(pd, slot.state, PdState::On)?;
            ringbuf_entry!(Trace::Enable(pd));

            let seq = self.sequencer();
            seq.run(desc, slot, SeqKind::On, notices).map_err(failed)?;

            if slot.cmu_init_pending {
                ringbuf_entry!(Trace::CmuInit(pd));
                seq.run(desc, slot, SeqKind::CmuInit, notices)
                    .map_err(failed)?;
                slot.cmu_init_pending = false;
            }

            seq.restore(desc, slot, notices).map_err(failed)
        })
    }

    /// Powers `pd` off: runs its `save` sequence and then its `off`
    /// sequence. If the save fails the domain is left on.
    ///
    /// The save is skipped when the domain is already off, or when context
    /// from an earlier save has not been restored yet. In both cases the save
    /// area already holds the context to bring back on the next `enable`.
    pub fn disable(&self, pd: PdId) -> Result<(), PmucalError> {
        self.with_slot(pd, |desc, slot, notices| {
            self.check_transition(pd, slot.state, PdState::Off)?;
            ringbuf_entry!(Trace::Disable(pd));

            let seq = self.sequencer();
            if slot.state == PdState::Off || !slot.saved.is_empty() {
                ringbuf_entry!(Trace::SaveSkipped(pd));
            } else {
                seq.run(desc, slot, SeqKind::Save, notices)
                    .map_err(failed)?;
            }
            seq.run(desc, slot, SeqKind::Off, notices).map_err(failed)?;
            Ok(())
        })
    }

    /// Asks the hardware, through the domain's `status` sequence, whether
    /// `pd` is powered. Domains without one answer from the tracked state,
    /// which fails with `StateUnknown` after an aborted transition.
    pub fn is_enabled(&self, pd: PdId) -> Result<bool, PmucalError> {
        self.with_slot(pd, |desc, slot, notices| {
            if desc.status.is_empty() {
                return match slot.state {
                    PdState::On => Ok(true),
                    PdState::Off => Ok(false),
                    PdState::Unknown => Err(PmucalError::StateUnknown(pd)),
                };
            }

            match self
                .sequencer()
                .run(desc, slot, SeqKind::Status, notices)
                .map_err(failed)?
            {
                Some(v) => Ok(v.matched),
                None => Err(PmucalError::StateUnknown(pd)),
            }
        })
    }

    /// Routes the domain's register accesses through the secure monitor (or
    /// stops doing so). Only allowed before the domain's first transition.
    pub fn set_smc_id(&self, pd: PdId, need_smc: bool) -> Result<(), PmucalError> {
        let (_, slot) = self.registry()?.lookup(pd)?;
        let mut slot = slot.lock();
        if slot.transitioned {
            ringbuf_entry!(Trace::LateConfig(pd));
            return Err(PmucalError::LateConfiguration(pd));
        }
        slot.need_smc = need_smc;
        Ok(())
    }

    /// Overrides whether the domain is assumed powered at start. Only
    /// allowed before the domain's first transition.
    pub fn set_first_on(&self, pd: PdId, first_on: bool) -> Result<(), PmucalError> {
        let (_, slot) = self.registry()?.lookup(pd)?;
        let mut slot = slot.lock();
        if slot.transitioned {
            ringbuf_entry!(Trace::LateConfig(pd));
            return Err(PmucalError::LateConfiguration(pd));
        }
        slot.first_on = first_on;
        slot.state = PdState::from(first_on);
        Ok(())
    }

    /// Runs one sequence of `pd` as-is, with none of the save, restore,
    /// cmu-init or transition-policy handling of `enable` and `disable`.
    /// Only `status` returns a value.
    pub fn run(
        &self,
        pd: PdId,
        kind: SeqKind,
    ) -> Result<Option<StatusValue>, PmucalError> {
        self.with_slot(pd, |desc, slot, notices| {
            self.sequencer()
                .run(desc, slot, kind, notices)
                .map_err(failed)
        })
    }

    /// The tracked state, without touching the hardware.
    pub fn state(&self, pd: PdId) -> Result<PdState, PmucalError> {
        let (_, slot) = self.registry()?.lookup(pd)?;
        let state = slot.lock().state;
        Ok(state)
    }

    pub fn stats(&self, pd: PdId) -> Result<DomainStats, PmucalError> {
        let (_, slot) = self.registry()?.lookup(pd)?;
        let stats = slot.lock().stats;
        Ok(stats)
    }

    /// The most recent sequence failure on `pd`, if any.
    pub fn last_failure(
        &self,
        pd: PdId,
    ) -> Result<Option<SequenceFailure>, PmucalError> {
        let (_, slot) = self.registry()?.lookup(pd)?;
        let failure = slot.lock().last_failure;
        Ok(failure)
    }

    /// Number of registered domains; zero before `init`.
    pub fn domain_count(&self) -> usize {
        self.registry.get().map_or(0, Registry::count)
    }

    pub fn name(&self, pd: PdId) -> Result<&'static str, PmucalError> {
        let (desc, _) = self.registry()?.lookup(pd)?;
        Ok(desc.name)
    }

    fn registry(&self) -> Result<&Registry, PmucalError> {
        self.registry.get().ok_or(PmucalError::NotInitialized)
    }

    /// Runs `f` under `pd`'s slot lock, then hands the hooks whatever `f`
    /// collected for them once the lock is released.
    fn with_slot<R>(
        &self,
        pd: PdId,
        f: impl FnOnce(
            &'static PowerDomainDesc,
            &mut DomainSlot,
            &mut Notices,
        ) -> Result<R, PmucalError>,
    ) -> Result<R, PmucalError> {
        let (desc, slot) = self.registry()?.lookup(pd)?;
        let mut notices = Notices::default();
        let result = {
            let mut slot = slot.lock();
            f(desc, &mut *slot, &mut notices)
        };
        notices.deliver(pd, &self.hooks);
        result
    }

    fn sequencer(&self) -> Sequencer<'_, B, T> {
        Sequencer {
            backend: &self.backend,
            timer: &self.timer,
            config: &self.config,
            smc_lock: &self.smc_lock,
        }
    }

    fn check_transition(
        &self,
        pd: PdId,
        from: PdState,
        to: PdState,
    ) -> Result<(), PmucalError> {
        if from != to {
            return Ok(());
        }
        match self.config.policy {
            TransitionPolicy::Permissive => {
                ringbuf_entry!(Trace::RedundantTransition { pd, state: to });
                Ok(())
            }
            TransitionPolicy::Strict => {
                ringbuf_entry!(Trace::RefusedTransition { pd, state: to });
                Err(PmucalError::InvalidStateTransition { pd, from, to })
            }
        }
    }
}

fn failed(e: SequenceError) -> PmucalError {
    ringbuf_entry!(Trace::Failed {
        pd: e.pd,
        code: e.cause.code()
    });
    e.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{
        Access as Logged, FakeTimer, MockRegs, RecordingHooks, WallTimer,
    };
    use crate::rae::{sfr_write_id, SMC_CMD_REG};
    use crate::snapshot::FailureRecord;

    type Engine<T = FakeTimer, H = NoHooks> = Pmucal<MockRegs, T, H>;

    fn engine(table: &'static [PowerDomainDesc]) -> Engine {
        let pm = Pmucal::new(
            table,
            MockRegs::new(),
            FakeTimer::new(),
            NoHooks,
            Config::default(),
        );
        pm.init().unwrap();
        pm
    }

    fn engine_with(
        table: &'static [PowerDomainDesc],
        config: Config,
    ) -> Engine {
        let pm = Pmucal::new(table, MockRegs::new(), FakeTimer::new(), NoHooks, config);
        pm.init().unwrap();
        pm
    }

    fn hooked(
        table: &'static [PowerDomainDesc],
        hooks: RecordingHooks,
    ) -> Engine<FakeTimer, RecordingHooks> {
        let pm = Pmucal::new(
            table,
            MockRegs::new(),
            FakeTimer::new(),
            hooks,
            Config::default(),
        );
        pm.init().unwrap();
        pm
    }

    static MFC_ON: [Step; 2] = [Step::write(0x1000, 1), Step::poll(0x1004, 0x1, 0x1, 50)];
    static MFC_STATUS: [Step; 1] = [Step::read(0x1004, 0x1, 0x1)];

    static G3D_ON: [Step; 2] = [Step::write(0x2000, 1), Step::poll(0x2000, 0x1, 0x1, 10)];
    static G3D_OFF: [Step; 2] = [Step::write(0x2000, 0), Step::poll(0x2000, 0x1, 0x0, 10)];
    static G3D_STATUS: [Step; 1] = [Step::read(0x2000, 0x1, 0x1)];

    static TABLE: [PowerDomainDesc; 3] = [
        PowerDomainDesc::new(3, "MFC").on(&MFC_ON).status(&MFC_STATUS),
        PowerDomainDesc::new(5, "G3D")
            .on(&G3D_ON)
            .off(&G3D_OFF)
            .status(&G3D_STATUS),
        PowerDomainDesc::new(9, "DUMMY"),
    ];

    #[test]
    fn mfc_comes_up_once_the_ack_arrives() {
        let timer = WallTimer::new();
        let pm = Pmucal::new(&TABLE, MockRegs::new(), timer, NoHooks, Config::default());
        pm.init().unwrap();

        let start = timer.now_us();
        pm.backend().set_after(&timer, 0x1004, 0x1, start + 5_000);

        assert_eq!(pm.enable(3), Ok(()));
        assert!(timer.now_us() - start <= 50_000);
        assert_eq!(pm.is_enabled(3), Ok(true));
        assert_eq!(pm.backend().log()[0], Logged::Write(0x1000, 1));
    }

    #[test]
    fn unknown_domain_touches_nothing() {
        let pm = engine(&TABLE);

        assert_eq!(pm.enable(999), Err(PmucalError::UnknownDomain(999)));
        assert_eq!(pm.disable(4), Err(PmucalError::UnknownDomain(4)));
        assert_eq!(pm.is_enabled(999), Err(PmucalError::UnknownDomain(999)));
        assert!(pm.backend().log().is_empty());
    }

    #[test]
    fn calls_before_init_are_refused() {
        let pm = Pmucal::new(&TABLE, MockRegs::new(), FakeTimer::new(), NoHooks, Config::default());

        assert_eq!(pm.enable(3), Err(PmucalError::NotInitialized));
        assert_eq!(pm.set_smc_id(3, true), Err(PmucalError::NotInitialized));
        assert_eq!(pm.domain_count(), 0);
    }

    #[test]
    fn second_init_changes_nothing() {
        let pm = engine(&TABLE);
        pm.enable(5).unwrap();

        assert_eq!(pm.init(), Err(PmucalError::AlreadyInitialized));
        assert_eq!(pm.domain_count(), 3);
        assert_eq!(pm.state(5), Ok(PdState::On));
        assert_eq!(pm.stats(5).unwrap().on_count(), 1);
    }

    #[test]
    fn bad_table_leaves_engine_uninitialized() {
        static DUP: [PowerDomainDesc; 2] =
            [PowerDomainDesc::new(1, "A"), PowerDomainDesc::new(1, "B")];
        let pm = Pmucal::new(&DUP, MockRegs::new(), FakeTimer::new(), NoHooks, Config::default());

        assert_eq!(
            pm.init(),
            Err(PmucalError::InvalidConfig {
                pd: 1,
                error: ConfigError::DuplicateId
            })
        );
        assert_eq!(pm.name(1), Err(PmucalError::NotInitialized));
    }

    #[test]
    fn enable_then_disable_is_reflected_by_status() {
        let pm = engine(&TABLE);

        pm.enable(5).unwrap();
        assert_eq!(pm.is_enabled(5), Ok(true));
        pm.disable(5).unwrap();
        assert_eq!(pm.is_enabled(5), Ok(false));
        assert_eq!(pm.state(5), Ok(PdState::Off));
    }

    #[test]
    fn empty_sequences_are_noops() {
        let pm = engine(&TABLE);

        assert_eq!(pm.run(9, SeqKind::On), Ok(None));
        assert_eq!(pm.run(9, SeqKind::Status), Ok(None));
        pm.disable(9).unwrap();
        assert_eq!(pm.is_enabled(9), Ok(false));
        pm.enable(9).unwrap();
        assert_eq!(pm.is_enabled(9), Ok(true));
        assert!(pm.backend().log().is_empty());
    }

    #[test]
    fn setters_are_refused_after_first_transition() {
        static ON: [Step; 1] = [Step::write(0x5000, 1)];
        static T: [PowerDomainDesc; 1] = [PowerDomainDesc::new(0, "AUD").on(&ON)];
        let pm = engine(&T);

        pm.set_first_on(0, true).unwrap();
        pm.set_first_on(0, false).unwrap();
        pm.enable(0).unwrap();

        assert_eq!(pm.set_smc_id(0, true), Err(PmucalError::LateConfiguration(0)));
        assert_eq!(pm.set_first_on(0, false), Err(PmucalError::LateConfiguration(0)));
        assert_eq!(pm.state(0), Ok(PdState::On));

        // Still direct access.
        pm.backend().clear_log();
        pm.enable(0).unwrap();
        assert_eq!(pm.backend().log(), [Logged::Write(0x5000, 1)]);
    }

    #[test]
    fn strict_policy_refuses_redundant_transitions() {
        static ON: [Step; 1] = [Step::write(0x6000, 1)];
        static OFF: [Step; 1] = [Step::write(0x6100, 0)];
        static T: [PowerDomainDesc; 2] = [
            PowerDomainDesc::new(2, "DPU").on(&ON).first_on(true),
            PowerDomainDesc::new(3, "ABOX").off(&OFF),
        ];

        let strict = engine_with(&T, Config::strict());
        assert_eq!(
            strict.enable(2),
            Err(PmucalError::InvalidStateTransition {
                pd: 2,
                from: PdState::On,
                to: PdState::On
            })
        );
        assert_eq!(
            strict.disable(3),
            Err(PmucalError::InvalidStateTransition {
                pd: 3,
                from: PdState::Off,
                to: PdState::Off
            })
        );
        assert!(strict.backend().log().is_empty());
        assert_eq!(strict.stats(3).unwrap().off_count(), 0);
        assert!(__RINGBUF.lock().iter().any(|e| e.payload
            == Trace::RefusedTransition {
                pd: 3,
                state: PdState::Off
            }));

        let permissive = engine(&T);
        assert_eq!(permissive.enable(2), Ok(()));
        assert_eq!(permissive.backend().log(), [Logged::Write(0x6000, 1)]);
    }

    #[test]
    fn failed_transition_leaves_state_unknown() {
        static ON: [Step; 3] = [
            Step::write(0x7000, 1),
            Step::poll(0x7004, 0x1, 0x1, 20),
            Step::write(0x7008, 1),
        ];
        static T: [PowerDomainDesc; 1] = [PowerDomainDesc::new(4, "ISP").on(&ON)];
        let pm = hooked(&T, RecordingHooks::default());

        let err = pm.enable(4).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StepTimeout);
        assert_eq!(err.code().to_errno(), -110);
        let PmucalError::Sequence(e) = err else {
            panic!("unexpected {err:?}");
        };
        assert_eq!((e.pd, e.kind, e.step_index), (4, SeqKind::On, 1));

        // Nothing after the failing step ran, nothing before it was undone.
        assert_eq!(pm.backend().get(0x7000), 1);
        assert!(!pm.backend().log().contains(&Logged::Write(0x7008, 1)));

        assert_eq!(pm.state(4), Ok(PdState::Unknown));
        assert_eq!(pm.is_enabled(4), Err(PmucalError::StateUnknown(4)));

        let failure = pm.last_failure(4).unwrap().unwrap();
        assert_eq!(failure.addr, 0x7004);
        assert_eq!((failure.expected, failure.observed), (1, 0));
        assert_eq!(*pm.hooks().failures.lock().unwrap(), [failure]);
        assert_eq!(pm.stats(4).unwrap().get(SeqKind::On).failures, 1);

        // The record a snapshot facility would keep reads back the same.
        let mut region = [0u8; FailureRecord::SIZE];
        FailureRecord::from_failure(&failure).write_to(&mut region).unwrap();
        assert_eq!(
            FailureRecord::read_from(&region).and_then(|r| r.failure()),
            Ok(failure)
        );

        // A later successful transition clears the doubt.
        pm.backend().set(0x7004, 1);
        pm.enable(4).unwrap();
        assert_eq!(pm.is_enabled(4), Ok(true));
    }

    #[test]
    fn status_read_resolves_unknown_state() {
        static ON: [Step; 2] = [Step::write(0x7200, 1), Step::poll(0x7204, 0x1, 0x1, 5)];
        static STATUS: [Step; 1] = [Step::read(0x7204, 0x1, 0x1)];
        static T: [PowerDomainDesc; 1] =
            [PowerDomainDesc::new(10, "DNC").on(&ON).status(&STATUS)];
        let pm = engine(&T);

        assert!(pm.enable(10).is_err());
        assert_eq!(pm.state(10), Ok(PdState::Unknown));

        assert_eq!(pm.is_enabled(10), Ok(false));
        assert_eq!(pm.state(10), Ok(PdState::Off));

        // The ack shows up late; the next status read believes it.
        pm.backend().set(0x7204, 1);
        assert_eq!(pm.is_enabled(10), Ok(true));
        assert_eq!(pm.state(10), Ok(PdState::On));
    }

    #[test]
    fn redundant_disable_keeps_the_saved_context() {
        static SAVE: [Step; 1] = [Step::save(0x3100)];
        static OFF: [Step; 1] = [Step::write(0x3100, 0)];
        static T: [PowerDomainDesc; 1] = [PowerDomainDesc::new(6, "CAM")
            .save(&SAVE)
            .off(&OFF)
            .first_on(true)];
        let pm = engine(&T);
        pm.backend().set(0x3100, 0xaa);

        pm.disable(6).unwrap();
        pm.disable(6).unwrap();
        assert_eq!(pm.backend().get(0x3100), 0);

        pm.enable(6).unwrap();
        assert_eq!(pm.backend().get(0x3100), 0xaa);

        let stats = pm.stats(6).unwrap();
        assert_eq!(stats.get(SeqKind::Save).runs, 1);
        assert_eq!(stats.off_count(), 2);
    }

    #[test]
    fn context_is_saved_before_off_and_restored_after_on() {
        static ON: [Step; 1] = [Step::write(0x3008, 1)];
        static SAVE: [Step; 2] = [Step::save(0x3000), Step::save(0x3004)];
        static OFF: [Step; 3] = [
            Step::write(0x3000, 0),
            Step::write(0x3004, 0),
            Step::write(0x3008, 0),
        ];
        static T: [PowerDomainDesc; 1] = [PowerDomainDesc::new(6, "CAM")
            .on(&ON)
            .save(&SAVE)
            .off(&OFF)
            .first_on(true)];
        let pm = engine(&T);
        pm.backend().set(0x3000, 0xaa);
        pm.backend().set(0x3004, 0xbb);

        pm.disable(6).unwrap();
        assert_eq!(pm.backend().get(0x3000), 0);

        pm.backend().clear_log();
        pm.enable(6).unwrap();
        assert_eq!(
            pm.backend().log(),
            [
                Logged::Write(0x3008, 1),
                Logged::Write(0x3000, 0xaa),
                Logged::Write(0x3004, 0xbb),
            ]
        );

        // The save area was consumed.
        pm.backend().clear_log();
        pm.enable(6).unwrap();
        assert_eq!(pm.backend().log(), [Logged::Write(0x3008, 1)]);
    }

    #[test]
    fn cmu_init_runs_after_first_power_on_only() {
        static ON: [Step; 1] = [Step::write(0x4004, 1)];
        static CMU: [Step; 1] = [Step::write(0x4000, 0x3)];
        static T: [PowerDomainDesc; 1] =
            [PowerDomainDesc::new(7, "VPU").on(&ON).cmu_init(&CMU)];
        let pm = engine(&T);

        pm.enable(7).unwrap();
        pm.disable(7).unwrap();
        pm.enable(7).unwrap();

        let log = pm.backend().log();
        assert_eq!(log[..2], [Logged::Write(0x4004, 1), Logged::Write(0x4000, 0x3)]);
        assert_eq!(
            log.iter().filter(|a| **a == Logged::Write(0x4000, 0x3)).count(),
            1
        );
        assert_eq!(pm.stats(7).unwrap().get(SeqKind::CmuInit).runs, 1);
    }

    #[test]
    fn bts_is_told_about_transitions() {
        static T: [PowerDomainDesc; 2] = [
            PowerDomainDesc::new(1, "DISP").bts_sync(true),
            PowerDomainDesc::new(2, "AUD"),
        ];
        let pm = hooked(&T, RecordingHooks::default());

        pm.enable(1).unwrap();
        pm.enable(2).unwrap();
        pm.disable(1).unwrap();
        assert_eq!(*pm.hooks().syncs.lock().unwrap(), [(1, true), (1, false)]);
    }

    #[test]
    fn refused_bts_sync_does_not_fail_the_transition() {
        static T: [PowerDomainDesc; 1] = [PowerDomainDesc::new(1, "DISP").bts_sync(true)];
        let pm = hooked(
            &T,
            RecordingHooks {
                refuse_sync: true,
                ..Default::default()
            },
        );

        assert_eq!(pm.enable(1), Ok(()));
        assert_eq!(pm.state(1), Ok(PdState::On));
    }

    type Reentrant = Pmucal<MockRegs, FakeTimer, CallsBack>;

    /// Hooks that look at the engine from inside the notification.
    #[derive(Default)]
    struct CallsBack {
        engine: std::sync::OnceLock<&'static Reentrant>,
        seen: std::sync::Mutex<
            Vec<(
                Result<PdState, PmucalError>,
                Result<Option<SequenceFailure>, PmucalError>,
            )>,
        >,
    }

    impl CallsBack {
        fn look(&self, pd: PdId) {
            if let Some(pm) = self.engine.get() {
                let seen = (pm.state(pd), pm.last_failure(pd));
                self.seen.lock().unwrap().push(seen);
            }
        }
    }

    impl PmucalHooks for CallsBack {
        fn pd_sync(&self, pd: PdId, _on: bool) -> Result<(), HookError> {
            self.look(pd);
            Ok(())
        }

        fn sequence_failed(&self, failure: &SequenceFailure) {
            self.look(failure.pd);
        }
    }

    #[test]
    fn hooks_may_call_back_into_the_engine() {
        static ON: [Step; 1] = [Step::poll(0x7104, 0x1, 0x1, 5)];
        static T: [PowerDomainDesc; 1] =
            [PowerDomainDesc::new(4, "ISP").on(&ON).bts_sync(true)];
        let pm: &'static Reentrant = Box::leak(Box::new(Pmucal::new(
            &T,
            MockRegs::new(),
            FakeTimer::new(),
            CallsBack::default(),
            Config::default(),
        )));
        pm.init().unwrap();
        let _ = pm.hooks().engine.set(pm);

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let failed = pm.enable(4);
            pm.backend().set(0x7104, 1);
            let ok = pm.enable(4);
            let _ = tx.send((failed, ok));
        });
        let (failed, ok) = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("enable never returned");

        assert_eq!(failed.map_err(|e| e.code()), Err(ErrorCode::StepTimeout));
        assert_eq!(ok, Ok(()));

        let seen = pm.hooks().seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, Ok(PdState::Unknown));
        assert!(matches!(seen[0].1, Ok(Some(f)) if f.pd == 4 && f.step_index == 0));
        assert_eq!(seen[1].0, Ok(PdState::On));
    }

    #[test]
    fn secure_domains_go_through_the_monitor() {
        static ON: [Step; 1] = [Step::write(0x8000, 1)];
        static T: [PowerDomainDesc; 2] = [
            PowerDomainDesc::new(0, "SSP").on(&ON).need_smc(true),
            PowerDomainDesc::new(1, "NPU").on(&ON),
        ];
        let pm = engine(&T);
        let secure_write = Logged::Smc(SMC_CMD_REG, [sfr_write_id(0x8000), 1, 0]);

        pm.enable(0).unwrap();
        assert_eq!(pm.backend().log(), [secure_write]);

        pm.backend().clear_log();
        pm.set_smc_id(1, true).unwrap();
        pm.enable(1).unwrap();
        assert_eq!(pm.backend().log(), [secure_write]);
        assert_eq!(pm.backend().get(0x8000), 1);
    }

    #[test]
    fn names_and_counts() {
        let pm = engine(&TABLE);

        assert_eq!(pm.domain_count(), 3);
        assert_eq!(pm.name(3), Ok("MFC"));
        assert_eq!(pm.name(4), Err(PmucalError::UnknownDomain(4)));
    }

    #[test]
    fn same_domain_transitions_never_interleave() {
        static ON: [Step; 4] = [
            Step::write(0x9000, 1),
            Step::write(0x9004, 1),
            Step::delay_us(20),
            Step::write(0x9008, 1),
        ];
        static OFF: [Step; 4] = [
            Step::write(0x9000, 0),
            Step::write(0x9004, 0),
            Step::delay_us(20),
            Step::write(0x9008, 0),
        ];
        static T: [PowerDomainDesc; 1] = [PowerDomainDesc::new(8, "HSI").on(&ON).off(&OFF)];

        let pm = Pmucal::new(&T, MockRegs::new(), WallTimer::new(), NoHooks, Config::default());
        pm.init().unwrap();

        const ROUNDS: usize = 50;
        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    pm.enable(8).unwrap();
                }
            });
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    pm.disable(8).unwrap();
                }
            });
        });

        let log = pm.backend().log();
        assert_eq!(log.len(), 2 * ROUNDS * 3);
        for chunk in log.chunks(3) {
            let Logged::Write(_, v) = chunk[0] else {
                panic!("unexpected {chunk:?}");
            };
            assert_eq!(
                chunk,
                [
                    Logged::Write(0x9000, v),
                    Logged::Write(0x9004, v),
                    Logged::Write(0x9008, v),
                ]
            );
        }
    }

    proptest::proptest! {
        #[test]
        fn status_follows_the_last_transition(ops in proptest::collection::vec(proptest::bool::ANY, 1..20)) {
            let pm = engine(&TABLE);
            for &on in &ops {
                if on {
                    pm.enable(5).unwrap();
                    pm.enable(9).unwrap();
                } else {
                    pm.disable(5).unwrap();
                    pm.disable(9).unwrap();
                }
                proptest::prop_assert_eq!(pm.is_enabled(5), Ok(on));
                proptest::prop_assert_eq!(pm.is_enabled(9), Ok(on));
            }
            let stats = pm.stats(5).unwrap();
            proptest::prop_assert_eq!(stats.failures(), 0);
            proptest::prop_assert_eq!(stats.get(SeqKind::Status).runs as usize, ops.len());
        }
    }
}
