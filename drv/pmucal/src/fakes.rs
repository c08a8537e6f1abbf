// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host stand-ins for the hardware collaborators, for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use drv_pmucal_api::{
    BackendFault, HookError, PdId, PmuBackend, PmucalHooks, SequenceFailure,
    Timer,
};

use crate::rae::SMC_CMD_REG;

/// One backend access, as seen by the mock.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Read(u32),
    Write(u32, u32),
    Smc(u32, [u64; 3]),
}

type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

#[derive(Default)]
struct Inner {
    regs: HashMap<u32, u32>,
    log: Vec<Access>,
    faults: Vec<u32>,
    smc_status: HashMap<u32, i64>,
    /// (addr, value, time at which the value appears)
    delayed: Vec<(u32, u32, u64)>,
}

/// A sparse register file that records every access in order. Unwritten
/// registers read as zero.
#[derive(Default)]
pub struct MockRegs {
    inner: Mutex<Inner>,
    clock: Mutex<Option<Clock>>,
}

impl MockRegs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, addr: u32, value: u32) {
        self.inner.lock().unwrap().regs.insert(addr, value);
    }

    pub fn get(&self, addr: u32) -> u32 {
        self.inner.lock().unwrap().regs.get(&addr).copied().unwrap_or(0)
    }

    /// Makes `addr` read as `value` once `timer` reaches `at_us`, standing in
    /// for hardware that acknowledges a request some time later.
    pub fn set_after<T: Timer + Clone + Send + Sync + 'static>(
        &self,
        timer: &T,
        addr: u32,
        value: u32,
        at_us: u64,
    ) {
        let t = timer.clone();
        *self.clock.lock().unwrap() = Some(Box::new(move || t.now_us()));
        self.inner.lock().unwrap().delayed.push((addr, value, at_us));
    }

    pub fn fault_at(&self, addr: u32) {
        self.inner.lock().unwrap().faults.push(addr);
    }

    pub fn fail_smc(&self, id: u32, status: i64) {
        self.inner.lock().unwrap().smc_status.insert(id, status);
    }

    pub fn log(&self) -> Vec<Access> {
        self.inner.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.inner.lock().unwrap().log.clear();
    }

    fn settle(&self, inner: &mut Inner) {
        let now = match &*self.clock.lock().unwrap() {
            Some(clock) => clock(),
            None => return,
        };
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.delayed)
            .into_iter()
            .partition(|&(_, _, at)| at <= now);
        for (addr, value, _) in due {
            inner.regs.insert(addr, value);
        }
        inner.delayed = pending;
    }
}

impl PmuBackend for MockRegs {
    fn read32(&self, addr: u32) -> Result<u32, BackendFault> {
        let mut inner = self.inner.lock().unwrap();
        if inner.faults.contains(&addr) {
            return Err(BackendFault { addr });
        }
        self.settle(&mut inner);
        inner.log.push(Access::Read(addr));
        Ok(inner.regs.get(&addr).copied().unwrap_or(0))
    }

    fn write32(&self, addr: u32, value: u32) -> Result<(), BackendFault> {
        let mut inner = self.inner.lock().unwrap();
        if inner.faults.contains(&addr) {
            return Err(BackendFault { addr });
        }
        inner.log.push(Access::Write(addr, value));
        inner.regs.insert(addr, value);
        Ok(())
    }

    fn smc_call(&self, id: u32, args: [u64; 3]) -> (i64, u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.log.push(Access::Smc(id, args));
        if let Some(&status) = inner.smc_status.get(&id) {
            return (status, 0);
        }
        if id != SMC_CMD_REG {
            return (0, 0);
        }

        // Emulate the secure monitor's SFR access service.
        let class = (args[0] >> 30) as u32;
        let addr = ((args[0] & 0x3fff_ffff) << 2) as u32;
        self.settle(&mut inner);
        match class {
            0b11 => (0, u64::from(inner.regs.get(&addr).copied().unwrap_or(0))),
            0b01 => {
                inner.regs.insert(addr, args[1] as u32);
                (0, 0)
            }
            _ => (-1, 0),
        }
    }
}

/// A clock that only moves when somebody delays. Clones share the clock.
#[derive(Clone, Default)]
pub struct FakeTimer {
    now: Arc<AtomicU64>,
}

impl FakeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl Timer for FakeTimer {
    fn now_us(&self) -> u64 {
        self.now()
    }

    fn delay_us(&self, us: u32) {
        self.now.fetch_add(u64::from(us), Ordering::SeqCst);
    }
}

/// Real time, for tests that involve other threads.
#[derive(Copy, Clone)]
pub struct WallTimer {
    base: Instant,
}

impl WallTimer {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
        }
    }
}

impl Timer for WallTimer {
    fn now_us(&self) -> u64 {
        self.base.elapsed().as_micros() as u64
    }

    fn delay_us(&self, us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(u64::from(us)));
    }
}

/// Hooks that remember what they were told.
#[derive(Default)]
pub struct RecordingHooks {
    pub syncs: Mutex<Vec<(PdId, bool)>>,
    pub failures: Mutex<Vec<SequenceFailure>>,
    pub refuse_sync: bool,
}

impl PmucalHooks for RecordingHooks {
    fn pd_sync(&self, pd: PdId, on: bool) -> Result<(), HookError> {
        self.syncs.lock().unwrap().push((pd, on));
        if self.refuse_sync {
            Err(HookError)
        } else {
            Ok(())
        }
    }

    fn sequence_failed(&self, failure: &SequenceFailure) {
        self.failures.lock().unwrap().push(*failure);
    }
}
