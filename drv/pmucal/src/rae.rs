// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register access engine: executes one [`Step`] against the backend.
//!
//! Register reads and writes go either straight to the backend or, for
//! domains that need it, through the secure monitor's SFR access service.
//! Either way, every secure monitor call made by the engine is serialized on
//! one channel lock, since firmware handles one call at a time.

use drv_pmucal_api::{PmuBackend, StatusValue, Step, StepError, Timer};
use ringbuf::{ringbuf, ringbuf_entry};
use spin::Mutex;

/// Secure monitor function that performs SFR accesses on our behalf.
pub const SMC_CMD_REG: u32 = -101i32 as u32;

const SMC_REG_CLASS_SFR_W: u32 = 0x1 << 30;
const SMC_REG_CLASS_SFR_R: u32 = 0x3 << 30;

/// Register id for a secure write of the word at `addr`.
pub const fn sfr_write_id(addr: u32) -> u64 {
    (SMC_REG_CLASS_SFR_W | (addr >> 2)) as u64
}

/// Register id for a secure read of the word at `addr`.
pub const fn sfr_read_id(addr: u32) -> u64 {
    (SMC_REG_CLASS_SFR_R | (addr >> 2)) as u64
}

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Smc { id: u32 },
    PollTimeout { addr: u32, observed: u32 },
    SmcFailed { id: u32, status: i64 },
    Fault { addr: u32 },
}

ringbuf!(Trace, 16, Trace::None);

/// How register accesses reach the hardware.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Direct,
    Secure,
}

impl From<bool> for Access {
    fn from(need_smc: bool) -> Self {
        if need_smc {
            Access::Secure
        } else {
            Access::Direct
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Observed(StatusValue),
}

/// Everything a step needs to run.
pub struct StepContext<'a, B, T> {
    pub backend: &'a B,
    pub timer: &'a T,
    pub smc_lock: &'a Mutex<()>,
    pub access: Access,
    pub poll_interval_us: u32,
}

impl<B: PmuBackend, T: Timer> StepContext<'_, B, T> {
    fn smc(&self, id: u32, args: [u64; 3]) -> Result<u64, StepError> {
        ringbuf_entry!(Trace::Smc { id });
        let (status, value) = {
            let _channel = self.smc_lock.lock();
            self.backend.smc_call(id, args)
        };
        if status != 0 {
            ringbuf_entry!(Trace::SmcFailed { id, status });
            return Err(StepError::SmcFailure { id, status });
        }
        Ok(value)
    }

    pub fn read(&self, addr: u32) -> Result<u32, StepError> {
        match self.access {
            Access::Direct => self.backend.read32(addr).map_err(|f| {
                ringbuf_entry!(Trace::Fault { addr });
                f.into()
            }),
            Access::Secure => {
                // The result word is the register; truncation is intended.
                self.smc(SMC_CMD_REG, [sfr_read_id(addr), 0, 0])
                    .map(|v| v as u32)
            }
        }
    }

    pub fn write(&self, addr: u32, value: u32) -> Result<(), StepError> {
        match self.access {
            Access::Direct => self.backend.write32(addr, value).map_err(|f| {
                ringbuf_entry!(Trace::Fault { addr });
                f.into()
            }),
            Access::Secure => self
                .smc(SMC_CMD_REG, [sfr_write_id(addr), u64::from(value), 0])
                .map(|_| ()),
        }
    }

    fn poll(
        &self,
        addr: u32,
        mask: u32,
        expect: u32,
        timeout_ms: u32,
    ) -> Result<StepOutcome, StepError> {
        let start = self.timer.now_us();
        let budget = u64::from(timeout_ms) * 1000;
        let interval = u64::from(self.poll_interval_us.max(1));

        loop {
            let observed = self.read(addr)? & mask;
            if observed == expect {
                return Ok(StepOutcome::Observed(StatusValue {
                    value: observed,
                    matched: true,
                }));
            }

            let elapsed = self.timer.now_us().saturating_sub(start);
            if elapsed >= budget {
                ringbuf_entry!(Trace::PollTimeout { addr, observed });
                return Err(StepError::Timeout {
                    addr,
                    mask,
                    expected: expect,
                    observed,
                    timeout_ms,
                });
            }

            // Don't sleep past the deadline; the last read lands on it.
            let wait = (budget - elapsed).min(interval);
            self.timer.delay_us(wait as u32);
        }
    }
}

/// Executes a single step.
pub fn execute<B: PmuBackend, T: Timer>(
    step: &Step,
    ctx: &StepContext<'_, B, T>,
) -> Result<StepOutcome, StepError> {
    match *step {
        Step::Write { addr, mask, value } => {
            let value = if mask == u32::MAX {
                value
            } else {
                (ctx.read(addr)? & !mask) | (value & mask)
            };
            ctx.write(addr, value)?;
            Ok(StepOutcome::Done)
        }
        Step::Read { addr, mask, expect } => {
            let value = ctx.read(addr)? & mask;
            Ok(StepOutcome::Observed(StatusValue {
                value,
                matched: value == expect,
            }))
        }
        Step::Poll {
            addr,
            mask,
            expect,
            timeout_ms,
        } => ctx.poll(addr, mask, expect, timeout_ms),
        Step::Delay { us } => {
            ctx.timer.delay_us(us);
            Ok(StepOutcome::Done)
        }
        Step::Smc { id, args } => {
            ctx.smc(id, args)?;
            Ok(StepOutcome::Done)
        }
        Step::Save { addr } => {
            let value = ctx.read(addr)?;
            Ok(StepOutcome::Observed(StatusValue {
                value,
                matched: true,
            }))
        }
    }
}
