// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register backend over an already-mapped window of PMU registers.
//!
//! Sequences name registers by physical address. The platform maps the PMU
//! block once and hands us the mapping; every access is checked against
//! that window and turned into a volatile load or store.

use drv_pmucal_api::{BackendFault, PmuBackend};

/// Status returned by `smc_call` when there is no secure monitor to ask.
pub const SMC_NOT_SUPPORTED: i64 = -1;

#[derive(Debug)]
pub struct MmioBackend {
    base_pa: u32,
    va: usize,
    len: usize,
}

impl MmioBackend {
    /// # Safety
    ///
    /// `va` must be the start of a mapping of the `len` bytes of device
    /// memory at physical address `base_pa`, valid for volatile 32-bit
    /// reads and writes for as long as the backend exists, and not used
    /// for anything else in the meantime.
    pub const unsafe fn new(base_pa: u32, va: usize, len: usize) -> Self {
        Self { base_pa, va, len }
    }

    fn reg(&self, addr: u32) -> Result<*mut u32, BackendFault> {
        let fault = BackendFault { addr };
        let offset = addr.checked_sub(self.base_pa).ok_or(fault)? as usize;
        if offset % 4 != 0 || offset.checked_add(4).map_or(true, |end| end > self.len) {
            return Err(fault);
        }
        Ok((self.va + offset) as *mut u32)
    }
}

impl PmuBackend for MmioBackend {
    fn read32(&self, addr: u32) -> Result<u32, BackendFault> {
        let reg = self.reg(addr)?;
        // Safety: `reg` is aligned and inside the window `new` was promised.
        Ok(unsafe { core::ptr::read_volatile(reg) })
    }

    fn write32(&self, addr: u32, value: u32) -> Result<(), BackendFault> {
        let reg = self.reg(addr)?;
        // Safety: as for `read32`.
        unsafe { core::ptr::write_volatile(reg, value) };
        Ok(())
    }

    #[cfg(target_arch = "aarch64")]
    fn smc_call(&self, id: u32, args: [u64; 3]) -> (i64, u64) {
        let status: u64;
        let value: u64;
        // Safety: SMC calling convention; the monitor preserves everything
        // but x0-x17, and we clobber all of those.
        unsafe {
            core::arch::asm!(
                "smc #0",
                inout("x0") u64::from(id) => status,
                inout("x1") args[0] => value,
                inout("x2") args[1] => _,
                inout("x3") args[2] => _,
                out("x4") _,
                out("x5") _,
                out("x6") _,
                out("x7") _,
                out("x8") _,
                out("x9") _,
                out("x10") _,
                out("x11") _,
                out("x12") _,
                out("x13") _,
                out("x14") _,
                out("x15") _,
                out("x16") _,
                out("x17") _,
                options(nostack),
            );
        }
        (status as i64, value)
    }

    #[cfg(not(target_arch = "aarch64"))]
    fn smc_call(&self, _id: u32, _args: [u64; 3]) -> (i64, u64) {
        (SMC_NOT_SUPPORTED, 0)
    }
}
