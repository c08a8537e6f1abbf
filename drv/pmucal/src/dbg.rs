// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-domain profiling: how often each sequence ran, how often it failed,
//! and how long it took.

use drv_pmucal_api::SeqKind;
use enum_map::EnumMap;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SeqStats {
    pub runs: u32,
    pub failures: u32,
    pub last_us: u64,
    pub max_us: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainStats {
    seqs: EnumMap<SeqKind, SeqStats>,
}

impl DomainStats {
    pub(crate) fn record(&mut self, kind: SeqKind, elapsed_us: u64, ok: bool) {
        let s = &mut self.seqs[kind];
        s.runs = s.runs.saturating_add(1);
        if !ok {
            s.failures = s.failures.saturating_add(1);
        }
        s.last_us = elapsed_us;
        s.max_us = s.max_us.max(elapsed_us);
    }

    pub fn get(&self, kind: SeqKind) -> SeqStats {
        self.seqs[kind]
    }

    /// Number of times the domain was powered on, successfully or not.
    pub fn on_count(&self) -> u32 {
        self.seqs[SeqKind::On].runs
    }

    pub fn off_count(&self) -> u32 {
        self.seqs[SeqKind::Off].runs
    }

    pub fn failures(&self) -> u32 {
        self.seqs.values().map(|s| s.failures).sum()
    }
}
