// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Shared GIC counter and the per-VP compare channels.
//!
//! While it runs the 32-bit counter reads `sh_counterlo + (now - base_ns) / GIC_TIMER_PERIOD_NS`,
//! where `base_ns` is the instant it was started or rebased. While it is stopped it reads
//! the frozen `sh_counterlo`.

use std::sync::Arc;

use crate::kernel::TimerSource;
use crate::utils::bit_set;

/// One counter tick every 10 ns (100 MHz).
pub const GIC_TIMER_PERIOD_NS: u64 = 10;
/// Compare register value after reset.
pub const GIC_VP_COMPARE_RESET: u32 = 0xffff_ffff;

struct GicVpTimer {
    comparelo: u32,
    /// Absolute time of the armed alarm.
    deadline: Option<u64>,
}

pub struct GicTimer {
    countstop: bool,
    sh_counterlo: u32,
    /// Instant `sh_counterlo` was last valid for a running counter.
    base_ns: u64,
    vptimers: Vec<GicVpTimer>,
    source: Arc<dyn TimerSource>,
}

impl GicTimer {
    pub fn new(num_vp: usize, source: Arc<dyn TimerSource>) -> Self {
        let mut timer = Self {
            countstop: true,
            sh_counterlo: 0,
            base_ns: 0,
            vptimers: (0..num_vp)
                .map(|_| GicVpTimer {
                    comparelo: GIC_VP_COMPARE_RESET,
                    deadline: None,
                })
                .collect(),
            source,
        };
        timer.reset();
        timer
    }

    pub fn num_vp(&self) -> usize {
        self.vptimers.len()
    }

    pub fn countstop(&self) -> bool {
        self.countstop
    }

    /// Whole ticks since the counter was started or rebased.
    #[inline]
    fn elapsed_ticks(&self, now: u64) -> u64 {
        now.saturating_sub(self.base_ns) / GIC_TIMER_PERIOD_NS
    }

    /// Program the alarm of `vp` for the tick boundary at which its compare value matches
    /// the counter. With `rearm` a match right now is pushed a full counter period away.
    fn vptimer_update(&mut self, vp: usize, now: u64, rearm: bool) {
        let elapsed = self.elapsed_ticks(now);
        let wait = self.vptimers[vp]
            .comparelo
            .wrapping_sub(self.sh_counterlo)
            .wrapping_sub(elapsed as u32);
        let wait = if wait == 0 && rearm {
            1u64 << 32
        } else {
            wait as u64
        };
        let deadline = (self.base_ns + (elapsed + wait) * GIC_TIMER_PERIOD_NS).max(now);
        self.vptimers[vp].deadline = Some(deadline);
        self.source.timer_mod(vp, deadline);
    }

    fn vptimer_update_all(&mut self, now: u64) {
        for vp in 0..self.vptimers.len() {
            self.vptimer_update(vp, now, false);
        }
    }

    /// Re-arm every channel whose alarm matured and return them as a VP bitmap.
    /// Lets a counter read observe the compare matches it implies even if the host
    /// has not delivered the alarms yet.
    pub fn poll_expired(&mut self) -> u64 {
        if self.countstop {
            return 0;
        }
        let now = self.source.now_ns();
        let mut fired = 0;
        for vp in 0..self.vptimers.len() {
            if matches!(self.vptimers[vp].deadline, Some(deadline) if deadline <= now) {
                self.source.timer_del(vp);
                self.vptimer_update(vp, now, true);
                fired = bit_set(fired, vp);
            }
        }
        fired
    }

    /// Host alarm callback of `vp`. Returns whether the channel really matched; stale
    /// alarms (moved or cancelled since they were armed) return false.
    pub fn vptimer_cb(&mut self, vp: usize) -> bool {
        if self.countstop || vp >= self.vptimers.len() {
            return false;
        }
        let now = self.source.now_ns();
        match self.vptimers[vp].deadline {
            Some(deadline) if deadline <= now => {
                trace!("gic timer: vp {} compare {:#x} matched", vp, self.vptimers[vp].comparelo);
                self.vptimer_update(vp, now, true);
                true
            }
            _ => false,
        }
    }

    pub fn get_sh_count(&self) -> u32 {
        if self.countstop {
            self.sh_counterlo
        } else {
            let now = self.source.now_ns();
            self.sh_counterlo.wrapping_add(self.elapsed_ticks(now) as u32)
        }
    }

    /// Rebase the counter so that it reads `count` now.
    pub fn store_sh_count(&mut self, count: u32) {
        if self.countstop {
            self.sh_counterlo = count;
            return;
        }
        let now = self.source.now_ns();
        self.sh_counterlo = count;
        self.base_ns = now;
        self.vptimer_update_all(now);
    }

    pub fn get_vp_compare(&self, vp: usize) -> u32 {
        self.vptimers[vp].comparelo
    }

    pub fn store_vp_compare(&mut self, vp: usize, compare: u32) {
        self.vptimers[vp].comparelo = compare;
        if !self.countstop {
            let now = self.source.now_ns();
            self.vptimer_update(vp, now, false);
        }
    }

    pub fn start_count(&mut self) {
        if !self.countstop {
            return;
        }
        self.countstop = false;
        let now = self.source.now_ns();
        self.base_ns = now;
        self.vptimer_update_all(now);
    }

    pub fn stop_count(&mut self) {
        if self.countstop {
            return;
        }
        self.countstop = true;
        let now = self.source.now_ns();
        self.sh_counterlo = self.sh_counterlo.wrapping_add(self.elapsed_ticks(now) as u32);
        for vp in 0..self.vptimers.len() {
            self.vptimers[vp].deadline = None;
            self.source.timer_del(vp);
        }
    }

    #[cfg(test)]
    fn deadline(&self, vp: usize) -> Option<u64> {
        self.vptimers.get(vp).and_then(|t| t.deadline)
    }

    pub fn reset(&mut self) {
        self.countstop = true;
        self.sh_counterlo = 0;
        self.base_ns = 0;
        for vp in 0..self.vptimers.len() {
            self.vptimers[vp].comparelo = GIC_VP_COMPARE_RESET;
            self.vptimers[vp].deadline = None;
            self.source.timer_del(vp);
        }
    }
}
