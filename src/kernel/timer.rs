// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use std::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

/// Monotonic host clock with one cancellable, reprogrammable single-shot alarm per id.
///
/// When an alarm matures the embedder calls [`crate::Cps::timer_expire`] with its id.
/// Alarms that were moved or cancelled meanwhile are ignored there.
pub trait TimerSource: Send + Sync {
    /// Current time in nanoseconds.
    fn now_ns(&self) -> u64;
    /// Arm (or re-arm) alarm `id` at the absolute time `deadline_ns`.
    fn timer_mod(&self, id: usize, deadline_ns: u64);
    /// Cancel alarm `id`.
    fn timer_del(&self, id: usize);
}

/// Deterministic virtual-time `TimerSource`: time only moves when `advance` is called.
pub struct VirtualClock {
    now_ns: AtomicU64,
    alarms: Mutex<Vec<Option<u64>>>,
}

impl VirtualClock {
    pub fn new(num_alarms: usize) -> Self {
        Self {
            now_ns: AtomicU64::new(0),
            alarms: Mutex::new(vec![None; num_alarms]),
        }
    }

    /// Move time forward by `ns` and return the ids of the alarms that matured, lowest first.
    /// Matured alarms are disarmed.
    pub fn advance(&self, ns: u64) -> Vec<usize> {
        let now = self.now_ns.fetch_add(ns, Ordering::SeqCst).wrapping_add(ns);
        let mut alarms = self.alarms.lock();
        let mut fired = Vec::new();
        for (id, alarm) in alarms.iter_mut().enumerate() {
            if matches!(*alarm, Some(deadline) if deadline <= now) {
                *alarm = None;
                fired.push(id);
            }
        }
        fired
    }

    /// Sets the current time without delivering alarms.
    pub fn set_now_ns(&self, now_ns: u64) {
        self.now_ns.store(now_ns, Ordering::SeqCst);
    }

    pub fn deadline(&self, id: usize) -> Option<u64> {
        self.alarms.lock().get(id).copied().flatten()
    }

    /// Earliest armed alarm as `(id, deadline)`.
    pub fn next_deadline(&self) -> Option<(usize, u64)> {
        self.alarms
            .lock()
            .iter()
            .enumerate()
            .filter_map(|(id, alarm)| alarm.map(|deadline| (id, deadline)))
            .min_by_key(|&(_, deadline)| deadline)
    }
}

impl TimerSource for VirtualClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }

    fn timer_mod(&self, id: usize, deadline_ns: u64) {
        let mut alarms = self.alarms.lock();
        if id >= alarms.len() {
            alarms.resize(id + 1, None);
        }
        alarms[id] = Some(deadline_ns);
    }

    fn timer_del(&self, id: usize) {
        if let Some(alarm) = self.alarms.lock().get_mut(id) {
            *alarm = None;
        }
    }
}
