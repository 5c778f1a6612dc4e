// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use mips_cps::{Cps, CpsConfig, EmuFault, IrqSink, VirtualClock, VpContext};

/// VP execution context standing in for an emulator CPU thread.
pub struct MockContext {
    halted: Mutex<bool>,
    cond: Condvar,
    pub halts: AtomicUsize,
    pub resumes: AtomicUsize,
    pub resets: AtomicUsize,
    pub kicks: AtomicUsize,
    pub reset_base: AtomicU64,
}

impl MockContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            halted: Mutex::new(true),
            cond: Condvar::new(),
            halts: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            kicks: AtomicUsize::new(0),
            reset_base: AtomicU64::new(0),
        })
    }

    pub fn is_halted(&self) -> bool {
        *self.halted.lock().unwrap()
    }

    /// Block the calling thread until the context is resumed. Returns false on timeout.
    pub fn wait_resumed(&self, timeout: Duration) -> bool {
        let halted = self.halted.lock().unwrap();
        let (halted, _) = self
            .cond
            .wait_timeout_while(halted, timeout, |halted| *halted)
            .unwrap();
        !*halted
    }

    /// Block until the context has been kicked at least `count` times.
    pub fn wait_kicks(&self, count: usize, timeout: Duration) -> bool {
        let guard = self.halted.lock().unwrap();
        let (_guard, res) = self
            .cond
            .wait_timeout_while(guard, timeout, |_| self.kicks.load(Ordering::SeqCst) < count)
            .unwrap();
        !res.timed_out()
    }
}

impl VpContext for MockContext {
    fn halt(&self) {
        *self.halted.lock().unwrap() = true;
        self.halts.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        *self.halted.lock().unwrap() = false;
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.cond.notify_all();
    }

    fn reset(&self, reset_base: u64) {
        self.reset_base.store(reset_base, Ordering::SeqCst);
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn kick(&self) {
        let _guard = self.halted.lock().unwrap();
        self.kicks.fetch_add(1, Ordering::SeqCst);
        self.cond.notify_all();
    }
}

/// Records every level change of the CPU interrupt pins.
#[derive(Default)]
pub struct RecordingIrq {
    levels: Mutex<HashMap<(usize, usize), bool>>,
    pub changes: Mutex<Vec<(usize, usize, bool)>>,
}

impl RecordingIrq {
    pub fn level(&self, vp: usize, pin: usize) -> bool {
        self.levels.lock().unwrap().get(&(vp, pin)).copied().unwrap_or(false)
    }

    pub fn change_count(&self) -> usize {
        self.changes.lock().unwrap().len()
    }
}

impl IrqSink for RecordingIrq {
    fn set_irq(&self, vp: usize, pin: usize, level: bool) {
        self.levels.lock().unwrap().insert((vp, pin), level);
        self.changes.lock().unwrap().push((vp, pin, level));
    }
}

pub struct Harness {
    pub config: CpsConfig,
    pub cps: Arc<Cps>,
    pub clock: Arc<VirtualClock>,
    pub irq: Arc<RecordingIrq>,
    pub ctxs: Vec<Arc<MockContext>>,
}

impl Harness {
    pub fn new(config: CpsConfig) -> Self {
        let _ = mips_cps::kernel::logger_init_with_level(log::LevelFilter::Warn);
        let ctxs: Vec<Arc<MockContext>> = (0..config.num_vps).map(|_| MockContext::new()).collect();
        let contexts = ctxs.iter().map(|c| c.clone() as Arc<dyn VpContext>).collect();
        let clock = Arc::new(VirtualClock::new(config.num_vps));
        let irq = Arc::new(RecordingIrq::default());
        let cps = Cps::new(&config, contexts, clock.clone(), irq.clone()).unwrap();
        Self {
            config,
            cps: Arc::new(cps),
            clock,
            irq,
            ctxs,
        }
    }

    /// A cluster of `num_vps` VPs, all started and past their reset.
    pub fn booted(num_vps: usize) -> Self {
        let mut config = CpsConfig::new(num_vps);
        config.cpc.vp_start_running = (1u64 << num_vps) - 1;
        let harness = Self::new(config);
        for vp in 0..num_vps {
            harness.cps.vp_poll(vp);
        }
        harness
    }

    pub fn gic(&self, offset: u64) -> u64 {
        self.config.gic.base_addr + offset
    }

    pub fn cpc(&self, offset: u64) -> u64 {
        self.config.cpc.base_addr + offset
    }

    /// Advance virtual time and deliver the compare alarms that matured.
    pub fn advance(&self, ns: u64) -> Vec<usize> {
        let fired = self.clock.advance(ns);
        for &vp in fired.iter() {
            self.cps.timer_expire(vp);
        }
        fired
    }
}

/// Base of the ITU storage window the tests enable.
pub const ITC_STORAGE_BASE: u64 = 0x1710_0000;

/// Enable the ITU storage window at `ITC_STORAGE_BASE` with the minimum cell stride.
pub fn itc_enable(harness: &Harness) {
    let am0 = harness.config.itu.tag_base_addr;
    harness.cps.write(0, am0, 8, ITC_STORAGE_BASE | 1).unwrap();
}

pub fn itc_addr(cell: usize, view: u64) -> u64 {
    ITC_STORAGE_BASE + ((cell as u64) << 7) + (view << 3)
}

/// Perform an access the way an execution engine does: a blocked VP waits until it is
/// resumed and then re-executes the access.
pub fn exec(harness: &Harness, vp: usize, addr: u64, write: Option<u64>) -> u64 {
    loop {
        let res = match write {
            Some(val) => harness.cps.write(vp, addr, 8, val),
            None => harness.cps.read(vp, addr, 8),
        };
        match res {
            Ok(val) => return val,
            Err(EmuFault::Blocked) => {
                assert!(
                    harness.ctxs[vp].wait_resumed(Duration::from_secs(10)),
                    "vp {} never resumed",
                    vp
                );
            }
            Err(fault) => panic!("vp {} access at {:#x} faulted: {:?}", vp, addr, fault),
        }
    }
}
