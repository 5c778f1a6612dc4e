// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use std::sync::Arc;

use spin::Mutex;

use crate::arch::{Cpc, Gic, Itu};
use crate::config::CpsConfig;
use crate::device::{EmuContext, EmuDev, EmuFault, EmuResult};
use crate::error::{ErrorKind, Result};

use super::{vp_msg_handler, IrqSink, TimerSource, Vp, VpArray, VpContext, VpState};

/// Device state of the cluster. Every access to it goes through the `Cps` lock.
pub struct CpsInner {
    pub gic: Gic,
    pub cpc: Cpc,
    pub itu: Itu,
}

impl CpsInner {
    fn find_emu_dev(&mut self, addr: u64) -> Option<&mut dyn EmuDev> {
        if self.gic.contains(addr) {
            Some(&mut self.gic)
        } else if self.cpc.contains(addr) {
            Some(&mut self.cpc)
        } else if self.itu.contains(addr) {
            Some(&mut self.itu)
        } else {
            None
        }
    }
}

/// Coherent processing system: the GIC, CPC and ITU of one cluster and its VPs.
///
/// Register accesses, line changes and timer callbacks may come from any VP thread; they
/// are serialised by one lock, so each one is applied entirely or not at all.
pub struct Cps {
    inner: Mutex<CpsInner>,
    vps: VpArray,
}

impl Cps {
    /// Build the cluster and put it through a device reset, which posts a start to the VPs
    /// of the initial running set.
    pub fn new(
        config: &CpsConfig,
        contexts: Vec<Arc<dyn VpContext>>,
        timer_source: Arc<dyn TimerSource>,
        irq_sink: Arc<dyn IrqSink>,
    ) -> Result<Self> {
        config.validate()?;
        if contexts.len() != config.num_vps {
            return Err(ErrorKind::InvalidConfig.msg(format!(
                "{} vp contexts for num_vps = {}",
                contexts.len(),
                config.num_vps
            )));
        }
        let gic = Gic::new(&config.gic, config.num_vps, timer_source, irq_sink)?;
        let cpc = Cpc::new(&config.cpc, config.num_vps)?;
        let itu = Itu::new(&config.itu)?;
        let cps = Self {
            inner: Mutex::new(CpsInner { gic, cpc, itu }),
            vps: VpArray::new(contexts, config.reset_base),
        };
        cps.reset();
        info!(
            "cps: {} vps, {} irqs, {} itc cells",
            config.num_vps,
            config.gic.num_irq,
            config.itu.num_fifo + config.itu.num_semaphores
        );
        Ok(cps)
    }

    pub fn num_vps(&self) -> usize {
        self.vps.len()
    }

    pub fn vp(&self, id: usize) -> Option<&Vp> {
        self.vps.get(id)
    }

    /// Bus entry point for a guest load or store.
    pub fn handle(&self, emu_ctx: &EmuContext) -> EmuResult {
        if emu_ctx.vp >= self.vps.len() {
            error!("cps: access to {:#x} from unknown vp {}", emu_ctx.address, emu_ctx.vp);
            return Err(EmuFault::BusError);
        }
        if !matches!(emu_ctx.width, 1 | 2 | 4 | 8) {
            warn!("cps: invalid access width {} at {:#x}", emu_ctx.width, emu_ctx.address);
            return Err(EmuFault::BusError);
        }

        let mut inner = self.inner.lock();
        let dev = match inner.find_emu_dev(emu_ctx.address) {
            Some(dev) => dev,
            None => {
                error!("cps: no device at {:#x}", emu_ctx.address);
                return Err(EmuFault::Unmapped);
            }
        };
        let ret = dev.handler(emu_ctx, &self.vps).map(|val| val & emu_ctx.width_mask());
        trace!(
            "cps: vp {} {} {} at {:#x} width {} val {:#x} -> {:?}",
            emu_ctx.vp,
            if emu_ctx.write { "write" } else { "read" },
            dev.emu_type(),
            emu_ctx.address,
            emu_ctx.width,
            emu_ctx.val,
            ret
        );
        ret
    }

    pub fn read(&self, vp: usize, addr: u64, width: usize) -> EmuResult {
        self.handle(&EmuContext::read(vp, addr, width))
    }

    pub fn write(&self, vp: usize, addr: u64, width: usize, val: u64) -> EmuResult {
        self.handle(&EmuContext::write(vp, addr, width, val)).map(|_| 0)
    }

    /// External level input of shared interrupt line `irq`.
    pub fn set_irq(&self, irq: usize, level: bool) {
        self.inner.lock().gic.set_irq(irq, level);
    }

    /// Host alarm callback for the compare channel of `vp`.
    pub fn timer_expire(&self, vp: usize) {
        trace!("cps: compare alarm of vp {}", vp);
        self.inner.lock().gic.timer_expire(vp);
    }

    /// Drain the mailbox of `vp`. Must be called from the VP's own thread, typically
    /// after its context was kicked. Returns the number of messages handled.
    pub fn vp_poll(&self, vp: usize) -> usize {
        match self.vps.get(vp) {
            Some(v) => {
                let _inner = self.inner.lock();
                vp_msg_handler(v)
            }
            None => 0,
        }
    }

    pub fn vp_state(&self, vp: usize) -> Option<VpState> {
        self.vps.get(vp).map(|v| v.state())
    }

    /// Whether the engine may dispatch instructions on `vp`.
    pub fn vp_runnable(&self, vp: usize) -> bool {
        self.vps.get(vp).map_or(false, |v| v.runnable())
    }

    /// Device reset of the whole cluster.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.gic.reset();
        inner.itu.reset();
        inner.cpc.reset(&self.vps);
        debug!("cps: reset");
    }

    pub fn with_gic<R>(&self, f: impl FnOnce(&mut Gic) -> R) -> R {
        f(&mut self.inner.lock().gic)
    }

    pub fn with_cpc<R>(&self, f: impl FnOnce(&mut Cpc, &VpArray) -> R) -> R {
        f(&mut self.inner.lock().cpc, &self.vps)
    }

    pub fn with_itu<R>(&self, f: impl FnOnce(&mut Itu) -> R) -> R {
        f(&mut self.inner.lock().itu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::VirtualClock;

    struct Nop;

    impl VpContext for Nop {
        fn halt(&self) {}
        fn resume(&self) {}
        fn reset(&self, _reset_base: u64) {}
        fn kick(&self) {}
    }

    impl IrqSink for Nop {
        fn set_irq(&self, _vp: usize, _pin: usize, _level: bool) {}
    }

    fn cps(num_vps: usize) -> Result<Cps> {
        let contexts = (0..num_vps).map(|_| Arc::new(Nop) as Arc<dyn VpContext>).collect();
        Cps::new(
            &CpsConfig::new(num_vps),
            contexts,
            Arc::new(VirtualClock::new(num_vps)),
            Arc::new(Nop),
        )
    }

    #[test]
    fn context_count_must_match() {
        let err = Cps::new(
            &CpsConfig::new(2),
            vec![Arc::new(Nop) as Arc<dyn VpContext>],
            Arc::new(VirtualClock::new(2)),
            Arc::new(Nop),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn start_set_is_posted_on_construction() {
        let cps = cps(2).unwrap();
        assert_eq!(cps.with_cpc(|cpc, _| cpc.vp_running()), 1);
        assert!(!cps.vp_runnable(0));
        assert_eq!(cps.vp_poll(0), 1);
        assert!(cps.vp_runnable(0));
        assert_eq!(cps.vp_state(1), Some(VpState::Halted));
        assert_eq!(cps.vp_state(2), None);
    }

    #[test]
    fn unmapped_and_malformed_accesses() {
        let cps = cps(1).unwrap();
        assert_eq!(cps.read(0, 0x10, 4), Err(EmuFault::Unmapped));
        let gic = CpsConfig::default().gic.base_addr;
        assert_eq!(cps.read(0, gic, 3), Err(EmuFault::BusError));
        assert_eq!(cps.read(1, gic, 4), Err(EmuFault::BusError));
        // narrow reads are truncated to the access width
        assert_eq!(cps.read(0, gic + 2, 1), Ok(0));
        assert_eq!(cps.read(0, gic, 1), Ok(0));
    }
}
