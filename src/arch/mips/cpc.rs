// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Cluster power controller: starts and stops VPs.

use std::ops::Range;

use crate::config::CpcConfig;
use crate::device::{EmuContext, EmuDev, EmuDeviceType, EmuResult};
use crate::error::{ErrorKind, Result};
use crate::kernel::{vp_msg_send, PowerEvent, PowerMessage, Vp, VpArray, VpMessage, VpState};
use crate::utils::{bit_clear, bit_mask, bit_set, bitmap_iter};

pub const CPC_ADDRSPACE_SZ: u64 = 0x6000;

/// Cluster-local and core-other register blocks
pub const CPC_CL_BASE_OFS: u64 = 0x2000;
pub const CPC_CO_BASE_OFS: u64 = 0x4000;

pub const CPC_VP_STOP_OFS: u64 = 0x20;
pub const CPC_VP_RUN_OFS: u64 = 0x28;
pub const CPC_VP_RUNNING_OFS: u64 = 0x30;

pub struct Cpc {
    address_range: Range<u64>,
    num_vp: usize,
    vp_start_running: u64,
    /// VPs told to run. Set as soon as the reset is posted, before the VP executes.
    vp_running: u64,
}

impl Cpc {
    pub fn new(config: &CpcConfig, num_vp: usize) -> Result<Self> {
        if config.vp_start_running & !bit_mask(num_vp) != 0 {
            return Err(ErrorKind::InvalidParam.msg(format!(
                "incorrect vp_start_running {:#x} for num_vp = {}",
                config.vp_start_running, num_vp
            )));
        }
        Ok(Self {
            address_range: config.base_addr..config.base_addr + CPC_ADDRSPACE_SZ,
            num_vp,
            vp_start_running: config.vp_start_running,
            vp_running: 0,
        })
    }

    fn vp_run_mask(&self) -> u64 {
        bit_mask(self.num_vp)
    }

    pub fn vp_running(&self) -> u64 {
        self.vp_running
    }

    /// Start every VP in `mask` that is not running. The reset itself is carried out
    /// later on the VP's own thread.
    pub fn run(&mut self, mask: u64, src: Option<usize>, vps: &VpArray) {
        let mask = mask & self.vp_run_mask() & !self.vp_running;
        for id in bitmap_iter(mask) {
            if let Some(vp) = vps.get(id) {
                debug!("cpc: run vp {}", id);
                let msg = PowerMessage {
                    src,
                    event: PowerEvent::ResetAndResume,
                };
                vp_msg_send(vp, VpMessage::Power(msg));
            }
            self.vp_running = bit_set(self.vp_running, id);
        }
    }

    /// Halt every running VP in `mask`.
    pub fn stop(&mut self, mask: u64, vps: &VpArray) {
        let mask = mask & self.vp_run_mask() & self.vp_running;
        for id in bitmap_iter(mask) {
            if let Some(vp) = vps.get(id) {
                info!("cpc: vp {} stopped", id);
                vp.power_off();
            }
            self.vp_running = bit_clear(self.vp_running, id);
        }
    }

    pub fn reset(&mut self, vps: &VpArray) {
        self.stop(self.vp_running, vps);
        self.vp_running = 0;
        self.run(self.vp_start_running, None, vps);
    }
}

/// Handle a power message on the target VP's own thread.
pub fn cpc_power_handler(vp: &Vp, msg: &PowerMessage) {
    match msg.event {
        PowerEvent::ResetAndResume => {
            let reset_base = vp.reset_base();
            vp.set_state(VpState::Running);
            vp.context().reset(reset_base);
            vp.context().resume();
            match msg.src {
                Some(src) => info!("cpc: vp {} started by vp {} at {:#x}", vp.id(), src, reset_base),
                None => info!("cpc: vp {} started at {:#x}", vp.id(), reset_base),
            }
        }
    }
}

impl EmuDev for Cpc {
    fn emu_type(&self) -> EmuDeviceType {
        EmuDeviceType::EmuDeviceTCpc
    }

    fn address_range(&self) -> Range<u64> {
        self.address_range.clone()
    }

    fn handler(&mut self, emu_ctx: &EmuContext, vps: &VpArray) -> EmuResult {
        let offset = emu_ctx.address - self.address_range.start;
        let reg = match offset {
            o if (CPC_CL_BASE_OFS..CPC_CO_BASE_OFS).contains(&o) => o - CPC_CL_BASE_OFS,
            o if (CPC_CO_BASE_OFS..CPC_ADDRSPACE_SZ).contains(&o) => o - CPC_CO_BASE_OFS,
            _ => u64::MAX,
        };
        let ret = match (reg, emu_ctx.write) {
            (CPC_VP_RUN_OFS, true) => {
                self.run(emu_ctx.val, Some(emu_ctx.vp), vps);
                0
            }
            (CPC_VP_STOP_OFS, true) => {
                self.stop(emu_ctx.val, vps);
                0
            }
            (CPC_VP_RUNNING_OFS, false) => self.vp_running,
            _ => {
                warn!(
                    "cpc: unimplemented {} at offset {:#x}",
                    if emu_ctx.write { "write" } else { "read" },
                    offset
                );
                0
            }
        };
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{vp_msg_handler, VpContext};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        halt: AtomicUsize,
        resume: AtomicUsize,
        reset: AtomicUsize,
        kick: AtomicUsize,
    }

    impl VpContext for Counters {
        fn halt(&self) {
            self.halt.fetch_add(1, Ordering::SeqCst);
        }
        fn resume(&self) {
            self.resume.fetch_add(1, Ordering::SeqCst);
        }
        fn reset(&self, _reset_base: u64) {
            self.reset.fetch_add(1, Ordering::SeqCst);
        }
        fn kick(&self) {
            self.kick.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn vps(n: usize) -> (Vec<Arc<Counters>>, VpArray) {
        let ctxs: Vec<Arc<Counters>> = (0..n).map(|_| Arc::new(Counters::default())).collect();
        let dyn_ctxs = ctxs.iter().map(|c| c.clone() as Arc<dyn VpContext>).collect();
        (ctxs, VpArray::new(dyn_ctxs, 0xbfc0_0000))
    }

    #[test]
    fn start_mask_outside_vps_is_rejected() {
        let config = CpcConfig {
            base_addr: 0,
            vp_start_running: 0b100,
        };
        let err = Cpc::new(&config, 2).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);
        assert!(Cpc::new(&config, 3).is_ok());
    }

    #[test]
    fn run_posts_reset_to_target_mailbox() {
        let (ctxs, vps) = vps(2);
        let mut cpc = Cpc::new(&CpcConfig::default(), 2).unwrap();
        cpc.run(0b10, Some(0), &vps);
        assert_eq!(cpc.vp_running(), 0b10);
        assert_eq!(ctxs[1].kick.load(Ordering::SeqCst), 1);
        // nothing happens to the target until it drains its mailbox
        assert_eq!(ctxs[1].reset.load(Ordering::SeqCst), 0);
        assert_eq!(vps.get(1).unwrap().state(), VpState::Halted);

        assert_eq!(vp_msg_handler(vps.get(1).unwrap()), 1);
        assert_eq!(ctxs[1].reset.load(Ordering::SeqCst), 1);
        assert_eq!(ctxs[1].resume.load(Ordering::SeqCst), 1);
        assert_eq!(vps.get(1).unwrap().state(), VpState::Running);
    }

    #[test]
    fn run_and_stop_are_idempotent() {
        let (ctxs, vps) = vps(2);
        let mut cpc = Cpc::new(&CpcConfig::default(), 2).unwrap();
        cpc.run(0b01, None, &vps);
        cpc.run(0b01, None, &vps);
        assert_eq!(ctxs[0].kick.load(Ordering::SeqCst), 1);
        cpc.stop(0b11, &vps);
        cpc.stop(0b11, &vps);
        assert_eq!(cpc.vp_running(), 0);
        assert_eq!(ctxs[0].halt.load(Ordering::SeqCst), 1);
        assert_eq!(ctxs[1].halt.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_drops_unhandled_reset() {
        let (ctxs, vps) = vps(1);
        let mut cpc = Cpc::new(&CpcConfig::default(), 1).unwrap();
        cpc.run(1, None, &vps);
        cpc.stop(1, &vps);
        assert_eq!(vp_msg_handler(vps.get(0).unwrap()), 0);
        assert_eq!(ctxs[0].reset.load(Ordering::SeqCst), 0);
        assert_eq!(vps.get(0).unwrap().state(), VpState::Halted);
    }

    #[test]
    fn mmio_blocks_share_the_running_bitmap() {
        let (_, vps) = vps(3);
        let mut cpc = Cpc::new(&CpcConfig::default(), 3).unwrap();
        let base = CpcConfig::default().base_addr;
        let run = EmuContext::write(0, base + CPC_CO_BASE_OFS + CPC_VP_RUN_OFS, 4, 0b110);
        cpc.handler(&run, &vps).unwrap();
        let running = EmuContext::read(0, base + CPC_CL_BASE_OFS + CPC_VP_RUNNING_OFS, 4);
        assert_eq!(cpc.handler(&running, &vps), Ok(0b110));
        let stop = EmuContext::write(0, base + CPC_CL_BASE_OFS + CPC_VP_STOP_OFS, 4, 0b010);
        cpc.handler(&stop, &vps).unwrap();
        assert_eq!(cpc.vp_running(), 0b100);
        let unknown = EmuContext::read(0, base + 0x10, 4);
        assert_eq!(cpc.handler(&unknown, &vps), Ok(0));
    }
}
