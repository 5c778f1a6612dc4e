// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Global interrupt controller: shared interrupt lines and per-VP compare channels routed
//! onto the per-VP CPU interrupt pins.

use std::ops::Range;
use std::sync::Arc;

use tock_registers::register_bitfields;
use tock_registers::LocalRegisterCopy;

use crate::config::{GicConfig, GIC_IRQ_NUM_MAX};
use crate::device::{EmuContext, EmuDev, EmuDeviceType, EmuResult};
use crate::error::{ErrorKind, Result};
use crate::kernel::{IrqSink, TimerSource, VpArray};
use crate::utils::{bit_clear, bit_get, bit_set, bitmap_iter, width_mask};

use super::GicTimer;

pub const GIC_ADDRSPACE_SZ: u64 = 0x20000;

// shared section
pub const GIC_SH_CONFIG_OFS: u64 = 0x0000;
pub const GIC_SH_COUNTERLO_OFS: u64 = 0x0010;
pub const GIC_SH_COUNTERHI_OFS: u64 = 0x0014;
pub const GIC_SH_WEDGE_OFS: u64 = 0x0280;
pub const GIC_SH_RMASK_OFS: u64 = 0x0300;
pub const GIC_SH_SMASK_OFS: u64 = 0x0380;
pub const GIC_SH_MASK_OFS: u64 = 0x0400;
pub const GIC_SH_PEND_OFS: u64 = 0x0480;
pub const GIC_SH_MAP0_PIN_OFS: u64 = 0x0500;
pub const GIC_SH_MAP0_VP_OFS: u64 = 0x2000;
/// Each set/clear/mirror bank covers 256 lines.
const GIC_SH_BANK_SZ: u64 = 0x20;
const GIC_SH_MAP_PIN_STRIDE: u64 = 4;
const GIC_SH_MAP_VP_STRIDE: u64 = 0x20;

pub const GIC_VP_LOCAL_SECTION_OFS: u64 = 0x8000;
pub const GIC_VP_OTHER_SECTION_OFS: u64 = 0xc000;
pub const GIC_USM_SECTION_OFS: u64 = 0x10000;
const GIC_VP_SECTION_SZ: u64 = 0x4000;

// VP local/other section
pub const GIC_VP_CTL_OFS: u64 = 0x0000;
pub const GIC_VP_PEND_OFS: u64 = 0x0004;
pub const GIC_VP_MASK_OFS: u64 = 0x0008;
pub const GIC_VP_RMASK_OFS: u64 = 0x000c;
pub const GIC_VP_SMASK_OFS: u64 = 0x0010;
pub const GIC_VP_COMPARE_MAP_OFS: u64 = 0x0044;
pub const GIC_VP_OTHER_ADDR_OFS: u64 = 0x0080;
pub const GIC_VP_IDENT_OFS: u64 = 0x0088;
pub const GIC_VP_COMPARE_LO_OFS: u64 = 0x00a0;
pub const GIC_VP_COMPARE_HI_OFS: u64 = 0x00a4;

// user mode visible section
pub const GIC_USER_MODE_COUNTERLO: u64 = 0x0000;
pub const GIC_USER_MODE_COUNTERHI: u64 = 0x0004;

/// Highest CPU interrupt pin a source can be routed to.
pub const GIC_CPU_INT_MAX: usize = 5;
pub const GIC_SH_WEDGE_RW_MSK: u64 = 1 << 31;
pub const GIC_VP_CTL_EIC_MSK: u32 = 1;
pub const GIC_VP_SET_RESET_MSK: u32 = 0x3f;
pub const GIC_VP_MASK_RESET: u32 = 0x32;

register_bitfields! {u32,
    pub GIC_SH_CONFIG [
        COUNTSTOP OFFSET(28) NUMBITS(1) [],
        NUMINTRS OFFSET(16) NUMBITS(8) [],
        PVPS OFFSET(0) NUMBITS(8) []
    ]
}

register_bitfields! {u32,
    pub GIC_MAP [
        MAP_TO_PIN OFFSET(31) NUMBITS(1) [],
        MAP_TO_NMI OFFSET(30) NUMBITS(1) [],
        MAP_TO_YQ OFFSET(29) NUMBITS(1) [],
        MAP OFFSET(0) NUMBITS(6) []
    ]
}

register_bitfields! {u32,
    pub GIC_VP_MASK [
        SWINT1 OFFSET(5) NUMBITS(1) [],
        SWINT0 OFFSET(4) NUMBITS(1) [],
        PERFCTR OFFSET(3) NUMBITS(1) [],
        TIMER OFFSET(2) NUMBITS(1) [],
        CMP OFFSET(1) NUMBITS(1) [],
        WD OFFSET(0) NUMBITS(1) []
    ]
}

type GicMap = LocalRegisterCopy<u32, GIC_MAP::Register>;
type GicVpMask = LocalRegisterCopy<u32, GIC_VP_MASK::Register>;

fn gic_map_reset() -> GicMap {
    GicMap::new(GIC_MAP::MAP_TO_PIN::SET.value)
}

/// Pin number of a routing register, if it routes to a CPU pin the model supports.
fn gic_map_pin(map: &GicMap) -> Option<usize> {
    let pin = map.read(GIC_MAP::MAP) as usize;
    if map.is_set(GIC_MAP::MAP_TO_PIN) && pin <= GIC_CPU_INT_MAX {
        Some(pin)
    } else {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GicVpSection {
    Local,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GicVpReg {
    Ctl,
    Pend,
    Mask,
    Rmask,
    Smask,
    CompareMap,
    OtherAddr,
    Ident,
    CompareLo,
    CompareHi,
}

/// A GIC register, decoded from its offset in the GIC window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GicReg {
    ShConfig,
    ShCounterLo,
    ShCounterHi,
    ShWedge,
    /// Line-bitmap banks, carrying the first line covered by the accessed byte.
    ShRmask(usize),
    ShSmask(usize),
    ShMask(usize),
    ShPend(usize),
    ShMapPin(usize),
    /// VP routing bitmap of a line, carrying the accessed byte within the 32-byte entry.
    ShMapVp { irq: usize, byte: usize },
    Vp(GicVpSection, GicVpReg),
    UsmCounterLo,
    UsmCounterHi,
}

impl GicReg {
    /// Pure offset decoder; `None` for offsets the model does not implement.
    pub fn decode(offset: u64) -> Option<GicReg> {
        let bank = |base: u64| ((offset - base) * 8) as usize;
        let reg = match offset {
            GIC_SH_CONFIG_OFS => GicReg::ShConfig,
            GIC_SH_COUNTERLO_OFS => GicReg::ShCounterLo,
            GIC_SH_COUNTERHI_OFS => GicReg::ShCounterHi,
            GIC_SH_WEDGE_OFS => GicReg::ShWedge,
            o if (GIC_SH_RMASK_OFS..GIC_SH_RMASK_OFS + GIC_SH_BANK_SZ).contains(&o) => {
                GicReg::ShRmask(bank(GIC_SH_RMASK_OFS))
            }
            o if (GIC_SH_SMASK_OFS..GIC_SH_SMASK_OFS + GIC_SH_BANK_SZ).contains(&o) => {
                GicReg::ShSmask(bank(GIC_SH_SMASK_OFS))
            }
            o if (GIC_SH_MASK_OFS..GIC_SH_MASK_OFS + GIC_SH_BANK_SZ).contains(&o) => {
                GicReg::ShMask(bank(GIC_SH_MASK_OFS))
            }
            o if (GIC_SH_PEND_OFS..GIC_SH_PEND_OFS + GIC_SH_BANK_SZ).contains(&o) => {
                GicReg::ShPend(bank(GIC_SH_PEND_OFS))
            }
            o if (GIC_SH_MAP0_PIN_OFS..GIC_SH_MAP0_PIN_OFS + GIC_SH_MAP_PIN_STRIDE * GIC_IRQ_NUM_MAX as u64)
                .contains(&o) =>
            {
                GicReg::ShMapPin(((o - GIC_SH_MAP0_PIN_OFS) / GIC_SH_MAP_PIN_STRIDE) as usize)
            }
            o if (GIC_SH_MAP0_VP_OFS..GIC_SH_MAP0_VP_OFS + GIC_SH_MAP_VP_STRIDE * GIC_IRQ_NUM_MAX as u64)
                .contains(&o) =>
            {
                GicReg::ShMapVp {
                    irq: ((o - GIC_SH_MAP0_VP_OFS) / GIC_SH_MAP_VP_STRIDE) as usize,
                    byte: ((o - GIC_SH_MAP0_VP_OFS) % GIC_SH_MAP_VP_STRIDE) as usize,
                }
            }
            o if (GIC_VP_LOCAL_SECTION_OFS..GIC_USM_SECTION_OFS).contains(&o) => {
                let section = if o < GIC_VP_OTHER_SECTION_OFS {
                    GicVpSection::Local
                } else {
                    GicVpSection::Other
                };
                let vp_reg = match o % GIC_VP_SECTION_SZ {
                    GIC_VP_CTL_OFS => GicVpReg::Ctl,
                    GIC_VP_PEND_OFS => GicVpReg::Pend,
                    GIC_VP_MASK_OFS => GicVpReg::Mask,
                    GIC_VP_RMASK_OFS => GicVpReg::Rmask,
                    GIC_VP_SMASK_OFS => GicVpReg::Smask,
                    GIC_VP_COMPARE_MAP_OFS => GicVpReg::CompareMap,
                    GIC_VP_OTHER_ADDR_OFS => GicVpReg::OtherAddr,
                    GIC_VP_IDENT_OFS => GicVpReg::Ident,
                    GIC_VP_COMPARE_LO_OFS => GicVpReg::CompareLo,
                    GIC_VP_COMPARE_HI_OFS => GicVpReg::CompareHi,
                    _ => return None,
                };
                GicReg::Vp(section, vp_reg)
            }
            o if o == GIC_USM_SECTION_OFS + GIC_USER_MODE_COUNTERLO => GicReg::UsmCounterLo,
            o if o == GIC_USM_SECTION_OFS + GIC_USER_MODE_COUNTERHI => GicReg::UsmCounterHi,
            _ => return None,
        };
        Some(reg)
    }
}

/// Shared interrupt line
struct GicIrq {
    enabled: bool,
    pending: bool,
    map_pin: GicMap,
    map_vp: Option<usize>,
}

impl GicIrq {
    fn new() -> Self {
        Self {
            enabled: false,
            pending: false,
            map_pin: gic_map_reset(),
            map_vp: None,
        }
    }

    /// The (VP, pin) this line drives, if routed.
    fn target(&self) -> Option<(usize, usize)> {
        Some((self.map_vp?, gic_map_pin(&self.map_pin)?))
    }
}

struct GicVp {
    ctl: u32,
    pend: u32,
    mask: GicVpMask,
    compare_map: GicMap,
    other_addr: usize,
    /// Current level of each output pin, one bit per pin.
    pin_level: u64,
}

impl GicVp {
    fn new() -> Self {
        Self {
            ctl: 0,
            pend: 0,
            mask: GicVpMask::new(GIC_VP_MASK_RESET),
            compare_map: gic_map_reset(),
            other_addr: 0,
            pin_level: 0,
        }
    }

    /// Whether the compare channel is asserting `pin`.
    fn compare_level(&self, pin: usize) -> bool {
        gic_map_pin(&self.compare_map) == Some(pin)
            && self.mask.is_set(GIC_VP_MASK::CMP)
            && self.pend & GIC_VP_MASK::CMP::SET.value != 0
    }
}

pub struct Gic {
    address_range: Range<u64>,
    irqs: Vec<GicIrq>,
    vps: Vec<GicVp>,
    timer: GicTimer,
    irq_sink: Arc<dyn IrqSink>,
}

impl Gic {
    pub fn new(
        config: &GicConfig,
        num_vp: usize,
        timer_source: Arc<dyn TimerSource>,
        irq_sink: Arc<dyn IrqSink>,
    ) -> Result<Self> {
        if config.num_irq < 8 || config.num_irq > GIC_IRQ_NUM_MAX || config.num_irq % 8 != 0 {
            return Err(ErrorKind::InvalidParam.msg(format!(
                "num_irq {} must be a multiple of 8 in 8..={}",
                config.num_irq, GIC_IRQ_NUM_MAX
            )));
        }
        let mut gic = Self {
            address_range: config.base_addr..config.base_addr + GIC_ADDRSPACE_SZ,
            irqs: (0..config.num_irq).map(|_| GicIrq::new()).collect(),
            vps: (0..num_vp).map(|_| GicVp::new()).collect(),
            timer: GicTimer::new(num_vp, timer_source),
            irq_sink,
        };
        gic.reset();
        Ok(gic)
    }

    pub fn num_irq(&self) -> usize {
        self.irqs.len()
    }

    pub fn num_vp(&self) -> usize {
        self.vps.len()
    }

    fn pin_level(&self, vp: usize, pin: usize) -> bool {
        self.irqs
            .iter()
            .any(|irq| irq.enabled && irq.pending && irq.target() == Some((vp, pin)))
            || self.vps[vp].compare_level(pin)
    }

    /// Recompute the level of (`vp`, `pin`) and forward it to the CPU if it changed.
    fn update_vp_pin(&mut self, vp: usize, pin: usize) {
        if vp >= self.vps.len() || pin > GIC_CPU_INT_MAX {
            return;
        }
        let level = self.pin_level(vp, pin);
        if bit_get(self.vps[vp].pin_level, pin) == level {
            return;
        }
        let pin_level = self.vps[vp].pin_level;
        self.vps[vp].pin_level = if level {
            bit_set(pin_level, pin)
        } else {
            bit_clear(pin_level, pin)
        };
        trace!("gic: vp {} pin {} -> {}", vp, pin, level);
        self.irq_sink.set_irq(vp, pin, level);
    }

    fn update_pin_for_irq(&mut self, irq: usize) {
        if let Some((vp, pin)) = self.irqs[irq].target() {
            self.update_vp_pin(vp, pin);
        }
    }

    fn update_compare_pin(&mut self, vp: usize) {
        if let Some(pin) = gic_map_pin(&self.vps[vp].compare_map) {
            self.update_vp_pin(vp, pin);
        }
    }

    /// Current level of `pin` of `vp` as last forwarded to the CPU.
    pub fn pin(&self, vp: usize, pin: usize) -> bool {
        self.vps.get(vp).map_or(false, |v| bit_get(v.pin_level, pin))
    }

    /// External level input of shared line `irq`.
    pub fn set_irq(&mut self, irq: usize, level: bool) {
        if irq >= self.irqs.len() {
            warn!("gic: set_irq on line {} beyond {} lines", irq, self.irqs.len());
            return;
        }
        self.irqs[irq].pending = level;
        self.update_pin_for_irq(irq);
    }

    pub fn irq_pending(&self, irq: usize) -> bool {
        self.irqs.get(irq).map_or(false, |i| i.pending)
    }

    pub fn irq_enabled(&self, irq: usize) -> bool {
        self.irqs.get(irq).map_or(false, |i| i.enabled)
    }

    pub fn set_irq_enabled(&mut self, irq: usize, enabled: bool) {
        if irq >= self.irqs.len() {
            return;
        }
        self.irqs[irq].enabled = enabled;
        self.update_pin_for_irq(irq);
    }

    /// Route line `irq` to `pin` of its VP. Returns false if the routing value is refused.
    fn map_irq_pin(&mut self, irq: usize, map: u32) -> bool {
        if gic_map_pin(&GicMap::new(map)).is_none() {
            warn!("gic: unsupported pin routing {:#x} for line {}", map, irq);
            return false;
        }
        let old = self.irqs[irq].target();
        self.irqs[irq].map_pin = GicMap::new(map);
        if let Some((vp, pin)) = old {
            self.update_vp_pin(vp, pin);
        }
        self.update_pin_for_irq(irq);
        debug!("gic: line {} mapped to pin {:#x}", irq, map);
        true
    }

    fn map_irq_vp(&mut self, irq: usize, vp: Option<usize>) {
        let old = self.irqs[irq].target();
        self.irqs[irq].map_vp = vp;
        if let Some((vp, pin)) = old {
            self.update_vp_pin(vp, pin);
        }
        self.update_pin_for_irq(irq);
        debug!("gic: line {} mapped to vp {:?}", irq, vp);
    }

    /// Route line `irq` to (`vp`, `pin`).
    pub fn route_irq(&mut self, irq: usize, vp: usize, pin: usize) -> bool {
        if irq >= self.irqs.len() || vp >= self.vps.len() || pin > GIC_CPU_INT_MAX {
            return false;
        }
        let map = (GIC_MAP::MAP_TO_PIN::SET + GIC_MAP::MAP.val(pin as u32)).value;
        if !self.map_irq_pin(irq, map) {
            return false;
        }
        self.map_irq_vp(irq, Some(vp));
        true
    }

    /// Deliver every compare match the counter has already passed.
    fn sync_timers(&mut self) {
        let fired = self.timer.poll_expired();
        for vp in bitmap_iter(fired) {
            self.compare_fire(vp);
        }
    }

    fn compare_fire(&mut self, vp: usize) {
        self.vps[vp].pend |= GIC_VP_MASK::CMP::SET.value;
        self.update_compare_pin(vp);
    }

    /// Host alarm callback for the compare channel of `vp`.
    pub fn timer_expire(&mut self, vp: usize) {
        if self.timer.vptimer_cb(vp) {
            self.compare_fire(vp);
        }
    }

    pub fn shared_count(&mut self) -> u32 {
        self.sync_timers();
        self.timer.get_sh_count()
    }

    pub fn set_shared_count(&mut self, count: u32) {
        self.timer.store_sh_count(count);
    }

    pub fn start_count(&mut self) {
        self.timer.start_count();
    }

    pub fn stop_count(&mut self) {
        self.timer.stop_count();
    }

    pub fn countstop(&self) -> bool {
        self.timer.countstop()
    }

    pub fn compare(&self, vp: usize) -> Option<u32> {
        if vp >= self.vps.len() {
            return None;
        }
        Some(self.timer.get_vp_compare(vp))
    }

    /// Program the compare register of `vp`, acknowledging its compare interrupt.
    pub fn set_compare(&mut self, vp: usize, compare: u32) {
        if vp >= self.vps.len() {
            warn!("gic: compare write for unknown vp {}", vp);
            return;
        }
        self.timer.store_vp_compare(vp, compare);
        self.vps[vp].pend &= !GIC_VP_MASK::CMP::SET.value;
        self.update_compare_pin(vp);
    }

    pub fn other_addr(&self, vp: usize) -> Option<usize> {
        self.vps.get(vp).map(|v| v.other_addr)
    }

    fn sh_config(&self) -> u32 {
        let countstop = if self.timer.countstop() { 1 } else { 0 };
        (GIC_SH_CONFIG::COUNTSTOP.val(countstop)
            + GIC_SH_CONFIG::NUMINTRS.val((self.irqs.len() / 8 - 1) as u32)
            + GIC_SH_CONFIG::PVPS.val((self.vps.len() - 1) as u32))
        .value
    }

    pub fn reset(&mut self) {
        self.timer.reset();
        for irq in self.irqs.iter_mut() {
            *irq = GicIrq::new();
        }
        for vp in 0..self.vps.len() {
            let pin_level = self.vps[vp].pin_level;
            self.vps[vp] = GicVp::new();
            for pin in bitmap_iter(pin_level) {
                self.irq_sink.set_irq(vp, pin, false);
            }
        }
    }

    fn emu_bank_access(&mut self, emu_ctx: &EmuContext, reg: GicReg) -> u64 {
        let (first, bits) = match reg {
            GicReg::ShRmask(first) | GicReg::ShSmask(first) | GicReg::ShMask(first) | GicReg::ShPend(first) => {
                (first, emu_ctx.width * 8)
            }
            _ => return 0,
        };
        let lines = first..(first + bits).min(self.irqs.len());
        match (reg, emu_ctx.write) {
            (GicReg::ShRmask(_), true) | (GicReg::ShSmask(_), true) => {
                let enable = matches!(reg, GicReg::ShSmask(_));
                for irq in lines {
                    if bit_get(emu_ctx.val, irq - first) {
                        self.set_irq_enabled(irq, enable);
                    }
                }
                0
            }
            (GicReg::ShMask(_), false) => lines
                .filter(|&irq| self.irqs[irq].enabled)
                .fold(0, |val, irq| bit_set(val, irq - first)),
            (GicReg::ShPend(_), false) => lines
                .filter(|&irq| self.irqs[irq].pending)
                .fold(0, |val, irq| bit_set(val, irq - first)),
            (GicReg::ShMask(_), true) | (GicReg::ShPend(_), true) => {
                warn!("gic: write to read-only bank at {:#x}", emu_ctx.address);
                0
            }
            // set/clear banks read as zero
            _ => 0,
        }
    }

    fn emu_map_vp_access(&mut self, emu_ctx: &EmuContext, irq: usize, byte: usize) -> u64 {
        if irq >= self.irqs.len() {
            warn!("gic: vp map of line {} beyond {} lines", irq, self.irqs.len());
            return 0;
        }
        let first = byte * 8;
        let covered = first..first + emu_ctx.width * 8;
        if !emu_ctx.write {
            return match self.irqs[irq].map_vp {
                Some(vp) if covered.contains(&vp) => 1 << (vp - first),
                _ => 0,
            };
        }
        let val = emu_ctx.val & width_mask(emu_ctx.width);
        if val == 0 {
            if matches!(self.irqs[irq].map_vp, Some(vp) if covered.contains(&vp)) {
                self.map_irq_vp(irq, None);
            }
            return 0;
        }
        let vp = first + val.trailing_zeros() as usize;
        if vp >= self.vps.len() {
            warn!("gic: line {} mapped to invalid vp {}", irq, vp);
            return 0;
        }
        self.map_irq_vp(irq, Some(vp));
        0
    }

    fn emu_shared_access(&mut self, emu_ctx: &EmuContext, reg: GicReg) -> u64 {
        let val = emu_ctx.val;
        match reg {
            GicReg::ShConfig => {
                if emu_ctx.write {
                    if val & GIC_SH_CONFIG::COUNTSTOP::SET.value as u64 != 0 {
                        self.stop_count();
                    } else {
                        self.start_count();
                    }
                    debug!("gic: counter {}", if self.countstop() { "stopped" } else { "started" });
                    0
                } else {
                    self.sh_config() as u64
                }
            }
            GicReg::ShCounterLo | GicReg::UsmCounterLo => {
                if !emu_ctx.write {
                    self.shared_count() as u64
                } else if reg == GicReg::UsmCounterLo {
                    warn!("gic: write to user mode counter");
                    0
                } else {
                    if self.countstop() {
                        self.set_shared_count(val as u32);
                    } else {
                        warn!("gic: counter write ignored while counting");
                    }
                    0
                }
            }
            GicReg::ShCounterHi | GicReg::UsmCounterHi => {
                if emu_ctx.write {
                    warn!("gic: write to read-only counter hi");
                }
                0
            }
            GicReg::ShWedge => {
                if emu_ctx.write {
                    let irq = (val & !GIC_SH_WEDGE_RW_MSK) as usize;
                    self.set_irq(irq, val & GIC_SH_WEDGE_RW_MSK != 0);
                }
                0
            }
            GicReg::ShMapPin(irq) => {
                if irq >= self.irqs.len() {
                    warn!("gic: pin map of line {} beyond {} lines", irq, self.irqs.len());
                    0
                } else if emu_ctx.write {
                    self.map_irq_pin(irq, val as u32);
                    0
                } else {
                    self.irqs[irq].map_pin.get() as u64
                }
            }
            GicReg::ShMapVp { irq, byte } => self.emu_map_vp_access(emu_ctx, irq, byte),
            _ => self.emu_bank_access(emu_ctx, reg),
        }
    }

    fn emu_vp_access(&mut self, emu_ctx: &EmuContext, section: GicVpSection, reg: GicVpReg) -> u64 {
        if emu_ctx.vp >= self.vps.len() {
            warn!("gic: access from unknown vp {}", emu_ctx.vp);
            return 0;
        }
        let vp = match section {
            GicVpSection::Local => emu_ctx.vp,
            GicVpSection::Other => self.vps[emu_ctx.vp].other_addr,
        };
        let val = emu_ctx.val as u32;
        if !emu_ctx.write {
            let ret = match reg {
                GicVpReg::Ctl => self.vps[vp].ctl,
                GicVpReg::Pend => {
                    self.sync_timers();
                    self.vps[vp].pend
                }
                GicVpReg::Mask => self.vps[vp].mask.get(),
                GicVpReg::CompareMap => self.vps[vp].compare_map.get(),
                GicVpReg::OtherAddr => self.vps[vp].other_addr as u32,
                GicVpReg::Ident => vp as u32,
                GicVpReg::CompareLo => self.timer.get_vp_compare(vp),
                GicVpReg::Rmask | GicVpReg::Smask | GicVpReg::CompareHi => 0,
            };
            return ret as u64;
        }
        match reg {
            GicVpReg::Ctl => {
                if val & GIC_VP_CTL_EIC_MSK != 0 {
                    warn!("gic: vp {} EIC mode unsupported", vp);
                }
                self.vps[vp].ctl = val & !GIC_VP_CTL_EIC_MSK;
            }
            GicVpReg::Rmask => {
                let mask = self.vps[vp].mask.get() & !(val & GIC_VP_SET_RESET_MSK);
                self.vps[vp].mask.set(mask);
                self.update_compare_pin(vp);
            }
            GicVpReg::Smask => {
                let mask = self.vps[vp].mask.get() | (val & GIC_VP_SET_RESET_MSK);
                self.vps[vp].mask.set(mask);
                self.update_compare_pin(vp);
            }
            GicVpReg::CompareMap => {
                let map = GicMap::new(val);
                if gic_map_pin(&map).is_none() {
                    warn!("gic: vp {} unsupported compare routing {:#x}", vp, val);
                    return 0;
                }
                let old = gic_map_pin(&self.vps[vp].compare_map);
                self.vps[vp].compare_map = map;
                if let Some(pin) = old {
                    self.update_vp_pin(vp, pin);
                }
                self.update_compare_pin(vp);
                debug!("gic: vp {} compare mapped to {:#x}", vp, val);
            }
            GicVpReg::OtherAddr => {
                if (val as usize) < self.vps.len() {
                    self.vps[vp].other_addr = val as usize;
                } else {
                    warn!("gic: vp {} other address {} out of range", vp, val);
                }
            }
            GicVpReg::CompareLo => self.set_compare(vp, val),
            GicVpReg::Pend | GicVpReg::Mask | GicVpReg::Ident | GicVpReg::CompareHi => {
                warn!("gic: write to read-only vp register {:?}", reg);
            }
        }
        0
    }
}

impl EmuDev for Gic {
    fn emu_type(&self) -> EmuDeviceType {
        EmuDeviceType::EmuDeviceTGic
    }

    fn address_range(&self) -> Range<u64> {
        self.address_range.clone()
    }

    fn handler(&mut self, emu_ctx: &EmuContext, _vps: &VpArray) -> EmuResult {
        let offset = emu_ctx.address - self.address_range.start;
        let ret = match GicReg::decode(offset) {
            Some(GicReg::Vp(section, reg)) => self.emu_vp_access(emu_ctx, section, reg),
            Some(reg) => self.emu_shared_access(emu_ctx, reg),
            None => {
                warn!(
                    "gic: unimplemented {} at offset {:#x}",
                    if emu_ctx.write { "write" } else { "read" },
                    offset
                );
                0
            }
        };
        Ok(ret)
    }
}
