// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Inter-thread communication unit: FIFO and semaphore cells that VPs synchronise through,
//! with blocking and non-blocking register views.

use std::ops::Range;

use tock_registers::register_bitfields;
use tock_registers::LocalRegisterCopy;

use crate::config::{ItuConfig, ITC_FIFO_NUM_MAX, ITC_SEMAPH_NUM_MAX};
use crate::device::{EmuContext, EmuDev, EmuDeviceType, EmuFault, EmuResult};
use crate::error::{ErrorKind, Result};
use crate::kernel::VpArray;
use crate::utils::{bit_extract, bit_mask, bit_set, bitmap_iter, width_mask};

pub const ITC_ADDRESSMAP_NUM: usize = 2;
pub const ITC_TAG_ADDRSPACE_SZ: u64 = ITC_ADDRESSMAP_NUM as u64 * 8;
pub const ITC_STORAGE_ADDRSPACE_SZ: u64 = 0x1000;

pub const ITC_CELL_DEPTH_SHIFT: u64 = 2;
pub const ITC_CELL_DEPTH: usize = 1 << ITC_CELL_DEPTH_SHIFT;
pub const ITC_CELL_PV_MAX_VAL: u64 = 0xffff;

/// Smallest cell stride, 128 bytes, used with an entry grain of 0.
const ITC_CELL_STRIDE_SHIFT_MIN: u32 = 7;

register_bitfields! {u64,
    pub ITC_AM0 [
        BASE_ADDRESS OFFSET(10) NUMBITS(22) [],
        EN OFFSET(0) NUMBITS(1) []
    ]
}

register_bitfields! {u64,
    pub ITC_AM1 [
        NUM_ENTRIES OFFSET(20) NUMBITS(11) [],
        ADDR_MASK OFFSET(10) NUMBITS(7) [],
        ENTRY_GRAIN OFFSET(0) NUMBITS(3) []
    ]
}

register_bitfields! {u64,
    pub ITC_CELL_TAG [
        FIFO_DEPTH OFFSET(28) NUMBITS(4) [],
        FIFO_PTR OFFSET(18) NUMBITS(3) [],
        FIFO OFFSET(17) NUMBITS(1) [],
        T OFFSET(16) NUMBITS(1) [],
        F OFFSET(1) NUMBITS(1) [],
        E OFFSET(0) NUMBITS(1) []
    ]
}

type ItcTag = LocalRegisterCopy<u64, ITC_CELL_TAG::Register>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItcView {
    Bypass = 0,
    Control = 1,
    EfSync = 2,
    EfTry = 3,
    PvSync = 4,
    PvTry = 5,
}

impl ItcView {
    pub fn from_index(index: u64) -> Option<Self> {
        match index {
            0 => Some(ItcView::Bypass),
            1 => Some(ItcView::Control),
            2 => Some(ItcView::EfSync),
            3 => Some(ItcView::EfTry),
            4 => Some(ItcView::PvSync),
            5 => Some(ItcView::PvTry),
            _ => None,
        }
    }
}

/// Split a storage window offset into (cell index, view index). Cell indices past the
/// last cell select the last cell.
pub fn itc_storage_decode(offset: u64, stride_shift: u32, num_cells: usize) -> (usize, u64) {
    let cell = (offset >> stride_shift).min(num_cells as u64 - 1) as usize;
    let view = (offset >> 3) & 0xf;
    (cell, view)
}

struct ItcCell {
    tag: ItcTag,
    data: [u64; ITC_CELL_DEPTH],
    fifo_out: usize,
    /// VPs suspended on this cell
    blocked_vps: u64,
}

impl ItcCell {
    fn new(fifo: bool) -> Self {
        let tag = if fifo {
            ItcTag::new(
                (ITC_CELL_TAG::E::SET
                    + ITC_CELL_TAG::FIFO::SET
                    + ITC_CELL_TAG::FIFO_DEPTH.val(ITC_CELL_DEPTH_SHIFT))
                .value,
            )
        } else {
            ItcTag::new(0)
        };
        Self {
            tag,
            data: [0; ITC_CELL_DEPTH],
            fifo_out: 0,
            blocked_vps: 0,
        }
    }

    fn is_fifo(&self) -> bool {
        self.tag.is_set(ITC_CELL_TAG::FIFO)
    }

    fn fifo_ptr(&self) -> usize {
        self.tag.read(ITC_CELL_TAG::FIFO_PTR) as usize
    }

    fn set_fifo_ptr(&mut self, ptr: usize) {
        self.tag.modify(ITC_CELL_TAG::FIFO_PTR.val(ptr as u64));
    }

    fn set_flag(&mut self, flag: tock_registers::fields::Field<u64, ITC_CELL_TAG::Register>, set: bool) {
        self.tag.modify(flag.val(set as u64));
    }

    fn view_bypass_read(&self) -> u64 {
        if self.is_fifo() {
            self.data[self.fifo_out]
        } else {
            self.data[0]
        }
    }

    fn view_bypass_write(&mut self, val: u64) {
        let ptr = self.fifo_ptr();
        if self.is_fifo() && ptr > 0 {
            let idx = (self.fifo_out + ptr - 1) % ITC_CELL_DEPTH;
            self.data[idx] = val;
        }
        // semaphore cells ignore bypass writes
    }

    fn view_control_write(&mut self, val: u64) {
        let val = ItcTag::new(val);
        self.set_flag(ITC_CELL_TAG::T, val.is_set(ITC_CELL_TAG::T));
        self.set_flag(ITC_CELL_TAG::F, val.is_set(ITC_CELL_TAG::F));
        self.set_flag(ITC_CELL_TAG::E, val.is_set(ITC_CELL_TAG::E));
        if self.tag.is_set(ITC_CELL_TAG::E) {
            self.set_fifo_ptr(0);
        } else {
            let ptr = (val.read(ITC_CELL_TAG::FIFO_PTR) as usize).min(ITC_CELL_DEPTH);
            self.set_fifo_ptr(ptr);
        }
    }

    /// Dequeue the head of the FIFO, if any.
    fn fifo_pop(&mut self) -> Option<u64> {
        let ptr = self.fifo_ptr();
        self.set_flag(ITC_CELL_TAG::F, false);
        if ptr == 0 {
            self.set_flag(ITC_CELL_TAG::E, true);
            return None;
        }
        let val = self.data[self.fifo_out];
        self.fifo_out = (self.fifo_out + 1) % ITC_CELL_DEPTH;
        self.set_fifo_ptr(ptr - 1);
        if ptr == 1 {
            self.set_flag(ITC_CELL_TAG::E, true);
        }
        Some(val)
    }

    /// Enqueue at the tail of the FIFO; false if it is full.
    fn fifo_push(&mut self, val: u64) -> bool {
        let ptr = self.fifo_ptr();
        self.set_flag(ITC_CELL_TAG::E, false);
        if ptr >= ITC_CELL_DEPTH {
            self.set_flag(ITC_CELL_TAG::F, true);
            return false;
        }
        self.data[(self.fifo_out + ptr) % ITC_CELL_DEPTH] = val;
        self.set_fifo_ptr(ptr + 1);
        if ptr + 1 == ITC_CELL_DEPTH {
            self.set_flag(ITC_CELL_TAG::F, true);
        }
        true
    }
}

pub struct Itu {
    tag_range: Range<u64>,
    address_map: [u64; ITC_ADDRESSMAP_NUM],
    storage_window: Range<u64>,
    storage_enabled: bool,
    num_fifo: usize,
    cells: Vec<ItcCell>,
}

impl Itu {
    pub fn new(config: &ItuConfig) -> Result<Self> {
        if config.num_fifo > ITC_FIFO_NUM_MAX {
            return Err(ErrorKind::InvalidParam.msg(format!(
                "num_fifo {} exceeds {}",
                config.num_fifo, ITC_FIFO_NUM_MAX
            )));
        }
        if config.num_semaphores > ITC_SEMAPH_NUM_MAX {
            return Err(ErrorKind::InvalidParam.msg(format!(
                "num_semaphores {} exceeds {}",
                config.num_semaphores, ITC_SEMAPH_NUM_MAX
            )));
        }
        if config.num_fifo + config.num_semaphores == 0 {
            return Err(ErrorKind::InvalidParam.msg("itc needs at least one cell"));
        }
        let mut itu = Self {
            tag_range: config.tag_base_addr..config.tag_base_addr + ITC_TAG_ADDRSPACE_SZ,
            address_map: [0; ITC_ADDRESSMAP_NUM],
            storage_window: 0..0,
            storage_enabled: false,
            num_fifo: config.num_fifo,
            cells: (0..config.num_fifo + config.num_semaphores)
                .map(|i| ItcCell::new(i < config.num_fifo))
                .collect(),
        };
        itu.reset();
        Ok(itu)
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_fifo(&self) -> usize {
        self.num_fifo
    }

    /// The storage window, if enabled.
    pub fn storage_window(&self) -> Option<Range<u64>> {
        if self.storage_enabled {
            Some(self.storage_window.clone())
        } else {
            None
        }
    }

    pub fn address_map(&self, index: usize) -> Option<u64> {
        self.address_map.get(index).copied()
    }

    fn stride_shift(&self) -> u32 {
        let am1 = LocalRegisterCopy::<u64, ITC_AM1::Register>::new(self.address_map[1]);
        ITC_CELL_STRIDE_SHIFT_MIN + am1.read(ITC_AM1::ENTRY_GRAIN) as u32
    }

    pub fn cell_tag(&self, cell: usize) -> Option<u64> {
        self.cells.get(cell).map(|c| c.tag.get())
    }

    pub fn fifo_len(&self, cell: usize) -> Option<usize> {
        self.cells.get(cell).map(|c| c.fifo_ptr())
    }

    pub fn semaphore(&self, cell: usize) -> Option<u64> {
        self.cells.get(cell).map(|c| c.data[0])
    }

    /// Bitmap of the VPs suspended on `cell`, empty for an unknown cell.
    pub fn blocked_vps(&self, cell: usize) -> u64 {
        self.cells.get(cell).map_or(0, |c| c.blocked_vps)
    }

    /// Apply the address map registers to the storage window.
    fn reconfigure(&mut self) {
        let am0 = LocalRegisterCopy::<u64, ITC_AM0::Register>::new(self.address_map[0]);
        let am1 = LocalRegisterCopy::<u64, ITC_AM1::Register>::new(self.address_map[1]);
        let base = am0.get() & ITC_AM0::BASE_ADDRESS::SET.mask();
        let size = (1 << 10) + (am1.get() & ITC_AM1::ADDR_MASK::SET.mask());
        if !size.is_power_of_two() {
            warn!("itc: storage size {:#x} is not a power of two", size);
            return;
        }
        self.storage_window = base..base + size;
        self.storage_enabled = am0.is_set(ITC_AM0::EN);
        debug!(
            "itc: storage window {:#x}..{:#x} {}",
            base,
            base + size,
            if self.storage_enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn reset(&mut self) {
        for (i, cell) in self.cells.iter_mut().enumerate() {
            *cell = ItcCell::new(i < self.num_fifo);
        }
        self.address_map[0] = 0;
        self.address_map[1] = ((ITC_STORAGE_ADDRSPACE_SZ - 1) & ITC_AM1::ADDR_MASK::SET.mask())
            | ITC_AM1::NUM_ENTRIES.val(self.cells.len() as u64).value;
        self.reconfigure();
    }

    /// Narrow accesses cover their bytes of the 64-bit register only.
    fn emu_tag_access(&mut self, emu_ctx: &EmuContext) -> u64 {
        let offset = emu_ctx.address - self.tag_range.start;
        let index = (offset / 8) as usize;
        let shift = (offset % 8) as usize * 8;
        let bits = (emu_ctx.width * 8).min(64 - shift);
        let old = self.address_map[index];
        if !emu_ctx.write {
            return bit_extract(old, shift, bits);
        }
        let mask = bit_mask(bits) << shift;
        let val = (old & !mask) | ((emu_ctx.val & width_mask(emu_ctx.width)) << shift & mask);
        self.address_map[index] = match index {
            0 => val & (ITC_AM0::BASE_ADDRESS::SET + ITC_AM0::EN::SET).mask(),
            _ => {
                let writable = (ITC_AM1::ADDR_MASK::SET + ITC_AM1::ENTRY_GRAIN::SET).mask();
                (val & writable) | (old & ITC_AM1::NUM_ENTRIES::SET.mask())
            }
        };
        if self.address_map[index] != old {
            self.reconfigure();
        }
        0
    }

    /// Suspend `vp` on `cell`; the access is retried once the VP is woken.
    fn block_vp(&mut self, cell: usize, vp: usize, vps: &VpArray) -> EmuResult {
        match vps.get(vp) {
            Some(v) => {
                self.cells[cell].blocked_vps = bit_set(self.cells[cell].blocked_vps, vp);
                v.block_on(cell);
                Err(EmuFault::Blocked)
            }
            None => {
                warn!("itc: blocking access from unknown vp {}", vp);
                Ok(0)
            }
        }
    }

    /// Resume every VP suspended on `cell`. They retry their access, which may block again.
    fn wake_blocked_vps(&mut self, cell: usize, vps: &VpArray) {
        let blocked = self.cells[cell].blocked_vps;
        self.cells[cell].blocked_vps = 0;
        for id in bitmap_iter(blocked) {
            if let Some(vp) = vps.get(id) {
                vp.wake_from(cell);
            }
        }
    }

    fn view_ef_read(&mut self, cell: usize, vp: usize, blocking: bool, vps: &VpArray) -> EmuResult {
        if !self.cells[cell].is_fifo() {
            return Ok(0);
        }
        if blocking && self.cells[cell].tag.is_set(ITC_CELL_TAG::E) {
            return self.block_vp(cell, vp, vps);
        }
        match self.cells[cell].fifo_pop() {
            Some(val) => {
                self.wake_blocked_vps(cell, vps);
                Ok(val)
            }
            None => Ok(0),
        }
    }

    fn view_ef_write(&mut self, cell: usize, vp: usize, val: u64, blocking: bool, vps: &VpArray) -> EmuResult {
        if !self.cells[cell].is_fifo() {
            return Ok(0);
        }
        if blocking && self.cells[cell].tag.is_set(ITC_CELL_TAG::F) {
            return self.block_vp(cell, vp, vps);
        }
        if self.cells[cell].fifo_push(val) {
            self.wake_blocked_vps(cell, vps);
        }
        Ok(0)
    }

    fn view_pv_read(&mut self, cell: usize, vp: usize, blocking: bool, vps: &VpArray) -> EmuResult {
        let c = &mut self.cells[cell];
        if c.is_fifo() {
            return Ok(0);
        }
        let ret = c.data[0];
        if ret > 0 {
            c.data[0] -= 1;
        } else if blocking {
            return self.block_vp(cell, vp, vps);
        }
        Ok(ret)
    }

    fn view_pv_write(&mut self, cell: usize, vps: &VpArray) -> EmuResult {
        let c = &mut self.cells[cell];
        if c.is_fifo() {
            return Ok(0);
        }
        if c.data[0] < ITC_CELL_PV_MAX_VAL {
            c.data[0] += 1;
        }
        self.wake_blocked_vps(cell, vps);
        Ok(0)
    }

    fn emu_storage_access(&mut self, emu_ctx: &EmuContext, vps: &VpArray) -> EmuResult {
        if emu_ctx.width < 4 {
            warn!(
                "itc: {}-byte access at {:#x} raises bus error",
                emu_ctx.width, emu_ctx.address
            );
            return Err(EmuFault::BusError);
        }
        let offset = emu_ctx.address - self.storage_window.start;
        let (cell, view_index) = itc_storage_decode(offset, self.stride_shift(), self.cells.len());
        let view = match ItcView::from_index(view_index) {
            Some(view) => view,
            None => {
                warn!("itc: unsupported view {} of cell {}", view_index, cell);
                return Ok(0);
            }
        };
        trace!(
            "itc: vp {} {} cell {} view {:?}",
            emu_ctx.vp,
            if emu_ctx.write { "writes" } else { "reads" },
            cell,
            view
        );
        let vp = emu_ctx.vp;
        if emu_ctx.write {
            match view {
                ItcView::Bypass => {
                    self.cells[cell].view_bypass_write(emu_ctx.val);
                    Ok(0)
                }
                ItcView::Control => {
                    self.cells[cell].view_control_write(emu_ctx.val);
                    Ok(0)
                }
                ItcView::EfSync => self.view_ef_write(cell, vp, emu_ctx.val, true, vps),
                ItcView::EfTry => self.view_ef_write(cell, vp, emu_ctx.val, false, vps),
                ItcView::PvSync | ItcView::PvTry => self.view_pv_write(cell, vps),
            }
        } else {
            match view {
                ItcView::Bypass => Ok(self.cells[cell].view_bypass_read()),
                ItcView::Control => Ok(self.cells[cell].tag.get()),
                ItcView::EfSync => self.view_ef_read(cell, vp, true, vps),
                ItcView::EfTry => self.view_ef_read(cell, vp, false, vps),
                ItcView::PvSync => self.view_pv_read(cell, vp, true, vps),
                ItcView::PvTry => self.view_pv_read(cell, vp, false, vps),
            }
        }
    }
}

impl EmuDev for Itu {
    fn emu_type(&self) -> EmuDeviceType {
        EmuDeviceType::EmuDeviceTItu
    }

    fn address_range(&self) -> Range<u64> {
        self.tag_range.clone()
    }

    fn contains(&self, addr: u64) -> bool {
        self.tag_range.contains(&addr) || (self.storage_enabled && self.storage_window.contains(&addr))
    }

    fn handler(&mut self, emu_ctx: &EmuContext, vps: &VpArray) -> EmuResult {
        if self.tag_range.contains(&emu_ctx.address) {
            Ok(self.emu_tag_access(emu_ctx))
        } else {
            self.emu_storage_access(emu_ctx, vps)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn itu(num_fifo: usize, num_semaphores: usize) -> Itu {
        let config = ItuConfig {
            tag_base_addr: 0x1000,
            num_fifo,
            num_semaphores,
        };
        Itu::new(&config).unwrap()
    }

    #[test]
    fn cell_counts_are_checked() {
        for (num_fifo, num_semaphores) in [(0, 0), (17, 0), (0, 17)] {
            let config = ItuConfig {
                tag_base_addr: 0,
                num_fifo,
                num_semaphores,
            };
            assert_eq!(Itu::new(&config).err().unwrap().kind(), ErrorKind::InvalidParam);
        }
    }

    #[test]
    fn reset_address_map() {
        let itu = itu(2, 3);
        assert_eq!(itu.address_map(0), Some(0));
        assert_eq!(itu.address_map(1), Some(0xc00 | (5 << 20)));
        assert_eq!(itu.storage_window(), None);
        assert_eq!(itu.cell_tag(0), Some((2 << 28) | (1 << 17) | 1));
        assert_eq!(itu.cell_tag(2), Some(0));
        assert_eq!(itu.address_map(2), None);
        assert_eq!(itu.cell_tag(5), None);
        assert_eq!(itu.fifo_len(5), None);
        assert_eq!(itu.semaphore(5), None);
        assert_eq!(itu.blocked_vps(5), 0);
    }

    #[test]
    fn narrow_tag_access_covers_its_bytes() {
        let mut itu = itu(1, 1);
        let vps = VpArray::new(Vec::new(), 0);
        itu.handler(&EmuContext::write(0, 0x1000, 4, 0x1710_0001), &vps).unwrap();
        assert_eq!(itu.address_map(0), Some(0x1710_0001));
        itu.handler(&EmuContext::write(0, 0x1004, 4, 0), &vps).unwrap();
        assert_eq!(itu.address_map(0), Some(0x1710_0001));
        assert_eq!(itu.storage_window(), Some(0x1710_0000..0x1710_1000));
        assert_eq!(itu.handler(&EmuContext::read(0, 0x1000, 2), &vps), Ok(0x0001));
        assert_eq!(itu.handler(&EmuContext::read(0, 0x1002, 2), &vps), Ok(0x1710));
        assert_eq!(itu.handler(&EmuContext::read(0, 0x1004, 4), &vps), Ok(0));
    }

    #[test]
    fn storage_decode_clamps_cell() {
        assert_eq!(itc_storage_decode(0x0, 7, 4), (0, 0));
        assert_eq!(itc_storage_decode(0x98, 7, 4), (1, 3));
        assert_eq!(itc_storage_decode(0x1028, 8, 4), (3, 5));
        assert_eq!(itc_storage_decode(0x7f, 7, 4), (0, 0xf));
    }

    #[test]
    fn address_map_write_relocates_window() {
        let mut itu = itu(1, 1);
        let vps = VpArray::new(Vec::new(), 0);
        let am0 = EmuContext::write(0, 0x1000, 8, 0x1710_0000 | 1 | 0x3ff);
        itu.handler(&am0, &vps).unwrap();
        assert_eq!(itu.address_map(0), Some(0x1710_0001));
        assert_eq!(itu.storage_window(), Some(0x1710_0000..0x1710_1000));
        assert!(itu.contains(0x1710_0ff8));
        assert!(!itu.contains(0x1710_1000));

        // num_entries is read-only, 1 KiB + 0x1800 is not a power of two
        let am1 = EmuContext::write(0, 0x1008, 8, 0x1800 | 1 | (7 << 20));
        itu.handler(&am1, &vps).unwrap();
        assert_eq!(itu.address_map(1), Some(0x1800 | 1 | (2 << 20)));
        assert_eq!(itu.storage_window(), Some(0x1710_0000..0x1710_1000));
    }

    #[test]
    fn control_view_sets_flags_and_pointer() {
        let mut cell = ItcCell::new(true);
        cell.view_control_write((3 << 18) | (1 << 16));
        assert_eq!(cell.fifo_ptr(), 3);
        assert!(cell.tag.is_set(ITC_CELL_TAG::T));
        assert!(!cell.tag.is_set(ITC_CELL_TAG::E));
        cell.view_control_write((3 << 18) | 1);
        assert_eq!(cell.fifo_ptr(), 0);
        assert!(!cell.tag.is_set(ITC_CELL_TAG::T));
    }

    #[test]
    fn bypass_views_do_not_consume() {
        let mut cell = ItcCell::new(true);
        assert!(cell.fifo_push(7));
        assert!(cell.fifo_push(8));
        assert_eq!(cell.view_bypass_read(), 7);
        cell.view_bypass_write(9);
        assert_eq!(cell.fifo_ptr(), 2);
        assert_eq!(cell.fifo_pop(), Some(7));
        assert_eq!(cell.fifo_pop(), Some(9));
        assert_eq!(cell.fifo_pop(), None);

        let mut sem = ItcCell::new(false);
        sem.view_bypass_write(5);
        assert_eq!(sem.view_bypass_read(), 0);
    }
}
