// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use core::fmt::{Display, Formatter};
use core::ops::Range;

use crate::kernel::VpArray;

/// Guest-visible outcome of a register access: the loaded value (0 for stores) or a fault.
pub type EmuResult = Result<u64, EmuFault>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmuFault {
    /// The accessing VP was suspended; the instruction must be re-executed after it resumes.
    Blocked,
    /// Data bus error exception for the accessing VP.
    BusError,
    /// No device decodes the address.
    Unmapped,
}

pub trait EmuDev: Send {
    /// emulated device type
    fn emu_type(&self) -> EmuDeviceType;
    /// emulated device address range
    fn address_range(&self) -> Range<u64>;
    /// whether `addr` is decoded by this device
    fn contains(&self, addr: u64) -> bool {
        self.address_range().contains(&addr)
    }
    /// emulated device handler
    fn handler(&mut self, emu_ctx: &EmuContext, vps: &VpArray) -> EmuResult;
}

#[derive(Debug, Clone, Copy)]
pub struct EmuContext {
    /// The VP performing the access.
    pub vp: usize,
    /// Absolute guest-physical address.
    pub address: u64,
    /// Access width in bytes, 1 to 8.
    pub width: usize,
    pub write: bool,
    /// The value stored, ignored for loads.
    pub val: u64,
}

impl EmuContext {
    pub fn read(vp: usize, address: u64, width: usize) -> Self {
        Self {
            vp,
            address,
            width,
            write: false,
            val: 0,
        }
    }

    pub fn write(vp: usize, address: u64, width: usize, val: u64) -> Self {
        Self {
            vp,
            address,
            width,
            write: true,
            val,
        }
    }

    /// Mask with the low `width` bytes set.
    pub fn width_mask(&self) -> u64 {
        crate::utils::width_mask(self.width)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// Enumeration representing the type of emulator devices.
pub enum EmuDeviceType {
    EmuDeviceTGic = 0,
    EmuDeviceTCpc = 1,
    EmuDeviceTItu = 2,
}

impl Display for EmuDeviceType {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            EmuDeviceType::EmuDeviceTGic => write!(f, "global interrupt controller"),
            EmuDeviceType::EmuDeviceTCpc => write!(f, "cluster power controller"),
            EmuDeviceType::EmuDeviceTItu => write!(f, "inter-thread communication unit"),
        }
    }
}
