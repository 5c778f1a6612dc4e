// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

/// This module contains the configuration of the processing system.
/// Counts are fixed for the whole lifetime of a `Cps`: they are validated once when it is
/// constructed and never change afterwards.
use crate::error::{ErrorKind, Result};

/// The maximum number of VPs, bounded by the width of the running and blocked bitmaps.
pub const CPS_VP_NUM_MAX: usize = 64;
/// The maximum number of shared GIC interrupt sources.
pub const GIC_IRQ_NUM_MAX: usize = 256;
pub const ITC_FIFO_NUM_MAX: usize = 16;
pub const ITC_SEMAPH_NUM_MAX: usize = 16;

/// Boot exception vector the VPs reset to.
pub const DEFAULT_RESET_BASE: u64 = 0xbfc0_0000;

/// Represents the configuration of the global interrupt controller.
#[derive(Clone, Debug)]
pub struct GicConfig {
    /// The guest-physical base address of the GIC register window.
    pub base_addr: u64,
    /// The number of shared interrupt sources, a multiple of 8.
    pub num_irq: usize,
}

impl Default for GicConfig {
    fn default() -> Self {
        Self {
            base_addr: 0x1bdc_0000,
            num_irq: GIC_IRQ_NUM_MAX,
        }
    }
}

/// Represents the configuration of the cluster power controller.
#[derive(Clone, Debug)]
pub struct CpcConfig {
    /// The guest-physical base address of the CPC register window.
    pub base_addr: u64,
    /// Bitmap of the VPs started by a reset.
    pub vp_start_running: u64,
}

impl Default for CpcConfig {
    fn default() -> Self {
        Self {
            base_addr: 0x1bde_0000,
            vp_start_running: 1,
        }
    }
}

/// Represents the configuration of the inter-thread communication unit.
#[derive(Clone, Debug)]
pub struct ItuConfig {
    /// The guest-physical base address of the ITU address map (tag) registers.
    pub tag_base_addr: u64,
    /// The number of FIFO cells; they occupy the first cell indices.
    pub num_fifo: usize,
    /// The number of semaphore cells, following the FIFO cells.
    pub num_semaphores: usize,
}

impl Default for ItuConfig {
    fn default() -> Self {
        Self {
            tag_base_addr: 0x1bde_8000,
            num_fifo: ITC_FIFO_NUM_MAX,
            num_semaphores: ITC_SEMAPH_NUM_MAX,
        }
    }
}

/// Represents the configuration of the whole processing system.
#[derive(Clone, Debug)]
pub struct CpsConfig {
    /// The number of VPs in the cluster.
    pub num_vps: usize,
    /// The address a VP starts fetching from after the CPC resets it.
    pub reset_base: u64,
    pub gic: GicConfig,
    pub cpc: CpcConfig,
    pub itu: ItuConfig,
}

impl Default for CpsConfig {
    fn default() -> Self {
        Self {
            num_vps: 1,
            reset_base: DEFAULT_RESET_BASE,
            gic: GicConfig::default(),
            cpc: CpcConfig::default(),
            itu: ItuConfig::default(),
        }
    }
}

impl CpsConfig {
    pub fn new(num_vps: usize) -> Self {
        Self {
            num_vps,
            ..Default::default()
        }
    }

    /// Checks the cluster-wide counts. Per-device limits are checked by the device constructors.
    pub fn validate(&self) -> Result<()> {
        if self.num_vps == 0 || self.num_vps > CPS_VP_NUM_MAX {
            return Err(ErrorKind::InvalidParam.msg(format!(
                "num_vps {} out of range, supported 1..={}",
                self.num_vps, CPS_VP_NUM_MAX
            )));
        }
        let windows = [
            ("gic", self.gic.base_addr, crate::arch::GIC_ADDRSPACE_SZ),
            ("cpc", self.cpc.base_addr, crate::arch::CPC_ADDRSPACE_SZ),
            ("itu tag", self.itu.tag_base_addr, crate::arch::ITC_TAG_ADDRSPACE_SZ),
        ];
        for (i, &(name, base, size)) in windows.iter().enumerate() {
            for &(other, other_base, other_size) in &windows[i + 1..] {
                if base < other_base + other_size && other_base < base + size {
                    return Err(ErrorKind::InvalidConfig.msg(format!(
                        "{} window {:#x} overlaps {} window {:#x}",
                        name, base, other, other_base
                    )));
                }
            }
        }
        Ok(())
    }
}
