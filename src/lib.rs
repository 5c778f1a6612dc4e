// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! mips_cps models the interrupt routing, shared timer, processor power and inter-thread
//! synchronization units of a MIPS coherent processing system, as consumed by a system emulator.
//! The introduces of all modules are showed below:
//! * [arch]: The MIPS device models: global interrupt controller (GIC) and its shared counter,
//!   cluster power controller (CPC) and inter-thread communication unit (ITU).
//! * [config]: The configuration of the processing system, validated at construction.
//! * [device]: The emulated device plumbing: the `EmuDev` trait, access contexts and faults.
//! * [kernel]: Virtual processor bookkeeping, per-VP mailboxes, time source, interrupt sink,
//!   logger and the `Cps` facade that serializes every access.
//! * [utils]: Bit manipulation helpers.
//! * error: Defines the error type for the processing system.

#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::new_without_default)]

#[macro_use]
extern crate log;

pub mod arch;
pub mod config;
pub mod device;
pub mod error;
pub mod kernel;
pub mod utils;

pub use config::{CpcConfig, CpsConfig, GicConfig, ItuConfig};
pub use device::{EmuContext, EmuDev, EmuDeviceType, EmuFault, EmuResult};
pub use error::{Error, ErrorKind, Result};
pub use kernel::{Cps, IrqSink, TimerSource, VirtualClock, Vp, VpContext, VpState};
