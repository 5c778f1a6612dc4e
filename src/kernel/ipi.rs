// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Per-VP mailboxes. A VP that must act on its own private execution state is sent a
//! message and kicked; the message is handled later on the VP's own thread.

use super::Vp;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PowerEvent {
    /// Reset the VP to its reset base and let it run.
    ResetAndResume,
}

/*
* src: the VP that issued the request, None for a device reset
*/
#[derive(Copy, Clone, Debug)]
pub struct PowerMessage {
    pub src: Option<usize>,
    pub event: PowerEvent,
}

#[derive(Copy, Clone, Debug)]
pub enum VpMessage {
    Power(PowerMessage),
}

/// Post `msg` to the mailbox of `vp` and wake its thread.
pub fn vp_msg_send(vp: &Vp, msg: VpMessage) {
    vp.push_msg(msg);
    vp.context().kick();
}

/// Drain the mailbox of `vp`. Must run on the VP's own thread. Returns the number of
/// messages handled.
pub fn vp_msg_handler(vp: &Vp) -> usize {
    let mut handled = 0;
    // pop_msg releases the VP lock before the handler runs
    while let Some(msg) = vp.pop_msg() {
        match msg {
            VpMessage::Power(power_msg) => crate::arch::cpc_power_handler(vp, &power_msg),
        }
        handled += 1;
    }
    handled
}
