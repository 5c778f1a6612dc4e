// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use std::collections::VecDeque;
use std::sync::Arc;

use spin::Mutex;

use super::VpMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// VP execution state, checked by the execution engine before it dispatches an instruction
pub enum VpState {
    /// Not started by the CPC, or stopped.
    Halted,
    Running,
    /// Suspended on an ITU cell until another VP makes progress on it.
    BlockedOnCell(usize),
}

/// The execution context of one VP, owned by the embedding emulator.
///
/// `halt` and `resume` only request a transition and must not block: they are invoked
/// with the device lock held. `reset` is only ever invoked from the VP's own thread,
/// inside [`crate::Cps::vp_poll`].
pub trait VpContext: Send + Sync {
    /// Stop dispatching instructions after the current one.
    fn halt(&self);
    /// Continue dispatching instructions.
    fn resume(&self);
    /// Reset the private execution state so that the VP fetches from `reset_base`.
    fn reset(&self, reset_base: u64);
    /// Wake the VP thread so that it drains its mailbox.
    fn kick(&self);
}

struct VpInnerConst {
    id: usize,
    ctx: Arc<dyn VpContext>,
}

pub struct VpInnerMut {
    pub state: VpState,
    pub reset_base: u64,
    msg_queue: VecDeque<VpMessage>,
}

impl VpInnerMut {
    fn new(reset_base: u64) -> Self {
        Self {
            state: VpState::Halted,
            reset_base,
            msg_queue: VecDeque::new(),
        }
    }
}

pub struct VpInner {
    inner_const: VpInnerConst,
    pub inner_mut: Mutex<VpInnerMut>,
}

#[derive(Clone)]
/// Virtual processor handle
pub struct Vp {
    pub inner: Arc<VpInner>,
}

impl PartialEq for Vp {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Vp {
    pub fn new(id: usize, ctx: Arc<dyn VpContext>, reset_base: u64) -> Self {
        Self {
            inner: Arc::new(VpInner {
                inner_const: VpInnerConst { id, ctx },
                inner_mut: Mutex::new(VpInnerMut::new(reset_base)),
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.inner.inner_const.id
    }

    pub fn context(&self) -> &Arc<dyn VpContext> {
        &self.inner.inner_const.ctx
    }

    pub fn state(&self) -> VpState {
        self.inner.inner_mut.lock().state
    }

    pub fn set_state(&self, state: VpState) {
        self.inner.inner_mut.lock().state = state;
    }

    pub fn runnable(&self) -> bool {
        self.state() == VpState::Running
    }

    pub fn reset_base(&self) -> u64 {
        self.inner.inner_mut.lock().reset_base
    }

    /// Suspend this VP on ITU cell `cell`.
    pub fn block_on(&self, cell: usize) {
        self.set_state(VpState::BlockedOnCell(cell));
        trace!("vp {} blocked on itc cell {}", self.id(), cell);
        self.context().halt();
    }

    /// Resume this VP if it is still suspended on `cell`; returns whether it was.
    pub fn wake_from(&self, cell: usize) -> bool {
        let mut inner = self.inner.inner_mut.lock();
        if inner.state != VpState::BlockedOnCell(cell) {
            return false;
        }
        inner.state = VpState::Running;
        drop(inner);

        trace!("vp {} woken by itc cell {}", self.id(), cell);
        self.context().resume();
        true
    }

    /// Halt this VP and drop any power message it has not handled yet.
    pub fn power_off(&self) {
        let mut inner = self.inner.inner_mut.lock();
        inner.msg_queue.retain(|msg| !matches!(msg, VpMessage::Power(_)));
        inner.state = VpState::Halted;
        drop(inner);

        self.context().halt();
    }

    pub fn push_msg(&self, msg: VpMessage) {
        self.inner.inner_mut.lock().msg_queue.push_back(msg);
    }

    pub fn pop_msg(&self) -> Option<VpMessage> {
        self.inner.inner_mut.lock().msg_queue.pop_front()
    }
}

/// Fixed-size array of the VPs of the cluster, indexed by VP id
pub struct VpArray {
    vps: Vec<Vp>,
}

impl VpArray {
    pub fn new(contexts: Vec<Arc<dyn VpContext>>, reset_base: u64) -> Self {
        Self {
            vps: contexts
                .into_iter()
                .enumerate()
                .map(|(id, ctx)| Vp::new(id, ctx, reset_base))
                .collect(),
        }
    }

    pub fn get(&self, id: usize) -> Option<&Vp> {
        self.vps.get(id)
    }

    pub fn len(&self) -> usize {
        self.vps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vps.is_empty()
    }
}
