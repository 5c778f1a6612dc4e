// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mips_cps::arch::{ItcView, ITC_CELL_PV_MAX_VAL};
use mips_cps::{EmuFault, VpState};

use common::{exec, itc_addr, itc_enable, Harness};

fn semaphore(h: &Harness) -> usize {
    h.config.itu.num_fifo
}

fn view(cell: usize, view: ItcView) -> u64 {
    itc_addr(cell, view as u64)
}

#[test]
fn sync_p_blocks_until_v() {
    let h = Harness::booted(2);
    itc_enable(&h);
    let sem = semaphore(&h);
    let pv_sync = view(sem, ItcView::PvSync);

    assert_eq!(h.cps.read(1, pv_sync, 8), Err(EmuFault::Blocked));
    assert_eq!(h.cps.vp_state(1), Some(VpState::BlockedOnCell(sem)));
    assert_eq!(h.cps.with_itu(|itu| itu.semaphore(sem)), Some(0));

    assert_eq!(h.cps.write(0, pv_sync, 8, 0), Ok(0));
    assert_eq!(h.cps.vp_state(1), Some(VpState::Running));
    assert_eq!(h.cps.with_itu(|itu| itu.semaphore(sem)), Some(1));

    // the retried P takes the unit
    assert_eq!(h.cps.read(1, pv_sync, 8), Ok(1));
    assert_eq!(h.cps.with_itu(|itu| itu.semaphore(sem)), Some(0));
}

#[test]
fn try_p_never_blocks() {
    let h = Harness::booted(1);
    itc_enable(&h);
    let sem = semaphore(&h);
    let pv_try = view(sem, ItcView::PvTry);

    assert_eq!(h.cps.read(0, pv_try, 8), Ok(0));
    assert_eq!(h.cps.vp_state(0), Some(VpState::Running));
    h.cps.write(0, pv_try, 8, 0).unwrap();
    h.cps.write(0, pv_try, 8, 0).unwrap();
    assert_eq!(h.cps.read(0, pv_try, 8), Ok(2));
    assert_eq!(h.cps.read(0, pv_try, 8), Ok(1));
    assert_eq!(h.cps.read(0, pv_try, 8), Ok(0));
    assert_eq!(h.cps.with_itu(|itu| itu.semaphore(sem)), Some(0));
}

#[test]
fn v_saturates_at_max() {
    let h = Harness::booted(1);
    itc_enable(&h);
    let sem = semaphore(&h) + 1;
    let pv_try = view(sem, ItcView::PvTry);
    for _ in 0..ITC_CELL_PV_MAX_VAL + 3 {
        h.cps.write(0, pv_try, 8, 0).unwrap();
    }
    assert_eq!(h.cps.with_itu(|itu| itu.semaphore(sem)), Some(ITC_CELL_PV_MAX_VAL));
    assert_eq!(
        h.cps.read(0, view(sem, ItcView::Bypass), 8),
        Ok(ITC_CELL_PV_MAX_VAL)
    );
}

#[test]
fn views_of_the_other_kind_are_inert() {
    let h = Harness::booted(1);
    itc_enable(&h);
    let sem = semaphore(&h);
    // EF views on a semaphore, PV views on a FIFO
    assert_eq!(h.cps.read(0, view(sem, ItcView::EfSync), 8), Ok(0));
    h.cps.write(0, view(sem, ItcView::EfSync), 8, 3).unwrap();
    assert_eq!(h.cps.with_itu(|itu| itu.semaphore(sem)), Some(0));
    assert_eq!(h.cps.read(0, view(0, ItcView::PvSync), 8), Ok(0));
    h.cps.write(0, view(0, ItcView::PvSync), 8, 3).unwrap();
    assert_eq!(h.cps.with_itu(|itu| itu.fifo_len(0)), Some(0));
    assert_eq!(h.cps.vp_state(0), Some(VpState::Running));
}

#[test]
fn waiters_contend_for_one_unit() {
    let h = Harness::booted(3);
    itc_enable(&h);
    let sem = semaphore(&h);
    let pv_sync = view(sem, ItcView::PvSync);

    assert_eq!(h.cps.read(1, pv_sync, 8), Err(EmuFault::Blocked));
    assert_eq!(h.cps.read(2, pv_sync, 8), Err(EmuFault::Blocked));
    assert_eq!(h.cps.with_itu(|itu| itu.blocked_vps(sem)), 0b110);

    h.cps.write(0, pv_sync, 8, 0).unwrap();
    assert!(h.cps.vp_runnable(1));
    assert!(h.cps.vp_runnable(2));
    assert_eq!(h.cps.read(2, pv_sync, 8), Ok(1));
    // the loser blocks again
    assert_eq!(h.cps.read(1, pv_sync, 8), Err(EmuFault::Blocked));
    assert_eq!(h.cps.with_itu(|itu| itu.semaphore(sem)), Some(0));
}

#[test]
fn threaded_p_is_released_by_v() {
    let h = Arc::new(Harness::booted(2));
    itc_enable(&h);
    let sem = semaphore(&h);
    let pv_sync = view(sem, ItcView::PvSync);

    let waiter = {
        let h = h.clone();
        thread::Builder::new()
            .name("vp1".into())
            .spawn(move || exec(&h, 1, pv_sync, None))
            .unwrap()
    };
    while h.cps.vp_state(1) != Some(VpState::BlockedOnCell(sem)) {
        thread::sleep(Duration::from_millis(1));
    }
    exec(&h, 0, pv_sync, Some(0));
    assert_eq!(waiter.join().unwrap(), 1);
    assert_eq!(h.cps.with_itu(|itu| itu.semaphore(sem)), Some(0));
}
