// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The stack-use diagnostic, measured from inside a running task.

use std::cell::Cell;
use std::hint::black_box;
use std::sync::Mutex;

use kern::start_kernel;
use userlib::*;

static RUN: Mutex<()> = Mutex::new(());

const STACK: usize = 256 * 1024;
const HEAP: usize = 512 * 1024;

unsafe fn shared<'a, T>(arg: usize) -> &'a T {
    &*(arg as *const T)
}

#[derive(Default)]
struct Shared {
    shallow: Cell<usize>,
    deep: Cell<usize>,
    peer_used: Cell<usize>,
}

#[inline(never)]
fn burn(depth: u32) -> u64 {
    let mut scratch = [0u8; 512];
    scratch[0] = depth as u8;
    black_box(&mut scratch);
    if depth == 0 {
        scratch[0] as u64
    } else {
        burn(depth - 1) + scratch[0] as u64
    }
}

fn probe(arg: usize) -> u32 {
    let sh = unsafe { shared::<Shared>(arg) };
    sh.shallow.set(sys_stack_used(None).unwrap_or(0));
    black_box(burn(16));
    // The high-water mark persists after burn() returns; the sentinel
    // bytes it consumed stay consumed.
    sh.deep.set(sys_stack_used(None).unwrap_or(0));
    TASK_SUCCESS
}

fn observer(arg: usize) -> u32 {
    let sh = unsafe { shared::<Shared>(arg) };
    sys_yield(); // give the probe (equal priority) a dispatch first
    sh.peer_used
        .set(sys_stack_used(Some(sys_current_task())).unwrap_or(0));
    TASK_SUCCESS
}

fn main_task(arg: usize) -> u32 {
    if sys_task_create(probe, arg, STACK, HEAP, Priority(60)).is_err()
        || sys_task_create(observer, arg, STACK, HEAP, Priority(60)).is_err()
    {
        return TASK_ERROR;
    }
    TASK_SUCCESS
}

#[test]
fn stack_use_grows_with_call_depth() {
    let _serial = RUN.lock().unwrap_or_else(|e| e.into_inner());
    let sh = Box::leak(Box::new(Shared::default()));
    let region = Box::leak(vec![0u8; 8 << 20].into_boxed_slice());
    let config = KernelConfig {
        default_stack_bytes: STACK,
        default_heap_bytes: HEAP,
        ..KernelConfig::default()
    };
    start_kernel(region, main_task, sh as *const _ as usize, config).unwrap();

    let shallow = sh.shallow.get();
    let deep = sh.deep.get();
    assert!(shallow > 0, "even a fresh task has touched some stack");
    assert!(shallow < STACK);
    assert!(
        deep >= shallow + 16 * 512,
        "sixteen 512-byte frames must raise the high-water mark: {shallow} -> {deep}"
    );
    assert!(deep < STACK);
    assert!(sh.peer_used.get() > 0);
}
