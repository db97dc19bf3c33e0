// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Userlib: the library surface tasks program against.
//!
//! Tasks and the kernel share one address space, so the system-call
//! veneer below is a set of plain function calls into `kern`'s syscall
//! module, re-exported here under the conventional `sys_*` names together
//! with the shared ABI types. Task code should depend on this crate and
//! not reach into `kern` directly; the kernel's internals are not part of
//! the contract.
//!
//! The blocking rules, briefly: every mutating call yields to the
//! scheduler (`sys_task_create` excepted, so batches of creations stay
//! atomic), `sys_wait_event` blocks until the broker delivers, and
//! everything else returns without suspending. See the kernel
//! documentation for the full story.

#![cfg_attr(target_os = "none", no_std)]

pub use abi::*;
pub use kern::event::EventInfo;
pub use kern::heap::{Heap, HeapError, HeapStats};
pub use kern::task::{TaskEntry, TaskHandle};
pub use kern::util::copy_bytes;

pub mod hl;

use core::ptr::NonNull;

/// Cooperatively yields the processor to the scheduler.
pub fn sys_yield() {
    kern::syscalls::sched_yield()
}

/// Handle of the calling task. Does not yield.
pub fn sys_current_task() -> TaskHandle {
    kern::syscalls::current_task()
}

/// Creates a runnable task and links it at the tail of the task list.
/// Does not yield; call [`sys_yield`] to offer the processor afterwards.
pub fn sys_task_create(
    entry: TaskEntry,
    arg: usize,
    stack_bytes: usize,
    heap_bytes: usize,
    priority: Priority,
) -> Result<TaskHandle, TaskError> {
    kern::syscalls::task_create(entry, arg, stack_bytes, heap_bytes, priority)
}

/// Kills `target`, or the caller when `None` (in which case this call
/// never returns). Teardown happens on the scheduler's next scan.
pub fn sys_task_kill(target: Option<TaskHandle>) {
    kern::syscalls::task_kill(target)
}

/// Priority of `target` (the caller when `None`), reported after a round
/// trip through the scheduler.
pub fn sys_task_get_priority(target: Option<TaskHandle>) -> Priority {
    kern::syscalls::task_get_priority(target)
}

/// Reprioritizes `target` (the caller when `None`), then yields.
pub fn sys_task_set_priority(
    target: Option<TaskHandle>,
    priority: Priority,
) -> Result<(), TaskError> {
    kern::syscalls::task_set_priority(target, priority)
}

/// Scheduling state of `target` (the caller when `None`), reported after
/// a round trip through the scheduler.
pub fn sys_task_get_status(target: Option<TaskHandle>) -> TaskState {
    kern::syscalls::task_get_status(target)
}

/// Overwrites the scheduling state of `target` (the caller when `None`),
/// then yields. Writing [`TaskState::Killed`] is equivalent to
/// [`sys_task_kill`].
pub fn sys_task_set_status(target: Option<TaskHandle>, state: TaskState) {
    kern::syscalls::task_set_status(target, state)
}

/// Suppresses task switching until [`sys_critical_leave`]. Keep critical
/// sections short; they exist to group a burst of state changes, not to
/// own the processor.
pub fn sys_critical_enter() {
    kern::syscalls::critical_enter()
}

/// Re-enables task switching.
pub fn sys_critical_leave() {
    kern::syscalls::critical_leave()
}

/// Approximate bytes of stack `target` has used, by sentinel scan.
pub fn sys_stack_used(target: Option<TaskHandle>) -> Result<usize, StackError> {
    kern::syscalls::stack_used(target)
}

/// Sends an event to `target` (the caller when `None`) by way of the
/// broker. Never blocks the sender; `Ok` means the event is in flight,
/// whatever later becomes of the destination.
pub fn sys_generate_event(
    target: Option<TaskHandle>,
    kind: u32,
    detail: u32,
) -> Result<(), TaskError> {
    kern::syscalls::generate_event(target, kind, detail)
}

/// Nonblocking receive from the caller's inbox. `None` means nothing was
/// waiting (and the call did not yield).
pub fn sys_check_event() -> Option<EventInfo> {
    kern::syscalls::check_event()
}

/// Blocking receive: parks the caller until the broker delivers an event,
/// then returns the oldest one.
pub fn sys_wait_event() -> EventInfo {
    kern::syscalls::wait_event()
}

/// The caller's private heap handle, for direct allocator use.
pub fn sys_task_heap() -> Heap {
    kern::syscalls::task_heap()
}

/// Allocates zero-filled bytes from the caller's task heap. Memory not
/// freed earlier is reclaimed wholesale when the task dies.
pub fn sys_task_alloc(bytes: usize) -> Option<NonNull<u8>> {
    kern::syscalls::task_alloc(bytes)
}

/// Frees a [`sys_task_alloc`] allocation.
pub fn sys_task_free(p: *mut u8) -> Result<(), HeapError> {
    kern::syscalls::task_free(p)
}

/// Command-line bundle handed to a hosted kernel's main task, mirroring
/// the classic `{argc, argv}` embedding convention. Build one with
/// [`CommandLine::from_env`], leak it, and pass its address as the main
/// task's argument.
#[cfg(not(target_os = "none"))]
#[derive(Debug, Default)]
pub struct CommandLine {
    pub args: Vec<String>,
}

#[cfg(not(target_os = "none"))]
impl CommandLine {
    pub fn from_env() -> Self {
        Self {
            args: std::env::args().collect(),
        }
    }
}
