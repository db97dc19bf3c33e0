// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The system-call surface.
//!
//! In this kernel the "system calls" are ordinary function calls: there is
//! one address space and one privilege level, and the trust boundary is
//! this module's API, not a hardware trap. Task-side code (via `userlib`)
//! calls in here; these functions locate the running kernel through a
//! process-global slot and operate on it.
//!
//! Every mutating call on this surface yields to the scheduler after doing
//! its work, so any state change is also a scheduling opportunity. The
//! exceptions, deliberately: `task_create` (so an init task can lay out a
//! batch of more important tasks atomically), `current_task`, the
//! critical-section pair, the heap veneers, and `stack_used`.
//!
//! Nothing here holds a reference into the kernel across a context
//! transfer; that is the one rule that keeps the raw-pointer style below
//! honest.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use abi::{KernelConfig, Priority, StackError, TaskError, TaskState};

use crate::arch;
use crate::event::{self, EventInfo};
use crate::heap::{Heap, HeapError};
use crate::task::{self, Kernel, TaskEntry, TaskHandle, Tcb};

/// Resume code used by ordinary yields. Code 0 is reserved: the scheduler
/// interprets a zero return from its save as the direct call. The all-ones
/// code ([`abi::TASK_ERROR`]) is fatal to the run.
pub(crate) const RESUME_NORMAL: u32 = 1;

/// The running kernel, installed for the duration of `start_kernel`. One
/// kernel per process at a time.
static KERNEL: AtomicPtr<Kernel> = AtomicPtr::new(ptr::null_mut());

/// Claims the kernel slot. Fails if some other kernel is mid-run.
pub(crate) fn install_kernel(k: *mut Kernel) -> bool {
    KERNEL
        .compare_exchange(ptr::null_mut(), k, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

/// Releases the kernel slot, if `k` still owns it.
pub(crate) fn uninstall_kernel(k: *mut Kernel) {
    let _ = KERNEL.compare_exchange(k, ptr::null_mut(), Ordering::SeqCst, Ordering::SeqCst);
}

/// The running kernel. Calling any of this surface without a kernel
/// mid-run is a programmer error, caught here.
pub(crate) fn kernel_ptr() -> *mut Kernel {
    let p = KERNEL.load(Ordering::SeqCst);
    uassert!(!p.is_null());
    p
}

/// Resolves the `None`-means-caller convention shared by most calls.
///
/// # Safety
///
/// `kernel` must be the installed kernel, with a current task.
unsafe fn resolve(kernel: *mut Kernel, target: Option<TaskHandle>) -> *mut Tcb {
    match target {
        Some(h) => h.as_ptr(),
        None => {
            let t = (*kernel).current;
            uassert!(!t.is_null());
            t
        }
    }
}

/// Enters the scheduler with the given resume code, unless the critical
/// flag is set, in which case this is a no-op.
pub(crate) fn yield_with_code(code: u32) {
    let kernel = kernel_ptr();
    // Safety: the accesses are short-lived, and the save/restore pair
    // follows the dispatch protocol: our save returns 0 now, and the
    // scheduler's restore brings us back through it later.
    unsafe {
        if (*kernel).critical {
            return;
        }
        let me = (*kernel).current;
        uassert!(!me.is_null());
        if arch::save_context(&raw mut (*me).context) == 0 {
            arch::restore_context(&raw const (*kernel).sched_context, code);
        }
    }
}

/// Cooperatively hands the processor to the scheduler. The only way user
/// code should ever reach the scheduler.
pub fn sched_yield() {
    yield_with_code(RESUME_NORMAL);
}

/// Handle of the running task. Does not yield, so the other calls here
/// can use it internally.
pub fn current_task() -> TaskHandle {
    let kernel = kernel_ptr();
    // Safety: a task is asking, so `current` is its valid TCB.
    unsafe {
        let t = (*kernel).current;
        uassert!(!t.is_null());
        TaskHandle::new(ptr::NonNull::new_unchecked(t))
    }
}

/// Creates a task. See [`task::create`] for the allocation story. Does
/// not yield.
pub fn task_create(
    entry: TaskEntry,
    arg: usize,
    stack_bytes: usize,
    heap_bytes: usize,
    priority: Priority,
) -> Result<TaskHandle, TaskError> {
    let kernel = kernel_ptr();
    // Safety: create does not transfer contexts, so a scoped &mut is fine.
    unsafe {
        let t = task::create(&mut *kernel, entry, arg, stack_bytes, heap_bytes, priority)?;
        Ok(TaskHandle::new(ptr::NonNull::new_unchecked(t)))
    }
}

/// Marks `target` (the caller, if `None`) as killed and yields. The
/// actual teardown happens in the scheduler's next scan. Killing yourself
/// therefore never returns; killing someone else returns after an
/// ordinary round trip through the scheduler.
pub fn task_kill(target: Option<TaskHandle>) {
    let kernel = kernel_ptr();
    // Safety: short-lived access, dead before the yield.
    unsafe {
        let t = resolve(kernel, target);
        (*t).state = TaskState::Killed;
    }
    yield_with_code(RESUME_NORMAL);
}

/// Reads `target`'s priority. Yields first, so the value reported is the
/// priority as of the caller's resumption.
pub fn task_get_priority(target: Option<TaskHandle>) -> Priority {
    let kernel = kernel_ptr();
    // Safety: short-lived accesses around the yield.
    let t = unsafe { resolve(kernel, target) };
    sched_yield();
    unsafe { (*t).priority }
}

/// Sets `target`'s priority, then yields. [`Priority::RESERVED`] is
/// rejected (and the rejected call does not yield).
pub fn task_set_priority(target: Option<TaskHandle>, priority: Priority) -> Result<(), TaskError> {
    if priority == Priority::RESERVED {
        return Err(TaskError::InvalidPriority);
    }
    let kernel = kernel_ptr();
    // Safety: short-lived access, dead before the yield.
    unsafe {
        let t = resolve(kernel, target);
        (*t).priority = priority;
    }
    sched_yield();
    Ok(())
}

/// Reads `target`'s scheduling state, after a yield.
pub fn task_get_status(target: Option<TaskHandle>) -> TaskState {
    let kernel = kernel_ptr();
    // Safety: short-lived accesses around the yield.
    let t = unsafe { resolve(kernel, target) };
    sched_yield();
    unsafe { (*t).state }
}

/// Sets `target`'s scheduling state, then yields. Writing
/// [`TaskState::Killed`] here is equivalent to `task_kill`.
pub fn task_set_status(target: Option<TaskHandle>, state: TaskState) {
    let kernel = kernel_ptr();
    // Safety: short-lived access, dead before the yield.
    unsafe {
        let t = resolve(kernel, target);
        (*t).state = state;
    }
    sched_yield();
}

/// Raises the process-wide critical flag: until lowered again, yields are
/// no-ops and the caller cannot lose the processor. Not nestable -- this
/// is a flag, not a counter -- and to be held only across short bursts of
/// state changes. Does not yield, obviously.
pub fn critical_enter() {
    let kernel = kernel_ptr();
    // Safety: plain flag write.
    unsafe { (*kernel).critical = true };
}

/// Lowers the critical flag. Does not itself yield.
pub fn critical_leave() {
    let kernel = kernel_ptr();
    // Safety: plain flag write.
    unsafe { (*kernel).critical = false };
}

/// Approximate stack use of `target` (the caller, if `None`), by fill
/// sentinel. Does not yield.
pub fn stack_used(target: Option<TaskHandle>) -> Result<usize, StackError> {
    let kernel = kernel_ptr();
    // Safety: short-lived access; no yield anywhere in this call.
    unsafe {
        let t = resolve(kernel, target);
        (*t).stack_used()
    }
}

/// Generates an event; see [`event::generate`]. Yields.
pub fn generate_event(target: Option<TaskHandle>, kind: u32, detail: u32) -> Result<(), TaskError> {
    let kernel = kernel_ptr();
    event::generate(kernel, target.map(|h| h.as_ptr()), kind, detail)
}

/// Nonblocking event receive; see [`event::check`]. Yields when it
/// consumes an event.
pub fn check_event() -> Option<EventInfo> {
    event::check(kernel_ptr())
}

/// Blocking event receive; see [`event::wait`].
pub fn wait_event() -> EventInfo {
    event::wait(kernel_ptr())
}

/// The caller's private heap, for direct use of the allocator API.
pub fn task_heap() -> Heap {
    let kernel = kernel_ptr();
    // Safety: short-lived access.
    unsafe {
        let t = resolve(kernel, None);
        (*t).heap
    }
}

/// Allocates from the caller's task heap. Does not yield.
pub fn task_alloc(bytes: usize) -> Option<ptr::NonNull<u8>> {
    task_heap().alloc(bytes)
}

/// Frees a task-heap allocation. Does not yield.
pub fn task_free(p: *mut u8) -> Result<(), HeapError> {
    task_heap().free(p)
}

/// The configuration the kernel was started with, for code that wants the
/// embedding defaults.
pub fn config() -> KernelConfig {
    let kernel = kernel_ptr();
    // Safety: config is immutable after boot.
    unsafe { (*kernel).config }
}
