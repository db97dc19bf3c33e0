// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks and the scheduler.
//!
//! The kernel is cooperative: a task runs until it yields or calls a
//! yielding primitive, at which point control transfers to the scheduler
//! context, which picks the next runnable task and transfers to it. The
//! scheduler is priority-based -- the most important (numerically lowest)
//! runnable priority wins -- and tasks of equal importance round-robin in
//! task-list order, tracked by the `current` cursor.
//!
//! All global mutable state lives in one [`Kernel`] value: the global heap,
//! the task list and cursor, the scheduler's own context, the critical
//! flag, and the event system's fixtures. Scheduling is single-threaded, so
//! no locking appears anywhere; the one rule, observed throughout, is that
//! no reference into the kernel may be held live across a context transfer.

use core::mem;
use core::ptr::{self, NonNull};

use abi::{IdlePolicy, KernelConfig, Priority, StackError, TaskError, TaskState, STACK_SENTINEL};

use crate::arch::{self, Context};
use crate::err::StartError;
use crate::event::EventQueue;
use crate::heap::Heap;
use crate::syscalls::{self, RESUME_NORMAL};

/// Type of a task entry function: a single opaque argument in, a result
/// code out. Returning [`abi::TASK_ERROR`] reports a fatal condition that
/// aborts the whole kernel run; anything else just ends the task.
pub type TaskEntry = fn(usize) -> u32;

/// Task Control Block: the per-task record holding scheduling, memory, and
/// event state. TCBs are allocated from the global heap and live until the
/// scheduler reaps them.
#[repr(C)]
pub struct Tcb {
    /// Serial number, assigned monotonically at creation. Diagnostic only.
    pub(crate) task_number: u32,
    pub(crate) priority: Priority,
    pub(crate) state: TaskState,
    pub(crate) flags: abi::TaskFlags,

    /// Saved execution context; meaningful while the task is suspended.
    pub(crate) context: Context,
    pub(crate) entry: TaskEntry,
    pub(crate) arg: usize,

    /// The task's private heap, carved from the global heap. Owns the
    /// stack, the inbox, and all task-local allocations, so reaping the
    /// task frees everything in one step.
    pub(crate) heap: Heap,
    pub(crate) stack: NonNull<u8>,
    pub(crate) stack_bytes: usize,

    /// Inbox the broker delivers into; allocated from the task heap.
    pub(crate) inbox: *mut EventQueue,

    /// Task-list links.
    pub(crate) next: *mut Tcb,
    pub(crate) prev: *mut Tcb,
}

impl Tcb {
    /// Estimates stack use by scanning for the fill sentinel from the
    /// low-address end. A dirty byte at offset zero means the stack has
    /// (at least) touched its last byte, which is reported as an overrun.
    ///
    /// This is a diagnostic, not a guard: by the time it reports overrun,
    /// whatever sat below the stack has already been walked on.
    pub(crate) fn stack_used(&self) -> Result<usize, StackError> {
        let stack = self.stack.as_ptr();
        // Safety: the stack buffer is owned by this task's heap and is
        // `stack_bytes` long.
        unsafe {
            if stack.read() != STACK_SENTINEL {
                return Err(StackError::Overrun);
            }
            let mut untouched = 0;
            while untouched < self.stack_bytes && stack.add(untouched).read() == STACK_SENTINEL {
                untouched += 1;
            }
            Ok(self.stack_bytes - untouched)
        }
    }
}

/// Opaque reference to a task, as handed across the system-call surface.
///
/// Handles are weak: the kernel does not track them, and a handle to a
/// reaped task dangles. They remain useful for identity comparison (an
/// event's sender, say), but operating on a handle whose task has been
/// killed and reaped is a programmer error the kernel does not detect.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskHandle(NonNull<Tcb>);

impl TaskHandle {
    pub(crate) fn new(tcb: NonNull<Tcb>) -> Self {
        Self(tcb)
    }

    pub(crate) fn as_ptr(&self) -> *mut Tcb {
        self.0.as_ptr()
    }
}

/// The global task list: doubly linked, tail-insert. The scheduler places
/// no meaning on position beyond round-robin order.
pub(crate) struct TaskQueue {
    pub(crate) first: *mut Tcb,
    pub(crate) last: *mut Tcb,
}

impl TaskQueue {
    pub(crate) const fn new() -> Self {
        Self {
            first: ptr::null_mut(),
            last: ptr::null_mut(),
        }
    }

    /// # Safety
    ///
    /// `t` must be a valid TCB not currently in any list.
    pub(crate) unsafe fn push_back(&mut self, t: *mut Tcb) {
        (*t).next = ptr::null_mut();
        (*t).prev = self.last;
        if self.last.is_null() {
            self.first = t;
        } else {
            (*self.last).next = t;
        }
        self.last = t;
    }

    /// # Safety
    ///
    /// `t` must be a member of this list.
    pub(crate) unsafe fn unlink(&mut self, t: *mut Tcb) {
        if (*t).prev.is_null() {
            self.first = (*t).next;
        } else {
            (*(*t).prev).next = (*t).next;
        }
        if (*t).next.is_null() {
            self.last = (*t).prev;
        } else {
            (*(*t).next).prev = (*t).prev;
        }
        (*t).next = ptr::null_mut();
        (*t).prev = ptr::null_mut();
    }

    /// Successor of `t` with wrap-around to the head.
    ///
    /// # Safety
    ///
    /// `t` must be a member of this list.
    pub(crate) unsafe fn next_cyclic(&self, t: *mut Tcb) -> *mut Tcb {
        let n = (*t).next;
        if n.is_null() {
            self.first
        } else {
            n
        }
    }
}

/// All mutable kernel state, as one value.
pub struct Kernel {
    pub(crate) global_heap: Heap,
    pub(crate) tasks: TaskQueue,
    /// Round-robin cursor; also "the running task" whenever a task context
    /// is live. Weak: reaping advances it before unlinking.
    pub(crate) current: *mut Tcb,
    pub(crate) sched_context: Context,
    /// Process-wide critical-section flag; while set, yields are no-ops.
    pub(crate) critical: bool,
    pub(crate) next_task_number: u32,
    /// The event broker's TCB, once the event system is up.
    pub(crate) broker: *mut Tcb,
    /// The broker's work queue. Allocated from the global heap, not any
    /// task heap, because the events threaded through it must outlive the
    /// task heaps they pass by.
    pub(crate) system_inbox: *mut EventQueue,
    pub(crate) config: KernelConfig,
}

impl Kernel {
    pub(crate) fn new(global_heap: Heap, config: KernelConfig) -> Self {
        Self {
            global_heap,
            tasks: TaskQueue::new(),
            current: ptr::null_mut(),
            sched_context: Context::default(),
            critical: false,
            next_task_number: 0,
            broker: ptr::null_mut(),
            system_inbox: ptr::null_mut(),
            config,
        }
    }
}

/// Creates a task: TCB from the global heap, task heap from the global
/// heap, stack and inbox from the task heap, initial context rigged to the
/// entry trampoline. The new task is runnable and linked at the tail of
/// the task list.
///
/// This does *not* yield, so an initialization task can create a batch of
/// more important tasks without being preempted between them. Call the
/// yield primitive explicitly to force a switch.
///
/// On any allocation failure the TCB and task-heap block are unwound;
/// there is nothing else to unwind, because the stack and inbox die with
/// the task heap.
pub(crate) fn create(
    kernel: &mut Kernel,
    entry: TaskEntry,
    arg: usize,
    stack_bytes: usize,
    heap_bytes: usize,
    priority: Priority,
) -> Result<*mut Tcb, TaskError> {
    if priority == Priority::RESERVED {
        return Err(TaskError::InvalidPriority);
    }

    let global = kernel.global_heap;
    let tcb: *mut Tcb = global
        .alloc(mem::size_of::<Tcb>())
        .ok_or(TaskError::OutOfMemory)?
        .cast()
        .as_ptr();

    // Everything after this point unwinds through `fail`, which frees the
    // TCB and (if allocated) the task-heap block.
    let fail = |heap_block: *mut u8, e: TaskError| {
        if !heap_block.is_null() {
            let _ = global.free(heap_block);
        }
        let _ = global.free(tcb.cast());
        e
    };

    let heap_block = match global.alloc(heap_bytes) {
        Some(p) => p.as_ptr(),
        None => return Err(fail(ptr::null_mut(), TaskError::OutOfMemory)),
    };
    // Safety: the block was just carved from the global heap for exactly
    // this purpose and is not otherwise referenced.
    let task_heap = match unsafe { Heap::init_raw(heap_block, heap_bytes) } {
        Ok(h) => h,
        Err(_) => return Err(fail(heap_block, TaskError::OutOfMemory)),
    };

    let stack = match task_heap.alloc(stack_bytes) {
        Some(p) => p,
        None => return Err(fail(heap_block, TaskError::OutOfMemory)),
    };
    let inbox: *mut EventQueue = match task_heap.alloc(mem::size_of::<EventQueue>()) {
        Some(p) => p.cast().as_ptr(),
        None => return Err(fail(heap_block, TaskError::OutOfMemory)),
    };

    // Safety: both allocations were just made from the task heap with the
    // sizes used here.
    unsafe {
        ptr::write_bytes(stack.as_ptr(), STACK_SENTINEL, stack_bytes);
        inbox.write(EventQueue::new());
    }

    let mut context = Context::default();
    let stack_top = stack.as_ptr() as usize + stack_bytes;
    if let Err(e) =
        arch::prepare_initial_frame(&mut context, stack_top, task_entry_trampoline as usize)
    {
        return Err(fail(heap_block, e));
    }

    let task_number = kernel.next_task_number;
    kernel.next_task_number += 1;

    // Safety: tcb was allocated with size_of::<Tcb>() and is written in
    // full before anything reads it.
    unsafe {
        tcb.write(Tcb {
            task_number,
            priority,
            state: TaskState::RUNNABLE,
            flags: abi::TaskFlags::empty(),
            context,
            entry,
            arg,
            heap: task_heap,
            stack,
            stack_bytes,
            inbox,
            next: ptr::null_mut(),
            prev: ptr::null_mut(),
        });
        kernel.tasks.push_back(tcb);
    }
    if kernel.current.is_null() {
        kernel.current = tcb;
    }

    klog!("task {} created, priority {}", task_number, priority.0);
    Ok(tcb)
}

/// Shared entry point for all tasks. Looks up its own TCB through the
/// cursor (the scheduler set it just before dispatching us), runs the
/// entry function, and arranges a normal death when it returns.
pub(crate) extern "C" fn task_entry_trampoline() -> ! {
    let kernel = syscalls::kernel_ptr();
    // Safety: we are the running task, so `current` is our valid TCB.
    let (entry, arg) = unsafe {
        let t = (*kernel).current;
        ((*t).entry, (*t).arg)
    };

    // On hosted builds a panicking task would otherwise unwind into the
    // fabricated frame below the trampoline; catch it and report it as a
    // fatal result code instead.
    #[cfg(not(target_os = "none"))]
    let code = std::panic::catch_unwind(move || entry(arg)).unwrap_or(abi::TASK_ERROR);
    #[cfg(target_os = "none")]
    let code = entry(arg);

    // Safety: as above.
    unsafe {
        (*(*kernel).current).state = TaskState::Killed;
    }
    // Resume code 0 is reserved for the scheduler's direct save; a task
    // exiting successfully reports the ordinary resume code instead.
    let code = if code == 0 { RESUME_NORMAL } else { code };
    loop {
        // The yield cannot return (we are killed), unless the critical
        // flag was left set; retrying is the least bad answer to that.
        syscalls::yield_with_code(code);
    }
}

/// One pass over the task list: reaps every killed task and returns the
/// most important priority among the runnable ones, or
/// [`Priority::RESERVED`] if nothing is runnable.
pub(crate) fn scan_and_reap(kernel: &mut Kernel) -> Priority {
    let mut best = Priority::RESERVED;
    let mut t = kernel.tasks.first;
    while !t.is_null() {
        // Safety: list members are valid TCBs; `next` is read before any
        // possible reap of `t`.
        unsafe {
            let next = (*t).next;
            if (*t).state == TaskState::Killed {
                reap(kernel, t);
                t = next;
                continue;
            }
            if (*t).state.is_runnable() && (*t).priority.is_more_important_than(best) {
                best = (*t).priority;
            }
            t = next;
        }
    }
    best
}

/// Tears down a dead task: cursor advanced off it, unlinked, in-flight
/// events freed, task heap and TCB returned to the global heap.
///
/// Events are allocated from the global heap, so the ones still threaded
/// through the dead task's inbox -- and any aimed at it but not yet
/// delivered -- must be freed here explicitly; they do not die with the
/// task heap.
///
/// # Safety
///
/// `t` must be a member of the kernel's task list.
pub(crate) unsafe fn reap(kernel: &mut Kernel, t: *mut Tcb) {
    klog!("reaping task {}", (*t).task_number);
    if kernel.current == t {
        let next = kernel.tasks.next_cyclic(t);
        kernel.current = if next == t { ptr::null_mut() } else { next };
    }
    kernel.tasks.unlink(t);

    while let Some(ev) = (*(*t).inbox).dequeue() {
        let _ = kernel.global_heap.free(ev.as_ptr().cast());
    }
    crate::event::purge_undelivered(kernel, t);

    let _ = kernel.global_heap.free((*t).heap.region_ptr());
    let _ = kernel.global_heap.free(t.cast());
}

/// Picks the next task to run: the first one after the cursor (with
/// wrap-around) that is runnable and at least as important as `ceiling`.
/// The caller's scan proved such a task exists, so the walk terminates.
pub(crate) fn select(kernel: &Kernel, ceiling: Priority) -> *mut Tcb {
    uassert!(!kernel.current.is_null());
    // Safety: the cursor and every node it links to are valid list
    // members.
    unsafe {
        let mut t = kernel.tasks.next_cyclic(kernel.current);
        while ceiling.is_more_important_than((*t).priority) || !(*t).state.is_runnable() {
            t = kernel.tasks.next_cyclic(t);
        }
        t
    }
}

/// The scheduler loop. Runs in the embedding's own context (the one that
/// called `start_kernel`) and re-enters once per yield.
///
/// Returns `Ok` when no task is runnable and the idle policy says to exit;
/// returns `Err` if a resume delivered the fatal all-ones code.
pub(crate) fn scheduler(kernel: *mut Kernel) -> Result<(), StartError> {
    loop {
        // Borrow scope: all list surgery happens here, and the borrow is
        // dead before the context transfer below.
        let chosen = {
            // Safety: `kernel` outlives the run; no other reference is
            // live while the scheduler context executes.
            let k = unsafe { &mut *kernel };
            let ceiling = scan_and_reap(k);
            if ceiling == Priority::RESERVED {
                match k.config.idle {
                    IdlePolicy::Exit => {
                        klog!("no runnable task; returning to host");
                        return Ok(());
                    }
                    IdlePolicy::WaitForInterrupt => {
                        arch::wait_for_interrupt();
                        continue;
                    }
                }
            }
            select(k, ceiling)
        };

        // Safety: save/restore protocol. The save is made exactly once
        // per selection cycle; yields restore into it with a nonzero
        // code, which lands in the `else` arms below.
        unsafe {
            let code = arch::save_context(&raw mut (*kernel).sched_context);
            if code == 0 {
                (*kernel).current = chosen;
                arch::restore_context(&raw const (*chosen).context, RESUME_NORMAL);
            } else if code == abi::TASK_ERROR {
                klog!("fatal resume code; abandoning the run");
                return Err(StartError::FatalResume);
            }
            // Any other code is an ordinary yield; go around again.
        }
    }
}
