// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event delivery.
//!
//! Every piece of inter-task signaling in the system reduces to events. A
//! producer never touches its destination directly: `generate_event`
//! allocates an event from the global heap, appends it to the *system
//! inbox*, and marks the broker runnable. The broker -- an ordinary task,
//! created at the most important priority during boot -- drains the system
//! inbox, unblocks each destination that is waiting, moves the event into
//! the destination's own inbox, then suspends itself and yields.
//!
//! Routing everything through the broker serializes all block/unblock
//! transitions at a single priority level: a delivery and its wake-up
//! happen within one cooperative step. The broker's importance makes
//! handoff prompt in practice, but correctness never depends on it running
//! before the next scheduler cycle.
//!
//! Events live on the *global* heap, never a task heap, because an event
//! can outlive its sender (and even its destination) while in flight.
//! Consumers receive event contents by value; the kernel frees the storage
//! before `check_event`/`wait_event` return.

use core::mem;
use core::ptr::{self, NonNull};

use abi::{Priority, TaskError, TaskFlags, TaskState};

use crate::syscalls;
use crate::task::{self, Kernel, TaskHandle, Tcb};

/// One event in flight. Allocated from the global heap by
/// `generate_event`, freed by the consumer's dequeue (or by the reaper if
/// the destination died first).
#[repr(C)]
pub(crate) struct Event {
    kind: u32,
    detail: u32,
    sender: *mut Tcb,
    destination: *mut Tcb,
    next: *mut Event,
}

/// A singly linked FIFO of events: append at the tail, remove at the head.
#[repr(C)]
pub struct EventQueue {
    count: u32,
    first: *mut Event,
    last: *mut Event,
}

impl EventQueue {
    pub(crate) const fn new() -> Self {
        Self {
            count: 0,
            first: ptr::null_mut(),
            last: ptr::null_mut(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_null()
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// # Safety
    ///
    /// `ev` must be a valid event not currently in any queue.
    pub(crate) unsafe fn enqueue(&mut self, ev: NonNull<Event>) {
        let ev = ev.as_ptr();
        (*ev).next = ptr::null_mut();
        if self.last.is_null() {
            self.first = ev;
        } else {
            (*self.last).next = ev;
        }
        self.last = ev;
        self.count += 1;
    }

    /// # Safety
    ///
    /// The queue's links must be intact (only events enqueued above).
    pub(crate) unsafe fn dequeue(&mut self) -> Option<NonNull<Event>> {
        let ev = self.first;
        if ev.is_null() {
            return None;
        }
        self.first = (*ev).next;
        if self.first.is_null() {
            self.last = ptr::null_mut();
        }
        self.count -= 1;
        (*ev).next = ptr::null_mut();
        Some(NonNull::new_unchecked(ev))
    }
}

/// Event contents as returned to consumers, copied out by value.
#[derive(Copy, Clone, Debug)]
pub struct EventInfo {
    /// Type code; see the `EVENT_*` constants in `abi` for the well-known
    /// values.
    pub kind: u32,
    /// Type-specific payload word.
    pub detail: u32,
    /// The task that generated the event. Weak reference: the sender may
    /// have exited by the time the event is consumed.
    pub sender: TaskHandle,
}

/// Brings up the event system: system inbox from the global heap, then the
/// broker task. Must run before any task can use the event primitives, and
/// before the user's main task exists, so the broker's creation cannot
/// fail by racing user allocations.
pub(crate) fn init(kernel: &mut Kernel) -> Result<(), TaskError> {
    let inbox: *mut EventQueue = kernel
        .global_heap
        .alloc(mem::size_of::<EventQueue>())
        .ok_or(TaskError::OutOfMemory)?
        .cast()
        .as_ptr();
    // Safety: freshly allocated with exactly this size.
    unsafe { inbox.write(EventQueue::new()) };

    let (stack, heap) = (
        kernel.config.default_stack_bytes,
        kernel.config.default_heap_bytes,
    );
    let broker = match task::create(kernel, broker_main, 0, stack, heap, Priority::MOST_IMPORTANT) {
        Ok(t) => t,
        Err(e) => {
            let _ = kernel.global_heap.free(inbox.cast());
            return Err(e);
        }
    };
    kernel.broker = broker;
    kernel.system_inbox = inbox;
    klog!("event broker up");
    Ok(())
}

/// The broker task.
fn broker_main(_arg: usize) -> u32 {
    let kernel = syscalls::kernel_ptr();
    loop {
        // Safety: we are the running task; no reference into the kernel
        // survives past the yield below.
        unsafe {
            while let Some(ev) = (*(*kernel).system_inbox).dequeue() {
                let ev = ev.as_ptr();
                let dest = (*ev).destination;
                // A destination killed after the send still gets its
                // delivery; the reaper frees whatever is left in its
                // inbox. Only a healthy waiter is woken.
                if let TaskState::Healthy(depth) = (*dest).state {
                    if (*dest).flags.contains(TaskFlags::WAITING_FOR_EVENT) {
                        (*dest).state = TaskState::Healthy(depth.decremented());
                        (*dest).flags.remove(TaskFlags::WAITING_FOR_EVENT);
                    }
                }
                klog!(
                    "broker: event {:#x}/{:#x} -> task {}",
                    (*ev).kind,
                    (*ev).detail,
                    (*dest).task_number
                );
                (*(*dest).inbox).enqueue(NonNull::new_unchecked(ev));
            }
            (*(*kernel).broker).state = TaskState::SUSPENDED;
        }
        syscalls::sched_yield();
    }
}

/// Generates an event aimed at `dest` (or at the caller, if `dest` is
/// `None`), hands it to the broker, and yields.
///
/// Nonblocking for the sender: the only failure is the event allocation
/// itself. Once this returns `Ok`, the event is the broker's problem --
/// including the case where the destination is killed before delivery.
pub(crate) fn generate(
    kernel: *mut Kernel,
    dest: Option<*mut Tcb>,
    kind: u32,
    detail: u32,
) -> Result<(), TaskError> {
    // Safety: short-lived accesses only; the borrow is dead before the
    // yield.
    unsafe {
        let caller = (*kernel).current;
        let dest = dest.unwrap_or(caller);
        let ev: *mut Event = match (*kernel).global_heap.alloc(mem::size_of::<Event>()) {
            Some(p) => p.cast().as_ptr(),
            None => return Err(TaskError::OutOfMemory),
        };
        ev.write(Event {
            kind,
            detail,
            sender: caller,
            destination: dest,
            next: ptr::null_mut(),
        });
        (*(*kernel).system_inbox).enqueue(NonNull::new_unchecked(ev));
        (*(*kernel).broker).state = TaskState::RUNNABLE;
    }
    syscalls::sched_yield();
    Ok(())
}

/// Nonblocking receive: dequeues the oldest event in the caller's inbox,
/// or returns `None` without yielding if there is nothing waiting.
pub(crate) fn check(kernel: *mut Kernel) -> Option<EventInfo> {
    // Safety: as in `generate`.
    let info = unsafe {
        let me = (*kernel).current;
        let ev = (*(*me).inbox).dequeue()?;
        take(kernel, ev)
    };
    syscalls::sched_yield();
    Some(info)
}

/// Blocking receive: parks the caller until the broker has delivered at
/// least one event, then dequeues the oldest.
///
/// Blocking works by raising the caller's block depth and setting
/// `WAITING_FOR_EVENT`; the *broker* undoes both at delivery time, which
/// is what makes the task runnable again. An event already waiting in the
/// inbox is returned without yielding at all.
pub(crate) fn wait(kernel: *mut Kernel) -> EventInfo {
    loop {
        // Safety: as in `generate`.
        unsafe {
            let me = (*kernel).current;
            if let Some(ev) = (*(*me).inbox).dequeue() {
                return take(kernel, ev);
            }
            if let TaskState::Healthy(depth) = (*me).state {
                (*me).state = TaskState::Healthy(depth.incremented());
            }
            (*me).flags.insert(TaskFlags::WAITING_FOR_EVENT);
        }
        syscalls::sched_yield();
    }
}

/// Copies an event out by value and frees its storage.
///
/// # Safety
///
/// `ev` must be a valid event freshly dequeued from some inbox.
unsafe fn take(kernel: *mut Kernel, ev: NonNull<Event>) -> EventInfo {
    let ev = ev.as_ptr();
    let info = EventInfo {
        kind: (*ev).kind,
        detail: (*ev).detail,
        // Safety: generate always records the (non-null) calling task.
        sender: TaskHandle::new(NonNull::new_unchecked((*ev).sender)),
    };
    let _ = (*kernel).global_heap.free(ev.cast());
    info
}

/// Drops every undelivered event aimed at `dead` from the system inbox,
/// freeing each to the global heap. Called by the reaper so that a killed
/// destination cannot leave the broker holding a pointer to a freed TCB.
pub(crate) fn purge_undelivered(kernel: &mut Kernel, dead: *mut Tcb) {
    if kernel.system_inbox.is_null() {
        return;
    }
    // Safety: the queue links are intact and every event in it is a live
    // global-heap allocation; `dead` is only compared, never dereferenced.
    unsafe {
        let q = &mut *kernel.system_inbox;
        let mut cur = q.first;
        let mut prev: *mut Event = ptr::null_mut();
        while !cur.is_null() {
            let next = (*cur).next;
            if (*cur).destination == dead {
                if prev.is_null() {
                    q.first = next;
                } else {
                    (*prev).next = next;
                }
                if q.last == cur {
                    q.last = prev;
                }
                q.count -= 1;
                let _ = kernel.global_heap.free(cur.cast());
            } else {
                prev = cur;
            }
            cur = next;
        }
    }
}
