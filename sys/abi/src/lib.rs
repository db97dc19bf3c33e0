// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and task-side code.
//!
//! This crate holds the type vocabulary of the system-call surface: the
//! priority encoding, the task state and flag words, the well-known event
//! type codes, and the configuration constants of the embedding surface.
//! Nothing in here allocates or touches kernel state; it is deliberately
//! a leaf so that both `kern` and `userlib` can depend on it.

#![no_std]

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Indicates priority of a task.
///
/// Priorities are small numbers starting from zero. Numerically lower
/// priorities are more important, so Priority 0 is the most likely to be
/// scheduled, followed by 1, and so forth.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`,
/// to keep us from confusing ourselves on whether `>` means numerically
/// greater / less important, or more important / numerically smaller.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
    Default,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// The most important priority in the system. Reserved for the event
    /// broker, so that producers hand off to it promptly in practice.
    pub const MOST_IMPORTANT: Self = Self(0);

    /// The most important priority a user task should reasonably request.
    /// This is advisory; the kernel does not enforce it.
    pub const USER_CEILING: Self = Self(10);

    /// Priority given to the user's main task at boot.
    pub const USER_MAIN: Self = Self(250);

    /// All-ones priority, reserved. The scheduler's priority scan returns
    /// this value when no task is runnable, so no task may be created at it.
    pub const RESERVED: Self = Self(0xFF);

    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities, since lower numbers are more important.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

/// Saturating count of the reasons a task is not runnable.
///
/// Zero means runnable. Blocking primitives increment this, and the broker
/// (or an explicit status write) decrements it. Both directions saturate so
/// that a miscounted wake can never wrap a blocked task back to runnable or
/// park it forever at an enormous depth.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct BlockDepth(u32);

impl BlockDepth {
    pub const ZERO: Self = Self(0);

    pub const fn new(depth: u32) -> Self {
        Self(depth)
    }

    #[must_use]
    pub fn incremented(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    #[must_use]
    pub fn decremented(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

/// Scheduling state of a task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// Task can run, or is blocked/suspended at the given depth. A depth of
    /// zero is runnable.
    Healthy(BlockDepth),
    /// Task has been killed (explicitly, or by returning from its entry
    /// function) and will be reaped on the scheduler's next scan.
    Killed,
}

impl TaskState {
    /// State of a freshly created task.
    pub const RUNNABLE: Self = Self::Healthy(BlockDepth::ZERO);

    /// Conventional single-level suspension, as used by the broker between
    /// rounds of deliveries.
    pub const SUSPENDED: Self = Self::Healthy(BlockDepth(1));

    /// Checks if this task is in a potentially schedulable state.
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Healthy(d) if d.is_zero())
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::RUNNABLE
    }
}

bitflags::bitflags! {
    /// Collection of boolean flags tracking transient task conditions.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    #[repr(transparent)]
    pub struct TaskFlags: u8 {
        /// Set while the owning task is blocked inside `wait_event`; cleared
        /// by the broker at delivery time, or by the task itself on dequeue.
        const WAITING_FOR_EVENT = 1 << 0;
    }
}

/// Errors produced by the task-facing system-call surface.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskError {
    /// An allocation from the global or task heap failed.
    OutOfMemory,
    /// The initial context for a new task could not be constructed.
    ContextSetup,
    /// The requested priority is reserved for kernel use.
    InvalidPriority,
}

/// Errors from the stack diagnostic.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StackError {
    /// The sentinel byte at the far end of the stack has been overwritten;
    /// the stack has (approximately) overrun its buffer.
    Overrun,
}

/// Conventional success code for task entry functions.
pub const TASK_SUCCESS: u32 = 0;

/// All-ones error code. A task entry function returning this value is
/// reporting a fatal condition: the code propagates through the scheduler
/// dispatch and aborts the kernel run.
pub const TASK_ERROR: u32 = !0;

/// Well-known event type codes. The `type` field of an event is a free-form
/// u32; these values are the conventional routing hints used by the layers
/// built on top of the event system.
pub const EVENT_INVALID: u32 = 0x1000;
pub const EVENT_GENERIC: u32 = 0x1001;
pub const EVENT_MSG_ARRIVAL: u32 = 0x1002;
pub const EVENT_MSG_RECEIPT: u32 = 0x1003;
pub const EVENT_SEMAPHORE: u32 = 0x1004;
pub const EVENT_SIGNAL: u32 = 0x1005;

/// Smallest byte region that `Heap::init` will accept.
pub const HEAP_MIN_BYTES: usize = 1024;

/// Minimum number of surplus bytes that justifies splitting a free chunk
/// during allocation; smaller remainders are absorbed as internal
/// fragmentation.
pub const HEAP_MIN_SPLIT: usize = 24;

/// Magic number stamped into every chunk header, checked by walk/verify to
/// detect overruns into the in-band metadata.
pub const HEAP_MAGIC: u32 = 0xABAD_FADE;

/// Byte used to fill freshly carved task stacks, so that high-water use can
/// be estimated later by scanning for it.
pub const STACK_SENTINEL: u8 = 0x5A;

/// Default stack allocation for a task, in bytes. The kernel itself needs
/// roughly 2.5K of this; tasks with deep call trees should ask for more.
pub const DEFAULT_STACK_BYTES: usize = 3172;

/// Default task-private heap size, in bytes. The stack is carved from this
/// heap, so it must exceed the stack size with room to spare.
pub const DEFAULT_TASK_HEAP_BYTES: usize = 4096;

/// What the scheduler should do when no task is runnable.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IdlePolicy {
    /// Return from the kernel, ending the run. The right choice when the
    /// kernel is hosted as a process under another operating system.
    Exit,
    /// Stall the CPU pending an interrupt and rescan. The right choice on
    /// freestanding targets where some external event may unblock a task.
    WaitForInterrupt,
}

/// Embedding configuration, supplied by the host at `start_kernel` time.
#[derive(Copy, Clone, Debug)]
pub struct KernelConfig {
    /// Policy for the no-runnable-task condition.
    pub idle: IdlePolicy,
    /// Stack bytes for the user main task and the broker.
    pub default_stack_bytes: usize,
    /// Task-heap bytes for the user main task and the broker.
    pub default_heap_bytes: usize,
    /// Priority of the user main task.
    pub main_priority: Priority,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            idle: IdlePolicy::Exit,
            default_stack_bytes: DEFAULT_STACK_BYTES,
            default_heap_bytes: DEFAULT_TASK_HEAP_BYTES,
            main_priority: Priority::USER_MAIN,
        }
    }
}
