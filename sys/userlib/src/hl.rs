// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Higher-level wrappers for common task patterns.

use abi::{Priority, TaskError};

use crate::{sys_task_create, sys_wait_event, EventInfo, TaskEntry, TaskHandle};

/// Spawns a task with the embedding's default stack and heap sizes, at
/// the given priority.
pub fn spawn_at(entry: TaskEntry, arg: usize, priority: Priority) -> Result<TaskHandle, TaskError> {
    let config = kern::syscalls::config();
    sys_task_create(
        entry,
        arg,
        config.default_stack_bytes,
        config.default_heap_bytes,
        priority,
    )
}

/// Spawns a task with all the embedding defaults, including the main-task
/// priority.
pub fn spawn(entry: TaskEntry, arg: usize) -> Result<TaskHandle, TaskError> {
    spawn_at(entry, arg, kern::syscalls::config().main_priority)
}

/// Endless iterator over the caller's incoming events. Each `next` blocks
/// in [`sys_wait_event`], so this is the natural shape for a server
/// task's main loop:
///
/// ```ignore
/// for event in hl::events() {
///     match event.kind { /* ... */ }
/// }
/// ```
pub fn events() -> Events {
    Events(())
}

pub struct Events(());

impl Iterator for Events {
    type Item = EventInfo;

    fn next(&mut self) -> Option<EventInfo> {
        Some(sys_wait_event())
    }
}
