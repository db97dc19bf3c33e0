// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel-level error types.
//!
//! Errors inside a task surface through that task's result code and kill
//! only the task; errors at this level end the whole run. `start_kernel`
//! is the only function that reports them.

use abi::TaskError;

use crate::heap::HeapError;

/// Ways a kernel run can fail to start, or end other than by running out
/// of work.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StartError {
    /// The supplied region could not be made into the global heap.
    HeapInit(HeapError),
    /// The event system could not be brought up.
    EventInit(TaskError),
    /// The user's main task could not be created.
    MainTask(TaskError),
    /// Another kernel is already running in this process.
    AlreadyRunning,
    /// A task (or a corrupted context) delivered the all-ones resume code
    /// to the scheduler. The run is abandoned with tasks unreaped.
    FatalResume,
}

impl From<HeapError> for StartError {
    fn from(e: HeapError) -> Self {
        Self::HeapInit(e)
    }
}
