// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.
//!
//! The three core subsystems depend on each other in a cycle -- tasks need
//! heaps, events need tasks, task creation allocates inboxes -- which is
//! broken by a strict bring-up order: global heap first, then the event
//! system (whose system inbox and broker need only the heap and the task
//! list), then the user's main task, then the scheduler loop.

use abi::KernelConfig;

use crate::err::StartError;
use crate::event;
use crate::heap::Heap;
use crate::syscalls;
use crate::task::{self, Kernel, TaskEntry};

/// Runs a kernel over `region` until it has nothing left to do.
///
/// `user_main` becomes the first (and initially only) user task, created
/// with the configured defaults and handed `arg` verbatim; by convention
/// it creates everything else. With [`abi::IdlePolicy::Exit`] this
/// function returns `Ok(())` once no task is runnable -- the normal end of
/// a hosted run. With `WaitForInterrupt` it only ever returns on error.
///
/// One kernel may run per process at a time; a second concurrent call
/// reports [`StartError::AlreadyRunning`].
pub fn start_kernel(
    region: &'static mut [u8],
    user_main: TaskEntry,
    arg: usize,
    config: KernelConfig,
) -> Result<(), StartError> {
    let heap = Heap::init(region)?;
    klog!("global heap up, {} bytes free", {
        // Freshly initialized; the walk cannot fail.
        heap.walk().map(|s| s.free_bytes).unwrap_or(0)
    });

    let mut kernel = Kernel::new(heap, config);
    let kernel: *mut Kernel = &mut kernel;
    if !syscalls::install_kernel(kernel) {
        return Err(StartError::AlreadyRunning);
    }

    // From here on, the kernel is reached only through the raw pointer;
    // tasks and the scheduler will both be working on it.
    let result = (|| {
        // Safety: no context exists yet besides our own, so scoped
        // mutable borrows are unobservable.
        unsafe {
            event::init(&mut *kernel).map_err(StartError::EventInit)?;
            task::create(
                &mut *kernel,
                user_main,
                arg,
                config.default_stack_bytes,
                config.default_heap_bytes,
                config.main_priority,
            )
            .map_err(StartError::MainTask)?;
        }
        klog!("entering scheduler");
        task::scheduler(kernel)
    })();

    syscalls::uninstall_kernel(kernel);
    result
}
