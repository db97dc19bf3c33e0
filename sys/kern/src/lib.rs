// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cooperative microkernel core.
//!
//! This crate is the whole privileged part of the system: a first-fit heap
//! allocator over host-provided memory, a priority-based cooperative
//! scheduler with explicit context switching, and a broker-based event
//! delivery layer built on the first two. There is no preemption, no SMP,
//! and no memory protection between tasks; a single execution context runs
//! everything, and the trust boundary is the system-call surface in
//! [`syscalls`], not the boundary between tasks.
//!
//! # Design principles
//!
//! 1. One `Kernel` value owns every piece of mutable global state, reached
//!    through a single process-global slot while a run is in progress.
//! 2. Cooperative means lock-free: each step between yields is atomic by
//!    construction, so the code has no synchronization beyond that slot.
//! 3. References into kernel state never survive a context transfer; code
//!    near a switch works through raw pointers with scoped borrows.
//! 4. Simple and clear over fast and clever. The allocator is first-fit,
//!    the scheduler scans a list, and both are easy to verify.
//!
//! Portable except for [`arch`], which provides the context primitive per
//! architecture.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;

pub mod err;
pub mod event;
pub mod heap;
pub mod startup;
pub mod syscalls;
pub mod task;
pub mod util;

pub use startup::start_kernel;
