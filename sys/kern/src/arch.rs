// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, tailored for the current target. Each architecture
//! module must define the same set of names:
//!
//! - `Context`, the opaque register snapshot stored in every TCB (and one
//!   for the scheduler itself);
//! - `save_context(ctx) -> u32`, which captures the caller's state and
//!   returns 0 on the direct call, or the `code` of the matching restore on
//!   resumption;
//! - `restore_context(ctx, code) -> !`, the non-local transfer back to the
//!   matching save;
//! - `prepare_initial_frame(ctx, stack_top, entry)`, which rigs a context
//!   so the first restore onto it enters `entry` on the given stack;
//! - `wait_for_interrupt()`, the stall used when nothing is runnable on
//!   freestanding targets.
//!
//! The save/restore pair behaves exactly like `setjmp`/`longjmp`: only
//! callee-saved state is captured, which is all the contract requires,
//! because both are ordinary function calls and the compiler already
//! assumes caller-saved registers die across them.

/// Kernel logging. Off (and free) by default; the `klog-stderr` feature
/// routes lines to stderr on hosted builds.
#[cfg(any(not(feature = "klog-stderr"), target_os = "none"))]
macro_rules! klog {
    ($s:expr) => {};
    ($s:expr, $($tt:tt)*) => {};
}

#[cfg(all(feature = "klog-stderr", not(target_os = "none")))]
macro_rules! klog {
    ($s:expr) => { ::std::eprintln!(concat!("kern: ", $s)) };
    ($s:expr, $($tt:tt)*) => { ::std::eprintln!(concat!("kern: ", $s), $($tt)*) };
}

macro_rules! uassert {
    ($cond:expr) => {
        if !$cond {
            panic!("Assertion failed!");
        }
    };
}

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", not(windows)))] {
        pub mod x86_64;
        pub use x86_64::*;
    } else if #[cfg(all(target_arch = "aarch64", not(windows)))] {
        pub mod aarch64;
        pub use aarch64::*;
    } else {
        compile_error!("no context-switch support for this architecture");
    }
}

/// Stalls until something interesting might have happened. On hosted
/// targets there is no interrupt to wait for, so this is just a spin hint;
/// the freestanding variants halt the CPU properly.
pub fn wait_for_interrupt() {
    #[cfg(target_os = "none")]
    // Safety: halting pending an interrupt has no memory effects.
    unsafe {
        #[cfg(target_arch = "x86_64")]
        core::arch::asm!("hlt", options(nomem, nostack));
        #[cfg(target_arch = "aarch64")]
        core::arch::asm!("wfi", options(nomem, nostack));
    }
    #[cfg(not(target_os = "none"))]
    core::hint::spin_loop();
}
