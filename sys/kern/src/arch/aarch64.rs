// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Context support for AArch64 under AAPCS64.
//!
//! Same contract as the x86-64 module: `save_context`/`restore_context`
//! form a setjmp/longjmp pair over the callee-saved state. On this
//! architecture that includes x19–x28, the frame pointer, the link
//! register (which doubles as the resume address), the stack pointer, and
//! the low halves of v8–v15.

use core::arch::naked_asm;
use core::mem::offset_of;

use abi::TaskError;

/// Saved machine state, callee-saved registers only. Field order matters:
/// the assembly stores register pairs at fixed offsets.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Context {
    x19: u64,
    x20: u64,
    x21: u64,
    x22: u64,
    x23: u64,
    x24: u64,
    x25: u64,
    x26: u64,
    x27: u64,
    x28: u64,
    /// Frame pointer (x29).
    fp: u64,
    /// Link register (x30); the resume address.
    lr: u64,
    sp: u64,
    d8: u64,
    d9: u64,
    d10: u64,
    d11: u64,
    d12: u64,
    d13: u64,
    d14: u64,
    d15: u64,
}

/// Captures the current execution state into `ctx`. Returns 0 on the
/// direct call, or the `code` of the matching restore on resumption.
///
/// # Safety
///
/// `ctx` must be valid for writes. A context may only be restored while
/// the stack frames live at its capture are still intact.
#[unsafe(naked)]
pub unsafe extern "C" fn save_context(ctx: *mut Context) -> u32 {
    naked_asm!(
        "stp x19, x20, [x0, {off_x19}]",
        "stp x21, x22, [x0, {off_x21}]",
        "stp x23, x24, [x0, {off_x23}]",
        "stp x25, x26, [x0, {off_x25}]",
        "stp x27, x28, [x0, {off_x27}]",
        "stp x29, x30, [x0, {off_fp}]",
        "mov x9, sp",
        "str x9, [x0, {off_sp}]",
        "stp d8, d9, [x0, {off_d8}]",
        "stp d10, d11, [x0, {off_d10}]",
        "stp d12, d13, [x0, {off_d12}]",
        "stp d14, d15, [x0, {off_d14}]",
        "mov w0, wzr",
        "ret",
        off_x19 = const offset_of!(Context, x19),
        off_x21 = const offset_of!(Context, x21),
        off_x23 = const offset_of!(Context, x23),
        off_x25 = const offset_of!(Context, x25),
        off_x27 = const offset_of!(Context, x27),
        off_fp = const offset_of!(Context, fp),
        off_sp = const offset_of!(Context, sp),
        off_d8 = const offset_of!(Context, d8),
        off_d10 = const offset_of!(Context, d10),
        off_d12 = const offset_of!(Context, d12),
        off_d14 = const offset_of!(Context, d14),
    )
}

/// Transfers control to the state captured in `ctx`, making the matching
/// `save_context` return `code`. Never returns to the caller.
///
/// # Safety
///
/// `ctx` must hold a context captured by `save_context` whose stack is
/// still intact, or one rigged by `prepare_initial_frame`.
#[unsafe(naked)]
pub unsafe extern "C" fn restore_context(ctx: *const Context, code: u32) -> ! {
    naked_asm!(
        "ldp x19, x20, [x0, {off_x19}]",
        "ldp x21, x22, [x0, {off_x21}]",
        "ldp x23, x24, [x0, {off_x23}]",
        "ldp x25, x26, [x0, {off_x25}]",
        "ldp x27, x28, [x0, {off_x27}]",
        "ldp x29, x30, [x0, {off_fp}]",
        "ldr x9, [x0, {off_sp}]",
        "mov sp, x9",
        "ldp d8, d9, [x0, {off_d8}]",
        "ldp d10, d11, [x0, {off_d10}]",
        "ldp d12, d13, [x0, {off_d12}]",
        "ldp d14, d15, [x0, {off_d14}]",
        "mov w0, w1",
        // Resume at the saved link register.
        "ret",
        off_x19 = const offset_of!(Context, x19),
        off_x21 = const offset_of!(Context, x21),
        off_x23 = const offset_of!(Context, x23),
        off_x25 = const offset_of!(Context, x25),
        off_x27 = const offset_of!(Context, x27),
        off_fp = const offset_of!(Context, fp),
        off_sp = const offset_of!(Context, sp),
        off_d8 = const offset_of!(Context, d8),
        off_d10 = const offset_of!(Context, d10),
        off_d12 = const offset_of!(Context, d12),
        off_d14 = const offset_of!(Context, d14),
    )
}

/// Rigs `ctx` so that the first restore onto it begins executing `entry`
/// with `stack_top` as the top of the active stack.
pub fn prepare_initial_frame(
    ctx: &mut Context,
    stack_top: usize,
    entry: usize,
) -> Result<(), TaskError> {
    // Safety: ctx is a valid exclusive reference, and this context is not
    // yet restorable by anyone else.
    if unsafe { save_context(ctx) } != 0 {
        return Err(TaskError::ContextSetup);
    }
    // AAPCS64 requires sp to be 16-byte aligned at all times.
    ctx.sp = (stack_top & !0xF) as u64;
    ctx.lr = entry as u64;
    ctx.fp = 0;
    Ok(())
}
