// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Context support for x86-64 under the System V ABI.
//!
//! `save_context` records the callee-saved registers plus the stack pointer
//! and return address of its own call site; `restore_context` reloads them
//! and jumps to that return address with the resume code in the return
//! register. From the caller's point of view, `save_context` is a normal
//! function that happens to return twice.

use core::arch::naked_asm;
use core::mem::offset_of;

use abi::TaskError;

/// Saved machine state. Only callee-saved registers appear here; everything
/// else is dead across the call boundary by ABI rules.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Context {
    rbx: u64,
    rbp: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    /// Stack pointer as it will be after the save "returns".
    rsp: u64,
    /// Resume address: the save call's return address.
    rip: u64,
}

/// Captures the current execution state into `ctx`.
///
/// Returns 0 on the direct call. When some later `restore_context(ctx,
/// code)` transfers back here, returns that `code` instead.
///
/// # Safety
///
/// `ctx` must be valid for writes. A context may only be restored while the
/// stack frames live at its capture are still intact.
#[unsafe(naked)]
pub unsafe extern "C" fn save_context(ctx: *mut Context) -> u32 {
    naked_asm!(
        "mov [rdi + {off_rbx}], rbx",
        "mov [rdi + {off_rbp}], rbp",
        "mov [rdi + {off_r12}], r12",
        "mov [rdi + {off_r13}], r13",
        "mov [rdi + {off_r14}], r14",
        "mov [rdi + {off_r15}], r15",
        // Stack pointer after our return address is popped, i.e. what the
        // caller will see once this call completes.
        "lea rax, [rsp + 8]",
        "mov [rdi + {off_rsp}], rax",
        "mov rax, [rsp]",
        "mov [rdi + {off_rip}], rax",
        "xor eax, eax",
        "ret",
        off_rbx = const offset_of!(Context, rbx),
        off_rbp = const offset_of!(Context, rbp),
        off_r12 = const offset_of!(Context, r12),
        off_r13 = const offset_of!(Context, r13),
        off_r14 = const offset_of!(Context, r14),
        off_r15 = const offset_of!(Context, r15),
        off_rsp = const offset_of!(Context, rsp),
        off_rip = const offset_of!(Context, rip),
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
        "mov rbx, [rdi + {off_rbx}]",
        "mov rbp, [rdi + {off_rbp}]",
        "mov r12, [rdi + {off_r12}]",
        "mov r13, [rdi + {off_r13}]",
        "mov r14, [rdi + {off_r14}]",
        "mov r15, [rdi + {off_r15}]",
        "mov rsp, [rdi + {off_rsp}]",
        "mov eax, esi",
        "jmp qword ptr [rdi + {off_rip}]",
        off_rbx = const offset_of!(Context, rbx),
        off_rbp = const offset_of!(Context, rbp),
        off_r12 = const offset_of!(Context, r12),
        off_r13 = const offset_of!(Context, r13),
        off_r14 = const offset_of!(Context, r14),
        off_r15 = const offset_of!(Context, r15),
        off_rsp = const offset_of!(Context, rsp),
        off_rip = const offset_of!(Context, rip),
    )
}

/// Rigs `ctx` so that the first restore onto it begins executing `entry`
/// with `stack_top` as the top of the active stack.
///
/// This captures the current state first, to seed every slot with a
/// plausible value, then overwrites the stack pointer and resume address.
/// The save must return 0 here; seeing a resume code instead means someone
/// restored a context that was still being built.
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
    // The SysV ABI has rsp ≡ 8 (mod 16) at function entry, as if a call
    // had just pushed a return address.
    ctx.rsp = ((stack_top & !0xF) - 8) as u64;
    ctx.rip = entry as u64;
    Ok(())
}
