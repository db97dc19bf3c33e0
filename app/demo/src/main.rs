// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hosted demonstration: a ping task and a pong task batting events back
//! and forth, plus the embedding boilerplate for running the kernel as an
//! ordinary process.
//!
//! Run it with `cargo run -p demo`. Add `--features kern/klog-stderr` to
//! watch the kernel narrate.

use std::cell::Cell;
use std::process::ExitCode;

use userlib::hl;
use userlib::*;

const ROUNDS: u32 = 4;

struct Shared {
    cmdline: &'static CommandLine,
    pong: Cell<Option<TaskHandle>>,
}

fn shared(arg: usize) -> &'static Shared {
    // Safety: every task in this app receives the address of the leaked
    // Shared built in main(), which lives for the whole process.
    unsafe { &*(arg as *const Shared) }
}

/// Answers every ping with a receipt aimed back at the sender, until told
/// to stop.
fn pong(_arg: usize) -> u32 {
    for event in hl::events() {
        match event.kind {
            EVENT_MSG_ARRIVAL => {
                println!("pong: ping {}", event.detail);
                if sys_generate_event(Some(event.sender), EVENT_MSG_RECEIPT, event.detail).is_err()
                {
                    return TASK_ERROR;
                }
            }
            _ => break,
        }
    }
    println!("pong: done");
    TASK_SUCCESS
}

/// Sends `ROUNDS` pings, waiting out each receipt, then dismisses pong.
fn ping(arg: usize) -> u32 {
    let sh = shared(arg);
    let pong = sh.pong.get();
    for round in 0..ROUNDS {
        if sys_generate_event(pong, EVENT_MSG_ARRIVAL, round).is_err() {
            return TASK_ERROR;
        }
        let receipt = sys_wait_event();
        println!(
            "ping: receipt {} (stack used: {} bytes)",
            receipt.detail,
            sys_stack_used(None).unwrap_or(0)
        );
    }
    if sys_generate_event(pong, EVENT_INVALID, 0).is_err() {
        return TASK_ERROR;
    }
    TASK_SUCCESS
}

fn main_task(arg: usize) -> u32 {
    let sh = shared(arg);
    println!("main task up, argv: {:?}", sh.cmdline.args);

    match hl::spawn_at(pong, 0, Priority(60)) {
        Ok(h) => sh.pong.set(Some(h)),
        Err(e) => {
            println!("cannot create pong: {e:?}");
            return TASK_ERROR;
        }
    }
    if let Err(e) = hl::spawn_at(ping, arg, Priority(80)) {
        println!("cannot create ping: {e:?}");
        return TASK_ERROR;
    }
    TASK_SUCCESS
}

fn main() -> ExitCode {
    let shared: &'static Shared = Box::leak(Box::new(Shared {
        cmdline: Box::leak(Box::new(CommandLine::from_env())),
        pong: Cell::new(None),
    }));

    let region = Box::leak(vec![0u8; 4 * 1024 * 1024].into_boxed_slice());
    let config = KernelConfig {
        // Hosted tasks call println!, which wants far more stack than the
        // embedded default.
        default_stack_bytes: 256 * 1024,
        default_heap_bytes: 512 * 1024,
        ..KernelConfig::default()
    };

    match kern::start_kernel(region, main_task, shared as *const Shared as usize, config) {
        Ok(()) => {
            println!("kernel ran out of work; goodbye");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("kernel failed: {e:?}");
            ExitCode::FAILURE
        }
    }
}
