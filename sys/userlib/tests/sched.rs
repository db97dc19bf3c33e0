// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler behavior, exercised through real context switches.
//!
//! Each test boots a full kernel on the test thread, runs a small task
//! graph to completion, and then inspects what the tasks recorded.
//! Tasks must not panic (a panic is reported as a fatal kernel exit), so
//! all assertions happen host-side after the run. One kernel may run per
//! process, hence the serializing lock.

use std::cell::{Cell, RefCell};
use std::sync::Mutex;

use kern::err::StartError;
use kern::start_kernel;
use userlib::*;

static RUN: Mutex<()> = Mutex::new(());

const STACK: usize = 256 * 1024;
const HEAP: usize = 512 * 1024;

fn run(main: TaskEntry, arg: usize) -> Result<(), StartError> {
    let _serial = RUN.lock().unwrap_or_else(|e| e.into_inner());
    let region = Box::leak(vec![0u8; 8 << 20].into_boxed_slice());
    let config = KernelConfig {
        default_stack_bytes: STACK,
        default_heap_bytes: HEAP,
        ..KernelConfig::default()
    };
    start_kernel(region, main, arg, config)
}

fn leak<T>(value: T) -> usize {
    Box::leak(Box::new(value)) as *const T as usize
}

unsafe fn shared<'a, T>(arg: usize) -> &'a T {
    &*(arg as *const T)
}

// Two equal-priority tasks must alternate strictly, each getting one
// dispatch per round.
mod round_robin {
    use super::*;

    #[derive(Default)]
    pub struct Shared {
        pub log: RefCell<Vec<(u32, u32)>>,
    }

    pub struct WorkerArg {
        pub id: u32,
        pub shared: usize,
    }

    pub fn worker(arg: usize) -> u32 {
        let warg = unsafe { shared::<WorkerArg>(arg) };
        let sh = unsafe { shared::<Shared>(warg.shared) };
        for round in 0..5 {
            sh.log.borrow_mut().push((warg.id, round));
            sys_yield();
        }
        TASK_SUCCESS
    }

    pub fn main(arg: usize) -> u32 {
        for id in [1, 2] {
            let warg = leak(WorkerArg { id, shared: arg });
            if sys_task_create(worker, warg, STACK, HEAP, Priority(51)).is_err() {
                return TASK_ERROR;
            }
        }
        TASK_SUCCESS
    }
}

#[test]
fn equal_priorities_alternate_strictly() {
    let sh = Box::leak(Box::new(round_robin::Shared::default()));
    run(round_robin::main, sh as *const _ as usize).unwrap();

    let log = sh.log.borrow();
    assert_eq!(log.len(), 10);
    assert_eq!(log.iter().filter(|e| e.0 == 1).count(), 5);
    assert_eq!(log.iter().filter(|e| e.0 == 2).count(), 5);
    for pair in log.windows(2) {
        assert_ne!(pair[0].0, pair[1].0, "dispatch must alternate: {log:?}");
    }
    // Within one task, rounds arrive in order.
    for id in [1, 2] {
        let rounds: Vec<u32> = log.iter().filter(|e| e.0 == id).map(|e| e.1).collect();
        assert_eq!(rounds, [0, 1, 2, 3, 4]);
    }
}

// A more important task runs to completion before a less important one
// gets a single dispatch, yields notwithstanding.
mod priority {
    use super::*;

    #[derive(Default)]
    pub struct Shared {
        pub log: RefCell<Vec<char>>,
    }

    fn important(arg: usize) -> u32 {
        let sh = unsafe { shared::<Shared>(arg) };
        for _ in 0..3 {
            sh.log.borrow_mut().push('A');
            sys_yield();
        }
        TASK_SUCCESS
    }

    fn humble(arg: usize) -> u32 {
        let sh = unsafe { shared::<Shared>(arg) };
        for _ in 0..3 {
            sh.log.borrow_mut().push('B');
            sys_yield();
        }
        TASK_SUCCESS
    }

    pub fn main(arg: usize) -> u32 {
        if sys_task_create(important, arg, STACK, HEAP, Priority(50)).is_err()
            || sys_task_create(humble, arg, STACK, HEAP, Priority(100)).is_err()
        {
            return TASK_ERROR;
        }
        TASK_SUCCESS
    }
}

#[test]
fn more_important_task_runs_first_despite_yields() {
    let sh = Box::leak(Box::new(priority::Shared::default()));
    run(priority::main, sh as *const _ as usize).unwrap();
    assert_eq!(*sh.log.borrow(), ['A', 'A', 'A', 'B', 'B', 'B']);
}

// Killing a task stops it at its next non-dispatch; the kill takes effect
// on the scheduler's following scan.
mod kill {
    use super::*;

    #[derive(Default)]
    pub struct Shared {
        pub count: Cell<u32>,
        pub killer: Cell<Option<TaskHandle>>,
        pub victim: Cell<Option<TaskHandle>>,
    }

    fn victim(arg: usize) -> u32 {
        let sh = unsafe { shared::<Shared>(arg) };
        loop {
            sh.count.set(sh.count.get() + 1);
            if sh.count.get() == 3 {
                // Wake the killer; we will not survive its attention.
                if sys_generate_event(sh.killer.get(), EVENT_GENERIC, 0).is_err() {
                    return TASK_ERROR;
                }
            }
            sys_yield();
        }
    }

    fn killer(arg: usize) -> u32 {
        let sh = unsafe { shared::<Shared>(arg) };
        let _ = sys_wait_event();
        sys_task_kill(sh.victim.get());
        TASK_SUCCESS
    }

    pub fn main(arg: usize) -> u32 {
        let sh = unsafe { shared::<Shared>(arg) };
        match sys_task_create(killer, arg, STACK, HEAP, Priority(50)) {
            Ok(h) => sh.killer.set(Some(h)),
            Err(_) => return TASK_ERROR,
        }
        match sys_task_create(victim, arg, STACK, HEAP, Priority(200)) {
            Ok(h) => sh.victim.set(Some(h)),
            Err(_) => return TASK_ERROR,
        }
        TASK_SUCCESS
    }
}

#[test]
fn killed_task_is_never_dispatched_again() {
    let sh = Box::leak(Box::new(kill::Shared::default()));
    run(kill::main, sh as *const _ as usize).unwrap();
    assert_eq!(sh.count.get(), 3, "the victim must die mid-loop");
}

// While the critical flag is raised, yields are no-ops and no other task
// can be interleaved.
mod critical {
    use super::*;

    #[derive(Default)]
    pub struct Shared {
        pub log: RefCell<Vec<&'static str>>,
    }

    fn burst(arg: usize) -> u32 {
        let sh = unsafe { shared::<Shared>(arg) };
        sys_critical_enter();
        sh.log.borrow_mut().push("burst-1");
        sys_yield(); // suppressed
        sh.log.borrow_mut().push("burst-2");
        sys_yield(); // suppressed
        sh.log.borrow_mut().push("burst-3");
        sys_critical_leave();
        sys_yield(); // now real
        sh.log.borrow_mut().push("burst-done");
        TASK_SUCCESS
    }

    fn bystander(arg: usize) -> u32 {
        let sh = unsafe { shared::<Shared>(arg) };
        for _ in 0..2 {
            sh.log.borrow_mut().push("bystander");
            sys_yield();
        }
        TASK_SUCCESS
    }

    pub fn main(arg: usize) -> u32 {
        if sys_task_create(burst, arg, STACK, HEAP, Priority(51)).is_err()
            || sys_task_create(bystander, arg, STACK, HEAP, Priority(51)).is_err()
        {
            return TASK_ERROR;
        }
        TASK_SUCCESS
    }
}

#[test]
fn critical_section_suppresses_interleaving() {
    let sh = Box::leak(Box::new(critical::Shared::default()));
    run(critical::main, sh as *const _ as usize).unwrap();

    let log = sh.log.borrow();
    let burst_start = log.iter().position(|s| *s == "burst-1").unwrap();
    assert_eq!(
        &log[burst_start..burst_start + 3],
        &["burst-1", "burst-2", "burst-3"],
        "nothing may interleave a critical burst: {log:?}"
    );
    assert_eq!(log.iter().filter(|s| **s == "bystander").count(), 2);
}

// Identity: the handle a creator gets back is the handle the task sees.
mod identity {
    use super::*;

    #[derive(Default)]
    pub struct Shared {
        pub created: Cell<Option<TaskHandle>>,
        pub matches: Cell<bool>,
        pub priority: Cell<Option<Priority>>,
    }

    fn child(arg: usize) -> u32 {
        let sh = unsafe { shared::<Shared>(arg) };
        sh.matches.set(Some(sys_current_task()) == sh.created.get());
        sh.priority.set(Some(sys_task_get_priority(None)));
        TASK_SUCCESS
    }

    pub fn main(arg: usize) -> u32 {
        let sh = unsafe { shared::<Shared>(arg) };
        match sys_task_create(child, arg, STACK, HEAP, Priority(77)) {
            Ok(h) => sh.created.set(Some(h)),
            Err(_) => return TASK_ERROR,
        }
        TASK_SUCCESS
    }
}

#[test]
fn tasks_know_their_own_handles_and_priority() {
    let sh = Box::leak(Box::new(identity::Shared::default()));
    run(identity::main, sh as *const _ as usize).unwrap();
    assert!(sh.matches.get());
    assert_eq!(sh.priority.get(), Some(Priority(77)));
}

#[test]
fn empty_looking_main_exits_cleanly() {
    fn main(_: usize) -> u32 {
        TASK_SUCCESS
    }
    run(main, 0).unwrap();
}

#[test]
fn fatal_task_result_aborts_the_run() {
    fn main(_: usize) -> u32 {
        TASK_ERROR
    }
    assert_eq!(run(main, 0), Err(StartError::FatalResume));
}
