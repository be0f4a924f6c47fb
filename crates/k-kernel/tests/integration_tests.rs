// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Integration tests for k-kernel
//!
//! These drive the kernel end-to-end through its public API on the host
//! port, where a requested context switch completes as soon as the critical
//! section that requested it is released. Task entry functions never
//! actually execute on the host, so each scenario performs the blocking
//! calls itself on behalf of whichever task is current.
//!
//! The kernel state is global, so every test serializes on one lock and
//! re-runs the bootstrap sequence it needs.

use core::ptr::{self, NonNull};
use std::sync::Mutex;

use k_common::Error;
use k_kernel::{delay, event, flag, idle, mbox, mutex, sched, sem, task, tick, tick_handler, timer};
use k_kernel::{Mbox, Mutex as KMutex, Sem, Task, Timer, TimerKind, TimerState};

static TEST_LOCK: Mutex<()> = Mutex::new(());

fn lock() -> std::sync::MutexGuard<'static, ()> {
    TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

/// Boot the subsystems every scenario needs (no idle task, no timer task,
/// so the ready set holds exactly the tasks a test creates)
fn boot_core() {
    sched::init();
    tick::delay_init();
    tick::tick_init();
    idle::cpu_usage_init();
}

extern "C" fn spin(_arg: *mut ()) {}

/// Declare a task control block and stack for one scenario
macro_rules! static_task {
    ($task:ident, $stack:ident) => {
        static mut $task: Task = Task::new();
        static mut $stack: [u32; 64] = [0; 64];
    };
}

/// Hand out the 'static borrows task::init wants
///
/// SAFETY: each test uses its own statics and tests serialize on TEST_LOCK.
macro_rules! task_refs {
    ($task:ident, $stack:ident) => {
        unsafe {
            (
                &mut *ptr::addr_of_mut!($task),
                &mut *ptr::addr_of_mut!($stack) as &mut [u32],
            )
        }
    };
}

fn current_is(task: *const Task) -> bool {
    sched::current_task().map(NonNull::as_ptr) == Some(task.cast_mut())
}

// ============================================================================
// Scenario: priority preemption
// ============================================================================

#[test]
fn test_priority_preemption_at_delay_expiry() {
    let _guard = lock();
    boot_core();

    static_task!(TASK_A, STACK_A);
    static_task!(TASK_B, STACK_B);
    let (a, stack_a) = task_refs!(TASK_A, STACK_A);
    let (b, stack_b) = task_refs!(TASK_B, STACK_B);
    let a_ptr: *const Task = a;
    let b_ptr: *const Task = b;

    task::init(a, "a", spin, ptr::null_mut(), 1, stack_a).expect("task a");
    task::init(b, "b", spin, ptr::null_mut(), 3, stack_b).expect("task b");

    sched::schedule();
    assert!(current_is(a_ptr), "highest priority runs first");

    // A sleeps for 50 ticks; B takes over
    delay(50);
    assert!(current_is(b_ptr));

    for tick in 1..50 {
        tick_handler();
        assert!(current_is(b_ptr), "B still running at tick {tick}");
    }
    tick_handler();
    assert!(current_is(a_ptr), "A preempts B the tick its delay expires");

    // A finishes its burst immediately and sleeps again; B resumes
    delay(50);
    assert!(current_is(b_ptr));
}

// ============================================================================
// Scenario: round-robin inside one priority
// ============================================================================

#[test]
fn test_round_robin_shares_ticks_equally() {
    let _guard = lock();
    boot_core();

    static_task!(TASK_R1, STACK_R1);
    static_task!(TASK_R2, STACK_R2);
    static_task!(TASK_R3, STACK_R3);
    let (r1, stack_r1) = task_refs!(TASK_R1, STACK_R1);
    let (r2, stack_r2) = task_refs!(TASK_R2, STACK_R2);
    let (r3, stack_r3) = task_refs!(TASK_R3, STACK_R3);
    let ptrs: [*const Task; 3] = [r1, r2, r3];

    task::init(r1, "r1", spin, ptr::null_mut(), 2, stack_r1).expect("r1");
    task::init(r2, "r2", spin, ptr::null_mut(), 2, stack_r2).expect("r2");
    task::init(r3, "r3", spin, ptr::null_mut(), 2, stack_r3).expect("r3");
    sched::schedule();

    // SLICE_MAX is 10: over 30 ticks each peer holds the CPU for exactly 10
    let mut held = [0u32; 3];
    for _ in 0..30 {
        let cur = sched::current_task().map(NonNull::as_ptr).expect("running");
        let idx = ptrs
            .iter()
            .position(|&p| p == cur.cast_const())
            .expect("one of the peers");
        held[idx] += 1;
        tick_handler();
    }
    assert_eq!(held, [10, 10, 10]);
}

// ============================================================================
// Scenario: timed semaphore wait
// ============================================================================

#[test]
fn test_semaphore_wait_times_out() {
    let _guard = lock();
    boot_core();

    static_task!(TASK_W, STACK_W);
    let (w, stack_w) = task_refs!(TASK_W, STACK_W);
    let w_ptr: *const Task = w;

    task::init(w, "w", spin, ptr::null_mut(), 2, stack_w).expect("w");
    sched::schedule();
    assert!(current_is(w_ptr));

    let mut sem = Sem::new();
    sem.init(0, 1);

    // W blocks; nobody ever gives
    let _ = sem::take(&mut sem, 20);
    assert!(unsafe { (*w_ptr).is_waiting() });
    assert_eq!(sem::info(&mut sem).wait_count, 1);

    for tick in 1..20 {
        tick_handler();
        assert!(
            unsafe { (*w_ptr).is_waiting() },
            "still waiting at tick {tick}"
        );
    }
    tick_handler();

    let w = unsafe { &*w_ptr };
    assert!(w.is_ready(), "woken at tick 20");
    assert_eq!(w.wait_result(), Err(Error::Timeout));
    assert_eq!(sem::info(&mut sem).wait_count, 0, "wait list empty");
}

// ============================================================================
// Scenario: one-shot hard timer from the tick ISR
// ============================================================================

#[test]
fn test_hard_one_shot_fires_once() {
    let _guard = lock();
    boot_core();
    timer::module_init().expect("timer module");

    use core::sync::atomic::{AtomicU32, Ordering};
    static FIRED: AtomicU32 = AtomicU32::new(0);
    fn fire(_arg: *mut ()) {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }
    FIRED.store(0, Ordering::Relaxed);

    let mut t = Timer::new(5, 0, fire, ptr::null_mut(), TimerKind::Hard);
    timer::start(&mut t).expect("start");
    assert_eq!(t.state(), TimerState::Started);

    for _ in 0..10 {
        tick_handler();
    }
    assert_eq!(FIRED.load(Ordering::Relaxed), 1, "one-shot fired exactly once");
    assert_eq!(t.state(), TimerState::Stopped);
    assert_eq!(timer::get_info(&mut t).remaining, 0);
}

// ============================================================================
// Scenario: periodic soft timer through the soft-timer pass
// ============================================================================

#[test]
fn test_soft_periodic_fires_every_period() {
    let _guard = lock();
    boot_core();
    timer::module_init().expect("timer module");
    sched::schedule(); // the soft-timer task is the only ready task

    use core::sync::atomic::{AtomicU32, Ordering};
    static FIRED: AtomicU32 = AtomicU32::new(0);
    fn fire(_arg: *mut ()) {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }
    FIRED.store(0, Ordering::Relaxed);

    let mut t = Timer::new(0, 3, fire, ptr::null_mut(), TimerKind::Soft);
    timer::start(&mut t).expect("start");

    for _ in 0..10 {
        tick_handler();
        // Stand in for the soft-timer task being allowed to run
        assert!(timer::poll_soft(), "a tick release is pending");
    }
    assert_eq!(
        FIRED.load(Ordering::Relaxed),
        3,
        "fired at ticks 3, 6, and 9"
    );
    assert!(!timer::poll_soft(), "no release left unconsumed");

    timer::destroy(&mut t).expect("destroy");
    assert_eq!(t.state(), TimerState::Destroyed);
}

// ============================================================================
// Scenario: suspending a delayed task defers to the delay
// ============================================================================

#[test]
fn test_suspend_of_delayed_task_waits_for_wakeup() {
    let _guard = lock();
    boot_core();

    static_task!(TASK_D, STACK_D);
    static_task!(TASK_BG, STACK_BG);
    let (d, stack_d) = task_refs!(TASK_D, STACK_D);
    let (bg, stack_bg) = task_refs!(TASK_BG, STACK_BG);
    let d_ptr: *const Task = d;

    task::init(d, "d", spin, ptr::null_mut(), 2, stack_d).expect("d");
    task::init(bg, "bg", spin, ptr::null_mut(), 5, stack_bg).expect("bg");
    sched::schedule();
    assert!(current_is(d_ptr));

    delay(100);

    for _ in 0..10 {
        tick_handler();
    }
    task::suspend(unsafe { &mut *d_ptr.cast_mut() });
    {
        let d = unsafe { &*d_ptr };
        assert!(d.is_delayed(), "still on the delay queue");
        assert!(!d.is_suspended(), "suspend of a delayed task is a no-op");
    }

    for _ in 10..100 {
        tick_handler();
    }
    assert!(unsafe { (*d_ptr).is_ready() }, "delay completed normally");
    assert!(current_is(d_ptr));

    task::suspend(unsafe { &mut *d_ptr.cast_mut() });
    let d = unsafe { &*d_ptr };
    assert!(d.is_suspended(), "second suspend takes effect");
    let info = task::get_info(unsafe { &mut *d_ptr.cast_mut() });
    assert_eq!(info.suspend_count, 1);
}

// ============================================================================
// Scheduler lock
// ============================================================================

#[test]
fn test_sched_lock_defers_preemption_until_release() {
    let _guard = lock();
    boot_core();

    static_task!(TASK_LOW, STACK_LOW);
    static_task!(TASK_HIGH, STACK_HIGH);
    let (low, stack_low) = task_refs!(TASK_LOW, STACK_LOW);
    let (high, stack_high) = task_refs!(TASK_HIGH, STACK_HIGH);
    let low_ptr: *const Task = low;
    let high_ptr: *const Task = high;

    task::init(low, "low", spin, ptr::null_mut(), 6, stack_low).expect("low");
    sched::schedule();
    assert!(current_is(low_ptr));

    sched::disable();
    task::init(high, "high", spin, ptr::null_mut(), 1, stack_high).expect("high");

    for _ in 0..3 {
        tick_handler();
        assert!(current_is(low_ptr), "no switch while the lock is held");
    }
    assert!(unsafe { (*high_ptr).is_ready() }, "wakeups are not suppressed");

    sched::enable();
    assert!(current_is(high_ptr), "deferred preemption lands on release");
}

// ============================================================================
// Synchronization objects over the public API
// ============================================================================

#[test]
fn test_mailbox_post_and_fetch_roundtrip() {
    let _guard = lock();
    boot_core();

    static mut SLOTS: [*mut (); 4] = [ptr::null_mut(); 4];
    let mut mbox = Mbox::new();
    mbox.init(unsafe { &mut *ptr::addr_of_mut!(SLOTS) });

    mbox::post(&mut mbox, 0x10 as *mut ()).expect("post");
    mbox::post_front(&mut mbox, 0x20 as *mut ()).expect("post_front");
    assert_eq!(mbox::info(&mut mbox).count, 2);

    assert_eq!(mbox::try_fetch(&mut mbox), Ok(0x20 as *mut ()));
    assert_eq!(mbox::try_fetch(&mut mbox), Ok(0x10 as *mut ()));
    assert_eq!(mbox::try_fetch(&mut mbox), Err(Error::NoResource));
}

#[test]
fn test_mutex_handoff_to_waiter() {
    let _guard = lock();
    boot_core();

    static_task!(TASK_OWN, STACK_OWN);
    static_task!(TASK_CONTEND, STACK_CONTEND);
    let (own, stack_own) = task_refs!(TASK_OWN, STACK_OWN);
    let (contend, stack_contend) = task_refs!(TASK_CONTEND, STACK_CONTEND);
    let own_ptr: *const Task = own;
    let contend_ptr: *const Task = contend;

    task::init(own, "own", spin, ptr::null_mut(), 4, stack_own).expect("own");
    sched::schedule();
    assert!(current_is(own_ptr));

    let mut m = KMutex::new();
    m.init();
    mutex::lock(&mut m, 0).expect("uncontended lock");

    // A higher-priority contender appears and blocks on the mutex
    task::init(contend, "contend", spin, ptr::null_mut(), 2, stack_contend).expect("contend");
    sched::schedule();
    assert!(current_is(contend_ptr));
    let _ = mutex::lock(&mut m, 0);
    assert!(unsafe { (*contend_ptr).is_waiting() });
    assert_eq!(mutex::info(&mut m).wait_count, 1);
    // The owner inherited the contender's priority
    assert_eq!(mutex::info(&mut m).owner_prio, Some(2));
    assert_eq!(mutex::info(&mut m).owner_original_prio, Some(4));

    // Owner releases: waiter becomes owner at its own priority again
    assert!(current_is(own_ptr), "owner runs once the contender blocks");
    mutex::unlock(&mut m).expect("unlock");
    assert!(unsafe { (*contend_ptr).is_ready() });
    assert_eq!(mutex::info(&mut m).owner_prio, Some(2));
    assert_eq!(mutex::info(&mut m).wait_count, 0);
    assert!(current_is(contend_ptr), "handoff preempts the old owner");
}

#[test]
fn test_flag_group_wakes_on_notify() {
    let _guard = lock();
    boot_core();

    static_task!(TASK_F, STACK_F);
    let (f, stack_f) = task_refs!(TASK_F, STACK_F);
    let f_ptr: *const Task = f;

    task::init(f, "f", spin, ptr::null_mut(), 2, stack_f).expect("f");
    sched::schedule();

    let mut group = k_kernel::FlagGroup::new();
    group.init(0);

    assert_eq!(
        flag::try_wait(&mut group, flag::opt::SET_ALL, 0b11),
        Err(Error::NoResource)
    );

    let _ = flag::wait(&mut group, flag::opt::SET_ALL | flag::opt::CONSUME, 0b11, 0);
    assert!(unsafe { (*f_ptr).is_waiting() });

    flag::notify(&mut group, true, 0b01);
    assert!(unsafe { (*f_ptr).is_waiting() }, "ALL not yet satisfied");

    flag::notify(&mut group, true, 0b10);
    assert!(unsafe { (*f_ptr).is_ready() });
    assert_eq!(flag::info(&mut group).flags, 0, "consumed on wake");
}

#[test]
fn test_event_wait_count_tracks_waiters() {
    let _guard = lock();
    boot_core();

    static_task!(TASK_E, STACK_E);
    let (e, stack_e) = task_refs!(TASK_E, STACK_E);
    let e_ptr: *const Task = e;

    task::init(e, "e", spin, ptr::null_mut(), 2, stack_e).expect("e");
    sched::schedule();

    let mut ev = event::Event::new(event::EventType::Unknown);
    ev.init(event::EventType::Unknown);
    assert_eq!(event::wait_count(&ev), 0);

    let _ = event::wait(&mut ev, 0);
    assert_eq!(event::wait_count(&ev), 1);
    assert!(unsafe { (*e_ptr).is_waiting() });

    let woken = event::wake(&mut ev, 0x55 as *mut (), Ok(()));
    assert_eq!(woken.map(NonNull::as_ptr), Some(e_ptr.cast_mut()));
    assert_eq!(event::wait_count(&ev), 0);
}

// ============================================================================
// Full bootstrap
// ============================================================================

#[test]
fn test_full_init_creates_idle_and_timer_tasks() {
    let _guard = lock();

    k_kernel::init().expect("kernel init");

    let idle = sched::idle_task().expect("idle task exists");
    let idle = unsafe { &*idle.as_ptr() };
    assert_eq!(idle.prio() as usize, k_kernel::config::PRIO_COUNT - 1);
    assert_eq!(idle.name_str(), "idle");
    assert!(idle.is_ready());

    // The log records the boot sequence
    let saw = sched::with_log(|log| {
        let mut saw_kernel = false;
        let mut saw_timer = false;
        for entry in log.iter() {
            if entry.message.contains("kernel initialized") {
                saw_kernel = true;
            }
            if entry.message.contains("'ktimer'") {
                saw_timer = true;
            }
        }
        (saw_kernel, saw_timer)
    });
    assert!(saw.0, "kernel init logged");
    assert!(saw.1, "soft-timer task creation logged");
}
