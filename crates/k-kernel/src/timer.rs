// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Two-tier timer subsystem
//!
//! Hardware timers live on a list scanned directly in the tick interrupt;
//! their callbacks run in interrupt context, must be short, and must not
//! block. Soft timers live on a second list scanned by a dedicated
//! high-priority task, released once per tick through a counting semaphore;
//! their callbacks run in task context and may use any non-blocking kernel
//! API.
//!
//! A binary semaphore serializes every soft-list mutation, so timer
//! start/stop from application tasks and the soft-timer scan can never
//! overlap. The tick interrupt never touches the soft list.

use core::ptr::{self, NonNull};

use k_common::Result;

use crate::arch;
use crate::config::{TIMER_TASK_PRIO, TIMER_TASK_STACK_SIZE};
use crate::event::WAIT_FOREVER;
use crate::list::{owner_of, List, Node};
use crate::sched::{with_kernel, Kernel};
use crate::sem::Sem;
use crate::task::Task;

/// Timer callback type
pub type TimerFn = fn(*mut ());

/// Which context a timer's callback runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerKind {
    /// Scanned in the tick interrupt; callback runs in interrupt context
    Hard,
    /// Scanned by the soft-timer task; callback runs in task context
    Soft,
}

/// Timer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerState {
    /// Initialized but never started
    Created,
    /// Counting down on its list
    Started,
    /// Callback currently executing
    Running,
    /// Taken off its list
    Stopped,
    /// Stopped and retired for good
    Destroyed,
}

/// Timer control block
///
/// Two-phase delay: the first expiry fires after `start_delay` ticks (or
/// `period` when the start delay is zero); afterwards a nonzero `period`
/// re-arms the timer while a zero one makes it one-shot.
pub struct Timer {
    link_node: Node,
    start_delay: u32,
    period: u32,
    remaining: u32,
    callback: TimerFn,
    arg: *mut (),
    kind: TimerKind,
    state: TimerState,
}

// SAFETY: timers live in statics and are only touched under the protection
// that guards their list (interrupt masking or the soft-list semaphore).
unsafe impl Send for Timer {}
unsafe impl Sync for Timer {}

impl Timer {
    /// Create a timer (usable in statics); equivalent to [`Timer::init`]
    #[must_use]
    pub const fn new(
        start_delay: u32,
        period: u32,
        callback: TimerFn,
        arg: *mut (),
        kind: TimerKind,
    ) -> Self {
        Self {
            link_node: Node::new(),
            start_delay,
            period,
            remaining: if start_delay == 0 { period } else { start_delay },
            callback,
            arg,
            kind,
            state: TimerState::Created,
        }
    }

    /// Initialize (or re-initialize) the timer
    pub fn init(
        &mut self,
        start_delay: u32,
        period: u32,
        callback: TimerFn,
        arg: *mut (),
        kind: TimerKind,
    ) {
        self.link_node.init();
        self.start_delay = start_delay;
        self.period = period;
        self.remaining = if start_delay == 0 { period } else { start_delay };
        self.callback = callback;
        self.arg = arg;
        self.kind = kind;
        self.state = TimerState::Created;
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> TimerState {
        self.state
    }
}

/// Snapshot of a timer's configuration and state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerInfo {
    /// Ticks before the first expiry (0 = use the period)
    pub start_delay: u32,
    /// Re-arm interval in ticks (0 = one-shot)
    pub period: u32,
    /// Ticks until the next expiry while started
    pub remaining: u32,
    /// Callback context
    pub kind: TimerKind,
    /// Lifecycle state
    pub state: TimerState,
}

// ============================================================================
// Timer module
// ============================================================================

/// Timer subsystem state: both lists, their protection semaphores, and the
/// soft-timer task
pub(crate) struct TimerModule {
    hard_list: List,
    soft_list: List,
    /// Binary semaphore serializing soft-list mutations
    protect: Sem,
    /// Counting semaphore released once per tick for the soft-timer task
    tick_sem: Sem,
    task: Task,
    task_stack: [u32; TIMER_TASK_STACK_SIZE],
}

impl TimerModule {
    const fn new() -> Self {
        Self {
            hard_list: List::new(),
            soft_list: List::new(),
            protect: Sem::new(),
            tick_sem: Sem::new(),
            task: Task::new(),
            task_stack: [0; TIMER_TASK_STACK_SIZE],
        }
    }

    /// Arm `timer` and link it onto its list; no-op outside Created/Stopped
    ///
    /// # Safety
    /// The caller holds the protection appropriate for the timer's list.
    unsafe fn start_locked(&mut self, timer: &mut Timer) {
        match timer.state {
            TimerState::Created | TimerState::Stopped => {
                timer.remaining = if timer.start_delay > 0 {
                    timer.start_delay
                } else {
                    timer.period
                };
                timer.state = TimerState::Started;
                let node = NonNull::from(&mut timer.link_node);
                match timer.kind {
                    TimerKind::Hard => self.hard_list.push_front(node),
                    TimerKind::Soft => self.soft_list.push_back(node),
                }
            }
            _ => {}
        }
    }

    /// Unlink `timer` from its list; no-op outside Started/Running
    ///
    /// # Safety
    /// The caller holds the protection appropriate for the timer's list.
    unsafe fn stop_locked(&mut self, timer: &mut Timer) {
        match timer.state {
            TimerState::Started | TimerState::Running => {
                let node = NonNull::from(&mut timer.link_node);
                match timer.kind {
                    TimerKind::Hard => self.hard_list.remove(node),
                    TimerKind::Soft => self.soft_list.remove(node),
                }
                timer.state = TimerState::Stopped;
            }
            _ => {}
        }
    }
}

/// Advance every timer on `list` by one tick, firing the expired ones
///
/// Periodic timers re-arm; one-shot timers unlink and stop. Callbacks on the
/// hard list run with interrupts masked; callbacks on the soft list run in
/// the soft-timer task under the list semaphore (so they must not take it
/// again).
///
/// # Safety
/// The caller holds the protection appropriate for `list`.
unsafe fn scan_list(list: &mut List) {
    let mut node = list.first();
    while let Some(n) = node {
        let next = list.next_of(n);
        let timer = owner_of!(n, Timer, link_node);
        let t = &mut *timer.as_ptr();

        let expired = if t.remaining == 0 {
            true
        } else {
            t.remaining -= 1;
            t.remaining == 0
        };
        if expired {
            t.state = TimerState::Running;
            (t.callback)(t.arg);
            t.state = TimerState::Started;

            if t.period > 0 {
                t.remaining = t.period;
            } else {
                list.remove(n);
                t.state = TimerState::Stopped;
            }
        }
        node = next;
    }
}

// ============================================================================
// Global module instance
// ============================================================================

static mut TIMER_MODULE: TimerModule = TimerModule::new();

fn module() -> *mut TimerModule {
    core::ptr::addr_of_mut!(TIMER_MODULE)
}

/// Initialize the timer subsystem and create the soft-timer task
///
/// # Safety
/// Boot-time only, inside the kernel critical section, before any timer API
/// is used.
pub(crate) unsafe fn module_init_in(k: &mut Kernel) -> Result<()> {
    let m = &mut *module();
    m.hard_list.init();
    m.soft_list.init();
    m.protect.init(1, 1);
    m.tick_sem.init(0, 0);
    k.task_init(
        NonNull::from(&mut m.task),
        "ktimer",
        soft_timer_task,
        ptr::null_mut(),
        TIMER_TASK_PRIO,
        m.task_stack.as_mut_ptr(),
        TIMER_TASK_STACK_SIZE,
    )
}

/// Blocking take of the soft-list semaphore
fn protect_take() -> Result<()> {
    // SAFETY: the module semaphores outlive every caller.
    let acquired = with_kernel(|k| unsafe { k.sem_take(&mut (*module()).protect, WAIT_FOREVER) });
    if acquired {
        return Ok(());
    }
    with_kernel(|k| k.current_wait_result())
}

fn protect_give() {
    // SAFETY: the module semaphores outlive every caller.
    with_kernel(|k| unsafe { k.sem_give(&mut (*module()).protect) });
}

/// One soft-list pass under the list semaphore
fn soft_scan_pass() -> Result<()> {
    protect_take()?;
    // SAFETY: the soft list is owned by whoever holds `protect`.
    unsafe { scan_list(&mut (*module()).soft_list) };
    protect_give();
    Ok(())
}

/// Soft-timer task: one soft-list pass per tick-semaphore count
extern "C" fn soft_timer_task(_arg: *mut ()) {
    loop {
        // SAFETY: the module semaphores outlive the task.
        let acquired =
            with_kernel(|k| unsafe { k.sem_take(&mut (*module()).tick_sem, WAIT_FOREVER) });
        if !acquired {
            // Blocked until the next tick releases us
            let _ = with_kernel(|k| k.current_wait_result());
        }
        let _ = soft_scan_pass();
    }
}

/// Per-tick driver: scan the hard list in interrupt context, then release
/// the soft-timer task for one pass
///
/// Called by the tick handler after the scheduler's own tick work, outside
/// the scheduler's critical section.
pub(crate) fn tick_notify() {
    let mask = arch::enter_critical();
    // SAFETY: the hard list is tick-owned; interrupts are masked.
    unsafe { scan_list(&mut (*module()).hard_list) };
    arch::exit_critical(mask);

    // SAFETY: the module semaphores outlive every caller.
    with_kernel(|k| unsafe { k.sem_give(&mut (*module()).tick_sem) });
}

// ============================================================================
// Public API
// ============================================================================

/// Initialize the timer subsystem: both lists, their semaphores, and the
/// soft-timer task
///
/// Part of the bootstrap sequence; [`crate::init`] calls this for you.
///
/// # Errors
/// Propagates soft-timer task creation failure.
pub fn module_init() -> Result<()> {
    // SAFETY: bootstrap context; no timer API runs concurrently.
    with_kernel(|k| unsafe { module_init_in(k) })
}

/// Start `timer`: arm its delay and link it onto its list
///
/// No-op unless the timer is Created or Stopped.
///
/// # Errors
/// Propagates a wait outcome if the soft-list semaphore take was aborted.
pub fn start(timer: &mut Timer) -> Result<()> {
    match timer.kind {
        TimerKind::Hard => {
            let mask = arch::enter_critical();
            // SAFETY: interrupts masked, which owns the hard list.
            unsafe { (*module()).start_locked(timer) };
            arch::exit_critical(mask);
            Ok(())
        }
        TimerKind::Soft => {
            protect_take()?;
            // SAFETY: `protect` held, which owns the soft list.
            unsafe { (*module()).start_locked(timer) };
            protect_give();
            Ok(())
        }
    }
}

/// Stop `timer`: unlink it from its list
///
/// No-op unless the timer is Started or Running.
///
/// # Errors
/// Propagates a wait outcome if the soft-list semaphore take was aborted.
pub fn stop(timer: &mut Timer) -> Result<()> {
    match timer.kind {
        TimerKind::Hard => {
            let mask = arch::enter_critical();
            // SAFETY: interrupts masked, which owns the hard list.
            unsafe { (*module()).stop_locked(timer) };
            arch::exit_critical(mask);
            Ok(())
        }
        TimerKind::Soft => {
            protect_take()?;
            // SAFETY: `protect` held, which owns the soft list.
            unsafe { (*module()).stop_locked(timer) };
            protect_give();
            Ok(())
        }
    }
}

/// Stop `timer` and retire it for good
///
/// # Errors
/// Propagates a wait outcome if the soft-list semaphore take was aborted.
pub fn destroy(timer: &mut Timer) -> Result<()> {
    stop(timer)?;
    with_kernel(|_| timer.state = TimerState::Destroyed);
    Ok(())
}

/// Snapshot `timer`'s configuration and state
#[must_use]
pub fn get_info(timer: &mut Timer) -> TimerInfo {
    with_kernel(|_| TimerInfo {
        start_delay: timer.start_delay,
        period: timer.period,
        remaining: timer.remaining,
        kind: timer.kind,
        state: timer.state,
    })
}

/// Run one soft-timer pass if a tick is pending; returns whether one ran
///
/// The soft-timer task performs these passes on hardware. Cooperative
/// integrations and hosted tests call this directly to stand in for it.
pub fn poll_soft() -> bool {
    // SAFETY: the module semaphores outlive every caller.
    let pending = with_kernel(|k| unsafe { k.sem_try_take(&mut (*module()).tick_sem) }).is_ok();
    if pending {
        let _ = soft_scan_pass();
    }
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    fn count_fire(arg: *mut ()) {
        // SAFETY: tests pass a pointer to their own counter.
        unsafe { &*arg.cast::<AtomicU32>() }.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn test_one_shot_fires_once_and_stops() {
        let fired = AtomicU32::new(0);
        let mut m = TimerModule::new();
        m.hard_list.init();
        m.soft_list.init();

        let arg = &fired as *const AtomicU32 as *mut ();
        let mut t = Timer::new(3, 0, count_fire, arg, TimerKind::Hard);
        unsafe { m.start_locked(&mut t) };
        assert_eq!(t.state(), TimerState::Started);
        assert_eq!(m.hard_list.count(), 1);

        for _ in 0..10 {
            unsafe { scan_list(&mut m.hard_list) };
        }
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert_eq!(t.state(), TimerState::Stopped);
        assert_eq!(m.hard_list.count(), 0, "one-shot unlinked after firing");
    }

    #[test]
    fn test_periodic_fires_every_period() {
        let fired = AtomicU32::new(0);
        let mut m = TimerModule::new();
        m.hard_list.init();
        m.soft_list.init();

        let arg = &fired as *const AtomicU32 as *mut ();
        let mut t = Timer::new(0, 3, count_fire, arg, TimerKind::Hard);
        unsafe { m.start_locked(&mut t) };

        for _ in 0..9 {
            unsafe { scan_list(&mut m.hard_list) };
        }
        assert_eq!(fired.load(Ordering::Relaxed), 3, "fired at ticks 3, 6, 9");
        assert_eq!(t.state(), TimerState::Started);
    }

    #[test]
    fn test_start_delay_then_period() {
        let fired = AtomicU32::new(0);
        let mut m = TimerModule::new();
        m.hard_list.init();
        m.soft_list.init();

        let arg = &fired as *const AtomicU32 as *mut ();
        let mut t = Timer::new(5, 2, count_fire, arg, TimerKind::Hard);
        unsafe { m.start_locked(&mut t) };

        for _ in 0..5 {
            unsafe { scan_list(&mut m.hard_list) };
        }
        assert_eq!(fired.load(Ordering::Relaxed), 1, "first expiry after the start delay");

        for _ in 0..4 {
            unsafe { scan_list(&mut m.hard_list) };
        }
        assert_eq!(fired.load(Ordering::Relaxed), 3, "then every period");
    }

    fn nop(_arg: *mut ()) {}

    #[test]
    fn test_start_is_noop_while_started() {
        let mut m = TimerModule::new();
        m.hard_list.init();
        m.soft_list.init();

        let mut t = Timer::new(2, 0, nop, ptr::null_mut(), TimerKind::Hard);
        unsafe {
            m.start_locked(&mut t);
            m.start_locked(&mut t);
        }
        assert_eq!(m.hard_list.count(), 1, "double start did not double-link");
    }

    #[test]
    fn test_stop_unlinks_and_restart_rearms() {
        let mut m = TimerModule::new();
        m.hard_list.init();
        m.soft_list.init();

        let mut t = Timer::new(4, 0, nop, ptr::null_mut(), TimerKind::Soft);
        unsafe { m.start_locked(&mut t) };
        unsafe { scan_list(&mut m.soft_list) };
        assert_eq!(t.remaining, 3);

        unsafe { m.stop_locked(&mut t) };
        assert_eq!(t.state(), TimerState::Stopped);
        assert_eq!(m.soft_list.count(), 0);

        unsafe { m.start_locked(&mut t) };
        assert_eq!(t.remaining, 4, "restart re-arms the full start delay");
    }
}
