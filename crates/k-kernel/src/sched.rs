// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Scheduler
//!
//! Strict-priority preemptive scheduling over a 32-entry priority bitmap and
//! one ready list per priority. The head of a ready list is the next task to
//! run at that priority; the tick handler rotates the head to the tail when
//! its round-robin quantum expires.
//!
//! All kernel state lives in one [`Kernel`] instance. The global instance is
//! only touched inside the port's critical section through [`with_kernel`],
//! which also completes a deferred context switch on ports without a real
//! PendSV.

use core::ptr::NonNull;

use k_common::log::LogBuffer;

use crate::arch;
use crate::bitmap::PrioBitmap;
use crate::config::PRIO_COUNT;
use crate::list::{owner_of, List};
use crate::task::Task;

/// Aggregate kernel state: ready structure, delay queue, current/next task,
/// scheduler lock, tick and CPU-usage counters, and the kernel log.
pub(crate) struct Kernel {
    /// One round-robin ready list per priority (head = next to run)
    pub(crate) ready: [List; PRIO_COUNT],
    /// Bit `p` set iff `ready[p]` is non-empty
    pub(crate) prio_bitmap: PrioBitmap,
    /// Tasks with a pending delay or wait timeout
    pub(crate) delayed: List,
    /// Currently executing task (never `None` once the kernel has started)
    pub(crate) cur: Option<NonNull<Task>>,
    /// Task selected by the last `schedule()` decision
    pub(crate) next: Option<NonNull<Task>>,
    /// The idle task
    pub(crate) idle: Option<NonNull<Task>>,
    /// Scheduler lock nesting depth; context switches are suppressed while
    /// nonzero
    pub(crate) lock_count: u8,
    /// Ticks since the CPU-usage epoch began
    pub(crate) tick_count: u32,
    /// Idle-loop iterations in the current sampling interval
    pub(crate) idle_count: u32,
    /// Idle-loop iterations measured over one fully idle second
    pub(crate) idle_max_count: u32,
    /// Rolling CPU utilization percentage
    pub(crate) cpu_usage: f32,
    /// Set by the tick handler once the calibration epoch has begun
    pub(crate) cpu_usage_enabled: bool,
    /// Kernel event log
    pub(crate) log: LogBuffer,
}

impl Kernel {
    pub(crate) const fn new() -> Self {
        const EMPTY_LIST: List = List::new();
        Self {
            ready: [EMPTY_LIST; PRIO_COUNT],
            prio_bitmap: PrioBitmap::new(),
            delayed: List::new(),
            cur: None,
            next: None,
            idle: None,
            lock_count: 0,
            tick_count: 0,
            idle_count: 0,
            idle_max_count: 0,
            cpu_usage: 0.0,
            cpu_usage_enabled: false,
            log: LogBuffer::new(),
        }
    }

    /// Reset the ready structure and scheduling state
    pub(crate) fn sched_init(&mut self) {
        for list in &mut self.ready {
            list.init();
        }
        self.prio_bitmap.init();
        self.cur = None;
        self.next = None;
        self.idle = None;
        self.lock_count = 0;
    }

    /// Link `task` at the head of its priority's ready list
    ///
    /// Head insertion lets a just-woken task run before its same-priority
    /// peers; the tick handler is the sole source of round-robin rotation.
    ///
    /// # Safety
    /// `task` must be valid, unlinked from every ready/event list, and must
    /// not move while linked.
    pub(crate) unsafe fn sched_ready(&mut self, task: NonNull<Task>) {
        let t = &mut *task.as_ptr();
        self.ready[t.prio as usize].push_front(NonNull::from(&mut t.link_node));
        self.prio_bitmap.set(t.prio);
    }

    /// Unlink `task` from its priority's ready list
    ///
    /// # Safety
    /// `task` must currently be linked into its ready list.
    pub(crate) unsafe fn sched_unready(&mut self, task: NonNull<Task>) {
        let t = &mut *task.as_ptr();
        self.ready[t.prio as usize].remove(NonNull::from(&mut t.link_node));
        if self.ready[t.prio as usize].is_empty() {
            self.prio_bitmap.clear(t.prio);
        }
    }

    /// Remove `task` from the ready structure permanently (deletion path)
    ///
    /// # Safety
    /// Same contract as [`Kernel::sched_unready`].
    pub(crate) unsafe fn sched_remove(&mut self, task: NonNull<Task>) {
        self.sched_unready(task);
    }

    /// Highest-priority ready task, if any
    pub(crate) fn highest_ready(&self) -> Option<NonNull<Task>> {
        if self.prio_bitmap.is_empty() {
            return None;
        }
        let prio = self.prio_bitmap.first_set();
        let node = self.ready[prio as usize].first()?;
        // SAFETY: only task link nodes are ever inserted into ready lists.
        Some(unsafe { owner_of!(node, Task, link_node) })
    }

    /// Pick the next task and request a context switch if it differs from
    /// the current one. Inert while the scheduler lock is held.
    pub(crate) fn schedule(&mut self) {
        if self.lock_count > 0 {
            return;
        }
        let Some(highest) = self.highest_ready() else {
            return;
        };
        if Some(highest) != self.cur {
            self.next = Some(highest);
            let cur_slot = match self.cur {
                // SAFETY: the task is caller-owned and does not move; the
                // slot stays valid until the port consumes it.
                Some(task) => unsafe { core::ptr::addr_of_mut!((*task.as_ptr()).stack_ptr) },
                None => core::ptr::null_mut(),
            };
            // SAFETY: `highest` came from the ready structure.
            let next_slot = unsafe { core::ptr::addr_of_mut!((*highest.as_ptr()).stack_ptr) };
            arch::request_switch(cur_slot, next_slot);
            // On hardware the switch is pended; the task picked here is the
            // one executing once interrupts unmask.
            #[cfg(feature = "cortex-m")]
            {
                self.cur = self.next;
            }
        }
    }

    /// Saturating scheduler-lock acquire
    pub(crate) fn sched_disable(&mut self) {
        if self.lock_count < u8::MAX {
            self.lock_count += 1;
        }
    }

    /// Scheduler-lock release; re-evaluates scheduling on the last unlock
    pub(crate) fn sched_enable(&mut self) {
        if self.lock_count > 0 {
            self.lock_count -= 1;
            if self.lock_count == 0 {
                self.schedule();
            }
        }
    }

    /// Wait outcome of the current task, written by its waker
    pub(crate) fn current_wait_result(&self) -> k_common::Result<()> {
        match self.cur {
            // SAFETY: `cur` always points at a live, caller-owned TCB.
            Some(task) => unsafe { (*task.as_ptr()).wait_result },
            None => Err(k_common::Error::InvalidState),
        }
    }

    /// Message payload delivered to the current task by its waker
    pub(crate) fn current_event_msg(&self) -> *mut () {
        match self.cur {
            // SAFETY: `cur` always points at a live, caller-owned TCB.
            Some(task) => unsafe { (*task.as_ptr()).event_msg },
            None => core::ptr::null_mut(),
        }
    }
}

// ============================================================================
// Global kernel instance
// ============================================================================

static mut KERNEL: Kernel = Kernel::new();

/// Run `f` on the global kernel inside the port's critical section.
///
/// Every public API call funnels through here, so all shared kernel state is
/// mutated with task-level interrupts masked. On ports without a hardware
/// context-switch exception, a switch requested inside `f` is completed once
/// the outermost critical section has been released.
pub(crate) fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    let mask = arch::enter_critical();
    // SAFETY: interrupts are masked, so nothing can observe the kernel
    // concurrently; the reference does not escape the closure.
    let result = unsafe { f(&mut *core::ptr::addr_of_mut!(KERNEL)) };
    arch::exit_critical(mask);
    #[cfg(not(feature = "cortex-m"))]
    complete_deferred_switch();
    result
}

/// Host-port stand-in for PendSV: applies a pending switch decision once
/// the outermost critical section is released.
#[cfg(not(feature = "cortex-m"))]
fn complete_deferred_switch() {
    if arch::critical_depth() > 0 {
        return;
    }
    // SAFETY: outside any critical section and single-threaded by the test
    // harness contract; this mirrors PendSV running after unmask.
    unsafe {
        let k = &mut *core::ptr::addr_of_mut!(KERNEL);
        if k.next.is_some() && k.next != k.cur {
            k.cur = k.next;
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Initialize (or reset) the ready structure and scheduling state
///
/// Part of the bootstrap sequence; [`crate::init`] calls this for you.
pub fn init() {
    with_kernel(Kernel::sched_init);
}

/// Suppress context switches (saturating; max nesting 255)
///
/// Wakeups still happen while the lock is held; they are honored as soon as
/// the matching [`enable`] drops the count to zero.
pub fn disable() {
    with_kernel(Kernel::sched_disable);
}

/// Release the scheduler lock; the last release re-evaluates scheduling
pub fn enable() {
    with_kernel(Kernel::sched_enable);
}

/// Re-evaluate scheduling and switch to the highest-priority ready task if
/// it is not the current one
pub fn schedule() {
    with_kernel(Kernel::schedule);
}

/// Currently executing task
#[must_use]
pub fn current_task() -> Option<NonNull<Task>> {
    with_kernel(|k| k.cur)
}

/// The idle task, once the kernel has been initialized
#[must_use]
pub fn idle_task() -> Option<NonNull<Task>> {
    with_kernel(|k| k.idle)
}

/// Ticks elapsed since the current CPU-usage epoch began
#[must_use]
pub fn tick_count() -> u32 {
    with_kernel(|k| k.tick_count)
}

/// Current scheduler-lock nesting depth
#[must_use]
pub fn lock_count() -> u8 {
    with_kernel(|k| k.lock_count)
}

/// Access the kernel log under the critical section
pub fn with_log<R>(f: impl FnOnce(&mut LogBuffer) -> R) -> R {
    with_kernel(|k| f(&mut k.log))
}
