// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Tick and delay management
//!
//! All timing is tick-granular. Delayed tasks (voluntary sleeps and wait
//! timeouts alike) sit on one unordered delay queue that the tick handler
//! walks once per tick.

use core::ptr::{self, NonNull};

use crate::config::SLICE_MAX;
use crate::list::owner_of;
use crate::sched::{self, with_kernel, Kernel};
use crate::task::{state, Task};
use crate::timer;

impl Kernel {
    /// Reset the delay queue
    pub(crate) fn delay_init(&mut self) {
        self.delayed.init();
    }

    /// Reset the tick counter
    pub(crate) fn tick_init(&mut self) {
        self.tick_count = 0;
    }

    /// Put `task` on the delay queue for `ticks`
    ///
    /// # Safety
    /// `task` must be live and not already on the delay queue.
    pub(crate) unsafe fn time_task_wait(&mut self, task: NonNull<Task>, ticks: u32) {
        let t = &mut *task.as_ptr();
        t.delay_ticks = ticks;
        self.delayed.push_back(NonNull::from(&mut t.delay_node));
        t.state |= state::DELAYED;
    }

    /// Take `task` off the delay queue and clear its `DELAYED` bit
    ///
    /// # Safety
    /// `task` must currently be on the delay queue.
    pub(crate) unsafe fn time_task_wake(&mut self, task: NonNull<Task>) {
        let t = &mut *task.as_ptr();
        self.delayed.remove(NonNull::from(&mut t.delay_node));
        t.state &= !state::DELAYED;
    }

    /// Unlink `task` from the delay queue without touching its state
    /// (deletion path)
    ///
    /// # Safety
    /// `task` must currently be on the delay queue.
    pub(crate) unsafe fn time_task_remove(&mut self, task: NonNull<Task>) {
        let t = &mut *task.as_ptr();
        self.delayed.remove(NonNull::from(&mut t.delay_node));
    }

    /// Delay the current task for `ticks` (0 returns immediately)
    pub(crate) fn delay(&mut self, ticks: u32) {
        if ticks == 0 {
            return;
        }
        let Some(cur) = self.cur else {
            return;
        };
        // SAFETY: the current task is live and purely ready while running.
        unsafe {
            self.time_task_wait(cur, ticks);
            self.sched_unready(cur);
        }
        self.schedule();
    }

    /// Per-tick bookkeeping, run from the tick interrupt inside the critical
    /// section
    ///
    /// Ordering matters: wakeups happen before slice accounting so a task
    /// made ready this tick does not pay for the quantum, and the tick count
    /// increments last so tick-indexed sampling aligns with observed
    /// boundaries.
    pub(crate) fn handle_tick(&mut self) {
        // 1. Wake expired delays; the walk captures each successor before
        //    any unlinking.
        let mut node = self.delayed.first();
        while let Some(n) = node {
            let next = self.delayed.next_of(n);
            // SAFETY: only task delay nodes are ever linked here.
            unsafe {
                let task = owner_of!(n, Task, delay_node);
                let t = &mut *task.as_ptr();
                t.delay_ticks -= 1;
                if t.delay_ticks == 0 {
                    if !t.wait_event.is_null() {
                        self.event_remove_task(task, ptr::null_mut(), Err(k_common::Error::Timeout));
                    }
                    self.time_task_wake(task);
                    self.sched_ready(task);
                }
            }
            node = next;
        }

        // 2. Round-robin slice accounting for the running task. The quantum
        //    always refills on exhaustion; rotation needs a ready peer.
        if let Some(cur) = self.cur {
            // SAFETY: `cur` always points at a live control block.
            let t = unsafe { &mut *cur.as_ptr() };
            if t.state == state::READY && t.slice > 0 {
                t.slice -= 1;
                if t.slice == 0 {
                    if self.ready[t.prio as usize].count() > 1 {
                        // SAFETY: a purely ready task is linked in its list.
                        unsafe {
                            let node = NonNull::from(&mut t.link_node);
                            self.ready[t.prio as usize].remove(node);
                            self.ready[t.prio as usize].push_back(node);
                        }
                    }
                    t.slice = SLICE_MAX;
                }
            }
        }

        // 3. Tick count and CPU-usage sampling
        self.tick_count = self.tick_count.wrapping_add(1);
        self.check_cpu_usage();
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Initialize (or reset) the delay queue
///
/// Part of the bootstrap sequence; [`crate::init`] calls this for you.
pub fn delay_init() {
    with_kernel(Kernel::delay_init);
}

/// Reset the tick counter
///
/// Part of the bootstrap sequence; [`crate::init`] calls this for you.
pub fn tick_init() {
    with_kernel(Kernel::tick_init);
}

/// Delay the current task for `ticks` system ticks
///
/// A delay of 0 returns immediately.
pub fn delay(ticks: u32) {
    with_kernel(|k| k.delay(ticks));
}

/// System tick entry point
///
/// Called from the tick interrupt (the Cortex-M port wires it to SysTick).
/// Runs the delay/slice/accounting work inside the critical section, then
/// notifies the timer module and re-evaluates scheduling.
pub fn tick_handler() {
    with_kernel(Kernel::handle_tick);
    timer::tick_notify();
    sched::schedule();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_STACK_WORDS;
    use crate::event::{Event, EventType};
    use crate::sched::tests::make_task;
    use k_common::Error;

    #[test]
    fn test_delay_expires_on_exact_tick() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        k.tick_init();

        let mut a = Task::new();
        let mut stack = [0u32; MIN_STACK_WORDS];
        let ta = make_task(&mut k, &mut a, &mut stack, 3);
        k.schedule();
        k.cur = k.next;

        k.delay(3);
        assert!(unsafe { &*ta.as_ptr() }.is_delayed());
        assert!(k.ready[3].is_empty());

        k.handle_tick();
        k.handle_tick();
        assert!(unsafe { &*ta.as_ptr() }.is_delayed());

        k.handle_tick();
        let t = unsafe { &*ta.as_ptr() };
        assert!(t.is_ready());
        assert_eq!(k.ready[3].count(), 1);
        assert_eq!(k.delayed.count(), 0);
    }

    #[test]
    fn test_timed_wait_expires_with_timeout_result() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        k.tick_init();

        let mut event = Event::new(EventType::Unknown);
        event.init(EventType::Unknown);

        let mut a = Task::new();
        let mut stack = [0u32; MIN_STACK_WORDS];
        let ta = make_task(&mut k, &mut a, &mut stack, 3);
        unsafe { k.event_wait(&mut event, ta, 2) };

        k.handle_tick();
        k.handle_tick();

        let t = unsafe { &*ta.as_ptr() };
        assert!(t.is_ready());
        assert_eq!(t.wait_result, Err(Error::Timeout));
        assert_eq!(event.wait_count(), 0, "wait aborted atomically");
        assert_eq!(k.delayed.count(), 0);
    }

    #[test]
    fn test_slice_rotates_only_with_peers() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        k.tick_init();

        let mut a = Task::new();
        let mut stack_a = [0u32; MIN_STACK_WORDS];
        let ta = make_task(&mut k, &mut a, &mut stack_a, 2);
        k.schedule();
        k.cur = k.next;

        // Alone in its priority class: quantum refills, no rotation
        for _ in 0..SLICE_MAX {
            k.handle_tick();
        }
        assert_eq!(k.highest_ready(), Some(ta));
        assert_eq!(unsafe { &*ta.as_ptr() }.slice, SLICE_MAX);

        // With a peer the exhausted task rotates to the tail
        let mut b = Task::new();
        let mut stack_b = [0u32; MIN_STACK_WORDS];
        let tb = make_task(&mut k, &mut b, &mut stack_b, 2);
        k.schedule();
        k.cur = k.next; // b was readied at the head, so it runs first
        assert_eq!(k.cur, Some(tb));

        for _ in 0..SLICE_MAX {
            k.handle_tick();
        }
        assert_eq!(k.highest_ready(), Some(ta), "exhausted peer rotated back");
        assert_eq!(unsafe { &*tb.as_ptr() }.slice, SLICE_MAX);
    }

    #[test]
    fn test_wakeup_same_tick_does_not_pay_slice() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        k.tick_init();

        let mut bg = Task::new();
        let mut stack_bg = [0u32; MIN_STACK_WORDS];
        make_task(&mut k, &mut bg, &mut stack_bg, 31);
        let mut a = Task::new();
        let mut stack_a = [0u32; MIN_STACK_WORDS];
        let ta = make_task(&mut k, &mut a, &mut stack_a, 2);
        k.schedule();
        k.cur = k.next;

        k.delay(1);
        k.cur = k.next; // background task takes over while `a` sleeps

        // The wakeup happens in step 1; slice accounting in step 2 charges
        // the running background task, not the freshly woken one.
        let slice_before = unsafe { &*ta.as_ptr() }.slice;
        k.handle_tick();
        assert!(unsafe { &*ta.as_ptr() }.is_ready());
        assert_eq!(unsafe { &*ta.as_ptr() }.slice, slice_before);
    }

    #[test]
    fn test_tick_count_increments_after_wakeups() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        k.tick_init();
        assert_eq!(k.tick_count, 0);
        k.handle_tick();
        // First tick also opens the CPU-usage calibration epoch, which
        // resets the counter; subsequent ticks count normally.
        k.handle_tick();
        assert_eq!(k.tick_count, 1);
    }
}
