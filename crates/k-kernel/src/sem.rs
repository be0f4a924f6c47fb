// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Counting semaphore
//!
//! Built on the event primitive: `take` on a zero count blocks the caller on
//! the embedded event, `give` releases the longest waiter before it ever
//! touches the count. The timer subsystem uses two of these internally (a
//! binary one protecting the soft-timer list and a counting one released
//! once per tick).

use core::ptr;

use k_common::{Error, Result};

use crate::event::{Event, EventType};
use crate::sched::{with_kernel, Kernel};

/// Counting semaphore control block
pub struct Sem {
    pub(crate) event: Event,
    pub(crate) count: u32,
    /// Upper bound for the count; 0 means unbounded
    pub(crate) max: u32,
}

impl Sem {
    /// Create an inert semaphore; [`Sem::init`] must run before use
    #[must_use]
    pub const fn new() -> Self {
        Self {
            event: Event::new(EventType::Semaphore),
            count: 0,
            max: 0,
        }
    }

    /// Initialize with a starting count and an upper bound (0 = unbounded)
    pub fn init(&mut self, count: u32, max: u32) {
        self.event.init(EventType::Semaphore);
        self.count = count;
        self.max = max;
    }
}

impl Default for Sem {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a semaphore's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SemInfo {
    /// Current count
    pub count: u32,
    /// Upper bound (0 = unbounded)
    pub max: u32,
    /// Tasks blocked on the semaphore
    pub wait_count: u32,
}

// ============================================================================
// Kernel operations
// ============================================================================

impl Kernel {
    /// Try to take the semaphore; on failure block the current task.
    /// Returns `true` when the count was consumed immediately.
    ///
    /// # Safety
    /// `sem` must be live and initialized.
    pub(crate) unsafe fn sem_take(&mut self, sem: &mut Sem, timeout: u32) -> bool {
        if sem.count > 0 {
            sem.count -= 1;
            return true;
        }
        let Some(cur) = self.cur else {
            // Nothing to block before the kernel runs; report acquired so
            // boot code cannot deadlock itself.
            return true;
        };
        self.event_wait(&mut sem.event, cur, timeout);
        self.schedule();
        false
    }

    /// Non-blocking take
    pub(crate) fn sem_try_take(&mut self, sem: &mut Sem) -> Result<()> {
        if sem.count > 0 {
            sem.count -= 1;
            Ok(())
        } else {
            Err(Error::NoResource)
        }
    }

    /// Release the semaphore: wake the longest waiter, or bump the count
    ///
    /// # Safety
    /// `sem` must be live and initialized.
    pub(crate) unsafe fn sem_give(&mut self, sem: &mut Sem) {
        if sem.event.wait_count() > 0 {
            self.event_wake(&mut sem.event, ptr::null_mut(), Ok(()));
            self.schedule();
        } else {
            sem.count += 1;
            if sem.max > 0 && sem.count > sem.max {
                sem.count = sem.max;
            }
        }
    }

    /// Destroy the semaphore, waking every waiter with `Deleted`
    ///
    /// # Safety
    /// `sem` must be live and initialized.
    pub(crate) unsafe fn sem_destroy(&mut self, sem: &mut Sem) -> u32 {
        let released = self.event_wake_all(&mut sem.event, ptr::null_mut(), Err(Error::Deleted));
        sem.count = 0;
        if released > 0 {
            self.schedule();
        }
        released
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Take the semaphore, blocking up to `timeout` ticks
/// ([`WAIT_FOREVER`](crate::event::WAIT_FOREVER) blocks indefinitely)
///
/// # Errors
/// `Timeout` if the wait expired, `Deleted` if the semaphore was destroyed
/// while waiting.
pub fn take(sem: &mut Sem, timeout: u32) -> Result<()> {
    // SAFETY: the mutable borrow proves the semaphore is live.
    let acquired = with_kernel(|k| unsafe { k.sem_take(sem, timeout) });
    if acquired {
        return Ok(());
    }
    // We resume here once a give (or the timeout) released us.
    with_kernel(|k| k.current_wait_result())
}

/// Take the semaphore without blocking
///
/// # Errors
/// `NoResource` if the count is zero.
pub fn try_take(sem: &mut Sem) -> Result<()> {
    with_kernel(|k| k.sem_try_take(sem))
}

/// Release the semaphore
pub fn give(sem: &mut Sem) {
    // SAFETY: the mutable borrow proves the semaphore is live.
    with_kernel(|k| unsafe { k.sem_give(sem) });
}

/// Destroy the semaphore; every waiter wakes with `Deleted`.
/// Returns the number of tasks released.
pub fn destroy(sem: &mut Sem) -> u32 {
    // SAFETY: the mutable borrow proves the semaphore is live.
    with_kernel(|k| unsafe { k.sem_destroy(sem) })
}

/// Snapshot the semaphore's state
#[must_use]
pub fn info(sem: &mut Sem) -> SemInfo {
    with_kernel(|_| SemInfo {
        count: sem.count,
        max: sem.max,
        wait_count: sem.event.wait_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_STACK_WORDS;
    use crate::sched::tests::make_task;
    use crate::task::Task;

    #[test]
    fn test_take_consumes_count() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        let mut sem = Sem::new();
        sem.init(2, 0);

        assert!(unsafe { k.sem_take(&mut sem, 0) });
        assert!(unsafe { k.sem_take(&mut sem, 0) });
        assert_eq!(sem.count, 0);
    }

    #[test]
    fn test_take_on_zero_blocks_current() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        let mut sem = Sem::new();
        sem.init(0, 1);

        let mut a = Task::new();
        let mut stack = [0u32; MIN_STACK_WORDS];
        let ta = make_task(&mut k, &mut a, &mut stack, 3);
        k.schedule();
        k.cur = k.next;

        assert!(!unsafe { k.sem_take(&mut sem, 20) });
        let t = unsafe { &*ta.as_ptr() };
        assert!(t.is_waiting() && t.is_delayed());
        assert_eq!(sem.event.wait_count(), 1);
    }

    #[test]
    fn test_give_prefers_waiter_over_count() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        let mut sem = Sem::new();
        sem.init(0, 1);

        let mut a = Task::new();
        let mut stack = [0u32; MIN_STACK_WORDS];
        let ta = make_task(&mut k, &mut a, &mut stack, 3);
        k.schedule();
        k.cur = k.next;
        unsafe { k.sem_take(&mut sem, 0) };

        unsafe { k.sem_give(&mut sem) };
        let t = unsafe { &*ta.as_ptr() };
        assert!(t.is_ready());
        assert_eq!(t.wait_result, Ok(()));
        assert_eq!(sem.count, 0, "handed to the waiter, not the count");
    }

    #[test]
    fn test_give_saturates_at_max() {
        let mut k = Kernel::new();
        k.sched_init();
        let mut sem = Sem::new();
        sem.init(1, 1);

        unsafe { k.sem_give(&mut sem) };
        assert_eq!(sem.count, 1);
    }

    #[test]
    fn test_try_take_reports_no_resource() {
        let mut k = Kernel::new();
        k.sched_init();
        let mut sem = Sem::new();
        sem.init(0, 0);
        assert_eq!(k.sem_try_take(&mut sem), Err(Error::NoResource));
    }

    #[test]
    fn test_destroy_wakes_waiters_with_deleted() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        let mut sem = Sem::new();
        sem.init(0, 0);

        let mut a = Task::new();
        let mut stack = [0u32; MIN_STACK_WORDS];
        let ta = make_task(&mut k, &mut a, &mut stack, 3);
        k.schedule();
        k.cur = k.next;
        unsafe { k.sem_take(&mut sem, 0) };

        let released = unsafe { k.sem_destroy(&mut sem) };
        assert_eq!(released, 1);
        assert_eq!(unsafe { &*ta.as_ptr() }.wait_result, Err(Error::Deleted));
        assert_eq!(sem.event.wait_count(), 0);
    }
}
