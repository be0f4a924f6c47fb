// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Mutex with priority inheritance
//!
//! Recursive ownership: the owner may lock again and must unlock as many
//! times. A contending waiter of higher priority temporarily raises the
//! owner to its own priority so the owner cannot be preempted by
//! medium-priority tasks while holding the lock; unlock restores the
//! original priority and hands ownership to the longest waiter.

use core::ptr::{self, NonNull};

use k_common::{Error, Result};

use crate::event::{Event, EventType};
use crate::sched::{with_kernel, Kernel};
use crate::task::{state, Task};

/// Mutex control block
pub struct Mutex {
    pub(crate) event: Event,
    /// Recursive lock depth; 0 means free
    locked_count: u32,
    owner: *mut Task,
    /// Priority the owner had when it took the lock
    owner_original_prio: u8,
}

// SAFETY: mutexes live in statics and are only touched inside the port's
// critical section.
unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

impl Mutex {
    /// Create an inert mutex; [`Mutex::init`] must run before use
    #[must_use]
    pub const fn new() -> Self {
        Self {
            event: Event::new(EventType::Mutex),
            locked_count: 0,
            owner: ptr::null_mut(),
            owner_original_prio: 0,
        }
    }

    /// Initialize (or reset) the mutex
    pub fn init(&mut self) {
        self.event.init(EventType::Mutex);
        self.locked_count = 0;
        self.owner = ptr::null_mut();
        self.owner_original_prio = 0;
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a mutex's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MutexInfo {
    /// Recursive lock depth (0 = free)
    pub locked_count: u32,
    /// Tasks blocked on the mutex
    pub wait_count: u32,
    /// Owner's current (possibly inherited) priority, if locked
    pub owner_prio: Option<u8>,
    /// Priority the owner held when it took the lock, if locked
    pub owner_original_prio: Option<u8>,
}

// ============================================================================
// Kernel operations
// ============================================================================

impl Kernel {
    /// Change a task's effective priority, re-linking its ready-list entry
    /// when it is currently runnable
    ///
    /// # Safety
    /// `task` must be a live task known to the kernel.
    unsafe fn task_set_prio(&mut self, task: NonNull<Task>, prio: u8) {
        let t = &mut *task.as_ptr();
        if t.state == state::READY {
            self.sched_unready(task);
            t.prio = prio;
            self.sched_ready(task);
        } else {
            t.prio = prio;
        }
    }

    /// Lock the mutex, or block the current task on it.
    /// Returns `true` when the lock was acquired immediately.
    ///
    /// # Safety
    /// `mutex` must be live and initialized.
    pub(crate) unsafe fn mutex_lock(&mut self, mutex: &mut Mutex, timeout: u32) -> bool {
        let Some(cur) = self.cur else {
            return true;
        };
        if mutex.locked_count == 0 {
            mutex.owner = cur.as_ptr();
            mutex.owner_original_prio = (*cur.as_ptr()).prio;
            mutex.locked_count = 1;
            return true;
        }
        if mutex.owner == cur.as_ptr() {
            mutex.locked_count += 1;
            return true;
        }

        // Contended: lend the caller's priority to a lower-priority owner
        let owner = NonNull::new_unchecked(mutex.owner);
        let cur_prio = (*cur.as_ptr()).prio;
        if cur_prio < (*owner.as_ptr()).prio {
            self.task_set_prio(owner, cur_prio);
        }

        self.event_wait(&mut mutex.event, cur, timeout);
        self.schedule();
        false
    }

    /// Non-blocking lock
    ///
    /// # Safety
    /// `mutex` must be live and initialized.
    pub(crate) unsafe fn mutex_try_lock(&mut self, mutex: &mut Mutex) -> Result<()> {
        let Some(cur) = self.cur else {
            return Err(Error::InvalidState);
        };
        if mutex.locked_count == 0 {
            mutex.owner = cur.as_ptr();
            mutex.owner_original_prio = (*cur.as_ptr()).prio;
            mutex.locked_count = 1;
            Ok(())
        } else if mutex.owner == cur.as_ptr() {
            mutex.locked_count += 1;
            Ok(())
        } else {
            Err(Error::WouldBlock)
        }
    }

    /// Unlock the mutex: undo inheritance, then hand the lock to the
    /// longest waiter
    ///
    /// # Safety
    /// `mutex` must be live and initialized.
    pub(crate) unsafe fn mutex_unlock(&mut self, mutex: &mut Mutex) -> Result<()> {
        let Some(cur) = self.cur else {
            return Err(Error::InvalidState);
        };
        if mutex.locked_count == 0 || mutex.owner != cur.as_ptr() {
            return Err(Error::NotOwner);
        }
        mutex.locked_count -= 1;
        if mutex.locked_count > 0 {
            return Ok(());
        }

        // Give back any inherited priority before losing ownership
        let owner = NonNull::new_unchecked(mutex.owner);
        if (*owner.as_ptr()).prio != mutex.owner_original_prio {
            self.task_set_prio(owner, mutex.owner_original_prio);
        }

        if let Some(woken) = self.event_wake(&mut mutex.event, ptr::null_mut(), Ok(())) {
            mutex.owner = woken.as_ptr();
            mutex.owner_original_prio = (*woken.as_ptr()).prio;
            mutex.locked_count = 1;
            self.schedule();
        } else {
            mutex.owner = ptr::null_mut();
        }
        Ok(())
    }

    /// Destroy the mutex, waking every waiter with `Deleted`
    ///
    /// # Safety
    /// `mutex` must be live and initialized.
    pub(crate) unsafe fn mutex_destroy(&mut self, mutex: &mut Mutex) -> u32 {
        let mut released = 0;
        if mutex.locked_count > 0 {
            let owner = NonNull::new_unchecked(mutex.owner);
            if (*owner.as_ptr()).prio != mutex.owner_original_prio {
                self.task_set_prio(owner, mutex.owner_original_prio);
            }
            released = self.event_wake_all(&mut mutex.event, ptr::null_mut(), Err(Error::Deleted));
            mutex.locked_count = 0;
            mutex.owner = ptr::null_mut();
            if released > 0 {
                self.schedule();
            }
        }
        released
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Lock the mutex, blocking up to `timeout` ticks
/// ([`WAIT_FOREVER`](crate::event::WAIT_FOREVER) blocks indefinitely)
///
/// # Errors
/// `Timeout` if the wait expired, `Deleted` if the mutex was destroyed while
/// waiting.
pub fn lock(mutex: &mut Mutex, timeout: u32) -> Result<()> {
    // SAFETY: the mutable borrow proves the mutex is live.
    let acquired = with_kernel(|k| unsafe { k.mutex_lock(mutex, timeout) });
    if acquired {
        return Ok(());
    }
    // We resume here owning the lock, unless the wait was aborted.
    with_kernel(|k| k.current_wait_result())
}

/// Lock without blocking
///
/// # Errors
/// `WouldBlock` if another task owns the mutex.
pub fn try_lock(mutex: &mut Mutex) -> Result<()> {
    // SAFETY: the mutable borrow proves the mutex is live.
    with_kernel(|k| unsafe { k.mutex_try_lock(mutex) })
}

/// Unlock the mutex
///
/// # Errors
/// `NotOwner` if the caller does not hold the lock.
pub fn unlock(mutex: &mut Mutex) -> Result<()> {
    // SAFETY: the mutable borrow proves the mutex is live.
    with_kernel(|k| unsafe { k.mutex_unlock(mutex) })
}

/// Destroy the mutex; every waiter wakes with `Deleted`.
/// Returns the number of tasks released.
pub fn destroy(mutex: &mut Mutex) -> u32 {
    // SAFETY: the mutable borrow proves the mutex is live.
    with_kernel(|k| unsafe { k.mutex_destroy(mutex) })
}

/// Snapshot the mutex's state
#[must_use]
pub fn info(mutex: &mut Mutex) -> MutexInfo {
    with_kernel(|_| {
        let locked = mutex.locked_count > 0;
        MutexInfo {
            locked_count: mutex.locked_count,
            wait_count: mutex.event.wait_count(),
            // SAFETY: `owner` is a live task pointer while the mutex is held.
            owner_prio: locked.then(|| unsafe { (*mutex.owner).prio }),
            owner_original_prio: locked.then_some(mutex.owner_original_prio),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_STACK_WORDS;
    use crate::sched::tests::make_task;

    #[test]
    fn test_recursive_lock_unlock() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        let mut m = Mutex::new();
        m.init();

        let mut a = Task::new();
        let mut stack = [0u32; MIN_STACK_WORDS];
        make_task(&mut k, &mut a, &mut stack, 3);
        k.schedule();
        k.cur = k.next;

        unsafe {
            assert!(k.mutex_lock(&mut m, 0));
            assert!(k.mutex_lock(&mut m, 0));
            assert_eq!(m.locked_count, 2);
            assert_eq!(k.mutex_unlock(&mut m), Ok(()));
            assert_eq!(m.locked_count, 1);
            assert_eq!(k.mutex_unlock(&mut m), Ok(()));
            assert_eq!(m.locked_count, 0);
            assert!(m.owner.is_null());
        }
    }

    #[test]
    fn test_unlock_by_non_owner_fails() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        let mut m = Mutex::new();
        m.init();

        let mut a = Task::new();
        let mut b = Task::new();
        let mut stack_a = [0u32; MIN_STACK_WORDS];
        let mut stack_b = [0u32; MIN_STACK_WORDS];
        let ta = make_task(&mut k, &mut a, &mut stack_a, 3);
        let tb = make_task(&mut k, &mut b, &mut stack_b, 3);

        k.cur = Some(ta);
        unsafe { assert!(k.mutex_lock(&mut m, 0)) };

        k.cur = Some(tb);
        assert_eq!(unsafe { k.mutex_unlock(&mut m) }, Err(Error::NotOwner));
    }

    #[test]
    fn test_priority_inheritance_boosts_and_restores() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        let mut m = Mutex::new();
        m.init();

        let mut low = Task::new();
        let mut high = Task::new();
        let mut stack_low = [0u32; MIN_STACK_WORDS];
        let mut stack_high = [0u32; MIN_STACK_WORDS];
        let tlow = make_task(&mut k, &mut low, &mut stack_low, 8);
        let thigh = make_task(&mut k, &mut high, &mut stack_high, 2);

        // Low-priority task takes the lock
        k.cur = Some(tlow);
        unsafe { assert!(k.mutex_lock(&mut m, 0)) };

        // High-priority task contends and lends its priority
        k.cur = Some(thigh);
        unsafe { assert!(!k.mutex_lock(&mut m, 0)) };
        assert_eq!(unsafe { &*tlow.as_ptr() }.prio, 2, "owner boosted");
        assert!(
            k.prio_bitmap.contains(2) && !k.prio_bitmap.contains(8),
            "owner re-linked under its inherited priority"
        );

        // Owner unlocks: priority restored, waiter becomes owner
        k.cur = Some(tlow);
        assert_eq!(unsafe { k.mutex_unlock(&mut m) }, Ok(()));
        assert_eq!(unsafe { &*tlow.as_ptr() }.prio, 8, "boost undone");
        assert_eq!(m.owner, thigh.as_ptr());
        assert_eq!(m.locked_count, 1);
        assert!(unsafe { &*thigh.as_ptr() }.is_ready());
    }

    #[test]
    fn test_try_lock_contended_would_block() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        let mut m = Mutex::new();
        m.init();

        let mut a = Task::new();
        let mut b = Task::new();
        let mut stack_a = [0u32; MIN_STACK_WORDS];
        let mut stack_b = [0u32; MIN_STACK_WORDS];
        let ta = make_task(&mut k, &mut a, &mut stack_a, 3);
        let tb = make_task(&mut k, &mut b, &mut stack_b, 3);

        k.cur = Some(ta);
        unsafe { assert_eq!(k.mutex_try_lock(&mut m), Ok(())) };

        k.cur = Some(tb);
        assert_eq!(unsafe { k.mutex_try_lock(&mut m) }, Err(Error::WouldBlock));
    }
}
