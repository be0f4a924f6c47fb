// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Event primitive
//!
//! The one blocking mechanism in the kernel. An event control block owns a
//! FIFO wait list of tasks; every higher-level synchronization object
//! (semaphore, mailbox, mutex, flag group) embeds one and builds its
//! semantics on the operations here.
//!
//! Wakers never return values to waiters directly: they write the message
//! payload and a wait outcome into the waiter's control block, make it
//! ready, and the waiter reads both once it runs again.

use core::ptr::{self, NonNull};

use k_common::{Error, Result};

use crate::list::{owner_of, List};
use crate::sched::{with_kernel, Kernel};
use crate::task::{state, Task};

/// Timeout value meaning "wait until woken" on every blocking call
pub const WAIT_FOREVER: u32 = 0;

/// The kind of synchronization object an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventType {
    /// Bare event, not owned by a typed object
    Unknown,
    /// Counting semaphore
    Semaphore,
    /// Mailbox
    Mailbox,
    /// Mutex
    Mutex,
    /// Flag group
    FlagGroup,
}

/// Event control block: a type tag and a FIFO wait list
pub struct Event {
    etype: EventType,
    pub(crate) wait_list: List,
}

impl Event {
    /// Create an inert event control block
    #[must_use]
    pub const fn new(etype: EventType) -> Self {
        Self {
            etype,
            wait_list: List::new(),
        }
    }

    /// Initialize (or reset) the event; required before first use
    pub fn init(&mut self, etype: EventType) {
        self.etype = etype;
        self.wait_list.init();
    }

    /// The kind of object this event belongs to
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.etype
    }

    /// Number of tasks currently waiting
    #[must_use]
    pub fn wait_count(&self) -> u32 {
        self.wait_list.count()
    }
}

// ============================================================================
// Kernel operations
// ============================================================================

impl Kernel {
    /// Block `task` on `event`
    ///
    /// Unlinks the task from the ready set, tags it `WAITING`, enqueues it
    /// at the tail of the wait list, and arms a wakeup timeout when
    /// `timeout > 0`. The caller invokes `schedule()` afterwards.
    ///
    /// # Safety
    /// `task` must be a live, purely ready task; `event` must stay in place
    /// while any task waits on it.
    pub(crate) unsafe fn event_wait(
        &mut self,
        event: &mut Event,
        task: NonNull<Task>,
        timeout: u32,
    ) {
        let t = &mut *task.as_ptr();
        t.state |= state::WAITING;
        t.wait_event = event;
        t.event_msg = ptr::null_mut();
        t.wait_result = Ok(());

        self.sched_unready(task);
        event.wait_list.push_back(NonNull::from(&mut t.link_node));

        if timeout > 0 {
            self.time_task_wait(task, timeout);
        }
    }

    /// Wake the longest waiter on `event`, delivering `msg` and `result`
    ///
    /// Clears `WAITING` and, for a timed wait, `DELAYED`; makes the task
    /// ready and returns it. Returns `None` if nobody waits.
    ///
    /// # Safety
    /// `event` must be live and initialized.
    pub(crate) unsafe fn event_wake(
        &mut self,
        event: &mut Event,
        msg: *mut (),
        result: Result<()>,
    ) -> Option<NonNull<Task>> {
        let node = event.wait_list.pop_front()?;
        let task = owner_of!(node, Task, link_node);
        self.event_finish_wait(task, msg, result);
        Some(task)
    }

    /// Wake a specific waiter on `event` (flag-group notify path)
    ///
    /// # Safety
    /// `task` must currently wait on `event`.
    pub(crate) unsafe fn event_wake_task(
        &mut self,
        event: &mut Event,
        task: NonNull<Task>,
        msg: *mut (),
        result: Result<()>,
    ) {
        event
            .wait_list
            .remove(NonNull::from(&mut (*task.as_ptr()).link_node));
        self.event_finish_wait(task, msg, result);
    }

    /// Wake every waiter on `event`; returns how many were released
    ///
    /// # Safety
    /// `event` must be live and initialized.
    pub(crate) unsafe fn event_wake_all(
        &mut self,
        event: &mut Event,
        msg: *mut (),
        result: Result<()>,
    ) -> u32 {
        let mut released = 0;
        while self.event_wake(event, msg, result).is_some() {
            released += 1;
        }
        released
    }

    /// Abort `task`'s wait with `msg` and `result`
    ///
    /// Unlinks the task from its event's wait list and clears `WAITING`.
    /// `DELAYED` is left to the caller (the tick handler clears it on the
    /// timeout path); the task only re-enters the ready table once no state
    /// bit remains.
    ///
    /// # Safety
    /// `task` must currently be waiting on some event.
    pub(crate) unsafe fn event_remove_task(
        &mut self,
        task: NonNull<Task>,
        msg: *mut (),
        result: Result<()>,
    ) {
        let t = &mut *task.as_ptr();
        let event = &mut *t.wait_event;
        event.wait_list.remove(NonNull::from(&mut t.link_node));

        t.wait_event = ptr::null_mut();
        t.event_msg = msg;
        t.wait_result = result;
        t.state &= !state::WAITING;

        if t.state == state::READY {
            self.sched_ready(task);
        }
    }

    /// Deliver `msg`/`result` to a task removed from a wait list and make it
    /// runnable again
    unsafe fn event_finish_wait(&mut self, task: NonNull<Task>, msg: *mut (), result: Result<()>) {
        let t = &mut *task.as_ptr();
        t.wait_event = ptr::null_mut();
        t.event_msg = msg;
        t.wait_result = result;
        t.state &= !state::WAITING;

        if t.state & state::DELAYED != 0 {
            self.time_task_wake(task);
        }
        self.sched_ready(task);
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Block the current task on `event` until woken or `timeout` ticks pass
/// (`timeout == 0` waits forever)
///
/// # Errors
/// `Timeout` if the wait expired, `Deleted` if the event's owner was
/// destroyed, or whatever outcome the waker posted.
pub fn wait(event: &mut Event, timeout: u32) -> Result<*mut ()> {
    with_kernel(|k| {
        let Some(cur) = k.cur else {
            return Err(Error::InvalidState);
        };
        // SAFETY: the current task is live and purely ready while running.
        unsafe { k.event_wait(event, cur, timeout) };
        k.schedule();
        Ok(())
    })?;
    // We resume here once a waker (or the tick handler) released us.
    with_kernel(|k| k.current_wait_result().map(|()| k.current_event_msg()))
}

/// Wake the longest waiter with `msg`, reporting `result` to it
///
/// Returns the task that was released, if any, after re-evaluating
/// scheduling.
pub fn wake(event: &mut Event, msg: *mut (), result: Result<()>) -> Option<NonNull<Task>> {
    with_kernel(|k| {
        // SAFETY: the mutable borrow proves the event is live.
        let woken = unsafe { k.event_wake(event, msg, result) };
        if woken.is_some() {
            k.schedule();
        }
        woken
    })
}

/// Wake every waiter with `msg`/`result`; returns how many were released
pub fn wake_all(event: &mut Event, msg: *mut (), result: Result<()>) -> u32 {
    with_kernel(|k| {
        // SAFETY: the mutable borrow proves the event is live.
        let released = unsafe { k.event_wake_all(event, msg, result) };
        if released > 0 {
            k.schedule();
        }
        released
    })
}

/// Abort a specific task's wait with a caller-chosen outcome
///
/// # Safety
/// `task` must currently be waiting on an event.
pub unsafe fn remove_task(task: &mut Task, msg: *mut (), result: Result<()>) {
    let t = NonNull::from(task);
    with_kernel(|k| {
        // SAFETY: forwarded from this function's contract.
        unsafe { k.event_remove_task(t, msg, result) };
        k.schedule();
    });
}

/// Number of tasks currently waiting on `event`
#[must_use]
pub fn wait_count(event: &Event) -> u32 {
    with_kernel(|_| event.wait_count())
}
