// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Mailbox
//!
//! Fixed-capacity FIFO of untyped message pointers over a caller-provided
//! slot buffer. A posting task hands its message straight to the longest
//! waiting fetcher when there is one; the buffer is only used while nobody
//! waits. `post_front` queues a message at the head for out-of-band
//! delivery.

use core::ptr;

use k_common::{Error, Result};

use crate::event::{Event, EventType};
use crate::sched::{with_kernel, Kernel};

/// Mailbox control block
pub struct Mbox {
    pub(crate) event: Event,
    buf: *mut *mut (),
    capacity: u32,
    count: u32,
    read: u32,
    write: u32,
}

// SAFETY: mailboxes live in statics and are only touched inside the port's
// critical section.
unsafe impl Send for Mbox {}
unsafe impl Sync for Mbox {}

impl Mbox {
    /// Create an inert mailbox; [`Mbox::init`] must run before use
    #[must_use]
    pub const fn new() -> Self {
        Self {
            event: Event::new(EventType::Mailbox),
            buf: ptr::null_mut(),
            capacity: 0,
            count: 0,
            read: 0,
            write: 0,
        }
    }

    /// Initialize with a caller-provided slot buffer
    pub fn init(&mut self, buffer: &'static mut [*mut ()]) {
        self.event.init(EventType::Mailbox);
        self.buf = buffer.as_mut_ptr();
        self.capacity = buffer.len() as u32;
        self.count = 0;
        self.read = 0;
        self.write = 0;
    }

    /// Messages currently queued
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Default for Mbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a mailbox's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MboxInfo {
    /// Messages currently queued
    pub count: u32,
    /// Slot capacity
    pub capacity: u32,
    /// Tasks blocked waiting for a message
    pub wait_count: u32,
}

// ============================================================================
// Kernel operations
// ============================================================================

impl Kernel {
    /// Take the oldest message, or block the current task.
    /// Returns the message when one was available immediately.
    ///
    /// # Safety
    /// `mbox` must be live and initialized.
    pub(crate) unsafe fn mbox_fetch(&mut self, mbox: &mut Mbox, timeout: u32) -> Option<*mut ()> {
        if mbox.count > 0 {
            let msg = *mbox.buf.add(mbox.read as usize);
            mbox.read = (mbox.read + 1) % mbox.capacity;
            mbox.count -= 1;
            return Some(msg);
        }
        let Some(cur) = self.cur else {
            return Some(ptr::null_mut());
        };
        self.event_wait(&mut mbox.event, cur, timeout);
        self.schedule();
        None
    }

    /// Non-blocking fetch
    pub(crate) unsafe fn mbox_try_fetch(&mut self, mbox: &mut Mbox) -> Result<*mut ()> {
        if mbox.count > 0 {
            let msg = *mbox.buf.add(mbox.read as usize);
            mbox.read = (mbox.read + 1) % mbox.capacity;
            mbox.count -= 1;
            Ok(msg)
        } else {
            Err(Error::NoResource)
        }
    }

    /// Post `msg`, delivering straight to a waiter when one exists
    ///
    /// # Safety
    /// `mbox` must be live and initialized.
    pub(crate) unsafe fn mbox_post(
        &mut self,
        mbox: &mut Mbox,
        msg: *mut (),
        front: bool,
    ) -> Result<()> {
        if mbox.event.wait_count() > 0 {
            self.event_wake(&mut mbox.event, msg, Ok(()));
            self.schedule();
            return Ok(());
        }
        if mbox.count >= mbox.capacity {
            return Err(Error::QueueFull);
        }
        if front {
            mbox.read = (mbox.read + mbox.capacity - 1) % mbox.capacity;
            *mbox.buf.add(mbox.read as usize) = msg;
        } else {
            *mbox.buf.add(mbox.write as usize) = msg;
            mbox.write = (mbox.write + 1) % mbox.capacity;
        }
        mbox.count += 1;
        Ok(())
    }

    /// Drop every queued message (waiters, if any, imply an empty buffer)
    pub(crate) fn mbox_flush(&mut self, mbox: &mut Mbox) {
        if mbox.event.wait_count() == 0 {
            mbox.count = 0;
            mbox.read = 0;
            mbox.write = 0;
        }
    }

    /// Destroy the mailbox, waking every waiter with `Deleted`
    ///
    /// # Safety
    /// `mbox` must be live and initialized.
    pub(crate) unsafe fn mbox_destroy(&mut self, mbox: &mut Mbox) -> u32 {
        let released = self.event_wake_all(&mut mbox.event, ptr::null_mut(), Err(Error::Deleted));
        mbox.count = 0;
        mbox.read = 0;
        mbox.write = 0;
        if released > 0 {
            self.schedule();
        }
        released
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Fetch the oldest message, blocking up to `timeout` ticks
/// ([`WAIT_FOREVER`](crate::event::WAIT_FOREVER) blocks indefinitely)
///
/// # Errors
/// `Timeout` if the wait expired, `Deleted` if the mailbox was destroyed
/// while waiting.
pub fn fetch(mbox: &mut Mbox, timeout: u32) -> Result<*mut ()> {
    // SAFETY: the mutable borrow proves the mailbox is live.
    if let Some(msg) = with_kernel(|k| unsafe { k.mbox_fetch(mbox, timeout) }) {
        return Ok(msg);
    }
    // We resume here once a post (or the timeout) released us.
    with_kernel(|k| k.current_wait_result().map(|()| k.current_event_msg()))
}

/// Fetch without blocking
///
/// # Errors
/// `NoResource` if the mailbox is empty.
pub fn try_fetch(mbox: &mut Mbox) -> Result<*mut ()> {
    // SAFETY: the mutable borrow proves the mailbox is live.
    with_kernel(|k| unsafe { k.mbox_try_fetch(mbox) })
}

/// Post a message at the tail of the queue
///
/// # Errors
/// `QueueFull` if no waiter exists and every slot is occupied.
pub fn post(mbox: &mut Mbox, msg: *mut ()) -> Result<()> {
    // SAFETY: the mutable borrow proves the mailbox is live.
    with_kernel(|k| unsafe { k.mbox_post(mbox, msg, false) })
}

/// Post a high-priority message at the head of the queue
///
/// # Errors
/// `QueueFull` if no waiter exists and every slot is occupied.
pub fn post_front(mbox: &mut Mbox, msg: *mut ()) -> Result<()> {
    // SAFETY: the mutable borrow proves the mailbox is live.
    with_kernel(|k| unsafe { k.mbox_post(mbox, msg, true) })
}

/// Drop every queued message
pub fn flush(mbox: &mut Mbox) {
    with_kernel(|k| k.mbox_flush(mbox));
}

/// Destroy the mailbox; every waiter wakes with `Deleted`.
/// Returns the number of tasks released.
pub fn destroy(mbox: &mut Mbox) -> u32 {
    // SAFETY: the mutable borrow proves the mailbox is live.
    with_kernel(|k| unsafe { k.mbox_destroy(mbox) })
}

/// Snapshot the mailbox's state
#[must_use]
pub fn info(mbox: &mut Mbox) -> MboxInfo {
    with_kernel(|_| MboxInfo {
        count: mbox.count,
        capacity: mbox.capacity,
        wait_count: mbox.event.wait_count(),
    })
}
