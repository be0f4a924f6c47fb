// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Flag group
//!
//! A 32-bit flag word plus a wait list. Tasks wait for ANY or ALL of a
//! requested bit set to be set (or cleared), optionally consuming the
//! matched bits on success. `notify` re-checks every waiter because a single
//! notification can satisfy several requests at once.

use core::ptr;

use k_common::{Error, Result};

use crate::event::{Event, EventType};
use crate::list::owner_of;
use crate::sched::{with_kernel, Kernel};
use crate::task::Task;

/// Flag wait options
pub mod opt {
    /// Wait for bits to be clear (default)
    pub const CLEAR: u32 = 0;
    /// Wait for bits to be set
    pub const SET: u32 = 1 << 0;
    /// Any requested bit satisfies the wait (default)
    pub const ANY: u32 = 0;
    /// Every requested bit must satisfy the wait
    pub const ALL: u32 = 1 << 1;
    /// Consume the matched bits on success (invert them in the group)
    pub const CONSUME: u32 = 1 << 7;

    /// Wait until every requested bit is set
    pub const SET_ALL: u32 = SET | ALL;
    /// Wait until any requested bit is set
    pub const SET_ANY: u32 = SET | ANY;
    /// Wait until every requested bit is clear
    pub const CLEAR_ALL: u32 = CLEAR | ALL;
    /// Wait until any requested bit is clear
    pub const CLEAR_ANY: u32 = CLEAR | ANY;
}

/// Flag group control block
pub struct FlagGroup {
    pub(crate) event: Event,
    pub(crate) flags: u32,
}

impl FlagGroup {
    /// Create an inert flag group; [`FlagGroup::init`] must run before use
    #[must_use]
    pub const fn new() -> Self {
        Self {
            event: Event::new(EventType::FlagGroup),
            flags: 0,
        }
    }

    /// Initialize with a starting flag word
    pub fn init(&mut self, flags: u32) {
        self.event.init(EventType::FlagGroup);
        self.flags = flags;
    }

    /// Current flag word
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags
    }
}

impl Default for FlagGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a flag group's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlagGroupInfo {
    /// Current flag word
    pub flags: u32,
    /// Tasks blocked on the group
    pub wait_count: u32,
}

/// Check a request against the flag word; on success returns the matched
/// bits, consuming them when requested
fn flags_check(flags: &mut u32, wait_opt: u32, request: u32) -> Result<u32> {
    let want_set = wait_opt & opt::SET != 0;
    let want_all = wait_opt & opt::ALL != 0;
    let consume = wait_opt & opt::CONSUME != 0;

    let matched = if want_set {
        *flags & request
    } else {
        !*flags & request
    };

    let satisfied = if want_all {
        matched == request
    } else {
        matched != 0
    };
    if !satisfied {
        return Err(Error::NoResource);
    }

    if consume {
        if want_set {
            *flags &= !matched;
        } else {
            *flags |= matched;
        }
    }
    Ok(matched)
}

// ============================================================================
// Kernel operations
// ============================================================================

impl Kernel {
    /// Check the request, blocking the current task when unsatisfied.
    /// Returns the matched bits when satisfied immediately.
    ///
    /// # Safety
    /// `group` must be live and initialized.
    pub(crate) unsafe fn flag_wait(
        &mut self,
        group: &mut FlagGroup,
        wait_opt: u32,
        request: u32,
        timeout: u32,
    ) -> Option<u32> {
        if let Ok(matched) = flags_check(&mut group.flags, wait_opt, request) {
            return Some(matched);
        }
        let Some(cur) = self.cur else {
            return Some(0);
        };
        {
            let t = &mut *cur.as_ptr();
            t.flags_request = request;
            t.flags_opt = wait_opt;
            t.flags_rdy = 0;
        }
        self.event_wait(&mut group.event, cur, timeout);
        self.schedule();
        None
    }

    /// Non-blocking check
    pub(crate) fn flag_try_wait(
        &mut self,
        group: &mut FlagGroup,
        wait_opt: u32,
        request: u32,
    ) -> Result<u32> {
        flags_check(&mut group.flags, wait_opt, request)
    }

    /// Set or clear bits and wake every waiter whose request is now
    /// satisfiable
    ///
    /// Waiters are re-checked in FIFO order, so with `CONSUME` an earlier
    /// waiter can absorb bits a later one also asked for.
    ///
    /// # Safety
    /// `group` must be live and initialized.
    pub(crate) unsafe fn flag_notify(&mut self, group: &mut FlagGroup, is_set: bool, flags: u32) {
        if is_set {
            group.flags |= flags;
        } else {
            group.flags &= !flags;
        }

        let mut woke_any = false;
        let mut node = group.event.wait_list.first();
        while let Some(n) = node {
            let next = group.event.wait_list.next_of(n);
            let task = owner_of!(n, Task, link_node);
            let t = &mut *task.as_ptr();
            if let Ok(matched) = flags_check(&mut group.flags, t.flags_opt, t.flags_request) {
                t.flags_rdy = matched;
                self.event_wake_task(&mut group.event, task, ptr::null_mut(), Ok(()));
                woke_any = true;
            }
            node = next;
        }

        if woke_any {
            self.schedule();
        }
    }

    /// Bits that satisfied the current task's flag wait
    pub(crate) fn current_flags_rdy(&self) -> u32 {
        match self.cur {
            // SAFETY: `cur` always points at a live control block.
            Some(t) => unsafe { (*t.as_ptr()).flags_rdy },
            None => 0,
        }
    }

    /// Destroy the group, waking every waiter with `Deleted`
    ///
    /// # Safety
    /// `group` must be live and initialized.
    pub(crate) unsafe fn flag_destroy(&mut self, group: &mut FlagGroup) -> u32 {
        let released = self.event_wake_all(&mut group.event, ptr::null_mut(), Err(Error::Deleted));
        if released > 0 {
            self.schedule();
        }
        released
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Wait for the requested bits, blocking up to `timeout` ticks
/// ([`WAIT_FOREVER`](crate::event::WAIT_FOREVER) blocks indefinitely)
///
/// On success returns the bits that satisfied the request.
///
/// # Errors
/// `Timeout` if the wait expired, `Deleted` if the group was destroyed while
/// waiting.
pub fn wait(group: &mut FlagGroup, wait_opt: u32, request: u32, timeout: u32) -> Result<u32> {
    // SAFETY: the mutable borrow proves the group is live.
    if let Some(matched) = with_kernel(|k| unsafe { k.flag_wait(group, wait_opt, request, timeout) })
    {
        return Ok(matched);
    }
    // We resume here once a notify (or the timeout) released us.
    with_kernel(|k| k.current_wait_result().map(|()| k.current_flags_rdy()))
}

/// Check the requested bits without blocking
///
/// # Errors
/// `NoResource` if the request is not currently satisfied.
pub fn try_wait(group: &mut FlagGroup, wait_opt: u32, request: u32) -> Result<u32> {
    with_kernel(|k| k.flag_try_wait(group, wait_opt, request))
}

/// Set (`is_set`) or clear bits, waking every waiter now satisfied
pub fn notify(group: &mut FlagGroup, is_set: bool, flags: u32) {
    // SAFETY: the mutable borrow proves the group is live.
    with_kernel(|k| unsafe { k.flag_notify(group, is_set, flags) });
}

/// Destroy the group; every waiter wakes with `Deleted`.
/// Returns the number of tasks released.
pub fn destroy(group: &mut FlagGroup) -> u32 {
    // SAFETY: the mutable borrow proves the group is live.
    with_kernel(|k| unsafe { k.flag_destroy(group) })
}

/// Snapshot the group's state
#[must_use]
pub fn info(group: &mut FlagGroup) -> FlagGroupInfo {
    with_kernel(|_| FlagGroupInfo {
        flags: group.flags,
        wait_count: group.event.wait_count(),
    })
}
