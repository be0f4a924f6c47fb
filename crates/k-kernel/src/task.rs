// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Task management
//!
//! A task is a caller-owned control block plus a caller-owned stack. The
//! kernel links tasks into its queues through the two nodes embedded in the
//! control block and never copies or allocates one.
//!
//! Task state is a bit-set: a task with no bit set is ready and linked into
//! the ready table; `DELAYED`, `SUSPENDED`, and `WAITING` each record one
//! reason the task is not runnable. A timed event wait carries `WAITING` and
//! `DELAYED` at once.

use core::ptr::{self, NonNull};

use heapless::String;
use k_common::constants::MAX_TASK_NAME_LEN;
use k_common::{log_info, Error, Result};

use crate::arch;
use crate::config::{MIN_STACK_WORDS, PRIO_COUNT, SLICE_MAX};
use crate::event::Event;
use crate::list::Node;
use crate::sched::{with_kernel, Kernel};

/// Task entry function type (C calling convention for the port layer)
pub type TaskEntry = extern "C" fn(*mut ());

/// Cleanup hook invoked when a task is deleted
pub type CleanFn = fn(*mut ());

/// Task state bits; a task with no bit set is ready to run
pub mod state {
    /// Ready: linked into the ready table, eligible for the CPU
    pub const READY: u32 = 0;
    /// Sleeping on the delay queue (or carrying a wait timeout)
    pub const DELAYED: u32 = 1 << 0;
    /// Explicitly suspended; `suspend_count` holds the nesting depth
    pub const SUSPENDED: u32 = 1 << 1;
    /// Enqueued on an event's wait list
    pub const WAITING: u32 = 1 << 2;
}

/// Task control block
///
/// Create with [`Task::new`] (usable in statics) and activate with
/// [`init`]. The block must stay in place for as long as the kernel knows
/// about it.
pub struct Task {
    /// Saved stack cursor; written by the port layer on context save
    pub(crate) stack_ptr: *mut u32,
    /// Caller-provided stack region (never freed by the kernel)
    pub(crate) stack_base: *mut u32,
    pub(crate) stack_words: usize,
    /// Priority, immutable after creation except for mutex inheritance
    pub(crate) prio: u8,
    pub(crate) state: u32,
    /// Remaining ticks in the round-robin quantum
    pub(crate) slice: u32,
    /// Remaining ticks until wakeup while `DELAYED`
    pub(crate) delay_ticks: u32,
    /// Suspension nesting depth; `SUSPENDED` is set iff nonzero
    pub(crate) suspend_count: u32,
    /// Membership in the ready table or an event wait list (exclusive)
    pub(crate) link_node: Node,
    /// Membership in the delay queue, independent of `link_node`
    pub(crate) delay_node: Node,
    /// Event currently waited on; valid only while `WAITING` is set
    pub(crate) wait_event: *mut Event,
    /// Message payload written by the waker
    pub(crate) event_msg: *mut (),
    /// Wait outcome written by the waker
    pub(crate) wait_result: Result<()>,
    /// Requested flag bits while waiting on a flag group
    pub(crate) flags_request: u32,
    /// Flag wait options while waiting on a flag group
    pub(crate) flags_opt: u32,
    /// Flag bits that satisfied the wait
    pub(crate) flags_rdy: u32,
    pub(crate) clean: Option<CleanFn>,
    pub(crate) clean_param: *mut (),
    pub(crate) delete_requested: bool,
    name: String<MAX_TASK_NAME_LEN>,
}

// SAFETY: control blocks live in statics and are handed to the kernel, which
// only touches them inside the port's critical section.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

impl Task {
    /// Create an inert control block (not yet known to the kernel)
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stack_ptr: ptr::null_mut(),
            stack_base: ptr::null_mut(),
            stack_words: 0,
            prio: 0,
            state: state::READY,
            slice: SLICE_MAX,
            delay_ticks: 0,
            suspend_count: 0,
            link_node: Node::new(),
            delay_node: Node::new(),
            wait_event: ptr::null_mut(),
            event_msg: ptr::null_mut(),
            wait_result: Ok(()),
            flags_request: 0,
            flags_opt: 0,
            flags_rdy: 0,
            clean: None,
            clean_param: ptr::null_mut(),
            delete_requested: false,
            name: String::new(),
        }
    }

    /// Task priority (0 = highest)
    #[must_use]
    pub fn prio(&self) -> u8 {
        self.prio
    }

    /// Raw state bits (see [`state`])
    #[must_use]
    pub fn state(&self) -> u32 {
        self.state
    }

    /// Check whether the task is ready to run
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == state::READY
    }

    /// Check whether the task sits on the delay queue
    #[must_use]
    pub fn is_delayed(&self) -> bool {
        self.state & state::DELAYED != 0
    }

    /// Check whether the task is suspended
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.state & state::SUSPENDED != 0
    }

    /// Check whether the task waits on an event
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.state & state::WAITING != 0
    }

    /// Task name
    #[must_use]
    pub fn name_str(&self) -> &str {
        self.name.as_str()
    }

    /// Outcome of the most recent wait, written by the waker
    #[must_use]
    pub fn wait_result(&self) -> Result<()> {
        self.wait_result
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name.clear();
        let mut end = name.len().min(MAX_TASK_NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let _ = self.name.push_str(&name[..end]);
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a task's scheduling state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskInfo {
    /// Remaining delay in ticks
    pub delay_ticks: u32,
    /// Task priority
    pub prio: u8,
    /// Remaining round-robin quantum
    pub slice: u32,
    /// Raw state bits
    pub state: u32,
    /// Suspension nesting depth
    pub suspend_count: u32,
    /// Stack size in bytes
    pub stack_size: usize,
    /// Estimated untouched stack in bytes (zero-fill heuristic)
    pub stack_free: usize,
}

// ============================================================================
// Kernel operations
// ============================================================================

impl Kernel {
    /// Initialize a task and make it ready
    ///
    /// # Safety
    /// `task` must point at an inert control block and `stack_base` at a
    /// writable region of `stack_words` words; both must stay in place while
    /// the kernel knows the task.
    pub(crate) unsafe fn task_init(
        &mut self,
        task: NonNull<Task>,
        name: &str,
        entry: TaskEntry,
        param: *mut (),
        prio: u8,
        stack_base: *mut u32,
        stack_words: usize,
    ) -> Result<()> {
        if (prio as usize) >= PRIO_COUNT {
            return Err(Error::InvalidPriority);
        }
        if stack_base.is_null() || stack_words < MIN_STACK_WORDS {
            return Err(Error::StackTooSmall);
        }

        let t = &mut *task.as_ptr();
        t.stack_base = stack_base;
        t.stack_words = stack_words;
        // The zero fill backs the stack-free estimate in get_info
        ptr::write_bytes(stack_base, 0, stack_words);
        t.stack_ptr = arch::init_task_stack(stack_base.add(stack_words), entry, param);

        t.prio = prio;
        t.state = state::READY;
        t.slice = SLICE_MAX;
        t.delay_ticks = 0;
        t.suspend_count = 0;
        t.wait_event = ptr::null_mut();
        t.event_msg = ptr::null_mut();
        t.wait_result = Ok(());
        t.flags_request = 0;
        t.flags_opt = 0;
        t.flags_rdy = 0;
        t.clean = None;
        t.clean_param = ptr::null_mut();
        t.delete_requested = false;
        t.link_node.init();
        t.delay_node.init();
        t.set_name(name);

        self.sched_ready(task);

        let ts = self.tick_count;
        log_info!(self.log, ts, "task", "created '{}' prio {}", name, prio);
        Ok(())
    }

    /// Suspend a task (nesting)
    ///
    /// A delayed task is left alone: it first returns from its delay, and
    /// only a subsequent suspend actually unreadies it. A task waiting on an
    /// event is likewise left to its wait.
    ///
    /// # Safety
    /// `task` must be a live task known to the kernel.
    pub(crate) unsafe fn task_suspend(&mut self, task: NonNull<Task>) {
        let t = &mut *task.as_ptr();
        // While WAITING the link node is threaded into an event's wait
        // list, not a ready list; unreadying here would unlink it from the
        // wrong queue.
        if t.state & (state::DELAYED | state::WAITING) != 0 {
            return;
        }
        t.suspend_count += 1;
        if t.suspend_count == 1 {
            t.state |= state::SUSPENDED;
            self.sched_unready(task);
            if Some(task) == self.cur {
                self.schedule();
            }
        }
    }

    /// Resume a suspended task; the last resume makes it ready again
    ///
    /// # Safety
    /// `task` must be a live task known to the kernel.
    pub(crate) unsafe fn task_wake_up(&mut self, task: NonNull<Task>) {
        let t = &mut *task.as_ptr();
        if t.state & state::SUSPENDED == 0 {
            return;
        }
        t.suspend_count -= 1;
        if t.suspend_count == 0 {
            t.state &= !state::SUSPENDED;
            self.sched_ready(task);
            self.schedule();
        }
    }

    /// Tear a task out of the kernel immediately
    ///
    /// Evicting the task from an event wait list beforehand is the caller's
    /// responsibility. If the task deletes itself the requested switch never
    /// returns here.
    ///
    /// # Safety
    /// `task` must be a live task known to the kernel and not on an event
    /// wait list.
    pub(crate) unsafe fn task_force_delete(&mut self, task: NonNull<Task>) {
        let t = &mut *task.as_ptr();
        if t.state & state::DELAYED != 0 {
            self.time_task_remove(task);
        } else if t.state & state::SUSPENDED == 0 {
            self.sched_remove(task);
        }
        if let Some(clean) = t.clean {
            clean(t.clean_param);
        }
        if Some(task) == self.cur {
            self.schedule();
        }
    }

    /// Remove the current task from scheduling and run its cleanup hook
    pub(crate) unsafe fn task_delete_self(&mut self) {
        let Some(cur) = self.cur else {
            return;
        };
        self.sched_remove(cur);
        let t = &mut *cur.as_ptr();
        if let Some(clean) = t.clean {
            clean(t.clean_param);
        }
        self.schedule();
    }

    /// Snapshot a task's scheduling state
    ///
    /// # Safety
    /// `task` must be a live task known to the kernel.
    pub(crate) unsafe fn task_get_info(&mut self, task: NonNull<Task>) -> TaskInfo {
        let t = &*task.as_ptr();

        // Count untouched (still zero) words from the stack base upward
        let mut free_words = 0usize;
        while free_words < t.stack_words && *t.stack_base.add(free_words) == 0 {
            free_words += 1;
        }

        TaskInfo {
            delay_ticks: t.delay_ticks,
            prio: t.prio,
            slice: t.slice,
            state: t.state,
            suspend_count: t.suspend_count,
            stack_size: t.stack_words * core::mem::size_of::<u32>(),
            stack_free: free_words * core::mem::size_of::<u32>(),
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Initialize `task` and make it ready
///
/// The stack region is zero-filled (backing the stack-free estimate of
/// [`get_info`]) and seeded with a synthetic exception-return frame so the
/// task's first resume enters `entry` with `param` in the first argument
/// register.
///
/// Safe to call before the kernel is running and from a running task.
///
/// # Errors
/// `InvalidPriority` if `prio` is out of range, `StackTooSmall` if the stack
/// cannot hold the initial frame.
pub fn init(
    task: &'static mut Task,
    name: &str,
    entry: TaskEntry,
    param: *mut (),
    prio: u8,
    stack: &'static mut [u32],
) -> Result<()> {
    let t = NonNull::from(&mut *task);
    let base = stack.as_mut_ptr();
    let words = stack.len();
    with_kernel(|k| {
        // SAFETY: exclusive ownership of block and stack is given up to the
        // kernel by the 'static mutable borrows.
        unsafe { k.task_init(t, name, entry, param, prio, base, words) }
    })
}

/// Suspend `task` (nesting); see [`Kernel::task_suspend`] for the rules
pub fn suspend(task: &mut Task) {
    let t = NonNull::from(task);
    // SAFETY: the mutable borrow proves the block is live.
    with_kernel(|k| unsafe { k.task_suspend(t) });
}

/// Undo one suspension of `task`; the last one makes it ready again
pub fn wake_up(task: &mut Task) {
    let t = NonNull::from(task);
    // SAFETY: the mutable borrow proves the block is live.
    with_kernel(|k| unsafe { k.task_wake_up(t) });
}

/// Delete `task` immediately, running its cleanup hook
///
/// If the task is waiting on an event it must be removed from that wait list
/// first (see [`crate::event::remove_task`]).
pub fn force_delete(task: &mut Task) {
    let t = NonNull::from(task);
    // SAFETY: the mutable borrow proves the block is live.
    with_kernel(|k| unsafe { k.task_force_delete(t) });
}

/// Ask `task` to delete itself at its next safe point
pub fn request_delete(task: &mut Task) {
    let t = NonNull::from(task);
    with_kernel(|_| {
        // SAFETY: the mutable borrow proves the block is live.
        unsafe { (*t.as_ptr()).delete_requested = true };
    });
}

/// Check whether the current task has been asked to delete itself
#[must_use]
pub fn is_delete_requested() -> bool {
    with_kernel(|k| match k.cur {
        // SAFETY: `cur` always points at a live control block.
        Some(t) => unsafe { (*t.as_ptr()).delete_requested },
        None => false,
    })
}

/// Delete the current task; the switch taken on exit never returns here
pub fn delete_self() {
    // SAFETY: operates on the current task only.
    with_kernel(|k| unsafe { k.task_delete_self() });
}

/// Install a cleanup hook run when `task` is deleted
pub fn set_clean_callback(task: &mut Task, clean: CleanFn, param: *mut ()) {
    let t = NonNull::from(task);
    with_kernel(|_| {
        // SAFETY: the mutable borrow proves the block is live.
        unsafe {
            (*t.as_ptr()).clean = Some(clean);
            (*t.as_ptr()).clean_param = param;
        }
    });
}

/// Snapshot `task`'s scheduling state, including the stack-free estimate
#[must_use]
pub fn get_info(task: &mut Task) -> TaskInfo {
    let t = NonNull::from(task);
    // SAFETY: the mutable borrow proves the block is live.
    with_kernel(|k| unsafe { k.task_get_info(t) })
}
