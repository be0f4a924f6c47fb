// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Platform port layer
//!
//! The core consumes a small port surface:
//!
//! - `enter_critical`/`exit_critical`: save/disable and restore the
//!   task-level interrupt mask; nestable because each call site keeps its own
//!   saved mask
//! - `request_switch`: record the outgoing/incoming stack-cursor slots and
//!   mark a deferred context switch; the switch completes when interrupts
//!   next unmask
//! - `start_first_task`: one-shot transfer of control into the first task as
//!   if it were resuming from a context save
//! - `set_tick_period`: program the system tick source
//! - `init_task_stack`: build the synthetic exception-return frame for a new
//!   task
//!
//! The ARM Cortex-M port (feature `cortex-m`) implements this with PRIMASK,
//! PendSV, and SysTick. Without the feature a host stub is compiled instead,
//! which is what the test suite runs on: the scheduler completes a requested
//! switch itself once the outermost critical section is released.

#[cfg(feature = "cortex-m")]
pub mod cortex_m;

#[cfg(feature = "cortex-m")]
pub use cortex_m::{
    context::init_task_stack, enter_critical, exit_critical, init_core, request_switch,
    set_tick_period, start_first_task,
};

// ============================================================================
// Host stub port
// ============================================================================

#[cfg(not(feature = "cortex-m"))]
pub mod stub {
    //! Stub port for compiling and testing the kernel on a host platform.
    //!
    //! The "interrupt mask" is a nesting counter, and a requested context
    //! switch is left for the scheduler to complete when the outermost
    //! critical section is released (mirroring a pended PendSV firing once
    //! interrupts unmask).

    use core::sync::atomic::{AtomicU32, Ordering};

    use crate::task::TaskEntry;

    static CRITICAL_DEPTH: AtomicU32 = AtomicU32::new(0);

    /// Save the current "interrupt mask" and mask interrupts
    pub fn enter_critical() -> u32 {
        CRITICAL_DEPTH.fetch_add(1, Ordering::Acquire)
    }

    /// Restore a previously saved "interrupt mask"
    pub fn exit_critical(prev: u32) {
        CRITICAL_DEPTH.store(prev, Ordering::Release)
    }

    /// Current critical-section nesting depth (0 = "interrupts enabled")
    pub fn critical_depth() -> u32 {
        CRITICAL_DEPTH.load(Ordering::Acquire)
    }

    /// Mark a deferred context switch
    ///
    /// On hardware this pends PendSV; here the scheduler applies the switch
    /// itself once the outermost critical section is released, so the slots
    /// are not needed.
    pub fn request_switch(_cur_slot: *mut *mut u32, _next_slot: *mut *mut u32) {}

    /// Transfer control to the first task (spins on the host)
    ///
    /// # Safety
    /// Mirrors the hardware port's contract; nothing is actually unsafe here.
    pub unsafe fn start_first_task(_sp: *mut u32) -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    /// Program the tick source (no-op on the host; tests drive the tick)
    pub fn set_tick_period(_ms: u32) {}

    /// One-time core initialization (no-op on the host)
    pub fn init_core() {}

    /// Prepare a new task's stack (no frame is built on the host)
    ///
    /// # Safety
    /// Mirrors the hardware port's contract; nothing is actually unsafe here.
    pub unsafe fn init_task_stack(
        stack_top: *mut u32,
        _entry: TaskEntry,
        _param: *mut (),
    ) -> *mut u32 {
        stack_top
    }
}

#[cfg(not(feature = "cortex-m"))]
pub use stub::{
    critical_depth, enter_critical, exit_critical, init_core, init_task_stack, request_switch,
    set_tick_period, start_first_task,
};
