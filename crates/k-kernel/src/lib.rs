// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Kestrel RT Kernel
//!
//! A preemptive, priority-based real-time kernel for single-core 32-bit
//! microcontrollers with an ARMv7-M-class exception model:
//!
//! - **Scheduler**: strict priority with round-robin time slicing inside a
//!   priority level, driven by a 32-entry priority bitmap
//! - **Timing**: tick-driven delays and timed waits over a single delay queue
//! - **Events**: one generic wait/wake primitive underneath every blocking
//!   object (semaphore, mailbox, mutex, flag group)
//! - **Timers**: hardware-context and soft-task-context timer lists
//! - **Accounting**: idle-calibrated CPU-usage percentage
//!
//! The kernel never allocates: tasks, stacks, and synchronization objects are
//! caller-owned, and every queue is an intrusive linked list.
//!
//! # Usage
//!
//! ```rust,ignore
//! use k_kernel::task;
//!
//! static mut WORKER: k_kernel::Task = k_kernel::Task::new();
//! static mut WORKER_STACK: [u32; 256] = [0; 256];
//!
//! extern "C" fn worker(_arg: *mut ()) {
//!     loop {
//!         k_kernel::delay(100);
//!     }
//! }
//!
//! k_kernel::init().expect("kernel init failed");
//! task::init(
//!     unsafe { &mut WORKER },
//!     "worker",
//!     worker,
//!     core::ptr::null_mut(),
//!     4,
//!     unsafe { &mut WORKER_STACK },
//! ).expect("task init failed");
//! k_kernel::start();
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod arch;
pub mod bitmap;
pub mod config;
pub mod event;
pub mod flag;
pub mod idle;
pub mod list;
pub mod mbox;
pub mod mutex;
pub mod sched;
pub mod sem;
pub mod task;
pub mod tick;
pub mod timer;

// Re-export the objects an application touches most
pub use event::{Event, EventType, WAIT_FOREVER};
pub use flag::FlagGroup;
pub use mbox::Mbox;
pub use mutex::Mutex;
pub use sem::Sem;
pub use task::{Task, TaskEntry, TaskInfo};
pub use tick::{delay, tick_handler};
pub use timer::{Timer, TimerKind, TimerState};

use k_common::{log_info, Result};

/// Kernel initialization
///
/// Brings up every subsystem in dependency order: scheduler tables, delay
/// queue, timer module (including the soft-timer task), tick counter,
/// CPU-usage state, and finally the idle task. Must be called exactly once,
/// before [`start`] and before any task is created.
///
/// # Errors
/// Returns an error if the idle or soft-timer task cannot be created.
pub fn init() -> Result<()> {
    arch::init_core();

    sched::with_kernel(|k| {
        k.sched_init();
        k.delay_init();
        // SAFETY: Single-threaded boot context inside the critical section;
        // the timer module global is not yet reachable from any task.
        unsafe { timer::module_init_in(k) }?;
        k.tick_init();
        k.cpu_usage_init();
        idle::create_idle_task(k)?;

        let ts = k.tick_count;
        log_info!(k.log, ts, "kernel", "kernel initialized");
        Ok(())
    })
}

/// Start the kernel (never returns)
///
/// Selects the highest-priority ready task and hands control to the port
/// layer as if that task were resuming from a context save.
///
/// # Panics
/// Spins forever if [`init`] has not created any task.
pub fn start() -> ! {
    let first = sched::with_kernel(|k| {
        let first = k.highest_ready();
        k.next = first;
        k.cur = first;
        first
    });

    match first {
        Some(task) => {
            // SAFETY: `task` was produced by the ready queue and its stack
            // cursor was prepared by `task::init`; control never returns.
            unsafe { arch::start_first_task((*task.as_ptr()).stack_ptr) }
        }
        None => loop {
            core::hint::spin_loop();
        },
    }
}

/// Kernel version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
