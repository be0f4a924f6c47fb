// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Compile-time kernel configuration
//!
//! All sizing and timing decisions are fixed at build time; there is no
//! runtime configuration. Invalid combinations fail compilation through the
//! `const` assertions at the bottom of this module.

/// Number of task priorities. Priority 0 is the highest; priority
/// `PRIO_COUNT - 1` is reserved for the idle task. At most 32 (one bitmap
/// word).
pub const PRIO_COUNT: usize = 32;

/// Round-robin quantum in ticks for tasks sharing a priority level
pub const SLICE_MAX: u32 = 10;

/// System ticks per second
pub const TICKS_PER_SEC: u32 = 100;

/// Tick period in milliseconds, programmed into the tick source at startup
pub const SYSTICK_MS: u32 = 1000 / TICKS_PER_SEC;

/// CPU core clock in Hz, used to derive the tick source reload value
pub const CPU_CLOCK_HZ: u32 = 72_000_000;

/// Idle task stack size in 32-bit words
pub const IDLE_TASK_STACK_SIZE: usize = 256;

/// Soft-timer task stack size in 32-bit words
pub const TIMER_TASK_STACK_SIZE: usize = 256;

/// Soft-timer task priority. Must be above the idle task (numerically
/// smaller than `PRIO_COUNT - 1`) so periodic timers cannot starve, and is
/// conventionally high so timer callbacks run promptly.
pub const TIMER_TASK_PRIO: u8 = 1;

/// Minimum stack size accepted by task creation, in 32-bit words. Must hold
/// the initial exception-return frame plus headroom for the entry function.
pub const MIN_STACK_WORDS: usize = 32;

// Configuration mismatches are compile errors, not boot failures.
const _: () = assert!(PRIO_COUNT >= 2, "need at least one app priority plus idle");
const _: () = assert!(PRIO_COUNT <= 32, "priority bitmap is one 32-bit word");
const _: () = assert!(
    (TIMER_TASK_PRIO as usize) < PRIO_COUNT - 1,
    "soft-timer task must run above the idle priority"
);
const _: () = assert!(
    TICKS_PER_SEC * SYSTICK_MS == 1000,
    "tick rate and tick period disagree"
);
