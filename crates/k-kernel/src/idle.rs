// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Idle task and CPU-usage accounting
//!
//! The idle task occupies the reserved lowest priority, so the ready set is
//! never empty once the kernel has started. Its loop increments a counter
//! under the critical section; the tick handler samples that counter to
//! derive a utilization percentage.
//!
//! Calibration: the idle task holds the scheduler lock through its first
//! second of life, so nothing else runs and the counter measured over that
//! tick-aligned second defines "100 % idle". The tick handler captures the
//! calibration value, releases the scheduler lock, and from then on
//! publishes `(1 - idle/idle_max) * 100` once per second.

use core::ptr::{self, NonNull};

use k_common::Result;

use crate::arch;
use crate::config::{IDLE_TASK_STACK_SIZE, PRIO_COUNT, SYSTICK_MS, TICKS_PER_SEC};
use crate::sched::{self, with_kernel, Kernel};
use crate::task::Task;

static mut IDLE_TASK: Task = Task::new();
static mut IDLE_STACK: [u32; IDLE_TASK_STACK_SIZE] = [0; IDLE_TASK_STACK_SIZE];

impl Kernel {
    /// Reset the CPU-usage accounting state
    pub(crate) fn cpu_usage_init(&mut self) {
        self.cpu_usage_enabled = false;
        self.idle_count = 0;
        self.idle_max_count = 0;
        self.cpu_usage = 0.0;
    }

    /// Per-tick CPU-usage bookkeeping, run after the tick count increments
    ///
    /// The first tick opens the calibration epoch (and rezeroes the tick
    /// count so sampling is tick-aligned). One second in, the idle counter
    /// becomes the calibration value and the scheduler lock taken by the
    /// idle task is released. Every following second publishes a fresh
    /// percentage.
    pub(crate) fn check_cpu_usage(&mut self) {
        if !self.cpu_usage_enabled {
            self.cpu_usage_enabled = true;
            self.tick_count = 0;
            return;
        }

        if self.tick_count == TICKS_PER_SEC {
            self.idle_max_count = self.idle_count;
            self.idle_count = 0;
            self.sched_enable();
        } else if self.tick_count % TICKS_PER_SEC == 0 {
            if self.idle_max_count > 0 {
                self.cpu_usage =
                    (1.0 - self.idle_count as f32 / self.idle_max_count as f32) * 100.0;
            }
            self.idle_count = 0;
        }
    }
}

/// Create the idle task at the reserved lowest priority
///
/// Called once from kernel init, inside the critical section.
pub(crate) fn create_idle_task(k: &mut Kernel) -> Result<()> {
    // SAFETY: boot-time single-threaded access to the idle statics.
    unsafe {
        let task = NonNull::from(&mut *ptr::addr_of_mut!(IDLE_TASK));
        k.task_init(
            task,
            "idle",
            idle_entry,
            ptr::null_mut(),
            (PRIO_COUNT - 1) as u8,
            ptr::addr_of_mut!(IDLE_STACK).cast::<u32>(),
            IDLE_TASK_STACK_SIZE,
        )?;
        k.idle = Some(task);
    }
    Ok(())
}

/// Idle task body
///
/// Takes the scheduler lock (released by the tick handler once calibration
/// completes), starts the tick source, aligns with the first tick, then
/// counts forever.
extern "C" fn idle_entry(_arg: *mut ()) {
    sched::disable();

    arch::set_tick_period(SYSTICK_MS);

    // Spin until the tick handler opens the calibration epoch, so counting
    // starts on a tick boundary
    while !with_kernel(|k| k.cpu_usage_enabled) {
        core::hint::spin_loop();
    }

    loop {
        with_kernel(|k| k.idle_count = k.idle_count.wrapping_add(1));
    }
}

/// Reset the CPU-usage accounting state
///
/// Part of the bootstrap sequence; [`crate::init`] calls this for you.
pub fn cpu_usage_init() {
    with_kernel(Kernel::cpu_usage_init);
}

/// Rolling CPU utilization percentage (0 until calibration completes)
#[must_use]
pub fn cpu_usage() -> f32 {
    with_kernel(|k| k.cpu_usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_opens_calibration_epoch() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        k.tick_init();
        k.cpu_usage_init();

        k.handle_tick();
        assert!(k.cpu_usage_enabled);
        assert_eq!(k.tick_count, 0, "epoch is tick-aligned");
    }

    #[test]
    fn test_calibration_captures_idle_max_and_unlocks() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        k.tick_init();
        k.cpu_usage_init();
        k.sched_disable(); // what the idle task does on entry

        k.handle_tick(); // opens the epoch
        for _ in 0..TICKS_PER_SEC - 1 {
            k.idle_count += 10; // idle loop runs undisturbed
            k.handle_tick();
        }
        assert_eq!(k.lock_count, 1, "still calibrating");

        k.idle_count += 10;
        k.handle_tick(); // tick_count reaches TICKS_PER_SEC
        assert_eq!(k.idle_max_count, 10 * TICKS_PER_SEC);
        assert_eq!(k.idle_count, 0);
        assert_eq!(k.lock_count, 0, "scheduler lock released");
    }

    #[test]
    fn test_usage_published_every_second_after_calibration() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        k.tick_init();
        k.cpu_usage_init();
        k.sched_disable();

        k.handle_tick();
        for _ in 0..TICKS_PER_SEC {
            k.idle_count += 10;
            k.handle_tick();
        }
        let calibration = k.idle_max_count;

        // Second interval: the idle loop only gets a fifth of its headroom
        for _ in 0..TICKS_PER_SEC {
            k.idle_count += 2;
            k.handle_tick();
        }
        // 80 percent busy, allowing float slack
        assert!(k.cpu_usage > 79.9 && k.cpu_usage < 80.1);
        assert_eq!(k.idle_max_count, calibration, "calibration is stable");
        assert_eq!(k.idle_count, 0, "interval counter restarted");
    }

    #[test]
    fn test_usage_defaults_to_zero_without_calibration() {
        let mut k = Kernel::new();
        k.sched_init();
        k.delay_init();
        k.tick_init();
        k.cpu_usage_init();

        // Never calibrated (idle_max_count == 0): no division, no update
        k.handle_tick();
        for _ in 0..2 * TICKS_PER_SEC {
            k.handle_tick();
        }
        assert_eq!(k.cpu_usage, 0.0);
    }
}
