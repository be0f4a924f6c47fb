// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! ARM Cortex-M port
//!
//! Implements the port surface for the ARMv7-M exception model:
//!
//! - Critical sections via PRIMASK save/disable/restore
//! - Deferred context switch via the PendSV exception
//! - System tick via SysTick
//!
//! PendSV runs at the lowest exception priority so a switch requested from
//! an interrupt handler completes only after every handler has unwound.

pub mod context;

use core::arch::asm;

use crate::config::CPU_CLOCK_HZ;

// ============================================================================
// Core register addresses
// ============================================================================

/// System Control Block registers
pub mod scb {
    /// Interrupt Control and State Register
    pub const ICSR: u32 = 0xE000_ED04;
    /// System Handler Priority Register 3 (PendSV/SysTick priority)
    pub const SHPR3: u32 = 0xE000_ED20;

    /// ICSR bit: set PendSV pending status
    pub const ICSR_PENDSVSET: u32 = 1 << 28;
}

/// SysTick registers
pub mod systick {
    /// SysTick Control and Status Register
    pub const CTRL: u32 = 0xE000_E010;
    /// SysTick Reload Value Register
    pub const LOAD: u32 = 0xE000_E014;
    /// SysTick Current Value Register
    pub const VAL: u32 = 0xE000_E018;

    /// CTRL bit: enable the counter
    pub const CTRL_ENABLE: u32 = 1 << 0;
    /// CTRL bit: enable the SysTick exception request
    pub const CTRL_TICKINT: u32 = 1 << 1;
    /// CTRL bit: use the processor clock
    pub const CTRL_CLKSOURCE: u32 = 1 << 2;
}

// ============================================================================
// Critical section
// ============================================================================

/// Save PRIMASK and mask task-level interrupts
#[inline]
pub fn enter_critical() -> u32 {
    let primask: u32;
    // SAFETY: MRS reads PRIMASK and CPSID I sets it; both are standard
    // instructions, safe in privileged mode. The saved value is restored by
    // exit_critical, which makes the pair nestable.
    unsafe {
        asm!(
            "mrs {}, PRIMASK",
            "cpsid i",
            out(reg) primask,
            options(nomem, nostack)
        );
    }
    primask
}

/// Restore a PRIMASK value saved by [`enter_critical`]
#[inline]
pub fn exit_critical(primask: u32) {
    // SAFETY: MSR writes PRIMASK back to the caller's saved value,
    // re-enabling interrupts only if they were enabled at the matching
    // enter_critical.
    unsafe {
        asm!(
            "msr PRIMASK, {}",
            in(reg) primask,
            options(nomem, nostack)
        );
    }
}

// ============================================================================
// Context switch request
// ============================================================================

/// Set the PendSV pending bit
#[inline]
pub fn trigger_pendsv() {
    // SAFETY: writing PENDSVSET to ICSR is the architecturally defined way to
    // pend PendSV; the register address is fixed and always valid.
    unsafe {
        core::ptr::write_volatile(scb::ICSR as *mut u32, scb::ICSR_PENDSVSET);
    }
}

/// Record the stack-cursor slots for the outgoing/incoming tasks and pend a
/// context switch. The switch completes when interrupts next unmask.
#[inline]
pub fn request_switch(cur_slot: *mut *mut u32, next_slot: *mut *mut u32) {
    // SAFETY: called inside the kernel's critical section; the slots stay
    // valid until PendSV consumes them because the tasks they belong to are
    // caller-owned and never move.
    unsafe { context::setup_switch(cur_slot, next_slot) };
    trigger_pendsv();
}

/// Transfer control to the first task (never returns)
///
/// # Safety
/// `sp` must point at a context frame built by
/// [`init_task_stack`](context::init_task_stack). Must be called exactly
/// once.
pub unsafe fn start_first_task(sp: *mut u32) -> ! {
    context::start_first_task(sp as u32)
}

// ============================================================================
// Tick source
// ============================================================================

/// Program SysTick to fire every `ms` milliseconds
pub fn set_tick_period(ms: u32) {
    let reload = CPU_CLOCK_HZ / 1000 * ms;
    // SAFETY: the SysTick registers are architecturally defined MMIO; the
    // disable -> reload -> clear -> enable sequence is the standard
    // configuration procedure.
    unsafe {
        core::ptr::write_volatile(systick::CTRL as *mut u32, 0);
        core::ptr::write_volatile(systick::LOAD as *mut u32, reload - 1);
        core::ptr::write_volatile(systick::VAL as *mut u32, 0);
        core::ptr::write_volatile(
            systick::CTRL as *mut u32,
            systick::CTRL_ENABLE | systick::CTRL_TICKINT | systick::CTRL_CLKSOURCE,
        );
    }
}

/// SysTick exception handler: drives the kernel tick
#[allow(non_snake_case)]
#[no_mangle]
pub extern "C" fn SysTick_Handler() {
    crate::tick::tick_handler();
}

// ============================================================================
// Core initialization
// ============================================================================

/// Set an exception's priority byte in SHPR3 (PendSV = 14, SysTick = 15)
fn set_exception_priority(exception: u8, priority: u8) {
    // SAFETY: SHPR3 is an architecturally defined SCB register; the
    // read-modify-write touches only the target exception's priority byte.
    unsafe {
        let shpr3 = scb::SHPR3 as *mut u32;
        let value = core::ptr::read_volatile(shpr3);
        match exception {
            14 => core::ptr::write_volatile(
                shpr3,
                (value & 0xFF00_FFFF) | (u32::from(priority) << 16),
            ),
            15 => core::ptr::write_volatile(
                shpr3,
                (value & 0x00FF_FFFF) | (u32::from(priority) << 24),
            ),
            _ => {}
        }
    }
}

/// One-time core setup for kernel operation
///
/// PendSV gets the lowest exception priority so the deferred switch runs
/// after every interrupt handler has finished; SysTick sits just above it.
pub fn init_core() {
    set_exception_priority(14, 0xFF);
    set_exception_priority(15, 0xFE);
}
