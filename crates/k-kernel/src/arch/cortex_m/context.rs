// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Cortex-M context switching
//!
//! # Context layout
//!
//! On exception entry the hardware stacks xPSR, PC, LR, R12, R3-R0. PendSV
//! additionally saves the callee-saved registers R4-R11 together with the
//! EXC_RETURN value, giving this layout below a suspended task's stack
//! cursor:
//!
//! ```text
//! High address
//! ┌───────────────┐
//! │     xPSR      │  (hardware-stacked)
//! │      PC       │
//! │      LR       │
//! │      R12      │
//! │   R3..R0      │
//! ├───────────────┤
//! │      R11      │  (software-saved)
//! │   R10..R4     │
//! │  EXC_RETURN   │
//! └───────────────┘ <- saved stack cursor
//! Low address
//! ```
//!
//! A new task's stack is seeded with this exact frame so its first resume is
//! indistinguishable from a return from PendSV.

#[cfg(target_arch = "arm")]
use core::arch::global_asm;
use core::ptr;

use crate::task::TaskEntry;

/// Hardware-stacked exception frame (pushed by the CPU on exception entry)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ExceptionFrame {
    /// R0 (first argument register)
    pub r0: u32,
    /// R1
    pub r1: u32,
    /// R2
    pub r2: u32,
    /// R3
    pub r3: u32,
    /// R12
    pub r12: u32,
    /// Link register (return address before the exception)
    pub lr: u32,
    /// Program counter (resume address)
    pub pc: u32,
    /// Program status register
    pub xpsr: u32,
}

/// Software-saved context (callee-saved registers plus EXC_RETURN)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SoftwareContext {
    /// EXC_RETURN value (Thread mode, PSP, no FPU frame)
    pub exc_return: u32,
    /// R4
    pub r4: u32,
    /// R5
    pub r5: u32,
    /// R6
    pub r6: u32,
    /// R7
    pub r7: u32,
    /// R8
    pub r8: u32,
    /// R9
    pub r9: u32,
    /// R10
    pub r10: u32,
    /// R11
    pub r11: u32,
}

/// EXC_RETURN: return to Thread mode, resume on PSP, basic frame
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// xPSR with only the Thumb bit set; mandatory for ARMv7-M execution
const XPSR_THUMB: u32 = 0x0100_0000;

/// Build the synthetic exception-return frame for a new task
///
/// Returns the task's initial stack cursor.
///
/// # Safety
/// `stack_top` must be the one-past-the-end pointer of a writable stack
/// region large enough for both context frames.
pub unsafe fn init_task_stack(stack_top: *mut u32, entry: TaskEntry, param: *mut ()) -> *mut u32 {
    // AAPCS requires 8-byte stack alignment at the exception boundary
    let aligned_top = (stack_top as usize & !0x7) as *mut u32;

    let frame = aligned_top.sub(8).cast::<ExceptionFrame>();
    frame.write(ExceptionFrame {
        r0: param as u32,
        r1: 0,
        r2: 0,
        r3: 0,
        r12: 0,
        lr: task_exit_trap as usize as u32,
        pc: entry as usize as u32,
        xpsr: XPSR_THUMB,
    });

    let sw = frame.cast::<u32>().sub(9).cast::<SoftwareContext>();
    sw.write(SoftwareContext {
        exc_return: EXC_RETURN_THREAD_PSP,
        r4: 0,
        r5: 0,
        r6: 0,
        r7: 0,
        r8: 0,
        r9: 0,
        r10: 0,
        r11: 0,
    });

    sw.cast::<u32>()
}

/// Landing pad for a task whose entry function returns
///
/// Installed as the LR of the initial frame, so falling off the end of a
/// task behaves like an explicit self-delete.
extern "C" fn task_exit_trap() {
    crate::task::delete_self();
    loop {
        core::hint::spin_loop();
    }
}

// ============================================================================
// Pending-switch slots consumed by PendSV
// ============================================================================

/// Stack-cursor slots for the in-flight context switch
#[repr(C)]
struct SwitchSlots {
    /// Where to store the outgoing task's stack cursor (null on first switch)
    cur_slot: *mut *mut u32,
    /// Where to load the incoming task's stack cursor from
    next_slot: *mut *mut u32,
}

/// Slots read by the PendSV handler; `#[no_mangle]` so the assembly below
/// can name it.
#[no_mangle]
static mut SWITCH_SLOTS: SwitchSlots = SwitchSlots {
    cur_slot: ptr::null_mut(),
    next_slot: ptr::null_mut(),
};

/// Record the slots for the next PendSV
///
/// # Safety
/// Must be called with interrupts masked; the slots must stay valid until
/// PendSV has run.
pub unsafe fn setup_switch(cur_slot: *mut *mut u32, next_slot: *mut *mut u32) {
    let slots = &mut *ptr::addr_of_mut!(SWITCH_SLOTS);
    slots.cur_slot = cur_slot;
    slots.next_slot = next_slot;
}

// ============================================================================
// PendSV handler
// ============================================================================

// The actual context switch. Saves R4-R11 and EXC_RETURN below the outgoing
// task's hardware frame, stores the resulting cursor through cur_slot, then
// restores the incoming task from next_slot and returns through its
// EXC_RETURN.
#[cfg(target_arch = "arm")]
global_asm!(
    ".syntax unified",
    ".thumb",
    ".section .text.PendSV_Handler",
    ".global PendSV_Handler",
    ".type PendSV_Handler, %function",
    ".thumb_func",
    "PendSV_Handler:",
    "    cpsid i",
    // Save the outgoing software context on its process stack
    "    mrs r0, psp",
    "    stmdb r0!, {{r4-r11, lr}}",
    // r2 = cur_slot, r3 = next_slot
    "    ldr r1, =SWITCH_SLOTS",
    "    ldr r2, [r1, #0]",
    "    ldr r3, [r1, #4]",
    // First switch has no outgoing task
    "    cbz r2, 1f",
    "    str r0, [r2]",
    "1:",
    // Restore the incoming software context
    "    ldr r0, [r3]",
    "    ldmia r0!, {{r4-r11, lr}}",
    "    msr psp, r0",
    "    isb",
    "    cpsie i",
    "    bx lr",
    ".size PendSV_Handler, . - PendSV_Handler",
);

// ============================================================================
// First task start
// ============================================================================

// Launches the very first task: adopts its prepared frame as the process
// stack, pops the software context, and returns through EXC_RETURN so the
// hardware unstacks the rest.
#[cfg(target_arch = "arm")]
global_asm!(
    ".syntax unified",
    ".thumb",
    ".section .text.kestrel_start_first_task",
    ".global kestrel_start_first_task",
    ".type kestrel_start_first_task, %function",
    ".thumb_func",
    "kestrel_start_first_task:",
    // R0 = first task's stack cursor
    "    msr psp, r0",
    // Thread mode uses PSP from here on
    "    mrs r1, control",
    "    orr r1, r1, #2",
    "    msr control, r1",
    "    isb",
    "    mrs r0, psp",
    "    ldmia r0!, {{r4-r11, lr}}",
    "    msr psp, r0",
    "    cpsie i",
    "    bx lr",
    ".size kestrel_start_first_task, . - kestrel_start_first_task",
);

extern "C" {
    /// Start the first task (never returns)
    ///
    /// # Safety
    /// `sp` must be a stack cursor produced by [`init_task_stack`]; must be
    /// called exactly once.
    #[link_name = "kestrel_start_first_task"]
    pub fn start_first_task(sp: u32) -> !;
}
