// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! System-wide constants for Kestrel RT
//!
//! This module defines compile-time constants shared between the kernel and
//! any component built on top of it. Sizes are chosen for embedded
//! constraints; none of them imply heap allocation.

// =============================================================================
// Naming
// =============================================================================

/// Maximum length of a task name in bytes
pub const MAX_TASK_NAME_LEN: usize = 16;

// =============================================================================
// Logging
// =============================================================================

/// Maximum log message length in bytes
pub const MAX_LOG_MESSAGE_LEN: usize = 96;

/// Log buffer depth (number of retained entries)
pub const LOG_BUFFER_SIZE: usize = 32;
