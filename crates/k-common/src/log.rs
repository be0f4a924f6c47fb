// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Logging infrastructure for Kestrel RT
//!
//! A lightweight, no_std logging system. Entries are written to a circular
//! buffer in RAM and can be drained later over whatever debug channel the
//! board provides.
//!
//! The buffer itself is not synchronized; the owner is expected to guard it
//! (the kernel keeps its buffer behind the port's critical section).

use core::fmt::{self, Write};
use heapless::String;

use crate::constants::{LOG_BUFFER_SIZE, MAX_LOG_MESSAGE_LEN};

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Errors that require immediate attention
    Error = 0,
    /// Warnings about potential issues
    Warn = 1,
    /// Informational messages
    Info = 2,
    /// Debug messages (development only)
    Debug = 3,
}

impl LogLevel {
    /// Get the log level name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single retained log entry
#[derive(Clone)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Timestamp in system ticks
    pub timestamp: u32,
    /// Module/component name
    pub module: &'static str,
    /// Log message (truncated to the configured maximum)
    pub message: String<MAX_LOG_MESSAGE_LEN>,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:08}] {:5} [{}] {}",
            self.timestamp, self.level, self.module, self.message
        )
    }
}

/// Circular log buffer
pub struct LogBuffer {
    entries: [Option<LogEntry>; LOG_BUFFER_SIZE],
    write_index: usize,
    count: usize,
    min_level: LogLevel,
}

impl LogBuffer {
    /// Create a new empty log buffer
    #[must_use]
    pub const fn new() -> Self {
        const NONE: Option<LogEntry> = None;
        Self {
            entries: [NONE; LOG_BUFFER_SIZE],
            write_index: 0,
            count: 0,
            min_level: LogLevel::Info,
        }
    }

    /// Set the minimum log level
    pub fn set_min_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    /// Get the minimum log level
    #[must_use]
    pub const fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Check whether a log level passes the configured filter
    #[must_use]
    pub const fn should_log(&self, level: LogLevel) -> bool {
        (level as u8) <= (self.min_level as u8)
    }

    /// Record an entry with format arguments
    pub fn log(
        &mut self,
        level: LogLevel,
        timestamp: u32,
        module: &'static str,
        args: fmt::Arguments<'_>,
    ) {
        if !self.should_log(level) {
            return;
        }

        let mut message = String::<MAX_LOG_MESSAGE_LEN>::new();
        // Overlong messages are silently truncated
        let _ = TruncatingWriter(&mut message).write_fmt(args);

        self.entries[self.write_index] = Some(LogEntry {
            level,
            timestamp,
            module,
            message,
        });
        self.write_index = (self.write_index + 1) % LOG_BUFFER_SIZE;
        if self.count < LOG_BUFFER_SIZE {
            self.count += 1;
        }
    }

    /// Get the number of retained entries
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Check if the buffer is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
        self.write_index = 0;
        self.count = 0;
    }

    /// Iterate over entries, oldest first
    pub fn iter(&self) -> LogBufferIter<'_> {
        LogBufferIter {
            buffer: self,
            index: 0,
            remaining: self.count,
        }
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer that drops what no longer fits instead of failing the whole write
struct TruncatingWriter<'a>(&'a mut String<MAX_LOG_MESSAGE_LEN>);

impl Write for TruncatingWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = MAX_LOG_MESSAGE_LEN - self.0.len();
        if s.len() <= room {
            let _ = self.0.push_str(s);
        } else {
            let mut end = room;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            let _ = self.0.push_str(&s[..end]);
        }
        Ok(())
    }
}

/// Iterator over log buffer entries
pub struct LogBufferIter<'a> {
    buffer: &'a LogBuffer,
    index: usize,
    remaining: usize,
}

impl<'a> Iterator for LogBufferIter<'a> {
    type Item = &'a LogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let start_index = if self.buffer.count < LOG_BUFFER_SIZE {
            0
        } else {
            self.buffer.write_index
        };

        let actual_index = (start_index + self.index) % LOG_BUFFER_SIZE;
        self.index += 1;
        self.remaining -= 1;

        self.buffer.entries[actual_index].as_ref()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($buffer:expr, $ts:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Error, $ts, $module, format_args!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($buffer:expr, $ts:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Warn, $ts, $module, format_args!($($arg)*))
    };
}

/// Log an informational message
#[macro_export]
macro_rules! log_info {
    ($buffer:expr, $ts:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Info, $ts, $module, format_args!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($buffer:expr, $ts:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Debug, $ts, $module, format_args!($($arg)*))
    };
}
