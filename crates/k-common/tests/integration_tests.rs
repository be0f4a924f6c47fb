// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Integration tests for k-common

mod error_tests {
    use k_common::Error;

    #[test]
    fn test_display_includes_code_and_description() {
        let rendered = format!("{}", Error::Timeout);
        assert!(rendered.contains("0x0101"));
        assert!(rendered.contains("wait timed out"));
    }

    #[test]
    fn test_wait_outcomes_are_distinct() {
        assert_ne!(Error::Timeout, Error::Deleted);
        assert_ne!(Error::Deleted, Error::NoResource);
    }
}

mod log_tests {
    use k_common::constants::LOG_BUFFER_SIZE;
    use k_common::{log_info, log_warn, LogBuffer, LogLevel};

    #[test]
    fn test_entries_retained_in_order() {
        let mut buffer = LogBuffer::new();
        log_info!(buffer, 1, "sched", "kernel initialized");
        log_warn!(buffer, 2, "timer", "late tick");

        let mut iter = buffer.iter();
        let first = iter.next().expect("first entry");
        assert_eq!(first.level, LogLevel::Info);
        assert_eq!(first.module, "sched");

        let second = iter.next().expect("second entry");
        assert_eq!(second.level, LogLevel::Warn);
        assert_eq!(second.timestamp, 2);

        assert!(iter.next().is_none());
    }

    #[test]
    fn test_clear_resets_buffer() {
        let mut buffer = LogBuffer::new();
        for i in 0..LOG_BUFFER_SIZE {
            log_info!(buffer, i as u32, "test", "entry");
        }
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.iter().next().is_none());
    }
}
