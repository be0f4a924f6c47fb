// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Kestrel Systems

//! Kestrel RT Common Library
//!
//! This crate provides the error definitions, logging infrastructure, and
//! shared constants used across all Kestrel RT components.
//!
//! # Features
//!
//! - `std`: Enable standard library support (disabled by default for embedded)
//! - `defmt`: Enable defmt formatting support for embedded debugging
//!
//! No heap allocations are performed - all buffers use fixed-size arrays or
//! heapless collections.

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

#[cfg(feature = "std")]
extern crate std;

pub mod constants;
pub mod errors;
pub mod log;

// Re-export commonly used items
pub use errors::{Error, Result};
pub use log::{LogBuffer, LogEntry, LogLevel};
