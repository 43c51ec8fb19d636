//! Common test utilities for integration tests.
//!
//! # Modules
//!
//! - `fixtures`: mock remote setup and collaborator wiring
//! - `log_capture`: in-test tracing capture for log assertions
//! - `logger`: phase-tracking test logger

#![allow(dead_code)]

pub mod fixtures;
pub mod log_capture;
pub mod logger;
