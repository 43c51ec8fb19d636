//! Utility functions.

pub mod format;
pub mod time;

pub use format::{format_cents, format_count, format_value};
pub use time::{format_countdown, format_relative_time};
