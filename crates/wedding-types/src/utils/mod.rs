//! Formatting helpers used in log lines and CLI output.

pub mod formatting;

pub use formatting::{format_ether, truncate_id};
