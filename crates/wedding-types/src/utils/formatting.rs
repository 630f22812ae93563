//! String formatting utilities.
//!
//! Hash truncation for log lines and wei to ether rendering.

use alloy_primitives::U256;

/// Truncates a hex string to its first 8 characters followed by "..".
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 8 {
		id.to_string()
	} else {
		format!("{}..", &id[..8])
	}
}

/// Renders a wei amount as ether with trailing zeros trimmed, e.g. "1.5".
pub fn format_ether(wei: U256) -> String {
	let digits = wei.to_string();
	let decimal_places = 18;

	let (integer_part, decimal_part) = if digits.len() <= decimal_places {
		("0".to_string(), format!("{:0>width$}", digits, width = decimal_places))
	} else {
		let split_pos = digits.len() - decimal_places;
		(digits[..split_pos].to_string(), digits[split_pos..].to_string())
	};

	let decimal_trimmed = decimal_part.trim_end_matches('0');
	if decimal_trimmed.is_empty() {
		integer_part
	} else {
		format!("{}.{}", integer_part, decimal_trimmed)
	}
}
