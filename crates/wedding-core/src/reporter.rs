//! Step and assertion reporting.
//!
//! The runner never panics on a failed check. It hands every outcome to the
//! injected [`Reporter`] and turns failed checks into
//! [`ScenarioError::Assertion`](crate::ScenarioError::Assertion).

use crate::ScenarioError;
use std::sync::Mutex;
use wedding_types::{truncate_id, TransactionReceipt};

/// Receives scenario progress.
pub trait Reporter: Send + Sync {
	fn step_started(&self, step: &str, method: &str, args: &str);

	fn step_succeeded(&self, step: &str, receipt: &TransactionReceipt);

	fn step_failed(&self, step: &str, error: &ScenarioError);

	/// Outcome of one expected-vs-actual comparison.
	fn check(&self, label: &str, expected: &str, actual: &str, passed: bool);

	/// Free-form progress, e.g. a skipped breakup.
	fn note(&self, message: &str);
}

/// Reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
	fn step_started(&self, step: &str, method: &str, args: &str) {
		tracing::info!(step, method, args, "Step started");
	}

	fn step_succeeded(&self, step: &str, receipt: &TransactionReceipt) {
		tracing::info!(
			step,
			tx_hash = %truncate_id(&receipt.transaction_hash.to_string()),
			block = receipt.block_number,
			gas_used = receipt.gas_used,
			"Step succeeded"
		);
	}

	fn step_failed(&self, step: &str, error: &ScenarioError) {
		tracing::error!(step, "Step failed: {}", error);
	}

	fn check(&self, label: &str, expected: &str, actual: &str, passed: bool) {
		if passed {
			tracing::debug!(check = label, value = expected, "Check passed");
		} else {
			tracing::error!(check = label, expected, actual, "Check failed");
		}
	}

	fn note(&self, message: &str) {
		tracing::info!("{}", message);
	}
}

/// One recorded report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
	Started { step: String, method: String, args: String },
	Succeeded { step: String, block: u64 },
	Failed { step: String, error: String },
	Check { label: String, expected: String, actual: String, passed: bool },
	Note(String),
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
	reports: Mutex<Vec<Report>>,
}

impl RecordingReporter {
	pub fn reports(&self) -> Vec<Report> {
		self.lock().clone()
	}

	/// Failed steps and failed checks.
	pub fn failures(&self) -> Vec<Report> {
		self.lock()
			.iter()
			.filter(|report| {
				matches!(
					report,
					Report::Failed { .. } | Report::Check { passed: false, .. }
				)
			})
			.cloned()
			.collect()
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Report>> {
		self.reports.lock().unwrap_or_else(|e| e.into_inner())
	}

	fn push(&self, report: Report) {
		self.lock().push(report);
	}
}

impl Reporter for RecordingReporter {
	fn step_started(&self, step: &str, method: &str, args: &str) {
		self.push(Report::Started {
			step: step.into(),
			method: method.into(),
			args: args.into(),
		});
	}

	fn step_succeeded(&self, step: &str, receipt: &TransactionReceipt) {
		self.push(Report::Succeeded {
			step: step.into(),
			block: receipt.block_number,
		});
	}

	fn step_failed(&self, step: &str, error: &ScenarioError) {
		self.push(Report::Failed {
			step: step.into(),
			error: error.to_string(),
		});
	}

	fn check(&self, label: &str, expected: &str, actual: &str, passed: bool) {
		self.push(Report::Check {
			label: label.into(),
			expected: expected.into(),
			actual: actual.into(),
			passed,
		});
	}

	fn note(&self, message: &str) {
		self.push(Report::Note(message.into()));
	}
}
