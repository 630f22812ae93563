//! Coordination core for the wedding toolkit.
//!
//! Ties the chain client, wallet set and contract handles together into
//! deterministic submit / wait / assert steps. The [`TransactionCoordinator`]
//! resolves every submission to a receipt, a revert or a timeout, the
//! [`EventWaiter`] turns event subscriptions into awaitable one-shot results,
//! and the [`ScenarioRunner`] composes both into the wedding workflows.

use std::time::Duration;
use thiserror::Error;
use wedding_chain::ChainError;
use wedding_contract::ContractError;
use wedding_types::TransactionHash;

pub mod builder;
pub mod coordinator;
pub mod reporter;
pub mod scenario;
pub mod waiter;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::{BuilderError, RunnerBuilder};
pub use coordinator::{PendingTransaction, TransactionCoordinator};
pub use reporter::{RecordingReporter, Report, Reporter, TracingReporter};
pub use scenario::{
	BalanceCheck, BreakupOutcome, RunnerSettings, ScenarioContext, ScenarioError, ScenarioRunner,
	Step, StepOutcome, WeddingKind, GIFTER_INDEX, GIFT_MESSAGE,
};
pub use waiter::{EventWaiter, PendingEvent, WaitState};

/// Errors produced while resolving a submission or waiting for an event.
#[derive(Debug, Error)]
pub enum CoordinationError {
	/// The node could not be reached while submitting or polling.
	#[error("Transport error: {0}")]
	Transport(String),
	/// The node refused the transaction; it was never mined.
	#[error("Submission failed: {0}")]
	SubmissionFailed(String),
	/// The transaction was mined with a failure status.
	#[error("Transaction {hash} reverted: {reason}")]
	TransactionReverted {
		hash: TransactionHash,
		reason: String,
	},
	/// No receipt arrived before the deadline. The hash may still be mined.
	#[error("Transaction {hash} not confirmed within {timeout:?}")]
	ConfirmationTimeout {
		hash: TransactionHash,
		timeout: Duration,
	},
	#[error("No matching {event} event within {timeout:?}")]
	EventTimeout { event: String, timeout: Duration },
	#[error("Wait for {0} was cancelled")]
	Cancelled(String),
	/// The chain dropped the subscription before a terminal transition.
	#[error("Subscription for {0} closed")]
	SubscriptionClosed(String),
	#[error(transparent)]
	Contract(ContractError),
	#[error("Polled receipt for {expected} but node returned {received}")]
	ReceiptMismatch {
		expected: TransactionHash,
		received: TransactionHash,
	},
}

impl From<ChainError> for CoordinationError {
	fn from(err: ChainError) -> Self {
		match err {
			ChainError::Transport(message) => Self::Transport(message),
			other => Self::SubmissionFailed(other.to_string()),
		}
	}
}

impl From<ContractError> for CoordinationError {
	fn from(err: ContractError) -> Self {
		match err {
			ContractError::Chain(chain) => chain.into(),
			other => Self::Contract(other),
		}
	}
}
