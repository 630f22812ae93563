//! Transaction coordination.
//!
//! Every submission resolves to exactly one of: a successful receipt for the
//! submitted hash, [`CoordinationError::TransactionReverted`],
//! [`CoordinationError::ConfirmationTimeout`], a transport failure or a
//! cancellation. Nothing is retried.

use crate::CoordinationError;
use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256};
use alloy_sol_types::{Revert, SolError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;
use wedding_account::Identity;
use wedding_chain::{ChainError, ChainService};
use wedding_contract::ContractHandle;
use wedding_types::{
	truncate_id, AbortSignal, CallOptions, SignedTransaction, TransactionHash, TransactionReceipt,
	UnsignedTransaction,
};

/// A submitted transaction awaiting its receipt.
///
/// Resolving consumes it, so each submission is resolved once.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
	pub hash: TransactionHash,
	pub submitted_at: Instant,
	pub deadline: Instant,
	/// Time budget reported on timeout.
	pub budget: Duration,
	signed: Option<SignedTransaction>,
}

impl PendingTransaction {
	fn submitted(signed: SignedTransaction, deadline: Instant, budget: Duration) -> Self {
		Self {
			hash: signed.hash,
			submitted_at: Instant::now(),
			deadline,
			budget,
			signed: Some(signed),
		}
	}

	/// A hash submitted elsewhere, e.g. retained from an earlier timeout.
	pub fn from_hash(hash: TransactionHash, deadline: Instant) -> Self {
		let now = Instant::now();
		Self {
			hash,
			submitted_at: now,
			deadline,
			budget: deadline.saturating_duration_since(now),
			signed: None,
		}
	}
}

/// Submits transactions and waits for their receipts.
///
/// Holds no per-call state; concurrent calls only share the chain client.
#[derive(Clone)]
pub struct TransactionCoordinator {
	chain: Arc<ChainService>,
	poll_interval: Duration,
}

impl TransactionCoordinator {
	pub fn new(chain: Arc<ChainService>, poll_interval: Duration) -> Self {
		Self {
			chain,
			poll_interval,
		}
	}

	pub fn chain(&self) -> &Arc<ChainService> {
		&self.chain
	}

	/// Sends `method` through `contract` and waits up to `timeout` for a
	/// successful receipt.
	pub async fn submit_and_wait(
		&self,
		contract: &ContractHandle,
		method: &str,
		args: &[DynSolValue],
		options: CallOptions,
		timeout: Duration,
	) -> Result<TransactionReceipt, CoordinationError> {
		self.submit_and_wait_until(
			contract,
			method,
			args,
			options,
			Instant::now() + timeout,
			AbortSignal::never(),
		)
		.await
	}

	/// Like [`submit_and_wait`](Self::submit_and_wait) against a fixed
	/// deadline, giving up early if `abort` fires.
	#[instrument(skip_all, fields(contract = %contract.name(), method = %method))]
	pub async fn submit_and_wait_until(
		&self,
		contract: &ContractHandle,
		method: &str,
		args: &[DynSolValue],
		options: CallOptions,
		deadline: Instant,
		abort: AbortSignal,
	) -> Result<TransactionReceipt, CoordinationError> {
		let budget = deadline.saturating_duration_since(Instant::now());
		let signed = contract.submit(method, args, options).await?;
		self.resolve(PendingTransaction::submitted(signed, deadline, budget), abort)
			.await
	}

	/// Sends `value` from `from` to `to` and waits for the receipt.
	#[instrument(skip_all, fields(from = %from.address(), to = %to))]
	pub async fn transfer_and_wait(
		&self,
		from: &Identity,
		to: Address,
		value: U256,
		options: CallOptions,
		deadline: Instant,
		abort: AbortSignal,
	) -> Result<TransactionReceipt, CoordinationError> {
		let budget = deadline.saturating_duration_since(Instant::now());
		let signed = self
			.chain
			.sign_and_send(from, UnsignedTransaction::transfer(to, value, options))
			.await?;
		self.resolve(PendingTransaction::submitted(signed, deadline, budget), abort)
			.await
	}

	/// Polls an already submitted hash until `deadline`.
	///
	/// Used to re-check a transaction after a confirmation timeout.
	pub async fn wait_for_receipt(
		&self,
		hash: TransactionHash,
		deadline: Instant,
		abort: AbortSignal,
	) -> Result<TransactionReceipt, CoordinationError> {
		self.resolve(PendingTransaction::from_hash(hash, deadline), abort)
			.await
	}

	/// Drives `pending` to its single outcome.
	#[instrument(skip_all, fields(tx_hash = %truncate_id(&pending.hash.to_string())))]
	pub async fn resolve(
		&self,
		pending: PendingTransaction,
		mut abort: AbortSignal,
	) -> Result<TransactionReceipt, CoordinationError> {
		let hash = pending.hash;
		let poll = async {
			loop {
				let receipt = self
					.chain
					.get_receipt(&hash)
					.await
					.map_err(|e| CoordinationError::Transport(e.to_string()))?;
				if let Some(receipt) = receipt {
					return Ok::<_, CoordinationError>(receipt);
				}
				tokio::time::sleep(self.poll_interval).await;
			}
		};

		let receipt = tokio::select! {
			result = tokio::time::timeout_at(pending.deadline, poll) => match result {
				Ok(receipt) => receipt?,
				Err(_) => {
					tracing::warn!(
						timeout_ms = pending.budget.as_millis() as u64,
						"Transaction not confirmed before deadline"
					);
					return Err(CoordinationError::ConfirmationTimeout {
						hash,
						timeout: pending.budget,
					});
				},
			},
			_ = abort.aborted() => {
				return Err(CoordinationError::Cancelled(format!("receipt of {}", hash)));
			},
		};

		if receipt.transaction_hash != hash {
			return Err(CoordinationError::ReceiptMismatch {
				expected: hash,
				received: receipt.transaction_hash,
			});
		}

		if !receipt.is_success() {
			let reason = self.revert_reason(pending.signed.as_ref()).await;
			tracing::warn!(
				block = receipt.block_number,
				gas_used = receipt.gas_used,
				reason = %reason,
				"Transaction reverted"
			);
			return Err(CoordinationError::TransactionReverted { hash, reason });
		}

		tracing::info!(
			block = receipt.block_number,
			gas_used = receipt.gas_used,
			elapsed_ms = pending.submitted_at.elapsed().as_millis() as u64,
			"Transaction confirmed"
		);
		Ok(receipt)
	}

	/// Best-effort revert reason, replaying the call against the latest
	/// state. The replay carries no value.
	async fn revert_reason(&self, signed: Option<&SignedTransaction>) -> String {
		const UNKNOWN: &str = "no revert reason";
		let Some(tx) = signed else {
			return UNKNOWN.to_string();
		};

		match self.chain.call(Some(tx.from), tx.to, tx.input.clone()).await {
			Err(ChainError::CallReverted { message, data }) => reason_from(&data, message),
			Err(e) => {
				tracing::debug!(error = %e, "Revert replay failed");
				UNKNOWN.to_string()
			},
			Ok(_) => UNKNOWN.to_string(),
		}
	}
}

/// `Error(string)` payloads give the bare reason; other payloads their
/// rendered form, falling back to the node's message.
fn reason_from(data: &[u8], message: String) -> String {
	Revert::abi_decode(data, true)
		.map(|revert| revert.reason)
		.ok()
		.or_else(|| alloy_sol_types::decode_revert_reason(data))
		.unwrap_or(message)
}
