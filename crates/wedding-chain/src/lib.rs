//! Chain client for the wedding coordination toolkit.
//!
//! This crate owns the single JSON-RPC endpoint every scenario talks to. It
//! defines the [`ChainInterface`] that concrete providers implement, and the
//! [`ChainService`] that the rest of the workspace holds, which adds nonce
//! sequencing and signing on top of the raw interface.
//!
//! The chain client never retries. A failed submission or poll is reported
//! to the caller as-is.

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, OnceCell};
use wedding_account::{AccountError, Identity, SigningParams};
use wedding_types::{
	BlockInfo, ConfigSchema, ImplementationRegistry, LogFilter, RawLog, SignedTransaction,
	SubscriptionId, TransactionHash, TransactionReceipt, UnsignedTransaction,
};

/// Re-export implementations
pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
	pub mod mock;
}

/// Errors that can occur while talking to the chain.
#[derive(Debug, Error)]
pub enum ChainError {
	/// The endpoint could not be reached or answered garbage.
	#[error("Transport error: {0}")]
	Transport(String),
	/// The node answered a submission with a JSON-RPC error.
	#[error("Rejected by node: {0}")]
	RejectedByNode(String),
	/// A read-only call reverted. `data` is the raw revert payload.
	#[error("Call reverted: {message}")]
	CallReverted { message: String, data: Bytes },
	/// The node returned data that could not be interpreted.
	#[error("Invalid data: {0}")]
	InvalidData(String),
	/// The implementation's configuration table is invalid.
	#[error("Configuration error: {0}")]
	Configuration(String),
	/// Signing through the wallet set failed.
	#[error("Account error: {0}")]
	Account(#[from] AccountError),
}

/// A live log subscription.
///
/// Logs matching the filter arrive on `receiver` in the order the provider
/// saw them. The subscription stays registered until
/// [`ChainInterface::unsubscribe`] is called with `id`.
#[derive(Debug)]
pub struct LogSubscription {
	pub id: SubscriptionId,
	pub receiver: mpsc::UnboundedReceiver<RawLog>,
}

/// Trait defining the interface for chain providers.
///
/// Implementations must be usable from many tasks at once; the coordinator
/// polls receipts while event subscriptions deliver logs concurrently.
#[async_trait]
pub trait ChainInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Latest block number.
	async fn block_number(&self) -> Result<u64, ChainError>;

	/// Submits a signed transaction and returns its hash.
	///
	/// A JSON-RPC error answer maps to [`ChainError::RejectedByNode`].
	async fn send_raw_transaction(
		&self,
		tx: &SignedTransaction,
	) -> Result<TransactionHash, ChainError>;

	/// Receipt for `hash`, or `None` if the transaction is not mined yet.
	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, ChainError>;

	/// Block header summary, or `None` if the block does not exist yet.
	async fn get_block(&self, number: u64) -> Result<Option<BlockInfo>, ChainError>;

	/// Native balance in wei.
	async fn get_balance(&self, address: Address) -> Result<U256, ChainError>;

	/// Next nonce for `address`, counting pending transactions.
	async fn get_nonce(&self, address: Address) -> Result<u64, ChainError>;

	/// Current gas price in wei.
	async fn gas_price(&self) -> Result<u128, ChainError>;

	async fn chain_id(&self) -> Result<u64, ChainError>;

	/// Executes a read-only call.
	///
	/// A revert maps to [`ChainError::CallReverted`] carrying the revert data.
	async fn call(
		&self,
		from: Option<Address>,
		to: Address,
		data: Bytes,
	) -> Result<Bytes, ChainError>;

	/// Opens a log subscription for `filter`.
	///
	/// Only logs from blocks mined after this call returns are delivered.
	async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription, ChainError>;

	/// Releases a subscription. Returns `false` if it was already released.
	///
	/// Synchronous so it can run from `Drop`.
	fn unsubscribe(&self, id: SubscriptionId) -> bool;

	/// Number of registered subscriptions.
	fn active_subscriptions(&self) -> usize;
}

/// Type alias for chain factory functions.
pub type ChainFactory = fn(&toml::Value) -> Result<Box<dyn ChainInterface>, ChainError>;

/// Registry trait for chain implementations.
pub trait ChainRegistry: ImplementationRegistry<Factory = ChainFactory> {}

/// Get all registered chain implementations.
///
/// Returns a vector of (name, factory) tuples for all available implementations.
pub fn get_all_implementations() -> Vec<(&'static str, ChainFactory)> {
	use implementations::{evm::alloy, mock};

	vec![
		(alloy::Registry::NAME, alloy::Registry::factory()),
		(mock::Registry::NAME, mock::Registry::factory()),
	]
}

/// Builds the implementation named `name` from its configuration table.
pub fn create_chain(name: &str, config: &toml::Value) -> Result<ChainService, ChainError> {
	let factory = get_all_implementations()
		.into_iter()
		.find(|(registered, _)| *registered == name)
		.map(|(_, factory)| factory)
		.ok_or_else(|| {
			ChainError::Configuration(format!("Unknown chain implementation '{}'", name))
		})?;

	Ok(ChainService::new(factory(config)?))
}

/// Service wrapping a chain implementation.
///
/// Adds what every caller needs on top of the raw interface: a cached chain
/// id, and per-sender serialization of nonce lookup, signing and submission
/// so concurrent sends from one identity never reuse a nonce.
pub struct ChainService {
	implementation: Box<dyn ChainInterface>,
	chain_id: OnceCell<u64>,
	sender_locks: DashMap<Address, Arc<Mutex<()>>>,
}

impl ChainService {
	pub fn new(implementation: Box<dyn ChainInterface>) -> Self {
		Self {
			implementation,
			chain_id: OnceCell::new(),
			sender_locks: DashMap::new(),
		}
	}

	pub async fn block_number(&self) -> Result<u64, ChainError> {
		self.implementation.block_number().await
	}

	pub async fn send_raw_transaction(
		&self,
		tx: &SignedTransaction,
	) -> Result<TransactionHash, ChainError> {
		self.implementation.send_raw_transaction(tx).await
	}

	pub async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, ChainError> {
		self.implementation.get_receipt(hash).await
	}

	pub async fn get_block(&self, number: u64) -> Result<Option<BlockInfo>, ChainError> {
		self.implementation.get_block(number).await
	}

	pub async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
		self.implementation.get_balance(address).await
	}

	pub async fn get_nonce(&self, address: Address) -> Result<u64, ChainError> {
		self.implementation.get_nonce(address).await
	}

	pub async fn gas_price(&self) -> Result<u128, ChainError> {
		self.implementation.gas_price().await
	}

	/// Chain id, fetched once and cached.
	pub async fn chain_id(&self) -> Result<u64, ChainError> {
		self.chain_id
			.get_or_try_init(|| self.implementation.chain_id())
			.await
			.copied()
	}

	pub async fn call(
		&self,
		from: Option<Address>,
		to: Address,
		data: Bytes,
	) -> Result<Bytes, ChainError> {
		self.implementation.call(from, to, data).await
	}

	pub async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription, ChainError> {
		self.implementation.subscribe_logs(filter).await
	}

	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		self.implementation.unsubscribe(id)
	}

	/// Number of live log subscriptions.
	pub fn active_subscriptions(&self) -> usize {
		self.implementation.active_subscriptions()
	}

	/// Signs `tx` as `identity` and submits it.
	///
	/// This method:
	/// 1. Takes the sender's lock so nonces are handed out in order
	/// 2. Fills nonce, chain id and (unless fixed per call) gas price
	/// 3. Signs through the identity and submits the raw bytes
	///
	/// Returns the signed transaction so callers can account for its gas.
	pub async fn sign_and_send(
		&self,
		identity: &Identity,
		tx: UnsignedTransaction,
	) -> Result<SignedTransaction, ChainError> {
		let lock = self
			.sender_locks
			.entry(identity.address())
			.or_default()
			.clone();
		let _guard = lock.lock().await;

		let chain_id = self.chain_id().await?;
		let nonce = self.get_nonce(identity.address()).await?;
		let gas_price = match tx.options.gas_price {
			Some(price) => price,
			None => self.gas_price().await?,
		};

		let signed = identity
			.sign(
				&tx,
				SigningParams {
					nonce,
					chain_id,
					gas_price,
				},
			)
			.await?;

		let hash = self.send_raw_transaction(&signed).await?;
		if hash != signed.hash {
			return Err(ChainError::InvalidData(format!(
				"Node returned hash {} for transaction {}",
				hash, signed.hash
			)));
		}

		tracing::info!(
			tx_hash = %wedding_types::truncate_id(&hash.to_string()),
			from = %identity.address(),
			to = %tx.to,
			nonce,
			"Submitted transaction"
		);

		Ok(signed)
	}
}
