//! JSON-RPC chain implementation over HTTP using Alloy.
//!
//! Log subscriptions are polling tasks: each one remembers the last block it
//! scanned, fetches `eth_getLogs` for the new range on every tick and stops
//! when its stop channel closes.

use crate::{ChainError, ChainInterface, LogSubscription};
use alloy_eips::BlockNumberOrTag;
use alloy_primitives::{Address, Bytes, U256, U64};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types::{Filter, Log, TransactionRequest};
use alloy_transport::{RpcError, TransportError};
use alloy_transport_http::Http;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wedding_types::{
	truncate_id, BlockInfo, ConfigSchema, Field, FieldType, LogFilter, RawLog, Schema,
	SignedTransaction, SubscriptionId, TransactionHash, TransactionReceipt, TransactionStatus,
	ValidationError,
};

const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Alloy-based EVM chain implementation.
pub struct AlloyChain {
	provider: RootProvider<Http<reqwest::Client>>,
	/// Interval between `eth_getLogs` polls of each subscription.
	poll_interval: Duration,
	/// Stop channels of running subscription tasks.
	subscriptions: Arc<DashMap<SubscriptionId, mpsc::Sender<()>>>,
	next_subscription: AtomicU64,
}

/// Header fields read from `eth_getBlockByNumber`.
#[derive(Debug, Deserialize)]
struct RpcBlockHeader {
	number: U64,
	timestamp: U64,
}

impl AlloyChain {
	pub fn new(rpc_url: &str, poll_interval: Duration) -> Result<Self, ChainError> {
		let url = rpc_url
			.parse()
			.map_err(|e| ChainError::Configuration(format!("Invalid RPC URL: {}", e)))?;

		Ok(Self {
			provider: RootProvider::new_http(url),
			poll_interval,
			subscriptions: Arc::new(DashMap::new()),
			next_subscription: AtomicU64::new(0),
		})
	}

	/// Polling loop behind one log subscription.
	///
	/// Scans blocks `(last_block, head]` on every tick and forwards matching
	/// logs. Exits when the stop channel closes or the receiver is dropped.
	async fn subscription_loop(
		provider: RootProvider<Http<reqwest::Client>>,
		id: SubscriptionId,
		filter: LogFilter,
		mut last_block: u64,
		sender: mpsc::UnboundedSender<RawLog>,
		mut stop_rx: mpsc::Receiver<()>,
		poll_interval: Duration,
		subscriptions: Arc<DashMap<SubscriptionId, mpsc::Sender<()>>>,
	) {
		let mut interval = tokio::time::interval(poll_interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		interval.tick().await;

		loop {
			tokio::select! {
				_ = interval.tick() => {
					let head = match provider.get_block_number().await {
						Ok(block) => block,
						Err(e) => {
							tracing::warn!(subscription = %id, "Failed to get block number: {}", e);
							continue;
						}
					};

					if head <= last_block {
						continue;
					}

					let rpc_filter = Filter::new()
						.address(filter.address)
						.event_signature(filter.topic0)
						.from_block(last_block + 1)
						.to_block(head);

					let logs = match provider.get_logs(&rpc_filter).await {
						Ok(logs) => logs,
						Err(e) => {
							tracing::warn!(subscription = %id, "Failed to get logs: {}", e);
							continue;
						}
					};

					let mut logs: Vec<RawLog> = logs.iter().filter_map(to_raw_log).collect();
					logs.sort_by_key(RawLog::position);
					if logs.into_iter().any(|log| sender.send(log).is_err()) {
						break;
					}

					last_block = head;
				}
				_ = stop_rx.recv() => {
					break;
				}
			}
		}

		subscriptions.remove(&id);
		tracing::debug!(subscription = %id, "Log subscription stopped");
	}
}

/// Converts a mined RPC log. Pending logs carry no position and are skipped.
fn to_raw_log(log: &Log) -> Option<RawLog> {
	Some(RawLog {
		address: log.address(),
		topics: log.topics().to_vec(),
		data: log.data().data.clone(),
		block_number: log.block_number?,
		log_index: log.log_index?,
		transaction_hash: TransactionHash(log.transaction_hash?),
	})
}

fn transport(context: &str, err: TransportError) -> ChainError {
	ChainError::Transport(format!("{}: {}", context, err))
}

/// Maps a submission error. JSON-RPC error answers are rejections.
fn submission_error(err: TransportError) -> ChainError {
	match err {
		RpcError::ErrorResp(payload) => ChainError::RejectedByNode(payload.message.to_string()),
		other => transport("Failed to send transaction", other),
	}
}

/// Maps an `eth_call` error, keeping revert data when the node sends it.
fn call_error(err: TransportError) -> ChainError {
	match err {
		RpcError::ErrorResp(payload) => ChainError::CallReverted {
			data: payload.as_revert_data().unwrap_or_default(),
			message: payload.message.to_string(),
		},
		other => transport("Call failed", other),
	}
}

/// Configuration schema for the Alloy chain implementation.
pub struct AlloyChainSchema;

impl ConfigSchema for AlloyChainSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			// Required fields
			vec![Field::new("rpc_url", FieldType::String).with_validator(|value| {
				match value.as_str() {
					Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
						Ok(())
					},
					_ => Err("RPC URL must start with http:// or https://".to_string()),
				}
			})],
			// Optional fields
			vec![Field::new(
				"poll_interval_ms",
				FieldType::Integer {
					min: Some(10),
					max: Some(60_000),
				},
			)],
		);

		schema.validate(config)
	}
}

#[async_trait]
impl ChainInterface for AlloyChain {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyChainSchema)
	}

	async fn block_number(&self) -> Result<u64, ChainError> {
		self.provider
			.get_block_number()
			.await
			.map_err(|e| transport("Failed to get block number", e))
	}

	async fn send_raw_transaction(
		&self,
		tx: &SignedTransaction,
	) -> Result<TransactionHash, ChainError> {
		let pending = self
			.provider
			.send_raw_transaction(&tx.raw)
			.await
			.map_err(submission_error)?;

		let hash = TransactionHash(*pending.tx_hash());
		tracing::debug!(tx_hash = %truncate_id(&hash.to_string()), "Raw transaction accepted");
		Ok(hash)
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, ChainError> {
		let receipt = self
			.provider
			.get_transaction_receipt(hash.0)
			.await
			.map_err(|e| transport("Failed to get receipt", e))?;

		let Some(receipt) = receipt else {
			return Ok(None);
		};

		// Receipts without a block number belong to pending transactions.
		let Some(block_number) = receipt.block_number else {
			return Ok(None);
		};

		let mut logs: Vec<RawLog> = receipt.inner.logs().iter().filter_map(to_raw_log).collect();
		logs.sort_by_key(RawLog::position);

		Ok(Some(TransactionReceipt {
			transaction_hash: TransactionHash(receipt.transaction_hash),
			block_number,
			gas_used: u64::try_from(receipt.gas_used)
				.map_err(|_| ChainError::InvalidData("gas used overflows u64".into()))?,
			effective_gas_price: u128::from(receipt.effective_gas_price),
			status: if receipt.status() {
				TransactionStatus::Success
			} else {
				TransactionStatus::Failure
			},
			logs,
		}))
	}

	async fn get_block(&self, number: u64) -> Result<Option<BlockInfo>, ChainError> {
		let header: Option<RpcBlockHeader> = self
			.provider
			.client()
			.request(
				"eth_getBlockByNumber",
				(BlockNumberOrTag::Number(number), false),
			)
			.await
			.map_err(|e| transport("Failed to get block", e))?;

		Ok(header.map(|h| BlockInfo {
			number: h.number.to::<u64>(),
			timestamp: h.timestamp.to::<u64>(),
		}))
	}

	async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
		self.provider
			.get_balance(address)
			.await
			.map_err(|e| transport("Failed to get balance", e))
	}

	async fn get_nonce(&self, address: Address) -> Result<u64, ChainError> {
		self.provider
			.get_transaction_count(address)
			.pending()
			.await
			.map_err(|e| transport("Failed to get nonce", e))
	}

	async fn gas_price(&self) -> Result<u128, ChainError> {
		self.provider
			.get_gas_price()
			.await
			.map_err(|e| transport("Failed to get gas price", e))
	}

	async fn chain_id(&self) -> Result<u64, ChainError> {
		self.provider
			.get_chain_id()
			.await
			.map_err(|e| transport("Failed to get chain id", e))
	}

	async fn call(
		&self,
		from: Option<Address>,
		to: Address,
		data: Bytes,
	) -> Result<Bytes, ChainError> {
		let mut request = TransactionRequest::default().to(to).input(data.into());
		if let Some(from) = from {
			request = request.from(from);
		}

		self.provider.call(&request).await.map_err(call_error)
	}

	async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription, ChainError> {
		let start_block = self.block_number().await?;
		let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst) + 1);

		let (sender, receiver) = mpsc::unbounded_channel();
		let (stop_tx, stop_rx) = mpsc::channel(1);
		self.subscriptions.insert(id, stop_tx);

		tokio::spawn(Self::subscription_loop(
			self.provider.clone(),
			id,
			filter,
			start_block,
			sender,
			stop_rx,
			self.poll_interval,
			self.subscriptions.clone(),
		));

		tracing::debug!(
			subscription = %id,
			address = %filter.address,
			from_block = start_block + 1,
			"Log subscription started"
		);
		Ok(LogSubscription { id, receiver })
	}

	fn unsubscribe(&self, id: SubscriptionId) -> bool {
		// Dropping the stop sender ends the polling task.
		self.subscriptions.remove(&id).is_some()
	}

	fn active_subscriptions(&self) -> usize {
		self.subscriptions.len()
	}
}

/// Factory function to create an HTTP JSON-RPC chain from configuration.
///
/// Configuration parameters:
/// - `rpc_url` (required): HTTP(S) endpoint of the node
/// - `poll_interval_ms` (optional): log polling interval, defaults to 1000
pub fn create_alloy_chain(config: &toml::Value) -> Result<Box<dyn ChainInterface>, ChainError> {
	AlloyChainSchema
		.validate(config)
		.map_err(|e| ChainError::Configuration(format!("Invalid configuration: {}", e)))?;

	let rpc_url = config
		.get("rpc_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| ChainError::Configuration("rpc_url is required".to_string()))?;

	let poll_interval_ms = config
		.get("poll_interval_ms")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_POLL_INTERVAL_MS);

	Ok(Box::new(AlloyChain::new(
		rpc_url,
		Duration::from_millis(poll_interval_ms),
	)?))
}

/// Registry for the HTTP/Alloy chain implementation.
pub struct Registry;

impl wedding_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "evm_alloy";
	type Factory = crate::ChainFactory;

	fn factory() -> Self::Factory {
		create_alloy_chain
	}
}

impl crate::ChainRegistry for Registry {}
