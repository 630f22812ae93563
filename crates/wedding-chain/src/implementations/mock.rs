//! In-process chain for tests and dry runs.
//!
//! `MockChain` accepts the same signed transactions a real node would, keeps
//! balances and nonces, mines blocks according to a [`MiningMode`] and
//! delivers logs to subscribers. Contract behaviour is supplied by an
//! optional [`MockExecutor`]; without one every transaction succeeds and
//! emits nothing.
//!
//! Failure injection: one-shot submission rejection, transport outage and
//! reverting read-only calls.

use crate::{ChainError, ChainInterface, LogSubscription};
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use wedding_types::{
	BlockInfo, ConfigSchema, Field, FieldType, LogFilter, RawLog, Schema, SignedTransaction,
	SubscriptionId, TransactionHash, TransactionReceipt, TransactionStatus, ValidationError,
};

/// Timestamp of block 0. Each later block is 12 seconds after its parent.
const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_TIME_SECS: u64 = 12;
const TRANSFER_GAS: u64 = 21_000;
const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

/// When accepted transactions get mined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningMode {
	/// Each transaction is mined in its own block during submission.
	Immediate,
	/// Transactions stay pending until [`MockChain::mine_pending`].
	Never,
	/// Each transaction is mined in its own block after the delay.
	Delayed(Duration),
}

/// A log emitted by a mocked contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockLog {
	pub address: Address,
	pub topics: Vec<B256>,
	pub data: Bytes,
}

/// Outcome of executing one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockExecution {
	pub success: bool,
	pub gas_used: u64,
	/// Only emitted when `success` is true.
	pub logs: Vec<MockLog>,
	/// Value moved by the contract itself, `(from, to, amount)`, applied after
	/// the transaction's own value transfer.
	pub transfers: Vec<(Address, Address, U256)>,
}

impl MockExecution {
	pub fn success(gas_used: u64) -> Self {
		Self {
			success: true,
			gas_used,
			logs: Vec::new(),
			transfers: Vec::new(),
		}
	}

	pub fn revert(gas_used: u64) -> Self {
		Self {
			success: false,
			..Self::success(gas_used)
		}
	}

	pub fn with_log(mut self, log: MockLog) -> Self {
		self.logs.push(log);
		self
	}

	pub fn with_transfer(mut self, from: Address, to: Address, amount: U256) -> Self {
		self.transfers.push((from, to, amount));
		self
	}
}

/// Contract behaviour plugged into a [`MockChain`].
pub trait MockExecutor: Send + Sync {
	/// Executes a mined transaction.
	fn execute(&self, tx: &SignedTransaction) -> MockExecution;

	/// Answers a read-only call. `Err` carries revert data.
	///
	/// `None` falls through to the chain's static call table.
	fn call(&self, _from: Option<Address>, _to: Address, _data: &Bytes) -> Option<Result<Bytes, Bytes>> {
		None
	}
}

type CallKey = (Address, [u8; 4]);

struct MockState {
	chain_id: u64,
	gas_price: u128,
	mining: MiningMode,
	block_number: u64,
	default_balance: U256,
	balances: HashMap<Address, U256>,
	nonces: HashMap<Address, u64>,
	pending: Vec<SignedTransaction>,
	receipts: HashMap<TransactionHash, TransactionReceipt>,
	subscriptions: HashMap<SubscriptionId, (LogFilter, mpsc::UnboundedSender<RawLog>)>,
	next_subscription: u64,
	calls: HashMap<CallKey, Result<Bytes, Bytes>>,
	executor: Option<Arc<dyn MockExecutor>>,
	reject_next: Option<String>,
	transport_down: bool,
	submissions: usize,
}

impl MockState {
	fn balance(&self, address: &Address) -> U256 {
		self.balances
			.get(address)
			.copied()
			.unwrap_or(self.default_balance)
	}

	fn debit(&mut self, address: Address, amount: U256) {
		let balance = self.balance(&address).saturating_sub(amount);
		self.balances.insert(address, balance);
	}

	fn credit(&mut self, address: Address, amount: U256) {
		let balance = self.balance(&address).saturating_add(amount);
		self.balances.insert(address, balance);
	}

	fn check_submission(&mut self, tx: &SignedTransaction) -> Result<(), ChainError> {
		if let Some(reason) = self.reject_next.take() {
			return Err(ChainError::RejectedByNode(reason));
		}

		if self.receipts.contains_key(&tx.hash) || self.pending.iter().any(|p| p.hash == tx.hash) {
			return Err(ChainError::RejectedByNode("already known".into()));
		}

		let expected = self.nonces.get(&tx.from).copied().unwrap_or(0);
		if tx.nonce < expected {
			return Err(ChainError::RejectedByNode(format!(
				"nonce too low: next nonce {}, tx nonce {}",
				expected, tx.nonce
			)));
		}
		if tx.nonce > expected {
			return Err(ChainError::RejectedByNode(format!(
				"nonce too high: next nonce {}, tx nonce {}",
				expected, tx.nonce
			)));
		}

		let max_cost = U256::from(tx.gas_limit) * U256::from(tx.gas_price) + tx.value;
		if self.balance(&tx.from) < max_cost {
			return Err(ChainError::RejectedByNode(
				"insufficient funds for gas * price + value".into(),
			));
		}

		Ok(())
	}

	/// Mines `txs` into one new block, then delivers its logs.
	fn mine(&mut self, txs: Vec<SignedTransaction>) -> u64 {
		self.block_number += 1;
		let block_number = self.block_number;
		let mut block_logs = Vec::new();

		for tx in txs {
			let execution = match &self.executor {
				Some(executor) => executor.execute(&tx),
				None if tx.input.is_empty() => MockExecution::success(TRANSFER_GAS),
				None => MockExecution::success(TRANSFER_GAS * 2),
			};
			let gas_used = execution.gas_used.min(tx.gas_limit);

			self.debit(tx.from, U256::from(gas_used) * U256::from(tx.gas_price));

			let mut logs = Vec::new();
			if execution.success {
				self.debit(tx.from, tx.value);
				self.credit(tx.to, tx.value);
				for (from, to, amount) in execution.transfers {
					self.debit(from, amount);
					self.credit(to, amount);
				}
				for log in execution.logs {
					logs.push(RawLog {
						address: log.address,
						topics: log.topics,
						data: log.data,
						block_number,
						log_index: block_logs.len() as u64 + logs.len() as u64,
						transaction_hash: tx.hash,
					});
				}
			}

			block_logs.extend(logs.iter().cloned());
			self.receipts.insert(
				tx.hash,
				TransactionReceipt {
					transaction_hash: tx.hash,
					block_number,
					gas_used,
					effective_gas_price: tx.gas_price,
					status: if execution.success {
						TransactionStatus::Success
					} else {
						TransactionStatus::Failure
					},
					logs,
				},
			);
		}

		self.dispatch(&block_logs);
		block_number
	}

	fn dispatch(&self, logs: &[RawLog]) {
		for log in logs {
			for (filter, sender) in self.subscriptions.values() {
				if filter.matches(log) {
					// A dropped receiver stays registered until unsubscribed.
					let _ = sender.send(log.clone());
				}
			}
		}
	}
}

/// In-process chain.
///
/// Cloning is cheap and every clone observes the same chain, so tests keep a
/// clone for inspection after handing one to a `ChainService`.
#[derive(Clone)]
pub struct MockChain {
	state: Arc<Mutex<MockState>>,
}

impl MockChain {
	/// An immediately-mining chain where every account starts with 10,000 ether.
	pub fn new(chain_id: u64) -> Self {
		Self {
			state: Arc::new(Mutex::new(MockState {
				chain_id,
				gas_price: 1_000_000_000,
				mining: MiningMode::Immediate,
				block_number: 0,
				default_balance: U256::from(10_000u64) * U256::from(ONE_ETHER),
				balances: HashMap::new(),
				nonces: HashMap::new(),
				pending: Vec::new(),
				receipts: HashMap::new(),
				subscriptions: HashMap::new(),
				next_subscription: 0,
				calls: HashMap::new(),
				executor: None,
				reject_next: None,
				transport_down: false,
				submissions: 0,
			})),
		}
	}

	fn state(&self) -> MutexGuard<'_, MockState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn online(&self) -> Result<MutexGuard<'_, MockState>, ChainError> {
		let state = self.state();
		if state.transport_down {
			return Err(ChainError::Transport("mock transport offline".into()));
		}
		Ok(state)
	}

	pub fn with_mining(self, mode: MiningMode) -> Self {
		self.set_mining(mode);
		self
	}

	pub fn with_gas_price(self, gas_price: u128) -> Self {
		self.state().gas_price = gas_price;
		self
	}

	pub fn with_default_balance(self, balance: U256) -> Self {
		self.state().default_balance = balance;
		self
	}

	pub fn with_executor(self, executor: Arc<dyn MockExecutor>) -> Self {
		self.state().executor = Some(executor);
		self
	}

	pub fn set_mining(&self, mode: MiningMode) {
		self.state().mining = mode;
	}

	pub fn set_balance(&self, address: Address, balance: U256) {
		self.state().balances.insert(address, balance);
	}

	pub fn balance_of(&self, address: Address) -> U256 {
		self.state().balance(&address)
	}

	/// Fixed answer for calls to `to` whose calldata starts with `selector`.
	pub fn set_call_response(&self, to: Address, selector: [u8; 4], response: Result<Bytes, Bytes>) {
		self.state().calls.insert((to, selector), response);
	}

	/// Makes the next submission fail with a JSON-RPC error.
	pub fn reject_next_submission(&self, reason: impl Into<String>) {
		self.state().reject_next = Some(reason.into());
	}

	/// While set, every request fails with a transport error.
	pub fn set_transport_failure(&self, down: bool) {
		self.state().transport_down = down;
	}

	/// Mines every pending transaction into one block.
	///
	/// Returns the number of transactions mined.
	pub fn mine_pending(&self) -> usize {
		let mut state = self.state();
		let pending = std::mem::take(&mut state.pending);
		let count = pending.len();
		if count > 0 {
			state.mine(pending);
		}
		count
	}

	/// Mines one block containing `logs`, as if emitted by a single transaction.
	///
	/// Returns the block number.
	pub fn emit_logs(&self, logs: Vec<MockLog>) -> u64 {
		let mut state = self.state();
		state.block_number += 1;
		let block_number = state.block_number;
		let transaction_hash = TransactionHash(B256::from(U256::from(block_number)));
		let raw: Vec<RawLog> = logs
			.into_iter()
			.enumerate()
			.map(|(i, log)| RawLog {
				address: log.address,
				topics: log.topics,
				data: log.data,
				block_number,
				log_index: i as u64,
				transaction_hash,
			})
			.collect();
		state.dispatch(&raw);
		block_number
	}

	pub fn pending_count(&self) -> usize {
		self.state().pending.len()
	}

	/// Submissions seen, including rejected ones.
	pub fn submission_count(&self) -> usize {
		self.state().submissions
	}

	/// Log subscriptions still registered.
	pub fn active_subscriptions(&self) -> usize {
		self.state().subscriptions.len()
	}
}

#[async_trait]
impl ChainInterface for MockChain {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MockChainSchema)
	}

	async fn block_number(&self) -> Result<u64, ChainError> {
		Ok(self.online()?.block_number)
	}

	async fn send_raw_transaction(
		&self,
		tx: &SignedTransaction,
	) -> Result<TransactionHash, ChainError> {
		let mut state = self.online()?;
		state.submissions += 1;
		state.check_submission(tx)?;
		*state.nonces.entry(tx.from).or_insert(0) += 1;

		match state.mining {
			MiningMode::Immediate => {
				state.mine(vec![tx.clone()]);
			},
			MiningMode::Never => state.pending.push(tx.clone()),
			MiningMode::Delayed(delay) => {
				state.pending.push(tx.clone());
				let chain = self.clone();
				let hash = tx.hash;
				tokio::spawn(async move {
					tokio::time::sleep(delay).await;
					let mut state = chain.state();
					if let Some(pos) = state.pending.iter().position(|p| p.hash == hash) {
						let tx = state.pending.remove(pos);
						state.mine(vec![tx]);
					}
				});
			},
		}

		Ok(tx.hash)
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, ChainError> {
		Ok(self.online()?.receipts.get(hash).cloned())
	}

	async fn get_block(&self, number: u64) -> Result<Option<BlockInfo>, ChainError> {
		let state = self.online()?;
		Ok((number <= state.block_number).then(|| BlockInfo {
			number,
			timestamp: GENESIS_TIMESTAMP + BLOCK_TIME_SECS * number,
		}))
	}

	async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
		Ok(self.online()?.balance(&address))
	}

	async fn get_nonce(&self, address: Address) -> Result<u64, ChainError> {
		Ok(self.online()?.nonces.get(&address).copied().unwrap_or(0))
	}

	async fn gas_price(&self) -> Result<u128, ChainError> {
		Ok(self.online()?.gas_price)
	}

	async fn chain_id(&self) -> Result<u64, ChainError> {
		Ok(self.online()?.chain_id)
	}

	async fn call(
		&self,
		from: Option<Address>,
		to: Address,
		data: Bytes,
	) -> Result<Bytes, ChainError> {
		let state = self.online()?;
		let from_executor = state
			.executor
			.as_ref()
			.and_then(|executor| executor.call(from, to, &data));

		let response = from_executor.or_else(|| {
			let selector = data.get(..4)?;
			let key = (to, [selector[0], selector[1], selector[2], selector[3]]);
			state.calls.get(&key).cloned()
		});

		match response {
			Some(Ok(output)) => Ok(output),
			Some(Err(revert)) => Err(ChainError::CallReverted {
				message: "execution reverted".into(),
				data: revert,
			}),
			None => Ok(Bytes::new()),
		}
	}

	async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription, ChainError> {
		let mut state = self.online()?;
		state.next_subscription += 1;
		let id = SubscriptionId(state.next_subscription);
		let (sender, receiver) = mpsc::unbounded_channel();
		state.subscriptions.insert(id, (filter, sender));
		Ok(LogSubscription { id, receiver })
	}

	fn unsubscribe(&self, id: SubscriptionId) -> bool {
		self.state().subscriptions.remove(&id).is_some()
	}

	fn active_subscriptions(&self) -> usize {
		self.state().subscriptions.len()
	}
}

/// Configuration schema for the mock chain.
pub struct MockChainSchema;

impl ConfigSchema for MockChainSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new(
					"chain_id",
					FieldType::Integer {
						min: Some(1),
						max: None,
					},
				),
				Field::new("mining", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some("immediate" | "never" | "delayed") => Ok(()),
						_ => Err("mining must be one of immediate, never, delayed".to_string()),
					}
				}),
				Field::new(
					"mining_delay_ms",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
				Field::new(
					"gas_price_wei",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
				Field::new(
					"default_balance_eth",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
			],
		);

		schema.validate(config)
	}
}

/// Factory function to create a mock chain from configuration.
///
/// Configuration parameters (all optional):
/// - `chain_id`: defaults to 1337
/// - `mining`: `immediate` (default), `never` or `delayed`
/// - `mining_delay_ms`: delay for `delayed` mining, defaults to 1000
/// - `gas_price_wei`: defaults to 1 gwei
/// - `default_balance_eth`: starting balance of every account, defaults to 10000
pub fn create_mock_chain(config: &toml::Value) -> Result<Box<dyn ChainInterface>, ChainError> {
	MockChainSchema
		.validate(config)
		.map_err(|e| ChainError::Configuration(format!("Invalid configuration: {}", e)))?;

	let int = |key: &str| config.get(key).and_then(|v| v.as_integer()).map(|v| v as u64);

	let mining = match config.get("mining").and_then(|v| v.as_str()) {
		Some("never") => MiningMode::Never,
		Some("delayed") => {
			MiningMode::Delayed(Duration::from_millis(int("mining_delay_ms").unwrap_or(1_000)))
		},
		_ => MiningMode::Immediate,
	};

	let mut chain = MockChain::new(int("chain_id").unwrap_or(1337)).with_mining(mining);
	if let Some(gas_price) = int("gas_price_wei") {
		chain = chain.with_gas_price(u128::from(gas_price));
	}
	if let Some(eth) = int("default_balance_eth") {
		chain = chain.with_default_balance(U256::from(eth) * U256::from(ONE_ETHER));
	}

	Ok(Box::new(chain))
}

/// Registry for the mock chain implementation.
pub struct Registry;

impl wedding_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "mock";
	type Factory = crate::ChainFactory;

	fn factory() -> Self::Factory {
		create_mock_chain
	}
}

impl crate::ChainRegistry for Registry {}
