//! Chain-level types for transaction submission and log delivery.
//!
//! These are the values that cross the boundary between the coordination core
//! and whichever JSON-RPC provider (real or in-process) sits underneath it.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction hash, always 32 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub B256);

impl TransactionHash {
	/// Returns the raw hash bytes.
	pub fn as_b256(&self) -> &B256 {
		&self.0
	}
}

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<B256> for TransactionHash {
	fn from(hash: B256) -> Self {
		Self(hash)
	}
}

/// Execution outcome recorded in a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
	Success,
	Failure,
}

/// A log exactly as the provider delivered it, before ABI decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
	/// Emitting contract.
	pub address: Address,
	/// Indexed topics; `topics[0]` is the event selector for non-anonymous events.
	pub topics: Vec<B256>,
	/// ABI-encoded non-indexed data.
	pub data: Bytes,
	/// Block that included the log.
	pub block_number: u64,
	/// Position of the log inside its block.
	pub log_index: u64,
	/// Transaction that emitted the log.
	pub transaction_hash: TransactionHash,
}

impl RawLog {
	/// Ordering key used to break ties between logs delivered together.
	pub fn position(&self) -> (u64, u64) {
		(self.block_number, self.log_index)
	}
}

/// Transaction receipt.
///
/// Immutable once obtained from the chain. `effective_gas_price` is carried so
/// the gas cost of a transaction can be computed from the receipt alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	pub transaction_hash: TransactionHash,
	pub block_number: u64,
	pub gas_used: u64,
	pub effective_gas_price: u128,
	pub status: TransactionStatus,
	/// Logs in emission order.
	pub logs: Vec<RawLog>,
}

impl TransactionReceipt {
	pub fn is_success(&self) -> bool {
		self.status == TransactionStatus::Success
	}

	/// Wei paid for gas: `gas_used * effective_gas_price`.
	pub fn gas_cost(&self) -> U256 {
		U256::from(self.gas_used) * U256::from(self.effective_gas_price)
	}
}

/// Minimal block information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
	pub number: u64,
	/// Unix timestamp in seconds.
	pub timestamp: u64,
}

/// Address + first-topic filter for a log subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogFilter {
	pub address: Address,
	pub topic0: B256,
}

impl LogFilter {
	pub fn new(address: Address, topic0: B256) -> Self {
		Self { address, topic0 }
	}

	pub fn matches(&self, log: &RawLog) -> bool {
		log.address == self.address && log.topics.first() == Some(&self.topic0)
	}
}

/// Identifier of a chain-level log subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "sub-{}", self.0)
	}
}

/// Per-call transaction options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOptions {
	pub gas_limit: u64,
	/// Gas price in wei; `None` asks the node.
	pub gas_price: Option<u128>,
	/// Wei attached to the call.
	pub value: U256,
}

impl CallOptions {
	pub fn new(gas_limit: u64) -> Self {
		Self {
			gas_limit,
			gas_price: None,
			value: U256::ZERO,
		}
	}

	pub fn with_value(mut self, value: U256) -> Self {
		self.value = value;
		self
	}

	pub fn with_gas_price(mut self, gas_price: u128) -> Self {
		self.gas_price = Some(gas_price);
		self
	}
}

/// A transaction that still needs nonce, chain id and signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
	pub to: Address,
	pub input: Bytes,
	pub options: CallOptions,
}

impl UnsignedTransaction {
	pub fn call(to: Address, input: impl Into<Bytes>, options: CallOptions) -> Self {
		Self {
			to,
			input: input.into(),
			options,
		}
	}

	/// Plain value transfer with no calldata.
	pub fn transfer(to: Address, value: U256, options: CallOptions) -> Self {
		Self {
			to,
			input: Bytes::new(),
			options: options.with_value(value),
		}
	}
}

/// A signed, EIP-2718 encoded transaction ready for `eth_sendRawTransaction`.
///
/// The decoded fields travel alongside the raw bytes so an in-process provider
/// can execute the transaction without re-decoding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
	pub hash: TransactionHash,
	pub raw: Bytes,
	pub from: Address,
	pub to: Address,
	pub value: U256,
	pub input: Bytes,
	pub nonce: u64,
	pub gas_limit: u64,
	pub gas_price: u128,
	pub chain_id: u64,
}

impl SignedTransaction {
	/// First four bytes of the calldata, if any.
	pub fn selector(&self) -> Option<[u8; 4]> {
		self.input.get(..4).map(|s| [s[0], s[1], s[2], s[3]])
	}
}
