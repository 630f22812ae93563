//! Decoded contract events.

use crate::{RawLog, TransactionHash};
use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256};

/// An event log decoded against its ABI definition.
///
/// Arguments keep their declaration order regardless of whether they were
/// indexed, so positional access matches the Solidity signature.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
	/// Event name, e.g. `WeddingAdded`.
	pub name: String,
	/// Emitting contract.
	pub address: Address,
	pub block_number: u64,
	pub log_index: u64,
	pub transaction_hash: TransactionHash,
	/// `(parameter name, value)` in declaration order.
	pub args: Vec<(String, DynSolValue)>,
}

impl DecodedEvent {
	/// Builds the envelope of a decoded event from the log it came from.
	pub fn from_log(name: impl Into<String>, log: &RawLog, args: Vec<(String, DynSolValue)>) -> Self {
		Self {
			name: name.into(),
			address: log.address,
			block_number: log.block_number,
			log_index: log.log_index,
			transaction_hash: log.transaction_hash,
			args,
		}
	}

	/// Argument by parameter name.
	pub fn get(&self, name: &str) -> Option<&DynSolValue> {
		self.args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
	}

	/// Argument by position.
	pub fn arg(&self, position: usize) -> Option<&DynSolValue> {
		self.args.get(position).map(|(_, v)| v)
	}

	pub fn address_arg(&self, name: &str) -> Option<Address> {
		self.get(name).and_then(DynSolValue::as_address)
	}

	pub fn uint_arg(&self, name: &str) -> Option<U256> {
		self.get(name).and_then(|v| v.as_uint()).map(|(value, _)| value)
	}

	/// Every address-typed argument, in declaration order.
	pub fn addresses(&self) -> Vec<Address> {
		self.args
			.iter()
			.filter_map(|(_, v)| v.as_address())
			.collect()
	}

	pub fn position(&self) -> (u64, u64) {
		(self.block_number, self.log_index)
	}
}
