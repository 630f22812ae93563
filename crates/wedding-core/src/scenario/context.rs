//! Named values produced by a scenario.

use super::ScenarioError;
use alloy_dyn_abi::DynSolValue;
use alloy_primitives::Address;
use std::collections::BTreeMap;
use std::sync::Arc;
use wedding_account::Identity;
use wedding_contract::ContractHandle;

/// Add-only bag of what a scenario created.
///
/// Re-inserting the same value under a key is accepted; a different value
/// is a [`ScenarioError::Context`].
#[derive(Debug, Clone, Default)]
pub struct ScenarioContext {
	identities: BTreeMap<String, Arc<Identity>>,
	contracts: BTreeMap<String, ContractHandle>,
	values: BTreeMap<String, DynSolValue>,
}

impl ScenarioContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert_identity(
		&mut self,
		key: impl Into<String>,
		identity: Arc<Identity>,
	) -> Result<(), ScenarioError> {
		let key = key.into();
		match self.identities.get(&key) {
			Some(existing) if existing.address() != identity.address() => {
				Err(conflict("identity", &key))
			},
			Some(_) => Ok(()),
			None => {
				self.identities.insert(key, identity);
				Ok(())
			},
		}
	}

	pub fn insert_contract(
		&mut self,
		key: impl Into<String>,
		contract: ContractHandle,
	) -> Result<(), ScenarioError> {
		let key = key.into();
		match self.contracts.get(&key) {
			Some(existing) if existing.address() != contract.address() => {
				Err(conflict("contract", &key))
			},
			Some(_) => Ok(()),
			None => {
				self.contracts.insert(key, contract);
				Ok(())
			},
		}
	}

	pub fn record(&mut self, key: impl Into<String>, value: DynSolValue) -> Result<(), ScenarioError> {
		let key = key.into();
		match self.values.get(&key) {
			Some(existing) if *existing != value => Err(conflict("value", &key)),
			Some(_) => Ok(()),
			None => {
				self.values.insert(key, value);
				Ok(())
			},
		}
	}

	pub fn identity(&self, key: &str) -> Result<&Arc<Identity>, ScenarioError> {
		self.identities.get(key).ok_or_else(|| missing("identity", key))
	}

	pub fn contract(&self, key: &str) -> Result<&ContractHandle, ScenarioError> {
		self.contracts.get(key).ok_or_else(|| missing("contract", key))
	}

	pub fn value(&self, key: &str) -> Result<&DynSolValue, ScenarioError> {
		self.values.get(key).ok_or_else(|| missing("value", key))
	}

	/// Address of the contract stored under `key`.
	pub fn contract_address(&self, key: &str) -> Result<Address, ScenarioError> {
		self.contract(key).map(ContractHandle::address)
	}
}

fn conflict(kind: &str, key: &str) -> ScenarioError {
	ScenarioError::Context(format!("{} '{}' is already set to a different value", kind, key))
}

fn missing(kind: &str, key: &str) -> ScenarioError {
	ScenarioError::Context(format!("no {} named '{}'", kind, key))
}
