//! A single submit / wait / assert step.

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256};
use std::sync::Arc;
use wedding_account::Identity;
use wedding_contract::ContractHandle;
use wedding_types::{format_ether, DecodedEvent, TransactionReceipt};

pub(crate) type Predicate = Box<dyn Fn(&DecodedEvent) -> bool + Send + Sync>;

pub(crate) enum Action {
	Call {
		contract: ContractHandle,
		method: String,
		args: Vec<DynSolValue>,
	},
	Transfer {
		from: Arc<Identity>,
		to: Address,
	},
}

pub(crate) struct ExpectedEvent {
	pub contract: ContractHandle,
	pub event: String,
	pub predicate: Predicate,
}

/// Expected balance movement of one address across a step.
///
/// `after == before + gain - loss`, minus the step's gas cost when the
/// address is the one paying for the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceCheck {
	pub label: String,
	pub address: Address,
	pub gain: U256,
	pub loss: U256,
	pub pays_gas: bool,
}

impl BalanceCheck {
	pub fn gains(label: impl Into<String>, address: Address, amount: U256) -> Self {
		Self {
			label: label.into(),
			address,
			gain: amount,
			loss: U256::ZERO,
			pays_gas: false,
		}
	}

	pub fn loses(label: impl Into<String>, address: Address, amount: U256) -> Self {
		Self {
			loss: amount,
			gain: U256::ZERO,
			..Self::gains(label, address, U256::ZERO)
		}
	}

	/// The address sent the transaction, so its gas comes off too.
	pub fn paying_gas(mut self) -> Self {
		self.pays_gas = true;
		self
	}

	/// Balance after the step, or `None` when the loss and gas exceed what
	/// the address held.
	pub fn expected(&self, before: U256, gas_cost: U256) -> Option<U256> {
		let gas = if self.pays_gas { gas_cost } else { U256::ZERO };
		before
			.checked_add(self.gain)?
			.checked_sub(self.loss)?
			.checked_sub(gas)
	}
}

/// One transaction plus what it must produce.
pub struct Step {
	pub(crate) name: String,
	pub(crate) action: Action,
	pub(crate) value: U256,
	pub(crate) expected_event: Option<ExpectedEvent>,
	pub(crate) balance_checks: Vec<BalanceCheck>,
}

impl Step {
	/// Calls `method` through `contract`, which must have a signer connected.
	pub fn call(
		name: impl Into<String>,
		contract: ContractHandle,
		method: impl Into<String>,
		args: Vec<DynSolValue>,
	) -> Self {
		Self::new(
			name,
			Action::Call {
				contract,
				method: method.into(),
				args,
			},
		)
	}

	/// Sends `value` from `from` to `to` with no calldata.
	pub fn transfer(name: impl Into<String>, from: Arc<Identity>, to: Address, value: U256) -> Self {
		Self::new(name, Action::Transfer { from, to }).with_value(value)
	}

	fn new(name: impl Into<String>, action: Action) -> Self {
		Self {
			name: name.into(),
			action,
			value: U256::ZERO,
			expected_event: None,
			balance_checks: Vec::new(),
		}
	}

	pub fn with_value(mut self, value: U256) -> Self {
		self.value = value;
		self
	}

	/// Waits for the first `event` on `contract` satisfying `predicate`.
	/// The wait starts before the transaction is submitted.
	pub fn expect_event<P>(mut self, contract: &ContractHandle, event: impl Into<String>, predicate: P) -> Self
	where
		P: Fn(&DecodedEvent) -> bool + Send + Sync + 'static,
	{
		self.expected_event = Some(ExpectedEvent {
			contract: contract.clone(),
			event: event.into(),
			predicate: Box::new(predicate),
		});
		self
	}

	pub fn check_balance(mut self, check: BalanceCheck) -> Self {
		self.balance_checks.push(check);
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn method(&self) -> &str {
		match &self.action {
			Action::Call { method, .. } => method,
			Action::Transfer { .. } => "transfer",
		}
	}

	/// Arguments as shown in reports.
	pub fn rendered_args(&self) -> String {
		match &self.action {
			Action::Call { args, .. } => {
				let mut rendered = render_args(args);
				if !self.value.is_zero() {
					rendered.push_str(&format!(" value={} ETH", format_ether(self.value)));
				}
				rendered
			},
			Action::Transfer { from, to } => format!(
				"{} -> {}, {} ETH",
				from.address(),
				to,
				format_ether(self.value)
			),
		}
	}
}

/// What a successful step produced.
#[derive(Debug, Clone)]
pub struct StepOutcome {
	pub receipt: TransactionReceipt,
	pub event: Option<DecodedEvent>,
}

pub(crate) fn render_args(args: &[DynSolValue]) -> String {
	args.iter().map(render_value).collect::<Vec<_>>().join(", ")
}

fn render_value(value: &DynSolValue) -> String {
	match value {
		DynSolValue::Address(address) => address.to_checksum(None),
		DynSolValue::Uint(value, _) => value.to_string(),
		DynSolValue::Int(value, _) => value.to_string(),
		DynSolValue::Bool(value) => value.to_string(),
		DynSolValue::String(value) => format!("{:?}", value),
		DynSolValue::Array(values) | DynSolValue::FixedArray(values) => {
			format!("[{}]", render_args(values))
		},
		DynSolValue::Tuple(values) => format!("({})", render_args(values)),
		other => format!("{:?}", other),
	}
}
