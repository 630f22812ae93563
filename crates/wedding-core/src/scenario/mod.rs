//! Scenario execution.
//!
//! A scenario is a strictly sequential list of [`Step`]s. Each step starts
//! its event wait, submits, resolves the receipt, collects the event and
//! checks balances. The first failing step ends the scenario; nothing is
//! compensated.

mod context;
mod step;
mod wedding;

pub use context::ScenarioContext;
pub use step::{BalanceCheck, Step, StepOutcome};
pub use wedding::{
	BreakupOutcome, WeddingKind, GIFTER_INDEX, GIFT_MESSAGE, MAN_NAMES, PHOTO_URL, VOWS,
	WOMAN_NAMES,
};

use crate::{CoordinationError, EventWaiter, Reporter, TransactionCoordinator};
use alloy_dyn_abi::DynSolValue;
use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, U256};
use step::Action;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::instrument;
use wedding_account::{Identity, WalletSet};
use wedding_chain::ChainService;
use wedding_config::Config;
use wedding_contract::ContractHandle;
use wedding_types::{format_ether, AbortSignal, CallOptions};

/// Errors that end a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
	#[error("Step '{step}' failed calling {method}({args}): {source}")]
	Step {
		step: String,
		method: String,
		args: String,
		source: CoordinationError,
	},
	#[error("Check '{check}' failed: expected {expected}, got {actual}")]
	Assertion {
		check: String,
		expected: String,
		actual: String,
	},
	#[error("Configuration error: {0}")]
	Configuration(String),
	#[error("Context error: {0}")]
	Context(String),
}

impl ScenarioError {
	/// The coordination failure behind a failed step, if any.
	pub fn coordination(&self) -> Option<&CoordinationError> {
		match self {
			Self::Step { source, .. } => Some(source),
			_ => None,
		}
	}
}

/// Transaction and timing settings shared by every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
	pub gas_limit: u64,
	/// Fixed gas price in wei; `None` asks the node.
	pub gas_price: Option<u128>,
	/// Budget from submission to receipt.
	pub confirmation_timeout: Duration,
	/// Budget for a step's event, counted from the same start as the
	/// confirmation budget.
	pub event_timeout: Duration,
	pub poll_interval: Duration,
}

impl RunnerSettings {
	pub fn from_config(config: &Config) -> Self {
		Self {
			gas_limit: config.transactions.gas_limit,
			gas_price: config.gas_price_wei(),
			confirmation_timeout: config.confirmation_timeout(),
			event_timeout: config.event_timeout(),
			poll_interval: config.receipt_poll_interval(),
		}
	}
}

/// Runs steps and the wedding scenarios built from them.
pub struct ScenarioRunner {
	chain: Arc<ChainService>,
	wallets: Arc<WalletSet>,
	manager: ContractHandle,
	proxy: Option<ContractHandle>,
	wedding_abi: Arc<JsonAbi>,
	coordinator: TransactionCoordinator,
	waiter: EventWaiter,
	settings: RunnerSettings,
	reporter: Arc<dyn Reporter>,
	abort: AbortSignal,
}

impl ScenarioRunner {
	pub fn new(
		chain: Arc<ChainService>,
		wallets: Arc<WalletSet>,
		manager: ContractHandle,
		wedding_abi: Arc<JsonAbi>,
		settings: RunnerSettings,
		reporter: Arc<dyn Reporter>,
	) -> Self {
		Self {
			coordinator: TransactionCoordinator::new(chain.clone(), settings.poll_interval),
			waiter: EventWaiter::default(),
			chain,
			wallets,
			manager,
			proxy: None,
			wedding_abi,
			settings,
			reporter,
			abort: AbortSignal::never(),
		}
	}

	/// Ends every outstanding wait when `abort` fires.
	pub fn with_abort(mut self, abort: AbortSignal) -> Self {
		self.waiter = EventWaiter::new(abort.clone());
		self.abort = abort;
		self
	}

	/// Attaches the UpgradeableProxy view of the manager address.
	pub fn with_proxy(mut self, proxy: ContractHandle) -> Self {
		self.proxy = Some(proxy);
		self
	}

	pub fn chain(&self) -> &Arc<ChainService> {
		&self.chain
	}

	pub fn coordinator(&self) -> &TransactionCoordinator {
		&self.coordinator
	}

	pub fn settings(&self) -> &RunnerSettings {
		&self.settings
	}

	/// The WeddingManager proxy, without a signer.
	pub fn manager(&self) -> &ContractHandle {
		&self.manager
	}

	/// The WeddingManager address seen through the UpgradeableProxy ABI.
	pub fn proxy(&self) -> Option<&ContractHandle> {
		self.proxy.as_ref()
	}

	/// Implementation the manager proxy currently delegates to, if the proxy
	/// artifact is configured.
	pub async fn manager_master(&self) -> Result<Option<Address>, ScenarioError> {
		let Some(proxy) = &self.proxy else {
			return Ok(None);
		};
		let master = self.read(proxy, "masterContract", &[]).await?;
		master
			.as_address()
			.map(Some)
			.ok_or_else(|| ScenarioError::Context("masterContract is not an address".into()))
	}

	/// A Wedding contract at `address`, without a signer.
	pub fn wedding(&self, address: Address) -> ContractHandle {
		ContractHandle::new("Wedding", address, self.wedding_abi.clone(), self.chain.clone())
	}

	pub fn identity(&self, index: u32) -> Result<Arc<Identity>, ScenarioError> {
		self.wallets
			.identity(index)
			.map_err(|e| ScenarioError::Configuration(e.to_string()))
	}

	fn options(&self, value: U256) -> CallOptions {
		let options = CallOptions::new(self.settings.gas_limit).with_value(value);
		match self.settings.gas_price {
			Some(price) => options.with_gas_price(price),
			None => options,
		}
	}

	/// Read-only call returning the first output.
	pub async fn read(
		&self,
		contract: &ContractHandle,
		method: &str,
		args: &[DynSolValue],
	) -> Result<DynSolValue, ScenarioError> {
		contract
			.call_single(method, args)
			.await
			.map_err(|e| ScenarioError::Step {
				step: format!("read {}", contract.name()),
				method: method.to_string(),
				args: step::render_args(args),
				source: CoordinationError::Contract(e),
			})
	}

	pub async fn balance(&self, address: Address) -> Result<U256, ScenarioError> {
		self.chain
			.get_balance(address)
			.await
			.map_err(|e| ScenarioError::Step {
				step: "read balance".into(),
				method: "eth_getBalance".into(),
				args: address.to_string(),
				source: CoordinationError::Transport(e.to_string()),
			})
	}

	/// Runs one step and reports its outcome.
	#[instrument(skip_all, fields(step = %step.name()))]
	pub async fn run_step(&self, step: Step) -> Result<StepOutcome, ScenarioError> {
		let method = step.method().to_string();
		let args = step.rendered_args();
		let name = step.name().to_string();

		self.reporter.step_started(&name, &method, &args);
		let result = self.execute(step, &method, &args).await;
		match &result {
			Ok(outcome) => self.reporter.step_succeeded(&name, &outcome.receipt),
			Err(e) => self.reporter.step_failed(&name, e),
		}
		result
	}

	async fn execute(&self, step: Step, method: &str, args: &str) -> Result<StepOutcome, ScenarioError> {
		let Step {
			name,
			action,
			value,
			expected_event,
			balance_checks,
		} = step;
		let fail = |source: CoordinationError| ScenarioError::Step {
			step: name.clone(),
			method: method.to_string(),
			args: args.to_string(),
			source,
		};

		let started = Instant::now();
		let mut before = Vec::with_capacity(balance_checks.len());
		for check in &balance_checks {
			before.push(self.balance(check.address).await?);
		}

		let pending = match expected_event {
			Some(expected) => Some(
				self.waiter
					.start(
						&expected.contract,
						&expected.event,
						expected.predicate,
						started + self.settings.event_timeout,
					)
					.await
					.map_err(&fail)?,
			),
			None => None,
		};

		let deadline = started + self.settings.confirmation_timeout;
		let options = self.options(value);
		let submitted = match &action {
			Action::Call {
				contract,
				method,
				args,
			} => {
				self.coordinator
					.submit_and_wait_until(contract, method, args, options, deadline, self.abort.clone())
					.await
			},
			Action::Transfer { from, to } => {
				self.coordinator
					.transfer_and_wait(from, *to, value, options, deadline, self.abort.clone())
					.await
			},
		};

		let receipt = match submitted {
			Ok(receipt) => receipt,
			Err(e) => {
				// The submission error is the one reported, never the wait's.
				if let Some(pending) = pending {
					pending.cancel();
					let _ = pending.outcome().await;
				}
				return Err(fail(e));
			},
		};

		let event = match pending {
			Some(pending) => Some(pending.outcome().await.map_err(&fail)?),
			None => None,
		};

		let gas_cost = receipt.gas_cost();
		for (check, before) in balance_checks.iter().zip(before) {
			let actual = self.balance(check.address).await?;
			let Some(expected) = check.expected(before, gas_cost) else {
				let expected = format!(
					"{} - {} - gas {} underflows",
					before, check.loss, gas_cost
				);
				self.reporter
					.check(&check.label, "underflow", &format_ether(actual), false);
				return Err(ScenarioError::Assertion {
					check: check.label.clone(),
					expected,
					actual: actual.to_string(),
				});
			};
			let passed = actual == expected;
			self.reporter
				.check(&check.label, &format_ether(expected), &format_ether(actual), passed);
			if !passed {
				return Err(ScenarioError::Assertion {
					check: check.label.clone(),
					expected: expected.to_string(),
					actual: actual.to_string(),
				});
			}
		}

		Ok(StepOutcome { receipt, event })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing;
	use crate::Report;
	use wedding_chain::implementations::mock::{MiningMode, MockChain};

	#[tokio::test]
	async fn test_failed_check_is_reported_not_panicked() {
		let fixture = testing::fixture(MockChain::new(1));
		let (runner, reporter) = fixture.runner(fixture.settings());
		let sender = fixture.identity(0);
		let recipient = Address::repeat_byte(0x42);

		let step = Step::transfer("overclaim", sender, recipient, U256::from(5u64)).check_balance(
			BalanceCheck::gains("recipient", recipient, U256::from(6u64)),
		);
		let result = runner.run_step(step).await;

		assert!(matches!(result, Err(ScenarioError::Assertion { ref check, .. }) if check == "recipient"));
		assert!(reporter.failures().iter().any(|r| matches!(
			r,
			Report::Check { passed: false, label, .. } if label == "recipient"
		)));
	}

	#[tokio::test]
	async fn test_underflowing_check_is_its_own_failure() {
		let fixture = testing::fixture(MockChain::new(1));
		let (runner, reporter) = fixture.runner(fixture.settings());
		let sender = fixture.identity(0);
		let recipient = Address::repeat_byte(0x43);

		let step = Step::transfer("drain", sender, recipient, U256::from(5u64)).check_balance(
			BalanceCheck::loses("recipient", recipient, U256::from(10u64)),
		);
		let result = runner.run_step(step).await;

		assert!(matches!(
			result,
			Err(ScenarioError::Assertion { ref check, ref expected, ref actual })
				if check == "recipient" && expected.contains("underflows") && actual == "5"
		));
		assert!(reporter.failures().iter().any(|r| matches!(
			r,
			Report::Check { passed: false, label, expected, .. }
				if label == "recipient" && expected == "underflow"
		)));
	}

	#[tokio::test]
	async fn test_step_failure_names_method_and_args() {
		let fixture = testing::fixture(MockChain::new(1).with_mining(MiningMode::Never));
		let settings = RunnerSettings {
			confirmation_timeout: Duration::from_millis(100),
			..fixture.settings()
		};
		let (runner, reporter) = fixture.runner(settings);

		let step = Step::transfer(
			"fund",
			fixture.identity(0),
			Address::repeat_byte(0x42),
			U256::from(7u64),
		);
		let err = runner.run_step(step).await.unwrap_err();

		let message = err.to_string();
		assert!(message.contains("'fund'"), "{}", message);
		assert!(message.contains("transfer("), "{}", message);
		assert!(matches!(
			err.coordination(),
			Some(CoordinationError::ConfirmationTimeout { .. })
		));
		assert!(matches!(reporter.reports().last(), Some(Report::Failed { step, .. }) if step == "fund"));
	}

	#[tokio::test]
	async fn test_manager_master_through_proxy() {
		let fixture = testing::fixture(MockChain::new(1));
		let (runner, _) = fixture.runner(fixture.settings());
		assert_eq!(runner.manager_master().await.unwrap(), None);

		let proxy = ContractHandle::new(
			"UpgradeableProxy",
			testing::MANAGER,
			Arc::new(wedding_contract::bundled::upgradeable_proxy().unwrap().abi),
			fixture.chain.clone(),
		);
		let selector = proxy.function("masterContract", 0).unwrap().selector();
		let master = Address::repeat_byte(0x0a);
		fixture.mock.set_call_response(
			testing::MANAGER,
			selector.0,
			Ok(DynSolValue::Address(master).abi_encode().into()),
		);

		let runner = runner.with_proxy(proxy);
		assert_eq!(runner.manager_master().await.unwrap(), Some(master));
	}

	#[test]
	fn test_settings_from_config() {
		let config: Config = r#"
			[runner]
			id = "wedding-generator"
			network = "mainnet"

			[networks.mainnet]
			implementation = "mock"

			[wallet]
			mnemonic = "test test test test test test test test test test test junk"

			[transactions]
			gas_limit = 4000000
			gas_price_gwei = 2

			[artifacts]
			wedding_manager = "build/WeddingManager.json"
			wedding = "build/Wedding.json"
			deployments = "deployments.json"
		"#
		.parse()
		.unwrap();

		let settings = RunnerSettings::from_config(&config);
		assert_eq!(settings.gas_limit, 4_000_000);
		assert_eq!(settings.gas_price, Some(2_000_000_000));
		assert_eq!(settings.confirmation_timeout, Duration::from_secs(300));
		assert_eq!(settings.event_timeout, settings.confirmation_timeout);
	}
}
