//! Test fixture: an in-memory WeddingManager / Wedding pair on the mock chain.

use crate::reporter::RecordingReporter;
use crate::scenario::{RunnerSettings, ScenarioRunner};
use crate::TransactionCoordinator;
use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, Revert, SolCall, SolError, SolEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use wedding_account::{Identity, WalletSet};
use wedding_chain::implementations::mock::{MockChain, MockExecution, MockExecutor, MockLog};
use wedding_chain::ChainService;
use wedding_contract::{bundled, ContractHandle};
use wedding_types::{SecretString, SignedTransaction};

sol! {
	function startWedding(string _p1Name, address _p2, string _p2Name);
	function weddingOf(address _partner);
	function updateVows(string _vows);
	function acceptProposal();
	function rejectProposal();
	function divorce();
	function updateWeddingPhoto(string _photoUri);
	function sendWeddingGift(string _message);
	function claimWeddingGifts();
	function stage();
	function partner1();
	function p1Answer();
	function p2Answer();
	function minGiftAmount();

	event WeddingAdded(address indexed wedding, address indexed partner1, address indexed partner2);
	event WeddingRemoved(address indexed wedding, address indexed partner1, address indexed partner2);
}

pub(crate) const MNEMONIC: &str = "test test test test test test test test test test test junk";
pub(crate) const MANAGER: Address = Address::repeat_byte(0x4d);
pub(crate) const FUNDED_IDENTITIES: u32 = 20;
const ONE_ETHER: u128 = 1_000_000_000_000_000_000;
const GAS_PER_CALL: u64 = 60_000;
const TRANSFER_GAS: u64 = 21_000;

pub(crate) const STAGE_INITIALIZED: u8 = 1;
pub(crate) const STAGE_IN_PROGRESS: u8 = 2;
pub(crate) const STAGE_MARRIED: u8 = 3;
const STAGE_DIVORCED: u8 = 4;

#[derive(Debug, Clone)]
pub(crate) struct FakeWedding {
	pub partner1: Address,
	pub partner2: Address,
	pub p1_answer: bool,
	pub p2_answer: bool,
	pub stage: u8,
	pub photo: Option<String>,
	pub gifts: U256,
}

#[derive(Debug, Clone, Default)]
struct FakeState {
	weddings: HashMap<Address, FakeWedding>,
	wedding_of: HashMap<Address, Address>,
	created: u64,
}

#[derive(Default)]
struct Effects {
	logs: Vec<MockLog>,
	transfers: Vec<(Address, Address, U256)>,
}

/// Contract behaviour for the mock chain, close enough to the deployed
/// contracts for the scenarios to run end to end.
pub(crate) struct FakeWeddings {
	manager: Address,
	min_gift: U256,
	state: Mutex<FakeState>,
}

impl FakeWeddings {
	pub const ALREADY_ENGAGED: &'static str = "partner already has a wedding";
	pub const NOT_A_PARTNER: &'static str = "only partners may do this";
	pub const NOT_MARRIED: &'static str = "wedding is not married";

	pub fn new(manager: Address) -> Self {
		Self {
			manager,
			min_gift: U256::from(ONE_ETHER / 100),
			state: Mutex::new(FakeState::default()),
		}
	}

	pub fn wedding(&self, address: Address) -> Option<FakeWedding> {
		self.lock().weddings.get(&address).cloned()
	}

	pub fn wedding_count(&self) -> usize {
		self.lock().weddings.len()
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
		self.state.lock().unwrap_or_else(|e| e.into_inner())
	}

	fn wedding_log(&self, data: alloy_primitives::LogData) -> MockLog {
		MockLog {
			address: self.manager,
			topics: data.topics().to_vec(),
			data: data.data,
		}
	}

	fn apply(
		&self,
		state: &mut FakeState,
		from: Address,
		to: Address,
		value: U256,
		data: &[u8],
	) -> Result<Effects, &'static str> {
		let selector: [u8; 4] = data
			.get(..4)
			.and_then(|s| s.try_into().ok())
			.ok_or("missing selector")?;
		let mut effects = Effects::default();

		if to == self.manager {
			if selector != startWeddingCall::SELECTOR {
				return Err("unknown manager method");
			}
			let call = startWeddingCall::abi_decode(data, true).map_err(|_| "bad calldata")?;
			if state.wedding_of.contains_key(&from) || state.wedding_of.contains_key(&call._p2) {
				return Err(Self::ALREADY_ENGAGED);
			}
			state.created += 1;
			let mut bytes = [0xee_u8; 20];
			bytes[12..].copy_from_slice(&state.created.to_be_bytes());
			let wedding = Address::from(bytes);

			state.weddings.insert(
				wedding,
				FakeWedding {
					partner1: from,
					partner2: call._p2,
					p1_answer: false,
					p2_answer: false,
					stage: STAGE_INITIALIZED,
					photo: None,
					gifts: U256::ZERO,
				},
			);
			state.wedding_of.insert(from, wedding);
			state.wedding_of.insert(call._p2, wedding);
			effects.logs.push(self.wedding_log(
				WeddingAdded {
					wedding,
					partner1: from,
					partner2: call._p2,
				}
				.encode_log_data(),
			));
			return Ok(effects);
		}

		let wedding = state.weddings.get_mut(&to).ok_or("unknown contract")?;
		let is_partner1 = from == wedding.partner1;
		let is_partner = is_partner1 || from == wedding.partner2;

		match selector {
			updateVowsCall::SELECTOR | acceptProposalCall::SELECTOR => {
				if !is_partner {
					return Err(Self::NOT_A_PARTNER);
				}
				if wedding.stage >= STAGE_MARRIED {
					return Err("already married");
				}
				if selector == acceptProposalCall::SELECTOR {
					if is_partner1 {
						wedding.p1_answer = true;
					} else {
						wedding.p2_answer = true;
					}
					wedding.stage = if wedding.p1_answer && wedding.p2_answer {
						STAGE_MARRIED
					} else {
						STAGE_IN_PROGRESS
					};
				}
			},
			rejectProposalCall::SELECTOR => {
				if !is_partner {
					return Err(Self::NOT_A_PARTNER);
				}
				if wedding.stage == STAGE_MARRIED {
					return Err("already married");
				}
				let removed = wedding.clone();
				self.remove(state, to, &removed, &mut effects);
			},
			divorceCall::SELECTOR => {
				if !is_partner {
					return Err(Self::NOT_A_PARTNER);
				}
				if wedding.stage != STAGE_MARRIED {
					return Err(Self::NOT_MARRIED);
				}
				if is_partner1 {
					wedding.p1_answer = false;
				} else {
					wedding.p2_answer = false;
				}
				if !wedding.p1_answer && !wedding.p2_answer {
					wedding.stage = STAGE_DIVORCED;
					let removed = wedding.clone();
					self.remove(state, to, &removed, &mut effects);
				}
			},
			updateWeddingPhotoCall::SELECTOR => {
				if !is_partner {
					return Err(Self::NOT_A_PARTNER);
				}
				if wedding.stage != STAGE_MARRIED {
					return Err(Self::NOT_MARRIED);
				}
				let call = updateWeddingPhotoCall::abi_decode(data, true).map_err(|_| "bad calldata")?;
				wedding.photo = Some(call._photoUri);
			},
			sendWeddingGiftCall::SELECTOR => {
				if wedding.stage != STAGE_MARRIED {
					return Err(Self::NOT_MARRIED);
				}
				if value < self.min_gift {
					return Err("gift below minimum");
				}
				wedding.gifts += value;
			},
			claimWeddingGiftsCall::SELECTOR => {
				if !is_partner {
					return Err(Self::NOT_A_PARTNER);
				}
				if wedding.stage != STAGE_MARRIED {
					return Err(Self::NOT_MARRIED);
				}
				effects.transfers.push((to, from, wedding.gifts));
				wedding.gifts = U256::ZERO;
			},
			_ => return Err("unknown wedding method"),
		}
		Ok(effects)
	}

	fn remove(&self, state: &mut FakeState, address: Address, wedding: &FakeWedding, effects: &mut Effects) {
		state.weddings.remove(&address);
		state.wedding_of.remove(&wedding.partner1);
		state.wedding_of.remove(&wedding.partner2);
		effects.logs.push(self.wedding_log(
			WeddingRemoved {
				wedding: address,
				partner1: wedding.partner1,
				partner2: wedding.partner2,
			}
			.encode_log_data(),
		));
	}

	fn view(&self, to: Address, data: &[u8]) -> Option<Result<DynSolValue, &'static str>> {
		let selector: [u8; 4] = data.get(..4)?.try_into().ok()?;
		let state = self.lock();

		if to == self.manager && selector == weddingOfCall::SELECTOR {
			let partner = Address::from_slice(data.get(16..36)?);
			let wedding = state.wedding_of.get(&partner).copied().unwrap_or_default();
			return Some(Ok(DynSolValue::Address(wedding)));
		}

		let wedding = state.weddings.get(&to);
		let value = match selector {
			stageCall::SELECTOR => {
				let stage = wedding.map(|w| w.stage).unwrap_or_default();
				DynSolValue::Uint(U256::from(stage), 8)
			},
			partner1Call::SELECTOR => DynSolValue::Address(wedding.map(|w| w.partner1).unwrap_or_default()),
			p1AnswerCall::SELECTOR => DynSolValue::Bool(wedding.is_some_and(|w| w.p1_answer)),
			p2AnswerCall::SELECTOR => DynSolValue::Bool(wedding.is_some_and(|w| w.p2_answer)),
			minGiftAmountCall::SELECTOR => DynSolValue::Uint(self.min_gift, 256),
			_ => return None,
		};
		Some(Ok(value))
	}
}

fn revert_data(reason: &str) -> Bytes {
	Revert {
		reason: reason.to_string(),
	}
	.abi_encode()
	.into()
}

impl MockExecutor for FakeWeddings {
	fn execute(&self, tx: &SignedTransaction) -> MockExecution {
		let mut state = self.lock();
		let is_contract = tx.to == self.manager || state.weddings.contains_key(&tx.to);
		if tx.input.is_empty() && !is_contract {
			return MockExecution::success(TRANSFER_GAS);
		}

		let mut next = state.clone();
		match self.apply(&mut next, tx.from, tx.to, tx.value, &tx.input) {
			Ok(effects) => {
				*state = next;
				let mut execution = MockExecution::success(GAS_PER_CALL);
				execution.logs = effects.logs;
				execution.transfers = effects.transfers;
				execution
			},
			Err(_) => MockExecution::revert(GAS_PER_CALL),
		}
	}

	fn call(&self, from: Option<Address>, to: Address, data: &Bytes) -> Option<Result<Bytes, Bytes>> {
		if let Some(view) = self.view(to, data) {
			return Some(
				view.map(|value| value.abi_encode().into())
					.map_err(revert_data),
			);
		}

		const MUTATING: [[u8; 4]; 8] = [
			startWeddingCall::SELECTOR,
			updateVowsCall::SELECTOR,
			acceptProposalCall::SELECTOR,
			rejectProposalCall::SELECTOR,
			divorceCall::SELECTOR,
			updateWeddingPhotoCall::SELECTOR,
			sendWeddingGiftCall::SELECTOR,
			claimWeddingGiftsCall::SELECTOR,
		];
		let selector = data.get(..4)?;
		if !MUTATING.iter().any(|known| known[..] == *selector) {
			return None;
		}

		// Replays of state-changing calls run against a scratch copy.
		let mut scratch = self.lock().clone();
		Some(
			self.apply(&mut scratch, from.unwrap_or_default(), to, U256::ZERO, data)
				.map(|_| Bytes::new())
				.map_err(revert_data),
		)
	}
}

fn wallets() -> Arc<WalletSet> {
	static WALLETS: OnceLock<Arc<WalletSet>> = OnceLock::new();
	WALLETS
		.get_or_init(|| Arc::new(WalletSet::new(Some(SecretString::from(MNEMONIC))).unwrap()))
		.clone()
}

pub(crate) struct Fixture {
	pub mock: MockChain,
	pub chain: Arc<ChainService>,
	pub wallets: Arc<WalletSet>,
	pub manager: ContractHandle,
	pub coordinator: TransactionCoordinator,
	pub weddings: Arc<FakeWeddings>,
}

impl Fixture {
	pub fn identity(&self, index: u32) -> Arc<Identity> {
		self.wallets.identity(index).unwrap()
	}

	pub fn settings(&self) -> RunnerSettings {
		RunnerSettings {
			gas_limit: 5_000_000,
			gas_price: None,
			confirmation_timeout: Duration::from_secs(3),
			event_timeout: Duration::from_secs(3),
			poll_interval: Duration::from_millis(10),
		}
	}

	pub fn runner(&self, settings: RunnerSettings) -> (ScenarioRunner, Arc<RecordingReporter>) {
		let reporter = Arc::new(RecordingReporter::default());
		let runner = ScenarioRunner::new(
			self.chain.clone(),
			self.wallets.clone(),
			self.manager.clone(),
			Arc::new(bundled::wedding().unwrap().abi),
			settings,
			reporter.clone(),
		);
		(runner, reporter)
	}
}

/// Wires `mock` to a fresh [`FakeWeddings`] and funds the first
/// [`FUNDED_IDENTITIES`] identities with 100 ether each. Every other address
/// starts empty.
pub(crate) fn fixture(mock: MockChain) -> Fixture {
	let weddings = Arc::new(FakeWeddings::new(MANAGER));
	let mock = mock
		.with_default_balance(U256::ZERO)
		.with_executor(weddings.clone());

	let wallets = wallets();
	for identity in wallets.identities(FUNDED_IDENTITIES).unwrap() {
		mock.set_balance(identity.address(), U256::from(100 * ONE_ETHER));
	}

	let chain = Arc::new(ChainService::new(Box::new(mock.clone())));
	let manager = ContractHandle::new(
		"WeddingManager",
		MANAGER,
		Arc::new(bundled::wedding_manager().unwrap().abi),
		chain.clone(),
	);
	let coordinator = TransactionCoordinator::new(chain.clone(), Duration::from_millis(10));

	Fixture {
		mock,
		chain,
		wallets,
		manager,
		coordinator,
		weddings,
	}
}
