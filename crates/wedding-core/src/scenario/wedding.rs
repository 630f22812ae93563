//! Wedding workflows.
//!
//! Each `create_*` scenario extends the previous one by a few steps, so a
//! married wedding with claimed gifts runs the whole lifecycle from
//! `startWedding` to `claimWeddingGifts`.

use super::{BalanceCheck, ScenarioContext, ScenarioError, ScenarioRunner, Step, StepOutcome};
use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256};
use rand::seq::SliceRandom;
use tracing::instrument;

pub const MAN_NAMES: [&str; 7] = ["bob", "jeff", "thomas", "heikki", "carl", "marko", "jonathan"];
pub const WOMAN_NAMES: [&str; 7] = [
	"alice", "jessica", "susanna", "mirko", "anukka", "sandra", "shauna",
];
pub const VOWS: &str = "I will do stuff and things";
pub const PHOTO_URL: &str = "https://images.pexels.com/photos/2253870/pexels-photo-2253870.jpeg?auto=compress&cs=tinysrgb&h=750&w=1260";
pub const GIFT_MESSAGE: &str = "good luck buddy";
/// Identity that sends gifts in the gift scenarios.
pub const GIFTER_INDEX: u32 = 19;

const STAGE_MARRIED: u64 = 3;

/// How far a created wedding gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeddingKind {
	Engaged,
	InProgress,
	Married,
	MarriedWithPhoto,
	MarriedWithGifts,
	MarriedWithClaimedGifts,
}

impl WeddingKind {
	pub const ALL: [WeddingKind; 6] = [
		WeddingKind::Engaged,
		WeddingKind::InProgress,
		WeddingKind::Married,
		WeddingKind::MarriedWithPhoto,
		WeddingKind::MarriedWithGifts,
		WeddingKind::MarriedWithClaimedGifts,
	];
}

/// What [`ScenarioRunner::divorce_reject_wedding`] did for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakupOutcome {
	/// The identity has no wedding.
	NoWedding,
	/// The proposal was rejected before marriage.
	Rejected(Address),
	/// Married, and this partner already divorced.
	AlreadyDivorced(Address),
	/// Married; this partner has now divorced.
	Divorced(Address),
}

fn random_names() -> (String, String) {
	let mut rng = rand::thread_rng();
	let man = MAN_NAMES.choose(&mut rng).copied().unwrap_or(MAN_NAMES[0]);
	let woman = WOMAN_NAMES.choose(&mut rng).copied().unwrap_or(WOMAN_NAMES[0]);
	(man.to_string(), woman.to_string())
}

fn expect_address(value: DynSolValue, what: &str) -> Result<Address, ScenarioError> {
	value
		.as_address()
		.ok_or_else(|| ScenarioError::Context(format!("{} is not an address", what)))
}

fn expect_uint(value: DynSolValue, what: &str) -> Result<U256, ScenarioError> {
	value
		.as_uint()
		.map(|(value, _)| value)
		.ok_or_else(|| ScenarioError::Context(format!("{} is not an unsigned integer", what)))
}

fn expect_bool(value: DynSolValue, what: &str) -> Result<bool, ScenarioError> {
	value
		.as_bool()
		.ok_or_else(|| ScenarioError::Context(format!("{} is not a bool", what)))
}

impl ScenarioRunner {
	/// Proposes a wedding from `creator` to `acceptor`.
	///
	/// The context holds `creator`, `acceptor`, the `wedding` contract and the
	/// `partner1` / `partner2` addresses from the `WeddingAdded` event.
	#[instrument(skip(self))]
	pub async fn create_wedding(
		&self,
		creator: u32,
		acceptor: u32,
	) -> Result<ScenarioContext, ScenarioError> {
		let creator = self.identity(creator)?;
		let acceptor = self.identity(acceptor)?;
		let (man, woman) = random_names();

		let creator_address = creator.address();
		let step = Step::call(
			"start wedding",
			self.manager.connect(creator.clone()),
			"startWedding",
			vec![
				DynSolValue::String(man),
				DynSolValue::Address(acceptor.address()),
				DynSolValue::String(woman),
			],
		)
		.expect_event(&self.manager, "WeddingAdded", move |event| {
			event.address_arg("partner1") == Some(creator_address)
		});

		let outcome = self.run_step(step).await?;
		let event = outcome
			.event
			.ok_or_else(|| ScenarioError::Context("start wedding produced no event".into()))?;
		let field = |name: &str| {
			event
				.address_arg(name)
				.ok_or_else(|| ScenarioError::Context(format!("WeddingAdded has no '{}'", name)))
		};
		let wedding = field("wedding")?;

		let mut context = ScenarioContext::new();
		context.record("partner1", DynSolValue::Address(field("partner1")?))?;
		context.record("partner2", DynSolValue::Address(field("partner2")?))?;
		context.insert_contract("wedding", self.wedding(wedding))?;
		context.insert_identity("creator", creator)?;
		context.insert_identity("acceptor", acceptor)?;

		self.reporter.note(&format!(
			"Wedding {} created by {}",
			wedding, creator_address
		));
		Ok(context)
	}

	/// A wedding the creator has accepted.
	pub async fn create_in_progress_wedding(
		&self,
		creator: u32,
		acceptor: u32,
	) -> Result<ScenarioContext, ScenarioError> {
		let context = self.create_wedding(creator, acceptor).await?;
		self.vow_and_accept(&context, "creator").await?;
		Ok(context)
	}

	/// A wedding both partners have accepted.
	pub async fn create_married_wedding(
		&self,
		creator: u32,
		acceptor: u32,
	) -> Result<ScenarioContext, ScenarioError> {
		let context = self.create_in_progress_wedding(creator, acceptor).await?;
		self.vow_and_accept(&context, "acceptor").await?;
		Ok(context)
	}

	pub async fn create_married_wedding_with_photo(
		&self,
		creator: u32,
		acceptor: u32,
	) -> Result<ScenarioContext, ScenarioError> {
		let context = self.create_married_wedding(creator, acceptor).await?;
		let wedding = context
			.contract("wedding")?
			.connect(context.identity("creator")?.clone());

		self.run_step(Step::call(
			"creator updates photo",
			wedding,
			"updateWeddingPhoto",
			vec![DynSolValue::String(PHOTO_URL.into())],
		))
		.await?;
		Ok(context)
	}

	/// A wedding with a photo that then received a gift from [`GIFTER_INDEX`].
	pub async fn create_married_wedding_with_gifts(
		&self,
		creator: u32,
		acceptor: u32,
	) -> Result<ScenarioContext, ScenarioError> {
		let context = self.create_married_wedding_with_photo(creator, acceptor).await?;
		self.send_wedding_gift(GIFTER_INDEX, context.contract_address("wedding")?, GIFT_MESSAGE)
			.await?;
		Ok(context)
	}

	/// A gifted wedding whose creator then claimed the whole balance.
	pub async fn create_married_wedding_with_claimed_gifts(
		&self,
		creator: u32,
		acceptor: u32,
	) -> Result<ScenarioContext, ScenarioError> {
		let context = self.create_married_wedding_with_gifts(creator, acceptor).await?;
		let claimer = context.identity("creator")?.clone();
		let wedding = context.contract("wedding")?.connect(claimer.clone());
		let pot = self.balance(wedding.address()).await?;

		self.run_step(
			Step::call("creator claims gifts", wedding.clone(), "claimWeddingGifts", vec![])
				.check_balance(BalanceCheck::loses("wedding balance", wedding.address(), pot))
				.check_balance(
					BalanceCheck::gains("claimer balance", claimer.address(), pot).paying_gas(),
				),
		)
		.await?;
		Ok(context)
	}

	pub async fn create_wedding_of_kind(
		&self,
		kind: WeddingKind,
		creator: u32,
		acceptor: u32,
	) -> Result<ScenarioContext, ScenarioError> {
		match kind {
			WeddingKind::Engaged => self.create_wedding(creator, acceptor).await,
			WeddingKind::InProgress => self.create_in_progress_wedding(creator, acceptor).await,
			WeddingKind::Married => self.create_married_wedding(creator, acceptor).await,
			WeddingKind::MarriedWithPhoto => {
				self.create_married_wedding_with_photo(creator, acceptor).await
			},
			WeddingKind::MarriedWithGifts => {
				self.create_married_wedding_with_gifts(creator, acceptor).await
			},
			WeddingKind::MarriedWithClaimedGifts => {
				self.create_married_wedding_with_claimed_gifts(creator, acceptor)
					.await
			},
		}
	}

	/// Sends `minGiftAmount()` to `wedding` from `gifter`.
	#[instrument(skip(self, message))]
	pub async fn send_wedding_gift(
		&self,
		gifter: u32,
		wedding: Address,
		message: &str,
	) -> Result<StepOutcome, ScenarioError> {
		let gifter = self.identity(gifter)?;
		let contract = self.wedding(wedding);
		let amount = expect_uint(
			self.read(&contract, "minGiftAmount", &[]).await?,
			"minGiftAmount",
		)?;

		self.run_step(
			Step::call(
				"send wedding gift",
				contract.connect(gifter.clone()),
				"sendWeddingGift",
				vec![DynSolValue::String(message.into())],
			)
			.with_value(amount)
			.check_balance(BalanceCheck::loses("gifter balance", gifter.address(), amount).paying_gas())
			.check_balance(BalanceCheck::gains("wedding balance", wedding, amount)),
		)
		.await
	}

	/// One wedding of every kind, on identity pairs (0, 1) through (10, 11).
	pub async fn create_all_weddings(&self) -> Result<Vec<(WeddingKind, Address)>, ScenarioError> {
		let mut created = Vec::with_capacity(WeddingKind::ALL.len());
		for (pair, kind) in (0u32..).zip(WeddingKind::ALL) {
			let context = self
				.create_wedding_of_kind(kind, pair * 2, pair * 2 + 1)
				.await?;
			created.push((kind, context.contract_address("wedding")?));
		}
		Ok(created)
	}

	/// Ends the wedding of identity `index` the only way its stage allows.
	#[instrument(skip(self))]
	pub async fn divorce_reject_wedding(&self, index: u32) -> Result<BreakupOutcome, ScenarioError> {
		let partner = self.identity(index)?;
		let address = expect_address(
			self.read(
				&self.manager,
				"weddingOf",
				&[DynSolValue::Address(partner.address())],
			)
			.await?,
			"weddingOf",
		)?;

		if address.is_zero() {
			self.reporter
				.note(&format!("Identity {} has no wedding, skipping", index));
			return Ok(BreakupOutcome::NoWedding);
		}

		let wedding = self.wedding(address).connect(partner.clone());
		let stage = expect_uint(self.read(&wedding, "stage", &[]).await?, "stage")?;

		if stage != U256::from(STAGE_MARRIED) {
			self.run_step(Step::call("reject proposal", wedding, "rejectProposal", vec![]))
				.await?;
			return Ok(BreakupOutcome::Rejected(address));
		}

		let partner1 = expect_address(self.read(&wedding, "partner1", &[]).await?, "partner1")?;
		let answer = if partner.address() == partner1 {
			"p1Answer"
		} else {
			"p2Answer"
		};
		let still_married = expect_bool(self.read(&wedding, answer, &[]).await?, answer)?;
		if !still_married {
			self.reporter.note(&format!(
				"Identity {} already divorced wedding {}, skipping",
				index, address
			));
			return Ok(BreakupOutcome::AlreadyDivorced(address));
		}

		self.run_step(Step::call("divorce", wedding, "divorce", vec![]))
			.await?;
		Ok(BreakupOutcome::Divorced(address))
	}

	/// [`divorce_reject_wedding`](Self::divorce_reject_wedding) for identities
	/// `0..count`, in order.
	pub async fn breakup_all_weddings(&self, count: u32) -> Result<Vec<BreakupOutcome>, ScenarioError> {
		let mut outcomes = Vec::with_capacity(count as usize);
		for index in 0..count {
			outcomes.push(self.divorce_reject_wedding(index).await?);
		}
		Ok(outcomes)
	}

	/// Sends `amount` from `funder` to each recipient, one transfer at a time.
	#[instrument(skip(self, recipients))]
	pub async fn fund_accounts(
		&self,
		funder: u32,
		recipients: impl IntoIterator<Item = u32>,
		amount: U256,
	) -> Result<Vec<Address>, ScenarioError> {
		let funder = self.identity(funder)?;
		let mut funded = Vec::new();
		for index in recipients {
			let recipient = self.identity(index)?.address();
			self.run_step(
				Step::transfer(format!("fund identity {}", index), funder.clone(), recipient, amount)
					.check_balance(BalanceCheck::loses("funder balance", funder.address(), amount).paying_gas())
					.check_balance(BalanceCheck::gains("recipient balance", recipient, amount)),
			)
			.await?;
			funded.push(recipient);
		}
		Ok(funded)
	}

	async fn vow_and_accept(&self, context: &ScenarioContext, who: &str) -> Result<(), ScenarioError> {
		let wedding = context
			.contract("wedding")?
			.connect(context.identity(who)?.clone());

		self.run_step(Step::call(
			format!("{} updates vows", who),
			wedding.clone(),
			"updateVows",
			vec![DynSolValue::String(VOWS.into())],
		))
		.await?;
		self.run_step(Step::call(
			format!("{} accepts proposal", who),
			wedding,
			"acceptProposal",
			vec![],
		))
		.await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{
		self, FakeWeddings, STAGE_INITIALIZED, STAGE_IN_PROGRESS, STAGE_MARRIED as FAKE_MARRIED,
	};
	use crate::{CoordinationError, RunnerSettings};
	use std::time::{Duration, Instant};
	use wedding_chain::implementations::mock::{MiningMode, MockChain};

	const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

	fn address_value(context: &ScenarioContext, key: &str) -> Address {
		context.value(key).unwrap().as_address().unwrap()
	}

	#[tokio::test]
	async fn test_create_wedding_reports_partners_in_order() {
		let fixture = testing::fixture(MockChain::new(1337));
		let (runner, reporter) = fixture.runner(fixture.settings());

		let started = Instant::now();
		let context = runner.create_wedding(0, 1).await.unwrap();
		assert!(started.elapsed() < Duration::from_millis(3000));

		assert_eq!(address_value(&context, "partner1"), fixture.identity(0).address());
		assert_eq!(address_value(&context, "partner2"), fixture.identity(1).address());

		let wedding = context.contract_address("wedding").unwrap();
		let state = fixture.weddings.wedding(wedding).unwrap();
		assert_eq!(state.partner1, fixture.identity(0).address());
		assert_eq!(state.stage, STAGE_INITIALIZED);
		assert!(reporter.failures().is_empty());
		assert_eq!(fixture.mock.active_subscriptions(), 0);
	}

	#[tokio::test]
	async fn test_unmined_wedding_times_out_with_hash() {
		let fixture = testing::fixture(MockChain::new(1).with_mining(MiningMode::Never));
		let settings = RunnerSettings {
			confirmation_timeout: Duration::from_millis(200),
			..fixture.settings()
		};
		let (runner, _) = fixture.runner(settings);

		let started = Instant::now();
		let err = runner.create_wedding(0, 1).await.unwrap_err();
		assert!(started.elapsed() < Duration::from_millis(250));

		match err.coordination() {
			Some(CoordinationError::ConfirmationTimeout { hash, .. }) => {
				fixture.mock.mine_pending();
				let receipt = fixture.chain.get_receipt(hash).await.unwrap();
				assert!(receipt.is_some());
			},
			other => panic!("expected a confirmation timeout, got {:?}", other),
		}
		assert_eq!(fixture.mock.active_subscriptions(), 0);
	}

	#[tokio::test]
	async fn test_revert_is_not_masked_by_event_timeout() {
		let fixture = testing::fixture(MockChain::new(1));
		let (runner, reporter) = fixture.runner(fixture.settings());

		runner.create_wedding(0, 1).await.unwrap();
		let started = Instant::now();
		let err = runner.create_wedding(0, 2).await.unwrap_err();

		match err.coordination() {
			Some(CoordinationError::TransactionReverted { reason, .. }) => {
				assert_eq!(reason, FakeWeddings::ALREADY_ENGAGED);
			},
			other => panic!("expected a revert, got {:?}", other),
		}
		// Resolved by the receipt, not by the event budget.
		assert!(started.elapsed() < Duration::from_secs(1));
		assert!(err.to_string().contains("startWedding("));
		assert_eq!(reporter.failures().len(), 1);
		assert_eq!(fixture.mock.active_subscriptions(), 0);
	}

	#[tokio::test]
	async fn test_concurrent_scenarios_do_not_cross_talk() {
		let fixture = testing::fixture(MockChain::new(1));
		let (runner, _) = fixture.runner(fixture.settings());

		let (first, second) = tokio::join!(runner.create_wedding(0, 1), runner.create_wedding(2, 3));
		let (first, second) = (first.unwrap(), second.unwrap());

		assert_eq!(address_value(&first, "partner1"), fixture.identity(0).address());
		assert_eq!(address_value(&first, "partner2"), fixture.identity(1).address());
		assert_eq!(address_value(&second, "partner1"), fixture.identity(2).address());
		assert_eq!(address_value(&second, "partner2"), fixture.identity(3).address());
		assert_ne!(
			first.contract_address("wedding").unwrap(),
			second.contract_address("wedding").unwrap()
		);
	}

	#[tokio::test]
	async fn test_wedding_lifecycle_stages() {
		let fixture = testing::fixture(MockChain::new(1));
		let (runner, _) = fixture.runner(fixture.settings());

		let in_progress = runner.create_in_progress_wedding(0, 1).await.unwrap();
		let wedding = in_progress.contract_address("wedding").unwrap();
		assert_eq!(fixture.weddings.wedding(wedding).unwrap().stage, STAGE_IN_PROGRESS);

		let photo = runner.create_married_wedding_with_photo(2, 3).await.unwrap();
		let state = fixture
			.weddings
			.wedding(photo.contract_address("wedding").unwrap())
			.unwrap();
		assert_eq!(state.stage, FAKE_MARRIED);
		assert_eq!(state.photo.as_deref(), Some(PHOTO_URL));
	}

	#[tokio::test]
	async fn test_claimed_gifts_drain_into_claimer() {
		let fixture = testing::fixture(MockChain::new(1));
		let (runner, reporter) = fixture.runner(fixture.settings());

		let context = runner.create_married_wedding_with_claimed_gifts(0, 1).await.unwrap();
		let wedding = context.contract_address("wedding").unwrap();

		assert_eq!(fixture.mock.balance_of(wedding), U256::ZERO);
		let state = fixture.weddings.wedding(wedding).unwrap();
		assert_eq!(state.gifts, U256::ZERO);
		assert_eq!(state.photo.as_deref(), Some(PHOTO_URL));
		assert!(reporter.failures().is_empty());
		let passed_checks = reporter
			.reports()
			.iter()
			.filter(|r| matches!(r, crate::Report::Check { passed: true, .. }))
			.count();
		// Gifter and wedding on the gift, wedding and claimer on the claim.
		assert_eq!(passed_checks, 4);
	}

	#[tokio::test]
	async fn test_create_all_then_break_up() {
		let fixture = testing::fixture(MockChain::new(1));
		let (runner, _) = fixture.runner(fixture.settings());

		let created = runner.create_all_weddings().await.unwrap();
		assert_eq!(
			created.iter().map(|(kind, _)| *kind).collect::<Vec<_>>(),
			WeddingKind::ALL.to_vec()
		);
		assert_eq!(fixture.weddings.wedding_count(), 6);

		let outcomes = runner.breakup_all_weddings(20).await.unwrap();
		let labels: Vec<&str> = outcomes
			.iter()
			.map(|outcome| match outcome {
				BreakupOutcome::NoWedding => "none",
				BreakupOutcome::Rejected(_) => "rejected",
				BreakupOutcome::AlreadyDivorced(_) => "already",
				BreakupOutcome::Divorced(_) => "divorced",
			})
			.collect();

		let mut expected = vec!["rejected", "none", "rejected", "none"];
		expected.extend(["divorced"; 8]);
		expected.extend(["none"; 8]);
		assert_eq!(labels, expected);
		assert_eq!(fixture.weddings.wedding_count(), 0);
	}

	#[tokio::test]
	async fn test_second_divorce_is_skipped() {
		let fixture = testing::fixture(MockChain::new(1));
		let (runner, _) = fixture.runner(fixture.settings());
		let context = runner.create_married_wedding(0, 1).await.unwrap();
		let wedding = context.contract_address("wedding").unwrap();

		assert_eq!(
			runner.divorce_reject_wedding(0).await.unwrap(),
			BreakupOutcome::Divorced(wedding)
		);
		assert_eq!(
			runner.divorce_reject_wedding(0).await.unwrap(),
			BreakupOutcome::AlreadyDivorced(wedding)
		);
		assert_eq!(fixture.mock.submission_count(), 6);
	}

	#[tokio::test]
	async fn test_fund_accounts_checks_balances() {
		let fixture = testing::fixture(MockChain::new(1));
		let (runner, reporter) = fixture.runner(fixture.settings());
		let amount = U256::from(ONE_ETHER);
		let before = fixture.mock.balance_of(fixture.identity(2).address());

		let funded = runner.fund_accounts(0, 1..=3, amount).await.unwrap();
		assert_eq!(funded.len(), 3);
		assert_eq!(fixture.mock.balance_of(fixture.identity(2).address()), before + amount);
		assert!(reporter.failures().is_empty());
	}

	#[tokio::test]
	async fn test_gift_to_unmarried_wedding_reverts() {
		let fixture = testing::fixture(MockChain::new(1));
		let (runner, _) = fixture.runner(fixture.settings());
		let context = runner.create_wedding(0, 1).await.unwrap();
		let wedding = context.contract_address("wedding").unwrap();

		// Not married yet, so the gift is refused.
		let err = runner
			.send_wedding_gift(GIFTER_INDEX, wedding, GIFT_MESSAGE)
			.await
			.unwrap_err();
		assert!(matches!(
			err.coordination(),
			Some(CoordinationError::TransactionReverted { reason, .. }) if reason == FakeWeddings::NOT_MARRIED
		));
	}
}
