//! Command-line entry point for the wedding scenario runner.
//!
//! Loads the configuration and deployment registry, builds a
//! [`ScenarioRunner`] against the configured network and runs one scenario.
//! Ctrl-C aborts every outstanding wait so the scenario stops with a
//! cancellation error instead of hanging on a receipt or event.

use alloy_primitives::{utils::parse_ether, Address};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use wedding_config::Config;
use wedding_core::{
	BreakupOutcome, RunnerBuilder, ScenarioError, ScenarioRunner, WeddingKind,
	GIFTER_INDEX, GIFT_MESSAGE,
};
use wedding_types::{abort_pair, format_ether};

/// Command-line arguments for the wedding runner.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "wedding.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
	/// Create one wedding between two identities
	CreateWedding {
		#[arg(long, value_enum, default_value_t = Kind::Engaged)]
		kind: Kind,
		#[arg(long, default_value_t = 0)]
		creator: u32,
		#[arg(long, default_value_t = 1)]
		acceptor: u32,
	},
	/// Create one wedding of every kind on identities 0 to 11
	CreateAll,
	/// Send the minimum gift to a wedding
	SendGift {
		wedding: Address,
		#[arg(long, default_value_t = GIFTER_INDEX)]
		gifter: u32,
		#[arg(long, default_value = GIFT_MESSAGE)]
		message: String,
	},
	/// Reject or divorce the wedding of one identity
	Divorce { index: u32 },
	/// Reject or divorce the weddings of identities 0..count
	BreakupAll {
		#[arg(long, default_value_t = 20)]
		count: u32,
	},
	/// Send ether from one identity to others
	FundAccounts {
		#[arg(long, default_value_t = 0)]
		funder: u32,
		/// Recipient identities, 1 to 9 when omitted
		#[arg(long, value_delimiter = ',')]
		recipients: Vec<u32>,
		/// Amount per recipient in ether
		#[arg(long, default_value = "1")]
		amount: String,
	},
	/// Print the current block number
	BlockNumber,
}

/// Wedding lifecycle stage to create.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
	Engaged,
	InProgress,
	Married,
	MarriedWithPhoto,
	MarriedWithGifts,
	MarriedWithClaimedGifts,
}

impl From<Kind> for WeddingKind {
	fn from(kind: Kind) -> Self {
		match kind {
			Kind::Engaged => WeddingKind::Engaged,
			Kind::InProgress => WeddingKind::InProgress,
			Kind::Married => WeddingKind::Married,
			Kind::MarriedWithPhoto => WeddingKind::MarriedWithPhoto,
			Kind::MarriedWithGifts => WeddingKind::MarriedWithGifts,
			Kind::MarriedWithClaimedGifts => WeddingKind::MarriedWithClaimedGifts,
		}
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started wedding runner");

	let config = Config::from_file(&args.config).await?;
	tracing::info!("Loaded configuration [{}]", config.runner.id);
	let deployments = config.load_deployments().await?;

	let (abort_handle, abort) = abort_pair();
	let runner = RunnerBuilder::new(config)
		.with_abort(abort)
		.build(&deployments)
		.await?;

	let interrupt = tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			tracing::warn!("Interrupted, cancelling outstanding waits");
			abort_handle.abort();
		}
	});
	let result = run_command(&runner, args.command).await;
	interrupt.abort();

	if let Err(e) = &result {
		tracing::error!(error = %e, "Scenario failed");
	}
	result?;

	tracing::info!("Stopped wedding runner");
	Ok(())
}

/// Runs one command to completion against `runner`.
async fn run_command(runner: &ScenarioRunner, command: Command) -> Result<(), ScenarioError> {
	match command {
		Command::CreateWedding {
			kind,
			creator,
			acceptor,
		} => {
			let context = runner
				.create_wedding_of_kind(kind.into(), creator, acceptor)
				.await?;
			println!("{}", context.contract_address("wedding")?);
		},
		Command::CreateAll => {
			for (kind, address) in runner.create_all_weddings().await? {
				println!("{:?}\t{}", kind, address);
			}
		},
		Command::SendGift {
			wedding,
			gifter,
			message,
		} => {
			let outcome = runner.send_wedding_gift(gifter, wedding, &message).await?;
			println!("{}", outcome.receipt.transaction_hash);
		},
		Command::Divorce { index } => {
			println!("{}", describe(&runner.divorce_reject_wedding(index).await?));
		},
		Command::BreakupAll { count } => {
			for (index, outcome) in runner.breakup_all_weddings(count).await?.iter().enumerate() {
				println!("{}\t{}", index, describe(outcome));
			}
		},
		Command::FundAccounts {
			funder,
			recipients,
			amount,
		} => {
			let amount = parse_ether(&amount).map_err(|e| {
				ScenarioError::Configuration(format!("Invalid amount '{}': {}", amount, e))
			})?;
			let recipients = if recipients.is_empty() {
				(1..=9).collect()
			} else {
				recipients
			};
			for address in runner.fund_accounts(funder, recipients, amount).await? {
				println!("{}\t{} ETH", address, format_ether(amount));
			}
		},
		Command::BlockNumber => {
			let block = runner.chain().block_number().await.map_err(|e| {
				ScenarioError::Configuration(format!("Failed to read block number: {}", e))
			})?;
			println!("{}", block);
			if let Some(master) = runner.manager_master().await? {
				println!("manager master {}", master);
			}
		},
	}
	Ok(())
}

fn describe(outcome: &BreakupOutcome) -> String {
	match outcome {
		BreakupOutcome::NoWedding => "no wedding".to_string(),
		BreakupOutcome::Rejected(address) => format!("rejected {}", address),
		BreakupOutcome::AlreadyDivorced(address) => format!("already divorced {}", address),
		BreakupOutcome::Divorced(address) => format!("divorced {}", address),
	}
}
