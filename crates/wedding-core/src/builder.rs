//! Builds a [`ScenarioRunner`] from configuration.
//!
//! The chain implementation is picked by name from the registered factories,
//! artifacts are loaded from the configured paths and the WeddingManager
//! address comes from the deployment registry of the active network.

use crate::reporter::{Reporter, TracingReporter};
use crate::scenario::{RunnerSettings, ScenarioRunner};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use wedding_account::WalletSet;
use wedding_chain::{ChainFactory, ChainService};
use wedding_config::Config;
use wedding_contract::{Artifact, ContractHandle};
use wedding_types::{AbortSignal, DeploymentLookup};

/// Errors that can occur while building a runner.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Assembles the chain client, wallet set and contract handles.
pub struct RunnerBuilder {
	config: Config,
	chain_factories: HashMap<String, ChainFactory>,
	reporter: Arc<dyn Reporter>,
	abort: AbortSignal,
}

impl RunnerBuilder {
	/// Starts from every registered chain implementation and a
	/// [`TracingReporter`].
	pub fn new(config: Config) -> Self {
		Self {
			config,
			chain_factories: wedding_chain::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
			reporter: Arc::new(TracingReporter),
			abort: AbortSignal::never(),
		}
	}

	/// Registers or replaces a chain implementation.
	pub fn with_chain_factory(mut self, name: impl Into<String>, factory: ChainFactory) -> Self {
		self.chain_factories.insert(name.into(), factory);
		self
	}

	pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
		self.reporter = reporter;
		self
	}

	pub fn with_abort(mut self, abort: AbortSignal) -> Self {
		self.abort = abort;
		self
	}

	/// Creates the chain client for the active network.
	pub fn build_chain(&self) -> Result<ChainService, BuilderError> {
		let network = self
			.config
			.active_network()
			.map_err(|e| BuilderError::Config(e.to_string()))?;
		let factory = self
			.chain_factories
			.get(&network.implementation)
			.ok_or_else(|| {
				BuilderError::Config(format!(
					"Unknown chain implementation '{}'",
					network.implementation
				))
			})?;

		let implementation = factory(&network.chain).map_err(|e| {
			BuilderError::Config(format!(
				"Failed to create chain implementation '{}': {}",
				network.implementation, e
			))
		})?;
		tracing::info!(
			component = "chain",
			implementation = %network.implementation,
			network = %self.config.runner.network,
			"Loaded"
		);
		Ok(ChainService::new(implementation))
	}

	async fn load_artifact(&self, path: &Path) -> Result<Artifact, BuilderError> {
		Artifact::load(self.config.resolve_path(path))
			.await
			.map_err(|e| BuilderError::Config(e.to_string()))
	}

	/// Builds the runner for the active network.
	pub async fn build(self, deployments: &dyn DeploymentLookup) -> Result<ScenarioRunner, BuilderError> {
		let chain = Arc::new(self.build_chain()?);

		let wallets = WalletSet::new(self.config.wallet.mnemonic.clone())
			.map_err(|e| BuilderError::Config(e.to_string()))?;
		tracing::info!(component = "wallet", "Loaded");

		let artifacts = &self.config.artifacts;
		let manager_artifact = self.load_artifact(&artifacts.wedding_manager).await?;
		let wedding_artifact = self.load_artifact(&artifacts.wedding).await?;
		let proxy_artifact = match &artifacts.upgradeable_proxy {
			Some(path) => Some(self.load_artifact(path).await?),
			None => None,
		};
		tracing::info!(component = "artifacts", "Loaded");

		let network = &self.config.runner.network;
		let addresses = deployments.addresses(network).ok_or_else(|| {
			BuilderError::MissingComponent(format!("deployment for network '{}'", network))
		})?;
		tracing::info!(
			component = "deployments",
			wedding_manager = %addresses.wedding_manager,
			wedding_master = %addresses.wedding_master,
			"Loaded"
		);

		let manager = ContractHandle::new(
			"WeddingManager",
			addresses.wedding_manager,
			Arc::new(manager_artifact.abi),
			chain.clone(),
		);
		let proxy = proxy_artifact.map(|artifact| {
			ContractHandle::new(
				"UpgradeableProxy",
				addresses.wedding_manager,
				Arc::new(artifact.abi),
				chain.clone(),
			)
		});

		let runner = ScenarioRunner::new(
			chain,
			Arc::new(wallets),
			manager,
			Arc::new(wedding_artifact.abi),
			RunnerSettings::from_config(&self.config),
			self.reporter,
		)
		.with_abort(self.abort);

		Ok(match proxy {
			Some(proxy) => runner.with_proxy(proxy),
			None => runner,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::Address;
	use wedding_types::{DeploymentAddresses, Deployments};

	const MANAGER_JSON: &str = include_str!("../../wedding-contract/abi/WeddingManager.json");
	const WEDDING_JSON: &str = include_str!("../../wedding-contract/abi/Wedding.json");
	const PROXY_JSON: &str = include_str!("../../wedding-contract/abi/UpgradeableProxy.json");

	fn write_workspace(dir: &Path, implementation: &str, with_proxy: bool) -> std::path::PathBuf {
		std::fs::create_dir_all(dir.join("build")).unwrap();
		std::fs::write(dir.join("build/WeddingManager.json"), MANAGER_JSON).unwrap();
		std::fs::write(dir.join("build/Wedding.json"), WEDDING_JSON).unwrap();
		std::fs::write(dir.join("build/UpgradeableProxy.json"), PROXY_JSON).unwrap();

		let proxy_line = if with_proxy {
			"upgradeable_proxy = \"build/UpgradeableProxy.json\""
		} else {
			""
		};
		let config = format!(
			r#"
[runner]
id = "wedding-generator"
network = "private"

[networks.private]
implementation = "{implementation}"
[networks.private.chain]
chain_id = 1337

[wallet]
mnemonic = "test test test test test test test test test test test junk"

[artifacts]
wedding_manager = "build/WeddingManager.json"
wedding = "build/Wedding.json"
{proxy_line}
deployments = "deployments.json"
"#
		);
		let path = dir.join("wedding.toml");
		std::fs::write(&path, config).unwrap();
		path
	}

	fn deployments() -> Deployments {
		let mut deployments = Deployments::new();
		deployments.insert(
			"private",
			DeploymentAddresses {
				deployment_block: 0,
				wedding_master: Address::repeat_byte(1),
				wedding_manager_master: Address::repeat_byte(2),
				wedding_manager: Address::repeat_byte(3),
			},
		);
		deployments
	}

	#[tokio::test]
	async fn test_build_against_mock_chain() {
		let dir = tempfile::tempdir().unwrap();
		let config = Config::from_file(write_workspace(dir.path(), "mock", true))
			.await
			.unwrap();

		let runner = RunnerBuilder::new(config).build(&deployments()).await.unwrap();
		assert_eq!(runner.manager().address(), Address::repeat_byte(3));
		assert_eq!(runner.chain().chain_id().await.unwrap(), 1337);
		assert_eq!(runner.settings().gas_limit, 5_000_000);
		assert!(runner.proxy().is_some());
	}

	#[tokio::test]
	async fn test_missing_deployment() {
		let dir = tempfile::tempdir().unwrap();
		let config = Config::from_file(write_workspace(dir.path(), "mock", false))
			.await
			.unwrap();

		let result = RunnerBuilder::new(config).build(&Deployments::new()).await;
		assert!(matches!(result, Err(BuilderError::MissingComponent(msg)) if msg.contains("private")));
	}

	#[tokio::test]
	async fn test_unknown_implementation() {
		let dir = tempfile::tempdir().unwrap();
		let config = Config::from_file(write_workspace(dir.path(), "ganache", false))
			.await
			.unwrap();

		let result = RunnerBuilder::new(config).build(&deployments()).await;
		assert!(matches!(result, Err(BuilderError::Config(msg)) if msg.contains("ganache")));
	}

	#[tokio::test]
	async fn test_missing_artifact() {
		let dir = tempfile::tempdir().unwrap();
		let path = write_workspace(dir.path(), "mock", false);
		std::fs::remove_file(dir.path().join("build/Wedding.json")).unwrap();
		let config = Config::from_file(path).await.unwrap();

		let result = RunnerBuilder::new(config).build(&deployments()).await;
		assert!(matches!(result, Err(BuilderError::Config(msg)) if msg.contains("Wedding.json")));
	}
}
