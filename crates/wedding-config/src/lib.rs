//! Configuration for the wedding coordination toolkit.
//!
//! Configuration is a single TOML file. `${VAR}` and `${VAR:-default}`
//! references are resolved from the environment before parsing, so secrets
//! such as the wallet mnemonic can stay out of the file:
//!
//! ```toml
//! [runner]
//! id = "wedding-generator"
//! network = "private"
//!
//! [networks.private]
//! implementation = "evm_alloy"
//! [networks.private.chain]
//! rpc_url = "http://localhost:8545"
//!
//! [wallet]
//! mnemonic = "${MNEMONIC}"
//!
//! [artifacts]
//! wedding_manager = "build/WeddingManager.json"
//! wedding = "build/Wedding.json"
//! deployments = "deployments.json"
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use wedding_types::{Deployments, SecretString};

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Only the message; the default rendering dumps the whole input.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub runner: RunnerConfig,
	/// Chain endpoints keyed by network name.
	pub networks: HashMap<String, NetworkConfig>,
	pub wallet: WalletConfig,
	#[serde(default)]
	pub transactions: TransactionsConfig,
	pub artifacts: ArtifactsConfig,
	/// Directory relative artifact paths are resolved against.
	#[serde(skip)]
	base_dir: PathBuf,
}

/// Identity of this runner and the network it talks to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
	pub id: String,
	/// Key into `[networks]`.
	pub network: String,
}

/// One chain endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
	/// Chain implementation name, e.g. `evm_alloy` or `mock`.
	pub implementation: String,
	/// How long to wait for a receipt before giving up.
	/// Defaults by network name, see [`default_confirmation_timeout_ms`].
	pub confirmation_timeout_ms: Option<u64>,
	/// Implementation specific table, validated by the implementation.
	#[serde(default = "empty_table")]
	pub chain: toml::Value,
}

/// Wallet seed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WalletConfig {
	pub mnemonic: Option<SecretString>,
}

/// Defaults applied to every submitted transaction.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransactionsConfig {
	#[serde(default = "default_gas_limit")]
	pub gas_limit: u64,
	/// Fixed gas price in gwei; when absent the node is asked.
	#[serde(default)]
	pub gas_price_gwei: Option<u64>,
	#[serde(default = "default_receipt_poll_interval_ms")]
	pub receipt_poll_interval_ms: u64,
	/// Event wait budget; defaults to the confirmation timeout.
	pub event_timeout_ms: Option<u64>,
}

impl Default for TransactionsConfig {
	fn default() -> Self {
		Self {
			gas_limit: default_gas_limit(),
			gas_price_gwei: None,
			receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
			event_timeout_ms: None,
		}
	}
}

/// Contract artifacts and the deployment registry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactsConfig {
	pub wedding_manager: PathBuf,
	pub wedding: PathBuf,
	pub upgradeable_proxy: Option<PathBuf>,
	pub deployments: PathBuf,
}

fn empty_table() -> toml::Value {
	toml::Value::Table(toml::map::Map::new())
}

fn default_gas_limit() -> u64 {
	5_000_000
}


fn default_receipt_poll_interval_ms() -> u64 {
	1_000
}

/// Receipt wait budget when a network does not set one.
///
/// Mainnet gets five minutes, everything else three.
pub fn default_confirmation_timeout_ms(network: &str) -> u64 {
	match network {
		"mainnet" => 5 * 60 * 1_000,
		_ => 3 * 60 * 1_000,
	}
}

/// Resolves `${VAR}` and `${VAR:-default}` references.
///
/// Input is capped at 1MB so the regex cannot be fed pathological input.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};

		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)))
				},
			},
		};

		result.push_str(&input[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

impl Config {
	/// Loads and validates a configuration file.
	///
	/// Relative artifact paths are resolved against the file's directory.
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let content = tokio::fs::read_to_string(path).await?;
		let mut config: Config = content.parse()?;
		config.base_dir = path
			.parent()
			.map(Path::to_path_buf)
			.unwrap_or_else(|| PathBuf::from("."));
		Ok(config)
	}

	/// The `[networks]` entry selected by `runner.network`.
	pub fn active_network(&self) -> Result<&NetworkConfig, ConfigError> {
		self.networks.get(&self.runner.network).ok_or_else(|| {
			ConfigError::Validation(format!(
				"Network '{}' not found in networks configuration",
				self.runner.network
			))
		})
	}

	pub fn confirmation_timeout(&self) -> Duration {
		let configured = self
			.networks
			.get(&self.runner.network)
			.and_then(|n| n.confirmation_timeout_ms);
		Duration::from_millis(
			configured.unwrap_or_else(|| default_confirmation_timeout_ms(&self.runner.network)),
		)
	}

	pub fn event_timeout(&self) -> Duration {
		self.transactions
			.event_timeout_ms
			.map(Duration::from_millis)
			.unwrap_or_else(|| self.confirmation_timeout())
	}

	pub fn receipt_poll_interval(&self) -> Duration {
		Duration::from_millis(self.transactions.receipt_poll_interval_ms)
	}

	/// Configured gas price in wei, if fixed.
	pub fn gas_price_wei(&self) -> Option<u128> {
		self.transactions
			.gas_price_gwei
			.map(|gwei| u128::from(gwei) * 1_000_000_000)
	}

	/// Resolves a configured path against the config file's directory.
	pub fn resolve_path(&self, path: &Path) -> PathBuf {
		if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_dir.join(path)
		}
	}

	/// Reads the deployment registry named in `[artifacts]`.
	pub async fn load_deployments(&self) -> Result<Deployments, ConfigError> {
		let path = self.resolve_path(&self.artifacts.deployments);
		let content = tokio::fs::read_to_string(&path).await?;
		Deployments::from_json_str(&content).map_err(|e| {
			ConfigError::Parse(format!("Invalid deployments file {}: {}", path.display(), e))
		})
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.runner.id.is_empty() {
			return Err(ConfigError::Validation("Runner ID cannot be empty".into()));
		}

		let network = self.active_network()?;
		if network.implementation.is_empty() {
			return Err(ConfigError::Validation(format!(
				"Network '{}' must name a chain implementation",
				self.runner.network
			)));
		}
		if network.confirmation_timeout_ms == Some(0) {
			return Err(ConfigError::Validation(
				"confirmation_timeout_ms must be greater than 0".into(),
			));
		}

		match &self.wallet.mnemonic {
			Some(mnemonic) if !mnemonic.is_blank() => {},
			_ => {
				return Err(ConfigError::Validation(
					"No wallet mnemonic configured".into(),
				))
			},
		}

		if self.transactions.gas_limit == 0 {
			return Err(ConfigError::Validation(
				"gas_limit must be greater than 0".into(),
			));
		}
		if self.transactions.receipt_poll_interval_ms == 0 {
			return Err(ConfigError::Validation(
				"receipt_poll_interval_ms must be greater than 0".into(),
			));
		}
		if self.transactions.event_timeout_ms == Some(0) {
			return Err(ConfigError::Validation(
				"event_timeout_ms must be greater than 0".into(),
			));
		}

		Ok(())
	}
}

/// Parses, resolves environment references and validates.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const MNEMONIC: &str = "test test test test test test test test test test test junk";

	fn config_toml(network: &str, mnemonic: &str) -> String {
		format!(
			r#"
[runner]
id = "wedding-generator"
network = "{network}"

[networks.private]
implementation = "evm_alloy"
[networks.private.chain]
rpc_url = "http://localhost:8545"

[networks.mainnet]
implementation = "evm_alloy"
confirmation_timeout_ms = 600000

[wallet]
mnemonic = "{mnemonic}"

[artifacts]
wedding_manager = "build/WeddingManager.json"
wedding = "build/Wedding.json"
deployments = "deployments.json"
"#
		)
	}

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("WEDDING_TEST_HOST", "localhost");
		std::env::set_var("WEDDING_TEST_PORT", "8545");

		let result = resolve_env_vars("url = \"${WEDDING_TEST_HOST}:${WEDDING_TEST_PORT}\"").unwrap();
		assert_eq!(result, "url = \"localhost:8545\"");

		std::env::remove_var("WEDDING_TEST_HOST");
		std::env::remove_var("WEDDING_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let result = resolve_env_vars("value = \"${WEDDING_MISSING_VAR:-fallback}\"").unwrap();
		assert_eq!(result, "value = \"fallback\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let result = resolve_env_vars("value = \"${WEDDING_MISSING_VAR}\"");
		assert!(result.unwrap_err().to_string().contains("WEDDING_MISSING_VAR"));
	}

	#[test]
	fn test_parse_with_defaults() {
		let config: Config = config_toml("private", MNEMONIC).parse().unwrap();

		assert_eq!(config.runner.id, "wedding-generator");
		assert_eq!(config.transactions.gas_limit, 5_000_000);
		assert_eq!(config.gas_price_wei(), None);
		assert_eq!(config.confirmation_timeout(), Duration::from_secs(180));
		assert_eq!(config.event_timeout(), Duration::from_secs(180));
		assert_eq!(config.receipt_poll_interval(), Duration::from_secs(1));
		assert_eq!(config.active_network().unwrap().implementation, "evm_alloy");
	}

	#[test]
	fn test_fixed_gas_price_in_wei() {
		let toml = format!("{}\n[transactions]\ngas_price_gwei = 5\n", config_toml("private", MNEMONIC));
		let config: Config = toml.parse().unwrap();
		assert_eq!(config.gas_price_wei(), Some(5_000_000_000));
		assert_eq!(TransactionsConfig::default().gas_price_gwei, None);
	}

	#[test]
	fn test_network_timeout_override() {
		let config: Config = config_toml("mainnet", MNEMONIC).parse().unwrap();
		assert_eq!(config.confirmation_timeout(), Duration::from_secs(600));
		assert_eq!(default_confirmation_timeout_ms("mainnet"), 300_000);
		assert_eq!(default_confirmation_timeout_ms("goerli"), 180_000);
	}

	#[test]
	fn test_unknown_network_rejected() {
		let result = config_toml("kovan", MNEMONIC).parse::<Config>();
		assert!(matches!(result, Err(ConfigError::Validation(msg)) if msg.contains("kovan")));
	}

	#[test]
	fn test_missing_mnemonic_rejected() {
		let result = config_toml("private", "").parse::<Config>();
		assert!(matches!(result, Err(ConfigError::Validation(msg)) if msg.contains("mnemonic")));
	}

	#[test]
	fn test_mnemonic_from_environment() {
		std::env::set_var("WEDDING_TEST_MNEMONIC", MNEMONIC);
		let config: Config = config_toml("private", "${WEDDING_TEST_MNEMONIC}")
			.parse()
			.unwrap();
		std::env::remove_var("WEDDING_TEST_MNEMONIC");

		let mnemonic = config.wallet.mnemonic.unwrap();
		assert!(mnemonic.with_exposed(|m| m.ends_with("junk")));
	}

	#[tokio::test]
	async fn test_from_file_resolves_relative_paths() {
		let dir = tempfile::tempdir().unwrap();
		let config_path = dir.path().join("wedding.toml");
		std::fs::write(&config_path, config_toml("private", MNEMONIC)).unwrap();
		std::fs::write(
			dir.path().join("deployments.json"),
			r#"{"private": {
				"deploymentBlock": 1,
				"weddingMaster": "0x0000000000000000000000000000000000000001",
				"weddingManagerMaster": "0x0000000000000000000000000000000000000002",
				"weddingManager": "0x0000000000000000000000000000000000000003"
			}}"#,
		)
		.unwrap();

		let config = Config::from_file(&config_path).await.unwrap();
		assert_eq!(
			config.resolve_path(&config.artifacts.wedding),
			dir.path().join("build/Wedding.json")
		);

		let deployments = config.load_deployments().await.unwrap();
		use wedding_types::DeploymentLookup;
		assert_eq!(deployments.addresses("private").unwrap().deployment_block, 1);
	}
}
