//! Deployment address registry.
//!
//! Deployment tooling writes a JSON document keyed by network name:
//!
//! ```json
//! {
//!     "private": {
//!         "deploymentBlock": 12,
//!         "weddingMaster": "0x...",
//!         "weddingManagerMaster": "0x...",
//!         "weddingManager": "0x..."
//!     }
//! }
//! ```
//!
//! The coordination core only ever reads it through [`DeploymentLookup`].

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Addresses of one network's deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentAddresses {
	/// Block the deployment started at.
	#[serde(default)]
	pub deployment_block: u64,
	/// Wedding implementation cloned for every new wedding.
	pub wedding_master: Address,
	/// WeddingManager implementation behind the proxy.
	pub wedding_manager_master: Address,
	/// Upgradeable proxy that callers talk to.
	pub wedding_manager: Address,
}

/// Read-only `{network -> addresses}` lookup.
pub trait DeploymentLookup: Send + Sync {
	fn addresses(&self, network: &str) -> Option<DeploymentAddresses>;
}

/// In-memory deployment registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Deployments(HashMap<String, DeploymentAddresses>);

impl Deployments {
	pub fn new() -> Self {
		Self::default()
	}

	/// Parses the deployments document.
	pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(json)
	}

	pub fn insert(&mut self, network: impl Into<String>, addresses: DeploymentAddresses) {
		self.0.insert(network.into(), addresses);
	}

	pub fn networks(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}
}

impl DeploymentLookup for Deployments {
	fn addresses(&self, network: &str) -> Option<DeploymentAddresses> {
		self.0.get(network).copied()
	}
}
