//! ABI-driven contract bindings for the wedding coordination toolkit.
//!
//! A [`ContractHandle`] ties an ABI, an address, the shared chain service and
//! an optional signer together. Methods and events are looked up by name at
//! runtime, so the same handle type serves the wedding manager, every wedding
//! instance and the upgradeable proxy.

use thiserror::Error;
use wedding_chain::ChainError;

/// ABI artifact loading.
pub mod artifact;
/// Contract handles: calls, sends and push-style listeners.
pub mod handle;
/// Pull-style event subscriptions.
pub mod subscription;

pub use artifact::{bundled, Artifact};
pub use handle::{ContractHandle, EventHandler, ListenerId};
pub use subscription::EventSubscription;

pub use alloy_dyn_abi::DynSolValue;

/// Errors that can occur while using a contract handle.
#[derive(Debug, Error)]
pub enum ContractError {
	#[error("Unknown method '{method}' on {contract}")]
	UnknownMethod { contract: String, method: String },
	#[error("Unknown event '{event}' on {contract}")]
	UnknownEvent { contract: String, event: String },
	/// Arguments do not match the method's inputs.
	#[error("Failed to encode {method}: {message}")]
	Encoding { method: String, message: String },
	/// Return data or log data does not match the ABI.
	#[error("Failed to decode {item}: {message}")]
	Decoding { item: String, message: String },
	/// `send` on a handle without a signer.
	#[error("No signer connected to {0}")]
	NoSigner(String),
	#[error(transparent)]
	Chain(#[from] ChainError),
	#[error("Invalid artifact: {0}")]
	Artifact(String),
}
