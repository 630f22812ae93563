//! Common types for the wedding coordination toolkit.
//!
//! This crate defines the data model shared by the chain client, the wallet
//! set, the contract handles and the coordination core. Keeping these types in
//! one place lets every crate agree on what a hash, a receipt or a decoded
//! event looks like without depending on each other.

/// Cooperative abort signalling shared by every wait in a scenario.
pub mod abort;
/// Chain-level types: hashes, receipts, logs and transactions.
pub mod chain;
/// Deployment address registry keyed by network name.
pub mod deployments;
/// Decoded contract events.
pub mod events;
/// Self-registering implementation factories.
pub mod registry;
/// Redacting wrapper for secrets such as mnemonics.
pub mod secret_string;
/// Formatting helpers for hashes, addresses and amounts.
pub mod utils;
/// TOML configuration schema validation.
pub mod validation;

pub use abort::{abort_pair, AbortHandle, AbortSignal};
pub use chain::{
	BlockInfo, CallOptions, LogFilter, RawLog, SignedTransaction, SubscriptionId,
	TransactionHash, TransactionReceipt, TransactionStatus, UnsignedTransaction,
};
pub use deployments::{DeploymentAddresses, DeploymentLookup, Deployments};
pub use events::DecodedEvent;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use utils::{format_ether, truncate_id};
pub use validation::{ConfigSchema, Field, FieldType, Schema, ValidationError};

pub use alloy_primitives::{Address, Bytes, B256, U256};
