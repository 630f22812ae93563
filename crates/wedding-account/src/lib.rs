//! Wallet management for the wedding coordination toolkit.
//!
//! Every participant in a scenario is an [`Identity`] derived from one BIP-39
//! mnemonic along the standard Ethereum path `m/44'/60'/0'/0/{index}`. The
//! same (mnemonic, index) pair always yields the same address, so scenarios
//! can refer to participants by index alone.

use alloy_eips::eip2718::Encodable2718;
use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::Address;
use alloy_rpc_types::TransactionRequest;
use alloy_signer_local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use wedding_types::{SecretString, SignedTransaction, TransactionHash, UnsignedTransaction};

/// Errors that can occur during wallet operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// No usable seed is configured. Fatal at startup.
	#[error("Configuration error: {0}")]
	Configuration(String),
	/// Error that occurs when a key cannot be derived from the seed.
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	/// Error that occurs when signing fails.
	#[error("Signing failed: {0}")]
	SigningFailed(String),
}

/// Fields a transaction needs from the chain before it can be signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningParams {
	pub nonce: u64,
	pub chain_id: u64,
	/// Gas price in wei.
	pub gas_price: u128,
}

/// A derived signing key and its address.
///
/// Identities are immutable and never persisted; they are re-derived from
/// the mnemonic on every run.
#[derive(Clone)]
pub struct Identity {
	index: u32,
	address: Address,
	signer: PrivateKeySigner,
}

impl std::fmt::Debug for Identity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Identity")
			.field("index", &self.index)
			.field("address", &self.address)
			.finish_non_exhaustive()
	}
}

impl Identity {
	/// Wraps an existing signer.
	pub fn new(index: u32, signer: PrivateKeySigner) -> Self {
		Self {
			index,
			address: signer.address(),
			signer,
		}
	}

	/// Derivation index this identity was built from.
	pub fn index(&self) -> u32 {
		self.index
	}

	pub fn address(&self) -> Address {
		self.address
	}

	/// Signs `tx` as a legacy EIP-155 transaction.
	pub async fn sign(
		&self,
		tx: &UnsignedTransaction,
		params: SigningParams,
	) -> Result<SignedTransaction, AccountError> {
		let gas_price = tx.options.gas_price.unwrap_or(params.gas_price);
		let request = TransactionRequest::default()
			.with_from(self.address)
			.with_to(tx.to)
			.with_nonce(params.nonce)
			.with_chain_id(params.chain_id)
			.with_gas_limit(tx.options.gas_limit)
			.with_gas_price(gas_price)
			.with_value(tx.options.value)
			.with_input(tx.input.clone());

		let wallet = EthereumWallet::from(self.signer.clone());
		let envelope = request
			.build(&wallet)
			.await
			.map_err(|e| AccountError::SigningFailed(e.to_string()))?;

		Ok(SignedTransaction {
			hash: TransactionHash(*envelope.tx_hash()),
			raw: envelope.encoded_2718().into(),
			from: self.address,
			to: tx.to,
			value: tx.options.value,
			input: tx.input.clone(),
			nonce: params.nonce,
			gas_limit: tx.options.gas_limit,
			gas_price,
			chain_id: params.chain_id,
		})
	}
}

/// All identities derivable from one mnemonic.
///
/// Derived identities are memoized; derivation runs PBKDF2 and is not cheap.
pub struct WalletSet {
	mnemonic: SecretString,
	identities: DashMap<u32, Arc<Identity>>,
}

impl std::fmt::Debug for WalletSet {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WalletSet")
			.field("mnemonic", &self.mnemonic)
			.field("derived", &self.identities.len())
			.finish()
	}
}

impl WalletSet {
	/// Creates a wallet set from a configured seed.
	///
	/// Fails with [`AccountError::Configuration`] if the seed is missing or
	/// blank, and with [`AccountError::InvalidKey`] if it is not a valid
	/// mnemonic.
	pub fn new(mnemonic: Option<SecretString>) -> Result<Self, AccountError> {
		let mnemonic = match mnemonic {
			Some(m) if !m.is_blank() => m,
			_ => {
				return Err(AccountError::Configuration(
					"no wallet mnemonic configured".into(),
				))
			},
		};

		let wallets = Self {
			mnemonic,
			identities: DashMap::new(),
		};
		// Reject a malformed phrase up front rather than on first use.
		wallets.identity(0)?;
		Ok(wallets)
	}

	/// Returns the identity at `index`, deriving it on first use.
	pub fn identity(&self, index: u32) -> Result<Arc<Identity>, AccountError> {
		if let Some(identity) = self.identities.get(&index) {
			return Ok(identity.clone());
		}

		let signer = self.mnemonic.with_exposed(|phrase| {
			MnemonicBuilder::<English>::default()
				.phrase(phrase)
				.index(index)
				.and_then(|builder| builder.build())
				.map_err(|e| AccountError::InvalidKey(e.to_string()))
		})?;

		let identity = Arc::new(Identity::new(index, signer));
		tracing::debug!(index, address = %identity.address(), "Derived identity");

		Ok(self
			.identities
			.entry(index)
			.or_insert(identity)
			.value()
			.clone())
	}

	/// Identities `0..count`, in index order.
	pub fn identities(&self, count: u32) -> Result<Vec<Arc<Identity>>, AccountError> {
		(0..count).map(|i| self.identity(i)).collect()
	}
}
