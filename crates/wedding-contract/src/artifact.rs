//! Contract build artifacts.
//!
//! Two layouts are accepted: a build file `{"abi": [...], "bytecode": "0x.."}`
//! (Truffle and Hardhat; Foundry nests bytecode as `{"object": "0x.."}`) and
//! a bare ABI array. Bytecode is carried along but never interpreted.

use crate::ContractError;
use alloy_json_abi::JsonAbi;
use alloy_primitives::Bytes;
use serde_json::Value;
use std::path::Path;

/// ABI plus optional creation bytecode.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
	pub abi: JsonAbi,
	pub bytecode: Option<Bytes>,
}

impl Artifact {
	pub fn from_json_str(json: &str) -> Result<Self, ContractError> {
		let value: Value = serde_json::from_str(json)
			.map_err(|e| ContractError::Artifact(format!("not JSON: {}", e)))?;

		let (abi, bytecode) = match value {
			Value::Array(_) => (value, None),
			Value::Object(mut fields) => {
				let abi = fields
					.remove("abi")
					.ok_or_else(|| ContractError::Artifact("missing \"abi\" field".into()))?;
				(abi, fields.remove("bytecode"))
			},
			_ => {
				return Err(ContractError::Artifact(
					"expected an ABI array or a build object".into(),
				))
			},
		};

		let abi: JsonAbi = serde_json::from_value(abi)
			.map_err(|e| ContractError::Artifact(format!("invalid ABI: {}", e)))?;

		Ok(Self {
			abi,
			bytecode: bytecode.as_ref().map(parse_bytecode).transpose()?,
		})
	}

	/// Reads an artifact file.
	pub async fn load(path: impl AsRef<Path>) -> Result<Self, ContractError> {
		let path = path.as_ref();
		let json = tokio::fs::read_to_string(path)
			.await
			.map_err(|e| ContractError::Artifact(format!("{}: {}", path.display(), e)))?;
		Self::from_json_str(&json)
			.map_err(|e| ContractError::Artifact(format!("{}: {}", path.display(), e)))
	}
}

fn parse_bytecode(value: &Value) -> Result<Bytes, ContractError> {
	let hex = match value {
		Value::String(s) => s.as_str(),
		Value::Object(fields) => fields
			.get("object")
			.and_then(Value::as_str)
			.ok_or_else(|| ContractError::Artifact("bytecode object has no \"object\"".into()))?,
		_ => return Err(ContractError::Artifact("bytecode must be a hex string".into())),
	};
	hex.parse()
		.map_err(|e| ContractError::Artifact(format!("invalid bytecode: {}", e)))
}

/// ABIs shipped with the crate.
pub mod bundled {
	use super::Artifact;
	use crate::ContractError;

	pub fn wedding_manager() -> Result<Artifact, ContractError> {
		Artifact::from_json_str(include_str!("../abi/WeddingManager.json"))
	}

	pub fn wedding() -> Result<Artifact, ContractError> {
		Artifact::from_json_str(include_str!("../abi/Wedding.json"))
	}

	pub fn upgradeable_proxy() -> Result<Artifact, ContractError> {
		Artifact::from_json_str(include_str!("../abi/UpgradeableProxy.json"))
	}
}
