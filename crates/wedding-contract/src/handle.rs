//! Contract handles.
//!
//! Methods and events are resolved against the JSON ABI at call time. A bare
//! name picks the overload whose arity matches the arguments; a full
//! signature such as `startWedding(string,address,string)` picks exactly.

use crate::{ContractError, EventSubscription};
use alloy_dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy_json_abi::{Event, Function, JsonAbi};
use alloy_primitives::{Address, Bytes, B256};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use wedding_account::Identity;
use wedding_chain::ChainService;
use wedding_types::{
	CallOptions, DecodedEvent, LogFilter, SignedTransaction, SubscriptionId, TransactionHash,
	UnsignedTransaction,
};

/// Push-style event callback. Identity is the `Arc` allocation.
pub type EventHandler = Arc<dyn Fn(&DecodedEvent) + Send + Sync>;

/// Identifier of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
	id: ListenerId,
	subscription: SubscriptionId,
	task: JoinHandle<()>,
}

/// Listeners keyed by (event selector, handler identity).
struct Listeners {
	chain: Arc<ChainService>,
	entries: DashMap<(B256, usize), Listener>,
	next_id: AtomicU64,
}

impl Listeners {
	fn new(chain: Arc<ChainService>) -> Self {
		Self {
			chain,
			entries: DashMap::new(),
			next_id: AtomicU64::new(0),
		}
	}

	fn release(&self, listener: Listener) {
		self.chain.unsubscribe(listener.subscription);
		listener.task.abort();
	}

	fn remove_where(&self, predicate: impl Fn(&(B256, usize), &Listener) -> bool) -> usize {
		let keys: Vec<(B256, usize)> = self
			.entries
			.iter()
			.filter(|entry| predicate(entry.key(), entry.value()))
			.map(|entry| *entry.key())
			.collect();

		let mut removed = 0;
		for key in keys {
			if let Some((_, listener)) = self.entries.remove(&key) {
				self.release(listener);
				removed += 1;
			}
		}
		removed
	}
}

impl Drop for Listeners {
	fn drop(&mut self) {
		self.remove_where(|_, _| true);
	}
}

fn handler_key(handler: &EventHandler) -> usize {
	Arc::as_ptr(handler) as *const () as usize
}

/// A contract at an address, bound to the chain and optionally to a signer.
///
/// Clones share listeners; [`connect`](Self::connect) keeps them shared too,
/// so the registration rules hold per contract rather than per signer.
#[derive(Clone)]
pub struct ContractHandle {
	name: Arc<str>,
	address: Address,
	abi: Arc<JsonAbi>,
	chain: Arc<ChainService>,
	signer: Option<Arc<Identity>>,
	listeners: Arc<Listeners>,
}

impl std::fmt::Debug for ContractHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ContractHandle")
			.field("name", &self.name)
			.field("address", &self.address)
			.field("signer", &self.signer.as_ref().map(|s| s.address()))
			.finish()
	}
}

impl ContractHandle {
	pub fn new(
		name: impl Into<Arc<str>>,
		address: Address,
		abi: Arc<JsonAbi>,
		chain: Arc<ChainService>,
	) -> Self {
		Self {
			name: name.into(),
			address,
			abi,
			listeners: Arc::new(Listeners::new(chain.clone())),
			chain,
			signer: None,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn address(&self) -> Address {
		self.address
	}

	pub fn abi(&self) -> &Arc<JsonAbi> {
		&self.abi
	}

	pub fn chain(&self) -> &Arc<ChainService> {
		&self.chain
	}

	pub fn signer(&self) -> Option<&Arc<Identity>> {
		self.signer.as_ref()
	}

	/// Same contract, sending as `identity`.
	pub fn connect(&self, identity: Arc<Identity>) -> Self {
		Self {
			signer: Some(identity),
			..self.clone()
		}
	}

	/// Same ABI and signer at another address, with its own listeners.
	pub fn at(&self, address: Address) -> Self {
		Self {
			address,
			listeners: Arc::new(Listeners::new(self.chain.clone())),
			..self.clone()
		}
	}

	pub fn function(&self, method: &str, arity: usize) -> Result<&Function, ContractError> {
		let found = if method.contains('(') {
			self.abi.functions().find(|f| f.signature() == method)
		} else {
			self.abi
				.function(method)
				.and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == arity))
		};

		found.ok_or_else(|| ContractError::UnknownMethod {
			contract: self.name.to_string(),
			method: method.to_string(),
		})
	}

	/// Looks up an event by bare name or full signature.
	pub fn event(&self, event: &str) -> Result<&Event, ContractError> {
		let found = if event.contains('(') {
			self.abi.events().find(|e| e.signature() == event)
		} else {
			self.abi.event(event).and_then(|overloads| overloads.first())
		};

		found.ok_or_else(|| ContractError::UnknownEvent {
			contract: self.name.to_string(),
			event: event.to_string(),
		})
	}

	/// ABI-encodes a call to `method`.
	pub fn encode(&self, method: &str, args: &[DynSolValue]) -> Result<Bytes, ContractError> {
		let function = self.function(method, args.len())?;
		function
			.abi_encode_input(args)
			.map(Bytes::from)
			.map_err(|e| ContractError::Encoding {
				method: function.signature(),
				message: e.to_string(),
			})
	}

	/// Read-only call returning the decoded outputs. No transaction is sent.
	pub async fn call(
		&self,
		method: &str,
		args: &[DynSolValue],
	) -> Result<Vec<DynSolValue>, ContractError> {
		let function = self.function(method, args.len())?;
		let data = self.encode(method, args)?;
		let from = self.signer.as_ref().map(|s| s.address());

		let output = self.chain.call(from, self.address, data).await?;
		function
			.abi_decode_output(&output, true)
			.map_err(|e| ContractError::Decoding {
				item: function.signature(),
				message: e.to_string(),
			})
	}

	/// Like [`call`](Self::call) for methods with a single return value.
	pub async fn call_single(
		&self,
		method: &str,
		args: &[DynSolValue],
	) -> Result<DynSolValue, ContractError> {
		self.call(method, args)
			.await?
			.into_iter()
			.next()
			.ok_or_else(|| ContractError::Decoding {
				item: method.to_string(),
				message: "no return value".into(),
			})
	}

	/// Signs and submits a call to `method`, returning the signed transaction.
	///
	/// Does not wait for inclusion.
	pub async fn submit(
		&self,
		method: &str,
		args: &[DynSolValue],
		options: CallOptions,
	) -> Result<SignedTransaction, ContractError> {
		let signer = self
			.signer
			.as_ref()
			.ok_or_else(|| ContractError::NoSigner(self.name.to_string()))?;
		let data = self.encode(method, args)?;

		let signed = self
			.chain
			.sign_and_send(signer, UnsignedTransaction::call(self.address, data, options))
			.await?;

		tracing::debug!(
			contract = %self.name,
			method,
			tx_hash = %wedding_types::truncate_id(&signed.hash.to_string()),
			"Sent contract transaction"
		);
		Ok(signed)
	}

	/// Signs and submits a call to `method`, returning its hash.
	pub async fn send(
		&self,
		method: &str,
		args: &[DynSolValue],
		options: CallOptions,
	) -> Result<TransactionHash, ContractError> {
		Ok(self.submit(method, args, options).await?.hash)
	}

	/// Opens a pull-style subscription to `event` on this contract.
	pub async fn subscribe(&self, event: &str) -> Result<EventSubscription, ContractError> {
		let event = self.event(event)?.clone();
		let filter = LogFilter::new(self.address, event.selector());
		let subscription = self.chain.subscribe_logs(filter).await?;

		Ok(EventSubscription::new(
			event,
			self.chain.clone(),
			subscription.id,
			subscription.receiver,
		))
	}

	/// Registers `handler` for `event`.
	///
	/// Registering the same handler for the same event again returns the
	/// existing listener instead of opening a second subscription.
	pub async fn on(&self, event: &str, handler: EventHandler) -> Result<ListenerId, ContractError> {
		let key = (self.event(event)?.selector(), handler_key(&handler));
		if let Some(existing) = self.listeners.entries.get(&key) {
			return Ok(existing.id);
		}

		let mut subscription = self.subscribe(event).await?;

		match self.listeners.entries.entry(key) {
			dashmap::mapref::entry::Entry::Occupied(existing) => {
				// Lost a race with a concurrent registration; `subscription` drops here.
				Ok(existing.get().id)
			},
			dashmap::mapref::entry::Entry::Vacant(slot) => {
				let id = ListenerId(self.listeners.next_id.fetch_add(1, Ordering::SeqCst));
				let subscription_id = subscription.id();
				let task = tokio::spawn(async move {
					while let Some(batch) = subscription.next_batch().await {
						for event in &batch {
							handler(event);
						}
					}
				});
				slot.insert(Listener {
					id,
					subscription: subscription_id,
					task,
				});
				Ok(id)
			},
		}
	}

	/// Removes every listener for `event`. Returns how many were removed.
	pub fn off(&self, event: &str) -> Result<usize, ContractError> {
		let selector = self.event(event)?.selector();
		Ok(self.listeners.remove_where(|(s, _), _| *s == selector))
	}

	/// Removes one listener. Returns `false` if it was not registered.
	pub fn off_listener(&self, id: ListenerId) -> bool {
		self.listeners.remove_where(|_, listener| listener.id == id) > 0
	}

	/// Removes every listener on this contract.
	pub fn off_all(&self) -> usize {
		self.listeners.remove_where(|_, _| true)
	}

	pub fn listener_count(&self) -> usize {
		self.listeners.entries.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bundled;
	use alloy_primitives::U256;
	use alloy_sol_types::{sol, SolCall, SolEvent};
	use std::sync::atomic::AtomicUsize;
	use std::time::Duration;
	use wedding_account::WalletSet;
	use wedding_chain::implementations::mock::{MockChain, MockLog};
	use wedding_types::SecretString;

	sol! {
		event WeddingAdded(address indexed wedding, address indexed partner1, address indexed partner2);
		event GiftReceived(address indexed gifter, uint256 value, string message);
		function startWedding(string _p1Name, address _p2, string _p2Name);
	}

	const MNEMONIC: &str = "test test test test test test test test test test test junk";
	const MANAGER: Address = Address::repeat_byte(0x4d);

	fn setup() -> (MockChain, ContractHandle, Arc<Identity>) {
		let mock = MockChain::new(1337);
		let chain = Arc::new(ChainService::new(Box::new(mock.clone())));
		let abi = Arc::new(bundled::wedding_manager().unwrap().abi);
		let identity = WalletSet::new(Some(SecretString::from(MNEMONIC)))
			.unwrap()
			.identity(0)
			.unwrap();
		let handle = ContractHandle::new("WeddingManager", MANAGER, abi, chain);
		(mock, handle, identity)
	}

	fn added_log(wedding: u8, partner1: u8, partner2: u8) -> MockLog {
		let data = WeddingAdded {
			wedding: Address::repeat_byte(wedding),
			partner1: Address::repeat_byte(partner1),
			partner2: Address::repeat_byte(partner2),
		}
		.encode_log_data();
		MockLog {
			address: MANAGER,
			topics: data.topics().to_vec(),
			data: data.data,
		}
	}

	#[tokio::test]
	async fn test_call_decodes_outputs() {
		let (mock, handle, _) = setup();
		let selector = handle.function("weddingsLength", 0).unwrap().selector();
		mock.set_call_response(
			MANAGER,
			selector.0,
			Ok(DynSolValue::Uint(U256::from(3u64), 256).abi_encode().into()),
		);

		let length = handle.call_single("weddingsLength", &[]).await.unwrap();
		assert_eq!(length.as_uint().map(|(v, _)| v), Some(U256::from(3u64)));
	}

	#[tokio::test]
	async fn test_unknown_method_and_event() {
		let (_, handle, _) = setup();
		assert!(matches!(
			handle.call("marry", &[]).await,
			Err(ContractError::UnknownMethod { method, .. }) if method == "marry"
		));
		// Right name, wrong arity.
		assert!(matches!(
			handle.encode("startWedding", &[]),
			Err(ContractError::UnknownMethod { .. })
		));
		assert!(matches!(
			handle.subscribe("Eloped").await,
			Err(ContractError::UnknownEvent { .. })
		));
	}

	#[tokio::test]
	async fn test_send_requires_signer() {
		let (mock, handle, identity) = setup();
		let args = [
			DynSolValue::String("bob".into()),
			DynSolValue::Address(Address::repeat_byte(0x02)),
			DynSolValue::String("alice".into()),
		];

		let result = handle.send("startWedding", &args, CallOptions::new(5_000_000)).await;
		assert!(matches!(result, Err(ContractError::NoSigner(_))));
		assert_eq!(mock.submission_count(), 0);

		let signed = handle
			.connect(identity)
			.submit("startWedding", &args, CallOptions::new(5_000_000))
			.await
			.unwrap();
		let decoded = startWeddingCall::abi_decode(&signed.input, true).unwrap();
		assert_eq!(decoded._p1Name, "bob");
		assert_eq!(decoded._p2, Address::repeat_byte(0x02));
		assert_eq!(mock.submission_count(), 1);
	}

	#[tokio::test]
	async fn test_subscription_orders_and_decodes_batch() {
		let (mock, handle, _) = setup();
		let mut subscription = handle
			.subscribe("WeddingAdded(address,address,address)")
			.await
			.unwrap();

		mock.emit_logs(vec![added_log(0xa1, 0x01, 0x02), added_log(0xa2, 0x03, 0x04)]);

		let batch = subscription.next_batch().await.unwrap();
		assert_eq!(batch.len(), 2);
		assert_eq!(batch[0].name, "WeddingAdded");
		assert_eq!(
			batch[0].addresses(),
			vec![
				Address::repeat_byte(0xa1),
				Address::repeat_byte(0x01),
				Address::repeat_byte(0x02)
			]
		);
		assert!(batch[0].position() < batch[1].position());

		assert!(subscription.close());
		assert!(!subscription.close());
		assert_eq!(mock.active_subscriptions(), 0);
		assert!(subscription.next_batch().await.is_none());
	}

	#[tokio::test]
	async fn test_mixed_indexed_and_body_arguments() {
		let mock = MockChain::new(1);
		let chain = Arc::new(ChainService::new(Box::new(mock.clone())));
		let wedding = Address::repeat_byte(0x77);
		let handle = ContractHandle::new(
			"Wedding",
			wedding,
			Arc::new(bundled::wedding().unwrap().abi),
			chain,
		);
		let mut subscription = handle.subscribe("GiftReceived").await.unwrap();

		let data = GiftReceived {
			gifter: Address::repeat_byte(0x19),
			value: U256::from(10u64),
			message: "good luck buddy".into(),
		}
		.encode_log_data();
		mock.emit_logs(vec![MockLog {
			address: wedding,
			topics: data.topics().to_vec(),
			data: data.data,
		}]);

		let batch = subscription.next_batch().await.unwrap();
		let gift = &batch[0];
		assert_eq!(gift.address_arg("gifter"), Some(Address::repeat_byte(0x19)));
		assert_eq!(gift.uint_arg("value"), Some(U256::from(10u64)));
		assert_eq!(
			gift.arg(2).and_then(DynSolValue::as_str),
			Some("good luck buddy")
		);
	}

	#[tokio::test]
	async fn test_subscription_drop_releases_registration() {
		let (mock, handle, _) = setup();
		{
			let _subscription = handle.subscribe("WeddingAdded").await.unwrap();
			assert_eq!(mock.active_subscriptions(), 1);
		}
		assert_eq!(mock.active_subscriptions(), 0);
	}

	#[tokio::test]
	async fn test_listener_registration_is_unique_per_handler() {
		let (mock, handle, _) = setup();
		let seen = Arc::new(AtomicUsize::new(0));
		let counter = seen.clone();
		let handler: EventHandler = Arc::new(move |_event: &DecodedEvent| {
			counter.fetch_add(1, Ordering::SeqCst);
		});

		let first = handle.on("WeddingAdded", handler.clone()).await.unwrap();
		let again = handle.on("WeddingAdded", handler.clone()).await.unwrap();
		assert_eq!(first, again);
		assert_eq!(handle.listener_count(), 1);
		assert_eq!(mock.active_subscriptions(), 1);

		let other: EventHandler = Arc::new(|_event: &DecodedEvent| {});
		let second = handle.on("WeddingAdded", other).await.unwrap();
		assert_ne!(first, second);
		assert_eq!(mock.active_subscriptions(), 2);

		mock.emit_logs(vec![added_log(0xa1, 0x01, 0x02)]);
		tokio::time::timeout(Duration::from_secs(1), async {
			while seen.load(Ordering::SeqCst) == 0 {
				tokio::task::yield_now().await;
			}
		})
		.await
		.unwrap();

		assert!(handle.off_listener(second));
		assert!(!handle.off_listener(second));
		assert_eq!(handle.off("WeddingAdded").unwrap(), 1);
		assert_eq!(handle.listener_count(), 0);
		assert_eq!(mock.active_subscriptions(), 0);
	}

	#[tokio::test]
	async fn test_dropping_last_handle_releases_listeners() {
		let (mock, handle, _) = setup();
		let handler: EventHandler = Arc::new(|_event: &DecodedEvent| {});
		handle.on("WeddingRemoved", handler).await.unwrap();
		assert_eq!(mock.active_subscriptions(), 1);

		let clone = handle.clone();
		drop(handle);
		assert_eq!(mock.active_subscriptions(), 1);
		drop(clone);
		assert_eq!(mock.active_subscriptions(), 0);
	}
}
