//! Pull-style event subscriptions.

use crate::ContractError;
use alloy_dyn_abi::EventExt;
use alloy_json_abi::Event;
use std::sync::Arc;
use tokio::sync::mpsc;
use wedding_chain::ChainService;
use wedding_types::{DecodedEvent, RawLog, SubscriptionId};

/// Decodes `log` against `event`, keeping arguments in declaration order.
pub(crate) fn decode_log(event: &Event, log: &RawLog) -> Result<DecodedEvent, ContractError> {
	let decoded = event
		.decode_log_parts(log.topics.iter().copied(), &log.data, true)
		.map_err(|e| ContractError::Decoding {
			item: event.name.clone(),
			message: e.to_string(),
		})?;

	let mut indexed = decoded.indexed.into_iter();
	let mut body = decoded.body.into_iter();
	let mut args = Vec::with_capacity(event.inputs.len());
	for input in &event.inputs {
		let value = if input.indexed {
			indexed.next()
		} else {
			body.next()
		};
		let value = value.ok_or_else(|| ContractError::Decoding {
			item: event.name.clone(),
			message: format!("missing value for '{}'", input.name),
		})?;
		args.push((input.name.clone(), value));
	}

	Ok(DecodedEvent::from_log(event.name.clone(), log, args))
}

/// A chain log subscription decoded against one event.
///
/// The chain-level registration is released by [`close`](Self::close) or on
/// drop, whichever comes first, and never twice.
pub struct EventSubscription {
	event: Event,
	chain: Arc<ChainService>,
	id: SubscriptionId,
	receiver: mpsc::UnboundedReceiver<RawLog>,
	closed: bool,
}

impl std::fmt::Debug for EventSubscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventSubscription")
			.field("event", &self.event.name)
			.field("id", &self.id)
			.field("closed", &self.closed)
			.finish()
	}
}

impl EventSubscription {
	pub(crate) fn new(
		event: Event,
		chain: Arc<ChainService>,
		id: SubscriptionId,
		receiver: mpsc::UnboundedReceiver<RawLog>,
	) -> Self {
		Self {
			event,
			chain,
			id,
			receiver,
			closed: false,
		}
	}

	pub fn id(&self) -> SubscriptionId {
		self.id
	}

	pub fn event_name(&self) -> &str {
		&self.event.name
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}

	/// Waits for the next delivery and returns every log available with it,
	/// decoded and ordered by (block, log index).
	///
	/// Logs that fail to decode are skipped. Returns `None` once the
	/// subscription is closed or the chain side has gone away.
	pub async fn next_batch(&mut self) -> Option<Vec<DecodedEvent>> {
		if self.closed {
			return None;
		}

		let first = self.receiver.recv().await?;
		let mut logs = vec![first];
		while let Ok(log) = self.receiver.try_recv() {
			logs.push(log);
		}
		logs.sort_by_key(RawLog::position);

		let batch = logs
			.iter()
			.filter_map(|log| match decode_log(&self.event, log) {
				Ok(event) => Some(event),
				Err(e) => {
					tracing::warn!(subscription = %self.id, "Skipping undecodable log: {}", e);
					None
				},
			})
			.collect();
		Some(batch)
	}

	/// Releases the chain registration. Returns `false` if already closed.
	pub fn close(&mut self) -> bool {
		if self.closed {
			return false;
		}
		self.closed = true;
		self.receiver.close();
		self.chain.unsubscribe(self.id);
		tracing::debug!(subscription = %self.id, event = %self.event.name, "Event subscription closed");
		true
	}
}

impl Drop for EventSubscription {
	fn drop(&mut self) {
		self.close();
	}
}
