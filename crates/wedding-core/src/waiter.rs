//! One-shot event waits.
//!
//! A [`PendingEvent`] moves from `Listening` to exactly one of `Matched`,
//! `TimedOut` or `Cancelled`. The transition happens under the state lock,
//! which is also held while the predicate runs, so the predicate is never
//! called once the wait is over. The underlying subscription is closed
//! exactly once, by the listening task, after the transition.

use crate::CoordinationError;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::instrument;
use wedding_contract::{ContractHandle, EventSubscription};
use wedding_types::{AbortSignal, DecodedEvent};

/// Lifecycle of one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
	Listening,
	Matched,
	TimedOut,
	Cancelled,
}

impl WaitState {
	pub fn is_terminal(self) -> bool {
		self != Self::Listening
	}
}

#[derive(Debug, Clone)]
struct SharedState(Arc<Mutex<WaitState>>);

impl SharedState {
	fn lock(&self) -> MutexGuard<'_, WaitState> {
		self.0.lock().unwrap_or_else(|e| e.into_inner())
	}

	fn get(&self) -> WaitState {
		*self.lock()
	}

	/// Leaves `Listening` for `to`. Returns `false` if already terminal.
	fn finish(&self, to: WaitState) -> bool {
		let mut state = self.lock();
		if state.is_terminal() {
			return false;
		}
		*state = to;
		true
	}
}

/// Starts event waits. Every wait it starts also ends when `abort` fires.
#[derive(Debug, Clone, Default)]
pub struct EventWaiter {
	abort: AbortSignal,
}

impl EventWaiter {
	pub fn new(abort: AbortSignal) -> Self {
		Self { abort }
	}

	/// Waits up to `timeout` for the first `event` on `contract` satisfying
	/// `predicate`.
	pub async fn wait_for<P>(
		&self,
		contract: &ContractHandle,
		event: &str,
		predicate: P,
		timeout: Duration,
	) -> Result<DecodedEvent, CoordinationError>
	where
		P: Fn(&DecodedEvent) -> bool + Send + 'static,
	{
		self.start(contract, event, predicate, Instant::now() + timeout)
			.await?
			.outcome()
			.await
	}

	/// Registers the subscription, then listens in the background.
	///
	/// Only logs mined after this returns are seen, so start the wait before
	/// submitting the transaction that emits the event.
	#[instrument(skip_all, fields(contract = %contract.name(), event = %event))]
	pub async fn start<P>(
		&self,
		contract: &ContractHandle,
		event: &str,
		predicate: P,
		deadline: Instant,
	) -> Result<PendingEvent, CoordinationError>
	where
		P: Fn(&DecodedEvent) -> bool + Send + 'static,
	{
		let subscription = contract
			.subscribe(event)
			.await
			.map_err(CoordinationError::from)?;
		let event = subscription.event_name().to_string();
		let state = SharedState(Arc::new(Mutex::new(WaitState::Listening)));
		let (cancel, cancelled) = watch::channel(false);

		tracing::debug!(subscription = %subscription.id(), "Listening for event");

		let task = tokio::spawn(listen(
			subscription,
			predicate,
			state.clone(),
			cancelled,
			self.abort.clone(),
			deadline,
			deadline.saturating_duration_since(Instant::now()),
		));

		Ok(PendingEvent {
			event,
			state,
			cancel,
			task: Some(task),
		})
	}
}

async fn listen<P>(
	mut subscription: EventSubscription,
	predicate: P,
	state: SharedState,
	mut cancelled: watch::Receiver<bool>,
	mut abort: AbortSignal,
	deadline: Instant,
	budget: Duration,
) -> Result<DecodedEvent, CoordinationError>
where
	P: Fn(&DecodedEvent) -> bool + Send + 'static,
{
	let event = subscription.event_name().to_string();

	let outcome = loop {
		tokio::select! {
			biased;
			_ = cancellation(&mut cancelled) => {
				state.finish(WaitState::Cancelled);
				break Err(CoordinationError::Cancelled(event.clone()));
			},
			_ = abort.aborted() => {
				state.finish(WaitState::Cancelled);
				break Err(CoordinationError::Cancelled(event.clone()));
			},
			_ = tokio::time::sleep_until(deadline) => {
				state.finish(WaitState::TimedOut);
				break Err(CoordinationError::EventTimeout {
					event: event.clone(),
					timeout: budget,
				});
			},
			batch = subscription.next_batch() => match batch {
				Some(batch) => {
					if let Some(matched) = first_match(batch, &predicate, &state) {
						break matched;
					}
				},
				None => {
					state.finish(WaitState::Cancelled);
					break Err(CoordinationError::SubscriptionClosed(event.clone()));
				},
			},
		}
	};

	subscription.close();
	match &outcome {
		Ok(matched) => tracing::debug!(
			event = %event,
			block = matched.block_number,
			log_index = matched.log_index,
			"Event matched"
		),
		Err(e) => tracing::debug!(event = %event, "Event wait ended: {}", e),
	}
	outcome
}

/// Resolves on `cancel()` or when the [`PendingEvent`] is gone.
async fn cancellation(cancelled: &mut watch::Receiver<bool>) {
	let _ = cancelled.wait_for(|c| *c).await;
}

/// Earliest event in `batch` satisfying `predicate`, evaluated under the
/// state lock. `Some(Err)` if another party ended the wait first.
fn first_match<P>(
	batch: Vec<DecodedEvent>,
	predicate: &P,
	state: &SharedState,
) -> Option<Result<DecodedEvent, CoordinationError>>
where
	P: Fn(&DecodedEvent) -> bool,
{
	for candidate in batch {
		let mut current = state.lock();
		if current.is_terminal() {
			return Some(Err(CoordinationError::Cancelled(candidate.name)));
		}
		if predicate(&candidate) {
			*current = WaitState::Matched;
			return Some(Ok(candidate));
		}
	}
	None
}

/// A started wait.
///
/// Dropping it without awaiting [`outcome`](Self::outcome) cancels the wait.
#[derive(Debug)]
pub struct PendingEvent {
	event: String,
	state: SharedState,
	cancel: watch::Sender<bool>,
	task: Option<JoinHandle<Result<DecodedEvent, CoordinationError>>>,
}

impl PendingEvent {
	pub fn event(&self) -> &str {
		&self.event
	}

	pub fn state(&self) -> WaitState {
		self.state.get()
	}

	/// Cancels a listening wait. A no-op returning `false` once terminal.
	pub fn cancel(&self) -> bool {
		if !self.state.finish(WaitState::Cancelled) {
			return false;
		}
		self.cancel.send_replace(true);
		true
	}

	/// Waits for the terminal outcome.
	pub async fn outcome(mut self) -> Result<DecodedEvent, CoordinationError> {
		let Some(task) = self.task.take() else {
			return Err(CoordinationError::Cancelled(self.event.clone()));
		};
		match task.await {
			Ok(outcome) => outcome,
			Err(e) => {
				self.state.finish(WaitState::Cancelled);
				Err(CoordinationError::Cancelled(format!("{} ({})", self.event, e)))
			},
		}
	}
}

impl Drop for PendingEvent {
	fn drop(&mut self) {
		self.cancel();
	}
}
