//! Abort signalling for in-flight waits.
//!
//! A scenario owns one [`AbortHandle`]; every receipt poll and event wait it
//! starts receives a clone of the matching [`AbortSignal`]. Firing the handle
//! wakes all of them.

use tokio::sync::watch;

/// Creates a connected handle / signal pair.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
	let (tx, rx) = watch::channel(false);
	(AbortHandle(tx), AbortSignal(Some(rx)))
}

/// Sending side of an abort pair.
#[derive(Debug)]
pub struct AbortHandle(watch::Sender<bool>);

impl AbortHandle {
	/// Fires the abort. Repeated calls are no-ops.
	pub fn abort(&self) {
		self.0.send_replace(true);
	}

	pub fn is_aborted(&self) -> bool {
		*self.0.borrow()
	}

	/// Returns another signal observing this handle.
	pub fn signal(&self) -> AbortSignal {
		AbortSignal(Some(self.0.subscribe()))
	}
}

/// Receiving side of an abort pair.
#[derive(Debug, Clone)]
pub struct AbortSignal(Option<watch::Receiver<bool>>);

impl AbortSignal {
	/// A signal that never fires.
	pub fn never() -> Self {
		Self(None)
	}

	pub fn is_aborted(&self) -> bool {
		self.0.as_ref().is_some_and(|rx| *rx.borrow())
	}

	/// Resolves once the abort fires.
	///
	/// Pends forever if the handle was dropped without firing.
	pub async fn aborted(&mut self) {
		match self.0.as_mut() {
			Some(rx) => {
				if rx.wait_for(|aborted| *aborted).await.is_err() {
					std::future::pending::<()>().await;
				}
			},
			None => std::future::pending::<()>().await,
		}
	}
}

impl Default for AbortSignal {
	fn default() -> Self {
		Self::never()
	}
}
