//! Caller-driven cancellation observed at every pipeline suspension point.

// crates.io
use tokio::sync::watch;
// self
use crate::_prelude::*;

/// Caller-side handle that fires the paired [`CancelSignal`].
///
/// Cancellation is edge-triggered and permanent: once fired, every clone of
/// the paired signal reports cancelled forever. Dropping the handle without
/// firing leaves the request uncancelled.
#[derive(Debug)]
pub struct CancelHandle {
	tx: watch::Sender<bool>,
}
impl CancelHandle {
	/// Fires the signal; all suspension points observing it abort with
	/// [`Error::Cancelled`](crate::error::Error::Cancelled).
	pub fn cancel(&self) {
		let _ = self.tx.send(true);
	}
}

/// Cloneable signal a request carries into the pipeline.
#[derive(Clone, Debug)]
pub struct CancelSignal {
	rx: watch::Receiver<bool>,
}
impl CancelSignal {
	/// Creates a connected handle/signal pair.
	pub fn pair() -> (CancelHandle, Self) {
		let (tx, rx) = watch::channel(false);

		(CancelHandle { tx }, Self { rx })
	}

	/// Returns `true` once the paired handle has fired.
	pub fn is_cancelled(&self) -> bool {
		*self.rx.borrow()
	}

	/// Resolves when the paired handle fires; never resolves if the handle is
	/// dropped unfired.
	pub async fn cancelled(&self) {
		let mut rx = self.rx.clone();

		if rx.wait_for(|fired| *fired).await.is_err() {
			std::future::pending::<()>().await;
		}
	}
}
