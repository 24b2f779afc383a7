//! Storage contract and built-in backend for the relay credential pair.

pub mod memory;

pub use memory::MemoryCredentialStore;

// self
use crate::{_prelude::*, auth::Credential};

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a + Send>>;

/// Storage backend contract for the relay's credential pair.
///
/// The store holds at most one pair per client and is read on every outgoing
/// request. The refresh protocol is its only writer: [`set`](Self::set) on a
/// successful rotation, [`clear`](Self::clear) on an irrecoverable failure.
/// Implementations must never block readers behind a stalled writer
/// indefinitely; the built-in backend uses a read-write lock.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Returns the current credential, if a session is active.
	fn get(&self) -> StoreFuture<'_, Option<Credential>>;

	/// Replaces the stored credential after login or a successful refresh.
	fn set(&self, credential: Credential) -> StoreFuture<'_, ()>;

	/// Drops the stored credential at logout or after refresh fails for good.
	fn clear(&self) -> StoreFuture<'_, ()>;
}
