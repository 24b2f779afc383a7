//! Thread-safe in-memory [`CredentialStore`] used by production clients and tests alike.

// self
use crate::{
	_prelude::*,
	auth::Credential,
	store::{CredentialStore, StoreFuture},
};

type CredentialSlot = Arc<RwLock<Option<Credential>>>;

/// In-process credential slot behind a read-write lock.
///
/// Readers (every outgoing request) take the shared side; the refresh
/// protocol's rotations take the exclusive side, so a rotation is observed
/// atomically and no reader ever sees a half-updated pair.
#[derive(Clone, Debug, Default)]
pub struct MemoryCredentialStore(CredentialSlot);
impl MemoryCredentialStore {
	/// Creates a store pre-populated with a credential, as after login.
	pub fn with_credential(credential: Credential) -> Self {
		Self(Arc::new(RwLock::new(Some(credential))))
	}

	fn get_now(slot: CredentialSlot) -> Option<Credential> {
		slot.read().clone()
	}

	fn set_now(slot: CredentialSlot, credential: Credential) {
		*slot.write() = Some(credential);
	}

	fn clear_now(slot: CredentialSlot) {
		*slot.write() = None;
	}
}
impl CredentialStore for MemoryCredentialStore {
	fn get(&self) -> StoreFuture<'_, Option<Credential>> {
		let slot = self.0.clone();

		Box::pin(async move { Self::get_now(slot) })
	}

	fn set(&self, credential: Credential) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move { Self::set_now(slot, credential) })
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move { Self::clear_now(slot) })
	}
}
