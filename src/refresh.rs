//! Credential refresh orchestration with singleflight guards and epoch-based rotation.
//!
//! The relay exposes [`RefreshCoordinator`] so any number of concurrent
//! requests hitting a 401 collapse into a single refresh exchange. Rotation
//! is tracked by an epoch counter: every request snapshots the epoch when it
//! attaches a credential, and a 401 victim only starts an exchange when the
//! epoch is still the one it observed. Victims of the same episode subscribe
//! to the in-flight exchange's completion channel instead of issuing their
//! own call, and all of them resend exactly once with whatever the exchange
//! produced. The exchange itself runs as a detached task, so a caller that
//! cancels mid-wait never starves the remaining waiters.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::sync::watch;
// self
use crate::{_prelude::*, auth::Credential, store::CredentialStore};

/// Boxed future returned by [`RefreshExchange::refresh`].
pub type RefreshFuture<'a> =
	Pin<Box<dyn Future<Output = Result<Credential, RefreshError>> + 'a + Send>>;

/// Callback invoked when a refresh episode fails and the session is gone.
pub type SessionExpiredHook = Arc<dyn Fn() + Send + Sync>;

/// Single external call to the backend's token-refresh endpoint.
///
/// The relay treats the exchange as opaque: it spends the stored refresh
/// token and either produces a replacement credential or fails the episode.
/// Implementations must not retry internally; the coordinator owns the
/// episode lifecycle.
pub trait RefreshExchange
where
	Self: Send + Sync,
{
	/// Exchanges the refresh token for a fresh credential pair.
	fn refresh<'a>(&'a self, refresh_token: &'a str) -> RefreshFuture<'a>;
}

/// Failures produced by a [`RefreshExchange`].
#[derive(Debug, ThisError)]
pub enum RefreshError {
	/// The backend rejected the refresh token; the session is unrecoverable.
	#[error("Refresh token was rejected: {reason}.")]
	Rejected {
		/// Backend-supplied reason string.
		reason: String,
	},
	/// The refresh endpoint failed with a server status.
	#[error("Refresh endpoint failed with status {status}.")]
	Endpoint {
		/// HTTP status code returned by the refresh endpoint.
		status: u16,
	},
	/// The refresh endpoint was unreachable.
	#[error("Network error occurred while calling the refresh endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: Box<dyn StdError + Send + Sync>,
	},
	/// The refresh endpoint answered with a body the relay cannot read.
	#[error("Refresh endpoint returned a malformed credential payload.")]
	Malformed {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
}
impl RefreshError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Box::new(src) }
	}
}

#[derive(Debug, Deserialize)]
struct RefreshGrant {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
}

/// Reqwest-backed [`RefreshExchange`] posting the refresh token as JSON.
///
/// The endpoint contract is the backend's `POST /auth/refresh` shape: a JSON
/// object carrying `refresh_token`, answered by `{access_token,
/// refresh_token?}`. When the backend does not rotate the refresh token the
/// previous one stays in use.
#[cfg(feature = "reqwest")]
pub struct HttpRefreshExchange {
	client: ReqwestClient,
	endpoint: Url,
}
#[cfg(feature = "reqwest")]
impl HttpRefreshExchange {
	/// Creates an exchange against the provided refresh endpoint.
	pub fn new(endpoint: Url) -> Result<Self, crate::error::ConfigError> {
		let client = ReqwestClient::builder().redirect(reqwest::redirect::Policy::none()).build()?;

		Ok(Self { client, endpoint })
	}

	/// Reuses an existing [`ReqwestClient`] for the exchange.
	pub fn with_client(client: ReqwestClient, endpoint: Url) -> Self {
		Self { client, endpoint }
	}
}
#[cfg(feature = "reqwest")]
impl RefreshExchange for HttpRefreshExchange {
	fn refresh<'a>(&'a self, refresh_token: &'a str) -> RefreshFuture<'a> {
		Box::pin(async move {
			let response = self
				.client
				.post(self.endpoint.clone())
				.json(&serde_json::json!({ "refresh_token": refresh_token }))
				.send()
				.await
				.map_err(RefreshError::network)?;
			let status = response.status().as_u16();
			let body = response.bytes().await.map_err(RefreshError::network)?;

			if !(200..300).contains(&status) {
				if (400..500).contains(&status) {
					return Err(RefreshError::Rejected {
						reason: format!("refresh endpoint answered {status}"),
					});
				}

				return Err(RefreshError::Endpoint { status });
			}

			let mut deserializer = serde_json::Deserializer::from_slice(&body);
			let grant: RefreshGrant = serde_path_to_error::deserialize(&mut deserializer)
				.map_err(|source| RefreshError::Malformed { source })?;
			let refresh = grant.refresh_token.unwrap_or_else(|| refresh_token.to_owned());

			Ok(Credential::new(grant.access_token, refresh))
		})
	}
}

/// Singleflight coordinator guarding the refresh exchange.
///
/// At most one exchange is in flight at any time; the epoch counter and the
/// in-flight completion channel together realize the IDLE → REFRESHING →
/// IDLE/FAILED protocol. The session-expired hook fires at most once per
/// failed episode, no matter how many requests were waiting on it.
#[derive(Clone)]
pub struct RefreshCoordinator {
	inner: Arc<CoordinatorInner>,
}
struct CoordinatorInner {
	store: Arc<dyn CredentialStore>,
	exchange: Arc<dyn RefreshExchange>,
	epoch: AtomicU64,
	inflight: Mutex<Option<watch::Receiver<bool>>>,
	hook: Mutex<Option<SessionExpiredHook>>,
	notified_epoch: Mutex<Option<u64>>,
}

impl RefreshCoordinator {
	/// Creates a coordinator over the store and exchange.
	pub fn new(store: Arc<dyn CredentialStore>, exchange: Arc<dyn RefreshExchange>) -> Self {
		Self {
			inner: Arc::new(CoordinatorInner {
				store,
				exchange,
				epoch: AtomicU64::new(0),
				inflight: Mutex::new(None),
				hook: Mutex::new(None),
				notified_epoch: Mutex::new(None),
			}),
		}
	}

	/// Installs the callback fired once per failed refresh episode.
	pub fn set_session_expired_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
		*self.inner.hook.lock() = Some(Arc::new(hook));
	}

	/// Current rotation epoch; bumps on every store rotation or clear.
	pub fn epoch(&self) -> u64 {
		self.inner.epoch.load(Ordering::Acquire)
	}

	/// Reads the epoch and credential in an order safe for 401 attribution.
	///
	/// The epoch is read first: if a rotation lands between the two reads,
	/// the request carries a stale epoch with a fresh credential, which at
	/// worst skips one unnecessary exchange and never duplicates one.
	pub async fn snapshot(&self) -> (u64, Option<Credential>) {
		let epoch = self.epoch();
		let credential = self.inner.store.get().await;

		(epoch, credential)
	}

	/// Resolves a 401 observed under `observed_epoch` into a usable credential.
	///
	/// Returns the post-episode credential for a one-shot resend, or
	/// [`Error::AuthExpired`] when the episode failed. Waiters for an episode
	/// already in flight subscribe rather than exchanging; callers whose
	/// epoch is stale get the already-rotated credential immediately.
	pub async fn ensure_fresh(&self, observed_epoch: u64) -> Result<Credential> {
		if self.epoch() != observed_epoch {
			return self.outcome().await;
		}

		let subscription = {
			let mut slot = self.inner.inflight.lock();

			// The epoch is re-checked under the lock: an exchange that
			// completed between the fast path and here must not be re-run.
			if self.epoch() != observed_epoch {
				None
			} else if let Some(rx) = slot.as_ref() {
				Some(rx.clone())
			} else {
				let rx = self.spawn_exchange();

				*slot = Some(rx.clone());

				Some(rx)
			}
		};

		if let Some(mut rx) = subscription {
			// An Err here means the exchange task died with the channel open;
			// the store then still reflects the pre-episode state and the
			// outcome check below reports it faithfully.
			let _ = rx.wait_for(|done| *done).await;
		}

		self.outcome().await
	}

	/// Fires the session-expired hook unless this epoch already did.
	pub(crate) fn notify_session_expired(&self) {
		self.inner.notify_session_expired();
	}

	fn spawn_exchange(&self) -> watch::Receiver<bool> {
		let (tx, rx) = watch::channel(false);
		let inner = Arc::clone(&self.inner);

		// Detached on purpose: the originator may cancel or time out while
		// the exchange is in flight, and the remaining waiters still need the
		// episode to resolve.
		tokio::spawn(async move {
			inner.run_exchange().await;

			let _ = tx.send(true);
		});

		rx
	}

	async fn outcome(&self) -> Result<Credential> {
		match self.inner.store.get().await {
			Some(credential) => Ok(credential),
			None => Err(Error::auth_expired("credential refresh failed")),
		}
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("epoch", &self.epoch())
			.field("refreshing", &self.inner.inflight.lock().is_some())
			.finish()
	}
}

impl CoordinatorInner {
	async fn run_exchange(&self) {
		let refresh_token = self.store.get().await.map(|credential| credential.refresh_token);

		match refresh_token {
			Some(token) if !token.is_empty() => match self.exchange.refresh(token.expose()).await {
				Ok(credential) => {
					self.store.set(credential).await;
					self.epoch.fetch_add(1, Ordering::AcqRel);
				},
				Err(_err) => {
					#[cfg(feature = "tracing")]
					tracing::warn!(error = %_err, "Credential refresh failed; clearing the session.");

					self.store.clear().await;
					self.epoch.fetch_add(1, Ordering::AcqRel);
					self.notify_session_expired();
				},
			},
			// Nothing to spend: the caller was never signed in (or the pair
			// was already cleared), so the episode fails without the hook.
			_ => {
				self.store.clear().await;
				self.epoch.fetch_add(1, Ordering::AcqRel);
			},
		}

		*self.inflight.lock() = None;
	}

	fn notify_session_expired(&self) {
		let epoch = self.epoch.load(Ordering::Acquire);
		let hook = {
			let mut notified = self.notified_epoch.lock();

			if *notified == Some(epoch) {
				return;
			}

			*notified = Some(epoch);

			self.hook.lock().clone()
		};

		if let Some(hook) = hook {
			hook();
		}
	}
}
