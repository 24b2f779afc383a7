//! The resilient request pipeline: admission, credential attachment, send,
//! classification, and the retry/refresh/cache stages around one transport.

mod metrics;

pub use metrics::PipelineMetrics;

// crates.io
use tokio::time::{self, Instant};
// self
use crate::{
	_prelude::*,
	auth::Credential,
	cache::{Fingerprint, ResponseCache},
	cancel::CancelSignal,
	config::{ClientConfig, WriteInvalidation, std_duration},
	http::{Request, Response, Transport},
	limit::RateLimiter,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	refresh::{RefreshCoordinator, RefreshExchange},
	retry::{RetryDecision, RetryPolicy, jittered},
	store::CredentialStore,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;

#[cfg(feature = "reqwest")]
/// Pipeline specialized for the crate's default reqwest transport.
pub type ReqwestPipeline = Pipeline<ReqwestTransport>;

/// Coordinates resilient execution of backend requests over one transport.
///
/// The pipeline owns its cache, limiter, and refresh coordinator as
/// explicitly constructed instances, so several independent clients can live
/// in one process and tests can build isolated pipelines. Stages run in a
/// fixed order per attempt: admission, credential attachment, send,
/// classification, then either a cache store, a backoff resend, a one-shot
/// refresh resend, or a terminal error.
///
/// Every suspension point (admission wait, send, refresh wait, backoff sleep)
/// honors both the overall deadline and the caller's cancellation signal, and
/// many `execute` calls may run concurrently against one pipeline.
pub struct Pipeline<T>
where
	T: ?Sized + Transport,
{
	transport: Arc<T>,
	refresh: RefreshCoordinator,
	cache: ResponseCache,
	limiter: RateLimiter,
	policy: RetryPolicy,
	config: ClientConfig,
	metrics: Arc<PipelineMetrics>,
}
impl<T> Pipeline<T>
where
	T: ?Sized + Transport,
{
	/// Creates a pipeline that reuses the caller-provided transport.
	pub fn with_transport(
		transport: impl Into<Arc<T>>,
		store: Arc<dyn CredentialStore>,
		exchange: Arc<dyn RefreshExchange>,
		config: ClientConfig,
	) -> Self {
		Self {
			transport: transport.into(),
			refresh: RefreshCoordinator::new(store, exchange),
			cache: ResponseCache::default(),
			limiter: RateLimiter::from_config(&config),
			policy: RetryPolicy::from_config(&config),
			metrics: Default::default(),
			config,
		}
	}

	/// Installs the callback fired once per failed refresh episode.
	pub fn with_session_expired_hook(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
		self.refresh.set_session_expired_hook(hook);

		self
	}

	/// Read cache handle, for logout flushes and periodic sweeps.
	pub fn cache(&self) -> &ResponseCache {
		&self.cache
	}

	/// Always-on pipeline counters.
	pub fn metrics(&self) -> &PipelineMetrics {
		&self.metrics
	}

	/// Executes one logical request through every resilience stage.
	///
	/// Resolves with the backend response or exactly one terminal
	/// [`Error`]; transient failures are retried internally first.
	pub async fn execute(&self, request: Request) -> Result<Response> {
		const KIND: FlowKind = FlowKind::Execute;

		let span = FlowSpan::new(KIND, "execute");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.execute_inner(&request)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => {
				self.metrics.record_failure();
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);
			},
		}

		result
	}

	async fn execute_inner(&self, request: &Request) -> Result<Response> {
		self.metrics.record_request();

		let deadline = Instant::now()
			+ std_duration(request.timeout.unwrap_or(self.config.request_timeout));
		let cancel = request.cancel.clone();
		let cacheable = request.method.is_cacheable() && !request.bypass_cache;
		let fingerprint = Fingerprint::of(request);

		if cacheable {
			if let Some(hit) = self.cache.get(&fingerprint, OffsetDateTime::now_utc()) {
				self.metrics.record_cache_hit();

				return Ok(hit);
			}
		}

		let mut attempt: u32 = 1;
		let mut refresh_attempted = false;
		let mut admission_due = true;

		loop {
			if admission_due {
				self.admit(deadline, cancel.as_ref()).await?;
			}

			admission_due = true;

			let (epoch, credential) = self.refresh.snapshot().await;
			let outbound = prepare(request, credential.as_ref());
			let (error, retry_after) = match self
				.dispatch(&outbound, deadline, cancel.as_ref())
				.await
			{
				Ok(response) if response.is_success() => {
					if cacheable {
						self.cache.set(
							&fingerprint,
							response.clone(),
							OffsetDateTime::now_utc(),
							self.config.cache_ttl,
						);
					}
					if !request.method.is_safe() {
						self.invalidate_after_write(request);
					}

					return Ok(response);
				},
				Ok(response) if response.status == 401 => {
					if refresh_attempted {
						// The one-shot flag: this request already rode a
						// refresh, so a second 401 ends the session.
						self.refresh.notify_session_expired();

						return Err(Error::auth_expired(
							"backend rejected the refreshed credential",
						));
					}

					refresh_attempted = true;
					self.metrics.record_refresh();

					let span = FlowSpan::new(FlowKind::Refresh, "ensure_fresh");

					obs::record_flow_outcome(FlowKind::Refresh, FlowOutcome::Attempt);

					match span
						.instrument(self.await_refresh(epoch, deadline, cancel.as_ref()))
						.await
					{
						Ok(_) => {
							obs::record_flow_outcome(FlowKind::Refresh, FlowOutcome::Success);

							// Resend exactly once with the rotated credential,
							// skipping re-admission for the paired send.
							admission_due = false;

							continue;
						},
						Err(e) => {
							obs::record_flow_outcome(FlowKind::Refresh, FlowOutcome::Failure);

							return Err(e);
						},
					}
				},
				Ok(response) => {
					let hint = response.retry_after();

					(Error::from_status(response.status), hint)
				},
				Err(error @ Error::Cancelled) => return Err(error),
				Err(error) => (error, None),
			};
			let Some(kind) = error.retry_kind() else {
				return Err(error);
			};

			if error.is_ambiguous() && !request.idempotent {
				// The backend may have executed the write; resending could
				// duplicate the side effect.
				return Err(error);
			}

			match self.policy.decide(kind, attempt) {
				RetryDecision::GiveUp => return Err(error),
				RetryDecision::Retry { delay } => {
					let floor = retry_after.unwrap_or(Duration::ZERO);

					self.metrics.record_retry();
					self.backoff(jittered(delay.max(floor)), deadline, cancel.as_ref()).await?;

					attempt += 1;
				},
			}
		}
	}

	async fn admit(&self, deadline: Instant, cancel: Option<&CancelSignal>) -> Result<()> {
		tokio::select! {
			biased;
			_ = cancel_wait(cancel) => Err(Error::Cancelled),
			_ = time::sleep_until(deadline) => Err(Error::RateLimitExceeded),
			_ = self.limiter.admit() => Ok(()),
		}
	}

	async fn dispatch(
		&self,
		outbound: &Request,
		deadline: Instant,
		cancel: Option<&CancelSignal>,
	) -> Result<Response> {
		tokio::select! {
			biased;
			_ = cancel_wait(cancel) => Err(Error::Cancelled),
			_ = time::sleep_until(deadline) => Err(Error::Timeout),
			sent = self.transport.send(outbound) => sent.map_err(Error::from),
		}
	}

	async fn await_refresh(
		&self,
		epoch: u64,
		deadline: Instant,
		cancel: Option<&CancelSignal>,
	) -> Result<Credential> {
		tokio::select! {
			biased;
			_ = cancel_wait(cancel) => Err(Error::Cancelled),
			_ = time::sleep_until(deadline) => Err(Error::Timeout),
			refreshed = self.refresh.ensure_fresh(epoch) => refreshed,
		}
	}

	async fn backoff(
		&self,
		delay: Duration,
		deadline: Instant,
		cancel: Option<&CancelSignal>,
	) -> Result<()> {
		tokio::select! {
			biased;
			_ = cancel_wait(cancel) => Err(Error::Cancelled),
			_ = time::sleep_until(deadline) => Err(Error::Timeout),
			_ = time::sleep(std_duration(delay)) => Ok(()),
		}
	}

	fn invalidate_after_write(&self, request: &Request) {
		match self.config.write_invalidation {
			WriteInvalidation::Disabled => (),
			WriteInvalidation::PathPrefix => self.cache.invalidate_prefix(request.url.path()),
			WriteInvalidation::Flush => self.cache.clear(),
		}
	}
}
#[cfg(feature = "reqwest")]
impl Pipeline<ReqwestTransport> {
	/// Creates a pipeline over a freshly built reqwest transport.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		exchange: Arc<dyn RefreshExchange>,
		config: ClientConfig,
	) -> Result<Self, crate::error::ConfigError> {
		Ok(Self::with_transport(ReqwestTransport::new()?, store, exchange, config))
	}
}
impl<T> Debug for Pipeline<T>
where
	T: ?Sized + Transport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Pipeline")
			.field("config", &self.config)
			.field("policy", &self.policy)
			.field("cached_entries", &self.cache.len())
			.finish()
	}
}

fn prepare(request: &Request, credential: Option<&Credential>) -> Request {
	let mut outbound = request.clone();

	if let Some(credential) = credential {
		outbound.headers.insert("authorization".into(), credential.bearer());
	}

	outbound
}

async fn cancel_wait(cancel: Option<&CancelSignal>) {
	match cancel {
		Some(signal) => signal.cancelled().await,
		None => std::future::pending().await,
	}
}
