//! Relay configuration: retry budget, deadlines, cache TTL, and throttling knobs.

// self
use crate::_prelude::*;

/// Recognized relay options with production defaults.
///
/// Construct with [`ClientConfig::default`] and override individual knobs with
/// the `with_*` helpers. The config is plain data; the pipeline copies what it
/// needs at construction time, so later mutation of a config value never
/// affects an already-built pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
	/// Retries allowed after the initial send for network/timeout/503 failures.
	pub max_retries: u32,
	/// Separate retry cap for 429 responses.
	pub rate_limit_retries: u32,
	/// First backoff delay; doubles on every subsequent retry.
	pub base_delay: Duration,
	/// Upper bound applied to the exponential backoff curve.
	pub max_delay: Duration,
	/// Overall per-request deadline covering admission, sends, and backoff.
	pub request_timeout: Duration,
	/// Lifetime of cached GET responses.
	pub cache_ttl: Duration,
	/// Admissions permitted per one-second window.
	pub max_requests_per_second: u32,
	/// Interval at which a queued request re-checks the admission window.
	pub admission_tick: Duration,
	/// Cache invalidation behavior applied after a successful write.
	pub write_invalidation: WriteInvalidation,
}
impl ClientConfig {
	/// Overrides the retry cap for network/timeout/503 failures.
	pub fn with_max_retries(mut self, retries: u32) -> Self {
		self.max_retries = retries;

		self
	}

	/// Overrides the retry cap for 429 responses.
	pub fn with_rate_limit_retries(mut self, retries: u32) -> Self {
		self.rate_limit_retries = retries;

		self
	}

	/// Overrides the first backoff delay.
	pub fn with_base_delay(mut self, delay: Duration) -> Self {
		self.base_delay = delay;

		self
	}

	/// Overrides the overall per-request deadline.
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Overrides the cached-response lifetime.
	pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
		self.cache_ttl = ttl;

		self
	}

	/// Overrides the admissions-per-second budget.
	pub fn with_max_requests_per_second(mut self, budget: u32) -> Self {
		self.max_requests_per_second = budget;

		self
	}

	/// Overrides the write invalidation policy.
	pub fn with_write_invalidation(mut self, policy: WriteInvalidation) -> Self {
		self.write_invalidation = policy;

		self
	}
}
impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			max_retries: 3,
			rate_limit_retries: 3,
			base_delay: Duration::seconds(1),
			max_delay: Duration::seconds(30),
			request_timeout: Duration::seconds(30),
			cache_ttl: Duration::minutes(5),
			max_requests_per_second: 10,
			admission_tick: Duration::milliseconds(100),
			write_invalidation: WriteInvalidation::PathPrefix,
		}
	}
}

/// Cache behavior applied after a write (POST/PUT/PATCH/DELETE) succeeds.
///
/// The product has not settled on one rule, so the knob keeps the observed
/// alternatives selectable per client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteInvalidation {
	/// Leave cached reads untouched.
	Disabled,
	/// Drop cached reads whose resource path starts with the written path.
	#[default]
	PathPrefix,
	/// Drop the entire cache.
	Flush,
}

/// Converts a [`Duration`] into the std form tokio's timers accept.
///
/// Negative durations clamp to zero rather than panicking.
pub(crate) fn std_duration(duration: Duration) -> std::time::Duration {
	duration.try_into().unwrap_or(std::time::Duration::ZERO)
}
