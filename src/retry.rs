//! Pure retry decisions: per-kind eligibility, the backoff curve, and jitter.

// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, config::ClientConfig};

const MAX_BACKOFF_SHIFT: u32 = 20;

/// Transient failure classes eligible for a retry consultation.
///
/// `401` never appears here; unauthorized responses go through the
/// credential-refresh protocol, which is a one-shot resend rather than a
/// backoff retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RetryKind {
	/// Connection-level failure (refused, reset, DNS).
	Network,
	/// Deadline elapsed with no response.
	Timeout,
	/// Backend answered 429.
	RateLimited,
	/// Backend answered 503.
	Unavailable,
}
impl RetryKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RetryKind::Network => "network",
			RetryKind::Timeout => "timeout",
			RetryKind::RateLimited => "rate_limited",
			RetryKind::Unavailable => "unavailable",
		}
	}
}
impl Display for RetryKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome of a retry consultation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
	/// Resend after waiting out the delay.
	Retry {
		/// Backoff delay before the next attempt.
		delay: Duration,
	},
	/// Budget exhausted; the last error propagates to the caller.
	GiveUp,
}

/// Deterministic retry policy, free of I/O and shared state.
///
/// `attempt` counts completed sends, starting at 1; the policy allows
/// `max_retries` resends beyond the first, so a budget of 3 yields at most
/// four sends. The curve is `base_delay * 2^(attempt - 1)` capped at
/// `max_delay`, which makes consecutive delays non-decreasing. Jitter is
/// deliberately kept out of [`decide`](Self::decide) so the curve stays
/// testable; the pipeline applies [`jittered`] on top.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Resend budget for network/timeout/503 failures.
	pub max_retries: u32,
	/// Separate resend budget for 429 responses.
	pub rate_limit_retries: u32,
	/// Delay before the first resend.
	pub base_delay: Duration,
	/// Ceiling applied to the exponential curve.
	pub max_delay: Duration,
}
impl RetryPolicy {
	/// Extracts the policy knobs from a relay config.
	pub fn from_config(config: &ClientConfig) -> Self {
		Self {
			max_retries: config.max_retries,
			rate_limit_retries: config.rate_limit_retries,
			base_delay: config.base_delay,
			max_delay: config.max_delay,
		}
	}

	/// Decides whether attempt `attempt` may be followed by a resend.
	pub fn decide(&self, kind: RetryKind, attempt: u32) -> RetryDecision {
		let budget = match kind {
			RetryKind::RateLimited => self.rate_limit_retries,
			_ => self.max_retries,
		};

		if attempt > budget {
			return RetryDecision::GiveUp;
		}

		RetryDecision::Retry { delay: self.backoff(attempt) }
	}

	/// Backoff delay scheduled after the `attempt`-th completed send.
	pub fn backoff(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
		let delay = self.base_delay.saturating_mul(1 << exponent);

		delay.min(self.max_delay)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::from_config(&ClientConfig::default())
	}
}

/// Adds up to ten percent of random jitter on top of a backoff delay.
///
/// The jitter is additive only, so the curve's monotonicity survives: doubling
/// always outgrows a ten percent bump on the previous delay.
pub fn jittered(delay: Duration) -> Duration {
	let millis = u64::try_from(delay.whole_milliseconds().max(0)).unwrap_or(u64::MAX);
	let range = millis / 10;

	if range == 0 {
		return delay;
	}

	let extra = rand::rng().random_range(0..=range);

	delay + Duration::milliseconds(extra as i64)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn default_curve_doubles_from_one_second() {
		let policy = RetryPolicy::default();

		assert_eq!(
			policy.decide(RetryKind::Unavailable, 1),
			RetryDecision::Retry { delay: Duration::seconds(1) }
		);
		assert_eq!(
			policy.decide(RetryKind::Unavailable, 2),
			RetryDecision::Retry { delay: Duration::seconds(2) }
		);
		assert_eq!(
			policy.decide(RetryKind::Unavailable, 3),
			RetryDecision::Retry { delay: Duration::seconds(4) }
		);
		assert_eq!(policy.decide(RetryKind::Unavailable, 4), RetryDecision::GiveUp);
	}

	#[test]
	fn rate_limit_budget_is_tracked_separately() {
		let policy = RetryPolicy { rate_limit_retries: 1, ..RetryPolicy::default() };

		assert!(matches!(
			policy.decide(RetryKind::RateLimited, 1),
			RetryDecision::Retry { .. }
		));
		assert_eq!(policy.decide(RetryKind::RateLimited, 2), RetryDecision::GiveUp);
		// The general budget is untouched.
		assert!(matches!(policy.decide(RetryKind::Network, 2), RetryDecision::Retry { .. }));
	}

	#[test]
	fn zero_budget_never_retries() {
		let policy = RetryPolicy { max_retries: 0, ..RetryPolicy::default() };

		assert_eq!(policy.decide(RetryKind::Timeout, 1), RetryDecision::GiveUp);
	}

	#[test]
	fn backoff_is_monotonic_and_capped() {
		let policy = RetryPolicy {
			max_retries: 10,
			base_delay: Duration::milliseconds(100),
			max_delay: Duration::seconds(2),
			..RetryPolicy::default()
		};
		let mut previous = Duration::ZERO;

		for attempt in 1..=10 {
			let delay = policy.backoff(attempt);

			assert!(delay >= previous, "Backoff curve must never shrink between attempts.");
			assert!(delay <= Duration::seconds(2));

			previous = delay;
		}

		assert_eq!(policy.backoff(10), Duration::seconds(2));
	}

	#[test]
	fn huge_attempt_counts_do_not_overflow() {
		let policy = RetryPolicy { max_delay: Duration::hours(1), ..RetryPolicy::default() };

		assert_eq!(policy.backoff(u32::MAX), Duration::hours(1));
	}

	#[test]
	fn jitter_stays_within_ten_percent() {
		let delay = Duration::seconds(2);

		for _ in 0..64 {
			let padded = jittered(delay);

			assert!(padded >= delay);
			assert!(padded <= delay + Duration::milliseconds(200));
		}
	}

	#[test]
	fn jitter_passes_tiny_delays_through() {
		assert_eq!(jittered(Duration::milliseconds(5)), Duration::milliseconds(5));
		assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
	}
}
