//! Fixed-window rate limiting with FIFO admission.

// crates.io
use tokio::time::{self, Instant};
// self
use crate::{
	_prelude::*,
	config::{ClientConfig, std_duration},
};

/// FIFO fixed-window limiter gating outbound request starts.
///
/// Admissions are counted against a fixed window (one second in production
/// configs). While the window has capacity, [`admit`](Self::admit) returns
/// immediately. Once saturated, callers queue on a fair async mutex and only
/// the head of the queue re-polls the window on a periodic tick, so requests
/// are admitted strictly in arrival order and the counter only ever sees one
/// contender, ruling out over-admission. Starvation is bounded by the window
/// length: every roll-over frees `max_per_window` slots for the queue head.
///
/// Dropping the `admit` future (caller cancellation or deadline expiry)
/// releases the caller's queue position without consuming a slot.
#[derive(Debug)]
pub struct RateLimiter {
	max_per_window: u32,
	window: std::time::Duration,
	tick: std::time::Duration,
	turn: AsyncMutex<()>,
	state: Mutex<WindowState>,
}
#[derive(Debug)]
struct WindowState {
	window_started_at: Instant,
	admitted: u32,
}

impl RateLimiter {
	/// Creates a limiter admitting `max_per_window` starts per `window`.
	///
	/// A zero budget is clamped to one admission per window so the queue can
	/// always drain.
	pub fn new(max_per_window: u32, window: Duration, tick: Duration) -> Self {
		Self {
			max_per_window: max_per_window.max(1),
			window: std_duration(window),
			tick: std_duration(tick).max(std::time::Duration::from_millis(1)),
			turn: AsyncMutex::new(()),
			state: Mutex::new(WindowState { window_started_at: Instant::now(), admitted: 0 }),
		}
	}

	/// Builds the production limiter from a relay config.
	pub fn from_config(config: &ClientConfig) -> Self {
		Self::new(config.max_requests_per_second, Duration::seconds(1), config.admission_tick)
	}

	/// Suspends the caller until the window admits it, in FIFO order.
	pub async fn admit(&self) {
		let _turn = self.turn.lock().await;

		loop {
			if self.try_admit_at(Instant::now()) {
				return;
			}

			time::sleep(self.tick).await;
		}
	}

	fn try_admit_at(&self, now: Instant) -> bool {
		let mut state = self.state.lock();

		if now.duration_since(state.window_started_at) >= self.window {
			state.window_started_at = now;
			state.admitted = 0;
		}
		if state.admitted < self.max_per_window {
			state.admitted += 1;

			return true;
		}

		false
	}
}
