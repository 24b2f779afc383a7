//! Relay-level error types shared across the pipeline, cache, limiter, and refresh protocol.

// self
use crate::{_prelude::*, retry::RetryKind};

/// Relay-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical relay error exposed by [`Pipeline::execute`](crate::pipeline::Pipeline::execute).
///
/// Every failed execution terminates with exactly one of these variants; the
/// pipeline never surfaces partial successes. Transient variants (network,
/// timeout, 429, 503) are retried internally and only reach the caller once
/// the retry budget is exhausted.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport-level failure (DNS, TCP, TLS) with no usable response.
	#[error("Network error occurred while contacting the backend.")]
	Network {
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
	/// The deadline elapsed before the backend responded.
	#[error("Request timed out before the backend responded.")]
	Timeout,
	/// Credential refresh failed or was impossible; the session must be re-established.
	#[error("Session has expired: {reason}.")]
	AuthExpired {
		/// Reason emitted by the refresh protocol.
		reason: String,
	},
	/// Admission into the rate limit window did not complete before the deadline.
	#[error("Rate limiter admission timed out while the window was saturated.")]
	RateLimitExceeded,
	/// Backend rejected the request with a client status.
	#[error("Backend rejected the request with status {status}.")]
	Client {
		/// HTTP status code (4xx).
		status: u16,
	},
	/// Backend failed with a server status.
	#[error("Backend failed with status {status}.")]
	Server {
		/// HTTP status code (5xx).
		status: u16,
	},
	/// The caller cancelled the request at a suspension point.
	#[error("Request was cancelled by the caller.")]
	Cancelled,
}
impl Error {
	/// Builds the error corresponding to a non-success HTTP status.
	///
	/// `401` never reaches this constructor: unauthorized responses are routed
	/// through the credential-refresh protocol and surface as [`Error::AuthExpired`].
	pub fn from_status(status: u16) -> Self {
		if (400..500).contains(&status) {
			Self::Client { status }
		} else {
			Self::Server { status }
		}
	}

	/// Convenience constructor for auth expiry with a reason string.
	pub fn auth_expired(reason: impl Into<String>) -> Self {
		Self::AuthExpired { reason: reason.into() }
	}

	/// Maps the error onto the retry policy's input when the failure is transient.
	///
	/// Non-transient failures return `None` and must propagate immediately.
	pub fn retry_kind(&self) -> Option<RetryKind> {
		match self {
			Self::Network { .. } => Some(RetryKind::Network),
			Self::Timeout => Some(RetryKind::Timeout),
			Self::Client { status: 429 } => Some(RetryKind::RateLimited),
			Self::Server { status: 503 } => Some(RetryKind::Unavailable),
			_ => None,
		}
	}

	/// Returns `true` when the backend may have executed the request despite the failure.
	///
	/// Ambiguous failures resend only for reads and requests the caller marked
	/// idempotent. Statuses such as 429 and 503 are definitive rejections and
	/// stay safe to resend regardless of method.
	pub fn is_ambiguous(&self) -> bool {
		matches!(self, Self::Network { .. } | Self::Timeout)
	}
}

/// Configuration and request-construction failures raised by the relay.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// A request or endpoint URL could not be parsed.
	#[error("URL is invalid.")]
	InvalidUrl {
		/// Underlying parsing failure.
		#[from]
		#[source]
		source: url::ParseError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures surfaced by [`Transport`](crate::http::Transport) implementations.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while sending the request.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The transport's own timeout elapsed before a response arrived.
	#[error("Transport timed out while sending the request.")]
	TimedOut,
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while sending the request.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::TimedOut } else { Self::network(e) }
	}
}
impl From<TransportError> for Error {
	fn from(e: TransportError) -> Self {
		match e {
			TransportError::Network { source } => Self::Network { source },
			TransportError::TimedOut => Self::Timeout,
			TransportError::Io(inner) => Self::Network { source: Box::new(inner) },
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn from_status_splits_client_and_server_ranges() {
		assert!(matches!(Error::from_status(404), Error::Client { status: 404 }));
		assert!(matches!(Error::from_status(422), Error::Client { status: 422 }));
		assert!(matches!(Error::from_status(500), Error::Server { status: 500 }));
		assert!(matches!(Error::from_status(503), Error::Server { status: 503 }));
	}

	#[test]
	fn retry_kind_covers_only_transient_classes() {
		assert_eq!(
			Error::Network { source: "refused".into() }.retry_kind(),
			Some(RetryKind::Network)
		);
		assert_eq!(Error::Timeout.retry_kind(), Some(RetryKind::Timeout));
		assert_eq!(Error::from_status(429).retry_kind(), Some(RetryKind::RateLimited));
		assert_eq!(Error::from_status(503).retry_kind(), Some(RetryKind::Unavailable));
		assert_eq!(Error::from_status(404).retry_kind(), None);
		assert_eq!(Error::from_status(500).retry_kind(), None);
		assert_eq!(Error::auth_expired("refresh rejected").retry_kind(), None);
		assert_eq!(Error::Cancelled.retry_kind(), None);
	}

	#[test]
	fn ambiguity_is_limited_to_network_and_timeout() {
		assert!(Error::Network { source: "reset".into() }.is_ambiguous());
		assert!(Error::Timeout.is_ambiguous());
		assert!(!Error::from_status(429).is_ambiguous());
		assert!(!Error::from_status(503).is_ambiguous());
	}

	#[test]
	fn transport_errors_map_onto_the_relay_taxonomy() {
		let timeout: Error = TransportError::TimedOut.into();

		assert!(matches!(timeout, Error::Timeout));

		let network: Error = TransportError::network(std::io::Error::other("unreachable")).into();

		assert!(matches!(network, Error::Network { .. }));

		let source = StdError::source(&network)
			.expect("Network error should expose the transport failure as its source.");

		assert_eq!(source.to_string(), "unreachable");
	}
}
