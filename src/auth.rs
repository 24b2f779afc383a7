//! Credential modeling: the access/refresh pair and its redacting secret wrapper.

pub mod secret;

pub use secret::TokenSecret;

// self
use crate::_prelude::*;

/// Access/refresh credential pair attached to outgoing requests.
///
/// Exclusively owned by the credential store. The refresh protocol is the only
/// writer: a successful exchange rotates the pair, an irrecoverable failure
/// clears it. Lifetime spans login to logout.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	/// Access token presented on every authorized request.
	pub access_token: TokenSecret,
	/// Refresh token spent by the refresh exchange.
	pub refresh_token: TokenSecret,
}
impl Credential {
	/// Creates a credential from raw token strings.
	pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: TokenSecret::new(refresh_token),
		}
	}

	/// Renders the `Authorization` header value carrying the access token.
	pub fn bearer(&self) -> String {
		format!("Bearer {}", self.access_token.expose())
	}

	/// Replaces the access token, keeping the refresh token in place.
	///
	/// Used when the refresh endpoint rotates only the short-lived half of the
	/// pair.
	pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = TokenSecret::new(token);

		self
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn bearer_renders_the_authorization_value() {
		let credential = Credential::new("access-123", "refresh-456");

		assert_eq!(credential.bearer(), "Bearer access-123");
	}

	#[test]
	fn debug_redacts_both_tokens() {
		let rendered = format!("{:?}", Credential::new("access", "refresh"));

		assert!(!rendered.contains("access"));
		assert!(!rendered.contains("refresh"));
		assert!(rendered.contains("<redacted>"));
	}

	#[test]
	fn access_rotation_keeps_the_refresh_token() {
		let rotated = Credential::new("old", "keep-me").with_access_token("new");

		assert_eq!(rotated.access_token.expose(), "new");
		assert_eq!(rotated.refresh_token.expose(), "keep-me");
	}
}
