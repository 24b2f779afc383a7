//! Shared fixtures for the pipeline integration tests.

#![allow(dead_code)]

// std
use std::{
	collections::VecDeque,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};
// self
use pantry_relay::{
	auth::Credential,
	config::ClientConfig,
	error::TransportError,
	http::{Request, Response, Transport, TransportFuture},
	pipeline::Pipeline,
	refresh::{RefreshError, RefreshExchange, RefreshFuture},
	store::{CredentialStore, MemoryCredentialStore},
	time::Duration,
	url::Url,
};

/// One scripted transport outcome, consumed per send.
pub enum ScriptStep {
	/// Answer with the given status, headers, and body.
	Respond { status: u16, headers: Vec<(&'static str, String)>, body: &'static [u8] },
	/// Fail the send at the connection level.
	NetworkError,
	/// Never resolve; exercises cancellation and deadlines.
	Hang,
}
impl ScriptStep {
	pub fn status(status: u16) -> Self {
		Self::Respond { status, headers: Vec::new(), body: b"" }
	}

	pub fn status_with_header(status: u16, name: &'static str, value: impl Into<String>) -> Self {
		Self::Respond { status, headers: vec![(name, value.into())], body: b"" }
	}

	pub fn ok(body: &'static [u8]) -> Self {
		Self::Respond { status: 200, headers: Vec::new(), body }
	}
}

/// Transport that replays a scripted sequence of outcomes.
///
/// An exhausted script answers 200 so trailing asserts can focus on counts.
pub struct ScriptedTransport {
	script: Mutex<VecDeque<ScriptStep>>,
	sends: AtomicUsize,
	authorizations: Mutex<Vec<Option<String>>>,
}
impl ScriptedTransport {
	pub fn new(script: impl IntoIterator<Item = ScriptStep>) -> Arc<Self> {
		Arc::new(Self {
			script: Mutex::new(script.into_iter().collect()),
			sends: AtomicUsize::new(0),
			authorizations: Mutex::new(Vec::new()),
		})
	}

	pub fn sends(&self) -> usize {
		self.sends.load(Ordering::SeqCst)
	}

	pub fn authorizations(&self) -> Vec<Option<String>> {
		self.authorizations.lock().expect("Authorization log should not be poisoned.").clone()
	}
}
impl Transport for ScriptedTransport {
	fn send<'a>(&'a self, request: &'a Request) -> TransportFuture<'a> {
		self.sends.fetch_add(1, Ordering::SeqCst);
		self.authorizations
			.lock()
			.expect("Authorization log should not be poisoned.")
			.push(request.headers.get("authorization").cloned());

		let step = self.script.lock().expect("Script should not be poisoned.").pop_front();

		Box::pin(async move {
			match step {
				Some(ScriptStep::Respond { status, headers, body }) => Ok(Response {
					status,
					headers: headers
						.into_iter()
						.map(|(name, value)| (name.to_owned(), value))
						.collect(),
					body: body.to_vec(),
				}),
				Some(ScriptStep::NetworkError) =>
					Err(TransportError::network(std::io::Error::other("connection refused"))),
				Some(ScriptStep::Hang) => std::future::pending().await,
				None => Ok(Response {
					status: 200,
					headers: Default::default(),
					body: b"fallback".to_vec(),
				}),
			}
		})
	}
}

/// Refresh exchange that counts calls and either rotates or rejects.
pub struct CountingExchange {
	calls: AtomicUsize,
	fail: bool,
}
impl CountingExchange {
	pub fn rotating() -> Arc<Self> {
		Arc::new(Self { calls: AtomicUsize::new(0), fail: false })
	}

	pub fn failing() -> Arc<Self> {
		Arc::new(Self { calls: AtomicUsize::new(0), fail: true })
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl RefreshExchange for CountingExchange {
	fn refresh<'a>(&'a self, refresh_token: &'a str) -> RefreshFuture<'a> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let rotated = format!("{refresh_token}-rotated");

		Box::pin(async move {
			if self.fail {
				Err(RefreshError::Rejected { reason: "refresh token revoked".into() })
			} else {
				Ok(Credential::new("fresh-access", rotated))
			}
		})
	}
}

pub fn scripted_pipeline(
	transport: Arc<ScriptedTransport>,
	exchange: Arc<CountingExchange>,
	config: ClientConfig,
	credential: Option<Credential>,
) -> Pipeline<ScriptedTransport> {
	let store: Arc<dyn CredentialStore> = match credential {
		Some(credential) => Arc::new(MemoryCredentialStore::with_credential(credential)),
		None => Arc::new(MemoryCredentialStore::default()),
	};

	Pipeline::with_transport(transport, store, exchange, config)
}

/// Config tuned so retry tests finish in tens of milliseconds.
pub fn fast_config() -> ClientConfig {
	ClientConfig::default()
		.with_base_delay(Duration::milliseconds(50))
		.with_request_timeout(Duration::seconds(5))
		.with_max_requests_per_second(1_000)
}

pub fn url(value: &str) -> Url {
	Url::parse(value).expect("Test URL should parse.")
}
