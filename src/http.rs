//! Transport primitives for backend calls.
//!
//! The module exposes the [`Transport`] contract alongside the relay's
//! [`Request`] and [`Response`] types so downstream crates can integrate
//! custom HTTP clients without touching the pipeline. The trait is the
//! relay's only dependency on an HTTP stack; [`ReqwestTransport`] is the
//! default implementation behind the `reqwest` feature.

// crates.io
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, cancel::CancelSignal, error::TransportError};

/// Boxed future returned by [`Transport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<Response, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP transports capable of executing relay requests.
///
/// Implementations perform exactly one network exchange per call: no
/// redirects for credentialed requests, no internal retries, no credential
/// handling. Resilience lives in the pipeline so every transport benefits
/// from it uniformly. Implementations must be `Send + Sync` so one transport
/// can serve many concurrent executions.
pub trait Transport
where
	Self: Send + Sync,
{
	/// Sends the prepared request and resolves with the raw response.
	///
	/// A response with a non-success status is still `Ok`; the error channel
	/// is reserved for failures that produced no usable response at all.
	fn send<'a>(&'a self, request: &'a Request) -> TransportFuture<'a>;
}

/// HTTP methods recognized by the relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
	/// Idempotent read.
	Get,
	/// Idempotent metadata read.
	Head,
	/// Creation write.
	Post,
	/// Replacement write.
	Put,
	/// Partial-update write.
	Patch,
	/// Removal write.
	Delete,
}
impl Method {
	/// Returns the canonical upper-case method name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Head => "HEAD",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
		}
	}

	/// Returns `true` for methods with no side effects on the backend.
	pub const fn is_safe(self) -> bool {
		matches!(self, Method::Get | Method::Head)
	}

	/// Returns `true` for responses worth keeping in the read cache.
	pub const fn is_cacheable(self) -> bool {
		matches!(self, Method::Get)
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// A single logical backend request.
///
/// Built once by the caller and owned by one `execute` call; the pipeline
/// clones it per attempt when it needs to attach a credential.
#[derive(Clone, Debug)]
pub struct Request {
	/// HTTP method.
	pub method: Method,
	/// Fully qualified backend URL.
	pub url: Url,
	/// Outgoing headers, keyed by lower-case name.
	pub headers: BTreeMap<String, String>,
	/// Optional request body.
	pub body: Option<Vec<u8>>,
	/// Marks the request safe to resend after an ambiguous failure.
	///
	/// Defaults from the method: reads are idempotent, writes are not until
	/// the caller opts in via [`mark_idempotent`](Self::mark_idempotent).
	pub idempotent: bool,
	/// Skips cache lookup and cache population for this request.
	pub bypass_cache: bool,
	/// Per-request override of the configured overall deadline.
	pub timeout: Option<Duration>,
	/// Cancellation signal observed at every suspension point.
	pub cancel: Option<CancelSignal>,
}
impl Request {
	/// Creates a request with method-derived defaults.
	pub fn new(method: Method, url: Url) -> Self {
		Self {
			method,
			url,
			headers: BTreeMap::new(),
			body: None,
			idempotent: method.is_safe(),
			bypass_cache: false,
			timeout: None,
			cancel: None,
		}
	}

	/// Creates a GET request.
	pub fn get(url: Url) -> Self {
		Self::new(Method::Get, url)
	}

	/// Creates a POST request carrying the provided body.
	pub fn post(url: Url, body: impl Into<Vec<u8>>) -> Self {
		Self::new(Method::Post, url).with_body(body)
	}

	/// Creates a PUT request carrying the provided body.
	pub fn put(url: Url, body: impl Into<Vec<u8>>) -> Self {
		Self::new(Method::Put, url).with_body(body)
	}

	/// Creates a DELETE request.
	pub fn delete(url: Url) -> Self {
		Self::new(Method::Delete, url)
	}

	/// Adds or replaces a header; names are normalized to lower case.
	pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
		self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());

		self
	}

	/// Attaches a request body.
	pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = Some(body.into());

		self
	}

	/// Overrides the overall deadline for this request only.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Attaches a caller-held cancellation signal.
	pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
		self.cancel = Some(signal);

		self
	}

	/// Declares a write safe to resend after an ambiguous failure.
	pub fn mark_idempotent(mut self) -> Self {
		self.idempotent = true;

		self
	}

	/// Opts this request out of the read cache entirely.
	pub fn no_cache(mut self) -> Self {
		self.bypass_cache = true;

		self
	}
}

/// Raw backend response handed back by a [`Transport`].
#[derive(Clone, Debug)]
pub struct Response {
	/// HTTP status code.
	pub status: u16,
	/// Response headers, keyed by lower-case name.
	pub headers: BTreeMap<String, String>,
	/// Response body bytes.
	pub body: Vec<u8>,
}
impl Response {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Looks up a header by case-insensitive name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Deserializes the body as JSON, reporting the path of any mismatch.
	pub fn json<T>(&self) -> Result<T, serde_path_to_error::Error<serde_json::Error>>
	where
		T: serde::de::DeserializeOwned,
	{
		let mut deserializer = serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(&mut deserializer)
	}

	/// Parses the `Retry-After` header as either delta seconds or an HTTP date.
	///
	/// Dates already in the past yield `None`.
	pub fn retry_after(&self) -> Option<Duration> {
		let raw = self.header("retry-after")?.trim();

		if let Ok(secs) = raw.parse::<u64>() {
			return Some(Duration::seconds(secs as i64));
		}
		if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
			let delta = moment - OffsetDateTime::now_utc();

			if delta.is_positive() {
				return Some(delta);
			}
		}

		None
	}
}

/// Thin wrapper around [`ReqwestClient`] implementing [`Transport`].
///
/// Redirect following is disabled: credentialed requests must not replay the
/// `Authorization` header against another URI, matching the backend contract
/// that resources respond directly.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Builds a transport with redirects disabled.
	pub fn new() -> Result<Self, crate::error::ConfigError> {
		let client = ReqwestClient::builder().redirect(reqwest::redirect::Policy::none()).build()?;

		Ok(Self(client))
	}

	/// Wraps an existing [`ReqwestClient`].
	///
	/// Configure the client to not follow redirects; the relay does not
	/// re-check redirect targets before re-attaching credentials.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	fn reqwest_method(method: Method) -> reqwest::Method {
		match method {
			Method::Get => reqwest::Method::GET,
			Method::Head => reqwest::Method::HEAD,
			Method::Post => reqwest::Method::POST,
			Method::Put => reqwest::Method::PUT,
			Method::Patch => reqwest::Method::PATCH,
			Method::Delete => reqwest::Method::DELETE,
		}
	}
}
#[cfg(feature = "reqwest")]
impl Transport for ReqwestTransport {
	fn send<'a>(&'a self, request: &'a Request) -> TransportFuture<'a> {
		let client = self.0.clone();

		Box::pin(async move {
			let mut builder =
				client.request(Self::reqwest_method(request.method), request.url.clone());

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if let Some(body) = &request.body {
				builder = builder.body(body.clone());
			}

			let response = builder.send().await.map_err(TransportError::from)?;
			let status = response.status().as_u16();
			let headers = response
				.headers()
				.iter()
				.filter_map(|(name, value)| {
					value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
				})
				.collect();
			let body = response.bytes().await.map_err(TransportError::from)?.to_vec();

			Ok(Response { status, headers, body })
		})
	}
}
