//! Expiring response cache for idempotent reads, keyed by request fingerprint.

// std
use std::collections::HashMap;
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	http::{Method, Request, Response},
};

/// Deterministic cache key for a request.
///
/// The key is a base64 (no padding) SHA-256 digest over the method, the URL
/// origin and path, and the query pairs in sorted order, so two reads of the
/// same resource collide regardless of how the caller ordered its parameters.
/// The resource path rides along to support path-prefix invalidation after
/// writes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
	key: String,
	path: String,
}
impl Fingerprint {
	/// Derives the fingerprint for a request.
	pub fn of(request: &Request) -> Self {
		Self::compute(request.method, &request.url)
	}

	/// Derives the fingerprint for a method + URL pair.
	pub fn compute(method: Method, url: &Url) -> Self {
		let mut pairs: Vec<(String, String)> =
			url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();

		pairs.sort();

		let mut hasher = Sha256::new();

		hasher.update(method.as_str());
		hasher.update(b" ");
		hasher.update(url.origin().ascii_serialization());
		hasher.update(url.path());

		for (key, value) in &pairs {
			hasher.update(b"&");
			hasher.update(key);
			hasher.update(b"=");
			hasher.update(value);
		}

		Self {
			key: STANDARD_NO_PAD.encode(hasher.finalize()),
			path: url.path().to_owned(),
		}
	}

	/// Returns the digest string used as the cache key.
	pub fn key(&self) -> &str {
		&self.key
	}

	/// Returns the resource path the fingerprint was derived from.
	pub fn path(&self) -> &str {
		&self.path
	}
}

#[derive(Clone, Debug)]
struct CacheEntry {
	value: Response,
	path: String,
	expires_at: OffsetDateTime,
}

type EntryMap = Arc<RwLock<HashMap<String, CacheEntry>>>;

/// Thread-safe expiring map from request fingerprint to response.
///
/// Expiry is lazy: an expired entry is dropped on the read that discovers it,
/// so no background task is required for correctness. [`sweep`](Self::sweep)
/// exists to bound memory for long-lived clients. Reads and writes on one key
/// are atomic with respect to each other; `set` overwrites unconditionally
/// (last write wins, each key is independent).
#[derive(Clone, Debug, Default)]
pub struct ResponseCache(EntryMap);
impl ResponseCache {
	/// Returns the cached response, or a miss when absent or expired.
	pub fn get(&self, fingerprint: &Fingerprint, now: OffsetDateTime) -> Option<Response> {
		let hit = self
			.0
			.read()
			.get(fingerprint.key())
			.map(|entry| (entry.expires_at, entry.value.clone()));

		match hit {
			Some((expires_at, value)) if now < expires_at => Some(value),
			Some((expires_at, _)) => {
				// Re-check under the write lock; a fresher set may have raced the read.
				let mut map = self.0.write();

				if map.get(fingerprint.key()).is_some_and(|entry| entry.expires_at == expires_at) {
					map.remove(fingerprint.key());
				}

				None
			},
			None => None,
		}
	}

	/// Stores a response under the fingerprint with the provided lifetime.
	pub fn set(
		&self,
		fingerprint: &Fingerprint,
		value: Response,
		now: OffsetDateTime,
		ttl: Duration,
	) {
		let entry =
			CacheEntry { value, path: fingerprint.path().to_owned(), expires_at: now + ttl };

		self.0.write().insert(fingerprint.key().to_owned(), entry);
	}

	/// Drops the entry for one fingerprint, if present.
	pub fn invalidate(&self, fingerprint: &Fingerprint) {
		self.0.write().remove(fingerprint.key());
	}

	/// Drops every entry whose resource path sits at or under `prefix`.
	///
	/// Segment-aware: writing `/recipes` invalidates `/recipes` and
	/// `/recipes/42` but leaves `/recipes-archive` alone.
	pub fn invalidate_prefix(&self, prefix: &str) {
		self.0.write().retain(|_, entry| !path_covered(&entry.path, prefix));
	}

	/// Drops every entry.
	pub fn clear(&self) {
		self.0.write().clear();
	}

	/// Evicts entries that are expired at the provided instant.
	pub fn sweep(&self, now: OffsetDateTime) {
		self.0.write().retain(|_, entry| now < entry.expires_at);
	}

	/// Number of live entries, expired or not.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when no entries are stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}

fn path_covered(entry_path: &str, prefix: &str) -> bool {
	let trimmed = prefix.trim_end_matches('/');

	entry_path == trimmed
		|| entry_path.strip_prefix(trimmed).is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn fingerprint(method: Method, raw: &str) -> Fingerprint {
		Fingerprint::compute(method, &Url::parse(raw).expect("Test URL should parse."))
	}

	fn response(body: &str) -> Response {
		Response { status: 200, headers: BTreeMap::new(), body: body.as_bytes().to_vec() }
	}

	#[test]
	fn query_order_never_changes_the_key() {
		let a = fingerprint(Method::Get, "https://api.pantry.test/recipes?sort=name&page=2");
		let b = fingerprint(Method::Get, "https://api.pantry.test/recipes?page=2&sort=name");

		assert_eq!(a.key(), b.key());
	}

	#[test]
	fn method_path_and_values_all_partition_keys() {
		let get = fingerprint(Method::Get, "https://api.pantry.test/recipes");
		let head = fingerprint(Method::Head, "https://api.pantry.test/recipes");
		let other_path = fingerprint(Method::Get, "https://api.pantry.test/pantry");
		let other_value = fingerprint(Method::Get, "https://api.pantry.test/recipes?page=3");

		assert_ne!(get.key(), head.key());
		assert_ne!(get.key(), other_path.key());
		assert_ne!(get.key(), other_value.key());
	}

	#[test]
	fn round_trip_and_expiry() {
		let cache = ResponseCache::default();
		let key = fingerprint(Method::Get, "https://api.pantry.test/recipes");
		let stored = macros::datetime!(2026-01-01 00:00 UTC);

		cache.set(&key, response("fresh"), stored, Duration::minutes(5));

		let hit = cache
			.get(&key, stored + Duration::minutes(4))
			.expect("Entry should be served before its TTL elapses.");

		assert_eq!(hit.body, b"fresh");
		assert!(cache.get(&key, stored + Duration::minutes(5)).is_none());
		// The expired read evicted the entry lazily.
		assert!(cache.is_empty());
	}

	#[test]
	fn set_overwrites_unconditionally() {
		let cache = ResponseCache::default();
		let key = fingerprint(Method::Get, "https://api.pantry.test/recipes");
		let now = macros::datetime!(2026-01-01 00:00 UTC);

		cache.set(&key, response("stale"), now, Duration::minutes(5));
		cache.set(&key, response("fresher"), now + Duration::minutes(1), Duration::minutes(5));

		let hit = cache
			.get(&key, now + Duration::minutes(2))
			.expect("Overwritten entry should be served.");

		assert_eq!(hit.body, b"fresher");
		assert_eq!(cache.len(), 1);
	}

	#[test]
	fn prefix_invalidation_is_segment_aware() {
		let cache = ResponseCache::default();
		let now = macros::datetime!(2026-01-01 00:00 UTC);
		let listing = fingerprint(Method::Get, "https://api.pantry.test/recipes");
		let detail = fingerprint(Method::Get, "https://api.pantry.test/recipes/42");
		let archive = fingerprint(Method::Get, "https://api.pantry.test/recipes-archive");

		for key in [&listing, &detail, &archive] {
			cache.set(key, response("cached"), now, Duration::minutes(5));
		}

		cache.invalidate_prefix("/recipes");

		assert!(cache.get(&listing, now).is_none());
		assert!(cache.get(&detail, now).is_none());
		assert!(cache.get(&archive, now).is_some());
	}

	#[test]
	fn sweep_evicts_only_expired_entries() {
		let cache = ResponseCache::default();
		let now = macros::datetime!(2026-01-01 00:00 UTC);
		let short = fingerprint(Method::Get, "https://api.pantry.test/short");
		let long = fingerprint(Method::Get, "https://api.pantry.test/long");

		cache.set(&short, response("short"), now, Duration::seconds(30));
		cache.set(&long, response("long"), now, Duration::minutes(30));
		cache.sweep(now + Duration::minutes(1));

		assert_eq!(cache.len(), 1);
		assert!(cache.get(&long, now + Duration::minutes(1)).is_some());
	}

	#[test]
	fn invalidate_and_clear_drop_entries() {
		let cache = ResponseCache::default();
		let now = macros::datetime!(2026-01-01 00:00 UTC);
		let key = fingerprint(Method::Get, "https://api.pantry.test/recipes");

		cache.set(&key, response("cached"), now, Duration::minutes(5));
		cache.invalidate(&key);

		assert!(cache.is_empty());

		cache.set(&key, response("cached"), now, Duration::minutes(5));
		cache.clear();

		assert!(cache.is_empty());
	}
}
