//! Store identities, resource keys, snapshots and the seeding manifest.

use std::fmt;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{CacheError, Result};
use crate::net::{Headers, Response, ResponseType};

/// Marker between the app name and the version tag in a store name
const VERSION_MARKER: &str = "-cache-v";

/// Name of a versioned store, e.g. `moria-tarot-cache-v1`.
///
/// Two names never share snapshots; bumping the version is the only way
/// to invalidate a previous generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreName(String);

impl StoreName {
  pub fn versioned(app: &str, version: u32) -> Self {
    Self(format!("{}{}{}", app, VERSION_MARKER, version))
  }

  /// Wrap a name read back from storage.
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// App part of a versioned name, `None` for names without a version tag.
  pub fn app(&self) -> Option<&str> {
    self
      .0
      .rsplit_once(VERSION_MARKER)
      .filter(|(_, version)| !version.is_empty() && version.chars().all(|c| c.is_ascii_digit()))
      .map(|(app, _)| app)
  }

  /// Whether `other` is a different generation of the same app's store.
  pub fn is_sibling_of(&self, other: &StoreName) -> bool {
    self != other && self.app().is_some() && self.app() == other.app()
  }
}

impl fmt::Display for StoreName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Canonical identity of a stored resource.
///
/// Same-origin URLs key as path plus query, everything else as the absolute
/// URL. Fragments are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(String);

impl ResourceKey {
  pub fn for_url(origin: &Url, url: &Url) -> Self {
    if url.origin() == origin.origin() {
      let mut key = url.path().to_string();
      if let Some(query) = url.query() {
        key.push('?');
        key.push_str(query);
      }
      Self(key)
    } else {
      let mut url = url.clone();
      url.set_fragment(None);
      Self(url.to_string())
    }
  }

  /// Resolve a relative or absolute reference against `origin`.
  pub fn resolve(origin: &Url, raw: &str) -> Result<(Url, Self)> {
    let url = origin
      .join(raw)
      .map_err(|e| CacheError::InvalidKey(format!("{}: {}", raw, e)))?;
    let key = Self::for_url(origin, &url);
    Ok((url, key))
  }

  /// Wrap a key read back from storage.
  pub(crate) fn from_stored(key: String) -> Self {
    Self(key)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ResourceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A response captured at the moment it was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
  pub status: u16,
  pub status_text: String,
  pub response_type: ResponseType,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

impl Snapshot {
  /// Copy `response` into a new snapshot, leaving the response untouched.
  pub fn capture(response: &Response) -> Self {
    Self {
      status: response.status,
      status_text: response.status_text.clone(),
      response_type: response.response_type,
      headers: response.headers.clone(),
      body: response.body.clone(),
      cached_at: Utc::now(),
    }
  }

  pub fn to_response(&self) -> Response {
    Response {
      status: self.status,
      status_text: self.status_text.clone(),
      response_type: self.response_type,
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }

  /// Hex SHA-256 of the body
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(&self.body);
    hex::encode(hasher.finalize())
  }
}

/// Ordered set of resources seeded on activation.
#[derive(Debug, Clone)]
pub struct Manifest {
  entries: Vec<(ResourceKey, Url)>,
}

impl Manifest {
  /// Resolve every entry against `origin`. Duplicate keys keep their first position.
  pub fn new<S: AsRef<str>>(origin: &Url, raw: &[S]) -> Result<Self> {
    if raw.is_empty() {
      return Err(CacheError::InvalidConfig(
        "manifest must list at least the entry document".to_string(),
      ));
    }

    let mut entries: Vec<(ResourceKey, Url)> = Vec::with_capacity(raw.len());
    for item in raw {
      let (url, key) = ResourceKey::resolve(origin, item.as_ref())?;
      if !entries.iter().any(|(k, _)| *k == key) {
        entries.push((key, url));
      }
    }

    Ok(Self { entries })
  }

  pub fn entries(&self) -> impl Iterator<Item = (&ResourceKey, &Url)> {
    self.entries.iter().map(|(k, u)| (k, u))
  }

  pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
    self.entries.iter().map(|(k, _)| k)
  }

  pub fn contains(&self, key: &ResourceKey) -> bool {
    self.entries.iter().any(|(k, _)| k == key)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
