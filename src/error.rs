//! Error kinds surfaced by the store and the interception policy.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
  #[error("Store unavailable: {0}")]
  StoreUnavailable(String),

  #[error("Seeding failed at entry {position} ({key}): {reason}")]
  SeedFetchFailed {
    key: String,
    position: usize,
    reason: String,
  },

  #[error("Network unreachable: {0}")]
  NetworkUnreachable(String),

  #[error("Cache lookup failed: {0}")]
  CacheLookupFailed(String),

  #[error("Invalid resource key: {0}")]
  InvalidKey(String),

  #[error("Invalid configuration: {0}")]
  InvalidConfig(String),
}

impl From<reqwest::Error> for CacheError {
  fn from(err: reqwest::Error) -> Self {
    CacheError::NetworkUnreachable(err.to_string())
  }
}

pub type Result<T> = std::result::Result<T, CacheError>;
