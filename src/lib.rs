//! Offline-first resource cache and fetch interception for web app shells.

pub mod cache;
pub mod config;
pub mod error;
pub mod net;
pub mod policy;

#[cfg(test)]
mod testing;

pub use error::{CacheError, Result};
