//! Store manager: opens versioned stores and seeds them from a manifest.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::net::{Fetcher, Request};

use super::storage::CacheStorage;
use super::types::{Manifest, ResourceKey, Snapshot, StoreName};

/// A handle to one opened store. Clone is cheap.
pub struct StoreHandle<S: CacheStorage> {
  name: StoreName,
  storage: Arc<S>,
}

impl<S: CacheStorage> StoreHandle<S> {
  pub fn name(&self) -> &StoreName {
    &self.name
  }

  pub fn get(&self, key: &ResourceKey) -> Result<Option<Snapshot>> {
    self.storage.get(&self.name, key)
  }

  pub fn put(&self, key: &ResourceKey, snapshot: &Snapshot) -> Result<()> {
    self.storage.put(&self.name, key, snapshot)
  }

  pub fn keys(&self) -> Result<Vec<ResourceKey>> {
    self.storage.keys(&self.name)
  }
}

impl<S: CacheStorage> Clone for StoreHandle<S> {
  fn clone(&self) -> Self {
    Self {
      name: self.name.clone(),
      storage: Arc::clone(&self.storage),
    }
  }
}

/// Outcome of a complete seeding run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedReport {
  pub store: StoreName,
  pub seeded: Vec<ResourceKey>,
  pub bytes: usize,
}

/// Owns the storage backend and hands out store handles.
pub struct StoreManager<S: CacheStorage> {
  storage: Arc<S>,
  /// Handles opened in this session, so repeat opens skip the backend
  opened: Mutex<HashMap<StoreName, StoreHandle<S>>>,
}

impl<S: CacheStorage> StoreManager<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      opened: Mutex::new(HashMap::new()),
    }
  }

  /// Open or create a store. Idempotent within a session.
  pub fn open_store(&self, name: &StoreName) -> Result<StoreHandle<S>> {
    let mut opened = self
      .opened
      .lock()
      .map_err(|e| CacheError::StoreUnavailable(format!("Lock poisoned: {}", e)))?;

    if let Some(handle) = opened.get(name) {
      return Ok(handle.clone());
    }

    self.storage.open_store(name)?;
    debug!(store = %name, "opened store");

    let handle = StoreHandle {
      name: name.clone(),
      storage: Arc::clone(&self.storage),
    };
    opened.insert(name.clone(), handle.clone());

    Ok(handle)
  }

  /// Fetch every manifest entry in order and store it.
  ///
  /// Stops at the first entry that cannot be fetched or written. Entries
  /// written before it stay in the store. Writes run on the blocking pool.
  pub async fn seed<F: Fetcher>(
    &self,
    handle: &StoreHandle<S>,
    manifest: &Manifest,
    fetcher: &F,
  ) -> Result<SeedReport>
  where
    S: 'static,
  {
    let mut seeded = Vec::with_capacity(manifest.len());
    let mut bytes = 0;

    for (position, (key, url)) in manifest.entries().enumerate() {
      let fail = |reason: String| {
        warn!(store = %handle.name, key = %key, position, %reason, "seeding failed");
        CacheError::SeedFetchFailed {
          key: key.to_string(),
          position,
          reason,
        }
      };

      let response = fetcher
        .fetch(&Request::get(url.clone()))
        .await
        .map_err(|e| fail(e.to_string()))?;

      if !response.is_ok() {
        return Err(fail(format!(
          "status {} {}",
          response.status, response.status_text
        )));
      }

      let snapshot = Snapshot::capture(&response);
      let writer = handle.clone();
      let owned_key = key.clone();
      tokio::task::spawn_blocking(move || writer.put(&owned_key, &snapshot))
        .await
        .map_err(|e| fail(e.to_string()))?
        .map_err(|e| fail(e.to_string()))?;

      bytes += response.body.len();
      seeded.push(key.clone());
    }

    info!(store = %handle.name, entries = seeded.len(), bytes, "seeded store");

    Ok(SeedReport {
      store: handle.name.clone(),
      seeded,
      bytes,
    })
  }

  pub fn store_names(&self) -> Result<Vec<StoreName>> {
    self.storage.store_names()
  }

  /// Delete every other generation of `keep`'s app. Returns the deleted names.
  pub fn prune_except(&self, keep: &StoreName) -> Result<Vec<StoreName>> {
    let mut pruned = Vec::new();

    for name in self.storage.store_names()? {
      if !name.is_sibling_of(keep) {
        continue;
      }

      if self.storage.delete_store(&name)? {
        info!(store = %name, "pruned orphaned store");
        pruned.push(name.clone());
      }

      if let Ok(mut opened) = self.opened.lock() {
        opened.remove(&name);
      }
    }

    Ok(pruned)
  }
}
