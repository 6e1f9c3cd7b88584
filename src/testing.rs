//! Test doubles for the network and storage seams.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use url::Url;

use crate::cache::{CacheStorage, ResourceKey, Snapshot, SqliteStorage, StoreName};
use crate::error::{CacheError, Result};
use crate::net::{Fetcher, Request, Response};

#[derive(Clone)]
enum Scripted {
  Respond(Response),
  Fail,
}

#[derive(Default)]
struct FetcherState {
  scripts: HashMap<String, Scripted>,
  calls: HashMap<String, usize>,
  offline: bool,
}

/// Fetcher answering from a per-key script. Unscripted keys get a 404.
///
/// Clones share state, so a test can keep one and hand another to a policy.
#[derive(Clone)]
pub struct ScriptedFetcher {
  origin: Url,
  state: Arc<Mutex<FetcherState>>,
}

impl ScriptedFetcher {
  pub fn new(origin: Url) -> Self {
    Self {
      origin,
      state: Arc::new(Mutex::new(FetcherState::default())),
    }
  }

  pub fn respond(self, path: &str, response: Response) -> Self {
    self.script(path, Scripted::Respond(response));
    self
  }

  /// Make `path` fail as if the host were unreachable.
  pub fn fail(self, path: &str) -> Self {
    self.script(path, Scripted::Fail);
    self
  }

  pub fn set_response(&self, path: &str, response: Response) {
    self.script(path, Scripted::Respond(response));
  }

  /// While offline every fetch fails.
  pub fn set_offline(&self, offline: bool) {
    self.state.lock().unwrap().offline = offline;
  }

  /// Number of fetches issued for `path`, counting failed ones.
  pub fn calls(&self, path: &str) -> usize {
    let key = self.key(path);
    self.state.lock().unwrap().calls.get(&key).copied().unwrap_or(0)
  }

  fn script(&self, path: &str, scripted: Scripted) {
    let key = self.key(path);
    self.state.lock().unwrap().scripts.insert(key, scripted);
  }

  fn key(&self, path: &str) -> String {
    ResourceKey::resolve(&self.origin, path).unwrap().1.to_string()
  }
}

impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let key = ResourceKey::for_url(&self.origin, &request.url).to_string();

    let mut state = self.state.lock().unwrap();
    *state.calls.entry(key.clone()).or_insert(0) += 1;

    if state.offline {
      return Err(CacheError::NetworkUnreachable(format!("offline: {}", key)));
    }

    match state.scripts.get(&key) {
      Some(Scripted::Respond(response)) => Ok(response.clone()),
      Some(Scripted::Fail) => Err(CacheError::NetworkUnreachable(format!("unreachable: {}", key))),
      None => Ok(Response::new(404, "not found")),
    }
  }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Fault {
  Open,
  Reads,
  PanickingReads,
  Writes,
}

/// In-memory SQLite storage with injectable failures.
pub struct FailingStorage {
  inner: SqliteStorage,
  fault: Fault,
}

impl FailingStorage {
  fn new(fault: Fault) -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
      fault,
    }
  }

  /// Stores cannot even be opened.
  pub fn unavailable() -> Self {
    Self::new(Fault::Open)
  }

  pub fn failing_reads() -> Self {
    Self::new(Fault::Reads)
  }

  /// Every get panics, as with a corrupted backend.
  pub fn panicking_reads() -> Self {
    Self::new(Fault::PanickingReads)
  }

  /// Every put fails, as with an exhausted quota.
  pub fn failing_writes() -> Self {
    Self::new(Fault::Writes)
  }
}

impl CacheStorage for FailingStorage {
  fn open_store(&self, store: &StoreName) -> Result<()> {
    if self.fault == Fault::Open {
      return Err(CacheError::StoreUnavailable("storage disabled".to_string()));
    }
    self.inner.open_store(store)
  }

  fn get(&self, store: &StoreName, key: &ResourceKey) -> Result<Option<Snapshot>> {
    match self.fault {
      Fault::Reads => Err(CacheError::CacheLookupFailed("read error".to_string())),
      Fault::PanickingReads => panic!("corrupted page while reading {}", key),
      _ => self.inner.get(store, key),
    }
  }

  fn put(&self, store: &StoreName, key: &ResourceKey, snapshot: &Snapshot) -> Result<()> {
    if self.fault == Fault::Writes {
      return Err(CacheError::StoreUnavailable("quota exceeded".to_string()));
    }
    self.inner.put(store, key, snapshot)
  }

  fn keys(&self, store: &StoreName) -> Result<Vec<ResourceKey>> {
    self.inner.keys(store)
  }

  fn store_names(&self) -> Result<Vec<StoreName>> {
    self.inner.store_names()
  }

  fn delete_store(&self, store: &StoreName) -> Result<bool> {
    self.inner.delete_store(store)
  }
}
