//! Per-request decision procedure: store, network, or fallback.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::{
  CacheStorage, ResourceKey, SeedReport, Snapshot, StoreHandle, StoreManager, StoreName,
};
use crate::error::Result;
use crate::net::{Fetcher, Request, Response};

use super::config::PolicyConfig;

/// How an intercepted request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// Stored snapshot, no network activity
  ServeFromStore,
  /// Network response, copied into the store in the background
  ServeAndStore,
  /// Network response, not stored
  ServeOnly,
  /// Network failed; stored shell served to a navigation
  ShellFallback,
  /// Network failed; synthesized 503
  Unavailable,
}

impl Outcome {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::ServeFromStore => "store",
      Self::ServeAndStore => "network+store",
      Self::ServeOnly => "network",
      Self::ShellFallback => "shell",
      Self::Unavailable => "unavailable",
    }
  }
}

/// Response handed back to the runtime, with where it came from.
#[derive(Debug, Clone)]
pub struct Intercepted {
  pub response: Response,
  pub outcome: Outcome,
}

impl Intercepted {
  fn new(response: Response, outcome: Outcome) -> Self {
    Self { response, outcome }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  pub seed: SeedReport,
  pub pruned: Vec<StoreName>,
}

/// Offline-first interception policy.
///
/// The runtime calls `on_activate` once per activation and `on_intercept`
/// for every outgoing request. Store writes triggered by network responses
/// run in the background and never delay the response.
pub struct InterceptionPolicy<S: CacheStorage + 'static, F: Fetcher> {
  config: PolicyConfig,
  manager: StoreManager<S>,
  fetcher: F,
  pending: Mutex<JoinSet<()>>,
}

impl<S: CacheStorage + 'static, F: Fetcher> InterceptionPolicy<S, F> {
  pub fn new(config: PolicyConfig, storage: S, fetcher: F) -> Self {
    Self {
      config,
      manager: StoreManager::new(storage),
      fetcher,
      pending: Mutex::new(JoinSet::new()),
    }
  }

  pub fn config(&self) -> &PolicyConfig {
    &self.config
  }

  pub fn manager(&self) -> &StoreManager<S> {
    &self.manager
  }

  /// Open the versioned store and seed it with the manifest.
  ///
  /// Seeding failures are returned; whatever was seeded before the failure
  /// stays in the store.
  pub async fn on_activate(&self) -> Result<ActivationReport> {
    let handle = self.manager.open_store(&self.config.store)?;
    let seed = self
      .manager
      .seed(&handle, &self.config.manifest, &self.fetcher)
      .await?;

    let pruned = if self.config.prune_orphans {
      self
        .manager
        .prune_except(&self.config.store)
        .unwrap_or_else(|e| {
          warn!(error = %e, "failed to prune orphaned stores");
          Vec::new()
        })
    } else {
      Vec::new()
    };

    info!(store = %self.config.store, seeded = seed.seeded.len(), pruned = pruned.len(), "activated");

    Ok(ActivationReport { seed, pruned })
  }

  /// Answer one request. Never fails: every error path ends in a response.
  pub async fn on_intercept(&self, request: &Request) -> Intercepted {
    let key = ResourceKey::for_url(&self.config.origin, &request.url);
    let handle = self.open_store();

    if request.is_storable() {
      if let Some(handle) = handle.as_ref() {
        if let Some(snapshot) = self.lookup(handle, &key).await {
          debug!(key = %key, "serving from store");
          return Intercepted::new(snapshot.to_response(), Outcome::ServeFromStore);
        }
      }
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        let storable = request.is_storable() && self.config.eligibility.admits(&response);
        match handle {
          Some(handle) if storable => {
            self.store_in_background(handle, key, &response);
            Intercepted::new(response, Outcome::ServeAndStore)
          }
          _ => {
            debug!(key = %key, status = response.status, "serving network response without storing");
            Intercepted::new(response, Outcome::ServeOnly)
          }
        }
      }
      Err(e) => {
        warn!(key = %key, error = %e, "network fetch failed");
        self.fallback(request, handle.as_ref()).await
      }
    }
  }

  /// Wait for every background store write started so far.
  pub async fn flush(&self) {
    let mut pending = std::mem::take(&mut *self.lock_pending());
    while let Some(joined) = pending.join_next().await {
      if let Err(e) = joined {
        warn!(error = %e, "store write task failed");
      }
    }
  }

  fn open_store(&self) -> Option<StoreHandle<S>> {
    match self.manager.open_store(&self.config.store) {
      Ok(handle) => Some(handle),
      Err(e) => {
        warn!(store = %self.config.store, error = %e, "store unavailable, using network only");
        None
      }
    }
  }

  /// Read failures count as a miss. Runs on the blocking pool, next to the
  /// background writes that share the connection.
  async fn lookup(&self, handle: &StoreHandle<S>, key: &ResourceKey) -> Option<Snapshot> {
    let reader = handle.clone();
    let owned_key = key.clone();

    match tokio::task::spawn_blocking(move || reader.get(&owned_key)).await {
      Ok(Ok(found)) => found,
      Ok(Err(e)) => {
        warn!(key = %key, error = %e, "cache lookup failed, treating as miss");
        None
      }
      Err(e) => {
        warn!(key = %key, error = %e, "cache lookup task failed, treating as miss");
        None
      }
    }
  }

  fn store_in_background(&self, handle: StoreHandle<S>, key: ResourceKey, response: &Response) {
    let snapshot = Snapshot::capture(response);

    let mut pending = self.lock_pending();
    pending.spawn_blocking(move || match handle.put(&key, &snapshot) {
      Ok(()) => debug!(key = %key, bytes = snapshot.body.len(), "stored network response"),
      Err(e) => warn!(key = %key, error = %e, "store write failed"),
    });

    // Reap finished writes so the set doesn't grow with traffic
    while pending.try_join_next().is_some() {}
  }

  async fn fallback(&self, request: &Request, handle: Option<&StoreHandle<S>>) -> Intercepted {
    if request.destination.is_navigation() {
      if let (Some(shell), Some(handle)) = (self.config.shell.as_ref(), handle) {
        if let Some(snapshot) = self.lookup(handle, shell).await {
          debug!(url = %request.url, "serving shell to offline navigation");
          return Intercepted::new(snapshot.to_response(), Outcome::ShellFallback);
        }
      }
    }

    Intercepted::new(Response::unavailable(), Outcome::Unavailable)
  }

  fn lock_pending(&self) -> MutexGuard<'_, JoinSet<()>> {
    self.pending.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{Manifest, SqliteStorage};
  use crate::error::CacheError;
  use crate::net::{Destination, ResponseType};
  use crate::policy::Eligibility;
  use crate::testing::{FailingStorage, ScriptedFetcher};
  use url::Url;

  fn origin() -> Url {
    Url::parse("https://example.org/").unwrap()
  }

  fn url(path: &str) -> Url {
    origin().join(path).unwrap()
  }

  fn config(manifest: &[&str]) -> PolicyConfig {
    PolicyConfig::new(
      origin(),
      StoreName::versioned("app", 1),
      Manifest::new(&origin(), manifest).unwrap(),
    )
    .with_shell("/app/index.html")
    .unwrap()
  }

  fn seeded_fetcher() -> ScriptedFetcher {
    ScriptedFetcher::new(origin())
      .respond("/app/", Response::new(200, "root"))
      .respond("/app/index.html", Response::new(200, "<html>shell</html>"))
      .respond("/app/icon.png", Response::new(200, vec![1, 2, 3]))
  }

  fn policy(
    fetcher: &ScriptedFetcher,
  ) -> InterceptionPolicy<SqliteStorage, ScriptedFetcher> {
    InterceptionPolicy::new(
      config(&["/app/", "/app/index.html", "/app/icon.png"]),
      SqliteStorage::open_in_memory().unwrap(),
      fetcher.clone(),
    )
  }

  fn key(path: &str) -> ResourceKey {
    ResourceKey::resolve(&origin(), path).unwrap().1
  }

  #[tokio::test]
  async fn test_seeded_resource_served_offline() {
    let fetcher = seeded_fetcher();
    let policy = policy(&fetcher);

    let report = policy.on_activate().await.unwrap();
    assert_eq!(report.seed.seeded.len(), 3);

    fetcher.set_offline(true);
    let result = policy.on_intercept(&Request::get(url("/app/index.html"))).await;

    assert_eq!(result.outcome, Outcome::ServeFromStore);
    assert_eq!(result.response.status, 200);
    assert_eq!(result.response.body, b"<html>shell</html>");
  }

  #[tokio::test]
  async fn test_store_hit_issues_no_network_request() {
    let fetcher = seeded_fetcher();
    let policy = policy(&fetcher);
    policy.on_activate().await.unwrap();
    let seeding_calls = fetcher.calls("/app/icon.png");

    for _ in 0..3 {
      let result = policy.on_intercept(&Request::get(url("/app/icon.png"))).await;
      assert_eq!(result.outcome, Outcome::ServeFromStore);
    }

    assert_eq!(fetcher.calls("/app/icon.png"), seeding_calls);
  }

  #[tokio::test]
  async fn test_eligible_miss_is_served_and_stored() {
    let fetcher = seeded_fetcher().respond(
      "/app/data.json",
      Response::new(200, r#"{"cards":78}"#).with_header("content-type", "application/json"),
    );
    let policy = policy(&fetcher);
    policy.on_activate().await.unwrap();

    let result = policy.on_intercept(&Request::get(url("/app/data.json"))).await;
    assert_eq!(result.outcome, Outcome::ServeAndStore);
    assert_eq!(result.response.body, br#"{"cards":78}"#);

    policy.flush().await;

    let handle = policy.manager().open_store(&policy.config().store).unwrap();
    let stored = handle.get(&key("/app/data.json")).unwrap().unwrap();
    assert_eq!(stored.status, 200);
    assert_eq!(stored.body, result.response.body);

    fetcher.set_offline(true);
    let again = policy.on_intercept(&Request::get(url("/app/data.json"))).await;
    assert_eq!(again.outcome, Outcome::ServeFromStore);
    assert_eq!(fetcher.calls("/app/data.json"), 1);
  }

  #[tokio::test]
  async fn test_ineligible_responses_are_not_stored() {
    let fetcher = seeded_fetcher()
      .respond("/app/missing.json", Response::new(404, "nope"))
      .respond(
        "/app/proxied.js",
        Response::new(200, "x").with_type(ResponseType::Opaque),
      );
    let policy = policy(&fetcher);
    policy.on_activate().await.unwrap();

    let missing = policy.on_intercept(&Request::get(url("/app/missing.json"))).await;
    let opaque = policy.on_intercept(&Request::get(url("/app/proxied.js"))).await;
    policy.flush().await;

    assert_eq!(missing.outcome, Outcome::ServeOnly);
    assert_eq!(missing.response.status, 404);
    assert_eq!(missing.response.body, b"nope");
    assert_eq!(opaque.outcome, Outcome::ServeOnly);

    let handle = policy.manager().open_store(&policy.config().store).unwrap();
    assert_eq!(handle.keys().unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_offline_navigation_gets_shell() {
    let fetcher = seeded_fetcher();
    let policy = policy(&fetcher);
    policy.on_activate().await.unwrap();
    fetcher.set_offline(true);

    let request = Request::get(url("/app/data.json")).with_destination(Destination::Document);
    let result = policy.on_intercept(&request).await;

    assert_eq!(result.outcome, Outcome::ShellFallback);
    assert_eq!(result.response.body, b"<html>shell</html>");
  }

  #[tokio::test]
  async fn test_offline_subresource_gets_503() {
    let fetcher = seeded_fetcher();
    let policy = policy(&fetcher);
    policy.on_activate().await.unwrap();
    fetcher.set_offline(true);

    let request = Request::get(url("/app/script.js")).with_destination(Destination::Script);
    let result = policy.on_intercept(&request).await;

    assert_eq!(result.outcome, Outcome::Unavailable);
    assert_eq!(result.response.status, 503);
    assert_eq!(result.response.status_text, "Service Unavailable");
    assert_ne!(result.response.body, b"<html>shell</html>");
  }

  #[tokio::test]
  async fn test_offline_navigation_without_seeded_shell_gets_503() {
    let fetcher = seeded_fetcher();
    let policy = policy(&fetcher);
    fetcher.set_offline(true);

    let result = policy.on_intercept(&Request::navigate(url("/app/"))).await;

    assert_eq!(result.outcome, Outcome::Unavailable);
    assert_eq!(result.response.status, 503);
  }

  #[tokio::test]
  async fn test_no_shell_configured_means_503_for_navigations() {
    let fetcher = seeded_fetcher();
    let mut config = config(&["/app/", "/app/index.html"]);
    config.shell = None;
    let policy = InterceptionPolicy::new(config, SqliteStorage::open_in_memory().unwrap(), fetcher.clone());
    policy.on_activate().await.unwrap();
    fetcher.set_offline(true);

    let result = policy.on_intercept(&Request::navigate(url("/app/other"))).await;

    assert_eq!(result.outcome, Outcome::Unavailable);
  }

  #[tokio::test]
  async fn test_lookup_failure_falls_through_to_network() {
    let fetcher = seeded_fetcher();
    let policy = InterceptionPolicy::new(
      config(&["/app/"]),
      FailingStorage::failing_reads(),
      fetcher.clone(),
    );

    let result = policy.on_intercept(&Request::get(url("/app/"))).await;

    assert_eq!(result.outcome, Outcome::ServeAndStore);
    assert_eq!(result.response.body, b"root");
    assert_eq!(fetcher.calls("/app/"), 1);
  }

  #[tokio::test]
  async fn test_panicking_lookup_is_a_miss() {
    let fetcher = seeded_fetcher();
    let policy = InterceptionPolicy::new(
      config(&["/app/"]),
      FailingStorage::panicking_reads(),
      fetcher.clone(),
    );

    let result = policy.on_intercept(&Request::get(url("/app/"))).await;
    assert_eq!(result.outcome, Outcome::ServeAndStore);
    assert_eq!(result.response.body, b"root");

    fetcher.set_offline(true);
    let offline = policy.on_intercept(&Request::navigate(url("/app/"))).await;
    assert_eq!(offline.outcome, Outcome::Unavailable);
  }

  #[tokio::test]
  async fn test_write_failure_does_not_touch_response() {
    let fetcher = seeded_fetcher();
    let policy = InterceptionPolicy::new(
      config(&["/app/"]),
      FailingStorage::failing_writes(),
      fetcher.clone(),
    );

    let result = policy.on_intercept(&Request::get(url("/app/icon.png"))).await;
    policy.flush().await;

    assert_eq!(result.outcome, Outcome::ServeAndStore);
    assert_eq!(result.response.status, 200);
    assert_eq!(result.response.body, vec![1, 2, 3]);
  }

  #[tokio::test]
  async fn test_unavailable_store_degrades_to_network_only() {
    let fetcher = seeded_fetcher();
    let policy = InterceptionPolicy::new(
      config(&["/app/"]),
      FailingStorage::unavailable(),
      fetcher.clone(),
    );

    let result = policy.on_intercept(&Request::get(url("/app/"))).await;
    assert_eq!(result.outcome, Outcome::ServeOnly);

    let err = policy.on_activate().await.unwrap_err();
    assert!(matches!(err, CacheError::StoreUnavailable(_)));
  }

  #[tokio::test]
  async fn test_non_get_requests_bypass_store() {
    let fetcher = seeded_fetcher().respond("/app/submit", Response::new(200, "ok"));
    let policy = policy(&fetcher);
    policy.on_activate().await.unwrap();

    let post = Request::get(url("/app/submit")).with_method("POST");
    let result = policy.on_intercept(&post).await;
    policy.flush().await;
    assert_eq!(result.outcome, Outcome::ServeOnly);

    let post_root = Request::get(url("/app/")).with_method("POST");
    let root = policy.on_intercept(&post_root).await;
    assert_eq!(root.outcome, Outcome::ServeOnly);

    let handle = policy.manager().open_store(&policy.config().store).unwrap();
    assert!(handle.get(&key("/app/submit")).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_ok_status_eligibility_stores_opaque() {
    let fetcher = seeded_fetcher().respond(
      "/app/proxied.js",
      Response::new(200, "x").with_type(ResponseType::Opaque),
    );
    let policy = InterceptionPolicy::new(
      config(&["/app/"]).with_eligibility(Eligibility::OkStatus),
      SqliteStorage::open_in_memory().unwrap(),
      fetcher.clone(),
    );

    let result = policy.on_intercept(&Request::get(url("/app/proxied.js"))).await;
    assert_eq!(result.outcome, Outcome::ServeAndStore);
  }

  #[tokio::test]
  async fn test_failed_activation_keeps_partial_seed() {
    let fetcher = seeded_fetcher().fail("/app/icon.png");
    let policy = policy(&fetcher);

    let err = policy.on_activate().await.unwrap_err();
    assert!(matches!(err, CacheError::SeedFetchFailed { position: 2, .. }));

    fetcher.set_offline(true);
    let shell = policy.on_intercept(&Request::get(url("/app/index.html"))).await;
    assert_eq!(shell.outcome, Outcome::ServeFromStore);
  }

  #[tokio::test]
  async fn test_activation_prunes_old_generations() {
    let fetcher = seeded_fetcher();
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_store(&StoreName::versioned("app", 0)).unwrap();

    let policy = InterceptionPolicy::new(
      config(&["/app/"]).with_prune_orphans(true),
      storage,
      fetcher,
    );
    let report = policy.on_activate().await.unwrap();

    assert_eq!(report.pruned, vec![StoreName::versioned("app", 0)]);
    assert_eq!(
      policy.manager().store_names().unwrap(),
      vec![StoreName::versioned("app", 1)]
    );
  }

  #[tokio::test]
  async fn test_separate_instances_do_not_interfere() {
    let fetcher = seeded_fetcher();
    let a = policy(&fetcher);
    let b = policy(&fetcher);
    a.on_activate().await.unwrap();
    fetcher.set_offline(true);

    let from_a = a.on_intercept(&Request::get(url("/app/"))).await;
    let from_b = b.on_intercept(&Request::get(url("/app/"))).await;

    assert_eq!(from_a.outcome, Outcome::ServeFromStore);
    assert_eq!(from_b.outcome, Outcome::Unavailable);
  }
}
