use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::cache::{Manifest, ResourceKey, StoreName};
use crate::error::Result;
use crate::net::{Response, ResponseType};

/// Which network responses get written to the store.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Eligibility {
  /// Status 200 and a same-origin response
  #[default]
  Strict,
  /// Status 200, any origin
  OkStatus,
  /// Every response, including errors
  Any,
}

impl Eligibility {
  pub fn admits(self, response: &Response) -> bool {
    match self {
      Self::Strict => response.status == 200 && response.response_type == ResponseType::Basic,
      Self::OkStatus => response.status == 200,
      Self::Any => true,
    }
  }
}

/// Everything an interception policy instance needs to know up front.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
  /// Requests are keyed relative to this origin
  pub origin: Url,
  pub store: StoreName,
  pub manifest: Manifest,
  /// Served to navigations when the network is down
  pub shell: Option<ResourceKey>,
  pub eligibility: Eligibility,
  /// Delete older generations of the store after activation
  pub prune_orphans: bool,
}

impl PolicyConfig {
  pub fn new(origin: Url, store: StoreName, manifest: Manifest) -> Self {
    Self {
      origin,
      store,
      manifest,
      shell: None,
      eligibility: Eligibility::default(),
      prune_orphans: false,
    }
  }

  pub fn with_shell(mut self, shell: &str) -> Result<Self> {
    let (_, key) = ResourceKey::resolve(&self.origin, shell)?;
    if !self.manifest.contains(&key) {
      warn!(shell = %key, "navigation shell is not in the manifest");
    }
    self.shell = Some(key);
    Ok(self)
  }

  pub fn with_eligibility(mut self, eligibility: Eligibility) -> Self {
    self.eligibility = eligibility;
    self
  }

  pub fn with_prune_orphans(mut self, prune: bool) -> Self {
    self.prune_orphans = prune;
    self
  }
}
