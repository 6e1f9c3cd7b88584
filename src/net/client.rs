use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Method};
use tracing::debug;
use url::Url;

use crate::error::{CacheError, Result};

use super::types::{Request, Response, ResponseType};

/// Network seam used by seeding and by the interception policy.
///
/// An `Err` always means the request never produced a response
/// (DNS, connect, TLS, reset). HTTP error statuses are `Ok` responses.
pub trait Fetcher: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// reqwest-backed fetcher
#[derive(Clone)]
pub struct HttpFetcher {
  client: Client,
  origin: Url,
}

impl HttpFetcher {
  /// Build a fetcher for `origin`. No timeout is applied unless one is given.
  pub fn new(origin: Url, timeout: Option<Duration>) -> Result<Self> {
    let mut builder = Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| CacheError::InvalidConfig(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self { client, origin })
  }

  /// Responses whose final URL left the origin are opaque to the cache.
  fn classify(&self, final_url: &Url) -> ResponseType {
    if final_url.origin() == self.origin.origin() {
      ResponseType::Basic
    } else {
      ResponseType::Opaque
    }
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|e| CacheError::InvalidKey(format!("{}: {}", request.method, e)))?;

    let resp = self
      .client
      .request(method, request.url.clone())
      .send()
      .await?;

    let status = resp.status();
    let response_type = self.classify(resp.url());
    let headers = resp
      .headers()
      .iter()
      .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
      .collect();
    let body = resp.bytes().await?.to_vec();

    debug!(url = %request.url, status = status.as_u16(), bytes = body.len(), "fetched");

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or("").to_string(),
      response_type,
      headers,
      body,
    })
  }
}
