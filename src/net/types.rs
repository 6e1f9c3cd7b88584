use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

/// What the requesting context intends to do with the resource.
///
/// Only navigation vs. everything else matters to the policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  Document,
  Frame,
  Iframe,
  Script,
  Style,
  Image,
  Font,
  Manifest,
  Worker,
  /// Plain `fetch()` calls and anything unclassified
  #[default]
  Empty,
}

impl Destination {
  /// Top-level or nested document loads.
  pub fn is_navigation(self) -> bool {
    matches!(self, Self::Document | Self::Frame | Self::Iframe)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Document => "document",
      Self::Frame => "frame",
      Self::Iframe => "iframe",
      Self::Script => "script",
      Self::Style => "style",
      Self::Image => "image",
      Self::Font => "font",
      Self::Manifest => "manifest",
      Self::Worker => "worker",
      Self::Empty => "",
    }
  }
}

impl FromStr for Destination {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "document" => Ok(Self::Document),
      "frame" => Ok(Self::Frame),
      "iframe" => Ok(Self::Iframe),
      "script" => Ok(Self::Script),
      "style" => Ok(Self::Style),
      "image" => Ok(Self::Image),
      "font" => Ok(Self::Font),
      "manifest" => Ok(Self::Manifest),
      "worker" => Ok(Self::Worker),
      "" | "empty" => Ok(Self::Empty),
      other => Err(format!("unknown request destination: {}", other)),
    }
  }
}

impl fmt::Display for Destination {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Empty => f.write_str("empty"),
      other => f.write_str(other.as_str()),
    }
  }
}

/// An outgoing resource request as seen by the interception layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      destination: Destination::Empty,
    }
  }

  /// A top-level document load of `url`.
  pub fn navigate(url: Url) -> Self {
    Self::get(url).with_destination(Destination::Document)
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_uppercase();
    self
  }

  /// Only GET responses are ever looked up or written.
  pub fn is_storable(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }
}

/// Origin classification of a response, mirroring the fetch response types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
  /// Same-origin
  #[default]
  Basic,
  Cors,
  /// Cross-origin without CORS; contents must be treated as unreadable
  Opaque,
  Error,
}

impl ResponseType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::Error => "error",
    }
  }
}

impl FromStr for ResponseType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      "opaque" => Ok(Self::Opaque),
      "error" => Ok(Self::Error),
      other => Err(format!("unknown response type: {}", other)),
    }
  }
}

/// Status text used for synthesized offline responses
pub const UNAVAILABLE_STATUS_TEXT: &str = "Service Unavailable";

/// Body used for synthesized offline responses
pub const UNAVAILABLE_BODY: &str = "Offline - Resource not available";

/// Header name (lowercase) and raw value bytes, in wire order.
///
/// Values stay bytes: HTTP allows obs-text that is not valid UTF-8.
pub type Headers = Vec<(String, Vec<u8>)>;

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub response_type: ResponseType,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  /// Same-origin response with the canonical reason phrase for `status`.
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    let status_text = reqwest::StatusCode::from_u16(status)
      .ok()
      .and_then(|s| s.canonical_reason())
      .unwrap_or("")
      .to_string();

    Self {
      status,
      status_text,
      response_type: ResponseType::Basic,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// The synthesized response handed out when neither network nor store can answer.
  pub fn unavailable() -> Self {
    Self {
      status: 503,
      status_text: UNAVAILABLE_STATUS_TEXT.to_string(),
      response_type: ResponseType::Basic,
      headers: vec![("content-type".to_string(), b"text/plain".to_vec())],
      body: UNAVAILABLE_BODY.as_bytes().to_vec(),
    }
  }

  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  pub fn with_header(mut self, name: &str, value: impl Into<Vec<u8>>) -> Self {
    self.headers.push((name.to_lowercase(), value.into()));
    self
  }

  /// Raw bytes of the first header matching `name` (case-insensitive).
  pub fn header_bytes(&self, name: &str) -> Option<&[u8]> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_slice())
  }

  /// First header matching `name`, if its value is UTF-8.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .header_bytes(name)
      .and_then(|v| std::str::from_utf8(v).ok())
  }

  /// 2xx status
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}
