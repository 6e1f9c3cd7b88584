//! Network side of the interception layer.
//!
//! Request/response shapes plus the `Fetcher` seam. `HttpFetcher` talks to
//! the real origin; tests substitute a scripted fetcher.

mod client;
mod types;

pub use client::{Fetcher, HttpFetcher};
pub use types::{
  Destination, Headers, Request, Response, ResponseType, UNAVAILABLE_BODY, UNAVAILABLE_STATUS_TEXT,
};
