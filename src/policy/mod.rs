//! Fetch interposition policy.
//!
//! Offline-first: a stored snapshot always wins, misses go to the network
//! and eligible responses are stored behind the caller's back, and network
//! failures end in the navigation shell or a synthesized 503.

mod config;
mod intercept;

pub use config::{Eligibility, PolicyConfig};
pub use intercept::{ActivationReport, InterceptionPolicy, Intercepted, Outcome};
