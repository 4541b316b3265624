//! linkcheck-probe — URL probing for linkcheck.
//!
//! Classifies a single URL as success or failure by fetching it over
//! HTTP(S), optionally scanning the body for failure-indicating text.
//!
//! # Architecture
//!
//! ```text
//! UrlProbe (trait, injected into the worker)
//!   └── HttpProbe
//!         ├── OutboundQuota (governor) → ProbeError::QuotaExceeded
//!         ├── reqwest client (15s timeouts, gzip, redirects, no pooling)
//!         └── classify() → UrlCheckOutcome
//! ```
//!
//! URL-level problems (bad status, transport errors, matched text) are
//! results, never errors. The only error a caller must act on is
//! exhaustion of its own outbound quota.

pub mod checker;
pub mod error;
pub mod quota;

pub use checker::{HttpProbe, ProbeConfig, UrlProbe};
pub use error::{ProbeError, ProbeResult};
pub use quota::OutboundQuota;
