//! # Error Handling
//!
//! Crate-level error type plus the certificate error family used by the
//! signature service. Each service keeps its own `thiserror` enum; they all
//! convert into [`CustodiaError`] at the composition root.

pub mod certificate;
pub mod types;

pub use certificate::CertificateError;
pub use types::{CustodiaError, Result};
