//! Common error handling utilities for the provider profile service
//!
//! Service crates keep their own `thiserror` enums; this crate holds the
//! pieces every one of them shares when a failure leaves the process:
//!
//! - **Error Codes**: stable, namespaced code strings (`PROVIDER_5001`, ...)
//!   that API clients can match on
//! - **Error Envelope**: the serializable [`ErrorResponse`] an HTTP layer
//!   returns, carrying code, message, status hint and optional details
//!
//! # Example
//!
//! ```rust
//! use error_common::{codes, ErrorResponse};
//!
//! let response = ErrorResponse::new(
//!     codes::validation::INVALID_INPUT,
//!     "branch ID list must not be empty",
//! )
//! .with_status(400);
//! assert_eq!(response.code, "VALIDATION_1001");
//! ```

pub mod codes;
pub mod types;

pub use types::*;
