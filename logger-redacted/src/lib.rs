//! Logging setup with automatic PII redaction
//!
//! Branch deactivations and emergency transfers accept a free-text reason
//! from operators. Those strings end up in structured logs and in the audit
//! trail, so anything that looks like contact data or a national identifier
//! is replaced before it is written.
//!
//! # Detected Data Types
//!
//! - **Email Addresses**: `jane@clinic.org` → `EMAIL[Ab3x...]` (hashed) or `j***@c***`
//! - **Phone Numbers**: `(555) 123-4567` → `PHONE[...]` or `(***) ***-****`
//! - **SSN**: `123-45-6789` → `SSN[...]` or `***-**-****`
//!
//! Hashed replacements keep the same value correlatable across log lines
//! without exposing it.
//!
//! # Example
//!
//! ```rust
//! use logger_redacted::{LoggerConfig, PiiRedactor};
//!
//! let redactor = PiiRedactor::new(&LoggerConfig::default());
//! let reason = redactor.redact("Family emergency, call 555-123-4567");
//! assert!(!reason.contains("4567"));
//! ```

pub mod config;
pub mod redactor;
pub mod subscriber;

pub use config::*;
pub use redactor::*;
pub use subscriber::*;
