use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codes::http_status_for;

/// Serializable error envelope returned to API callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Stable error code, see [`crate::codes`]
    pub code: String,
    /// Human-readable reason
    pub message: String,
    /// HTTP status hint
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    /// Create a response; the status defaults to the code's mapping
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            status: http_status_for(code),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

/// Implemented by service error enums that can be surfaced to API callers
pub trait ApiError: std::error::Error {
    /// Stable error code
    fn code(&self) -> &'static str;

    fn to_response(&self) -> ErrorResponse {
        let response = ErrorResponse::new(self.code(), self.to_string());
        if response.status >= 500 {
            tracing::error!(code = self.code(), error = %self, "Internal error surfaced to caller");
        }
        response
    }
}

/// Errors raised while building an envelope from untrusted input
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ErrorResponse {
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;

    #[test]
    fn test_default_status_follows_code() {
        let response = ErrorResponse::new(codes::provider::DOCTOR_NOT_FOUND, "missing");
        assert_eq!(response.status, 404);
        assert!(response.is_client_error());
    }

    #[test]
    fn test_serialized_field_names() {
        let response = ErrorResponse::new(codes::validation::INVALID_INPUT, "empty")
            .with_details(serde_json::json!({ "field": "branchIds" }));
        let json: serde_json::Value = serde_json::from_str(&response.to_json().unwrap()).unwrap();
        assert_eq!(json["code"], "VALIDATION_1001");
        assert_eq!(json["status"], 400);
        assert_eq!(json["details"]["field"], "branchIds");
        assert!(json.get("timestamp").is_some());
    }
}
