//! Audit trail for branch status changes and transfers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::BranchResult;

/// One audited action against a doctor's branch associations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub doctor_id: Uuid,
    pub action: String,
    pub actor: Option<Uuid>,
    /// Already redacted
    pub reason: Option<String>,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(doctor_id: Uuid, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            doctor_id,
            action: action.into(),
            actor: None,
            reason: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_actor(mut self, actor: Option<Uuid>) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Destination for audit entries.
///
/// Failures are logged by the caller and never fail the audited operation.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> BranchResult<()>;
}

/// Writes each entry as a structured tracing event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) -> BranchResult<()> {
        info!(
            target: "audit",
            audit_id = %entry.id,
            doctor_id = %entry.doctor_id,
            action = %entry.action,
            actor = ?entry.actor,
            reason = entry.reason.as_deref().unwrap_or(""),
            details = %entry.details,
            "Provider branch audit"
        );
        Ok(())
    }
}

/// Keeps entries in memory for inspection in tests
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.action.clone()).collect()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> BranchResult<()> {
        self.entries.lock().push(entry);
        Ok(())
    }
}
