//! Transfer notifications

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::BranchResult;
use crate::models::TransferResult;

/// Told about completed transfers that asked for notification
#[async_trait]
pub trait TransferNotifier: Send + Sync {
    async fn transfer_completed(
        &self,
        result: &TransferResult,
        reason: Option<&str>,
    ) -> BranchResult<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl TransferNotifier for NoopNotifier {
    async fn transfer_completed(
        &self,
        result: &TransferResult,
        _reason: Option<&str>,
    ) -> BranchResult<()> {
        debug!(transfer_id = %result.transfer_id, "Transfer notification skipped");
        Ok(())
    }
}

/// Records every notification; used by tests
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(TransferResult, Option<String>)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(TransferResult, Option<String>)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl TransferNotifier for RecordingNotifier {
    async fn transfer_completed(
        &self,
        result: &TransferResult,
        reason: Option<&str>,
    ) -> BranchResult<()> {
        self.sent.lock().push((result.clone(), reason.map(str::to_string)));
        Ok(())
    }
}
