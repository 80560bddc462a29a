//! Transfer Service
//!
//! Moves a doctor's role associations from a source branch to a target
//! branch. Copying the roles and retiring the source rows are planned
//! together and committed as one unit of work, so a failed transfer leaves
//! the doctor exactly as it found them.

use chrono::Utc;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::branch_status::{BranchStatusService, UnitOfWork};
use crate::error::{BranchError, BranchResult};
use crate::models::{
    AssignmentView, AssociationKey, AssociationStatus, DoctorAggregate, PracticeRole,
    TransferRequest, TransferResult, TransferStatus,
};
use crate::notify::{NoopNotifier, TransferNotifier};
use crate::reconciliation::StatusChange;

pub struct TransferService {
    branch_status: Arc<BranchStatusService>,
    notifier: Arc<dyn TransferNotifier>,
}

impl TransferService {
    pub fn new(branch_status: Arc<BranchStatusService>) -> Self {
        Self {
            branch_status,
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn TransferNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Run a transfer to a terminal state.
    ///
    /// Failures are reported in the result, never as an error.
    #[instrument(
        skip(self, request),
        fields(
            doctor_id = %request.doctor_id,
            source = %request.source_branch_id,
            target = %request.target_branch_id,
            maintain = request.maintain_existing_assignments
        )
    )]
    pub async fn transfer(&self, request: TransferRequest) -> TransferResult {
        let transfer_id = Uuid::new_v4();
        let reason = self.branch_status.redact(request.reason.as_deref());

        let outcome = self
            .branch_status
            .execute(request.doctor_id, reason.clone(), |aggregate| {
                plan_transfer(aggregate, &request)
            })
            .await;

        let result = match outcome {
            Ok(outcome) => {
                let message = if request.maintain_existing_assignments {
                    format!(
                        "Doctor transferred to branch {}; assignments at branch {} kept",
                        request.target_branch_id, request.source_branch_id
                    )
                } else {
                    format!(
                        "Doctor transferred from branch {} to branch {}",
                        request.source_branch_id, request.target_branch_id
                    )
                };
                info!(transfer_id = %transfer_id, "Transfer succeeded");

                transfer_result(
                    transfer_id,
                    &request,
                    TransferStatus::Success,
                    message,
                    AssignmentView::from_associations(
                        &outcome.reconciliation.associations,
                        outcome.doctor.primary_branch_id,
                    ),
                )
            }
            Err(e) => {
                warn!(transfer_id = %transfer_id, error = %e, "Transfer failed");
                let message = failure_message(&request, &e);
                let assignments = self.current_assignments(request.doctor_id).await;
                transfer_result(
                    transfer_id,
                    &request,
                    TransferStatus::Failed,
                    message,
                    assignments,
                )
            }
        };

        let action = if result.is_success() {
            "transfer.completed"
        } else {
            "transfer.failed"
        };
        let entry = AuditEntry::new(request.doctor_id, action)
            .with_actor(request.requested_by)
            .with_reason(reason.clone())
            .with_details(json!({
                "transferId": result.transfer_id,
                "sourceBranchId": request.source_branch_id,
                "targetBranchId": request.target_branch_id,
                "maintainExistingAssignments": request.maintain_existing_assignments,
                "message": result.message,
            }));
        self.branch_status.record_audit(entry).await;

        if request.notify {
            if let Err(e) = self
                .notifier
                .transfer_completed(&result, reason.as_deref())
                .await
            {
                warn!(transfer_id = %transfer_id, error = %e, "Transfer notification failed");
            }
        }

        result
    }

    /// True when the doctor has any association and none at `target_branch_id`
    pub async fn can_transfer(
        &self,
        doctor_id: Uuid,
        target_branch_id: Uuid,
    ) -> BranchResult<bool> {
        let associations = self.branch_status.list_associations(doctor_id).await?;
        Ok(!associations.is_empty()
            && associations.iter().all(|a| a.branch_id != target_branch_id))
    }

    /// Transfer that retires the source assignments and always notifies.
    ///
    /// The reason is mandatory; a blank one fails the transfer.
    pub async fn emergency_transfer(
        &self,
        doctor_id: Uuid,
        source_branch_id: Uuid,
        target_branch_id: Uuid,
        reason: &str,
    ) -> TransferResult {
        let request = TransferRequest::new(doctor_id, source_branch_id, target_branch_id)
            .with_notification()
            .with_reason(reason);

        if reason.trim().is_empty() {
            warn!(doctor_id = %doctor_id, "Emergency transfer rejected without a reason");
            let assignments = self.current_assignments(doctor_id).await;
            return transfer_result(
                Uuid::new_v4(),
                &request,
                TransferStatus::Failed,
                "Emergency transfer requires a reason".to_string(),
                assignments,
            );
        }

        warn!(
            doctor_id = %doctor_id,
            source = %source_branch_id,
            target = %target_branch_id,
            "Emergency transfer requested"
        );
        self.transfer(request).await
    }

    async fn current_assignments(&self, doctor_id: Uuid) -> Vec<AssignmentView> {
        match self.branch_status.load(doctor_id).await {
            Ok(aggregate) => AssignmentView::from_associations(
                &aggregate.associations,
                aggregate.doctor.primary_branch_id,
            ),
            Err(_) => Vec::new(),
        }
    }
}

/// Plan the changes a transfer makes to `aggregate`.
///
/// Roles held at the source are created ACTIVE at the target, or reactivated
/// there when an inactive row exists. Roles already active at the target are
/// skipped. Without `maintain_existing_assignments` every source role is
/// retired and the target becomes primary if the source was.
pub fn plan_transfer(
    aggregate: &DoctorAggregate,
    request: &TransferRequest,
) -> BranchResult<UnitOfWork> {
    let doctor_id = aggregate.doctor.id;
    let (source, target) = (request.source_branch_id, request.target_branch_id);

    if source == target {
        return Err(BranchError::Validation(
            "source and target branch must differ".to_string(),
        ));
    }

    let roles: BTreeSet<PracticeRole> = aggregate.at_branch(source).map(|a| a.role).collect();
    if roles.is_empty() {
        return Err(BranchError::association_not_found(doctor_id, source));
    }

    if !request.maintain_existing_assignments {
        let clashing: Vec<String> = roles
            .iter()
            .filter(|role| aggregate.find(&AssociationKey::new(target, **role)).is_some())
            .map(|role| role.to_string())
            .collect();
        if !clashing.is_empty() {
            return Err(BranchError::TransferIneligible(format!(
                "doctor {} already exists at target branch {} as {}",
                doctor_id,
                target,
                clashing.join(", ")
            )));
        }
    }

    let mut changes = Vec::new();
    for role in &roles {
        let key = AssociationKey::new(target, *role);
        match aggregate.find(&key) {
            None => changes.push(StatusChange::AddAssociation {
                branch_id: target,
                role: *role,
                status: AssociationStatus::Active,
            }),
            Some(existing) if !existing.is_active() => {
                changes.push(StatusChange::ActivateAssociation(key))
            }
            Some(_) => {}
        }
    }

    let mut work = UnitOfWork::new(changes);
    if !request.maintain_existing_assignments {
        work.changes.extend(roles.iter().map(|role| {
            StatusChange::DeactivateAssociation(AssociationKey::new(source, *role))
        }));
        let primary = aggregate.doctor.primary_branch_id;
        if primary.is_none() || primary == Some(source) {
            work = work.with_primary(target);
        }
    }

    Ok(work)
}

fn transfer_result(
    transfer_id: Uuid,
    request: &TransferRequest,
    status: TransferStatus,
    message: String,
    current_assignments: Vec<AssignmentView>,
) -> TransferResult {
    TransferResult {
        transfer_id,
        status,
        message,
        doctor_id: request.doctor_id,
        source_branch_id: request.source_branch_id,
        target_branch_id: request.target_branch_id,
        transferred_at: Utc::now(),
        current_assignments,
    }
}

fn failure_message(request: &TransferRequest, error: &BranchError) -> String {
    match error {
        BranchError::AssociationNotFound { branch_id, .. }
            if *branch_id == request.source_branch_id =>
        {
            format!(
                "Doctor {} not found at source branch {}",
                request.doctor_id, request.source_branch_id
            )
        }
        BranchError::TransferIneligible(detail) => {
            format!("Transfer rejected, already exists at target: {}", detail)
        }
        BranchError::DoctorNotFound(id) => format!("Doctor {} not found", id),
        other => format!("Transfer failed: {}", other),
    }
}
