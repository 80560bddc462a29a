//! Branch Status Service
//!
//! Every mutation follows the same unit of work: take the doctor's lock,
//! load the aggregate, let the reconciliation engine decide, commit rows and
//! doctor record together. Batch requests are validated before the lock is
//! taken, so a rejected request never reaches the store.

use logger_redacted::PiiRedactor;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditSink, TracingAuditSink};
use crate::config::BranchServiceConfig;
use crate::error::{BranchError, BranchResult};
use crate::locks::DoctorLocks;
use crate::models::{
    active_branch_ids, branch_status_map, AssociationKey, AssociationStatus, BranchAssociation,
    BranchStatusResult, Doctor, DoctorAggregate, DoctorStatusSummary, OperationType, PracticeRole,
    MAX_BRANCH_BATCH,
};
use crate::reconciliation::{reconcile, ChangeContext, Reconciliation, StatusChange};
use crate::repository::{
    AggregateChanges, InMemoryProviderRepository, PostgresProviderRepository, ProviderRepository,
};

/// Changes to apply in one commit, plus an explicit primary branch if the
/// caller wants to move it
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    pub changes: Vec<StatusChange>,
    pub primary_branch: Option<Uuid>,
}

impl UnitOfWork {
    pub fn new(changes: Vec<StatusChange>) -> Self {
        Self {
            changes,
            primary_branch: None,
        }
    }

    pub fn with_primary(mut self, branch_id: Uuid) -> Self {
        self.primary_branch = Some(branch_id);
        self
    }
}

/// What a unit of work produced
#[derive(Debug, Clone)]
pub struct Outcome {
    pub reconciliation: Reconciliation,
    /// Doctor record as stored after the commit
    pub doctor: Doctor,
    /// False when the request changed nothing and the store was not touched
    pub committed: bool,
}

/// Orchestrates branch-scoped status changes for doctors
pub struct BranchStatusService {
    repository: Arc<dyn ProviderRepository>,
    locks: DoctorLocks,
    audit: Arc<dyn AuditSink>,
    redactor: PiiRedactor,
    max_batch_size: usize,
    commit_retries: u32,
}

impl BranchStatusService {
    pub fn new(repository: Arc<dyn ProviderRepository>) -> Self {
        Self {
            repository,
            locks: DoctorLocks::new(),
            audit: Arc::new(TracingAuditSink),
            redactor: PiiRedactor::default(),
            max_batch_size: MAX_BRANCH_BATCH,
            commit_retries: 3,
        }
    }

    /// Build the service and its store from configuration.
    ///
    /// Connects to PostgreSQL when a database URL is configured, otherwise
    /// keeps everything in memory.
    pub async fn from_config(config: &BranchServiceConfig) -> BranchResult<Self> {
        config.validate()?;

        let repository: Arc<dyn ProviderRepository> = match &config.database_url {
            Some(url) => {
                let repository =
                    PostgresProviderRepository::connect(url, config.max_connections).await?;
                repository.ensure_schema().await?;
                Arc::new(repository)
            }
            None => {
                warn!("No database URL configured, using in-memory provider store");
                Arc::new(InMemoryProviderRepository::new())
            }
        };

        Ok(Self::new(repository)
            .with_redactor(PiiRedactor::new(&config.logging))
            .with_max_batch_size(config.max_batch_size)?
            .with_commit_retries(config.commit_retries))
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_redactor(mut self, redactor: PiiRedactor) -> Self {
        self.redactor = redactor;
        self
    }

    /// Lower the batch cap; it can never exceed 50
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> BranchResult<Self> {
        if max_batch_size == 0 || max_batch_size > MAX_BRANCH_BATCH {
            return Err(BranchError::Configuration(format!(
                "max_batch_size must be between 1 and {}, got {}",
                MAX_BRANCH_BATCH, max_batch_size
            )));
        }
        self.max_batch_size = max_batch_size;
        Ok(self)
    }

    pub fn with_commit_retries(mut self, commit_retries: u32) -> Self {
        self.commit_retries = commit_retries;
        self
    }

    pub fn repository(&self) -> Arc<dyn ProviderRepository> {
        Arc::clone(&self.repository)
    }

    pub(crate) fn redact(&self, reason: Option<&str>) -> Option<String> {
        reason.map(|r| self.redactor.redact(r))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Deactivate the doctor at each listed branch, in every role held there
    #[instrument(skip(self, branch_ids, reason), fields(count = branch_ids.len()))]
    pub async fn deactivate_branches(
        &self,
        doctor_id: Uuid,
        branch_ids: &[Uuid],
        reason: Option<&str>,
    ) -> BranchResult<BranchStatusResult> {
        let branches = self.validate_batch(branch_ids)?;
        let reason = self.redact(reason);

        let outcome = self
            .execute(doctor_id, reason.clone(), |_| {
                Ok(UnitOfWork::new(vec![StatusChange::DeactivateBranches(branches.clone())]))
            })
            .await?;

        let rec = &outcome.reconciliation;
        let message = if rec.remaining_active_branches() == 0 {
            format!(
                "Doctor deactivated at {} branch(es); no active branches remain, \
                 global status is {}",
                rec.affected_branches.len(),
                rec.new_global_status
            )
        } else {
            format!(
                "Doctor deactivated at {} branch(es); still active at {} branch(es)",
                rec.affected_branches.len(),
                rec.remaining_active_branches()
            )
        };

        self.audit_change(&outcome, "branch.deactivate", reason).await;
        Ok(status_result(rec, OperationType::BranchSpecificDeactivation, message))
    }

    /// Deactivate every association and the doctor record
    #[instrument(skip(self, reason))]
    pub async fn deactivate_globally(
        &self,
        doctor_id: Uuid,
        reason: Option<&str>,
    ) -> BranchResult<BranchStatusResult> {
        let reason = self.redact(reason);

        let outcome = self
            .execute(doctor_id, reason.clone(), |_| {
                Ok(UnitOfWork::new(vec![StatusChange::DeactivateGlobally]))
            })
            .await?;

        let rec = &outcome.reconciliation;
        let message = format!(
            "Doctor deactivated globally across {} branch(es)",
            rec.total_branches()
        );

        self.audit_change(&outcome, "branch.deactivate_global", reason).await;
        Ok(status_result(rec, OperationType::GlobalDeactivation, message))
    }

    /// Activate every association at one branch
    #[instrument(skip(self))]
    pub async fn activate_branch(
        &self,
        doctor_id: Uuid,
        branch_id: Uuid,
    ) -> BranchResult<BranchStatusResult> {
        let branches = BTreeSet::from([branch_id]);

        let outcome = self
            .execute(doctor_id, None, |_| {
                Ok(UnitOfWork::new(vec![StatusChange::ActivateBranches(branches.clone())]))
            })
            .await?;

        let rec = &outcome.reconciliation;
        let message = format!("Doctor activated at branch {}", branch_id);

        self.audit_change(&outcome, "branch.activate", None).await;
        Ok(status_result(rec, OperationType::BranchActivation, message))
    }

    /// Batch form of [`Self::activate_branch`]; all branches or none
    #[instrument(skip(self, branch_ids), fields(count = branch_ids.len()))]
    pub async fn activate_branches(
        &self,
        doctor_id: Uuid,
        branch_ids: &[Uuid],
    ) -> BranchResult<BranchStatusResult> {
        let branches = self.validate_batch(branch_ids)?;

        let outcome = self
            .execute(doctor_id, None, |_| {
                Ok(UnitOfWork::new(vec![StatusChange::ActivateBranches(branches.clone())]))
            })
            .await?;

        let rec = &outcome.reconciliation;
        let message = format!(
            "Doctor activated at {} branch(es); active at {} branch(es) in total",
            rec.affected_branches.len(),
            rec.remaining_active_branches()
        );

        self.audit_change(&outcome, "branch.activate_batch", None).await;
        Ok(status_result(rec, OperationType::MultiBranchActivation, message))
    }

    /// Create a (doctor, branch, role) association; an existing triple is a conflict
    #[instrument(skip(self))]
    pub async fn add_association(
        &self,
        doctor_id: Uuid,
        branch_id: Uuid,
        role: PracticeRole,
        status: AssociationStatus,
    ) -> BranchResult<BranchAssociation> {
        let outcome = self
            .execute(doctor_id, None, |_| {
                Ok(UnitOfWork::new(vec![StatusChange::AddAssociation {
                    branch_id,
                    role,
                    status,
                }]))
            })
            .await?;

        let key = AssociationKey::new(branch_id, role);
        let association = outcome.reconciliation.get(&key).cloned().ok_or_else(|| {
            BranchError::Storage(format!("association {:?} missing after commit", key))
        })?;

        self.audit_change(&outcome, "association.add", None).await;
        Ok(association)
    }

    /// Soft removal: the row stays and becomes INACTIVE
    #[instrument(skip(self, reason))]
    pub async fn remove_association(
        &self,
        doctor_id: Uuid,
        branch_id: Uuid,
        role: PracticeRole,
        reason: Option<&str>,
    ) -> BranchResult<()> {
        let reason = self.redact(reason);
        let key = AssociationKey::new(branch_id, role);

        let outcome = self
            .execute(doctor_id, reason.clone(), |_| {
                Ok(UnitOfWork::new(vec![StatusChange::DeactivateAssociation(key)]))
            })
            .await?;

        self.audit_change(&outcome, "association.remove", reason).await;
        Ok(())
    }

    /// Make `branch_id` the doctor's primary branch.
    ///
    /// The doctor must be active at that branch in at least one role.
    #[instrument(skip(self))]
    pub async fn set_primary_branch(
        &self,
        doctor_id: Uuid,
        branch_id: Uuid,
    ) -> BranchResult<DoctorStatusSummary> {
        let outcome = self
            .execute(doctor_id, None, |aggregate| {
                if !aggregate.has_branch(branch_id) {
                    return Err(BranchError::association_not_found(doctor_id, branch_id));
                }
                if !aggregate.at_branch(branch_id).any(BranchAssociation::is_active) {
                    return Err(BranchError::Validation(format!(
                        "branch {} has no active association and cannot be primary",
                        branch_id
                    )));
                }
                Ok(UnitOfWork::default().with_primary(branch_id))
            })
            .await?;

        self.audit_change(&outcome, "branch.set_primary", None).await;
        Ok(summarize(&outcome.doctor, &outcome.reconciliation.associations))
    }

    // =========================================================================
    // Read-only projections
    // =========================================================================

    pub async fn get_branch_status_map(
        &self,
        doctor_id: Uuid,
    ) -> BranchResult<BTreeMap<Uuid, bool>> {
        let associations = self.repository.list_associations(doctor_id).await?;
        Ok(branch_status_map(&associations))
    }

    pub async fn is_active_in_any_branch(&self, doctor_id: Uuid) -> BranchResult<bool> {
        let associations = self.repository.list_associations(doctor_id).await?;
        Ok(associations.iter().any(BranchAssociation::is_active))
    }

    pub async fn get_active_branch_count(&self, doctor_id: Uuid) -> BranchResult<usize> {
        Ok(self.get_active_branch_ids(doctor_id).await?.len())
    }

    pub async fn get_active_branch_ids(&self, doctor_id: Uuid) -> BranchResult<Vec<Uuid>> {
        let associations = self.repository.list_associations(doctor_id).await?;
        Ok(active_branch_ids(&associations))
    }

    pub async fn list_associations(&self, doctor_id: Uuid) -> BranchResult<Vec<BranchAssociation>> {
        self.repository.list_associations(doctor_id).await
    }

    pub async fn get_doctor_status(&self, doctor_id: Uuid) -> BranchResult<DoctorStatusSummary> {
        let aggregate = self.load(doctor_id).await?;
        Ok(summarize(&aggregate.doctor, &aggregate.associations))
    }

    pub(crate) async fn load(&self, doctor_id: Uuid) -> BranchResult<DoctorAggregate> {
        self.repository
            .load_aggregate(doctor_id)
            .await?
            .ok_or(BranchError::DoctorNotFound(doctor_id))
    }

    // =========================================================================
    // Unit of work
    // =========================================================================

    /// Run `plan` against the current aggregate and commit the reconciled
    /// result while holding the doctor's lock.
    ///
    /// A stale version means another process committed in between; the
    /// aggregate is reloaded and `plan` runs again.
    pub(crate) async fn execute<F>(
        &self,
        doctor_id: Uuid,
        reason: Option<String>,
        plan: F,
    ) -> BranchResult<Outcome>
    where
        F: Fn(&DoctorAggregate) -> BranchResult<UnitOfWork> + Send + Sync,
    {
        let _guard = self.locks.acquire(doctor_id).await;
        let mut attempt = 0;

        loop {
            let aggregate = self.load(doctor_id).await?;
            let work = plan(&aggregate)?;
            let ctx = ChangeContext::now(reason.clone());
            let reconciliation = reconcile(&aggregate, &work.changes, &ctx)?;

            let primary =
                next_primary_branch(&aggregate.doctor, &reconciliation, work.primary_branch);
            let changes = AggregateChanges::from_reconciliation(
                &aggregate.doctor,
                &reconciliation,
                primary,
                ctx.at,
            );

            if changes.is_noop(&aggregate.doctor) {
                debug!(doctor_id = %doctor_id, "Nothing to commit");
                return Ok(Outcome {
                    reconciliation,
                    doctor: aggregate.doctor,
                    committed: false,
                });
            }

            match self.repository.commit(changes).await {
                Ok(doctor) => {
                    info!(
                        doctor_id = %doctor_id,
                        affected = reconciliation.affected_branches.len(),
                        new_global_status = %reconciliation.new_global_status,
                        version = doctor.version,
                        "Doctor branch status committed"
                    );
                    return Ok(Outcome {
                        reconciliation,
                        doctor,
                        committed: true,
                    });
                }
                Err(BranchError::ConcurrentModification(_)) if attempt < self.commit_retries => {
                    attempt += 1;
                    warn!(doctor_id = %doctor_id, attempt, "Concurrent modification, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn validate_batch(&self, branch_ids: &[Uuid]) -> BranchResult<BTreeSet<Uuid>> {
        if branch_ids.is_empty() {
            return Err(BranchError::Validation(
                "branch ID list must not be empty".to_string(),
            ));
        }
        if branch_ids.len() > self.max_batch_size {
            return Err(BranchError::Validation(format!(
                "at most {} branch IDs are accepted per request, got {}",
                self.max_batch_size,
                branch_ids.len()
            )));
        }
        Ok(branch_ids.iter().copied().collect())
    }

    pub(crate) async fn record_audit(&self, entry: AuditEntry) {
        let action = entry.action.clone();
        if let Err(e) = self.audit.record(entry).await {
            warn!(action = %action, error = %e, "Failed to record audit entry");
        }
    }

    async fn audit_change(&self, outcome: &Outcome, action: &str, reason: Option<String>) {
        if !outcome.committed {
            debug!(action = %action, "Skipping audit for unchanged doctor");
            return;
        }
        let rec = &outcome.reconciliation;
        let entry = AuditEntry::new(rec.doctor_id, action)
            .with_reason(reason)
            .with_details(json!({
                "affectedBranches": rec.affected_branches,
                "previousGlobalStatus": rec.previous_global_status,
                "newGlobalStatus": rec.new_global_status,
                "remainingActiveBranches": rec.remaining_active_branches(),
            }));
        self.record_audit(entry).await;
    }
}

/// Explicit requests win; otherwise an existing primary is kept, and a doctor
/// without one adopts the branch of the first newly added active association
fn next_primary_branch(
    doctor: &Doctor,
    reconciliation: &Reconciliation,
    requested: Option<Uuid>,
) -> Option<Uuid> {
    requested.or(doctor.primary_branch_id).or_else(|| {
        reconciliation
            .inserted_rows()
            .into_iter()
            .find(BranchAssociation::is_active)
            .map(|a| a.branch_id)
    })
}

fn status_result(
    rec: &Reconciliation,
    operation_type: OperationType,
    message: String,
) -> BranchStatusResult {
    BranchStatusResult {
        doctor_id: rec.doctor_id,
        success: true,
        message,
        affected_branches: rec.affected_branches.clone(),
        global_status_changed: rec.global_status_changed(),
        new_global_status: rec.new_global_status,
        remaining_active_branches: rec.remaining_active_branches(),
        total_branches: rec.total_branches(),
        operation_type,
    }
}

fn summarize(doctor: &Doctor, associations: &[BranchAssociation]) -> DoctorStatusSummary {
    let branches = branch_status_map(associations);
    DoctorStatusSummary {
        doctor_id: doctor.id,
        global_status: doctor.global_status,
        is_multi_branch: doctor.is_multi_branch,
        primary_branch_id: doctor.primary_branch_id,
        active_branches: branches.values().filter(|active| **active).count(),
        total_branches: branches.len(),
        branches,
    }
}
