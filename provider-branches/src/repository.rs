use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{BranchError, BranchResult};
use crate::models::{BranchAssociation, Doctor, DoctorAggregate, GlobalStatus};
use crate::reconciliation::Reconciliation;

pub mod postgres;

pub use postgres::PostgresProviderRepository;

/// Everything one reconciled unit of work writes for a doctor
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateChanges {
    pub doctor_id: Uuid,
    /// Version the decision was computed against
    pub expected_version: i64,
    pub inserts: Vec<BranchAssociation>,
    pub updates: Vec<BranchAssociation>,
    pub global_status: GlobalStatus,
    pub is_multi_branch: bool,
    pub primary_branch_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl AggregateChanges {
    pub fn from_reconciliation(
        doctor: &Doctor,
        reconciliation: &Reconciliation,
        primary_branch_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            doctor_id: doctor.id,
            expected_version: doctor.version,
            inserts: reconciliation.inserted_rows(),
            updates: reconciliation.updated_rows(),
            global_status: reconciliation.new_global_status,
            is_multi_branch: reconciliation.is_multi_branch(),
            primary_branch_id,
            updated_at: at,
        }
    }

    /// True when committing would leave `doctor` and its rows unchanged
    pub fn is_noop(&self, doctor: &Doctor) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.global_status == doctor.global_status
            && self.is_multi_branch == doctor.is_multi_branch
            && self.primary_branch_id == doctor.primary_branch_id
    }
}

/// Storage for doctor records and their branch associations.
///
/// Both live behind one seam because every mutation commits them together.
#[async_trait]
pub trait ProviderRepository: Send + Sync {
    /// Register a doctor record; called by profile creation
    async fn insert_doctor(&self, doctor: Doctor) -> BranchResult<Doctor>;

    /// Doctor record and every association row, read as one snapshot
    async fn load_aggregate(&self, doctor_id: Uuid) -> BranchResult<Option<DoctorAggregate>>;

    async fn list_associations(&self, doctor_id: Uuid) -> BranchResult<Vec<BranchAssociation>>;

    /// Atomically write rows and the doctor record.
    ///
    /// Fails with `ConcurrentModification` when the stored version no longer
    /// matches `expected_version`, and with `DuplicateAssociation` when an
    /// insert collides; nothing is written in either case.
    async fn commit(&self, changes: AggregateChanges) -> BranchResult<Doctor>;
}

/// In-memory repository for testing and single-process deployments
pub struct InMemoryProviderRepository {
    aggregates: Arc<DashMap<Uuid, DoctorAggregate>>,
    commits: AtomicU64,
    fail_next_commit: AtomicBool,
}

impl InMemoryProviderRepository {
    pub fn new() -> Self {
        Self {
            aggregates: Arc::new(DashMap::new()),
            commits: AtomicU64::new(0),
            fail_next_commit: AtomicBool::new(false),
        }
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make the next commit fail with a storage error before writing anything
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Seed an aggregate directly, bypassing reconciliation
    pub fn seed(&self, aggregate: DoctorAggregate) {
        self.aggregates.insert(aggregate.doctor.id, aggregate);
    }
}

impl Default for InMemoryProviderRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderRepository for InMemoryProviderRepository {
    async fn insert_doctor(&self, doctor: Doctor) -> BranchResult<Doctor> {
        match self.aggregates.entry(doctor.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(BranchError::Storage(format!(
                "doctor {} already exists",
                doctor.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(DoctorAggregate::new(doctor.clone()));
                Ok(doctor)
            }
        }
    }

    async fn load_aggregate(&self, doctor_id: Uuid) -> BranchResult<Option<DoctorAggregate>> {
        Ok(self.aggregates.get(&doctor_id).map(|entry| entry.value().clone()))
    }

    async fn list_associations(&self, doctor_id: Uuid) -> BranchResult<Vec<BranchAssociation>> {
        Ok(self
            .aggregates
            .get(&doctor_id)
            .map(|entry| entry.associations.clone())
            .unwrap_or_default())
    }

    async fn commit(&self, changes: AggregateChanges) -> BranchResult<Doctor> {
        // The entry guard is held until the end of the commit, which
        // serializes writers of the same doctor.
        let mut entry = self
            .aggregates
            .get_mut(&changes.doctor_id)
            .ok_or(BranchError::DoctorNotFound(changes.doctor_id))?;
        let aggregate = entry.value_mut();

        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(BranchError::Storage("injected commit failure".to_string()));
        }

        if aggregate.doctor.version != changes.expected_version {
            return Err(BranchError::ConcurrentModification(changes.doctor_id));
        }

        let existing: HashSet<_> = aggregate.associations.iter().map(|a| a.key()).collect();
        let mut inserting = HashSet::new();
        for row in &changes.inserts {
            if existing.contains(&row.key()) || !inserting.insert(row.key()) {
                return Err(BranchError::DuplicateAssociation {
                    doctor_id: changes.doctor_id,
                    branch_id: row.branch_id,
                    role: row.role,
                });
            }
        }
        if let Some(missing) = changes.updates.iter().find(|r| !existing.contains(&r.key())) {
            return Err(BranchError::AssociationNotFound {
                doctor_id: changes.doctor_id,
                branch_id: missing.branch_id,
                role: Some(missing.role),
            });
        }

        for update in changes.updates {
            if let Some(row) = aggregate.associations.iter_mut().find(|a| a.key() == update.key()) {
                *row = update;
            }
        }
        aggregate.associations.extend(changes.inserts);

        let doctor = &mut aggregate.doctor;
        doctor.global_status = changes.global_status;
        doctor.is_multi_branch = changes.is_multi_branch;
        doctor.primary_branch_id = changes.primary_branch_id;
        doctor.updated_at = changes.updated_at;
        doctor.version += 1;

        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!(doctor_id = %doctor.id, version = doctor.version, "Committed doctor aggregate");

        Ok(doctor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssociationStatus, PracticeRole};

    fn changes_for(doctor: &Doctor, inserts: Vec<BranchAssociation>) -> AggregateChanges {
        AggregateChanges {
            doctor_id: doctor.id,
            expected_version: doctor.version,
            inserts,
            updates: vec![],
            global_status: GlobalStatus::Active,
            is_multi_branch: false,
            primary_branch_id: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_commit_bumps_version() {
        let repo = InMemoryProviderRepository::new();
        let doctor = repo.insert_doctor(Doctor::new(Uuid::new_v4())).await.unwrap();
        let row = BranchAssociation::new(
            doctor.id,
            Uuid::new_v4(),
            PracticeRole::Consultant,
            AssociationStatus::Active,
            Utc::now(),
        );

        let committed = repo.commit(changes_for(&doctor, vec![row])).await.unwrap();
        assert_eq!(committed.version, 1);
        assert_eq!(repo.list_associations(doctor.id).await.unwrap().len(), 1);
        assert_eq!(repo.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let repo = InMemoryProviderRepository::new();
        let doctor = repo.insert_doctor(Doctor::new(Uuid::new_v4())).await.unwrap();

        repo.commit(changes_for(&doctor, vec![])).await.unwrap();
        let err = repo.commit(changes_for(&doctor, vec![])).await.unwrap_err();

        assert!(matches!(err, BranchError::ConcurrentModification(_)));
        assert_eq!(repo.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_writes_nothing() {
        let repo = InMemoryProviderRepository::new();
        let doctor = repo.insert_doctor(Doctor::new(Uuid::new_v4())).await.unwrap();
        let branch = Uuid::new_v4();
        let row = BranchAssociation::new(
            doctor.id,
            branch,
            PracticeRole::Visiting,
            AssociationStatus::Active,
            Utc::now(),
        );
        let doctor = repo.commit(changes_for(&doctor, vec![row.clone()])).await.unwrap();

        let other = BranchAssociation::new(
            doctor.id,
            Uuid::new_v4(),
            PracticeRole::Visiting,
            AssociationStatus::Active,
            Utc::now(),
        );
        let err = repo
            .commit(changes_for(&doctor, vec![other, row]))
            .await
            .unwrap_err();

        assert!(matches!(err, BranchError::DuplicateAssociation { .. }));
        assert_eq!(repo.list_associations(doctor.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_doctor_is_rejected() {
        let repo = InMemoryProviderRepository::new();
        let doctor = Doctor::new(Uuid::new_v4());
        repo.insert_doctor(doctor.clone()).await.unwrap();
        assert!(repo.insert_doctor(doctor).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failure_writes_nothing() {
        let repo = InMemoryProviderRepository::new();
        let doctor = repo.insert_doctor(Doctor::new(Uuid::new_v4())).await.unwrap();
        repo.fail_next_commit();

        assert!(matches!(
            repo.commit(changes_for(&doctor, vec![])).await,
            Err(BranchError::Storage(_))
        ));
        let stored = repo.load_aggregate(doctor.id).await.unwrap().unwrap();
        assert_eq!(stored.doctor.version, 0);
        assert_eq!(repo.commit_count(), 0);
    }
}
