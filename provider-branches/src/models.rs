use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::BranchError;

/// Upper bound on branch IDs accepted by a single batch request
pub const MAX_BRANCH_BATCH: usize = 50;

/// Doctor-level status, kept consistent with the per-branch statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlobalStatus {
    Active,
    Inactive,
    Suspended,
}

impl GlobalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalStatus::Active => "ACTIVE",
            GlobalStatus::Inactive => "INACTIVE",
            GlobalStatus::Suspended => "SUSPENDED",
        }
    }
}

impl fmt::Display for GlobalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GlobalStatus {
    type Err = BranchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(GlobalStatus::Active),
            "INACTIVE" => Ok(GlobalStatus::Inactive),
            "SUSPENDED" => Ok(GlobalStatus::Suspended),
            other => Err(BranchError::Validation(format!("Unknown global status: {}", other))),
        }
    }
}

/// Status of a single (doctor, branch, role) association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssociationStatus {
    Active,
    Inactive,
}

impl AssociationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationStatus::Active => "ACTIVE",
            AssociationStatus::Inactive => "INACTIVE",
        }
    }
}

impl fmt::Display for AssociationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssociationStatus {
    type Err = BranchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(AssociationStatus::Active),
            "INACTIVE" => Ok(AssociationStatus::Inactive),
            other => Err(BranchError::Validation(format!("Unknown association status: {}", other))),
        }
    }
}

/// Practice role a doctor holds at a branch.
///
/// Closed set; free-form role strings are rejected at the boundary so the
/// (doctor, branch, role) key stays well-defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PracticeRole {
    Consultant,
    Visiting,
    Resident,
    OnCall,
}

impl PracticeRole {
    pub const ALL: [PracticeRole; 4] = [
        PracticeRole::Consultant,
        PracticeRole::Visiting,
        PracticeRole::Resident,
        PracticeRole::OnCall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PracticeRole::Consultant => "CONSULTANT",
            PracticeRole::Visiting => "VISITING",
            PracticeRole::Resident => "RESIDENT",
            PracticeRole::OnCall => "ON_CALL",
        }
    }
}

impl fmt::Display for PracticeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PracticeRole {
    type Err = BranchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(|c: char| c == '-' || c == ' ', "_");
        PracticeRole::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| BranchError::Validation(format!("Unknown practice role: {}", s)))
    }
}

/// Composite key of an association within one doctor's aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationKey {
    pub branch_id: Uuid,
    pub role: PracticeRole,
}

impl AssociationKey {
    pub fn new(branch_id: Uuid, role: PracticeRole) -> Self {
        Self { branch_id, role }
    }
}

/// Doctor-to-branch association with its own activation status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchAssociation {
    pub doctor_id: Uuid,
    pub branch_id: Uuid,
    pub role: PracticeRole,
    pub status: AssociationStatus,
    /// Redacted reason recorded with the last status transition
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BranchAssociation {
    pub fn new(
        doctor_id: Uuid,
        branch_id: Uuid,
        role: PracticeRole,
        status: AssociationStatus,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            doctor_id,
            branch_id,
            role,
            status,
            status_reason: None,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn key(&self) -> AssociationKey {
        AssociationKey::new(self.branch_id, self.role)
    }

    pub fn is_active(&self) -> bool {
        self.status == AssociationStatus::Active
    }
}

/// Doctor record as seen by this service.
///
/// `global_status` and `is_multi_branch` are only written through a
/// reconciled commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    pub id: Uuid,
    pub global_status: GlobalStatus,
    pub is_multi_branch: bool,
    pub primary_branch_id: Option<Uuid>,
    /// Optimistic concurrency token, bumped on every commit
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Doctor {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            global_status: GlobalStatus::Active,
            is_multi_branch: false,
            primary_branch_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: GlobalStatus) -> Self {
        self.global_status = status;
        self
    }
}

/// A doctor record together with every one of its association rows
#[derive(Debug, Clone, PartialEq)]
pub struct DoctorAggregate {
    pub doctor: Doctor,
    pub associations: Vec<BranchAssociation>,
}

impl DoctorAggregate {
    pub fn new(doctor: Doctor) -> Self {
        Self {
            doctor,
            associations: Vec::new(),
        }
    }

    pub fn find(&self, key: &AssociationKey) -> Option<&BranchAssociation> {
        self.associations.iter().find(|a| a.key() == *key)
    }

    pub fn at_branch(&self, branch_id: Uuid) -> impl Iterator<Item = &BranchAssociation> {
        self.associations.iter().filter(move |a| a.branch_id == branch_id)
    }

    pub fn has_branch(&self, branch_id: Uuid) -> bool {
        self.at_branch(branch_id).next().is_some()
    }
}

/// Branch ID → whether the doctor is active there in any role
pub fn branch_status_map(associations: &[BranchAssociation]) -> BTreeMap<Uuid, bool> {
    let mut map = BTreeMap::new();
    for association in associations {
        let active = map.entry(association.branch_id).or_insert(false);
        *active |= association.is_active();
    }
    map
}

pub fn active_branch_ids(associations: &[BranchAssociation]) -> Vec<Uuid> {
    associations
        .iter()
        .filter(|a| a.is_active())
        .map(|a| a.branch_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn distinct_branch_count(associations: &[BranchAssociation]) -> usize {
    associations
        .iter()
        .map(|a| a.branch_id)
        .collect::<BTreeSet<_>>()
        .len()
}

/// Kind of branch-status operation reported back to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    BranchSpecificDeactivation,
    GlobalDeactivation,
    BranchActivation,
    MultiBranchActivation,
}

/// Outcome of a branch-status operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchStatusResult {
    pub doctor_id: Uuid,
    pub success: bool,
    pub message: String,
    pub affected_branches: Vec<Uuid>,
    pub global_status_changed: bool,
    pub new_global_status: GlobalStatus,
    pub remaining_active_branches: usize,
    pub total_branches: usize,
    pub operation_type: OperationType,
}

/// Read-only summary of a doctor's branch footprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorStatusSummary {
    pub doctor_id: Uuid,
    pub global_status: GlobalStatus,
    pub is_multi_branch: bool,
    pub primary_branch_id: Option<Uuid>,
    pub active_branches: usize,
    pub total_branches: usize,
    pub branches: BTreeMap<Uuid, bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Success,
    Failed,
}

/// Request to move a doctor's role associations between branches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub doctor_id: Uuid,
    pub source_branch_id: Uuid,
    pub target_branch_id: Uuid,
    /// Keep the source associations active instead of retiring them
    #[serde(default)]
    pub maintain_existing_assignments: bool,
    #[serde(default)]
    pub notify: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub requested_by: Option<Uuid>,
}

impl TransferRequest {
    pub fn new(doctor_id: Uuid, source_branch_id: Uuid, target_branch_id: Uuid) -> Self {
        Self {
            doctor_id,
            source_branch_id,
            target_branch_id,
            maintain_existing_assignments: false,
            notify: false,
            reason: None,
            requested_by: None,
        }
    }

    pub fn maintaining_existing(mut self) -> Self {
        self.maintain_existing_assignments = true;
        self
    }

    pub fn with_notification(mut self) -> Self {
        self.notify = true;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn requested_by(mut self, user_id: Uuid) -> Self {
        self.requested_by = Some(user_id);
        self
    }
}

/// One row of a doctor's refreshed assignment list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentView {
    pub branch_id: Uuid,
    pub role: PracticeRole,
    pub is_primary: bool,
    pub assigned_at: DateTime<Utc>,
    pub status: AssociationStatus,
}

impl AssignmentView {
    pub fn from_associations(
        associations: &[BranchAssociation],
        primary_branch_id: Option<Uuid>,
    ) -> Vec<Self> {
        let mut views: Vec<Self> = associations
            .iter()
            .map(|a| Self {
                branch_id: a.branch_id,
                role: a.role,
                is_primary: primary_branch_id == Some(a.branch_id),
                assigned_at: a.created_at,
                status: a.status,
            })
            .collect();
        views.sort_by_key(|v| (v.branch_id, v.role));
        views
    }
}

/// Outcome of a transfer; failures are reported here rather than as errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub transfer_id: Uuid,
    pub status: TransferStatus,
    pub message: String,
    pub doctor_id: Uuid,
    pub source_branch_id: Uuid,
    pub target_branch_id: Uuid,
    pub transferred_at: DateTime<Utc>,
    pub current_assignments: Vec<AssignmentView>,
}

impl TransferResult {
    pub fn is_success(&self) -> bool {
        self.status == TransferStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing_accepts_known_roles() {
        assert_eq!("consultant".parse::<PracticeRole>().unwrap(), PracticeRole::Consultant);
        assert_eq!("on-call".parse::<PracticeRole>().unwrap(), PracticeRole::OnCall);
        assert_eq!(" VISITING ".parse::<PracticeRole>().unwrap(), PracticeRole::Visiting);
    }

    #[test]
    fn test_role_parsing_rejects_free_text() {
        let err = "surgeon-in-chief".parse::<PracticeRole>().unwrap_err();
        assert!(matches!(err, BranchError::Validation(_)));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&GlobalStatus::Inactive).unwrap(), "\"INACTIVE\"");
        assert_eq!(serde_json::to_string(&PracticeRole::OnCall).unwrap(), "\"ON_CALL\"");
        assert_eq!(
            serde_json::to_string(&OperationType::MultiBranchActivation).unwrap(),
            "\"MULTI_BRANCH_ACTIVATION\""
        );
    }

    #[test]
    fn test_branch_status_map_merges_roles() {
        let doctor = Uuid::new_v4();
        let branch = Uuid::new_v4();
        let now = Utc::now();
        let rows = vec![
            BranchAssociation::new(
                doctor,
                branch,
                PracticeRole::Consultant,
                AssociationStatus::Inactive,
                now,
            ),
            BranchAssociation::new(
                doctor,
                branch,
                PracticeRole::Visiting,
                AssociationStatus::Active,
                now,
            ),
        ];

        let map = branch_status_map(&rows);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&branch), Some(&true));
        assert_eq!(active_branch_ids(&rows), vec![branch]);
        assert_eq!(distinct_branch_count(&rows), 1);
    }

    #[test]
    fn test_branch_status_result_field_names() {
        let result = BranchStatusResult {
            doctor_id: Uuid::nil(),
            success: true,
            message: "ok".to_string(),
            affected_branches: vec![],
            global_status_changed: false,
            new_global_status: GlobalStatus::Active,
            remaining_active_branches: 1,
            total_branches: 2,
            operation_type: OperationType::BranchSpecificDeactivation,
        };
        let json = serde_json::to_value(&result).unwrap();
        for field in [
            "doctorId",
            "success",
            "message",
            "affectedBranches",
            "globalStatusChanged",
            "newGlobalStatus",
            "remainingActiveBranches",
            "totalBranches",
            "operationType",
        ] {
            assert!(json.get(field).is_some(), "missing field {}", field);
        }
        assert_eq!(json["operationType"], "BRANCH_SPECIFIC_DEACTIVATION");
    }
}
