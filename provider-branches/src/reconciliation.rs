//! Reconciliation engine
//!
//! Pure decision logic: given a doctor's aggregate and the requested
//! branch-scope changes, project the resulting association set and the new
//! global status. No I/O happens here; the services commit what this module
//! decides.
//!
//! Rules:
//! - branch-scoped deactivation keeps the doctor globally active while any
//!   association stays active, otherwise the doctor becomes INACTIVE
//! - global deactivation forces every association and the doctor INACTIVE
//! - activating any association makes the doctor ACTIVE, whatever the
//!   prior global status
//! - every branch or triple named by a change must exist; unknown
//!   references fail the whole decision

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::error::{BranchError, BranchResult};
use crate::models::{
    active_branch_ids, distinct_branch_count, AssociationKey, AssociationStatus,
    BranchAssociation, DoctorAggregate, GlobalStatus, PracticeRole,
};

/// A single requested change to a doctor's association set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    DeactivateBranches(BTreeSet<Uuid>),
    DeactivateGlobally,
    ActivateBranches(BTreeSet<Uuid>),
    AddAssociation {
        branch_id: Uuid,
        role: PracticeRole,
        status: AssociationStatus,
    },
    ActivateAssociation(AssociationKey),
    /// Soft removal: the row is kept and marked INACTIVE
    DeactivateAssociation(AssociationKey),
}

/// Metadata stamped onto every row a change touches
#[derive(Debug, Clone)]
pub struct ChangeContext {
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl ChangeContext {
    pub fn now(reason: Option<String>) -> Self {
        Self {
            reason,
            at: Utc::now(),
        }
    }
}

/// Projected state after applying a set of changes
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub doctor_id: Uuid,
    /// Full projected association set, ordered by (branch, role)
    pub associations: Vec<BranchAssociation>,
    pub inserted: BTreeSet<AssociationKey>,
    /// Pre-existing rows whose status changed
    pub updated: BTreeSet<AssociationKey>,
    pub affected_branches: Vec<Uuid>,
    pub previous_global_status: GlobalStatus,
    pub new_global_status: GlobalStatus,
}

impl Reconciliation {
    pub fn global_status_changed(&self) -> bool {
        self.previous_global_status != self.new_global_status
    }

    pub fn remaining_active_branches(&self) -> usize {
        active_branch_ids(&self.associations).len()
    }

    pub fn total_branches(&self) -> usize {
        distinct_branch_count(&self.associations)
    }

    pub fn is_multi_branch(&self) -> bool {
        self.total_branches() > 1
    }

    pub fn get(&self, key: &AssociationKey) -> Option<&BranchAssociation> {
        self.associations.iter().find(|a| a.key() == *key)
    }

    pub fn inserted_rows(&self) -> Vec<BranchAssociation> {
        self.rows_for(&self.inserted)
    }

    pub fn updated_rows(&self) -> Vec<BranchAssociation> {
        self.rows_for(&self.updated)
    }

    fn rows_for(&self, keys: &BTreeSet<AssociationKey>) -> Vec<BranchAssociation> {
        self.associations
            .iter()
            .filter(|a| keys.contains(&a.key()))
            .cloned()
            .collect()
    }
}

/// Decide the outcome of a single change.
pub fn decide_global_status(
    aggregate: &DoctorAggregate,
    change: &StatusChange,
    ctx: &ChangeContext,
) -> BranchResult<Reconciliation> {
    reconcile(aggregate, std::slice::from_ref(change), ctx)
}

/// Apply `changes` in order to a projection of `aggregate`.
///
/// Either every change applies or the first failure is returned; the
/// aggregate itself is never modified.
pub fn reconcile(
    aggregate: &DoctorAggregate,
    changes: &[StatusChange],
    ctx: &ChangeContext,
) -> BranchResult<Reconciliation> {
    let mut projection = Projection::new(aggregate);

    for change in changes {
        projection.apply(change, ctx)?;
    }

    Ok(projection.finish())
}

/// Global status implied by a projected association set.
///
/// A SUSPENDED doctor stays suspended while any association is active;
/// suspension is set outside this service.
pub fn derive_global_status<'a, I>(associations: I, prior: GlobalStatus) -> GlobalStatus
where
    I: IntoIterator<Item = &'a BranchAssociation>,
{
    let mut any_rows = false;
    for association in associations {
        any_rows = true;
        if association.is_active() {
            return match prior {
                GlobalStatus::Suspended => GlobalStatus::Suspended,
                _ => GlobalStatus::Active,
            };
        }
    }

    if any_rows {
        GlobalStatus::Inactive
    } else {
        prior
    }
}

struct Projection {
    doctor_id: Uuid,
    rows: BTreeMap<AssociationKey, BranchAssociation>,
    inserted: BTreeSet<AssociationKey>,
    touched: BTreeSet<AssociationKey>,
    affected: BTreeSet<Uuid>,
    previous: GlobalStatus,
    status: GlobalStatus,
}

impl Projection {
    fn new(aggregate: &DoctorAggregate) -> Self {
        Self {
            doctor_id: aggregate.doctor.id,
            rows: aggregate
                .associations
                .iter()
                .map(|a| (a.key(), a.clone()))
                .collect(),
            inserted: BTreeSet::new(),
            touched: BTreeSet::new(),
            affected: BTreeSet::new(),
            previous: aggregate.doctor.global_status,
            status: aggregate.doctor.global_status,
        }
    }

    fn apply(&mut self, change: &StatusChange, ctx: &ChangeContext) -> BranchResult<()> {
        match change {
            StatusChange::DeactivateBranches(branches) => {
                self.ensure_branches_known(branches)?;
                self.set_branches(branches, AssociationStatus::Inactive, ctx);
                self.status = derive_global_status(self.rows.values(), self.status);
            }
            StatusChange::DeactivateGlobally => {
                let all: BTreeSet<Uuid> = self.rows.keys().map(|k| k.branch_id).collect();
                self.set_branches(&all, AssociationStatus::Inactive, ctx);
                self.status = GlobalStatus::Inactive;
            }
            StatusChange::ActivateBranches(branches) => {
                self.ensure_branches_known(branches)?;
                self.set_branches(branches, AssociationStatus::Active, ctx);
                self.status = GlobalStatus::Active;
            }
            StatusChange::AddAssociation {
                branch_id,
                role,
                status,
            } => {
                let key = AssociationKey::new(*branch_id, *role);
                if self.rows.contains_key(&key) {
                    return Err(BranchError::DuplicateAssociation {
                        doctor_id: self.doctor_id,
                        branch_id: *branch_id,
                        role: *role,
                    });
                }

                let mut row =
                    BranchAssociation::new(self.doctor_id, *branch_id, *role, *status, ctx.at);
                row.status_reason = ctx.reason.clone();
                self.rows.insert(key, row);
                self.inserted.insert(key);
                self.affected.insert(*branch_id);

                self.status = match status {
                    AssociationStatus::Active => GlobalStatus::Active,
                    AssociationStatus::Inactive => {
                        derive_global_status(self.rows.values(), self.status)
                    }
                };
            }
            StatusChange::ActivateAssociation(key) => {
                self.set_one(key, AssociationStatus::Active, ctx)?;
                self.status = GlobalStatus::Active;
            }
            StatusChange::DeactivateAssociation(key) => {
                self.set_one(key, AssociationStatus::Inactive, ctx)?;
                self.status = derive_global_status(self.rows.values(), self.status);
            }
        }
        Ok(())
    }

    fn ensure_branches_known(&self, branches: &BTreeSet<Uuid>) -> BranchResult<()> {
        if branches.is_empty() {
            return Err(BranchError::Validation(
                "branch ID list must not be empty".to_string(),
            ));
        }

        let known: BTreeSet<Uuid> = self.rows.keys().map(|k| k.branch_id).collect();
        match branches.iter().find(|b| !known.contains(b)) {
            Some(missing) => Err(BranchError::association_not_found(self.doctor_id, *missing)),
            None => Ok(()),
        }
    }

    fn set_branches(
        &mut self,
        branches: &BTreeSet<Uuid>,
        status: AssociationStatus,
        ctx: &ChangeContext,
    ) {
        for (key, row) in self.rows.iter_mut() {
            if branches.contains(&key.branch_id) {
                Self::transition(row, status, ctx, &mut self.touched);
            }
        }
        self.affected.extend(branches.iter().copied());
    }

    fn set_one(
        &mut self,
        key: &AssociationKey,
        status: AssociationStatus,
        ctx: &ChangeContext,
    ) -> BranchResult<()> {
        let row = self.rows.get_mut(key).ok_or(BranchError::AssociationNotFound {
            doctor_id: self.doctor_id,
            branch_id: key.branch_id,
            role: Some(key.role),
        })?;
        Self::transition(row, status, ctx, &mut self.touched);
        self.affected.insert(key.branch_id);
        Ok(())
    }

    // Rows already in the target status are left untouched
    fn transition(
        row: &mut BranchAssociation,
        status: AssociationStatus,
        ctx: &ChangeContext,
        touched: &mut BTreeSet<AssociationKey>,
    ) {
        if row.status == status {
            return;
        }
        row.status = status;
        row.status_reason = ctx.reason.clone();
        row.updated_at = ctx.at;
        touched.insert(row.key());
    }

    fn finish(self) -> Reconciliation {
        let updated = self
            .touched
            .difference(&self.inserted)
            .copied()
            .collect();

        Reconciliation {
            doctor_id: self.doctor_id,
            associations: self.rows.into_values().collect(),
            inserted: self.inserted,
            updated,
            affected_branches: self.affected.into_iter().collect(),
            previous_global_status: self.previous,
            new_global_status: self.status,
        }
    }
}
