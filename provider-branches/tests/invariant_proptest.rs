//! Property-based tests for the global status invariant.
//!
//! Random sequences of branch operations are run against the service. After
//! every step the stored doctor must be ACTIVE exactly when one of its
//! associations is ACTIVE, and a rejected step must leave the store as it
//! was.

use proptest::prelude::*;
use provider_branches::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

const BRANCHES: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    Add(usize, PracticeRole, bool),
    Deactivate(Vec<usize>),
    Activate(Vec<usize>),
    DeactivateGlobally,
    Remove(usize, PracticeRole),
    Transfer(usize, usize, bool),
}

fn role_strategy() -> impl Strategy<Value = PracticeRole> {
    prop::sample::select(PracticeRole::ALL.to_vec())
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let branch = 0..BRANCHES;
    let branches = prop::collection::vec(0..BRANCHES, 1..3);
    prop_oneof![
        3 => (branch.clone(), role_strategy(), any::<bool>())
            .prop_map(|(b, r, a)| Op::Add(b, r, a)),
        2 => branches.clone().prop_map(Op::Deactivate),
        2 => branches.prop_map(Op::Activate),
        1 => Just(Op::DeactivateGlobally),
        1 => (branch.clone(), role_strategy()).prop_map(|(b, r)| Op::Remove(b, r)),
        1 => (branch.clone(), branch, any::<bool>()).prop_map(|(s, t, m)| Op::Transfer(s, t, m)),
    ]
}

async fn apply(
    service: &BranchStatusService,
    transfers: &TransferService,
    doctor_id: Uuid,
    ids: &[Uuid],
    op: &Op,
) -> bool {
    let pick = |idx: &[usize]| idx.iter().map(|i| ids[*i]).collect::<Vec<_>>();
    match op {
        Op::Add(b, role, active) => {
            let status = if *active {
                AssociationStatus::Active
            } else {
                AssociationStatus::Inactive
            };
            service.add_association(doctor_id, ids[*b], *role, status).await.is_ok()
        }
        Op::Deactivate(idx) => service
            .deactivate_branches(doctor_id, &pick(idx), None)
            .await
            .is_ok(),
        Op::Activate(idx) => service.activate_branches(doctor_id, &pick(idx)).await.is_ok(),
        Op::DeactivateGlobally => service.deactivate_globally(doctor_id, None).await.is_ok(),
        Op::Remove(b, role) => service
            .remove_association(doctor_id, ids[*b], *role, None)
            .await
            .is_ok(),
        Op::Transfer(s, t, maintain) => {
            let mut request = TransferRequest::new(doctor_id, ids[*s], ids[*t]);
            request.maintain_existing_assignments = *maintain;
            transfers.transfer(request).await.is_success()
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn global_status_matches_associations(ops in prop::collection::vec(op_strategy(), 1..25)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

        runtime.block_on(async {
            let repo = Arc::new(InMemoryProviderRepository::new());
            let doctor = repo.insert_doctor(Doctor::new(Uuid::new_v4())).await.unwrap();
            let service = Arc::new(BranchStatusService::new(repo.clone()));
            let transfers = TransferService::new(service.clone());
            let ids: Vec<Uuid> = (0..BRANCHES).map(|_| Uuid::new_v4()).collect();
            let mut globally_deactivated = false;

            for op in &ops {
                let before = repo.load_aggregate(doctor.id).await.unwrap().unwrap();
                let applied = apply(&service, &transfers, doctor.id, &ids, op).await;
                let after = repo.load_aggregate(doctor.id).await.unwrap().unwrap();

                if !applied {
                    prop_assert_eq!(&after, &before, "rejected {:?} changed the store", op);
                    continue;
                }
                if matches!(op, Op::DeactivateGlobally) {
                    globally_deactivated = true;
                }

                let any_active = after.associations.iter().any(BranchAssociation::is_active);
                if after.associations.is_empty() {
                    let expected = if globally_deactivated {
                        GlobalStatus::Inactive
                    } else {
                        GlobalStatus::Active
                    };
                    prop_assert_eq!(after.doctor.global_status, expected);
                } else {
                    prop_assert_eq!(
                        after.doctor.global_status == GlobalStatus::Active,
                        any_active,
                        "after {:?}", op
                    );
                }

                let distinct: BTreeSet<Uuid> =
                    after.associations.iter().map(|a| a.branch_id).collect();
                prop_assert_eq!(after.doctor.is_multi_branch, distinct.len() > 1);

                let keys: BTreeSet<AssociationKey> =
                    after.associations.iter().map(BranchAssociation::key).collect();
                prop_assert_eq!(keys.len(), after.associations.len(), "duplicate triple stored");

                // Rows are never deleted
                prop_assert!(after.associations.len() >= before.associations.len());
            }
            Ok(())
        })?;
    }
}
