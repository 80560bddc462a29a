//! Branch transfer scenarios against the in-memory store

use provider_branches::*;
use std::sync::Arc;
use uuid::Uuid;

struct Fixture {
    repo: Arc<InMemoryProviderRepository>,
    audit: Arc<InMemoryAuditSink>,
    notifier: Arc<RecordingNotifier>,
    branch_status: Arc<BranchStatusService>,
    transfers: TransferService,
    doctor_id: Uuid,
}

async fn setup(branches: &[(Uuid, PracticeRole, AssociationStatus)]) -> Fixture {
    let repo = Arc::new(InMemoryProviderRepository::new());
    let audit = Arc::new(InMemoryAuditSink::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let doctor = repo.insert_doctor(Doctor::new(Uuid::new_v4())).await.unwrap();

    let branch_status =
        Arc::new(BranchStatusService::new(repo.clone()).with_audit_sink(audit.clone()));
    for (branch, role, status) in branches {
        branch_status.add_association(doctor.id, *branch, *role, *status).await.unwrap();
    }
    let transfers = TransferService::new(branch_status.clone()).with_notifier(notifier.clone());

    Fixture {
        repo,
        audit,
        notifier,
        branch_status,
        transfers,
        doctor_id: doctor.id,
    }
}

async fn stored(f: &Fixture) -> DoctorAggregate {
    f.repo.load_aggregate(f.doctor_id).await.unwrap().unwrap()
}

fn find(
    aggregate: &DoctorAggregate,
    branch: Uuid,
    role: PracticeRole,
) -> Option<AssociationStatus> {
    aggregate.find(&AssociationKey::new(branch, role)).map(|a| a.status)
}

#[tokio::test]
async fn test_transfer_round_trip() {
    let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
    let f = setup(&[(source, PracticeRole::Consultant, AssociationStatus::Active)]).await;

    let result = f
        .transfers
        .transfer(TransferRequest::new(f.doctor_id, source, target))
        .await;

    assert!(result.is_success(), "{}", result.message);
    assert_eq!(result.status, TransferStatus::Success);
    assert_eq!(result.doctor_id, f.doctor_id);
    assert_eq!(result.source_branch_id, source);
    assert_eq!(result.target_branch_id, target);

    let aggregate = stored(&f).await;
    assert_eq!(find(&aggregate, target, PracticeRole::Consultant), Some(AssociationStatus::Active));
    assert_eq!(
        find(&aggregate, source, PracticeRole::Consultant),
        Some(AssociationStatus::Inactive),
        "source row is retired, not deleted"
    );
    assert_eq!(aggregate.doctor.global_status, GlobalStatus::Active);
    assert_eq!(aggregate.doctor.primary_branch_id, Some(target));
    assert!(aggregate.doctor.is_multi_branch);

    assert_eq!(result.current_assignments.len(), 2);
    let target_view = result
        .current_assignments
        .iter()
        .find(|v| v.branch_id == target)
        .unwrap();
    assert!(target_view.is_primary);
    assert_eq!(target_view.role, PracticeRole::Consultant);
}

#[tokio::test]
async fn test_transfer_copies_every_role() {
    let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
    let f = setup(&[
        (source, PracticeRole::Consultant, AssociationStatus::Active),
        (source, PracticeRole::OnCall, AssociationStatus::Inactive),
    ])
    .await;

    let result = f
        .transfers
        .transfer(TransferRequest::new(f.doctor_id, source, target))
        .await;
    assert!(result.is_success());

    let aggregate = stored(&f).await;
    for role in [PracticeRole::Consultant, PracticeRole::OnCall] {
        assert_eq!(find(&aggregate, target, role), Some(AssociationStatus::Active));
        assert_eq!(find(&aggregate, source, role), Some(AssociationStatus::Inactive));
    }
}

#[tokio::test]
async fn test_transfer_maintaining_existing_assignments() {
    let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
    let f = setup(&[(source, PracticeRole::Visiting, AssociationStatus::Active)]).await;

    let result = f
        .transfers
        .transfer(TransferRequest::new(f.doctor_id, source, target).maintaining_existing())
        .await;
    assert!(result.is_success());

    let aggregate = stored(&f).await;
    assert_eq!(find(&aggregate, source, PracticeRole::Visiting), Some(AssociationStatus::Active));
    assert_eq!(find(&aggregate, target, PracticeRole::Visiting), Some(AssociationStatus::Active));
    assert_eq!(aggregate.doctor.primary_branch_id, Some(source));
}

#[tokio::test]
async fn test_transfer_from_unknown_source_fails() {
    let (home, stranger, target) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let f = setup(&[(home, PracticeRole::Consultant, AssociationStatus::Active)]).await;
    let before = stored(&f).await;

    let result = f
        .transfers
        .transfer(TransferRequest::new(f.doctor_id, stranger, target))
        .await;

    assert_eq!(result.status, TransferStatus::Failed);
    assert!(result.message.contains("not found at source"), "{}", result.message);
    assert_eq!(result.current_assignments.len(), 1);
    assert_eq!(stored(&f).await, before);
}

#[tokio::test]
async fn test_transfer_to_occupied_target_fails_without_maintain() {
    let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
    let f = setup(&[
        (source, PracticeRole::Consultant, AssociationStatus::Active),
        (target, PracticeRole::Consultant, AssociationStatus::Inactive),
    ])
    .await;
    let before = stored(&f).await;

    let result = f
        .transfers
        .transfer(TransferRequest::new(f.doctor_id, source, target))
        .await;

    assert!(!result.is_success());
    assert!(result.message.contains("already exists at target"), "{}", result.message);
    assert_eq!(stored(&f).await, before);
}

#[tokio::test]
async fn test_transfer_with_maintain_reactivates_target_row() {
    let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
    let f = setup(&[
        (source, PracticeRole::Consultant, AssociationStatus::Active),
        (target, PracticeRole::Consultant, AssociationStatus::Inactive),
    ])
    .await;

    let result = f
        .transfers
        .transfer(TransferRequest::new(f.doctor_id, source, target).maintaining_existing())
        .await;
    assert!(result.is_success());

    let aggregate = stored(&f).await;
    assert_eq!(aggregate.associations.len(), 2, "no duplicate row created");
    assert_eq!(find(&aggregate, target, PracticeRole::Consultant), Some(AssociationStatus::Active));

    // Repeating the transfer changes nothing
    let commits = f.repo.commit_count();
    let again = f
        .transfers
        .transfer(TransferRequest::new(f.doctor_id, source, target).maintaining_existing())
        .await;
    assert!(again.is_success());
    assert_eq!(f.repo.commit_count(), commits);
}

#[tokio::test]
async fn test_transfer_to_same_branch_fails() {
    let branch = Uuid::new_v4();
    let f = setup(&[(branch, PracticeRole::Consultant, AssociationStatus::Active)]).await;

    let result = f
        .transfers
        .transfer(TransferRequest::new(f.doctor_id, branch, branch))
        .await;
    assert_eq!(result.status, TransferStatus::Failed);
}

#[tokio::test]
async fn test_failed_commit_leaves_no_partial_transfer() {
    let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
    let f = setup(&[(source, PracticeRole::Consultant, AssociationStatus::Active)]).await;
    let before = stored(&f).await;

    f.repo.fail_next_commit();
    let result = f
        .transfers
        .transfer(TransferRequest::new(f.doctor_id, source, target))
        .await;

    assert_eq!(result.status, TransferStatus::Failed);
    assert!(result.message.starts_with("Transfer failed"));
    assert_eq!(stored(&f).await, before, "neither copy nor retire was applied");
}

#[tokio::test]
async fn test_transfer_away_from_non_primary_keeps_primary() {
    let (home, source, target) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let f = setup(&[
        (home, PracticeRole::Consultant, AssociationStatus::Active),
        (source, PracticeRole::Visiting, AssociationStatus::Active),
    ])
    .await;

    let result = f
        .transfers
        .transfer(TransferRequest::new(f.doctor_id, source, target))
        .await;
    assert!(result.is_success());
    assert_eq!(stored(&f).await.doctor.primary_branch_id, Some(home));
}

#[tokio::test]
async fn test_transfer_of_inactive_doctor_reactivates() {
    let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
    let f = setup(&[(source, PracticeRole::Resident, AssociationStatus::Active)]).await;
    f.branch_status.deactivate_globally(f.doctor_id, None).await.unwrap();

    let result = f
        .transfers
        .transfer(TransferRequest::new(f.doctor_id, source, target))
        .await;
    assert!(result.is_success());
    assert_eq!(stored(&f).await.doctor.global_status, GlobalStatus::Active);
}

// ============================================================================
// Eligibility and emergency transfers
// ============================================================================

#[tokio::test]
async fn test_can_transfer() {
    let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
    let f = setup(&[(source, PracticeRole::Consultant, AssociationStatus::Inactive)]).await;

    assert!(f.transfers.can_transfer(f.doctor_id, target).await.unwrap());
    assert!(!f.transfers.can_transfer(f.doctor_id, source).await.unwrap());
    assert!(!f.transfers.can_transfer(Uuid::new_v4(), target).await.unwrap());

    let empty = setup(&[]).await;
    assert!(!empty.transfers.can_transfer(empty.doctor_id, target).await.unwrap());
}

#[tokio::test]
async fn test_emergency_transfer_notifies_and_audits() {
    let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
    let f = setup(&[(source, PracticeRole::Consultant, AssociationStatus::Active)]).await;

    let result = f
        .transfers
        .emergency_transfer(f.doctor_id, source, target, "Flooding at branch, reach ops@clinic.org")
        .await;
    assert!(result.is_success());

    let aggregate = stored(&f).await;
    assert_eq!(
        find(&aggregate, source, PracticeRole::Consultant),
        Some(AssociationStatus::Inactive)
    );

    let sent = f.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.transfer_id, result.transfer_id);
    let reason = sent[0].1.clone().unwrap();
    assert!(reason.starts_with("Flooding at branch"));
    assert!(!reason.contains("ops@clinic.org"));

    let entry = f.audit.entries().into_iter().last().unwrap();
    assert_eq!(entry.action, "transfer.completed");
    assert_eq!(entry.details["transferId"], result.transfer_id.to_string());
}

#[tokio::test]
async fn test_emergency_transfer_requires_reason() {
    let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
    let f = setup(&[(source, PracticeRole::Consultant, AssociationStatus::Active)]).await;
    let before = stored(&f).await;

    let result = f.transfers.emergency_transfer(f.doctor_id, source, target, "   ").await;

    assert_eq!(result.status, TransferStatus::Failed);
    assert_eq!(stored(&f).await, before);
    assert!(f.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_plain_transfer_does_not_notify() {
    let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
    let f = setup(&[(source, PracticeRole::Consultant, AssociationStatus::Active)]).await;

    f.transfers
        .transfer(TransferRequest::new(f.doctor_id, source, target).requested_by(Uuid::new_v4()))
        .await;
    assert!(f.notifier.sent().is_empty());

    let entry = f.audit.entries().into_iter().last().unwrap();
    assert!(entry.actor.is_some());
}
