//! Multi-branch status reconciliation and branch transfer for provider profiles
//!
//! A doctor can practice at several branches, holding one association per
//! (branch, role) with its own activation status. The doctor record carries a
//! single global status that must agree with those associations:
//!
//! - the doctor is globally ACTIVE while at least one association is ACTIVE
//! - deactivating the last active branch makes the doctor INACTIVE
//! - global deactivation forces every association INACTIVE
//! - activating any branch reactivates the doctor
//!
//! # Components
//!
//! - **Reconciliation**: pure decision logic in [`reconciliation`]
//! - **Store**: [`ProviderRepository`] with in-memory and PostgreSQL backends
//! - **BranchStatusService**: per-doctor units of work over the store
//! - **TransferService**: moves role associations between branches
//!
//! # Example
//!
//! ```rust,no_run
//! use provider_branches::{
//!     AssociationStatus, BranchStatusService, Doctor, InMemoryProviderRepository,
//!     PracticeRole, ProviderRepository,
//! };
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repository = Arc::new(InMemoryProviderRepository::new());
//!     let doctor = repository.insert_doctor(Doctor::new(Uuid::new_v4())).await?;
//!     let service = BranchStatusService::new(repository);
//!
//!     let branch = Uuid::new_v4();
//!     service
//!         .add_association(
//!             doctor.id,
//!             branch,
//!             PracticeRole::Consultant,
//!             AssociationStatus::Active,
//!         )
//!         .await?;
//!
//!     let result = service
//!         .deactivate_branches(doctor.id, &[branch], Some("sabbatical"))
//!         .await?;
//!     assert_eq!(result.remaining_active_branches, 0);
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod branch_status;
pub mod config;
pub mod error;
pub mod locks;
pub mod models;
pub mod notify;
pub mod reconciliation;
pub mod repository;
pub mod transfer;

pub use audit::{AuditEntry, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use branch_status::{BranchStatusService, Outcome, UnitOfWork};
pub use config::BranchServiceConfig;
pub use error::*;
pub use locks::{DoctorLockGuard, DoctorLocks};
pub use models::*;
pub use notify::{NoopNotifier, RecordingNotifier, TransferNotifier};
pub use reconciliation::{
    decide_global_status, derive_global_status, reconcile, ChangeContext, Reconciliation,
    StatusChange,
};
pub use repository::{
    AggregateChanges, InMemoryProviderRepository, PostgresProviderRepository, ProviderRepository,
};
pub use transfer::{plan_transfer, TransferService};
