use error_common::{codes, ApiError};
use thiserror::Error;
use uuid::Uuid;

use crate::models::PracticeRole;

#[derive(Error, Debug)]
pub enum BranchError {
    #[error(
        "Association not found: doctor {doctor_id} has no association with branch {branch_id}{}",
        .role.map(|r| format!(" as {}", r)).unwrap_or_default()
    )]
    AssociationNotFound {
        doctor_id: Uuid,
        branch_id: Uuid,
        role: Option<PracticeRole>,
    },

    #[error(
        "Duplicate association: doctor {doctor_id} already holds {role} at branch {branch_id}"
    )]
    DuplicateAssociation {
        doctor_id: Uuid,
        branch_id: Uuid,
        role: PracticeRole,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transfer ineligible: {0}")]
    TransferIneligible(String),

    #[error("Doctor not found: {0}")]
    DoctorNotFound(Uuid),

    #[error("Concurrent modification of doctor {0}")]
    ConcurrentModification(Uuid),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BranchError {
    pub fn association_not_found(doctor_id: Uuid, branch_id: Uuid) -> Self {
        BranchError::AssociationNotFound {
            doctor_id,
            branch_id,
            role: None,
        }
    }
}

impl ApiError for BranchError {
    fn code(&self) -> &'static str {
        match self {
            BranchError::AssociationNotFound { .. } => codes::provider::ASSOCIATION_NOT_FOUND,
            BranchError::DuplicateAssociation { .. } => codes::provider::DUPLICATE_ASSOCIATION,
            BranchError::Validation(_) => codes::validation::INVALID_INPUT,
            BranchError::TransferIneligible(_) => codes::provider::TRANSFER_INELIGIBLE,
            BranchError::DoctorNotFound(_) => codes::provider::DOCTOR_NOT_FOUND,
            BranchError::ConcurrentModification(_) => codes::provider::CONCURRENT_MODIFICATION,
            BranchError::Connection(_)
            | BranchError::Database(
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_),
            ) => codes::database::CONNECTION_FAILED,
            BranchError::Storage(_) | BranchError::Database(_) => codes::database::QUERY_FAILED,
            BranchError::Configuration(_) => codes::configuration::INVALID_CONFIGURATION,
        }
    }
}

pub type BranchResult<T> = Result<T, BranchError>;
