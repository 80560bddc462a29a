//! Operator tool for doctor branch status and transfers
//!
//! Usage:
//!   branch-ops --config branches.yaml status <DOCTOR_ID>
//!   branch-ops deactivate <DOCTOR_ID> <BRANCH_ID>... --reason "..."
//!   branch-ops emergency-transfer <DOCTOR_ID> <SOURCE> <TARGET> --reason "..."
//!
//! Without a configured database URL the tool runs against an empty
//! in-memory store, which is only useful for trying commands out.

use anyhow::Context;
use clap::{Parser, Subcommand};
use logger_redacted::init_tracing;
use provider_branches::{
    AssociationStatus, BranchServiceConfig, BranchStatusService, PracticeRole, TransferRequest,
    TransferService,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "branch-ops")]
#[command(about = "Inspect and change doctor branch associations")]
struct Args {
    /// Configuration file (YAML or TOML)
    #[arg(long, short, env = "PROVIDER_BRANCHES_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show global status and per-branch activity
    Status { doctor_id: Uuid },

    /// Deactivate the doctor at one or more branches
    Deactivate {
        doctor_id: Uuid,
        #[arg(required = true)]
        branch_ids: Vec<Uuid>,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Deactivate the doctor everywhere
    DeactivateAll {
        doctor_id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Activate the doctor at one or more branches
    Activate {
        doctor_id: Uuid,
        #[arg(required = true)]
        branch_ids: Vec<Uuid>,
    },

    /// Associate the doctor with a branch in a role
    Add {
        doctor_id: Uuid,
        branch_id: Uuid,
        role: PracticeRole,
        #[arg(long, default_value = "ACTIVE")]
        status: AssociationStatus,
    },

    /// Retire one (branch, role) association
    Remove {
        doctor_id: Uuid,
        branch_id: Uuid,
        role: PracticeRole,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Move role associations from one branch to another
    Transfer {
        doctor_id: Uuid,
        source_branch_id: Uuid,
        target_branch_id: Uuid,
        /// Keep the source associations active
        #[arg(long)]
        maintain: bool,
        #[arg(long)]
        notify: bool,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        requested_by: Option<Uuid>,
    },

    /// Transfer that retires the source and always notifies
    EmergencyTransfer {
        doctor_id: Uuid,
        source_branch_id: Uuid,
        target_branch_id: Uuid,
        #[arg(long)]
        reason: String,
    },

    /// Check whether the doctor could be moved to a branch
    CanTransfer { doctor_id: Uuid, target_branch_id: Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config =
        BranchServiceConfig::load(args.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.logging)?;

    let branch_status = Arc::new(
        BranchStatusService::from_config(&config)
            .await
            .context("initializing branch status service")?,
    );
    let transfers = TransferService::new(Arc::clone(&branch_status));

    info!(command = ?args.command, "Running branch operation");

    match args.command {
        Command::Status { doctor_id } => print(&branch_status.get_doctor_status(doctor_id).await?),
        Command::Deactivate {
            doctor_id,
            branch_ids,
            reason,
        } => print(
            &branch_status
                .deactivate_branches(doctor_id, &branch_ids, reason.as_deref())
                .await?,
        ),
        Command::DeactivateAll { doctor_id, reason } => {
            print(&branch_status.deactivate_globally(doctor_id, reason.as_deref()).await?)
        }
        Command::Activate { doctor_id, branch_ids } => {
            let result = match branch_ids.as_slice() {
                [branch_id] => branch_status.activate_branch(doctor_id, *branch_id).await?,
                _ => branch_status.activate_branches(doctor_id, &branch_ids).await?,
            };
            print(&result)
        }
        Command::Add {
            doctor_id,
            branch_id,
            role,
            status,
        } => print(&branch_status.add_association(doctor_id, branch_id, role, status).await?),
        Command::Remove {
            doctor_id,
            branch_id,
            role,
            reason,
        } => {
            branch_status
                .remove_association(doctor_id, branch_id, role, reason.as_deref())
                .await?;
            print(&branch_status.list_associations(doctor_id).await?)
        }
        Command::Transfer {
            doctor_id,
            source_branch_id,
            target_branch_id,
            maintain,
            notify,
            reason,
            requested_by,
        } => {
            let request = TransferRequest {
                doctor_id,
                source_branch_id,
                target_branch_id,
                maintain_existing_assignments: maintain,
                notify,
                reason,
                requested_by,
            };
            print(&transfers.transfer(request).await)
        }
        Command::EmergencyTransfer {
            doctor_id,
            source_branch_id,
            target_branch_id,
            reason,
        } => print(
            &transfers
                .emergency_transfer(doctor_id, source_branch_id, target_branch_id, &reason)
                .await,
        ),
        Command::CanTransfer {
            doctor_id,
            target_branch_id,
        } => print(&serde_json::json!({
            "doctorId": doctor_id,
            "targetBranchId": target_branch_id,
            "canTransfer": transfers.can_transfer(doctor_id, target_branch_id).await?,
        })),
    }
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
