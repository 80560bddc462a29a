//! PostgreSQL-backed provider repository
//!
//! Commits run in a single transaction that locks the doctor row with
//! `SELECT ... FOR UPDATE`, so two writers for the same doctor serialize on
//! the database even when they run in different processes. Writers for
//! different doctors never touch the same lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BranchError, BranchResult};
use crate::models::{BranchAssociation, Doctor, DoctorAggregate};
use crate::repository::{AggregateChanges, ProviderRepository};

const SCHEMA: &str = include_str!("../../migrations/0001_doctor_branches.sql");

#[derive(Debug, FromRow)]
struct DoctorRow {
    id: Uuid,
    global_status: String,
    is_multi_branch: bool,
    primary_branch_id: Option<Uuid>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DoctorRow> for Doctor {
    type Error = BranchError;

    fn try_from(row: DoctorRow) -> Result<Self, Self::Error> {
        Ok(Doctor {
            id: row.id,
            global_status: row.global_status.parse()?,
            is_multi_branch: row.is_multi_branch,
            primary_branch_id: row.primary_branch_id,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AssociationRow {
    doctor_id: Uuid,
    branch_id: Uuid,
    role: String,
    status: String,
    status_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AssociationRow> for BranchAssociation {
    type Error = BranchError;

    fn try_from(row: AssociationRow) -> Result<Self, Self::Error> {
        Ok(BranchAssociation {
            doctor_id: row.doctor_id,
            branch_id: row.branch_id,
            role: row.role.parse()?,
            status: row.status.parse()?,
            status_reason: row.status_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL-backed provider repository
#[derive(Debug, Clone)]
pub struct PostgresProviderRepository {
    pool: PgPool,
}

impl PostgresProviderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create with connection string
    pub async fn connect(database_url: &str, max_connections: u32) -> BranchResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| BranchError::Connection(format!("Failed to connect: {}", e)))?;

        info!("Provider database connection pool created");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn ensure_schema(&self) -> BranchResult<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Provider branch schema ensured");
        Ok(())
    }

    async fn fetch_associations<'e, E>(
        executor: E,
        doctor_id: Uuid,
    ) -> BranchResult<Vec<BranchAssociation>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let rows = sqlx::query_as::<_, AssociationRow>(
            r#"
            SELECT doctor_id, branch_id, role, status, status_reason, created_at, updated_at
            FROM doctor_branch_associations
            WHERE doctor_id = $1
            ORDER BY branch_id, role
            "#,
        )
        .bind(doctor_id)
        .fetch_all(executor)
        .await?;

        rows.into_iter().map(BranchAssociation::try_from).collect()
    }
}

#[async_trait]
impl ProviderRepository for PostgresProviderRepository {
    async fn insert_doctor(&self, doctor: Doctor) -> BranchResult<Doctor> {
        let row = sqlx::query_as::<_, DoctorRow>(
            r#"
            INSERT INTO doctors (
                id, global_status, is_multi_branch, primary_branch_id, version,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            RETURNING id, global_status, is_multi_branch, primary_branch_id, version,
                      created_at, updated_at
            "#,
        )
        .bind(doctor.id)
        .bind(doctor.global_status.as_str())
        .bind(doctor.is_multi_branch)
        .bind(doctor.primary_branch_id)
        .bind(doctor.version)
        .bind(doctor.created_at)
        .bind(doctor.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Doctor::try_from(row),
            None => Err(BranchError::Storage(format!("doctor {} already exists", doctor.id))),
        }
    }

    async fn load_aggregate(&self, doctor_id: Uuid) -> BranchResult<Option<DoctorAggregate>> {
        // Repeatable read keeps the doctor row and its associations in one snapshot
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let doctor = sqlx::query_as::<_, DoctorRow>(
            r#"
            SELECT id, global_status, is_multi_branch, primary_branch_id, version,
                   created_at, updated_at
            FROM doctors
            WHERE id = $1
            "#,
        )
        .bind(doctor_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(doctor) = doctor else {
            tx.commit().await?;
            return Ok(None);
        };

        let associations = Self::fetch_associations(&mut *tx, doctor_id).await?;
        tx.commit().await?;

        Ok(Some(DoctorAggregate {
            doctor: Doctor::try_from(doctor)?,
            associations,
        }))
    }

    async fn list_associations(&self, doctor_id: Uuid) -> BranchResult<Vec<BranchAssociation>> {
        Self::fetch_associations(&self.pool, doctor_id).await
    }

    async fn commit(&self, changes: AggregateChanges) -> BranchResult<Doctor> {
        debug!(
            doctor_id = %changes.doctor_id,
            inserts = changes.inserts.len(),
            updates = changes.updates.len(),
            "Committing doctor aggregate"
        );

        // Dropping the transaction on any early return rolls it back
        let mut tx = self.pool.begin().await?;

        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM doctors WHERE id = $1 FOR UPDATE")
                .bind(changes.doctor_id)
                .fetch_optional(&mut *tx)
                .await?;

        match version {
            None => return Err(BranchError::DoctorNotFound(changes.doctor_id)),
            Some(v) if v != changes.expected_version => {
                warn!(
                    doctor_id = %changes.doctor_id,
                    expected = changes.expected_version,
                    found = v,
                    "Stale doctor version"
                );
                return Err(BranchError::ConcurrentModification(changes.doctor_id));
            }
            Some(_) => {}
        }

        for row in &changes.inserts {
            let inserted = sqlx::query(
                r#"
                INSERT INTO doctor_branch_associations (
                    doctor_id, branch_id, role, status, status_reason, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (doctor_id, branch_id, role) DO NOTHING
                "#,
            )
            .bind(row.doctor_id)
            .bind(row.branch_id)
            .bind(row.role.as_str())
            .bind(row.status.as_str())
            .bind(&row.status_reason)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                return Err(BranchError::DuplicateAssociation {
                    doctor_id: row.doctor_id,
                    branch_id: row.branch_id,
                    role: row.role,
                });
            }
        }

        for row in &changes.updates {
            let updated = sqlx::query(
                r#"
                UPDATE doctor_branch_associations
                SET status = $4, status_reason = $5, updated_at = $6
                WHERE doctor_id = $1 AND branch_id = $2 AND role = $3
                "#,
            )
            .bind(row.doctor_id)
            .bind(row.branch_id)
            .bind(row.role.as_str())
            .bind(row.status.as_str())
            .bind(&row.status_reason)
            .bind(row.updated_at)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                return Err(BranchError::AssociationNotFound {
                    doctor_id: row.doctor_id,
                    branch_id: row.branch_id,
                    role: Some(row.role),
                });
            }
        }

        let doctor = sqlx::query_as::<_, DoctorRow>(
            r#"
            UPDATE doctors
            SET global_status = $2,
                is_multi_branch = $3,
                primary_branch_id = $4,
                updated_at = $5,
                version = version + 1
            WHERE id = $1
            RETURNING id, global_status, is_multi_branch, primary_branch_id, version,
                      created_at, updated_at
            "#,
        )
        .bind(changes.doctor_id)
        .bind(changes.global_status.as_str())
        .bind(changes.is_multi_branch)
        .bind(changes.primary_branch_id)
        .bind(changes.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Doctor::try_from(doctor)
    }
}
