//! PostgreSQL [`WorkStore`].
//!
//! Every commit runs in one transaction that first locks all step rows of the
//! bundle with `SELECT ... FOR UPDATE` (always in step-number order, so two
//! commits on one bundle can never deadlock each other), compares versions,
//! then writes. Work assignments live in their own table whose primary key is
//! (bundle_id, step_number), so the database itself refuses a second live
//! assignment for a unit.
//!
//! Reads run in a `REPEATABLE READ, READ ONLY` transaction so a bundle is never
//! assembled from rows of two different commits.

use super::{Changeset, CommitOutcome, StoreError, StoreResult, WorkStore};
use crate::config::DatabaseConfig;
use crate::constants::status_groups::UNFINISHED_STATES;
use crate::logging::log_error;
use crate::models::{Bundle, BundleId, ClaimKey, ProcessStepDefinition, StepState, WorkAssignment};
use crate::state_machine::StepStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// PostgreSQL SQLSTATE codes the store reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PgErrorCode;

impl PgErrorCode {
    /// Unique violation (duplicate key) - Code 23505
    pub const UNIQUE_VIOLATION: &'static str = "23505";
    /// Serialization failure - Code 40001
    pub const SERIALIZATION_FAILURE: &'static str = "40001";
    /// Deadlock detected - Code 40P01
    pub const DEADLOCK_DETECTED: &'static str = "40P01";

    /// Conditions where retrying the whole transaction is expected to succeed
    pub fn is_retryable(code: &str) -> bool {
        code == Self::SERIALIZATION_FAILURE || code == Self::DEADLOCK_DETECTED
    }
}

#[derive(Debug, Clone)]
pub struct PgWorkStore {
    pool: PgPool,
}

impl PgWorkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool with the configured limits
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await
            .map_err(map_sqlx_error)?;

        info!(
            max_connections = config.max_connections,
            "Connected PostgreSQL work store"
        );
        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn read_tx(&self) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(tx)
    }

    async fn load_where(
        tx: &mut Transaction<'static, Postgres>,
        bundle_rows: Vec<BundleRow>,
    ) -> StoreResult<Vec<Bundle>> {
        if bundle_rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = bundle_rows.iter().map(|r| r.bundle_id.clone()).collect();

        let step_rows = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT bundle_id, step_number, operation, machine_type, price_per_piece,
                   estimated_minutes, skill_level, prerequisites, can_run_parallel,
                   status, completed_pieces, completed_by, version
            FROM garment_step_states
            WHERE bundle_id = ANY($1)
            ORDER BY bundle_id, step_number
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

        let assignment_rows = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT bundle_id, step_number, operator_id, operator_name, claimed_at
            FROM garment_work_assignments
            WHERE bundle_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

        assemble(bundle_rows, step_rows, assignment_rows)
    }
}

#[async_trait]
impl WorkStore for PgWorkStore {
    #[instrument(skip(self, bundles), fields(count = bundles.len()))]
    async fn insert_bundles(&self, bundles: &[Bundle]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for bundle in bundles {
            sqlx::query(
                r#"
                INSERT INTO garment_bundles
                    (bundle_id, lot_number, article_id, garment_type, color, size,
                     pieces, sequence, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(bundle.bundle_id.as_str())
            .bind(&bundle.lot_number)
            .bind(&bundle.article_id)
            .bind(&bundle.garment_type)
            .bind(&bundle.color)
            .bind(&bundle.size)
            .bind(to_i32(bundle.pieces)?)
            .bind(to_i64(bundle.sequence)?)
            .bind(bundle.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            for step in &bundle.steps {
                let def = &step.definition;
                let prerequisites = def
                    .prerequisites
                    .iter()
                    .map(|p| to_i32(*p))
                    .collect::<StoreResult<Vec<i32>>>()?;
                sqlx::query(
                    r#"
                    INSERT INTO garment_step_states
                        (bundle_id, step_number, operation, machine_type, price_per_piece,
                         estimated_minutes, skill_level, prerequisites, can_run_parallel,
                         status, completed_pieces, completed_by, version)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    "#,
                )
                .bind(bundle.bundle_id.as_str())
                .bind(to_i32(def.step_number)?)
                .bind(&def.operation)
                .bind(&def.machine_type)
                .bind(def.price_per_piece)
                .bind(def.estimated_minutes)
                .bind(&def.skill_level)
                .bind(&prerequisites)
                .bind(def.can_run_parallel)
                .bind(step.status.as_str())
                .bind(to_i32(step.completed_pieces)?)
                .bind(step.completed_by.as_deref())
                .bind(to_i64(step.version)?)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

                if let Some(assignment) = &step.assignment {
                    insert_assignment(&mut tx, assignment).await?;
                }
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(count = bundles.len(), "Inserted bundle batch");
        Ok(())
    }

    async fn load_bundle(&self, bundle_id: &BundleId) -> StoreResult<Option<Bundle>> {
        let mut tx = self.read_tx().await?;
        let rows = sqlx::query_as::<_, BundleRow>(&bundle_select("WHERE bundle_id = $1"))
            .bind(bundle_id.as_str())
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        let mut bundles = Self::load_where(&mut tx, rows).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(bundles.pop())
    }

    async fn bundles_for_lot(&self, lot_number: &str) -> StoreResult<Vec<Bundle>> {
        let mut tx = self.read_tx().await?;
        let rows = sqlx::query_as::<_, BundleRow>(&bundle_select("WHERE lot_number = $1"))
            .bind(lot_number)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        let bundles = Self::load_where(&mut tx, rows).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(bundles)
    }

    async fn active_bundles(&self) -> StoreResult<Vec<Bundle>> {
        let mut tx = self.read_tx().await?;
        let rows = sqlx::query_as::<_, BundleRow>(&bundle_select(
            r#"WHERE EXISTS (
                SELECT 1 FROM garment_step_states s
                WHERE s.bundle_id = garment_bundles.bundle_id AND s.status = ANY($1)
            )"#,
        ))
        .bind(unfinished_statuses())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let bundles = Self::load_where(&mut tx, rows).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(bundles)
    }

    #[instrument(skip(self, changeset), fields(bundle_id = %changeset.bundle_id, writes = changeset.writes.len()))]
    async fn commit(&self, changeset: Changeset) -> StoreResult<CommitOutcome> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let locked: Vec<(i32, i64)> = sqlx::query_as(
            r#"
            SELECT step_number, version
            FROM garment_step_states
            WHERE bundle_id = $1
            ORDER BY step_number
            FOR UPDATE
            "#,
        )
        .bind(changeset.bundle_id.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if locked.is_empty() {
            return Err(StoreError::NotFound(format!("bundle {}", changeset.bundle_id)));
        }
        let versions: HashMap<i32, i64> = locked.into_iter().collect();

        for (step_number, expected_version) in changeset.expectations() {
            let current = versions.get(&to_i32(step_number)?).copied().ok_or_else(|| {
                StoreError::NotFound(format!(
                    "step {step_number} of bundle {}",
                    changeset.bundle_id
                ))
            })?;
            if current != to_i64(expected_version)? {
                tx.rollback().await.map_err(map_sqlx_error)?;
                return Ok(CommitOutcome::VersionConflict { step_number });
            }
        }

        for write in &changeset.writes {
            let state = &write.state;
            let step_number = to_i32(state.step_number())?;
            sqlx::query(
                r#"
                UPDATE garment_step_states
                SET price_per_piece = $3,
                    status = $4,
                    completed_pieces = $5,
                    completed_by = $6,
                    version = version + 1
                WHERE bundle_id = $1 AND step_number = $2
                "#,
            )
            .bind(changeset.bundle_id.as_str())
            .bind(step_number)
            .bind(state.price_per_piece())
            .bind(state.status.as_str())
            .bind(to_i32(state.completed_pieces)?)
            .bind(state.completed_by.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            sqlx::query(
                "DELETE FROM garment_work_assignments WHERE bundle_id = $1 AND step_number = $2",
            )
            .bind(changeset.bundle_id.as_str())
            .bind(step_number)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            if let Some(assignment) = &state.assignment {
                insert_assignment(&mut tx, assignment).await?;
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(CommitOutcome::Committed)
    }
}

async fn insert_assignment(
    tx: &mut Transaction<'static, Postgres>,
    assignment: &WorkAssignment,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO garment_work_assignments
            (bundle_id, step_number, operator_id, operator_name, claimed_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(assignment.bundle_id.as_str())
    .bind(to_i32(assignment.step_number)?)
    .bind(&assignment.operator_id)
    .bind(&assignment.operator_name)
    .bind(assignment.claimed_at)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

fn bundle_select(filter: &str) -> String {
    format!(
        "SELECT bundle_id, lot_number, article_id, garment_type, color, size, pieces, \
         sequence, created_at FROM garment_bundles {filter} ORDER BY bundle_id"
    )
}

/// Classify a sqlx error as transient (retry the transaction) or permanent
pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Transient(err.to_string())
        }
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            if PgErrorCode::is_retryable(&code) {
                StoreError::Transient(err.to_string())
            } else if code == PgErrorCode::UNIQUE_VIOLATION {
                StoreError::Duplicate(db_err.message().to_string())
            } else {
                log_error("pg_work_store", "query", &err.to_string(), Some(&code));
                StoreError::Backend(err.to_string())
            }
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

fn unfinished_statuses() -> Vec<&'static str> {
    UNFINISHED_STATES.iter().map(StepStatus::as_str).collect()
}

fn to_i32(value: u32) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| StoreError::Backend(format!("Value {value} exceeds INTEGER")))
}

fn to_i64(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Backend(format!("Value {value} exceeds BIGINT")))
}

fn to_u32(value: i32, column: &str) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Backend(format!("Negative {column}: {value}")))
}

#[derive(Debug, FromRow)]
struct BundleRow {
    bundle_id: String,
    lot_number: String,
    article_id: String,
    garment_type: String,
    color: String,
    size: String,
    pieces: i32,
    sequence: i64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct StepRow {
    bundle_id: String,
    step_number: i32,
    operation: String,
    machine_type: String,
    price_per_piece: f64,
    estimated_minutes: f64,
    skill_level: String,
    prerequisites: Vec<i32>,
    can_run_parallel: bool,
    status: String,
    completed_pieces: i32,
    completed_by: Option<String>,
    version: i64,
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    bundle_id: String,
    step_number: i32,
    operator_id: String,
    operator_name: String,
    claimed_at: DateTime<Utc>,
}

fn assemble(
    bundle_rows: Vec<BundleRow>,
    step_rows: Vec<StepRow>,
    assignment_rows: Vec<AssignmentRow>,
) -> StoreResult<Vec<Bundle>> {
    let mut assignments: HashMap<(String, i32), WorkAssignment> = HashMap::new();
    for row in assignment_rows {
        let bundle_id = BundleId::new(row.bundle_id.clone());
        let step_number = to_u32(row.step_number, "step_number")?;
        assignments.insert(
            (row.bundle_id, row.step_number),
            WorkAssignment {
                claim_key: ClaimKey::new(bundle_id.clone(), step_number, row.operator_id.clone()),
                bundle_id,
                step_number,
                operator_id: row.operator_id,
                operator_name: row.operator_name,
                claimed_at: row.claimed_at,
            },
        );
    }

    let mut steps: HashMap<String, Vec<StepState>> = HashMap::new();
    for row in step_rows {
        let status: StepStatus = row
            .status
            .parse()
            .map_err(StoreError::Backend)?;
        let prerequisites = row
            .prerequisites
            .iter()
            .map(|p| to_u32(*p, "prerequisite"))
            .collect::<StoreResult<BTreeSet<u32>>>()?;
        let assignment = assignments.remove(&(row.bundle_id.clone(), row.step_number));
        let version = u64::try_from(row.version)
            .map_err(|_| StoreError::Backend(format!("Negative version: {}", row.version)))?;

        steps.entry(row.bundle_id).or_default().push(StepState {
            definition: ProcessStepDefinition {
                step_number: to_u32(row.step_number, "step_number")?,
                operation: row.operation,
                machine_type: row.machine_type,
                price_per_piece: row.price_per_piece,
                estimated_minutes: row.estimated_minutes,
                skill_level: row.skill_level,
                prerequisites,
                can_run_parallel: row.can_run_parallel,
            },
            status,
            assignment,
            completed_pieces: to_u32(row.completed_pieces, "completed_pieces")?,
            completed_by: row.completed_by,
            version,
        });
    }

    bundle_rows
        .into_iter()
        .map(|row| {
            let sequence = u64::try_from(row.sequence)
                .map_err(|_| StoreError::Backend(format!("Negative sequence: {}", row.sequence)))?;
            let mut bundle_steps = steps.remove(&row.bundle_id).unwrap_or_default();
            bundle_steps.sort_by_key(|s| s.step_number());
            Ok(Bundle {
                bundle_id: BundleId::new(row.bundle_id),
                lot_number: row.lot_number,
                article_id: row.article_id,
                garment_type: row.garment_type,
                color: row.color,
                size: row.size,
                pieces: to_u32(row.pieces, "pieces")?,
                sequence,
                created_at: row.created_at,
                steps: bundle_steps,
            })
        })
        .collect()
}
