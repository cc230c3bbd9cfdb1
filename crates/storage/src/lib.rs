use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, SqliteConnection,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use shared::{
    domain::{StageId, WellId, WellKind, DEFAULT_STAGE_PROGRESS},
    order::StageOrder,
    protocol::{NewStage, NewWell, StageUpdate},
};

/// How long a writer waits for another writer's transaction before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredWell {
    pub well_id: WellId,
    pub kind: WellKind,
    pub team: String,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredStage {
    pub stage_id: StageId,
    pub well_id: WellId,
    pub stage_name: Option<String>,
    pub pipe: Option<String>,
    pub drill_time: Option<f64>,
    pub stage_change: Option<f64>,
    pub progress: String,
    pub position: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderOutcome {
    Applied,
    UnknownWell,
    /// Some submitted ids are not stages of the well (foreign or deleted).
    MembershipMismatch { updated: u64, submitted: usize },
    /// Every submitted id belongs to the well but some of its stages were left out.
    PartialOrder { stage_count: i64, submitted: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageInsertOutcome {
    Created(StageId),
    UnknownWell,
    PositionTaken(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellInsertOutcome {
    Created(WellId),
    PositionTaken(i64),
}

const STAGE_COLUMNS: &str = "id, well_id, stage_name, pipe, drill_time, stage_change, progress, position, updated_at";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_busy_timeout(database_url, DEFAULT_BUSY_TIMEOUT).await
    }

    pub async fn with_busy_timeout(database_url: &str, busy_timeout: Duration) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(busy_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Inserts a well and its initial stages in one transaction. A stage without an
    /// explicit position takes its 1-based index in `well.stages`.
    pub async fn create_well(&self, well: &NewWell) -> Result<WellInsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let rec = sqlx::query(
            "INSERT INTO wells (kind, team, name, start_date) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(well.kind.as_str())
        .bind(&well.team)
        .bind(&well.name)
        .bind(well.start_date)
        .fetch_one(&mut *tx)
        .await?;
        let well_id = WellId(rec.get::<i64, _>(0));

        for (stage, index) in well.stages.iter().zip(1_i64..) {
            let position = stage.position.unwrap_or(index);
            let inserted = insert_stage(&mut tx, well_id, stage, position).await?;
            if inserted.is_none() {
                tx.rollback().await?;
                return Ok(WellInsertOutcome::PositionTaken(position));
            }
        }

        tx.commit().await?;
        Ok(WellInsertOutcome::Created(well_id))
    }

    pub async fn well(&self, well_id: WellId) -> Result<Option<StoredWell>> {
        let row = sqlx::query(
            "SELECT id, kind, team, name, start_date, created_at FROM wells WHERE id = ?",
        )
        .bind(well_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| well_from_row(&r)).transpose()
    }

    /// Deletes a well; its stages go with it through the foreign key cascade.
    pub async fn delete_well(&self, well_id: WellId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM wells WHERE id = ?")
            .bind(well_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stages of a well in display order. `id` breaks ties so the listing is
    /// stable even if positions were ever written by hand.
    pub async fn list_stages(&self, well_id: WellId) -> Result<Vec<StoredStage>> {
        let rows = sqlx::query(&format!(
            "SELECT {STAGE_COLUMNS} FROM well_stages WHERE well_id = ? ORDER BY position ASC, id ASC"
        ))
        .bind(well_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(stage_from_row).collect()
    }

    pub async fn stage(&self, stage_id: StageId) -> Result<Option<StoredStage>> {
        let row = sqlx::query(&format!(
            "SELECT {STAGE_COLUMNS} FROM well_stages WHERE id = ?"
        ))
        .bind(stage_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| stage_from_row(&r)).transpose()
    }

    /// Which well a stage belongs to, if the stage still exists.
    pub async fn well_for_stage(&self, stage_id: StageId) -> Result<Option<WellId>> {
        let row = sqlx::query("SELECT well_id FROM well_stages WHERE id = ?")
            .bind(stage_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| WellId(r.get::<i64, _>(0))))
    }

    /// Adds a stage at its explicit position, or after the well's last stage.
    pub async fn create_stage(
        &self,
        well_id: WellId,
        stage: &NewStage,
    ) -> Result<StageInsertOutcome> {
        // Immediate so two appends cannot both read the same MAX(position).
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        if !well_exists(&mut tx, well_id).await? {
            tx.rollback().await?;
            return Ok(StageInsertOutcome::UnknownWell);
        }

        let position = match stage.position {
            Some(position) => position,
            None => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COALESCE(MAX(position), 0) + 1 FROM well_stages WHERE well_id = ?",
                )
                .bind(well_id.0)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let Some(stage_id) = insert_stage(&mut tx, well_id, stage, position).await? else {
            tx.rollback().await?;
            return Ok(StageInsertOutcome::PositionTaken(position));
        };

        tx.commit().await?;
        Ok(StageInsertOutcome::Created(stage_id))
    }

    /// Applies descriptive edits. Position is never touched here.
    pub async fn update_stage(&self, stage_id: StageId, update: &StageUpdate) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE well_stages
                SET stage_name   = COALESCE(?, stage_name),
                    pipe         = COALESCE(?, pipe),
                    drill_time   = COALESCE(?, drill_time),
                    stage_change = COALESCE(?, stage_change),
                    progress     = COALESCE(?, progress),
                    updated_at   = CURRENT_TIMESTAMP
              WHERE id = ?",
        )
        .bind(update.stage_name.as_deref())
        .bind(update.pipe.as_deref())
        .bind(update.drill_time)
        .bind(update.stage_change)
        .bind(update.progress.as_deref())
        .bind(stage_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Removes a stage. Survivors keep their positions; gaps are closed only by
    /// the next full reorder.
    pub async fn delete_stage(&self, stage_id: StageId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM well_stages WHERE id = ?")
            .bind(stage_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Rewrites the positions of a well's stages to `1..N` following `order`.
    ///
    /// The whole rewrite happens in one write transaction:
    /// 1. `BEGIN IMMEDIATE` takes the store's write lock before anything is read,
    ///    so concurrent reorders of the same well run one after the other and each
    ///    sees the previous one's committed result.
    /// 2. The well's positions are moved out of the live range, which defers the
    ///    per-well uniqueness check to the final state of the transaction.
    /// 3. A single `UPDATE .. FROM json_each(..)` joins every submitted id with its
    ///    array index and stores `index + 1`.
    ///
    /// Any outcome other than [`ReorderOutcome::Applied`] rolls back, leaving the
    /// stored order untouched. Infrastructure failures surface as `Err` and the
    /// dropped transaction is rolled back as well.
    pub async fn reorder_stages(
        &self,
        well_id: WellId,
        order: &StageOrder,
    ) -> Result<ReorderOutcome> {
        let submitted = order.len();
        let ranked_ids =
            serde_json::to_string(order).context("failed to encode stage order")?;

        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("failed to open reorder transaction")?;

        if !well_exists(&mut tx, well_id).await? {
            tx.rollback().await?;
            return Ok(ReorderOutcome::UnknownWell);
        }

        let stage_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM well_stages WHERE well_id = ?")
                .bind(well_id.0)
                .fetch_one(&mut *tx)
                .await?;

        defer_position_uniqueness(&mut tx, well_id).await?;

        let updated = sqlx::query(
            "UPDATE well_stages
                SET position = ranked.key + 1
               FROM json_each(?2) AS ranked
              WHERE well_stages.id = ranked.value
                AND well_stages.well_id = ?1",
        )
        .bind(well_id.0)
        .bind(ranked_ids)
        .execute(&mut *tx)
        .await
        .context("bulk position update failed")?
        .rows_affected();

        if updated != submitted as u64 {
            tx.rollback().await?;
            return Ok(ReorderOutcome::MembershipMismatch { updated, submitted });
        }
        if stage_count != submitted as i64 {
            tx.rollback().await?;
            return Ok(ReorderOutcome::PartialOrder {
                stage_count,
                submitted,
            });
        }

        tx.commit()
            .await
            .context("failed to commit stage reorder")?;
        Ok(ReorderOutcome::Applied)
    }
}

async fn well_exists(conn: &mut SqliteConnection, well_id: WellId) -> Result<bool> {
    let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM wells WHERE id = ?")
        .bind(well_id.0)
        .fetch_one(conn)
        .await?;
    Ok(found > 0)
}

/// SQLite checks UNIQUE per row, so a swap would trip the index halfway through
/// the bulk update. Negating every position keeps the well's rows distinct and
/// clear of the `1..N` range the bulk update writes.
async fn defer_position_uniqueness(conn: &mut SqliteConnection, well_id: WellId) -> Result<()> {
    sqlx::query("UPDATE well_stages SET position = -position WHERE well_id = ? AND position > 0")
        .bind(well_id.0)
        .execute(conn)
        .await
        .context("failed to release stage positions")?;
    Ok(())
}

/// Returns `None` when the position is already taken in the well.
async fn insert_stage(
    conn: &mut SqliteConnection,
    well_id: WellId,
    stage: &NewStage,
    position: i64,
) -> Result<Option<StageId>> {
    anyhow::ensure!(position >= 1, "stage position must be at least 1, got {position}");

    let result = sqlx::query(
        "INSERT INTO well_stages (well_id, stage_name, pipe, drill_time, stage_change, progress, position)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(well_id.0)
    .bind(stage.stage_name.as_deref())
    .bind(stage.pipe.as_deref())
    .bind(stage.drill_time)
    .bind(stage.stage_change)
    .bind(stage.progress.as_deref().unwrap_or(DEFAULT_STAGE_PROGRESS))
    .bind(position)
    .fetch_one(conn)
    .await;

    match result {
        Ok(rec) => Ok(Some(StageId(rec.get::<i64, _>(0)))),
        Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => Ok(None),
        Err(error) => Err(error.into()),
    }
}

fn well_from_row(row: &SqliteRow) -> Result<StoredWell> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = WellKind::parse(&kind_raw)
        .with_context(|| format!("unknown well kind '{kind_raw}' in database"))?;
    Ok(StoredWell {
        well_id: WellId(row.try_get("id")?),
        kind,
        team: row.try_get("team")?,
        name: row.try_get("name")?,
        start_date: row.try_get("start_date")?,
        created_at: row.try_get("created_at")?,
    })
}

fn stage_from_row(row: &SqliteRow) -> Result<StoredStage> {
    Ok(StoredStage {
        stage_id: StageId(row.try_get("id")?),
        well_id: WellId(row.try_get("well_id")?),
        stage_name: row.try_get("stage_name")?,
        pipe: row.try_get("pipe")?,
        drill_time: row.try_get("drill_time")?,
        stage_change: row.try_get("stage_change")?,
        progress: row.try_get("progress")?,
        position: row.try_get("position")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
