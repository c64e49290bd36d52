#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `SQLite` persistence for zones and claim records.
//!
//! Implements [`ZoneStore`] on top of `switchy_database`. A claim commit
//! runs in one transaction: a conditional upsert that only fills a null
//! `claimed_at`, then a conditional participant increment that only
//! applies below capacity. Either statement touching zero rows, or any
//! statement failing, rolls the whole transaction back.

mod rows;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geodrop_ledger::{CommitOutcome, CommitRequest, RecordedEntry, StoreError, ZoneStore};
use geodrop_ledger_models::{ClaimRecord, Identity, SettlementRecord};
use geodrop_zone_models::{Zone, ZoneId, ZoneValidationError};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};
use switchy_database_connection::init_sqlite_rusqlite;

use crate::rows::{claim_from_row, timestamp, zone_from_row};

/// Errors that can occur during geodrop database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A database query or command failed.
    #[error("Database error: {0}")]
    Database(String),

    /// An I/O operation failed (e.g., creating the database file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON column could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored row could not be mapped back to a model.
    #[error("Malformed row: {0}")]
    Row(String),
}

impl From<switchy_database::DatabaseError> for DbError {
    fn from(value: switchy_database::DatabaseError) -> Self {
        Self::Database(value.to_string())
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Backend(value.to_string())
    }
}

/// Opens (or creates) the geodrop `SQLite` database at the given path and
/// ensures all tables exist.
///
/// # Errors
///
/// Returns [`DbError`] if the database file cannot be created or the schema
/// DDL fails.
pub async fn open_db(path: &Path) -> Result<Box<dyn Database>, DbError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db = init_sqlite_rusqlite(Some(path)).map_err(|e| DbError::Database(e.to_string()))?;

    ensure_schema(db.as_ref()).await?;

    log::debug!("Opened geodrop database at {}", path.display());
    Ok(db)
}

/// Creates all tables if they don't already exist.
async fn ensure_schema(db: &dyn Database) -> Result<(), DbError> {
    db.exec_raw(
        "CREATE TABLE IF NOT EXISTS zones (
            id                    TEXT PRIMARY KEY,
            latitude              REAL NOT NULL,
            longitude             REAL NOT NULL,
            radius_meters         REAL NOT NULL,
            reward_amount         TEXT NOT NULL,
            reward_currency       TEXT NOT NULL,
            starts_at             TEXT NOT NULL,
            ends_at               TEXT NOT NULL,
            max_participants      INTEGER NOT NULL DEFAULT 0,
            current_participants  INTEGER NOT NULL DEFAULT 0,
            manually_disabled     INTEGER NOT NULL DEFAULT 0,
            metadata              TEXT NOT NULL DEFAULT '{}'
        )",
    )
    .await?;

    db.exec_raw(
        "CREATE TABLE IF NOT EXISTS claim_records (
            identity    TEXT NOT NULL,
            zone_id     TEXT NOT NULL,
            entered_at  TEXT,
            claimed_at  TEXT,
            settlement  TEXT,
            PRIMARY KEY (identity, zone_id)
        )",
    )
    .await?;

    db.exec_raw(
        "CREATE INDEX IF NOT EXISTS idx_claim_records_zone
         ON claim_records (zone_id)",
    )
    .await?;

    Ok(())
}

const ZONE_COLUMNS: &str = "id, latitude, longitude, radius_meters, reward_amount, \
    reward_currency, starts_at, ends_at, max_participants, current_participants, \
    manually_disabled, metadata";

const CLAIM_COLUMNS: &str = "identity, zone_id, entered_at, claimed_at, settlement";

fn zone_params(zone: &Zone) -> Result<Vec<DatabaseValue>, DbError> {
    Ok(vec![
        DatabaseValue::String(zone.id.to_string()),
        DatabaseValue::Real64(zone.center.latitude()),
        DatabaseValue::Real64(zone.center.longitude()),
        DatabaseValue::Real64(zone.radius_meters),
        DatabaseValue::String(zone.reward.amount.to_string()),
        DatabaseValue::String(zone.reward.currency.clone()),
        DatabaseValue::String(timestamp(zone.active_window.starts_at)),
        DatabaseValue::String(timestamp(zone.active_window.ends_at)),
        DatabaseValue::Int64(i64::from(zone.max_participants)),
        DatabaseValue::Int64(i64::from(zone.current_participants)),
        DatabaseValue::Int64(i64::from(zone.manually_disabled)),
        DatabaseValue::String(serde_json::to_string(&zone.metadata)?),
    ])
}

async fn commit_steps(
    txn: &dyn Database,
    request: &CommitRequest,
) -> Result<CommitOutcome, DbError> {
    let identity = DatabaseValue::String(request.identity.to_string());
    let zone_id = DatabaseValue::String(request.zone_id.to_string());

    let exists = txn
        .query_raw_params("SELECT 1 AS found FROM zones WHERE id = $1", &[zone_id.clone()])
        .await?;
    if exists.is_empty() {
        return Err(DbError::Row(format!("zone {} vanished", request.zone_id)));
    }

    let claimed = txn
        .exec_raw_params(
            "INSERT INTO claim_records (identity, zone_id, claimed_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (identity, zone_id) DO UPDATE SET
               claimed_at = excluded.claimed_at
             WHERE claim_records.claimed_at IS NULL",
            &[
                identity,
                zone_id.clone(),
                DatabaseValue::String(timestamp(request.claimed_at)),
            ],
        )
        .await?;
    if claimed == 0 {
        return Ok(CommitOutcome::AlreadyClaimed);
    }

    let incremented = txn
        .exec_raw_params(
            "UPDATE zones SET current_participants = current_participants + 1
             WHERE id = $1
               AND (max_participants = 0 OR current_participants < max_participants)",
            &[zone_id.clone()],
        )
        .await?;
    if incremented == 0 {
        return Ok(CommitOutcome::CapacityExceeded);
    }

    let rows = txn
        .query_raw_params(
            "SELECT current_participants FROM zones WHERE id = $1",
            &[zone_id],
        )
        .await?;
    let participants: i64 = rows
        .first()
        .map_or(Ok(0), |r| r.to_value("current_participants"))
        .map_err(|e| DbError::Row(format!("current_participants: {e}")))?;

    Ok(CommitOutcome::Committed {
        participants_after: u32::try_from(participants).unwrap_or(u32::MAX),
    })
}

/// A [`ZoneStore`] backed by a `switchy_database` connection.
pub struct SqliteZoneStore {
    db: Box<dyn Database>,
}

impl std::fmt::Debug for SqliteZoneStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteZoneStore").finish_non_exhaustive()
    }
}

impl SqliteZoneStore {
    /// Opens the database at `path` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the database cannot be opened.
    pub async fn open(path: &Path) -> Result<Self, DbError> {
        Ok(Self::new(open_db(path).await?))
    }

    /// Wraps an already-initialized connection.
    #[must_use]
    pub fn new(db: Box<dyn Database>) -> Self {
        Self { db }
    }

    /// Runs the claim commit in one transaction. Only a
    /// [`CommitOutcome::Committed`] result is committed; every other
    /// outcome and every error rolls back.
    async fn commit_in_transaction(
        &self,
        request: &CommitRequest,
    ) -> Result<CommitOutcome, DbError> {
        let txn = self.db.begin_transaction().await?;

        match commit_steps(txn.as_ref(), request).await {
            Ok(outcome @ CommitOutcome::Committed { .. }) => {
                txn.commit().await?;
                Ok(outcome)
            }
            Ok(outcome) => {
                txn.rollback().await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    log::error!(
                        "Rollback of claim by {} on {} failed: {rollback}",
                        request.identity,
                        request.zone_id
                    );
                }
                Err(e)
            }
        }
    }

    async fn zone_exists(&self, zone_id: &ZoneId) -> Result<bool, DbError> {
        let rows = self
            .db
            .query_raw_params(
                "SELECT 1 AS found FROM zones WHERE id = $1",
                &[DatabaseValue::String(zone_id.to_string())],
            )
            .await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl ZoneStore for SqliteZoneStore {
    async fn load_zone(&self, zone_id: &ZoneId) -> Result<Option<Zone>, StoreError> {
        let rows = self
            .db
            .query_raw_params(
                &format!("SELECT {ZONE_COLUMNS} FROM zones WHERE id = $1"),
                &[DatabaseValue::String(zone_id.to_string())],
            )
            .await
            .map_err(DbError::from)?;

        Ok(rows.first().map(zone_from_row).transpose()?)
    }

    async fn list_zones(&self) -> Result<Vec<Zone>, StoreError> {
        let rows = self
            .db
            .query_raw_params(&format!("SELECT {ZONE_COLUMNS} FROM zones ORDER BY rowid"), &[])
            .await
            .map_err(DbError::from)?;

        Ok(rows.iter().map(zone_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn load_claim(
        &self,
        identity: &Identity,
        zone_id: &ZoneId,
    ) -> Result<Option<ClaimRecord>, StoreError> {
        let rows = self
            .db
            .query_raw_params(
                &format!(
                    "SELECT {CLAIM_COLUMNS} FROM claim_records WHERE identity = $1 AND zone_id = $2"
                ),
                &[
                    DatabaseValue::String(identity.to_string()),
                    DatabaseValue::String(zone_id.to_string()),
                ],
            )
            .await
            .map_err(DbError::from)?;

        Ok(rows.first().map(claim_from_row).transpose()?)
    }

    async fn claims_for_identity(
        &self,
        identity: &Identity,
    ) -> Result<Vec<ClaimRecord>, StoreError> {
        let rows = self
            .db
            .query_raw_params(
                "SELECT c.identity, c.zone_id, c.entered_at, c.claimed_at, c.settlement
                 FROM claim_records c
                 JOIN zones z ON z.id = c.zone_id
                 WHERE c.identity = $1
                 ORDER BY z.rowid",
                &[DatabaseValue::String(identity.to_string())],
            )
            .await
            .map_err(DbError::from)?;

        Ok(rows.iter().map(claim_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn claims_for_zone(&self, zone_id: &ZoneId) -> Result<Vec<ClaimRecord>, StoreError> {
        if !self.zone_exists(zone_id).await? {
            return Err(StoreError::NotFound {
                zone_id: zone_id.clone(),
            });
        }

        let rows = self
            .db
            .query_raw_params(
                &format!(
                    "SELECT {CLAIM_COLUMNS} FROM claim_records WHERE zone_id = $1 ORDER BY rowid"
                ),
                &[DatabaseValue::String(zone_id.to_string())],
            )
            .await
            .map_err(DbError::from)?;

        Ok(rows.iter().map(claim_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn record_entry(
        &self,
        identity: &Identity,
        zone_id: &ZoneId,
        entered_at: DateTime<Utc>,
    ) -> Result<RecordedEntry, StoreError> {
        if !self.zone_exists(zone_id).await? {
            return Err(StoreError::NotFound {
                zone_id: zone_id.clone(),
            });
        }

        let written = self
            .db
            .exec_raw_params(
                "INSERT INTO claim_records (identity, zone_id, entered_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (identity, zone_id) DO UPDATE SET
                   entered_at = excluded.entered_at
                 WHERE claim_records.entered_at IS NULL",
                &[
                    DatabaseValue::String(identity.to_string()),
                    DatabaseValue::String(zone_id.to_string()),
                    DatabaseValue::String(timestamp(entered_at)),
                ],
            )
            .await
            .map_err(DbError::from)?;

        if written > 0 {
            return Ok(RecordedEntry {
                entered_at,
                newly_recorded: true,
            });
        }

        let existing = self
            .load_claim(identity, zone_id)
            .await?
            .and_then(|record| record.entered_at)
            .ok_or_else(|| {
                StoreError::Backend(format!("Entry for {identity} on {zone_id} disappeared"))
            })?;

        Ok(RecordedEntry {
            entered_at: existing,
            newly_recorded: false,
        })
    }

    async fn commit_claim(&self, request: &CommitRequest) -> Result<CommitOutcome, StoreError> {
        self.commit_in_transaction(request).await.map_err(|e| {
            log::warn!(
                "Claim commit for {} on {} failed: {e}",
                request.identity,
                request.zone_id
            );
            StoreError::Conflict(e.to_string())
        })
    }

    async fn record_settlement(
        &self,
        identity: &Identity,
        zone_id: &ZoneId,
        settlement: SettlementRecord,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(&settlement).map_err(DbError::from)?;
        let updated = self
            .db
            .exec_raw_params(
                "UPDATE claim_records SET settlement = $3
                 WHERE identity = $1 AND zone_id = $2 AND claimed_at IS NOT NULL",
                &[
                    DatabaseValue::String(identity.to_string()),
                    DatabaseValue::String(zone_id.to_string()),
                    DatabaseValue::String(json),
                ],
            )
            .await
            .map_err(DbError::from)?;

        if updated == 0 {
            return Err(StoreError::Backend(format!(
                "No claim by {identity} on {zone_id}"
            )));
        }
        Ok(())
    }

    async fn upsert_zone(&self, zone: Zone) -> Result<(), StoreError> {
        zone.validate()?;
        let written = self
            .db
            .exec_raw_params(
                &format!(
                    "INSERT INTO zones ({ZONE_COLUMNS})
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                     ON CONFLICT (id) DO UPDATE SET
                       latitude = excluded.latitude,
                       longitude = excluded.longitude,
                       radius_meters = excluded.radius_meters,
                       reward_amount = excluded.reward_amount,
                       reward_currency = excluded.reward_currency,
                       starts_at = excluded.starts_at,
                       ends_at = excluded.ends_at,
                       max_participants = excluded.max_participants,
                       manually_disabled = excluded.manually_disabled,
                       metadata = excluded.metadata
                     WHERE excluded.max_participants = 0
                        OR zones.current_participants <= excluded.max_participants"
                ),
                &zone_params(&zone)?,
            )
            .await
            .map_err(DbError::from)?;

        if written == 0 {
            let current = self
                .load_zone(&zone.id)
                .await?
                .map_or(zone.current_participants, |stored| stored.current_participants);
            return Err(ZoneValidationError::ParticipantsOverCapacity {
                id: zone.id,
                current,
                max: zone.max_participants,
            }
            .into());
        }
        Ok(())
    }

    async fn delete_zone(&self, zone_id: &ZoneId) -> Result<bool, StoreError> {
        let id = DatabaseValue::String(zone_id.to_string());
        let txn = self.db.begin_transaction().await.map_err(DbError::from)?;
        txn.exec_raw_params("DELETE FROM claim_records WHERE zone_id = $1", &[id.clone()])
            .await
            .map_err(DbError::from)?;
        let deleted = txn
            .exec_raw_params("DELETE FROM zones WHERE id = $1", &[id])
            .await
            .map_err(DbError::from)?;
        txn.commit().await.map_err(DbError::from)?;
        Ok(deleted > 0)
    }

    async fn reset_participants(&self, zone_id: &ZoneId) -> Result<(), StoreError> {
        let updated = self
            .db
            .exec_raw_params(
                "UPDATE zones SET current_participants = 0 WHERE id = $1",
                &[DatabaseValue::String(zone_id.to_string())],
            )
            .await
            .map_err(DbError::from)?;

        if updated == 0 {
            return Err(StoreError::NotFound {
                zone_id: zone_id.clone(),
            });
        }
        Ok(())
    }
}
