//! The persistence seam used by the ledger.
//!
//! Any backend works as long as [`ZoneStore::commit_claim`] is atomic: the
//! write-once `claimed_at` check, the capacity comparison, and the
//! participant increment must succeed or fail together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geodrop_ledger_models::{ClaimRecord, Identity, SettlementRecord};
use geodrop_zone_models::{Zone, ZoneId, ZoneValidationError};

/// Errors raised by a [`ZoneStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A concurrent writer got in the way (lock contention, busy database).
    #[error("Store conflict: {0}")]
    Conflict(String),

    /// The backend failed.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// An admin write was rejected.
    #[error("Invalid zone: {0}")]
    Validation(#[from] ZoneValidationError),

    /// The zone does not exist.
    #[error("Zone {zone_id} not found")]
    NotFound {
        /// Requested zone.
        zone_id: ZoneId,
    },
}

/// Input of the atomic claim commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    /// Claimant.
    pub identity: Identity,
    /// Zone.
    pub zone_id: ZoneId,
    /// Value written to `claimed_at`.
    pub claimed_at: DateTime<Utc>,
}

/// Result of the atomic claim commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// `claimed_at` was written and the participant count incremented.
    Committed {
        /// `current_participants` after the increment.
        participants_after: u32,
    },
    /// The record already had `claimed_at`; nothing changed.
    AlreadyClaimed,
    /// The zone is full; nothing changed.
    CapacityExceeded,
}

/// Result of [`ZoneStore::record_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedEntry {
    /// The stored `entered_at`, new or pre-existing.
    pub entered_at: DateTime<Utc>,
    /// Whether this call set it.
    pub newly_recorded: bool,
}

/// Zone and claim storage.
#[async_trait]
pub trait ZoneStore: Send + Sync {
    /// Loads one zone.
    async fn load_zone(&self, zone_id: &ZoneId) -> Result<Option<Zone>, StoreError>;

    /// Lists every zone in insertion order.
    async fn list_zones(&self) -> Result<Vec<Zone>, StoreError>;

    /// Loads the record for a pair, if any.
    async fn load_claim(
        &self,
        identity: &Identity,
        zone_id: &ZoneId,
    ) -> Result<Option<ClaimRecord>, StoreError>;

    /// Every record held by `identity`.
    async fn claims_for_identity(&self, identity: &Identity)
    -> Result<Vec<ClaimRecord>, StoreError>;

    /// Every record on `zone_id`, entry-only ones included.
    ///
    /// Fails with [`StoreError::NotFound`] if the zone does not exist.
    async fn claims_for_zone(&self, zone_id: &ZoneId) -> Result<Vec<ClaimRecord>, StoreError>;

    /// Creates the record if needed and sets `entered_at` if it is unset.
    /// An existing value is never overwritten.
    async fn record_entry(
        &self,
        identity: &Identity,
        zone_id: &ZoneId,
        entered_at: DateTime<Utc>,
    ) -> Result<RecordedEntry, StoreError>;

    /// Atomically writes `claimed_at` and increments the zone's
    /// participant count, subject to the write-once and capacity checks.
    async fn commit_claim(&self, request: &CommitRequest) -> Result<CommitOutcome, StoreError>;

    /// Stores the settlement outcome of a granted claim.
    async fn record_settlement(
        &self,
        identity: &Identity,
        zone_id: &ZoneId,
        settlement: SettlementRecord,
    ) -> Result<(), StoreError>;

    /// Inserts or replaces a zone definition after validating it.
    ///
    /// `current_participants` is only taken from `zone` on insert. An
    /// existing zone keeps its stored count, and an edit whose capacity
    /// falls below that count is rejected with
    /// [`ZoneValidationError::ParticipantsOverCapacity`].
    async fn upsert_zone(&self, zone: Zone) -> Result<(), StoreError>;

    /// Removes a zone and its claim records. Returns whether it existed.
    async fn delete_zone(&self, zone_id: &ZoneId) -> Result<bool, StoreError>;

    /// Administrative reset of `current_participants` to zero. Claim
    /// records are kept, so previous claimants still cannot claim again.
    async fn reset_participants(&self, zone_id: &ZoneId) -> Result<(), StoreError>;
}
