#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Types owned by the claim ledger.
//!
//! A [`ClaimRecord`] exists per `(identity, zone)` pair. Its `claimed_at`
//! is write-once; everything the ledger grants or refuses is expressed with
//! [`ClaimGrant`] and [`ClaimError`].

use chrono::{DateTime, Utc};
use geodrop_zone_models::{TokenAmount, ZoneId, ZoneStatus};
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;

/// Rejected identity strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// Empty or whitespace only.
    #[error("Identity must not be empty")]
    Empty,
}

/// Stable key of a claimant, typically a wallet address. Stored trimmed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Validates and wraps an identity.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Empty`] if nothing remains after trimming.
    pub fn new(value: &str) -> Result<Self, IdentityError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}

impl std::str::FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome reported by the settlement collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SettlementStatus {
    /// Tokens were transferred.
    Settled {
        /// Transaction hash or equivalent reference.
        reference: String,
    },
    /// The transfer failed. The grant itself still stands.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

/// A settlement outcome and when it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    /// The outcome.
    #[serde(flatten)]
    pub status: SettlementStatus,
    /// When the ledger stored it.
    pub recorded_at: DateTime<Utc>,
}

/// Per `(identity, zone)` ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRecord {
    /// Claimant.
    pub identity: Identity,
    /// Zone.
    pub zone_id: ZoneId,
    /// First time the identity was observed inside the zone.
    pub entered_at: Option<DateTime<Utc>>,
    /// When the reward was granted. Set at most once.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Settlement outcome, once known.
    pub settlement: Option<SettlementRecord>,
}

impl ClaimRecord {
    /// An empty record for the pair.
    #[must_use]
    pub const fn new(identity: Identity, zone_id: ZoneId) -> Self {
        Self {
            identity,
            zone_id,
            entered_at: None,
            claimed_at: None,
            settlement: None,
        }
    }

    /// Whether the reward has been granted.
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        self.claimed_at.is_some()
    }
}

/// Successful claim result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimGrant {
    /// Always `true`; kept for API consumers that branch on it.
    pub granted: bool,
    /// Claimant.
    pub identity: Identity,
    /// Zone.
    pub zone_id: ZoneId,
    /// Tokens granted.
    pub reward_amount: TokenAmount,
    /// Token symbol.
    pub reward_currency: String,
    /// Commit instant.
    pub claimed_at: DateTime<Utc>,
    /// `current_participants` right after the commit.
    pub participants_after: u32,
}

/// Handed to the settlement collaborator after a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantEvent {
    /// Claimant.
    pub identity: Identity,
    /// Zone.
    pub zone_id: ZoneId,
    /// Tokens to transfer.
    pub reward_amount: TokenAmount,
    /// Token symbol.
    pub reward_currency: String,
    /// Commit instant.
    pub claimed_at: DateTime<Utc>,
}

impl From<&ClaimGrant> for GrantEvent {
    fn from(grant: &ClaimGrant) -> Self {
        Self {
            identity: grant.identity.clone(),
            zone_id: grant.zone_id.clone(),
            reward_amount: grant.reward_amount,
            reward_currency: grant.reward_currency.clone(),
            claimed_at: grant.claimed_at,
        }
    }
}

/// Why a claim was refused.
///
/// All variants except [`ClaimError::ClaimFailed`] are final outcomes and
/// are never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ClaimError {
    /// No zone with that id.
    #[error("Zone {zone_id} not found")]
    ZoneNotFound {
        /// Requested zone.
        zone_id: ZoneId,
    },

    /// The zone is upcoming or expired.
    #[error("Zone is not accepting claims (status: {status})")]
    ZoneNotActive {
        /// Status at evaluation time.
        status: ZoneStatus,
    },

    /// The claimant is outside the geofence.
    #[error("Out of range: {distance_meters:.1}m from center, radius is {radius_meters}m")]
    OutOfRange {
        /// Distance from the zone center.
        distance_meters: f64,
        /// Zone radius.
        radius_meters: f64,
    },

    /// This identity already holds the reward.
    #[error("Reward already claimed for this zone")]
    AlreadyClaimed,

    /// Every participant slot is taken.
    #[error("Zone has reached its participant limit")]
    CapacityExceeded,

    /// Storage kept failing after the configured retries.
    #[error("Claim failed after {attempts} attempts: {reason}")]
    ClaimFailed {
        /// Attempts made.
        attempts: u32,
        /// Last storage error.
        reason: String,
    },
}

impl ClaimError {
    /// Stable machine-readable kind, e.g. `already_claimed`.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.as_ref()
    }
}

/// Result of an entry observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum EntryOutcome {
    /// First observed entry; `entered_at` was set.
    #[serde(rename_all = "camelCase")]
    Entered {
        /// The recorded instant.
        entered_at: DateTime<Utc>,
    },
    /// `entered_at` was already set and was left alone.
    #[serde(rename_all = "camelCase")]
    AlreadyEntered {
        /// The previously recorded instant.
        entered_at: DateTime<Utc>,
    },
    /// The identity is outside the geofence; nothing was written.
    #[serde(rename_all = "camelCase")]
    OutsideRadius {
        /// Distance from the zone center.
        distance_meters: f64,
        /// Zone radius.
        radius_meters: f64,
    },
    /// The zone is not active; nothing was written.
    #[serde(rename_all = "camelCase")]
    ZoneNotActive {
        /// Derived status at the observation instant.
        status: ZoneStatus,
    },
}

/// Why an entry observation could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EntryError {
    /// No zone with that id.
    #[error("Zone {zone_id} not found")]
    ZoneNotFound {
        /// Requested zone.
        zone_id: ZoneId,
    },

    /// The store failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// System-wide totals for the operator dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    /// Zones in the store.
    pub total_zones: usize,
    /// Zones whose derived status is active.
    pub active_zones: usize,
    /// Distinct identities holding at least one granted claim.
    pub total_participants: usize,
    /// Sum of the rewards of every granted claim, across currencies.
    pub total_tokens_distributed: TokenAmount,
    /// Instant the statuses were derived at.
    pub evaluated_at: DateTime<Utc>,
}
