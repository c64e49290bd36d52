#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Zone types shared across the geodrop engine.
//!
//! A [`Zone`] stores only the inputs to its lifecycle (window, capacity,
//! participant count, manual disable flag). Its [`ZoneStatus`] is always
//! derived at read time and never stored.

pub mod amount;

use chrono::{DateTime, Utc};
use geodrop_geofence::GeoPoint;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use amount::{TokenAmount, TokenAmountError};

/// Opaque unique identifier of a zone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(String);

impl ZoneId {
    /// Wraps an identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ZoneId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle status of a zone at a given instant.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ZoneStatus {
    /// The active window has not started yet.
    Upcoming,
    /// Open for claims.
    Active,
    /// Every participant slot is taken.
    Completed,
    /// The window has ended or the zone was manually disabled.
    Expired,
}

impl ZoneStatus {
    /// Whether zones in this status accept claims.
    #[must_use]
    pub const fn accepts_claims(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// How demanding a zone's requirements are. Informational only.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ZoneDifficulty {
    /// Presence only.
    Easy,
    /// Presence plus an action (photo, share).
    Medium,
    /// Sustained effort (route, hike).
    Hard,
}

/// The reward granted once per identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    /// Tokens granted per claim.
    pub amount: TokenAmount,
    /// Token symbol, e.g. `BTM`.
    pub currency: String,
}

/// The interval during which a zone can be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveWindow {
    /// Inclusive start.
    pub starts_at: DateTime<Utc>,
    /// Inclusive end.
    pub ends_at: DateTime<Utc>,
}

/// Descriptive fields shown by the presentation layer. The engine never
/// branches on these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZoneMetadata {
    /// Display name, e.g. "Puerta del Sol".
    pub name: String,
    /// Longer description.
    pub description: String,
    /// Human-readable place, e.g. "Centro Histórico".
    pub location_label: String,
    /// Owning brand identifier.
    pub brand_id: Option<String>,
    /// Owning brand display name.
    pub brand: Option<String>,
    /// Contract address of the distributed token.
    pub token_address: Option<String>,
    /// Requirements shown to users before they claim.
    pub requirements: Vec<String>,
    /// Difficulty rating.
    pub difficulty: Option<ZoneDifficulty>,
}

/// A geofenced, time-bounded, capacity-bounded reward area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    /// Unique identifier.
    pub id: ZoneId,
    /// Geofence center.
    pub center: GeoPoint,
    /// Geofence radius in meters.
    pub radius_meters: f64,
    /// Reward granted per claim.
    pub reward: Reward,
    /// When the zone may be active.
    pub active_window: ActiveWindow,
    /// Maximum successful claims; `0` means unbounded.
    pub max_participants: u32,
    /// Successful claims so far.
    pub current_participants: u32,
    /// Administrative override that forces the zone to `Expired`.
    #[serde(default)]
    pub manually_disabled: bool,
    /// Presentation metadata.
    #[serde(default)]
    pub metadata: ZoneMetadata,
}

/// Reasons a [`Zone`] definition is rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ZoneValidationError {
    /// The id is empty.
    #[error("Zone id must not be empty")]
    EmptyId,

    /// The radius is zero, negative, or not finite.
    #[error("Zone {id} has invalid radius {radius_meters}: must be a positive number of meters")]
    InvalidRadius {
        /// Offending zone.
        id: ZoneId,
        /// Rejected radius.
        radius_meters: f64,
    },

    /// The window does not start strictly before it ends.
    #[error("Zone {id} has an empty active window: starts {starts_at}, ends {ends_at}")]
    InvalidWindow {
        /// Offending zone.
        id: ZoneId,
        /// Window start.
        starts_at: DateTime<Utc>,
        /// Window end.
        ends_at: DateTime<Utc>,
    },

    /// The reward currency is empty.
    #[error("Zone {id} has no reward currency")]
    MissingCurrency {
        /// Offending zone.
        id: ZoneId,
    },

    /// More participants than the zone allows.
    #[error("Zone {id} has {current} participants but allows at most {max}")]
    ParticipantsOverCapacity {
        /// Offending zone.
        id: ZoneId,
        /// Recorded participants.
        current: u32,
        /// Capacity.
        max: u32,
    },
}

impl Zone {
    /// Checks the structural invariants of a zone definition.
    ///
    /// # Errors
    ///
    /// Returns the first [`ZoneValidationError`] found.
    pub fn validate(&self) -> Result<(), ZoneValidationError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ZoneValidationError::EmptyId);
        }
        if !self.radius_meters.is_finite() || self.radius_meters <= 0.0 {
            return Err(ZoneValidationError::InvalidRadius {
                id: self.id.clone(),
                radius_meters: self.radius_meters,
            });
        }
        if self.active_window.starts_at >= self.active_window.ends_at {
            return Err(ZoneValidationError::InvalidWindow {
                id: self.id.clone(),
                starts_at: self.active_window.starts_at,
                ends_at: self.active_window.ends_at,
            });
        }
        if self.reward.currency.trim().is_empty() {
            return Err(ZoneValidationError::MissingCurrency {
                id: self.id.clone(),
            });
        }
        if self.max_participants > 0 && self.current_participants > self.max_participants {
            return Err(ZoneValidationError::ParticipantsOverCapacity {
                id: self.id.clone(),
                current: self.current_participants,
                max: self.max_participants,
            });
        }
        Ok(())
    }

    /// Whether the zone has a participant cap.
    #[must_use]
    pub const fn is_capped(&self) -> bool {
        self.max_participants > 0
    }

    /// Whether every participant slot is taken. Always `false` for
    /// unbounded zones.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.is_capped() && self.current_participants >= self.max_participants
    }

    /// Remaining participant slots, or `None` when unbounded.
    #[must_use]
    pub const fn remaining_capacity(&self) -> Option<u32> {
        if self.is_capped() {
            Some(self.max_participants.saturating_sub(self.current_participants))
        } else {
            None
        }
    }
}
