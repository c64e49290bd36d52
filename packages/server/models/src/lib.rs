#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the geodrop server.
//!
//! These types are serialized to JSON for the REST API. They are separate
//! from the engine types so the API contract can evolve independently.

use chrono::{DateTime, Utc};
use geodrop_ledger_models::{ClaimError, EntryError};
use geodrop_zone::ZoneView;
use geodrop_zone_models::{TokenAmount, ZoneDifficulty, ZoneStatus};
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the server is healthy.
    pub healthy: bool,
    /// Server version.
    pub version: String,
}

/// Optional caller position for the zone listing endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationQueryParams {
    /// Latitude in decimal degrees.
    pub lat: Option<f64>,
    /// Longitude in decimal degrees.
    pub lng: Option<f64>,
    /// When the fix was taken (Unix epoch milliseconds). Defaults to now.
    pub observed_at: Option<i64>,
}

/// Body of the claim and enter endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRequest {
    /// Claimant, typically a wallet address.
    pub identity: String,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// When the fix was taken (Unix epoch milliseconds). Defaults to now.
    pub observed_at: Option<i64>,
    /// Reported accuracy radius in meters.
    pub accuracy_meters: Option<f64>,
}

/// A zone as returned by the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiZone {
    /// Zone id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Human-readable place.
    pub location_label: String,
    /// Owning brand.
    pub brand: Option<String>,
    /// Owning brand id.
    pub brand_id: Option<String>,
    /// Distributed token contract.
    pub token_address: Option<String>,
    /// Requirements shown before claiming.
    pub requirements: Vec<String>,
    /// Difficulty rating.
    pub difficulty: Option<ZoneDifficulty>,
    /// Center latitude.
    pub latitude: f64,
    /// Center longitude.
    pub longitude: f64,
    /// Geofence radius.
    pub radius_meters: f64,
    /// Tokens per claim, as a decimal string.
    pub reward_amount: TokenAmount,
    /// Token symbol.
    pub reward_currency: String,
    /// Window start.
    pub starts_at: DateTime<Utc>,
    /// Window end.
    pub ends_at: DateTime<Utc>,
    /// Participant cap; `0` means unbounded.
    pub max_participants: u32,
    /// Claims so far.
    pub current_participants: u32,
    /// Slots left, absent when unbounded.
    pub remaining_capacity: Option<u32>,
    /// Derived status.
    pub status: ZoneStatus,
    /// Instant the status was derived at.
    pub evaluated_at: DateTime<Utc>,
    /// Distance from the caller, when a position was supplied.
    pub distance_meters: Option<f64>,
}

impl ApiZone {
    /// Builds the API shape from an evaluated zone and optional distance.
    #[must_use]
    pub fn from_view(view: ZoneView, distance_meters: Option<f64>) -> Self {
        let ZoneView {
            zone,
            status,
            evaluated_at,
        } = view;
        let remaining_capacity = zone.remaining_capacity();
        Self {
            id: zone.id.to_string(),
            name: zone.metadata.name,
            description: zone.metadata.description,
            location_label: zone.metadata.location_label,
            brand: zone.metadata.brand,
            brand_id: zone.metadata.brand_id,
            token_address: zone.metadata.token_address,
            requirements: zone.metadata.requirements,
            difficulty: zone.metadata.difficulty,
            latitude: zone.center.latitude(),
            longitude: zone.center.longitude(),
            radius_meters: zone.radius_meters,
            reward_amount: zone.reward.amount,
            reward_currency: zone.reward.currency,
            starts_at: zone.active_window.starts_at,
            ends_at: zone.active_window.ends_at,
            max_participants: zone.max_participants,
            current_participants: zone.current_participants,
            remaining_capacity,
            status,
            evaluated_at,
            distance_meters,
        }
    }
}

/// A zone listing derived at a single instant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiZoneList {
    /// Instant every status was derived at.
    pub evaluated_at: DateTime<Utc>,
    /// Zones, ranked when a position was supplied.
    pub zones: Vec<ApiZone>,
}

/// Error payload: `{ "error": <kind>, "message": ..., ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Machine-readable kind, e.g. `out_of_range`.
    pub error: String,
    /// Human-readable description.
    pub message: String,
    /// Zone status, for `zone_not_active`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ZoneStatus>,
    /// Distance from the center, for `out_of_range`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
    /// Zone radius, for `out_of_range`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius_meters: Option<f64>,
}

impl ApiError {
    /// An error with only a kind and message.
    #[must_use]
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
            distance_meters: None,
            radius_meters: None,
        }
    }
}

impl From<&ClaimError> for ApiError {
    fn from(e: &ClaimError) -> Self {
        let mut api = Self::new(e.kind(), e.to_string());
        match e {
            ClaimError::ZoneNotActive { status } => api.status = Some(*status),
            ClaimError::OutOfRange {
                distance_meters,
                radius_meters,
            } => {
                api.distance_meters = Some(*distance_meters);
                api.radius_meters = Some(*radius_meters);
            }
            _ => {}
        }
        api
    }
}

impl From<&EntryError> for ApiError {
    fn from(e: &EntryError) -> Self {
        Self::new(e.as_ref(), e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;
    use geodrop_geofence::GeoPoint;
    use geodrop_zone_models::{ActiveWindow, Reward, Zone, ZoneId, ZoneMetadata};

    #[test]
    fn out_of_range_payload_carries_distances() {
        let json = serde_json::to_value(ApiError::from(&ClaimError::OutOfRange {
            distance_meters: 152.0,
            radius_meters: 100.0,
        }))
        .unwrap();

        assert_eq!(json["error"], "out_of_range");
        assert_eq!(json["distanceMeters"], 152.0);
        assert_eq!(json["radiusMeters"], 100.0);
        assert!(json.get("status").is_none());
    }

    #[test]
    fn zone_view_flattens_metadata() {
        let now = Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap();
        let zone = Zone {
            id: ZoneId::new("retiro"),
            center: GeoPoint::new(40.4152, -3.6844).unwrap(),
            radius_meters: 200.0,
            reward: Reward {
                amount: TokenAmount::whole(150),
                currency: "BTM".to_string(),
            },
            active_window: ActiveWindow {
                starts_at: now - chrono::Duration::hours(2),
                ends_at: now + chrono::Duration::hours(2),
            },
            max_participants: 75,
            current_participants: 45,
            manually_disabled: false,
            metadata: ZoneMetadata {
                name: "Parque del Retiro".to_string(),
                ..ZoneMetadata::default()
            },
        };

        let api = ApiZone::from_view(ZoneView::evaluate(zone, now), Some(12.5));
        let json = serde_json::to_value(&api).unwrap();

        assert_eq!(json["name"], "Parque del Retiro");
        assert_eq!(json["status"], "active");
        assert_eq!(json["rewardAmount"], "150");
        assert_eq!(json["remainingCapacity"], 30);
        assert_eq!(json["distanceMeters"], 12.5);
    }
}
