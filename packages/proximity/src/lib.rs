#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Proximity ranking of zones relative to a user's position.
//!
//! All distances are in meters. When the user's position is unknown the
//! ranker never invents a distance: zones come back in their original
//! order with `distance_meters` unset.

use chrono::{DateTime, Utc};
use geodrop_geofence::{UserLocation, distance_meters, is_within_radius};
use geodrop_zone::derive_status;
use geodrop_zone_models::Zone;
use serde::{Deserialize, Serialize};

/// Default radius of the "nearby" view (5 km).
pub const DEFAULT_NEARBY_RADIUS_METERS: f64 = 5_000.0;

/// Tunables for the derived views.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    /// Maximum distance for a zone to count as nearby.
    pub nearby_radius_meters: f64,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            nearby_radius_meters: DEFAULT_NEARBY_RADIUS_METERS,
        }
    }
}

/// A zone annotated with its distance from the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneWithDistance {
    /// The zone.
    pub zone: Zone,
    /// Distance from the user to the zone center, if the user's position
    /// is known.
    pub distance_meters: Option<f64>,
}

/// Annotates `zones` with their distance from `from` and orders them.
///
/// With a position, zones are sorted by ascending distance and ties are
/// broken by ascending zone id. Without one, the input order is kept and
/// no distance is attached.
#[must_use]
pub fn rank(zones: &[Zone], from: Option<&UserLocation>) -> Vec<ZoneWithDistance> {
    let Some(from) = from else {
        return zones
            .iter()
            .cloned()
            .map(|zone| ZoneWithDistance {
                zone,
                distance_meters: None,
            })
            .collect();
    };

    let mut ranked: Vec<(f64, &Zone)> = zones
        .iter()
        .map(|zone| (distance_meters(&from.point, &zone.center), zone))
        .collect();

    ranked.sort_by(|(da, a), (db, b)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)));

    ranked
        .into_iter()
        .map(|(distance, zone)| ZoneWithDistance {
            zone: zone.clone(),
            distance_meters: Some(distance),
        })
        .collect()
}

/// Keeps only zones that accept claims at `now` (the active ones), preserving
/// order.
#[must_use]
pub fn active_only(ranked: Vec<ZoneWithDistance>, now: DateTime<Utc>) -> Vec<ZoneWithDistance> {
    ranked
        .into_iter()
        .filter(|z| derive_status(&z.zone, now).accepts_claims())
        .collect()
}

/// Active zones within `radius_meters` of the user. Zones without a known
/// distance are never nearby.
#[must_use]
pub fn nearby_within(
    ranked: Vec<ZoneWithDistance>,
    now: DateTime<Utc>,
    radius_meters: f64,
) -> Vec<ZoneWithDistance> {
    active_only(ranked, now)
        .into_iter()
        .filter(|z| z.distance_meters.is_some_and(|d| d <= radius_meters))
        .collect()
}

/// Active zones within [`DEFAULT_NEARBY_RADIUS_METERS`] of the user.
#[must_use]
pub fn nearby(ranked: Vec<ZoneWithDistance>, now: DateTime<Utc>) -> Vec<ZoneWithDistance> {
    nearby_within(ranked, now, DEFAULT_NEARBY_RADIUS_METERS)
}

/// Active zones whose geofence contains `location`.
#[must_use]
pub fn containing<'a>(
    zones: &'a [Zone],
    location: &UserLocation,
    now: DateTime<Utc>,
) -> Vec<&'a Zone> {
    zones
        .iter()
        .filter(|zone| derive_status(zone, now).accepts_claims())
        .filter(|zone| is_within_radius(&location.point, &zone.center, zone.radius_meters))
        .collect()
}

/// Whether a position lies inside one zone's geofence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationCheck {
    /// Inside the radius, boundary included.
    pub in_zone: bool,
    /// Distance from the zone center in meters.
    #[serde(rename = "distance")]
    pub distance_meters: f64,
}

/// Checks `location` against `zone`'s geofence. Status is not considered.
#[must_use]
pub fn check_location(zone: &Zone, location: &UserLocation) -> LocationCheck {
    let distance = distance_meters(&location.point, &zone.center);
    LocationCheck {
        in_zone: distance <= zone.radius_meters,
        distance_meters: distance,
    }
}

/// Applies a [`RankerConfig`] to the free functions in this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ranker {
    config: RankerConfig,
}

impl Ranker {
    /// A ranker using `config`.
    #[must_use]
    pub const fn new(config: RankerConfig) -> Self {
        Self { config }
    }

    /// See [`rank`].
    #[must_use]
    pub fn rank(&self, zones: &[Zone], from: Option<&UserLocation>) -> Vec<ZoneWithDistance> {
        rank(zones, from)
    }

    /// See [`active_only`].
    #[must_use]
    pub fn active(
        &self,
        zones: &[Zone],
        from: Option<&UserLocation>,
        now: DateTime<Utc>,
    ) -> Vec<ZoneWithDistance> {
        active_only(rank(zones, from), now)
    }

    /// Active zones within the configured nearby radius.
    #[must_use]
    pub fn nearby(
        &self,
        zones: &[Zone],
        from: Option<&UserLocation>,
        now: DateTime<Utc>,
    ) -> Vec<ZoneWithDistance> {
        nearby_within(rank(zones, from), now, self.config.nearby_radius_meters)
    }
}
