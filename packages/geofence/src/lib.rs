#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geofence math for geodrop zones.
//!
//! Great-circle distances use the Haversine formula on a sphere of radius
//! [`EARTH_RADIUS_METERS`]. Coordinates are validated once, when a
//! [`GeoPoint`] is constructed (or deserialized), so the distance and
//! containment functions themselves cannot fail.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the Haversine formula, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Errors produced while validating coordinates.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum GeofenceError {
    /// Latitude or longitude is NaN, infinite, or outside its valid range.
    #[error("Invalid coordinate: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinate {
        /// The rejected latitude.
        latitude: f64,
        /// The rejected longitude.
        longitude: f64,
    },
}

/// A validated WGS84 position in decimal degrees.
///
/// Latitude is always within `[-90, 90]` and longitude within
/// `[-180, 180]`; neither is ever NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeoPoint")]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

/// Unvalidated wire shape of a [`GeoPoint`].
#[derive(Deserialize)]
struct RawGeoPoint {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawGeoPoint> for GeoPoint {
    type Error = GeofenceError;

    fn try_from(raw: RawGeoPoint) -> Result<Self, Self::Error> {
        Self::new(raw.latitude, raw.longitude)
    }
}

impl GeoPoint {
    /// Creates a point from decimal-degree coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`GeofenceError::InvalidCoordinate`] if either value is not
    /// finite or is out of range.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, GeofenceError> {
        if latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude)
        {
            Ok(Self {
                latitude,
                longitude,
            })
        } else {
            Err(GeofenceError::InvalidCoordinate {
                latitude,
                longitude,
            })
        }
    }

    /// Latitude in decimal degrees.
    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude in decimal degrees.
    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// A single GPS fix reported for a user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLocation {
    /// Where the fix was taken.
    pub point: GeoPoint,
    /// When the fix was taken, in Unix epoch milliseconds.
    pub observed_at_millis: i64,
    /// Accuracy radius reported by the position source, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
}

impl UserLocation {
    /// Creates a fix without accuracy information.
    #[must_use]
    pub const fn new(point: GeoPoint, observed_at_millis: i64) -> Self {
        Self {
            point,
            observed_at_millis,
            accuracy_meters: None,
        }
    }

    /// Milliseconds elapsed between the fix and `now_millis`.
    ///
    /// Negative when the fix claims to come from the future.
    #[must_use]
    pub const fn age_millis(&self, now_millis: i64) -> i64 {
        now_millis.saturating_sub(self.observed_at_millis)
    }
}

/// Great-circle distance between two points in meters (Haversine).
#[must_use]
pub fn distance_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let half_chord = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push antipodal pairs a hair above 1.0.
    let half_chord = half_chord.clamp(0.0, 1.0);
    let angle = 2.0 * half_chord.sqrt().atan2((1.0 - half_chord).sqrt());

    EARTH_RADIUS_METERS * angle
}

/// Distance in meters between two raw coordinate pairs.
///
/// # Errors
///
/// Returns [`GeofenceError::InvalidCoordinate`] if any coordinate is
/// invalid.
pub fn distance_between(
    lat1: f64,
    lng1: f64,
    lat2: f64,
    lng2: f64,
) -> Result<f64, GeofenceError> {
    let a = GeoPoint::new(lat1, lng1)?;
    let b = GeoPoint::new(lat2, lng2)?;
    Ok(distance_meters(&a, &b))
}

/// Returns `true` if `point` lies within `radius_meters` of `center`.
///
/// The boundary is inclusive.
#[must_use]
pub fn is_within_radius(point: &GeoPoint, center: &GeoPoint, radius_meters: f64) -> bool {
    distance_meters(point, center) <= radius_meters
}
