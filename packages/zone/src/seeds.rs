//! Embedded demo zones.
//!
//! Each seed file is a TOML document with a `[[zones]]` array whose active
//! windows are expressed as hour offsets from the load instant. This keeps
//! the demo data meaningful no matter when it is loaded.

use chrono::{DateTime, Duration, Utc};
use geodrop_geofence::{GeoPoint, GeofenceError};
use geodrop_zone_models::{
    ActiveWindow, Reward, TokenAmount, Zone, ZoneDifficulty, ZoneId, ZoneMetadata,
    ZoneValidationError,
};
use serde::Deserialize;

/// Embedded seed files, keyed by name.
const SEED_TOMLS: &[(&str, &str)] = &[("madrid", include_str!("../seeds/madrid.toml"))];

/// Errors raised while loading a seed file.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// No seed with that name is embedded.
    #[error("Unknown seed '{0}'")]
    UnknownSeed(String),

    /// The TOML could not be parsed.
    #[error("Failed to parse seed '{name}': {source}")]
    Parse {
        /// Seed name.
        name: String,
        /// Underlying parse error.
        source: toml::de::Error,
    },

    /// A zone center is not a valid coordinate.
    #[error("Seed zone has an invalid center: {0}")]
    Coordinate(#[from] GeofenceError),

    /// A zone failed validation.
    #[error("Seed zone is invalid: {0}")]
    Validation(#[from] ZoneValidationError),
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    zones: Vec<SeedZone>,
}

#[derive(Debug, Deserialize)]
struct SeedZone {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    location_label: String,
    brand_id: Option<String>,
    brand: Option<String>,
    token_address: Option<String>,
    latitude: f64,
    longitude: f64,
    radius_meters: f64,
    amount: TokenAmount,
    currency: String,
    starts_in_hours: i64,
    duration_hours: i64,
    #[serde(default)]
    max_participants: u32,
    #[serde(default)]
    current_participants: u32,
    #[serde(default)]
    manually_disabled: bool,
    #[serde(default)]
    requirements: Vec<String>,
    difficulty: Option<ZoneDifficulty>,
}

impl SeedZone {
    fn into_zone(self, now: DateTime<Utc>) -> Result<Zone, SeedError> {
        let starts_at = now + Duration::hours(self.starts_in_hours);
        let zone = Zone {
            id: ZoneId::new(self.id),
            center: GeoPoint::new(self.latitude, self.longitude)?,
            radius_meters: self.radius_meters,
            reward: Reward {
                amount: self.amount,
                currency: self.currency,
            },
            active_window: ActiveWindow {
                starts_at,
                ends_at: starts_at + Duration::hours(self.duration_hours),
            },
            max_participants: self.max_participants,
            current_participants: self.current_participants,
            manually_disabled: self.manually_disabled,
            metadata: ZoneMetadata {
                name: self.name,
                description: self.description,
                location_label: self.location_label,
                brand_id: self.brand_id,
                brand: self.brand,
                token_address: self.token_address,
                requirements: self.requirements,
                difficulty: self.difficulty,
            },
        };
        zone.validate()?;
        Ok(zone)
    }
}

/// Names of all embedded seeds.
#[must_use]
pub fn seed_names() -> Vec<&'static str> {
    SEED_TOMLS.iter().map(|(name, _)| *name).collect()
}

/// Loads the named seed with windows anchored at `now`.
///
/// # Errors
///
/// Returns [`SeedError`] if the seed is unknown, fails to parse, or
/// contains an invalid zone.
pub fn load_seed(name: &str, now: DateTime<Utc>) -> Result<Vec<Zone>, SeedError> {
    let (_, toml_str) = SEED_TOMLS
        .iter()
        .find(|(seed, _)| *seed == name)
        .ok_or_else(|| SeedError::UnknownSeed(name.to_string()))?;

    let file: SeedFile = toml::de::from_str(toml_str).map_err(|source| SeedError::Parse {
        name: name.to_string(),
        source,
    })?;

    let zones = file
        .zones
        .into_iter()
        .map(|z| z.into_zone(now))
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!("Loaded {} zones from seed '{name}'", zones.len());
    Ok(zones)
}

/// The five central Madrid demo zones, anchored at `now`.
///
/// # Errors
///
/// Returns [`SeedError`] if the embedded seed is malformed.
pub fn madrid_demo_zones(now: DateTime<Utc>) -> Result<Vec<Zone>, SeedError> {
    load_seed("madrid", now)
}
