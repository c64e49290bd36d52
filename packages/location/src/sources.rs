//! Built-in [`PositionSource`] implementations.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use geodrop_geofence::GeoPoint;

use crate::{LocationError, PositionReading, PositionSource};

/// Always reports the same position, stamped with the read time.
///
/// Used by the CLI, where the operator supplies coordinates up front.
#[derive(Debug, Clone, Copy)]
pub struct StaticPositionSource {
    point: GeoPoint,
    accuracy_meters: Option<f64>,
}

impl StaticPositionSource {
    /// A source fixed at `point`.
    #[must_use]
    pub const fn new(point: GeoPoint) -> Self {
        Self {
            point,
            accuracy_meters: None,
        }
    }

    /// Attaches a reported accuracy radius.
    #[must_use]
    pub const fn with_accuracy(mut self, accuracy_meters: f64) -> Self {
        self.accuracy_meters = Some(accuracy_meters);
        self
    }
}

#[async_trait]
impl PositionSource for StaticPositionSource {
    async fn read_position(&self, _high_accuracy: bool) -> Result<PositionReading, LocationError> {
        Ok(PositionReading {
            latitude: self.point.latitude(),
            longitude: self.point.longitude(),
            accuracy_meters: self.accuracy_meters,
            observed_at_millis: chrono::Utc::now().timestamp_millis(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Reported {
    Nothing,
    Denied,
    Reading(PositionReading),
}

/// Reports whatever position a caller last pushed into it.
///
/// Bridges push-style geolocation (a client streaming its coordinates)
/// into the pull-style [`PositionSource`] contract. Until the first report
/// every read fails with [`LocationError::PositionUnavailable`].
#[derive(Debug)]
pub struct ReportedPositionSource {
    latest: Mutex<Reported>,
}

impl Default for ReportedPositionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportedPositionSource {
    /// A source with nothing reported yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            latest: Mutex::new(Reported::Nothing),
        }
    }

    /// Records a new reading. Validation happens when the provider reads
    /// it, so bad input surfaces as [`LocationError::PositionUnavailable`].
    pub fn report(&self, reading: PositionReading) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Reported::Reading(reading);
    }

    /// Records that the user revoked location access.
    pub fn deny(&self) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Reported::Denied;
    }
}

#[async_trait]
impl PositionSource for ReportedPositionSource {
    async fn read_position(&self, _high_accuracy: bool) -> Result<PositionReading, LocationError> {
        let latest = *self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        match latest {
            Reported::Reading(reading) => Ok(reading),
            Reported::Denied => Err(LocationError::PermissionDenied),
            Reported::Nothing => Err(LocationError::PositionUnavailable {
                reason: "no position has been reported yet".to_string(),
            }),
        }
    }
}
