#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! User position acquisition with a staleness-bounded cache.
//!
//! [`LocationProvider::acquire_location`] returns the cached fix when it is
//! younger than the policy's maximum age. Otherwise it performs a fresh
//! high-accuracy read through a [`PositionSource`], bounded by the policy's
//! timeout. Only a successful read replaces the cache.

pub mod sources;

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use geodrop_geofence::{GeoPoint, UserLocation};
use serde::{Deserialize, Serialize};

pub use sources::{ReportedPositionSource, StaticPositionSource};

/// Default maximum age of a cached fix (5 minutes).
pub const DEFAULT_MAX_AGE_MILLIS: u64 = 300_000;

/// Default bound on a fresh sensor read (10 seconds).
pub const DEFAULT_TIMEOUT_MILLIS: u64 = 10_000;

/// Errors surfaced to callers. None of them are retried here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    /// The user refused location access.
    #[error("Location permission denied")]
    PermissionDenied,

    /// The source could not produce a usable position.
    #[error("Position unavailable: {reason}")]
    PositionUnavailable {
        /// What went wrong.
        reason: String,
    },

    /// A fresh read did not finish within the allowed time.
    #[error("Timed out after {timeout_millis}ms waiting for a position")]
    Timeout {
        /// The bound that was exceeded.
        timeout_millis: u64,
    },
}

/// Cache and timeout policy for a single acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationPolicy {
    /// A cached fix strictly younger than this is reused.
    pub max_age_millis: u64,
    /// Hard bound on a fresh read.
    pub timeout_millis: u64,
}

impl Default for LocationPolicy {
    fn default() -> Self {
        Self {
            max_age_millis: DEFAULT_MAX_AGE_MILLIS,
            timeout_millis: DEFAULT_TIMEOUT_MILLIS,
        }
    }
}

/// A raw, unvalidated reading from a position source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionReading {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Reported accuracy radius in meters.
    pub accuracy_meters: Option<f64>,
    /// When the reading was taken (Unix epoch milliseconds).
    pub observed_at_millis: i64,
}

/// Something that can produce the user's current position, e.g. a device
/// GPS or a browser geolocation bridge.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Reads the current position. May suspend for as long as the
    /// underlying sensor needs; callers bound it with a timeout.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::PermissionDenied`] or
    /// [`LocationError::PositionUnavailable`] when no reading is possible.
    async fn read_position(&self, high_accuracy: bool) -> Result<PositionReading, LocationError>;
}

/// Acquires and caches the caller's position.
pub struct LocationProvider<S> {
    source: S,
    cache: RwLock<Option<UserLocation>>,
}

impl<S: PositionSource> LocationProvider<S> {
    /// Wraps a position source with an empty cache.
    pub const fn new(source: S) -> Self {
        Self {
            source,
            cache: RwLock::new(None),
        }
    }

    /// The underlying source.
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// The currently cached fix, regardless of age.
    pub fn cached(&self) -> Option<UserLocation> {
        *self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops the cached fix so the next acquisition reads the source.
    pub fn invalidate(&self) {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Returns a fix that satisfies `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError`] if a fresh read was needed and it failed
    /// or timed out. The cache is left untouched in that case.
    pub async fn acquire_location(
        &self,
        policy: LocationPolicy,
    ) -> Result<UserLocation, LocationError> {
        let now_millis = chrono::Utc::now().timestamp_millis();

        if let Some(cached) = self.cached() {
            // Fixes stamped in the future (clock skew) count as brand new.
            let age = u64::try_from(cached.age_millis(now_millis)).unwrap_or(0);
            if age < policy.max_age_millis {
                log::debug!("Using cached position {} ({age}ms old)", cached.point);
                return Ok(cached);
            }
        }

        let reading = tokio::time::timeout(
            Duration::from_millis(policy.timeout_millis),
            self.source.read_position(true),
        )
        .await
        .map_err(|_| {
            log::warn!(
                "Position read exceeded {}ms, keeping previous cache",
                policy.timeout_millis
            );
            LocationError::Timeout {
                timeout_millis: policy.timeout_millis,
            }
        })??;

        let point = GeoPoint::new(reading.latitude, reading.longitude).map_err(|e| {
            LocationError::PositionUnavailable {
                reason: e.to_string(),
            }
        })?;

        let fix = UserLocation {
            point,
            observed_at_millis: reading.observed_at_millis,
            accuracy_meters: reading.accuracy_meters,
        };

        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(fix);
        log::debug!("Acquired fresh position {point}");

        Ok(fix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted results, optionally after a delay.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<(f64, f64), LocationError>>>,
        delay: Duration,
        reads: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<(f64, f64), LocationError>>, delay: Duration) -> Self {
            Self {
                script: Mutex::new(script.into()),
                delay,
                reads: AtomicUsize::new(0),
            }
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PositionSource for ScriptedSource {
        async fn read_position(&self, high_accuracy: bool) -> Result<PositionReading, LocationError> {
            assert!(high_accuracy);
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let next = self.script.lock().unwrap().pop_front().unwrap();
            next.map(|(latitude, longitude)| PositionReading {
                latitude,
                longitude,
                accuracy_meters: Some(5.0),
                observed_at_millis: chrono::Utc::now().timestamp_millis(),
            })
        }
    }

    const SOL: (f64, f64) = (40.4168, -3.7038);
    const RETIRO: (f64, f64) = (40.4152, -3.6844);

    #[tokio::test]
    async fn reuses_young_cached_fix() {
        let provider =
            LocationProvider::new(ScriptedSource::new(vec![Ok(SOL)], Duration::ZERO));

        let first = provider.acquire_location(LocationPolicy::default()).await.unwrap();
        let second = provider.acquire_location(LocationPolicy::default()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.source().reads(), 1);
    }

    #[tokio::test]
    async fn stale_cache_triggers_fresh_read() {
        let provider = LocationProvider::new(ScriptedSource::new(
            vec![Ok(SOL), Ok(RETIRO)],
            Duration::ZERO,
        ));
        let always_stale = LocationPolicy {
            max_age_millis: 0,
            ..LocationPolicy::default()
        };

        provider.acquire_location(always_stale).await.unwrap();
        let fix = provider.acquire_location(always_stale).await.unwrap();

        assert!((fix.point.longitude() - RETIRO.1).abs() < 1e-9);
        assert_eq!(provider.source().reads(), 2);
        assert_eq!(provider.cached(), Some(fix));
    }

    #[tokio::test]
    async fn timeout_leaves_cache_untouched() {
        let provider = LocationProvider::new(ScriptedSource::new(
            vec![Ok(SOL), Ok(RETIRO)],
            Duration::from_millis(200),
        ));

        let first = provider
            .acquire_location(LocationPolicy {
                max_age_millis: 0,
                timeout_millis: 5_000,
            })
            .await
            .unwrap();

        let err = provider
            .acquire_location(LocationPolicy {
                max_age_millis: 0,
                timeout_millis: 10,
            })
            .await
            .unwrap_err();

        assert_eq!(err, LocationError::Timeout { timeout_millis: 10 });
        assert_eq!(provider.cached(), Some(first));
    }

    #[tokio::test]
    async fn failures_propagate_and_keep_previous_fix() {
        let provider = LocationProvider::new(ScriptedSource::new(
            vec![Ok(SOL), Err(LocationError::PermissionDenied)],
            Duration::ZERO,
        ));
        let stale = LocationPolicy {
            max_age_millis: 0,
            ..LocationPolicy::default()
        };

        let first = provider.acquire_location(stale).await.unwrap();
        let err = provider.acquire_location(stale).await.unwrap_err();

        assert_eq!(err, LocationError::PermissionDenied);
        assert_eq!(provider.cached(), Some(first));
    }

    #[tokio::test]
    async fn invalid_reading_is_unavailable() {
        let provider = LocationProvider::new(ScriptedSource::new(
            vec![Ok((f64::NAN, 0.0))],
            Duration::ZERO,
        ));

        let err = provider
            .acquire_location(LocationPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, LocationError::PositionUnavailable { .. }));
        assert_eq!(provider.cached(), None);
    }

    #[tokio::test]
    async fn invalidate_forces_a_read() {
        let provider = LocationProvider::new(ScriptedSource::new(
            vec![Ok(SOL), Ok(SOL)],
            Duration::ZERO,
        ));

        provider.acquire_location(LocationPolicy::default()).await.unwrap();
        provider.invalidate();
        provider.acquire_location(LocationPolicy::default()).await.unwrap();

        assert_eq!(provider.source().reads(), 2);
    }
}
