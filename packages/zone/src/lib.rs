#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Zone lifecycle state machine.
//!
//! [`derive_status`] is the single source of truth for whether a zone is
//! upcoming, active, completed, or expired. It is a pure function of the
//! zone's stored inputs and the evaluation instant, so the claim path and
//! every read path always agree.

pub mod seeds;

use chrono::{DateTime, Utc};
use geodrop_zone_models::{Zone, ZoneStatus};
use serde::Serialize;

/// Derives the lifecycle status of `zone` at `now`.
///
/// Rules are applied in order and the first match wins:
///
/// 1. manually disabled → [`ZoneStatus::Expired`]
/// 2. before the window starts → [`ZoneStatus::Upcoming`]
/// 3. after the window ends → [`ZoneStatus::Expired`]
/// 4. capped and full → [`ZoneStatus::Completed`]
/// 5. otherwise → [`ZoneStatus::Active`]
#[must_use]
pub fn derive_status(zone: &Zone, now: DateTime<Utc>) -> ZoneStatus {
    if zone.manually_disabled {
        ZoneStatus::Expired
    } else if now < zone.active_window.starts_at {
        ZoneStatus::Upcoming
    } else if now > zone.active_window.ends_at {
        ZoneStatus::Expired
    } else if zone.is_full() {
        ZoneStatus::Completed
    } else {
        ZoneStatus::Active
    }
}

/// A zone snapshot paired with the status derived for it and the instant
/// of that derivation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneView {
    /// The zone as read from the store.
    pub zone: Zone,
    /// Status derived from `zone` at `evaluated_at`.
    pub status: ZoneStatus,
    /// The instant used for the derivation.
    pub evaluated_at: DateTime<Utc>,
}

impl ZoneView {
    /// Derives the status of `zone` at `now`.
    #[must_use]
    pub fn evaluate(zone: Zone, now: DateTime<Utc>) -> Self {
        let status = derive_status(&zone, now);
        Self {
            zone,
            status,
            evaluated_at: now,
        }
    }
}

/// Evaluates every zone at the same instant.
#[must_use]
pub fn evaluate_all(zones: Vec<Zone>, now: DateTime<Utc>) -> Vec<ZoneView> {
    zones
        .into_iter()
        .map(|zone| ZoneView::evaluate(zone, now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone as _};
    use geodrop_geofence::GeoPoint;
    use geodrop_zone_models::{ActiveWindow, Reward, TokenAmount, ZoneId, ZoneMetadata};

    fn zone(max: u32, current: u32) -> Zone {
        Zone {
            id: ZoneId::new("retiro"),
            center: GeoPoint::new(40.4152, -3.6844).unwrap(),
            radius_meters: 200.0,
            reward: Reward {
                amount: TokenAmount::whole(150),
                currency: "BTM".to_string(),
            },
            active_window: ActiveWindow {
                starts_at: Utc.with_ymd_and_hms(2025, 7, 29, 10, 0, 0).unwrap(),
                ends_at: Utc.with_ymd_and_hms(2025, 8, 5, 20, 0, 0).unwrap(),
            },
            max_participants: max,
            current_participants: current,
            manually_disabled: false,
            metadata: ZoneMetadata::default(),
        }
    }

    fn inside_window() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn future_start_is_upcoming() {
        let z = zone(75, 0);
        let before = z.active_window.starts_at - Duration::seconds(1);
        assert_eq!(derive_status(&z, before), ZoneStatus::Upcoming);
    }

    #[test]
    fn past_end_is_expired_regardless_of_participants() {
        let after = zone(75, 0).active_window.ends_at + Duration::milliseconds(1);
        assert_eq!(derive_status(&zone(75, 0), after), ZoneStatus::Expired);
        assert_eq!(derive_status(&zone(75, 75), after), ZoneStatus::Expired);
        assert_eq!(derive_status(&zone(0, 10), after), ZoneStatus::Expired);
    }

    #[test]
    fn full_zone_is_completed_inside_window() {
        assert_eq!(derive_status(&zone(100, 100), inside_window()), ZoneStatus::Completed);
        assert_eq!(derive_status(&zone(100, 99), inside_window()), ZoneStatus::Active);
    }

    #[test]
    fn unbounded_zone_never_completes() {
        assert_eq!(derive_status(&zone(0, 1_000_000), inside_window()), ZoneStatus::Active);
    }

    #[test]
    fn manual_disable_wins_over_everything() {
        let mut z = zone(100, 0);
        z.manually_disabled = true;
        let before = z.active_window.starts_at - Duration::days(1);
        assert_eq!(derive_status(&z, before), ZoneStatus::Expired);
        assert_eq!(derive_status(&z, inside_window()), ZoneStatus::Expired);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let z = zone(10, 0);
        assert_eq!(derive_status(&z, z.active_window.starts_at), ZoneStatus::Active);
        assert_eq!(derive_status(&z, z.active_window.ends_at), ZoneStatus::Active);
    }

    #[test]
    fn view_records_evaluation_instant() {
        let now = inside_window();
        let views = evaluate_all(vec![zone(10, 10), zone(10, 0)], now);
        assert_eq!(views[0].status, ZoneStatus::Completed);
        assert_eq!(views[1].status, ZoneStatus::Active);
        assert!(views.iter().all(|v| v.evaluated_at == now));
    }
}
