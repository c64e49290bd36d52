#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Claim arbitration with at-most-once semantics per `(identity, zone)`.
//!
//! [`ClaimLedger::attempt_claim`] validates a claim against the zone's
//! derived status and geofence, then commits it through
//! [`ZoneStore::commit_claim`], which is the only point of mutual
//! exclusion. Committed grants are published on an `mpsc` channel for the
//! settlement dispatcher in [`settlement`].

pub mod memory;
pub mod settlement;
pub mod store;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use geodrop_geofence::{UserLocation, distance_meters};
use geodrop_ledger_models::{
    ClaimError, ClaimGrant, ClaimRecord, DashboardStats, EntryError, EntryOutcome, GrantEvent,
    Identity,
};
use geodrop_zone::derive_status;
use geodrop_zone_models::{TokenAmount, ZoneId, ZoneStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use memory::InMemoryZoneStore;
pub use store::{CommitOutcome, CommitRequest, RecordedEntry, StoreError, ZoneStore};

/// Tunables for the claim path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Storage failures are retried this many times before
    /// [`ClaimError::ClaimFailed`].
    pub max_commit_retries: u32,
    /// Base of the linear backoff between retries.
    pub retry_backoff_millis: u64,
    /// Buffer size of the grant event channel.
    pub grant_channel_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_commit_retries: 3,
            retry_backoff_millis: 25,
            grant_channel_capacity: 1024,
        }
    }
}

enum AttemptError {
    Refused(ClaimError),
    Storage(StoreError),
}

impl From<StoreError> for AttemptError {
    fn from(value: StoreError) -> Self {
        Self::Storage(value)
    }
}

impl From<ClaimError> for AttemptError {
    fn from(value: ClaimError) -> Self {
        Self::Refused(value)
    }
}

/// Arbitrates claims and entry observations against a [`ZoneStore`].
#[derive(Clone)]
pub struct ClaimLedger {
    store: Arc<dyn ZoneStore>,
    config: LedgerConfig,
    grants: Option<mpsc::Sender<GrantEvent>>,
}

impl std::fmt::Debug for ClaimLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimLedger")
            .field("config", &self.config)
            .field("publishes_grants", &self.grants.is_some())
            .finish_non_exhaustive()
    }
}

impl ClaimLedger {
    /// A ledger that does not publish grant events.
    #[must_use]
    pub fn new(store: Arc<dyn ZoneStore>, config: LedgerConfig) -> Self {
        Self {
            store,
            config,
            grants: None,
        }
    }

    /// A ledger publishing grant events on a fresh channel of
    /// `config.grant_channel_capacity`. Returns the receiving half.
    #[must_use]
    pub fn with_grant_channel(
        store: Arc<dyn ZoneStore>,
        config: LedgerConfig,
    ) -> (Self, mpsc::Receiver<GrantEvent>) {
        let (tx, rx) = mpsc::channel(config.grant_channel_capacity.max(1));
        (
            Self {
                store,
                config,
                grants: Some(tx),
            },
            rx,
        )
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn ZoneStore> {
        &self.store
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Attempts to grant `zone_id`'s reward to `identity` observed at `at`.
    ///
    /// # Errors
    ///
    /// Returns the first failed check as a [`ClaimError`]. Storage failures
    /// re-run the whole validation up to `max_commit_retries` times before
    /// surfacing [`ClaimError::ClaimFailed`].
    pub async fn attempt_claim(
        &self,
        identity: &Identity,
        zone_id: &ZoneId,
        at: &UserLocation,
        now: DateTime<Utc>,
    ) -> Result<ClaimGrant, ClaimError> {
        let attempts = self.config.max_commit_retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.try_claim(identity, zone_id, at, now).await {
                Ok(grant) => {
                    log::info!(
                        "Granted {} {} to {identity} on zone {zone_id} ({} participants)",
                        grant.reward_amount,
                        grant.reward_currency,
                        grant.participants_after
                    );
                    self.publish(&grant).await;
                    return Ok(grant);
                }
                Err(AttemptError::Refused(e)) => {
                    log::debug!("Claim by {identity} on zone {zone_id} refused: {e}");
                    return Err(e);
                }
                Err(AttemptError::Storage(e)) => {
                    log::warn!(
                        "Claim by {identity} on zone {zone_id} hit a storage error (attempt {attempt}/{attempts}): {e}"
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        let backoff = self
                            .config
                            .retry_backoff_millis
                            .saturating_mul(u64::from(attempt));
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        log::error!("Claim by {identity} on zone {zone_id} failed after {attempts} attempts");
        Err(ClaimError::ClaimFailed {
            attempts,
            reason: last_error.map_or_else(String::new, |e| e.to_string()),
        })
    }

    async fn try_claim(
        &self,
        identity: &Identity,
        zone_id: &ZoneId,
        at: &UserLocation,
        now: DateTime<Utc>,
    ) -> Result<ClaimGrant, AttemptError> {
        let zone = self
            .store
            .load_zone(zone_id)
            .await?
            .ok_or_else(|| ClaimError::ZoneNotFound {
                zone_id: zone_id.clone(),
            })?;

        match derive_status(&zone, now) {
            ZoneStatus::Active => {}
            ZoneStatus::Completed => {
                let already = self
                    .store
                    .load_claim(identity, zone_id)
                    .await?
                    .is_some_and(|record| record.is_claimed());
                let refusal = if already {
                    ClaimError::AlreadyClaimed
                } else {
                    ClaimError::CapacityExceeded
                };
                return Err(refusal.into());
            }
            status => return Err(ClaimError::ZoneNotActive { status }.into()),
        }

        let distance = distance_meters(&at.point, &zone.center);
        if distance > zone.radius_meters {
            return Err(ClaimError::OutOfRange {
                distance_meters: distance,
                radius_meters: zone.radius_meters,
            }
            .into());
        }

        if self
            .store
            .load_claim(identity, zone_id)
            .await?
            .is_some_and(|record| record.is_claimed())
        {
            return Err(ClaimError::AlreadyClaimed.into());
        }

        let request = CommitRequest {
            identity: identity.clone(),
            zone_id: zone_id.clone(),
            claimed_at: now,
        };

        match self.store.commit_claim(&request).await? {
            CommitOutcome::Committed { participants_after } => Ok(ClaimGrant {
                granted: true,
                identity: request.identity,
                zone_id: request.zone_id,
                reward_amount: zone.reward.amount,
                reward_currency: zone.reward.currency,
                claimed_at: now,
                participants_after,
            }),
            CommitOutcome::AlreadyClaimed => Err(ClaimError::AlreadyClaimed.into()),
            CommitOutcome::CapacityExceeded => Err(ClaimError::CapacityExceeded.into()),
        }
    }

    async fn publish(&self, grant: &ClaimGrant) {
        let Some(tx) = &self.grants else {
            return;
        };
        if tx.send(GrantEvent::from(grant)).await.is_err() {
            log::warn!(
                "Grant channel closed; grant for {} on zone {} will not be settled",
                grant.identity,
                grant.zone_id
            );
        }
    }

    /// Records the first time `identity` is observed inside `zone_id`.
    ///
    /// Idempotent: a pre-existing `entered_at` is left untouched and
    /// reported as [`EntryOutcome::AlreadyEntered`]. Nothing is written
    /// unless the zone is active at `now` and `at` is inside the geofence.
    ///
    /// # Errors
    ///
    /// Returns [`EntryError`] if the zone does not exist or the store fails.
    pub async fn enter_zone(
        &self,
        identity: &Identity,
        zone_id: &ZoneId,
        at: &UserLocation,
        now: DateTime<Utc>,
    ) -> Result<EntryOutcome, EntryError> {
        let zone = self
            .store
            .load_zone(zone_id)
            .await
            .map_err(|e| EntryError::Storage(e.to_string()))?
            .ok_or_else(|| EntryError::ZoneNotFound {
                zone_id: zone_id.clone(),
            })?;

        let status = derive_status(&zone, now);
        if status != ZoneStatus::Active {
            return Ok(EntryOutcome::ZoneNotActive { status });
        }

        let distance = distance_meters(&at.point, &zone.center);
        if distance > zone.radius_meters {
            return Ok(EntryOutcome::OutsideRadius {
                distance_meters: distance,
                radius_meters: zone.radius_meters,
            });
        }

        let entry = self
            .store
            .record_entry(identity, zone_id, now)
            .await
            .map_err(|e| EntryError::Storage(e.to_string()))?;

        Ok(if entry.newly_recorded {
            log::debug!("{identity} entered zone {zone_id}");
            EntryOutcome::Entered {
                entered_at: entry.entered_at,
            }
        } else {
            EntryOutcome::AlreadyEntered {
                entered_at: entry.entered_at,
            }
        })
    }

    /// The ledger row for a pair, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    pub async fn claim_status(
        &self,
        identity: &Identity,
        zone_id: &ZoneId,
    ) -> Result<Option<ClaimRecord>, StoreError> {
        self.store.load_claim(identity, zone_id).await
    }

    /// Granted claims held by `identity`, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    pub async fn history(&self, identity: &Identity) -> Result<Vec<ClaimRecord>, StoreError> {
        let mut claims: Vec<ClaimRecord> = self
            .store
            .claims_for_identity(identity)
            .await?
            .into_iter()
            .filter(ClaimRecord::is_claimed)
            .collect();
        claims.sort_by(|a, b| b.claimed_at.cmp(&a.claimed_at));
        Ok(claims)
    }

    /// Every record held by `identity`, entry-only ones included, in zone
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    pub async fn statuses(&self, identity: &Identity) -> Result<Vec<ClaimRecord>, StoreError> {
        self.store.claims_for_identity(identity).await
    }

    /// Granted claims on `zone_id`, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown zone, or
    /// [`StoreError`] if the store fails.
    pub async fn zone_history(&self, zone_id: &ZoneId) -> Result<Vec<ClaimRecord>, StoreError> {
        let mut claims: Vec<ClaimRecord> = self
            .store
            .claims_for_zone(zone_id)
            .await?
            .into_iter()
            .filter(ClaimRecord::is_claimed)
            .collect();
        claims.sort_by(|a, b| {
            b.claimed_at
                .cmp(&a.claimed_at)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        Ok(claims)
    }

    /// Totals across every zone, with statuses derived at `now`.
    ///
    /// Tokens are summed from granted claim records rather than the
    /// participant counters, so an administrative reset does not hide
    /// rewards already handed out.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails or the token total
    /// overflows.
    pub async fn dashboard(&self, now: DateTime<Utc>) -> Result<DashboardStats, StoreError> {
        let zones = self.store.list_zones().await?;
        let mut participants = BTreeSet::new();
        let mut tokens = TokenAmount::ZERO;
        let mut active_zones = 0;

        for zone in &zones {
            if derive_status(zone, now) == ZoneStatus::Active {
                active_zones += 1;
            }
            for record in self.store.claims_for_zone(&zone.id).await? {
                if !record.is_claimed() {
                    continue;
                }
                tokens = tokens.checked_add(zone.reward.amount).ok_or_else(|| {
                    StoreError::Backend(format!("Token total overflows at zone {}", zone.id))
                })?;
                participants.insert(record.identity);
            }
        }

        Ok(DashboardStats {
            total_zones: zones.len(),
            active_zones,
            total_participants: participants.len(),
            total_tokens_distributed: tokens,
            evaluated_at: now,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use geodrop_geofence::GeoPoint;
    use geodrop_ledger_models::SettlementRecord;
    use geodrop_zone_models::{ActiveWindow, Reward, TokenAmount, Zone, ZoneMetadata};
    use std::sync::atomic::{AtomicU32, Ordering};

    pub(crate) const SOL: (f64, f64) = (40.4168, -3.7038);

    pub(crate) fn identity(value: &str) -> Identity {
        Identity::new(value).unwrap()
    }

    pub(crate) fn sol_zone(now: DateTime<Utc>, max_participants: u32) -> Zone {
        Zone {
            id: ZoneId::new("sol"),
            center: GeoPoint::new(SOL.0, SOL.1).unwrap(),
            radius_meters: 100.0,
            reward: Reward {
                amount: TokenAmount::whole(100),
                currency: "BTT".to_string(),
            },
            active_window: ActiveWindow {
                starts_at: now - ChronoDuration::hours(1),
                ends_at: now + ChronoDuration::hours(1),
            },
            max_participants,
            current_participants: 0,
            manually_disabled: false,
            metadata: ZoneMetadata::default(),
        }
    }

    /// A fix `meters` north of the Sol center.
    pub(crate) fn north_of_sol(meters: f64) -> UserLocation {
        let dlat = meters / geodrop_geofence::EARTH_RADIUS_METERS;
        UserLocation::new(
            GeoPoint::new(SOL.0 + dlat.to_degrees(), SOL.1).unwrap(),
            Utc::now().timestamp_millis(),
        )
    }

    fn ledger_with(zone: Zone) -> (ClaimLedger, Arc<InMemoryZoneStore>) {
        let store = Arc::new(InMemoryZoneStore::with_zones([zone]).unwrap());
        let config = LedgerConfig {
            retry_backoff_millis: 1,
            ..LedgerConfig::default()
        };
        (ClaimLedger::new(store.clone(), config), store)
    }

    async fn participants(store: &InMemoryZoneStore) -> u32 {
        store
            .load_zone(&ZoneId::new("sol"))
            .await
            .unwrap()
            .unwrap()
            .current_participants
    }

    #[tokio::test]
    async fn fresh_claim_increments_by_one() {
        let now = Utc::now();
        let (ledger, store) = ledger_with(sol_zone(now, 10));

        let grant = ledger
            .attempt_claim(&identity("0xa"), &ZoneId::new("sol"), &north_of_sol(10.0), now)
            .await
            .unwrap();

        assert!(grant.granted);
        assert_eq!(grant.participants_after, 1);
        assert_eq!(grant.reward_amount, TokenAmount::whole(100));
        assert_eq!(participants(&store).await, 1);

        let record = ledger
            .claim_status(&identity("0xa"), &ZoneId::new("sol"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.claimed_at, Some(now));
    }

    #[tokio::test]
    async fn unknown_zone_is_not_found() {
        let now = Utc::now();
        let (ledger, _) = ledger_with(sol_zone(now, 10));

        let err = ledger
            .attempt_claim(&identity("0xa"), &ZoneId::new("atocha"), &north_of_sol(0.0), now)
            .await
            .unwrap_err();

        assert!(matches!(err, ClaimError::ZoneNotFound { .. }));
    }

    #[tokio::test]
    async fn inactive_zones_are_refused() {
        let now = Utc::now();
        let mut upcoming = sol_zone(now, 10);
        upcoming.active_window.starts_at = now + ChronoDuration::minutes(5);
        upcoming.active_window.ends_at = now + ChronoDuration::hours(1);
        let (ledger, store) = ledger_with(upcoming);

        let err = ledger
            .attempt_claim(&identity("0xa"), &ZoneId::new("sol"), &north_of_sol(0.0), now)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ClaimError::ZoneNotActive {
                status: ZoneStatus::Upcoming
            }
        );
        assert_eq!(participants(&store).await, 0);
    }

    #[tokio::test]
    async fn out_of_range_leaves_counter_unchanged() {
        let now = Utc::now();
        let (ledger, store) = ledger_with(sol_zone(now, 10));

        let err = ledger
            .attempt_claim(&identity("0xa"), &ZoneId::new("sol"), &north_of_sol(150.0), now)
            .await
            .unwrap_err();

        match err {
            ClaimError::OutOfRange {
                distance_meters,
                radius_meters,
            } => {
                assert!((distance_meters - 150.0).abs() < 0.5);
                assert!((radius_meters - 100.0).abs() < f64::EPSILON);
            }
            other => panic!("expected OutOfRange, got {other:?}"),
        }
        assert_eq!(participants(&store).await, 0);
        assert!(
            ledger
                .claim_status(&identity("0xa"), &ZoneId::new("sol"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn second_claim_is_already_claimed() {
        let now = Utc::now();
        let (ledger, store) = ledger_with(sol_zone(now, 10));
        let who = identity("0xa");
        let sol = ZoneId::new("sol");

        ledger
            .attempt_claim(&who, &sol, &north_of_sol(5.0), now)
            .await
            .unwrap();
        let err = ledger
            .attempt_claim(&who, &sol, &north_of_sol(5.0), now + ChronoDuration::seconds(1))
            .await
            .unwrap_err();

        assert_eq!(err, ClaimError::AlreadyClaimed);
        assert_eq!(participants(&store).await, 1);
    }

    #[tokio::test]
    async fn full_zone_reports_capacity_exceeded() {
        let now = Utc::now();
        let mut zone = sol_zone(now, 2);
        zone.current_participants = 2;
        let (ledger, store) = ledger_with(zone);

        let err = ledger
            .attempt_claim(&identity("0xc"), &ZoneId::new("sol"), &north_of_sol(1.0), now)
            .await
            .unwrap_err();

        assert_eq!(err, ClaimError::CapacityExceeded);
        assert_eq!(participants(&store).await, 2);
        assert!(ledger.history(&identity("0xc")).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_claims_grant_once() {
        let now = Utc::now();
        let (ledger, store) = ledger_with(sol_zone(now, 10));
        let ledger = Arc::new(ledger);

        let handles = (0..8).map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .attempt_claim(&identity("0xa"), &ZoneId::new("sol"), &north_of_sol(10.0), now)
                    .await
            })
        });
        let results: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| *e == ClaimError::AlreadyClaimed)
        );
        assert_eq!(participants(&store).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_identities_never_exceed_capacity() {
        let now = Utc::now();
        let (ledger, store) = ledger_with(sol_zone(now, 5));
        let ledger = Arc::new(ledger);

        let handles = (0..32).map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .attempt_claim(
                        &identity(&format!("0x{i:02}")),
                        &ZoneId::new("sol"),
                        &north_of_sol(20.0),
                        now,
                    )
                    .await
            })
        });
        let results: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 5);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| *e == ClaimError::CapacityExceeded)
        );
        assert_eq!(participants(&store).await, 5);
    }

    #[tokio::test]
    async fn last_slot_goes_to_first_valid_claimant() {
        let now = Utc::now();
        let (ledger, store) = ledger_with(sol_zone(now, 1));
        let sol = ZoneId::new("sol");

        let a = ledger
            .attempt_claim(&identity("A"), &sol, &north_of_sol(50.0), now)
            .await
            .unwrap();
        assert_eq!(a.participants_after, 1);

        let b = ledger
            .attempt_claim(&identity("B"), &sol, &north_of_sol(40.0), now)
            .await
            .unwrap_err();
        assert_eq!(b, ClaimError::CapacityExceeded);

        let again = ledger
            .attempt_claim(&identity("A"), &sol, &north_of_sol(50.0), now)
            .await
            .unwrap_err();
        assert_eq!(again, ClaimError::AlreadyClaimed);
        assert_eq!(participants(&store).await, 1);
    }

    /// Fails every commit with a conflict.
    struct ContendedStore {
        inner: InMemoryZoneStore,
        commits: AtomicU32,
    }

    #[async_trait]
    impl ZoneStore for ContendedStore {
        async fn load_zone(&self, zone_id: &ZoneId) -> Result<Option<Zone>, StoreError> {
            self.inner.load_zone(zone_id).await
        }
        async fn list_zones(&self) -> Result<Vec<Zone>, StoreError> {
            self.inner.list_zones().await
        }
        async fn load_claim(
            &self,
            identity: &Identity,
            zone_id: &ZoneId,
        ) -> Result<Option<ClaimRecord>, StoreError> {
            self.inner.load_claim(identity, zone_id).await
        }
        async fn claims_for_identity(
            &self,
            identity: &Identity,
        ) -> Result<Vec<ClaimRecord>, StoreError> {
            self.inner.claims_for_identity(identity).await
        }
        async fn claims_for_zone(&self, zone_id: &ZoneId) -> Result<Vec<ClaimRecord>, StoreError> {
            self.inner.claims_for_zone(zone_id).await
        }
        async fn record_entry(
            &self,
            identity: &Identity,
            zone_id: &ZoneId,
            entered_at: DateTime<Utc>,
        ) -> Result<RecordedEntry, StoreError> {
            self.inner.record_entry(identity, zone_id, entered_at).await
        }
        async fn commit_claim(&self, _request: &CommitRequest) -> Result<CommitOutcome, StoreError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Conflict("database is locked".to_string()))
        }
        async fn record_settlement(
            &self,
            identity: &Identity,
            zone_id: &ZoneId,
            settlement: SettlementRecord,
        ) -> Result<(), StoreError> {
            self.inner
                .record_settlement(identity, zone_id, settlement)
                .await
        }
        async fn upsert_zone(&self, zone: Zone) -> Result<(), StoreError> {
            self.inner.upsert_zone(zone).await
        }
        async fn delete_zone(&self, zone_id: &ZoneId) -> Result<bool, StoreError> {
            self.inner.delete_zone(zone_id).await
        }
        async fn reset_participants(&self, zone_id: &ZoneId) -> Result<(), StoreError> {
            self.inner.reset_participants(zone_id).await
        }
    }

    #[tokio::test]
    async fn storage_conflicts_are_retried_then_fail() {
        let now = Utc::now();
        let store = Arc::new(ContendedStore {
            inner: InMemoryZoneStore::with_zones([sol_zone(now, 10)]).unwrap(),
            commits: AtomicU32::new(0),
        });
        let ledger = ClaimLedger::new(
            store.clone(),
            LedgerConfig {
                max_commit_retries: 2,
                retry_backoff_millis: 1,
                ..LedgerConfig::default()
            },
        );

        let err = ledger
            .attempt_claim(&identity("0xa"), &ZoneId::new("sol"), &north_of_sol(0.0), now)
            .await
            .unwrap_err();

        assert!(matches!(err, ClaimError::ClaimFailed { attempts: 3, .. }));
        assert_eq!(store.commits.load(Ordering::SeqCst), 3);
        assert_eq!(
            store
                .inner
                .load_zone(&ZoneId::new("sol"))
                .await
                .unwrap()
                .unwrap()
                .current_participants,
            0
        );
    }

    #[tokio::test]
    async fn grants_are_published_after_commit() {
        let now = Utc::now();
        let store: Arc<dyn ZoneStore> =
            Arc::new(InMemoryZoneStore::with_zones([sol_zone(now, 10)]).unwrap());
        let (ledger, mut rx) = ClaimLedger::with_grant_channel(store, LedgerConfig::default());

        ledger
            .attempt_claim(&identity("0xa"), &ZoneId::new("sol"), &north_of_sol(0.0), now)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.identity, identity("0xa"));
        assert_eq!(event.claimed_at, now);
    }

    #[tokio::test]
    async fn closed_grant_channel_does_not_undo_grant() {
        let now = Utc::now();
        let store: Arc<dyn ZoneStore> =
            Arc::new(InMemoryZoneStore::with_zones([sol_zone(now, 10)]).unwrap());
        let (ledger, rx) = ClaimLedger::with_grant_channel(store, LedgerConfig::default());
        drop(rx);

        let grant = ledger
            .attempt_claim(&identity("0xa"), &ZoneId::new("sol"), &north_of_sol(0.0), now)
            .await
            .unwrap();

        assert_eq!(grant.participants_after, 1);
    }

    #[tokio::test]
    async fn entry_is_write_once() {
        let now = Utc::now();
        let (ledger, _) = ledger_with(sol_zone(now, 10));
        let who = identity("0xa");
        let sol = ZoneId::new("sol");

        let outside = ledger
            .enter_zone(&who, &sol, &north_of_sol(500.0), now)
            .await
            .unwrap();
        assert!(matches!(outside, EntryOutcome::OutsideRadius { .. }));
        assert!(ledger.claim_status(&who, &sol).await.unwrap().is_none());

        let first = ledger
            .enter_zone(&who, &sol, &north_of_sol(10.0), now)
            .await
            .unwrap();
        assert_eq!(first, EntryOutcome::Entered { entered_at: now });

        let later = now + ChronoDuration::minutes(3);
        let second = ledger
            .enter_zone(&who, &sol, &north_of_sol(10.0), later)
            .await
            .unwrap();
        assert_eq!(second, EntryOutcome::AlreadyEntered { entered_at: now });

        ledger
            .attempt_claim(&who, &sol, &north_of_sol(10.0), later)
            .await
            .unwrap();
        let record = ledger.claim_status(&who, &sol).await.unwrap().unwrap();
        assert_eq!(record.entered_at, Some(now));
        assert_eq!(record.claimed_at, Some(later));
    }

    #[tokio::test]
    async fn history_lists_granted_claims_newest_first() {
        let now = Utc::now();
        let mut retiro = sol_zone(now, 0);
        retiro.id = ZoneId::new("retiro");
        let store = Arc::new(InMemoryZoneStore::with_zones([sol_zone(now, 0), retiro]).unwrap());
        let ledger = ClaimLedger::new(store, LedgerConfig::default());
        let who = identity("0xa");

        ledger
            .attempt_claim(&who, &ZoneId::new("sol"), &north_of_sol(0.0), now)
            .await
            .unwrap();
        ledger
            .attempt_claim(
                &who,
                &ZoneId::new("retiro"),
                &north_of_sol(0.0),
                now + ChronoDuration::seconds(5),
            )
            .await
            .unwrap();
        ledger
            .enter_zone(&identity("0xb"), &ZoneId::new("sol"), &north_of_sol(0.0), now)
            .await
            .unwrap();

        let history = ledger.history(&who).await.unwrap();
        let zones: Vec<&str> = history.iter().map(|r| r.zone_id.as_str()).collect();
        assert_eq!(zones, vec!["retiro", "sol"]);
        assert!(ledger.history(&identity("0xb")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn entry_requires_an_active_zone() {
        let now = Utc::now();
        let mut upcoming = sol_zone(now, 10);
        upcoming.active_window.starts_at = now + ChronoDuration::minutes(5);
        let (ledger, _) = ledger_with(upcoming);
        let who = identity("0xa");
        let sol = ZoneId::new("sol");

        let outcome = ledger
            .enter_zone(&who, &sol, &north_of_sol(10.0), now)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            EntryOutcome::ZoneNotActive {
                status: ZoneStatus::Upcoming
            }
        );
        assert!(ledger.claim_status(&who, &sol).await.unwrap().is_none());

        let mut full = sol_zone(now, 1);
        full.current_participants = 1;
        let (ledger, _) = ledger_with(full);
        let outcome = ledger
            .enter_zone(&who, &sol, &north_of_sol(10.0), now)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            EntryOutcome::ZoneNotActive {
                status: ZoneStatus::Completed
            }
        );
        assert!(ledger.statuses(&who).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_admin_write_keeps_the_participant_count() {
        let now = Utc::now();
        let (ledger, store) = ledger_with(sol_zone(now, 1));
        let sol = ZoneId::new("sol");

        let mut edited = store.load_zone(&sol).await.unwrap().unwrap();
        ledger
            .attempt_claim(&identity("A"), &sol, &north_of_sol(10.0), now)
            .await
            .unwrap();

        edited.metadata.name = "Puerta del Sol".to_string();
        store.upsert_zone(edited).await.unwrap();

        let stored = store.load_zone(&sol).await.unwrap().unwrap();
        assert_eq!(stored.current_participants, 1);
        assert_eq!(stored.metadata.name, "Puerta del Sol");
        assert_eq!(
            ledger
                .attempt_claim(&identity("B"), &sol, &north_of_sol(10.0), now)
                .await
                .unwrap_err(),
            ClaimError::CapacityExceeded
        );
        assert_eq!(ledger.zone_history(&sol).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn capacity_cannot_shrink_below_the_participant_count() {
        let now = Utc::now();
        let (ledger, store) = ledger_with(sol_zone(now, 5));
        let sol = ZoneId::new("sol");
        for who in ["A", "B", "C"] {
            ledger
                .attempt_claim(&identity(who), &sol, &north_of_sol(10.0), now)
                .await
                .unwrap();
        }

        let err = store.upsert_zone(sol_zone(now, 2)).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(
                geodrop_zone_models::ZoneValidationError::ParticipantsOverCapacity {
                    current: 3,
                    max: 2,
                    ..
                }
            )
        ));
        assert_eq!(
            store.load_zone(&sol).await.unwrap().unwrap().max_participants,
            5
        );

        store.upsert_zone(sol_zone(now, 3)).await.unwrap();
        assert_eq!(participants(&store).await, 3);

        store.reset_participants(&sol).await.unwrap();
        assert_eq!(participants(&store).await, 0);
    }

    #[tokio::test]
    async fn statuses_include_entry_only_records() {
        let now = Utc::now();
        let mut retiro = sol_zone(now, 0);
        retiro.id = ZoneId::new("retiro");
        let store = Arc::new(InMemoryZoneStore::with_zones([sol_zone(now, 0), retiro]).unwrap());
        let ledger = ClaimLedger::new(store, LedgerConfig::default());
        let who = identity("0xa");

        ledger
            .enter_zone(&who, &ZoneId::new("sol"), &north_of_sol(0.0), now)
            .await
            .unwrap();
        ledger
            .attempt_claim(&who, &ZoneId::new("retiro"), &north_of_sol(0.0), now)
            .await
            .unwrap();

        let statuses = ledger.statuses(&who).await.unwrap();
        let zones: Vec<(&str, bool)> = statuses
            .iter()
            .map(|r| (r.zone_id.as_str(), r.is_claimed()))
            .collect();
        assert_eq!(zones, vec![("sol", false), ("retiro", true)]);
        assert_eq!(ledger.history(&who).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zone_history_lists_granted_claims_newest_first() {
        let now = Utc::now();
        let (ledger, _) = ledger_with(sol_zone(now, 0));
        let sol = ZoneId::new("sol");

        ledger
            .attempt_claim(&identity("0xa"), &sol, &north_of_sol(0.0), now)
            .await
            .unwrap();
        ledger
            .attempt_claim(
                &identity("0xb"),
                &sol,
                &north_of_sol(0.0),
                now + ChronoDuration::seconds(5),
            )
            .await
            .unwrap();
        ledger
            .enter_zone(&identity("0xc"), &sol, &north_of_sol(0.0), now)
            .await
            .unwrap();

        let history = ledger.zone_history(&sol).await.unwrap();
        let who: Vec<&str> = history.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(who, vec!["0xb", "0xa"]);

        assert!(matches!(
            ledger.zone_history(&ZoneId::new("atocha")).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn dashboard_totals_granted_claims() {
        let now = Utc::now();
        let mut retiro = sol_zone(now, 0);
        retiro.id = ZoneId::new("retiro");
        retiro.reward.amount = "12.5".parse().unwrap();
        let mut later = sol_zone(now, 0);
        later.id = ZoneId::new("later");
        later.active_window.starts_at = now + ChronoDuration::hours(1);
        later.active_window.ends_at = now + ChronoDuration::hours(2);
        let store = Arc::new(
            InMemoryZoneStore::with_zones([sol_zone(now, 0), retiro, later]).unwrap(),
        );
        let ledger = ClaimLedger::new(store.clone(), LedgerConfig::default());

        for (who, zone) in [("0xa", "sol"), ("0xa", "retiro"), ("0xb", "sol")] {
            ledger
                .attempt_claim(&identity(who), &ZoneId::new(zone), &north_of_sol(0.0), now)
                .await
                .unwrap();
        }
        ledger
            .enter_zone(&identity("0xc"), &ZoneId::new("sol"), &north_of_sol(0.0), now)
            .await
            .unwrap();
        store.reset_participants(&ZoneId::new("sol")).await.unwrap();

        let stats = ledger.dashboard(now).await.unwrap();
        assert_eq!(stats.total_zones, 3);
        assert_eq!(stats.active_zones, 2);
        assert_eq!(stats.total_participants, 2);
        assert_eq!(stats.total_tokens_distributed.to_string(), "212.5");
        assert_eq!(stats.evaluated_at, now);
    }
}
