#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Periodic re-evaluation of zone statuses.
//!
//! The scheduler reads the full zone set, derives every status at a single
//! instant, and publishes the result as an immutable [`ZoneSnapshot`] on a
//! `watch` channel. It never writes to the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use geodrop_ledger::{StoreError, ZoneStore};
use geodrop_zone::{ZoneView, evaluate_all};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default refresh period (30 seconds).
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30;

/// Scheduler tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between automatic refreshes.
    pub refresh_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
        }
    }
}

/// Every zone with its status, all derived at `evaluated_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSnapshot {
    /// The single instant used for every derivation.
    pub evaluated_at: DateTime<Utc>,
    /// Zones in store order.
    pub zones: Vec<ZoneView>,
}

impl ZoneSnapshot {
    /// A snapshot with no zones.
    #[must_use]
    pub const fn empty(evaluated_at: DateTime<Utc>) -> Self {
        Self {
            evaluated_at,
            zones: Vec::new(),
        }
    }
}

/// Publishes fresh [`ZoneSnapshot`]s on a timer and on demand.
pub struct ZoneRefreshScheduler {
    store: Arc<dyn ZoneStore>,
    config: SchedulerConfig,
    snapshots: watch::Sender<Arc<ZoneSnapshot>>,
    trigger: Notify,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ZoneRefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneRefreshScheduler")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ZoneRefreshScheduler {
    /// A scheduler with an empty initial snapshot. Nothing runs until
    /// [`Self::run`] or [`Self::spawn`].
    #[must_use]
    pub fn new(store: Arc<dyn ZoneStore>, config: SchedulerConfig) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(ZoneSnapshot::empty(Utc::now())));
        Self {
            store,
            config,
            snapshots,
            trigger: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// The most recently published snapshot.
    #[must_use]
    pub fn latest(&self) -> Arc<ZoneSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// A receiver notified on every publish.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ZoneSnapshot>> {
        self.snapshots.subscribe()
    }

    /// Requests an out-of-band refresh from the running loop.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stops future ticks. A refresh already in progress still completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Reads the store, derives every status at one instant, and publishes.
    ///
    /// Returns the snapshot that is current afterwards. When a concurrent
    /// refresh already published a later one, that one is kept and
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store read fails. The previously
    /// published snapshot is left in place.
    pub async fn refresh_now(&self) -> Result<Arc<ZoneSnapshot>, StoreError> {
        let zones = self.store.list_zones().await?;
        let now = Utc::now();
        let snapshot = Arc::new(ZoneSnapshot {
            evaluated_at: now,
            zones: evaluate_all(zones, now),
        });

        if self.publish(snapshot.clone()) {
            log::debug!("Published snapshot of {} zones at {now}", snapshot.zones.len());
            Ok(snapshot)
        } else {
            log::debug!("Dropped snapshot from {now}, a later one is already published");
            Ok(self.latest())
        }
    }

    /// Replaces the published snapshot unless it is older than the
    /// current one. Returns whether it was published.
    fn publish(&self, snapshot: Arc<ZoneSnapshot>) -> bool {
        self.snapshots.send_if_modified(|current| {
            if snapshot.evaluated_at < current.evaluated_at {
                return false;
            }
            *current = snapshot;
            true
        })
    }

    async fn refresh_logged(&self) {
        if let Err(e) = self.refresh_now().await {
            log::error!("Zone refresh failed, keeping previous snapshot: {e}");
        }
    }

    /// Refreshes every `refresh_interval_secs` (starting immediately) and
    /// on each [`Self::trigger`], until cancelled.
    pub async fn run(&self) {
        let period = Duration::from_secs(self.config.refresh_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!("Zone refresh scheduler started (every {period:?})");

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    log::info!("Zone refresh scheduler cancelled");
                    break;
                }

                () = self.trigger.notified() => {
                    log::debug!("Manual zone refresh triggered");
                    self.refresh_logged().await;
                }

                _ = ticker.tick() => {
                    self.refresh_logged().await;
                }
            }
        }
    }

    /// Runs [`Self::run`] on a tokio task.
    #[must_use]
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run().await })
    }
}
