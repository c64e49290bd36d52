//! In-process [`ZoneStore`].
//!
//! Each zone and its claim records live behind their own mutex, so a
//! commit is a single critical section and different zones never contend.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geodrop_ledger_models::{ClaimRecord, Identity, SettlementRecord};
use geodrop_zone_models::{Zone, ZoneId};

use crate::store::{CommitOutcome, CommitRequest, RecordedEntry, StoreError, ZoneStore};

#[derive(Debug)]
struct ZoneSlot {
    zone: Zone,
    claims: BTreeMap<Identity, ClaimRecord>,
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    slot: Arc<Mutex<ZoneSlot>>,
}

#[derive(Debug, Default)]
struct Index {
    next_seq: u64,
    zones: BTreeMap<ZoneId, Entry>,
}

/// A [`ZoneStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryZoneStore {
    index: RwLock<Index>,
}

impl InMemoryZoneStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `zones`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] if any zone is invalid.
    pub fn with_zones(zones: impl IntoIterator<Item = Zone>) -> Result<Self, StoreError> {
        let store = Self::new();
        for zone in zones {
            store.insert(zone)?;
        }
        Ok(store)
    }

    fn insert(&self, zone: Zone) -> Result<(), StoreError> {
        zone.validate()?;
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = index.zones.get(&zone.id) {
            let mut slot = entry.slot.lock().unwrap_or_else(PoisonError::into_inner);
            // The stored counter is owned by commits and resets.
            let zone = Zone {
                current_participants: slot.zone.current_participants,
                ..zone
            };
            zone.validate()?;
            slot.zone = zone;
            return Ok(());
        }

        let seq = index.next_seq;
        index.next_seq += 1;
        index.zones.insert(
            zone.id.clone(),
            Entry {
                seq,
                slot: Arc::new(Mutex::new(ZoneSlot {
                    zone,
                    claims: BTreeMap::new(),
                })),
            },
        );
        Ok(())
    }

    fn slot(&self, zone_id: &ZoneId) -> Option<Arc<Mutex<ZoneSlot>>> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .zones
            .get(zone_id)
            .map(|entry| entry.slot.clone())
    }

    fn slots_in_order(&self) -> Vec<Arc<Mutex<ZoneSlot>>> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<&Entry> = index.zones.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.slot.clone()).collect()
    }

    fn require_slot(&self, zone_id: &ZoneId) -> Result<Arc<Mutex<ZoneSlot>>, StoreError> {
        self.slot(zone_id).ok_or_else(|| StoreError::NotFound {
            zone_id: zone_id.clone(),
        })
    }
}

#[async_trait]
impl ZoneStore for InMemoryZoneStore {
    async fn load_zone(&self, zone_id: &ZoneId) -> Result<Option<Zone>, StoreError> {
        Ok(self.slot(zone_id).map(|slot| {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .zone
                .clone()
        }))
    }

    async fn list_zones(&self) -> Result<Vec<Zone>, StoreError> {
        Ok(self
            .slots_in_order()
            .iter()
            .map(|slot| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .zone
                    .clone()
            })
            .collect())
    }

    async fn load_claim(
        &self,
        identity: &Identity,
        zone_id: &ZoneId,
    ) -> Result<Option<ClaimRecord>, StoreError> {
        Ok(self.slot(zone_id).and_then(|slot| {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .claims
                .get(identity)
                .cloned()
        }))
    }

    async fn claims_for_identity(
        &self,
        identity: &Identity,
    ) -> Result<Vec<ClaimRecord>, StoreError> {
        Ok(self
            .slots_in_order()
            .iter()
            .filter_map(|slot| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .claims
                    .get(identity)
                    .cloned()
            })
            .collect())
    }

    async fn claims_for_zone(&self, zone_id: &ZoneId) -> Result<Vec<ClaimRecord>, StoreError> {
        let slot = self.require_slot(zone_id)?;
        let slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slot.claims.values().cloned().collect())
    }

    async fn record_entry(
        &self,
        identity: &Identity,
        zone_id: &ZoneId,
        entered_at: DateTime<Utc>,
    ) -> Result<RecordedEntry, StoreError> {
        let slot = self.require_slot(zone_id)?;
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);

        let record = slot
            .claims
            .entry(identity.clone())
            .or_insert_with(|| ClaimRecord::new(identity.clone(), zone_id.clone()));

        Ok(match record.entered_at {
            Some(existing) => RecordedEntry {
                entered_at: existing,
                newly_recorded: false,
            },
            None => {
                record.entered_at = Some(entered_at);
                RecordedEntry {
                    entered_at,
                    newly_recorded: true,
                }
            }
        })
    }

    async fn commit_claim(&self, request: &CommitRequest) -> Result<CommitOutcome, StoreError> {
        let slot = self.require_slot(&request.zone_id)?;
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if slot
            .claims
            .get(&request.identity)
            .is_some_and(ClaimRecord::is_claimed)
        {
            return Ok(CommitOutcome::AlreadyClaimed);
        }
        if slot.zone.is_full() {
            return Ok(CommitOutcome::CapacityExceeded);
        }

        let ZoneSlot { zone, claims } = &mut *slot;
        zone.current_participants += 1;
        claims
            .entry(request.identity.clone())
            .or_insert_with(|| ClaimRecord::new(request.identity.clone(), request.zone_id.clone()))
            .claimed_at = Some(request.claimed_at);

        Ok(CommitOutcome::Committed {
            participants_after: zone.current_participants,
        })
    }

    async fn record_settlement(
        &self,
        identity: &Identity,
        zone_id: &ZoneId,
        settlement: SettlementRecord,
    ) -> Result<(), StoreError> {
        let slot = self.require_slot(zone_id)?;
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);

        let record = slot
            .claims
            .get_mut(identity)
            .ok_or_else(|| StoreError::Backend(format!("No claim by {identity} on {zone_id}")))?;
        record.settlement = Some(settlement);
        Ok(())
    }

    async fn upsert_zone(&self, zone: Zone) -> Result<(), StoreError> {
        self.insert(zone)
    }

    async fn delete_zone(&self, zone_id: &ZoneId) -> Result<bool, StoreError> {
        Ok(self
            .index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .zones
            .remove(zone_id)
            .is_some())
    }

    async fn reset_participants(&self, zone_id: &ZoneId) -> Result<(), StoreError> {
        let slot = self.require_slot(zone_id)?;
        slot.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .zone
            .current_participants = 0;
        Ok(())
    }
}
