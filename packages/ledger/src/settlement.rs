//! Hands committed grants to the external settlement collaborator.
//!
//! The dispatcher only consumes [`GrantEvent`]s emitted after commits and
//! stores whatever the collaborator reports. A failed settlement never
//! revokes a grant.

use std::sync::Arc;

use async_trait::async_trait;
use geodrop_ledger_models::{GrantEvent, SettlementRecord, SettlementStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::store::ZoneStore;

/// Errors reported by a [`SettlementClient`].
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    /// The collaborator refused the transfer.
    #[error("Settlement rejected: {0}")]
    Rejected(String),

    /// The collaborator could not be reached.
    #[error("Settlement unavailable: {0}")]
    Unavailable(String),
}

/// The token transfer collaborator.
#[async_trait]
pub trait SettlementClient: Send + Sync {
    /// Transfers the grant's reward. Returns a transaction reference.
    async fn settle(&self, grant: &GrantEvent) -> Result<String, SettlementError>;
}

/// Logs each grant and issues a random reference. Stands in for a real
/// chain integration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSettlementClient;

#[async_trait]
impl SettlementClient for LoggingSettlementClient {
    async fn settle(&self, grant: &GrantEvent) -> Result<String, SettlementError> {
        let reference = format!("0x{}", uuid::Uuid::new_v4().simple());
        log::info!(
            "Settled {} {} to {} for zone {} ({reference})",
            grant.reward_amount,
            grant.reward_currency,
            grant.identity,
            grant.zone_id,
        );
        Ok(reference)
    }
}

/// Settles one grant and records the outcome.
pub async fn settle_grant(client: &dyn SettlementClient, store: &dyn ZoneStore, grant: &GrantEvent) {
    let status = match client.settle(grant).await {
        Ok(reference) => SettlementStatus::Settled { reference },
        Err(e) => {
            log::warn!(
                "Settlement failed for {} on zone {}: {e}",
                grant.identity,
                grant.zone_id
            );
            SettlementStatus::Failed {
                reason: e.to_string(),
            }
        }
    };

    let record = SettlementRecord {
        status,
        recorded_at: chrono::Utc::now(),
    };

    if let Err(e) = store
        .record_settlement(&grant.identity, &grant.zone_id, record)
        .await
    {
        log::error!(
            "Failed to record settlement for {} on zone {}: {e}",
            grant.identity,
            grant.zone_id
        );
    }
}

/// Consumes grant events until every sender is dropped or `cancel` fires.
///
/// On cancel the channel is closed and the grants already queued are
/// still settled before returning.
pub async fn run_settlement_dispatcher(
    mut grants: mpsc::Receiver<GrantEvent>,
    client: Arc<dyn SettlementClient>,
    store: Arc<dyn ZoneStore>,
    cancel: CancellationToken,
) {
    log::info!("Settlement dispatcher started");

    loop {
        tokio::select! {
            event = grants.recv() => {
                let Some(grant) = event else {
                    log::info!("Grant channel closed, settlement dispatcher exiting");
                    return;
                };
                settle_grant(client.as_ref(), store.as_ref(), &grant).await;
            }

            () = cancel.cancelled() => {
                log::info!("Settlement dispatcher cancelled, draining queued grants");
                break;
            }
        }
    }

    grants.close();
    let mut drained = 0_usize;
    while let Some(grant) = grants.recv().await {
        settle_grant(client.as_ref(), store.as_ref(), &grant).await;
        drained += 1;
    }
    log::info!("Settlement dispatcher stopped after draining {drained} grants");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryZoneStore;
    use crate::store::CommitRequest;
    use crate::tests::{identity, sol_zone};
    use chrono::Utc;
    use geodrop_zone_models::TokenAmount;

    struct RejectingClient;

    #[async_trait]
    impl SettlementClient for RejectingClient {
        async fn settle(&self, _grant: &GrantEvent) -> Result<String, SettlementError> {
            Err(SettlementError::Rejected("insufficient treasury".to_string()))
        }
    }

    async fn committed_grant(store: &InMemoryZoneStore) -> GrantEvent {
        let now = Utc::now();
        let zone = sol_zone(now, 10);
        let zone_id = zone.id.clone();
        store.upsert_zone(zone).await.unwrap();
        store
            .commit_claim(&CommitRequest {
                identity: identity("0xa"),
                zone_id: zone_id.clone(),
                claimed_at: now,
            })
            .await
            .unwrap();

        GrantEvent {
            identity: identity("0xa"),
            zone_id,
            reward_amount: TokenAmount::whole(100),
            reward_currency: "BTT".to_string(),
            claimed_at: now,
        }
    }

    #[tokio::test]
    async fn dispatcher_records_settled_reference() {
        let store = Arc::new(InMemoryZoneStore::new());
        let grant = committed_grant(&store).await;
        let (tx, rx) = mpsc::channel(4);

        tx.send(grant.clone()).await.unwrap();
        drop(tx);

        run_settlement_dispatcher(
            rx,
            Arc::new(LoggingSettlementClient),
            store.clone(),
            CancellationToken::new(),
        )
        .await;

        let record = store
            .load_claim(&grant.identity, &grant.zone_id)
            .await
            .unwrap()
            .unwrap();
        let settlement = record.settlement.unwrap();
        assert!(matches!(
            settlement.status,
            SettlementStatus::Settled { ref reference } if reference.starts_with("0x") && reference.len() == 34
        ));
        assert!(record.claimed_at.is_some());
    }

    #[tokio::test]
    async fn failed_settlement_keeps_the_grant() {
        let store = InMemoryZoneStore::new();
        let grant = committed_grant(&store).await;

        settle_grant(&RejectingClient, &store, &grant).await;

        let record = store
            .load_claim(&grant.identity, &grant.zone_id)
            .await
            .unwrap()
            .unwrap();
        assert!(record.is_claimed());
        assert_eq!(
            record.settlement.unwrap().status,
            SettlementStatus::Failed {
                reason: "Settlement rejected: insufficient treasury".to_string()
            }
        );
    }

    #[tokio::test]
    async fn dispatcher_stops_on_cancel() {
        let (_tx, rx) = mpsc::channel::<GrantEvent>(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_settlement_dispatcher(
            rx,
            Arc::new(LoggingSettlementClient),
            Arc::new(InMemoryZoneStore::new()),
            cancel.clone(),
        ));

        cancel.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_still_settles_queued_grants() {
        let now = Utc::now();
        let store = Arc::new(InMemoryZoneStore::with_zones([sol_zone(now, 0)]).unwrap());
        let (tx, rx) = mpsc::channel(64);

        let mut queued = Vec::new();
        for i in 0..50 {
            let who = identity(&format!("0x{i:02}"));
            let zone_id = geodrop_zone_models::ZoneId::new("sol");
            store
                .commit_claim(&CommitRequest {
                    identity: who.clone(),
                    zone_id: zone_id.clone(),
                    claimed_at: now,
                })
                .await
                .unwrap();
            let grant = GrantEvent {
                identity: who,
                zone_id,
                reward_amount: TokenAmount::whole(100),
                reward_currency: "BTT".to_string(),
                claimed_at: now,
            };
            tx.send(grant.clone()).await.unwrap();
            queued.push(grant);
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            run_settlement_dispatcher(
                rx,
                Arc::new(LoggingSettlementClient),
                store.clone(),
                cancel,
            ),
        )
        .await
        .unwrap();

        for grant in &queued {
            let record = store
                .load_claim(&grant.identity, &grant.zone_id)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(
                record.settlement.map(|s| s.status),
                Some(SettlementStatus::Settled { .. })
            ));
        }

        // The sender outlives the dispatcher but can no longer queue work.
        assert!(tx.send(queued[0].clone()).await.is_err());
    }
}
