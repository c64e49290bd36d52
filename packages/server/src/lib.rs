#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the geodrop zone engine.
//!
//! Zone listings are served from the refresh scheduler's latest snapshot.
//! Claims and entries go straight to the [`ClaimLedger`]. Grants are
//! settled in the background by a dispatcher task that lives as long as
//! the server.

mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use geodrop_config::EngineConfig;
use geodrop_database::{DbError, SqliteZoneStore};
use geodrop_ledger::settlement::{LoggingSettlementClient, run_settlement_dispatcher};
use geodrop_ledger::{ClaimLedger, ZoneStore};
use geodrop_proximity::Ranker;
use geodrop_scheduler::ZoneRefreshScheduler;
use tokio_util::sync::CancellationToken;

/// Errors that stop the server from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The store could not be opened.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Binding or serving failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shared application state.
pub struct AppState {
    /// Claim arbitration over the backing store.
    pub ledger: ClaimLedger,
    /// Source of zone listings.
    pub scheduler: Arc<ZoneRefreshScheduler>,
    /// Ranking views.
    pub ranker: Ranker,
}

/// Registers every `/api` route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/zones", web::get().to(handlers::zones))
            .route("/zones/active", web::get().to(handlers::active_zones))
            .route("/zones/nearby", web::get().to(handlers::nearby_zones))
            .route("/zones/containing", web::get().to(handlers::containing_zones))
            .route("/zones/refresh", web::post().to(handlers::refresh))
            .route("/zones/{id}", web::get().to(handlers::zone))
            .route("/zones/{id}/claim", web::post().to(handlers::claim))
            .route("/zones/{id}/enter", web::post().to(handlers::enter))
            .route("/zones/{id}/history", web::get().to(handlers::zone_history))
            .route("/zones/{id}/check", web::get().to(handlers::check_zone_location))
            .route("/users/{identity}/statuses", web::get().to(handlers::statuses))
            .route("/analytics/dashboard", web::get().to(handlers::dashboard))
            .route("/claims/{identity}", web::get().to(handlers::history))
            .route(
                "/claims/{identity}/{zone_id}",
                web::get().to(handlers::claim_status),
            ),
    );
}

/// Opens the store, starts the background tasks, and serves HTTP until
/// the server is stopped.
///
/// # Errors
///
/// Returns [`ServerError`] if the database cannot be opened or the
/// listener cannot bind.
pub async fn run_server(config: EngineConfig) -> Result<(), ServerError> {
    log::info!("Opening database at {}", config.database.path.display());
    let store: Arc<dyn ZoneStore> = Arc::new(SqliteZoneStore::open(&config.database.path).await?);

    let (ledger, grants) = ClaimLedger::with_grant_channel(store.clone(), config.ledger);
    let scheduler = Arc::new(ZoneRefreshScheduler::new(store.clone(), config.scheduler));
    let cancel = CancellationToken::new();

    let dispatcher = tokio::spawn(run_settlement_dispatcher(
        grants,
        Arc::new(LoggingSettlementClient),
        store,
        cancel.clone(),
    ));
    let refresher = scheduler.spawn();

    let state = web::Data::new(AppState {
        ledger,
        scheduler: scheduler.clone(),
        ranker: Ranker::new(config.proximity),
    });

    let bind_addr = config.server.bind_addr;
    let port = config.server.port;

    log::info!("Starting server on {bind_addr}:{port}");

    let served = match HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))
    {
        Ok(server) => server.run().await,
        Err(e) => Err(e),
    };

    log::info!("Server stopped, shutting down background tasks");
    scheduler.cancel();
    cancel.cancel();
    for (name, handle) in [("scheduler", refresher), ("settlement dispatcher", dispatcher)] {
        if let Err(e) = handle.await {
            log::error!("Background {name} task failed: {e}");
        }
    }

    served?;
    Ok(())
}
