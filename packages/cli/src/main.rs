#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line front end for the geodrop zone engine.
//!
//! ```text
//! geodrop seed [--name madrid]
//! geodrop zones [--lat 40.4168 --lng -3.7038] [--active]
//! geodrop claim <zone> --identity 0xabc --lat 40.4168 --lng -3.7038
//! geodrop history <identity>
//! geodrop stats
//! geodrop reset <zone>
//! geodrop remove <zone>
//! geodrop serve
//! ```
//!
//! Every command reads the same configuration as the server: `--config`
//! (or `GEODROP_CONFIG`) plus the `BIND_ADDR`, `PORT`, and
//! `GEODROP_DB_PATH` overrides.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use geodrop_config::EngineConfig;
use geodrop_database::{DbError, SqliteZoneStore};
use geodrop_geofence::{GeoPoint, UserLocation};
use geodrop_ledger::settlement::{LoggingSettlementClient, settle_grant};
use geodrop_ledger::{ClaimLedger, ZoneStore};
use geodrop_ledger_models::{Identity, SettlementStatus};
use geodrop_location::{LocationProvider, StaticPositionSource};
use geodrop_proximity::Ranker;
use geodrop_zone::derive_status;
use geodrop_zone::seeds::{load_seed, seed_names};
use geodrop_zone_models::ZoneId;

#[derive(Parser)]
#[command(name = "geodrop", about = "Geofenced reward zones and claim arbitration")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an embedded seed into the store
    Seed {
        /// Seed name
        #[arg(long, default_value = "madrid")]
        name: String,
    },
    /// List zones with their current status
    Zones {
        /// Latitude to rank from
        #[arg(long, requires = "lng", allow_hyphen_values = true)]
        lat: Option<f64>,
        /// Longitude to rank from
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lng: Option<f64>,
        /// Only show active zones
        #[arg(long)]
        active: bool,
    },
    /// Claim a zone's reward from a fixed position
    Claim {
        /// Zone ID
        zone: String,
        /// Claimant identity (wallet address)
        #[arg(long)]
        identity: String,
        /// Latitude of the claimant
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Longitude of the claimant
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
    },
    /// Show the claims an identity holds
    History {
        /// Claimant identity
        identity: String,
    },
    /// Show system-wide totals
    Stats,
    /// Zero a zone's participant counter
    Reset {
        /// Zone ID
        zone: String,
    },
    /// Delete a zone
    Remove {
        /// Zone ID
        zone: String,
    },
    /// Start the HTTP API server
    Serve,
}

async fn open_store(config: &EngineConfig) -> Result<Arc<dyn ZoneStore>, DbError> {
    log::debug!("Using database at {}", config.database.path.display());
    Ok(Arc::new(SqliteZoneStore::open(&config.database.path).await?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();

    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => {
            // The server uses actix-web's runtime, so we need to run it
            // in a blocking task to avoid nesting tokio runtimes.
            tokio::task::spawn_blocking(move || {
                actix_web::rt::System::new().block_on(geodrop_server::run_server(config))
            })
            .await??;
        }
        Commands::Seed { name } => {
            let store = open_store(&config).await?;
            let zones = load_seed(&name, Utc::now()).inspect_err(|_| {
                eprintln!("Available seeds: {}", seed_names().join(", "));
            })?;
            let count = zones.len();
            for zone in zones {
                store.upsert_zone(zone).await?;
            }
            println!("Seeded {count} zones from '{name}'");
        }
        Commands::Zones { lat, lng, active } => {
            let from = match (lat, lng) {
                (Some(lat), Some(lng)) => Some(UserLocation::new(
                    GeoPoint::new(lat, lng)?,
                    Utc::now().timestamp_millis(),
                )),
                _ => None,
            };
            let zones = open_store(&config).await?.list_zones().await?;
            let now = Utc::now();
            let ranker = Ranker::new(config.proximity);
            let ranked = if active {
                ranker.active(&zones, from.as_ref(), now)
            } else {
                ranker.rank(&zones, from.as_ref())
            };

            if ranked.is_empty() {
                println!("No zones found.");
                return Ok(());
            }

            println!(
                "{:<28} {:<10} {:>10} {:>12} {:>12}",
                "ID", "STATUS", "DISTANCE", "REWARD", "CLAIMED"
            );
            println!("{}", "-".repeat(76));

            for entry in &ranked {
                let zone = &entry.zone;
                let reward = format!("{} {}", zone.reward.amount, zone.reward.currency);
                let distance = entry
                    .distance_meters
                    .map_or_else(|| "-".to_string(), |d| format!("{d:.0}m"));
                let claimed = if zone.max_participants == 0 {
                    zone.current_participants.to_string()
                } else {
                    format!("{}/{}", zone.current_participants, zone.max_participants)
                };
                println!(
                    "{:<28} {:<10} {:>10} {:>12} {:>12}",
                    zone.id.as_str(),
                    derive_status(zone, now).as_ref(),
                    distance,
                    reward,
                    claimed,
                );
            }

            println!("\n{} zone(s)", ranked.len());
        }
        Commands::Claim {
            zone,
            identity,
            lat,
            lng,
        } => {
            let store = open_store(&config).await?;
            let identity = Identity::new(&identity)?;
            let zone_id = ZoneId::new(zone);
            let provider = LocationProvider::new(StaticPositionSource::new(GeoPoint::new(lat, lng)?));
            let at = provider.acquire_location(config.location).await?;

            let (ledger, mut grants) = ClaimLedger::with_grant_channel(store.clone(), config.ledger);
            match ledger.attempt_claim(&identity, &zone_id, &at, Utc::now()).await {
                Ok(grant) => {
                    println!(
                        "Claimed {} {} from {zone_id} ({} participants)",
                        grant.reward_amount, grant.reward_currency, grant.participants_after
                    );
                }
                Err(e) => {
                    eprintln!("Claim refused ({}): {e}", e.kind());
                    std::process::exit(1);
                }
            }

            drop(ledger);
            while let Some(event) = grants.recv().await {
                settle_grant(&LoggingSettlementClient, store.as_ref(), &event).await;
            }
        }
        Commands::History { identity } => {
            let identity = Identity::new(&identity)?;
            let ledger = ClaimLedger::new(open_store(&config).await?, config.ledger);
            let claims = ledger.history(&identity).await?;

            if claims.is_empty() {
                println!("No claims found for {identity}.");
                return Ok(());
            }

            for record in &claims {
                let claimed_at = record
                    .claimed_at
                    .map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
                let settlement = match record.settlement.as_ref().map(|s| &s.status) {
                    None => "pending".to_string(),
                    Some(SettlementStatus::Settled { reference }) => format!("settled {reference}"),
                    Some(SettlementStatus::Failed { reason }) => format!("failed: {reason}"),
                };
                println!("{:<28} {claimed_at:<34} {settlement}", record.zone_id.as_str());
            }

            println!("\n{} claim(s)", claims.len());
        }
        Commands::Stats => {
            let ledger = ClaimLedger::new(open_store(&config).await?, config.ledger);
            let stats = ledger.dashboard(Utc::now()).await?;

            println!("Zones:               {}", stats.total_zones);
            println!("Active zones:        {}", stats.active_zones);
            println!("Participants:        {}", stats.total_participants);
            println!("Tokens distributed:  {}", stats.total_tokens_distributed);
        }
        Commands::Reset { zone } => {
            let zone_id = ZoneId::new(zone);
            open_store(&config).await?.reset_participants(&zone_id).await?;
            println!("Reset participants for {zone_id}");
        }
        Commands::Remove { zone } => {
            let zone_id = ZoneId::new(zone);
            if open_store(&config).await?.delete_zone(&zone_id).await? {
                println!("Removed {zone_id}");
            } else {
                eprintln!("Zone not found: {zone_id}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
