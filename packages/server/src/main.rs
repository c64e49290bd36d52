#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Standalone entry point for the geodrop API server.
//!
//! Reads configuration from `GEODROP_CONFIG` (if set) and the usual
//! environment overrides, then serves until interrupted.

use geodrop_config::EngineConfig;

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = EngineConfig::load(None)?;
    geodrop_server::run_server(config).await?;

    Ok(())
}
