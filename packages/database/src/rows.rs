//! Row ↔ model conversion.

use chrono::{DateTime, SecondsFormat, Utc};
use geodrop_geofence::GeoPoint;
use geodrop_ledger_models::{ClaimRecord, Identity, SettlementRecord};
use geodrop_zone_models::{ActiveWindow, Reward, TokenAmount, Zone, ZoneId, ZoneMetadata};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::Row;

use crate::DbError;

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(row_err(column))
}

fn parse_optional_timestamp(
    column: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, DbError> {
    value.map(|v| parse_timestamp(column, &v)).transpose()
}

fn row_err<E: std::fmt::Display>(name: &'static str) -> impl FnOnce(E) -> DbError {
    move |e| DbError::Row(format!("{name}: {e}"))
}

fn count(row: &Row, name: &'static str) -> Result<u32, DbError> {
    let value: i64 = row.to_value(name).map_err(row_err(name))?;
    u32::try_from(value).map_err(|_| DbError::Row(format!("{name}: {value} out of range")))
}

pub fn zone_from_row(row: &Row) -> Result<Zone, DbError> {
    let id: String = row.to_value("id").map_err(row_err("id"))?;
    let latitude: f64 = row.to_value("latitude").map_err(row_err("latitude"))?;
    let longitude: f64 = row.to_value("longitude").map_err(row_err("longitude"))?;
    let amount: String = row.to_value("reward_amount").map_err(row_err("reward_amount"))?;
    let starts_at: String = row.to_value("starts_at").map_err(row_err("starts_at"))?;
    let ends_at: String = row.to_value("ends_at").map_err(row_err("ends_at"))?;
    let disabled: i64 = row.to_value("manually_disabled").map_err(row_err("manually_disabled"))?;
    let metadata: String = row.to_value("metadata").map_err(row_err("metadata"))?;

    Ok(Zone {
        id: ZoneId::new(id),
        center: GeoPoint::new(latitude, longitude)
            .map_err(row_err("center"))?,
        radius_meters: row.to_value("radius_meters").map_err(row_err("radius_meters"))?,
        reward: Reward {
            amount: amount
                .parse::<TokenAmount>()
                .map_err(row_err("reward_amount"))?,
            currency: row.to_value("reward_currency").map_err(row_err("reward_currency"))?,
        },
        active_window: ActiveWindow {
            starts_at: parse_timestamp("starts_at", &starts_at)?,
            ends_at: parse_timestamp("ends_at", &ends_at)?,
        },
        max_participants: count(row, "max_participants")?,
        current_participants: count(row, "current_participants")?,
        manually_disabled: disabled != 0,
        metadata: serde_json::from_str::<ZoneMetadata>(&metadata)?,
    })
}

pub fn claim_from_row(row: &Row) -> Result<ClaimRecord, DbError> {
    let identity: String = row.to_value("identity").map_err(row_err("identity"))?;
    let zone_id: String = row.to_value("zone_id").map_err(row_err("zone_id"))?;
    let entered_at: Option<String> = row.to_value("entered_at").map_err(row_err("entered_at"))?;
    let claimed_at: Option<String> = row.to_value("claimed_at").map_err(row_err("claimed_at"))?;
    let settlement: Option<String> = row.to_value("settlement").map_err(row_err("settlement"))?;

    Ok(ClaimRecord {
        identity: Identity::new(&identity).map_err(row_err("identity"))?,
        zone_id: ZoneId::new(zone_id),
        entered_at: parse_optional_timestamp("entered_at", entered_at)?,
        claimed_at: parse_optional_timestamp("claimed_at", claimed_at)?,
        settlement: settlement
            .map(|json| serde_json::from_str::<SettlementRecord>(&json))
            .transpose()?,
    })
}
