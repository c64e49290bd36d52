//! HTTP handler functions for the geodrop API.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, web};
use chrono::{DateTime, Utc};
use geodrop_geofence::{GeoPoint, UserLocation, distance_meters};
use geodrop_ledger::StoreError;
use geodrop_ledger_models::{ClaimError, EntryError, Identity};
use geodrop_proximity::{ZoneWithDistance, check_location, containing};
use geodrop_server_models::{
    ApiError, ApiHealth, ApiZone, ApiZoneList, LocationQueryParams, PresenceRequest,
};
use geodrop_zone::ZoneView;
use geodrop_zone_models::{Zone, ZoneId};

use crate::AppState;

fn error(status: StatusCode, body: &ApiError) -> HttpResponse {
    HttpResponse::build(status).json(body)
}

fn unprocessable(kind: &str, message: impl Into<String>) -> HttpResponse {
    error(
        StatusCode::UNPROCESSABLE_ENTITY,
        &ApiError::new(kind, message),
    )
}

fn internal(message: impl std::fmt::Display) -> HttpResponse {
    log::error!("{message}");
    error(
        StatusCode::INTERNAL_SERVER_ERROR,
        &ApiError::new("internal", message.to_string()),
    )
}

fn claim_error(e: &ClaimError) -> HttpResponse {
    let status = match e {
        ClaimError::ZoneNotFound { .. } => StatusCode::NOT_FOUND,
        ClaimError::AlreadyClaimed
        | ClaimError::CapacityExceeded
        | ClaimError::ZoneNotActive { .. } => StatusCode::CONFLICT,
        ClaimError::OutOfRange { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ClaimError::ClaimFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    error(status, &ApiError::from(e))
}

fn zone_not_found(zone_id: ZoneId) -> HttpResponse {
    error(
        StatusCode::NOT_FOUND,
        &ApiError::from(&ClaimError::ZoneNotFound { zone_id }),
    )
}

fn parse_identity(raw: &str) -> Result<Identity, HttpResponse> {
    Identity::new(raw).map_err(|e| unprocessable("invalid_identity", e.to_string()))
}

fn location(
    latitude: f64,
    longitude: f64,
    observed_at: Option<i64>,
    accuracy_meters: Option<f64>,
) -> Result<UserLocation, HttpResponse> {
    let point = GeoPoint::new(latitude, longitude)
        .map_err(|e| unprocessable("invalid_coordinate", e.to_string()))?;
    let observed_at = observed_at.unwrap_or_else(|| Utc::now().timestamp_millis());

    Ok(UserLocation {
        point,
        observed_at_millis: observed_at,
        accuracy_meters,
    })
}

/// Resolves an optional `lat`/`lng` pair. Supplying only one is an error.
fn optional_location(params: &LocationQueryParams) -> Result<Option<UserLocation>, HttpResponse> {
    match (params.lat, params.lng) {
        (Some(lat), Some(lng)) => location(lat, lng, params.observed_at, None).map(Some),
        (None, None) => Ok(None),
        _ => Err(unprocessable(
            "invalid_coordinate",
            "lat and lng must be supplied together",
        )),
    }
}

fn required_location(params: &LocationQueryParams) -> Result<UserLocation, HttpResponse> {
    optional_location(params)?
        .ok_or_else(|| unprocessable("invalid_coordinate", "lat and lng are required"))
}

fn presence(body: &PresenceRequest) -> Result<(Identity, UserLocation), HttpResponse> {
    let identity = Identity::new(&body.identity)
        .map_err(|e| unprocessable("invalid_identity", e.to_string()))?;
    let at = location(
        body.latitude,
        body.longitude,
        body.observed_at,
        body.accuracy_meters,
    )?;
    Ok((identity, at))
}

fn zone_list(evaluated_at: DateTime<Utc>, ranked: Vec<ZoneWithDistance>) -> HttpResponse {
    let zones = ranked
        .into_iter()
        .map(|z| ApiZone::from_view(ZoneView::evaluate(z.zone, evaluated_at), z.distance_meters))
        .collect();

    HttpResponse::Ok().json(ApiZoneList {
        evaluated_at,
        zones,
    })
}

/// Zones from the latest snapshot and the instant they were derived at.
fn snapshot_zones(state: &AppState) -> (DateTime<Utc>, Vec<Zone>) {
    let snapshot = state.scheduler.latest();
    let zones = snapshot.zones.iter().map(|v| v.zone.clone()).collect();
    (snapshot.evaluated_at, zones)
}

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /api/zones`
///
/// Every zone, nearest first when `lat`/`lng` are given.
pub async fn zones(
    state: web::Data<AppState>,
    params: web::Query<LocationQueryParams>,
) -> HttpResponse {
    let from = match optional_location(&params) {
        Ok(from) => from,
        Err(resp) => return resp,
    };
    let (evaluated_at, zones) = snapshot_zones(&state);

    zone_list(evaluated_at, state.ranker.rank(&zones, from.as_ref()))
}

/// `GET /api/zones/active`
pub async fn active_zones(
    state: web::Data<AppState>,
    params: web::Query<LocationQueryParams>,
) -> HttpResponse {
    let from = match optional_location(&params) {
        Ok(from) => from,
        Err(resp) => return resp,
    };
    let (evaluated_at, zones) = snapshot_zones(&state);

    zone_list(
        evaluated_at,
        state.ranker.active(&zones, from.as_ref(), evaluated_at),
    )
}

/// `GET /api/zones/nearby`
///
/// Active zones within the configured radius of the caller.
pub async fn nearby_zones(
    state: web::Data<AppState>,
    params: web::Query<LocationQueryParams>,
) -> HttpResponse {
    let from = match required_location(&params) {
        Ok(from) => from,
        Err(resp) => return resp,
    };
    let (evaluated_at, zones) = snapshot_zones(&state);

    zone_list(
        evaluated_at,
        state.ranker.nearby(&zones, Some(&from), evaluated_at),
    )
}

/// `GET /api/zones/containing`
///
/// Active zones whose geofence contains the caller.
pub async fn containing_zones(
    state: web::Data<AppState>,
    params: web::Query<LocationQueryParams>,
) -> HttpResponse {
    let from = match required_location(&params) {
        Ok(from) => from,
        Err(resp) => return resp,
    };
    let (evaluated_at, zones) = snapshot_zones(&state);

    let hits = containing(&zones, &from, evaluated_at)
        .into_iter()
        .map(|zone| ZoneWithDistance {
            distance_meters: Some(distance_meters(&from.point, &zone.center)),
            zone: zone.clone(),
        })
        .collect();

    zone_list(evaluated_at, hits)
}

/// `GET /api/zones/{id}`
///
/// Reads the store directly so the status reflects the current instant.
pub async fn zone(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let zone_id = ZoneId::new(path.into_inner());

    match state.ledger.store().load_zone(&zone_id).await {
        Ok(Some(zone)) => {
            HttpResponse::Ok().json(ApiZone::from_view(ZoneView::evaluate(zone, Utc::now()), None))
        }
        Ok(None) => zone_not_found(zone_id),
        Err(e) => internal(format!("Failed to load zone {zone_id}: {e}")),
    }
}

/// `GET /api/zones/{id}/history`
///
/// Granted claims on one zone, most recent first.
pub async fn zone_history(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let zone_id = ZoneId::new(path.into_inner());

    match state.ledger.zone_history(&zone_id).await {
        Ok(claims) => HttpResponse::Ok().json(claims),
        Err(StoreError::NotFound { zone_id }) => zone_not_found(zone_id),
        Err(e) => internal(format!("Failed to load history of zone {zone_id}: {e}")),
    }
}

/// `GET /api/zones/{id}/check`
///
/// Whether `lat`/`lng` is inside the zone's geofence, with the distance.
pub async fn check_zone_location(
    state: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Query<LocationQueryParams>,
) -> HttpResponse {
    let zone_id = ZoneId::new(path.into_inner());
    let at = match required_location(&params) {
        Ok(at) => at,
        Err(resp) => return resp,
    };

    match state.ledger.store().load_zone(&zone_id).await {
        Ok(Some(zone)) => HttpResponse::Ok().json(check_location(&zone, &at)),
        Ok(None) => zone_not_found(zone_id),
        Err(e) => internal(format!("Failed to load zone {zone_id}: {e}")),
    }
}

/// `POST /api/zones/{id}/claim`
pub async fn claim(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<PresenceRequest>,
) -> HttpResponse {
    let zone_id = ZoneId::new(path.into_inner());
    let (identity, at) = match presence(&body) {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };

    match state
        .ledger
        .attempt_claim(&identity, &zone_id, &at, Utc::now())
        .await
    {
        Ok(grant) => {
            state.scheduler.trigger();
            HttpResponse::Ok().json(grant)
        }
        Err(e) => claim_error(&e),
    }
}

/// `POST /api/zones/{id}/enter`
pub async fn enter(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<PresenceRequest>,
) -> HttpResponse {
    let zone_id = ZoneId::new(path.into_inner());
    let (identity, at) = match presence(&body) {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };

    match state
        .ledger
        .enter_zone(&identity, &zone_id, &at, Utc::now())
        .await
    {
        Ok(outcome) => HttpResponse::Ok().json(outcome),
        Err(e @ EntryError::ZoneNotFound { .. }) => {
            error(StatusCode::NOT_FOUND, &ApiError::from(&e))
        }
        Err(e @ EntryError::Storage(_)) => internal(e),
    }
}

/// `GET /api/claims/{identity}`
///
/// Granted claims, most recent first.
pub async fn history(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let identity = match parse_identity(&path) {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };

    match state.ledger.history(&identity).await {
        Ok(claims) => HttpResponse::Ok().json(claims),
        Err(e) => internal(format!("Failed to load claims for {identity}: {e}")),
    }
}

/// `GET /api/users/{identity}/statuses`
///
/// Every record the identity holds, including entries without a claim.
pub async fn statuses(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let identity = match parse_identity(&path) {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };

    match state.ledger.statuses(&identity).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => internal(format!("Failed to load statuses for {identity}: {e}")),
    }
}

/// `GET /api/analytics/dashboard`
pub async fn dashboard(state: web::Data<AppState>) -> HttpResponse {
    match state.ledger.dashboard(Utc::now()).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => internal(format!("Failed to compute dashboard totals: {e}")),
    }
}

/// `GET /api/claims/{identity}/{zone_id}`
pub async fn claim_status(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (identity, zone_id) = path.into_inner();
    let identity = match parse_identity(&identity) {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    let zone_id = ZoneId::new(zone_id);

    match state.ledger.claim_status(&identity, &zone_id).await {
        Ok(Some(record)) => HttpResponse::Ok().json(record),
        Ok(None) => error(
            StatusCode::NOT_FOUND,
            &ApiError::new(
                "claim_not_found",
                format!("No record for {identity} on zone {zone_id}"),
            ),
        ),
        Err(e) => internal(format!("Failed to load claim for {identity}: {e}")),
    }
}

/// `POST /api/zones/refresh`
///
/// Re-derives every status now and returns the published snapshot.
pub async fn refresh(state: web::Data<AppState>) -> HttpResponse {
    match state.scheduler.refresh_now().await {
        Ok(snapshot) => {
            let ranked = state.ranker.rank(
                &snapshot.zones.iter().map(|v| v.zone.clone()).collect::<Vec<_>>(),
                None,
            );
            zone_list(snapshot.evaluated_at, ranked)
        }
        Err(e) => internal(format!("Zone refresh failed: {e}")),
    }
}
