use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trip_safety_lib::{
    error::TrackingError, location_point::LocationPoint, tracking_session::TrackingSession,
};

use crate::{auth::CallerIdentity, server_state::ServerState};

/// Wraps the engine taxonomy for the HTTP boundary.
pub struct ApiError(pub TrackingError);

impl From<TrackingError> for ApiError {
    fn from(err: TrackingError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TrackingError::NotFound(_) => StatusCode::NOT_FOUND,
            TrackingError::Forbidden(_) => StatusCode::FORBIDDEN,
            TrackingError::InvalidTransition(_) => StatusCode::CONFLICT,
            TrackingError::InvalidLocation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TrackingError::Conflict(_) => StatusCode::CONFLICT,
            TrackingError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Wire form of a GPS fix, in the shape the web client reports it.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl From<LocationFix> for LocationPoint {
    fn from(fix: LocationFix) -> Self {
        let mut point = LocationPoint::new(fix.latitude, fix.longitude, fix.timestamp);
        point.altitude = fix.altitude;
        point.accuracy = fix.accuracy;
        point
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteBody {
    /// Set by organizers completing on a member's behalf.
    pub user_id: Option<String>,
    pub location: Option<LocationFix>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SosBody {
    pub location: Option<LocationFix>,
}

#[derive(Debug, Serialize)]
pub struct SosResponse {
    pub alert_id: i64,
    pub session: TrackingSession,
}

pub async fn session_snapshot(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
) -> Result<Json<TrackingSession>, ApiError> {
    Ok(Json(state.engine.snapshot(trip_id).await?))
}

pub async fn initialize(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
    caller: CallerIdentity,
) -> Result<Json<TrackingSession>, ApiError> {
    Ok(Json(state.engine.initialize(trip_id, &caller.0).await?))
}

pub async fn start(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
    caller: CallerIdentity,
) -> Result<Json<TrackingSession>, ApiError> {
    Ok(Json(state.engine.start(trip_id, &caller.0).await?))
}

pub async fn pause(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
    caller: CallerIdentity,
) -> Result<Json<TrackingSession>, ApiError> {
    Ok(Json(state.engine.pause(trip_id, &caller.0).await?))
}

pub async fn resume(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
    caller: CallerIdentity,
) -> Result<Json<TrackingSession>, ApiError> {
    Ok(Json(state.engine.resume(trip_id, &caller.0).await?))
}

pub async fn submit_location(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
    caller: CallerIdentity,
    Json(fix): Json<LocationFix>,
) -> Result<Json<TrackingSession>, ApiError> {
    Ok(Json(state.engine.submit_location(trip_id, &caller.0, fix.into()).await?))
}

pub async fn complete(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
    caller: CallerIdentity,
    Json(body): Json<CompleteBody>,
) -> Result<Json<TrackingSession>, ApiError> {
    let session = state
        .engine
        .complete(trip_id, &caller.0, body.user_id.as_deref(), body.location.map(Into::into))
        .await?;
    Ok(Json(session))
}

pub async fn sos(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
    caller: CallerIdentity,
    Json(body): Json<SosBody>,
) -> Result<Json<SosResponse>, ApiError> {
    let (session, alert_id) = state
        .engine
        .raise_sos(trip_id, &caller.0, body.location.map(Into::into))
        .await?;
    Ok(Json(SosResponse { alert_id, session }))
}

pub async fn resolve_alert(
    State(state): State<Arc<ServerState>>,
    Path((trip_id, alert_id)): Path<(i64, i64)>,
    caller: CallerIdentity,
) -> Result<Json<TrackingSession>, ApiError> {
    Ok(Json(state.engine.resolve_alert(trip_id, &caller.0, alert_id).await?))
}
