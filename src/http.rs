use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::sse::{self, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use ulid::Ulid;

use crate::auth::{staff_auth, StaffKey};
use crate::engine::{Engine, EngineError};
use crate::model::*;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub staff_key: StaffKey,
}

// ── Error mapping ────────────────────────────────────────

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::AlreadyExists(_)
            | EngineError::CapacityExceeded { .. }
            | EngineError::DuplicateBooking { .. }
            | EngineError::InvalidTransition { .. }
            | EngineError::HasUpcomingBookings(_) => StatusCode::CONFLICT,
            EngineError::InvalidDate { .. } | EngineError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
            EngineError::WalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("request failed: {}", self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// ── Request bodies ───────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SlotRequest {
    name: String,
    starts_at: NaiveTime,
    ends_at: NaiveTime,
    capacity: u32,
}

#[derive(Debug, Deserialize)]
struct BookingRequest {
    slot_id: Ulid,
    date: NaiveDate,
    client_id: Ulid,
    note: Option<String>,
}

/// Staff bookings reference exactly one of a registered account or a
/// walk-in client record.
#[derive(Debug, Deserialize)]
struct StaffBookingRequest {
    slot_id: Ulid,
    date: NaiveDate,
    client_id: Option<Ulid>,
    walk_in_id: Option<Ulid>,
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RescheduleRequest {
    slot_id: Ulid,
    date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct OutcomeRequest {
    outcome: Outcome,
}

#[derive(Debug, Deserialize)]
struct ScheduleQuery {
    from: NaiveDate,
    to: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct RosterQuery {
    slot_id: Option<Ulid>,
    date: NaiveDate,
}

// ── Router ───────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/healthz", get(healthz))
        .route("/slots", get(list_slots))
        .route("/slots/:id/events", get(slot_events))
        .route("/schedule", get(get_schedule))
        .route("/bookings", post(create_booking))
        .route("/bookings/reschedule/:token", post(reschedule_by_token))
        .route("/bookings/cancel/:token", post(cancel_by_token));

    let staff = Router::new()
        .route("/slots", post(create_slot))
        .route("/slots/:id", put(update_slot).delete(delete_slot))
        .route("/bookings", get(staff_roster))
        .route("/bookings/staff", post(create_staff_booking))
        .route("/bookings/:id/cancel", post(staff_cancel))
        .route("/bookings/:id/outcome", post(staff_outcome))
        .route("/bookings/:id/reschedule", post(staff_reschedule))
        .route_layer(middleware::from_fn_with_state(state.staff_key.clone(), staff_auth));

    Router::new()
        .merge(public)
        .merge(staff)
        .layer(middleware::from_fn(track_requests))
        .layer(cors)
        .with_state(state)
}

async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let op = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let started = Instant::now();
    let response = next.run(request).await;
    metrics::counter!(
        crate::observability::HTTP_REQUESTS_TOTAL,
        "op" => op.clone(),
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    metrics::histogram!(crate::observability::HTTP_REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    response
}

// ── Public handlers ──────────────────────────────────────

async fn healthz() -> &'static str {
    "ok"
}

async fn list_slots(State(state): State<AppState>) -> Json<Vec<SlotInfo>> {
    Json(state.engine.list_slots().await)
}

async fn get_schedule(
    State(state): State<AppState>,
    Query(q): Query<ScheduleQuery>,
) -> Result<Json<Vec<SlotAvailability>>, ApiError> {
    Ok(Json(state.engine.availability(q.from, q.to).await?))
}

async fn create_booking(
    State(state): State<AppState>,
    Json(req): Json<BookingRequest>,
) -> Result<(StatusCode, Json<BookingInfo>), ApiError> {
    let info = state
        .engine
        .admit_booking(
            Ulid::new(),
            req.slot_id,
            Booker::Registered(req.client_id),
            req.date,
            req.note,
            false,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(info)))
}

async fn reschedule_by_token(
    State(state): State<AppState>,
    Path(token): Path<Ulid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<BookingInfo>, ApiError> {
    Ok(Json(state.engine.reschedule_by_token(token, req.slot_id, req.date).await?))
}

async fn cancel_by_token(
    State(state): State<AppState>,
    Path(token): Path<Ulid>,
) -> Result<Json<BookingInfo>, ApiError> {
    Ok(Json(state.engine.cancel_by_token(token).await?))
}

/// Live feed of a slot's booking events for dashboard refresh.
async fn slot_events(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<impl IntoResponse, ApiError> {
    if state.engine.get_slot(&id).is_none() {
        return Err(EngineError::NotFound(id).into());
    }
    let rx = state.engine.notify.subscribe(id);
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        // Lagged subscribers just skip ahead
        let event = item.ok()?;
        let frame = sse::Event::default().json_data(&event).ok()?;
        Some(Ok::<_, Infallible>(frame))
    });
    Ok(Sse::new(stream).keep_alive(sse::KeepAlive::default()))
}

// ── Staff handlers ───────────────────────────────────────

async fn create_slot(
    State(state): State<AppState>,
    Json(req): Json<SlotRequest>,
) -> Result<(StatusCode, Json<SlotInfo>), ApiError> {
    let id = Ulid::new();
    state
        .engine
        .create_slot(id, req.name.clone(), req.starts_at, req.ends_at, req.capacity)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SlotInfo {
            id,
            name: req.name,
            starts_at: req.starts_at,
            ends_at: req.ends_at,
            capacity: req.capacity,
        }),
    ))
}

async fn update_slot(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    Json(req): Json<SlotRequest>,
) -> Result<Json<SlotInfo>, ApiError> {
    state
        .engine
        .update_slot(id, req.name.clone(), req.starts_at, req.ends_at, req.capacity)
        .await?;
    Ok(Json(SlotInfo {
        id,
        name: req.name,
        starts_at: req.starts_at,
        ends_at: req.ends_at,
        capacity: req.capacity,
    }))
}

async fn delete_slot(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_slot(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_staff_booking(
    State(state): State<AppState>,
    Json(req): Json<StaffBookingRequest>,
) -> Result<(StatusCode, Json<BookingInfo>), ApiError> {
    let booker = match (req.client_id, req.walk_in_id) {
        (Some(id), None) => Booker::Registered(id),
        (None, Some(id)) => Booker::WalkIn(id),
        _ => return Err(ApiError::bad_request("exactly one of client_id or walk_in_id is required")),
    };
    let info = state
        .engine
        .admit_booking(Ulid::new(), req.slot_id, booker, req.date, req.note, true)
        .await?;
    Ok((StatusCode::CREATED, Json(info)))
}

async fn staff_roster(
    State(state): State<AppState>,
    Query(q): Query<RosterQuery>,
) -> Result<Json<Vec<BookingInfo>>, ApiError> {
    match q.slot_id {
        Some(slot_id) => Ok(Json(state.engine.bookings_on(slot_id, q.date).await?)),
        None => Ok(Json(state.engine.day_roster(q.date).await)),
    }
}

async fn staff_cancel(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<BookingInfo>, ApiError> {
    Ok(Json(state.engine.cancel_booking(id).await?))
}

async fn staff_outcome(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    Json(req): Json<OutcomeRequest>,
) -> Result<Json<BookingInfo>, ApiError> {
    Ok(Json(state.engine.record_outcome(id, req.outcome).await?))
}

async fn staff_reschedule(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<BookingInfo>, ApiError> {
    Ok(Json(state.engine.reschedule_booking(id, req.slot_id, req.date).await?))
}
