//! HTTP API handlers for Vigil.
//!
//! Handlers stay thin: deserialize, hand off to the [`Engine`], serialize.
//! All domain errors surface as [`CoreError`], which renders as a JSON body
//! with a machine-readable code and the right status.
//!
//! # Endpoints
//!
//! - `POST /events` - Ingest an activity event (may create an alert)
//! - `POST /alerts` - Create an alert manually
//! - `GET /alerts` - List alerts, filterable by subject and status
//! - `GET /alerts/:id` - Fetch one alert with its ledger and history
//! - `POST /alerts/:id/acknowledge` - Acknowledge
//! - `POST /alerts/:id/resolve` - Resolve (terminal)
//! - `POST /alerts/:id/escalate` - Run one escalation step
//! - `POST /alerts/:id/notifications` - Record a delivery-status update
//! - `POST /sos` - Trigger a manual SOS
//! - `POST /contacts` - Add or update a contact
//! - `GET /contacts` - List a subject's care network
//! - `GET /health` - Health check

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::instrument;

use crate::alert::Alert;
use crate::contact::Contact;
use crate::error::CoreError;
use crate::escalation::Engine;
use crate::model::{
    ActionRequest, AlertsQuery, ContactsQuery, CreateAlertRequest, EventRequest, EventResponse,
    NotificationUpdateRequest, SosRequest,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

/// Build the full router. Shared between `main` and the integration tests.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(post_event))
        .route("/alerts", post(post_alert).get(get_alerts))
        .route("/alerts/:id", get(get_alert))
        .route("/alerts/:id/acknowledge", post(acknowledge_alert))
        .route("/alerts/:id/resolve", post(resolve_alert))
        .route("/alerts/:id/escalate", post(escalate_alert))
        .route("/alerts/:id/notifications", post(update_notification))
        .route("/sos", post(post_sos))
        .route("/contacts", post(post_contact).get(get_contacts))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Response body for `POST /sos`.
#[derive(Debug, Serialize)]
pub struct SosResponse {
    /// The created SOS alert, including its ledger.
    pub alert: Alert,
    /// Number of notification entries queued.
    pub notified: usize,
}

/// POST /events - Ingest an activity event.
///
/// Classification is total: unrecognized event types normalize to `unknown`
/// and come back with `danger: false` rather than an error.
#[instrument(skip(state, request), fields(subject_id = %request.subject_id, raw_type = %request.raw_type))]
pub async fn post_event(
    State(state): State<AppState>,
    Json(request): Json<EventRequest>,
) -> Result<Json<EventResponse>, CoreError> {
    let response = state.engine.ingest_event(request).await?;
    Ok(Json(response))
}

/// POST /alerts - Create an alert manually.
#[instrument(skip(state, request), fields(subject_id = %request.subject_id))]
pub async fn post_alert(
    State(state): State<AppState>,
    Json(request): Json<CreateAlertRequest>,
) -> Result<(StatusCode, Json<Alert>), CoreError> {
    let alert = state.engine.create_manual_alert(request).await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

/// GET /alerts - List alerts, optionally filtered by subject and status.
#[instrument(skip(state))]
pub async fn get_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Vec<Alert>>, CoreError> {
    let alerts = state
        .engine
        .list_alerts(query.subject_id.as_deref(), query.status)
        .await?;
    Ok(Json(alerts))
}

/// GET /alerts/:id - Fetch one alert.
#[instrument(skip(state))]
pub async fn get_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Alert>, CoreError> {
    let alert = state.engine.get_alert(&id).await?;
    Ok(Json(alert))
}

/// POST /alerts/:id/acknowledge - Acknowledge an alert.
#[instrument(skip(state, request))]
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<Alert>, CoreError> {
    let alert = state.engine.acknowledge_alert(&id, &request.by).await?;
    Ok(Json(alert))
}

/// POST /alerts/:id/resolve - Resolve an alert. Terminal.
#[instrument(skip(state, request))]
pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<Alert>, CoreError> {
    let alert = state.engine.resolve_alert(&id, &request.by).await?;
    Ok(Json(alert))
}

/// POST /alerts/:id/escalate - Run one escalation step by hand.
#[instrument(skip(state))]
pub async fn escalate_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Alert>, CoreError> {
    let alert = state.engine.escalate_alert(&id).await?;
    Ok(Json(alert))
}

/// POST /alerts/:id/notifications - Record a delivery-status update for a
/// ledger entry (provider callbacks).
#[instrument(skip(state, request))]
pub async fn update_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<NotificationUpdateRequest>,
) -> Result<Json<Alert>, CoreError> {
    let alert = state.engine.update_notification(&id, request).await?;
    Ok(Json(alert))
}

/// POST /sos - Trigger a manual SOS.
///
/// Always critical, bypasses the cooldown and every contact filter.
#[instrument(skip(state, request), fields(subject_id = %request.subject_id))]
pub async fn post_sos(
    State(state): State<AppState>,
    Json(request): Json<SosRequest>,
) -> Result<(StatusCode, Json<SosResponse>), CoreError> {
    let (alert, notified) = state.engine.trigger_sos(request).await?;
    Ok((StatusCode::CREATED, Json(SosResponse { alert, notified })))
}

/// POST /contacts - Add or update a contact.
#[instrument(skip(state, contact), fields(subject_id = %contact.subject_id))]
pub async fn post_contact(
    State(state): State<AppState>,
    Json(contact): Json<Contact>,
) -> Result<(StatusCode, Json<Contact>), CoreError> {
    let contact = state.engine.upsert_contact(contact).await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

/// GET /contacts - List a subject's care network.
#[instrument(skip(state))]
pub async fn get_contacts(
    State(state): State<AppState>,
    Query(query): Query<ContactsQuery>,
) -> Result<Json<Vec<Contact>>, CoreError> {
    let contacts = state.engine.list_contacts(&query.subject_id).await?;
    Ok(Json(contacts))
}

/// GET /health - Health check.
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "vigil" }))
}
