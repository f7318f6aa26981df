//! Registration API endpoints.
//!
//! - POST /api/events/:id/registrations - Register the caller
//! - DELETE /api/events/:id/registrations - Cancel the caller's registration
//! - GET /api/events/:id/registrations - List registrations (organizer only)
//! - GET /api/events/:id/registrations/me - The caller's registration status
//! - GET /api/registrations - The caller's registrations across events
//! - POST /api/registrations/:id/payment - Payment collaborator callback

use crate::api::error::ApiError;
use crate::api::identity::Identity;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use turnout_core::{
    EngineError, EventId, PaymentSignal, Registration, RegistrationId, RegistrationStatus,
};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Registration details response.
#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    /// Registration ID
    pub id: Uuid,
    /// Event ID
    pub event_id: Uuid,
    /// Registered user ID
    pub user_id: Uuid,
    /// Display name snapshot
    pub display_name: String,
    /// Lifecycle status
    pub status: RegistrationStatus,
    /// Creation timestamp (waitlist FIFO key)
    pub created_at: DateTime<Utc>,
    /// Last status change timestamp
    pub updated_at: DateTime<Utc>,
}

impl From<Registration> for RegistrationResponse {
    fn from(registration: Registration) -> Self {
        Self {
            id: *registration.id.as_uuid(),
            event_id: *registration.event_id.as_uuid(),
            user_id: *registration.user_id.as_uuid(),
            display_name: registration.display_name,
            status: registration.status,
            created_at: registration.created_at,
            updated_at: registration.updated_at,
        }
    }
}

/// Response after cancelling a registration.
#[derive(Debug, Serialize)]
pub struct CancelRegistrationResponse {
    /// The cancelled registration
    pub cancelled: RegistrationResponse,
    /// The waitlisted registration promoted into the freed slot, if any
    pub promoted: Option<RegistrationResponse>,
}

/// Response for a registration listing.
#[derive(Debug, Serialize)]
pub struct ListRegistrationsResponse {
    /// Registrations
    pub registrations: Vec<RegistrationResponse>,
    /// Total count
    pub total: usize,
}

/// The caller's registration status for one event.
#[derive(Debug, Serialize)]
pub struct MyRegistrationResponse {
    /// Whether the caller holds an active registration
    pub registered: bool,
    /// The active registration, when one exists
    pub registration: Option<RegistrationResponse>,
}

/// Query parameters for the caller's registration listing.
#[derive(Debug, Deserialize)]
pub struct MyRegistrationsQuery {
    /// Only registrations in this status
    pub status: Option<String>,
}

/// Payment outcome delivered by the payment collaborator.
#[derive(Debug, Deserialize)]
pub struct PaymentSignalRequest {
    /// "confirmed" or "failed"
    pub signal: PaymentSignal,
}

// ============================================================================
// Handlers
// ============================================================================

/// Register the caller for an event.
///
/// Returns 201 with the applied registration: confirmed (or pending on
/// paid events) while capacity remains, waitlisted when full and the
/// event queues, 409 when full without a waitlist. Re-submission
/// returns the existing registration with 200; the arbiter reports
/// which case applied, so no separate lookup races the decision.
pub async fn register(
    identity: Identity,
    Path(event_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<RegistrationResponse>), ApiError> {
    let event_id = EventId::from_uuid(event_id);
    let attendee = identity.into_attendee()?;

    let admission = state.registrations.register(event_id, attendee).await?;
    let status = if admission.resubmission {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(admission.registration.into())))
}

/// Cancel the caller's active registration.
pub async fn cancel_registration(
    identity: Identity,
    Path(event_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<CancelRegistrationResponse>, ApiError> {
    let outcome = state
        .registrations
        .cancel(EventId::from_uuid(event_id), identity.user_id)
        .await?;
    Ok(Json(CancelRegistrationResponse {
        cancelled: outcome.cancelled.into(),
        promoted: outcome.promoted.map(Into::into),
    }))
}

/// List an event's registrations, waitlist in FIFO order.
///
/// Organizer only.
pub async fn list_event_registrations(
    identity: Identity,
    Path(event_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ListRegistrationsResponse>, ApiError> {
    let id = EventId::from_uuid(event_id);
    let event = state
        .events
        .get_event(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Event", event_id))?;
    if event.organizer_id != identity.user_id {
        return Err(EngineError::Unauthorized {
            event_id: id,
            user_id: identity.user_id,
        }
        .into());
    }

    let registrations = state.registrations.event_registrations(id).await?;
    let registrations: Vec<RegistrationResponse> =
        registrations.into_iter().map(Into::into).collect();
    Ok(Json(ListRegistrationsResponse {
        total: registrations.len(),
        registrations,
    }))
}

/// The caller's registration status for one event.
///
/// The boolean flag is served from the cache mirror when possible.
pub async fn my_registration(
    identity: Identity,
    Path(event_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<MyRegistrationResponse>, ApiError> {
    let event_id = EventId::from_uuid(event_id);
    let registered = state
        .registrations
        .is_registered(event_id, identity.user_id)
        .await?;
    let registration = if registered {
        state
            .registrations
            .active_registration(event_id, identity.user_id)
            .await?
    } else {
        None
    };
    Ok(Json(MyRegistrationResponse {
        registered,
        registration: registration.map(Into::into),
    }))
}

/// The caller's registrations across all events, newest first.
pub async fn my_registrations(
    identity: Identity,
    Query(query): Query<MyRegistrationsQuery>,
    State(state): State<AppState>,
) -> Result<Json<ListRegistrationsResponse>, ApiError> {
    let status = match query.status.as_deref() {
        None => None,
        Some(s) => Some(
            RegistrationStatus::parse(s)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown status '{s}'")))?,
        ),
    };

    let registrations = state
        .registrations
        .my_registrations(identity.user_id, status)
        .await?;
    let registrations: Vec<RegistrationResponse> =
        registrations.into_iter().map(Into::into).collect();
    Ok(Json(ListRegistrationsResponse {
        total: registrations.len(),
        registrations,
    }))
}

/// Apply an external payment outcome to a pending registration.
///
/// Called by the payment collaborator, not end users. Idempotent for
/// repeated signals.
pub async fn payment_signal(
    Path(registration_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<PaymentSignalRequest>,
) -> Result<Json<RegistrationResponse>, ApiError> {
    let registration = state
        .registrations
        .mark_payment_status(RegistrationId::from_uuid(registration_id), request.signal)
        .await?;
    Ok(Json(registration.into()))
}
