//! Event management API endpoints.
//!
//! - POST /api/events - Create a draft event
//! - GET /api/events - List events (filterable, paginated)
//! - GET /api/events/:id - Get a single event
//! - PUT /api/events/:id - Update an event (organizer only)
//! - POST /api/events/:id/publish - Open for registration (organizer only)
//! - POST /api/events/:id/cancel - Cancel, cascading registrations (organizer only)
//! - POST /api/events/:id/complete - Mark as completed (organizer only)

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
    Event, EventChanges, EventDraft, EventFilter, EventId, EventSchedule, EventStatus,
};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to create a new draft event.
#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    /// Event title
    pub title: String,
    /// Start instant (UTC)
    pub starts_at: DateTime<Utc>,
    /// End instant (UTC)
    pub ends_at: DateTime<Utc>,
    /// IANA timezone name for display
    pub timezone: String,
    /// Hard capacity limit; omit for unlimited
    pub max_capacity: Option<u32>,
    /// Queue registrants past capacity instead of rejecting
    #[serde(default)]
    pub waitlist_enabled: bool,
    /// Registrations start pending until payment confirms
    #[serde(default)]
    pub requires_payment: bool,
}

/// Partial update to an event.
///
/// `max_capacity` is doubly optional: absent leaves the limit
/// untouched, `null` removes it, a number sets it.
#[derive(Debug, Deserialize)]
pub struct UpdateEventRequest {
    /// New title
    pub title: Option<String>,
    /// New start instant
    pub starts_at: Option<DateTime<Utc>>,
    /// New end instant
    pub ends_at: Option<DateTime<Utc>>,
    /// New timezone
    pub timezone: Option<String>,
    /// New capacity limit
    #[serde(default, deserialize_with = "double_option")]
    pub max_capacity: Option<Option<u32>>,
    /// New waitlist policy
    pub waitlist_enabled: Option<bool>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<u32>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<u32>::deserialize(deserializer).map(Some)
}

/// Event listing query parameters.
#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    /// Only events owned by this organizer
    pub organizer_id: Option<Uuid>,
    /// Only events in this status
    pub status: Option<String>,
    /// Only events starting at or after this instant
    pub starts_after: Option<DateTime<Utc>>,
    /// Zero-indexed page
    pub page: Option<u32>,
    /// Page size (clamped to 100)
    pub page_size: Option<u32>,
}

/// Event details response.
#[derive(Debug, Serialize)]
pub struct EventResponse {
    /// Event ID
    pub id: Uuid,
    /// Organizer user ID
    pub organizer_id: Uuid,
    /// Title
    pub title: String,
    /// Start instant
    pub starts_at: DateTime<Utc>,
    /// End instant
    pub ends_at: DateTime<Utc>,
    /// Display timezone
    pub timezone: String,
    /// Capacity limit, if any
    pub max_capacity: Option<u32>,
    /// Slot-holding registration count
    pub confirmed_count: u32,
    /// Free slots, `null` for unlimited
    pub free_slots: Option<u32>,
    /// Waitlist policy
    pub waitlist_enabled: bool,
    /// Payment requirement
    pub requires_payment: bool,
    /// Lifecycle status
    pub status: EventStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        Self {
            id: *event.id.as_uuid(),
            organizer_id: *event.organizer_id.as_uuid(),
            title: event.title,
            starts_at: event.schedule.starts_at,
            ends_at: event.schedule.ends_at,
            timezone: event.schedule.timezone,
            max_capacity: event.max_capacity,
            free_slots: event.max_capacity.map(|max| max.saturating_sub(event.confirmed_count)),
            confirmed_count: event.confirmed_count,
            waitlist_enabled: event.waitlist_enabled,
            requires_payment: event.requires_payment,
            status: event.status,
            created_at: event.created_at,
            updated_at: event.updated_at,
        }
    }
}

/// Response for event listings.
#[derive(Debug, Serialize)]
pub struct ListEventsResponse {
    /// Matching events, ordered by start time
    pub events: Vec<EventResponse>,
    /// Count on this page
    pub total: usize,
}

/// Response for an update, including any waitlist promotions.
#[derive(Debug, Serialize)]
pub struct UpdateEventResponse {
    /// Event after the update
    pub event: EventResponse,
    /// Registration IDs promoted into newly freed slots
    pub promoted: Vec<Uuid>,
}

/// Response for an event cancellation.
#[derive(Debug, Serialize)]
pub struct CancelEventResponse {
    /// Event after the cancellation
    pub event: EventResponse,
    /// Number of registrations cascade-cancelled
    pub cancelled_registrations: usize,
}

// ============================================================================
// Handlers
// ============================================================================

const MAX_PAGE_SIZE: u32 = 100;

/// Create a new draft event owned by the caller.
pub async fn create_event(
    identity: Identity,
    State(state): State<AppState>,
    Json(request): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<EventResponse>), ApiError> {
    let draft = EventDraft {
        organizer_id: identity.user_id,
        title: request.title,
        schedule: EventSchedule {
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            timezone: request.timezone,
        },
        max_capacity: request.max_capacity,
        waitlist_enabled: request.waitlist_enabled,
        requires_payment: request.requires_payment,
    };
    let event = state.events.create_event(draft).await?;
    Ok((StatusCode::CREATED, Json(event.into())))
}

/// Get a single event.
pub async fn get_event(
    Path(event_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<EventResponse>, ApiError> {
    let id = EventId::from_uuid(event_id);
    let event = state
        .events
        .get_event(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Event", event_id))?;
    Ok(Json(event.into()))
}

/// List events matching the query.
pub async fn list_events(
    Query(query): Query<ListEventsQuery>,
    State(state): State<AppState>,
) -> Result<Json<ListEventsResponse>, ApiError> {
    let status = match query.status.as_deref() {
        None => None,
        Some(s) => Some(
            EventStatus::parse(s)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown status '{s}'")))?,
        ),
    };
    let defaults = EventFilter::default();
    let filter = EventFilter {
        organizer_id: query.organizer_id.map(turnout_core::UserId::from_uuid),
        status,
        starts_after: query.starts_after,
        page: query.page.unwrap_or(defaults.page),
        page_size: query
            .page_size
            .unwrap_or(defaults.page_size)
            .min(MAX_PAGE_SIZE),
    };

    let events = state.events.list_events(filter).await?;
    let events: Vec<EventResponse> = events.into_iter().map(Into::into).collect();
    Ok(Json(ListEventsResponse {
        total: events.len(),
        events,
    }))
}

/// Apply a partial update to an event the caller organizes.
pub async fn update_event(
    identity: Identity,
    Path(event_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<UpdateEventRequest>,
) -> Result<Json<UpdateEventResponse>, ApiError> {
    let id = EventId::from_uuid(event_id);
    let schedule = match (request.starts_at, request.ends_at, request.timezone) {
        (None, None, None) => None,
        (starts_at, ends_at, timezone) => {
            let current = state
                .events
                .get_event(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Event", event_id))?;
            Some(EventSchedule {
                starts_at: starts_at.unwrap_or(current.schedule.starts_at),
                ends_at: ends_at.unwrap_or(current.schedule.ends_at),
                timezone: timezone.unwrap_or(current.schedule.timezone),
            })
        }
    };
    let changes = EventChanges {
        title: request.title,
        schedule,
        max_capacity: request.max_capacity,
        waitlist_enabled: request.waitlist_enabled,
    };

    let update = state
        .events
        .update_event(id, identity.user_id, changes)
        .await?;
    Ok(Json(UpdateEventResponse {
        event: update.event.into(),
        promoted: update
            .promoted
            .iter()
            .map(|r| *r.id.as_uuid())
            .collect(),
    }))
}

/// Publish a draft event, opening it for registration.
pub async fn publish_event(
    identity: Identity,
    Path(event_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<EventResponse>, ApiError> {
    let event = state
        .events
        .publish_event(EventId::from_uuid(event_id), identity.user_id)
        .await?;
    Ok(Json(event.into()))
}

/// Cancel an event, cascade-cancelling every active registration.
pub async fn cancel_event(
    identity: Identity,
    Path(event_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<CancelEventResponse>, ApiError> {
    let cancellation = state
        .events
        .cancel_event(EventId::from_uuid(event_id), identity.user_id)
        .await?;
    Ok(Json(CancelEventResponse {
        event: cancellation.event.into(),
        cancelled_registrations: cancellation.cancelled.len(),
    }))
}

/// Mark a published event as completed once it has ended.
pub async fn complete_event(
    identity: Identity,
    Path(event_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<EventResponse>, ApiError> {
    let event = state
        .events
        .complete_event(EventId::from_uuid(event_id), identity.user_id)
        .await?;
    Ok(Json(event.into()))
}
