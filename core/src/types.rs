//! Domain types for the registration engine.
//!
//! Value objects, entities, and request/response shapes shared by every
//! backend. The authoritative copies of these live in the relational
//! store; cache projections carry the same types but are never treated
//! as a source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user (attendee or organizer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegistrationId(Uuid);

impl RegistrationId {
    /// Creates a new random `RegistrationId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `RegistrationId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status enums
// ============================================================================

/// Event lifecycle status.
///
/// Events are never deleted, only status-transitioned:
/// `Draft → Published → {Cancelled, Completed}`, with `Cancelled`
/// reachable from any state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Being configured by the organizer; not visible, not registrable.
    Draft,
    /// Open for registration.
    Published,
    /// Cancelled; all active registrations were cascade-cancelled.
    Cancelled,
    /// The event took place.
    Completed,
}

impl EventStatus {
    /// Stable string form used in storage and API payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Parse the storage string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "cancelled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    /// Slot held, awaiting an external payment-confirmed signal.
    ///
    /// Counts against capacity exactly like `Confirmed`.
    Pending,
    /// Slot held and settled.
    Confirmed,
    /// Capacity was full at registration time; queued FIFO by creation
    /// time for promotion when a slot frees up.
    Waitlisted,
    /// Cancelled by the user, by payment failure, or by event
    /// cancellation. Kept for history; never hard-deleted.
    Cancelled,
}

impl RegistrationStatus {
    /// Whether this registration is still live for the (event, user)
    /// uniqueness rule.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Whether this registration occupies a confirmed-capacity slot.
    #[must_use]
    pub const fn holds_slot(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Stable string form used in storage and API payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Waitlisted => "waitlisted",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "waitlisted" => Some(Self::Waitlisted),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External payment outcome delivered by the payment collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentSignal {
    /// Payment captured; a `Pending` registration becomes `Confirmed`.
    Confirmed,
    /// Payment failed; the `Pending` registration is cancelled and its
    /// slot is released (with waitlist promotion).
    Failed,
}

// ============================================================================
// Entities
// ============================================================================

/// When and where (in time) an event takes place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSchedule {
    /// Start instant (UTC).
    pub starts_at: DateTime<Utc>,
    /// End instant (UTC).
    pub ends_at: DateTime<Utc>,
    /// IANA timezone name for display purposes (e.g. "Europe/Paris").
    pub timezone: String,
}

/// An event row as owned by the Event Store.
///
/// `confirmed_count` is derived and maintained: it always equals the
/// number of registrations holding a slot (`pending` + `confirmed`)
/// and is only ever mutated inside the arbiter's atomic unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// The organizer who owns this event.
    pub organizer_id: UserId,
    /// Event title.
    pub title: String,
    /// Schedule (start, end, timezone).
    pub schedule: EventSchedule,
    /// Hard capacity limit; `None` means unlimited.
    pub max_capacity: Option<u32>,
    /// Count of slot-holding registrations. Derived, never set by clients.
    pub confirmed_count: u32,
    /// Whether a full event queues registrants instead of rejecting them.
    pub waitlist_enabled: bool,
    /// Whether registrations start as `Pending` awaiting payment.
    pub requires_payment: bool,
    /// Lifecycle status.
    pub status: EventStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Whether the event still has at least one free confirmed slot.
    #[must_use]
    pub fn has_free_slot(&self) -> bool {
        self.max_capacity.is_none_or(|max| self.confirmed_count < max)
    }

    /// Number of free slots, `None` for unlimited capacity.
    #[must_use]
    pub fn free_slots(&self) -> Option<u32> {
        self.max_capacity
            .map(|max| max.saturating_sub(self.confirmed_count))
    }
}

/// Attendee identity as supplied by the identity provider.
///
/// Trusted as-is; the engine never re-validates credentials.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    /// Authenticated user id.
    pub user_id: UserId,
    /// Display name for notifications and organizer listings.
    pub display_name: String,
    /// Contact email.
    pub email: String,
}

/// A registration row as owned by the Registration Ledger.
///
/// At most one active (non-cancelled) registration exists per
/// (event, user) pair; `created_at` is the FIFO key for waitlist
/// promotion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    /// Unique registration identifier.
    pub id: RegistrationId,
    /// Event being attended.
    pub event_id: EventId,
    /// Registered user.
    pub user_id: UserId,
    /// Attendee display name (identity provider snapshot).
    pub display_name: String,
    /// Attendee email (identity provider snapshot).
    pub email: String,
    /// Lifecycle status.
    pub status: RegistrationStatus,
    /// Creation timestamp; waitlist promotion order.
    pub created_at: DateTime<Utc>,
    /// Last status change timestamp.
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Operation inputs and outcomes
// ============================================================================

/// Input for creating a new draft event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventDraft {
    /// Organizer creating the event.
    pub organizer_id: UserId,
    /// Event title.
    pub title: String,
    /// Schedule.
    pub schedule: EventSchedule,
    /// Optional hard capacity.
    pub max_capacity: Option<u32>,
    /// Whether to queue registrants past capacity.
    pub waitlist_enabled: bool,
    /// Whether registrations require payment to confirm.
    pub requires_payment: bool,
}

/// Partial update applied to an existing event.
///
/// `max_capacity` is doubly optional: `None` leaves the capacity
/// untouched, `Some(None)` removes the limit, `Some(Some(n))` sets it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventChanges {
    /// New title, if changing.
    pub title: Option<String>,
    /// New schedule, if changing.
    pub schedule: Option<EventSchedule>,
    /// New capacity limit, if changing.
    pub max_capacity: Option<Option<u32>>,
    /// New waitlist policy, if changing.
    pub waitlist_enabled: Option<bool>,
}

impl EventChanges {
    /// Whether the update carries no changes at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.schedule.is_none()
            && self.max_capacity.is_none()
            && self.waitlist_enabled.is_none()
    }
}

/// Result of updating an event: the new row plus any waitlisted
/// registrations promoted by a capacity raise.
#[derive(Clone, Debug)]
pub struct EventUpdate {
    /// Event after the update.
    pub event: Event,
    /// Registrations promoted FIFO into newly freed slots.
    pub promoted: Vec<Registration>,
}

/// Result of cancelling an event: the cancelled row plus every
/// registration that was cascade-cancelled with it.
#[derive(Clone, Debug)]
pub struct EventCancellation {
    /// Event after the cancellation.
    pub event: Event,
    /// Registrations that were active and are now cancelled.
    pub cancelled: Vec<Registration>,
}

/// Result of admitting a registration intent.
#[derive(Clone, Debug)]
pub struct Admission {
    /// The registration as it stands after the call.
    pub registration: Registration,
    /// True when the attendee already held an active registration and
    /// the existing row came back unchanged.
    pub resubmission: bool,
}

/// Result of cancelling a registration.
#[derive(Clone, Debug)]
pub struct CancelOutcome {
    /// The registration that was cancelled.
    pub cancelled: Registration,
    /// The oldest waitlisted registration, promoted into the freed
    /// slot in the same atomic unit (if any existed).
    pub promoted: Option<Registration>,
}

// ============================================================================
// List filters
// ============================================================================

/// Filter, sort and pagination parameters for event listings.
///
/// The canonical [`signature`](EventFilter::signature) keys the list
/// cache; two filters that select the same rows must render the same
/// signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only events owned by this organizer.
    pub organizer_id: Option<UserId>,
    /// Only events in this status.
    pub status: Option<EventStatus>,
    /// Only events starting at or after this instant.
    pub starts_after: Option<DateTime<Utc>>,
    /// Zero-indexed page.
    pub page: u32,
    /// Page size (callers should clamp; the stores do not).
    pub page_size: u32,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            organizer_id: None,
            status: None,
            starts_after: None,
            page: 0,
            page_size: 20,
        }
    }
}

impl EventFilter {
    /// Canonical cache-key signature of this filter.
    ///
    /// Fields are rendered in a fixed order with stable formats so the
    /// same logical filter always produces the same key.
    #[must_use]
    pub fn signature(&self) -> String {
        let organizer = self
            .organizer_id
            .map_or_else(|| "*".to_string(), |id| id.to_string());
        let status = self.status.map_or("*", |s| s.as_str());
        let starts_after = self
            .starts_after
            .map_or_else(|| "*".to_string(), |t| t.timestamp().to_string());
        format!(
            "o={organizer}&s={status}&a={starts_after}&p={}&n={}",
            self.page, self.page_size
        )
    }
}
