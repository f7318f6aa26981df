//! Trait seams between the engine's components.
//!
//! The authoritative store (events + registrations + counters) sits
//! behind [`EventStore`], [`CapacityArbiter`] and
//! [`RegistrationLedger`]; the disposable read layer behind
//! [`CacheMirror`]; the durable notification channel behind
//! [`Announcer`]. Production wiring uses the Postgres, Redis and
//! Redpanda crates; tests use the in-memory implementations from
//! `turnout-testing`.
//!
//! # Dyn compatibility
//!
//! All traits return explicit `Pin<Box<dyn Future>>` instead of
//! `async fn` so they can be held as `Arc<dyn …>` by the service layer.
//! Implementations clone borrowed arguments into the returned future.
//!
//! # Atomicity contract
//!
//! Every mutating method on [`EventStore`] and [`CapacityArbiter`] is
//! one atomic unit: the state transition, the derived-counter
//! mutation, any cascade or promotion, and the staging of the
//! corresponding [`ChangeEnvelope`]s all commit together or not at
//! all. A partially applied mutation is a bug in the implementation,
//! not a condition callers handle.

use crate::change::ChangeEnvelope;
use crate::error::Result;
use crate::types::{
    Admission, Attendee, CancelOutcome, Event, EventCancellation, EventChanges, EventDraft,
    EventFilter, EventId, EventUpdate, PaymentSignal, Registration, RegistrationId,
    RegistrationStatus, UserId,
};
use thiserror::Error;

/// Boxed future alias used by the dyn-compatible traits.
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;

// ============================================================================
// Event Store
// ============================================================================

/// Owner of event rows and their lifecycle.
///
/// Lifecycle rules: events are created in `Draft`, move to `Published`
/// only from `Draft`, can be `Cancelled` from any state (cascading
/// registration cancellation, no promotion), and move from `Published`
/// to `Completed` after they end. Rows are never deleted.
pub trait EventStore: Send + Sync {
    /// Create a new event in `Draft`.
    fn create_event(&self, draft: EventDraft) -> BoxFuture<'_, Result<Event>>;

    /// Fetch a single event from the authoritative store.
    fn get_event(&self, id: EventId) -> BoxFuture<'_, Result<Option<Event>>>;

    /// List events matching a filter, ordered by start time.
    fn list_events(&self, filter: EventFilter) -> BoxFuture<'_, Result<Vec<Event>>>;

    /// Publish a draft event, opening it for registration.
    ///
    /// Announces `EventPublished`.
    fn publish_event(&self, id: EventId, organizer: UserId) -> BoxFuture<'_, Result<Event>>;

    /// Apply a partial update to a draft or published event.
    ///
    /// Raising (or removing) the capacity limit promotes waitlisted
    /// registrations FIFO into the new slots within the same atomic
    /// unit. Lowering the limit below `confirmed_count` is rejected.
    /// Announces `EventUpdated`, one `RegistrationPromoted` per
    /// promotion, and `CapacityChanged` when the accounting moved.
    fn update_event(
        &self,
        id: EventId,
        organizer: UserId,
        changes: EventChanges,
    ) -> BoxFuture<'_, Result<EventUpdate>>;

    /// Cancel an event, cascade-cancelling every active registration.
    ///
    /// No promotion occurs. Announces `EventCancelled` plus one
    /// `RegistrationCancelled` per cascaded row. Idempotent: cancelling
    /// an already-cancelled event returns it unchanged.
    fn cancel_event(&self, id: EventId, organizer: UserId)
    -> BoxFuture<'_, Result<EventCancellation>>;

    /// Mark a published event as completed once it has ended.
    ///
    /// Announces `EventUpdated`.
    fn complete_event(&self, id: EventId, organizer: UserId) -> BoxFuture<'_, Result<Event>>;
}

// ============================================================================
// Capacity Arbiter
// ============================================================================

/// The atomic decision unit that turns a registration intent into
/// exactly one of {confirmed, pending, waitlisted} or a classified
/// rejection, and applies it durably.
///
/// # Serialization point
///
/// Implementations serialize all capacity mutations for the *same*
/// event (a row lock or per-event mutex); unrelated events never
/// contend. Failing to acquire the point within a bounded timeout
/// yields [`EngineError::Busy`](crate::error::EngineError::Busy).
///
/// # Decision rule
///
/// The capacity check and the counter increment are indivisible: a
/// conditional update that only increments below the limit, executed
/// under the serialization point. The cache is never consulted.
pub trait CapacityArbiter: Send + Sync {
    /// Register an attendee for an event, reporting whether the call
    /// was an idempotent re-submission.
    ///
    /// Preconditions (checked inside the atomic unit, rejected with no
    /// side effects): the event is `Published` and starts in the
    /// future. An existing active registration for the pair makes the
    /// call an idempotent no-op returning that registration with
    /// `resubmission` set.
    ///
    /// Outcome: `Confirmed` (or `Pending` when the event requires
    /// payment) while a slot is free; `Waitlisted` when full and the
    /// event allows it; `CapacityFull` otherwise.
    fn admit(&self, event_id: EventId, attendee: Attendee) -> BoxFuture<'_, Result<Admission>>;

    /// Register an attendee for an event.
    ///
    /// [`CapacityArbiter::admit`] for callers that do not distinguish
    /// re-submissions.
    fn register(
        &self,
        event_id: EventId,
        attendee: Attendee,
    ) -> BoxFuture<'_, Result<Registration>> {
        Box::pin(async move { Ok(self.admit(event_id, attendee).await?.registration) })
    }

    /// Cancel the caller's active registration.
    ///
    /// Cancelling a slot-holding registration frees its slot and, in
    /// the same atomic unit, promotes the oldest waitlisted
    /// registration if one exists (net counter unchanged). Cancelling
    /// a waitlisted registration has no counter effect. Rejected with
    /// `CancellationWindowClosed` inside the configured cutoff.
    fn cancel(&self, event_id: EventId, user_id: UserId) -> BoxFuture<'_, Result<CancelOutcome>>;

    /// Apply an external payment outcome to a pending registration.
    ///
    /// `Confirmed` settles the slot already held (no counter change);
    /// `Failed` cancels the registration through the same path as a
    /// user cancellation (slot freed, waitlist promoted). Idempotent
    /// for repeated signals.
    fn mark_payment_status(
        &self,
        registration_id: RegistrationId,
        signal: PaymentSignal,
    ) -> BoxFuture<'_, Result<Registration>>;
}

// ============================================================================
// Registration Ledger (read side)
// ============================================================================

/// Read-only projections over registration rows.
pub trait RegistrationLedger: Send + Sync {
    /// All registrations for a user, optionally filtered by status,
    /// newest first.
    fn registrations_for_user(
        &self,
        user_id: UserId,
        status: Option<RegistrationStatus>,
    ) -> BoxFuture<'_, Result<Vec<Registration>>>;

    /// All registrations for an event, waitlist in FIFO order.
    fn registrations_for_event(&self, event_id: EventId)
    -> BoxFuture<'_, Result<Vec<Registration>>>;

    /// The active registration for a (event, user) pair, if any.
    fn active_registration(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> BoxFuture<'_, Result<Option<Registration>>>;
}

// ============================================================================
// Announcer
// ============================================================================

/// Errors from the durable notification channel.
#[derive(Error, Debug, Clone)]
pub enum AnnounceError {
    /// Could not reach the broker.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker rejected or timed out a publish.
    #[error("publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },
}

/// Publisher for committed change notifications.
///
/// Called only by the outbox relay, after the originating transaction
/// committed. At-least-once: a publish acknowledged by the broker may
/// still be retried after a crash, so consumers deduplicate on
/// `message_id`.
pub trait Announcer: Send + Sync {
    /// Publish one serialized envelope.
    ///
    /// `key` is the originating event id; implementations must use it
    /// as the partition key so per-event order is preserved.
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> BoxFuture<'_, std::result::Result<(), AnnounceError>>;
}

// ============================================================================
// Cache Mirror
// ============================================================================

/// Errors from the cache layer.
///
/// These never surface to callers of the engine: every cache failure
/// degrades to a direct store read and is logged at `warn`.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The cache backend is unreachable or errored.
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// A cached value could not be encoded or decoded.
    #[error("cache codec error: {0}")]
    Codec(String),
}

/// Result alias for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// TTL-bounded, disposable read-through mirror of the Event Store.
///
/// Never a source of truth: the arbiter reads and writes the
/// authoritative store only. Single-event entries outlive list entries
/// (any matching event's mutation staleness hits lists first), and
/// list invalidation is broad — a generation marker bump — rather than
/// targeted.
pub trait CacheMirror: Send + Sync {
    /// Cached single-event projection.
    fn get_event(&self, id: EventId) -> BoxFuture<'_, CacheResult<Option<Event>>>;

    /// Populate the single-event projection.
    fn put_event(&self, event: &Event) -> BoxFuture<'_, CacheResult<()>>;

    /// Drop the single-event projection. Must be called after a
    /// committed mutation before it is considered externally visible.
    fn invalidate_event(&self, id: EventId) -> BoxFuture<'_, CacheResult<()>>;

    /// Cached list projection for a canonical filter signature.
    fn get_list(&self, signature: &str) -> BoxFuture<'_, CacheResult<Option<Vec<Event>>>>;

    /// Populate a list projection.
    fn put_list(&self, signature: &str, events: &[Event]) -> BoxFuture<'_, CacheResult<()>>;

    /// Invalidate all list projections (generation bump).
    fn invalidate_lists(&self) -> BoxFuture<'_, CacheResult<()>>;

    /// Cached is-registered flag, for presentation only.
    fn get_registered_flag(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> BoxFuture<'_, CacheResult<Option<bool>>>;

    /// Populate the is-registered flag.
    fn put_registered_flag(
        &self,
        event_id: EventId,
        user_id: UserId,
        registered: bool,
    ) -> BoxFuture<'_, CacheResult<()>>;

    /// Drop the is-registered flag after a registration mutation.
    fn invalidate_registered_flag(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> BoxFuture<'_, CacheResult<()>>;
}

/// A staged announcement: topic plus envelope, recorded inside the
/// originating atomic unit and delivered by the outbox relay.
#[derive(Clone, Debug)]
pub struct StagedChange {
    /// Destination topic.
    pub topic: String,
    /// The envelope to deliver.
    pub envelope: ChangeEnvelope,
}
