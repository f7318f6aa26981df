//! Error taxonomy for the registration engine.
//!
//! Errors are classified the way callers must treat them:
//!
//! - **validation**: bad input or an event in the wrong lifecycle
//!   state; rejected synchronously with no side effects.
//! - **conflict**: expected, frequent outcomes (`CapacityFull`,
//!   `AlreadyRegistered`); never logged as failures.
//! - **contention**: the per-event serialization point could not be
//!   acquired within its timeout; retryable with backoff.
//! - **infrastructure**: the store is unavailable; the whole write
//!   fails — partial writes are prevented by the atomic unit, never
//!   repaired after the fact.
//!
//! Cache failures deliberately have no variant here: the Cache Mirror
//! is disposable and its errors are swallowed at the call site.

use crate::types::{EventId, RegistrationId, UserId};
use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the registration engine.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// The event exists but is not open for registration.
    #[error("event {0} is not published")]
    NotPublished(EventId),

    /// The event's start time is already in the past.
    #[error("event {0} has already started")]
    EventInPast(EventId),

    /// An active registration already exists for this (event, user)
    /// pair and the intent differs from a plain re-submission.
    #[error("user {user_id} is already registered for event {event_id}")]
    AlreadyRegistered {
        /// The event in question.
        event_id: EventId,
        /// The already-registered user.
        user_id: UserId,
    },

    /// The event is at capacity and does not allow waitlisting.
    #[error("event {0} is at capacity")]
    CapacityFull(EventId),

    /// No active registration exists for this (event, user) pair.
    #[error("user {user_id} has no active registration for event {event_id}")]
    NotRegistered {
        /// The event in question.
        event_id: EventId,
        /// The user attempting the cancellation.
        user_id: UserId,
    },

    /// The cancellation cutoff window has closed.
    #[error("cancellation window closed for event {0}")]
    CancellationWindowClosed(EventId),

    /// The caller is not the organizer of the event.
    #[error("user {user_id} is not the organizer of event {event_id}")]
    Unauthorized {
        /// The event in question.
        event_id: EventId,
        /// The unauthorized caller.
        user_id: UserId,
    },

    /// No event row exists for this id.
    #[error("event {0} not found")]
    EventNotFound(EventId),

    /// No registration row exists for this id.
    #[error("registration {0} not found")]
    RegistrationNotFound(RegistrationId),

    /// Input rejected before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The per-event serialization point could not be acquired within
    /// its timeout. Retryable with backoff.
    #[error("event is busy: {0}")]
    Busy(String),

    /// The authoritative store failed. The originating write did not
    /// happen (the atomic unit rolled back).
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Expected, frequent outcomes that must not be logged as failures.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRegistered { .. } | Self::CapacityFull(_)
        )
    }

    /// Whether the caller may retry the same call with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }

    /// Synchronous rejections with no side effects.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NotPublished(_)
                | Self::EventInPast(_)
                | Self::NotRegistered { .. }
                | Self::CancellationWindowClosed(_)
                | Self::Unauthorized { .. }
                | Self::EventNotFound(_)
                | Self::RegistrationNotFound(_)
                | Self::Validation(_)
        )
    }
}
