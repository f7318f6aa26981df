//! Change notifications announced to downstream consumers.
//!
//! Every committed state transition produces exactly one
//! [`ChangeEnvelope`]. Envelopes are staged in the transactional outbox
//! inside the same transaction as the transition and drained to the
//! durable topic afterwards, so a crash between commit and publish is
//! recovered rather than lost.
//!
//! # Delivery semantics
//!
//! At-least-once. Consumers (search indexer, real-time gateway,
//! notification sender) must deduplicate on `message_id`. No global
//! order is guaranteed; envelopes for the same event are keyed by
//! `event_id` so per-event causal order survives partitioning.
//!
//! # Kind naming convention
//!
//! Kind strings carry a version suffix (`RegistrationConfirmed.v1`) so
//! payload schemas can evolve without breaking consumers.

use crate::types::{Event, EventId, Registration};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default topic change envelopes are announced on.
///
/// Deployments override this through service configuration; the
/// in-memory engine and the outbox default to it.
pub const CHANGES_TOPIC: &str = "turnout.changes";

/// A committed state transition, described for downstream consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum Change {
    /// An event moved from draft to published.
    EventPublished {
        /// The event as published.
        event: Event,
    },
    /// An event's attributes changed while it remained visible.
    EventUpdated {
        /// The event after the update.
        event: Event,
    },
    /// An event was cancelled; its active registrations were
    /// cascade-cancelled in the same transaction (each announced
    /// separately as `RegistrationCancelled`).
    EventCancelled {
        /// The event after cancellation.
        event: Event,
    },
    /// A registration reached `confirmed`, either directly or when a
    /// pending registration's payment settled.
    RegistrationConfirmed {
        /// The confirmed registration.
        registration: Registration,
    },
    /// Capacity was full; the registrant was queued.
    RegistrationWaitlisted {
        /// The waitlisted registration.
        registration: Registration,
    },
    /// The oldest waitlisted registration took over a freed slot.
    RegistrationPromoted {
        /// The promoted registration.
        registration: Registration,
    },
    /// A registration was cancelled (by the user, by payment failure,
    /// or by event cancellation).
    RegistrationCancelled {
        /// The cancelled registration.
        registration: Registration,
    },
    /// The event's confirmed count or capacity limit changed.
    CapacityChanged {
        /// The event whose capacity accounting changed.
        event_id: EventId,
        /// Slot-holding registrations after the mutation.
        confirmed_count: u32,
        /// Capacity limit after the mutation.
        max_capacity: Option<u32>,
    },
}

impl Change {
    /// Stable, versioned kind identifier for routing and storage.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::EventPublished { .. } => "EventPublished.v1",
            Self::EventUpdated { .. } => "EventUpdated.v1",
            Self::EventCancelled { .. } => "EventCancelled.v1",
            Self::RegistrationConfirmed { .. } => "RegistrationConfirmed.v1",
            Self::RegistrationWaitlisted { .. } => "RegistrationWaitlisted.v1",
            Self::RegistrationPromoted { .. } => "RegistrationPromoted.v1",
            Self::RegistrationCancelled { .. } => "RegistrationCancelled.v1",
            Self::CapacityChanged { .. } => "CapacityChanged.v1",
        }
    }
}

/// Envelope wrapping a [`Change`] with delivery metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    /// Consumer idempotency key; unique per logical transition.
    pub message_id: Uuid,
    /// The event this change belongs to; partition key on the topic.
    pub event_id: EventId,
    /// When the originating transaction observed the change.
    pub occurred_at: DateTime<Utc>,
    /// The transition itself.
    pub change: Change,
}

impl ChangeEnvelope {
    /// Wrap a change with a fresh message id.
    #[must_use]
    pub fn new(event_id: EventId, occurred_at: DateTime<Utc>, change: Change) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            event_id,
            occurred_at,
            change,
        }
    }

    /// Versioned kind of the wrapped change.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.change.kind()
    }

    /// Serialize to the JSON wire/outbox form.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error if serialization
    /// fails (practically unreachable for these types).
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Deserialize from the JSON wire/outbox form.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error for malformed or
    /// incompatible payloads.
    pub fn from_json(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{EventSchedule, EventStatus, UserId};

    fn sample_event() -> Event {
        let now = Utc::now();
        Event {
            id: EventId::new(),
            organizer_id: UserId::new(),
            title: "Launch party".to_string(),
            schedule: EventSchedule {
                starts_at: now,
                ends_at: now,
                timezone: "UTC".to_string(),
            },
            max_capacity: Some(100),
            confirmed_count: 0,
            waitlist_enabled: true,
            requires_payment: false,
            status: EventStatus::Published,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn envelope_json_round_trip() {
        let event = sample_event();
        let envelope = ChangeEnvelope::new(
            event.id,
            Utc::now(),
            Change::EventPublished { event },
        );
        let json = envelope.to_json().unwrap();
        let decoded = ChangeEnvelope::from_json(json).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.kind(), "EventPublished.v1");
    }

    #[test]
    fn message_ids_are_unique_per_envelope() {
        let event = sample_event();
        let a = ChangeEnvelope::new(
            event.id,
            Utc::now(),
            Change::CapacityChanged {
                event_id: event.id,
                confirmed_count: 1,
                max_capacity: Some(100),
            },
        );
        let b = ChangeEnvelope::new(
            event.id,
            Utc::now(),
            Change::CapacityChanged {
                event_id: event.id,
                confirmed_count: 1,
                max_capacity: Some(100),
            },
        );
        assert_ne!(a.message_id, b.message_id);
    }
}
