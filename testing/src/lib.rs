//! Test doubles for the Turnout registration engine.
//!
//! Everything here is deterministic and in-process:
//!
//! - [`InMemoryEngine`]: full store + arbiter + ledger over hash maps,
//!   with the production per-event serialization contract, so
//!   concurrency properties can be raced with real `tokio::spawn`.
//! - [`FixedClock`]: time that moves only when told to.
//! - [`RecordingAnnouncer`]: captures published envelopes.
//! - [`InMemoryCacheMirror`]: cache with an injectable failure switch.

mod announcer;
mod cache;
mod clock;
mod engine;

pub use announcer::{RecordedMessage, RecordingAnnouncer};
pub use cache::InMemoryCacheMirror;
pub use clock::FixedClock;
pub use engine::InMemoryEngine;

use chrono::Duration;
use turnout_core::{Attendee, Clock, EventDraft, EventSchedule, UserId};

/// A draft that starts tomorrow and ends an hour later.
#[must_use]
pub fn draft_starting_tomorrow(clock: &dyn Clock, max_capacity: Option<u32>) -> EventDraft {
    let starts_at = clock.now() + Duration::hours(24) + Duration::minutes(1);
    EventDraft {
        organizer_id: UserId::new(),
        title: "Community meetup".to_string(),
        schedule: EventSchedule {
            starts_at,
            ends_at: starts_at + Duration::hours(1),
            timezone: "UTC".to_string(),
        },
        max_capacity,
        waitlist_enabled: true,
        requires_payment: false,
    }
}

/// A fresh attendee with a unique user id.
#[must_use]
pub fn attendee(name: &str) -> Attendee {
    Attendee {
        user_id: UserId::new(),
        display_name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
    }
}
