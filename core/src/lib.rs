//! Domain types and trait seams for the Turnout registration engine.
//!
//! Turnout keeps one invariant above all others: an event with a
//! capacity limit never confirms more registrations than the limit,
//! no matter how many requests race. Everything in this crate exists
//! to state that contract precisely:
//!
//! - [`types`]: events, registrations, statuses and their transition
//!   rules.
//! - [`error`]: the classified error taxonomy
//!   (validation / conflict / contention / infrastructure).
//! - [`change`]: the committed-change notifications announced through
//!   the transactional outbox.
//! - [`store`]: the trait seams — [`EventStore`], [`CapacityArbiter`],
//!   [`RegistrationLedger`], [`CacheMirror`], [`Announcer`] — that the
//!   Postgres, Redis and Redpanda crates implement.
//! - [`clock`]: injectable time source.
//!
//! The crate holds no I/O; implementations live in the sibling crates.

pub mod change;
pub mod clock;
pub mod error;
pub mod store;
pub mod types;

pub use change::{CHANGES_TOPIC, Change, ChangeEnvelope};
pub use clock::{Clock, SystemClock};
pub use error::{EngineError, Result};
pub use store::{
    AnnounceError, Announcer, BoxFuture, CacheError, CacheMirror, CacheResult, CapacityArbiter,
    EventStore, RegistrationLedger, StagedChange,
};
pub use types::{
    Admission, Attendee, CancelOutcome, Event, EventCancellation, EventChanges, EventDraft,
    EventFilter, EventId, EventSchedule, EventStatus, EventUpdate, PaymentSignal, Registration,
    RegistrationId, RegistrationStatus, UserId,
};
