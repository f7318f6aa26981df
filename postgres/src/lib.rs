//! `PostgreSQL` backend for the Turnout registration engine.
//!
//! The authoritative store: event rows, registration rows, the derived
//! `confirmed_count`, and the transactional outbox all live here and
//! only change together.
//!
//! # Concurrency
//!
//! Every capacity mutation runs inside a transaction that first takes
//! the event row lock (`SELECT … FOR UPDATE`) under a bounded
//! `lock_timeout`. The lock is the per-event serialization point;
//! hitting the timeout surfaces as
//! [`EngineError::Busy`](turnout_core::EngineError::Busy) (SQLSTATE
//! `55P03`). The capacity decision itself is a conditional update that
//! only increments `confirmed_count` below the limit, so the check and
//! the increment cannot interleave with another writer.
//!
//! # Outbox
//!
//! Change envelopes are inserted into the `outbox` table inside the
//! originating transaction. [`OutboxRelay`] drains unpublished rows to
//! the announcer in insertion order, marking each row only after the
//! broker acknowledged it (at-least-once).

mod arbiter;
mod events;
mod ledger;
mod outbox;

pub use arbiter::{CapacityPolicy, PostgresArbiter};
pub use events::PostgresEventStore;
pub use ledger::PostgresLedger;
pub use outbox::OutboxRelay;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use turnout_core::{
    EngineError, Event, EventSchedule, EventStatus, Registration, RegistrationStatus, Result,
};
use uuid::Uuid;

/// Connect a pool to the authoritative database.
///
/// # Errors
///
/// Returns [`EngineError::Storage`] if the connection fails.
pub async fn connect_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| EngineError::Storage(format!("failed to connect: {e}")))
}

/// Run the schema migrations.
///
/// # Errors
///
/// Returns [`EngineError::Storage`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| EngineError::Storage(format!("migration failed: {e}")))?;
    Ok(())
}

/// Map a database error, surfacing lock timeouts as `Busy`.
pub(crate) fn map_db_err(e: sqlx::Error) -> EngineError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("55P03") {
            return EngineError::Busy(db.message().to_string());
        }
    }
    EngineError::Storage(e.to_string())
}

// Row tuples for the non-macro query_as path. Column order matches the
// SELECT lists in the sibling modules.

pub(crate) type EventRow = (
    Uuid,               // id
    Uuid,               // organizer_id
    String,             // title
    DateTime<Utc>,      // starts_at
    DateTime<Utc>,      // ends_at
    String,             // timezone
    Option<i32>,        // max_capacity
    i32,                // confirmed_count
    bool,               // waitlist_enabled
    bool,               // requires_payment
    String,             // status
    DateTime<Utc>,      // created_at
    DateTime<Utc>,      // updated_at
);

pub(crate) const EVENT_COLUMNS: &str = "id, organizer_id, title, starts_at, ends_at, timezone, \
     max_capacity, confirmed_count, waitlist_enabled, requires_payment, status, \
     created_at, updated_at";

pub(crate) fn event_from_row(row: EventRow) -> Result<Event> {
    let (
        id,
        organizer_id,
        title,
        starts_at,
        ends_at,
        timezone,
        max_capacity,
        confirmed_count,
        waitlist_enabled,
        requires_payment,
        status,
        created_at,
        updated_at,
    ) = row;
    let status = EventStatus::parse(&status)
        .ok_or_else(|| EngineError::Storage(format!("unknown event status '{status}'")))?;
    let max_capacity = max_capacity
        .map(|n| {
            u32::try_from(n)
                .map_err(|_| EngineError::Storage(format!("negative max_capacity {n}")))
        })
        .transpose()?;
    let confirmed_count = u32::try_from(confirmed_count)
        .map_err(|_| EngineError::Storage(format!("negative confirmed_count {confirmed_count}")))?;
    Ok(Event {
        id: turnout_core::EventId::from_uuid(id),
        organizer_id: turnout_core::UserId::from_uuid(organizer_id),
        title,
        schedule: EventSchedule {
            starts_at,
            ends_at,
            timezone,
        },
        max_capacity,
        confirmed_count,
        waitlist_enabled,
        requires_payment,
        status,
        created_at,
        updated_at,
    })
}

pub(crate) type RegistrationRow = (
    Uuid,               // id
    Uuid,               // event_id
    Uuid,               // user_id
    String,             // display_name
    String,             // email
    String,             // status
    DateTime<Utc>,      // created_at
    DateTime<Utc>,      // updated_at
);

pub(crate) const REGISTRATION_COLUMNS: &str =
    "id, event_id, user_id, display_name, email, status, created_at, updated_at";

pub(crate) fn registration_from_row(row: RegistrationRow) -> Result<Registration> {
    let (id, event_id, user_id, display_name, email, status, created_at, updated_at) = row;
    let status = RegistrationStatus::parse(&status)
        .ok_or_else(|| EngineError::Storage(format!("unknown registration status '{status}'")))?;
    Ok(Registration {
        id: turnout_core::RegistrationId::from_uuid(id),
        event_id: turnout_core::EventId::from_uuid(event_id),
        user_id: turnout_core::UserId::from_uuid(user_id),
        display_name,
        email,
        status,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_is_a_storage_error() {
        let now = Utc::now();
        let row: EventRow = (
            Uuid::new_v4(),
            Uuid::new_v4(),
            "Meetup".to_string(),
            now,
            now,
            "UTC".to_string(),
            Some(10),
            0,
            true,
            false,
            "archived".to_string(),
            now,
            now,
        );
        let err = event_from_row(row).unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
    }

    #[test]
    fn negative_counter_is_rejected() {
        let now = Utc::now();
        let row: EventRow = (
            Uuid::new_v4(),
            Uuid::new_v4(),
            "Meetup".to_string(),
            now,
            now,
            "UTC".to_string(),
            None,
            -1,
            true,
            false,
            "published".to_string(),
            now,
            now,
        );
        assert!(event_from_row(row).is_err());
    }
}
