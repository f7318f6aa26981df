//! The cache mirror is disposable: stale entries never influence
//! capacity decisions, failures degrade to store reads, and committed
//! mutations invalidate.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages
#![allow(clippy::unwrap_used)] // Tests can unwrap

use std::sync::Arc;
use turnout_core::{EngineError, EventFilter, RegistrationStatus, SystemClock};
use turnout_service::{EventService, RegistrationService};
use turnout_testing::{InMemoryCacheMirror, InMemoryEngine, attendee, draft_starting_tomorrow};

fn services() -> (
    Arc<InMemoryEngine>,
    Arc<InMemoryCacheMirror>,
    EventService,
    RegistrationService,
) {
    let engine = Arc::new(InMemoryEngine::new());
    let cache = Arc::new(InMemoryCacheMirror::new());
    let events = EventService::new(
        Arc::clone(&engine) as _,
        Arc::clone(&cache) as _,
    );
    let registrations = RegistrationService::new(
        Arc::clone(&engine) as _,
        Arc::clone(&engine) as _,
        Arc::clone(&cache) as _,
    );
    (engine, cache, events, registrations)
}

#[tokio::test]
async fn stale_cache_never_causes_oversell() {
    let (engine, cache, events, registrations) = services();

    let draft = draft_starting_tomorrow(&SystemClock, Some(1));
    let organizer = draft.organizer_id;
    let event = events.create_event(draft).await.expect("create");
    events
        .publish_event(event.id, organizer)
        .await
        .expect("publish");
    registrations
        .register(event.id, attendee("Ada"))
        .await
        .expect("register");

    // Plant a stale projection claiming the slot is still free. The
    // arbiter never consults it.
    let mut stale = engine.event_snapshot(event.id).expect("snapshot");
    stale.confirmed_count = 0;
    stale.waitlist_enabled = false;
    cache.plant_event(stale);

    let full = engine.event_snapshot(event.id).expect("snapshot");
    assert_eq!(full.confirmed_count, 1);
    let result = registrations.register(event.id, attendee("Grace")).await;
    // Waitlisted, not confirmed: authoritative state won.
    assert_eq!(
        result.expect("register").registration.status,
        RegistrationStatus::Waitlisted
    );
    assert_eq!(
        engine.event_snapshot(event.id).expect("snapshot").confirmed_count,
        1
    );
}

#[tokio::test]
async fn cache_failure_degrades_to_the_store() {
    let (_engine, cache, events, registrations) = services();

    let draft = draft_starting_tomorrow(&SystemClock, Some(5));
    let organizer = draft.organizer_id;
    let event = events.create_event(draft).await.expect("create");
    events
        .publish_event(event.id, organizer)
        .await
        .expect("publish");

    cache.fail_next(true);
    let fetched = events.get_event(event.id).await.expect("get");
    assert!(fetched.is_some());
    let listed = events
        .list_events(EventFilter::default())
        .await
        .expect("list");
    assert_eq!(listed.len(), 1);

    // Writes still commit while the cache is down.
    let ada = attendee("Ada");
    let registration = registrations
        .register(event.id, ada.clone())
        .await
        .expect("register")
        .registration;
    assert_eq!(registration.status, RegistrationStatus::Confirmed);
    assert!(
        registrations
            .is_registered(event.id, ada.user_id)
            .await
            .expect("flag")
    );
    cache.fail_next(false);
}

#[tokio::test]
async fn reads_populate_and_mutations_invalidate() {
    let (_engine, cache, events, registrations) = services();

    let draft = draft_starting_tomorrow(&SystemClock, Some(5));
    let organizer = draft.organizer_id;
    let event = events.create_event(draft).await.expect("create");

    // A read populates the single-event entry.
    events.get_event(event.id).await.expect("get");
    assert!(cache.has_event(event.id));

    // A committed mutation drops it.
    events
        .publish_event(event.id, organizer)
        .await
        .expect("publish");
    assert!(!cache.has_event(event.id));

    // List entries populate on read and drop on mutation.
    events
        .list_events(EventFilter::default())
        .await
        .expect("list");
    assert_eq!(cache.list_count(), 1);
    registrations
        .register(event.id, attendee("Ada"))
        .await
        .expect("register");
    assert_eq!(cache.list_count(), 0);
    assert!(!cache.has_event(event.id));
}

#[tokio::test]
async fn store_errors_still_surface_when_the_cache_is_down() {
    let (_engine, cache, events, _registrations) = services();

    cache.fail_next(true);
    let missing = turnout_core::EventId::new();
    let fetched = events.get_event(missing).await.expect("get");
    assert!(fetched.is_none());

    let draft = draft_starting_tomorrow(&SystemClock, Some(5));
    let event = events.create_event(draft).await.expect("create");
    let stranger = attendee("Mallory").user_id;
    let err = events.cancel_event(event.id, stranger).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized { .. }));
}
