//! Concurrency behavior through the service layer.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages
#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::panic)] // Tests can panic on impossible branches

use std::sync::Arc;
use std::time::Duration;
use turnout_core::{EngineError, RegistrationStatus, SystemClock};
use turnout_service::{EventService, RegistrationService};
use turnout_testing::{InMemoryCacheMirror, InMemoryEngine, attendee, draft_starting_tomorrow};

fn services_on(
    engine: Arc<InMemoryEngine>,
) -> (EventService, RegistrationService) {
    let cache = Arc::new(InMemoryCacheMirror::new());
    let events = EventService::new(
        Arc::clone(&engine) as _,
        Arc::clone(&cache) as _,
    );
    let registrations = RegistrationService::new(
        Arc::clone(&engine) as _,
        Arc::clone(&engine) as _,
        cache,
    );
    (events, registrations)
}

#[tokio::test]
async fn concurrent_registrations_never_oversell() {
    let engine = Arc::new(InMemoryEngine::new());
    let (events, registrations) = services_on(Arc::clone(&engine));

    let draft = draft_starting_tomorrow(&SystemClock, Some(3));
    let organizer = draft.organizer_id;
    let event = events.create_event(draft).await.expect("create");
    events
        .publish_event(event.id, organizer)
        .await
        .expect("publish");

    let mut handles = Vec::new();
    for i in 0..10 {
        let registrations = registrations.clone();
        let event_id = event.id;
        handles.push(tokio::spawn(async move {
            registrations
                .register(event_id, attendee(&format!("user{i}")))
                .await
        }));
    }

    let mut confirmed = 0;
    let mut waitlisted = 0;
    for handle in handles {
        match handle.await.unwrap().expect("register").registration.status {
            RegistrationStatus::Confirmed => confirmed += 1,
            RegistrationStatus::Waitlisted => waitlisted += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(confirmed, 3);
    assert_eq!(waitlisted, 7);
    assert_eq!(
        engine.event_snapshot(event.id).expect("snapshot").confirmed_count,
        3
    );
}

#[tokio::test]
async fn contended_event_reports_busy() {
    let engine =
        Arc::new(InMemoryEngine::new().with_lock_timeout(Duration::from_millis(50)));
    let (events, registrations) = services_on(Arc::clone(&engine));

    let draft = draft_starting_tomorrow(&SystemClock, Some(5));
    let organizer = draft.organizer_id;
    let event = events.create_event(draft).await.expect("create");
    events
        .publish_event(event.id, organizer)
        .await
        .expect("publish");

    let _guard = engine.hold_event_lock(event.id).await;
    let err = registrations
        .register(event.id, attendee("Ada"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Busy(_)));
    drop(_guard);

    // The lock released, the same call succeeds.
    let registration = registrations
        .register(event.id, attendee("Ada"))
        .await
        .expect("register")
        .registration;
    assert_eq!(registration.status, RegistrationStatus::Confirmed);
}

#[tokio::test]
async fn unrelated_events_do_not_contend() {
    let engine =
        Arc::new(InMemoryEngine::new().with_lock_timeout(Duration::from_millis(50)));
    let (events, registrations) = services_on(Arc::clone(&engine));

    let draft_a = draft_starting_tomorrow(&SystemClock, Some(5));
    let organizer_a = draft_a.organizer_id;
    let event_a = events.create_event(draft_a).await.expect("create");
    events
        .publish_event(event_a.id, organizer_a)
        .await
        .expect("publish");

    let draft_b = draft_starting_tomorrow(&SystemClock, Some(5));
    let organizer_b = draft_b.organizer_id;
    let event_b = events.create_event(draft_b).await.expect("create");
    events
        .publish_event(event_b.id, organizer_b)
        .await
        .expect("publish");

    // Holding A's serialization point leaves B writable.
    let _guard = engine.hold_event_lock(event_a.id).await;
    let registration = registrations
        .register(event_b.id, attendee("Ada"))
        .await
        .expect("register")
        .registration;
    assert_eq!(registration.status, RegistrationStatus::Confirmed);
}
