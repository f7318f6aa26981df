//! End-to-end registration flows through the service layer, backed by
//! the in-memory engine.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages
#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::panic)] // Tests can panic on impossible branches

use std::sync::Arc;
use turnout_core::{EngineError, EventChanges, PaymentSignal, RegistrationStatus, SystemClock};
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
async fn full_registration_lifecycle() {
    let (_engine, _cache, events, registrations) = services();

    let draft = draft_starting_tomorrow(&SystemClock, Some(1));
    let organizer = draft.organizer_id;
    let event = events.create_event(draft).await.expect("create");
    events
        .publish_event(event.id, organizer)
        .await
        .expect("publish");

    let ada = attendee("Ada");
    let grace = attendee("Grace");
    let confirmed = registrations
        .register(event.id, ada.clone())
        .await
        .expect("register")
        .registration;
    assert_eq!(confirmed.status, RegistrationStatus::Confirmed);

    let waitlisted = registrations
        .register(event.id, grace.clone())
        .await
        .expect("register")
        .registration;
    assert_eq!(waitlisted.status, RegistrationStatus::Waitlisted);

    // Cancelling the confirmed slot promotes Grace.
    let outcome = registrations
        .cancel(event.id, ada.user_id)
        .await
        .expect("cancel");
    let promoted = outcome.promoted.expect("promotion");
    assert_eq!(promoted.user_id, grace.user_id);
    assert_eq!(promoted.status, RegistrationStatus::Confirmed);

    assert!(
        registrations
            .is_registered(event.id, grace.user_id)
            .await
            .expect("flag")
    );
    assert!(
        !registrations
            .is_registered(event.id, ada.user_id)
            .await
            .expect("flag")
    );

    let mine = registrations
        .my_registrations(grace.user_id, None)
        .await
        .expect("list");
    assert_eq!(mine.len(), 1);
}

#[tokio::test]
async fn re_submission_is_flagged_without_a_second_lookup() {
    let (engine, _cache, events, registrations) = services();

    let draft = draft_starting_tomorrow(&SystemClock, Some(5));
    let organizer = draft.organizer_id;
    let event = events.create_event(draft).await.expect("create");
    events
        .publish_event(event.id, organizer)
        .await
        .expect("publish");

    let ada = attendee("Ada");
    let first = registrations
        .register(event.id, ada.clone())
        .await
        .expect("register");
    assert!(!first.resubmission);

    let second = registrations
        .register(event.id, ada)
        .await
        .expect("re-register");
    assert!(second.resubmission);
    assert_eq!(second.registration.id, first.registration.id);
    assert_eq!(
        engine.event_snapshot(event.id).expect("snapshot").confirmed_count,
        1
    );
}

#[tokio::test]
async fn payment_flow_confirms_and_frees() {
    let (_engine, _cache, events, registrations) = services();

    let mut draft = draft_starting_tomorrow(&SystemClock, Some(1));
    draft.requires_payment = true;
    let organizer = draft.organizer_id;
    let event = events.create_event(draft).await.expect("create");
    events
        .publish_event(event.id, organizer)
        .await
        .expect("publish");

    let ada = attendee("Ada");
    let pending = registrations
        .register(event.id, ada)
        .await
        .expect("register")
        .registration;
    assert_eq!(pending.status, RegistrationStatus::Pending);

    let confirmed = registrations
        .mark_payment_status(pending.id, PaymentSignal::Confirmed)
        .await
        .expect("payment");
    assert_eq!(confirmed.status, RegistrationStatus::Confirmed);

    // A repeated signal is a no-op.
    let again = registrations
        .mark_payment_status(pending.id, PaymentSignal::Confirmed)
        .await
        .expect("repeat");
    assert_eq!(again.status, RegistrationStatus::Confirmed);
}

#[tokio::test]
async fn payment_failure_promotes_the_waitlist() {
    let (_engine, _cache, events, registrations) = services();

    let mut draft = draft_starting_tomorrow(&SystemClock, Some(1));
    draft.requires_payment = true;
    let organizer = draft.organizer_id;
    let event = events.create_event(draft).await.expect("create");
    events
        .publish_event(event.id, organizer)
        .await
        .expect("publish");

    let pending = registrations
        .register(event.id, attendee("Ada"))
        .await
        .expect("register")
        .registration;
    let grace = attendee("Grace");
    registrations
        .register(event.id, grace.clone())
        .await
        .expect("register");

    let failed = registrations
        .mark_payment_status(pending.id, PaymentSignal::Failed)
        .await
        .expect("payment");
    assert_eq!(failed.status, RegistrationStatus::Cancelled);

    // Grace now holds the slot, pending her own payment.
    let hers = registrations
        .active_registration(event.id, grace.user_id)
        .await
        .expect("lookup")
        .expect("active");
    assert_eq!(hers.status, RegistrationStatus::Pending);
}

#[tokio::test]
async fn capacity_raise_through_the_service_promotes() {
    let (_engine, _cache, events, registrations) = services();

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
    let grace = registrations
        .register(event.id, attendee("Grace"))
        .await
        .expect("register")
        .registration;
    assert_eq!(grace.status, RegistrationStatus::Waitlisted);

    let update = events
        .update_event(
            event.id,
            organizer,
            EventChanges {
                max_capacity: Some(Some(2)),
                ..EventChanges::default()
            },
        )
        .await
        .expect("update");
    assert_eq!(update.promoted.len(), 1);
    assert_eq!(update.promoted[0].id, grace.id);
}

#[tokio::test]
async fn event_cancellation_cascades_through_the_service() {
    let (_engine, _cache, events, registrations) = services();

    let draft = draft_starting_tomorrow(&SystemClock, Some(5));
    let organizer = draft.organizer_id;
    let event = events.create_event(draft).await.expect("create");
    events
        .publish_event(event.id, organizer)
        .await
        .expect("publish");

    let ada = attendee("Ada");
    registrations
        .register(event.id, ada.clone())
        .await
        .expect("register");

    let cancellation = events
        .cancel_event(event.id, organizer)
        .await
        .expect("cancel");
    assert_eq!(cancellation.cancelled.len(), 1);
    assert!(
        !registrations
            .is_registered(event.id, ada.user_id)
            .await
            .expect("flag")
    );
}

#[tokio::test]
async fn non_organizer_cannot_mutate() {
    let (_engine, _cache, events, _registrations) = services();

    let draft = draft_starting_tomorrow(&SystemClock, Some(5));
    let event = events.create_event(draft).await.expect("create");

    let stranger = attendee("Mallory").user_id;
    let err = events.publish_event(event.id, stranger).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized { .. }));
}
