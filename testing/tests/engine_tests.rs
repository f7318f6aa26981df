//! Behavior tests for the in-memory registration engine.
//!
//! These exercise the capacity, waitlist and lifecycle rules that the
//! Postgres backend must also satisfy; the service-level suites build
//! on the same engine.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect
#![allow(clippy::panic)] // Tests can panic on impossible branches

use chrono::Duration;
use std::sync::Arc;
use turnout_core::{
    CapacityArbiter, Change, Clock, EngineError, EventChanges, EventStatus, EventStore,
    PaymentSignal, Registration, RegistrationLedger, RegistrationStatus,
};
use turnout_testing::{FixedClock, InMemoryEngine, attendee, draft_starting_tomorrow};

async fn published_event(
    engine: &InMemoryEngine,
    clock: &FixedClock,
    max_capacity: Option<u32>,
) -> turnout_core::Event {
    let draft = draft_starting_tomorrow(clock, max_capacity);
    let organizer = draft.organizer_id;
    let event = engine.create_event(draft).await.unwrap();
    engine.publish_event(event.id, organizer).await.unwrap()
}

fn new_engine() -> (InMemoryEngine, FixedClock) {
    let clock = FixedClock::now();
    let engine = InMemoryEngine::with_clock(Arc::new(clock.clone()));
    (engine, clock)
}

#[tokio::test]
async fn registration_confirms_while_capacity_remains() {
    let (engine, clock) = new_engine();
    let event = published_event(&engine, &clock, Some(2)).await;

    let first = engine.register(event.id, attendee("Ada")).await.unwrap();
    let second = engine.register(event.id, attendee("Grace")).await.unwrap();
    assert_eq!(first.status, RegistrationStatus::Confirmed);
    assert_eq!(second.status, RegistrationStatus::Confirmed);
    assert_eq!(engine.event_snapshot(event.id).unwrap().confirmed_count, 2);
}

#[tokio::test]
async fn full_event_waitlists_in_fifo_order() {
    let (engine, clock) = new_engine();
    let event = published_event(&engine, &clock, Some(1)).await;

    engine.register(event.id, attendee("Ada")).await.unwrap();
    let queued_first = engine.register(event.id, attendee("Grace")).await.unwrap();
    clock.advance(Duration::seconds(1));
    let queued_second = engine.register(event.id, attendee("Edsger")).await.unwrap();
    assert_eq!(queued_first.status, RegistrationStatus::Waitlisted);
    assert_eq!(queued_second.status, RegistrationStatus::Waitlisted);
    // The waitlist never moves the confirmed counter.
    assert_eq!(engine.event_snapshot(event.id).unwrap().confirmed_count, 1);

    let rows = engine.registrations_for_event(event.id).await.unwrap();
    let waitlisted: Vec<&Registration> = rows
        .iter()
        .filter(|r| r.status == RegistrationStatus::Waitlisted)
        .collect();
    assert_eq!(waitlisted[0].id, queued_first.id);
    assert_eq!(waitlisted[1].id, queued_second.id);
}

#[tokio::test]
async fn full_event_without_waitlist_rejects() {
    let (engine, clock) = new_engine();
    let mut draft = draft_starting_tomorrow(&clock, Some(1));
    draft.waitlist_enabled = false;
    let organizer = draft.organizer_id;
    let event = engine.create_event(draft).await.unwrap();
    let event = engine.publish_event(event.id, organizer).await.unwrap();

    engine.register(event.id, attendee("Ada")).await.unwrap();
    let err = engine
        .register(event.id, attendee("Grace"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CapacityFull(id) if id == event.id));
    assert!(err.is_conflict());
}

#[tokio::test]
async fn concurrent_registrations_never_oversell() {
    let (engine, clock) = new_engine();
    let event = published_event(&engine, &clock, Some(2)).await;

    let mut handles = Vec::new();
    for i in 0..3 {
        let engine = engine.clone();
        let event_id = event.id;
        handles.push(tokio::spawn(async move {
            engine.register(event_id, attendee(&format!("user{i}"))).await
        }));
    }
    let mut confirmed = 0;
    let mut waitlisted = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap().status {
            RegistrationStatus::Confirmed => confirmed += 1,
            RegistrationStatus::Waitlisted => waitlisted += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(confirmed, 2);
    assert_eq!(waitlisted, 1);
    assert_eq!(engine.event_snapshot(event.id).unwrap().confirmed_count, 2);
}

#[tokio::test]
async fn registration_storm_on_large_event() {
    let (engine, clock) = new_engine();
    let event = published_event(&engine, &clock, Some(50)).await;

    let mut handles = Vec::new();
    for i in 0..80 {
        let engine = engine.clone();
        let event_id = event.id;
        handles.push(tokio::spawn(async move {
            engine.register(event_id, attendee(&format!("user{i}"))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    let snapshot = engine.event_snapshot(event.id).unwrap();
    assert_eq!(snapshot.confirmed_count, 50);
    let rows = engine.registrations_for_event(event.id).await.unwrap();
    let waitlisted = rows
        .iter()
        .filter(|r| r.status == RegistrationStatus::Waitlisted)
        .count();
    assert_eq!(waitlisted, 30);
}

#[tokio::test]
async fn re_registration_is_idempotent() {
    let (engine, clock) = new_engine();
    let event = published_event(&engine, &clock, Some(10)).await;
    let ada = attendee("Ada");

    let first = engine.register(event.id, ada.clone()).await.unwrap();
    let second = engine.register(event.id, ada).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(engine.event_snapshot(event.id).unwrap().confirmed_count, 1);
}

#[tokio::test]
async fn registration_requires_published_future_event() {
    let (engine, clock) = new_engine();
    let draft = draft_starting_tomorrow(&clock, None);
    let event = engine.create_event(draft).await.unwrap();

    let err = engine.register(event.id, attendee("Ada")).await.unwrap_err();
    assert!(matches!(err, EngineError::NotPublished(_)));
    // The rejected attempt leaves no row and stages no change.
    assert!(engine.registrations_for_event(event.id).await.unwrap().is_empty());
    assert!(engine.take_changes().is_empty());

    let published = engine
        .publish_event(event.id, event.organizer_id)
        .await
        .unwrap();
    let _ = engine.take_changes();
    clock.set(published.schedule.starts_at + Duration::seconds(1));
    let err = engine.register(event.id, attendee("Ada")).await.unwrap_err();
    assert!(matches!(err, EngineError::EventInPast(_)));
    assert!(engine.registrations_for_event(event.id).await.unwrap().is_empty());
    assert!(engine.take_changes().is_empty());
}

#[tokio::test]
async fn cancellation_promotes_oldest_waitlisted() {
    let (engine, clock) = new_engine();
    // Start far enough out that the 24h cutoff stays open.
    let mut draft = draft_starting_tomorrow(&clock, Some(1));
    draft.schedule.starts_at = clock.now() + Duration::days(7);
    draft.schedule.ends_at = draft.schedule.starts_at + Duration::hours(1);
    let organizer = draft.organizer_id;
    let event = engine.create_event(draft).await.unwrap();
    let event = engine.publish_event(event.id, organizer).await.unwrap();

    let ada = attendee("Ada");
    engine.register(event.id, ada.clone()).await.unwrap();
    let grace = engine.register(event.id, attendee("Grace")).await.unwrap();
    clock.advance(Duration::seconds(1));
    let edsger = engine.register(event.id, attendee("Edsger")).await.unwrap();
    assert_eq!(grace.status, RegistrationStatus::Waitlisted);
    assert_eq!(edsger.status, RegistrationStatus::Waitlisted);

    let outcome = engine.cancel(event.id, ada.user_id).await.unwrap();
    assert_eq!(outcome.cancelled.status, RegistrationStatus::Cancelled);
    let promoted = outcome.promoted.unwrap();
    assert_eq!(promoted.id, grace.id);
    assert_eq!(promoted.status, RegistrationStatus::Confirmed);
    // Slot freed and refilled in one unit.
    assert_eq!(engine.event_snapshot(event.id).unwrap().confirmed_count, 1);
}

#[tokio::test]
async fn sequential_cancellations_settle_on_the_waitlisted_user() {
    let (engine, clock) = new_engine();
    let mut draft = draft_starting_tomorrow(&clock, Some(2));
    draft.schedule.starts_at = clock.now() + Duration::days(7);
    draft.schedule.ends_at = draft.schedule.starts_at + Duration::hours(1);
    let organizer = draft.organizer_id;
    let event = engine.create_event(draft).await.unwrap();
    let event = engine.publish_event(event.id, organizer).await.unwrap();

    let ada = attendee("Ada");
    let grace = attendee("Grace");
    engine.register(event.id, ada.clone()).await.unwrap();
    engine.register(event.id, grace.clone()).await.unwrap();
    let edsger = engine.register(event.id, attendee("Edsger")).await.unwrap();
    assert_eq!(edsger.status, RegistrationStatus::Waitlisted);

    // The first freed slot goes to the waitlist, not to the counter.
    let outcome = engine.cancel(event.id, ada.user_id).await.unwrap();
    assert_eq!(outcome.promoted.unwrap().id, edsger.id);
    assert_eq!(engine.event_snapshot(event.id).unwrap().confirmed_count, 2);

    // With the waitlist empty, the second one decrements.
    let outcome = engine.cancel(event.id, grace.user_id).await.unwrap();
    assert!(outcome.promoted.is_none());
    assert_eq!(engine.event_snapshot(event.id).unwrap().confirmed_count, 1);

    let rows = engine.registrations_for_event(event.id).await.unwrap();
    let survivor = rows.iter().find(|r| r.id == edsger.id).unwrap();
    assert_eq!(survivor.status, RegistrationStatus::Confirmed);
    assert_eq!(
        rows.iter()
            .filter(|r| r.status == RegistrationStatus::Cancelled)
            .count(),
        2
    );
}

#[tokio::test]
async fn cancelling_a_waitlisted_registration_keeps_the_counter() {
    let (engine, clock) = new_engine();
    let mut draft = draft_starting_tomorrow(&clock, Some(1));
    draft.schedule.starts_at = clock.now() + Duration::days(7);
    draft.schedule.ends_at = draft.schedule.starts_at + Duration::hours(1);
    let organizer = draft.organizer_id;
    let event = engine.create_event(draft).await.unwrap();
    let event = engine.publish_event(event.id, organizer).await.unwrap();

    engine.register(event.id, attendee("Ada")).await.unwrap();
    let grace = attendee("Grace");
    engine.register(event.id, grace.clone()).await.unwrap();

    let outcome = engine.cancel(event.id, grace.user_id).await.unwrap();
    assert!(outcome.promoted.is_none());
    assert_eq!(engine.event_snapshot(event.id).unwrap().confirmed_count, 1);
}

#[tokio::test]
async fn cancellation_window_closes_before_start() {
    let (engine, clock) = new_engine();
    let event = published_event(&engine, &clock, Some(5)).await;
    let ada = attendee("Ada");
    engine.register(event.id, ada.clone()).await.unwrap();

    // Inside the 24h cutoff.
    clock.set(event.schedule.starts_at - Duration::hours(2));
    let err = engine.cancel(event.id, ada.user_id).await.unwrap_err();
    assert!(matches!(err, EngineError::CancellationWindowClosed(_)));
}

#[tokio::test]
async fn cancel_without_registration_is_rejected() {
    let (engine, clock) = new_engine();
    let event = published_event(&engine, &clock, Some(5)).await;
    let err = engine
        .cancel(event.id, attendee("Ada").user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotRegistered { .. }));
}

#[tokio::test]
async fn capacity_raise_promotes_fifo() {
    let (engine, clock) = new_engine();
    let event = published_event(&engine, &clock, Some(1)).await;

    engine.register(event.id, attendee("Ada")).await.unwrap();
    let grace = engine.register(event.id, attendee("Grace")).await.unwrap();
    clock.advance(Duration::seconds(1));
    let edsger = engine.register(event.id, attendee("Edsger")).await.unwrap();

    let update = engine
        .update_event(
            event.id,
            event.organizer_id,
            EventChanges {
                max_capacity: Some(Some(2)),
                ..EventChanges::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(update.promoted.len(), 1);
    assert_eq!(update.promoted[0].id, grace.id);
    assert_eq!(update.event.confirmed_count, 2);

    // Removing the limit drains the rest of the queue.
    let update = engine
        .update_event(
            event.id,
            event.organizer_id,
            EventChanges {
                max_capacity: Some(None),
                ..EventChanges::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(update.promoted.len(), 1);
    assert_eq!(update.promoted[0].id, edsger.id);
    assert_eq!(update.event.confirmed_count, 3);
}

#[tokio::test]
async fn capacity_cannot_drop_below_confirmed() {
    let (engine, clock) = new_engine();
    let event = published_event(&engine, &clock, Some(3)).await;
    engine.register(event.id, attendee("Ada")).await.unwrap();
    engine.register(event.id, attendee("Grace")).await.unwrap();

    let err = engine
        .update_event(
            event.id,
            event.organizer_id,
            EventChanges {
                max_capacity: Some(Some(1)),
                ..EventChanges::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn event_cancellation_cascades_without_promotion() {
    let (engine, clock) = new_engine();
    let event = published_event(&engine, &clock, Some(1)).await;
    engine.register(event.id, attendee("Ada")).await.unwrap();
    engine.register(event.id, attendee("Grace")).await.unwrap();

    let cancellation = engine
        .cancel_event(event.id, event.organizer_id)
        .await
        .unwrap();
    assert_eq!(cancellation.event.status, EventStatus::Cancelled);
    assert_eq!(cancellation.cancelled.len(), 2);
    assert_eq!(cancellation.event.confirmed_count, 0);
    // Nobody got promoted into the freed slot.
    assert!(
        cancellation
            .cancelled
            .iter()
            .all(|r| r.status == RegistrationStatus::Cancelled)
    );

    // Idempotent second cancel.
    let again = engine
        .cancel_event(event.id, event.organizer_id)
        .await
        .unwrap();
    assert!(again.cancelled.is_empty());
}

#[tokio::test]
async fn organizer_checks_guard_lifecycle_operations() {
    let (engine, clock) = new_engine();
    let event = published_event(&engine, &clock, Some(1)).await;
    let stranger = attendee("Mallory").user_id;

    let err = engine.cancel_event(event.id, stranger).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized { .. }));
    let err = engine
        .update_event(event.id, stranger, EventChanges::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized { .. }));
}

#[tokio::test]
async fn paid_events_hold_slots_as_pending() {
    let (engine, clock) = new_engine();
    let mut draft = draft_starting_tomorrow(&clock, Some(1));
    draft.requires_payment = true;
    let organizer = draft.organizer_id;
    let event = engine.create_event(draft).await.unwrap();
    let event = engine.publish_event(event.id, organizer).await.unwrap();

    let pending = engine.register(event.id, attendee("Ada")).await.unwrap();
    assert_eq!(pending.status, RegistrationStatus::Pending);
    // Pending counts against capacity.
    assert_eq!(engine.event_snapshot(event.id).unwrap().confirmed_count, 1);
    let queued = engine.register(event.id, attendee("Grace")).await.unwrap();
    assert_eq!(queued.status, RegistrationStatus::Waitlisted);

    let confirmed = engine
        .mark_payment_status(pending.id, PaymentSignal::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status, RegistrationStatus::Confirmed);
    // Settling the payment never moves the counter.
    assert_eq!(engine.event_snapshot(event.id).unwrap().confirmed_count, 1);

    // Repeated signal is a no-op.
    let again = engine
        .mark_payment_status(pending.id, PaymentSignal::Confirmed)
        .await
        .unwrap();
    assert_eq!(again.status, RegistrationStatus::Confirmed);
}

#[tokio::test]
async fn payment_failure_frees_the_slot_and_promotes() {
    let (engine, clock) = new_engine();
    let mut draft = draft_starting_tomorrow(&clock, Some(1));
    draft.requires_payment = true;
    let organizer = draft.organizer_id;
    let event = engine.create_event(draft).await.unwrap();
    let event = engine.publish_event(event.id, organizer).await.unwrap();

    let pending = engine.register(event.id, attendee("Ada")).await.unwrap();
    let queued = engine.register(event.id, attendee("Grace")).await.unwrap();

    let cancelled = engine
        .mark_payment_status(pending.id, PaymentSignal::Failed)
        .await
        .unwrap();
    assert_eq!(cancelled.status, RegistrationStatus::Cancelled);

    let rows = engine.registrations_for_event(event.id).await.unwrap();
    let promoted = rows.iter().find(|r| r.id == queued.id).unwrap();
    assert_eq!(promoted.status, RegistrationStatus::Pending);
    assert_eq!(engine.event_snapshot(event.id).unwrap().confirmed_count, 1);
}

#[tokio::test]
async fn contended_lock_times_out_as_busy() {
    let (engine, clock) = new_engine();
    let engine = engine.with_lock_timeout(std::time::Duration::from_millis(50));
    let event = published_event(&engine, &clock, Some(5)).await;

    let _guard = engine.hold_event_lock(event.id).await;
    let err = engine.register(event.id, attendee("Ada")).await.unwrap_err();
    assert!(matches!(err, EngineError::Busy(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn changes_are_staged_in_commit_order() {
    let (engine, clock) = new_engine();
    let event = published_event(&engine, &clock, Some(1)).await;
    engine.register(event.id, attendee("Ada")).await.unwrap();
    engine.register(event.id, attendee("Grace")).await.unwrap();

    let staged = engine.take_changes();
    let kinds: Vec<&str> = staged.iter().map(|s| s.envelope.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            "EventPublished.v1",
            "RegistrationConfirmed.v1",
            "CapacityChanged.v1",
            "RegistrationWaitlisted.v1",
        ]
    );
    assert!(staged.iter().all(|s| s.envelope.event_id == event.id));
    // Draining is destructive.
    assert!(engine.take_changes().is_empty());
}

#[tokio::test]
async fn user_registrations_are_listed_newest_first() {
    let (engine, clock) = new_engine();
    let ada = attendee("Ada");
    let first_event = published_event(&engine, &clock, None).await;
    engine.register(first_event.id, ada.clone()).await.unwrap();
    clock.advance(Duration::seconds(10));
    let second_event = published_event(&engine, &clock, None).await;
    engine.register(second_event.id, ada.clone()).await.unwrap();

    let rows = engine
        .registrations_for_user(ada.user_id, None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].event_id, second_event.id);

    let confirmed = engine
        .registrations_for_user(ada.user_id, Some(RegistrationStatus::Confirmed))
        .await
        .unwrap();
    assert_eq!(confirmed.len(), 2);
}
