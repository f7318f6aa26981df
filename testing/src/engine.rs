//! In-memory registration engine.
//!
//! Full implementation of [`EventStore`], [`CapacityArbiter`] and
//! [`RegistrationLedger`] over hash maps, with the same concurrency
//! contract as the Postgres backend: all capacity mutations for one
//! event are serialized behind a per-event async mutex, acquired with
//! a bounded timeout that maps to [`EngineError::Busy`]. Concurrency
//! tests run real `tokio::spawn` races against it and observe the same
//! decisions the production arbiter would make.
//!
//! Change envelopes that the Postgres backend would stage in the
//! transactional outbox are accumulated in-process; tests drain them
//! with [`InMemoryEngine::take_changes`].

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::significant_drop_tightening)]

use chrono::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use turnout_core::{
    Admission, Attendee, BoxFuture, CHANGES_TOPIC, CancelOutcome, CapacityArbiter, Change,
    ChangeEnvelope, Clock, EngineError, Event, EventCancellation, EventChanges, EventDraft,
    EventFilter, EventId, EventStatus, EventStore, EventUpdate, PaymentSignal, Registration,
    RegistrationId, RegistrationLedger, RegistrationStatus, Result, StagedChange, SystemClock,
    UserId,
};

/// In-memory engine for deterministic tests.
///
/// Clones share state.
#[derive(Clone)]
pub struct InMemoryEngine {
    clock: Arc<dyn Clock>,
    cancellation_cutoff: Duration,
    lock_timeout: std::time::Duration,
    events: Arc<RwLock<HashMap<EventId, Event>>>,
    registrations: Arc<RwLock<HashMap<RegistrationId, Registration>>>,
    locks: Arc<Mutex<HashMap<EventId, Arc<AsyncMutex<()>>>>>,
    staged: Arc<Mutex<Vec<StagedChange>>>,
}

impl InMemoryEngine {
    /// Create an engine on the system clock with a 24h cancellation
    /// cutoff.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an engine on an injected clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            cancellation_cutoff: Duration::hours(24),
            lock_timeout: std::time::Duration::from_secs(5),
            events: Arc::new(RwLock::new(HashMap::new())),
            registrations: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(Mutex::new(HashMap::new())),
            staged: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Override the cancellation cutoff.
    #[must_use]
    pub const fn with_cancellation_cutoff(mut self, cutoff: Duration) -> Self {
        self.cancellation_cutoff = cutoff;
        self
    }

    /// Override the per-event lock acquisition timeout.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Drain every change envelope staged since the last call, in
    /// commit order.
    #[must_use]
    pub fn take_changes(&self) -> Vec<StagedChange> {
        std::mem::take(&mut *self.staged.lock().unwrap())
    }

    /// Current snapshot of an event row.
    #[must_use]
    pub fn event_snapshot(&self, id: EventId) -> Option<Event> {
        self.events.read().unwrap().get(&id).cloned()
    }

    /// Hold an event's serialization lock for the duration of `guard`.
    ///
    /// Lets tests force contention and observe the `Busy` path.
    pub async fn hold_event_lock(&self, id: EventId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self.lock_for(id);
        lock.lock_owned().await
    }

    fn lock_for(&self, id: EventId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(locks.entry(id).or_default())
    }

    async fn acquire(&self, id: EventId) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        let lock = self.lock_for(id);
        tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| EngineError::Busy(format!("lock timeout on event {id}")))
    }

    fn stage(&self, event_id: EventId, change: Change) {
        let envelope = ChangeEnvelope::new(event_id, self.clock.now(), change);
        self.staged.lock().unwrap().push(StagedChange {
            topic: CHANGES_TOPIC.to_string(),
            envelope,
        });
    }

    fn get(&self, id: EventId) -> Result<Event> {
        self.events
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(EngineError::EventNotFound(id))
    }

    fn put(&self, event: Event) {
        self.events.write().unwrap().insert(event.id, event);
    }

    fn require_organizer(event: &Event, organizer: UserId) -> Result<()> {
        if event.organizer_id == organizer {
            Ok(())
        } else {
            Err(EngineError::Unauthorized {
                event_id: event.id,
                user_id: organizer,
            })
        }
    }

    fn active_for_pair(&self, event_id: EventId, user_id: UserId) -> Option<Registration> {
        self.registrations
            .read()
            .unwrap()
            .values()
            .find(|r| r.event_id == event_id && r.user_id == user_id && r.status.is_active())
            .cloned()
    }

    fn oldest_waitlisted(&self, event_id: EventId) -> Option<Registration> {
        self.registrations
            .read()
            .unwrap()
            .values()
            .filter(|r| r.event_id == event_id && r.status == RegistrationStatus::Waitlisted)
            .min_by_key(|r| (r.created_at, r.id))
            .cloned()
    }

    fn set_registration_status(
        &self,
        id: RegistrationId,
        status: RegistrationStatus,
    ) -> Registration {
        let mut registrations = self.registrations.write().unwrap();
        let registration = registrations.get_mut(&id).unwrap();
        registration.status = status;
        registration.updated_at = self.clock.now();
        registration.clone()
    }

    /// Promote the oldest waitlisted registration into a freed slot.
    ///
    /// Caller holds the event lock and has already accounted for the
    /// freed slot. Promotion lands on `Pending` for paid events.
    fn promote_oldest(&self, event: &Event) -> Option<Registration> {
        let next = self.oldest_waitlisted(event.id)?;
        let status = if event.requires_payment {
            RegistrationStatus::Pending
        } else {
            RegistrationStatus::Confirmed
        };
        let promoted = self.set_registration_status(next.id, status);
        self.stage(
            event.id,
            Change::RegistrationPromoted {
                registration: promoted.clone(),
            },
        );
        Some(promoted)
    }

    fn apply_register(&self, event_id: EventId, attendee: Attendee) -> Result<Admission> {
        let now = self.clock.now();
        let mut event = self.get(event_id)?;

        if event.status != EventStatus::Published {
            return Err(EngineError::NotPublished(event_id));
        }
        if event.schedule.starts_at <= now {
            return Err(EngineError::EventInPast(event_id));
        }
        if let Some(existing) = self.active_for_pair(event_id, attendee.user_id) {
            return Ok(Admission {
                registration: existing,
                resubmission: true,
            });
        }

        let status = if event.has_free_slot() {
            event.confirmed_count += 1;
            if event.requires_payment {
                RegistrationStatus::Pending
            } else {
                RegistrationStatus::Confirmed
            }
        } else if event.waitlist_enabled {
            RegistrationStatus::Waitlisted
        } else {
            return Err(EngineError::CapacityFull(event_id));
        };

        let registration = Registration {
            id: RegistrationId::new(),
            event_id,
            user_id: attendee.user_id,
            display_name: attendee.display_name,
            email: attendee.email,
            status,
            created_at: now,
            updated_at: now,
        };
        self.registrations
            .write()
            .unwrap()
            .insert(registration.id, registration.clone());

        match status {
            RegistrationStatus::Confirmed => {
                event.updated_at = now;
                self.put(event.clone());
                self.stage(
                    event_id,
                    Change::RegistrationConfirmed {
                        registration: registration.clone(),
                    },
                );
                self.stage(
                    event_id,
                    Change::CapacityChanged {
                        event_id,
                        confirmed_count: event.confirmed_count,
                        max_capacity: event.max_capacity,
                    },
                );
            }
            RegistrationStatus::Pending => {
                event.updated_at = now;
                self.put(event.clone());
                self.stage(
                    event_id,
                    Change::CapacityChanged {
                        event_id,
                        confirmed_count: event.confirmed_count,
                        max_capacity: event.max_capacity,
                    },
                );
            }
            RegistrationStatus::Waitlisted => {
                self.stage(
                    event_id,
                    Change::RegistrationWaitlisted {
                        registration: registration.clone(),
                    },
                );
            }
            RegistrationStatus::Cancelled => unreachable!(),
        }

        Ok(Admission {
            registration,
            resubmission: false,
        })
    }

    /// Cancel a slot-holding or waitlisted registration, promoting and
    /// re-counting as needed. Caller holds the event lock.
    fn apply_cancellation(&self, registration: &Registration) -> Result<CancelOutcome> {
        let now = self.clock.now();
        let mut event = self.get(registration.event_id)?;
        let held_slot = registration.status.holds_slot();
        let cancelled =
            self.set_registration_status(registration.id, RegistrationStatus::Cancelled);
        self.stage(
            event.id,
            Change::RegistrationCancelled {
                registration: cancelled.clone(),
            },
        );

        let mut promoted = None;
        if held_slot {
            promoted = self.promote_oldest(&event);
            if promoted.is_none() {
                event.confirmed_count = event.confirmed_count.saturating_sub(1);
                self.stage(
                    event.id,
                    Change::CapacityChanged {
                        event_id: event.id,
                        confirmed_count: event.confirmed_count,
                        max_capacity: event.max_capacity,
                    },
                );
            }
            event.updated_at = now;
            self.put(event);
        }

        Ok(CancelOutcome { cancelled, promoted })
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEngine")
            .field("events", &self.events.read().unwrap().len())
            .field("registrations", &self.registrations.read().unwrap().len())
            .finish_non_exhaustive()
    }
}

impl EventStore for InMemoryEngine {
    fn create_event(&self, draft: EventDraft) -> BoxFuture<'_, Result<Event>> {
        Box::pin(async move {
            if draft.title.trim().is_empty() {
                return Err(EngineError::Validation("title must not be empty".into()));
            }
            if draft.schedule.ends_at < draft.schedule.starts_at {
                return Err(EngineError::Validation(
                    "event must end after it starts".into(),
                ));
            }
            let now = self.clock.now();
            let event = Event {
                id: EventId::new(),
                organizer_id: draft.organizer_id,
                title: draft.title,
                schedule: draft.schedule,
                max_capacity: draft.max_capacity,
                confirmed_count: 0,
                waitlist_enabled: draft.waitlist_enabled,
                requires_payment: draft.requires_payment,
                status: EventStatus::Draft,
                created_at: now,
                updated_at: now,
            };
            self.put(event.clone());
            Ok(event)
        })
    }

    fn get_event(&self, id: EventId) -> BoxFuture<'_, Result<Option<Event>>> {
        Box::pin(async move { Ok(self.events.read().unwrap().get(&id).cloned()) })
    }

    fn list_events(&self, filter: EventFilter) -> BoxFuture<'_, Result<Vec<Event>>> {
        Box::pin(async move {
            let mut events: Vec<Event> = self
                .events
                .read()
                .unwrap()
                .values()
                .filter(|e| filter.organizer_id.is_none_or(|o| e.organizer_id == o))
                .filter(|e| filter.status.is_none_or(|s| e.status == s))
                .filter(|e| {
                    filter
                        .starts_after
                        .is_none_or(|t| e.schedule.starts_at >= t)
                })
                .cloned()
                .collect();
            events.sort_by_key(|e| (e.schedule.starts_at, e.id));
            let start = (filter.page as usize).saturating_mul(filter.page_size as usize);
            Ok(events
                .into_iter()
                .skip(start)
                .take(filter.page_size as usize)
                .collect())
        })
    }

    fn publish_event(&self, id: EventId, organizer: UserId) -> BoxFuture<'_, Result<Event>> {
        Box::pin(async move {
            let _guard = self.acquire(id).await?;
            let mut event = self.get(id)?;
            Self::require_organizer(&event, organizer)?;
            match event.status {
                EventStatus::Published => Ok(event),
                EventStatus::Draft => {
                    event.status = EventStatus::Published;
                    event.updated_at = self.clock.now();
                    self.put(event.clone());
                    self.stage(
                        id,
                        Change::EventPublished {
                            event: event.clone(),
                        },
                    );
                    Ok(event)
                }
                EventStatus::Cancelled | EventStatus::Completed => Err(EngineError::Validation(
                    format!("cannot publish a {} event", event.status),
                )),
            }
        })
    }

    fn update_event(
        &self,
        id: EventId,
        organizer: UserId,
        changes: EventChanges,
    ) -> BoxFuture<'_, Result<EventUpdate>> {
        Box::pin(async move {
            let _guard = self.acquire(id).await?;
            let mut event = self.get(id)?;
            Self::require_organizer(&event, organizer)?;
            if !matches!(event.status, EventStatus::Draft | EventStatus::Published) {
                return Err(EngineError::Validation(format!(
                    "cannot update a {} event",
                    event.status
                )));
            }
            if changes.is_empty() {
                return Ok(EventUpdate {
                    event,
                    promoted: Vec::new(),
                });
            }

            if let Some(title) = changes.title {
                if title.trim().is_empty() {
                    return Err(EngineError::Validation("title must not be empty".into()));
                }
                event.title = title;
            }
            if let Some(schedule) = changes.schedule {
                if schedule.ends_at < schedule.starts_at {
                    return Err(EngineError::Validation(
                        "event must end after it starts".into(),
                    ));
                }
                event.schedule = schedule;
            }
            if let Some(waitlist_enabled) = changes.waitlist_enabled {
                event.waitlist_enabled = waitlist_enabled;
            }

            let mut promoted = Vec::new();
            let mut counter_moved = false;
            if let Some(new_capacity) = changes.max_capacity {
                if let Some(n) = new_capacity {
                    if n < event.confirmed_count {
                        return Err(EngineError::Validation(format!(
                            "capacity {n} is below the {} confirmed registrations",
                            event.confirmed_count
                        )));
                    }
                }
                event.max_capacity = new_capacity;
                // Raised or removed limit: pull the waitlist FIFO into
                // the new slots.
                while event.has_free_slot() {
                    let Some(registration) = self.promote_oldest(&event) else {
                        break;
                    };
                    event.confirmed_count += 1;
                    counter_moved = true;
                    promoted.push(registration);
                }
            }

            event.updated_at = self.clock.now();
            self.put(event.clone());
            self.stage(
                id,
                Change::EventUpdated {
                    event: event.clone(),
                },
            );
            if counter_moved {
                self.stage(
                    id,
                    Change::CapacityChanged {
                        event_id: id,
                        confirmed_count: event.confirmed_count,
                        max_capacity: event.max_capacity,
                    },
                );
            }
            Ok(EventUpdate { event, promoted })
        })
    }

    fn cancel_event(
        &self,
        id: EventId,
        organizer: UserId,
    ) -> BoxFuture<'_, Result<EventCancellation>> {
        Box::pin(async move {
            let _guard = self.acquire(id).await?;
            let mut event = self.get(id)?;
            Self::require_organizer(&event, organizer)?;
            if event.status == EventStatus::Cancelled {
                return Ok(EventCancellation {
                    event,
                    cancelled: Vec::new(),
                });
            }

            let active: Vec<Registration> = self
                .registrations
                .read()
                .unwrap()
                .values()
                .filter(|r| r.event_id == id && r.status.is_active())
                .cloned()
                .collect();
            let mut cancelled = Vec::with_capacity(active.len());
            for registration in active {
                let row =
                    self.set_registration_status(registration.id, RegistrationStatus::Cancelled);
                self.stage(
                    id,
                    Change::RegistrationCancelled {
                        registration: row.clone(),
                    },
                );
                cancelled.push(row);
            }

            event.status = EventStatus::Cancelled;
            event.confirmed_count = 0;
            event.updated_at = self.clock.now();
            self.put(event.clone());
            self.stage(
                id,
                Change::EventCancelled {
                    event: event.clone(),
                },
            );
            Ok(EventCancellation { event, cancelled })
        })
    }

    fn complete_event(&self, id: EventId, organizer: UserId) -> BoxFuture<'_, Result<Event>> {
        Box::pin(async move {
            let _guard = self.acquire(id).await?;
            let mut event = self.get(id)?;
            Self::require_organizer(&event, organizer)?;
            match event.status {
                EventStatus::Completed => Ok(event),
                EventStatus::Published => {
                    if self.clock.now() < event.schedule.ends_at {
                        return Err(EngineError::Validation(
                            "event has not ended yet".into(),
                        ));
                    }
                    event.status = EventStatus::Completed;
                    event.updated_at = self.clock.now();
                    self.put(event.clone());
                    self.stage(
                        id,
                        Change::EventUpdated {
                            event: event.clone(),
                        },
                    );
                    Ok(event)
                }
                EventStatus::Draft | EventStatus::Cancelled => Err(EngineError::Validation(
                    format!("cannot complete a {} event", event.status),
                )),
            }
        })
    }
}

impl CapacityArbiter for InMemoryEngine {
    fn admit(&self, event_id: EventId, attendee: Attendee) -> BoxFuture<'_, Result<Admission>> {
        Box::pin(async move {
            let _guard = self.acquire(event_id).await?;
            self.apply_register(event_id, attendee)
        })
    }

    fn cancel(&self, event_id: EventId, user_id: UserId) -> BoxFuture<'_, Result<CancelOutcome>> {
        Box::pin(async move {
            let _guard = self.acquire(event_id).await?;
            let event = self.get(event_id)?;
            let registration = self
                .active_for_pair(event_id, user_id)
                .ok_or(EngineError::NotRegistered { event_id, user_id })?;
            if self.clock.now() + self.cancellation_cutoff > event.schedule.starts_at {
                return Err(EngineError::CancellationWindowClosed(event_id));
            }
            self.apply_cancellation(&registration)
        })
    }

    fn mark_payment_status(
        &self,
        registration_id: RegistrationId,
        signal: PaymentSignal,
    ) -> BoxFuture<'_, Result<Registration>> {
        Box::pin(async move {
            let event_id = self
                .registrations
                .read()
                .unwrap()
                .get(&registration_id)
                .map(|r| r.event_id)
                .ok_or(EngineError::RegistrationNotFound(registration_id))?;
            let _guard = self.acquire(event_id).await?;
            // Re-read under the lock; the status may have moved.
            let registration = self
                .registrations
                .read()
                .unwrap()
                .get(&registration_id)
                .cloned()
                .ok_or(EngineError::RegistrationNotFound(registration_id))?;

            match (registration.status, signal) {
                (RegistrationStatus::Pending, PaymentSignal::Confirmed) => {
                    let confirmed = self
                        .set_registration_status(registration_id, RegistrationStatus::Confirmed);
                    self.stage(
                        event_id,
                        Change::RegistrationConfirmed {
                            registration: confirmed.clone(),
                        },
                    );
                    Ok(confirmed)
                }
                (RegistrationStatus::Pending, PaymentSignal::Failed) => {
                    let outcome = self.apply_cancellation(&registration)?;
                    Ok(outcome.cancelled)
                }
                // Repeated signals are no-ops.
                (RegistrationStatus::Confirmed, PaymentSignal::Confirmed)
                | (RegistrationStatus::Cancelled, PaymentSignal::Failed) => Ok(registration),
                (status, _) => Err(EngineError::Validation(format!(
                    "payment signal does not apply to a {status} registration"
                ))),
            }
        })
    }
}

impl RegistrationLedger for InMemoryEngine {
    fn registrations_for_user(
        &self,
        user_id: UserId,
        status: Option<RegistrationStatus>,
    ) -> BoxFuture<'_, Result<Vec<Registration>>> {
        Box::pin(async move {
            let mut rows: Vec<Registration> = self
                .registrations
                .read()
                .unwrap()
                .values()
                .filter(|r| r.user_id == user_id)
                .filter(|r| status.is_none_or(|s| r.status == s))
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(rows)
        })
    }

    fn registrations_for_event(
        &self,
        event_id: EventId,
    ) -> BoxFuture<'_, Result<Vec<Registration>>> {
        Box::pin(async move {
            let mut rows: Vec<Registration> = self
                .registrations
                .read()
                .unwrap()
                .values()
                .filter(|r| r.event_id == event_id)
                .cloned()
                .collect();
            rows.sort_by_key(|r| (r.created_at, r.id));
            Ok(rows)
        })
    }

    fn active_registration(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> BoxFuture<'_, Result<Option<Registration>>> {
        Box::pin(async move { Ok(self.active_for_pair(event_id, user_id)) })
    }
}
