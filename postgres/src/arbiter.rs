//! Postgres capacity arbiter.
//!
//! All capacity decisions happen inside one transaction that holds the
//! event row lock. The decision itself is the conditional update in
//! [`CapacityArbiter::admit`]: `confirmed_count` is incremented only
//! while it is below `max_capacity`, in the same statement that checks
//! it, so two racing registrations can never both observe a free slot.

use crate::{
    EVENT_COLUMNS, REGISTRATION_COLUMNS, EventRow, RegistrationRow, event_from_row, map_db_err,
    outbox::stage_change, registration_from_row,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use turnout_core::{
    Admission, Attendee, BoxFuture, CancelOutcome, CapacityArbiter, Change, ChangeEnvelope, Clock,
    EngineError, Event, EventId, PaymentSignal, Registration, RegistrationId, RegistrationStatus,
    Result, StagedChange, UserId,
};

/// Tunable behavior of the arbiter.
#[derive(Clone, Copy, Debug)]
pub struct CapacityPolicy {
    /// How long before an event's start users may still cancel.
    pub cancellation_cutoff: chrono::Duration,
    /// Bound on waiting for the event row lock.
    pub lock_timeout: Duration,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            cancellation_cutoff: chrono::Duration::hours(24),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Postgres implementation of the capacity arbiter.
pub struct PostgresArbiter {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    policy: CapacityPolicy,
    topic: String,
}

impl PostgresArbiter {
    /// Create an arbiter over a pool.
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>, policy: CapacityPolicy, topic: String) -> Self {
        Self {
            pool,
            clock,
            policy,
            topic,
        }
    }

    fn staged(&self, event_id: EventId, occurred_at: DateTime<Utc>, change: Change) -> StagedChange {
        StagedChange {
            topic: self.topic.clone(),
            envelope: ChangeEnvelope::new(event_id, occurred_at, change),
        }
    }

    async fn register_tx(&self, event_id: EventId, attendee: Attendee) -> Result<Admission> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        set_lock_timeout(&mut tx, self.policy.lock_timeout).await?;

        let event = lock_event(&mut tx, event_id)
            .await?
            .ok_or(EngineError::EventNotFound(event_id))?;
        if event.status != turnout_core::EventStatus::Published {
            return Err(EngineError::NotPublished(event_id));
        }
        if event.schedule.starts_at <= now {
            return Err(EngineError::EventInPast(event_id));
        }

        // Re-submission of an existing active registration is a no-op.
        if let Some(existing) = active_for_pair(&mut tx, event_id, attendee.user_id).await? {
            tx.commit().await.map_err(map_db_err)?;
            return Ok(Admission {
                registration: existing,
                resubmission: true,
            });
        }

        // The decision: increment only while below the limit. Holding
        // the row lock makes rows_affected authoritative.
        let result = sqlx::query(
            "UPDATE events
             SET confirmed_count = confirmed_count + 1, updated_at = $2
             WHERE id = $1
               AND (max_capacity IS NULL OR confirmed_count < max_capacity)",
        )
        .bind(event_id.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;
        let got_slot = result.rows_affected() == 1;

        let status = if got_slot {
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

        let registration = insert_registration(&mut tx, event_id, &attendee, status, now).await?;

        if got_slot {
            if status == RegistrationStatus::Confirmed {
                let change = Change::RegistrationConfirmed {
                    registration: registration.clone(),
                };
                stage_change(&mut tx, &self.staged(event_id, now, change)).await?;
            }
            let change = Change::CapacityChanged {
                event_id,
                confirmed_count: event.confirmed_count + 1,
                max_capacity: event.max_capacity,
            };
            stage_change(&mut tx, &self.staged(event_id, now, change)).await?;
        } else {
            let change = Change::RegistrationWaitlisted {
                registration: registration.clone(),
            };
            stage_change(&mut tx, &self.staged(event_id, now, change)).await?;
        }

        tx.commit().await.map_err(map_db_err)?;
        tracing::info!(
            event_id = %event_id,
            user_id = %registration.user_id,
            status = %registration.status,
            "registration applied"
        );
        Ok(Admission {
            registration,
            resubmission: false,
        })
    }

    async fn cancel_tx(&self, event_id: EventId, user_id: UserId) -> Result<CancelOutcome> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        set_lock_timeout(&mut tx, self.policy.lock_timeout).await?;

        let event = lock_event(&mut tx, event_id)
            .await?
            .ok_or(EngineError::EventNotFound(event_id))?;
        let registration = active_for_pair(&mut tx, event_id, user_id)
            .await?
            .ok_or(EngineError::NotRegistered { event_id, user_id })?;
        if now + self.policy.cancellation_cutoff > event.schedule.starts_at {
            return Err(EngineError::CancellationWindowClosed(event_id));
        }

        let outcome = self
            .release_registration(&mut tx, &event, &registration, now)
            .await?;
        tx.commit().await.map_err(map_db_err)?;
        tracing::info!(
            event_id = %event_id,
            user_id = %user_id,
            promoted = outcome.promoted.is_some(),
            "registration cancelled"
        );
        Ok(outcome)
    }

    /// Cancel a registration and rebalance the counter, promoting the
    /// oldest waitlisted row into a freed slot. Caller holds the event
    /// row lock.
    async fn release_registration(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &Event,
        registration: &Registration,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome> {
        let held_slot = registration.status.holds_slot();
        let cancelled =
            update_registration_status(tx, registration.id, RegistrationStatus::Cancelled, now)
                .await?;
        let change = Change::RegistrationCancelled {
            registration: cancelled.clone(),
        };
        stage_change(tx, &self.staged(event.id, now, change)).await?;

        let mut promoted = None;
        if held_slot {
            if let Some(next) = oldest_waitlisted(tx, event.id).await? {
                // Slot freed and refilled: the counter nets to zero.
                let status = if event.requires_payment {
                    RegistrationStatus::Pending
                } else {
                    RegistrationStatus::Confirmed
                };
                let row = update_registration_status(tx, next.id, status, now).await?;
                let change = Change::RegistrationPromoted {
                    registration: row.clone(),
                };
                stage_change(tx, &self.staged(event.id, now, change)).await?;
                promoted = Some(row);
            } else {
                sqlx::query(
                    "UPDATE events
                     SET confirmed_count = confirmed_count - 1, updated_at = $2
                     WHERE id = $1",
                )
                .bind(event.id.as_uuid())
                .bind(now)
                .execute(&mut **tx)
                .await
                .map_err(map_db_err)?;
                let change = Change::CapacityChanged {
                    event_id: event.id,
                    confirmed_count: event.confirmed_count.saturating_sub(1),
                    max_capacity: event.max_capacity,
                };
                stage_change(tx, &self.staged(event.id, now, change)).await?;
            }
        }

        Ok(CancelOutcome { cancelled, promoted })
    }

    async fn payment_tx(
        &self,
        registration_id: RegistrationId,
        signal: PaymentSignal,
    ) -> Result<Registration> {
        let now = self.clock.now();
        // First read without a lock, just to learn the event id; the
        // event lock is always taken before the registration row to
        // keep lock order consistent with register/cancel.
        let event_id: Option<(uuid::Uuid,)> =
            sqlx::query_as("SELECT event_id FROM registrations WHERE id = $1")
                .bind(registration_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)?;
        let event_id = EventId::from_uuid(
            event_id
                .ok_or(EngineError::RegistrationNotFound(registration_id))?
                .0,
        );

        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        set_lock_timeout(&mut tx, self.policy.lock_timeout).await?;
        let event = lock_event(&mut tx, event_id)
            .await?
            .ok_or(EngineError::EventNotFound(event_id))?;

        // Re-read under the lock; the status may have moved.
        let row: Option<RegistrationRow> = sqlx::query_as(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE id = $1"
        ))
        .bind(registration_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?;
        let registration =
            registration_from_row(row.ok_or(EngineError::RegistrationNotFound(registration_id))?)?;

        match (registration.status, signal) {
            (RegistrationStatus::Pending, PaymentSignal::Confirmed) => {
                let confirmed = update_registration_status(
                    &mut tx,
                    registration_id,
                    RegistrationStatus::Confirmed,
                    now,
                )
                .await?;
                let change = Change::RegistrationConfirmed {
                    registration: confirmed.clone(),
                };
                stage_change(&mut tx, &self.staged(event_id, now, change)).await?;
                tx.commit().await.map_err(map_db_err)?;
                Ok(confirmed)
            }
            (RegistrationStatus::Pending, PaymentSignal::Failed) => {
                let outcome = self
                    .release_registration(&mut tx, &event, &registration, now)
                    .await?;
                tx.commit().await.map_err(map_db_err)?;
                Ok(outcome.cancelled)
            }
            // Repeated signals are no-ops.
            (RegistrationStatus::Confirmed, PaymentSignal::Confirmed)
            | (RegistrationStatus::Cancelled, PaymentSignal::Failed) => Ok(registration),
            (status, _) => Err(EngineError::Validation(format!(
                "payment signal does not apply to a {status} registration"
            ))),
        }
    }
}

impl CapacityArbiter for PostgresArbiter {
    fn admit(&self, event_id: EventId, attendee: Attendee) -> BoxFuture<'_, Result<Admission>> {
        Box::pin(self.register_tx(event_id, attendee))
    }

    fn cancel(&self, event_id: EventId, user_id: UserId) -> BoxFuture<'_, Result<CancelOutcome>> {
        Box::pin(self.cancel_tx(event_id, user_id))
    }

    fn mark_payment_status(
        &self,
        registration_id: RegistrationId,
        signal: PaymentSignal,
    ) -> BoxFuture<'_, Result<Registration>> {
        Box::pin(self.payment_tx(registration_id, signal))
    }
}

// Shared transaction helpers, also used by the event store for its
// capacity-raise promotion.

pub(crate) async fn set_lock_timeout(
    tx: &mut Transaction<'_, Postgres>,
    timeout: Duration,
) -> Result<()> {
    // SET LOCAL does not take bind parameters; the value comes from
    // configuration, not user input.
    sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis()))
        .execute(&mut **tx)
        .await
        .map_err(map_db_err)?;
    Ok(())
}

/// Take the per-event serialization point: the event row lock.
pub(crate) async fn lock_event(
    tx: &mut Transaction<'_, Postgres>,
    event_id: EventId,
) -> Result<Option<Event>> {
    let row: Option<EventRow> = sqlx::query_as(&format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE"
    ))
    .bind(event_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_db_err)?;
    row.map(event_from_row).transpose()
}

pub(crate) async fn active_for_pair(
    tx: &mut Transaction<'_, Postgres>,
    event_id: EventId,
    user_id: UserId,
) -> Result<Option<Registration>> {
    let row: Option<RegistrationRow> = sqlx::query_as(&format!(
        "SELECT {REGISTRATION_COLUMNS} FROM registrations
         WHERE event_id = $1 AND user_id = $2 AND status <> 'cancelled'"
    ))
    .bind(event_id.as_uuid())
    .bind(user_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_db_err)?;
    row.map(registration_from_row).transpose()
}

pub(crate) async fn oldest_waitlisted(
    tx: &mut Transaction<'_, Postgres>,
    event_id: EventId,
) -> Result<Option<Registration>> {
    let row: Option<RegistrationRow> = sqlx::query_as(&format!(
        "SELECT {REGISTRATION_COLUMNS} FROM registrations
         WHERE event_id = $1 AND status = 'waitlisted'
         ORDER BY created_at, id
         LIMIT 1"
    ))
    .bind(event_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_db_err)?;
    row.map(registration_from_row).transpose()
}

pub(crate) async fn update_registration_status(
    tx: &mut Transaction<'_, Postgres>,
    id: RegistrationId,
    status: RegistrationStatus,
    now: DateTime<Utc>,
) -> Result<Registration> {
    let row: RegistrationRow = sqlx::query_as(&format!(
        "UPDATE registrations SET status = $2, updated_at = $3
         WHERE id = $1
         RETURNING {REGISTRATION_COLUMNS}"
    ))
    .bind(id.as_uuid())
    .bind(status.as_str())
    .bind(now)
    .fetch_one(&mut **tx)
    .await
    .map_err(map_db_err)?;
    registration_from_row(row)
}

async fn insert_registration(
    tx: &mut Transaction<'_, Postgres>,
    event_id: EventId,
    attendee: &Attendee,
    status: RegistrationStatus,
    now: DateTime<Utc>,
) -> Result<Registration> {
    let registration = Registration {
        id: RegistrationId::new(),
        event_id,
        user_id: attendee.user_id,
        display_name: attendee.display_name.clone(),
        email: attendee.email.clone(),
        status,
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO registrations
         (id, event_id, user_id, display_name, email, status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(registration.id.as_uuid())
    .bind(event_id.as_uuid())
    .bind(attendee.user_id.as_uuid())
    .bind(&attendee.display_name)
    .bind(&attendee.email)
    .bind(status.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(map_db_err)?;
    Ok(registration)
}
