//! Postgres event store: lifecycle and listings.

use crate::arbiter::{lock_event, oldest_waitlisted, set_lock_timeout, update_registration_status};
use crate::{
    EVENT_COLUMNS, EventRow, REGISTRATION_COLUMNS, RegistrationRow, event_from_row, map_db_err,
    outbox::stage_change, registration_from_row,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use turnout_core::{
    BoxFuture, Change, ChangeEnvelope, Clock, EngineError, Event, EventCancellation, EventChanges,
    EventDraft, EventFilter, EventId, EventStatus, EventStore, EventUpdate, Registration,
    RegistrationStatus, Result, StagedChange, UserId,
};

/// Postgres implementation of the event store.
pub struct PostgresEventStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    topic: String,
}

impl PostgresEventStore {
    /// Create a store over a pool.
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>, lock_timeout: Duration, topic: String) -> Self {
        Self {
            pool,
            clock,
            lock_timeout,
            topic,
        }
    }

    fn staged(&self, event_id: EventId, occurred_at: DateTime<Utc>, change: Change) -> StagedChange {
        StagedChange {
            topic: self.topic.clone(),
            envelope: ChangeEnvelope::new(event_id, occurred_at, change),
        }
    }

    async fn locked_owned_event(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: EventId,
        organizer: UserId,
    ) -> Result<Event> {
        let event = lock_event(tx, id)
            .await?
            .ok_or(EngineError::EventNotFound(id))?;
        if event.organizer_id != organizer {
            return Err(EngineError::Unauthorized {
                event_id: id,
                user_id: organizer,
            });
        }
        Ok(event)
    }

    async fn write_event(tx: &mut Transaction<'_, Postgres>, event: &Event) -> Result<()> {
        sqlx::query(
            "UPDATE events
             SET title = $2, starts_at = $3, ends_at = $4, timezone = $5,
                 max_capacity = $6, confirmed_count = $7, waitlist_enabled = $8,
                 status = $9, updated_at = $10
             WHERE id = $1",
        )
        .bind(event.id.as_uuid())
        .bind(&event.title)
        .bind(event.schedule.starts_at)
        .bind(event.schedule.ends_at)
        .bind(&event.schedule.timezone)
        .bind(event.max_capacity.map(i64::from))
        .bind(i64::from(event.confirmed_count))
        .bind(event.waitlist_enabled)
        .bind(event.status.as_str())
        .bind(event.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }
}

impl EventStore for PostgresEventStore {
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
            sqlx::query(
                "INSERT INTO events
                 (id, organizer_id, title, starts_at, ends_at, timezone, max_capacity,
                  confirmed_count, waitlist_enabled, requires_payment, status,
                  created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $10, $11, $11)",
            )
            .bind(event.id.as_uuid())
            .bind(event.organizer_id.as_uuid())
            .bind(&event.title)
            .bind(event.schedule.starts_at)
            .bind(event.schedule.ends_at)
            .bind(&event.schedule.timezone)
            .bind(event.max_capacity.map(i64::from))
            .bind(event.waitlist_enabled)
            .bind(event.requires_payment)
            .bind(event.status.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
            tracing::info!(event_id = %event.id, organizer_id = %event.organizer_id, "event created");
            Ok(event)
        })
    }

    fn get_event(&self, id: EventId) -> BoxFuture<'_, Result<Option<Event>>> {
        Box::pin(async move {
            let row: Option<EventRow> = sqlx::query_as(&format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
            row.map(event_from_row).transpose()
        })
    }

    fn list_events(&self, filter: EventFilter) -> BoxFuture<'_, Result<Vec<Event>>> {
        Box::pin(async move {
            let limit = i64::from(filter.page_size);
            let offset = i64::from(filter.page) * limit;
            let rows: Vec<EventRow> = sqlx::query_as(&format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE ($1::uuid IS NULL OR organizer_id = $1)
                   AND ($2::text IS NULL OR status = $2)
                   AND ($3::timestamptz IS NULL OR starts_at >= $3)
                 ORDER BY starts_at, id
                 LIMIT $4 OFFSET $5"
            ))
            .bind(filter.organizer_id.map(|o| *o.as_uuid()))
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.starts_after)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
            rows.into_iter().map(event_from_row).collect()
        })
    }

    fn publish_event(&self, id: EventId, organizer: UserId) -> BoxFuture<'_, Result<Event>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            set_lock_timeout(&mut tx, self.lock_timeout).await?;
            let mut event = self.locked_owned_event(&mut tx, id, organizer).await?;
            match event.status {
                EventStatus::Published => {
                    tx.commit().await.map_err(map_db_err)?;
                    Ok(event)
                }
                EventStatus::Draft => {
                    event.status = EventStatus::Published;
                    event.updated_at = now;
                    Self::write_event(&mut tx, &event).await?;
                    let change = Change::EventPublished {
                        event: event.clone(),
                    };
                    stage_change(&mut tx, &self.staged(id, now, change)).await?;
                    tx.commit().await.map_err(map_db_err)?;
                    tracing::info!(event_id = %id, "event published");
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
            let now = self.clock.now();
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            set_lock_timeout(&mut tx, self.lock_timeout).await?;
            let mut event = self.locked_owned_event(&mut tx, id, organizer).await?;
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
                    let Some(next) = oldest_waitlisted(&mut tx, id).await? else {
                        break;
                    };
                    let status = if event.requires_payment {
                        RegistrationStatus::Pending
                    } else {
                        RegistrationStatus::Confirmed
                    };
                    let row = update_registration_status(&mut tx, next.id, status, now).await?;
                    let change = Change::RegistrationPromoted {
                        registration: row.clone(),
                    };
                    stage_change(&mut tx, &self.staged(id, now, change)).await?;
                    event.confirmed_count += 1;
                    counter_moved = true;
                    promoted.push(row);
                }
            }

            event.updated_at = now;
            Self::write_event(&mut tx, &event).await?;
            let change = Change::EventUpdated {
                event: event.clone(),
            };
            stage_change(&mut tx, &self.staged(id, now, change)).await?;
            if counter_moved {
                let change = Change::CapacityChanged {
                    event_id: id,
                    confirmed_count: event.confirmed_count,
                    max_capacity: event.max_capacity,
                };
                stage_change(&mut tx, &self.staged(id, now, change)).await?;
            }
            tx.commit().await.map_err(map_db_err)?;
            tracing::info!(
                event_id = %id,
                promoted = promoted.len(),
                "event updated"
            );
            Ok(EventUpdate { event, promoted })
        })
    }

    fn cancel_event(
        &self,
        id: EventId,
        organizer: UserId,
    ) -> BoxFuture<'_, Result<EventCancellation>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            set_lock_timeout(&mut tx, self.lock_timeout).await?;
            let mut event = self.locked_owned_event(&mut tx, id, organizer).await?;
            if event.status == EventStatus::Cancelled {
                tx.commit().await.map_err(map_db_err)?;
                return Ok(EventCancellation {
                    event,
                    cancelled: Vec::new(),
                });
            }

            // Cascade: every active registration goes down with the
            // event. No promotion, there is nothing left to promote
            // into.
            let rows: Vec<RegistrationRow> = sqlx::query_as(&format!(
                "UPDATE registrations SET status = 'cancelled', updated_at = $2
                 WHERE event_id = $1 AND status <> 'cancelled'
                 RETURNING {REGISTRATION_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .bind(now)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_db_err)?;
            let cancelled: Vec<Registration> = rows
                .into_iter()
                .map(registration_from_row)
                .collect::<Result<_>>()?;
            for registration in &cancelled {
                let change = Change::RegistrationCancelled {
                    registration: registration.clone(),
                };
                stage_change(&mut tx, &self.staged(id, now, change)).await?;
            }

            event.status = EventStatus::Cancelled;
            event.confirmed_count = 0;
            event.updated_at = now;
            Self::write_event(&mut tx, &event).await?;
            let change = Change::EventCancelled {
                event: event.clone(),
            };
            stage_change(&mut tx, &self.staged(id, now, change)).await?;
            tx.commit().await.map_err(map_db_err)?;
            tracing::info!(
                event_id = %id,
                cascaded = cancelled.len(),
                "event cancelled"
            );
            Ok(EventCancellation { event, cancelled })
        })
    }

    fn complete_event(&self, id: EventId, organizer: UserId) -> BoxFuture<'_, Result<Event>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            set_lock_timeout(&mut tx, self.lock_timeout).await?;
            let mut event = self.locked_owned_event(&mut tx, id, organizer).await?;
            match event.status {
                EventStatus::Completed => {
                    tx.commit().await.map_err(map_db_err)?;
                    Ok(event)
                }
                EventStatus::Published => {
                    if now < event.schedule.ends_at {
                        return Err(EngineError::Validation("event has not ended yet".into()));
                    }
                    event.status = EventStatus::Completed;
                    event.updated_at = now;
                    Self::write_event(&mut tx, &event).await?;
                    let change = Change::EventUpdated {
                        event: event.clone(),
                    };
                    stage_change(&mut tx, &self.staged(id, now, change)).await?;
                    tx.commit().await.map_err(map_db_err)?;
                    Ok(event)
                }
                EventStatus::Draft | EventStatus::Cancelled => Err(EngineError::Validation(
                    format!("cannot complete a {} event", event.status),
                )),
            }
        })
    }
}
