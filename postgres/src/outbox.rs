//! Transactional outbox staging and relay.

use crate::map_db_err;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use turnout_core::{Announcer, EngineError, Result, StagedChange};
use uuid::Uuid;

/// Insert a change envelope into the outbox, inside the caller's
/// transaction.
pub(crate) async fn stage_change(
    tx: &mut Transaction<'_, Postgres>,
    staged: &StagedChange,
) -> Result<()> {
    let payload = staged
        .envelope
        .to_json()
        .map_err(|e| EngineError::Storage(format!("failed to encode envelope: {e}")))?;
    sqlx::query(
        "INSERT INTO outbox (message_id, topic, kind, event_id, payload)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(staged.envelope.message_id)
    .bind(&staged.topic)
    .bind(staged.envelope.kind())
    .bind(staged.envelope.event_id.as_uuid())
    .bind(payload)
    .execute(&mut **tx)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

/// Background drain loop from the outbox to the announcer.
///
/// Exactly one instance drains at a time: each batch takes the
/// transaction-scoped advisory lock [`OutboxRelay::DRAIN_LOCK_KEY`],
/// and an instance that loses the race skips its tick. Draining rows
/// in insertion order from a single holder is what keeps per-event
/// causal order on the wire; two drainers splitting the backlog could
/// publish a later row for an event before an earlier one.
///
/// A row is marked published only after the broker acknowledged it; a
/// crash in between redelivers the envelope, which consumers absorb
/// through `message_id` deduplication.
///
/// A publish failure stops the current batch so envelopes for the same
/// event never overtake each other.
pub struct OutboxRelay {
    pool: PgPool,
    announcer: Arc<dyn Announcer>,
    poll_interval: Duration,
    batch_size: i64,
}

impl OutboxRelay {
    /// Advisory lock key that serializes draining across instances.
    pub const DRAIN_LOCK_KEY: i64 = 0x0074_7572_6e6f_7574;

    /// Create a relay over a pool and an announcer.
    #[must_use]
    pub fn new(pool: PgPool, announcer: Arc<dyn Announcer>) -> Self {
        Self {
            pool,
            announcer,
            poll_interval: Duration::from_millis(200),
            batch_size: 100,
        }
    }

    /// Override the poll interval (default 200ms).
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the batch size (default 100).
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Publish one batch of unpublished rows.
    ///
    /// Returns the number of rows published. Returns `Ok(0)` without
    /// touching the backlog when another instance holds the drain
    /// lock.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] on database failures. Broker
    /// failures are not errors at this level: the batch stops, rows
    /// already published stay marked, and the rest wait for the next
    /// tick.
    pub async fn drain_once(&self) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock($1)")
            .bind(Self::DRAIN_LOCK_KEY)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_err)?;
        if !acquired {
            return Ok(0);
        }

        let rows: Vec<(i64, String, Uuid, serde_json::Value)> = sqlx::query_as(
            "SELECT id, topic, event_id, payload
             FROM outbox
             WHERE published_at IS NULL
             ORDER BY id
             LIMIT $1
             FOR UPDATE",
        )
        .bind(self.batch_size)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_db_err)?;

        let mut published = 0;
        for (id, topic, event_id, payload) in rows {
            let bytes = serde_json::to_vec(&payload)
                .map_err(|e| EngineError::Storage(format!("failed to encode payload: {e}")))?;
            let key = event_id.to_string();
            match self.announcer.publish(&topic, &key, &bytes).await {
                Ok(()) => {
                    sqlx::query("UPDATE outbox SET published_at = now() WHERE id = $1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_db_err)?;
                    published += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        outbox_id = id,
                        topic = %topic,
                        error = %e,
                        "publish failed, stopping batch"
                    );
                    break;
                }
            }
        }

        tx.commit().await.map_err(map_db_err)?;
        if published > 0 {
            tracing::debug!(published, "drained outbox batch");
        }
        Ok(published)
    }

    /// Run the drain loop until the task is aborted.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.drain_once().await {
                tracing::error!(error = %e, "outbox drain failed");
            }
        }
    }
}
