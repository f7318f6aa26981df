//! Read-side registration queries.

use crate::{REGISTRATION_COLUMNS, RegistrationRow, map_db_err, registration_from_row};
use sqlx::postgres::PgPool;
use turnout_core::{
    BoxFuture, EventId, Registration, RegistrationLedger, RegistrationStatus, Result, UserId,
};

/// Postgres implementation of the registration ledger.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Create a ledger over a pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl RegistrationLedger for PostgresLedger {
    fn registrations_for_user(
        &self,
        user_id: UserId,
        status: Option<RegistrationStatus>,
    ) -> BoxFuture<'_, Result<Vec<Registration>>> {
        Box::pin(async move {
            let rows: Vec<RegistrationRow> = sqlx::query_as(&format!(
                "SELECT {REGISTRATION_COLUMNS} FROM registrations
                 WHERE user_id = $1
                   AND ($2::text IS NULL OR status = $2)
                 ORDER BY created_at DESC"
            ))
            .bind(user_id.as_uuid())
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
            rows.into_iter().map(registration_from_row).collect()
        })
    }

    fn registrations_for_event(
        &self,
        event_id: EventId,
    ) -> BoxFuture<'_, Result<Vec<Registration>>> {
        Box::pin(async move {
            let rows: Vec<RegistrationRow> = sqlx::query_as(&format!(
                "SELECT {REGISTRATION_COLUMNS} FROM registrations
                 WHERE event_id = $1
                 ORDER BY created_at, id"
            ))
            .bind(event_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
            rows.into_iter().map(registration_from_row).collect()
        })
    }

    fn active_registration(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> BoxFuture<'_, Result<Option<Registration>>> {
        Box::pin(async move {
            let row: Option<RegistrationRow> = sqlx::query_as(&format!(
                "SELECT {REGISTRATION_COLUMNS} FROM registrations
                 WHERE event_id = $1 AND user_id = $2 AND status <> 'cancelled'"
            ))
            .bind(event_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
            row.map(registration_from_row).transpose()
        })
    }
}
