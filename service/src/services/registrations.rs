//! Registration service: the write path through the capacity arbiter
//! plus ledger-backed reads.

use metrics::counter;
use std::sync::Arc;
use tracing::{info, warn};
use turnout_core::{
    Admission, Attendee, CacheMirror, CancelOutcome, CapacityArbiter, EventId, PaymentSignal,
    Registration, RegistrationId, RegistrationLedger, RegistrationStatus, Result, UserId,
};

/// Registration operations.
///
/// Writes go through the arbiter (the serialization point); reads go
/// through the ledger, with the is-registered flag cached per
/// (event, user) pair.
#[derive(Clone)]
pub struct RegistrationService {
    arbiter: Arc<dyn CapacityArbiter>,
    ledger: Arc<dyn RegistrationLedger>,
    cache: Arc<dyn CacheMirror>,
}

impl RegistrationService {
    /// Create a registration service.
    pub fn new(
        arbiter: Arc<dyn CapacityArbiter>,
        ledger: Arc<dyn RegistrationLedger>,
        cache: Arc<dyn CacheMirror>,
    ) -> Self {
        Self {
            arbiter,
            ledger,
            cache,
        }
    }

    /// Register an attendee for an event.
    ///
    /// Idempotent: a re-submission comes back flagged, with no counter
    /// or cache effects.
    pub async fn register(&self, event_id: EventId, attendee: Attendee) -> Result<Admission> {
        let user_id = attendee.user_id;
        let admission = match self.arbiter.admit(event_id, attendee).await {
            Ok(admission) => admission,
            Err(e) => {
                if e.is_conflict() {
                    let kind = match e {
                        turnout_core::EngineError::CapacityFull(_) => "capacity_full",
                        _ => "already_registered",
                    };
                    counter!("turnout_registration_conflicts_total", "kind" => kind)
                        .increment(1);
                }
                return Err(e);
            }
        };
        if admission.resubmission {
            return Ok(admission);
        }
        counter!(
            "turnout_registrations_total",
            "status" => admission.registration.status.as_str()
        )
        .increment(1);
        info!(
            event_id = %event_id,
            user_id = %user_id,
            status = %admission.registration.status,
            "Registration applied"
        );
        self.invalidate_after_mutation(event_id, &[user_id]).await;
        Ok(admission)
    }

    /// Cancel the caller's registration, promoting from the waitlist.
    pub async fn cancel(&self, event_id: EventId, user_id: UserId) -> Result<CancelOutcome> {
        let outcome = self.arbiter.cancel(event_id, user_id).await?;
        let promoted = outcome.promoted.is_some();
        counter!(
            "turnout_cancellations_total",
            "promoted" => if promoted { "true" } else { "false" }
        )
        .increment(1);
        info!(event_id = %event_id, user_id = %user_id, promoted, "Registration cancelled");

        let mut touched = vec![user_id];
        if let Some(ref promoted) = outcome.promoted {
            touched.push(promoted.user_id);
        }
        self.invalidate_after_mutation(event_id, &touched).await;
        Ok(outcome)
    }

    /// Apply an external payment outcome to a pending registration.
    pub async fn mark_payment_status(
        &self,
        registration_id: RegistrationId,
        signal: PaymentSignal,
    ) -> Result<Registration> {
        let registration = self
            .arbiter
            .mark_payment_status(registration_id, signal)
            .await?;
        info!(
            registration_id = %registration_id,
            event_id = %registration.event_id,
            status = %registration.status,
            "Payment signal applied"
        );
        // A failed payment may promote a user we cannot name here; the
        // flag TTL covers them.
        self.invalidate_after_mutation(registration.event_id, &[registration.user_id])
            .await;
        Ok(registration)
    }

    /// The caller's registrations, newest first.
    pub async fn my_registrations(
        &self,
        user_id: UserId,
        status: Option<RegistrationStatus>,
    ) -> Result<Vec<Registration>> {
        self.ledger.registrations_for_user(user_id, status).await
    }

    /// All registrations for an event, waitlist in FIFO order.
    pub async fn event_registrations(&self, event_id: EventId) -> Result<Vec<Registration>> {
        self.ledger.registrations_for_event(event_id).await
    }

    /// Whether the user holds an active registration for the event.
    ///
    /// Presentation-only: served from the flag cache when possible,
    /// never consulted for capacity decisions.
    pub async fn is_registered(&self, event_id: EventId, user_id: UserId) -> Result<bool> {
        match self.cache.get_registered_flag(event_id, user_id).await {
            Ok(Some(flag)) => return Ok(flag),
            Ok(None) => {}
            Err(e) => {
                counter!("turnout_cache_failures_total").increment(1);
                warn!(event_id = %event_id, error = %e, "Flag cache read failed");
            }
        }

        let registered = self
            .ledger
            .active_registration(event_id, user_id)
            .await?
            .is_some();
        if let Err(e) = self
            .cache
            .put_registered_flag(event_id, user_id, registered)
            .await
        {
            warn!(event_id = %event_id, error = %e, "Flag cache populate failed");
        }
        Ok(registered)
    }

    /// The caller's active registration for an event, if any.
    pub async fn active_registration(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Option<Registration>> {
        self.ledger.active_registration(event_id, user_id).await
    }

    /// Drop the event entry, bump the list generation and drop the
    /// touched users' flags after a committed mutation.
    async fn invalidate_after_mutation(&self, event_id: EventId, users: &[UserId]) {
        if let Err(e) = self.cache.invalidate_event(event_id).await {
            counter!("turnout_cache_failures_total").increment(1);
            warn!(event_id = %event_id, error = %e, "Event cache invalidation failed");
        }
        if let Err(e) = self.cache.invalidate_lists().await {
            counter!("turnout_cache_failures_total").increment(1);
            warn!(event_id = %event_id, error = %e, "List cache invalidation failed");
        }
        for user_id in users {
            if let Err(e) = self
                .cache
                .invalidate_registered_flag(event_id, *user_id)
                .await
            {
                warn!(event_id = %event_id, user_id = %user_id, error = %e, "Flag invalidation failed");
            }
        }
    }
}
