//! Business metrics for the registration engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `turnout_registrations_total{status}` - Registrations applied, by outcome
//! - `turnout_registration_conflicts_total{kind}` - Expected rejections (capacity full, already registered)
//! - `turnout_cancellations_total{promoted}` - Cancellations, split by whether a promotion followed
//! - `turnout_events_total{operation}` - Event lifecycle operations
//! - `turnout_cache_hits_total{kind}` / `turnout_cache_misses_total{kind}` - Cache mirror effectiveness
//! - `turnout_cache_failures_total` - Cache operations that degraded to a store read

use metrics::describe_counter;

/// Register metric descriptions once at startup, before any are
/// recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "turnout_registrations_total",
        "Registrations applied, labeled by resulting status (confirmed, pending, waitlisted)"
    );
    describe_counter!(
        "turnout_registration_conflicts_total",
        "Expected registration rejections (capacity_full, already_registered)"
    );
    describe_counter!(
        "turnout_cancellations_total",
        "Registration cancellations, labeled by whether a waitlisted row was promoted"
    );
    describe_counter!(
        "turnout_events_total",
        "Event lifecycle operations (created, published, updated, cancelled, completed)"
    );
    describe_counter!(
        "turnout_cache_hits_total",
        "Cache mirror hits, labeled by projection kind (event, list)"
    );
    describe_counter!(
        "turnout_cache_misses_total",
        "Cache mirror misses, labeled by projection kind (event, list)"
    );
    describe_counter!(
        "turnout_cache_failures_total",
        "Cache operations that failed and degraded to a direct store read"
    );
}
