//! Router configuration.

use super::health::{health_check, readiness_check};
use super::state::AppState;
use crate::api::{events, registrations};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the Axum router: health checks at the root, everything else
/// under `/api`.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Event lifecycle
        .route("/events", post(events::create_event))
        .route("/events", get(events::list_events))
        .route("/events/:id", get(events::get_event))
        .route("/events/:id", put(events::update_event))
        .route("/events/:id/publish", post(events::publish_event))
        .route("/events/:id/cancel", post(events::cancel_event))
        .route("/events/:id/complete", post(events::complete_event))
        // Registrations
        .route(
            "/events/:id/registrations",
            post(registrations::register)
                .get(registrations::list_event_registrations)
                .delete(registrations::cancel_registration),
        )
        .route(
            "/events/:id/registrations/me",
            get(registrations::my_registration),
        )
        .route("/registrations", get(registrations::my_registrations))
        // Payment collaborator callback
        .route(
            "/registrations/:id/payment",
            post(registrations::payment_signal),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", api_routes)
        .with_state(state)
}
