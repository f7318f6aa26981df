//! Application state for the HTTP server.

use crate::services::{EventService, RegistrationService};

/// Shared state cloned into every handler.
///
/// Both services are cheap to clone (internally `Arc`ed trait objects).
#[derive(Clone)]
pub struct AppState {
    /// Event lifecycle operations behind the cache mirror.
    pub events: EventService,
    /// Registration operations through the capacity arbiter.
    pub registrations: RegistrationService,
}

impl AppState {
    /// Create the application state.
    #[must_use]
    pub const fn new(events: EventService, registrations: RegistrationService) -> Self {
        Self {
            events,
            registrations,
        }
    }
}
