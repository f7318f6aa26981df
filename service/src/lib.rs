//! HTTP registration API and production wiring for the Turnout
//! registration engine.
//!
//! Composes the Postgres authoritative store, the Redis cache mirror
//! and the Redpanda change announcer behind an Axum API. The `server`
//! binary is the production entry point.

pub mod api;
pub mod config;
pub mod metrics;
pub mod server;
pub mod services;

pub use config::Config;
pub use server::{AppState, build_router};
pub use services::{EventService, RegistrationService};
