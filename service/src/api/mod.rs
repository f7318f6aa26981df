//! HTTP API: handlers, request/response types, error mapping and
//! caller identity extraction.

pub mod error;
pub mod events;
pub mod identity;
pub mod registrations;
