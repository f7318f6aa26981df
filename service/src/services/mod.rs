//! Application services over the engine traits.
//!
//! Services own the cache-aside policy: reads consult the mirror first
//! and fall back to the authoritative store on a miss or a cache
//! failure; mutations hit the store only, then invalidate the mirror
//! after the commit. Cache failures are logged and swallowed, never
//! surfaced.

mod events;
mod registrations;

pub use events::EventService;
pub use registrations::RegistrationService;
