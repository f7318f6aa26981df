//! Caller identity extraction.
//!
//! The engine sits behind an identity-aware gateway that authenticates
//! the caller and forwards their identity in trusted headers:
//!
//! - `x-user-id`: the authenticated user id (UUID, required)
//! - `x-display-name`: display name (required for registration)
//! - `x-email`: contact email (required for registration)
//!
//! Identity is trusted as-is; credentials are never re-validated here.

use crate::api::error::ApiError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use turnout_core::{Attendee, UserId};
use uuid::Uuid;

/// The authenticated caller.
///
/// Use as a handler parameter to require an authenticated user.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Authenticated user id.
    pub user_id: UserId,
    /// Display name, when the gateway forwarded one.
    pub display_name: Option<String>,
    /// Contact email, when the gateway forwarded one.
    pub email: Option<String>,
}

impl Identity {
    /// The caller as a registration attendee.
    ///
    /// # Errors
    ///
    /// Returns 400 when the gateway did not forward a display name and
    /// email; registrations snapshot both.
    pub fn into_attendee(self) -> Result<Attendee, ApiError> {
        let display_name = self
            .display_name
            .ok_or_else(|| ApiError::bad_request("Missing x-display-name header"))?;
        let email = self
            .email
            .ok_or_else(|| ApiError::bad_request("Missing x-email header"))?;
        Ok(Attendee {
            user_id: self.user_id,
            display_name,
            email,
        })
    }
}

fn header_string(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = header_string(parts, "x-user-id")
            .ok_or_else(|| ApiError::unauthenticated("Missing x-user-id header"))?;
        let user_id = raw
            .parse::<Uuid>()
            .map(UserId::from_uuid)
            .map_err(|_| ApiError::unauthenticated("Invalid x-user-id header"))?;

        Ok(Self {
            user_id,
            display_name: header_string(parts, "x-display-name"),
            email: header_string(parts, "x-email"),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn attendee_requires_name_and_email() {
        let identity = Identity {
            user_id: UserId::new(),
            display_name: Some("Ada".to_string()),
            email: None,
        };
        assert!(identity.into_attendee().is_err());

        let identity = Identity {
            user_id: UserId::new(),
            display_name: Some("Ada".to_string()),
            email: Some("ada@example.com".to_string()),
        };
        let attendee = identity.into_attendee().unwrap();
        assert_eq!(attendee.display_name, "Ada");
    }
}
