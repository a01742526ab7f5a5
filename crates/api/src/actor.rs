//! Actor extraction from the identity headers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;
use domain::{Actor, Role};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The authenticated actor, read from `x-user-id` and `x-user-role`.
///
/// The identity provider in front of the API sets both headers; they are
/// trusted as given.
#[derive(Debug, Clone, Copy)]
pub struct CurrentActor(pub Actor);

impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id: UserId = header(parts, USER_ID_HEADER)?
            .parse()
            .map_err(|e| ApiError::Unauthenticated(format!("Invalid {USER_ID_HEADER}: {e}")))?;
        let role: Role = header(parts, USER_ROLE_HEADER)?
            .parse()
            .map_err(|e| ApiError::Unauthenticated(format!("Invalid {USER_ROLE_HEADER}: {e}")))?;

        Ok(CurrentActor(Actor::new(user_id, role)))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ApiError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| ApiError::Unauthenticated(format!("Missing {name} header")))?
        .to_str()
        .map_err(|_| ApiError::Unauthenticated(format!("Unreadable {name} header")))
}
