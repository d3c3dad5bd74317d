use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Identity of the account making a request.
///
/// Sessions are issued and verified upstream; the auth proxy forwards the
/// resolved account as `x-user-id` and, for administrators,
/// `x-user-role: admin`. Add this as a handler parameter to require identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl Caller {
    /// True if this caller may act on something owned by `owner`.
    pub fn may_act_for(&self, owner: Uuid) -> bool {
        self.is_admin || self.user_id == owner
    }
}

#[cfg(test)]
impl Caller {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("missing caller identity"))?;
        let user_id = Uuid::parse_str(user_id.trim())
            .map_err(|_| AppError::unauthorized("malformed caller identity"))?;

        let is_admin = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|role| role.trim().eq_ignore_ascii_case("admin"));

        Ok(Caller { user_id, is_admin })
    }
}
