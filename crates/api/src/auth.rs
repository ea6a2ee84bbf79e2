//! Caller identity extracted from request headers.
//!
//! Authentication happens upstream; this service trusts the identity
//! headers set by the gateway in front of it.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;
use domain::Order;

use crate::error::ApiError;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the caller role (`USER` or `ADMIN`).
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners and admins may read and act on an order.
    pub fn ensure_can_access(&self, order: &Order) -> Result<(), ApiError> {
        if self.is_admin() || order.is_owned_by(self.user_id) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "Order {} belongs to another user",
                order.id
            )))
        }
    }

    /// Only the owner may pay for an order; the admin role grants no exemption.
    pub fn ensure_owner(&self, order: &Order) -> Result<(), ApiError> {
        if order.is_owned_by(self.user_id) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "Order {} belongs to another user",
                order.id
            )))
        }
    }

    pub fn ensure_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Admin role required".to_string()))
        }
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthenticated(format!("Missing {USER_ID_HEADER} header")))?
            .parse::<UserId>()
            .map_err(|e| ApiError::Unauthenticated(format!("Invalid {USER_ID_HEADER}: {e}")))?;

        let role = match parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            None => Role::User,
            Some(role) if role.eq_ignore_ascii_case("user") => Role::User,
            Some(role) if role.eq_ignore_ascii_case("admin") => Role::Admin,
            Some(other) => {
                return Err(ApiError::Unauthenticated(format!(
                    "Unknown role: {other}"
                )));
            }
        };

        Ok(Caller { user_id, role })
    }
}
