//! Caller identity, as asserted by the fronting identity gateway.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use geoguard_shared::constants::{EMAIL_HEADER, USER_ID_HEADER};
use geoguard_shared::AdminPolicy;

use crate::error::ServerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub email: String,
}

impl Caller {
    pub fn is_admin(&self, admins: &AdminPolicy) -> bool {
        admins.is_admin(&self.email)
    }

    pub fn owns(&self, key: &str) -> bool {
        self.user_id == key
    }
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER).ok_or(ServerError::Unauthorized)?;
        let email = header(parts, EMAIL_HEADER).ok_or(ServerError::Unauthorized)?;
        Ok(Caller { user_id, email })
    }
}
