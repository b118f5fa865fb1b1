//! Authentication extractor.
//!
//! Clients send `Authorization: Bearer <principal-id>`. When `AUTH_SECRET` is
//! configured the token must be `<principal-id>:<secret>` and requests
//! without a header are rejected; otherwise a missing header means the
//! anonymous principal.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};
use parkspot_engine::Principal;

use crate::AppState;

/// Principal id used for requests without credentials.
pub const ANONYMOUS: &str = "anonymous";

/// Authenticated principal extracted from the request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub principal: Principal,
}

impl AuthUser {
    /// Resolve a bearer token against the configured secret.
    pub fn from_token(token: &str, secret: Option<&str>) -> Result<Self, &'static str> {
        let principal_id = match secret {
            Some(secret) => match token.rsplit_once(':') {
                Some((id, given)) if given == secret => id,
                _ => return Err("Invalid bearer token"),
            },
            None => token,
        };

        if principal_id.is_empty() {
            return Err("Empty bearer token");
        }

        Ok(AuthUser {
            principal: Principal::new(principal_id),
        })
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let secret = state.config.auth_secret.as_deref();

        match auth_header {
            Some(header) => match header.strip_prefix("Bearer ") {
                Some(token) => AuthUser::from_token(token, secret).map_err(|reason| {
                    tracing::debug!(reason, "Rejected bearer token");
                    (StatusCode::UNAUTHORIZED, reason)
                }),
                None => Err((
                    StatusCode::UNAUTHORIZED,
                    "Invalid authorization header format",
                )),
            },
            None if secret.is_none() => Ok(AuthUser {
                principal: Principal::new(ANONYMOUS),
            }),
            None => Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
        }
    }
}
