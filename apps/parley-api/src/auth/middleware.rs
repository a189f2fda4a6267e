//! Session-cookie extraction for HTTP handlers and the websocket upgrade.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;

use crate::auth::session::{self, COOKIE_NAME};
use crate::error::ApiError;
use crate::AppState;

/// Authenticated user extracted from the session cookie.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub username: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let cookie = jar
            .get(COOKIE_NAME)
            .ok_or_else(|| ApiError::unauthorized("Missing session cookie"))?;

        let data = session::resolve_session(state.kv.as_ref(), &state.config.secret, cookie.value())
            .await?
            .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

        let user = state
            .relations
            .find_user(&data.user_id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Unknown user"))?;

        Ok(AuthUser {
            user_id: user.id,
            username: user.username,
        })
    }
}
