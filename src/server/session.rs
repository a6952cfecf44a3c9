use super::state::ServerState;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tracing::debug;

/// The caller's identity, resolved by an external session mechanism and
/// carried on the request as a cookie (or header for non-browser clients).
/// The username arrives pre-validated; this extractor performs no
/// authentication of its own.
#[derive(Debug)]
pub struct Session {
    pub username: String,
}

pub const COOKIE_USERNAME_KEY: &str = "username";
pub const HEADER_USERNAME_KEY: &str = "X-Username";

pub enum SessionExtractionError {
    NotAuthenticated,
}

impl IntoResponse for SessionExtractionError {
    fn into_response(self) -> axum::response::Response {
        match self {
            SessionExtractionError::NotAuthenticated => StatusCode::UNAUTHORIZED.into_response(),
        }
    }
}

async fn extract_username_from_cookies(parts: &mut Parts, ctx: &ServerState) -> Option<String> {
    CookieJar::from_request_parts(parts, &ctx)
        .await
        .expect("Could not read cookies into CookieJar.")
        .get(COOKIE_USERNAME_KEY)
        .map(Cookie::value)
        .map(|s| s.to_string())
}

fn extract_username_from_headers(parts: &mut Parts) -> Option<String> {
    parts
        .headers
        .get(HEADER_USERNAME_KEY)
        .map(|v| v.as_bytes().to_owned())
        .map(|b| String::from_utf8_lossy(&b).into_owned())
}

async fn extract_session_from_request_parts(
    parts: &mut Parts,
    ctx: &ServerState,
) -> Option<Session> {
    let username = match extract_username_from_cookies(parts, ctx)
        .await
        .or_else(|| extract_username_from_headers(parts))
    {
        None => {
            debug!("No username in cookies nor headers, caller is anonymous.");
            return None;
        }
        Some(x) => x,
    };

    if username.is_empty() {
        return None;
    }

    Some(Session { username })
}

impl FromRequestParts<ServerState> for Session {
    type Rejection = SessionExtractionError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        extract_session_from_request_parts(parts, ctx)
            .await
            .ok_or(SessionExtractionError::NotAuthenticated)
    }
}

impl FromRequestParts<ServerState> for Option<Session> {
    type Rejection = SessionExtractionError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        Ok(extract_session_from_request_parts(parts, ctx).await)
    }
}
