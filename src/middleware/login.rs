//! Login gate.
//!
//! Paths containing the configured login URL always start SP-initiated SSO.
//! Public paths pass through. Anything else needs an authenticated session
//! and starts SSO when there is none.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tower_cookies::Cookies;

use crate::{
    AppState,
    auth::{AuthError, cookies},
    routes::saml::start_login,
};

/// Paths served without authentication, besides the ACS.
const PUBLIC_PATHS: &[&str] = &["/", "/main", "/out", "/error", "/logout"];

pub async fn require_login(
    State(state): State<AppState>,
    cookies: Cookies,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let path = req.uri().path();

    if !state.entry_point.is_login_url(path) {
        if is_public_path(&state.config.saml.acs_path, path) {
            return Ok(next.run(req).await);
        }
        if is_authenticated(&state, &cookies).await? {
            return Ok(next.run(req).await);
        }
        tracing::debug!(path, "Unauthenticated request to protected path");
    }

    let redirect = start_login(&state, &cookies, req.headers(), req.uri()).await?;
    Err(AuthError::LoginRequired {
        redirect_url: redirect.to_string(),
    })
}

async fn is_authenticated(state: &AppState, cookies: &Cookies) -> Result<bool, AuthError> {
    let Some(id) = cookies::session_id(cookies, &state.config.session) else {
        return Ok(false);
    };
    let session = state.sessions.get_session(id).await?;
    Ok(session.is_some_and(|s| s.is_authenticated()))
}

/// Whether `path` is served without a session. The ACS matches itself and
/// everything below it.
fn is_public_path(acs_path: &str, path: &str) -> bool {
    if PUBLIC_PATHS.contains(&path) {
        return true;
    }
    let acs_path = acs_path.trim_end_matches('/');
    path.strip_prefix(acs_path)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
