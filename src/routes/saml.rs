//! SAML endpoints.
//!
//! - `{login_url}` - issues an AuthnRequest and redirects to the IdP (served
//!   by [`crate::middleware::require_login`])
//! - `{acs_path}` and `{acs_path}/**` - assertion consumer service
//! - `/logout` - local logout plus an IdP LogoutRequest redirect

use axum::{
    Form,
    extract::{Query, State},
    http::{HeaderMap, Uri, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tower_cookies::Cookies;
use url::Url;

use crate::{
    AppState,
    auth::{AuthError, SessionState, cookies},
    saml::decode_message,
};

/// `SAMLResponse` carried in the query string or a form body.
#[derive(Debug, Default, Deserialize)]
pub struct AcsParams {
    #[serde(rename = "SAMLResponse")]
    pub saml_response: Option<String>,
}

/// Issue an AuthnRequest for the caller's session, creating the session if
/// needed. Returns the IdP redirect target.
#[tracing::instrument(name = "saml.sso", skip_all, fields(path = %uri.path()))]
pub(crate) async fn start_login(
    state: &AppState,
    cookies: &Cookies,
    headers: &HeaderMap,
    uri: &Uri,
) -> Result<Url, AuthError> {
    let session_config = &state.config.session;
    let existing = match cookies::session_id(cookies, session_config) {
        Some(id) => state.sessions.get_session(id).await?,
        None => None,
    };
    let is_new = existing.is_none();
    let mut session = existing.unwrap_or_else(|| SessionState::new(session_config.duration()));

    let acs_url = state.config.saml.acs_url(&request_origin(headers, uri));
    let redirect = state.entry_point.commence(&acs_url, &mut session)?;

    if is_new {
        state.sessions.create_session(session.clone()).await?;
        cookies.add(cookies::session_cookie(session_config, session.id));
    } else {
        state.sessions.update_session(session.clone()).await?;
    }
    tracing::info!(
        session_id = %session.id,
        path = uri.path(),
        "Redirecting to IdP for authentication"
    );

    Ok(redirect)
}

/// ACS over the HTTP-Redirect binding.
#[tracing::instrument(name = "saml.acs", skip_all)]
pub async fn acs_get(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(params): Query<AcsParams>,
) -> Result<Response, AuthError> {
    consume(&state, &cookies, params).await
}

/// ACS over the HTTP-POST binding.
#[tracing::instrument(name = "saml.acs", skip_all)]
pub async fn acs_post(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(params): Form<AcsParams>,
) -> Result<Response, AuthError> {
    consume(&state, &cookies, params).await
}

async fn consume(
    state: &AppState,
    cookies: &Cookies,
    params: AcsParams,
) -> Result<Response, AuthError> {
    let encoded = params
        .saml_response
        .filter(|value| !value.trim().is_empty())
        .ok_or(AuthError::MissingSamlResponse)?;
    let response_xml = decode_message(&encoded)?;

    let session_config = &state.config.session;
    let previous = match cookies::session_id(cookies, session_config) {
        Some(id) => state.sessions.get_session(id).await?,
        None => None,
    };
    let mut session = previous
        .clone()
        .unwrap_or_else(|| SessionState::new(session_config.duration()));

    let principal = state.consumer.consume(&response_xml, &mut session)?;
    tracing::info!(
        username = %principal.username,
        assertion_id = session.idp_token.as_deref().unwrap_or(""),
        "SAML authentication succeeded"
    );
    session.principal = Some(principal);

    // New ID on login; the pre-login session is discarded.
    let session = session.rotate(session_config.duration());
    state.sessions.create_session(session.clone()).await?;
    if let Some(previous) = previous {
        state.sessions.delete_session(previous.id).await?;
    }
    cookies.add(cookies::session_cookie(session_config, session.id));
    tracing::info!(session_id = %session.id, "SAML session created");

    Ok(Redirect::to(&state.config.saml.login_success_url).into_response())
}

/// Logout: notify the IdP when possible, always end the local session.
#[tracing::instrument(name = "saml.logout", skip_all)]
pub async fn logout(State(state): State<AppState>, cookies: Cookies) -> Response {
    let session_config = &state.config.session;
    let session_id = cookies::session_id(&cookies, session_config);

    let redirect = state
        .logout
        .logout(state.sessions.as_ref(), session_id)
        .await;
    cookies.remove(cookies::removal_cookie(session_config));

    match redirect {
        Some(url) => Redirect::to(url.as_str()).into_response(),
        None => Redirect::to(&state.config.saml.logout_success_url).into_response(),
    }
}

/// `scheme://host[:port]` of the current request. The scheme is only known
/// for absolute-form request targets and defaults to `http`.
pub(crate) fn request_origin(headers: &HeaderMap, uri: &Uri) -> String {
    let scheme = uri.scheme_str().unwrap_or("http");
    let host = uri
        .authority()
        .map(|authority| authority.as_str().to_string())
        .or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "localhost".to_string());
    format!("{scheme}://{host}")
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_request_origin_from_host_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("sp.example.com:8443"));
        let uri: Uri = "/login".parse().unwrap();
        assert_eq!(request_origin(&headers, &uri), "http://sp.example.com:8443");
    }

    #[test]
    fn test_request_origin_from_absolute_uri() {
        let uri: Uri = "https://sp.example.com/login".parse().unwrap();
        assert_eq!(
            request_origin(&HeaderMap::new(), &uri),
            "https://sp.example.com"
        );
    }

    #[test]
    fn test_request_origin_without_host() {
        let uri: Uri = "/login".parse().unwrap();
        assert_eq!(request_origin(&HeaderMap::new(), &uri), "http://localhost");
    }
}
