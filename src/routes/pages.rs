//! HTML pages.

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use tower_cookies::Cookies;

use crate::{
    AppState,
    auth::{AuthError, SessionState, cookies},
};

const STYLE: &str = "body{font-family:sans-serif;margin:2em}pre{white-space:pre-wrap;word-break:break-all;background:#f4f4f4;padding:1em}";

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title><style>{STYLE}</style></head><body>\n{body}\n</body></html>",
        title = html_escape(title),
    ))
}

/// Escape text for inclusion in HTML content or attribute values.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Landing page.
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let login = html_escape(&state.config.saml.login_url);
    page(
        "SAML Service Provider",
        &format!(
            "<h1>SAML Service Provider</h1>\n<p><a href=\"{login}\">Log in</a> | <a href=\"/main\">Session</a></p>"
        ),
    )
}

/// Current principal and the SAML messages exchanged for this session.
pub async fn main_page(
    State(state): State<AppState>,
    cookies: Cookies,
) -> Result<Html<String>, AuthError> {
    let session = match cookies::session_id(&cookies, &state.config.session) {
        Some(id) => state.sessions.get_session(id).await?,
        None => None,
    };
    let body = render_session(session.as_ref(), &state.config.saml.login_url);
    Ok(page("Session", &body))
}

fn render_session(session: Option<&SessionState>, login_url: &str) -> String {
    let mut body = String::from("<h1>Session</h1>\n");
    match session.and_then(|s| s.principal.as_ref()) {
        Some(principal) => {
            body.push_str(&format!(
                "<p>Signed in as <strong>{}</strong></p>\n<dl><dt>Username</dt><dd>{}</dd><dt>Email</dt><dd>{}</dd><dt>Name</dt><dd>{}</dd></dl>\n",
                html_escape(principal.display_name()),
                html_escape(&principal.username),
                html_escape(&principal.email),
                html_escape(&principal.personname),
            ));
            body.push_str(
                "<form method=\"post\" action=\"/logout\"><button type=\"submit\">Log out</button></form>\n",
            );
        }
        None => body.push_str(&format!(
            "<p>Not signed in. <a href=\"{}\">Log in</a></p>\n",
            html_escape(login_url)
        )),
    }

    let messages = [
        (
            "AuthnRequest",
            session.and_then(|s| s.sp_saml_string.as_deref()),
        ),
        (
            "Assertion",
            session.and_then(|s| s.idp_saml_string.as_deref()),
        ),
    ];
    for (label, xml) in messages {
        if let Some(xml) = xml {
            body.push_str(&format!(
                "<h2>{label}</h2>\n<pre>{}</pre>\n",
                html_escape(xml)
            ));
        }
    }
    body
}

/// `/proxy` and `/out` land on the session page.
pub async fn to_main() -> Redirect {
    Redirect::to("/main")
}

pub async fn error_page() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        page(
            "Authentication failed",
            "<h1>Authentication failed</h1>\n<p><a href=\"/\">Home</a></p>",
        ),
    )
        .into_response()
}

pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        page("Not found", "<h1>Not found</h1>"),
    )
        .into_response()
}
