//! Session cookie handling.
//!
//! The cookie value is the session UUID and nothing else.

use tower_cookies::{
    Cookie, Cookies,
    cookie::{SameSite as CookieSameSite, time::Duration as CookieDuration},
};
use uuid::Uuid;

use crate::config::{SameSite, SessionConfig};

fn same_site(config: &SessionConfig) -> CookieSameSite {
    match config.same_site {
        SameSite::Strict => CookieSameSite::Strict,
        SameSite::Lax => CookieSameSite::Lax,
        SameSite::None => CookieSameSite::None,
    }
}

/// HTTP-only cookie binding the browser to `session_id`.
pub fn session_cookie(config: &SessionConfig, session_id: Uuid) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), session_id.to_string()))
        .path("/")
        .http_only(true)
        .secure(config.secure)
        .same_site(same_site(config))
        .max_age(CookieDuration::seconds(config.duration_secs as i64))
        .build()
}

/// Removal cookie with the same attributes as [`session_cookie`].
pub fn removal_cookie(config: &SessionConfig) -> Cookie<'static> {
    Cookie::build(config.cookie_name.clone())
        .path("/")
        .http_only(true)
        .secure(config.secure)
        .same_site(same_site(config))
        .max_age(CookieDuration::ZERO)
        .build()
}

/// Session ID carried by the request, if present and well formed.
pub fn session_id(cookies: &Cookies, config: &SessionConfig) -> Option<Uuid> {
    cookies
        .get(&config.cookie_name)
        .and_then(|cookie| cookie.value().parse::<Uuid>().ok())
}
