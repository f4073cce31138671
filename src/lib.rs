//! SAML 2.0 Service Provider.
//!
//! SP-initiated single sign-on and single logout over the HTTP-Redirect
//! binding, with IdP responses accepted at the assertion consumer service
//! over either the Redirect or the POST binding.
//!
//! [`saml`] holds the protocol core and is usable without the web layer.
//! [`build_app`] wires it into an axum router backed by a [`SessionStore`].

pub mod auth;
pub mod config;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod saml;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{
    auth::{LogoutHandler, MemorySessionStore, SessionStore, SsoEntryPoint},
    config::SpConfig,
    saml::{AssertionConsumer, SamlResult, SignatureVerifier, XmlParserPool},
};

/// Shared application state.
///
/// Everything here is immutable after startup except the session store,
/// which synchronizes internally.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SpConfig>,
    pub sessions: Arc<dyn SessionStore>,
    pub entry_point: SsoEntryPoint,
    pub consumer: AssertionConsumer,
    pub logout: LogoutHandler,
}

impl AppState {
    /// State backed by an in-memory session store.
    pub fn new(config: SpConfig) -> SamlResult<Self> {
        Self::with_session_store(config, Arc::new(MemorySessionStore::new()))
    }

    pub fn with_session_store(
        config: SpConfig,
        sessions: Arc<dyn SessionStore>,
    ) -> SamlResult<Self> {
        let saml = Arc::new(config.saml.clone());
        let verifier = SignatureVerifier::new(saml.key_source()?);
        let consumer = AssertionConsumer::new(
            verifier,
            Arc::new(XmlParserPool::default()),
            saml.assertion_validity(),
        );
        tracing::debug!(
            entity_id = %saml.entity_id,
            trust = ?saml.trust,
            idp_sso_url = %saml.idp_sso_url,
            "SAML service provider configured"
        );

        Ok(Self {
            entry_point: SsoEntryPoint::new(saml.clone()),
            logout: LogoutHandler::new(saml),
            consumer,
            sessions,
            config: Arc::new(config),
        })
    }
}

/// Build the HTTP router.
pub fn build_app(state: AppState) -> Router {
    let config = state.config.clone();
    let acs_path = config.saml.acs_path.trim_end_matches('/');

    Router::new()
        .route("/", get(routes::pages::index))
        .route("/main", get(routes::pages::main_page))
        .route("/proxy", get(routes::pages::to_main))
        .route("/out", get(routes::pages::to_main))
        .route("/error", get(routes::pages::error_page))
        .route(
            acs_path,
            get(routes::saml::acs_get).post(routes::saml::acs_post),
        )
        .route(
            &format!("{acs_path}/{{*rest}}"),
            get(routes::saml::acs_get).post(routes::saml::acs_post),
        )
        .route("/logout", post(routes::saml::logout))
        .fallback(routes::pages::not_found)
        // Layers run bottom-up: the login gate needs the cookie layer outside it
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_login,
        ))
        .layer(tower_cookies::CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .with_state(state)
}
