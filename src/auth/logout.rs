//! SP-initiated single logout.

use std::sync::Arc;

use url::Url;
use uuid::Uuid;

use super::session_store::SessionStore;
use crate::{
    config::SamlConfig,
    saml::{NameId, ProtocolMessage, build_logout_request, encode_redirect},
};

/// Ends the local session and builds the IdP single-logout redirect.
#[derive(Debug, Clone)]
pub struct LogoutHandler {
    config: Arc<SamlConfig>,
}

impl LogoutHandler {
    pub fn new(config: Arc<SamlConfig>) -> Self {
        Self { config }
    }

    /// Log out `session_id`.
    ///
    /// The local session is deleted whether or not the IdP redirect could be
    /// built. Returns the IdP SLO redirect target, or `None` when encoding
    /// failed.
    pub async fn logout(
        &self,
        sessions: &dyn SessionStore,
        session_id: Option<Uuid>,
    ) -> Option<Url> {
        let session = match session_id {
            Some(id) => sessions.get_session(id).await.unwrap_or_else(|e| {
                tracing::error!(session_id = %id, error = %e, "Failed to load session for logout");
                None
            }),
            None => None,
        };

        let name_id = session
            .as_ref()
            .and_then(|s| s.name_id.clone())
            .map(|value| NameId { value, format: None });
        let session_index = session.as_ref().and_then(|s| s.idp_token.as_deref());
        let request = build_logout_request(
            &self.config.entity_id,
            &self.config.idp_slo_url,
            name_id,
            session_index,
        );
        let message = ProtocolMessage::from(request);

        let redirect = match encode_redirect(&message, &self.config.idp_slo_url) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::error!(
                    request_id = message.id(),
                    error = %e,
                    "Failed to encode LogoutRequest; logging out locally only"
                );
                None
            }
        };

        if let Some(id) = session_id
            && let Err(e) = sessions.delete_session(id).await
        {
            tracing::error!(session_id = %id, error = %e, "Failed to delete session on logout");
        }
        tracing::info!(
            session_id = session_id.map(|id| id.to_string()).unwrap_or_default(),
            idp_notified = redirect.is_some(),
            "Logged out"
        );
        redirect
    }
}
