//! SP-initiated single sign-on.

use std::sync::Arc;

use url::Url;

use super::session_store::SessionState;
use crate::{
    config::SamlConfig,
    saml::{
        ProtocolMessage, SamlResult, build_authn_request, encode_redirect,
        types::HTTP_REDIRECT_BINDING,
    },
};

/// Starts authentication by redirecting the browser to the IdP.
///
/// Each call issues a new AuthnRequest with a fresh ID. Outstanding request
/// IDs are not tracked.
#[derive(Debug, Clone)]
pub struct SsoEntryPoint {
    config: Arc<SamlConfig>,
}

impl SsoEntryPoint {
    pub fn new(config: Arc<SamlConfig>) -> Self {
        Self { config }
    }

    /// Build an AuthnRequest answering at `acs_url`, record it in `session`
    /// and return the IdP redirect target.
    pub fn commence(&self, acs_url: &str, session: &mut SessionState) -> SamlResult<Url> {
        let request = build_authn_request(
            acs_url,
            HTTP_REDIRECT_BINDING,
            &self.config.entity_id,
            &self.config.idp_sso_url,
        );
        let message = ProtocolMessage::from(request);
        let xml = message.to_xml();
        tracing::debug!(request_id = message.id(), %xml, "Issuing AuthnRequest");

        let url = encode_redirect(&message, &self.config.idp_sso_url)?;
        session.sp_saml_string = Some(xml);
        Ok(url)
    }

    /// Whether `path` is a login trigger.
    pub fn is_login_url(&self, path: &str) -> bool {
        path.contains(self.config.login_url.as_str())
    }
}
