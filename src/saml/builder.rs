//! Construction of outbound protocol messages.

use chrono::{SubsecRound, Utc};
use uuid::Uuid;

use super::types::{AuthnRequest, Issuer, LogoutRequest, NameId, SAML_VERSION};

/// Generate a message identifier: `_` followed by 32 hex characters from a
/// random UUID. The leading underscore keeps it a valid NCName.
pub fn generate_id() -> String {
    format!("_{}", Uuid::new_v4().simple())
}

/// Build a passive AuthnRequest asking the IdP to answer at `acs_url`.
pub fn build_authn_request(
    acs_url: &str,
    protocol_binding: &str,
    issuer: &str,
    destination: &str,
) -> AuthnRequest {
    AuthnRequest {
        id: generate_id(),
        issue_instant: Utc::now().trunc_subsecs(3),
        version: SAML_VERSION.to_string(),
        issuer: Issuer::entity(issuer),
        destination: destination.to_string(),
        assertion_consumer_service_url: acs_url.to_string(),
        protocol_binding: protocol_binding.to_string(),
        is_passive: true,
    }
}

/// Build a LogoutRequest for the IdP session identified by `session_index`.
///
/// Without a session index the request carries no `SessionIndex`, which
/// means logout was attempted without a prior successful login.
pub fn build_logout_request(
    issuer: &str,
    destination: &str,
    name_id: Option<NameId>,
    session_index: Option<&str>,
) -> LogoutRequest {
    if session_index.is_none() {
        tracing::warn!(
            destination,
            "Building LogoutRequest without a session index; no assertion was consumed for this session"
        );
    }
    LogoutRequest {
        id: generate_id(),
        issue_instant: Utc::now().trunc_subsecs(3),
        version: SAML_VERSION.to_string(),
        issuer: Issuer::entity(issuer),
        destination: destination.to_string(),
        name_id,
        session_indexes: session_index.map(str::to_string).into_iter().collect(),
    }
}
