use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use super::ConfigError;
use crate::saml::{
    EmbeddedCertificate, PinnedCertificate, SamlResult, VerificationKeySource,
    signature::parse_certificate,
};

/// Upper bound for `assertion_validity_secs` (one day).
const MAX_ASSERTION_VALIDITY_SECS: u64 = 24 * 60 * 60;

/// Paths served by fixed routes.
const RESERVED_PATHS: &[&str] = &["/", "/main", "/proxy", "/out", "/error", "/logout"];

/// Service Provider and IdP endpoint configuration.
///
/// ```toml
/// [saml]
/// entity_id = "https://sp.example.com"
/// idp_sso_url = "https://idp.example.com/sso"
/// idp_slo_url = "https://idp.example.com/slo"
/// idp_certificate = "${IDP_CERTIFICATE}"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamlConfig {
    /// SP entity ID, sent as the Issuer of every request.
    pub entity_id: String,

    /// Path of the assertion consumer service.
    #[serde(default = "default_acs_path")]
    pub acs_path: String,

    /// External base URL of this SP (e.g., "https://sp.example.com").
    /// When unset the ACS URL is derived from the request's Host header.
    #[serde(default)]
    pub base_url: Option<String>,

    /// IdP single sign-on endpoint (HTTP-Redirect binding).
    pub idp_sso_url: String,

    /// IdP single logout endpoint (HTTP-Redirect binding).
    pub idp_slo_url: String,

    /// Any request path containing this string starts a login.
    #[serde(default = "default_login_url")]
    pub login_url: String,

    /// IdP signing certificate, PEM or bare base64 DER.
    #[serde(default)]
    pub idp_certificate: Option<String>,

    /// Where the signature verification key comes from.
    #[serde(default)]
    pub trust: TrustPolicy,

    /// Maximum age of an assertion's AuthnInstant, in seconds.
    #[serde(default = "default_assertion_validity")]
    pub assertion_validity_secs: u64,

    /// Redirect target after a completed login.
    #[serde(default = "default_landing_page")]
    pub login_success_url: String,

    /// Redirect target after logout when the IdP cannot be notified.
    #[serde(default = "default_landing_page")]
    pub logout_success_url: String,
}

/// Source of the key used to verify IdP signatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustPolicy {
    /// Verify against `idp_certificate` only.
    #[default]
    Pinned,
    /// Verify against the certificate embedded in each message. Provides no
    /// proof of origin; for testing against throwaway IdPs only.
    Embedded,
}

impl SamlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entity_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "saml.entity_id cannot be empty".into(),
            ));
        }
        for (name, value) in [
            ("saml.idp_sso_url", &self.idp_sso_url),
            ("saml.idp_slo_url", &self.idp_slo_url),
        ] {
            Url::parse(value).map_err(|e| {
                ConfigError::Validation(format!("{name} is not an absolute URL: {e}"))
            })?;
        }
        if let Some(base_url) = &self.base_url {
            Url::parse(base_url).map_err(|e| {
                ConfigError::Validation(format!("saml.base_url is not an absolute URL: {e}"))
            })?;
        }
        for (name, value) in [
            ("saml.acs_path", &self.acs_path),
            ("saml.login_url", &self.login_url),
        ] {
            if !value.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "{name} must start with '/'"
                )));
            }
        }
        if self.acs_path == "/" {
            return Err(ConfigError::Validation(
                "saml.acs_path cannot be the root path".into(),
            ));
        }
        for (name, value) in [
            ("saml.acs_path", &self.acs_path),
            ("saml.login_url", &self.login_url),
        ] {
            if value.contains(['{', '}', '*']) {
                return Err(ConfigError::Validation(format!(
                    "{name} cannot contain route wildcards"
                )));
            }
            if RESERVED_PATHS.contains(&value.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "{name} collides with the built-in route '{value}'"
                )));
            }
        }
        // Any path containing the login URL starts a login, so it must not
        // swallow the ACS or a fixed route.
        let shadowed = RESERVED_PATHS
            .iter()
            .copied()
            .chain([self.acs_path.as_str()])
            .find(|path| path.contains(self.login_url.as_str()));
        if let Some(path) = shadowed {
            return Err(ConfigError::Validation(format!(
                "saml.login_url would capture requests to '{path}'"
            )));
        }
        if self.assertion_validity_secs == 0
            || self.assertion_validity_secs > MAX_ASSERTION_VALIDITY_SECS
        {
            return Err(ConfigError::Validation(format!(
                "saml.assertion_validity_secs must be between 1 and {MAX_ASSERTION_VALIDITY_SECS}"
            )));
        }

        match (self.trust, &self.idp_certificate) {
            (TrustPolicy::Pinned, None) => {
                return Err(ConfigError::Validation(
                    "saml.idp_certificate is required when saml.trust = \"pinned\"".into(),
                ));
            }
            (_, Some(certificate)) => {
                parse_certificate(certificate).map_err(|e| {
                    ConfigError::Validation(format!("saml.idp_certificate: {e}"))
                })?;
            }
            (TrustPolicy::Embedded, None) => {}
        }
        if self.trust == TrustPolicy::Embedded {
            tracing::warn!(
                "saml.trust = \"embedded\": signatures are checked against the certificate \
                 each message carries, so any party can forge a valid login. Use \"pinned\" \
                 with the IdP's certificate outside of testing."
            );
        }
        Ok(())
    }

    /// Absolute ACS URL. `origin` is `scheme://host[:port]` of the current
    /// request and is used only when `base_url` is unset.
    pub fn acs_url(&self, origin: &str) -> String {
        let base = self.base_url.as_deref().unwrap_or(origin);
        format!("{}{}", base.trim_end_matches('/'), self.acs_path)
    }

    /// Key source implementing the configured trust policy.
    pub fn key_source(&self) -> SamlResult<Arc<dyn VerificationKeySource>> {
        match (self.trust, &self.idp_certificate) {
            (TrustPolicy::Pinned, Some(certificate)) => {
                Ok(Arc::new(PinnedCertificate::new(certificate)?))
            }
            (TrustPolicy::Pinned, None) => Err(crate::saml::SamlError::InvalidCredential(
                "no IdP certificate configured".into(),
            )),
            (TrustPolicy::Embedded, _) => Ok(Arc::new(EmbeddedCertificate)),
        }
    }

    pub fn assertion_validity(&self) -> chrono::Duration {
        let secs = self.assertion_validity_secs.min(MAX_ASSERTION_VALIDITY_SECS);
        chrono::Duration::seconds(secs as i64)
    }
}

fn default_acs_path() -> String {
    "/saml/SSO".to_string()
}

fn default_login_url() -> String {
    "/login".to_string()
}

fn default_assertion_validity() -> u64 {
    crate::saml::consumer::DEFAULT_ASSERTION_VALIDITY_SECS
}

fn default_landing_page() -> String {
    "/main".to_string()
}
