/// Result type for SAML protocol operations.
pub type SamlResult<T> = Result<T, SamlError>;

/// Errors raised by the SAML protocol core.
///
/// The first four variants are the failure modes of the protocol exchange
/// itself. `Xml` and `MissingElement` cover inbound documents that cannot be
/// interpreted at all; the web layer treats them as authentication failures.
#[derive(Debug, thiserror::Error)]
pub enum SamlError {
    /// An outbound message could not be compressed, encoded or addressed.
    #[error("Failed to encode SAML message: {0}")]
    Encoding(String),

    /// The certificate used to verify a signature could not be parsed.
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// A signature is missing or does not verify.
    #[error("Signature validation failed: {0}")]
    SignatureValidation(String),

    /// The assertion's authentication instant is outside the validity window.
    #[error("Credentials expired: {0}")]
    CredentialsExpired(String),

    #[error("Malformed XML: {0}")]
    Xml(String),

    #[error("Missing required SAML element: {0}")]
    MissingElement(&'static str),
}

impl From<quick_xml::Error> for SamlError {
    fn from(e: quick_xml::Error) -> Self {
        SamlError::Xml(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for SamlError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        SamlError::Xml(e.to_string())
    }
}
