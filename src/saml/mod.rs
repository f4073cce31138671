//! SAML 2.0 Service Provider protocol core.
//!
//! Request construction, HTTP-Redirect encoding, Response validation and the
//! attribute-to-principal mapping. Nothing in here touches HTTP; the web
//! layer in [`crate::routes`] drives these pieces.

pub mod builder;
pub mod c14n;
pub mod consumer;
pub mod error;
pub mod principal;
pub mod redirect;
pub mod signature;
pub mod types;
pub mod xml;

#[cfg(test)]
pub(crate) mod test_support;

pub use builder::{build_authn_request, build_logout_request, generate_id};
pub use consumer::AssertionConsumer;
pub use error::{SamlError, SamlResult};
pub use principal::UserPrincipal;
pub use redirect::{decode_message, encode_redirect};
pub use signature::{
    EmbeddedCertificate, PinnedCertificate, SignatureVerifier, VerificationKeySource,
};
pub use types::{AuthnRequest, LogoutRequest, NameId, ProtocolMessage};
pub use xml::XmlParserPool;
