//! HTTP-Redirect binding.
//!
//! Outbound messages are raw-DEFLATE compressed (no zlib header), base64
//! encoded and carried in the `SAMLRequest` query parameter of the IdP
//! endpoint URL.

use std::io::{Read, Write};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use flate2::{Compression, read::DeflateDecoder, write::DeflateEncoder};
use url::Url;

use super::{
    error::{SamlError, SamlResult},
    types::ProtocolMessage,
};

/// Query parameter carrying an outbound request.
pub const SAML_REQUEST_PARAM: &str = "SAMLRequest";

/// Form or query parameter carrying an inbound response.
pub const SAML_RESPONSE_PARAM: &str = "SAMLResponse";

/// Build the redirect target carrying `message` to `destination`.
pub fn encode_redirect(message: &ProtocolMessage, destination: &str) -> SamlResult<Url> {
    let xml = message.to_xml();
    tracing::debug!(message_id = message.id(), %xml, "Encoding SAML message for redirect");

    let encoded = deflate_and_encode(xml.as_bytes())?;
    let mut url = Url::parse(destination)
        .map_err(|e| SamlError::Encoding(format!("invalid destination '{destination}': {e}")))?;
    url.query_pairs_mut()
        .append_pair(SAML_REQUEST_PARAM, &encoded);
    Ok(url)
}

/// Raw-deflate then base64 encode.
pub fn deflate_and_encode(bytes: &[u8]) -> SamlResult<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| SamlError::Encoding(format!("deflate failed: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| SamlError::Encoding(format!("deflate failed: {e}")))?;
    Ok(STANDARD.encode(compressed))
}

/// Decode a binding parameter value back to XML text.
///
/// Whitespace inside the base64 payload is ignored. Decoded bytes that are
/// already XML text are used as-is; anything else must be a raw DEFLATE
/// stream. This covers both redirect-encoded and plain base64 responses.
pub fn decode_message(value: &str) -> SamlResult<String> {
    let compact: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| SamlError::Xml(format!("invalid base64 payload: {e}")))?;

    if let Ok(text) = std::str::from_utf8(&bytes)
        && text.trim_start().starts_with('<')
    {
        return Ok(text.to_string());
    }

    let mut inflated = String::new();
    DeflateDecoder::new(bytes.as_slice())
        .read_to_string(&mut inflated)
        .map_err(|e| SamlError::Xml(format!("payload is neither XML nor DEFLATE data: {e}")))?;
    Ok(inflated)
}
