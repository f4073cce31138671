//! Certificate handling and XML-DSig verification of enveloped signatures.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use openssl::{
    bn::BigNum,
    ecdsa::EcdsaSig,
    hash::MessageDigest,
    pkey::{Id, PKey, Public},
    sign::Verifier,
    x509::X509,
};

use super::{
    c14n::{self, C14nOptions, EXC_C14N},
    error::{SamlError, SamlResult},
    types::XMLDSIG_NS,
    xml::XmlElement,
};

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";
const PEM_LINE_LEN: usize = 64;

const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const INCLUSIVE_NAMESPACES: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// Wrap a bare base64 certificate into PEM framing with 64-character lines.
pub fn wrap_certificate_pem(base64: &str) -> String {
    let compact: String = base64.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let mut pem = String::with_capacity(compact.len() + compact.len() / PEM_LINE_LEN + 64);
    pem.push_str(PEM_BEGIN);
    pem.push('\n');
    // Base64 is ASCII, so byte chunks are character chunks.
    for line in compact.as_bytes().chunks(PEM_LINE_LEN) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(PEM_END);
    pem.push('\n');
    pem
}

/// Parse a certificate given either as PEM or as bare base64 DER.
pub fn parse_certificate(data: &str) -> SamlResult<X509> {
    let pem = if data.contains(PEM_BEGIN) {
        data.to_string()
    } else {
        wrap_certificate_pem(data)
    };
    X509::from_pem(pem.as_bytes())
        .map_err(|e| SamlError::InvalidCredential(format!("failed to parse certificate: {e}")))
}

fn public_key(certificate: &X509) -> SamlResult<PKey<Public>> {
    certificate
        .public_key()
        .map_err(|e| SamlError::InvalidCredential(format!("failed to read public key: {e}")))
}

/// Supplies the key a signature is checked against.
pub trait VerificationKeySource: Send + Sync {
    /// Key for `signature`, the `ds:Signature` element under validation.
    fn verification_key(&self, signature: &XmlElement) -> SamlResult<PKey<Public>>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Trusts only a certificate configured out of band.
pub struct PinnedCertificate {
    key: PKey<Public>,
}

impl PinnedCertificate {
    pub fn new(certificate: &str) -> SamlResult<Self> {
        let certificate = parse_certificate(certificate)?;
        Ok(Self {
            key: public_key(&certificate)?,
        })
    }
}

impl VerificationKeySource for PinnedCertificate {
    fn verification_key(&self, _signature: &XmlElement) -> SamlResult<PKey<Public>> {
        Ok(self.key.clone())
    }

    fn name(&self) -> &'static str {
        "pinned"
    }
}

/// Trusts the first certificate embedded in the signature's `KeyInfo`.
///
/// Anyone can sign a message with their own key and embed the matching
/// certificate, so this proves integrity only, not origin.
pub struct EmbeddedCertificate;

impl VerificationKeySource for EmbeddedCertificate {
    fn verification_key(&self, signature: &XmlElement) -> SamlResult<PKey<Public>> {
        let blob = signature
            .first_child(XMLDSIG_NS, "KeyInfo")
            .and_then(|info| info.first_child(XMLDSIG_NS, "X509Data"))
            .and_then(|data| data.first_child(XMLDSIG_NS, "X509Certificate"))
            .map(XmlElement::text)
            .ok_or_else(|| {
                SamlError::InvalidCredential("signature carries no X509Certificate".to_string())
            })?;
        public_key(&parse_certificate(&wrap_certificate_pem(&blob))?)
    }

    fn name(&self) -> &'static str {
        "embedded"
    }
}

fn digest_for(algorithm: &str) -> SamlResult<MessageDigest> {
    match algorithm {
        "http://www.w3.org/2000/09/xmldsig#sha1" => Ok(MessageDigest::sha1()),
        "http://www.w3.org/2001/04/xmlenc#sha256" => Ok(MessageDigest::sha256()),
        "http://www.w3.org/2001/04/xmldsig-more#sha384" => Ok(MessageDigest::sha384()),
        "http://www.w3.org/2001/04/xmlenc#sha512" => Ok(MessageDigest::sha512()),
        other => Err(SamlError::SignatureValidation(format!(
            "unsupported digest algorithm '{other}'"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyType {
    Rsa,
    Ec,
}

fn signature_method(algorithm: &str) -> SamlResult<(MessageDigest, KeyType)> {
    match algorithm {
        "http://www.w3.org/2000/09/xmldsig#rsa-sha1" => Ok((MessageDigest::sha1(), KeyType::Rsa)),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256" => {
            Ok((MessageDigest::sha256(), KeyType::Rsa))
        }
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384" => {
            Ok((MessageDigest::sha384(), KeyType::Rsa))
        }
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => {
            Ok((MessageDigest::sha512(), KeyType::Rsa))
        }
        "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256" => {
            Ok((MessageDigest::sha256(), KeyType::Ec))
        }
        "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384" => {
            Ok((MessageDigest::sha384(), KeyType::Ec))
        }
        "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha512" => {
            Ok((MessageDigest::sha512(), KeyType::Ec))
        }
        other => Err(SamlError::SignatureValidation(format!(
            "unsupported signature algorithm '{other}'"
        ))),
    }
}

fn ds_child<'a>(element: &'a XmlElement, local_name: &'static str) -> SamlResult<&'a XmlElement> {
    element.first_child(XMLDSIG_NS, local_name).ok_or_else(|| {
        SamlError::SignatureValidation(format!("signature has no {local_name} element"))
    })
}

fn algorithm(element: &XmlElement) -> SamlResult<&str> {
    element.attribute("Algorithm").ok_or_else(|| {
        SamlError::SignatureValidation(format!("{} has no Algorithm", element.local_name))
    })
}

/// PrefixList of an `InclusiveNamespaces` child, if any.
fn inclusive_prefixes(element: &XmlElement) -> Vec<String> {
    element
        .first_child(INCLUSIVE_NAMESPACES, "InclusiveNamespaces")
        .and_then(|list| list.attribute("PrefixList"))
        .map(|list| list.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn decode_base64(value: &str, what: &str) -> SamlResult<Vec<u8>> {
    let compact: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| SamlError::SignatureValidation(format!("invalid {what} encoding: {e}")))
}

/// XML-DSig carries ECDSA signatures as raw `r || s`; OpenSSL wants DER.
fn ecdsa_raw_to_der(raw: &[u8]) -> SamlResult<Vec<u8>> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(SamlError::SignatureValidation(
            "malformed ECDSA signature value".to_string(),
        ));
    }
    let (r, s) = raw.split_at(raw.len() / 2);
    let to_bn = |bytes: &[u8]| {
        BigNum::from_slice(bytes).map_err(|e| SamlError::SignatureValidation(e.to_string()))
    };
    EcdsaSig::from_private_components(to_bn(r)?, to_bn(s)?)
        .and_then(|sig| sig.to_der())
        .map_err(|e| SamlError::SignatureValidation(e.to_string()))
}

/// Verifies the enveloped signature of a SAML element.
#[derive(Clone)]
pub struct SignatureVerifier {
    key_source: Arc<dyn VerificationKeySource>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("key_source", &self.key_source.name())
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(key_source: Arc<dyn VerificationKeySource>) -> Self {
        Self { key_source }
    }

    /// Whether `element` carries a direct `ds:Signature` child.
    pub fn is_signed(element: &XmlElement) -> bool {
        element.first_child(XMLDSIG_NS, "Signature").is_some()
    }

    /// Verify the `ds:Signature` directly under `signed`.
    ///
    /// The single reference must point at `signed` itself, so a signature
    /// over some other part of the document is never accepted for it.
    pub fn verify(&self, signed: &XmlElement) -> SamlResult<()> {
        let signature = signed
            .first_child(XMLDSIG_NS, "Signature")
            .ok_or_else(|| SamlError::SignatureValidation("message is not signed".to_string()))?;
        let signed_info = ds_child(signature, "SignedInfo")?;

        let c14n_method = ds_child(signed_info, "CanonicalizationMethod")?;
        if algorithm(c14n_method)? != EXC_C14N {
            return Err(SamlError::SignatureValidation(format!(
                "unsupported canonicalization '{}'",
                algorithm(c14n_method)?
            )));
        }
        let (message_digest, key_type) =
            signature_method(algorithm(ds_child(signed_info, "SignatureMethod")?)?)?;

        let mut references = signed_info.children_named(XMLDSIG_NS, "Reference");
        let reference = references
            .next()
            .ok_or_else(|| SamlError::SignatureValidation("signature has no Reference".to_string()))?;
        if references.next().is_some() {
            return Err(SamlError::SignatureValidation(
                "signature has more than one Reference".to_string(),
            ));
        }

        let id = signed
            .attribute("ID")
            .ok_or(SamlError::MissingElement("ID"))?;
        if reference.attribute("URI") != Some(format!("#{id}").as_str()) {
            return Err(SamlError::SignatureValidation(format!(
                "signature reference does not cover element '{id}'"
            )));
        }

        let mut enveloped = false;
        let mut reference_prefixes = Vec::new();
        if let Some(transforms) = reference.first_child(XMLDSIG_NS, "Transforms") {
            for transform in transforms.children_named(XMLDSIG_NS, "Transform") {
                match algorithm(transform)? {
                    ENVELOPED_SIGNATURE => enveloped = true,
                    EXC_C14N => reference_prefixes = inclusive_prefixes(transform),
                    other => {
                        return Err(SamlError::SignatureValidation(format!(
                            "unsupported transform '{other}'"
                        )));
                    }
                }
            }
        }

        let digest = digest_for(algorithm(ds_child(reference, "DigestMethod")?)?)?;
        let expected = decode_base64(&ds_child(reference, "DigestValue")?.text(), "digest")?;
        let content = c14n::canonicalize(
            signed,
            &C14nOptions {
                exclude: enveloped.then_some(signature),
                inclusive_prefixes: &reference_prefixes,
            },
        );
        let computed = openssl::hash::hash(digest, content.as_bytes())
            .map_err(|e| SamlError::SignatureValidation(format!("digest failed: {e}")))?;
        if *computed != *expected {
            return Err(SamlError::SignatureValidation(format!(
                "digest mismatch for element '{id}'"
            )));
        }

        let key = self.key_source.verification_key(signature)?;
        let key_matches = match key_type {
            KeyType::Rsa => key.id() == Id::RSA,
            KeyType::Ec => key.id() == Id::EC,
        };
        if !key_matches {
            return Err(SamlError::SignatureValidation(
                "signature algorithm does not match the verification key".to_string(),
            ));
        }

        let signed_info_prefixes = inclusive_prefixes(c14n_method);
        let canonical_signed_info = c14n::canonicalize(
            signed_info,
            &C14nOptions {
                exclude: None,
                inclusive_prefixes: &signed_info_prefixes,
            },
        );
        let mut signature_value =
            decode_base64(&ds_child(signature, "SignatureValue")?.text(), "signature")?;
        if key_type == KeyType::Ec {
            signature_value = ecdsa_raw_to_der(&signature_value)?;
        }

        let mut verifier = Verifier::new(message_digest, &key)
            .map_err(|e| SamlError::SignatureValidation(format!("verifier creation failed: {e}")))?;
        verifier
            .update(canonical_signed_info.as_bytes())
            .map_err(|e| SamlError::SignatureValidation(format!("signature update failed: {e}")))?;
        // OpenSSL reports some malformed signatures as errors rather than `false`.
        let valid = verifier.verify(&signature_value).unwrap_or(false);
        if !valid {
            return Err(SamlError::SignatureValidation(format!(
                "signature over element '{id}' does not verify"
            )));
        }

        tracing::debug!(element_id = id, key_source = self.key_source.name(), "Signature verified");
        Ok(())
    }
}
