//! Test IdP: key material and signed Response fixtures.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    ec::{EcGroup, EcKey},
    ecdsa::EcdsaSig,
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    rsa::Rsa,
    sign::Signer,
    x509::{X509, X509Builder, X509NameBuilder},
};

use super::{
    c14n::{self, C14nOptions},
    types::{SAML_NS, SAMLP_NS, STATUS_SUCCESS, XMLDSIG_NS, XS_NS, XSI_NS, format_instant},
    xml::{XmlElement, XmlNode, XmlParserPool},
};

pub const IDP_ENTITY_ID: &str = "https://idp.example.com";

/// A Response signed outside this crate over fixed canonical text, then
/// serialized with CRLF line endings, non-canonical attribute order and
/// namespace placement, and a literal tab in an attribute value.
pub const EXTERNAL_SIGNED_RESPONSE: &str = include_str!("testdata/idp-signed-response.xml");
/// Certificate of the key that signed [`EXTERNAL_SIGNED_RESPONSE`].
pub const EXTERNAL_IDP_CERTIFICATE: &str = include_str!("testdata/idp-certificate.pem");

pub struct TestIdp {
    pub key: PKey<Private>,
    pub certificate: X509,
    ec: bool,
}

impl TestIdp {
    pub fn rsa() -> Self {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        Self::with_key(key, false)
    }

    pub fn ec() -> Self {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        Self::with_key(key, true)
    }

    fn with_key(key: PKey<Private>, ec: bool) -> Self {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "test-idp.example.com").unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial_number = BigNum::from_u32(1).unwrap();
        builder
            .set_serial_number(&serial_number.to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        Self {
            key,
            certificate: builder.build(),
            ec,
        }
    }

    /// Certificate as bare base64 DER, the way `KeyInfo` carries it.
    pub fn certificate_base64(&self) -> String {
        STANDARD.encode(self.certificate.to_der().unwrap())
    }

    pub fn certificate_pem(&self) -> String {
        String::from_utf8(self.certificate.to_pem().unwrap()).unwrap()
    }

    fn signature_algorithm(&self) -> &'static str {
        if self.ec {
            "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256"
        } else {
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"
        }
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.key).unwrap();
        signer.update(data).unwrap();
        let signature = signer.sign_to_vec().unwrap();
        if !self.ec {
            return signature;
        }
        let signature = EcdsaSig::from_der(&signature).unwrap();
        let mut raw = signature.r().to_vec_padded(32).unwrap();
        raw.extend(signature.s().to_vec_padded(32).unwrap());
        raw
    }
}

/// A `samlp:Response` with one assertion, as an IdP would send it.
pub struct ResponseFixture {
    pub assertion_id: String,
    pub authn_instant: DateTime<Utc>,
    pub name_id: String,
    pub attributes: Vec<(String, String)>,
    /// Markup placed after the first assertion's statements.
    pub extra_statements: String,
    /// Markup placed after the first assertion.
    pub extra_assertions: String,
}

impl ResponseFixture {
    pub fn new(assertion_id: &str) -> Self {
        Self {
            assertion_id: assertion_id.to_string(),
            authn_instant: Utc::now(),
            name_id: "alice".to_string(),
            attributes: [
                ("idpuserid", "alice"),
                ("idpuseremail", "a@x.com"),
                ("idpusernm", "Alice A"),
                ("foo", "bar"),
            ]
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
            extra_statements: String::new(),
            extra_assertions: String::new(),
        }
    }

    pub fn extra_statements(mut self, markup: &str) -> Self {
        self.extra_statements = markup.to_string();
        self
    }

    pub fn extra_assertions(mut self, markup: &str) -> Self {
        self.extra_assertions = markup.to_string();
        self
    }

    pub fn authn_instant(mut self, instant: DateTime<Utc>) -> Self {
        self.authn_instant = instant;
        self
    }

    pub fn to_xml(&self) -> String {
        let now = format_instant(Utc::now());
        let attributes: String = self
            .attributes
            .iter()
            .map(|(name, value)| {
                format!(
                    r#"<saml:Attribute Name="{name}"><saml:AttributeValue xsi:type="xs:string">{value}</saml:AttributeValue></saml:Attribute>"#
                )
            })
            .collect();
        format!(
            r#"<samlp:Response xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}" ID="_response" InResponseTo="_request" Version="2.0" IssueInstant="{now}" Destination="https://sp.example.com/saml/SSO">
  <saml:Issuer>{IDP_ENTITY_ID}</saml:Issuer>
  <samlp:Status><samlp:StatusCode Value="{STATUS_SUCCESS}"/></samlp:Status>
  <saml:Assertion ID="{id}" Version="2.0" IssueInstant="{now}">
    <saml:Issuer>{IDP_ENTITY_ID}</saml:Issuer>
    <saml:Subject><saml:NameID>{name_id}</saml:NameID></saml:Subject>
    <saml:AuthnStatement AuthnInstant="{authn}" SessionIndex="{id}"/>
    <saml:AttributeStatement xmlns:xs="{XS_NS}" xmlns:xsi="{XSI_NS}">{attributes}</saml:AttributeStatement>{extra_statements}
  </saml:Assertion>{extra_assertions}
</samlp:Response>"#,
            extra_statements = self.extra_statements,
            extra_assertions = self.extra_assertions,
            id = self.assertion_id,
            name_id = self.name_id,
            authn = format_instant(self.authn_instant),
        )
    }

    /// Response signed at the Response level.
    pub fn signed_by(&self, idp: &TestIdp) -> String {
        sign_element(idp, &self.to_xml(), "_response")
    }

    /// Response whose assertion, not the Response itself, is signed.
    pub fn assertion_signed_by(&self, idp: &TestIdp) -> String {
        sign_element(idp, &self.to_xml(), &self.assertion_id)
    }
}

/// Insert an enveloped signature after the Issuer of the element with `id`
/// and sign it.
pub fn sign_element(idp: &TestIdp, xml: &str, id: &str) -> String {
    let start = xml.find(&format!(r#"ID="{id}""#)).unwrap();
    let marker = "</saml:Issuer>";
    let at = start + xml[start..].find(marker).unwrap() + marker.len();
    let template = format!(
        concat!(
            r#"<ds:Signature xmlns:ds="{ds}"><ds:SignedInfo>"#,
            r#"<ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/>"#,
            r#"<ds:SignatureMethod Algorithm="{alg}"/>"#,
            r##"<ds:Reference URI="#{id}"><ds:Transforms>"##,
            r#"<ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#enveloped-signature"/>"#,
            r#"<ds:Transform Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/>"#,
            r#"</ds:Transforms><ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/>"#,
            r#"<ds:DigestValue></ds:DigestValue></ds:Reference></ds:SignedInfo>"#,
            r#"<ds:SignatureValue></ds:SignatureValue>"#,
            r#"<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>"#,
            r#"</ds:Signature>"#
        ),
        ds = XMLDSIG_NS,
        alg = idp.signature_algorithm(),
        id = id,
        cert = idp.certificate_base64(),
    );
    let xml = format!("{}{}{}", &xml[..at], template, &xml[at..]);

    let mut root = XmlParserPool::default().parse(&xml).unwrap();
    let target = find_by_id_mut(&mut root, id).unwrap();

    let digest = {
        let signature = target.first_child(XMLDSIG_NS, "Signature").unwrap();
        let content = c14n::canonicalize(
            target,
            &C14nOptions {
                exclude: Some(signature),
                inclusive_prefixes: &[],
            },
        );
        STANDARD.encode(openssl::hash::hash(MessageDigest::sha256(), content.as_bytes()).unwrap())
    };
    set_text(
        ds_path_mut(target, &["Signature", "SignedInfo", "Reference", "DigestValue"]),
        digest,
    );

    let signed_info = c14n::canonicalize(
        ds_path_mut(target, &["Signature", "SignedInfo"]),
        &C14nOptions::default(),
    );
    let signature = STANDARD.encode(idp.sign(signed_info.as_bytes()));
    set_text(ds_path_mut(target, &["Signature", "SignatureValue"]), signature);

    root.to_canonical_xml()
}

fn find_by_id_mut<'a>(element: &'a mut XmlElement, id: &str) -> Option<&'a mut XmlElement> {
    if element.attribute("ID") == Some(id) {
        return Some(element);
    }
    for child in element.children.iter_mut() {
        if let XmlNode::Element(child) = child
            && let Some(found) = find_by_id_mut(child, id)
        {
            return Some(found);
        }
    }
    None
}

fn ds_path_mut<'a>(mut element: &'a mut XmlElement, path: &[&str]) -> &'a mut XmlElement {
    for name in path {
        element = element
            .children
            .iter_mut()
            .find_map(|node| match node {
                XmlNode::Element(child) if child.is(XMLDSIG_NS, name) => Some(child),
                _ => None,
            })
            .unwrap();
    }
    element
}

fn set_text(element: &mut XmlElement, text: String) {
    element.children = vec![XmlNode::Text(text)];
}
