//! SAML 2.0 protocol objects and their XML codec.

use chrono::{DateTime, Utc};

use super::{
    error::{SamlError, SamlResult},
    xml::{XmlElement, XmlParserPool},
};

/// SAML 2.0 protocol namespace URI.
pub const SAMLP_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";

/// SAML 2.0 assertion namespace URI.
pub const SAML_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";

/// XML Digital Signature namespace URI.
pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// XSI namespace URI.
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// XS namespace URI.
pub const XS_NS: &str = "http://www.w3.org/2001/XMLSchema";

/// HTTP-Redirect binding URI.
pub const HTTP_REDIRECT_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";

/// Entity identifier name ID format, used for Issuer elements.
pub const NAMEID_FORMAT_ENTITY: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:entity";

/// Status code of a successful response.
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

pub const SAML_VERSION: &str = "2.0";

/// Render a timestamp the way SAML `dateTime` values are written.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub fn parse_instant(value: &str) -> SamlResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|e| SamlError::Xml(format!("invalid dateTime '{value}': {e}")))
}

fn required_attribute<'a>(element: &'a XmlElement, name: &'static str) -> SamlResult<&'a str> {
    element.attribute(name).ok_or(SamlError::MissingElement(name))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuer {
    pub value: String,
    pub format: Option<String>,
}

impl Issuer {
    /// Issuer with the entity name ID format.
    pub fn entity(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            format: Some(NAMEID_FORMAT_ENTITY.to_string()),
        }
    }

    fn to_element(&self) -> XmlElement {
        let mut element = XmlElement::new("saml", "Issuer", SAML_NS);
        if let Some(format) = &self.format {
            element = element.with_attribute("Format", format.clone());
        }
        element.with_text(self.value.clone())
    }

    fn from_element(element: &XmlElement) -> Self {
        Self {
            value: element.text().trim().to_string(),
            format: element.attribute("Format").map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameId {
    pub value: String,
    pub format: Option<String>,
}

impl NameId {
    fn to_element(&self) -> XmlElement {
        let mut element = XmlElement::new("saml", "NameID", SAML_NS);
        if let Some(format) = &self.format {
            element = element.with_attribute("Format", format.clone());
        }
        element.with_text(self.value.clone())
    }

    fn from_element(element: &XmlElement) -> Self {
        Self {
            value: element.text().trim().to_string(),
            format: element.attribute("Format").map(str::to_string),
        }
    }
}

/// Authentication request sent by the SP to the IdP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnRequest {
    pub id: String,
    pub issue_instant: DateTime<Utc>,
    pub version: String,
    pub issuer: Issuer,
    pub destination: String,
    pub assertion_consumer_service_url: String,
    pub protocol_binding: String,
    pub is_passive: bool,
}

impl AuthnRequest {
    fn to_element(&self) -> XmlElement {
        XmlElement::new("samlp", "AuthnRequest", SAMLP_NS)
            .with_attribute(
                "AssertionConsumerServiceURL",
                self.assertion_consumer_service_url.clone(),
            )
            .with_attribute("Destination", self.destination.clone())
            .with_attribute("ID", self.id.clone())
            .with_attribute("IsPassive", self.is_passive.to_string())
            .with_attribute("IssueInstant", format_instant(self.issue_instant))
            .with_attribute("ProtocolBinding", self.protocol_binding.clone())
            .with_attribute("Version", self.version.clone())
            .with_child(self.issuer.to_element())
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        let issuer = element
            .first_child(SAML_NS, "Issuer")
            .ok_or(SamlError::MissingElement("Issuer"))?;
        Ok(Self {
            id: required_attribute(element, "ID")?.to_string(),
            issue_instant: parse_instant(required_attribute(element, "IssueInstant")?)?,
            version: required_attribute(element, "Version")?.to_string(),
            issuer: Issuer::from_element(issuer),
            destination: element.attribute("Destination").unwrap_or_default().to_string(),
            assertion_consumer_service_url: element
                .attribute("AssertionConsumerServiceURL")
                .unwrap_or_default()
                .to_string(),
            protocol_binding: element
                .attribute("ProtocolBinding")
                .unwrap_or_default()
                .to_string(),
            is_passive: matches!(element.attribute("IsPassive"), Some("true" | "1")),
        })
    }
}

/// Single-logout request sent by the SP to the IdP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutRequest {
    pub id: String,
    pub issue_instant: DateTime<Utc>,
    pub version: String,
    pub issuer: Issuer,
    pub destination: String,
    /// Subject being logged out. Rendered as an empty `NameID` when unknown.
    pub name_id: Option<NameId>,
    pub session_indexes: Vec<String>,
}

impl LogoutRequest {
    fn to_element(&self) -> XmlElement {
        let name_id = match &self.name_id {
            Some(name_id) => name_id.to_element(),
            None => XmlElement::new("saml", "NameID", SAML_NS),
        };
        let mut element = XmlElement::new("samlp", "LogoutRequest", SAMLP_NS)
            .with_attribute("Destination", self.destination.clone())
            .with_attribute("ID", self.id.clone())
            .with_attribute("IssueInstant", format_instant(self.issue_instant))
            .with_attribute("Version", self.version.clone())
            .with_child(self.issuer.to_element())
            .with_child(name_id);
        for index in &self.session_indexes {
            element = element
                .with_child(XmlElement::new("samlp", "SessionIndex", SAMLP_NS).with_text(index.clone()));
        }
        element
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        let issuer = element
            .first_child(SAML_NS, "Issuer")
            .ok_or(SamlError::MissingElement("Issuer"))?;
        let name_id = element
            .first_child(SAML_NS, "NameID")
            .map(NameId::from_element)
            .filter(|name_id| !name_id.value.is_empty());
        Ok(Self {
            id: required_attribute(element, "ID")?.to_string(),
            issue_instant: parse_instant(required_attribute(element, "IssueInstant")?)?,
            version: required_attribute(element, "Version")?.to_string(),
            issuer: Issuer::from_element(issuer),
            destination: element.attribute("Destination").unwrap_or_default().to_string(),
            name_id,
            session_indexes: element
                .children_named(SAMLP_NS, "SessionIndex")
                .map(|index| index.text().trim().to_string())
                .collect(),
        })
    }
}

/// An outbound protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    AuthnRequest(AuthnRequest),
    LogoutRequest(LogoutRequest),
}

impl From<AuthnRequest> for ProtocolMessage {
    fn from(request: AuthnRequest) -> Self {
        Self::AuthnRequest(request)
    }
}

impl From<LogoutRequest> for ProtocolMessage {
    fn from(request: LogoutRequest) -> Self {
        Self::LogoutRequest(request)
    }
}

impl ProtocolMessage {
    pub fn id(&self) -> &str {
        match self {
            Self::AuthnRequest(request) => &request.id,
            Self::LogoutRequest(request) => &request.id,
        }
    }

    pub fn issuer(&self) -> &Issuer {
        match self {
            Self::AuthnRequest(request) => &request.issuer,
            Self::LogoutRequest(request) => &request.issuer,
        }
    }

    pub fn destination(&self) -> &str {
        match self {
            Self::AuthnRequest(request) => &request.destination,
            Self::LogoutRequest(request) => &request.destination,
        }
    }

    pub fn to_element(&self) -> XmlElement {
        match self {
            Self::AuthnRequest(request) => request.to_element(),
            Self::LogoutRequest(request) => request.to_element(),
        }
    }

    /// Canonical XML of the message.
    pub fn to_xml(&self) -> String {
        self.to_element().to_canonical_xml()
    }

    pub fn from_xml(pool: &XmlParserPool, xml: &str) -> SamlResult<Self> {
        let root = pool.parse(xml)?;
        if root.is(SAMLP_NS, "AuthnRequest") {
            AuthnRequest::from_element(&root).map(Self::AuthnRequest)
        } else if root.is(SAMLP_NS, "LogoutRequest") {
            LogoutRequest::from_element(&root).map(Self::LogoutRequest)
        } else {
            Err(SamlError::Xml(format!(
                "unexpected protocol message <{}>",
                root.qualified_name()
            )))
        }
    }
}

/// Value of an `AttributeValue` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// Value typed `xs:string`.
    String(String),
    /// Untyped content: optional text plus any child elements.
    Structured {
        text: Option<String>,
        children: Vec<XmlElement>,
    },
}

impl AttributeValue {
    pub fn from_element(element: &XmlElement) -> Self {
        if is_xs_string(element) {
            return Self::String(element.text());
        }
        Self::Structured {
            text: element.has_text().then(|| element.text()),
            children: element.child_elements().cloned().collect(),
        }
    }

    /// Scalar value: typed string, else text content, else the value of a
    /// leading `NameID` child, else empty.
    pub fn decode(&self) -> String {
        match self {
            Self::String(value) => value.clone(),
            Self::Structured {
                text: Some(text), ..
            } => text.clone(),
            Self::Structured { text: None, children } => children
                .first()
                .filter(|child| child.is(SAML_NS, "NameID"))
                .map(|name_id| name_id.text().trim().to_string())
                .unwrap_or_default(),
        }
    }
}

fn is_xs_string(element: &XmlElement) -> bool {
    let Some(xsi_type) = element.attribute_ns(XSI_NS, "type") else {
        return false;
    };
    let (prefix, local) = xsi_type.trim().split_once(':').unwrap_or(("", xsi_type.trim()));
    local == "string" && element.resolve_prefix(prefix) == Some(XS_NS)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<AttributeValue>,
}

impl Attribute {
    /// First value decoded to a string, if the attribute has any values.
    pub fn first_value(&self) -> Option<String> {
        self.values.first().map(AttributeValue::decode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeStatement {
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnStatement {
    pub authn_instant: DateTime<Utc>,
    pub session_index: Option<String>,
}

/// An IdP assertion, with the canonical XML it was read from.
///
/// Only the first `AuthnStatement` and the first `AttributeStatement` are
/// read. Later statements are not parsed, so they cannot fail the assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub id: String,
    pub issue_instant: DateTime<Utc>,
    pub issuer: Issuer,
    pub subject_name_id: Option<NameId>,
    pub authn_statement: Option<AuthnStatement>,
    pub attribute_statement: Option<AttributeStatement>,
    pub xml: String,
}

impl Assertion {
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        let issuer = element
            .first_child(SAML_NS, "Issuer")
            .ok_or(SamlError::MissingElement("Issuer"))?;
        let subject_name_id = element
            .first_child(SAML_NS, "Subject")
            .and_then(|subject| subject.first_child(SAML_NS, "NameID"))
            .map(NameId::from_element);

        let authn_statement = element
            .first_child(SAML_NS, "AuthnStatement")
            .map(|statement| {
                Ok::<_, SamlError>(AuthnStatement {
                    authn_instant: parse_instant(required_attribute(statement, "AuthnInstant")?)?,
                    session_index: statement.attribute("SessionIndex").map(str::to_string),
                })
            })
            .transpose()?;

        let attribute_statement = element
            .first_child(SAML_NS, "AttributeStatement")
            .map(|statement| AttributeStatement {
                attributes: statement
                    .children_named(SAML_NS, "Attribute")
                    .map(|attribute| Attribute {
                        name: attribute.attribute("Name").unwrap_or_default().to_string(),
                        values: attribute
                            .children_named(SAML_NS, "AttributeValue")
                            .map(AttributeValue::from_element)
                            .collect(),
                    })
                    .collect(),
            });

        Ok(Self {
            id: required_attribute(element, "ID")?.to_string(),
            issue_instant: parse_instant(required_attribute(element, "IssueInstant")?)?,
            issuer: Issuer::from_element(issuer),
            subject_name_id,
            authn_statement,
            attribute_statement,
            xml: element.to_canonical_xml(),
        })
    }
}

/// An inbound `samlp:Response`, keeping the parsed tree for signature checks.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: String,
    pub in_response_to: Option<String>,
    pub issue_instant: DateTime<Utc>,
    pub destination: Option<String>,
    pub issuer: Option<Issuer>,
    pub status_code: Option<String>,
    /// The first assertion. Any further assertions are ignored unparsed.
    pub assertion: Option<Assertion>,
    pub element: XmlElement,
}

impl Response {
    pub fn parse(pool: &XmlParserPool, xml: &str) -> SamlResult<Self> {
        let element = pool.parse(xml)?;
        if !element.is(SAMLP_NS, "Response") {
            return Err(SamlError::MissingElement("Response"));
        }

        let status_code = element
            .first_child(SAMLP_NS, "Status")
            .and_then(|status| status.first_child(SAMLP_NS, "StatusCode"))
            .and_then(|code| code.attribute("Value"))
            .map(str::to_string);
        let assertion = element
            .first_child(SAML_NS, "Assertion")
            .map(Assertion::from_element)
            .transpose()?;

        Ok(Self {
            id: required_attribute(&element, "ID")?.to_string(),
            in_response_to: element.attribute("InResponseTo").map(str::to_string),
            issue_instant: parse_instant(required_attribute(&element, "IssueInstant")?)?,
            destination: element.attribute("Destination").map(str::to_string),
            issuer: element
                .first_child(SAML_NS, "Issuer")
                .map(Issuer::from_element),
            status_code,
            assertion,
            element,
        })
    }

    pub fn first_assertion(&self) -> SamlResult<&Assertion> {
        self.assertion
            .as_ref()
            .ok_or(SamlError::MissingElement("Assertion"))
    }

    /// Parsed tree of the first assertion.
    pub fn first_assertion_element(&self) -> Option<&XmlElement> {
        self.element.first_child(SAML_NS, "Assertion")
    }
}
