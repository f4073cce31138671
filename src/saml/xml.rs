//! Namespace-aware XML tree for SAML messages.
//!
//! Documents are parsed with `quick-xml` into an owned [`XmlElement`] tree that
//! keeps every in-scope namespace binding, which is what exclusive
//! canonicalization needs. Outbound messages are assembled with the builder
//! helpers on [`XmlElement`] and rendered through [`super::c14n`].

use std::{borrow::Cow, collections::BTreeMap};

use parking_lot::Mutex;
use quick_xml::{
    Reader,
    escape::unescape,
    events::{BytesStart, Event},
};

use super::{
    c14n::{self, C14nOptions},
    error::{SamlError, SamlResult},
};

/// Namespace bound to the reserved `xml` prefix.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Default number of idle read buffers kept by an [`XmlParserPool`].
const DEFAULT_POOL_SIZE: usize = 16;

/// Buffers that grew beyond this are dropped instead of returned to the pool.
const MAX_POOLED_BUFFER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    pub value: String,
}

impl XmlAttribute {
    pub fn qualified_name(&self) -> String {
        qualify(self.prefix.as_deref(), &self.local_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An element together with its attributes, children and namespace scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    /// Namespace bindings in scope at this element, keyed by prefix.
    /// The empty key is the default namespace.
    pub scope: BTreeMap<String, String>,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    /// Create an element in `namespace`. An empty `prefix` places it in the
    /// default namespace.
    pub fn new(prefix: &str, local_name: &str, namespace: &str) -> Self {
        let mut scope = BTreeMap::new();
        scope.insert(prefix.to_string(), namespace.to_string());
        Self {
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
            local_name: local_name.to_string(),
            namespace: Some(namespace.to_string()),
            scope,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Add an attribute without a namespace.
    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.push(XmlAttribute {
            prefix: None,
            local_name: name.to_string(),
            namespace: None,
            value: value.into(),
        });
        self
    }

    /// Add a namespace-qualified attribute and bind its prefix.
    pub fn with_ns_attribute(
        mut self,
        prefix: &str,
        local_name: &str,
        namespace: &str,
        value: impl Into<String>,
    ) -> Self {
        self.scope.insert(prefix.to_string(), namespace.to_string());
        self.attributes.push(XmlAttribute {
            prefix: Some(prefix.to_string()),
            local_name: local_name.to_string(),
            namespace: Some(namespace.to_string()),
            value: value.into(),
        });
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn qualified_name(&self) -> String {
        qualify(self.prefix.as_deref(), &self.local_name)
    }

    /// Whether this element is `{namespace}local_name`.
    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
    }

    /// Value of an attribute that has no namespace.
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    pub fn attribute_ns(&self, namespace: &str, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.as_deref() == Some(namespace) && a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// Direct children named `{namespace}local_name`, in document order.
    pub fn children_named<'s, 'n>(
        &'s self,
        namespace: &'n str,
        local_name: &'n str,
    ) -> impl Iterator<Item = &'s XmlElement> + use<'s, 'n> {
        self.child_elements()
            .filter(move |child| child.is(namespace, local_name))
    }

    /// First direct child named `{namespace}local_name`.
    pub fn first_child(&self, namespace: &str, local_name: &str) -> Option<&XmlElement> {
        self.child_elements()
            .find(|child| child.is(namespace, local_name))
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(text) => Some(text.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Whether the element has any text content that is not whitespace.
    pub fn has_text(&self) -> bool {
        self.children.iter().any(|node| match node {
            XmlNode::Text(text) => !text.trim().is_empty(),
            XmlNode::Element(_) => false,
        })
    }

    /// Namespace bound to `prefix` at this element.
    pub fn resolve_prefix(&self, prefix: &str) -> Option<&str> {
        self.scope
            .get(prefix)
            .map(String::as_str)
            .filter(|ns| !ns.is_empty())
    }

    /// Depth-first search for the element whose `ID` attribute equals `id`.
    pub fn find_by_id(&self, id: &str) -> Option<&XmlElement> {
        if self.attribute("ID") == Some(id) {
            return Some(self);
        }
        self.child_elements().find_map(|child| child.find_by_id(id))
    }

    /// Exclusive canonical form of this subtree.
    pub fn to_canonical_xml(&self) -> String {
        c14n::canonicalize(self, &C14nOptions::default())
    }
}

fn qualify(prefix: Option<&str>, local_name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{local_name}"),
        None => local_name.to_string(),
    }
}

fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

/// Shared pool of parser read buffers.
///
/// Each parse borrows a buffer for its duration and returns it on drop, so
/// no buffer is ever held across requests.
#[derive(Debug)]
pub struct XmlParserPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
}

impl Default for XmlParserPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl XmlParserPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
        }
    }

    /// Parse a complete document and return its root element.
    pub fn parse(&self, xml: &str) -> SamlResult<XmlElement> {
        let mut buffer = self.acquire();
        parse_document(xml, &mut buffer.buf)
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.buffers.lock().len()
    }

    fn acquire(&self) -> PooledBuffer<'_> {
        let buf = self.buffers.lock().pop().unwrap_or_default();
        PooledBuffer { pool: self, buf }
    }
}

struct PooledBuffer<'a> {
    pool: &'a XmlParserPool,
    buf: Vec<u8>,
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if self.buf.capacity() > MAX_POOLED_BUFFER_BYTES {
            return;
        }
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        let mut buffers = self.pool.buffers.lock();
        if buffers.len() < self.pool.max_idle {
            buffers.push(buf);
        }
    }
}

/// XML 1.0 end-of-line handling: `\r\n` and lone `\r` become `\n`.
fn normalize_line_endings(xml: &str) -> Cow<'_, str> {
    if xml.contains('\r') {
        Cow::Owned(xml.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(xml)
    }
}

/// Attribute-value normalization for CDATA-typed attributes: literal
/// whitespace characters become spaces before references are expanded.
fn normalize_attribute_value(raw: &str) -> SamlResult<String> {
    let spaced: String = raw
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect();
    unescape(&spaced)
        .map(Cow::into_owned)
        .map_err(|e| SamlError::Xml(e.to_string()))
}

fn parse_document(xml: &str, buf: &mut Vec<u8>) -> SamlResult<XmlElement> {
    let xml = normalize_line_endings(xml);
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(false);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        buf.clear();
        match reader.read_event_into(buf)? {
            Event::Start(start) => {
                let element = open_element(&start, inherited_scope(&stack))?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(&start, inherited_scope(&stack))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| SamlError::Xml("unbalanced end tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => match stack.last_mut() {
                Some(parent) => push_text(parent, text.unescape()?.into_owned()),
                None if text.iter().all(u8::is_ascii_whitespace) => {}
                None => return Err(SamlError::Xml("text outside the root element".to_string())),
            },
            Event::CData(data) => {
                let text = String::from_utf8(data.into_inner().into_owned())
                    .map_err(|e| SamlError::Xml(e.to_string()))?;
                match stack.last_mut() {
                    Some(parent) => push_text(parent, text),
                    None => {
                        return Err(SamlError::Xml("CDATA outside the root element".to_string()));
                    }
                }
            }
            Event::DocType(_) => {
                return Err(SamlError::Xml("document type declarations are not allowed".to_string()));
            }
            Event::Eof => break,
            Event::Decl(_) | Event::PI(_) | Event::Comment(_) => {}
        }
    }

    if !stack.is_empty() {
        return Err(SamlError::Xml("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| SamlError::Xml("document has no root element".to_string()))
}

fn inherited_scope(stack: &[XmlElement]) -> BTreeMap<String, String> {
    stack.last().map(|parent| parent.scope.clone()).unwrap_or_default()
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> SamlResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(SamlError::Xml("multiple root elements".to_string())),
    }
    Ok(())
}

fn push_text(parent: &mut XmlElement, text: String) {
    if let Some(XmlNode::Text(previous)) = parent.children.last_mut() {
        previous.push_str(&text);
    } else {
        parent.children.push(XmlNode::Text(text));
    }
}

fn open_element(
    start: &BytesStart<'_>,
    mut scope: BTreeMap<String, String>,
) -> SamlResult<XmlElement> {
    let mut raw_attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| SamlError::Xml(e.to_string()))?
            .to_string();
        let raw = std::str::from_utf8(&attr.value).map_err(|e| SamlError::Xml(e.to_string()))?;
        let value = normalize_attribute_value(raw)?;
        if key == "xmlns" {
            scope.insert(String::new(), value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.insert(prefix.to_string(), value);
        } else {
            raw_attributes.push((key, value));
        }
    }

    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| SamlError::Xml(e.to_string()))?
        .to_string();
    let (prefix, local_name) = split_qname(&name);
    let namespace = match prefix {
        Some(prefix) => Some(resolve(&scope, prefix)?),
        None => scope.get("").filter(|ns| !ns.is_empty()).cloned(),
    };

    let mut attributes = Vec::with_capacity(raw_attributes.len());
    for (key, value) in raw_attributes {
        let (attr_prefix, attr_local) = split_qname(&key);
        let attr_namespace = attr_prefix.map(|p| resolve(&scope, p)).transpose()?;
        attributes.push(XmlAttribute {
            prefix: attr_prefix.map(str::to_string),
            local_name: attr_local.to_string(),
            namespace: attr_namespace,
            value,
        });
    }

    Ok(XmlElement {
        prefix: prefix.map(str::to_string),
        local_name: local_name.to_string(),
        namespace,
        scope,
        attributes,
        children: Vec::new(),
    })
}

fn resolve(scope: &BTreeMap<String, String>, prefix: &str) -> SamlResult<String> {
    if prefix == "xml" {
        return Ok(XML_NS.to_string());
    }
    scope
        .get(prefix)
        .filter(|ns| !ns.is_empty())
        .cloned()
        .ok_or_else(|| SamlError::Xml(format!("unbound namespace prefix '{prefix}'")))
}
