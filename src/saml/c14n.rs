//! Exclusive XML Canonicalization 1.0 (without comments).
//!
//! Used both to serialise outbound protocol messages and to produce the
//! octets that XML-DSig digests and signatures are computed over.

use std::collections::{BTreeMap, BTreeSet};

use super::xml::{XmlAttribute, XmlElement, XmlNode};

/// Algorithm URI for exclusive canonicalization without comments.
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

#[derive(Debug, Default, Clone, Copy)]
pub struct C14nOptions<'a> {
    /// Subtree left out of the output (the enveloped-signature transform).
    pub exclude: Option<&'a XmlElement>,
    /// InclusiveNamespaces PrefixList. `#default` names the default namespace.
    pub inclusive_prefixes: &'a [String],
}

/// Canonicalize `element` and its descendants.
pub fn canonicalize(element: &XmlElement, options: &C14nOptions<'_>) -> String {
    let mut out = String::new();
    write_element(element, options, &BTreeMap::new(), &mut out);
    out
}

fn write_element(
    element: &XmlElement,
    options: &C14nOptions<'_>,
    rendered: &BTreeMap<String, String>,
    out: &mut String,
) {
    if let Some(excluded) = options.exclude
        && std::ptr::eq(element, excluded)
    {
        return;
    }

    let mut utilized = BTreeSet::new();
    utilized.insert(element.prefix.clone().unwrap_or_default());
    for attr in &element.attributes {
        if let Some(prefix) = &attr.prefix
            && prefix != "xml"
        {
            utilized.insert(prefix.clone());
        }
    }
    for prefix in options.inclusive_prefixes {
        let key = if prefix == "#default" { "" } else { prefix.as_str() };
        if element.scope.contains_key(key) {
            utilized.insert(key.to_string());
        }
    }

    // BTreeSet order puts the default namespace ("") first, then prefixes
    // lexicographically, which is the canonical declaration order.
    let mut in_output = rendered.clone();
    let mut declarations = Vec::new();
    for prefix in utilized {
        let uri = element.scope.get(&prefix).cloned().unwrap_or_default();
        let current = rendered.get(&prefix).map(String::as_str).unwrap_or("");
        if uri == current || (uri.is_empty() && !prefix.is_empty()) {
            continue;
        }
        in_output.insert(prefix.clone(), uri.clone());
        declarations.push((prefix, uri));
    }

    out.push('<');
    out.push_str(&element.qualified_name());
    for (prefix, uri) in &declarations {
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        escape_attribute(uri, out);
        out.push('"');
    }

    let mut attributes: Vec<&XmlAttribute> = element.attributes.iter().collect();
    attributes.sort_by(|a, b| {
        let key_a = (a.namespace.as_deref().unwrap_or(""), a.local_name.as_str());
        let key_b = (b.namespace.as_deref().unwrap_or(""), b.local_name.as_str());
        key_a.cmp(&key_b)
    });
    for attr in attributes {
        out.push(' ');
        out.push_str(&attr.qualified_name());
        out.push_str("=\"");
        escape_attribute(&attr.value, out);
        out.push('"');
    }
    out.push('>');

    for child in &element.children {
        match child {
            XmlNode::Element(child) => write_element(child, options, &in_output, out),
            XmlNode::Text(text) => escape_text(text, out),
        }
    }

    out.push_str("</");
    out.push_str(&element.qualified_name());
    out.push('>');
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

fn escape_text(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::saml::xml::XmlParserPool;

    fn parse(xml: &str) -> XmlElement {
        XmlParserPool::default().parse(xml).unwrap()
    }

    #[test]
    fn test_drops_unused_namespaces_and_sorts_attributes() {
        let root = parse(
            r#"<a:root xmlns:b="urn:b" xmlns:a="urn:a" xmlns:unused="urn:u" z="1" b:y="2" a="3"/>"#,
        );
        assert_eq!(
            canonicalize(&root, &C14nOptions::default()),
            r#"<a:root xmlns:a="urn:a" xmlns:b="urn:b" a="3" z="1" b:y="2"></a:root>"#
        );
    }

    #[test]
    fn test_declares_namespaces_where_first_used() {
        let root = parse(
            r#"<p:outer xmlns:p="urn:p" xmlns:q="urn:q"><p:inner><q:leaf>x</q:leaf></p:inner></p:outer>"#,
        );
        let inner = root.child_elements().next().unwrap();
        assert_eq!(
            canonicalize(inner, &C14nOptions::default()),
            r#"<p:inner xmlns:p="urn:p"><q:leaf xmlns:q="urn:q">x</q:leaf></p:inner>"#
        );
    }

    #[test]
    fn test_default_namespace_is_undeclared_when_left() {
        let root = parse(r#"<r xmlns="urn:d"><c xmlns=""/></r>"#);
        assert_eq!(
            canonicalize(&root, &C14nOptions::default()),
            r#"<r xmlns="urn:d"><c xmlns=""></c></r>"#
        );
    }

    #[test]
    fn test_escaping() {
        let root = parse("<r a=\"&lt;&amp;&quot;&#9;\">1 &lt; 2 &amp;&amp; 3 &gt; 2</r>");
        assert_eq!(
            canonicalize(&root, &C14nOptions::default()),
            "<r a=\"&lt;&amp;&quot;&#x9;\">1 &lt; 2 &amp;&amp; 3 &gt; 2</r>"
        );
    }

    #[test]
    fn test_excluded_subtree_and_inclusive_prefixes() {
        let root = parse(
            r#"<r xmlns:xs="urn:xs"><skip>gone</skip><keep>kept</keep></r>"#,
        );
        let skip = root.child_elements().next().unwrap();
        let prefixes = vec!["xs".to_string()];
        let options = C14nOptions {
            exclude: Some(skip),
            inclusive_prefixes: &prefixes,
        };
        assert_eq!(
            canonicalize(&root, &options),
            r#"<r xmlns:xs="urn:xs"><keep>kept</keep></r>"#
        );
    }

    /// Exclusive XML Canonicalization 1.0, section 2.2: the same `n1:elem2`
    /// subtree in two different contexts canonicalizes identically.
    #[rstest]
    #[case::first_context(
        "<n0:local xmlns:n0=\"foo:bar\" xmlns:n3=\"ftp://example.org\">\n  \
         <n1:elem2 xmlns:n1=\"http://example.net\" xml:lang=\"en\">\n    \
         <n3:stuff xmlns:n3=\"ftp://example.org\"/>\n  </n1:elem2>\n</n0:local>"
    )]
    #[case::second_context(
        "<n2:pdu xmlns:n1=\"http://example.com\" xmlns:n2=\"http://foo.example\" \
         xml:lang=\"fr\" xml:space=\"retain\">\n  \
         <n1:elem2 xmlns:n1=\"http://example.net\" xml:lang=\"en\">\n    \
         <n3:stuff xmlns:n3=\"ftp://example.org\"/>\n  </n1:elem2>\n</n2:pdu>"
    )]
    fn test_w3c_exclusive_vectors(#[case] document: &str) {
        let root = parse(document);
        let elem2 = root.child_elements().next().unwrap();
        assert_eq!(
            canonicalize(elem2, &C14nOptions::default()),
            "<n1:elem2 xmlns:n1=\"http://example.net\" xml:lang=\"en\">\n    \
             <n3:stuff xmlns:n3=\"ftp://example.org\"></n3:stuff>\n  </n1:elem2>"
        );
    }

    #[test]
    fn test_crlf_input_canonicalizes_like_lf() {
        let lf = parse("<r a=\"1\">\n  <c>x\ny</c>\n</r>");
        let crlf = parse("<r a=\"1\">\r\n  <c>x\r\ny</c>\r\n</r>");
        let options = C14nOptions::default();
        assert_eq!(canonicalize(&crlf, &options), canonicalize(&lf, &options));
        assert!(!canonicalize(&crlf, &options).contains("&#xD;"));
    }
}
