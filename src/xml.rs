//! XML catalog documents
//!
//! quick-xml drives a single pass that builds a small arena tree. The tree
//! keeps namespace URIs so prefixed XPath tests can be resolved against the
//! bindings a mapping supplies.

use encoding_rs::{Encoding, UTF_8};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{CatalogError, Result};
use crate::mapping::{CompiledAddress, FieldOptions, FieldSource, RawValue};
use crate::xpath::{Item, Namespaces, XPathNode};

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone)]
enum Content {
    Element(usize),
    Text(String),
}

#[derive(Debug, Clone, Default)]
struct NodeData {
    local: String,
    prefix: Option<String>,
    namespace: Option<String>,
    /// Qualified name -> value, namespace declarations excluded
    attributes: Vec<(String, String)>,
    parent: Option<usize>,
    content: Vec<Content>,
}

/// Parsed XML document. Node 0 is the document node.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    nodes: Vec<NodeData>,
}

impl XmlDocument {
    /// Decode (BOM, then the declared encoding, then UTF-8) and parse.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let encoding = sniff_encoding(bytes);
        let (text, _, had_errors) = encoding.decode(bytes);
        if had_errors {
            tracing::warn!(encoding = encoding.name(), "XML contains undecodable bytes");
        }
        Self::parse_str(&text)
    }

    pub fn parse_str(text: &str) -> Result<Self> {
        let mut reader = Reader::from_str(text);
        let mut builder = TreeBuilder::new();

        loop {
            let event = reader.read_event().map_err(|e| {
                CatalogError::Fatal(format!(
                    "XML parse error at position {}: {e}",
                    reader.buffer_position()
                ))
            })?;

            match event {
                Event::Start(e) => builder.open(&e)?,
                Event::Empty(e) => {
                    builder.open(&e)?;
                    builder.close();
                }
                Event::End(_) => builder.close(),
                Event::Text(e) => {
                    let text = match e.unescape() {
                        Ok(text) => text.into_owned(),
                        // unknown entities such as &nbsp; in hand-made feeds
                        Err(_) => String::from_utf8_lossy(&e.into_inner()).into_owned(),
                    };
                    builder.text(text);
                }
                Event::CData(e) => {
                    builder.text(String::from_utf8_lossy(&e.into_inner()).into_owned())
                }
                Event::Eof => break,
                _ => {}
            }
        }

        builder.finish()
    }

    pub fn root(&self) -> XmlNode<'_> {
        XmlNode { doc: self, id: 0 }
    }

    /// The top-level element
    pub fn root_element(&self) -> Option<XmlNode<'_>> {
        self.root().children().into_iter().next()
    }
}

fn sniff_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding;
    }

    let head = &bytes[..bytes.len().min(256)];
    let head = String::from_utf8_lossy(head);
    let Some(decl_end) = head.find("?>").filter(|_| head.trim_start().starts_with("<?xml")) else {
        return UTF_8;
    };
    let decl = &head[..decl_end];

    decl.find("encoding")
        .map(|i| &decl[i + "encoding".len()..])
        .and_then(|rest| {
            let rest = rest.trim_start().strip_prefix('=')?.trim_start();
            let quote = rest.chars().next()?;
            let rest = &rest[quote.len_utf8()..];
            let end = rest.find(quote)?;
            Encoding::for_label(rest[..end].trim().as_bytes())
        })
        .unwrap_or(UTF_8)
}

struct TreeBuilder {
    nodes: Vec<NodeData>,
    /// Open elements, innermost last
    stack: Vec<usize>,
    /// In-scope namespace declarations per open element
    scopes: Vec<Vec<(Option<String>, String)>>,
    has_root: bool,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            nodes: vec![NodeData::default()],
            stack: vec![0],
            scopes: Vec::new(),
            has_root: false,
        }
    }

    fn open(&mut self, start: &BytesStart<'_>) -> Result<()> {
        let qname = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let (prefix, local) = split_qname(&qname);

        let mut declarations = Vec::new();
        let mut attributes = Vec::new();
        for attr in start.attributes().with_checks(false) {
            let attr = attr.map_err(|e| CatalogError::Fatal(format!("XML attribute error: {e}")))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = match attr.unescape_value() {
                Ok(value) => value.into_owned(),
                Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
            };

            if key == "xmlns" {
                declarations.push((None, value));
            } else if let Some(p) = key.strip_prefix("xmlns:") {
                declarations.push((Some(p.to_string()), value));
            } else {
                attributes.push((key, value));
            }
        }
        self.scopes.push(declarations);

        let namespace = self.resolve(prefix.as_deref());
        let parent = self.stack.last().copied().unwrap_or(0);
        if parent == 0 {
            if self.has_root {
                return Err(CatalogError::Fatal(
                    "XML document has more than one root element".into(),
                ));
            }
            self.has_root = true;
        }

        let id = self.nodes.len();
        self.nodes.push(NodeData {
            local,
            prefix,
            namespace,
            attributes,
            parent: Some(parent),
            content: Vec::new(),
        });
        self.nodes[parent].content.push(Content::Element(id));
        self.stack.push(id);
        Ok(())
    }

    fn close(&mut self) {
        // End tag names are checked by the reader
        if self.stack.len() > 1 {
            self.stack.pop();
            self.scopes.pop();
        }
    }

    fn text(&mut self, text: String) {
        let parent = self.stack.last().copied().unwrap_or(0);
        // inter-element whitespace and text outside the root carry nothing
        if parent == 0 || text.trim().is_empty() {
            return;
        }
        self.nodes[parent].content.push(Content::Text(text));
    }

    fn resolve(&self, prefix: Option<&str>) -> Option<String> {
        if prefix == Some("xml") {
            return Some(XML_NS.to_string());
        }
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter())
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.clone())
            .filter(|uri| !uri.is_empty())
    }

    fn finish(self) -> Result<XmlDocument> {
        if self.stack.len() > 1 {
            return Err(CatalogError::Fatal("XML document ended inside an open element".into()));
        }
        if !self.has_root {
            return Err(CatalogError::Fatal("XML document has no root element".into()));
        }
        Ok(XmlDocument { nodes: self.nodes })
    }
}

fn split_qname(qname: &str) -> (Option<String>, String) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, qname.to_string()),
    }
}

/// Handle to one node of an [`XmlDocument`]
#[derive(Debug, Clone, Copy)]
pub struct XmlNode<'a> {
    doc: &'a XmlDocument,
    id: usize,
}

impl<'a> XmlNode<'a> {
    fn data(&self) -> &'a NodeData {
        &self.doc.nodes[self.id]
    }

    pub fn name(&self) -> &'a str {
        &self.data().local
    }

    /// Attribute by qualified name, falling back to the local part
    pub fn attribute(&self, name: &str) -> Option<&'a str> {
        let attributes = &self.data().attributes;
        attributes
            .iter()
            .find(|(key, _)| key == name)
            .or_else(|| {
                attributes
                    .iter()
                    .find(|(key, _)| key.rsplit(':').next() == Some(name))
            })
            .map(|(_, value)| value.as_str())
    }

    /// All descendant text, in document order
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for content in &self.data().content {
            match content {
                Content::Text(text) => out.push_str(text),
                Content::Element(id) => XmlNode { doc: self.doc, id: *id }.collect_text(out),
            }
        }
    }

    /// Bind namespace prefixes for field resolution
    pub fn bind(self, namespaces: &'a Namespaces) -> BoundXmlNode<'a> {
        BoundXmlNode {
            node: self,
            namespaces,
        }
    }
}

impl XPathNode for XmlNode<'_> {
    fn same_node(&self, other: &Self) -> bool {
        std::ptr::eq(self.doc, other.doc) && self.id == other.id
    }

    fn parent(&self) -> Option<Self> {
        self.data().parent.map(|id| XmlNode { doc: self.doc, id })
    }

    fn children(&self) -> Vec<Self> {
        self.data()
            .content
            .iter()
            .filter_map(|c| match c {
                Content::Element(id) => Some(XmlNode { doc: self.doc, id: *id }),
                Content::Text(_) => None,
            })
            .collect()
    }

    fn texts(&self) -> Vec<String> {
        self.data()
            .content
            .iter()
            .filter_map(|c| match c {
                Content::Text(text) => Some(text.clone()),
                Content::Element(_) => None,
            })
            .collect()
    }

    fn local_name(&self) -> Option<String> {
        (self.id != 0).then(|| self.data().local.clone())
    }

    fn prefix(&self) -> Option<String> {
        self.data().prefix.clone()
    }

    fn namespace_uri(&self) -> Option<String> {
        self.data().namespace.clone()
    }

    fn attributes(&self) -> Vec<(String, String)> {
        self.data().attributes.clone()
    }

    fn string_value(&self) -> String {
        self.text()
    }

    /// Arena ids are handed out in start-tag order
    fn order_key(&self) -> Vec<usize> {
        vec![self.id]
    }
}

/// An XML node together with the mapping's namespace bindings
#[derive(Debug, Clone, Copy)]
pub struct BoundXmlNode<'a> {
    pub node: XmlNode<'a>,
    pub namespaces: &'a Namespaces,
}

impl FieldSource for BoundXmlNode<'_> {
    fn resolve_raw(
        &self,
        address: &CompiledAddress,
        _options: &FieldOptions,
    ) -> Result<Option<RawValue>> {
        match address {
            CompiledAddress::XPath(xpath) => Ok(xpath
                .select(&self.node, self.namespaces)
                .first()
                .map(|item| RawValue::One(item.string_value()))),
            CompiledAddress::XPathList(xpath) => {
                let values: Vec<String> = xpath
                    .select(&self.node, self.namespaces)
                    .iter()
                    .map(Item::string_value)
                    .filter(|v| !v.trim().is_empty())
                    .collect();
                Ok((!values.is_empty()).then_some(RawValue::Many(values)))
            }
            CompiledAddress::Attribute(name) => {
                Ok(self.node.attribute(name).map(|v| RawValue::One(v.to_string())))
            }
            CompiledAddress::Literal(value) => Ok(Some(RawValue::One(value.clone()))),
            other => Err(CatalogError::Address(format!(
                "{other:?} cannot be resolved against an XML element"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xpath::XPath;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<yml_catalog date="2024-05-01">
  <shop>
    <categories>
      <category id="10">Drills</category>
      <category id="11" parentId="10">Cordless &amp; corded</category>
    </categories>
    <offers>
      <offer id="A-1" available="true">
        <name>Drill <b>X</b></name>
        <price>1299.90</price>
        <categoryId>11</categoryId>
        <picture>https://cdn.example.com/1.jpg</picture>
        <picture>https://cdn.example.com/2.jpg</picture>
        <description><![CDATA[<p>Strong & light</p>]]></description>
      </offer>
      <offer id="A-2"/>
    </offers>
  </shop>
</yml_catalog>"#;

    #[test]
    fn test_parse_and_select() {
        let doc = XmlDocument::parse(FEED.as_bytes()).unwrap();
        let ns = Namespaces::new();
        let offers = XPath::parse("//offers/offer").unwrap().select_nodes(&doc.root(), &ns);
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].attribute("id"), Some("A-1"));
        assert_eq!(offers[0].name(), "offer");

        let name = XPath::parse("name").unwrap().first_string(&offers[0], &ns);
        assert_eq!(name.as_deref(), Some("Drill X"));

        let description = XPath::parse("description").unwrap().first_string(&offers[0], &ns);
        assert_eq!(description.as_deref(), Some("<p>Strong & light</p>"));
    }

    #[test]
    fn test_nested_matches_in_document_order() {
        let xml = r#"<div class="g"><section><img src="/1.jpg"/></section><img src="/2.jpg"/>
            <div><img src="/3.jpg"/></div><img src="/4.jpg"/></div>"#;
        let doc = XmlDocument::parse(xml.as_bytes()).unwrap();
        let ns = Namespaces::new();
        let srcs = |expr: &str| -> Vec<String> {
            XPath::parse(expr)
                .unwrap()
                .select(&doc.root(), &ns)
                .iter()
                .map(Item::string_value)
                .collect()
        };

        assert_eq!(srcs("//img/@src"), vec!["/1.jpg", "/2.jpg", "/3.jpg", "/4.jpg"]);
        assert_eq!(srcs("(//img)[2]/@src"), vec!["/2.jpg"]);
        assert_eq!(srcs("//div/img/@src | //section/img/@src")[0], "/1.jpg");
    }

    #[test]
    fn test_entities_are_unescaped() {
        let doc = XmlDocument::parse(FEED.as_bytes()).unwrap();
        let text = XPath::parse("//category[@id='11']")
            .unwrap()
            .first_string(&doc.root(), &Namespaces::new());
        assert_eq!(text.as_deref(), Some("Cordless & corded"));
    }

    #[test]
    fn test_namespaced_feed() {
        let xml = r#"<rss xmlns:g="http://base.google.com/ns/1.0"><channel>
            <item><g:id>7</g:id><g:price>10 UAH</g:price></item></channel></rss>"#;
        let doc = XmlDocument::parse(xml.as_bytes()).unwrap();
        let item = XPath::parse("//item")
            .unwrap()
            .select_nodes(&doc.root(), &Namespaces::new())
            .remove(0);

        let mut ns = Namespaces::new();
        ns.insert("gg".into(), "http://base.google.com/ns/1.0".into());
        let bound = XPath::parse("gg:id").unwrap().first_string(&item, &ns);
        assert_eq!(bound.as_deref(), Some("7"));

        // unbound prefix falls back to the prefix written in the document
        let literal = XPath::parse("g:price").unwrap().first_string(&item, &Namespaces::new());
        assert_eq!(literal.as_deref(), Some("10 UAH"));

        // unprefixed names match any namespace
        let local = XPath::parse("id").unwrap().first_string(&item, &Namespaces::new());
        assert_eq!(local.as_deref(), Some("7"));
    }

    #[test]
    fn test_declared_encoding() {
        let (bytes, _, _) = encoding_rs::WINDOWS_1251
            .encode("<?xml version=\"1.0\" encoding=\"windows-1251\"?><root><name>Дриль</name></root>");
        let doc = XmlDocument::parse(&bytes).unwrap();
        let name = XPath::parse("/root/name")
            .unwrap()
            .first_string(&doc.root(), &Namespaces::new());
        assert_eq!(name.as_deref(), Some("Дриль"));
    }

    #[test]
    fn test_malformed_documents_are_fatal() {
        for xml in ["<a><b></a>", "<a>", "", "just text"] {
            let err = XmlDocument::parse(xml.as_bytes()).unwrap_err();
            assert!(err.is_fatal(), "{xml}: {err}");
        }
    }

    #[test]
    fn test_bound_node_resolves_fields() {
        let doc = XmlDocument::parse(FEED.as_bytes()).unwrap();
        let ns = Namespaces::new();
        let offer = XPath::parse("//offer").unwrap().select_nodes(&doc.root(), &ns).remove(0);
        let bound = offer.bind(&ns);

        let pictures = XPath::parse("picture").unwrap();
        let raw = bound
            .resolve_raw(&CompiledAddress::XPathList(pictures), &FieldOptions::default())
            .unwrap();
        assert_eq!(
            raw,
            Some(RawValue::Many(vec![
                "https://cdn.example.com/1.jpg".into(),
                "https://cdn.example.com/2.jpg".into(),
            ]))
        );

        let raw = bound
            .resolve_raw(&CompiledAddress::Attribute("available".into()), &FieldOptions::default())
            .unwrap();
        assert_eq!(raw, Some(RawValue::One("true".into())));
    }
}
