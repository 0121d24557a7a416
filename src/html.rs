//! Parsed HTML pages
//!
//! [`HtmlNode`] is the one capability interface the crawler and field rules
//! use: text, attributes, outer/inner HTML, CSS and XPath selection. It is
//! backed by `scraper` only.

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{CatalogError, Result};
use crate::mapping::{CompiledAddress, FieldOptions, FieldSource, RawValue};
use crate::text_ops::collapse_whitespace;
use crate::xpath::{Item, Namespaces, XPath, XPathNode};

/// Elements dropped together with their content when rendering
const DROPPED_TAGS: [&str; 4] = ["script", "style", "noscript", "template"];

const VOID_TAGS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// URL-valued attributes rewritten by `make_absolute`
const URL_ATTRS: [&str; 3] = ["href", "src", "data-src"];

/// A fetched page and the URL it was finally served from
pub struct Page {
    html: Html,
    url: Option<Url>,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page").field("url", &self.url).finish_non_exhaustive()
    }
}

impl Page {
    pub fn parse(body: &str, url: Option<&str>) -> Self {
        Self {
            html: Html::parse_document(body),
            url: url.and_then(|u| Url::parse(u).ok()),
        }
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn root(&self) -> HtmlNode<'_> {
        HtmlNode {
            page: self,
            el: self.html.root_element(),
        }
    }

    pub fn select(&self, selector: &str) -> Result<Vec<HtmlNode<'_>>> {
        self.root().select(selector)
    }

    /// Resolve `href` against the page URL. Relative links on a page without
    /// a URL are returned unchanged.
    pub fn resolve_url(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        match &self.url {
            Some(base) => base.join(href).ok().map(|u| u.to_string()),
            None => Some(href.to_string()),
        }
    }

    /// Absolute http(s) link targets of the matched nodes, first-seen order.
    /// A matched `<a>` contributes its own `href`; any other element
    /// contributes the `a[href]` elements inside it. Selector errors yield
    /// no links.
    pub fn links(&self, selector: &str, is_xpath: bool) -> Vec<String> {
        let nodes = if is_xpath {
            match XPath::parse(selector) {
                Ok(xpath) => self
                    .root()
                    .select_xpath(&xpath)
                    .into_iter()
                    .filter_map(Selected::into_node)
                    .collect(),
                Err(_) => Vec::new(),
            }
        } else {
            self.select(selector).unwrap_or_default()
        };

        let mut links: Vec<String> = Vec::new();
        for node in nodes {
            let anchors = if node.name() == "a" {
                vec![node]
            } else {
                node.select("a[href]").unwrap_or_default()
            };
            for anchor in anchors {
                let Some(link) = anchor.attr("href").and_then(|href| self.link_target(href)) else {
                    continue;
                };
                if !links.contains(&link) {
                    links.push(link);
                }
            }
        }
        links
    }

    fn link_target(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty()
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with('#')
        {
            return None;
        }
        let absolute = self.resolve_url(href)?;
        (absolute.starts_with("http://") || absolute.starts_with("https://")).then_some(absolute)
    }

    pub fn html(&self) -> String {
        self.html.html()
    }
}

/// An element of a parsed [`Page`]
#[derive(Clone, Copy)]
pub struct HtmlNode<'a> {
    page: &'a Page,
    el: ElementRef<'a>,
}

impl std::fmt::Debug for HtmlNode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HtmlNode").field(&self.el.value().name()).finish()
    }
}

/// One XPath result on a page
#[derive(Debug, Clone)]
pub enum Selected<'a> {
    Node(HtmlNode<'a>),
    Value(String),
}

impl<'a> Selected<'a> {
    pub fn into_node(self) -> Option<HtmlNode<'a>> {
        match self {
            Selected::Node(node) => Some(node),
            Selected::Value(_) => None,
        }
    }
}

impl<'a> HtmlNode<'a> {
    pub fn page(&self) -> &'a Page {
        self.page
    }

    pub fn name(&self) -> &'a str {
        self.el.value().name()
    }

    /// Text content with whitespace runs collapsed
    pub fn text(&self) -> String {
        collapse_whitespace(&self.el.text().collect::<String>())
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.el.value().attr(name)
    }

    pub fn outer_html(&self) -> String {
        self.el.html()
    }

    pub fn inner_html(&self) -> String {
        self.el.inner_html()
    }

    pub fn select(&self, selector: &str) -> Result<Vec<HtmlNode<'a>>> {
        let selector = Selector::parse(selector).map_err(|e| {
            CatalogError::Address(format!("invalid CSS selector `{selector}`: {e}"))
        })?;
        Ok(self.select_compiled(&selector))
    }

    pub fn select_compiled(&self, selector: &Selector) -> Vec<HtmlNode<'a>> {
        let page = self.page;
        self.el
            .select(selector)
            .map(|el| HtmlNode { page, el })
            .collect()
    }

    pub fn select_xpath(&self, xpath: &XPath) -> Vec<Selected<'a>> {
        let context = XNode {
            page: self.page,
            el: Some(self.el),
        };
        xpath
            .select(&context, &Namespaces::new())
            .into_iter()
            .filter_map(|item| match item {
                Item::Node(XNode { el: Some(el), page }) => {
                    Some(Selected::Node(HtmlNode { page, el }))
                }
                Item::Node(XNode { el: None, .. }) => None,
                Item::Value(value) => Some(Selected::Value(value)),
            })
            .collect()
    }

    /// Value of this element as the field options ask for it: an attribute,
    /// rendered HTML, or text.
    pub fn extract(&self, options: &FieldOptions) -> Option<String> {
        if let Some(attr) = options.attr.as_deref().filter(|a| !a.is_empty()) {
            let value = self.attr(attr)?.trim();
            if options.make_absolute {
                return self.page.resolve_url(value);
            }
            return Some(value.to_string());
        }

        if wants_html(options) {
            return Some(self.render(options));
        }

        Some(self.text())
    }

    /// Serialize this element (or only its children with `inner_html`),
    /// applying the tag allow-list, link removal and URL rewriting.
    pub fn render(&self, options: &FieldOptions) -> String {
        let renderer = Renderer {
            page: self.page,
            options,
        };
        let mut out = String::new();
        if options.inner_html {
            renderer.children(self.el, &mut out);
        } else {
            renderer.element(self.el, &mut out);
        }
        out
    }
}

/// Tag allow-list and link removal only make sense on markup
fn wants_html(options: &FieldOptions) -> bool {
    options.get_html || options.inner_html || options.allowed_tags.is_some() || options.remove_links
}

struct Renderer<'a, 'o> {
    page: &'a Page,
    options: &'o FieldOptions,
}

impl Renderer<'_, '_> {
    fn allowed(&self, name: &str) -> bool {
        if self.options.remove_links && name == "a" {
            return false;
        }
        match &self.options.allowed_tags {
            Some(tags) => tags.iter().any(|t| t == name),
            None => true,
        }
    }

    fn element(&self, el: ElementRef<'_>, out: &mut String) {
        let name = el.value().name();
        let allowed_explicitly = self
            .options
            .allowed_tags
            .as_ref()
            .is_some_and(|tags| tags.iter().any(|t| t == name));
        if DROPPED_TAGS.contains(&name) && !allowed_explicitly {
            return;
        }
        if !self.allowed(name) {
            // unwrap: keep the content, drop the tag
            self.children(el, out);
            return;
        }

        out.push('<');
        out.push_str(name);
        for (key, value) in el.value().attrs() {
            let value = if self.options.make_absolute && URL_ATTRS.contains(&key) {
                self.page.resolve_url(value).unwrap_or_else(|| value.to_string())
            } else {
                value.to_string()
            };
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(&value, true));
            out.push('"');
        }
        out.push('>');

        if VOID_TAGS.contains(&name) {
            return;
        }
        self.children(el, out);
        out.push_str("</");
        out.push_str(name);
        out.push('>');
    }

    fn children(&self, el: ElementRef<'_>, out: &mut String) {
        for child in el.children() {
            match child.value() {
                Node::Text(text) => {
                    let text: &str = text;
                    out.push_str(&escape(text, false));
                }
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        self.element(child, out);
                    }
                }
                _ => {}
            }
        }
    }
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
    out
}

impl FieldSource for HtmlNode<'_> {
    fn resolve_raw(
        &self,
        address: &CompiledAddress,
        options: &FieldOptions,
    ) -> Result<Option<RawValue>> {
        let value = match address {
            CompiledAddress::Css(selector) => self
                .select_compiled(selector)
                .first()
                .and_then(|node| node.extract(options))
                .map(RawValue::One),
            CompiledAddress::XPath(xpath) => self
                .select_xpath(xpath)
                .into_iter()
                .next()
                .and_then(|selected| self.selected_value(selected, options))
                .map(RawValue::One),
            CompiledAddress::XPathList(xpath) => {
                let values: Vec<String> = self
                    .select_xpath(xpath)
                    .into_iter()
                    .filter_map(|selected| self.selected_value(selected, options))
                    .collect();
                (!values.is_empty()).then_some(RawValue::Many(values))
            }
            CompiledAddress::Attribute(name) => self.attr(name).map(|v| {
                let v = v.trim();
                let v = if options.make_absolute {
                    self.page.resolve_url(v).unwrap_or_else(|| v.to_string())
                } else {
                    v.to_string()
                };
                RawValue::One(v)
            }),
            CompiledAddress::Literal(value) => Some(RawValue::One(value.clone())),
            other => {
                return Err(CatalogError::Address(format!(
                    "{other:?} cannot be resolved against an HTML element"
                )))
            }
        };
        Ok(value)
    }
}

impl HtmlNode<'_> {
    /// Value of an XPath result: element as `extract`, scalar as text
    pub fn selected_value(&self, selected: Selected<'_>, options: &FieldOptions) -> Option<String> {
        match selected {
            Selected::Node(node) => node.extract(options),
            Selected::Value(value) if options.make_absolute => self.page.resolve_url(&value),
            Selected::Value(value) => Some(collapse_whitespace(&value)),
        }
    }
}

/// Document-aware node for the XPath evaluator; `el: None` is the document
#[derive(Clone, Copy)]
struct XNode<'a> {
    page: &'a Page,
    el: Option<ElementRef<'a>>,
}

impl XPathNode for XNode<'_> {
    const CASE_SENSITIVE: bool = false;

    fn same_node(&self, other: &Self) -> bool {
        match (self.el, other.el) {
            (Some(a), Some(b)) => a.id() == b.id(),
            (None, None) => std::ptr::eq(self.page, other.page),
            _ => false,
        }
    }

    fn parent(&self) -> Option<Self> {
        let el = self.el?;
        let parent = el.parent()?;
        match ElementRef::wrap(parent) {
            Some(parent) => Some(XNode {
                page: self.page,
                el: Some(parent),
            }),
            None if parent.value().is_document() => Some(XNode {
                page: self.page,
                el: None,
            }),
            None => None,
        }
    }

    fn children(&self) -> Vec<Self> {
        let page = self.page;
        match self.el {
            Some(el) => el
                .children()
                .filter_map(ElementRef::wrap)
                .map(|el| XNode { page, el: Some(el) })
                .collect(),
            None => vec![XNode {
                page,
                el: Some(page.html.root_element()),
            }],
        }
    }

    fn texts(&self) -> Vec<String> {
        let Some(el) = self.el else {
            return Vec::new();
        };
        el.children()
            .filter_map(|child| {
                let text: &str = child.value().as_text()?;
                Some(text.to_string())
            })
            .filter(|text| !text.trim().is_empty())
            .collect()
    }

    fn local_name(&self) -> Option<String> {
        self.el.map(|el| el.value().name().to_string())
    }

    fn attributes(&self) -> Vec<(String, String)> {
        match self.el {
            Some(el) => el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            None => Vec::new(),
        }
    }

    fn string_value(&self) -> String {
        let el = self.el.unwrap_or_else(|| self.page.html.root_element());
        el.text().collect()
    }

    /// Element positions counted through sibling links, document excluded
    fn order_key(&self) -> Vec<usize> {
        let Some(el) = self.el else {
            return Vec::new();
        };
        let mut key: Vec<usize> = std::iter::once(*el)
            .chain(el.ancestors())
            .take_while(|node| !node.value().is_document())
            .map(|node| {
                let before = node.prev_siblings().filter(|s| s.value().is_element()).count();
                before + 1
            })
            .collect();
        key.reverse();
        key
    }
}
