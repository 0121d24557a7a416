//! Scraper rule blocks and product page field extraction
//!
//! A rule set has three blocks: `categories` (links to follow from the
//! start pages), `listing` (product links and pagination on listing pages)
//! and `product` (field rules and attribute tables on product pages).
//!
//! Rules are written as a bare CSS selector or as an object:
//!
//! ```json
//! {"selector": "//div[@class='price']", "type": "xpath", "regex": "([\\d ,]+)"}
//! ```
//!
//! Selector errors never fail extraction; a broken rule matches nothing.
//! [`RuleSet::problems`] lists them so they can be reported when a config
//! is loaded.

use indexmap::IndexMap;
use scraper::Selector;
use serde::Deserialize;

use crate::error::{CatalogError, Result};
use crate::html::{HtmlNode, Page, Selected};
use crate::mapping::{Field, FieldOptions};
use crate::record::{CandidateRecord, FieldValue, RecordBuilder};
use crate::text_ops::{split_list, TextOps};
use crate::xpath::XPath;

fn default_separator() -> String {
    ", ".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRule {
    Selector(String),
    Full(RuleBody),
}

#[derive(Deserialize)]
struct RuleBody {
    #[serde(default)]
    selector: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default, alias = "isXPath", alias = "isXpath")]
    is_xpath: bool,
    #[serde(default, alias = "asList")]
    as_list: bool,
    #[serde(default)]
    separator: Option<String>,
    /// Nested options win over inline ones
    #[serde(default)]
    options: Option<FieldOptions>,
    #[serde(flatten)]
    inline: FieldOptions,
}

/// How one product field is derived from a page
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawRule")]
pub struct ExtractionRule {
    pub selector: String,
    pub is_xpath: bool,
    /// Keep every match instead of the first
    pub as_list: bool,
    pub separator: String,
    pub options: FieldOptions,
}

impl From<RawRule> for ExtractionRule {
    fn from(raw: RawRule) -> Self {
        match raw {
            RawRule::Selector(selector) => ExtractionRule::css(selector.trim()),
            RawRule::Full(body) => ExtractionRule {
                selector: body.selector.trim().to_string(),
                is_xpath: body.is_xpath
                    || body
                        .kind
                        .as_deref()
                        .is_some_and(|kind| kind.trim().eq_ignore_ascii_case("xpath")),
                as_list: body.as_list,
                separator: body.separator.unwrap_or_else(default_separator),
                options: body.options.unwrap_or(body.inline),
            },
        }
    }
}

impl ExtractionRule {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            is_xpath: false,
            as_list: false,
            separator: default_separator(),
            options: FieldOptions::default(),
        }
    }

    pub fn xpath(selector: impl Into<String>) -> Self {
        Self {
            is_xpath: true,
            ..Self::css(selector)
        }
    }

    pub fn with_options(mut self, options: FieldOptions) -> Self {
        self.options = options;
        self
    }

    pub fn list(mut self) -> Self {
        self.as_list = true;
        self
    }

    /// Every non-empty match, after text ops
    pub fn values(&self, root: HtmlNode<'_>) -> Result<Vec<String>> {
        let ops = TextOps::from_options(&self.options)?;
        let values = select(root, &self.selector, self.is_xpath)?
            .into_iter()
            .filter_map(|selected| root.selected_value(selected, &self.options))
            .map(|value| ops.apply(&value))
            .filter(|value| !value.is_empty())
            .collect();
        Ok(values)
    }

    /// First match, or all matches joined with the separator for list rules;
    /// empty when nothing matches or the rule is broken
    pub fn evaluate(&self, root: HtmlNode<'_>) -> String {
        let values = match self.values(root) {
            Ok(values) => values,
            Err(e) => {
                tracing::debug!(selector = %self.selector, error = %e, "rule matched nothing");
                return String::new();
            }
        };
        if self.as_list {
            values.join(&self.separator)
        } else {
            values.into_iter().next().unwrap_or_default()
        }
    }

    /// Value as a record field. Image rules keep their matches as a list.
    fn field_value(&self, key: &str, root: HtmlNode<'_>) -> Option<FieldValue> {
        if self.as_list && Field::from_key(key) == Some(Field::ImageUrls) {
            let values = self.values(root).unwrap_or_default();
            return (!values.is_empty()).then_some(FieldValue::List(values));
        }

        let value = self.evaluate(root);
        if value.is_empty() {
            return None;
        }
        match split_list(Some(&value), self.options.split.as_deref()) {
            Some(parts) => Some(FieldValue::List(parts)),
            None => Some(FieldValue::Text(value)),
        }
    }
}

fn select<'a>(root: HtmlNode<'a>, selector: &str, is_xpath: bool) -> Result<Vec<Selected<'a>>> {
    if selector.is_empty() {
        return Ok(Vec::new());
    }
    if is_xpath {
        let xpath = XPath::parse(selector).map_err(|e| CatalogError::Address(e.to_string()))?;
        Ok(root.select_xpath(&xpath))
    } else {
        Ok(root.select(selector)?.into_iter().map(Selected::Node).collect())
    }
}

/// Why a selector can't be evaluated, if it can't
fn selector_problem(selector: &str, is_xpath: bool) -> Option<String> {
    if selector.is_empty() {
        return None;
    }
    if is_xpath {
        XPath::parse(selector).err().map(|e| e.to_string())
    } else {
        Selector::parse(selector)
            .err()
            .map(|e| format!("invalid CSS selector `{selector}`: {e}"))
    }
}

fn select_elements<'a>(root: HtmlNode<'a>, selector: &str, is_xpath: bool) -> Vec<HtmlNode<'a>> {
    select(root, selector, is_xpath)
        .unwrap_or_default()
        .into_iter()
        .filter_map(Selected::into_node)
        .collect()
}

/// A selector whose matches are (or contain) links
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawRule")]
pub struct LinkRule {
    pub selector: String,
    pub is_xpath: bool,
}

impl From<RawRule> for LinkRule {
    fn from(raw: RawRule) -> Self {
        let rule = ExtractionRule::from(raw);
        LinkRule {
            selector: rule.selector,
            is_xpath: rule.is_xpath,
        }
    }
}

impl LinkRule {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            is_xpath: false,
        }
    }

    pub fn links(&self, page: &Page) -> Vec<String> {
        page.links(&self.selector, self.is_xpath)
    }

    pub fn count(&self, page: &Page) -> usize {
        select_elements(page.root(), &self.selector, self.is_xpath).len()
    }
}

/// Links of every rule, de-duplicated in first-seen order
pub fn collect_links(rules: &[LinkRule], page: &Page) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for rule in rules {
        for link in rule.links(page) {
            if !links.contains(&link) {
                links.push(link);
            }
        }
    }
    links
}

/// A repeated name/value block, e.g. a specification table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttributeTableRule {
    #[serde(alias = "container_selector", alias = "containerSelector")]
    pub container: String,
    #[serde(alias = "name_selector", alias = "nameSelector")]
    pub name: String,
    #[serde(alias = "value_selector", alias = "valueSelector")]
    pub value: String,
    #[serde(default = "default_separator", alias = "value_separator", alias = "valueSeparator")]
    pub separator: String,
    /// Record field the harvested map is stored under
    #[serde(default = "default_attributes_field")]
    pub field: String,
    #[serde(default, alias = "isXPath")]
    pub is_xpath: bool,
}

fn default_attributes_field() -> String {
    Field::AttributesRaw.key().to_string()
}

impl AttributeTableRule {
    /// Name -> joined values; the first occurrence of a name wins
    pub fn harvest(&self, page: &Page) -> IndexMap<String, String> {
        let mut table = IndexMap::new();
        for container in select_elements(page.root(), &self.container, self.is_xpath) {
            let name = select_elements(container, &self.name, self.is_xpath)
                .first()
                .map(|node| node.text())
                .unwrap_or_default();
            let name = name.trim().trim_end_matches(':').trim();
            if name.is_empty() || table.contains_key(name) {
                continue;
            }

            let values: Vec<String> = select_elements(container, &self.value, self.is_xpath)
                .iter()
                .map(|node| node.text())
                .filter(|text| !text.is_empty())
                .collect();
            table.insert(name.to_string(), values.join(&self.separator));
        }
        table
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CategoryRules {
    #[serde(alias = "category_links")]
    pub link_selectors: Vec<LinkRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ListingRules {
    #[serde(alias = "product_links")]
    pub product_link_selectors: Vec<LinkRule>,
    pub pagination: Vec<LinkRule>,
    /// Product cards; only counted by the preview
    pub product_item: Option<LinkRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProductRules {
    pub fields: IndexMap<String, ExtractionRule>,
    pub attributes: Vec<AttributeTableRule>,
}

impl ProductRules {
    fn sku_rule(&self) -> Option<&ExtractionRule> {
        self.fields
            .iter()
            .find(|(key, _)| Field::from_key(key) == Some(Field::SupplierSku))
            .map(|(_, rule)| rule)
    }

    /// Field values as plain strings, for the rule editor preview
    pub fn preview(&self, page: &Page) -> IndexMap<String, String> {
        let root = page.root();
        let mut values: IndexMap<String, String> = self
            .fields
            .iter()
            .map(|(key, rule)| (key.clone(), rule.evaluate(root)))
            .collect();
        for table in &self.attributes {
            let harvested = table.harvest(page);
            if !harvested.is_empty() {
                values.insert(
                    table.field.clone(),
                    serde_json::to_string(&harvested).unwrap_or_default(),
                );
            }
        }
        values
    }

    /// Build one record from a product page. Without a SKU rule the page URL
    /// is the SKU; a SKU rule that resolves empty rejects the page.
    pub fn extract(&self, page: &Page) -> Result<(CandidateRecord, Vec<String>)> {
        let root = page.root();
        let sku = match self.sku_rule() {
            Some(rule) => rule.evaluate(root).trim().to_string(),
            None => page.url().map(|u| u.to_string()).unwrap_or_default(),
        };
        if sku.is_empty() {
            return Err(CatalogError::RowItem("supplier_sku is empty".into()));
        }

        let mut builder = RecordBuilder::new(sku);
        for (key, rule) in &self.fields {
            if Field::from_key(key) == Some(Field::SupplierSku) {
                continue;
            }
            if let Some(value) = rule.field_value(key, root) {
                builder.set(key, value);
            }
        }
        for table in &self.attributes {
            let harvested = table.harvest(page);
            if !harvested.is_empty() {
                builder.set(&table.field, FieldValue::Map(harvested));
            }
        }
        Ok(builder.build())
    }
}

/// The three rule blocks of a scraper
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub categories: CategoryRules,
    pub listing: ListingRules,
    pub product: ProductRules,
}

impl RuleSet {
    /// One message per selector that can't be parsed, prefixed with the
    /// rule's location
    pub fn problems(&self) -> Vec<String> {
        let mut rules: Vec<(String, &str, bool)> = Vec::new();
        let link_blocks = [
            ("categories.link_selectors", &self.categories.link_selectors),
            ("listing.product_links", &self.listing.product_link_selectors),
            ("listing.pagination", &self.listing.pagination),
        ];
        for (block, list) in link_blocks {
            for (i, rule) in list.iter().enumerate() {
                rules.push((format!("{block}[{i}]"), rule.selector.as_str(), rule.is_xpath));
            }
        }
        if let Some(rule) = &self.listing.product_item {
            rules.push(("listing.product_item".into(), rule.selector.as_str(), rule.is_xpath));
        }
        for (name, rule) in &self.product.fields {
            rules.push((format!("product.fields.{name}"), rule.selector.as_str(), rule.is_xpath));
        }
        for (i, table) in self.product.attributes.iter().enumerate() {
            for (part, selector) in [
                ("container", &table.container),
                ("name", &table.name),
                ("value", &table.value),
            ] {
                let location = format!("product.attributes[{i}].{part}");
                rules.push((location, selector.as_str(), table.is_xpath));
            }
        }

        rules
            .into_iter()
            .filter_map(|(location, selector, is_xpath)| {
                let problem = selector_problem(selector, is_xpath)?;
                Some(format!("{location}: {problem}"))
            })
            .collect()
    }
}
