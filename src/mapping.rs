//! Declarative field mapping
//!
//! A mapping is one [`MappingSpec`] per logical field. The JSON shape is the
//! `{by, value, options}` triple the mapping UI stores; a bare string is an
//! implicit address (header name for tabular sources, XPath for XML).
//!
//! Specs are compiled once per run into [`CompiledSpec`]s. A spec that
//! cannot be compiled (unknown mode, bad index, bad selector, bad regex)
//! still compiles, to a no-op that always resolves to "no value", and the
//! problem is reported once as a load warning.

use indexmap::IndexMap;
use scraper::Selector;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::record::FieldValue;
use crate::text_ops::{split_list, TextOps};
use crate::xpath::XPath;

/// Where a field's value lives in the source document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// Spreadsheet column letters, `A` = 1, `AA` = 27
    ColumnLetter(String),
    /// 1-based column number
    ColumnIndex(usize),
    /// Case-insensitive header cell text
    HeaderName(String),
    XPath(String),
    /// Every match of the expression, in document order
    XPathList(String),
    /// Attribute of the current element, without the leading `@`
    Attribute(String),
    CssSelector(String),
    Literal(String),
    /// Bare string spec; meaning depends on the source kind
    Implicit(String),
    /// Spec that failed validation; resolves to nothing
    Invalid(String),
}

/// Post-processing and rendering options of one field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldOptions {
    /// Separator that turns the value into a list
    pub split: Option<String>,
    pub regex: Option<String>,
    #[serde(alias = "delete_text")]
    pub delete_text: Option<String>,
    #[serde(alias = "find_text")]
    pub find_text: Option<String>,
    #[serde(alias = "replace_text")]
    pub replace_text: Option<String>,
    #[serde(alias = "get_html")]
    pub get_html: bool,
    #[serde(alias = "inner_html")]
    pub inner_html: bool,
    #[serde(alias = "allowed_tags", deserialize_with = "deserialize_tags")]
    pub allowed_tags: Option<Vec<String>>,
    #[serde(alias = "remove_links")]
    pub remove_links: bool,
    #[serde(alias = "make_absolute")]
    pub make_absolute: bool,
    /// Attribute to read from CSS/XPath matches instead of their text
    pub attr: Option<String>,
}

/// Accepts `"p, ul li"` as well as `["p", "ul", "li"]`
fn deserialize_tags<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tags {
        Text(String),
        List(Vec<String>),
    }

    let tags = match Option::<Tags>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(Tags::Text(text)) => text
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(String::from)
            .collect::<Vec<_>>(),
        Some(Tags::List(list)) => list,
    };

    let tags: Vec<String> = tags
        .iter()
        .map(|t| t.trim().trim_matches(|c| c == '<' || c == '>').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    Ok(if tags.is_empty() { None } else { Some(tags) })
}

/// One field's addressing mode, payload and options
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawSpec")]
pub struct MappingSpec {
    pub address: Address,
    pub options: FieldOptions,
}

impl MappingSpec {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            options: FieldOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FieldOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSpec {
    Implicit(String),
    Full {
        by: String,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        options: Option<FieldOptions>,
    },
}

impl From<RawSpec> for MappingSpec {
    fn from(raw: RawSpec) -> Self {
        match raw {
            RawSpec::Implicit(text) => {
                let text = text.trim().to_string();
                let address = if text.is_empty() {
                    Address::Invalid("empty field spec".to_string())
                } else {
                    Address::Implicit(text)
                };
                MappingSpec::new(address)
            }
            RawSpec::Full { by, value, options } => MappingSpec {
                address: address_from_raw(&by, &value),
                options: options.unwrap_or_default(),
            },
        }
    }
}

fn address_from_raw(by: &str, value: &Value) -> Address {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    };
    let text = raw.trim().to_string();
    let mode = by.trim().to_lowercase();

    if mode == "literal" || mode == "const" {
        return Address::Literal(raw);
    }
    if text.is_empty() {
        return Address::Invalid(format!("empty value for mode `{mode}`"));
    }

    match mode.as_str() {
        "column_letter" | "col_letter" => Address::ColumnLetter(text),
        "column_index" | "col_index" => match text.parse::<usize>() {
            Ok(index) if index >= 1 => Address::ColumnIndex(index),
            _ => Address::Invalid(format!("column index `{text}` is not a positive integer")),
        },
        "header_name" | "header" => Address::HeaderName(text),
        "xpath" | "text" => Address::XPath(text),
        "xpath_list" => Address::XPathList(text),
        "attribute" | "attr" => {
            let name = text.trim_start_matches('@').trim().to_string();
            if name.is_empty() {
                Address::Invalid("empty attribute name".to_string())
            } else {
                Address::Attribute(name)
            }
        }
        "css_selector" | "css" => Address::CssSelector(text),
        other => Address::Invalid(format!("unknown address mode `{other}`")),
    }
}

/// Logical fields of a candidate record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    SupplierSku,
    ManufacturerSku,
    Mpn,
    Gtin,
    Ean,
    Upc,
    Jan,
    Isbn,
    Name,
    BrandRaw,
    CategoryRaw,
    /// Category id resolved through the XML category table
    CategoryIdRef,
    ShortDescriptionRaw,
    DescriptionRaw,
    PriceRaw,
    CurrencyRaw,
    QtyRaw,
    AvailabilityText,
    DeliveryTerms,
    DeliveryDate,
    Location,
    ImageUrls,
    AttributesRaw,
}

impl Field {
    pub const ALL: [Field; 23] = [
        Field::SupplierSku,
        Field::ManufacturerSku,
        Field::Mpn,
        Field::Gtin,
        Field::Ean,
        Field::Upc,
        Field::Jan,
        Field::Isbn,
        Field::Name,
        Field::BrandRaw,
        Field::CategoryRaw,
        Field::CategoryIdRef,
        Field::ShortDescriptionRaw,
        Field::DescriptionRaw,
        Field::PriceRaw,
        Field::CurrencyRaw,
        Field::QtyRaw,
        Field::AvailabilityText,
        Field::DeliveryTerms,
        Field::DeliveryDate,
        Field::Location,
        Field::ImageUrls,
        Field::AttributesRaw,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Field::SupplierSku => "supplier_sku",
            Field::ManufacturerSku => "manufacturer_sku",
            Field::Mpn => "mpn",
            Field::Gtin => "gtin",
            Field::Ean => "ean",
            Field::Upc => "upc",
            Field::Jan => "jan",
            Field::Isbn => "isbn",
            Field::Name => "name",
            Field::BrandRaw => "brand_raw",
            Field::CategoryRaw => "category_raw",
            Field::CategoryIdRef => "category_id_ref",
            Field::ShortDescriptionRaw => "short_description_raw",
            Field::DescriptionRaw => "description_raw",
            Field::PriceRaw => "price_raw",
            Field::CurrencyRaw => "currency_raw",
            Field::QtyRaw => "qty_raw",
            Field::AvailabilityText => "availability_text",
            Field::DeliveryTerms => "delivery_terms",
            Field::DeliveryDate => "delivery_date",
            Field::Location => "location",
            Field::ImageUrls => "image_urls",
            Field::AttributesRaw => "attributes_raw",
        }
    }

    /// Canonical keys plus the short names used by scraper rule sets
    pub fn from_key(key: &str) -> Option<Field> {
        let key = key.trim().to_lowercase();
        if let Some(field) = Field::ALL.iter().find(|f| f.key() == key) {
            return Some(*field);
        }
        let field = match key.as_str() {
            "sku" => Field::SupplierSku,
            "price" => Field::PriceRaw,
            "currency" => Field::CurrencyRaw,
            "qty" | "quantity" => Field::QtyRaw,
            "availability" => Field::AvailabilityText,
            "manufacturer" | "brand" => Field::BrandRaw,
            "category" => Field::CategoryRaw,
            "description" => Field::DescriptionRaw,
            "short_description" => Field::ShortDescriptionRaw,
            "images" | "image" => Field::ImageUrls,
            "attributes" => Field::AttributesRaw,
            _ => return None,
        };
        Some(field)
    }
}

/// Field key -> spec, in the order the user configured them
pub type FieldMap = IndexMap<String, MappingSpec>;

/// `A` -> 1, `Z` -> 26, `AA` -> 27, case-insensitive; 0 for anything else
pub fn column_letter_to_index(letters: &str) -> usize {
    let letters = letters.trim();
    if letters.is_empty() {
        return 0;
    }

    let mut index: usize = 0;
    for ch in letters.chars() {
        let ch = ch.to_ascii_uppercase();
        if !ch.is_ascii_uppercase() {
            return 0;
        }
        let digit = (ch as usize) - ('A' as usize) + 1;
        index = match index.checked_mul(26).and_then(|n| n.checked_add(digit)) {
            Some(n) => n,
            None => return 0,
        };
    }
    index
}

/// Kind of document a mapping is resolved against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Tabular,
    Xml,
    Html,
}

/// An address prepared for repeated resolution
#[derive(Debug, Clone)]
pub enum CompiledAddress {
    /// 1-based column; 0 never resolves
    Column(usize),
    /// Lowercased header name
    Header(String),
    XPath(XPath),
    XPathList(XPath),
    Attribute(String),
    Css(Selector),
    Literal(String),
    Invalid(String),
}

/// Raw value produced by a source before text ops run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    One(String),
    Many(Vec<String>),
}

/// A document handle addresses can be resolved against: a spreadsheet row,
/// an XML element or an HTML element.
pub trait FieldSource {
    fn resolve_raw(
        &self,
        address: &CompiledAddress,
        options: &FieldOptions,
    ) -> Result<Option<RawValue>>;
}

#[derive(Debug, Clone)]
pub struct CompiledSpec {
    pub key: String,
    pub field: Option<Field>,
    pub address: CompiledAddress,
    pub options: FieldOptions,
    ops: TextOps,
}

impl CompiledSpec {
    /// Compile one spec for a source kind. Never fails; problems become an
    /// `Invalid` address.
    pub fn compile(key: &str, spec: &MappingSpec, kind: SourceKind) -> Self {
        let (address, ops) = match TextOps::from_options(&spec.options) {
            Ok(ops) => (compile_address(&spec.address, kind), ops),
            Err(e) => (CompiledAddress::Invalid(e.to_string()), TextOps::default()),
        };

        Self {
            key: key.to_string(),
            field: Field::from_key(key),
            address,
            options: spec.options.clone(),
            ops,
        }
    }

    /// Compiled from a literal; used for constant fields in tests and rules
    pub fn literal(key: &str, value: &str) -> Self {
        Self::compile(
            key,
            &MappingSpec::new(Address::Literal(value.to_string())),
            SourceKind::Tabular,
        )
    }

    pub fn invalid_reason(&self) -> Option<&str> {
        match &self.address {
            CompiledAddress::Invalid(reason) => Some(reason),
            CompiledAddress::Column(0) => Some("column letters must be A-Z"),
            _ => None,
        }
    }

    /// Resolve against a source and run the text pipeline.
    pub fn resolve<S: FieldSource + ?Sized>(&self, source: &S) -> Result<Option<FieldValue>> {
        let raw = match &self.address {
            CompiledAddress::Invalid(_) | CompiledAddress::Column(0) => None,
            // literals are taken verbatim unless the mapping asks for text ops
            CompiledAddress::Literal(value) if self.literal_verbatim() => {
                return Ok((!value.is_empty()).then(|| FieldValue::Text(value.clone())));
            }
            CompiledAddress::Literal(value) => Some(RawValue::One(value.clone())),
            address => source.resolve_raw(address, &self.options)?,
        };

        Ok(raw.and_then(|raw| self.finish(raw)))
    }

    /// Resolve to a single string; lists are joined with ", "
    pub fn resolve_text<S: FieldSource + ?Sized>(&self, source: &S) -> Result<Option<String>> {
        Ok(self
            .resolve(source)?
            .and_then(|value| value.into_text())
            .filter(|text| !text.is_empty()))
    }

    fn literal_verbatim(&self) -> bool {
        self.ops.is_noop() && self.options.split.as_deref().map_or(true, str::is_empty)
    }

    fn finish(&self, raw: RawValue) -> Option<FieldValue> {
        match raw {
            RawValue::One(value) => {
                let value = self.ops.apply(&value);
                if value.is_empty() {
                    return None;
                }
                match split_list(Some(&value), self.options.split.as_deref()) {
                    Some(parts) if parts.is_empty() => None,
                    Some(parts) => Some(FieldValue::List(parts)),
                    None => Some(FieldValue::Text(value)),
                }
            }
            RawValue::Many(values) => {
                let values: Vec<String> = values
                    .iter()
                    .map(|v| self.ops.apply(v))
                    .filter(|v| !v.is_empty())
                    .collect();
                if values.is_empty() {
                    None
                } else {
                    Some(FieldValue::List(values))
                }
            }
        }
    }
}

fn compile_address(address: &Address, kind: SourceKind) -> CompiledAddress {
    let unsupported = |mode: &str| {
        CompiledAddress::Invalid(format!(
            "`{mode}` addressing is not available for {kind:?} sources"
        ))
    };

    match address {
        Address::Invalid(reason) => CompiledAddress::Invalid(reason.clone()),
        Address::Literal(value) => CompiledAddress::Literal(value.clone()),
        Address::ColumnLetter(letters) => match kind {
            SourceKind::Tabular => CompiledAddress::Column(column_letter_to_index(letters)),
            _ => unsupported("column_letter"),
        },
        Address::ColumnIndex(index) => match kind {
            SourceKind::Tabular => CompiledAddress::Column(*index),
            _ => unsupported("column_index"),
        },
        Address::HeaderName(name) => match kind {
            SourceKind::Tabular => CompiledAddress::Header(name.trim().to_lowercase()),
            _ => unsupported("header_name"),
        },
        Address::XPath(expr) => compile_xpath(expr, kind, false),
        Address::XPathList(expr) => compile_xpath(expr, kind, true),
        Address::Attribute(name) => match kind {
            SourceKind::Tabular => unsupported("attribute"),
            _ => CompiledAddress::Attribute(name.clone()),
        },
        Address::CssSelector(selector) => match kind {
            SourceKind::Html => compile_css(selector),
            _ => unsupported("css_selector"),
        },
        Address::Implicit(text) => match kind {
            SourceKind::Tabular => CompiledAddress::Header(text.trim().to_lowercase()),
            SourceKind::Xml => compile_xpath(text, kind, false),
            SourceKind::Html => compile_css(text),
        },
    }
}

fn compile_xpath(expr: &str, kind: SourceKind, list: bool) -> CompiledAddress {
    if kind == SourceKind::Tabular {
        return CompiledAddress::Invalid(
            "XPath addressing is not available for tabular sources".into(),
        );
    }
    match XPath::parse(expr) {
        Ok(xpath) if list => CompiledAddress::XPathList(xpath),
        Ok(xpath) => CompiledAddress::XPath(xpath),
        Err(e) => CompiledAddress::Invalid(e.to_string()),
    }
}

fn compile_css(selector: &str) -> CompiledAddress {
    match Selector::parse(selector) {
        Ok(sel) => CompiledAddress::Css(sel),
        Err(e) => CompiledAddress::Invalid(format!("invalid CSS selector `{selector}`: {e}")),
    }
}

/// All specs of a mapping, compiled for one source kind
#[derive(Debug, Clone, Default)]
pub struct CompiledFields {
    specs: Vec<CompiledSpec>,
    /// One line per spec that compiled to a no-op
    pub warnings: Vec<String>,
}

impl CompiledFields {
    pub fn compile(map: &FieldMap, kind: SourceKind) -> Self {
        let mut specs = Vec::with_capacity(map.len());
        let mut warnings = Vec::new();

        for (key, spec) in map {
            let compiled = CompiledSpec::compile(key, spec, kind);
            if let Some(reason) = compiled.invalid_reason() {
                tracing::warn!(field = %key, reason = %reason, "field spec ignored");
                warnings.push(format!("Field `{key}`: {reason}"));
            }
            specs.push(compiled);
        }

        Self { specs, warnings }
    }

    pub fn get(&self, field: Field) -> Option<&CompiledSpec> {
        self.specs.iter().find(|spec| spec.field == Some(field))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledSpec> {
        self.specs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
