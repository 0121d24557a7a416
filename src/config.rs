//! Typed configuration documents
//!
//! Mapping documents and scraper configs arrive as the JSON the mapping UI
//! stores. They are deserialized into the structs below and validated once,
//! before any row or page is touched.

use encoding_rs::Encoding;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{CatalogError, Result};
use crate::extractors::html_fields::RuleSet;
use crate::mapping::{FieldMap, MappingSpec};
use crate::xpath::Namespaces;

pub const DEFAULT_USER_AGENT: &str = "PriceCompProBot/1.0 (+https://example.local)";

/// Which worksheet of a workbook to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetSelector {
    Name(String),
    /// 1-based
    Index(usize),
}

impl Default for SheetSelector {
    fn default() -> Self {
        SheetSelector::Index(1)
    }
}

impl<'de> Deserialize<'de> for SheetSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error;

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(usize),
            Name(String),
            Full {
                #[serde(default)]
                by: Option<String>,
                #[serde(default)]
                value: Value,
            },
        }

        match Raw::deserialize(deserializer)? {
            Raw::Index(index) => Ok(SheetSelector::Index(index)),
            Raw::Name(name) => Ok(SheetSelector::Name(name)),
            Raw::Full { by, value } => {
                let by = by.unwrap_or_else(|| "index".to_string()).to_lowercase();
                match (by.as_str(), value) {
                    ("name", Value::String(name)) => Ok(SheetSelector::Name(name)),
                    ("index", Value::Null) => Ok(SheetSelector::Index(1)),
                    ("index", Value::Number(n)) => n
                        .as_u64()
                        .map(|n| SheetSelector::Index(n as usize))
                        .ok_or_else(|| D::Error::custom("sheet index must be a positive integer")),
                    ("index", Value::String(s)) => s
                        .trim()
                        .parse()
                        .map(SheetSelector::Index)
                        .map_err(|_| D::Error::custom("sheet index must be a positive integer")),
                    (by, _) => Err(D::Error::custom(format!("invalid sheet selector `{by}`"))),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Containers {
    /// Path selecting the repeated product nodes
    pub items: Option<String>,
    /// Path selecting category nodes for the id -> name lookup
    pub categories: Option<String>,
}

/// Format-specific knobs of a mapping, as stored
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub sheet: Option<SheetSelector>,
    pub header: Option<bool>,
    pub start_row: Option<usize>,
    pub delimiter: Option<String>,
    pub encoding: Option<String>,
    pub skip_rows: Option<usize>,
    pub namespaces: Namespaces,
    pub containers: Containers,
}

/// Spreadsheet layout, shared by xlsx and CSV sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularConfig {
    pub sheet: SheetSelector,
    /// Whether `start_row` holds column names
    pub header: bool,
    /// 1-based
    pub start_row: usize,
}

impl Default for TabularConfig {
    fn default() -> Self {
        Self {
            sheet: SheetSelector::default(),
            header: false,
            start_row: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CsvConfig {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
    /// Lines dropped before the grid starts
    pub skip_rows: usize,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: b';',
            encoding: encoding_rs::UTF_8,
            skip_rows: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlConfig {
    pub namespaces: Namespaces,
    pub items: String,
    pub categories: Option<String>,
}

impl SourceConfig {
    pub fn tabular(&self) -> Result<TabularConfig> {
        let start_row = self.start_row.unwrap_or(1);
        if start_row == 0 {
            return Err(CatalogError::Config("start_row is 1-based".into()));
        }
        let sheet = self.sheet.clone().unwrap_or_default();
        if sheet == SheetSelector::Index(0) {
            return Err(CatalogError::Config("sheet index is 1-based".into()));
        }
        Ok(TabularConfig {
            sheet,
            header: self.header.unwrap_or(false),
            start_row,
        })
    }

    pub fn csv(&self) -> Result<CsvConfig> {
        let delimiter = match self.delimiter.as_deref() {
            None | Some("") => b';',
            Some("\t") | Some("\\t") | Some("tab") => b'\t',
            Some(d) if d.len() == 1 && d.is_ascii() => d.as_bytes()[0],
            Some(d) => {
                return Err(CatalogError::Config(format!(
                    "CSV delimiter must be a single ASCII character, got `{d}`"
                )))
            }
        };

        let label = self.encoding.as_deref().unwrap_or("utf-8");
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| CatalogError::Config(format!("unknown encoding `{label}`")))?;

        Ok(CsvConfig {
            delimiter,
            encoding,
            skip_rows: self.skip_rows.unwrap_or(0),
        })
    }

    pub fn xml(&self) -> Result<XmlConfig> {
        let items = self
            .containers
            .items
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CatalogError::Config("containers.items is required for XML".into()))?;

        Ok(XmlConfig {
            namespaces: self.namespaces.clone(),
            items: items.to_string(),
            categories: self
                .containers
                .categories
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
        })
    }
}

/// A stored price-list mapping.
///
/// Accepts the nested shape `{product_fields|fields, category_fields,
/// source_config}` as well as a flat object whose keys are field names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Value")]
pub struct MappingDocument {
    pub fields: FieldMap,
    /// `id`, `name`, `parent_id` specs for XML category nodes
    pub category_fields: FieldMap,
    pub source_config: SourceConfig,
}

impl TryFrom<Value> for MappingDocument {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        let Value::Object(mut map) = value else {
            return Err("mapping must be a JSON object".to_string());
        };

        let source_config = match map.remove("source_config") {
            Some(Value::Null) | None => SourceConfig::default(),
            Some(v) => serde_json::from_value(v).map_err(|e| format!("source_config: {e}"))?,
        };
        let category_fields = match map.remove("category_fields") {
            Some(Value::Null) | None => FieldMap::new(),
            Some(v) => field_map(v).map_err(|e| format!("category_fields: {e}"))?,
        };
        let nested = map
            .remove("product_fields")
            .or_else(|| map.remove("fields"))
            .filter(|v| !v.is_null());

        let fields = match nested {
            Some(v) => field_map(v).map_err(|e| format!("product_fields: {e}"))?,
            // flat mapping; null entries mean "not mapped"
            None => field_map(Value::Object(map)).map_err(|e| format!("fields: {e}"))?,
        };

        Ok(MappingDocument {
            fields,
            category_fields,
            source_config,
        })
    }
}

fn field_map(value: Value) -> std::result::Result<FieldMap, serde_json::Error> {
    let raw: IndexMap<String, Option<MappingSpec>> = serde_json::from_value(value)?;
    Ok(raw
        .into_iter()
        .filter_map(|(key, spec)| spec.map(|spec| (key, spec)))
        .collect())
}

impl MappingDocument {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| CatalogError::Config(format!("invalid mapping: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}

/// Crawl politeness, limits and outputs
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScraperSettings {
    pub user_agent: String,
    /// Seconds to wait after every fetch
    #[serde(deserialize_with = "lenient_f64")]
    pub delay: f64,
    /// Per-request timeout in seconds
    pub timeout: u64,
    pub progress_every_pages: usize,
    pub progress_every_products: usize,
    pub max_pages: Option<usize>,
    pub max_products: Option<usize>,
    pub respect_robots: bool,
    pub sitemaps: Vec<String>,
    /// Only sitemap URLs matching this regex become product links
    pub product_url_pattern: Option<String>,
    pub output_dir: PathBuf,
    /// Block name -> URL used by the rule editor's preview
    pub test_urls: IndexMap<String, String>,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            delay: 0.0,
            timeout: 30,
            progress_every_pages: 5,
            progress_every_products: 10,
            max_pages: None,
            max_products: None,
            respect_robots: false,
            sitemaps: Vec::new(),
            product_url_pattern: None,
            output_dir: PathBuf::from("storage"),
            test_urls: IndexMap::new(),
        }
    }
}

/// Form inputs store numbers as strings
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0.0),
        Value::Number(n) => n.as_f64().ok_or_else(|| D::Error::custom("invalid number")),
        Value::String(s) if s.trim().is_empty() => Ok(0.0),
        Value::String(s) => s
            .trim()
            .replace(',', ".")
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid number `{s}`"))),
        other => Err(D::Error::custom(format!("expected a number, got {other}"))),
    }
}

impl ScraperSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.delay.is_finite() || self.delay < 0.0 {
            return Err(CatalogError::Config(format!("delay must be >= 0, got {}", self.delay)));
        }
        if self.timeout == 0 {
            return Err(CatalogError::Config("timeout must be positive".into()));
        }
        if self.progress_every_pages == 0 || self.progress_every_products == 0 {
            return Err(CatalogError::Config("progress intervals must be positive".into()));
        }
        self.product_url_regex()?;
        Ok(())
    }

    pub fn product_url_regex(&self) -> Result<Option<Regex>> {
        match self.product_url_pattern.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(pattern) => Regex::new(pattern)
                .map(Some)
                .map_err(|e| CatalogError::Config(format!("invalid product_url_pattern: {e}"))),
            None => Ok(None),
        }
    }
}

/// One scraper: seeds, settings and the three rule blocks
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    #[serde(deserialize_with = "url_list")]
    pub start_urls: Vec<String>,
    pub settings: ScraperSettings,
    pub rules: RuleSet,
}

/// A list, or one URL per line as the settings form submits it
fn url_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Lines(String),
        List(Vec<String>),
    }

    let urls = match Option::<Raw>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Raw::Lines(text)) => text.lines().map(String::from).collect(),
        Some(Raw::List(list)) => list,
    };
    Ok(urls
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect())
}

impl ScraperConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ScraperConfig = serde_json::from_str(json)
            .map_err(|e| CatalogError::Config(format!("invalid scraper config: {e}")))?;
        config.settings.validate()?;
        for problem in config.rules.problems() {
            tracing::warn!(%problem, "scraper rule matches nothing");
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Address;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_flat_mapping_document() {
        let doc = MappingDocument::from_json_str(
            r#"{
                "supplier_sku": {"by": "col_letter", "value": "A"},
                "name": "Name",
                "gtin": null,
                "source_config": {"sheet": {"by": "name", "value": "Прайс"}, "header": true, "start_row": 2}
            }"#,
        )
        .unwrap();

        assert_eq!(doc.fields.len(), 2);
        assert_eq!(doc.fields["supplier_sku"].address, Address::ColumnLetter("A".into()));
        let tabular = doc.source_config.tabular().unwrap();
        assert_eq!(tabular.sheet, SheetSelector::Name("Прайс".into()));
        assert!(tabular.header);
        assert_eq!(tabular.start_row, 2);
    }

    #[test]
    fn test_nested_xml_mapping_document() {
        let doc = MappingDocument::from_json_str(
            r#"{
                "product_fields": {"supplier_sku": {"by": "attr", "value": "@id"}},
                "category_fields": {"id": "@id", "name": "."},
                "source_config": {
                    "namespaces": {"g": "http://base.google.com/ns/1.0"},
                    "containers": {"items": "//offer", "categories": "//category"}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(doc.fields.len(), 1);
        assert_eq!(doc.category_fields.len(), 2);
        let xml = doc.source_config.xml().unwrap();
        assert_eq!(xml.items, "//offer");
        assert_eq!(xml.categories.as_deref(), Some("//category"));
        assert_eq!(xml.namespaces.len(), 1);
    }

    #[test]
    fn test_xml_requires_items_path() {
        let err = SourceConfig::default().xml().unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: containers.items is required for XML"
        );
    }

    #[test]
    fn test_csv_config() {
        let config = SourceConfig {
            delimiter: Some("tab".into()),
            encoding: Some("windows-1251".into()),
            skip_rows: Some(2),
            ..Default::default()
        }
        .csv()
        .unwrap();
        assert_eq!(config.delimiter, b'\t');
        assert_eq!(config.encoding, encoding_rs::WINDOWS_1251);
        assert_eq!(config.skip_rows, 2);

        let bad = SourceConfig {
            delimiter: Some(";;".into()),
            ..Default::default()
        };
        assert!(bad.csv().is_err());

        let bad = SourceConfig {
            encoding: Some("klingon".into()),
            ..Default::default()
        };
        assert!(bad.csv().is_err());
    }

    #[test]
    fn test_sheet_selector_forms() {
        let sheet: SheetSelector =
            serde_json::from_str(r#"{"by": "index", "value": "2"}"#).unwrap();
        assert_eq!(sheet, SheetSelector::Index(2));
        let sheet: SheetSelector = serde_json::from_str(r#""Sheet1""#).unwrap();
        assert_eq!(sheet, SheetSelector::Name("Sheet1".into()));
        assert!(serde_json::from_str::<SheetSelector>(r#"{"by": "color", "value": 1}"#).is_err());
    }

    #[test]
    fn test_scraper_settings_defaults() {
        let config = ScraperConfig::from_json_str(
            r#"{"start_urls": "https://shop.example.com/a\n\n https://shop.example.com/b ", "settings": {"delay": "0,5"}}"#,
        )
        .unwrap();
        assert_eq!(config.start_urls.len(), 2);
        assert_eq!(config.settings.delay, 0.5);
        assert_eq!(config.settings.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.settings.timeout, 30);
        assert_eq!(config.settings.progress_every_pages, 5);
        assert_eq!(config.settings.progress_every_products, 10);
        assert_eq!(config.settings.output_dir, PathBuf::from("storage"));
    }

    #[test]
    fn test_scraper_settings_validation() {
        assert!(ScraperConfig::from_json_str(r#"{"settings": {"delay": -1}}"#).is_err());
        for settings in [
            r#"{"settings": {"product_url_pattern": "("}}"#,
            r#"{"settings": {"progress_every_pages": 0}}"#,
        ] {
            assert!(ScraperConfig::from_json_str(settings).is_err(), "{settings}");
        }
    }
}
