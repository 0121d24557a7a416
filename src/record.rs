//! Candidate records and run statistics

use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::mapping::Field;
use crate::text_ops::parse_decimal;

/// Separator used when a list has to become a single string
pub const LIST_JOIN: &str = ", ";

/// A resolved field value before it is assigned to a record field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Map(IndexMap<String, String>),
}

impl FieldValue {
    /// Single-string view; lists are joined, maps become JSON
    pub fn into_text(self) -> Option<String> {
        let text = match self {
            FieldValue::Text(text) => text,
            FieldValue::List(items) => items.join(LIST_JOIN),
            FieldValue::Map(map) => serde_json::to_string(&map).ok()?,
        };
        Some(text)
    }

    pub fn into_list(self) -> Vec<String> {
        match self {
            FieldValue::Text(text) => vec![text],
            FieldValue::List(items) => items,
            FieldValue::Map(map) => map.into_values().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(text) => text.is_empty(),
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Map(map) => map.is_empty(),
        }
    }
}

/// One normalized product entry, prior to reconciliation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub supplier_sku: String,
    pub manufacturer_sku: Option<String>,
    pub mpn: Option<String>,
    pub gtin: Option<String>,
    pub ean: Option<String>,
    pub upc: Option<String>,
    pub jan: Option<String>,
    pub isbn: Option<String>,

    pub name: Option<String>,
    pub brand_raw: Option<String>,
    pub category_raw: Option<String>,
    pub short_description_raw: Option<String>,
    pub description_raw: Option<String>,

    pub price_raw: Option<Decimal>,
    pub currency_raw: Option<String>,
    pub qty_raw: Option<Decimal>,
    pub availability_text: Option<String>,
    pub delivery_terms: Option<String>,
    pub delivery_date: Option<String>,
    pub location: Option<String>,

    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub attributes_raw: IndexMap<String, String>,
}

impl CandidateRecord {
    pub fn new(supplier_sku: impl Into<String>) -> Self {
        Self {
            supplier_sku: supplier_sku.into(),
            ..Default::default()
        }
    }

    pub fn has_sku(&self) -> bool {
        !self.supplier_sku.trim().is_empty()
    }

    pub fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

/// Assigns resolved values to record fields, collecting coercion warnings
#[derive(Debug)]
pub struct RecordBuilder {
    record: CandidateRecord,
    warnings: Vec<String>,
}

impl RecordBuilder {
    pub fn new(supplier_sku: impl Into<String>) -> Self {
        Self {
            record: CandidateRecord::new(supplier_sku),
            warnings: Vec::new(),
        }
    }

    /// Assign by mapping key; unknown keys become custom attributes
    pub fn set(&mut self, key: &str, value: FieldValue) {
        match Field::from_key(key) {
            Some(field) => self.set_field(field, value),
            None => {
                if let Some(text) = value.into_text().filter(|t| !t.is_empty()) {
                    self.record.attributes_raw.insert(key.to_string(), text);
                }
            }
        }
    }

    pub fn set_field(&mut self, field: Field, value: FieldValue) {
        if value.is_empty() {
            return;
        }

        match field {
            // key and category reference are handled by the extractors
            Field::SupplierSku | Field::CategoryIdRef => {}
            Field::ImageUrls => self.record.image_urls = value.into_list(),
            Field::AttributesRaw => {
                let attrs = &mut self.record.attributes_raw;
                match value {
                    FieldValue::Map(map) => attrs.extend(map),
                    other => {
                        let text = other.into_text().unwrap_or_default();
                        match serde_json::from_str::<IndexMap<String, String>>(&text) {
                            Ok(map) => attrs.extend(map),
                            Err(_) => {
                                attrs.insert(Field::AttributesRaw.key().to_string(), text);
                            }
                        }
                    }
                }
            }
            Field::PriceRaw => {
                let price = self.number(field, value);
                self.record.price_raw = price;
            }
            Field::QtyRaw => {
                let qty = self.number(field, value);
                self.record.qty_raw = qty;
            }
            text_field => {
                let text = value.into_text();
                let r = &mut self.record;
                let slot = match text_field {
                    Field::ManufacturerSku => &mut r.manufacturer_sku,
                    Field::Mpn => &mut r.mpn,
                    Field::Gtin => &mut r.gtin,
                    Field::Ean => &mut r.ean,
                    Field::Upc => &mut r.upc,
                    Field::Jan => &mut r.jan,
                    Field::Isbn => &mut r.isbn,
                    Field::Name => &mut r.name,
                    Field::BrandRaw => &mut r.brand_raw,
                    Field::CategoryRaw => &mut r.category_raw,
                    Field::ShortDescriptionRaw => &mut r.short_description_raw,
                    Field::DescriptionRaw => &mut r.description_raw,
                    Field::CurrencyRaw => &mut r.currency_raw,
                    Field::AvailabilityText => &mut r.availability_text,
                    Field::DeliveryTerms => &mut r.delivery_terms,
                    Field::DeliveryDate => &mut r.delivery_date,
                    Field::Location => &mut r.location,
                    _ => return,
                };
                *slot = text;
            }
        }
    }

    fn number(&mut self, field: Field, value: FieldValue) -> Option<Decimal> {
        let text = value.into_list().into_iter().next()?;
        let parsed = parse_decimal(&text);
        if parsed.is_none() {
            self.warnings
                .push(format!("{}: `{}` is not a number", field.key(), text));
        }
        parsed
    }

    pub fn record(&self) -> &CandidateRecord {
        &self.record
    }

    pub fn build(self) -> (CandidateRecord, Vec<String>) {
        (self.record, self.warnings)
    }
}

/// Outcome counts of one extraction/upsert run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Parse/extraction issues; independent of record outcomes
    pub warnings: usize,
}

impl Stats {
    /// Number of records accounted for
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.skipped
    }

    pub fn merge(&mut self, other: Stats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.warnings += other.warnings;
    }
}
