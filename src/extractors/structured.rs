//! XML catalogs (YML and similar feeds)

use std::collections::HashMap;

use crate::config::XmlConfig;
use crate::error::{CatalogError, Result};
use crate::extractors::{fill, resolve_lenient, resolve_sku, ExtractOutcome};
use crate::mapping::{CompiledFields, Field, FieldMap, FieldSource, SourceKind};
use crate::record::{CandidateRecord, FieldValue};
use crate::xml::{XmlDocument, XmlNode};
use crate::xpath::XPath;

/// Category table entry, keyed by category id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryEntry {
    pub name: Option<String>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StructuredExtractor {
    fields: CompiledFields,
    category_fields: CompiledFields,
    config: XmlConfig,
    items: XPath,
    categories: Option<XPath>,
    limit: Option<usize>,
}

impl StructuredExtractor {
    pub fn new(mapping: &FieldMap, category_fields: &FieldMap, config: XmlConfig) -> Result<Self> {
        let fields = CompiledFields::compile(mapping, SourceKind::Xml);
        if fields.get(Field::SupplierSku).is_none() {
            return Err(CatalogError::Config("supplier_sku is not mapped".into()));
        }
        let items = XPath::parse(&config.items)
            .map_err(|e| CatalogError::Config(format!("containers.items: {e}")))?;
        let categories = config
            .categories
            .as_deref()
            .map(XPath::parse)
            .transpose()
            .map_err(|e| CatalogError::Config(format!("containers.categories: {e}")))?;

        Ok(Self {
            fields,
            category_fields: CompiledFields::compile(category_fields, SourceKind::Xml),
            config,
            items,
            categories,
            limit: None,
        })
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn extract(&self, bytes: &[u8]) -> Result<ExtractOutcome> {
        let doc = XmlDocument::parse(bytes)?;
        Ok(self.extract_document(&doc))
    }

    pub fn extract_document(&self, doc: &XmlDocument) -> ExtractOutcome {
        let mut outcome = ExtractOutcome {
            warnings: self.fields.warnings.clone(),
            ..Default::default()
        };
        outcome.warnings.extend(self.category_fields.warnings.iter().cloned());

        let categories = self.category_table(doc);
        let items = self.items.select_nodes(&doc.root(), &self.config.namespaces);
        tracing::debug!(
            items = items.len(),
            categories = categories.len(),
            "XML containers selected"
        );

        for item in items {
            if self.limit.is_some_and(|limit| outcome.records.len() >= limit) {
                break;
            }
            match self.item_record(item, &categories) {
                Ok(Some((record, warnings))) => {
                    outcome.errors.extend(
                        warnings
                            .into_iter()
                            .map(|w| format!("XML item error: {} {w}", record.supplier_sku)),
                    );
                    outcome.records.push(record);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "XML item skipped");
                    outcome.errors.push(format!("XML item error: {e}"));
                }
            }
        }

        tracing::info!(
            records = outcome.records.len(),
            errors = outcome.errors.len(),
            "XML extraction finished"
        );
        outcome
    }

    fn item_record(
        &self,
        item: XmlNode<'_>,
        categories: &HashMap<String, CategoryEntry>,
    ) -> Result<Option<(CandidateRecord, Vec<String>)>> {
        let node = item.bind(&self.config.namespaces);
        let Some(sku) = resolve_sku(&self.fields, &node)? else {
            return Ok(None);
        };

        let mut builder = fill(sku, &self.fields, &node)?;
        if builder.record().category_raw.is_none() {
            if let Some(spec) = self.fields.get(Field::CategoryIdRef) {
                let name = text_value(resolve_lenient(spec, &node)?)
                    .and_then(|id| categories.get(&id))
                    .and_then(|entry| entry.name.clone());
                if let Some(name) = name {
                    builder.set_field(Field::CategoryRaw, FieldValue::Text(name));
                }
            }
        }
        Ok(Some(builder.build()))
    }

    /// Category id -> entry; needs `containers.categories` and an `id` field
    pub fn category_table(&self, doc: &XmlDocument) -> HashMap<String, CategoryEntry> {
        let mut table = HashMap::new();
        let Some(path) = &self.categories else {
            return table;
        };
        let Some(id_spec) = self.category_fields.iter().find(|s| s.key == "id") else {
            return table;
        };
        let read = |key: &str, source: &dyn FieldSource| -> Option<String> {
            let spec = self.category_fields.iter().find(|s| s.key == key)?;
            text_value(resolve_lenient(spec, source).ok()?)
        };

        for node in path.select_nodes(&doc.root(), &self.config.namespaces) {
            let node = node.bind(&self.config.namespaces);
            let Some(id) = resolve_lenient(id_spec, &node).ok().and_then(text_value) else {
                continue;
            };
            table.entry(id).or_insert_with(|| CategoryEntry {
                name: read("name", &node),
                parent_id: read("parent_id", &node),
            });
        }
        table
    }
}

fn text_value(value: Option<FieldValue>) -> Option<String> {
    value
        .and_then(FieldValue::into_text)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
