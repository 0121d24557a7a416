//! Record extractors
//!
//! Each module turns one kind of source into candidate records:
//! spreadsheet grids, XML catalogs, and product pages reached by the crawler.

pub mod html_fields;
pub mod structured;
pub mod tabular;

pub use html_fields::{AttributeTableRule, ExtractionRule, ProductRules, RuleSet};
pub use structured::StructuredExtractor;
pub use tabular::{Grid, TabularExtractor};

use serde::Serialize;

use crate::error::{CatalogError, Result};
use crate::mapping::{CompiledFields, CompiledSpec, Field, FieldSource};
use crate::record::{FieldValue, RecordBuilder};

/// Number of errors surfaced inline; the rest go to the errors export
pub const ERROR_PREVIEW_LEN: usize = 5;

/// Records of one extraction run plus everything that went wrong on the way
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractOutcome {
    pub records: Vec<crate::record::CandidateRecord>,
    /// Per row/item failures, "Row 7: ..." / "XML item error: ..."
    pub errors: Vec<String>,
    /// Field specs that compiled to a no-op
    pub warnings: Vec<String>,
}

impl ExtractOutcome {
    pub fn error_preview(&self, n: usize) -> Vec<String> {
        self.errors.iter().take(n).cloned().collect()
    }
}

/// Resolve one spec; an address failure degrades to "no value".
pub(crate) fn resolve_lenient<S: FieldSource + ?Sized>(
    spec: &CompiledSpec,
    source: &S,
) -> Result<Option<FieldValue>> {
    match spec.resolve(source) {
        Ok(value) => Ok(value),
        Err(CatalogError::Address(reason)) => {
            tracing::debug!(field = %spec.key, reason = %reason, "field resolved to nothing");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Resolve the SKU spec to a trimmed, non-empty string
pub(crate) fn resolve_sku<S: FieldSource + ?Sized>(
    fields: &CompiledFields,
    source: &S,
) -> Result<Option<String>> {
    let Some(spec) = fields.get(Field::SupplierSku) else {
        return Ok(None);
    };
    Ok(resolve_lenient(spec, source)?
        .and_then(FieldValue::into_text)
        .map(|sku| sku.trim().to_string())
        .filter(|sku| !sku.is_empty()))
}

/// Assign every mapped field except the SKU to a new record builder
pub(crate) fn fill<S: FieldSource + ?Sized>(
    sku: String,
    fields: &CompiledFields,
    source: &S,
) -> Result<RecordBuilder> {
    let mut builder = RecordBuilder::new(sku);
    for spec in fields.iter() {
        if spec.field == Some(Field::SupplierSku) {
            continue;
        }
        if let Some(value) = resolve_lenient(spec, source)? {
            builder.set(&spec.key, value);
        }
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{
        Address, CompiledAddress, FieldMap, FieldOptions, MappingSpec, RawValue, SourceKind,
    };

    struct Failing;

    impl FieldSource for Failing {
        fn resolve_raw(&self, _: &CompiledAddress, _: &FieldOptions) -> Result<Option<RawValue>> {
            Err(CatalogError::Address("no such node".into()))
        }
    }

    #[test]
    fn test_address_errors_degrade_to_no_value() {
        let mut map = FieldMap::new();
        map.insert("supplier_sku".into(), MappingSpec::new(Address::Literal(" SKU-1 ".into())));
        map.insert("name".into(), MappingSpec::new(Address::HeaderName("Name".into())));
        let fields = CompiledFields::compile(&map, SourceKind::Tabular);

        let sku = resolve_sku(&fields, &Failing).unwrap();
        assert_eq!(sku.as_deref(), Some("SKU-1"));

        let (record, warnings) = fill("SKU-1".into(), &fields, &Failing).unwrap().build();
        assert_eq!(record.name, None);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_error_preview_is_bounded() {
        let outcome = ExtractOutcome {
            errors: (1..=8).map(|n| format!("Row {n}: boom")).collect(),
            ..Default::default()
        };
        assert_eq!(outcome.error_preview(ERROR_PREVIEW_LEN).len(), 5);
        assert_eq!(outcome.error_preview(ERROR_PREVIEW_LEN)[0], "Row 1: boom");
    }
}
