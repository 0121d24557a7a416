//! Price list import
//!
//! Picks the extractor for a file format, validates the extracted records
//! and hands the valid ones to a [`RecordSink`].

use serde::Serialize;
use std::path::Path;
use std::str::FromStr;

use crate::config::MappingDocument;
use crate::error::{CatalogError, Result};
use crate::extractors::{ExtractOutcome, StructuredExtractor, TabularExtractor, ERROR_PREVIEW_LEN};
use crate::record::Stats;
use crate::sink::{split_valid_invalid, InvalidRecord, RecordSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// xlsx, xls, ods
    Spreadsheet,
    Csv,
    /// XML and YML feeds
    Xml,
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "xlsx" | "xlsm" | "xls" | "ods" | "spreadsheet" => Ok(SourceFormat::Spreadsheet),
            "csv" | "tsv" | "txt" => Ok(SourceFormat::Csv),
            "xml" | "yml" => Ok(SourceFormat::Xml),
            other => Err(format!("unsupported file format `{other}`")),
        }
    }
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                CatalogError::Config(format!("{} has no file extension", path.display()))
            })?;
        ext.parse().map_err(CatalogError::Config)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Stop after this many records
    pub limit: Option<usize>,
}

/// Extract candidate records from one price list file
pub fn import_source(
    format: SourceFormat,
    bytes: &[u8],
    mapping: &MappingDocument,
    options: ImportOptions,
) -> Result<ExtractOutcome> {
    let source = &mapping.source_config;
    match format {
        SourceFormat::Spreadsheet => TabularExtractor::new(&mapping.fields, source.tabular()?)?
            .with_limit(options.limit)
            .extract_workbook(bytes),
        SourceFormat::Csv => TabularExtractor::new(&mapping.fields, source.tabular()?)?
            .with_limit(options.limit)
            .extract_csv(bytes, &source.csv()?),
        SourceFormat::Xml => {
            StructuredExtractor::new(&mapping.fields, &mapping.category_fields, source.xml()?)?
                .with_limit(options.limit)
                .extract(bytes)
        }
    }
}

/// Outcome of importing one price list into a sink
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub stats: Stats,
    /// First few extraction errors
    pub error_preview: Vec<String>,
    pub errors_total: usize,
    /// Spec problems found while compiling the mapping
    pub load_warnings: Vec<String>,
    #[serde(skip)]
    pub invalid: Vec<InvalidRecord>,
}

/// Extract, validate and upsert one price list
pub fn import_price_list<S: RecordSink + ?Sized>(
    sink: &mut S,
    supplier_id: i64,
    price_list_id: i64,
    format: SourceFormat,
    bytes: &[u8],
    mapping: &MappingDocument,
) -> Result<ImportReport> {
    let outcome = import_source(format, bytes, mapping, ImportOptions::default())?;
    let error_preview = outcome.error_preview(ERROR_PREVIEW_LEN);
    let errors_total = outcome.errors.len();

    let (valid, invalid) = split_valid_invalid(outcome.records);
    let mut stats = sink.upsert(supplier_id, Some(price_list_id), valid)?;
    stats.skipped += invalid.len();
    stats.warnings += errors_total + outcome.warnings.len();

    tracing::info!(
        supplier_id,
        price_list_id,
        inserted = stats.inserted,
        updated = stats.updated,
        skipped = stats.skipped,
        warnings = stats.warnings,
        "price list imported"
    );

    Ok(ImportReport {
        stats,
        error_preview,
        errors_total,
        load_warnings: outcome.warnings,
        invalid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use pretty_assertions::assert_eq;

    const CSV: &str = "sku;name;price\nA-1;Drill;10,5\nA-2;;7\n;Blank;1\nA-3;Saw;n/a\n";

    fn mapping() -> MappingDocument {
        MappingDocument::from_json_str(
            r#"{
                "supplier_sku": {"by": "header_name", "value": "SKU"},
                "name": {"by": "header_name", "value": "name"},
                "price_raw": {"by": "header_name", "value": "price"},
                "gtin": {"by": "col_index", "value": "zero"},
                "source_config": {"header": true}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            SourceFormat::from_path(Path::new("prices.XLSX")).unwrap(),
            SourceFormat::Spreadsheet
        );
        assert_eq!(SourceFormat::from_path(Path::new("feed.yml")).unwrap(), SourceFormat::Xml);
        assert!(SourceFormat::from_path(Path::new("notes.pdf")).is_err());
        assert!(SourceFormat::from_path(Path::new("README")).is_err());
    }

    #[test]
    fn test_import_source_limit() {
        let outcome = import_source(
            SourceFormat::Csv,
            CSV.as_bytes(),
            &mapping(),
            ImportOptions { limit: Some(2) },
        )
        .unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn test_import_price_list() {
        let mut sink = MemorySink::new();
        let report =
            import_price_list(&mut sink, 7, 70, SourceFormat::Csv, CSV.as_bytes(), &mapping())
                .unwrap();

        assert_eq!(report.stats.inserted, 2);
        assert_eq!(report.stats.skipped, 1);
        assert_eq!(report.stats.total(), 3);
        // one bad price plus one bad field spec
        assert_eq!(report.stats.warnings, 2);
        assert_eq!(
            report.error_preview,
            vec!["Row 5: price_raw: `n/a` is not a number".to_string()]
        );
        assert_eq!(report.invalid.len(), 1);
        assert_eq!(report.invalid[0].record.supplier_sku, "A-2");
        assert_eq!(sink.get(7, "A-1").unwrap().source_id, Some(70));
    }

    #[test]
    fn test_xml_without_items_path_is_config_error() {
        let mapping = MappingDocument::from_json_str(r#"{"supplier_sku": "@id"}"#).unwrap();
        let err = import_source(SourceFormat::Xml, b"<a/>", &mapping, ImportOptions::default())
            .unwrap_err();
        assert!(matches!(err, CatalogError::Config(_)));
    }
}
