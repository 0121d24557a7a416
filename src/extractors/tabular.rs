//! Spreadsheet and CSV price lists
//!
//! Both formats are first loaded into a [`Grid`] of trimmed cell strings;
//! the extractor then walks the grid row by row.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::collections::HashMap;
use std::io::Cursor;

use crate::config::{CsvConfig, SheetSelector, TabularConfig};
use crate::error::{CatalogError, Result};
use crate::extractors::{fill, resolve_sku, ExtractOutcome};
use crate::mapping::{
    CompiledAddress, CompiledFields, Field, FieldMap, FieldOptions, FieldSource, RawValue,
    SourceKind,
};

/// Rows of cell strings addressed 1-based; empty cells are `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grid {
    rows: Vec<Vec<Option<String>>>,
}

impl Grid {
    pub fn from_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(|cell| clean_cell(cell.as_ref())).collect())
                .collect(),
        }
    }

    /// Index of the last row, which is also the row count
    pub fn last_row(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, row: usize) -> Option<&[Option<String>]> {
        row.checked_sub(1).and_then(|i| self.rows.get(i)).map(Vec::as_slice)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        let cells = self.row(row)?;
        col.checked_sub(1).and_then(|i| cells.get(i))?.as_deref()
    }
}

fn clean_cell(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Load one worksheet of an xlsx/xls/ods workbook
pub fn load_workbook(bytes: &[u8], sheet: &SheetSelector) -> Result<Grid> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| CatalogError::Fatal(format!("cannot open workbook: {e}")))?;

    let names = workbook.sheet_names();
    let name = match sheet {
        SheetSelector::Name(name) => names
            .iter()
            .find(|n| n.as_str() == name || n.trim().eq_ignore_ascii_case(name.trim()))
            .cloned()
            .ok_or_else(|| CatalogError::Fatal(format!("sheet `{name}` not found")))?,
        SheetSelector::Index(index) => index
            .checked_sub(1)
            .and_then(|i| names.get(i))
            .cloned()
            .ok_or_else(|| {
                CatalogError::Fatal(format!(
                    "sheet #{index} not found, workbook has {}",
                    names.len()
                ))
            })?,
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| CatalogError::Fatal(format!("cannot read sheet `{name}`: {e}")))?;

    // ranges start at the first populated cell, not at A1
    let (row_offset, col_offset) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));

    let mut rows: Vec<Vec<Option<String>>> = vec![Vec::new(); row_offset];
    for cells in range.rows() {
        let mut row: Vec<Option<String>> = vec![None; col_offset];
        row.extend(cells.iter().map(cell_text));
        rows.push(row);
    }

    tracing::debug!(sheet = %name, rows = rows.len(), "worksheet loaded");
    Ok(Grid { rows })
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => clean_cell(s),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        other => clean_cell(&other.to_string()),
    }
}

/// Decode and split a delimited text file
pub fn load_csv(bytes: &[u8], config: &CsvConfig) -> Result<Grid> {
    let (text, encoding, had_errors) = config.encoding.decode(bytes);
    if had_errors {
        tracing::warn!(encoding = encoding.name(), "CSV contains bytes invalid for its encoding");
    }

    let mut body: &str = &text;
    for _ in 0..config.skip_rows {
        body = match body.find('\n') {
            Some(pos) => &body[pos + 1..],
            None => "",
        };
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            let line = i + 1 + config.skip_rows;
            CatalogError::Fatal(format!("CSV parse error at line {line}: {e}"))
        })?;
        rows.push(record.iter().map(clean_cell).collect());
    }
    Ok(Grid { rows })
}

/// One grid row as a field source
struct RowRef<'a> {
    cells: &'a [Option<String>],
    headers: &'a HashMap<String, usize>,
}

impl RowRef<'_> {
    fn column(&self, col: usize) -> Option<RawValue> {
        col.checked_sub(1)
            .and_then(|i| self.cells.get(i))
            .and_then(|cell| cell.clone())
            .map(RawValue::One)
    }
}

impl FieldSource for RowRef<'_> {
    fn resolve_raw(&self, address: &CompiledAddress, _: &FieldOptions) -> Result<Option<RawValue>> {
        match address {
            CompiledAddress::Column(col) => Ok(self.column(*col)),
            CompiledAddress::Header(name) => match self.headers.get(name) {
                Some(col) => Ok(self.column(*col)),
                None => Err(CatalogError::Address(format!("no column with header `{name}`"))),
            },
            other => Err(CatalogError::Address(format!(
                "{other:?} cannot be resolved against a spreadsheet row"
            ))),
        }
    }
}

/// Turns grid rows into candidate records
#[derive(Debug, Clone)]
pub struct TabularExtractor {
    fields: CompiledFields,
    config: TabularConfig,
    limit: Option<usize>,
}

impl TabularExtractor {
    pub fn new(mapping: &FieldMap, config: TabularConfig) -> Result<Self> {
        let fields = CompiledFields::compile(mapping, SourceKind::Tabular);
        if fields.get(Field::SupplierSku).is_none() {
            return Err(CatalogError::Config("supplier_sku is not mapped".into()));
        }
        Ok(Self {
            fields,
            config,
            limit: None,
        })
    }

    /// Stop after this many records
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn extract_workbook(&self, bytes: &[u8]) -> Result<ExtractOutcome> {
        let grid = load_workbook(bytes, &self.config.sheet)?;
        Ok(self.extract(&grid))
    }

    pub fn extract_csv(&self, bytes: &[u8], csv: &CsvConfig) -> Result<ExtractOutcome> {
        let grid = load_csv(bytes, csv)?;
        Ok(self.extract(&grid))
    }

    pub fn extract(&self, grid: &Grid) -> ExtractOutcome {
        let mut outcome = ExtractOutcome {
            warnings: self.fields.warnings.clone(),
            ..Default::default()
        };

        let headers = if self.config.header {
            header_map(grid.row(self.config.start_row).unwrap_or_default())
        } else {
            HashMap::new()
        };
        let first = if self.config.header {
            self.config.start_row + 1
        } else {
            self.config.start_row
        };

        for n in first..=grid.last_row() {
            if self.limit.is_some_and(|limit| outcome.records.len() >= limit) {
                break;
            }
            let Some(cells) = grid.row(n) else { continue };
            let row = RowRef {
                cells,
                headers: &headers,
            };

            let result = resolve_sku(&self.fields, &row).and_then(|sku| match sku {
                Some(sku) => fill(sku, &self.fields, &row).map(Some),
                None => Ok(None),
            });

            match result {
                Ok(Some(builder)) => {
                    let (record, warnings) = builder.build();
                    outcome
                        .errors
                        .extend(warnings.into_iter().map(|w| format!("Row {n}: {w}")));
                    outcome.records.push(record);
                }
                // blank rows are expected in price lists
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(row = n, error = %e, "row skipped");
                    outcome.errors.push(format!("Row {n}: {e}"));
                }
            }
        }

        tracing::info!(
            records = outcome.records.len(),
            errors = outcome.errors.len(),
            "tabular extraction finished"
        );
        outcome
    }
}

/// Lowercased header text -> 1-based column; first occurrence wins
fn header_map(cells: &[Option<String>]) -> HashMap<String, usize> {
    let mut headers = HashMap::new();
    for (i, cell) in cells.iter().enumerate() {
        if let Some(name) = cell {
            headers.entry(name.trim().to_lowercase()).or_insert(i + 1);
        }
    }
    headers
}
