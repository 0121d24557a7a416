//! CSV export of candidate records
//!
//! Files are UTF-8 with a byte-order mark and `;` separated, so spreadsheet
//! applications open them without an import dialog.

use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::record::CandidateRecord;
use crate::sink::InvalidRecord;

const BOM: &[u8] = b"\xEF\xBB\xBF";

pub const DELIMITER: u8 = b';';

/// Leading columns, in this order
pub const FIXED_COLUMNS: [&str; 8] = [
    "supplier_sku",
    "name",
    "price",
    "currency",
    "availability",
    "manufacturer",
    "category",
    "image_urls",
];

/// Separator of `image_urls` inside one cell
pub const IMAGE_SEPARATOR: &str = "|";

pub const REASON_COLUMN: &str = "__reason";

/// Column -> value of one record; empty values are left out
pub fn record_row(record: &CandidateRecord) -> IndexMap<String, String> {
    let mut row = IndexMap::new();
    let mut put = |key: &str, value: Option<String>| {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            row.insert(key.to_string(), value);
        }
    };

    put("supplier_sku", Some(record.supplier_sku.clone()));
    put("name", record.name.clone());
    put("price", record.price_raw.map(|p| p.to_string()));
    put("currency", record.currency_raw.clone());
    put("availability", record.availability_text.clone());
    put("manufacturer", record.brand_raw.clone());
    put("category", record.category_raw.clone());
    put("image_urls", Some(record.image_urls.join(IMAGE_SEPARATOR)));

    put("manufacturer_sku", record.manufacturer_sku.clone());
    put("mpn", record.mpn.clone());
    put("gtin", record.gtin.clone());
    put("ean", record.ean.clone());
    put("upc", record.upc.clone());
    put("jan", record.jan.clone());
    put("isbn", record.isbn.clone());
    put("short_description", record.short_description_raw.clone());
    put("description", record.description_raw.clone());
    put("qty", record.qty_raw.map(|q| q.to_string()));
    put("delivery_terms", record.delivery_terms.clone());
    put("delivery_date", record.delivery_date.clone());
    put("location", record.location.clone());

    for (key, value) in &record.attributes_raw {
        if !value.is_empty() && !row.contains_key(key) {
            row.insert(key.clone(), value.clone());
        }
    }
    row
}

/// Fixed columns followed by every other column in sorted order
pub fn columns<'a, I>(rows: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a IndexMap<String, String>>,
{
    let extra: BTreeSet<&String> = rows
        .into_iter()
        .flat_map(|row| row.keys())
        .filter(|key| !FIXED_COLUMNS.contains(&key.as_str()))
        .collect();

    FIXED_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(extra.into_iter().cloned())
        .collect()
}

fn write_table<W: Write>(mut writer: W, header: &[String], rows: &[Vec<String>]) -> Result<()> {
    writer.write_all(BOM)?;
    let mut csv = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .from_writer(writer);
    csv.write_record(header)?;
    for row in rows {
        csv.write_record(row)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_records<W: Write>(writer: W, records: &[CandidateRecord]) -> Result<()> {
    let rows: Vec<IndexMap<String, String>> = records.iter().map(record_row).collect();
    let header = columns(&rows);
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            header
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or_default())
                .collect()
        })
        .collect();
    write_table(writer, &header, &cells)
}

/// Rejected records with the rejection reason as the first column
pub fn write_errors<W: Write>(writer: W, invalid: &[InvalidRecord]) -> Result<()> {
    let rows: Vec<IndexMap<String, String>> =
        invalid.iter().map(|i| record_row(&i.record)).collect();
    let mut header = vec![REASON_COLUMN.to_string()];
    header.extend(columns(&rows));

    let cells: Vec<Vec<String>> = invalid
        .iter()
        .zip(&rows)
        .map(|(item, row)| {
            std::iter::once(item.reason.clone())
                .chain(header[1..].iter().map(|c| row.get(c).cloned().unwrap_or_default()))
                .collect()
        })
        .collect();
    write_table(writer, &header, &cells)
}

/// A written export and how the UI links to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub path: PathBuf,
    /// Relative to the output directory, `scrapers/<name>.csv`
    pub rel_path: String,
    /// `/storage/<rel_path>`
    pub file_url: String,
}

/// Write records to `output_dir/scrapers/scrape_<timestamp>.csv`
pub fn export_to_dir(output_dir: &Path, records: &[CandidateRecord]) -> Result<ExportedFile> {
    let dir = output_dir.join("scrapers");
    std::fs::create_dir_all(&dir)?;

    let name = format!("scrape_{}.csv", chrono::Local::now().format("%Y%m%d_%H%M%S_%3f"));
    let path = dir.join(&name);
    let file = std::fs::File::create(&path)?;
    write_records(std::io::BufWriter::new(file), records)?;

    let rel_path = format!("scrapers/{name}");
    tracing::info!(path = %path.display(), records = records.len(), "records exported");
    Ok(ExportedFile {
        path,
        file_url: format!("/storage/{rel_path}"),
        rel_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn drill() -> CandidateRecord {
        let mut record = CandidateRecord::new("D-1");
        record.name = Some("Drill; cordless".into());
        record.price_raw = Some(Decimal::new(999, 2));
        record.image_urls = vec!["https://x/1.jpg".into(), "https://x/2.jpg".into()];
        record.gtin = Some("4820000000001".into());
        record.attributes_raw.insert("Voltage".into(), "18 V".into());
        record
    }

    #[test]
    fn test_columns_fixed_then_sorted() {
        let mut saw = CandidateRecord::new("S-1");
        saw.attributes_raw.insert("Blade".into(), "250 mm".into());
        let rows = [record_row(&drill()), record_row(&saw)];
        assert_eq!(
            columns(&rows)[FIXED_COLUMNS.len()..],
            ["Blade".to_string(), "Voltage".to_string(), "gtin".to_string()]
        );
    }

    #[test]
    fn test_write_records() {
        let mut out = Vec::new();
        write_records(&mut out, &[drill()]).unwrap();
        assert!(out.starts_with(BOM));

        let text = String::from_utf8(out[BOM.len()..].to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "supplier_sku;name;price;currency;availability;manufacturer;category;image_urls;Voltage;gtin"
        );
        assert_eq!(
            lines[1],
            "D-1;\"Drill; cordless\";9.99;;;;;https://x/1.jpg|https://x/2.jpg;18 V;4820000000001"
        );
    }

    #[test]
    fn test_write_errors() {
        let invalid = vec![InvalidRecord {
            reason: "missing name".into(),
            record: CandidateRecord::new("X-1"),
        }];
        let mut out = Vec::new();
        write_errors(&mut out, &invalid).unwrap();
        let text = String::from_utf8(out[BOM.len()..].to_vec()).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("__reason;supplier_sku;name"));
        assert_eq!(lines.next().unwrap(), "missing name;X-1;;;;;;;");
    }

    #[test]
    fn test_export_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let exported = export_to_dir(dir.path(), &[drill()]).unwrap();
        assert!(exported.path.exists());
        assert!(exported.rel_path.starts_with("scrapers/scrape_"));
        assert_eq!(exported.file_url, format!("/storage/{}", exported.rel_path));
    }
}
