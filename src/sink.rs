//! Reconciliation of candidate records into storage
//!
//! Storage is reached through [`RecordSink`]. [`MemorySink`] is the
//! in-process reconciler: it keys rows by `(supplier_id, supplier_sku)`,
//! inserts new keys, merges mapped fields into existing rows, and applies a
//! batch all-or-nothing.

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::Result;
use crate::record::{CandidateRecord, Stats};

/// Persists a batch of candidate records keyed by `(supplier_id, sku)`.
///
/// Callers must not upsert concurrently for the same supplier.
pub trait RecordSink {
    fn upsert(
        &mut self,
        supplier_id: i64,
        source_id: Option<i64>,
        records: Vec<CandidateRecord>,
    ) -> Result<Stats>;
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn upsert(
        &mut self,
        supplier_id: i64,
        source_id: Option<i64>,
        records: Vec<CandidateRecord>,
    ) -> Result<Stats> {
        (**self).upsert(supplier_id, source_id, records)
    }
}

/// A stored supplier product row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub supplier_id: i64,
    /// Price list or scraper the row was last written from
    pub source_id: Option<i64>,
    pub record: CandidateRecord,
}

/// Why a record was rejected before reaching the sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidRecord {
    pub reason: String,
    pub record: CandidateRecord,
}

/// Rejection reason, or `None` when the record can be stored
pub fn validate(record: &CandidateRecord) -> Option<&'static str> {
    if !record.has_sku() {
        Some("missing supplier_sku")
    } else if !record.has_name() {
        Some("missing name")
    } else {
        None
    }
}

/// Separate storable records from the ones missing a SKU or a name
pub fn split_valid_invalid(
    records: Vec<CandidateRecord>,
) -> (Vec<CandidateRecord>, Vec<InvalidRecord>) {
    let mut valid = Vec::with_capacity(records.len());
    let mut invalid = Vec::new();
    for record in records {
        match validate(&record) {
            None => valid.push(record),
            Some(reason) => invalid.push(InvalidRecord {
                reason: reason.to_string(),
                record,
            }),
        }
    }
    (valid, invalid)
}

/// In-memory reconciler
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    rows: IndexMap<(i64, String), StoredRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, supplier_id: i64, sku: &str) -> Option<&StoredRecord> {
        self.rows.get(&(supplier_id, sku.trim().to_string()))
    }

    pub fn rows(&self) -> impl Iterator<Item = &StoredRecord> {
        self.rows.values()
    }
}

impl RecordSink for MemorySink {
    fn upsert(
        &mut self,
        supplier_id: i64,
        source_id: Option<i64>,
        records: Vec<CandidateRecord>,
    ) -> Result<Stats> {
        let mut staged = self.rows.clone();
        let mut stats = Stats::default();

        for mut record in records {
            if validate(&record).is_some() {
                stats.skipped += 1;
                continue;
            }
            record.supplier_sku = record.supplier_sku.trim().to_string();
            let key = (supplier_id, record.supplier_sku.clone());

            match staged.get_mut(&key) {
                Some(existing) => {
                    merge_into(&mut existing.record, record);
                    existing.source_id = source_id;
                    stats.updated += 1;
                }
                None => {
                    staged.insert(
                        key,
                        StoredRecord {
                            supplier_id,
                            source_id,
                            record,
                        },
                    );
                    stats.inserted += 1;
                }
            }
        }

        self.rows = staged;
        tracing::info!(
            supplier_id,
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            "batch upserted"
        );
        Ok(stats)
    }
}

/// Overwrite every field the incoming record carries a value for
fn merge_into(existing: &mut CandidateRecord, incoming: CandidateRecord) {
    macro_rules! take {
        ($($field:ident),* $(,)?) => {
            $(
                if incoming.$field.is_some() {
                    existing.$field = incoming.$field;
                }
            )*
        };
    }

    take!(
        manufacturer_sku,
        mpn,
        gtin,
        ean,
        upc,
        jan,
        isbn,
        name,
        brand_raw,
        category_raw,
        short_description_raw,
        description_raw,
        price_raw,
        currency_raw,
        qty_raw,
        availability_text,
        delivery_terms,
        delivery_date,
        location,
    );

    if !incoming.image_urls.is_empty() {
        existing.image_urls = incoming.image_urls;
    }
    if !incoming.attributes_raw.is_empty() {
        existing.attributes_raw = incoming.attributes_raw;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn record(sku: &str, name: &str) -> CandidateRecord {
        CandidateRecord {
            name: Some(name.to_string()),
            ..CandidateRecord::new(sku)
        }
    }

    #[test]
    fn test_upsert_twice() {
        let batch = vec![record("A", "Drill"), record("B", "Saw")];
        let mut sink = MemorySink::new();

        let first = sink.upsert(1, Some(10), batch.clone()).unwrap();
        assert_eq!(first, Stats { inserted: 2, ..Default::default() });
        let second = sink.upsert(1, Some(10), batch).unwrap();
        assert_eq!(second, Stats { updated: 2, ..Default::default() });
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_suppliers_do_not_share_keys() {
        let mut sink = MemorySink::new();
        sink.upsert(1, None, vec![record("A", "Drill")]).unwrap();
        let stats = sink.upsert(2, None, vec![record("A", "Drill")]).unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_invalid_records_are_skipped() {
        let mut sink = MemorySink::new();
        let stats = sink
            .upsert(
                1,
                None,
                vec![record("  ", "No sku"), CandidateRecord::new("C"), record("D", "Ok")],
            )
            .unwrap();
        assert_eq!(stats, Stats { inserted: 1, skipped: 2, ..Default::default() });
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn test_update_merges_mapped_fields() {
        let mut sink = MemorySink::new();
        let mut first = record("A", "Drill");
        first.gtin = Some("4820000000001".into());
        first.price_raw = Some(Decimal::new(999, 2));
        sink.upsert(1, Some(1), vec![first]).unwrap();

        let mut second = record("A", "Drill v2");
        second.price_raw = Some(Decimal::new(1250, 2));
        sink.upsert(1, Some(2), vec![second]).unwrap();

        let stored = sink.get(1, "A").unwrap();
        assert_eq!(stored.source_id, Some(2));
        assert_eq!(stored.record.name.as_deref(), Some("Drill v2"));
        assert_eq!(stored.record.price_raw, Some(Decimal::new(1250, 2)));
        assert_eq!(stored.record.gtin.as_deref(), Some("4820000000001"));
    }

    #[test]
    fn test_split_valid_invalid() {
        let (valid, invalid) = split_valid_invalid(vec![
            record("A", "Drill"),
            CandidateRecord::new("B"),
            record("", "Nameless sku"),
        ]);
        assert_eq!(valid.len(), 1);
        assert_eq!(invalid[0].reason, "missing name");
        assert_eq!(invalid[1].reason, "missing supplier_sku");
    }
}
