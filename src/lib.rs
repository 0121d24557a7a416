//! Supplier catalog extraction
//!
//! Turns supplier sources into normalized [`CandidateRecord`]s:
//! - spreadsheet and CSV price lists addressed by column letter, index or header
//! - XML/YML feeds addressed by XPath, with an optional category table
//! - supplier websites crawled breadth-first and scraped with CSS/XPath rules
//!
//! Records are reconciled into storage through a [`RecordSink`], exported as
//! CSV, and long runs report through [`ProgressEvent`] frames.

pub mod config;
pub mod crawler;
pub mod error;
pub mod export;
pub mod extractors;
pub mod html;
pub mod import;
pub mod logging;
pub mod mapping;
pub mod progress;
pub mod record;
pub mod robots;
pub mod scrape;
pub mod sink;
pub mod sitemap;
pub mod text_ops;
pub mod xml;
pub mod xpath;

pub use config::{MappingDocument, ScraperConfig, ScraperSettings, SourceConfig};
pub use crawler::{
    preview_block, CrawlState, Crawler, Fetcher, HttpFetcher, RuleBlock, Sleeper, ThreadSleeper,
};
pub use error::{CatalogError, Result};
pub use extractors::{ExtractOutcome, RuleSet, StructuredExtractor, TabularExtractor};
pub use import::{import_price_list, import_source, ImportReport, SourceFormat};
pub use mapping::{FieldMap, MappingSpec};
pub use progress::{CancelToken, ProgressEvent, ProgressSink, RunStats};
pub use record::{CandidateRecord, FieldValue, Stats};
pub use scrape::{run_scraper, spawn_scraper, spawn_scraper_with, ScrapeReport, SinkTarget};
pub use sink::{MemorySink, RecordSink};
