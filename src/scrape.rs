//! Scrape jobs
//!
//! A job crawls a site, exports the harvested records, optionally upserts
//! them, and reports through a progress sink. Whatever happens, the last
//! event of a job is a single `done` or `error` frame.

use std::sync::mpsc::{self, Receiver};
use std::thread::JoinHandle;

use crate::config::ScraperConfig;
use crate::crawler::{Crawler, Fetcher, HttpFetcher};
use crate::error::Result;
use crate::export::{export_to_dir, ExportedFile};
use crate::progress::{CancelToken, ProgressEvent, ProgressSink, RunStats};
use crate::record::CandidateRecord;
use crate::sink::{split_valid_invalid, RecordSink};

/// Where harvested records are upserted
pub struct SinkTarget<'a> {
    pub sink: &'a mut dyn RecordSink,
    pub supplier_id: i64,
    /// Scraper id recorded as the rows' source
    pub source_id: Option<i64>,
}

/// Result of a finished scrape
#[derive(Debug, Clone)]
pub struct ScrapeReport {
    pub file: ExportedFile,
    pub stats: RunStats,
    pub records: Vec<CandidateRecord>,
    pub errors: Vec<String>,
}

/// Run a scraper to completion on the current thread
pub fn run_scraper<F, P>(
    config: &ScraperConfig,
    fetcher: &mut F,
    progress: &mut P,
    cancel: CancelToken,
    target: Option<SinkTarget<'_>>,
) -> Result<ScrapeReport>
where
    F: Fetcher + ?Sized,
    P: ProgressSink + ?Sized,
{
    progress.emit(ProgressEvent::log(format!(
        "Starting scrape of {} start URLs",
        config.start_urls.len()
    )));
    for problem in config.rules.problems() {
        progress.emit(ProgressEvent::log(format!("Rule ignored, {problem}")));
    }

    match scrape(config, fetcher, progress, cancel, target) {
        Ok(report) => {
            progress.emit(ProgressEvent::Done {
                file_url: report.file.file_url.clone(),
                rel_path: report.file.rel_path.clone(),
                stats: report.stats.clone(),
            });
            Ok(report)
        }
        Err(e) => {
            tracing::error!(error = %e, "scrape failed");
            progress.emit(ProgressEvent::error(e.to_string()));
            Err(e)
        }
    }
}

fn scrape<F, P>(
    config: &ScraperConfig,
    fetcher: &mut F,
    progress: &mut P,
    cancel: CancelToken,
    target: Option<SinkTarget<'_>>,
) -> Result<ScrapeReport>
where
    F: Fetcher + ?Sized,
    P: ProgressSink + ?Sized,
{
    let outcome = Crawler::new(config, fetcher, progress, cancel).run()?;
    let mut stats = outcome.stats;

    let file = export_to_dir(&config.settings.output_dir, &outcome.records)?;
    progress.emit(ProgressEvent::log(format!(
        "Exported {} products to {}",
        outcome.records.len(),
        file.rel_path
    )));

    if let Some(target) = target {
        let (valid, invalid) = split_valid_invalid(outcome.records.clone());
        let mut upsert = target.sink.upsert(target.supplier_id, target.source_id, valid)?;
        upsert.skipped += invalid.len();
        upsert.warnings += outcome.errors.len();
        stats.upsert = Some(upsert);
    }

    Ok(ScrapeReport {
        file,
        stats,
        records: outcome.records,
        errors: outcome.errors,
    })
}

/// Run a scraper over HTTP on a background thread
pub fn spawn_scraper(
    config: ScraperConfig,
    cancel: CancelToken,
) -> (Receiver<ProgressEvent>, JoinHandle<Result<ScrapeReport>>) {
    let fetcher = HttpFetcher::from_settings(&config.settings);
    spawn_scraper_with(config, fetcher, cancel)
}

/// Run a scraper with the given fetcher on a background thread. The
/// receiver yields frames until the job's `done`/`error` frame.
pub fn spawn_scraper_with<F>(
    config: ScraperConfig,
    mut fetcher: F,
    cancel: CancelToken,
) -> (Receiver<ProgressEvent>, JoinHandle<Result<ScrapeReport>>)
where
    F: Fetcher + Send + 'static,
{
    let (mut tx, rx) = mpsc::channel();
    let handle =
        std::thread::spawn(move || run_scraper(&config, &mut fetcher, &mut tx, cancel, None));
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fixtures::FixtureFetcher;
    use crate::error::CatalogError;
    use crate::extractors::html_fields::LinkRule;
    use crate::sink::MemorySink;

    fn config(output_dir: &std::path::Path) -> ScraperConfig {
        ScraperConfig::from_json_str(
            &serde_json::json!({
                "start_urls": ["https://shop.example.com/c/1"],
                "settings": {"output_dir": output_dir},
                "rules": {
                    "listing": {"product_links": ["a.prod"]},
                    "product": {"fields": {"sku": ".sku", "name": "h1"}}
                }
            })
            .to_string(),
        )
        .unwrap()
    }

    fn fetcher() -> FixtureFetcher {
        FixtureFetcher::new()
            .page(
                "https://shop.example.com/c/1",
                r#"<a class="prod" href="/p/1">1</a><a class="prod" href="/p/2">2</a>"#,
            )
            .page("https://shop.example.com/p/1", r#"<h1>Drill</h1><i class="sku">D-1</i>"#)
            .page("https://shop.example.com/p/2", r#"<h1></h1><i class="sku">D-2</i>"#)
    }

    #[test]
    fn test_run_emits_single_done_frame() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut sink = MemorySink::new();
        let mut events: Vec<ProgressEvent> = Vec::new();

        let report = run_scraper(
            &config,
            &mut fetcher(),
            &mut events,
            CancelToken::new(),
            Some(SinkTarget {
                sink: &mut sink,
                supplier_id: 3,
                source_id: Some(30),
            }),
        )
        .unwrap();

        assert!(report.file.path.exists());
        assert_eq!(report.records.len(), 2);
        let upsert = report.stats.upsert.unwrap();
        assert_eq!(upsert.inserted, 1);
        assert_eq!(upsert.skipped, 1);
        assert_eq!(sink.len(), 1);

        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Done { rel_path, .. }) if rel_path.starts_with("scrapers/")
        ));
    }

    #[test]
    fn test_fatal_run_emits_error_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.start_urls.clear();
        let mut events: Vec<ProgressEvent> = Vec::new();

        let err = run_scraper(&config, &mut fetcher(), &mut events, CancelToken::new(), None)
            .unwrap_err();
        assert!(matches!(err, CatalogError::Fatal(_)));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(matches!(events.last(), Some(ProgressEvent::Error { .. })));
    }

    #[test]
    fn test_unparseable_rules_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.rules.listing.pagination.push(LinkRule::css("a.next["));
        let mut events: Vec<ProgressEvent> = Vec::new();

        run_scraper(&config, &mut fetcher(), &mut events, CancelToken::new(), None).unwrap();

        let logged = events.iter().any(|event| {
            matches!(event, ProgressEvent::Log { message }
                if message.starts_with("Rule ignored, listing.pagination[0]"))
        });
        assert!(logged);
        assert!(matches!(events.last(), Some(ProgressEvent::Done { .. })));
    }

    #[test]
    fn test_spawned_job_streams_until_done() {
        let dir = tempfile::tempdir().unwrap();
        let (rx, handle) = spawn_scraper_with(config(dir.path()), fetcher(), CancelToken::new());

        let events: Vec<ProgressEvent> = rx.iter().collect();
        assert!(events.last().is_some_and(ProgressEvent::is_terminal));
        assert!(matches!(events.last(), Some(ProgressEvent::Done { .. })));
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_cancelled_job_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let (rx, handle) = spawn_scraper_with(config(dir.path()), fetcher(), cancel);

        let events: Vec<ProgressEvent> = rx.iter().collect();
        assert_eq!(events.last(), Some(&ProgressEvent::error("run cancelled")));
        assert!(matches!(handle.join().unwrap(), Err(CatalogError::Cancelled)));
    }
}
