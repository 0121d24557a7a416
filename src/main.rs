//! catalog_parser - supplier price list import and catalog scraping

use anyhow::{Context, Result};
use catalog_parser::config::{MappingDocument, ScraperConfig};
use catalog_parser::crawler::{preview_block, HttpFetcher, RuleBlock};
use catalog_parser::export::{write_errors, write_records};
use catalog_parser::import::{import_price_list, import_source, ImportOptions, SourceFormat};
use catalog_parser::logging::{init_logging, LogConfig};
use catalog_parser::progress::{CancelToken, NdjsonSink};
use catalog_parser::record::CandidateRecord;
use catalog_parser::scrape::{run_scraper, SinkTarget};
use catalog_parser::sink::MemorySink;
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "catalog_parser")]
#[command(author, version, about = "Supplier catalog extraction tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Import a price list file and print the upsert report
    Import {
        /// Mapping document (JSON)
        #[arg(short, long)]
        mapping: PathBuf,

        /// Price list file (xlsx, xls, ods, csv, xml, yml)
        #[arg(short, long)]
        file: PathBuf,

        /// Override the format guessed from the file extension
        #[arg(long)]
        format: Option<SourceFormat>,

        #[arg(long, default_value_t = 1)]
        supplier: i64,

        #[arg(long, default_value_t = 1)]
        price_list: i64,

        /// Only extract this many records and print them without storing
        #[arg(long)]
        limit: Option<usize>,

        /// Write the stored rows to this CSV
        #[arg(long)]
        records_csv: Option<PathBuf>,

        /// Write rejected records with their reason to this CSV
        #[arg(long)]
        errors_csv: Option<PathBuf>,
    },

    /// Run a scraper and stream NDJSON progress frames to stdout
    Crawl {
        /// Scraper config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Override settings.output_dir
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Upsert harvested records for this supplier
        #[arg(long)]
        supplier: Option<i64>,

        #[arg(long)]
        scraper_id: Option<i64>,
    },

    /// Evaluate one rule block against a single page
    Preview {
        /// Scraper config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// categories, listing or product
        #[arg(short, long)]
        block: RuleBlock,

        /// Page to fetch; defaults to the block's test URL
        #[arg(short, long)]
        url: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env()?;
    if cli.verbose {
        log_config = log_config.verbose();
    }
    init_logging(&log_config)?;

    match cli.command {
        Command::Import {
            mapping,
            file,
            format,
            supplier,
            price_list,
            limit,
            records_csv,
            errors_csv,
        } => {
            let mapping = MappingDocument::load(&mapping)
                .with_context(|| format!("loading mapping {}", mapping.display()))?;
            let format = match format {
                Some(format) => format,
                None => SourceFormat::from_path(&file)?,
            };
            let bytes =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            info!(file = %file.display(), ?format, "importing price list");

            if limit.is_some() {
                let outcome = import_source(format, &bytes, &mapping, ImportOptions { limit })?;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                return Ok(());
            }

            let mut sink = MemorySink::new();
            let report =
                import_price_list(&mut sink, supplier, price_list, format, &bytes, &mapping)?;

            if let Some(path) = records_csv {
                let records: Vec<CandidateRecord> =
                    sink.rows().map(|row| row.record.clone()).collect();
                write_records(BufWriter::new(File::create(&path)?), &records)?;
            }
            if let Some(path) = errors_csv {
                write_errors(BufWriter::new(File::create(&path)?), &report.invalid)?;
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Crawl {
            config,
            output_dir,
            supplier,
            scraper_id,
        } => {
            let mut config = ScraperConfig::load(&config)
                .with_context(|| format!("loading scraper config {}", config.display()))?;
            if let Some(dir) = output_dir {
                config.settings.output_dir = dir;
            }

            let mut fetcher = HttpFetcher::from_settings(&config.settings);
            let mut progress = NdjsonSink::new(std::io::stdout().lock());
            let mut sink = MemorySink::new();
            let target = match supplier {
                Some(supplier_id) => Some(SinkTarget {
                    sink: &mut sink,
                    supplier_id,
                    source_id: scraper_id,
                }),
                None => None,
            };

            let report =
                run_scraper(&config, &mut fetcher, &mut progress, CancelToken::new(), target)?;
            info!(
                file = %report.file.path.display(),
                records = report.records.len(),
                errors = report.errors.len(),
                "scrape complete"
            );
        }
        Command::Preview { config, block, url } => {
            let config = ScraperConfig::load(&config)
                .with_context(|| format!("loading scraper config {}", config.display()))?;
            let url = url
                .or_else(|| config.settings.test_urls.get(block.key()).cloned())
                .with_context(|| format!("no --url given and no test URL for `{}`", block.key()))?;

            let mut fetcher = HttpFetcher::from_settings(&config.settings);
            let result = preview_block(&mut fetcher, &url, &config.rules, block)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
