//! Breadth-first site crawler
//!
//! A run goes through four phases:
//!
//! 1. seed: start URLs go onto the frontier, sitemap product URLs into the
//!    product link set
//! 2. discover: each start page is fetched once and its category links are
//!    queued (not recursive)
//! 3. crawl: the frontier is drained one URL at a time, collecting product
//!    links and queueing pagination links
//! 4. harvest: every product link is fetched once and turned into a record
//!
//! Fetches are strictly sequential and followed by the configured delay,
//! whether they succeeded or not.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::time::Duration;
use ureq::ResponseExt;
use url::Url;

use crate::config::{ScraperConfig, ScraperSettings};
use crate::error::{CatalogError, Result};
use crate::extractors::html_fields::{collect_links, ListingRules, RuleSet};
use crate::html::Page;
use crate::progress::{CancelToken, Phase, ProgressEvent, ProgressSink, RunStats};
use crate::record::CandidateRecord;
use crate::robots::RobotsCache;
use crate::sitemap;

/// Characters of page HTML returned by the preview
pub const PREVIEW_HTML_LEN: usize = 20_000;

/// A fetched document and the URL it was finally served from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
}

/// Blocking page source. Non-2xx responses are errors.
pub trait Fetcher {
    fn fetch(&mut self, url: &str) -> Result<FetchedPage>;
}

impl<F: Fetcher + ?Sized> Fetcher for &mut F {
    fn fetch(&mut self, url: &str) -> Result<FetchedPage> {
        (**self).fetch(url)
    }
}

impl<F: Fetcher + ?Sized> Fetcher for Box<F> {
    fn fetch(&mut self, url: &str) -> Result<FetchedPage> {
        (**self).fetch(url)
    }
}

/// Waits out the delay after a fetch
pub trait Sleeper {
    fn sleep(&mut self, delay: Duration);
}

impl<S: Sleeper + ?Sized> Sleeper for &mut S {
    fn sleep(&mut self, delay: Duration) {
        (**self).sleep(delay)
    }
}

/// Blocks the current thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// [`Fetcher`] over a `ureq` agent
#[derive(Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let agent = ureq::Agent::new_with_config(
            ureq::Agent::config_builder()
                .timeout_global(Some(timeout))
                .user_agent(user_agent)
                .build(),
        );
        Self { agent }
    }

    pub fn from_settings(settings: &ScraperSettings) -> Self {
        Self::new(&settings.user_agent, Duration::from_secs(settings.timeout))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&mut self, url: &str) -> Result<FetchedPage> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| CatalogError::fetch(url, e))?;
        let final_url = response.get_uri().to_string();
        let body = response
            .into_body()
            .read_to_string()
            .map_err(|e| CatalogError::fetch(url, e))?;
        tracing::debug!(url = %url, final_url = %final_url, bytes = body.len(), "fetched");
        Ok(FetchedPage {
            url: final_url,
            body,
        })
    }
}

/// Drops the `#fragment`; unparsable URLs are kept as they are
pub fn normalize_url(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.trim().to_string(),
    }
}

/// Frontier, visited set and product links of one crawl
#[derive(Debug, Default)]
pub struct CrawlState {
    frontier: VecDeque<String>,
    queued: HashSet<String>,
    visited: HashSet<String>,
    product_links: IndexSet<String>,
    pages_done: usize,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed<I, S>(&mut self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for url in urls {
            self.enqueue(url.as_ref());
        }
    }

    /// Queue a URL unless it was visited or is already waiting
    pub fn enqueue(&mut self, url: &str) -> bool {
        let url = normalize_url(url);
        if url.is_empty() || self.visited.contains(&url) || self.queued.contains(&url) {
            return false;
        }
        self.queued.insert(url.clone());
        self.frontier.push_back(url);
        true
    }

    /// Pop the next unvisited URL and mark it visited
    pub fn next_url(&mut self) -> Option<String> {
        while let Some(url) = self.frontier.pop_front() {
            self.queued.remove(&url);
            if self.visited.insert(url.clone()) {
                return Some(url);
            }
        }
        None
    }

    pub fn add_product(&mut self, url: &str) -> bool {
        let url = normalize_url(url);
        !url.is_empty() && self.product_links.insert(url)
    }

    /// Collect product and pagination links of a listing page.
    /// Returns how many product links and frontier entries were new.
    pub fn process_page(&mut self, page: &Page, listing: &ListingRules) -> (usize, usize) {
        let products = collect_links(&listing.product_link_selectors, page)
            .iter()
            .filter(|link| self.add_product(link))
            .count();
        let pages = collect_links(&listing.pagination, page)
            .iter()
            .filter(|link| self.enqueue(link))
            .count();
        (products, pages)
    }

    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(&normalize_url(url))
    }

    pub fn product_links(&self) -> &IndexSet<String> {
        &self.product_links
    }

    pub fn pages_done(&self) -> usize {
        self.pages_done
    }
}

/// Records harvested by a crawl plus per-page failures
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    pub records: Vec<CandidateRecord>,
    /// "Product <url>: ..." lines
    pub errors: Vec<String>,
    pub stats: RunStats,
}

pub struct Crawler<'a, F: Fetcher + ?Sized, P: ProgressSink + ?Sized> {
    config: &'a ScraperConfig,
    fetcher: &'a mut F,
    progress: &'a mut P,
    cancel: CancelToken,
    robots: Option<RobotsCache>,
    state: CrawlState,
    /// Start pages fetched by discovery, reused by the crawl loop
    cache: HashMap<String, FetchedPage>,
    products_failed: usize,
    sleeper: Box<dyn Sleeper + 'a>,
}

impl<'a, F: Fetcher + ?Sized, P: ProgressSink + ?Sized> Crawler<'a, F, P> {
    pub fn new(
        config: &'a ScraperConfig,
        fetcher: &'a mut F,
        progress: &'a mut P,
        cancel: CancelToken,
    ) -> Self {
        let robots = config
            .settings
            .respect_robots
            .then(|| RobotsCache::new(config.settings.user_agent.clone()));
        Self {
            config,
            fetcher,
            progress,
            cancel,
            robots,
            state: CrawlState::new(),
            cache: HashMap::new(),
            products_failed: 0,
            sleeper: Box::new(ThreadSleeper),
        }
    }

    /// Replace the thread sleep that follows every fetch
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'a) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    fn settings(&self) -> &ScraperSettings {
        &self.config.settings
    }

    fn rules(&self) -> &RuleSet {
        &self.config.rules
    }

    /// Run all phases and harvest the product pages
    pub fn run(mut self) -> Result<CrawlOutcome> {
        self.seed()?;
        self.discover()?;
        self.crawl()?;
        self.harvest()
    }

    /// Queue start URLs and add sitemap product URLs. Having neither is fatal.
    pub fn seed(&mut self) -> Result<()> {
        let start_urls = &self.config.start_urls;
        if start_urls.is_empty() && self.settings().sitemaps.is_empty() {
            return Err(CatalogError::Fatal("no start URLs or sitemaps configured".into()));
        }
        self.state.seed(start_urls);

        if !self.settings().sitemaps.is_empty() {
            self.check_cancelled()?;
            let pattern = self.settings().product_url_regex()?;
            let found = sitemap::product_urls(
                &mut *self.fetcher,
                &self.config.settings.sitemaps,
                pattern.as_ref(),
            );
            for error in &found.errors {
                tracing::warn!(error = %error, "sitemap error");
            }
            let added = found.urls.iter().filter(|url| self.state.add_product(url)).count();
            self.log(format!("Sitemaps: {added} product URLs"));
        }
        Ok(())
    }

    /// Fetch each start page once and queue its category links
    pub fn discover(&mut self) -> Result<()> {
        if self.rules().categories.link_selectors.is_empty() {
            return Ok(());
        }

        let start_urls: Vec<String> =
            self.config.start_urls.iter().map(|u| normalize_url(u)).collect();
        for url in start_urls {
            if self.cache.contains_key(&url) {
                continue;
            }
            let Some(fetched) = self.fetch_logged(&url)? else {
                continue;
            };
            let page = Page::parse(&fetched.body, Some(&fetched.url));
            let links = collect_links(&self.config.rules.categories.link_selectors, &page);
            let queued = links.iter().filter(|link| self.state.enqueue(link)).count();
            tracing::info!(url = %url, categories = queued, "start page discovered");
            self.cache.insert(url, fetched);
        }
        self.log(format!("Discovered {} pages to crawl", self.state.frontier_len()));
        Ok(())
    }

    /// Drain the frontier
    pub fn crawl(&mut self) -> Result<()> {
        let every = self.settings().progress_every_pages.max(1);
        while let Some(url) = self.state.next_url() {
            if self.settings().max_pages.is_some_and(|max| self.state.pages_done >= max) {
                tracing::info!(max_pages = self.state.pages_done, "page limit reached");
                break;
            }
            if self.products_capped() {
                break;
            }

            let fetched = match self.cache.remove(&url) {
                Some(fetched) => Some(fetched),
                None => self.fetch_logged(&url)?,
            };
            if let Some(fetched) = fetched {
                let page = Page::parse(&fetched.body, Some(&fetched.url));
                let (products, pages) = self.state.process_page(&page, &self.config.rules.listing);
                tracing::debug!(url = %url, products, pages, "listing page processed");
            }

            self.state.pages_done += 1;
            if self.state.pages_done % every == 0 {
                self.emit_progress(Phase::Crawl, 0);
            }
        }
        self.emit_progress(Phase::Crawl, 0);
        Ok(())
    }

    fn products_capped(&self) -> bool {
        self.settings()
            .max_products
            .is_some_and(|max| self.state.product_links.len() >= max)
    }

    /// Fetch every product link and extract its record
    pub fn harvest(mut self) -> Result<CrawlOutcome> {
        let limit = self.settings().max_products.unwrap_or(usize::MAX);
        let links: Vec<String> = self.state.product_links.iter().take(limit).cloned().collect();
        let total = links.len();
        let every = self.settings().progress_every_products.max(1);

        let mut outcome = CrawlOutcome::default();
        self.emit_progress(Phase::Products, 0);

        for (i, url) in links.iter().enumerate() {
            match self.harvest_one(url) {
                Ok((record, warnings)) => {
                    outcome
                        .errors
                        .extend(warnings.into_iter().map(|w| format!("Product {url}: {w}")));
                    outcome.records.push(record);
                }
                Err(CatalogError::Cancelled) => return Err(CatalogError::Cancelled),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "product skipped");
                    self.products_failed += 1;
                    outcome.errors.push(format!("Product {url}: {e}"));
                }
            }
            let done = i + 1;
            if done % every == 0 || done == total {
                self.emit_progress(Phase::Products, done);
            }
        }

        outcome.stats = RunStats {
            pages_crawled: self.state.pages_done,
            products_found: self.state.product_links.len(),
            products_done: outcome.records.len(),
            products_failed: self.products_failed,
            upsert: None,
        };
        tracing::info!(
            pages = outcome.stats.pages_crawled,
            products = outcome.stats.products_done,
            failed = outcome.stats.products_failed,
            "crawl finished"
        );
        Ok(outcome)
    }

    fn harvest_one(&mut self, url: &str) -> Result<(CandidateRecord, Vec<String>)> {
        let fetched = self.fetch(url)?;
        let page = Page::parse(&fetched.body, Some(&fetched.url));
        self.config.rules.product.extract(&page)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }
        Ok(())
    }

    /// Robots check, fetch, then the politeness delay
    fn fetch(&mut self, url: &str) -> Result<FetchedPage> {
        self.check_cancelled()?;

        let mut delay = self.settings().delay;
        if let Some(robots) = self.robots.as_mut() {
            let check = robots.check(&mut *self.fetcher, url);
            if !check.allowed {
                return Err(CatalogError::fetch(url, "disallowed by robots.txt"));
            }
            delay = delay.max(check.crawl_delay.unwrap_or(0.0));
        }

        let result = self.fetcher.fetch(url);
        // robots.txt may ask for a delay no Duration can hold
        match Duration::try_from_secs_f64(delay) {
            Ok(delay) if !delay.is_zero() => self.sleeper.sleep(delay),
            _ => {}
        }
        result
    }

    /// Fetch failures of listing pages are logged and skipped
    fn fetch_logged(&mut self, url: &str) -> Result<Option<FetchedPage>> {
        match self.fetch(url) {
            Ok(fetched) => Ok(Some(fetched)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "page skipped");
                self.log(e.to_string());
                Ok(None)
            }
        }
    }

    fn log(&mut self, message: String) {
        self.progress.emit(ProgressEvent::Log { message });
    }

    fn emit_progress(&mut self, phase: Phase, products_done: usize) {
        let products_total = match phase {
            Phase::Crawl => 0,
            Phase::Products => {
                let found = self.state.product_links.len();
                self.settings().max_products.map_or(found, |max| found.min(max))
            }
        };
        self.progress.emit(ProgressEvent::Progress {
            phase,
            pages_done: self.state.pages_done,
            frontier_size: self.state.frontier_len(),
            products_found: self.state.product_links.len(),
            products_done,
            products_total,
        });
    }
}

/// Rule block a preview is run for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleBlock {
    Categories,
    Listing,
    Product,
}

impl FromStr for RuleBlock {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "categories" | "category" | "navigation" => Ok(RuleBlock::Categories),
            "listing" | "list" => Ok(RuleBlock::Listing),
            "product" | "products" => Ok(RuleBlock::Product),
            other => Err(format!("unknown rule block `{other}`")),
        }
    }
}

impl RuleBlock {
    pub fn key(self) -> &'static str {
        match self {
            RuleBlock::Categories => "categories",
            RuleBlock::Listing => "listing",
            RuleBlock::Product => "product",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreviewItem {
    pub categories: Vec<String>,
    pub pagination: Vec<String>,
    pub product_links: Vec<String>,
    pub product_items: usize,
    pub fields: IndexMap<String, String>,
}

/// What one rule block finds on one page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreviewResult {
    pub items: Vec<PreviewItem>,
    /// Head of the page HTML
    pub html: String,
}

/// Fetch one page and evaluate a rule block against it
pub fn preview_block<F: Fetcher + ?Sized>(
    fetcher: &mut F,
    url: &str,
    rules: &RuleSet,
    block: RuleBlock,
) -> Result<PreviewResult> {
    let fetched = fetcher.fetch(url)?;
    let page = Page::parse(&fetched.body, Some(&fetched.url));

    let mut item = PreviewItem::default();
    match block {
        RuleBlock::Categories => {
            item.categories = collect_links(&rules.categories.link_selectors, &page);
        }
        RuleBlock::Listing => {
            item.pagination = collect_links(&rules.listing.pagination, &page);
            item.product_links = collect_links(&rules.listing.product_link_selectors, &page);
            item.product_items = rules
                .listing
                .product_item
                .as_ref()
                .map_or(0, |rule| rule.count(&page));
        }
        RuleBlock::Product => {
            item.fields = rules.product.preview(&page);
        }
    }

    Ok(PreviewResult {
        items: vec![item],
        html: fetched.body.chars().take(PREVIEW_HTML_LEN).collect(),
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::FixtureFetcher;
    use super::*;
    use crate::progress::NullProgress;
    use pretty_assertions::assert_eq;

    const SHOP: &str = "https://shop.example.com";

    fn config(json: serde_json::Value) -> ScraperConfig {
        ScraperConfig::from_json_str(&json.to_string()).unwrap()
    }

    fn shop_config() -> ScraperConfig {
        config(serde_json::json!({
            "start_urls": [format!("{SHOP}/")],
            "settings": {"progress_every_pages": 1, "progress_every_products": 1},
            "rules": {
                "categories": {"link_selectors": ["nav a"]},
                "listing": {"product_links": ["a.prod"], "pagination": ["a.next"]},
                "product": {"fields": {"name": "h1", "price_raw": ".price"}}
            }
        }))
    }

    fn shop() -> FixtureFetcher {
        FixtureFetcher::new()
            .page(
                &format!("{SHOP}/"),
                r#"<nav><a href="/c/drills">Drills</a><a href="/c/saws">Saws</a></nav>"#,
            )
            .page(
                &format!("{SHOP}/c/drills"),
                r#"<a class="prod" href="/p/1">1</a><a class="prod" href="/p/2">2</a>
                   <a class="next" href="/c/drills?page=2">next</a>"#,
            )
            .page(
                &format!("{SHOP}/c/drills?page=2"),
                r#"<a class="prod" href="/p/2#specs">2</a><a class="prod" href="/p/3">3</a>
                   <a class="next" href="/c/drills?page=2">next</a>
                   <a class="next" href="/c/drills#top">first</a>"#,
            )
            .page(&format!("{SHOP}/p/1"), r#"<h1>Drill one</h1><span class="price">10</span>"#)
            .page(&format!("{SHOP}/p/2"), r#"<h1>Drill two</h1><span class="price">20,5</span>"#)
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("https://a.example.com/x#frag"), "https://a.example.com/x");
        assert_eq!(normalize_url(" https://a.example.com "), "https://a.example.com/");
        assert_eq!(normalize_url("not a url"), "not a url");
    }

    #[test]
    fn test_crawl_state_dedup() {
        let mut state = CrawlState::new();
        state.seed(["https://a.example.com/1", "https://a.example.com/1#x"]);
        assert_eq!(state.frontier_len(), 1);
        assert_eq!(state.next_url().as_deref(), Some("https://a.example.com/1"));
        assert!(!state.enqueue("https://a.example.com/1"));
        assert!(state.is_visited("https://a.example.com/1#y"));
        assert_eq!(state.next_url(), None);
    }

    #[test]
    fn test_full_crawl() {
        let config = shop_config();
        let mut fetcher = shop();
        let mut events: Vec<ProgressEvent> = Vec::new();

        let outcome = Crawler::new(&config, &mut fetcher, &mut events, CancelToken::new())
            .run()
            .unwrap();

        assert_eq!(outcome.stats.pages_crawled, 4);
        assert_eq!(outcome.stats.products_found, 3);
        assert_eq!(outcome.stats.products_done, 2);
        assert_eq!(outcome.stats.products_failed, 1);
        assert_eq!(outcome.records[0].name.as_deref(), Some("Drill one"));
        assert_eq!(outcome.records[0].supplier_sku, format!("{SHOP}/p/1"));
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with(&format!("Product {SHOP}/p/3: fetch failed")));

        // the start page is fetched by discovery only; /c/saws fails and is skipped
        assert_eq!(fetcher.fetch_count(&format!("{SHOP}/")), 1);
        assert_eq!(fetcher.fetch_count(&format!("{SHOP}/c/drills")), 1);
        assert_eq!(fetcher.fetch_count(&format!("{SHOP}/c/drills?page=2")), 1);
        assert_eq!(fetcher.fetch_count(&format!("{SHOP}/c/saws")), 1);

        let phases: Vec<Phase> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { phase, .. } => Some(*phase),
                _ => None,
            })
            .collect();
        assert!(phases.contains(&Phase::Crawl));
        assert_eq!(phases.last(), Some(&Phase::Products));
        assert!(events.iter().all(|e| !e.is_terminal()));
    }

    /// Remembers every requested delay instead of sleeping
    #[derive(Debug, Default)]
    struct RecordingSleeper {
        delays: Vec<Duration>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&mut self, delay: Duration) {
            self.delays.push(delay);
        }
    }

    #[test]
    fn test_delay_follows_every_fetch_attempt() {
        let mut config = shop_config();
        config.settings.delay = 0.25;
        let mut fetcher = shop();
        let mut sleeper = RecordingSleeper::default();

        let outcome = Crawler::new(&config, &mut fetcher, &mut NullProgress, CancelToken::new())
            .with_sleeper(&mut sleeper)
            .run()
            .unwrap();

        // /c/saws and /p/3 answer 404 and are still followed by the delay
        assert_eq!(outcome.stats.products_failed, 1);
        assert_eq!(fetcher.fetched.len(), 7);
        assert_eq!(sleeper.delays, vec![Duration::from_millis(250); 7]);
    }

    #[test]
    fn test_zero_delay_never_sleeps() {
        let config = shop_config();
        let mut fetcher = shop();
        let mut sleeper = RecordingSleeper::default();

        Crawler::new(&config, &mut fetcher, &mut NullProgress, CancelToken::new())
            .with_sleeper(&mut sleeper)
            .run()
            .unwrap();

        assert!(!fetcher.fetched.is_empty());
        assert!(sleeper.delays.is_empty());
    }

    #[test]
    fn test_progress_cadence() {
        let config = config(serde_json::json!({
            "start_urls": [format!("{SHOP}/c/1")],
            "settings": {"progress_every_pages": 2, "progress_every_products": 3},
            "rules": {
                "listing": {"product_links": ["a.prod"], "pagination": ["a.next"]},
                "product": {"fields": {"name": "h1"}}
            }
        }));
        // five listing pages chained by `next`, seven products between them
        let mut fetcher = FixtureFetcher::new();
        let listing = [(1, vec![1, 2]), (2, vec![3]), (3, vec![4, 5]), (4, vec![6]), (5, vec![7])];
        for (page, products) in listing {
            let mut body: String = products
                .iter()
                .map(|p| format!(r#"<a class="prod" href="/p/{p}">{p}</a>"#))
                .collect();
            if page < 5 {
                body.push_str(&format!(r#"<a class="next" href="/c/{}">next</a>"#, page + 1));
            }
            fetcher = fetcher.page(&format!("{SHOP}/c/{page}"), &body);
        }
        // /p/7 is missing and still counts as done
        for p in 1..=6 {
            fetcher = fetcher.page(&format!("{SHOP}/p/{p}"), &format!("<h1>Product {p}</h1>"));
        }
        let mut events: Vec<ProgressEvent> = Vec::new();

        let outcome = Crawler::new(&config, &mut fetcher, &mut events, CancelToken::new())
            .run()
            .unwrap();
        assert_eq!(outcome.stats.pages_crawled, 5);
        assert_eq!(outcome.stats.products_done, 6);

        let frame = |phase, pages_done, frontier_size, products_found, products_done, total| {
            ProgressEvent::Progress {
                phase,
                pages_done,
                frontier_size,
                products_found,
                products_done,
                products_total: total,
            }
        };
        let frames: Vec<ProgressEvent> = events
            .into_iter()
            .filter(|e| matches!(e, ProgressEvent::Progress { .. }))
            .collect();
        assert_eq!(
            frames,
            vec![
                frame(Phase::Crawl, 2, 1, 3, 0, 0),
                frame(Phase::Crawl, 4, 1, 6, 0, 0),
                // closing crawl frame
                frame(Phase::Crawl, 5, 0, 7, 0, 0),
                frame(Phase::Products, 5, 0, 7, 0, 7),
                frame(Phase::Products, 5, 0, 7, 3, 7),
                frame(Phase::Products, 5, 0, 7, 6, 7),
                frame(Phase::Products, 5, 0, 7, 7, 7),
            ]
        );
    }

    #[test]
    fn test_zero_cadence_reports_every_step() {
        let mut config = shop_config();
        config.settings.progress_every_pages = 0;
        config.settings.progress_every_products = 0;
        let mut fetcher = shop();
        let mut events: Vec<ProgressEvent> = Vec::new();

        Crawler::new(&config, &mut fetcher, &mut events, CancelToken::new())
            .run()
            .unwrap();

        let count = |wanted: Phase| {
            events
                .iter()
                .filter(|e| matches!(e, ProgressEvent::Progress { phase, .. } if *phase == wanted))
                .count()
        };
        // four pages plus the closing frame; the opening frame plus three products
        assert_eq!(count(Phase::Crawl), 5);
        assert_eq!(count(Phase::Products), 4);
    }

    #[test]
    fn test_no_seeds_is_fatal() {
        let config = config(serde_json::json!({"start_urls": []}));
        let mut fetcher = FixtureFetcher::new();
        let err = Crawler::new(&config, &mut fetcher, &mut NullProgress, CancelToken::new())
            .run()
            .unwrap_err();
        assert!(matches!(err, CatalogError::Fatal(_)));
        assert!(fetcher.fetched.is_empty());
    }

    #[test]
    fn test_cancel_stops_before_fetching() {
        let config = shop_config();
        let mut fetcher = shop();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = Crawler::new(&config, &mut fetcher, &mut NullProgress, cancel)
            .run()
            .unwrap_err();
        assert!(matches!(err, CatalogError::Cancelled));
        assert!(fetcher.fetched.is_empty());
    }

    #[test]
    fn test_max_pages() {
        let mut config = shop_config();
        config.settings.max_pages = Some(2);
        let mut fetcher = shop();
        let outcome = Crawler::new(&config, &mut fetcher, &mut NullProgress, CancelToken::new())
            .run()
            .unwrap();
        assert_eq!(outcome.stats.pages_crawled, 2);
        assert_eq!(fetcher.fetch_count(&format!("{SHOP}/c/drills?page=2")), 0);
    }

    #[test]
    fn test_robots_disallow() {
        let mut config = shop_config();
        config.settings.respect_robots = true;
        let robots = "User-agent: *\nDisallow: /p/2\n";
        let mut fetcher = shop().page(&format!("{SHOP}/robots.txt"), robots);
        let outcome = Crawler::new(&config, &mut fetcher, &mut NullProgress, CancelToken::new())
            .run()
            .unwrap();
        assert_eq!(fetcher.fetch_count(&format!("{SHOP}/p/2")), 0);
        assert_eq!(fetcher.fetch_count(&format!("{SHOP}/robots.txt")), 1);
        assert_eq!(outcome.stats.products_done, 1);
    }

    #[test]
    fn test_sitemap_seeding() {
        let config = config(serde_json::json!({
            "settings": {
                "sitemaps": [format!("{SHOP}/sitemap.xml")],
                "product_url_pattern": "/p/"
            },
            "rules": {"product": {"fields": {"name": "h1"}}}
        }));
        let mut fetcher = shop().page(
            &format!("{SHOP}/sitemap.xml"),
            &format!(
                "<urlset><url><loc>{SHOP}/p/1</loc></url>\
                 <url><loc>{SHOP}/about</loc></url></urlset>"
            ),
        );
        let outcome = Crawler::new(&config, &mut fetcher, &mut NullProgress, CancelToken::new())
            .run()
            .unwrap();
        assert_eq!(outcome.stats.products_found, 1);
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn test_preview_listing_block() {
        let config = shop_config();
        let mut fetcher = shop();
        let preview = preview_block(
            &mut fetcher,
            &format!("{SHOP}/c/drills"),
            &config.rules,
            RuleBlock::Listing,
        )
        .unwrap();
        assert_eq!(preview.items.len(), 1);
        assert_eq!(preview.items[0].product_links.len(), 2);
        assert_eq!(preview.items[0].pagination, vec![format!("{SHOP}/c/drills?page=2")]);
        assert!(preview.html.contains("a class=\"prod\""));
    }

    #[test]
    fn test_rule_block_names() {
        assert_eq!("Listing".parse::<RuleBlock>(), Ok(RuleBlock::Listing));
        assert!("footer".parse::<RuleBlock>().is_err());
    }
}
