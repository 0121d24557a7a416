//! robots.txt parsing and checking

use std::collections::HashMap;
use texting_robots::Robot;

use crate::crawler::Fetcher;

/// robots.txt data per host, fetched once per run
#[derive(Debug)]
pub struct RobotsCache {
    user_agent: String,
    cache: HashMap<String, CachedRobots>,
}

#[derive(Debug)]
struct CachedRobots {
    /// Raw robots.txt content (Robot doesn't impl Clone, so we store raw)
    robots_txt: String,
    crawl_delay: Option<f64>,
    sitemaps: Vec<String>,
}

/// Result of robots.txt check
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RobotsCheckResult {
    pub allowed: bool,
    pub crawl_delay: Option<f64>,
    pub sitemaps: Vec<String>,
}

impl RobotsCheckResult {
    fn allow_all() -> Self {
        Self {
            allowed: true,
            crawl_delay: None,
            sitemaps: vec![],
        }
    }
}

impl RobotsCache {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            cache: HashMap::new(),
        }
    }

    /// Check a URL, fetching the host's robots.txt on first use.
    /// A robots.txt that cannot be fetched allows everything.
    pub fn check<F: Fetcher + ?Sized>(&mut self, fetcher: &mut F, url: &str) -> RobotsCheckResult {
        let Ok(parsed) = url::Url::parse(url) else {
            return RobotsCheckResult::allow_all();
        };
        let Some(host) = parsed.host_str().map(str::to_lowercase) else {
            return RobotsCheckResult::allow_all();
        };
        let key = match parsed.port() {
            Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
            None => format!("{}://{host}", parsed.scheme()),
        };

        if !self.cache.contains_key(&key) {
            let robots_url = format!("{key}/robots.txt");
            let robots_txt = match fetcher.fetch(&robots_url) {
                Ok(page) => page.body,
                Err(e) => {
                    tracing::debug!(url = %robots_url, error = %e, "no robots.txt, allowing all");
                    String::new()
                }
            };
            let cached = CachedRobots {
                crawl_delay: extract_crawl_delay(&robots_txt, &self.user_agent),
                sitemaps: extract_sitemaps(&robots_txt),
                robots_txt,
            };
            self.cache.insert(key.clone(), cached);
        }

        match self.cache.get(&key) {
            Some(cached) => check_cached(cached, url, &self.user_agent),
            None => RobotsCheckResult::allow_all(),
        }
    }
}

fn check_cached(cached: &CachedRobots, url: &str, user_agent: &str) -> RobotsCheckResult {
    // Re-parse robots.txt to check URL (Robot doesn't impl Clone)
    let allowed = Robot::new(product_token(user_agent), cached.robots_txt.as_bytes())
        .map(|r| r.allowed(url))
        .unwrap_or(true);

    RobotsCheckResult {
        allowed,
        crawl_delay: cached.crawl_delay,
        sitemaps: cached.sitemaps.clone(),
    }
}

/// `PriceCompProBot/1.0 (+https://...)` -> `PriceCompProBot`
fn product_token(user_agent: &str) -> &str {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or(user_agent)
}

/// Crawl-delay of the section matching `user_agent`, else of `*`
pub fn extract_crawl_delay(robots_txt: &str, user_agent: &str) -> Option<f64> {
    let ua_lower = user_agent.to_lowercase();
    let mut in_matching_section = false;
    let mut in_default_section = false;
    let mut default_delay: Option<f64> = None;

    for line in robots_txt.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        let lower = line.to_lowercase();
        if let Some(agent) = lower.strip_prefix("user-agent:") {
            let agent = agent.trim();
            in_default_section = agent == "*";
            in_matching_section =
                !in_default_section && !agent.is_empty() && ua_lower.contains(agent);
        } else if let Some(delay) = lower.strip_prefix("crawl-delay:") {
            let Ok(delay) = delay.trim().parse::<f64>() else {
                continue;
            };
            if in_matching_section {
                return Some(delay);
            }
            if in_default_section && default_delay.is_none() {
                default_delay = Some(delay);
            }
        }
    }

    default_delay
}

/// Sitemap URLs listed in robots.txt
pub fn extract_sitemaps(robots_txt: &str) -> Vec<String> {
    robots_txt
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("sitemap")
                .then(|| value.trim().to_string())
        })
        .filter(|url| !url.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fixtures::FixtureFetcher;

    const ROBOTS: &str = "User-agent: *\nDisallow: /cart\nCrawl-delay: 2\n\nUser-agent: PriceCompProBot\nDisallow: /private\nCrawl-delay: 5\n\nSitemap: https://shop.example.com/sitemap.xml\n";

    #[test]
    fn test_crawl_delay_sections() {
        assert_eq!(extract_crawl_delay(ROBOTS, "PriceCompProBot/1.0"), Some(5.0));
        assert_eq!(extract_crawl_delay(ROBOTS, "OtherBot"), Some(2.0));
        assert_eq!(extract_crawl_delay("User-agent: *\nDisallow:", "x"), None);
    }

    #[test]
    fn test_extract_sitemaps() {
        assert_eq!(
            extract_sitemaps(ROBOTS),
            vec!["https://shop.example.com/sitemap.xml".to_string()]
        );
    }

    #[test]
    fn test_check_fetches_once_per_host() {
        let mut fetcher = FixtureFetcher::new().page("https://shop.example.com/robots.txt", ROBOTS);
        let mut robots = RobotsCache::new("PriceCompProBot/1.0");

        let private = robots.check(&mut fetcher, "https://shop.example.com/private/1");
        assert!(!private.allowed);
        assert_eq!(private.crawl_delay, Some(5.0));
        assert!(robots.check(&mut fetcher, "https://shop.example.com/p/1").allowed);
        assert_eq!(fetcher.fetch_count("https://shop.example.com/robots.txt"), 1);
    }

    #[test]
    fn test_missing_robots_allows_all() {
        let mut fetcher = FixtureFetcher::new();
        let mut robots = RobotsCache::new("PriceCompProBot/1.0");
        let result = robots.check(&mut fetcher, "https://other.example.com/anything");
        assert_eq!(result, RobotsCheckResult::allow_all());
    }
}
