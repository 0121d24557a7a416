//! Sitemap XML parsing and product URL seeding

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use crate::crawler::Fetcher;

/// Sitemap indexes are followed this many levels deep
pub const MAX_SITEMAP_DEPTH: usize = 2;

/// Result of parsing a sitemap
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SitemapResult {
    /// `<loc>` of every `<url>` entry
    pub urls: Vec<String>,
    /// `<loc>` of every child `<sitemap>` of an index
    pub sitemaps: Vec<String>,
    /// Parsing errors (non-fatal)
    pub errors: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Entry {
    Url,
    Sitemap,
}

/// Parse sitemap XML content; namespace prefixes are ignored
pub fn parse_sitemap(xml: &str) -> SitemapResult {
    let mut result = SitemapResult::default();

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entry: Option<Entry> = None;
    let mut in_loc = false;
    let mut loc = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"url" => {
                    entry = Some(Entry::Url);
                    loc.clear();
                }
                b"sitemap" => {
                    entry = Some(Entry::Sitemap);
                    loc.clear();
                }
                b"loc" => in_loc = entry.is_some(),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"loc" => in_loc = false,
                b"url" | b"sitemap" => {
                    let url = loc.trim().to_string();
                    match entry.take() {
                        Some(Entry::Url) if !url.is_empty() => result.urls.push(url),
                        Some(Entry::Sitemap) if !url.is_empty() => result.sitemaps.push(url),
                        _ => {}
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_loc => match e.unescape() {
                Ok(text) => loc.push_str(&text),
                Err(e) => result.errors.push(format!("XML parse error: {e}")),
            },
            Ok(Event::CData(e)) if in_loc => loc.push_str(&String::from_utf8_lossy(&e)),
            Ok(Event::Eof) => break,
            Err(e) => {
                result.errors.push(format!("XML parse error: {e}"));
                break;
            }
            _ => {}
        }
    }

    result
}

/// Fetch a sitemap and, for indexes, its children up to `max_depth`
pub fn fetch_sitemap<F: Fetcher + ?Sized>(
    fetcher: &mut F,
    url: &str,
    max_depth: usize,
) -> SitemapResult {
    let mut result = SitemapResult::default();
    fetch_recursive(fetcher, url, max_depth, 0, &mut result);
    result
}

fn fetch_recursive<F: Fetcher + ?Sized>(
    fetcher: &mut F,
    url: &str,
    max_depth: usize,
    depth: usize,
    result: &mut SitemapResult,
) {
    if depth > max_depth {
        result.sitemaps.push(url.to_string());
        return;
    }

    let xml = match fetcher.fetch(url) {
        Ok(page) => page.body,
        Err(e) => {
            result.errors.push(e.to_string());
            return;
        }
    };

    let parsed = parse_sitemap(&xml);
    tracing::debug!(
        url = %url,
        urls = parsed.urls.len(),
        children = parsed.sitemaps.len(),
        "sitemap parsed"
    );
    result.urls.extend(parsed.urls);
    result.errors.extend(parsed.errors);
    for child in parsed.sitemaps {
        fetch_recursive(fetcher, &child, max_depth, depth + 1, result);
    }
}

/// Product URLs of the given sitemaps, filtered by `pattern` when set
pub fn product_urls<F: Fetcher + ?Sized>(
    fetcher: &mut F,
    sitemaps: &[String],
    pattern: Option<&Regex>,
) -> SitemapResult {
    let mut out = SitemapResult::default();
    for sitemap in sitemaps {
        let result = fetch_sitemap(fetcher, sitemap, MAX_SITEMAP_DEPTH);
        out.urls.extend(
            result
                .urls
                .into_iter()
                .filter(|url| pattern.map_or(true, |re| re.is_match(url))),
        );
        out.sitemaps.extend(result.sitemaps);
        out.errors.extend(result.errors);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fixtures::FixtureFetcher;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
        <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <url>
                <loc>https://example.com/page1?a=1&amp;b=2</loc>
                <lastmod>2024-01-15</lastmod>
                <priority>0.8</priority>
            </url>
            <url>
                <loc>https://example.com/page2</loc>
            </url>
            <url><lastmod>2024-01-15</lastmod></url>
        </urlset>"#;

        let result = parse_sitemap(xml);
        assert_eq!(
            result.urls,
            vec![
                "https://example.com/page1?a=1&b=2".to_string(),
                "https://example.com/page2".to_string()
            ]
        );
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_parse_prefixed_sitemapindex() {
        let xml = r#"<sm:sitemapindex xmlns:sm="http://www.sitemaps.org/schemas/sitemap/0.9">
            <sm:sitemap><sm:loc>https://example.com/sitemap1.xml</sm:loc></sm:sitemap>
            <sm:sitemap><sm:loc><![CDATA[https://example.com/sitemap2.xml]]></sm:loc></sm:sitemap>
        </sm:sitemapindex>"#;

        let result = parse_sitemap(xml);
        assert_eq!(result.sitemaps.len(), 2);
        assert_eq!(result.sitemaps[1], "https://example.com/sitemap2.xml");
    }

    #[test]
    fn test_index_depth_and_pattern() {
        let index = r#"<sitemapindex><sitemap><loc>https://s.example.com/products.xml</loc></sitemap>
            <sitemap><loc>https://s.example.com/missing.xml</loc></sitemap></sitemapindex>"#;
        let products = r#"<urlset>
            <url><loc>https://s.example.com/p/1</loc></url>
            <url><loc>https://s.example.com/blog/1</loc></url>
        </urlset>"#;
        let mut fetcher = FixtureFetcher::new()
            .page("https://s.example.com/sitemap.xml", index)
            .page("https://s.example.com/products.xml", products);

        let pattern = Regex::new("/p/").unwrap();
        let result = product_urls(
            &mut fetcher,
            &["https://s.example.com/sitemap.xml".to_string()],
            Some(&pattern),
        );
        assert_eq!(result.urls, vec!["https://s.example.com/p/1".to_string()]);
        assert_eq!(result.errors.len(), 1);

        let shallow = fetch_sitemap(&mut fetcher, "https://s.example.com/sitemap.xml", 0);
        assert!(shallow.urls.is_empty());
        assert_eq!(shallow.sitemaps.len(), 2);
    }
}
