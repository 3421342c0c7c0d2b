//! Link extraction from HTML documents and raw text.
//!
//! Two sources are combined: every element carrying an `href` or `src`
//! attribute, resolved against the document URL, and a configurable set of
//! regular expressions run over the document's text content (URLs, email
//! addresses, Bitcoin and Ethereum addresses by default).

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::warn;
use url::Url;

use darc_core::config::UrlPattern;
use darc_core::{parse_link_from, urljoin, Link};

static HREF_OR_SRC: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[href], [src]").expect("static selector"));

/// Built-in text-scan patterns: `(scheme, pattern)`. The scheme is prefixed
/// onto matches that carry none of their own.
static URL_PAT: Lazy<Vec<(String, Regex)>> = Lazy::new(|| {
    let defaults: &[(&str, &str)] = &[
        // c.f. gfm.autolink.URL_RE
        (
            "http",
            r#"(?i)\b(?P<url>(?:(?:ftp|https?|wss?|irc)://|www\d{0,3}[.])(?:[^\s()<>]+|\(([^\s()<>]+|(\([^\s()<>]+\)))*\))+(?:\(([^\s()<>]+|(\([^\s()<>]+\)))*\)|[^\s`!()\[\]{};:'".,<>?«»“”‘’]))"#,
        ),
        // c.f. gfm.automail.MAIL_RE
        (
            "mailto",
            r"(?i)\b(?P<url>(?:mailto:)?[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]+)\b",
        ),
        (
            "bitcoin",
            r"(?i)\b(?P<url>(?:(?:bitcoin|btc):)?[13][a-z0-9]{27,34})\b",
        ),
        (
            "ethereum",
            r"(?i)\b(?P<url>(?:(?:ethereum|eth):)?(?:0x)?[0-9a-f]{40})\b",
        ),
    ];
    defaults
        .iter()
        .map(|(scheme, pattern)| (scheme.to_string(), Regex::new(pattern).expect("static pattern")))
        .collect()
});

pub struct LinkExtractor {
    patterns: Vec<(String, Regex)>,
}

impl LinkExtractor {
    /// Build an extractor with the default pattern set plus `extra`
    /// user-supplied patterns. Broken extras are skipped with a warning.
    pub fn new(extra: &[UrlPattern]) -> Self {
        let mut patterns = URL_PAT.clone();
        for entry in extra {
            match Regex::new(&entry.pattern) {
                Ok(re) => patterns.push((entry.scheme.clone(), re)),
                Err(err) => warn!(pattern = %entry.pattern, %err, "skipping bad URL pattern"),
            }
        }
        Self { patterns }
    }

    /// Extract links from an HTML document, deduplicated by URL.
    /// Every returned link carries `link` as its backref.
    pub fn extract_links(&self, link: &Link, html: &str) -> Vec<Link> {
        let document = Html::parse_document(html);

        let mut found = Vec::new();
        for element in document.select(&HREF_OR_SRC) {
            let Some(target) = element.value().attr("href").or_else(|| element.value().attr("src"))
            else {
                continue;
            };
            found.push(parse_link_from(&urljoin(&link.url, target), link));
        }

        let text = document.root_element().text().collect::<Vec<_>>().join(" ");
        found.extend(self.extract_links_from_text(link, &text));

        dedup_by_url(found)
    }

    /// Extract links from raw text via the configured patterns.
    pub fn extract_links_from_text(&self, link: &Link, text: &str) -> Vec<Link> {
        let mut found = Vec::new();
        for part in text.split_whitespace() {
            for (scheme, pattern) in &self.patterns {
                for capture in pattern.captures_iter(part) {
                    let Some(matched) = capture.name("url") else {
                        continue;
                    };
                    let matched = matched.as_str();
                    let url = if has_scheme(matched) {
                        matched.to_string()
                    } else {
                        format!("{scheme}:{matched}")
                    };
                    found.push(parse_link_from(&url, link));
                }
            }
        }
        found
    }
}

fn has_scheme(candidate: &str) -> bool {
    Url::parse(candidate).is_ok()
}

fn dedup_by_url(links: Vec<Link>) -> Vec<Link> {
    let mut seen = HashSet::with_capacity(links.len());
    links
        .into_iter()
        .filter(|link| seen.insert(link.url.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use darc_core::{parse_link, ProxyKind};

    fn extractor() -> LinkExtractor {
        LinkExtractor::new(&[])
    }

    #[test]
    fn extracts_absolute_urls_exactly() {
        let base = parse_link("http://abc.onion/");
        let html = r#"<html><body>
            <a href="http://def.onion/page">one</a>
            <img src="http://ghi.i2p/logo.png">
        </body></html>"#;
        let links = extractor().extract_links(&base, html);
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert!(urls.contains(&"http://def.onion/page"));
        assert!(urls.contains(&"http://ghi.i2p/logo.png"));
        assert!(links.iter().all(|l| l.backref.as_deref() == Some("http://abc.onion/")));
    }

    #[test]
    fn resolves_relative_urls_against_document() {
        let base = parse_link("http://abc.onion/dir/index.html");
        let html = r#"<a href="../up.html">up</a><a href="same.html">same</a>"#;
        let links = extractor().extract_links(&base, html);
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert!(urls.contains(&"http://abc.onion/up.html"));
        assert!(urls.contains(&"http://abc.onion/dir/same.html"));
    }

    #[test]
    fn deduplicates_by_url() {
        let base = parse_link("http://abc.onion/");
        let html = r#"<a href="http://def.onion/">a</a><a href="http://def.onion/">b</a>"#;
        let links = extractor().extract_links(&base, html);
        assert_eq!(
            links.iter().filter(|l| l.url == "http://def.onion/").count(),
            1
        );
    }

    #[test]
    fn text_scan_finds_bare_urls_and_addresses() {
        let base = parse_link("http://abc.onion/");
        let text = "visit http://def.onion/page or wire 1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa today";
        let links = extractor().extract_links_from_text(&base, text);
        assert!(links.iter().any(|l| l.url == "http://def.onion/page"));
        assert!(links
            .iter()
            .any(|l| l.proxy == ProxyKind::Bitcoin && l.url.contains("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa")));
    }

    #[test]
    fn text_scan_prefixes_mailto() {
        let base = parse_link("http://abc.onion/");
        let links = extractor().extract_links_from_text(&base, "contact admin@example.com now");
        assert!(links
            .iter()
            .any(|l| l.url == "mailto:admin@example.com" && l.proxy == ProxyKind::Mail));
    }

    #[test]
    fn extra_patterns_extend_the_set() {
        let extra = vec![UrlPattern {
            scheme: "monero".to_string(),
            pattern: r"\b(?P<url>4[0-9AB][1-9A-HJ-NP-Za-km-z]{93})\b".to_string(),
        }];
        let extractor = LinkExtractor::new(&extra);
        assert_eq!(extractor.patterns.len(), URL_PAT.len() + 1);
    }

    #[test]
    fn round_trips_classification() {
        let base = parse_link("http://abc.onion/");
        let html = r#"<a href="http://xyz.i2p/">i2p</a><a href="mailto:a@b.io">mail</a>"#;
        let links = extractor().extract_links(&base, html);
        for link in &links {
            assert_eq!(parse_link(&link.url).proxy, link.proxy);
            assert_eq!(parse_link(&link.url).name, link.name);
        }
    }
}
