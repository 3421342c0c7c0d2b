//! Sitemap reading: `<loc>` extraction, index detection and transparent
//! gzip decompression.

use std::io::Read;

use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use regex::Regex;

use darc_core::{parse_link_from, CrawlError, Link};

static LOC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<loc>\s*(.*?)\s*</loc>").expect("static regex"));

/// Gzip magic bytes.
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, CrawlError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|err| CrawlError::Parse(format!("gzip sitemap: {err}")))?;
    Ok(out)
}

/// An index sitemap lists further sitemaps instead of page URLs.
pub fn is_sitemap_index(xml: &str) -> bool {
    xml.contains("<sitemapindex")
}

/// `<loc>` values in document order.
pub fn extract_locs(xml: &str) -> Vec<String> {
    LOC_RE
        .captures_iter(xml)
        .filter_map(|capture| capture.get(1).map(|m| m.as_str().to_string()))
        .filter(|loc| !loc.is_empty())
        .collect()
}

/// Classify every `<loc>` URL of a (non-index) sitemap.
pub fn read_sitemap(link: &Link, xml: &str) -> Vec<Link> {
    extract_locs(xml)
        .iter()
        .map(|loc| parse_link_from(loc, link))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use darc_core::parse_link;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const URLSET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>http://abc.onion/a</loc></url>
  <url><loc> http://abc.onion/b </loc></url>
</urlset>"#;

    const INDEX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>http://abc.onion/sitemap_1.xml</loc></sitemap>
</sitemapindex>"#;

    #[test]
    fn extracts_locs_and_trims_whitespace() {
        assert_eq!(
            extract_locs(URLSET),
            vec!["http://abc.onion/a".to_string(), "http://abc.onion/b".to_string()]
        );
    }

    #[test]
    fn detects_index_sitemaps() {
        assert!(is_sitemap_index(INDEX));
        assert!(!is_sitemap_index(URLSET));
    }

    #[test]
    fn read_sitemap_classifies_urls() {
        let origin = parse_link("http://abc.onion/");
        let links = read_sitemap(&origin, URLSET);
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.backref.as_deref() == Some("http://abc.onion/")));
        assert_eq!(links[0].proxy, darc_core::ProxyKind::Tor);
    }

    #[test]
    fn gzip_round_trip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(URLSET.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        assert!(is_gzip(&compressed));
        assert_eq!(gunzip(&compressed).unwrap(), URLSET.as_bytes());
        assert!(!is_gzip(URLSET.as_bytes()));
    }
}
