//! Keep/drop decisions for proxy kinds, hostnames and content types.
//!
//! All three share the same three-stage logic: black list beats white list
//! beats the configured fallback. `match_*` returning `true` means *drop*.

use regex::{Regex, RegexBuilder};

use darc_core::config::FilterConfig;
use darc_core::{CrawlError, Link, ProxyKind};

pub struct FilterPolicy {
    proxy_white: Vec<ProxyKind>,
    proxy_black: Vec<ProxyKind>,
    proxy_fallback: bool,
    link_white: Vec<Regex>,
    link_black: Vec<Regex>,
    link_fallback: bool,
    mime_white: Vec<Regex>,
    mime_black: Vec<Regex>,
    mime_fallback: bool,
}

impl FilterPolicy {
    pub fn from_config(config: &FilterConfig) -> Result<Self, CrawlError> {
        Ok(Self {
            proxy_white: kinds(&config.proxy_white_list),
            proxy_black: kinds(&config.proxy_black_list),
            proxy_fallback: config.proxy_fallback,
            link_white: full_match_set(&config.link_white_list)?,
            link_black: full_match_set(&config.link_black_list)?,
            link_fallback: config.link_fallback,
            mime_white: full_match_set(&config.mime_white_list)?,
            mime_black: full_match_set(&config.mime_black_list)?,
            mime_fallback: config.mime_fallback,
        })
    }

    /// Whether a proxy kind should be dropped. `script` always is.
    pub fn match_proxy(&self, proxy: &ProxyKind) -> bool {
        if *proxy == ProxyKind::Script {
            return true;
        }
        if self.proxy_black.contains(proxy) {
            return true;
        }
        if self.proxy_white.contains(proxy) {
            return false;
        }
        self.proxy_fallback
    }

    /// Whether a hostname should be dropped. A missing host always is.
    pub fn match_host(&self, host: Option<&str>) -> bool {
        let Some(host) = host else {
            return true;
        };
        if self.link_black.iter().any(|pattern| pattern.is_match(host)) {
            return true;
        }
        if self.link_white.iter().any(|pattern| pattern.is_match(host)) {
            return false;
        }
        self.link_fallback
    }

    /// Whether a content type should be dropped.
    pub fn match_mime(&self, mime: &str) -> bool {
        if self.mime_black.iter().any(|pattern| pattern.is_match(mime)) {
            return true;
        }
        if self.mime_white.iter().any(|pattern| pattern.is_match(mime)) {
            return false;
        }
        self.mime_fallback
    }

    /// Filter a link pool by hostname and proxy kind.
    pub fn check(&self, links: Vec<Link>) -> Vec<Link> {
        links
            .into_iter()
            .filter(|link| !self.match_host(link.host.as_deref()))
            .filter(|link| !self.match_proxy(&link.proxy))
            .collect()
    }
}

fn kinds(values: &[String]) -> Vec<ProxyKind> {
    values
        .iter()
        .map(|value| ProxyKind::from(value.to_ascii_lowercase()))
        .collect()
}

/// Compile patterns anchored for case-insensitive full matches.
fn full_match_set(patterns: &[String]) -> Result<Vec<Regex>, CrawlError> {
    patterns
        .iter()
        .map(|pattern| {
            RegexBuilder::new(&format!(r"\A(?:{pattern})\z"))
                .case_insensitive(true)
                .build()
                .map_err(|err| CrawlError::Config(format!("bad filter pattern {pattern:?}: {err}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use darc_core::parse_link;

    fn policy(config: FilterConfig) -> FilterPolicy {
        FilterPolicy::from_config(&config).unwrap()
    }

    #[test]
    fn script_kind_is_always_dropped() {
        let policy = policy(FilterConfig {
            proxy_white_list: vec!["script".to_string()],
            ..FilterConfig::default()
        });
        assert!(policy.match_proxy(&ProxyKind::Script));
    }

    #[test]
    fn black_list_beats_white_list_beats_fallback() {
        let policy = policy(FilterConfig {
            proxy_black_list: vec!["tor".to_string()],
            proxy_white_list: vec!["tor".to_string(), "i2p".to_string()],
            proxy_fallback: true,
            ..FilterConfig::default()
        });
        assert!(policy.match_proxy(&ProxyKind::Tor));
        assert!(!policy.match_proxy(&ProxyKind::I2p));
        assert!(policy.match_proxy(&ProxyKind::Freenet));
    }

    #[test]
    fn host_patterns_full_match_case_insensitive() {
        let policy = policy(FilterConfig {
            link_black_list: vec![r".*\.example\.com".to_string()],
            ..FilterConfig::default()
        });
        assert!(policy.match_host(Some("WWW.EXAMPLE.COM")));
        assert!(!policy.match_host(Some("example.org")));
        // substring must not match
        assert!(!policy.match_host(Some("www.example.com.evil.net")));
    }

    #[test]
    fn missing_host_is_always_dropped() {
        let policy = policy(FilterConfig::default());
        assert!(policy.match_host(None));
    }

    #[test]
    fn mime_precedence() {
        let policy = policy(FilterConfig {
            mime_black_list: vec!["image/.*".to_string()],
            mime_white_list: vec!["image/png".to_string(), "text/plain".to_string()],
            mime_fallback: true,
            ..FilterConfig::default()
        });
        assert!(policy.match_mime("image/png"));
        assert!(!policy.match_mime("text/plain"));
        assert!(policy.match_mime("application/zip"));
    }

    #[test]
    fn check_filters_pool() {
        let policy = policy(FilterConfig {
            proxy_black_list: vec!["freenet".to_string()],
            ..FilterConfig::default()
        });
        let pool = vec![
            parse_link("http://abc.onion/"),
            parse_link("http://127.0.0.1:8888/USK@a,b,AQACAAE/site/1/"),
            parse_link("javascript:void(0)"),
        ];
        let kept = policy.check(pool);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].proxy, ProxyKind::Tor);
    }
}
