//! URL parsing and proxy classification.
//!
//! [`Link`] is the key data structure of the crawler: it carries everything
//! needed to pick a proxy for a URL, locate its archive folder and address
//! it inside the task queues. Two links compare equal iff their URLs do.

use std::env;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Loopback ports of the ZeroNet / Freenet web gateways, fixed at startup.
static ZERONET_PORT: Lazy<String> =
    Lazy::new(|| env::var("ZERONET_PORT").unwrap_or_else(|_| "43110".to_string()));
static FREENET_PORT: Lazy<String> =
    Lazy::new(|| env::var("FREENET_PORT").unwrap_or_else(|_| "8888".to_string()));

/// Which anonymity network or special handler a URL belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ProxyKind {
    /// Clear web, no proxy.
    Null,
    Tor,
    Tor2web,
    I2p,
    Zeronet,
    Freenet,
    Data,
    Script,
    Bitcoin,
    Ethereum,
    Ed2k,
    Magnet,
    Mail,
    Tel,
    Irc,
    Ws,
    Wss,
    /// Any other opaque URI scheme.
    Other(String),
}

impl ProxyKind {
    pub fn as_str(&self) -> &str {
        match self {
            ProxyKind::Null => "null",
            ProxyKind::Tor => "tor",
            ProxyKind::Tor2web => "tor2web",
            ProxyKind::I2p => "i2p",
            ProxyKind::Zeronet => "zeronet",
            ProxyKind::Freenet => "freenet",
            ProxyKind::Data => "data",
            ProxyKind::Script => "script",
            ProxyKind::Bitcoin => "bitcoin",
            ProxyKind::Ethereum => "ethereum",
            ProxyKind::Ed2k => "ed2k",
            ProxyKind::Magnet => "magnet",
            ProxyKind::Mail => "mail",
            ProxyKind::Tel => "tel",
            ProxyKind::Irc => "irc",
            ProxyKind::Ws => "ws",
            ProxyKind::Wss => "wss",
            ProxyKind::Other(s) => s,
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ProxyKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "null" => ProxyKind::Null,
            "tor" => ProxyKind::Tor,
            "tor2web" => ProxyKind::Tor2web,
            "i2p" => ProxyKind::I2p,
            "zeronet" => ProxyKind::Zeronet,
            "freenet" => ProxyKind::Freenet,
            "data" => ProxyKind::Data,
            "script" => ProxyKind::Script,
            "bitcoin" => ProxyKind::Bitcoin,
            "ethereum" => ProxyKind::Ethereum,
            "ed2k" => ProxyKind::Ed2k,
            "magnet" => ProxyKind::Magnet,
            "mail" => ProxyKind::Mail,
            "tel" => ProxyKind::Tel,
            "irc" => ProxyKind::Irc,
            "ws" => ProxyKind::Ws,
            "wss" => ProxyKind::Wss,
            _ => ProxyKind::Other(value),
        }
    }
}

impl From<ProxyKind> for String {
    fn from(value: ProxyKind) -> Self {
        value.as_str().to_string()
    }
}

/// A parsed, classified URL.
///
/// `name` is the SHA-256 hex digest of `url` and doubles as the file-system
/// identifier and the queue member key. `base` is the logical archive
/// directory `<proxy>/<scheme>/<host-or-sentinel>`, relative to the data
/// root so that classification stays a pure function of the URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    /// Original URL, unmodified.
    pub url: String,
    pub scheme: String,
    /// Authority (`host[:port]`), or a `(sentinel)` for special schemes.
    pub host: Option<String>,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
    pub proxy: ProxyKind,
    /// SHA-256 hex digest of `url`.
    pub name: String,
    /// `<proxy>/<scheme>/<host-or-sentinel>`, relative to the data root.
    pub base: PathBuf,
    /// URL of the link this one was extracted from. Provenance only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backref: Option<String>,
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl Link {
    /// Hostname used in the archive path; `(null)` when the URL has none.
    pub fn hostname(&self) -> &str {
        self.host.as_deref().unwrap_or("(null)")
    }

    /// Whether the URL points at the root path (`/` or empty).
    pub fn is_root_path(&self) -> bool {
        self.path.is_empty() || self.path == "/"
    }
}

/// SHA-256 hex digest of a URL string.
pub fn hash_link(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Resolve `href` against `base`, falling back to naive concatenation when
/// the base cannot be parsed. Absolute URLs pass through untouched.
pub fn urljoin(base: &str, href: &str) -> String {
    if Url::parse(href).is_ok() {
        return href.to_string();
    }
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => format!("{}/{}", base.trim_end_matches('/'), href.trim_start_matches('/')),
    }
}

/// Parse and classify a URL.
pub fn parse_link(link: &str) -> Link {
    parse_link_inner(link, None)
}

/// Parse and classify a URL discovered from `backref`.
pub fn parse_link_from(link: &str, backref: &Link) -> Link {
    parse_link_inner(link, Some(backref.url.clone()))
}

fn parse_link_inner(link: &str, backref: Option<String>) -> Link {
    let (scheme, parsed_host, path, query, fragment) = match Url::parse(link) {
        Ok(url) => {
            let host = url.host_str().map(|h| match url.port() {
                Some(port) => format!("{h}:{port}"),
                None => h.to_string(),
            });
            (
                url.scheme().to_ascii_lowercase(),
                host,
                url.path().to_string(),
                url.query().map(str::to_string),
                url.fragment().map(str::to_string),
            )
        }
        // Unparseable input: sentinel path, no host, no proxy.
        Err(_) => (String::new(), None, link.to_string(), None, None),
    };

    let mut host = parsed_host;
    let root_path = path.is_empty() || path == "/";

    let proxy = match scheme.as_str() {
        "data" => {
            host = Some("(data)".to_string());
            ProxyKind::Data
        }
        "javascript" => {
            host = Some("(script)".to_string());
            ProxyKind::Script
        }
        "bitcoin" | "btc" => {
            host = Some("(bitcoin)".to_string());
            ProxyKind::Bitcoin
        }
        "ethereum" | "eth" => {
            host = Some("(ethereum)".to_string());
            ProxyKind::Ethereum
        }
        "ed2k" => {
            host = Some("(ed2k)".to_string());
            ProxyKind::Ed2k
        }
        "magnet" => {
            host = Some("(magnet)".to_string());
            ProxyKind::Magnet
        }
        "mailto" => {
            host = Some("(mail)".to_string());
            ProxyKind::Mail
        }
        "tel" => {
            host = Some("(tel)".to_string());
            ProxyKind::Tel
        }
        "irc" => {
            host = Some("(irc)".to_string());
            ProxyKind::Irc
        }
        "ws" => {
            host = Some("(ws)".to_string());
            ProxyKind::Ws
        }
        "wss" => {
            host = Some("(ws)".to_string());
            ProxyKind::Wss
        }
        "http" | "https" => match host.clone() {
            None => ProxyKind::Null,
            Some(authority) => {
                let lower = authority.to_ascii_lowercase();
                if lower.ends_with(".onion") {
                    ProxyKind::Tor
                } else if lower.ends_with(".onion.sh") {
                    ProxyKind::Tor2web
                } else if lower.ends_with(".i2p") || is_i2p_console(&lower) {
                    ProxyKind::I2p
                } else if is_loopback_gateway(&lower, &ZERONET_PORT) && !root_path {
                    host = first_path_segment(&path);
                    ProxyKind::Zeronet
                } else if is_loopback_gateway(&lower, &FREENET_PORT) && !root_path {
                    host = first_path_segment(&path);
                    ProxyKind::Freenet
                } else {
                    ProxyKind::Null
                }
            }
        },
        "" => ProxyKind::Null,
        other => ProxyKind::Other(other.to_string()),
    };

    let hostname = host.as_deref().unwrap_or("(null)");
    let scheme_dir = if scheme.is_empty() { "(null)" } else { scheme.as_str() };
    let base = PathBuf::from(proxy.as_str()).join(scheme_dir).join(hostname);

    Link {
        name: hash_link(link),
        url: link.to_string(),
        scheme,
        host,
        path,
        query,
        fragment,
        proxy,
        base,
        backref,
    }
}

fn is_i2p_console(host: &str) -> bool {
    matches!(
        host,
        "127.0.0.1:7657" | "127.0.0.1:7658" | "localhost:7657" | "localhost:7658"
    )
}

fn is_loopback_gateway(host: &str, port: &str) -> bool {
    host == format!("127.0.0.1:{port}") || host == format!("localhost:{port}")
}

fn first_path_segment(path: &str) -> Option<String> {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_sha256_of_url() {
        let link = parse_link("http://example.com/");
        assert_eq!(link.name, hash_link("http://example.com/"));
        assert_eq!(link.name.len(), 64);
        // determinism
        assert_eq!(parse_link("http://example.com/"), link);
        assert_eq!(parse_link("http://example.com/").name, link.name);
    }

    #[test]
    fn classifies_onion_as_tor() {
        let link = parse_link("http://abc.onion/");
        assert_eq!(link.proxy, ProxyKind::Tor);
        assert_eq!(link.host.as_deref(), Some("abc.onion"));
        assert_eq!(link.base, PathBuf::from("tor/http/abc.onion"));
    }

    #[test]
    fn classifies_proxied_onion_as_tor2web() {
        let link = parse_link("https://abc.onion.sh/page");
        assert_eq!(link.proxy, ProxyKind::Tor2web);
    }

    #[test]
    fn classifies_i2p_by_suffix_and_console_port() {
        assert_eq!(parse_link("http://xyz.i2p/").proxy, ProxyKind::I2p);
        assert_eq!(parse_link("http://localhost:7657/console").proxy, ProxyKind::I2p);
        assert_eq!(parse_link("http://127.0.0.1:7658/").proxy, ProxyKind::I2p);
    }

    #[test]
    fn classifies_zeronet_path_host() {
        let link = parse_link("http://127.0.0.1:43110/1HeLLo4uzjaLetFx6NH3PMwFP3qbRbTf3D/page");
        assert_eq!(link.proxy, ProxyKind::Zeronet);
        assert_eq!(
            link.host.as_deref(),
            Some("1HeLLo4uzjaLetFx6NH3PMwFP3qbRbTf3D")
        );
    }

    #[test]
    fn zeronet_root_path_is_plain() {
        let link = parse_link("http://127.0.0.1:43110/");
        assert_eq!(link.proxy, ProxyKind::Null);
    }

    #[test]
    fn classifies_freenet_key_host() {
        let link = parse_link("http://127.0.0.1:8888/USK@abc,def,AQACAAE/sone/77/");
        assert_eq!(link.proxy, ProxyKind::Freenet);
        assert_eq!(link.host.as_deref(), Some("USK@abc,def,AQACAAE"));
    }

    #[test]
    fn classifies_data_uri_with_sentinel_host() {
        let link = parse_link("data:text/plain;base64,SGk=");
        assert_eq!(link.proxy, ProxyKind::Data);
        assert_eq!(link.host.as_deref(), Some("(data)"));
        assert_eq!(link.base, PathBuf::from("data/data/(data)"));
    }

    #[test]
    fn classifies_special_schemes() {
        assert_eq!(parse_link("mailto:user@example.com").proxy, ProxyKind::Mail);
        assert_eq!(parse_link("bitcoin:1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").proxy, ProxyKind::Bitcoin);
        assert_eq!(parse_link("btc:1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").proxy, ProxyKind::Bitcoin);
        assert_eq!(parse_link("ethereum:0x0000000000000000000000000000000000000000").proxy, ProxyKind::Ethereum);
        assert_eq!(parse_link("magnet:?xt=urn:btih:deadbeef").proxy, ProxyKind::Magnet);
        assert_eq!(parse_link("tel:+1234567890").proxy, ProxyKind::Tel);
        assert_eq!(parse_link("irc://irc.example.com/channel").proxy, ProxyKind::Irc);
        assert_eq!(parse_link("javascript:void(0)").proxy, ProxyKind::Script);
        assert_eq!(parse_link("ws://example.com/socket").proxy, ProxyKind::Ws);
        assert_eq!(parse_link("wss://example.com/socket").proxy, ProxyKind::Wss);
        assert_eq!(parse_link("wss://example.com/socket").host.as_deref(), Some("(ws)"));
    }

    #[test]
    fn opaque_scheme_becomes_its_own_kind() {
        let link = parse_link("ftp://files.example.com/pub");
        assert_eq!(link.proxy, ProxyKind::Other("ftp".to_string()));
    }

    #[test]
    fn unparseable_url_never_fails() {
        let link = parse_link("not a url at all");
        assert_eq!(link.proxy, ProxyKind::Null);
        assert!(link.host.is_none());
        assert_eq!(link.path, "not a url at all");
        assert_eq!(link.hostname(), "(null)");
    }

    #[test]
    fn clear_web_is_null_proxy() {
        let link = parse_link("https://example.com/about?q=1#frag");
        assert_eq!(link.proxy, ProxyKind::Null);
        assert_eq!(link.host.as_deref(), Some("example.com"));
        assert_eq!(link.query.as_deref(), Some("q=1"));
        assert_eq!(link.fragment.as_deref(), Some("frag"));
    }

    #[test]
    fn equality_ignores_backref() {
        let parent = parse_link("http://a.onion/");
        let one = parse_link("http://b.onion/");
        let two = parse_link_from("http://b.onion/", &parent);
        assert_eq!(one, two);
        assert_eq!(two.backref.as_deref(), Some("http://a.onion/"));
    }

    #[test]
    fn payload_round_trips_through_json() {
        let link = parse_link("http://abc.onion/path?x=y");
        let json = serde_json::to_string(&link).unwrap();
        let back: Link = serde_json::from_str(&json).unwrap();
        assert_eq!(back, link);
        assert_eq!(back.proxy, link.proxy);
        assert_eq!(back.base, link.base);
        assert_eq!(parse_link(&back.url), back);
    }

    #[test]
    fn proxy_kind_string_round_trip() {
        for kind in [
            ProxyKind::Null,
            ProxyKind::Tor,
            ProxyKind::Tor2web,
            ProxyKind::Zeronet,
            ProxyKind::Other("gopher".to_string()),
        ] {
            assert_eq!(ProxyKind::from(String::from(kind.clone())), kind);
        }
    }

    #[test]
    fn urljoin_resolves_relative_and_keeps_absolute() {
        assert_eq!(
            urljoin("http://abc.onion/dir/page.html", "../other.html"),
            "http://abc.onion/other.html"
        );
        assert_eq!(
            urljoin("http://abc.onion/", "http://def.onion/x"),
            "http://def.onion/x"
        );
    }
}
