//! Proxy plumbing: per-kind session and driver factories, and the
//! supervisor that owns the external daemons.

pub mod daemon;
pub mod driver;
pub mod session;

pub use daemon::ProxySupervisor;
pub use driver::SE_EMPTY;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use headless_chrome::Browser;
use reqwest::Client;

use darc_core::{AppConfig, CrawlError, Link, ProxyKind};

use crate::session::SessionSettings;

pub type SessionFactory = Arc<dyn Fn() -> Result<Client, CrawlError> + Send + Sync>;
pub type DriverFactory = Arc<dyn Fn() -> Result<Browser, CrawlError> + Send + Sync>;

/// Factories for one proxy kind. Either half may be absent; asking for a
/// missing one is an `UnsupportedLink`.
#[derive(Clone)]
pub struct ProxyEntry {
    pub session: Option<SessionFactory>,
    pub driver: Option<DriverFactory>,
}

impl ProxyEntry {
    pub fn new(session: SessionFactory, driver: DriverFactory) -> Self {
        Self {
            session: Some(session),
            driver: Some(driver),
        }
    }
}

/// Mapping from proxy kind to factories. Kinds without an explicit entry
/// fall back to the direct (no-proxy) entry, so sentinel kinds like `mail`
/// still get a session for their hooks to ignore.
pub struct ProxyRegistry {
    map: DashMap<ProxyKind, ProxyEntry>,
    fallback: ProxyEntry,
}

impl ProxyRegistry {
    pub fn new(config: &AppConfig) -> Self {
        let settings = SessionSettings {
            connect_timeout: Duration::from_secs(config.general.connect_timeout_seconds),
            request_timeout: Duration::from_secs(config.general.request_timeout_seconds),
        };

        let fallback = ProxyEntry::new(
            Arc::new(move || session::null_session(&settings)),
            Arc::new(driver::null_driver),
        );

        let map = DashMap::new();
        let tor_port = config.tor.socks_port;
        map.insert(
            ProxyKind::Tor,
            ProxyEntry::new(
                Arc::new(move || session::tor_session(tor_port, &settings)),
                Arc::new(move || driver::tor_driver(tor_port)),
            ),
        );
        let i2p_port = config.i2p.http_port;
        map.insert(
            ProxyKind::I2p,
            ProxyEntry::new(
                Arc::new(move || session::i2p_session(i2p_port, &settings)),
                Arc::new(move || driver::i2p_driver(i2p_port)),
            ),
        );

        Self { map, fallback }
    }

    /// Install or replace the factories for a proxy kind.
    pub fn register(&self, kind: ProxyKind, entry: ProxyEntry) {
        self.map.insert(kind, entry);
    }

    fn entry(&self, kind: &ProxyKind) -> ProxyEntry {
        self.map
            .get(kind)
            .map(|entry| entry.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Fresh HTTP session for the link's proxy kind.
    pub fn session(&self, link: &Link) -> Result<Client, CrawlError> {
        let entry = self.entry(&link.proxy);
        let factory = entry
            .session
            .ok_or_else(|| CrawlError::UnsupportedLink(link.url.clone()))?;
        factory()
    }

    /// Fresh headless browser for the link's proxy kind.
    pub fn driver(&self, link: &Link) -> Result<Browser, CrawlError> {
        let entry = self.entry(&link.proxy);
        let factory = entry
            .driver
            .ok_or_else(|| CrawlError::UnsupportedLink(link.url.clone()))?;
        factory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darc_core::parse_link;

    #[test]
    fn unknown_kinds_fall_back_to_direct_sessions() {
        let registry = ProxyRegistry::new(&AppConfig::default());
        let link = parse_link("mailto:user@example.com");
        assert!(registry.session(&link).is_ok());
    }

    #[test]
    fn registered_none_yields_unsupported_link() {
        let registry = ProxyRegistry::new(&AppConfig::default());
        registry.register(
            ProxyKind::Magnet,
            ProxyEntry {
                session: None,
                driver: None,
            },
        );
        let link = parse_link("magnet:?xt=urn:btih:deadbeef");
        assert!(matches!(
            registry.session(&link),
            Err(CrawlError::UnsupportedLink(_))
        ));
    }
}
