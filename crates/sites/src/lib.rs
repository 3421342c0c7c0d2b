//! Site customisation hooks.
//!
//! A [`SiteHook`] is a pair of callbacks, one for the HTTP fetch stage and
//! one for the browser render stage. The registry resolves hooks by exact
//! (case-insensitive) hostname with [`DefaultSite`] as the fallback;
//! sentinel hosts of non-HTTP schemes resolve to sinks that record the
//! address and short-circuit the pipeline with `NoReturn`.

pub mod data;
pub mod default;
pub mod sinks;

pub use data::DataUri;
pub use default::DefaultSite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use headless_chrome::Tab;
use reqwest::Client;

use darc_core::{CrawlError, FetchRecord, Link};
use darc_storage::Archive;

#[async_trait]
pub trait SiteHook: Send + Sync {
    /// Fetch the link over the prepared session and return the response
    /// record. May return [`CrawlError::NoReturn`] to short-circuit.
    async fn crawler(
        &self,
        timestamp: DateTime<Utc>,
        session: &Client,
        link: &Link,
    ) -> Result<FetchRecord, CrawlError>;

    /// Drive the prepared browser tab to the link. May return
    /// [`CrawlError::NoReturn`] to short-circuit.
    async fn loader(
        &self,
        timestamp: DateTime<Utc>,
        tab: &Tab,
        link: &Link,
    ) -> Result<(), CrawlError>;
}

/// Hostname (case-insensitive) to hook mapping with a default fallback.
pub struct SiteRegistry {
    map: DashMap<String, Arc<dyn SiteHook>>,
    default: Arc<dyn SiteHook>,
}

impl SiteRegistry {
    /// Build the registry with the default hook and the sentinel sinks
    /// installed.
    pub fn new(archive: Arc<Archive>, se_wait: Option<Duration>) -> Self {
        let registry = Self {
            map: DashMap::new(),
            default: Arc::new(DefaultSite::new(se_wait)),
        };

        registry.register(Arc::new(DataUri::new(archive.clone())), &["(data)"]);
        for sink in sinks::default_sinks(archive) {
            let host = sink.sentinel();
            registry.register(sink, &[host]);
        }
        registry
    }

    /// Install a hook for one or more hostnames, replacing prior entries.
    pub fn register(&self, hook: Arc<dyn SiteHook>, hosts: &[&str]) {
        for host in hosts {
            self.map.insert(host.to_lowercase(), hook.clone());
        }
    }

    fn get(&self, link: &Link) -> Arc<dyn SiteHook> {
        let host = link.hostname().to_lowercase();
        self.map
            .get(&host)
            .map(|hook| hook.clone())
            .unwrap_or_else(|| self.default.clone())
    }

    pub async fn crawler_hook(
        &self,
        timestamp: DateTime<Utc>,
        session: &Client,
        link: &Link,
    ) -> Result<FetchRecord, CrawlError> {
        self.get(link).crawler(timestamp, session, link).await
    }

    pub async fn loader_hook(
        &self,
        timestamp: DateTime<Utc>,
        tab: &Tab,
        link: &Link,
    ) -> Result<(), CrawlError> {
        self.get(link).loader(timestamp, tab, link).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darc_core::parse_link;

    fn registry() -> (tempfile::TempDir, SiteRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(Archive::new(dir.path(), None).unwrap());
        (dir, SiteRegistry::new(archive, None))
    }

    #[test]
    fn sentinel_hosts_resolve_to_sinks() {
        let (_dir, registry) = registry();
        let mail = parse_link("mailto:user@example.com");
        assert!(registry.map.contains_key("(mail)"));
        assert!(registry.map.contains_key("(bitcoin)"));
        assert!(registry.map.contains_key("(data)"));
        // resolves without falling back to the default
        let hook = registry.get(&mail);
        assert!(Arc::ptr_eq(
            &hook,
            &registry.map.get("(mail)").unwrap().clone()
        ));
    }

    #[test]
    fn unknown_hosts_fall_back_to_default() {
        let (_dir, registry) = registry();
        let link = parse_link("http://abc.onion/");
        let hook = registry.get(&link);
        assert!(Arc::ptr_eq(&hook, &registry.default));
    }

    #[test]
    fn registration_is_case_insensitive() {
        let (_dir, registry) = registry();
        let hook = registry.default.clone();
        registry.register(hook.clone(), &["ABC.Onion"]);
        let link = parse_link("http://abc.onion/");
        assert!(Arc::ptr_eq(&registry.get(&link), &hook));
    }
}
