//! Sinks for non-HTTP schemes.
//!
//! Bitcoin addresses, magnet links and the rest never produce an HTTP
//! response; their hooks append the address to a per-kind list under
//! `misc/` and short-circuit with `NoReturn`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use headless_chrome::Tab;
use reqwest::Client;
use serde_json::json;
use tracing::warn;

use darc_core::{CrawlError, FetchRecord, Link};
use darc_storage::Archive;

use crate::SiteHook;

/// How a sink renders a link into its list file.
#[derive(Debug, Clone, Copy)]
enum LineFormat {
    /// The URL's path part (the address proper), e.g. `user@example.com`.
    Path,
    /// The whole URL, e.g. `wss://example.com/socket`.
    Url,
    /// JSON object with the source page, `{"src": ..., "url": ...}`.
    Json,
}

pub struct TextSink {
    sentinel: &'static str,
    file: &'static str,
    format: LineFormat,
    /// Also remove the link from its queue on sight.
    drop: bool,
    archive: Arc<Archive>,
}

impl TextSink {
    pub fn sentinel(&self) -> &'static str {
        self.sentinel
    }

    fn record(&self, link: &Link) {
        let line = match self.format {
            LineFormat::Path => link.path.clone(),
            LineFormat::Url => link.url.clone(),
            LineFormat::Json => json!({
                "src": link.backref,
                "url": link.path,
            })
            .to_string(),
        };
        if let Err(err) = self.archive.save_misc(self.file, &line) {
            warn!(url = %link.url, file = self.file, %err, "failed to record address");
        }
    }
}

#[async_trait]
impl SiteHook for TextSink {
    async fn crawler(
        &self,
        _timestamp: DateTime<Utc>,
        _session: &Client,
        link: &Link,
    ) -> Result<FetchRecord, CrawlError> {
        self.record(link);
        Err(CrawlError::NoReturn {
            url: link.url.clone(),
            drop: self.drop,
        })
    }

    async fn loader(
        &self,
        _timestamp: DateTime<Utc>,
        _tab: &Tab,
        link: &Link,
    ) -> Result<(), CrawlError> {
        Err(CrawlError::NoReturn {
            url: link.url.clone(),
            drop: true,
        })
    }
}

/// The built-in sinks, one per sentinel host.
pub fn default_sinks(archive: Arc<Archive>) -> Vec<Arc<TextSink>> {
    let sink = |sentinel, file, format, drop| {
        Arc::new(TextSink {
            sentinel,
            file,
            format,
            drop,
            archive: archive.clone(),
        })
    };
    vec![
        sink("(bitcoin)", "bitcoin.txt", LineFormat::Path, false),
        sink("(ethereum)", "ethereum.txt", LineFormat::Json, false),
        sink("(ed2k)", "ed2k.txt", LineFormat::Url, false),
        sink("(magnet)", "magnet.txt", LineFormat::Url, false),
        sink("(mail)", "mail.txt", LineFormat::Path, false),
        sink("(tel)", "tel.txt", LineFormat::Path, false),
        sink("(irc)", "irc.txt", LineFormat::Url, false),
        sink("(ws)", "ws.txt", LineFormat::Url, false),
        // scripts carry no address worth revisiting
        sink("(script)", "script.txt", LineFormat::Url, true),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use darc_core::{parse_link, parse_link_from};

    async fn run_sink(url: &str) -> (tempfile::TempDir, Result<FetchRecord, CrawlError>) {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(Archive::new(dir.path(), None).unwrap());
        let sinks = default_sinks(archive);
        let link = parse_link(url);
        let sink = sinks
            .iter()
            .find(|sink| Some(sink.sentinel()) == link.host.as_deref())
            .expect("sink for sentinel");
        let result = sink.crawler(Utc::now(), &Client::new(), &link).await;
        (dir, result)
    }

    #[tokio::test]
    async fn mail_sink_records_address_and_short_circuits() {
        let (dir, result) = run_sink("mailto:admin@example.onion").await;
        assert!(matches!(result, Err(CrawlError::NoReturn { drop: false, .. })));
        let content = std::fs::read_to_string(dir.path().join("misc/mail.txt")).unwrap();
        assert_eq!(content.trim(), "admin@example.onion");
    }

    #[tokio::test]
    async fn script_sink_requests_queue_drop() {
        let (_dir, result) = run_sink("javascript:void(0)").await;
        assert!(matches!(result, Err(CrawlError::NoReturn { drop: true, .. })));
    }

    #[tokio::test]
    async fn ethereum_sink_keeps_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(Archive::new(dir.path(), None).unwrap());
        let sinks = default_sinks(archive);
        let parent = parse_link("http://abc.onion/");
        let link = parse_link_from("ethereum:0x00000000219ab540356cBB839Cbe05303d7705Fa", &parent);
        let sink = sinks.iter().find(|s| s.sentinel() == "(ethereum)").unwrap();
        let _ = sink.crawler(Utc::now(), &Client::new(), &link).await;

        let content = std::fs::read_to_string(dir.path().join("misc/ethereum.txt")).unwrap();
        let row: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(row["src"], "http://abc.onion/");
        assert!(row["url"].as_str().unwrap().contains("0x00000000219ab540356cBB839Cbe05303d7705Fa"));
    }
}
