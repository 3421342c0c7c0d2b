//! Data URI handling: decode the body into the archive, then stop the
//! pipeline. Data links never reach the render queue.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use headless_chrome::Tab;
use reqwest::Client;
use tracing::warn;

use darc_core::{CrawlError, FetchRecord, Link};
use darc_storage::Archive;

use crate::SiteHook;

pub struct DataUri {
    archive: Arc<Archive>,
}

impl DataUri {
    pub fn new(archive: Arc<Archive>) -> Self {
        Self { archive }
    }
}

#[async_trait]
impl SiteHook for DataUri {
    async fn crawler(
        &self,
        _timestamp: DateTime<Utc>,
        _session: &Client,
        link: &Link,
    ) -> Result<FetchRecord, CrawlError> {
        match decode_data_uri(&link.url) {
            Ok((mime, body)) => {
                let ext = extension_for(&mime);
                self.archive.save_data(link, &body, ext)?;
            }
            Err(err) => warn!(url = %link.url, %err, "failed to decode data URI"),
        }
        Err(CrawlError::NoReturn {
            url: link.url.clone(),
            drop: false,
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

/// Split a `data:[<mediatype>][;base64],<data>` URI into its media type
/// and decoded payload.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>), CrawlError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| CrawlError::InvalidUrl(format!("not a data URI: {uri}")))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| CrawlError::InvalidUrl(format!("data URI without payload: {uri}")))?;

    let (mime, is_base64) = match meta.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (meta, false),
    };
    let mime = if mime.is_empty() { "text/plain" } else { mime };
    let mime = mime.split(';').next().unwrap_or(mime).to_ascii_lowercase();

    let body = if is_base64 {
        BASE64
            .decode(payload)
            .map_err(|err| CrawlError::Parse(format!("base64 payload: {err}")))?
    } else {
        percent_decode(payload)
    };
    Ok((mime, body))
}

fn percent_decode(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(index + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(index + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                index += 3;
                continue;
            }
        }
        out.push(bytes[index]);
        index += 1;
    }
    out
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "text/plain" => ".txt",
        "text/html" => ".html",
        "text/css" => ".css",
        "text/csv" => ".csv",
        "application/json" => ".json",
        "application/javascript" | "text/javascript" => ".js",
        "application/xml" | "text/xml" => ".xml",
        "application/pdf" => ".pdf",
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "image/svg+xml" => ".svg",
        "image/webp" => ".webp",
        _ => ".dat",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darc_core::parse_link;

    #[test]
    fn decodes_base64_payload() {
        let (mime, body) = decode_data_uri("data:text/plain;base64,SGk=").unwrap();
        assert_eq!(mime, "text/plain");
        assert_eq!(body, b"Hi");
    }

    #[test]
    fn decodes_percent_encoded_payload() {
        let (mime, body) = decode_data_uri("data:,Hello%2C%20World%21").unwrap();
        assert_eq!(mime, "text/plain");
        assert_eq!(body, b"Hello, World!");
    }

    #[test]
    fn rejects_malformed_uris() {
        assert!(decode_data_uri("data:text/plain").is_err());
        assert!(decode_data_uri("http://example.com/").is_err());
    }

    #[tokio::test]
    async fn crawler_saves_body_and_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(Archive::new(dir.path(), None).unwrap());
        let hook = DataUri::new(archive.clone());
        let link = parse_link("data:text/plain;base64,SGk=");
        let session = Client::new();

        let result = hook.crawler(Utc::now(), &session, &link).await;
        assert!(matches!(
            result,
            Err(CrawlError::NoReturn { drop: false, .. })
        ));

        let saved = dir
            .path()
            .join("data/data/(data)")
            .join(format!("{}.txt", link.name));
        assert_eq!(std::fs::read(saved).unwrap(), b"Hi");
    }
}
