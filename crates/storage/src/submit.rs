//! Submission records.
//!
//! Every fetch, render and newly discovered host produces a JSON record.
//! Records are POSTed to the configured endpoints; on failure, or when no
//! endpoint is configured, they are kept on disk under
//! `api/<date>/<base>/<domain>/`. Binary fields are base64 encoded.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use darc_core::config::ApiConfig;
use darc_core::{FetchRecord, Link, ProxyKind};

use crate::{format_stamp, link_metadata};

/// A `{path, data}` pair for a file shipped inside a submission.
fn file_payload(root: &Path, path: &Path) -> Option<Value> {
    let content = fs::read(path).ok()?;
    let rel = path.strip_prefix(root).unwrap_or(path);
    Some(json!({
        "path": rel.to_string_lossy(),
        "data": BASE64.encode(content),
    }))
}

pub struct Submitter {
    client: reqwest::Client,
    api_new_host: Option<String>,
    api_requests: Option<String>,
    api_selenium: Option<String>,
    retry: u32,
    root: PathBuf,
}

impl Submitter {
    pub fn new(config: &ApiConfig, root: impl Into<PathBuf>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!("darc/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_new_host: config.new_host.clone(),
            api_requests: config.requests.clone(),
            api_selenium: config.selenium.clone(),
            retry: config.retry,
            root: root.into(),
        }
    }

    /// Submit a newly discovered host with its robots/sitemaps/hosts bodies.
    pub async fn submit_new_host(&self, time: DateTime<Utc>, link: &Link, partial: bool, force: bool) {
        let base = self.root.join(&link.base);

        let robots = file_payload(&self.root, &base.join("robots.txt"));
        let hosts = (link.proxy == ProxyKind::I2p)
            .then(|| file_payload(&self.root, &base.join("hosts.txt")))
            .flatten();

        let mut sitemaps = Vec::new();
        if let Ok(entries) = fs::read_dir(&base) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with("sitemap_") && name.ends_with(".xml") {
                    if let Some(payload) = file_payload(&self.root, &entry.path()) {
                        sitemaps.push(payload);
                    }
                }
            }
        }

        let data = json!({
            "$PARTIAL$": partial,
            "$FORCE$": force,
            "[metadata]": link_metadata(link),
            "Timestamp": format_stamp(time),
            "URL": link.url,
            "Robots": robots,
            "Sitemaps": if sitemaps.is_empty() { Value::Null } else { Value::Array(sitemaps) },
            "Hosts": hosts,
        });

        self.dispatch(self.api_new_host.as_deref(), "new_host", data).await;
    }

    /// Submit fetch results: headers, cookies, document and redirect history.
    pub async fn submit_requests(
        &self,
        time: DateTime<Utc>,
        link: &Link,
        record: &FetchRecord,
        mime_type: &str,
        html: bool,
    ) {
        let stamp = format_stamp(time);
        let document_path = if html {
            link.base.join(format!("{}_{}_raw.html", link.name, stamp))
        } else {
            link.base.join(format!("{}_{}.dat", link.name, stamp))
        };

        let history: Vec<Value> = record
            .history
            .iter()
            .map(|hop| {
                json!({
                    "URL": hop.url,
                    "Method": hop.method,
                    "Status-Code": hop.status,
                    "Reason": hop.reason,
                    "Cookies": hop.cookies,
                    "Request": hop.request,
                    "Response": hop.response,
                    "Document": BASE64.encode(&hop.body),
                })
            })
            .collect();

        let data = json!({
            "[metadata]": link_metadata(link),
            "Timestamp": stamp,
            "URL": link.url,
            "Method": record.method,
            "Status-Code": record.status,
            "Reason": record.reason,
            "Cookies": record.cookies,
            "Session": record.session,
            "Request": record.request,
            "Response": record.response,
            "Content-Type": mime_type,
            "Document": {
                "path": document_path.to_string_lossy(),
                "data": BASE64.encode(&record.body),
            },
            "History": history,
        });

        self.dispatch(self.api_requests.as_deref(), "requests", data).await;
    }

    /// Submit render results: the rendered DOM and an optional screenshot.
    pub async fn submit_selenium(
        &self,
        time: DateTime<Utc>,
        link: &Link,
        html: &str,
        screenshot: Option<&[u8]>,
    ) {
        let stamp = format_stamp(time);
        let data = json!({
            "[metadata]": link_metadata(link),
            "Timestamp": stamp,
            "URL": link.url,
            "Document": {
                "path": link.base.join(format!("{}_{}.html", link.name, stamp)).to_string_lossy(),
                "data": BASE64.encode(html.as_bytes()),
            },
            "Screenshot": screenshot.map(|png| json!({
                "path": link.base.join(format!("{}_{}.png", link.name, stamp)).to_string_lossy(),
                "data": BASE64.encode(png),
            })),
        });

        self.dispatch(self.api_selenium.as_deref(), "selenium", data).await;
    }

    /// POST with retries, or fall straight through to the on-disk spool.
    async fn dispatch(&self, api: Option<&str>, domain: &str, data: Value) {
        if let Some(api) = api {
            for attempt in 0..=self.retry {
                match self.client.post(api).json(&data).send().await {
                    Ok(response) if response.status().is_success() => return,
                    Ok(response) => {
                        debug!(domain, attempt, status = %response.status(), "submission rejected");
                    }
                    Err(err) => {
                        warn!(domain, attempt, %err, "submission request failed");
                    }
                }
            }
        }
        self.save_submit(domain, &data);
    }

    /// Spool a submission under `api/<date>/<base>/<domain>/<name>_<ts>.json`.
    fn save_submit(&self, domain: &str, data: &Value) {
        let metadata = &data["[metadata]"];
        let name = metadata["name"].as_str().unwrap_or("unknown");
        let base = metadata["base"].as_str().unwrap_or("unknown");
        let stamp = data["Timestamp"].as_str().unwrap_or("unknown");

        let root = self
            .root
            .join("api")
            .join(Utc::now().date_naive().to_string())
            .join(base)
            .join(domain);
        if let Err(err) = fs::create_dir_all(&root) {
            warn!(domain, %err, "failed to create submission spool");
            return;
        }
        let path = root.join(format!("{name}_{stamp}.json"));
        match serde_json::to_string_pretty(data) {
            Ok(body) => {
                if let Err(err) = fs::write(&path, body) {
                    warn!(domain, path = %path.display(), %err, "failed to spool submission");
                }
            }
            Err(err) => warn!(domain, %err, "failed to serialise submission"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darc_core::parse_link;
    use std::collections::HashMap;

    fn submitter(root: &Path) -> Submitter {
        Submitter::new(&ApiConfig::default(), root)
    }

    fn record(body: &[u8]) -> FetchRecord {
        FetchRecord {
            url: "http://abc.onion/".to_string(),
            method: "GET".to_string(),
            status: 200,
            reason: "OK".to_string(),
            cookies: HashMap::new(),
            session: HashMap::new(),
            request: HashMap::new(),
            response: HashMap::new(),
            body: body.to_vec(),
            history: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unset_endpoint_spools_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = submitter(dir.path());
        let link = parse_link("http://abc.onion/");
        submitter
            .submit_requests(Utc::now(), &link, &record(b"<html></html>"), "text/html", true)
            .await;

        let spool = dir.path().join("api");
        let mut found = Vec::new();
        for day in fs::read_dir(spool).unwrap().flatten() {
            for base in walkdir(&day.path()) {
                found.push(base);
            }
        }
        assert_eq!(found.len(), 1);
        let body: Value = serde_json::from_str(&fs::read_to_string(&found[0]).unwrap()).unwrap();
        assert_eq!(body["URL"], "http://abc.onion/");
        assert_eq!(
            body["Document"]["data"],
            BASE64.encode(b"<html></html>")
        );
        assert!(found[0].to_string_lossy().contains("requests"));
    }

    #[tokio::test]
    async fn new_host_submission_carries_robots_body() {
        let dir = tempfile::tempdir().unwrap();
        let link = parse_link("http://abc.onion/");
        let base = dir.path().join(&link.base);
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join("robots.txt"), "User-agent: *\n").unwrap();

        let submitter = submitter(dir.path());
        submitter.submit_new_host(Utc::now(), &link, true, false).await;

        let mut files = walkdir(&dir.path().join("api"));
        assert_eq!(files.len(), 1);
        let body: Value =
            serde_json::from_str(&fs::read_to_string(files.pop().unwrap()).unwrap()).unwrap();
        assert_eq!(body["$PARTIAL$"], true);
        assert_eq!(body["$FORCE$"], false);
        assert_eq!(body["Robots"]["data"], BASE64.encode(b"User-agent: *\n"));
        assert!(body["Hosts"].is_null());
        assert!(body["Sitemaps"].is_null());
    }

    fn walkdir(root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let Ok(entries) = fs::read_dir(root) else {
            return files;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(walkdir(&path));
            } else {
                files.push(path);
            }
        }
        files
    }
}
