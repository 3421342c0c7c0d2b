//! Content-addressed filesystem archive.
//!
//! Everything a worker fetches or renders lands under
//! `<data-root>/<proxy>/<scheme>/<host>/` named by the link's SHA-256 and an
//! ISO-8601 timestamp. Files are written once and never mutated; concurrent
//! workers cannot collide because the timestamp is part of the name.

pub mod submit;

pub use submit::Submitter;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use tracing::warn;

use darc_core::{CrawlError, FetchRecord, Link};

/// Kinds of per-fetch artifacts and their file suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Headers record, `<name>_<ts>.json`.
    Headers,
    /// Raw HTML from the fetcher, `<name>_<ts>_raw.html`.
    Raw,
    /// Rendered HTML from the loader, `<name>_<ts>.html`.
    Html,
    /// Generic binary payload, `<name>_<ts>.dat`.
    Data,
    /// Screenshot, `<name>_<ts>.png`.
    Screenshot,
}

impl ArtifactKind {
    fn suffix(&self) -> &'static str {
        match self {
            ArtifactKind::Headers => ".json",
            ArtifactKind::Raw => "_raw.html",
            ArtifactKind::Html => ".html",
            ArtifactKind::Data => ".dat",
            ArtifactKind::Screenshot => ".png",
        }
    }
}

pub struct Archive {
    root: PathBuf,
    time_cache: Option<Duration>,
    /// Serialises appends to link.csv and the misc/ sink files.
    append_lock: Mutex<()>,
}

impl Archive {
    pub fn new(root: impl Into<PathBuf>, time_cache: Option<Duration>) -> Result<Self, CrawlError> {
        let root = root.into();
        fs::create_dir_all(root.join("misc"))?;
        Ok(Self {
            root,
            time_cache,
            append_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute archive folder for a link.
    pub fn base(&self, link: &Link) -> PathBuf {
        self.root.join(&link.base)
    }

    /// Whether this host has produced any headers record yet.
    pub fn has_folder(&self, link: &Link) -> bool {
        let Ok(entries) = fs::read_dir(self.base(link)) else {
            return false;
        };
        entries
            .flatten()
            .any(|entry| entry.path().extension().map(|ext| ext == "json").unwrap_or(false))
    }

    pub fn has_robots(&self, link: &Link) -> Option<PathBuf> {
        existing(self.base(link).join("robots.txt"))
    }

    pub fn has_hosts(&self, link: &Link) -> Option<PathBuf> {
        existing(self.base(link).join("hosts.txt"))
    }

    pub fn has_sitemap(&self, link: &Link) -> Option<PathBuf> {
        existing(self.base(link).join(format!("sitemap_{}.xml", link.name)))
    }

    /// Newest raw artifact for the link inside the cache window, if any.
    /// A `.dat` artifact short-circuits regardless of age.
    pub fn has_raw(&self, now: DateTime<Utc>, link: &Link) -> Option<PathBuf> {
        let candidates = self.artifacts(link);
        if let Some(data) = candidates
            .iter()
            .find(|(name, _)| name.ends_with(".dat"))
        {
            return Some(data.1.clone());
        }
        self.newest_within(now, candidates, "_raw.html")
    }

    /// Newest rendered HTML for the link inside the cache window, if any.
    pub fn has_html(&self, now: DateTime<Utc>, link: &Link) -> Option<PathBuf> {
        let candidates: Vec<(String, PathBuf)> = self
            .artifacts(link)
            .into_iter()
            .filter(|(name, _)| !name.ends_with("_raw.html"))
            .collect();
        self.newest_within(now, candidates, ".html")
    }

    fn artifacts(&self, link: &Link) -> Vec<(String, PathBuf)> {
        let prefix = format!("{}_", link.name);
        let Ok(entries) = fs::read_dir(self.base(link)) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.starts_with(&prefix).then(|| (name, entry.path()))
            })
            .collect()
    }

    fn newest_within(
        &self,
        now: DateTime<Utc>,
        candidates: Vec<(String, PathBuf)>,
        suffix: &str,
    ) -> Option<PathBuf> {
        let mut matches: Vec<(String, PathBuf)> = candidates
            .into_iter()
            .filter(|(name, _)| name.ends_with(suffix))
            .collect();
        // RFC 3339 timestamps sort lexicographically, newest last
        matches.sort();
        for (name, path) in matches.into_iter().rev() {
            let Some(stamp) = timestamp_of(&name) else {
                continue;
            };
            match self.time_cache {
                None => return Some(path),
                Some(window) => {
                    let age = now.signed_duration_since(stamp);
                    if age.to_std().map(|age| age <= window).unwrap_or(true) {
                        return Some(path);
                    }
                }
            }
        }
        None
    }

    /// Build (and create parents for) the timestamped artifact path.
    pub fn sanitise(
        &self,
        link: &Link,
        time: DateTime<Utc>,
        kind: ArtifactKind,
    ) -> Result<PathBuf, CrawlError> {
        let base = self.base(link);
        fs::create_dir_all(&base)?;
        let stamp = format_stamp(time);
        Ok(base.join(format!("{}_{}{}", link.name, stamp, kind.suffix())))
    }

    /// Append one row to the link mapping file.
    pub fn save_link(&self, link: &Link) {
        let row = format!(
            "{} {} {} {} {}\n",
            link.proxy,
            link.scheme,
            link.hostname(),
            link.name,
            link.url
        );
        if let Err(err) = self.append(&self.root.join("link.csv"), &row) {
            warn!(url = %link.url, %err, "failed to record link mapping");
        }
    }

    /// Append one line to a `misc/<file>` sink.
    pub fn save_misc(&self, file: &str, line: &str) -> Result<(), CrawlError> {
        self.append(&self.root.join("misc").join(file), &format!("{line}\n"))
    }

    fn append(&self, path: &Path, data: &str) -> Result<(), CrawlError> {
        let _guard = self.append_lock.lock().unwrap();
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(data.as_bytes())?;
        Ok(())
    }

    /// Persist robots.txt with a provenance comment line.
    pub fn save_robots(&self, link: &Link, text: &str) -> Result<PathBuf, CrawlError> {
        let base = self.base(link);
        fs::create_dir_all(&base)?;
        let path = base.join("robots.txt");
        fs::write(&path, format!("# {}\n{text}", link.url))?;
        Ok(path)
    }

    /// Persist hosts.txt with a provenance comment line.
    pub fn save_hosts(&self, link: &Link, text: &str) -> Result<PathBuf, CrawlError> {
        let base = self.base(link);
        fs::create_dir_all(&base)?;
        let path = base.join("hosts.txt");
        fs::write(&path, format!("# {}\n{text}", link.url))?;
        Ok(path)
    }

    /// Persist a sitemap under the sitemap link's own hash.
    pub fn save_sitemap(&self, link: &Link, text: &str) -> Result<PathBuf, CrawlError> {
        let base = self.base(link);
        fs::create_dir_all(&base)?;
        let path = base.join(format!("sitemap_{}.xml", link.name));
        fs::write(&path, format!("<!-- {} -->\n{text}", link.url))?;
        self.save_link(link);
        Ok(path)
    }

    /// Persist the headers record of a fetch.
    pub fn save_headers(
        &self,
        time: DateTime<Utc>,
        link: &Link,
        record: &FetchRecord,
    ) -> Result<PathBuf, CrawlError> {
        let data = json!({
            "[metadata]": link_metadata(link),
            "Timestamp": format_stamp(time),
            "URL": record.url,
            "Method": record.method,
            "Status-Code": record.status,
            "Reason": record.reason,
            "Cookies": record.cookies,
            "Session": record.session,
            "Request": record.request,
            "Response": record.response,
        });
        let path = self.sanitise(link, time, ArtifactKind::Headers)?;
        fs::write(&path, serde_json::to_string_pretty(&data).map_err(to_storage)?)?;
        self.save_link(link);
        Ok(path)
    }

    /// Persist an HTML document, raw (fetcher) or rendered (loader), with a
    /// provenance comment line.
    pub fn save_html(
        &self,
        time: DateTime<Utc>,
        link: &Link,
        html: &[u8],
        raw: bool,
    ) -> Result<PathBuf, CrawlError> {
        let kind = if raw { ArtifactKind::Raw } else { ArtifactKind::Html };
        let path = self.sanitise(link, time, kind)?;
        let mut file = fs::File::create(&path)?;
        file.write_all(format!("<!-- {} -->\n", link.url).as_bytes())?;
        file.write_all(html)?;
        Ok(path)
    }

    /// Persist a generic non-HTML payload.
    pub fn save_file(
        &self,
        time: DateTime<Utc>,
        link: &Link,
        content: &[u8],
    ) -> Result<PathBuf, CrawlError> {
        let path = self.sanitise(link, time, ArtifactKind::Data)?;
        fs::write(&path, content)?;
        Ok(path)
    }

    pub fn save_screenshot(
        &self,
        time: DateTime<Utc>,
        link: &Link,
        png: &[u8],
    ) -> Result<PathBuf, CrawlError> {
        let path = self.sanitise(link, time, ArtifactKind::Screenshot)?;
        fs::write(&path, png)?;
        Ok(path)
    }

    /// Persist a decoded data-URI body as `<name><ext>`, no timestamp.
    pub fn save_data(&self, link: &Link, content: &[u8], ext: &str) -> Result<PathBuf, CrawlError> {
        let base = self.base(link);
        fs::create_dir_all(&base)?;
        let path = base.join(format!("{}{}", link.name, ext));
        fs::write(&path, content)?;
        Ok(path)
    }

    // --- supervisor PID file ---

    pub fn write_pid(&self) -> Result<(), CrawlError> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.root.join("darc.pid"), format!("{}\n", std::process::id()))?;
        Ok(())
    }

    pub fn read_pid(&self) -> Option<u32> {
        fs::read_to_string(self.root.join("darc.pid"))
            .ok()
            .and_then(|content| content.trim().parse().ok())
    }

    pub fn remove_pid(&self) {
        let _ = fs::remove_file(self.root.join("darc.pid"));
    }
}

/// The `[metadata]` block shared by headers records and submissions.
pub fn link_metadata(link: &Link) -> serde_json::Value {
    json!({
        "url": link.url,
        "proxy": link.proxy.as_str(),
        "host": link.host,
        "base": link.base.to_string_lossy(),
        "name": link.name,
        "backref": link.backref,
    })
}

/// Timestamp format used in artifact file names.
pub fn format_stamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_of(file_name: &str) -> Option<DateTime<Utc>> {
    let stamp = file_name.split('_').nth(1)?;
    let stamp = stamp
        .strip_suffix(".json")
        .or_else(|| stamp.strip_suffix(".html"))
        .or_else(|| stamp.strip_suffix(".dat"))
        .or_else(|| stamp.strip_suffix(".png"))
        .unwrap_or(stamp);
    DateTime::parse_from_rfc3339(stamp)
        .ok()
        .map(|stamp| stamp.with_timezone(&Utc))
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}

fn to_storage(err: serde_json::Error) -> CrawlError {
    CrawlError::Storage(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use darc_core::parse_link;
    use std::collections::HashMap;

    fn archive(time_cache: Option<Duration>) -> (tempfile::TempDir, Archive) {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path(), time_cache).unwrap();
        (dir, archive)
    }

    fn record() -> FetchRecord {
        FetchRecord {
            url: "http://abc.onion/".to_string(),
            method: "GET".to_string(),
            status: 200,
            reason: "OK".to_string(),
            cookies: HashMap::new(),
            session: HashMap::new(),
            request: HashMap::new(),
            response: HashMap::new(),
            body: b"<html></html>".to_vec(),
            history: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn artifacts_land_under_proxy_scheme_host() {
        let (_dir, archive) = archive(Some(Duration::from_secs(60)));
        let link = parse_link("http://abc.onion/page");
        let now = Utc::now();
        let path = archive.save_html(now, &link, b"<html></html>", true).unwrap();
        assert!(path.starts_with(archive.root().join("tor/http/abc.onion")));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("{}_", link.name)));
        assert!(name.ends_with("_raw.html"));
    }

    #[test]
    fn has_folder_tracks_headers_records() {
        let (_dir, archive) = archive(Some(Duration::from_secs(60)));
        let link = parse_link("http://abc.onion/");
        assert!(!archive.has_folder(&link));
        archive.save_headers(Utc::now(), &link, &record()).unwrap();
        assert!(archive.has_folder(&link));
    }

    #[test]
    fn raw_cache_hit_within_window_only() {
        let (_dir, archive) = archive(Some(Duration::from_secs(60)));
        let link = parse_link("http://abc.onion/");
        let past = Utc::now() - chrono::Duration::seconds(120);
        archive.save_html(past, &link, b"old", true).unwrap();
        assert!(archive.has_raw(Utc::now(), &link).is_none());

        let fresh = Utc::now() - chrono::Duration::seconds(30);
        archive.save_html(fresh, &link, b"fresh", true).unwrap();
        assert!(archive.has_raw(Utc::now(), &link).is_some());
    }

    #[test]
    fn rendered_cache_ignores_raw_artifacts() {
        let (_dir, archive) = archive(Some(Duration::from_secs(60)));
        let link = parse_link("http://abc.onion/");
        archive.save_html(Utc::now(), &link, b"raw", true).unwrap();
        assert!(archive.has_html(Utc::now(), &link).is_none());
        archive.save_html(Utc::now(), &link, b"rendered", false).unwrap();
        assert!(archive.has_html(Utc::now(), &link).is_some());
    }

    #[test]
    fn dat_artifact_short_circuits_raw_check() {
        let (_dir, archive) = archive(Some(Duration::from_secs(60)));
        let link = parse_link("http://abc.onion/file.bin");
        let past = Utc::now() - chrono::Duration::seconds(3600);
        archive.save_file(past, &link, b"payload").unwrap();
        assert!(archive.has_raw(Utc::now(), &link).is_some());
    }

    #[test]
    fn disabled_cache_returns_newest() {
        let (_dir, archive) = archive(None);
        let link = parse_link("http://abc.onion/");
        let past = Utc::now() - chrono::Duration::days(30);
        archive.save_html(past, &link, b"ancient", true).unwrap();
        assert!(archive.has_raw(Utc::now(), &link).is_some());
    }

    #[test]
    fn writes_never_reuse_paths() {
        let (_dir, archive) = archive(Some(Duration::from_secs(60)));
        let link = parse_link("http://abc.onion/");
        let one = archive.save_html(Utc::now(), &link, b"a", true).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let two = archive.save_html(Utc::now(), &link, b"b", true).unwrap();
        assert_ne!(one, two);
    }

    #[test]
    fn misc_sink_appends_lines() {
        let (_dir, archive) = archive(None);
        archive.save_misc("bitcoin.txt", "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").unwrap();
        archive.save_misc("bitcoin.txt", "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2").unwrap();
        let content = fs::read_to_string(archive.root().join("misc/bitcoin.txt")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn pid_file_round_trip() {
        let (_dir, archive) = archive(None);
        archive.write_pid().unwrap();
        assert_eq!(archive.read_pid(), Some(std::process::id()));
        archive.remove_pid();
        assert_eq!(archive.read_pid(), None);
    }

    #[test]
    fn robots_and_sitemap_paths() {
        let (_dir, archive) = archive(None);
        let link = parse_link("http://abc.onion/");
        assert!(archive.has_robots(&link).is_none());
        archive.save_robots(&link, "User-agent: *\n").unwrap();
        assert!(archive.has_robots(&link).is_some());

        let sitemap_link = parse_link("http://abc.onion/sitemap.xml");
        archive.save_sitemap(&sitemap_link, "<urlset/>").unwrap();
        assert!(archive.has_sitemap(&sitemap_link).is_some());
        let csv = fs::read_to_string(archive.root().join("link.csv")).unwrap();
        assert!(csv.contains(&sitemap_link.name));
    }
}
