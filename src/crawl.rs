//! Per-link pipelines: `crawler` drives the HTTP fetch stage, `loader`
//! the browser render stage. Both catch their own failures so one bad URL
//! never takes a worker down; transient failures put the URL back on its
//! queue with immediate eligibility.

use std::fs;

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use tracing::{error, info, warn};

use darc_core::{CrawlError, Link, ProxyKind};
use darc_networks::driver;
use darc_networks::session::default_user_agent;
use darc_networks::SE_EMPTY;
use darc_parser::Robots;

use crate::bootstrap;
use crate::context::Darc;

const HTML_MIME_TYPES: [&str; 2] = ["text/html", "application/xhtml+xml"];

/// Fetch one link: cache replay or network fetch, archive, link
/// extraction, render-queue handoff.
pub async fn crawler(darc: &Darc, link: &Link) {
    if darc.policy.match_host(link.host.as_deref()) {
        warn!(url = %link.url, proxy = %link.proxy, "ignored hostname");
        return;
    }
    if darc.policy.match_proxy(&link.proxy) {
        warn!(url = %link.url, proxy = %link.proxy, "ignored proxy type");
        return;
    }

    match crawl_link(darc, link).await {
        Ok(()) => {}
        Err(CrawlError::NoReturn { drop, .. }) => {
            if drop {
                darc.queue.drop_requests(link).await;
            }
        }
        Err(CrawlError::RobotsDisallowed(url)) => {
            warn!(%url, "robots disallowed");
        }
        Err(CrawlError::UnsupportedLink(url)) | Err(CrawlError::InvalidUrl(url)) => {
            if let Err(err) = darc.archive.save_misc("invalid.txt", &url) {
                warn!(%url, %err, "failed to record invalid link");
            }
            warn!(%url, "dropping unsupported link");
        }
        Err(err) => {
            error!(url = %link.url, %err, "crawl failed, re-queueing");
            darc.queue
                .save_requests(std::slice::from_ref(link), None, false, false)
                .await;
        }
    }
}

async fn crawl_link(darc: &Darc, link: &Link) -> Result<(), CrawlError> {
    let timestamp = Utc::now();

    // fresh-enough archive copy: replay from disk, no network fetch
    if let Some(path) = darc.archive.has_raw(timestamp, link) {
        refresh_host_lists(darc, link).await;
        info!(url = %link.url, "serving fetch from cache");
        let cached = fs::read(&path)?;
        if path.to_string_lossy().ends_with("_raw.html") {
            let html = String::from_utf8_lossy(&cached);
            let children = check_links(darc, darc.extractor.extract_links(link, &html)).await;
            darc.queue.save_requests(&children, None, true, false).await;
            darc.queue
                .save_selenium(std::slice::from_ref(link), None, false, false)
                .await;
        }
        return Ok(());
    }

    // the atomic upsert makes sure only one worker bootstraps each host
    let (known, stale) = darc.queue.have_hostname(link).await;
    info!(url = %link.url, proxy = %link.proxy, "requesting");
    if !known || stale {
        bootstrap::new_host(darc, timestamp, link, stale).await;
    }

    if !darc.config.general.force && !check_robots(darc, link) {
        return Err(CrawlError::RobotsDisallowed(link.url.clone()));
    }

    let session = darc.proxies.session(link)?;
    let record = match darc.sites.crawler_hook(timestamp, &session, link).await {
        Ok(record) => record,
        Err(err) if err.is_transient() => {
            warn!(url = %link.url, %err, "fetch failed, re-queueing");
            darc.queue
                .save_requests(std::slice::from_ref(link), None, false, false)
                .await;
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    darc.archive.save_headers(timestamp, link, &record)?;

    let mime = record
        .content_type()
        .unwrap_or_else(|| "text/html".to_string());
    if !HTML_MIME_TYPES.contains(&mime.as_str()) {
        warn!(url = %link.url, %mime, "generic content type");
        if darc.policy.match_mime(&mime) {
            return Ok(());
        }
        darc.archive.save_file(timestamp, link, &record.body)?;
        darc.submitter
            .submit_requests(timestamp, link, &record, &mime, false)
            .await;
        return Ok(());
    }

    if record.body.is_empty() {
        warn!(url = %link.url, "empty response, re-queueing");
        darc.queue
            .save_requests(std::slice::from_ref(link), None, false, false)
            .await;
        return Ok(());
    }

    darc.archive.save_html(timestamp, link, &record.body, true)?;
    darc.submitter
        .submit_requests(timestamp, link, &record, &mime, true)
        .await;

    // children keep whatever schedule they already have
    let html = String::from_utf8_lossy(&record.body).into_owned();
    let children = check_links(darc, darc.extractor.extract_links(link, &html)).await;
    darc.queue.save_requests(&children, None, true, false).await;

    if !record.ok() {
        warn!(url = %link.url, status = record.status, "error status, re-queueing");
        darc.queue
            .save_requests(std::slice::from_ref(link), None, false, false)
            .await;
        return Ok(());
    }

    darc.queue
        .save_selenium(std::slice::from_ref(link), None, false, false)
        .await;
    info!(url = %link.url, "requested");
    Ok(())
}

/// Render one link: cache replay or headless-browser load, archive,
/// screenshot, link extraction back into the fetch queue.
pub async fn loader(darc: &Darc, link: &Link) {
    match load_link(darc, link).await {
        Ok(()) => {}
        Err(CrawlError::NoReturn { drop, .. }) => {
            if drop {
                darc.queue.drop_selenium(link).await;
            }
        }
        Err(err) => {
            error!(url = %link.url, %err, "load failed, re-queueing");
            darc.queue
                .save_selenium(std::slice::from_ref(link), None, false, false)
                .await;
        }
    }
}

async fn load_link(darc: &Darc, link: &Link) -> Result<(), CrawlError> {
    let timestamp = Utc::now();

    if let Some(path) = darc.archive.has_html(timestamp, link) {
        info!(url = %link.url, "serving render from cache");
        let cached = fs::read(&path)?;
        let html = String::from_utf8_lossy(&cached);
        let children = check_links(darc, darc.extractor.extract_links(link, &html)).await;
        darc.queue.save_requests(&children, None, true, false).await;
        return Ok(());
    }

    info!(url = %link.url, proxy = %link.proxy, "loading");
    let browser = darc.proxies.driver(link)?;
    let tab = browser
        .new_tab()
        .map_err(|err| CrawlError::Driver(err.to_string()))?;
    darc.sites.loader_hook(timestamp, &tab, link).await?;

    let html = driver::page_source(&tab)?;
    if html == SE_EMPTY {
        warn!(url = %link.url, "empty page, re-queueing");
        darc.queue
            .save_selenium(std::slice::from_ref(link), None, false, false)
            .await;
        return Ok(());
    }

    darc.archive.save_html(timestamp, link, html.as_bytes(), false)?;

    let screenshot = match driver::screenshot_png(&tab) {
        Ok(png) => {
            if let Err(err) = darc.archive.save_screenshot(timestamp, link, &png) {
                warn!(url = %link.url, %err, "failed to save screenshot");
            }
            Some(png)
        }
        Err(err) => {
            warn!(url = %link.url, %err, "screenshot failed");
            None
        }
    };

    darc.submitter
        .submit_selenium(timestamp, link, &html, screenshot.as_deref())
        .await;

    let children = check_links(darc, darc.extractor.extract_links(link, &html)).await;
    darc.queue.save_requests(&children, None, true, false).await;

    info!(url = %link.url, "loaded");
    Ok(())
}

/// Consult the archived robots.txt. The root path is always allowed, and
/// a host without robots.txt allows everything.
fn check_robots(darc: &Darc, link: &Link) -> bool {
    if link.is_root_path() {
        return true;
    }
    let Some(path) = darc.archive.has_robots(link) else {
        return true;
    };
    let Ok(content) = fs::read_to_string(path) else {
        return true;
    };
    Robots::parse(&content).is_allowed(&default_user_agent(None), &link.path)
}

/// Cached fetches still refresh the host's sitemaps and hosts list.
async fn refresh_host_lists(darc: &Darc, link: &Link) {
    if !matches!(link.proxy, ProxyKind::Zeronet | ProxyKind::Freenet) {
        if let Err(err) = bootstrap::fetch_sitemap(darc, link, false).await {
            warn!(url = %link.url, %err, "sitemap refresh failed");
        }
    }
    if link.proxy == ProxyKind::I2p {
        if let Err(err) = bootstrap::fetch_hosts(darc, link, false).await {
            warn!(url = %link.url, %err, "hosts refresh failed");
        }
    }
}

/// Apply the configured pool filters to freshly extracted links. In
/// aggressive mode every surviving link is HEAD-checked and its content
/// type run through the MIME lists.
pub async fn check_links(darc: &Darc, links: Vec<Link>) -> Vec<Link> {
    let general = &darc.config.general;
    if !general.check && !general.check_content_type {
        return links;
    }
    let links = darc.policy.check(links);
    if !general.check_content_type {
        return links;
    }

    let mut kept = Vec::with_capacity(links.len());
    for link in links {
        let Ok(session) = darc.proxies.session(&link) else {
            continue;
        };
        match session.head(&link.url).send().await {
            Ok(response) => {
                let mime = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .map(|value| value.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
                    .unwrap_or_else(|| "(null)".to_string());
                info!(url = %link.url, %mime, "checked content type");
                if !darc.policy.match_mime(&mime) {
                    kept.push(link);
                }
            }
            Err(err) => {
                warn!(url = %link.url, %err, "content-type check failed");
            }
        }
    }
    kept
}
