//! Per-host bootstrap: on first encounter with a host, fetch and persist
//! its robots.txt and sitemaps (hosts.txt too for I2P), feed the
//! discovered URLs into the fetch queue, and emit a new-host submission.
//! Sub-fetch failures are isolated; the bootstrap is merely marked partial.

use std::collections::HashSet;
use std::fs;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use darc_core::{parse_link_from, urljoin, CrawlError, Link, ProxyKind};
use darc_parser::{sitemap, Robots};
use darc_sites::default::fetch;

use crate::context::Darc;
use crate::crawl::check_links;

/// Bootstrap a freshly discovered (or stale) host and submit it.
/// `force` re-fetches assets even when they are already on disk.
pub async fn new_host(darc: &Darc, timestamp: DateTime<Utc>, link: &Link, force: bool) {
    let mut partial = false;

    // ZeroNet and Freenet gateways have no robots of their own
    if !matches!(link.proxy, ProxyKind::Zeronet | ProxyKind::Freenet) {
        if let Err(err) = fetch_sitemap(darc, link, force).await {
            warn!(url = %link.url, %err, "sitemap bootstrap failed");
            partial = true;
        }
    }
    if link.proxy == ProxyKind::I2p {
        if let Err(err) = fetch_hosts(darc, link, force).await {
            warn!(url = %link.url, %err, "hosts bootstrap failed");
            partial = true;
        }
    }

    darc.submitter
        .submit_new_host(timestamp, link, partial, force)
        .await;
}

/// Fetch robots.txt (cached-or-network), then every sitemap it declares,
/// expanding sitemap indexes recursively and feeding `<loc>` URLs into the
/// fetch queue at default score.
pub async fn fetch_sitemap(darc: &Darc, link: &Link, force: bool) -> Result<(), CrawlError> {
    if force {
        warn!(url = %link.url, "force refetching host assets");
    }
    let robots_link = parse_link_from(&urljoin(&link.url, "/robots.txt"), link);

    let cached_robots = if force { None } else { darc.archive.has_robots(link) };
    let robots_text = match cached_robots {
        Some(path) => {
            info!(url = %link.url, "robots cached");
            String::from_utf8_lossy(&fs::read(path)?).into_owned()
        }
        None => {
            info!(url = %robots_link.url, "checking robots");
            let session = darc.proxies.session(&robots_link)?;
            let record = fetch(&session, &robots_link.url).await?;
            if !record.ok() {
                warn!(url = %robots_link.url, status = record.status, "robots fetch failed");
                String::new()
            } else {
                let mime = record.content_type().unwrap_or_default();
                if matches!(mime.as_str(), "text/plain" | "text/text" | "") {
                    let text = String::from_utf8_lossy(&record.body).into_owned();
                    darc.archive.save_robots(&robots_link, &text)?;
                    info!(url = %robots_link.url, "robots checked");
                    text
                } else {
                    warn!(url = %robots_link.url, %mime, "unresolved robots content type");
                    String::new()
                }
            }
        }
    };

    let robots = Robots::parse(&robots_text);
    let mut pending: Vec<Link> = robots
        .sitemaps()
        .iter()
        .map(|sitemap_url| parse_link_from(sitemap_url, link))
        .collect();
    if pending.is_empty() {
        pending.push(parse_link_from(&urljoin(&link.url, "/sitemap.xml"), link));
    }

    let mut visited: HashSet<String> = HashSet::new();
    while let Some(sitemap_link) = pending.pop() {
        if !visited.insert(sitemap_link.name.clone()) {
            continue;
        }

        let cached = if force {
            None
        } else {
            darc.archive.has_sitemap(&sitemap_link)
        };
        let text = match cached {
            Some(path) => {
                info!(url = %sitemap_link.url, "sitemap cached");
                String::from_utf8_lossy(&fs::read(path)?).into_owned()
            }
            None => {
                info!(url = %sitemap_link.url, "fetching sitemap");
                let session = darc.proxies.session(&sitemap_link)?;
                let record = match fetch(&session, &sitemap_link.url).await {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(url = %sitemap_link.url, %err, "sitemap fetch failed");
                        continue;
                    }
                };
                if !record.ok() {
                    warn!(url = %sitemap_link.url, status = record.status, "sitemap fetch failed");
                    continue;
                }

                let gzipped = sitemap::is_gzip(&record.body)
                    || record.content_type().as_deref() == Some("application/gzip");
                let body = if gzipped {
                    match sitemap::gunzip(&record.body) {
                        Ok(body) => body,
                        Err(err) => {
                            warn!(url = %sitemap_link.url, %err, "bad gzip sitemap");
                            continue;
                        }
                    }
                } else {
                    record.body.clone()
                };
                let text = String::from_utf8_lossy(&body).into_owned();
                darc.archive.save_sitemap(&sitemap_link, &text)?;
                info!(url = %sitemap_link.url, "sitemap fetched");
                text
            }
        };

        if sitemap::is_sitemap_index(&text) {
            let children = sitemap::extract_locs(&text);
            info!(url = %sitemap_link.url, count = children.len(), "expanding sitemap index");
            for loc in children {
                pending.push(parse_link_from(&loc, link));
            }
            continue;
        }

        let urls = sitemap::read_sitemap(link, &text);
        if !urls.is_empty() {
            info!(url = %sitemap_link.url, count = urls.len(), "sitemap URLs queued");
            darc.queue.save_requests(&urls, None, false, false).await;
        }
    }
    Ok(())
}

/// Fetch the I2P address-book subscription `hosts.txt` and enqueue every
/// listed eepsite.
pub async fn fetch_hosts(darc: &Darc, link: &Link, force: bool) -> Result<(), CrawlError> {
    let hosts_link = parse_link_from(&urljoin(&link.url, "/hosts.txt"), link);

    let cached = if force { None } else { darc.archive.has_hosts(link) };
    let hosts_text = match cached {
        Some(path) => {
            info!(url = %link.url, "hosts cached");
            String::from_utf8_lossy(&fs::read(path)?).into_owned()
        }
        None => {
            info!(url = %hosts_link.url, "subscribing hosts");
            let session = darc.proxies.session(&hosts_link)?;
            let record = fetch(&session, &hosts_link.url).await?;
            if !record.ok() {
                warn!(url = %hosts_link.url, status = record.status, "hosts fetch failed");
                return Ok(());
            }
            let mime = record.content_type().unwrap_or_default();
            if !matches!(mime.as_str(), "text/plain" | "text/text" | "") {
                warn!(url = %hosts_link.url, %mime, "unresolved hosts content type");
                return Ok(());
            }
            let text = String::from_utf8_lossy(&record.body).into_owned();
            darc.archive.save_hosts(&hosts_link, &text)?;
            info!(url = %hosts_link.url, "hosts subscribed");
            text
        }
    };

    let links = check_links(darc, read_hosts(link, &hosts_text)).await;
    if !links.is_empty() {
        info!(url = %link.url, count = links.len(), "hosts queued");
        darc.queue.save_requests(&links, None, false, false).await;
    }
    Ok(())
}

/// Parse `host=destination` lines into crawlable eepsite links.
fn read_hosts(link: &Link, text: &str) -> Vec<Link> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let host = line.split('=').next()?.trim();
            host.to_ascii_lowercase()
                .ends_with(".i2p")
                .then(|| parse_link_from(&format!("http://{host}"), link))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use darc_core::parse_link;

    #[test]
    fn read_hosts_parses_subscription_lines() {
        let origin = parse_link("http://xyz.i2p/");
        let text = "\
# comment line
a.i2p=base64destination
b.i2p = anotherdestination
not-an-eepsite.com=dest

";
        let links = read_hosts(&origin, text);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].url, "http://a.i2p");
        assert_eq!(links[0].proxy, ProxyKind::I2p);
        assert_eq!(links[1].url, "http://b.i2p");
        assert!(links.iter().all(|l| l.backref.as_deref() == Some("http://xyz.i2p/")));
    }
}
