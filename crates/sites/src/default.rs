//! Fallback hooks: plain GET with redirect following for the fetch stage,
//! navigate-and-settle for the render stage.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use headless_chrome::Tab;
use reqwest::header::LOCATION;
use reqwest::{Client, Response};
use tracing::debug;

use darc_core::{urljoin, CrawlError, FetchRecord, HistoryRecord, Link};

use crate::SiteHook;

const MAX_REDIRECTS: usize = 30;

pub struct DefaultSite {
    se_wait: Option<Duration>,
}

impl DefaultSite {
    pub fn new(se_wait: Option<Duration>) -> Self {
        Self { se_wait }
    }
}

#[async_trait]
impl SiteHook for DefaultSite {
    async fn crawler(
        &self,
        _timestamp: DateTime<Utc>,
        session: &Client,
        link: &Link,
    ) -> Result<FetchRecord, CrawlError> {
        fetch(session, &link.url).await
    }

    /// Navigate and give scripts `SE_WAIT` to settle; the browser already
    /// waited for `DOMContentLoaded` by the time navigation returns.
    async fn loader(
        &self,
        _timestamp: DateTime<Utc>,
        tab: &Tab,
        link: &Link,
    ) -> Result<(), CrawlError> {
        tab.navigate_to(&link.url)
            .map_err(|err| CrawlError::Driver(err.to_string()))?;
        tab.wait_until_navigated()
            .map_err(|err| CrawlError::Driver(err.to_string()))?;
        if let Some(wait) = self.se_wait {
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }
}

/// GET a URL, walking the redirect chain by hand so every hop lands in the
/// record's `History`. Sessions are built with redirects disabled.
pub async fn fetch(session: &Client, url: &str) -> Result<FetchRecord, CrawlError> {
    let mut history = Vec::new();
    let mut session_cookies = HashMap::new();
    let mut current = url.to_string();

    for _ in 0..MAX_REDIRECTS {
        let request = session
            .get(&current)
            .build()
            .map_err(|err| CrawlError::InvalidUrl(err.to_string()))?;
        let request_headers = header_map(request.headers().iter());

        let response = session
            .execute(request)
            .await
            .map_err(|err| to_crawl_error(&current, err))?;

        let status = response.status();
        let reason = status.canonical_reason().unwrap_or("").to_string();
        let response_headers = header_map(response.headers().iter());
        let cookies = cookie_map(&response);
        session_cookies.extend(cookies.clone());

        if status.is_redirection() {
            let location = response_headers.get(LOCATION.as_str()).cloned();
            let body = response
                .bytes()
                .await
                .map(|bytes| bytes.to_vec())
                .unwrap_or_default();
            history.push(HistoryRecord {
                url: current.clone(),
                method: "GET".to_string(),
                status: status.as_u16(),
                reason,
                cookies,
                request: request_headers,
                response: response_headers,
                body,
            });
            let Some(location) = location else {
                break;
            };
            let next = urljoin(&current, &location);
            debug!(from = %current, to = %next, "following redirect");
            current = next;
            continue;
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| CrawlError::Network(err.to_string()))?
            .to_vec();

        return Ok(FetchRecord {
            url: current,
            method: "GET".to_string(),
            status: status.as_u16(),
            reason,
            cookies,
            session: session_cookies,
            request: request_headers,
            response: response_headers,
            body,
            history,
            fetched_at: Utc::now(),
        });
    }

    Err(CrawlError::Network(format!("too many redirects from {url}")))
}

fn to_crawl_error(url: &str, err: reqwest::Error) -> CrawlError {
    if err.is_timeout() {
        CrawlError::Timeout(0)
    } else if err.is_builder() || err.is_request() && err.url().is_none() {
        CrawlError::InvalidUrl(format!("{url}: {err}"))
    } else {
        CrawlError::Network(err.to_string())
    }
}

fn header_map<'a, I>(headers: I) -> HashMap<String, String>
where
    I: Iterator<Item = (&'a reqwest::header::HeaderName, &'a reqwest::header::HeaderValue)>,
{
    headers
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
        })
        .collect()
}

fn cookie_map(response: &Response) -> HashMap<String, String> {
    response
        .cookies()
        .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
        .collect()
}
