//! Durable task queues.
//!
//! Three logical ordered sets back the crawl pipeline: `queue_hostname`
//! (hosts ever seen, scored by last-seen time), `queue_requests` (fetch
//! queue) and `queue_selenium` (render queue), both scored by the time at
//! which the entry becomes eligible. Link payloads are stored alongside the
//! set member so dequeues never re-run the classifier.
//!
//! The backend is either a Redis-compatible store or Postgres; both realize
//! the same contract. An entry loaded from a queue has its score pushed
//! `TIME_CACHE` into the future, which is what gives every URL its re-crawl
//! cooldown and keeps concurrent workers from claiming the same batch.

mod backend;
mod lock;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::warn;

use darc_core::config::QueueConfig;
use darc_core::{CrawlError, Link};
use darc_parser::FilterPolicy;

pub use backend::{DbQueue, RedisQueue};

/// The two work queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Requests,
    Selenium,
}

impl QueueKind {
    pub fn key(&self) -> &'static str {
        match self {
            QueueKind::Requests => "queue_requests",
            QueueKind::Selenium => "queue_selenium",
        }
    }

    pub(crate) fn table(&self) -> &'static str {
        match self {
            QueueKind::Requests => "task_requests",
            QueueKind::Selenium => "task_selenium",
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub time_cache: Option<Duration>,
    pub max_pool: usize,
    pub bulk_size: usize,
    /// Sleep between retries on backend failures; `None` retries hot.
    pub retry_interval: Option<Duration>,
    pub use_lock: bool,
    pub lock_timeout: Duration,
}

impl QueueSettings {
    pub fn from_config(config: &QueueConfig, time_cache: Option<Duration>) -> Self {
        Self {
            time_cache,
            max_pool: config.max_pool,
            bulk_size: config.bulk_size.max(1),
            retry_interval: config.retry_interval(),
            use_lock: config.use_lock,
            lock_timeout: config.lock_timeout(),
        }
    }
}

/// Seconds since the Unix epoch, as queue scores are expressed.
pub(crate) fn now_score() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

enum Backend {
    Redis(RedisQueue),
    Db(DbQueue),
}

/// Facade over the configured queue backend, applying the optional §check
/// filters on load.
pub struct TaskQueue {
    backend: Backend,
    policy: Arc<FilterPolicy>,
    check: bool,
}

impl TaskQueue {
    /// Connect to whichever backend is configured. Redis wins when both
    /// URLs are present; neither is a fatal configuration error.
    pub async fn connect(
        config: &QueueConfig,
        time_cache: Option<Duration>,
        policy: Arc<FilterPolicy>,
        check: bool,
    ) -> Result<Self, CrawlError> {
        let settings = QueueSettings::from_config(config, time_cache);
        let backend = if let Some(url) = &config.redis_url {
            Backend::Redis(RedisQueue::connect(url, settings).await?)
        } else if let Some(url) = &config.db_url {
            Backend::Db(DbQueue::connect(url, settings).await?)
        } else {
            return Err(CrawlError::Config(
                "no queue backend configured; set REDIS_URL or DB_URL".to_string(),
            ));
        };
        Ok(Self { backend, policy, check })
    }

    /// Returns `(known, stale)` for the link's host and upserts its
    /// last-seen time when new or stale. At most one caller per cache
    /// window sees `known == false`.
    pub async fn have_hostname(&self, link: &Link) -> (bool, bool) {
        match &self.backend {
            Backend::Redis(backend) => backend.have_hostname(link).await,
            Backend::Db(backend) => backend.have_hostname(link).await,
        }
    }

    pub async fn drop_hostname(&self, link: &Link) {
        match &self.backend {
            Backend::Redis(backend) => backend.drop_hostname(link).await,
            Backend::Db(backend) => backend.drop_hostname(link).await,
        }
    }

    pub async fn save_requests(&self, links: &[Link], score: Option<f64>, nx: bool, xx: bool) {
        self.save(QueueKind::Requests, links, score, nx, xx).await;
    }

    pub async fn save_selenium(&self, links: &[Link], score: Option<f64>, nx: bool, xx: bool) {
        self.save(QueueKind::Selenium, links, score, nx, xx).await;
    }

    async fn save(&self, queue: QueueKind, links: &[Link], score: Option<f64>, nx: bool, xx: bool) {
        if links.is_empty() {
            return;
        }
        match &self.backend {
            Backend::Redis(backend) => backend.save(queue, links, score, nx, xx).await,
            Backend::Db(backend) => backend.save(queue, links, score, nx, xx).await,
        }
    }

    pub async fn load_requests(&self) -> Vec<Link> {
        self.load(QueueKind::Requests).await
    }

    pub async fn load_selenium(&self) -> Vec<Link> {
        self.load(QueueKind::Selenium).await
    }

    /// Claim up to `MAX_POOL` eligible entries, push their scores one cache
    /// window into the future and (optionally) filter the pool.
    async fn load(&self, queue: QueueKind) -> Vec<Link> {
        let pool = match &self.backend {
            Backend::Redis(backend) => backend.load(queue).await,
            Backend::Db(backend) => backend.load(queue).await,
        };
        if self.check {
            let before = pool.len();
            let pool = self.policy.check(pool);
            if pool.len() != before {
                warn!(
                    queue = queue.key(),
                    dropped = before - pool.len(),
                    "filtered links out of loaded pool"
                );
            }
            pool
        } else {
            pool
        }
    }

    pub async fn drop_requests(&self, link: &Link) {
        match &self.backend {
            Backend::Redis(backend) => backend.drop(QueueKind::Requests, link).await,
            Backend::Db(backend) => backend.drop(QueueKind::Requests, link).await,
        }
    }

    pub async fn drop_selenium(&self, link: &Link) {
        match &self.backend {
            Backend::Redis(backend) => backend.drop(QueueKind::Selenium, link).await,
            Backend::Db(backend) => backend.drop(QueueKind::Selenium, link).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_keys_are_stable() {
        assert_eq!(QueueKind::Requests.key(), "queue_requests");
        assert_eq!(QueueKind::Selenium.key(), "queue_selenium");
        assert_eq!(QueueKind::Requests.table(), "task_requests");
    }

    #[test]
    fn settings_pick_up_config_and_cache_window() {
        let config = QueueConfig::default();
        let settings = QueueSettings::from_config(&config, Some(Duration::from_secs(60)));
        assert_eq!(settings.max_pool, 100);
        assert_eq!(settings.bulk_size, 100);
        assert_eq!(settings.time_cache, Some(Duration::from_secs(60)));
        assert_eq!(settings.retry_interval, Some(Duration::from_secs(10)));
    }

    #[test]
    fn scores_are_unix_seconds() {
        let now = now_score();
        assert!(now > 1_500_000_000.0);
    }
}
