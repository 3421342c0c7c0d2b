//! Redis zset backend.
//!
//! Payloads live under the link's SHA-256 name (`SET NX`, idempotent), set
//! membership under the queue key. Transient command failures are retried
//! indefinitely with a warning each round; losing Redis must stall the
//! crawl, not crash it.

use redis::aio::MultiplexedConnection;
use redis::{from_redis_value, RedisResult, Value};
use tracing::warn;

use darc_core::{CrawlError, Link};

use crate::lock::NamedLock;
use crate::{now_score, QueueKind, QueueSettings};

const HOSTNAME_KEY: &str = "queue_hostname";

pub struct RedisQueue {
    conn: MultiplexedConnection,
    settings: QueueSettings,
}

impl RedisQueue {
    pub async fn connect(url: &str, settings: QueueSettings) -> Result<Self, CrawlError> {
        let client = redis::Client::open(url)
            .map_err(|err| CrawlError::Config(format!("bad REDIS_URL: {err}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| CrawlError::Queue(format!("redis connect: {err}")))?;
        Ok(Self { conn, settings })
    }

    /// Run a command, retrying forever on failure.
    async fn run(&self, cmd: &redis::Cmd) -> Value {
        loop {
            let mut conn = self.conn.clone();
            let result: RedisResult<Value> = cmd.query_async(&mut conn).await;
            match result {
                Ok(value) => return value,
                Err(err) => {
                    warn!(%err, "redis command failed, retrying");
                    if let Some(interval) = self.settings.retry_interval {
                        tokio::time::sleep(interval).await;
                    }
                }
            }
        }
    }

    async fn parse<T: redis::FromRedisValue + Default>(&self, cmd: &redis::Cmd) -> T {
        let value = self.run(cmd).await;
        from_redis_value(value).unwrap_or_else(|err| {
            warn!(%err, "unexpected redis reply");
            T::default()
        })
    }

    /// `(known, stale)` via an atomic `ZADD NX` first-seen upsert.
    pub async fn have_hostname(&self, link: &Link) -> (bool, bool) {
        let host = link.hostname().to_string();
        let now = now_score();

        let mut add = redis::cmd("ZADD");
        add.arg(HOSTNAME_KEY).arg("NX").arg(now).arg(&host);
        let added: i64 = self.parse(&add).await;
        if added == 1 {
            return (false, false);
        }

        let mut score_cmd = redis::cmd("ZSCORE");
        score_cmd.arg(HOSTNAME_KEY).arg(&host);
        let score: Option<f64> = self.parse(&score_cmd).await;
        let Some(score) = score else {
            return (true, false);
        };

        // with caching disabled every known host counts as stale
        let stale = match self.settings.time_cache {
            Some(window) => score < now - window.as_secs_f64(),
            None => true,
        };
        if stale {
            let mut refresh = redis::cmd("ZADD");
            refresh.arg(HOSTNAME_KEY).arg("XX").arg(now).arg(&host);
            self.run(&refresh).await;
        }
        (true, stale)
    }

    pub async fn drop_hostname(&self, link: &Link) {
        let mut cmd = redis::cmd("ZREM");
        cmd.arg(HOSTNAME_KEY).arg(link.hostname());
        self.run(&cmd).await;
    }

    pub async fn save(&self, queue: QueueKind, links: &[Link], score: Option<f64>, nx: bool, xx: bool) {
        let score = score.unwrap_or_else(now_score);
        let lock = self.acquire_for_save(queue).await;
        for chunk in links.chunks(self.settings.bulk_size) {
            self.store_chunk(queue, chunk, score, nx, xx).await;
        }
        self.release(lock).await;
    }

    /// Payload writes plus one multi-member ZADD. Callers hold the lock.
    async fn store_chunk(&self, queue: QueueKind, links: &[Link], score: f64, nx: bool, xx: bool) {
        let mut zadd = redis::cmd("ZADD");
        zadd.arg(queue.key());
        if nx {
            zadd.arg("NX");
        }
        if xx {
            zadd.arg("XX");
        }
        let mut members = 0;
        for link in links {
            match serde_json::to_vec(link) {
                Ok(payload) => {
                    let mut set = redis::cmd("SET");
                    set.arg(&link.name).arg(payload).arg("NX");
                    self.run(&set).await;
                    zadd.arg(score).arg(&link.name);
                    members += 1;
                }
                Err(err) => warn!(url = %link.url, %err, "failed to serialize link payload"),
            }
        }
        if members > 0 {
            self.run(&zadd).await;
        }
    }

    pub async fn load(&self, queue: QueueKind) -> Vec<Link> {
        let now = now_score();

        let lock = match self.acquire_for_load(queue).await {
            Ok(lock) => lock,
            Err(()) => return Vec::new(),
        };

        let mut range = redis::cmd("ZRANGEBYSCORE");
        range
            .arg(queue.key())
            .arg("-inf")
            .arg(now)
            .arg("LIMIT")
            .arg(0)
            .arg(self.settings.max_pool);
        let names: Vec<String> = self.parse(&range).await;

        let mut pool = Vec::with_capacity(names.len());
        for name in &names {
            let mut get = redis::cmd("GET");
            get.arg(name);
            let payload: Option<Vec<u8>> = self.parse(&get).await;
            let Some(payload) = payload else {
                continue;
            };
            match serde_json::from_slice::<Link>(&payload) {
                Ok(link) => pool.push(link),
                Err(err) => warn!(name = %name, %err, "dropping undecodable queue payload"),
            }
        }

        // push claimed entries one cooldown window into the future
        if let Some(window) = self.settings.time_cache {
            if !pool.is_empty() {
                let new_score = now + window.as_secs_f64();
                for chunk in pool.chunks(self.settings.bulk_size) {
                    self.store_chunk(queue, chunk, new_score, false, false).await;
                }
            }
        }

        self.release(lock).await;
        pool
    }

    pub async fn drop(&self, queue: QueueKind, link: &Link) {
        let lock = self.acquire_for_save(queue).await;
        let mut zrem = redis::cmd("ZREM");
        zrem.arg(queue.key()).arg(&link.name);
        self.run(&zrem).await;
        self.release(lock).await;

        let mut del = redis::cmd("DEL");
        del.arg(&link.name);
        self.run(&del).await;
    }

    /// On timeout the loader gives up its round and returns an empty pool.
    async fn acquire_for_load(&self, queue: QueueKind) -> Result<Option<NamedLock>, ()> {
        if !self.settings.use_lock {
            return Ok(None);
        }
        match NamedLock::acquire(&self.conn, queue.key(), self.settings.lock_timeout).await {
            Some(lock) => Ok(Some(lock)),
            None => {
                warn!(
                    queue = queue.key(),
                    timeout_ms = self.settings.lock_timeout.as_millis() as u64,
                    "failed to acquire queue lock, returning empty pool"
                );
                Err(())
            }
        }
    }

    /// Writers proceed unlocked after a timeout; payload writes are
    /// idempotent and ZADD is atomic per command.
    async fn acquire_for_save(&self, queue: QueueKind) -> Option<NamedLock> {
        if !self.settings.use_lock {
            return None;
        }
        let lock = NamedLock::acquire(&self.conn, queue.key(), self.settings.lock_timeout).await;
        if lock.is_none() {
            warn!(queue = queue.key(), "queue lock timed out, writing unlocked");
        }
        lock
    }

    async fn release(&self, lock: Option<NamedLock>) {
        if let Some(lock) = lock {
            lock.release(&self.conn).await;
        }
    }
}
