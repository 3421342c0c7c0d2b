//! Postgres backend: the zset contract realized as three task tables keyed
//! by URL text, with a timestamp column playing the score.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use darc_core::{CrawlError, Link};

use crate::{now_score, QueueKind, QueueSettings};

pub struct DbQueue {
    pool: PgPool,
    settings: QueueSettings,
}

impl DbQueue {
    pub async fn connect(url: &str, settings: QueueSettings) -> Result<Self, CrawlError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|err| CrawlError::Config(format!("postgres connect: {err}")))?;
        sqlx::raw_sql(include_str!("../../migrations/001_tasks.sql"))
            .execute(&pool)
            .await
            .map_err(|err| CrawlError::Queue(format!("migrations: {err}")))?;
        info!("task tables ready");
        Ok(Self { pool, settings })
    }

    /// Log, optionally sleep, and tell the caller whether to retry.
    async fn backoff(&self, context: &str, err: sqlx::Error) -> bool {
        let transient = matches!(
            err,
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
        );
        warn!(context, %err, transient, "database operation failed");
        if transient {
            if let Some(interval) = self.settings.retry_interval {
                tokio::time::sleep(interval).await;
            }
        }
        transient
    }

    pub async fn have_hostname(&self, link: &Link) -> (bool, bool) {
        loop {
            match self.try_have_hostname(link).await {
                Ok(result) => return result,
                Err(err) => {
                    if !self.backoff("have_hostname", err).await {
                        return (false, false);
                    }
                }
            }
        }
    }

    async fn try_have_hostname(&self, link: &Link) -> Result<(bool, bool), sqlx::Error> {
        let now = Utc::now();
        let inserted = sqlx::query(
            "INSERT INTO task_hostname (hostname, timestamp) VALUES ($1, $2)
             ON CONFLICT (hostname) DO NOTHING",
        )
        .bind(link.hostname())
        .bind(now)
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() == 1 {
            return Ok((false, false));
        }

        let seen: Option<(DateTime<Utc>,)> =
            sqlx::query_as("SELECT timestamp FROM task_hostname WHERE hostname = $1")
                .bind(link.hostname())
                .fetch_optional(&self.pool)
                .await?;
        let Some((last_seen,)) = seen else {
            return Ok((true, false));
        };

        let stale = match self.settings.time_cache {
            Some(window) => now.signed_duration_since(last_seen).num_seconds() as f64
                > window.as_secs_f64(),
            None => true,
        };
        if stale {
            sqlx::query("UPDATE task_hostname SET timestamp = $1 WHERE hostname = $2")
                .bind(now)
                .bind(link.hostname())
                .execute(&self.pool)
                .await?;
        }
        Ok((true, stale))
    }

    pub async fn drop_hostname(&self, link: &Link) {
        loop {
            let result = sqlx::query("DELETE FROM task_hostname WHERE hostname = $1")
                .bind(link.hostname())
                .execute(&self.pool)
                .await;
            match result {
                Ok(_) => return,
                Err(err) => {
                    if !self.backoff("drop_hostname", err).await {
                        return;
                    }
                }
            }
        }
    }

    pub async fn save(&self, queue: QueueKind, links: &[Link], score: Option<f64>, nx: bool, xx: bool) {
        let timestamp = score_to_time(score.unwrap_or_else(now_score));
        for chunk in links.chunks(self.settings.bulk_size) {
            loop {
                match self.try_save_chunk(queue, chunk, timestamp, nx, xx).await {
                    Ok(()) => break,
                    Err(err) => {
                        if !self.backoff("save", err).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn try_save_chunk(
        &self,
        queue: QueueKind,
        links: &[Link],
        timestamp: DateTime<Utc>,
        nx: bool,
        xx: bool,
    ) -> Result<(), sqlx::Error> {
        let table = queue.table();

        if xx {
            let texts: Vec<String> = links.iter().map(|link| link.url.clone()).collect();
            sqlx::query(&format!(
                "UPDATE {table} SET timestamp = $1 WHERE text = ANY($2)"
            ))
            .bind(timestamp)
            .bind(&texts)
            .execute(&self.pool)
            .await?;
            return Ok(());
        }

        let mut texts = Vec::with_capacity(links.len());
        let mut hashes = Vec::with_capacity(links.len());
        let mut payloads = Vec::with_capacity(links.len());
        for link in links {
            match serde_json::to_string(link) {
                Ok(payload) => {
                    texts.push(link.url.clone());
                    hashes.push(link.name.clone());
                    payloads.push(payload);
                }
                Err(err) => warn!(url = %link.url, %err, "failed to serialize link payload"),
            }
        }
        if texts.is_empty() {
            return Ok(());
        }

        let conflict = if nx {
            "DO NOTHING"
        } else {
            "DO UPDATE SET link = EXCLUDED.link, timestamp = EXCLUDED.timestamp"
        };
        sqlx::query(&format!(
            "INSERT INTO {table} (text, hash, link, timestamp)
             SELECT t.text, t.hash, t.link, $4
             FROM UNNEST($1::text[], $2::varchar[], $3::text[]) AS t(text, hash, link)
             ON CONFLICT (text) {conflict}"
        ))
        .bind(&texts)
        .bind(&hashes)
        .bind(&payloads)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load(&self, queue: QueueKind) -> Vec<Link> {
        loop {
            match self.try_load(queue).await {
                Ok(pool) => return pool,
                Err(err) => {
                    if !self.backoff("load", err).await {
                        return Vec::new();
                    }
                }
            }
        }
    }

    async fn try_load(&self, queue: QueueKind) -> Result<Vec<Link>, sqlx::Error> {
        let table = queue.table();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT link FROM {table} WHERE timestamp <= $1 ORDER BY timestamp LIMIT $2"
        ))
        .bind(now)
        .bind(self.settings.max_pool as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut pool = Vec::with_capacity(rows.len());
        for (payload,) in &rows {
            match serde_json::from_str::<Link>(payload) {
                Ok(link) => pool.push(link),
                Err(err) => warn!(%err, "dropping undecodable queue payload"),
            }
        }

        if let Some(window) = self.settings.time_cache {
            if !pool.is_empty() {
                let texts: Vec<String> = pool.iter().map(|link| link.url.clone()).collect();
                let new_time = now + chrono::Duration::from_std(window).unwrap_or_default();
                sqlx::query(&format!(
                    "UPDATE {table} SET timestamp = $1 WHERE text = ANY($2)"
                ))
                .bind(new_time)
                .bind(&texts)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(pool)
    }

    pub async fn drop(&self, queue: QueueKind, link: &Link) {
        let table = queue.table();
        loop {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE text = $1"))
                .bind(&link.url)
                .execute(&self.pool)
                .await;
            match result {
                Ok(_) => return,
                Err(err) => {
                    if !self.backoff("drop", err).await {
                        return;
                    }
                }
            }
        }
    }
}

fn score_to_time(score: f64) -> DateTime<Utc> {
    let seconds = score.trunc() as i64;
    let nanos = ((score - score.trunc()) * 1e9) as u32;
    Utc.timestamp_opt(seconds, nanos).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_conversion_preserves_seconds() {
        let time = score_to_time(1_700_000_000.5);
        assert_eq!(time.timestamp(), 1_700_000_000);
    }
}
