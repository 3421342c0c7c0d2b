//! Named mutual exclusion over Redis: `SET NX PX` with a random token,
//! auto-released by expiry after `lock_timeout` should a holder die.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{RedisResult, Value};
use tokio::time::{sleep, Instant};
use tracing::warn;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) struct NamedLock {
    key: String,
    token: String,
}

impl NamedLock {
    /// Try to take the lock for `name`, polling until `timeout` elapses.
    pub(crate) async fn acquire(
        conn: &MultiplexedConnection,
        name: &str,
        timeout: Duration,
    ) -> Option<Self> {
        let key = format!("lock:{name}");
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + timeout;

        loop {
            let mut conn = conn.clone();
            let result: RedisResult<Value> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(timeout.as_millis() as u64)
                .query_async(&mut conn)
                .await;
            match result {
                Ok(Value::Okay) => return Some(Self { key, token }),
                Ok(_) => {} // held elsewhere
                Err(err) => warn!(%err, key = %key, "lock acquisition command failed"),
            }
            if Instant::now() + POLL_INTERVAL > deadline {
                return None;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Release only if we still hold it; an expired lock may have been
    /// re-taken by another worker.
    pub(crate) async fn release(self, conn: &MultiplexedConnection) {
        let mut conn = conn.clone();
        let holder: RedisResult<Option<String>> =
            redis::cmd("GET").arg(&self.key).query_async(&mut conn).await;
        match holder {
            Ok(Some(token)) if token == self.token => {
                let result: RedisResult<Value> =
                    redis::cmd("DEL").arg(&self.key).query_async(&mut conn).await;
                if let Err(err) = result {
                    warn!(%err, key = %self.key, "lock release failed");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(%err, key = %self.key, "lock holder check failed"),
        }
    }
}
