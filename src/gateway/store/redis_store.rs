//! Redis-backed counter store
//!
//! Shares gateway state across processes. Every trait method maps onto a
//! single Redis command, so atomicity comes from Redis itself.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{CounterStore, KeyTtl, StoreError, StoreResult};

#[derive(Clone, Debug)]
pub struct RedisStore {
    client: redis::Client,
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::corrupt("redis", err.to_string())
        }
    }
}

/// Redis score syntax for the open ends of a range
fn score_arg(score: f64) -> String {
    if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if score == f64::INFINITY {
        "+inf".to_string()
    } else {
        score.to_string()
    }
}

impl RedisStore {
    pub fn new(url: impl AsRef<str>) -> StoreResult<Self> {
        let client = redis::Client::open(url.as_ref())
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url: {e}")))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> StoreResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection().await?;
        Ok(redis::cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.connection().await?;
        Ok(redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await?)
    }

    async fn incr_by_float(&self, key: &str, delta: f64) -> StoreResult<f64> {
        let mut conn = self.connection().await?;
        let raw: String = redis::cmd("INCRBYFLOAT")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await?;
        raw.parse()
            .map_err(|_| StoreError::corrupt(key, format!("not a float: {raw}")))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        let set: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;
        Ok(set == 1)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score_arg(score))
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        let mut conn = self.connection().await?;
        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(score_arg(min))
            .arg(score_arg(max))
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.connection().await?;
        Ok(redis::cmd("ZCARD").arg(key).query_async(&mut conn).await?)
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let mut conn = self.connection().await?;
        let pttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(match pttl {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            ms => KeyTtl::Expires(Duration::from_millis(ms.max(0) as u64)),
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_arg_infinities() {
        assert_eq!(score_arg(f64::NEG_INFINITY), "-inf");
        assert_eq!(score_arg(f64::INFINITY), "+inf");
        assert_eq!(score_arg(1500.0), "1500");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(RedisStore::new("not a url").is_err());
    }
}
