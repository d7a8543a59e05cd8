//! Ranked-set storage for streams.
//!
//! Every stream is a Redis sorted set: member = content id, score = rank
//! (epoch seconds). All mutations are idempotent upserts or unconditional
//! removes, so concurrent workers and at-least-once redelivery never need
//! coordination. Unread counters are plain integer keys beside the sets.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, StreamError};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SortedSetStore: Send + Sync {
    /// Idempotent upsert; re-adding an existing member overwrites its score.
    async fn add(&self, key: &str, item_id: Uuid, score: f64) -> Result<()>;

    /// Same as repeated `add`, one round trip.
    async fn bulk_add(&self, key: &str, entries: &[(Uuid, f64)]) -> Result<()>;

    /// No-op if the member is absent.
    async fn remove(&self, key: &str, item_id: Uuid) -> Result<()>;

    /// Remove one member from many stream keys in one pass.
    async fn remove_many(&self, keys: &[String], item_id: Uuid) -> Result<()>;

    /// Remove many members from one stream key in one pass.
    async fn bulk_remove(&self, key: &str, item_ids: &[Uuid]) -> Result<()>;

    /// Drop lowest-score entries beyond `max_size`.
    async fn trim(&self, key: &str, max_size: usize) -> Result<()>;

    /// Delete the whole key (account deactivation tears streams down).
    async fn clear(&self, key: &str) -> Result<()>;

    async fn contains(&self, key: &str, item_id: Uuid) -> Result<bool>;

    /// Members ordered descending by score; `start`/`stop` as in ZREVRANGE.
    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Uuid>>;

    async fn increment_counter(&self, key: &str) -> Result<i64>;
    async fn get_counter(&self, key: &str) -> Result<i64>;
    async fn reset_counter(&self, key: &str) -> Result<()>;
}

/// Production store over a shared Redis connection manager.
///
/// The manager is injected at construction (see `redis_utils::RedisPool`);
/// nothing here reaches for ambient global state.
#[derive(Clone)]
pub struct RedisStreamStore {
    conn: ConnectionManager,
}

impl RedisStreamStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Bootstrap from configuration with startup retry. Callers that want
    /// the background health ping spawn `redis_utils::start_health_check`
    /// on a clone of the manager.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let pool = redis_utils::RedisPool::connect(redis_url)
            .await
            .map_err(|e| StreamError::Internal(format!("redis bootstrap failed: {e}")))?;
        Ok(Self::new(pool.manager()))
    }
}

fn parse_member(raw: &str) -> Option<Uuid> {
    match Uuid::parse_str(raw) {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(member = raw, "Skipping unparseable stream member");
            None
        }
    }
}

#[async_trait]
impl SortedSetStore for RedisStreamStore {
    async fn add(&self, key: &str, item_id: Uuid, score: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(key, item_id.to_string(), score).await?;
        Ok(())
    }

    async fn bulk_add(&self, key: &str, entries: &[(Uuid, f64)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let items: Vec<(f64, String)> = entries
            .iter()
            .map(|(id, score)| (*score, id.to_string()))
            .collect();
        let _: () = conn.zadd_multiple(key, &items).await?;
        debug!(key, count = entries.len(), "Bulk-added stream entries");
        Ok(())
    }

    async fn remove(&self, key: &str, item_id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(key, item_id.to_string()).await?;
        Ok(())
    }

    async fn remove_many(&self, keys: &[String], item_id: Uuid) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let member = item_id.to_string();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.zrem(key, &member).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        debug!(item_id = %item_id, keys = keys.len(), "Removed entry from streams");
        Ok(())
    }

    async fn bulk_remove(&self, key: &str, item_ids: &[Uuid]) -> Result<()> {
        if item_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let members: Vec<String> = item_ids.iter().map(Uuid::to_string).collect();
        let _: () = conn.zrem(key, members).await?;
        Ok(())
    }

    async fn trim(&self, key: &str, max_size: usize) -> Result<()> {
        let mut conn = self.conn.clone();
        // Keep the top `max_size` by score; everything below rank -(max+1)
        // from the top goes. No-op when the set is already small enough.
        let _: () = conn
            .zremrangebyrank(key, 0, -(max_size as isize) - 1)
            .await?;
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn contains(&self, key: &str, item_id: Uuid) -> Result<bool> {
        let mut conn = self.conn.clone();
        let score: Option<f64> = conn.zscore(key, item_id.to_string()).await?;
        Ok(score.is_some())
    }

    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Uuid>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.zrevrange(key, start, stop).await?;
        Ok(members.iter().filter_map(|m| parse_member(m)).collect())
    }

    async fn increment_counter(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn get_counter(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn reset_counter(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
