//! Render queue using a Redis sorted set.
//!
//! The enqueue timestamp is the score, so `ZPOPMIN` yields the oldest job.
//! `ZPOPMIN` is atomic on the server, which keeps delivery at-most-once
//! even when several worker processes share the key.

use animq_models::JobId;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{QueueError, QueueResult};
use crate::queue::{QueueBackend, QueueConfig, QueueSnapshot};

/// Redis-backed queue client.
pub struct RedisQueue {
    client: redis::Client,
    key: String,
}

impl RedisQueue {
    /// Create a new queue client.
    pub fn new(config: &QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            key: config.queue_key.clone(),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(&QueueConfig::from_env())
    }

    /// Verify the server is reachable.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(QueueError::connection_failed(format!(
                "unexpected PING reply: {pong}"
            )));
        }
        info!("Connected to Redis queue '{}'", self.key);
        Ok(())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    async fn push(&self, job_id: &JobId, score: i64) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // NX: never move an existing entry, so a duplicate keeps its place.
        let added: i64 = redis::cmd("ZADD")
            .arg(&self.key)
            .arg("NX")
            .arg(score)
            .arg(job_id.as_str())
            .query_async(&mut conn)
            .await?;

        if added == 0 {
            return Err(QueueError::AlreadyQueued(job_id.clone()));
        }

        debug!(job_id = %job_id, score, "Added job to Redis queue");
        Ok(())
    }

    async fn pop_min(&self) -> QueueResult<JobId> {
        let mut conn = self.connection().await?;

        // Reply is a flat [member, score] array.
        let popped: Vec<String> = redis::cmd("ZPOPMIN")
            .arg(&self.key)
            .arg(1)
            .query_async(&mut conn)
            .await?;

        match popped.into_iter().next() {
            Some(member) if !member.is_empty() => Ok(JobId::from(member)),
            Some(_) => Err(QueueError::InvalidEntry("empty member".to_string())),
            None => Err(QueueError::QueueEmpty),
        }
    }

    async fn remove(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let removed: i64 = redis::cmd("ZREM")
            .arg(&self.key)
            .arg(job_id.as_str())
            .query_async(&mut conn)
            .await?;

        if removed == 0 {
            return Err(QueueError::NotQueued(job_id.clone()));
        }
        debug!(job_id = %job_id, "Removed job from Redis queue");
        Ok(())
    }

    async fn contains(&self, job_id: &JobId) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(&self.key)
            .arg(job_id.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(score.is_some())
    }

    async fn snapshot(&self) -> QueueResult<QueueSnapshot> {
        let mut conn = self.connection().await?;

        let (size, members): (u64, Vec<String>) = redis::pipe()
            .atomic()
            .cmd("ZCARD")
            .arg(&self.key)
            .cmd("ZRANGE")
            .arg(&self.key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;

        Ok(QueueSnapshot {
            size,
            job_ids: members.into_iter().map(JobId::from).collect(),
        })
    }
}
