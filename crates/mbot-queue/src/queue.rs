//! Job queue on a Redis list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncConnectionConfig;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// List holding pending join requests
    pub queue_name: String,
    /// How long one blocking pop waits for a message
    pub poll_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            queue_name: "jobs:meetbot:list".to_string(),
            poll_timeout: Duration::from_secs(10),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            queue_name: std::env::var("REDIS_QUEUE_NAME")
                .unwrap_or_else(|_| "jobs:meetbot:list".to_string()),
            poll_timeout: Duration::from_secs(
                std::env::var("REDIS_POLL_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
        }
    }
}

/// Transport the queue consumer pulls raw job messages from.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Take the message at the head, waiting up to `timeout`.
    async fn dequeue_with_timeout(&self, timeout: Duration) -> QueueResult<Option<String>>;

    /// Put a message back at the head so it is taken next.
    async fn requeue_to_head(&self, message: &str) -> QueueResult<()>;

    /// Release the transport. Later calls fail with [`QueueError::Closed`].
    async fn close(&self) -> QueueResult<()>;
}

/// FIFO job queue: producers RPUSH, workers BLPOP, rejected jobs go back with LPUSH.
pub struct RedisQueue {
    client: redis::Client,
    config: QueueConfig,
    connection: Mutex<Option<MultiplexedConnection>>,
    closed: AtomicBool,
}

impl RedisQueue {
    /// Create a new queue client. No connection is made until first use.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            connection: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<MultiplexedConnection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let mut cached = self.connection.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }

        // Blocking pops hold the response for up to the poll timeout.
        let connection_config = AsyncConnectionConfig::new()
            .set_connection_timeout(Duration::from_secs(5))
            .set_response_timeout(self.config.poll_timeout + Duration::from_secs(5));

        let conn = self
            .client
            .get_multiplexed_async_connection_with_config(&connection_config)
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        info!("Connected to Redis queue {}", self.config.queue_name);
        *cached = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the cached connection after a transport error so the next call reconnects.
    async fn reset_on_error<T>(&self, result: QueueResult<T>) -> QueueResult<T> {
        if let Err(e) = &result {
            if e.is_transient() {
                warn!("Redis queue error, dropping connection: {}", e);
                self.connection.lock().await.take();
            }
        }
        result
    }

    /// Append a message at the tail.
    pub async fn push(&self, message: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("RPUSH")
            .arg(&self.config.queue_name)
            .arg(message)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()));
        self.reset_on_error(result).await
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("LLEN")
            .arg(&self.config.queue_name)
            .query_async::<u64>(&mut conn)
            .await
            .map_err(QueueError::from);
        self.reset_on_error(result).await
    }

    /// Check that the server answers.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(QueueError::from);
        self.reset_on_error(result).await
    }
}

#[async_trait]
impl MessageQueue for RedisQueue {
    async fn dequeue_with_timeout(&self, timeout: Duration) -> QueueResult<Option<String>> {
        let mut conn = self.connection().await?;

        // BLPOP takes whole seconds; zero would block forever.
        let seconds = timeout.as_secs().max(1);
        let result = redis::cmd("BLPOP")
            .arg(&self.config.queue_name)
            .arg(seconds)
            .query_async::<Option<(String, String)>>(&mut conn)
            .await
            .map_err(QueueError::from);

        let popped = self.reset_on_error(result).await?;
        if popped.is_some() {
            debug!("Dequeued message from {}", self.config.queue_name);
        }
        Ok(popped.map(|(_, message)| message))
    }

    async fn requeue_to_head(&self, message: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("LPUSH")
            .arg(&self.config.queue_name)
            .arg(message)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()));

        self.reset_on_error(result).await?;
        debug!("Returned message to head of {}", self.config.queue_name);
        Ok(())
    }

    async fn close(&self) -> QueueResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.connection.lock().await.take();
        info!("Closed Redis queue connection");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.queue_name, "jobs:meetbot:list");
        assert_eq!(config.poll_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let config = QueueConfig {
            redis_url: "not a url".to_string(),
            ..QueueConfig::default()
        };
        assert!(RedisQueue::new(config).is_err());
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_calls() {
        let queue = RedisQueue::new(QueueConfig::default()).unwrap();
        queue.close().await.unwrap();
        queue.close().await.unwrap();

        let err = queue
            .dequeue_with_timeout(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Closed));
    }
}
