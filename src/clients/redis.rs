use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::info;

use crate::{models::retry::RetryConfig, replay::ReplayGuard, utils::retry_with_backoff};

/// Replay guard shared by every relay instance pointed at the same Redis.
#[derive(Clone)]
pub struct RedisReplayGuard {
    connection: MultiplexedConnection,
    ttl_seconds: u64,
    retry_config: RetryConfig,
}

impl RedisReplayGuard {
    pub async fn connect(
        redis_url: &str,
        ttl_seconds: u64,
        retry_config: RetryConfig,
    ) -> Result<Self, Error> {
        let client =
            Client::open(redis_url).map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis replay guard connected");

        Ok(Self {
            connection,
            ttl_seconds,
            retry_config,
        })
    }

    fn key(correlation_id: &str) -> String {
        format!("replay:{}", correlation_id)
    }
}

#[async_trait]
impl ReplayGuard for RedisReplayGuard {
    async fn is_completed(&self, correlation_id: &str) -> Result<bool, Error> {
        let key = Self::key(correlation_id);
        let mut connection = self.connection.clone();

        let completed: bool = connection
            .exists(&key)
            .await
            .map_err(|e| anyhow!("Failed to read replay key: {}", e))?;

        Ok(completed)
    }

    async fn mark_completed(&self, correlation_id: &str) -> Result<(), Error> {
        let key = Self::key(correlation_id);

        retry_with_backoff(&self.retry_config, || {
            let key = key.clone();
            let mut connection = self.connection.clone();
            let ttl = self.ttl_seconds;

            async move {
                connection
                    .set_ex::<_, _, ()>(&key, "completed", ttl)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await
        .map_err(|e| anyhow!("Failed to record completion: {}", e))?;

        Ok(())
    }
}
