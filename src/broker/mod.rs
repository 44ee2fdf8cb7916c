pub mod envelope;
pub mod rpc;

use redis::{AsyncCommands, aio::ConnectionManager};

use crate::{
    broker::envelope::QueueMessage,
    config::BrokerConfig,
    error::JudgeResult,
};

/// Handle on the broker. Cloning shares the underlying multiplexed
/// connection; the lifecycle is owned by the process entry point and the
/// handle is passed to whoever needs it.
#[derive(Clone)]
pub struct Broker {
    conn: ConnectionManager,
    submission_queue: String,
}

impl Broker {
    /// Dial with bounded attempts and fixed backoff. After startup the
    /// connection manager re-establishes dropped connections on its own.
    pub async fn connect(config: &BrokerConfig) -> JudgeResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let mut attempt = 0u32;
        let conn = loop {
            match client.get_connection_manager().await {
                Ok(conn) => break conn,
                Err(err) if attempt + 1 < config.connect_attempts => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %err, url = %config.url, "broker unreachable, retrying");
                    tokio::time::sleep(config.connect_backoff).await;
                }
                Err(err) => return Err(err.into()),
            }
        };
        tracing::info!(url = %config.url, "connected to broker");
        Ok(Self {
            conn,
            submission_queue: config.submission_queue.clone(),
        })
    }

    pub async fn publish_submission(&self, message: &QueueMessage) -> JudgeResult<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(&self.submission_queue, payload).await?;
        Ok(())
    }

    /// Zero-timeout blocking pop: parks until a message exists. Each
    /// message is delivered to exactly one consumer, so running several
    /// workers against the same queue is safe.
    pub async fn pop_submission(&self) -> JudgeResult<String> {
        let mut conn = self.conn.clone();
        let (_queue, payload): (String, String) =
            conn.blpop(&self.submission_queue, 0.0).await?;
        Ok(payload)
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}
