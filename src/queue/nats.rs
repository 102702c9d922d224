//! NATS-backed schedule queue

use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info};

use super::ScheduleQueue;
use crate::graph::schedule::ScheduledWalker;
use crate::types::{Result, StoreError};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// Publishes pending schedules as JSON to one subject
#[derive(Clone)]
pub struct NatsScheduleQueue {
    client: Client,
    subject: String,
}

impl NatsScheduleQueue {
    /// Connect to NATS at `url`
    pub async fn connect(url: &str, subject: &str, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        // Fail fast if NATS isn't reachable; reconnects still happen after the first connect
        let client = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(|e| StoreError::Queue(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", url);

        Ok(Self {
            client,
            subject: subject.to_string(),
        })
    }
}

#[async_trait]
impl ScheduleQueue for NatsScheduleQueue {
    async fn push(&self, item: &ScheduledWalker) -> Result<()> {
        let payload = Bytes::from(serde_json::to_vec(item)?);
        self.client
            .publish(self.subject.clone(), payload)
            .await
            .map_err(|e| StoreError::Queue(format!("Publish failed: {}", e)))?;

        debug!(subject = %self.subject, walker_id = %item.walker_id, "Published walker schedule");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| StoreError::Queue(format!("Flush failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    // Integration tests would require a running NATS server
}
