//! In-process schedule queue

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::debug;

use super::ScheduleQueue;
use crate::graph::schedule::ScheduledWalker;
use crate::types::Result;

/// FIFO a co-located scheduler drains
#[derive(Debug, Default)]
pub struct MemoryScheduleQueue {
    items: Mutex<VecDeque<ScheduledWalker>>,
}

impl MemoryScheduleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Pop the oldest pending schedule
    pub async fn pop(&self) -> Option<ScheduledWalker> {
        self.items.lock().await.pop_front()
    }

    /// Take every queued schedule in push order
    pub async fn drain(&self) -> Vec<ScheduledWalker> {
        self.items.lock().await.drain(..).collect()
    }
}

#[async_trait]
impl ScheduleQueue for MemoryScheduleQueue {
    async fn push(&self, item: &ScheduledWalker) -> Result<()> {
        debug!(walker_id = %item.walker_id, "Queued walker schedule");
        self.items.lock().await.push_back(item.clone());
        Ok(())
    }
}
