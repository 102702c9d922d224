//! Walker schedule queue
//!
//! Pending walker schedules are pushed here only after the transaction that
//! wrote them has committed. A scheduler consumes the queue and runs them.

mod memory;
mod nats;

pub use memory::MemoryScheduleQueue;
pub use nats::NatsScheduleQueue;

use async_trait::async_trait;

use crate::graph::schedule::ScheduledWalker;
use crate::types::Result;

/// Destination for newly pending walker schedules
#[async_trait]
pub trait ScheduleQueue: Send + Sync {
    async fn push(&self, item: &ScheduledWalker) -> Result<()>;

    /// Wait until pushed items have left the process
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
