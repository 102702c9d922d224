//! Deferred walker invocations

use bson::{Bson, DateTime};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Pending,
    Started,
    Completed,
    Error,
}

/// Schedule state attached to a walker.
///
/// Moves PENDING -> STARTED -> COMPLETED or ERROR, driven by the scheduler
/// consuming the schedule queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub status: ScheduleStatus,
    pub node_id: Option<String>,
    pub root_id: Option<String>,
    pub execute_date: Option<DateTime>,
    pub executed_date: Option<DateTime>,
    pub http_status: Option<i32>,
    pub returns: Option<Vec<Bson>>,
    pub reports: Option<Vec<Bson>>,
    pub custom: Option<Bson>,
    pub error: Option<String>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            status: ScheduleStatus::Pending,
            node_id: None,
            root_id: None,
            execute_date: None,
            executed_date: None,
            http_status: None,
            returns: None,
            reports: None,
            custom: None,
            error: None,
        }
    }
}

impl Schedule {
    /// New pending schedule for a walker spawned on `node_id`
    pub fn pending(node_id: impl Into<String>, root_id: impl Into<String>, execute_date: DateTime) -> Self {
        Self {
            node_id: Some(node_id.into()),
            root_id: Some(root_id.into()),
            execute_date: Some(execute_date),
            ..Self::default()
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ScheduleStatus::Pending
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(ScheduleStatus::Pending, ScheduleStatus::Started)
    }

    pub fn complete(&mut self, http_status: i32, returns: Vec<Bson>, reports: Vec<Bson>) -> Result<()> {
        self.transition(ScheduleStatus::Started, ScheduleStatus::Completed)?;
        self.executed_date = Some(DateTime::now());
        self.http_status = Some(http_status);
        self.returns = Some(returns);
        self.reports = Some(reports);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(ScheduleStatus::Started, ScheduleStatus::Error)?;
        self.executed_date = Some(DateTime::now());
        self.error = Some(error.into());
        Ok(())
    }

    fn transition(&mut self, from: ScheduleStatus, to: ScheduleStatus) -> Result<()> {
        if self.status != from {
            return Err(StoreError::Validation(format!(
                "Schedule cannot move from {:?} to {:?}",
                self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }
}

/// Queue message announcing a pending walker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledWalker {
    pub walker_id: String,
    pub execute_date: Option<chrono::DateTime<Utc>>,
    pub node_id: Option<String>,
    pub root_id: String,
}

impl ScheduledWalker {
    pub fn new(walker_id: String, schedule: &Schedule, root_id: String) -> Self {
        Self {
            walker_id,
            execute_date: schedule.execute_date.map(DateTime::to_chrono),
            node_id: schedule.node_id.clone(),
            root_id,
        }
    }
}
