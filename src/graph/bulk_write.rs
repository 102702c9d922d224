//! Per-flush transaction builder
//!
//! A [`BulkWrite`] collects insert, update and delete operations for the four
//! anchor collections and runs them in one transaction. Transient failures
//! retry a bounded number of times; anything else propagates untouched.

use bson::{doc, oid::ObjectId};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::db::{
    DocumentStore, StoreSession, WriteOp, TRANSIENT_TRANSACTION_ERROR,
    UNKNOWN_TRANSACTION_COMMIT_RESULT,
};
use crate::graph::reference::AnchorKind;
use crate::graph::schedule::ScheduledWalker;
use crate::queue::ScheduleQueue;
use crate::types::Result;

/// Slot in a kind's operation list
#[derive(Debug, Clone, PartialEq)]
enum PendingOp {
    Write(WriteOp),
    /// Materialized from the kind's delete id list when executed
    DeleteBatch,
}

/// Operations gathered during one flush
#[derive(Debug, Default)]
pub struct BulkWrite {
    operations: BTreeMap<AnchorKind, Vec<PendingOp>>,
    deletes: BTreeMap<AnchorKind, Vec<ObjectId>>,
    /// Walkers that became pending; queued after commit
    pub schedules: Vec<ScheduledWalker>,
}

impl BulkWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: AnchorKind, op: WriteOp) {
        self.operations
            .entry(kind)
            .or_default()
            .push(PendingOp::Write(op));
    }

    /// Queue `id` for deletion. One delete-many per kind covers every id.
    pub fn delete(&mut self, kind: AnchorKind, id: ObjectId) {
        let ids = self.deletes.entry(kind).or_default();
        if ids.is_empty() {
            self.operations
                .entry(kind)
                .or_default()
                .push(PendingOp::DeleteBatch);
        }
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    pub fn del_node(&mut self, id: ObjectId) {
        self.delete(AnchorKind::Node, id);
    }

    pub fn del_edge(&mut self, id: ObjectId) {
        self.delete(AnchorKind::Edge, id);
    }

    pub fn del_walker(&mut self, id: ObjectId) {
        self.delete(AnchorKind::Walker, id);
    }

    pub fn del_object(&mut self, id: ObjectId) {
        self.delete(AnchorKind::Object, id);
    }

    /// Ids queued for deletion of `kind`
    pub fn deleted_ids(&self, kind: AnchorKind) -> &[ObjectId] {
        self.deletes.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_operations(&self) -> bool {
        self.operations.values().any(|ops| !ops.is_empty())
    }

    /// Executable operations for `kind`, in queue order
    pub fn operations(&self, kind: AnchorKind) -> Vec<WriteOp> {
        let Some(ops) = self.operations.get(&kind) else {
            return Vec::new();
        };
        ops.iter()
            .map(|op| match op {
                PendingOp::Write(op) => op.clone(),
                PendingOp::DeleteBatch => WriteOp::DeleteMany {
                    filter: doc! { "_id": { "$in": self.deleted_ids(kind).to_vec() } },
                },
            })
            .collect()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.values().map(Vec::len).sum()
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Commit the session's transaction, retrying unknown commit results
    pub async fn commit(session: &mut dyn StoreSession, max_retry: u32) -> Result<()> {
        let mut retry = 0;
        loop {
            match session.commit_transaction().await {
                Ok(()) => return Ok(()),
                Err(e) if e.has_error_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) && retry < max_retry => {
                    retry += 1;
                    warn!(
                        op = "commit",
                        attempt = retry,
                        max_retry = max_retry,
                        error = %e,
                        "Error committing session! Retrying"
                    );
                }
                Err(e) => {
                    error!(op = "commit", attempts = retry + 1, error = %e, "Error committing session!");
                    return Err(e);
                }
            }
        }
    }

    /// Run every operation inside the session's open transaction and commit.
    ///
    /// A transient transaction error aborts, reopens the transaction and
    /// replays the whole batch. Pending schedules are pushed to `queue` once
    /// the commit succeeded.
    pub async fn execute(
        &self,
        store: &dyn DocumentStore,
        session: &mut dyn StoreSession,
        config: &StoreConfig,
        queue: &dyn ScheduleQueue,
    ) -> Result<()> {
        let max_retry = config.max_transaction_retry;
        let mut retry = 0;

        loop {
            match self.run(store, session, config.max_commit_retry).await {
                Ok(()) => break,
                Err(e) if e.has_error_label(TRANSIENT_TRANSACTION_ERROR) && retry < max_retry => {
                    retry += 1;
                    warn!(
                        op = "bulk_write",
                        attempt = retry,
                        max_retry = max_retry,
                        error = %e,
                        "Error executing bulk write! Retrying"
                    );

                    if session.in_transaction() {
                        if let Err(abort) = session.abort_transaction().await {
                            debug!(error = %abort, "Abort before retry failed");
                        }
                    }
                    session.start_transaction().await?;
                }
                Err(e) => {
                    error!(op = "bulk_write", attempts = retry + 1, error = %e, "Error executing bulk write!");
                    return Err(e);
                }
            }
        }

        for item in &self.schedules {
            queue.push(item).await.inspect_err(|e| {
                error!(walker_id = %item.walker_id, error = %e, "Failed to queue walker schedule");
            })?;
        }
        if !self.schedules.is_empty() {
            queue.flush().await.inspect_err(|e| {
                error!(schedules = self.schedules.len(), error = %e, "Failed to flush walker schedules");
            })?;
        }

        info!(
            operations = self.operation_count(),
            schedules = self.schedules.len(),
            retries = retry,
            "Bulk write committed"
        );
        Ok(())
    }

    async fn run(&self, store: &dyn DocumentStore, session: &mut dyn StoreSession, max_commit_retry: u32) -> Result<()> {
        for kind in AnchorKind::ALL {
            let ops = self.operations(kind);
            if ops.is_empty() {
                continue;
            }
            store
                .bulk_write(kind.collection(), &ops, false, Some(&mut *session))
                .await?;
        }

        Self::commit(session, max_commit_retry).await
    }
}
