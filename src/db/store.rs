//! Document store collaborator
//!
//! The graph core issues every read and write through [`DocumentStore`]. Two
//! implementations exist: MongoDB ([`crate::db::MongoStore`]) and the embedded
//! [`crate::db::LocalStore`].

use async_trait::async_trait;
use bson::Document;
use std::any::Any;
use std::fmt;
use tracing::{debug, warn};

use crate::types::{Result, StoreError};

/// Error label the server attaches to retryable transaction failures
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";

/// Error label the server attaches when a commit outcome is unknown
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

// =============================================================================
// Collections
// =============================================================================

/// Logical anchor collections, one per anchor kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Node,
    Edge,
    Walker,
    Object,
}

impl Collection {
    /// Flush order inside one transaction
    pub const ALL: [Collection; 4] = [
        Collection::Node,
        Collection::Edge,
        Collection::Walker,
        Collection::Object,
    ];

    /// Collection name in the database
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Node => "node",
            Collection::Edge => "edge",
            Collection::Walker => "walker",
            Collection::Object => "object",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Index definition applied at bootstrap
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub keys: Document,
}

impl IndexSpec {
    /// Ascending index over the given fields
    pub fn ascending(fields: &[&str]) -> Self {
        let mut keys = Document::new();
        for field in fields {
            keys.insert(*field, 1);
        }
        Self { keys }
    }
}

// =============================================================================
// Write operations
// =============================================================================

/// One operation inside a bulk write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    InsertOne { document: Document },
    UpdateOne { filter: Document, update: Document },
    UpdateMany { filter: Document, update: Document },
    DeleteMany { filter: Document },
}

impl WriteOp {
    /// Operation name for logging
    pub fn name(&self) -> &'static str {
        match self {
            WriteOp::InsertOne { .. } => "insert_one",
            WriteOp::UpdateOne { .. } => "update_one",
            WriteOp::UpdateMany { .. } => "update_many",
            WriteOp::DeleteMany { .. } => "delete_many",
        }
    }
}

/// Counts reported by a bulk write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteSummary {
    pub inserted: u64,
    pub modified: u64,
    pub deleted: u64,
}

// =============================================================================
// Sessions
// =============================================================================

/// A store session that can host one transaction at a time
#[async_trait]
pub trait StoreSession: Send {
    async fn start_transaction(&mut self) -> Result<()>;

    async fn commit_transaction(&mut self) -> Result<()>;

    async fn abort_transaction(&mut self) -> Result<()>;

    /// Whether a transaction is open on this session
    fn in_transaction(&self) -> bool;

    /// Lets a store recover its own session type
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// =============================================================================
// Store
// =============================================================================

/// Generic document store primitives consumed by the graph core
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name for logging
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<()>;

    async fn start_session(&self) -> Result<Box<dyn StoreSession>>;

    async fn insert_one(
        &self,
        collection: Collection,
        document: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<()>;

    async fn find(
        &self,
        collection: Collection,
        filter: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<Vec<Document>>;

    async fn find_one(
        &self,
        collection: Collection,
        filter: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<Option<Document>>;

    /// Returns the number of modified documents
    async fn update_one(
        &self,
        collection: Collection,
        filter: Document,
        update: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<u64>;

    /// Returns the number of modified documents
    async fn update_many(
        &self,
        collection: Collection,
        filter: Document,
        update: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<u64>;

    /// Returns the number of deleted documents
    async fn delete_many(
        &self,
        collection: Collection,
        filter: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<u64>;

    async fn create_indexes(&self, collection: Collection, indexes: &[IndexSpec]) -> Result<()>;

    /// Run a batch of operations against one collection.
    ///
    /// Ordered batches stop at the first failure. Unordered batches attempt
    /// every operation and report the first failure afterwards. This default
    /// issues one call per operation; stores with a native batch command
    /// override it.
    async fn bulk_write(
        &self,
        collection: Collection,
        ops: &[WriteOp],
        ordered: bool,
        mut session: Option<&mut dyn StoreSession>,
    ) -> Result<BulkWriteSummary> {
        let mut summary = BulkWriteSummary::default();
        let mut first_error: Option<StoreError> = None;

        for op in ops {
            let session = session.as_mut().map(|s| &mut **s as &mut dyn StoreSession);
            let outcome = match op {
                WriteOp::InsertOne { document } => self
                    .insert_one(collection, document.clone(), session)
                    .await
                    .map(|_| summary.inserted += 1),
                WriteOp::UpdateOne { filter, update } => self
                    .update_one(collection, filter.clone(), update.clone(), session)
                    .await
                    .map(|n| summary.modified += n),
                WriteOp::UpdateMany { filter, update } => self
                    .update_many(collection, filter.clone(), update.clone(), session)
                    .await
                    .map(|n| summary.modified += n),
                WriteOp::DeleteMany { filter } => self
                    .delete_many(collection, filter.clone(), session)
                    .await
                    .map(|n| summary.deleted += n),
            };

            if let Err(e) = outcome {
                warn!(collection = %collection, op = op.name(), error = %e, "Bulk write operation failed");
                if ordered {
                    return Err(e);
                }
                first_error.get_or_insert(e);
            }
        }

        debug!(
            collection = %collection,
            inserted = summary.inserted,
            modified = summary.modified,
            deleted = summary.deleted,
            "Bulk write finished"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}
