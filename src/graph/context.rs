//! Request context and the shared store handle
//!
//! [`GraphStore`] is built once per process and cloned into every request.
//! [`JaseciContext`] is one request: it owns a [`Memory`] acting as the
//! caller's root and flushes it on close.

use bson::{doc, oid::ObjectId};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Args, StoreConfig};
use crate::db::{Collection, DocumentStore, IndexSpec, LocalStore, MongoStore};
use crate::graph::access::{AccessLevel, Permission, Requester};
use crate::graph::anchor::Anchor;
use crate::graph::archetype::ArchetypeRegistry;
use crate::graph::memory::Memory;
use crate::graph::reference::{AnchorKind, AnchorRef};
use crate::queue::{MemoryScheduleQueue, NatsScheduleQueue, ScheduleQueue};
use crate::types::{Result, StoreError};

/// Id of the system root, which bypasses every access check
pub fn system_root_id() -> ObjectId {
    ObjectId::from_bytes([0; 12])
}

/// Id of the root anonymous requests act as
pub fn public_root_id() -> ObjectId {
    let mut bytes = [0; 12];
    bytes[11] = 1;
    ObjectId::from_bytes(bytes)
}

// =============================================================================
// Shared handle
// =============================================================================

/// Process-wide handle on the document store, registry and schedule queue
#[derive(Clone)]
pub struct GraphStore {
    store: Arc<dyn DocumentStore>,
    registry: Arc<ArchetypeRegistry>,
    queue: Arc<dyn ScheduleQueue>,
    config: StoreConfig,
}

impl GraphStore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<ArchetypeRegistry>,
        queue: Arc<dyn ScheduleQueue>,
        config: StoreConfig,
    ) -> Self {
        Self {
            store,
            registry,
            queue,
            config,
        }
    }

    /// Connect the backends named by `args`.
    ///
    /// Without a database host the embedded local store is used, and without
    /// a NATS url schedules stay in an in-process queue.
    pub async fn connect(args: &Args, registry: ArchetypeRegistry) -> Result<Self> {
        let config = args.store_config();

        let store: Arc<dyn DocumentStore> = match &args.database_host {
            Some(uri) => Arc::new(MongoStore::connect(uri, &config.database_name).await?),
            None => {
                warn!("DATABASE_HOST not set, using the embedded local store");
                Arc::new(LocalStore::new())
            }
        };

        let queue: Arc<dyn ScheduleQueue> = match &args.nats_url {
            Some(url) => Arc::new(NatsScheduleQueue::connect(url, &config.schedule_subject, "jaseci-store").await?),
            None => {
                info!("NATS_URL not set, walker schedules stay in process");
                Arc::new(MemoryScheduleQueue::new())
            }
        };

        Ok(Self::new(store, Arc::new(registry), queue, config))
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ArchetypeRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<dyn ScheduleQueue> {
        &self.queue
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Empty cache acting for `requester`
    pub fn memory(&self, requester: Requester) -> Memory {
        Memory::new(
            self.store.clone(),
            self.registry.clone(),
            self.queue.clone(),
            self.config.clone(),
            requester,
        )
    }

    /// Empty cache acting as the system root, which bypasses access checks
    pub fn system_memory(&self) -> Memory {
        self.memory(Requester::system(system_root_id()))
    }

    /// Create the lookup indexes on every anchor collection
    pub async fn apply_indexes(&self) -> Result<()> {
        for collection in Collection::ALL {
            let mut indexes = vec![IndexSpec::ascending(&["_id", "name", "root"])];
            if collection == Collection::Walker {
                indexes.push(IndexSpec::ascending(&["_id", "name", "root", "schedule.status"]));
            }
            self.store.create_indexes(collection, &indexes).await?;
        }

        info!(backend = self.store.backend(), "Indexes applied");
        Ok(())
    }

    /// Insert the system root unless it already exists
    pub async fn ensure_system_root(&self) -> Result<()> {
        let id = system_root_id();
        let filter = doc! { "_id": id };
        if self.store.find_one(Collection::Node, filter.clone(), None).await?.is_some() {
            return Ok(());
        }

        let root = Anchor::root_node(id, Permission::default());
        if let Err(e) = self.store.insert_one(Collection::Node, root.to_document()?, None).await {
            // Another process may have won the race
            if self.store.find_one(Collection::Node, filter, None).await?.is_none() {
                return Err(e);
            }
        }

        info!(root = %AnchorRef::root(id).ref_id(), "System root created");
        Ok(())
    }
}

// =============================================================================
// Request context
// =============================================================================

/// Response body of a request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextResponse {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reports: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<Vec<serde_json::Value>>,
}

/// One request against the graph
pub struct JaseciContext {
    pub mem: Memory,
    pub request_id: Uuid,
    pub status: u16,
    pub reports: Vec<serde_json::Value>,
    system_root: AnchorRef,
    root: AnchorRef,
    entry_node: AnchorRef,
}

impl JaseciContext {
    /// Open a context acting as `root`, or the public root when `None`.
    ///
    /// `entry` is the node walkers start from; it defaults to the root and
    /// must resolve to a node when given.
    pub async fn create(graph: &GraphStore, root: Option<&AnchorRef>, entry: Option<&AnchorRef>) -> Result<Self> {
        let request_id = Uuid::new_v4();
        graph.ensure_system_root().await?;

        let mut mem = graph.system_memory();
        let system_root = mem
            .find_by_id(&AnchorRef::root(system_root_id()))
            .await?
            .ok_or_else(|| StoreError::Internal("System root is missing".to_string()))?;

        let root = match root {
            Some(root) => Self::resolve_node(&mut mem, root).await?,
            None => {
                let public = AnchorRef::root(public_root_id());
                match mem.find_by_id(&public).await? {
                    Some(found) => found,
                    None => mem.set(Anchor::root_node(public.id, Permission::with_all(AccessLevel::Write))),
                }
            }
        };
        mem.set_requester(Requester::new(root.clone(), system_root.id));

        let entry_node = match entry {
            Some(entry) => Self::resolve_node(&mut mem, entry).await?,
            None => root.clone(),
        };

        debug!(
            request_id = %request_id,
            root = %root.ref_id(),
            entry = %entry_node.ref_id(),
            "Context created"
        );

        Ok(Self {
            mem,
            request_id,
            status: 200,
            reports: Vec::new(),
            system_root,
            root,
            entry_node,
        })
    }

    async fn resolve_node(mem: &mut Memory, reference: &AnchorRef) -> Result<AnchorRef> {
        if reference.kind != AnchorKind::Node {
            return Err(StoreError::Validation(format!("Invalid anchor id {} !", reference.ref_id())));
        }
        mem.find_by_id(reference)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Invalid anchor id {} !", reference.ref_id())))
    }

    pub fn system_root(&self) -> &AnchorRef {
        &self.system_root
    }

    pub fn root(&self) -> &AnchorRef {
        &self.root
    }

    pub fn entry_node(&self) -> &AnchorRef {
        &self.entry_node
    }

    /// Append a value to the response reports
    pub fn report(&mut self, value: serde_json::Value) {
        self.reports.push(value);
    }

    /// Append an anchor to the response reports as `{id, context}`
    pub fn report_anchor(&mut self, reference: &AnchorRef) -> Result<()> {
        let report = self.mem.anchor(reference)?.report()?;
        self.reports.push(report);
        Ok(())
    }

    /// Response body, with `returns` only when endpoint returns are shown
    pub fn response(&self, returns: Vec<serde_json::Value>) -> ContextResponse {
        ContextResponse {
            status: self.status,
            reports: (!self.reports.is_empty()).then(|| self.reports.clone()),
            returns: self.mem.config().show_endpoint_returns.then_some(returns),
        }
    }

    /// [`JaseciContext::response`] as JSON
    pub fn response_json(&self, returns: Vec<serde_json::Value>) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.response(returns))?)
    }

    /// Flush every change made through this context
    pub async fn close(mut self) -> Result<()> {
        let result = self.mem.close().await;
        match &result {
            Ok(()) => debug!(request_id = %self.request_id, "Context closed"),
            Err(e) => warn!(request_id = %self.request_id, error = %e, "Context close failed"),
        }
        result
    }
}
