//! Request-scoped object cache over the document store
//!
//! [`Memory`] is the arena every anchor of a request lives in. Lookups go
//! through it first and only fall back to the store for ids it has never
//! seen. At close it diffs everything it holds against the last synced
//! state and commits the result as one transaction.

use bson::{doc, oid::ObjectId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::db::{DocumentStore, StoreSession, WriteOp};
use crate::graph::access::{resolve_access_level, AccessLevel, AccessTarget, Requester};
use crate::graph::anchor::Anchor;
use crate::graph::archetype::ArchetypeRegistry;
use crate::graph::bulk_write::BulkWrite;
use crate::graph::reference::{AnchorKind, AnchorRef};
use crate::graph::state::Changes;
use crate::queue::ScheduleQueue;
use crate::types::{Result, StoreError};

pub struct Memory {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) registry: Arc<ArchetypeRegistry>,
    pub(crate) queue: Arc<dyn ScheduleQueue>,
    pub(crate) config: StoreConfig,
    /// Live anchors
    pub(crate) mem: HashMap<ObjectId, Anchor>,
    /// Destroyed anchors awaiting deletion
    pub(crate) gc: BTreeMap<ObjectId, Anchor>,
    /// Ids already turned into deletes by a bulk write
    pub(crate) purged: HashSet<ObjectId>,
    pub(crate) session: Option<Box<dyn StoreSession>>,
    pub(crate) requester: Requester,
}

impl Memory {
    /// Empty cache acting as `requester`
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<ArchetypeRegistry>,
        queue: Arc<dyn ScheduleQueue>,
        config: StoreConfig,
        requester: Requester,
    ) -> Self {
        Self {
            store,
            registry,
            queue,
            config,
            mem: HashMap::new(),
            gc: BTreeMap::new(),
            purged: HashSet::new(),
            session: None,
            requester,
        }
    }

    /// Run reads and the final commit on an externally managed session
    pub fn bind_session(&mut self, session: Box<dyn StoreSession>) {
        self.session = Some(session);
    }

    pub fn take_session(&mut self) -> Option<Box<dyn StoreSession>> {
        self.session.take()
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    pub fn set_requester(&mut self, requester: Requester) {
        self.requester = requester;
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.mem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    // =========================================================================
    // Arena access
    // =========================================================================

    /// Whether `id` is loaded and live
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.mem.contains_key(id)
    }

    /// Whether `id` was destroyed during this request
    pub fn is_removed(&self, id: &ObjectId) -> bool {
        self.gc.contains_key(id) || self.purged.contains(id)
    }

    pub fn get(&self, id: &ObjectId) -> Option<&Anchor> {
        self.mem.get(id)
    }

    pub fn get_mut(&mut self, id: &ObjectId) -> Option<&mut Anchor> {
        self.mem.get_mut(id)
    }

    /// Live or destroyed anchor
    pub(crate) fn lookup(&self, id: &ObjectId) -> Option<&Anchor> {
        self.mem.get(id).or_else(|| self.gc.get(id))
    }

    pub(crate) fn lookup_mut(&mut self, id: &ObjectId) -> Option<&mut Anchor> {
        match self.mem.get_mut(id) {
            Some(anchor) => Some(anchor),
            None => self.gc.get_mut(id),
        }
    }

    /// Loaded anchor behind `reference`
    pub fn anchor(&self, reference: &AnchorRef) -> Result<&Anchor> {
        self.mem
            .get(&reference.id)
            .ok_or_else(|| StoreError::NotFound(format!("{} [{}] is not loaded", reference.kind, reference.ref_id())))
    }

    pub fn anchor_mut(&mut self, reference: &AnchorRef) -> Result<&mut Anchor> {
        self.mem
            .get_mut(&reference.id)
            .ok_or_else(|| StoreError::NotFound(format!("{} [{}] is not loaded", reference.kind, reference.ref_id())))
    }

    /// Put an anchor into the cache, replacing any loaded copy
    pub fn set(&mut self, anchor: Anchor) -> AnchorRef {
        let reference = anchor.reference();
        self.mem.insert(anchor.id, anchor);
        reference
    }

    /// Move an anchor to the garbage set, scheduling its deletion
    pub fn remove(&mut self, id: &ObjectId) -> Option<AnchorRef> {
        let anchor = self.mem.remove(id)?;
        let reference = anchor.reference();
        self.gc.insert(*id, anchor);
        Some(reference)
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load ids of one kind in a single `$in` query, returns how many were new
    async fn fetch(&mut self, kind: AnchorKind, ids: Vec<ObjectId>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let requested = ids.len();
        let docs = self
            .store
            .find(
                kind.collection(),
                doc! { "_id": { "$in": ids } },
                self.session.as_deref_mut().map(|s| s as &mut dyn StoreSession),
            )
            .await?;

        let mut loaded = 0;
        for doc in &docs {
            let anchor = Anchor::from_document(kind, doc, &self.registry)?;
            if !self.mem.contains_key(&anchor.id) {
                self.mem.insert(anchor.id, anchor);
                loaded += 1;
            }
        }

        debug!(kind = %kind, requested = requested, loaded = loaded, "Fetched anchors");
        Ok(loaded)
    }

    /// Load the owner roots of `ids` that are not cached yet
    async fn prefetch_roots(&mut self, ids: &[ObjectId]) -> Result<()> {
        let roots: BTreeSet<ObjectId> = ids
            .iter()
            .filter_map(|id| self.mem.get(id).and_then(|a| a.root))
            .filter(|root| !self.mem.contains_key(root) && !self.is_removed(root))
            .collect();

        self.fetch(AnchorKind::Node, roots.into_iter().collect()).await?;
        Ok(())
    }

    /// Resolve references, loading the missing ones with one query per kind.
    ///
    /// Returns the references that resolved, in input order. Destroyed ids
    /// are never reloaded.
    pub async fn find(&mut self, refs: &[AnchorRef]) -> Result<Vec<AnchorRef>> {
        self.find_with(refs, |_| true).await
    }

    /// [`Memory::find`] keeping only anchors accepted by `filter`
    pub async fn find_with<F>(&mut self, refs: &[AnchorRef], filter: F) -> Result<Vec<AnchorRef>>
    where
        F: Fn(&Anchor) -> bool + Send,
    {
        let mut missing: BTreeMap<AnchorKind, BTreeSet<ObjectId>> = BTreeMap::new();
        for reference in refs {
            if !self.mem.contains_key(&reference.id) && !self.is_removed(&reference.id) {
                missing.entry(reference.kind).or_default().insert(reference.id);
            }
        }

        let mut fetched = Vec::new();
        for (kind, ids) in missing {
            let ids: Vec<ObjectId> = ids.into_iter().collect();
            self.fetch(kind, ids.clone()).await?;
            fetched.extend(ids);
        }
        self.prefetch_roots(&fetched).await?;

        Ok(refs
            .iter()
            .filter_map(|reference| self.mem.get(&reference.id))
            .filter(|anchor| filter(*anchor))
            .map(Anchor::reference)
            .collect())
    }

    pub async fn find_one(&mut self, refs: &[AnchorRef]) -> Result<Option<AnchorRef>> {
        Ok(self.find(refs).await?.into_iter().next())
    }

    /// Resolve one reference, `None` when it does not exist or was destroyed
    pub async fn find_by_id(&mut self, reference: &AnchorRef) -> Result<Option<AnchorRef>> {
        if self.is_removed(&reference.id) {
            return Ok(None);
        }
        if let Some(anchor) = self.mem.get(&reference.id) {
            return Ok(Some(anchor.reference()));
        }

        let found = self
            .store
            .find_one(
                reference.kind.collection(),
                doc! { "_id": reference.id },
                self.session.as_deref_mut().map(|s| s as &mut dyn StoreSession),
            )
            .await?;
        let Some(doc) = found else {
            return Ok(None);
        };

        let anchor = Anchor::from_document(reference.kind, &doc, &self.registry)?;
        let found = self.set(anchor);
        self.prefetch_roots(&[found.id]).await?;
        Ok(Some(found))
    }

    /// Load `reference`, failing when it does not resolve
    pub async fn populate(&mut self, reference: &AnchorRef) -> Result<&mut Anchor> {
        if self.find_by_id(reference).await?.is_none() {
            return Err(StoreError::InvalidReference(reference.ref_id()));
        }
        self.anchor_mut(reference)
    }

    /// Prefetch the edges of `nodes` and the nodes on their far ends
    pub async fn populate_data(&mut self, nodes: &[AnchorRef]) -> Result<()> {
        if self.config.single_query {
            return Ok(());
        }

        let edges: Vec<AnchorRef> = nodes
            .iter()
            .filter_map(|node| self.mem.get(&node.id))
            .flat_map(|node| node.edges().iter().cloned())
            .collect();
        let edges = self.find(&edges).await?;

        let endpoints: BTreeSet<AnchorRef> = edges
            .iter()
            .filter_map(|edge| self.mem.get(&edge.id).and_then(Anchor::edge))
            .flat_map(|edge| [edge.source.clone(), edge.target.clone()])
            .flatten()
            .collect();
        let endpoints: Vec<AnchorRef> = endpoints.into_iter().collect();
        self.find(&endpoints).await?;
        Ok(())
    }

    // =========================================================================
    // Access control
    // =========================================================================

    /// Level the current requester holds over a cached anchor
    pub fn access_level(&self, id: &ObjectId) -> AccessLevel {
        let Some(anchor) = self.lookup(id) else {
            return AccessLevel::NoAccess;
        };

        let owner = anchor.root.and_then(|root| self.lookup(&root)).map(|root| &root.access);
        resolve_access_level(
            &self.requester,
            AccessTarget {
                id: anchor.id,
                root: anchor.root,
                persistent: anchor.persistent,
                access: &anchor.access,
            },
            owner,
        )
    }

    pub fn check_read_access(&self, id: &ObjectId) -> bool {
        self.check_access(id, AccessLevel::Read)
    }

    pub fn check_connect_access(&self, id: &ObjectId) -> bool {
        self.check_access(id, AccessLevel::Connect)
    }

    pub fn check_write_access(&self, id: &ObjectId) -> bool {
        self.check_access(id, AccessLevel::Write)
    }

    fn check_access(&self, id: &ObjectId, required: AccessLevel) -> bool {
        if self.access_level(id) >= required {
            return true;
        }

        info!(
            root = %self.requester.root.ref_id(),
            anchor = %id.to_hex(),
            required = %required,
            "Current root doesn't have access"
        );
        false
    }

    // =========================================================================
    // Flush
    // =========================================================================

    /// Every pending write of this request as one bulk write.
    ///
    /// Destroyed anchors turn into deletes first, then each live persistent
    /// anchor is synced. Syncing can pull in anchors it reaches, so keys are
    /// walked until no new ones appear.
    pub fn get_bulk_write(&mut self) -> Result<BulkWrite> {
        let mut bulk_write = BulkWrite::new();

        for (id, anchor) in std::mem::take(&mut self.gc) {
            bulk_write.delete(anchor.kind(), id);
            self.purged.insert(id);
        }

        let mut seen: HashSet<ObjectId> = HashSet::new();
        loop {
            let mut keys: Vec<ObjectId> = self.mem.keys().filter(|id| !seen.contains(*id)).copied().collect();
            if keys.is_empty() {
                break;
            }
            keys.sort();
            seen.extend(keys.iter().copied());
            self.sync_mem_to_db(&mut bulk_write, &keys)?;
        }

        Ok(bulk_write)
    }

    /// Queue inserts for unsynced anchors and diffs for changed ones
    pub fn sync_mem_to_db(&mut self, bulk_write: &mut BulkWrite, keys: &[ObjectId]) -> Result<()> {
        for id in keys {
            let Some(anchor) = self.mem.get_mut(id) else {
                continue;
            };
            if !anchor.persistent || anchor.state.deleted == Some(true) {
                continue;
            }

            if !anchor.state.connected {
                anchor.state.connected = true;
                anchor.state.changes = Changes::default();
                anchor.sync_hash()?;
                bulk_write.push(anchor.kind(), WriteOp::InsertOne { document: anchor.to_document()? });
                if let Some(item) = super::flush::scheduled_item(anchor) {
                    bulk_write.schedules.push(item);
                }
                continue;
            }

            let new_hash = anchor.has_changed()?;
            if new_hash == 0 || !self.check_connect_access(id) {
                continue;
            }

            let auto_cleanup = self.config.auto_cleanup;
            let Some(anchor) = self.mem.get_mut(id) else {
                continue;
            };
            anchor.state.full_hash = new_hash;

            if auto_cleanup && anchor.kind() == AnchorKind::Node && !anchor.is_root() && anchor.edges().is_empty() {
                debug!(anchor = %anchor.ref_id(), "Deleting node left without edges");
                anchor.state.deleted = Some(true);
                bulk_write.del_node(*id);
            } else {
                self.update(bulk_write, *id, false)?;
            }
        }
        Ok(())
    }

    /// Commit `bulk_write` on the bound session, or a fresh one
    pub(crate) async fn execute(&mut self, bulk_write: &BulkWrite) -> Result<()> {
        let mut fresh = None;
        let session: &mut dyn StoreSession = match self.session.as_deref_mut() {
            Some(session) => session,
            None => fresh.insert(self.store.start_session().await?).as_mut(),
        };

        if !session.in_transaction() {
            session.start_transaction().await?;
        }

        let result = bulk_write
            .execute(self.store.as_ref(), session, &self.config, self.queue.as_ref())
            .await;

        if result.is_err() && session.in_transaction() {
            if let Err(e) = session.abort_transaction().await {
                debug!(error = %e, "Abort after failed bulk write failed");
            }
        }
        result
    }

    /// Flush everything and empty the cache
    pub async fn close(&mut self) -> Result<()> {
        let bulk_write = self.get_bulk_write()?;
        if bulk_write.has_operations() {
            self.execute(&bulk_write).await?;
        }

        self.mem.clear();
        self.gc.clear();
        self.purged.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Collection, LocalStore};
    use crate::graph::context::GraphStore;
    use crate::graph::testing::{graph_store, Likes, Person};

    fn requester_for(root: ObjectId) -> Requester {
        Requester::new(AnchorRef::root(root), ObjectId::from_bytes([0; 12]))
    }

    /// Persist a root with one connected person and return both refs
    async fn seed(graph: &GraphStore) -> (AnchorRef, AnchorRef) {
        let root_id = ObjectId::new();
        let mut mem = graph.memory(requester_for(root_id));
        let root = mem.set(Anchor::root_node(root_id, Default::default()));

        let person = mem.create(Person { name: "ada".into(), val: 1 });
        mem.connect(&root, &person, Likes { weight: 1 }, false).unwrap();
        mem.close().await.unwrap();
        (root, person)
    }

    #[tokio::test]
    async fn test_create_and_fetch() {
        let (graph, local, _) = graph_store(StoreConfig::default());
        let (root, person) = seed(&graph).await;
        assert_eq!(local.count(Collection::Node).await, 2);
        assert_eq!(local.count(Collection::Edge).await, 1);

        let mut mem = graph.memory(requester_for(root.id));
        let found = mem.find_by_id(&person).await.unwrap().unwrap();
        assert_eq!(found, person);

        let anchor = mem.anchor(&person).unwrap();
        assert_eq!(anchor.archetype_as::<Person>().unwrap().name, "ada");
        assert_eq!(anchor.root, Some(root.id));
        assert_eq!(anchor.edges().len(), 1);
        assert!(mem.contains(&root.id), "owner root is prefetched");
    }

    #[tokio::test]
    async fn test_find_batches_and_keeps_order() {
        let (graph, _, _) = graph_store(StoreConfig::default());
        let (root, person) = seed(&graph).await;

        let mut mem = graph.system_memory();
        let missing = AnchorRef::new(AnchorKind::Node, "Person", ObjectId::new());
        let found = mem.find(&[person.clone(), missing, root.clone()]).await.unwrap();
        assert_eq!(found, vec![person.clone(), root]);

        let readable = mem
            .find_with(&[person], |anchor| anchor.archetype_as::<Person>().is_some_and(|p| p.val > 5))
            .await
            .unwrap();
        assert!(readable.is_empty());
    }

    #[tokio::test]
    async fn test_flush_is_idempotent() {
        let (graph, _, _) = graph_store(StoreConfig::default());
        let (root, person) = seed(&graph).await;

        let mut mem = graph.memory(requester_for(root.id));
        mem.find(&[person]).await.unwrap();

        let bulk_write = mem.get_bulk_write().unwrap();
        assert!(!bulk_write.has_operations());
        assert!(!mem.get_bulk_write().unwrap().has_operations());
    }

    #[tokio::test]
    async fn test_update_is_minimal() {
        let (graph, local, _) = graph_store(StoreConfig::default());
        let (root, person) = seed(&graph).await;

        let mut mem = graph.memory(requester_for(root.id));
        mem.populate(&person).await.unwrap();
        mem.archetype_mut::<Person>(&person).unwrap().val = 42;

        let bulk_write = mem.get_bulk_write().unwrap();
        let ops = bulk_write.operations(AnchorKind::Node);
        assert_eq!(
            ops,
            vec![WriteOp::UpdateOne {
                filter: doc! { "_id": person.id },
                update: doc! { "$set": { "archetype.val": 42i64 } },
            }]
        );

        mem.execute(&bulk_write).await.unwrap();
        let stored = local.find_one(Collection::Node, doc! { "_id": person.id }, None).await.unwrap().unwrap();
        assert_eq!(stored.get_document("archetype").unwrap().get_i64("val").unwrap(), 42);
        assert_eq!(stored.get_document("archetype").unwrap().get_str("name").unwrap(), "ada");
    }

    /// Id of the single edge hanging off `person`
    async fn only_edge(mem: &mut Memory, person: &AnchorRef) -> AnchorRef {
        mem.populate(person).await.unwrap();
        mem.anchor(person).unwrap().edges()[0].clone()
    }

    async fn exists(local: &LocalStore, collection: Collection, id: ObjectId) -> bool {
        local.find_one(collection, doc! { "_id": id }, None).await.unwrap().is_some()
    }

    #[tokio::test]
    async fn test_orphan_node_cleanup_after_destroying_edge() {
        let (graph, local, _) = graph_store(StoreConfig::default());
        let (root, person) = seed(&graph).await;

        let mut mem = graph.memory(requester_for(root.id));
        let edge = only_edge(&mut mem, &person).await;
        assert!(mem.destroy(&edge).await.unwrap());
        mem.close().await.unwrap();

        assert!(!exists(&local, Collection::Node, person.id).await);
        assert!(!exists(&local, Collection::Edge, edge.id).await);
        assert!(exists(&local, Collection::Node, root.id).await);

        let stored = local.find_one(Collection::Node, doc! { "_id": root.id }, None).await.unwrap().unwrap();
        assert!(stored.get_array("edges").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_orphan_node_cleanup_after_detach_keeps_edge() {
        let (graph, local, _) = graph_store(StoreConfig::default());
        let (root, person) = seed(&graph).await;

        let mut mem = graph.memory(requester_for(root.id));
        let edge = only_edge(&mut mem, &person).await;
        mem.detach(&edge).await.unwrap();
        mem.close().await.unwrap();

        assert!(!exists(&local, Collection::Node, person.id).await);
        assert!(exists(&local, Collection::Edge, edge.id).await);
    }

    #[tokio::test]
    async fn test_orphan_cleanup_disabled() {
        let config = StoreConfig { auto_cleanup: false, ..StoreConfig::default() };
        let (graph, local, _) = graph_store(config);
        let (root, person) = seed(&graph).await;

        let mut mem = graph.memory(requester_for(root.id));
        let edge = only_edge(&mut mem, &person).await;
        assert!(mem.destroy(&edge).await.unwrap());
        mem.close().await.unwrap();

        assert!(!exists(&local, Collection::Edge, edge.id).await);
        let stored = local.find_one(Collection::Node, doc! { "_id": person.id }, None).await.unwrap().unwrap();
        assert!(stored.get_array("edges").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_changes_need_access() {
        let (graph, local, _) = graph_store(StoreConfig::default());
        let (root, person) = seed(&graph).await;

        // Another root without grants cannot persist changes
        let mut mem = graph.memory(requester_for(ObjectId::new()));
        mem.populate(&person).await.unwrap();
        assert_eq!(mem.access_level(&person.id), AccessLevel::NoAccess);
        mem.archetype_mut::<Person>(&person).unwrap().val = 99;
        mem.close().await.unwrap();

        let stored = local.find_one(Collection::Node, doc! { "_id": person.id }, None).await.unwrap().unwrap();
        assert_eq!(stored.get_document("archetype").unwrap().get_i64("val").unwrap(), 1);

        // Granting WRITE to the other root lets it through
        let other = ObjectId::new();
        let mut mem = graph.memory(requester_for(root.id));
        mem.populate(&person).await.unwrap();
        assert!(mem.allow_root(&person, &AnchorRef::root(other), AccessLevel::Write).unwrap());
        mem.close().await.unwrap();

        let mut mem = graph.memory(requester_for(other));
        mem.populate(&person).await.unwrap();
        assert_eq!(mem.access_level(&person.id), AccessLevel::Write);
        mem.archetype_mut::<Person>(&person).unwrap().val = 99;
        mem.close().await.unwrap();

        let stored = local.find_one(Collection::Node, doc! { "_id": person.id }, None).await.unwrap().unwrap();
        assert_eq!(stored.get_document("archetype").unwrap().get_i64("val").unwrap(), 99);

        // Revoking takes the grant away again
        let mut mem = graph.memory(requester_for(root.id));
        mem.populate(&person).await.unwrap();
        assert!(mem.disallow_root(&person, &AnchorRef::root(other)).unwrap());
        mem.close().await.unwrap();

        let mut mem = graph.memory(requester_for(other));
        mem.populate(&person).await.unwrap();
        assert_eq!(mem.access_level(&person.id), AccessLevel::NoAccess);
    }

    #[tokio::test]
    async fn test_destroyed_ids_are_not_reloaded() {
        let (graph, _, _) = graph_store(StoreConfig::default());
        let (root, person) = seed(&graph).await;

        let mut mem = graph.memory(requester_for(root.id));
        mem.populate(&person).await.unwrap();
        assert!(mem.destroy(&person).await.unwrap());

        assert!(mem.find_by_id(&person).await.unwrap().is_none());
        assert!(mem.find(&[person.clone()]).await.unwrap().is_empty());

        mem.get_bulk_write().unwrap();
        assert!(mem.find_by_id(&person).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_populate_data_prefetches_neighbors() {
        let (graph, _, _) = graph_store(StoreConfig::default());
        let (root, person) = seed(&graph).await;

        let mut mem = graph.system_memory();
        mem.find_by_id(&root).await.unwrap();
        mem.populate_data(&[root.clone()]).await.unwrap();
        assert_eq!(mem.len(), 3);
        assert!(mem.contains(&person.id));

        let config = StoreConfig { single_query: true, ..StoreConfig::default() };
        let graph = GraphStore::new(graph.store().clone(), Arc::new(crate::graph::testing::registry()), graph.queue().clone(), config);
        let mut mem = graph.system_memory();
        mem.find_by_id(&root).await.unwrap();
        mem.populate_data(&[root]).await.unwrap();
        assert_eq!(mem.len(), 1);
    }

    #[tokio::test]
    async fn test_reads_go_through_bound_session() {
        let (graph, local, _) = graph_store(StoreConfig::default());
        let root = AnchorRef::root(ObjectId::new());

        // Written inside an open transaction, invisible outside it
        let mut session = local.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        let mut node = Anchor::from_archetype(Person { name: "ada".into(), val: 7 });
        node.root = Some(root.id);
        node.persistent = true;
        let person = node.reference();
        local
            .insert_one(Collection::Node, node.to_document().unwrap(), Some(session.as_mut()))
            .await
            .unwrap();
        assert_eq!(local.count(Collection::Node).await, 0);

        let mut mem = graph.memory(requester_for(root.id));
        mem.bind_session(session);
        assert_eq!(mem.find(&[person.clone()]).await.unwrap(), vec![person.clone()]);
        assert_eq!(mem.archetype::<Person>(&person).unwrap().val, 7);

        let mut next = graph.memory(requester_for(root.id));
        next.bind_session(mem.take_session().unwrap());
        assert_eq!(next.find_by_id(&person).await.unwrap(), Some(person.clone()));

        let mut unbound = graph.memory(requester_for(root.id));
        assert!(unbound.find_by_id(&person).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_uses_bound_session() {
        let (graph, local, _) = graph_store(StoreConfig::default());
        let root_id = ObjectId::new();
        let mut mem = graph.memory(requester_for(root_id));
        let root = mem.set(Anchor::root_node(root_id, Default::default()));

        let mut session = local.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        mem.bind_session(session);
        mem.close().await.unwrap();

        assert_eq!(local.count(Collection::Node).await, 1);
        assert!(!mem.take_session().unwrap().in_transaction());
    }
}
