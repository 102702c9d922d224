//! Translating anchor state into write operations
//!
//! `build_query` decides per anchor whether it needs a delete, an insert or
//! an update, recursing into the anchors it links to. Update documents only
//! carry fields whose hash moved since the last sync, and edge array changes
//! respect the caller's access level.

use bson::{doc, oid::ObjectId, Bson, Document};
use tracing::{debug, info};

use crate::db::WriteOp;
use crate::graph::anchor::{Anchor, AnchorBody, EDGES};
use crate::graph::bulk_write::BulkWrite;
use crate::graph::memory::Memory;
use crate::graph::reference::{AnchorKind, AnchorRef};
use crate::graph::schedule::ScheduledWalker;
use crate::graph::state::{field_hash, Changes};
use crate::types::Result;

/// Queue message for a walker whose schedule is pending
pub(crate) fn scheduled_item(anchor: &Anchor) -> Option<ScheduledWalker> {
    let schedule = anchor.schedule().filter(|s| s.is_pending())?;
    let root_id = anchor.root.map(|root| AnchorRef::root(root).ref_id()).unwrap_or_default();
    Some(ScheduledWalker::new(anchor.ref_id(), schedule, root_id))
}

impl Memory {
    /// Queue the writes `id` needs, following links it touches
    pub fn build_query(&mut self, bulk_write: &mut BulkWrite, id: ObjectId) -> Result<()> {
        let Some(anchor) = self.lookup(&id) else {
            debug!(anchor = %id.to_hex(), "Skipping anchor outside the cache");
            return Ok(());
        };
        let (deleted, connected) = (anchor.state.deleted, anchor.state.connected);

        match deleted {
            Some(true) => Ok(()),
            Some(false) if self.check_write_access(&id) => {
                if let Some(anchor) = self.lookup_mut(&id) {
                    anchor.state.deleted = Some(true);
                }
                self.delete(bulk_write, id)
            }
            _ if !connected => {
                if let Some(anchor) = self.lookup_mut(&id) {
                    anchor.state.connected = true;
                    anchor.sync_hash()?;
                }
                self.insert(bulk_write, id)
            }
            _ if self.check_connect_access(&id) => self.update(bulk_write, id, true),
            _ => Ok(()),
        }
    }

    /// Flush a single anchor and everything it reaches in one transaction
    pub async fn apply(&mut self, reference: &AnchorRef) -> Result<BulkWrite> {
        let mut bulk_write = BulkWrite::new();
        self.build_query(&mut bulk_write, reference.id)?;

        if bulk_write.has_operations() {
            self.execute(&bulk_write).await?;
        }
        Ok(bulk_write)
    }

    fn insert(&mut self, bulk_write: &mut BulkWrite, id: ObjectId) -> Result<()> {
        let Some(anchor) = self.lookup_mut(&id) else {
            return Ok(());
        };
        // Written whole, so pending diffs are moot
        anchor.state.changes = Changes::default();

        let linked: Vec<ObjectId> = match &anchor.body {
            AnchorBody::Node(node) => node.edges.iter().map(|e| e.id).collect(),
            AnchorBody::Edge(edge) => [&edge.source, &edge.target].into_iter().flatten().map(|n| n.id).collect(),
            _ => Vec::new(),
        };
        for linked_id in linked {
            self.build_query(bulk_write, linked_id)?;
        }

        let Some(anchor) = self.lookup(&id) else {
            return Ok(());
        };
        bulk_write.push(anchor.kind(), WriteOp::InsertOne { document: anchor.to_document()? });
        if let Some(item) = scheduled_item(anchor) {
            bulk_write.schedules.push(item);
        }
        Ok(())
    }

    /// Queue the diff of `id` since its last sync.
    ///
    /// Content and schedule fields need write access and are silently dropped
    /// without it; edge array changes only need connect access. With
    /// `propagate`, added edges are flushed and pulled edges deleted too.
    pub fn update(&mut self, bulk_write: &mut BulkWrite, id: ObjectId, propagate: bool) -> Result<()> {
        let can_write = self.check_write_access(&id);
        let Some(anchor) = self.lookup_mut(&id) else {
            return Ok(());
        };

        let kind = anchor.kind();
        let mut changes = std::mem::take(&mut anchor.state.changes);
        let mut set = Document::new();
        let mut unset = Document::new();

        if can_write {
            set = std::mem::take(&mut changes.set);
            unset = std::mem::take(&mut changes.unset);

            for (key, value) in anchor.archetype.to_fields()? {
                let hash = field_hash(&value)?;
                if anchor.state.context_hashes.get(&key) != Some(&hash) {
                    anchor.state.context_hashes.insert(key.clone(), hash);
                    set.insert(format!("archetype.{key}"), value);
                }
            }

            if kind == AnchorKind::Walker {
                diff_schedule(anchor, &mut set, bulk_write)?;
            }
        } else if !changes.set.is_empty() || !changes.unset.is_empty() {
            info!(anchor = %anchor.ref_id(), "Dropping content changes without write access");
        }

        let added = changes.added(EDGES).to_vec();
        let pulled = changes.pulled(EDGES).to_vec();

        if propagate {
            for edge in &added {
                self.build_query(bulk_write, edge.id)?;
            }
            for edge in &pulled {
                let purged = self.purged.contains(&edge.id);
                match self.lookup_mut(&edge.id) {
                    Some(anchor) if anchor.state.deleted == Some(true) => {}
                    Some(anchor) => {
                        anchor.state.deleted = Some(true);
                        bulk_write.del_edge(edge.id);
                    }
                    None if !purged => bulk_write.del_edge(edge.id),
                    None => {}
                }
            }
        }

        let filter = doc! { "_id": id };
        let mut update = Document::new();
        if !set.is_empty() {
            update.insert("$set", set);
        }
        if !unset.is_empty() {
            update.insert("$unset", unset);
        }
        if !added.is_empty() {
            update.insert("$addToSet", edges_operand("$each", &added));
        }
        if !pulled.is_empty() {
            let pull = edges_operand("$in", &pulled);
            if added.is_empty() {
                update.insert("$pull", pull);
            } else {
                // Mongo rejects $addToSet and $pull on the same path in one update
                bulk_write.push(
                    kind,
                    WriteOp::UpdateOne {
                        filter: filter.clone(),
                        update: doc! { "$pull": pull },
                    },
                );
            }
        }

        if !update.is_empty() {
            bulk_write.push(kind, WriteOp::UpdateOne { filter, update });
        }
        Ok(())
    }

    fn delete(&mut self, bulk_write: &mut BulkWrite, id: ObjectId) -> Result<()> {
        let Some(anchor) = self.lookup(&id) else {
            return Ok(());
        };

        match &anchor.body {
            AnchorBody::Node(node) => {
                let mut edges = node.edges.clone();
                edges.extend(anchor.state.changes.pulled(EDGES).iter().cloned());

                for edge in edges {
                    match self.lookup_mut(&edge.id) {
                        Some(linked) if linked.state.deleted == Some(true) => {}
                        Some(linked) => {
                            linked.state.deleted = Some(true);
                            self.delete(bulk_write, edge.id)?;
                        }
                        None => bulk_write.del_edge(edge.id),
                    }
                }
                bulk_write.del_node(id);
            }
            AnchorBody::Edge(edge) => {
                let endpoints: Vec<ObjectId> =
                    [&edge.source, &edge.target].into_iter().flatten().map(|n| n.id).collect();
                for endpoint in endpoints {
                    self.build_query(bulk_write, endpoint)?;
                }
                bulk_write.del_edge(id);
            }
            AnchorBody::Walker(_) => bulk_write.del_walker(id),
            AnchorBody::Object => bulk_write.del_object(id),
        }
        Ok(())
    }
}

/// Add changed schedule fields to `set`, queueing the walker when its
/// status moved to PENDING in this flush
fn diff_schedule(anchor: &mut Anchor, set: &mut Document, bulk_write: &mut BulkWrite) -> Result<()> {
    let Some(schedule) = anchor.schedule().cloned() else {
        if !anchor.state.schedule_hashes.is_empty() {
            anchor.state.schedule_hashes.clear();
            set.insert("schedule", Bson::Null);
        }
        return Ok(());
    };

    let mut status_changed = false;
    for (key, value) in bson::to_document(&schedule)? {
        let hash = field_hash(&value)?;
        if anchor.state.schedule_hashes.get(&key) != Some(&hash) {
            status_changed |= key == "status";
            anchor.state.schedule_hashes.insert(key.clone(), hash);
            set.insert(format!("schedule.{key}"), value);
        }
    }

    if status_changed {
        if let Some(item) = scheduled_item(anchor) {
            bulk_write.schedules.push(item);
        }
    }
    Ok(())
}

/// `{edges: {<modifier>: [ref ids]}}`
fn edges_operand(modifier: &str, refs: &[AnchorRef]) -> Document {
    let ref_ids: Vec<String> = refs.iter().map(AnchorRef::ref_id).collect();
    let mut items = Document::new();
    items.insert(modifier, ref_ids);
    let mut operand = Document::new();
    operand.insert(EDGES, items);
    operand
}
