//! Per-anchor dirty tracking
//!
//! [`Changes`] accumulates update operators between flushes. Content hashes
//! give the baseline that field-level diffing compares against. A hash
//! collision makes a real change look unchanged; with 64 bits of SHA-256 that
//! risk is accepted.

use bson::{doc, Bson, Document};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

use crate::graph::reference::AnchorRef;
use crate::types::Result;

/// Pending update operators for one anchor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    /// `$set` paths
    pub set: Document,
    /// `$unset` paths
    pub unset: Document,
    /// `$addToSet` items per array field
    pub add_to_set: BTreeMap<String, Vec<AnchorRef>>,
    /// `$pull` items per array field
    pub pull: BTreeMap<String, Vec<AnchorRef>>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.unset.is_empty()
            && self.add_to_set.values().all(Vec::is_empty)
            && self.pull.values().all(Vec::is_empty)
    }

    /// Record `$set path = value`, replacing a pending `$unset` of the same path
    pub fn set(&mut self, path: impl Into<String>, value: impl Into<Bson>) {
        let path = path.into();
        self.unset.remove(&path);
        self.set.insert(path, value.into());
    }

    /// Record `$unset path`, replacing a pending `$set` of the same path
    pub fn unset(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.set.remove(&path);
        self.unset.insert(path, true);
    }

    /// Record an `$addToSet` of `item`, or withdraw it when `remove` is set.
    ///
    /// Adding an item with a pending pull cancels the pull instead, so a
    /// remove followed by an add emits nothing.
    pub fn add_to_set(&mut self, field: &str, item: AnchorRef, remove: bool) {
        let items = self.add_to_set.entry(field.to_string()).or_default();
        if remove {
            items.retain(|i| i != &item);
            return;
        }

        if self.pull.get(field).is_some_and(|p| p.contains(&item)) {
            self.pull(field, item, true);
        } else if !items.contains(&item) {
            items.push(item);
        }
    }

    /// Record a `$pull` of `item`, or withdraw it when `remove` is set.
    ///
    /// Pulling an item with a pending add cancels the add instead.
    pub fn pull(&mut self, field: &str, item: AnchorRef, remove: bool) {
        let items = self.pull.entry(field.to_string()).or_default();
        if remove {
            items.retain(|i| i != &item);
            return;
        }

        if self.add_to_set.get(field).is_some_and(|a| a.contains(&item)) {
            self.add_to_set(field, item, true);
        } else if !items.contains(&item) {
            items.push(item);
        }
    }

    /// Items pending `$addToSet` on `field`
    pub fn added(&self, field: &str) -> &[AnchorRef] {
        self.add_to_set.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Items pending `$pull` on `field`
    pub fn pulled(&self, field: &str) -> &[AnchorRef] {
        self.pull.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Process-local persistence state of an anchor
#[derive(Debug, Clone, Default)]
pub struct AnchorState {
    pub changes: Changes,
    /// Hash of the last flushed document, zero before the first sync
    pub full_hash: u64,
    /// Hash per archetype field
    pub context_hashes: HashMap<String, u64>,
    /// Hash per schedule field, walkers only
    pub schedule_hashes: HashMap<String, u64>,
    /// `None` untouched, `Some(false)` delete on next flush, `Some(true)` deleted
    pub deleted: Option<bool>,
    /// Whether the anchor has ever been written
    pub connected: bool,
}

impl AnchorState {
    /// State of an anchor just loaded from storage
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }
}

// =============================================================================
// Hashing
// =============================================================================

/// 64-bit content hash of a document's canonical BSON bytes
pub fn content_hash(doc: &Document) -> Result<u64> {
    let mut bytes = Vec::new();
    doc.to_writer(&mut bytes)?;

    let digest = Sha256::digest(&bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    Ok(u64::from_be_bytes(head))
}

/// Hash of a single field value
pub fn field_hash(value: &Bson) -> Result<u64> {
    content_hash(&doc! { "v": value.clone() })
}

/// Hash every top-level field of `fields`
pub fn field_hashes(fields: &Document) -> Result<HashMap<String, u64>> {
    fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), field_hash(value)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::reference::AnchorKind;
    use bson::oid::ObjectId;

    fn edge() -> AnchorRef {
        AnchorRef::new(AnchorKind::Edge, "", ObjectId::new())
    }

    #[test]
    fn test_add_then_pull_cancels() {
        let mut changes = Changes::default();
        let e = edge();
        changes.add_to_set("edges", e.clone(), false);
        changes.pull("edges", e, false);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_pull_then_add_cancels() {
        let mut changes = Changes::default();
        let e = edge();
        changes.pull("edges", e.clone(), false);
        changes.add_to_set("edges", e, false);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_independent_items_kept() {
        let mut changes = Changes::default();
        let (a, b) = (edge(), edge());
        changes.add_to_set("edges", a.clone(), false);
        changes.add_to_set("edges", a.clone(), false);
        changes.pull("edges", b.clone(), false);
        assert_eq!(changes.added("edges"), &[a]);
        assert_eq!(changes.pulled("edges"), &[b]);
    }

    #[test]
    fn test_set_and_unset_replace_each_other() {
        let mut changes = Changes::default();
        changes.set("access.all", "READ");
        changes.unset("access.all");
        assert!(changes.set.is_empty());
        assert!(changes.unset.contains_key("access.all"));

        changes.set("access.all", "WRITE");
        assert!(changes.unset.is_empty());
        assert_eq!(changes.set.get_str("access.all").unwrap(), "WRITE");
    }

    #[test]
    fn test_hashes_are_deterministic() {
        let a = doc! { "x": 1, "y": "two" };
        let b = doc! { "x": 1, "y": "two" };
        let c = doc! { "x": 2, "y": "two" };
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
        assert_ne!(content_hash(&a).unwrap(), content_hash(&c).unwrap());

        let hashes = field_hashes(&a).unwrap();
        assert_eq!(hashes["x"], field_hash(&Bson::Int32(1)).unwrap());
        assert_ne!(hashes["x"], hashes["y"]);
    }
}
