//! Anchors: persistence identity around an archetype
//!
//! An [`Anchor`] owns the archetype, its id, owner root, permission and
//! dirty-tracking state. Variant data lives in [`AnchorBody`]; links to other
//! anchors are [`AnchorRef`] stubs resolved through the memory cache.

use bson::{doc, oid::ObjectId, Bson, Document};
use serde_json::json;

use crate::graph::access::Permission;
use crate::graph::archetype::{Archetype, ArchetypeRegistry, DynArchetype, Root};
use crate::graph::reference::{AnchorKind, AnchorRef};
use crate::graph::schedule::Schedule;
use crate::graph::state::{content_hash, field_hashes, AnchorState};
use crate::types::{Result, StoreError};

/// Array field holding a node's edges
pub const EDGES: &str = "edges";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeData {
    pub edges: Vec<AnchorRef>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeData {
    pub source: Option<AnchorRef>,
    pub target: Option<AnchorRef>,
    pub is_undirected: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalkerData {
    pub path: Vec<AnchorRef>,
    pub next: Vec<AnchorRef>,
    pub ignores: Vec<AnchorRef>,
    pub returns: Vec<Bson>,
    pub disengaged: bool,
    pub schedule: Option<Schedule>,
}

/// Variant-specific anchor data
#[derive(Debug, Clone, PartialEq)]
pub enum AnchorBody {
    Node(NodeData),
    Edge(EdgeData),
    Walker(WalkerData),
    Object,
}

impl AnchorBody {
    fn empty(kind: AnchorKind) -> Self {
        match kind {
            AnchorKind::Node => AnchorBody::Node(NodeData::default()),
            AnchorKind::Edge => AnchorBody::Edge(EdgeData::default()),
            AnchorKind::Walker => AnchorBody::Walker(WalkerData::default()),
            AnchorKind::Object => AnchorBody::Object,
        }
    }

    pub fn kind(&self) -> AnchorKind {
        match self {
            AnchorBody::Node(_) => AnchorKind::Node,
            AnchorBody::Edge(_) => AnchorKind::Edge,
            AnchorBody::Walker(_) => AnchorKind::Walker,
            AnchorBody::Object => AnchorKind::Object,
        }
    }
}

/// A loaded graph object
#[derive(Debug)]
pub struct Anchor {
    pub id: ObjectId,
    pub name: String,
    pub root: Option<ObjectId>,
    pub access: Permission,
    pub persistent: bool,
    pub state: AnchorState,
    pub archetype: Box<dyn DynArchetype>,
    pub body: AnchorBody,
}

impl Anchor {
    /// Fresh unconnected, non-persistent anchor
    pub fn new(archetype: Box<dyn DynArchetype>) -> Self {
        let kind = archetype.kind();
        Self {
            id: ObjectId::new(),
            name: archetype.type_name().to_string(),
            root: None,
            access: Permission::default(),
            persistent: false,
            state: AnchorState::default(),
            archetype,
            body: AnchorBody::empty(kind),
        }
    }

    pub fn from_archetype<T: Archetype>(archetype: T) -> Self {
        Self::new(Box::new(archetype))
    }

    /// Root node anchor with a fixed id
    pub fn root_node(id: ObjectId, access: Permission) -> Self {
        let mut anchor = Self::from_archetype(Root {});
        anchor.id = id;
        anchor.access = access;
        anchor.persistent = true;
        anchor
    }

    pub fn kind(&self) -> AnchorKind {
        self.body.kind()
    }

    /// Stub identity of this anchor
    pub fn reference(&self) -> AnchorRef {
        AnchorRef::new(self.kind(), self.name.clone(), self.id)
    }

    pub fn ref_id(&self) -> String {
        self.reference().ref_id()
    }

    pub fn is_root(&self) -> bool {
        self.kind() == AnchorKind::Node && self.archetype.as_any().is::<Root>()
    }

    pub fn archetype_as<T: Archetype>(&self) -> Option<&T> {
        self.archetype.as_any().downcast_ref::<T>()
    }

    pub fn archetype_as_mut<T: Archetype>(&mut self) -> Option<&mut T> {
        self.archetype.as_any_mut().downcast_mut::<T>()
    }

    // =========================================================================
    // Variant accessors
    // =========================================================================

    /// Edges of a node, empty for other kinds
    pub fn edges(&self) -> &[AnchorRef] {
        match &self.body {
            AnchorBody::Node(node) => &node.edges,
            _ => &[],
        }
    }

    pub fn edges_mut(&mut self) -> Option<&mut Vec<AnchorRef>> {
        match &mut self.body {
            AnchorBody::Node(node) => Some(&mut node.edges),
            _ => None,
        }
    }

    pub fn edge(&self) -> Option<&EdgeData> {
        match &self.body {
            AnchorBody::Edge(edge) => Some(edge),
            _ => None,
        }
    }

    pub fn walker(&self) -> Option<&WalkerData> {
        match &self.body {
            AnchorBody::Walker(walker) => Some(walker),
            _ => None,
        }
    }

    pub fn walker_mut(&mut self) -> Option<&mut WalkerData> {
        match &mut self.body {
            AnchorBody::Walker(walker) => Some(walker),
            _ => None,
        }
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.walker().and_then(|w| w.schedule.as_ref())
    }

    // =========================================================================
    // Diff recording
    // =========================================================================

    pub fn add_to_set(&mut self, field: &str, item: AnchorRef, remove: bool) {
        self.state.changes.add_to_set(field, item, remove);
    }

    pub fn pull(&mut self, field: &str, item: AnchorRef, remove: bool) {
        self.state.changes.pull(field, item, remove);
    }

    /// Record that `edge` was attached to this node
    pub fn connect_edge(&mut self, edge: AnchorRef) {
        self.add_to_set(EDGES, edge, false);
    }

    /// Record that `edge` was removed from this node
    pub fn disconnect_edge(&mut self, edge: AnchorRef) {
        self.pull(EDGES, edge, false);
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Full stored document
    pub fn to_document(&self) -> Result<Document> {
        let mut doc = doc! {
            "_id": self.id,
            "name": self.name.clone(),
            "root": self.root,
            "access": bson::to_bson(&self.access)?,
            "archetype": self.archetype.to_fields()?,
        };

        match &self.body {
            AnchorBody::Node(node) => {
                doc.insert(EDGES, ref_ids(&node.edges));
            }
            AnchorBody::Edge(edge) => {
                doc.insert("source", edge.source.as_ref().map(AnchorRef::ref_id));
                doc.insert("target", edge.target.as_ref().map(AnchorRef::ref_id));
                doc.insert("is_undirected", edge.is_undirected);
            }
            AnchorBody::Walker(walker) => {
                doc.insert("path", ref_ids(&walker.path));
                doc.insert("next", ref_ids(&walker.next));
                doc.insert("ignores", ref_ids(&walker.ignores));
                doc.insert("returns", walker.returns.clone());
                doc.insert("disengaged", walker.disengaged);
                let schedule = match &walker.schedule {
                    Some(schedule) => bson::to_bson(schedule)?,
                    None => Bson::Null,
                };
                doc.insert("schedule", schedule);
            }
            AnchorBody::Object => {}
        }

        Ok(doc)
    }

    /// Decode a stored document into a connected, persistent anchor
    pub fn from_document(kind: AnchorKind, doc: &Document, registry: &ArchetypeRegistry) -> Result<Self> {
        let id = doc.get_object_id("_id")?;
        let name = match doc.get("name") {
            Some(Bson::String(name)) => name.clone(),
            _ => String::new(),
        };
        let root = match doc.get("root") {
            Some(Bson::ObjectId(root)) => Some(*root),
            _ => None,
        };
        let access = match doc.get_document("access") {
            Ok(access) => bson::from_document(access.clone())?,
            Err(_) => Permission::default(),
        };
        let fields = doc.get_document("archetype").cloned().unwrap_or_default();
        let archetype = registry.decode(kind, &name, fields)?;

        let body = match kind {
            AnchorKind::Node => AnchorBody::Node(NodeData {
                edges: parse_refs(doc, EDGES, AnchorKind::Edge)?,
            }),
            AnchorKind::Edge => AnchorBody::Edge(EdgeData {
                source: parse_optional_ref(doc, "source")?,
                target: parse_optional_ref(doc, "target")?,
                is_undirected: doc.get_bool("is_undirected").unwrap_or(false),
            }),
            AnchorKind::Walker => AnchorBody::Walker(WalkerData {
                path: parse_refs(doc, "path", AnchorKind::Node)?,
                next: parse_refs(doc, "next", AnchorKind::Node)?,
                ignores: parse_refs(doc, "ignores", AnchorKind::Node)?,
                returns: doc.get_array("returns").cloned().unwrap_or_default(),
                disengaged: doc.get_bool("disengaged").unwrap_or(false),
                schedule: match doc.get("schedule") {
                    Some(Bson::Document(schedule)) => Some(bson::from_document(schedule.clone())?),
                    _ => None,
                },
            }),
            AnchorKind::Object => AnchorBody::Object,
        };

        let mut anchor = Self {
            id,
            name,
            root,
            access,
            persistent: true,
            state: AnchorState::connected(),
            archetype,
            body,
        };
        anchor.sync_hash()?;
        Ok(anchor)
    }

    /// `{id, context}` form used in responses
    pub fn report(&self) -> Result<serde_json::Value> {
        let context = Bson::Document(self.archetype.to_fields()?).into_relaxed_extjson();
        Ok(json!({ "id": self.ref_id(), "context": context }))
    }

    // =========================================================================
    // Hashing
    // =========================================================================

    /// Reset the diff baseline to the current content
    pub fn sync_hash(&mut self) -> Result<()> {
        self.state.context_hashes = field_hashes(&self.archetype.to_fields()?)?;
        self.state.schedule_hashes = match self.schedule() {
            Some(schedule) => field_hashes(&bson::to_document(schedule)?)?,
            None => Default::default(),
        };
        self.state.full_hash = content_hash(&self.to_document()?)?;
        Ok(())
    }

    /// New content hash when the document differs from the last sync, else 0
    pub fn has_changed(&self) -> Result<u64> {
        let current = content_hash(&self.to_document()?)?;
        Ok(if current != self.state.full_hash { current } else { 0 })
    }
}

fn ref_ids(refs: &[AnchorRef]) -> Vec<String> {
    refs.iter().map(AnchorRef::ref_id).collect()
}

fn parse_refs(doc: &Document, field: &str, kind: AnchorKind) -> Result<Vec<AnchorRef>> {
    let Ok(items) = doc.get_array(field) else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .map(|item| match item {
            Bson::String(ref_id) => AnchorRef::parse_kind(ref_id, kind),
            other => Err(StoreError::InvalidReference(other.to_string())),
        })
        .collect()
}

fn parse_optional_ref(doc: &Document, field: &str) -> Result<Option<AnchorRef>> {
    match doc.get(field) {
        Some(Bson::String(ref_id)) => AnchorRef::parse_kind(ref_id, AnchorKind::Node).map(Some),
        Some(Bson::Null) | None => Ok(None),
        Some(other) => Err(StoreError::InvalidReference(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::access::AccessLevel;
    use crate::graph::testing::{registry, Job, Likes, Note, Person};

    fn persisted<T: Archetype>(archetype: T) -> Anchor {
        let mut anchor = Anchor::from_archetype(archetype);
        anchor.persistent = true;
        anchor.root = Some(ObjectId::new());
        anchor
    }

    fn assert_round_trip(anchor: &Anchor) {
        let doc = anchor.to_document().unwrap();
        let back = Anchor::from_document(anchor.kind(), &doc, &registry()).unwrap();
        assert_eq!(back.id, anchor.id);
        assert_eq!(back.name, anchor.name);
        assert_eq!(back.root, anchor.root);
        assert_eq!(back.access, anchor.access);
        assert_eq!(back.body, anchor.body);
        assert_eq!(back.archetype.to_fields().unwrap(), anchor.archetype.to_fields().unwrap());
        assert!(back.state.connected);
        assert!(back.persistent);
    }

    #[test]
    fn test_node_round_trip() {
        let mut node = persisted(Person { name: "ada".into(), val: 7 });
        node.access.all = AccessLevel::Read;
        node.access.roots.anchors.insert(AnchorRef::root(ObjectId::new()).ref_id(), AccessLevel::Write);
        node.edges_mut().unwrap().push(AnchorRef::new(AnchorKind::Edge, "Likes", ObjectId::new()));
        assert_round_trip(&node);
    }

    #[test]
    fn test_edge_round_trip() {
        let mut edge = persisted(Likes { weight: 3 });
        edge.body = AnchorBody::Edge(EdgeData {
            source: Some(AnchorRef::new(AnchorKind::Node, "Person", ObjectId::new())),
            target: Some(AnchorRef::root(ObjectId::new())),
            is_undirected: true,
        });
        assert_round_trip(&edge);
    }

    #[test]
    fn test_walker_round_trip() {
        let mut walker = persisted(Job { task: "sync".into() });
        let data = walker.walker_mut().unwrap();
        data.next.push(AnchorRef::root(ObjectId::new()));
        data.returns.push(Bson::Int32(1));
        data.schedule = Some(Schedule::pending("n::65a1b2c3d4e5f60718293a4b", "n::65a1b2c3d4e5f60718293a4c", bson::DateTime::from_millis(1_000)));
        assert_round_trip(&walker);
    }

    #[test]
    fn test_object_round_trip() {
        assert_round_trip(&persisted(Note { text: "hi".into() }));
    }

    #[test]
    fn test_ref_id_matches_identity() {
        let node = Anchor::from_archetype(Person::default());
        let parsed = AnchorRef::parse(&node.ref_id()).unwrap();
        assert_eq!(parsed.name, "Person");
        assert_eq!(parsed.id, node.id);
        assert_eq!(parsed, node.reference());
    }

    #[test]
    fn test_document_shape() {
        let node = persisted(Person { name: "ada".into(), val: 0 });
        let doc = node.to_document().unwrap();
        assert_eq!(doc.get_str("name").unwrap(), "Person");
        assert_eq!(doc.get_document("archetype").unwrap().get_i64("val").unwrap(), 0);
        assert!(doc.get_array("edges").unwrap().is_empty());
        assert_eq!(doc.get_document("access").unwrap().get_str("all").unwrap(), "NO_ACCESS");
    }

    #[test]
    fn test_has_changed_after_sync() {
        let mut node = persisted(Person::default());
        node.sync_hash().unwrap();
        assert_eq!(node.has_changed().unwrap(), 0);

        node.archetype_as_mut::<Person>().unwrap().val = 5;
        let changed = node.has_changed().unwrap();
        assert_ne!(changed, 0);
        node.state.full_hash = changed;
        assert_eq!(node.has_changed().unwrap(), 0);
    }

    #[test]
    fn test_from_document_rejects_bad_edge_ref() {
        let doc = doc! {
            "_id": ObjectId::new(),
            "name": "Person",
            "root": null,
            "access": { "all": "NO_ACCESS", "roots": { "anchors": {} } },
            "archetype": { "name": "x", "val": 1i64 },
            "edges": ["n:Person:65a1b2c3d4e5f60718293a4b"],
        };
        let err = Anchor::from_document(AnchorKind::Node, &doc, &registry()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidReference(_)));
    }

    #[test]
    fn test_from_document_requires_id() {
        let err = Anchor::from_document(AnchorKind::Object, &doc! { "name": "Note" }, &registry()).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_report() {
        let node = Anchor::from_archetype(Person { name: "ada".into(), val: 2 });
        let report = node.report().unwrap();
        assert_eq!(report["id"], node.ref_id());
        assert_eq!(report["context"]["name"], "ada");
        assert_eq!(report["context"]["val"], 2);
    }

    #[test]
    fn test_root_detection() {
        assert!(Anchor::root_node(ObjectId::new(), Permission::default()).is_root());
        assert!(!Anchor::from_archetype(Person::default()).is_root());
    }
}
