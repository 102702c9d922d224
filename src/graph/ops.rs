//! Graph operations on cached anchors
//!
//! Everything here mutates the in-memory graph and records diffs; nothing is
//! written until the memory flushes.

use tracing::info;

use crate::graph::access::AccessLevel;
use crate::graph::anchor::{Anchor, AnchorBody, EdgeData};
use crate::graph::archetype::Archetype;
use crate::graph::memory::Memory;
use crate::graph::reference::{AnchorKind, AnchorRef};
use crate::types::{Result, StoreError};

impl Memory {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Wrap `archetype` in a fresh non-persistent anchor
    pub fn create<T: Archetype>(&mut self, archetype: T) -> AnchorRef {
        self.set(Anchor::from_archetype(archetype))
    }

    /// Mark an anchor for persistence, owned by the current root.
    ///
    /// Loaded, not yet persistent neighbours come along: a node's edges and
    /// an edge's endpoints.
    pub fn save(&mut self, reference: &AnchorRef) -> Result<()> {
        let owner = self.requester.root.id;
        let anchor = self.anchor_mut(reference)?;
        if anchor.persistent {
            return Ok(());
        }

        anchor.persistent = true;
        if anchor.root.is_none() {
            anchor.root = Some(owner);
        }

        let linked: Vec<AnchorRef> = match &anchor.body {
            AnchorBody::Node(node) => node.edges.clone(),
            AnchorBody::Edge(edge) => [&edge.source, &edge.target].into_iter().flatten().cloned().collect(),
            _ => Vec::new(),
        };
        for linked in linked {
            if self.get(&linked.id).is_some_and(|a| !a.persistent) {
                self.save(&linked)?;
            }
        }
        Ok(())
    }

    /// Link `source` to `target` with a new edge.
    ///
    /// Needs connect access on both ends; returns `None` without it. The edge
    /// is persisted when either endpoint already is.
    pub fn connect<T: Archetype>(
        &mut self,
        source: &AnchorRef,
        target: &AnchorRef,
        edge: T,
        is_undirected: bool,
    ) -> Result<Option<AnchorRef>> {
        if T::KIND != AnchorKind::Edge {
            return Err(StoreError::Validation(format!("{} is not an edge archetype", T::NAME)));
        }

        let source = self.node(source)?.reference();
        let target = self.node(target)?.reference();
        if !self.check_connect_access(&source.id) || !self.check_connect_access(&target.id) {
            return Ok(None);
        }

        let mut anchor = Anchor::from_archetype(edge);
        anchor.body = AnchorBody::Edge(EdgeData {
            source: Some(source.clone()),
            target: Some(target.clone()),
            is_undirected,
        });
        let edge = self.set(anchor);

        let mut persistent = false;
        for endpoint in [&source, &target] {
            let node = self.anchor_mut(endpoint)?;
            persistent |= node.persistent;
            if let Some(edges) = node.edges_mut() {
                if !edges.contains(&edge) {
                    edges.push(edge.clone());
                    node.connect_edge(edge.clone());
                }
            }
        }

        if persistent {
            self.save(&edge)?;
            self.save(&source)?;
            self.save(&target)?;
        }
        Ok(Some(edge))
    }

    /// Unlink an edge from both of its endpoints
    pub async fn detach(&mut self, edge: &AnchorRef) -> Result<()> {
        let Some(data) = self.anchor(edge)?.edge().cloned() else {
            return Err(StoreError::Validation(format!("{} is not an edge", edge.ref_id())));
        };
        let endpoints: Vec<AnchorRef> = [data.source, data.target].into_iter().flatten().collect();
        self.find(&endpoints).await?;

        for endpoint in &endpoints {
            if let Some(node) = self.get_mut(&endpoint.id) {
                if let Some(edges) = node.edges_mut() {
                    if let Some(pos) = edges.iter().position(|e| e.id == edge.id) {
                        edges.remove(pos);
                        node.disconnect_edge(edge.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Destroy an anchor, and for a node every edge attached to it.
    ///
    /// Returns false when the anchor does not resolve, is already being
    /// destroyed or the current root lacks write access.
    pub async fn destroy(&mut self, reference: &AnchorRef) -> Result<bool> {
        if reference.kind == AnchorKind::Edge {
            return self.destroy_edge(reference).await;
        }
        if !self.mark_destroyed(reference).await? {
            return Ok(false);
        }

        let edges = self.anchor(reference)?.edges().to_vec();
        self.find(&edges).await?;
        for edge in &edges {
            self.destroy_edge(edge).await?;
        }

        self.remove(&reference.id);
        Ok(true)
    }

    async fn destroy_edge(&mut self, edge: &AnchorRef) -> Result<bool> {
        if !self.mark_destroyed(edge).await? {
            return Ok(false);
        }
        self.detach(edge).await?;
        self.remove(&edge.id);
        Ok(true)
    }

    async fn mark_destroyed(&mut self, reference: &AnchorRef) -> Result<bool> {
        if self.find_by_id(reference).await?.is_none() {
            return Ok(false);
        }
        if !self.check_write_access(&reference.id) {
            return Ok(false);
        }

        let anchor = self.anchor_mut(reference)?;
        if anchor.state.deleted.is_some() {
            return Ok(false);
        }
        anchor.state.deleted = Some(false);
        Ok(true)
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    /// Grant `root` `level` on `target`, true when the grant changed
    pub fn allow_root(&mut self, target: &AnchorRef, root: &AnchorRef, level: AccessLevel) -> Result<bool> {
        if !self.writable(target)? {
            return Ok(false);
        }

        let ref_id = root.ref_id();
        let anchor = self.anchor_mut(target)?;
        if anchor.access.roots.check(&ref_id) == level {
            return Ok(false);
        }
        anchor.access.roots.anchors.insert(ref_id.clone(), level);
        anchor.state.changes.set(format!("access.roots.anchors.{ref_id}"), level.as_str());
        Ok(true)
    }

    /// Remove the grant `root` holds on `target`
    pub fn disallow_root(&mut self, target: &AnchorRef, root: &AnchorRef) -> Result<bool> {
        if !self.writable(target)? {
            return Ok(false);
        }

        let ref_id = root.ref_id();
        let anchor = self.anchor_mut(target)?;
        if anchor.access.roots.anchors.remove(&ref_id).is_none() {
            return Ok(false);
        }
        anchor.state.changes.unset(format!("access.roots.anchors.{ref_id}"));
        Ok(true)
    }

    /// Open `target` to every root at `level`
    pub fn unrestrict(&mut self, target: &AnchorRef, level: AccessLevel) -> Result<bool> {
        if !self.writable(target)? {
            return Ok(false);
        }

        let anchor = self.anchor_mut(target)?;
        if anchor.access.all == level {
            return Ok(false);
        }
        anchor.access.all = level;
        anchor.state.changes.set("access.all", level.as_str());
        Ok(true)
    }

    /// Close `target` to roots without an explicit grant
    pub fn restrict(&mut self, target: &AnchorRef) -> Result<bool> {
        if !self.writable(target)? {
            return Ok(false);
        }

        let anchor = self.anchor_mut(target)?;
        if anchor.access.all == AccessLevel::NoAccess {
            return Ok(false);
        }
        anchor.access.all = AccessLevel::NoAccess;
        anchor.state.changes.set("access.all", AccessLevel::NoAccess.as_str());
        Ok(true)
    }

    fn writable(&self, target: &AnchorRef) -> Result<bool> {
        self.anchor(target)?;
        if self.check_write_access(&target.id) {
            return Ok(true);
        }
        info!(target = %target.ref_id(), "Permission change ignored");
        Ok(false)
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Readable edges of a node
    pub async fn edges(&mut self, node: &AnchorRef) -> Result<Vec<AnchorRef>> {
        let edges = self.node(node)?.edges().to_vec();
        self.populate_data(std::slice::from_ref(node)).await?;

        let found = self.find(&edges).await?;
        Ok(found.into_iter().filter(|e| self.check_read_access(&e.id)).collect())
    }

    /// Readable nodes on the far end of a node's readable edges
    pub async fn neighbors(&mut self, node: &AnchorRef) -> Result<Vec<AnchorRef>> {
        let mut far: Vec<AnchorRef> = Vec::new();
        for edge in self.edges(node).await? {
            let Some(data) = self.get(&edge.id).and_then(Anchor::edge) else {
                continue;
            };
            let other = match (&data.source, &data.target) {
                (Some(source), Some(target)) if source.id == node.id => target.clone(),
                (Some(source), _) => source.clone(),
                _ => continue,
            };
            if !far.contains(&other) {
                far.push(other);
            }
        }

        let found = self.find(&far).await?;
        Ok(found.into_iter().filter(|n| self.check_read_access(&n.id)).collect())
    }

    // =========================================================================
    // Archetype access
    // =========================================================================

    pub fn archetype<T: Archetype>(&self, reference: &AnchorRef) -> Result<&T> {
        self.anchor(reference)?
            .archetype_as::<T>()
            .ok_or_else(|| StoreError::Validation(format!("{} is not a {}", reference.ref_id(), T::NAME)))
    }

    pub fn archetype_mut<T: Archetype>(&mut self, reference: &AnchorRef) -> Result<&mut T> {
        let ref_id = reference.ref_id();
        self.anchor_mut(reference)?
            .archetype_as_mut::<T>()
            .ok_or_else(|| StoreError::Validation(format!("{} is not a {}", ref_id, T::NAME)))
    }

    fn node(&self, reference: &AnchorRef) -> Result<&Anchor> {
        let anchor = self.anchor(reference)?;
        if anchor.kind() != AnchorKind::Node {
            return Err(StoreError::Validation(format!("{} is not a node", reference.ref_id())));
        }
        Ok(anchor)
    }
}
