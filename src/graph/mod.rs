//! Object-graph persistence core
//!
//! Anchors wrap user archetypes with identity, ownership and dirty tracking.
//! A request-scoped [`Memory`] caches them and turns their diffs into one
//! retried transaction per flush.

pub mod access;
pub mod anchor;
pub mod archetype;
pub mod bulk_write;
pub mod context;
mod flush;
pub mod memory;
mod ops;
pub mod reference;
pub mod schedule;
pub mod state;

#[cfg(test)]
mod testing;

pub use access::{resolve_access_level, Access, AccessLevel, AccessTarget, Permission, Requester};
pub use anchor::{Anchor, AnchorBody, EdgeData, NodeData, WalkerData, EDGES};
pub use archetype::{Archetype, ArchetypeRegistry, DynArchetype, GenericEdge, Root, UnknownArchetype};
pub use bulk_write::BulkWrite;
pub use context::{public_root_id, system_root_id, ContextResponse, GraphStore, JaseciContext};
pub use memory::Memory;
pub use reference::{AnchorKind, AnchorRef};
pub use schedule::{Schedule, ScheduleStatus, ScheduledWalker};
pub use state::{AnchorState, Changes};
