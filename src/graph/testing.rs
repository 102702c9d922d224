//! Archetypes and helpers shared by the graph tests

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::db::LocalStore;
use crate::graph::archetype::{Archetype, ArchetypeRegistry};
use crate::graph::context::GraphStore;
use crate::graph::reference::AnchorKind;
use crate::queue::MemoryScheduleQueue;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub val: i64,
}

impl Archetype for Person {
    const KIND: AnchorKind = AnchorKind::Node;
    const NAME: &'static str = "Person";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Likes {
    pub weight: i32,
}

impl Archetype for Likes {
    const KIND: AnchorKind = AnchorKind::Edge;
    const NAME: &'static str = "Likes";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub task: String,
}

impl Archetype for Job {
    const KIND: AnchorKind = AnchorKind::Walker;
    const NAME: &'static str = "Job";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
}

impl Archetype for Note {
    const KIND: AnchorKind = AnchorKind::Object;
    const NAME: &'static str = "Note";
}

pub fn registry() -> ArchetypeRegistry {
    ArchetypeRegistry::new()
        .with::<Person>()
        .with::<Likes>()
        .with::<Job>()
        .with::<Note>()
}

/// Graph store over a fresh local store, with handles to inspect both sides
pub fn graph_store(config: StoreConfig) -> (GraphStore, LocalStore, Arc<MemoryScheduleQueue>) {
    let local = LocalStore::new();
    let queue = Arc::new(MemoryScheduleQueue::new());
    let graph = GraphStore::new(Arc::new(local.clone()), Arc::new(registry()), queue.clone(), config);
    (graph, local, queue)
}
