//! Jaseci graph store - object-graph persistence engine
//!
//! Persists Jaseci object graphs (nodes, edges, walkers and objects) into a
//! document store with per-field diffing, per-root access control and
//! retried multi-document transactions.
//!
//! ## Layers
//!
//! - **graph**: anchors, the request-scoped memory cache, flush and context
//! - **db**: document store collaborator, MongoDB and embedded local backends
//! - **queue**: destinations for newly pending walker schedules
//! - **config**: CLI / environment configuration

pub mod config;
pub mod db;
pub mod graph;
pub mod queue;
pub mod types;

pub use config::{Args, StoreConfig};
pub use graph::{GraphStore, JaseciContext, Memory};
pub use types::{Result, StoreError};
