//! Document store layer
//!
//! The graph core talks to storage only through [`DocumentStore`].

pub mod filter;
pub mod local;
pub mod mongo;
pub mod store;

pub use local::{LocalSession, LocalStore};
pub use mongo::{MongoSession, MongoStore};
pub use store::{
    BulkWriteSummary, Collection, DocumentStore, IndexSpec, StoreSession, WriteOp,
    TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT,
};
