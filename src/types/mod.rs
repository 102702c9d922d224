//! Shared types for the store

mod error;

pub use error::{Result, StoreError};
