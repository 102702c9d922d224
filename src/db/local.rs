//! Embedded in-process document store
//!
//! Fallback used when no MongoDB URI is configured, and the store every unit
//! test runs against. Writes issued inside a transaction are buffered on the
//! session and applied atomically at commit.

use async_trait::async_trait;
use bson::{Bson, Document};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::db::filter::{apply_update, matches};
use crate::db::store::{Collection, DocumentStore, IndexSpec, StoreSession, WriteOp};
use crate::types::{Result, StoreError};

#[derive(Debug, Default, Clone)]
struct LocalState {
    collections: HashMap<Collection, Vec<Document>>,
}

impl LocalState {
    fn docs(&self, collection: Collection) -> &[Document] {
        self.collections
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn apply(&mut self, collection: Collection, op: &WriteOp) -> Result<u64> {
        let docs = self.collections.entry(collection).or_default();
        match op {
            WriteOp::InsertOne { document } => {
                let id = document.get("_id").cloned().unwrap_or(Bson::Null);
                if id != Bson::Null && docs.iter().any(|d| d.get("_id") == Some(&id)) {
                    return Err(StoreError::database(format!(
                        "E11000 duplicate key error collection: {} _id: {}",
                        collection, id
                    )));
                }
                docs.push(document.clone());
                Ok(1)
            }
            WriteOp::UpdateOne { filter, update } => {
                match docs.iter_mut().find(|d| matches(d, filter)) {
                    Some(doc) => Ok(u64::from(apply_update(doc, update)?)),
                    None => Ok(0),
                }
            }
            WriteOp::UpdateMany { filter, update } => {
                let mut modified = 0;
                for doc in docs.iter_mut().filter(|d| matches(d, filter)) {
                    modified += u64::from(apply_update(doc, update)?);
                }
                Ok(modified)
            }
            WriteOp::DeleteMany { filter } => {
                let before = docs.len();
                docs.retain(|d| !matches(d, filter));
                Ok((before - docs.len()) as u64)
            }
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Session over a [`LocalStore`]
pub struct LocalSession {
    state: Arc<RwLock<LocalState>>,
    pending: Option<Vec<(Collection, WriteOp)>>,
}

#[async_trait]
impl StoreSession for LocalSession {
    async fn start_transaction(&mut self) -> Result<()> {
        if self.pending.is_some() {
            return Err(StoreError::database("Transaction already in progress"));
        }
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Err(StoreError::database("No transaction started"));
        };

        let mut state = self.state.write().await;
        let snapshot = state.clone();
        for (collection, op) in &pending {
            if let Err(e) = state.apply(*collection, op) {
                *state = snapshot;
                return Err(e);
            }
        }

        debug!(writes = pending.len(), "Local transaction committed");
        Ok(())
    }

    async fn abort_transaction(&mut self) -> Result<()> {
        match self.pending.take() {
            Some(pending) => {
                debug!(writes = pending.len(), "Local transaction aborted");
                Ok(())
            }
            None => Err(StoreError::database("No transaction started")),
        }
    }

    fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// =============================================================================
// Store
// =============================================================================

/// In-process document store with four anchor collections
#[derive(Clone, Default)]
pub struct LocalStore {
    state: Arc<RwLock<LocalState>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed document count of a collection
    pub async fn count(&self, collection: Collection) -> usize {
        self.state.read().await.docs(collection).len()
    }

    fn local_session<'a>(session: &'a mut dyn StoreSession) -> Result<&'a mut LocalSession> {
        session
            .as_any_mut()
            .downcast_mut::<LocalSession>()
            .ok_or_else(|| StoreError::Internal("Session does not belong to the local store".into()))
    }

    /// Buffer the write when a transaction is open, else apply it now
    async fn write(
        &self,
        collection: Collection,
        op: WriteOp,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<u64> {
        if let Some(session) = session {
            let session = Self::local_session(session)?;
            if let Some(pending) = session.pending.as_mut() {
                // The count is exact against the committed state plus earlier buffered writes
                let mut view = self.state.read().await.clone();
                for (c, earlier) in pending.iter() {
                    view.apply(*c, earlier)?;
                }
                let affected = view.apply(collection, &op)?;
                pending.push((collection, op));
                return Ok(affected);
            }
        }

        self.state.write().await.apply(collection, &op)
    }

    /// Documents of a collection as seen by the session
    async fn view(
        &self,
        collection: Collection,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<Vec<Document>> {
        let committed = self.state.read().await.docs(collection).to_vec();
        let Some(session) = session else {
            return Ok(committed);
        };
        let session = Self::local_session(session)?;
        let Some(pending) = session.pending.as_ref() else {
            return Ok(committed);
        };

        let mut view = LocalState::default();
        view.collections.insert(collection, committed);
        for (c, op) in pending.iter().filter(|(c, _)| *c == collection) {
            view.apply(*c, op)?;
        }
        Ok(view.docs(collection).to_vec())
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn start_session(&self) -> Result<Box<dyn StoreSession>> {
        Ok(Box::new(LocalSession {
            state: self.state.clone(),
            pending: None,
        }))
    }

    async fn insert_one(
        &self,
        collection: Collection,
        document: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<()> {
        self.write(collection, WriteOp::InsertOne { document }, session)
            .await
            .map(|_| ())
    }

    async fn find(
        &self,
        collection: Collection,
        filter: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<Vec<Document>> {
        Ok(self
            .view(collection, session)
            .await?
            .into_iter()
            .filter(|d| matches(d, &filter))
            .collect())
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<Option<Document>> {
        Ok(self
            .view(collection, session)
            .await?
            .into_iter()
            .find(|d| matches(d, &filter)))
    }

    async fn update_one(
        &self,
        collection: Collection,
        filter: Document,
        update: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<u64> {
        self.write(collection, WriteOp::UpdateOne { filter, update }, session)
            .await
    }

    async fn update_many(
        &self,
        collection: Collection,
        filter: Document,
        update: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<u64> {
        self.write(collection, WriteOp::UpdateMany { filter, update }, session)
            .await
    }

    async fn delete_many(
        &self,
        collection: Collection,
        filter: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<u64> {
        self.write(collection, WriteOp::DeleteMany { filter }, session)
            .await
    }

    async fn create_indexes(&self, collection: Collection, indexes: &[IndexSpec]) -> Result<()> {
        debug!(collection = %collection, count = indexes.len(), "Local store ignores indexes");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = LocalStore::new();
        let id = ObjectId::new();
        store
            .insert_one(Collection::Node, doc! { "_id": id, "name": "A" }, None)
            .await
            .unwrap();

        let found = store
            .find_one(Collection::Node, doc! { "_id": id }, None)
            .await
            .unwrap();
        assert_eq!(found.unwrap().get_str("name").unwrap(), "A");
        assert_eq!(store.count(Collection::Edge).await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = LocalStore::new();
        let id = ObjectId::new();
        store.insert_one(Collection::Node, doc! { "_id": id }, None).await.unwrap();
        tokio_test::assert_err!(store.insert_one(Collection::Node, doc! { "_id": id }, None).await);
    }

    #[tokio::test]
    async fn test_transaction_buffers_until_commit() {
        let store = LocalStore::new();
        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();

        let id = ObjectId::new();
        store
            .insert_one(Collection::Node, doc! { "_id": id }, Some(session.as_mut()))
            .await
            .unwrap();

        // Visible inside the session, invisible outside
        let inside = store
            .find(Collection::Node, doc! {}, Some(session.as_mut()))
            .await
            .unwrap();
        assert_eq!(inside.len(), 1);
        assert_eq!(store.count(Collection::Node).await, 0);

        session.commit_transaction().await.unwrap();
        assert_eq!(store.count(Collection::Node).await, 1);
    }

    #[tokio::test]
    async fn test_abort_discards_writes() {
        let store = LocalStore::new();
        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        store
            .insert_one(Collection::Walker, doc! { "_id": ObjectId::new() }, Some(session.as_mut()))
            .await
            .unwrap();
        session.abort_transaction().await.unwrap();

        assert!(!session.in_transaction());
        assert_eq!(store.count(Collection::Walker).await, 0);
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back() {
        let store = LocalStore::new();
        let id = ObjectId::new();
        store.insert_one(Collection::Node, doc! { "_id": id }, None).await.unwrap();

        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        store
            .insert_one(Collection::Node, doc! { "_id": ObjectId::new() }, Some(session.as_mut()))
            .await
            .unwrap();

        // A concurrent writer takes the id this transaction will insert last
        let late = ObjectId::new();
        store
            .insert_one(Collection::Node, doc! { "_id": late }, Some(session.as_mut()))
            .await
            .unwrap();
        store.insert_one(Collection::Node, doc! { "_id": late }, None).await.unwrap();

        assert!(session.commit_transaction().await.is_err());
        assert_eq!(store.count(Collection::Node).await, 2);
    }

    #[tokio::test]
    async fn test_unordered_bulk_write_continues_after_failure() {
        let store = LocalStore::new();
        let id = ObjectId::new();
        let ops = vec![
            WriteOp::InsertOne { document: doc! { "_id": id } },
            WriteOp::InsertOne { document: doc! { "_id": id } },
            WriteOp::InsertOne { document: doc! { "_id": ObjectId::new() } },
        ];

        let result = store.bulk_write(Collection::Object, &ops, false, None).await;
        assert!(result.is_err());
        assert_eq!(store.count(Collection::Object).await, 2);

        let ordered = LocalStore::new();
        let result = ordered.bulk_write(Collection::Object, &ops, true, None).await;
        assert!(result.is_err());
        assert_eq!(ordered.count(Collection::Object).await, 1);
    }

    #[tokio::test]
    async fn test_bulk_write_inside_session() {
        let store = LocalStore::new();
        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();

        let id = ObjectId::new();
        let ops = vec![
            WriteOp::InsertOne { document: doc! { "_id": id, "v": 1 } },
            WriteOp::UpdateOne { filter: doc! { "_id": id }, update: doc! { "$set": { "v": 2 } } },
        ];
        let summary = store
            .bulk_write(Collection::Edge, &ops, false, Some(session.as_mut()))
            .await
            .unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.modified, 1);
        assert_eq!(store.count(Collection::Edge).await, 0);

        session.commit_transaction().await.unwrap();
        let stored = store.find_one(Collection::Edge, doc! { "_id": id }, None).await.unwrap().unwrap();
        assert_eq!(stored.get_i32("v").unwrap(), 2);
    }
}
