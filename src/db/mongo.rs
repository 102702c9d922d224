//! MongoDB client and collection access
//!
//! Implements [`DocumentStore`] over the official driver. One client is
//! created at process start and shared behind an `Arc`. Bulk writes go out
//! as a single client-level `bulkWrite` command, which needs MongoDB 8.0.

use async_trait::async_trait;
use bson::{doc, Document};
use mongodb::options::{
    DeleteManyModel, InsertOneModel, UpdateManyModel, UpdateOneModel, WriteModel,
};
use mongodb::{Client, ClientSession, IndexModel};
use std::any::Any;
use tracing::{debug, info};

use crate::db::store::{BulkWriteSummary, Collection, DocumentStore, IndexSpec, StoreSession, WriteOp};
use crate::types::{Result, StoreError};

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db_name: String,
}

impl MongoStore {
    /// Connect and verify the server answers a ping
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri).await?;
        let store = Self {
            client,
            db_name: db_name.to_string(),
        };
        store.ping().await?;

        info!("Connected to MongoDB database '{}'", db_name);
        Ok(store)
    }

    fn collection(&self, collection: Collection) -> mongodb::Collection<Document> {
        self.client
            .database(&self.db_name)
            .collection::<Document>(collection.name())
    }

    fn client_session<'a>(session: &'a mut dyn StoreSession) -> Result<&'a mut ClientSession> {
        session
            .as_any_mut()
            .downcast_mut::<MongoSession>()
            .map(|s| &mut s.inner)
            .ok_or_else(|| StoreError::Internal("Session does not belong to MongoDB".into()))
    }

    /// Driver write models for `ops`, all targeting `collection`
    fn write_models(&self, collection: Collection, ops: &[WriteOp]) -> Vec<WriteModel> {
        let namespace = self.collection(collection).namespace();
        ops.iter()
            .map(|op| match op {
                WriteOp::InsertOne { document } => InsertOneModel::builder()
                    .namespace(namespace.clone())
                    .document(document.clone())
                    .build()
                    .into(),
                WriteOp::UpdateOne { filter, update } => UpdateOneModel::builder()
                    .namespace(namespace.clone())
                    .filter(filter.clone())
                    .update(update.clone())
                    .build()
                    .into(),
                WriteOp::UpdateMany { filter, update } => UpdateManyModel::builder()
                    .namespace(namespace.clone())
                    .filter(filter.clone())
                    .update(update.clone())
                    .build()
                    .into(),
                WriteOp::DeleteMany { filter } => DeleteManyModel::builder()
                    .namespace(namespace.clone())
                    .filter(filter.clone())
                    .build()
                    .into(),
            })
            .collect()
    }
}

// =============================================================================
// Session
// =============================================================================

/// Driver session plus transaction bookkeeping
pub struct MongoSession {
    inner: ClientSession,
    active: bool,
}

#[async_trait]
impl StoreSession for MongoSession {
    async fn start_transaction(&mut self) -> Result<()> {
        self.inner.start_transaction().await?;
        self.active = true;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        // Stays active on failure so an unknown commit result can be retried
        self.inner.commit_transaction().await?;
        self.active = false;
        Ok(())
    }

    async fn abort_transaction(&mut self) -> Result<()> {
        self.active = false;
        self.inner.abort_transaction().await?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.active
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// =============================================================================
// Store
// =============================================================================

#[async_trait]
impl DocumentStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .database(&self.db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::database(format!("MongoDB ping failed: {}", e)))?;
        Ok(())
    }

    async fn start_session(&self) -> Result<Box<dyn StoreSession>> {
        let inner = self.client.start_session().await?;
        Ok(Box::new(MongoSession {
            inner,
            active: false,
        }))
    }

    async fn insert_one(
        &self,
        collection: Collection,
        document: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<()> {
        let coll = self.collection(collection);
        match session {
            Some(s) => coll.insert_one(document).session(Self::client_session(s)?).await?,
            None => coll.insert_one(document).await?,
        };
        Ok(())
    }

    async fn find(
        &self,
        collection: Collection,
        filter: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<Vec<Document>> {
        use futures_util::TryStreamExt;

        let coll = self.collection(collection);
        let docs = match session {
            Some(s) => {
                let s = Self::client_session(s)?;
                let mut cursor = coll.find(filter).session(&mut *s).await?;
                let mut docs = Vec::new();
                while let Some(doc) = cursor.next(&mut *s).await {
                    docs.push(doc?);
                }
                docs
            }
            None => coll.find(filter).await?.try_collect().await?,
        };

        debug!(collection = %collection, count = docs.len(), "MongoDB find");
        Ok(docs)
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<Option<Document>> {
        let coll = self.collection(collection);
        let found = match session {
            Some(s) => coll.find_one(filter).session(Self::client_session(s)?).await?,
            None => coll.find_one(filter).await?,
        };
        Ok(found)
    }

    async fn update_one(
        &self,
        collection: Collection,
        filter: Document,
        update: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<u64> {
        let coll = self.collection(collection);
        let result = match session {
            Some(s) => {
                coll.update_one(filter, update)
                    .session(Self::client_session(s)?)
                    .await?
            }
            None => coll.update_one(filter, update).await?,
        };
        Ok(result.modified_count)
    }

    async fn update_many(
        &self,
        collection: Collection,
        filter: Document,
        update: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<u64> {
        let coll = self.collection(collection);
        let result = match session {
            Some(s) => {
                coll.update_many(filter, update)
                    .session(Self::client_session(s)?)
                    .await?
            }
            None => coll.update_many(filter, update).await?,
        };
        Ok(result.modified_count)
    }

    async fn delete_many(
        &self,
        collection: Collection,
        filter: Document,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<u64> {
        let coll = self.collection(collection);
        let result = match session {
            Some(s) => coll.delete_many(filter).session(Self::client_session(s)?).await?,
            None => coll.delete_many(filter).await?,
        };
        Ok(result.deleted_count)
    }

    /// One server round trip for the whole batch
    async fn bulk_write(
        &self,
        collection: Collection,
        ops: &[WriteOp],
        ordered: bool,
        session: Option<&mut dyn StoreSession>,
    ) -> Result<BulkWriteSummary> {
        if ops.is_empty() {
            return Ok(BulkWriteSummary::default());
        }

        let models = self.write_models(collection, ops);
        let action = self.client.bulk_write(models).ordered(ordered);
        let result = match session {
            Some(s) => action.session(Self::client_session(s)?).await?,
            None => action.await?,
        };

        let summary = BulkWriteSummary {
            inserted: u64::try_from(result.inserted_count).unwrap_or_default(),
            modified: u64::try_from(result.modified_count).unwrap_or_default(),
            deleted: u64::try_from(result.deleted_count).unwrap_or_default(),
        };
        debug!(
            collection = %collection,
            operations = ops.len(),
            inserted = summary.inserted,
            modified = summary.modified,
            deleted = summary.deleted,
            "MongoDB bulk write"
        );
        Ok(summary)
    }

    async fn create_indexes(&self, collection: Collection, indexes: &[IndexSpec]) -> Result<()> {
        if indexes.is_empty() {
            return Ok(());
        }

        let models: Vec<IndexModel> = indexes
            .iter()
            .map(|index| IndexModel::builder().keys(index.keys.clone()).build())
            .collect();

        self.collection(collection)
            .create_indexes(models)
            .await
            .map_err(|e| StoreError::database(format!("Failed to create indexes: {}", e)))?;

        info!(collection = %collection, count = indexes.len(), "Indexes applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;

    // Round trips against a server would require a running MongoDB instance

    #[tokio::test]
    async fn test_write_models_target_collection() {
        // Client creation is lazy, no server is contacted
        let client = Client::with_uri_str("mongodb://localhost:27017").await.unwrap();
        let store = MongoStore {
            client,
            db_name: "jaseci".to_string(),
        };

        let id = ObjectId::new();
        let ops = vec![
            WriteOp::InsertOne { document: doc! { "_id": id } },
            WriteOp::UpdateOne {
                filter: doc! { "_id": id },
                update: doc! { "$set": { "archetype.val": 1 } },
            },
            WriteOp::UpdateMany {
                filter: doc! { "_id": { "$in": [id] } },
                update: doc! { "$pull": { "edges": { "$in": ["e::65a1b2c3d4e5f60718293a4b"] } } },
            },
            WriteOp::DeleteMany { filter: doc! { "_id": { "$in": [id] } } },
        ];

        let models = store.write_models(Collection::Edge, &ops);
        assert_eq!(models.len(), 4);
        match &models[0] {
            WriteModel::InsertOne(model) => {
                assert_eq!(model.namespace.db, "jaseci");
                assert_eq!(model.namespace.coll, "edge");
                assert_eq!(model.document, doc! { "_id": id });
            }
            other => panic!("unexpected model {:?}", other),
        }
        match &models[1] {
            WriteModel::UpdateOne(model) => assert_eq!(model.filter, doc! { "_id": id }),
            other => panic!("unexpected model {:?}", other),
        }
        assert!(matches!(&models[2], WriteModel::UpdateMany(model) if model.namespace.coll == "edge"));
        match &models[3] {
            WriteModel::DeleteMany(model) => assert_eq!(model.filter, doc! { "_id": { "$in": [id] } }),
            other => panic!("unexpected model {:?}", other),
        }
    }
}
