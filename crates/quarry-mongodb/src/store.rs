//! Driver seam for schema operations
//!
//! [`DocumentStore`] is the slice of the MongoDB driver the engine consumes,
//! scoped to one database. [`MongoStore`] implements it over the official
//! driver; tests substitute an in-memory store.

use async_trait::async_trait;
use bson::{doc, Bson, Document as BsonDocument};
use futures::TryStreamExt;
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};
use quarry_common::Result;
use serde::Serialize;

/// Read options for a direct (non-aggregate) find
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    pub sort: Option<BsonDocument>,
    pub limit: Option<i64>,
}

/// Acknowledgment of a single insert
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOneAck {
    pub acknowledged: bool,
    pub inserted_id: Bson,
}

/// Acknowledgment of a bulk insert
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertManyAck {
    pub acknowledged: bool,
    pub inserted_count: u64,
    /// Generated identifiers in input order
    pub inserted_ids: Vec<Bson>,
}

/// Acknowledgment of an update
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAck {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
}

/// Acknowledgment of a delete
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAck {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

macro_rules! impl_to_document {
    ($($ack:ty),*) => {
        $(
            impl $ack {
                /// The acknowledgment as a BSON document
                pub fn to_document(&self) -> Result<BsonDocument> {
                    Ok(bson::to_document(self)?)
                }
            }
        )*
    };
}

impl_to_document!(InsertOneAck, InsertManyAck, UpdateAck, DeleteAck);

/// Database operations consumed by schemas, scoped to one database
///
/// Implementations report driver failures as `QuarryError::Operation`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the database this store is bound to
    fn database_name(&self) -> &str;

    async fn list_collection_names(&self) -> Result<Vec<String>>;

    async fn create_collection(&self, name: &str) -> Result<()>;

    /// Runs a database command such as `collMod`
    async fn run_command(&self, command: BsonDocument) -> Result<BsonDocument>;

    /// Creates an index on `keys`; re-creating an identical index is a no-op
    async fn create_index(&self, collection: &str, keys: BsonDocument, unique: bool) -> Result<()>;

    async fn insert_one(&self, collection: &str, doc: BsonDocument) -> Result<InsertOneAck>;

    async fn insert_many(&self, collection: &str, docs: Vec<BsonDocument>) -> Result<InsertManyAck>;

    async fn find(
        &self,
        collection: &str,
        filter: BsonDocument,
        spec: FindSpec,
    ) -> Result<Vec<BsonDocument>>;

    async fn find_one(&self, collection: &str, filter: BsonDocument) -> Result<Option<BsonDocument>>;

    /// Applies the `update` pipeline to the first match and returns the
    /// document after the update
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: Vec<BsonDocument>,
    ) -> Result<Option<BsonDocument>>;

    /// Applies the `update` pipeline to every match
    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: Vec<BsonDocument>,
    ) -> Result<UpdateAck>;

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> Result<DeleteAck>;

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> Result<DeleteAck>;

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<BsonDocument>,
    ) -> Result<Vec<BsonDocument>>;
}

/// [`DocumentStore`] backed by a MongoDB database handle
#[derive(Debug, Clone)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection(name)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn database_name(&self) -> &str {
        self.database.name()
    }

    async fn list_collection_names(&self) -> Result<Vec<String>> {
        Ok(self.database.list_collection_names().await?)
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        self.database.create_collection(name).await?;
        Ok(())
    }

    async fn run_command(&self, command: BsonDocument) -> Result<BsonDocument> {
        Ok(self.database.run_command(command).await?)
    }

    async fn create_index(&self, collection: &str, keys: BsonDocument, unique: bool) -> Result<()> {
        let model = IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().unique(unique).build())
            .build();
        self.collection(collection).create_index(model).await?;
        Ok(())
    }

    async fn insert_one(&self, collection: &str, doc: BsonDocument) -> Result<InsertOneAck> {
        let result = self.collection(collection).insert_one(doc).await?;
        Ok(InsertOneAck {
            acknowledged: true,
            inserted_id: result.inserted_id,
        })
    }

    async fn insert_many(&self, collection: &str, docs: Vec<BsonDocument>) -> Result<InsertManyAck> {
        let result = self.collection(collection).insert_many(docs).await?;
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(InsertManyAck {
            acknowledged: true,
            inserted_count: ids.len() as u64,
            inserted_ids: ids.into_iter().map(|(_, id)| id).collect(),
        })
    }

    async fn find(
        &self,
        collection: &str,
        filter: BsonDocument,
        spec: FindSpec,
    ) -> Result<Vec<BsonDocument>> {
        let coll = self.collection(collection);
        let mut action = coll.find(filter);
        if let Some(sort) = spec.sort {
            action = action.sort(sort);
        }
        if let Some(limit) = spec.limit {
            action = action.limit(limit);
        }
        let cursor = action.await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_one(&self, collection: &str, filter: BsonDocument) -> Result<Option<BsonDocument>> {
        Ok(self.collection(collection).find_one(filter).await?)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: Vec<BsonDocument>,
    ) -> Result<Option<BsonDocument>> {
        Ok(self
            .collection(collection)
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: Vec<BsonDocument>,
    ) -> Result<UpdateAck> {
        let result = self.collection(collection).update_many(filter, update).await?;
        Ok(UpdateAck {
            acknowledged: true,
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        })
    }

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> Result<DeleteAck> {
        let result = self.collection(collection).delete_one(filter).await?;
        Ok(DeleteAck {
            acknowledged: true,
            deleted_count: result.deleted_count,
        })
    }

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> Result<DeleteAck> {
        let result = self.collection(collection).delete_many(filter).await?;
        Ok(DeleteAck {
            acknowledged: true,
            deleted_count: result.deleted_count,
        })
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<BsonDocument>,
    ) -> Result<Vec<BsonDocument>> {
        let cursor = self.collection(collection).aggregate(pipeline).await?;
        Ok(cursor.try_collect().await?)
    }
}

/// Sort spec `{ field: 1 }` used for single-field ascending indexes
pub fn ascending_index_keys(field: &str) -> BsonDocument {
    doc! { field: 1 }
}
