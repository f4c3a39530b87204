//! Write operations and the timestamp policy
//!
//! Every input is validated before the store is called. With timestamps
//! enabled, inserts stamp `createdAt` and `updatedAt` with the same instant.
//! Updates always stamp `updatedAt`, whether or not the schema uses timestamps.
//!
//! Updates are sent as a single `$set` pipeline stage. Patch values are wrapped
//! in `$literal`, and `updatedAt` is computed by the server as the later of
//! now and one millisecond past the stored value, so it strictly increases even
//! when two writes land in the same millisecond.

use bson::{doc, Bson, DateTime, Document as BsonDocument};
use quarry_common::{QuarryError, Result};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use crate::schema::{Schema, CREATED_AT, UPDATED_AT};
use crate::store::{DeleteAck, InsertManyAck, UpdateAck};
use crate::validation::{
    normalize_id_filter, require_identifier, validate_array_document, validate_document,
    validate_document_value, validate_field_types, validate_patch_field_names,
    validate_query_document,
};

/// Current time at the store's millisecond precision
fn now() -> DateTime {
    DateTime::from_chrono(chrono::Utc::now())
}

fn stamp_created(doc: &mut BsonDocument, at: DateTime) {
    doc.insert(CREATED_AT, at);
    doc.insert(UPDATED_AT, at);
}

/// Server-side expression for the next `updatedAt`: `at`, or one millisecond
/// past the stored date when that is later.
fn advanced_updated_at(at: DateTime) -> Bson {
    let stored = format!("${}", UPDATED_AT);
    Bson::Document(doc! {
        "$cond": {
            "if": { "$eq": [{ "$type": stored.as_str() }, "date"] },
            "then": { "$max": [at, { "$add": [stored.as_str(), 1] }] },
            "else": at,
        }
    })
}

/// Places `value` at the dotted `path` of a `$set` stage as a `$literal`.
///
/// Dotted paths become nested documents, which the stage merges into the
/// stored embedded document. Returns `false` when the path collides with a
/// field already placed.
fn set_literal(stage: &mut BsonDocument, path: &str, value: Bson) -> bool {
    match path.split_once('.') {
        None => {
            if stage.contains_key(path) {
                return false;
            }
            stage.insert(path, doc! { "$literal": value });
            true
        }
        Some((head, rest)) => {
            let entry = stage
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(BsonDocument::new()));
            match entry {
                Bson::Document(inner) if !inner.contains_key("$literal") => {
                    set_literal(inner, rest, value)
                }
                _ => false,
            }
        }
    }
}

/// Update pipeline applying `patch` and advancing `updatedAt` from `at`
fn update_pipeline(patch: BsonDocument, at: DateTime) -> Result<Vec<BsonDocument>> {
    let mut stage = BsonDocument::new();
    for (key, value) in patch {
        if key == UPDATED_AT {
            continue;
        }
        if key.split('.').any(str::is_empty) {
            return Err(QuarryError::InvalidDocument(format!(
                "patch field '{}' has an empty path segment",
                key
            )));
        }
        if !set_literal(&mut stage, &key, value) {
            return Err(QuarryError::InvalidDocument(format!(
                "patch field '{}' conflicts with another field",
                key
            )));
        }
    }
    stage.insert(UPDATED_AT, advanced_updated_at(at));
    Ok(vec![doc! { "$set": stage }])
}

/// Validated, `_id`-normalized copy of a mutation filter
fn prepare_filter(mut filter: BsonDocument) -> Result<BsonDocument> {
    validate_query_document(&filter)?;
    normalize_id_filter(&mut filter)?;
    Ok(filter)
}

impl Schema {
    fn prepare_insert(&self, mut doc: BsonDocument, at: DateTime) -> Result<BsonDocument> {
        validate_document(&doc)?;
        validate_field_types(self.fields(), &doc)?;
        if self.definition.timestamps_enabled() {
            stamp_created(&mut doc, at);
        }
        Ok(doc)
    }

    fn prepare_update(&self, patch: BsonDocument) -> Result<Vec<BsonDocument>> {
        validate_document(&patch)?;
        validate_patch_field_names(&patch)?;
        validate_field_types(self.fields(), &patch)?;
        update_pipeline(patch, now())
    }

    /// Inserts `doc` and returns the acknowledgment merged with the stored
    /// document: `{ acknowledged, insertedId, _id, ... }`.
    #[instrument(skip(self, doc), fields(collection = %self.definition.collection_name()))]
    pub async fn create(&self, doc: BsonDocument) -> Result<BsonDocument> {
        let doc = self.prepare_insert(doc, now())?;
        let collection = self.collection_name();

        let ack = self.store.insert_one(collection, doc).await?;
        let stored = self
            .store
            .find_one(collection, doc! { "_id": ack.inserted_id.clone() })
            .await?
            .ok_or_else(|| {
                QuarryError::Operation(format!(
                    "inserted document {} could not be read back",
                    ack.inserted_id
                ))
            })?;

        info!(inserted_id = %ack.inserted_id, "Document created");
        let mut result = ack.to_document()?;
        result.extend(stored);
        Ok(result)
    }

    /// Like [`Schema::create`], for a document given as JSON
    pub async fn create_json(&self, value: &JsonValue) -> Result<BsonDocument> {
        let value = bson::to_bson(value)?;
        let doc = validate_document_value(&value)?.clone();
        self.create(doc).await
    }

    /// Inserts every document of `docs` in one batch
    #[instrument(skip(self, docs), fields(collection = %self.definition.collection_name(), count = docs.len()))]
    pub async fn create_many(&self, docs: Vec<BsonDocument>) -> Result<InsertManyAck> {
        validate_array_document(&docs)?;
        let at = now();
        let docs = docs
            .into_iter()
            .map(|doc| self.prepare_insert(doc, at))
            .collect::<Result<Vec<_>>>()?;

        let ack = self.store.insert_many(self.collection_name(), docs).await?;
        info!(inserted = ack.inserted_count, "Documents created");
        Ok(ack)
    }

    /// Applies `patch` to the first document matching `filter`.
    ///
    /// Returns the document after the update, or `None` when nothing matched.
    #[instrument(skip(self, filter, patch), fields(collection = %self.definition.collection_name()))]
    pub async fn update_one(
        &self,
        filter: BsonDocument,
        patch: BsonDocument,
    ) -> Result<Option<BsonDocument>> {
        let filter = prepare_filter(filter)?;
        let update = self.prepare_update(patch)?;
        let updated = self
            .store
            .find_one_and_update(self.collection_name(), filter, update)
            .await?;
        info!(matched = updated.is_some(), "Document updated");
        Ok(updated)
    }

    /// Applies `patch` to the document with identifier `id`
    pub async fn update_one_by_id(
        &self,
        id: &str,
        patch: BsonDocument,
    ) -> Result<Option<BsonDocument>> {
        let oid = require_identifier(id)?;
        self.update_one(doc! { "_id": oid }, patch).await
    }

    /// Applies `patch` to every document matching `filter`
    #[instrument(skip(self, filter, patch), fields(collection = %self.definition.collection_name()))]
    pub async fn update_multiple(
        &self,
        filter: BsonDocument,
        patch: BsonDocument,
    ) -> Result<UpdateAck> {
        let filter = prepare_filter(filter)?;
        let update = self.prepare_update(patch)?;
        let ack = self
            .store
            .update_many(self.collection_name(), filter, update)
            .await?;
        info!(matched = ack.matched_count, modified = ack.modified_count, "Documents updated");
        Ok(ack)
    }

    /// Deletes the first document matching `filter`
    #[instrument(skip(self, filter), fields(collection = %self.definition.collection_name()))]
    pub async fn remove_one(&self, filter: BsonDocument) -> Result<DeleteAck> {
        let filter = prepare_filter(filter)?;
        let ack = self.store.delete_one(self.collection_name(), filter).await?;
        info!(deleted = ack.deleted_count, "Document removed");
        Ok(ack)
    }

    /// Deletes the document with identifier `id`
    pub async fn remove_one_by_id(&self, id: &str) -> Result<DeleteAck> {
        let oid = require_identifier(id)?;
        self.remove_one(doc! { "_id": oid }).await
    }

    /// Deletes every document matching `filter`
    #[instrument(skip(self, filter), fields(collection = %self.definition.collection_name()))]
    pub async fn remove_many(&self, filter: BsonDocument) -> Result<DeleteAck> {
        let filter = prepare_filter(filter)?;
        let ack = self.store.delete_many(self.collection_name(), filter).await?;
        info!(deleted = ack.deleted_count, "Documents removed");
        Ok(ack)
    }
}

/// Identifier of a document returned by [`Schema::create`]
pub fn inserted_id(created: &BsonDocument) -> Option<&Bson> {
    created.get("insertedId").or_else(|| created.get("_id"))
}
