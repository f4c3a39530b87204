//! Schema handle and fluent query builder
//!
//! A [`Schema`] binds one collection's definition to the store it lives in.
//! Construction is synchronous and performs no I/O; the collection is brought
//! in line with the definition by an explicit [`Schema::provision`] call.
//!
//! Queries are built by mutating the schema's own query state and run on
//! [`Schema::exec`], which always leaves the builder idle again, whatever the
//! outcome.
//!
//! ```no_run
//! # async fn demo(store: std::sync::Arc<quarry_mongodb::MongoStore>) -> quarry_mongodb::Result<()> {
//! use bson::doc;
//! use quarry_mongodb::{FieldDescriptor, FieldSet, Schema, SchemaOptions};
//!
//! let fields = FieldSet::new()
//!     .field("title", FieldDescriptor::string().required())
//!     .field("user", FieldDescriptor::reference("user"));
//! let mut posts = Schema::new(store, "post", fields, SchemaOptions::with_timestamps())?;
//! posts.provision().await?;
//!
//! let recent = posts
//!     .find(doc! {})
//!     .sort(doc! { "createdAt": -1 })
//!     .limit(10)
//!     .populate("user")
//!     .exec()
//!     .await?
//!     .into_many();
//! # let _ = recent;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use bson::{doc, Document as BsonDocument};
use quarry_common::Result;
use tracing::instrument;

use crate::config::{SchemaOptions, ValidationLevel};
use crate::field::{FieldDescriptor, FieldSet};
use crate::provision::{pluralize, provision, ProvisionOutcome};
use crate::query::{QueryMode, QueryResult, QueryState};
use crate::store::DocumentStore;
use crate::validation::{require_identifier, ValidatedCollectionName};

/// Field stamped when a document is created
pub const CREATED_AT: &str = "createdAt";
/// Field stamped on creation and on every update
pub const UPDATED_AT: &str = "updatedAt";

/// Immutable description of one collection
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDefinition {
    collection_name: String,
    fields: FieldSet,
    timestamps: bool,
    validation_level: ValidationLevel,
}

impl SchemaDefinition {
    /// Validates and pluralizes `name`; with timestamps enabled, declares
    /// `createdAt` and `updatedAt` as optional date fields.
    pub fn new(name: &str, mut fields: FieldSet, options: SchemaOptions) -> Result<Self> {
        let name = ValidatedCollectionName::new(name)?;
        if options.timestamps {
            fields.insert(CREATED_AT, FieldDescriptor::date());
            fields.insert(UPDATED_AT, FieldDescriptor::date());
        }
        Ok(Self {
            collection_name: pluralize(name.as_str()),
            fields,
            timestamps: options.timestamps,
            validation_level: options.validation_level,
        })
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    pub fn timestamps_enabled(&self) -> bool {
        self.timestamps
    }

    pub fn validation_level(&self) -> ValidationLevel {
        self.validation_level
    }
}

/// One collection's definition bound to a store, with its query builder
pub struct Schema {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) definition: SchemaDefinition,
    query: QueryState,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("database", &self.store.database_name())
            .field("definition", &self.definition)
            .field("query", &self.query)
            .finish()
    }
}

impl Schema {
    /// Builds a schema for collection `name` (pluralized) in `store`
    pub fn new(
        store: Arc<dyn DocumentStore>,
        name: &str,
        fields: FieldSet,
        options: SchemaOptions,
    ) -> Result<Self> {
        Ok(Self::from_definition(
            store,
            SchemaDefinition::new(name, fields, options)?,
        ))
    }

    pub fn from_definition(store: Arc<dyn DocumentStore>, definition: SchemaDefinition) -> Self {
        Self {
            store,
            definition,
            query: QueryState::default(),
        }
    }

    pub fn definition(&self) -> &SchemaDefinition {
        &self.definition
    }

    pub fn collection_name(&self) -> &str {
        self.definition.collection_name()
    }

    pub fn fields(&self) -> &FieldSet {
        self.definition.fields()
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Pending query intent; idle between queries
    pub fn query_state(&self) -> &QueryState {
        &self.query
    }

    /// Creates or updates the collection's validator and unique indexes.
    ///
    /// Safe to call repeatedly.
    pub async fn provision(&self) -> Result<ProvisionOutcome> {
        provision(
            self.store.as_ref(),
            self.definition.collection_name(),
            self.definition.fields(),
            self.definition.validation_level(),
        )
        .await
    }

    // =====================
    // Query builder
    // =====================

    /// Starts a many-document query. An empty filter matches everything.
    pub fn find(&mut self, filter: BsonDocument) -> &mut Self {
        self.query.begin(QueryMode::Many, filter);
        self
    }

    /// Starts a query matching every document
    pub fn find_all(&mut self) -> &mut Self {
        self.find(doc! {})
    }

    /// Starts a single-document query. The filter must not be empty.
    pub fn find_one(&mut self, filter: BsonDocument) -> &mut Self {
        self.query.begin(QueryMode::Single, filter);
        self
    }

    /// Starts a single-document query on `_id`.
    ///
    /// Fails at once if `id` is empty or malformed, leaving the builder idle.
    pub fn find_one_by_id(&mut self, id: &str) -> Result<&mut Self> {
        match require_identifier(id) {
            Ok(oid) => {
                self.query.begin(QueryMode::Single, doc! { "_id": oid });
                Ok(self)
            }
            Err(e) => {
                self.query = QueryState::default();
                Err(e)
            }
        }
    }

    /// Sort order for a many-document query
    pub fn sort(&mut self, spec: BsonDocument) -> &mut Self {
        self.query.set_sort(spec);
        self
    }

    /// Maximum number of documents for a many-document query; zero or a
    /// negative value means no limit
    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.query.set_limit(limit);
        self
    }

    /// Joins the documents referenced by `field`
    pub fn populate(&mut self, field: &str) -> &mut Self {
        self.query.add_populate(field, None);
        self
    }

    /// Joins the documents referenced by `field`, keeping only the projected
    /// fields (`{ name: 1 }`) or dropping them (`{ password: 0 }`)
    pub fn populate_with(&mut self, field: &str, projection: BsonDocument) -> &mut Self {
        self.query.add_populate(field, Some(projection));
        self
    }

    /// Runs the accumulated query.
    ///
    /// The builder is idle again when this returns, on success or failure.
    #[instrument(skip(self), fields(collection = %self.definition.collection_name))]
    pub async fn exec(&mut self) -> Result<QueryResult> {
        let state = std::mem::take(&mut self.query);
        state
            .execute(
                self.store.as_ref(),
                self.definition.collection_name(),
                self.definition.fields(),
            )
            .await
    }
}
