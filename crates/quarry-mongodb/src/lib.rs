//! Schema-driven document mapping for MongoDB
//!
//! Declare a collection's shape once as a [`FieldSet`], then get validated
//! CRUD, deferred chainable queries and reference population on top of it.
//!
//! # Features
//! - Field sets translated into `$jsonSchema` collection validators
//! - Idempotent collection provisioning with unique indexes
//! - Fluent query builder with explicit `exec`
//! - `$lookup` population of reference fields
//! - Optional `createdAt`/`updatedAt` stamping
//! - Storage behind the [`DocumentStore`] trait

pub mod config;
pub mod connection;
pub mod crud;
pub mod field;
pub mod populate;
pub mod provision;
pub mod query;
pub mod schema;
pub mod store;
pub mod translate;
pub mod validation;

pub use config::{SchemaOptions, ValidationLevel};
pub use connection::{Connection, PoolConfig};
pub use field::{FieldDescriptor, FieldKind, FieldSet, Reference};
pub use provision::{pluralize, ProvisionOutcome};
pub use query::{QueryMode, QueryResult, QueryState};
pub use quarry_common::{ErrorKind, QuarryError, Result};
pub use schema::{Schema, SchemaDefinition, CREATED_AT, UPDATED_AT};
pub use store::{DeleteAck, DocumentStore, FindSpec, InsertManyAck, InsertOneAck, MongoStore, UpdateAck};
pub use translate::{translate, ValidatorDocument};
pub use validation::{
    validate_array_document, validate_document, validate_field_types, validate_identifier,
    validate_query_document, ValidatedCollectionName,
};
