//! Error types for quarry

use serde::Serialize;
use thiserror::Error;

/// Result type alias for quarry operations
pub type Result<T> = std::result::Result<T, QuarryError>;

/// Unified error type for all quarry operations
///
/// Validation kinds are raised before any I/O is attempted. Driver failures
/// surface as `Operation` unless a more specific kind applies.
#[derive(Error, Debug, Clone)]
pub enum QuarryError {
    #[error("Invalid document provided: {0}")]
    InvalidDocument(String),

    #[error("Invalid array provided: {0}")]
    InvalidArray(String),

    #[error("Invalid query provided: {0}")]
    InvalidQuery(String),

    #[error("Invalid ObjectId provided: {0}")]
    InvalidObjectId(String),

    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    /// Population requested on a field that is missing or not a reference
    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    /// Malformed schema definition (bad descriptor notation, bad collection name)
    #[error("Schema definition error: {0}")]
    Definition(String),

    #[error("Database connection error: {0}")]
    Connection(String),

    /// Collection creation, validator modification, or index build failed
    #[error("Database collection error: {0}")]
    Collection(String),

    /// Any other failure surfaced by the driver during CRUD or aggregation
    #[error("Database operation error: {0}")]
    Operation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Fieldless discriminant of [`QuarryError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidDocument,
    InvalidArray,
    InvalidQuery,
    InvalidObjectId,
    SchemaValidationError,
    ReferenceNotFound,
    SchemaDefinitionError,
    DatabaseConnectionError,
    DatabaseCollectionError,
    DatabaseOperationError,
    SerializationError,
}

impl QuarryError {
    /// Returns the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuarryError::InvalidDocument(_) => ErrorKind::InvalidDocument,
            QuarryError::InvalidArray(_) => ErrorKind::InvalidArray,
            QuarryError::InvalidQuery(_) => ErrorKind::InvalidQuery,
            QuarryError::InvalidObjectId(_) => ErrorKind::InvalidObjectId,
            QuarryError::SchemaValidation(_) => ErrorKind::SchemaValidationError,
            QuarryError::ReferenceNotFound(_) => ErrorKind::ReferenceNotFound,
            QuarryError::Definition(_) => ErrorKind::SchemaDefinitionError,
            QuarryError::Connection(_) => ErrorKind::DatabaseConnectionError,
            QuarryError::Collection(_) => ErrorKind::DatabaseCollectionError,
            QuarryError::Operation(_) => ErrorKind::DatabaseOperationError,
            QuarryError::Serialization(_) => ErrorKind::SerializationError,
        }
    }

    /// Returns true if the error was raised by input validation, before any I/O
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            QuarryError::InvalidDocument(_)
                | QuarryError::InvalidArray(_)
                | QuarryError::InvalidQuery(_)
                | QuarryError::InvalidObjectId(_)
                | QuarryError::SchemaValidation(_)
                | QuarryError::ReferenceNotFound(_)
                | QuarryError::Definition(_)
        )
    }

    /// Re-wraps a failure as a collection provisioning error.
    ///
    /// `Collection` errors pass through unchanged.
    pub fn into_collection_error(self) -> Self {
        match self {
            QuarryError::Collection(_) => self,
            other => QuarryError::Collection(other.message()),
        }
    }

    /// Re-wraps a failure as a connection error.
    ///
    /// `Connection` errors pass through unchanged.
    pub fn into_connection_error(self) -> Self {
        match self {
            QuarryError::Connection(_) => self,
            other => QuarryError::Connection(other.message()),
        }
    }

    /// The message without the kind prefix
    pub fn message(&self) -> String {
        match self {
            QuarryError::InvalidDocument(m)
            | QuarryError::InvalidArray(m)
            | QuarryError::InvalidQuery(m)
            | QuarryError::InvalidObjectId(m)
            | QuarryError::SchemaValidation(m)
            | QuarryError::ReferenceNotFound(m)
            | QuarryError::Definition(m)
            | QuarryError::Connection(m)
            | QuarryError::Collection(m)
            | QuarryError::Operation(m)
            | QuarryError::Serialization(m) => m.clone(),
        }
    }
}

impl From<serde_json::Error> for QuarryError {
    fn from(err: serde_json::Error) -> Self {
        QuarryError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for QuarryError {
    fn from(err: mongodb::error::Error) -> Self {
        QuarryError::Operation(err.to_string())
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for QuarryError {
    fn from(err: bson::ser::Error) -> Self {
        QuarryError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for QuarryError {
    fn from(err: bson::de::Error) -> Self {
        QuarryError::Serialization(format!("BSON deserialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::oid::Error> for QuarryError {
    fn from(err: bson::oid::Error) -> Self {
        QuarryError::InvalidObjectId(err.to_string())
    }
}
