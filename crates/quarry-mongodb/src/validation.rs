//! Input validation for schema operations
//!
//! Every check here runs before any I/O and fails with a specific error kind
//! rather than returning a boolean.
//!
//! # Checks
//! - Document, array and query-document shape
//! - Identifier format (24 lowercase hex characters)
//! - Field-type conformance against a [`FieldSet`]
//! - Collection and field names
//! - Server-side JavaScript operators in filters

use bson::{oid::ObjectId, Bson, Document as BsonDocument};
use once_cell::sync::Lazy;
use quarry_common::{QuarryError, Result};
use regex::Regex;
use tracing::warn;

use crate::field::{FieldDescriptor, FieldKind, FieldSet};

/// Maximum allowed length for collection names (MongoDB limit is 255, we're more conservative)
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

/// Maximum allowed length for field names
const MAX_FIELD_NAME_LENGTH: usize = 1024;

static OBJECT_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{24}$").expect("valid identifier pattern"));

/// Operators that execute server-side JavaScript
const DANGEROUS_OPERATORS: &[&str] = &["$where", "$function", "$accumulator"];

/// Fails unless `doc` has at least one key
pub fn validate_document(doc: &BsonDocument) -> Result<()> {
    if doc.is_empty() {
        return Err(QuarryError::InvalidDocument(
            "document must have at least one field".to_string(),
        ));
    }
    Ok(())
}

/// Fails unless `value` is a document with at least one key
pub fn validate_document_value(value: &Bson) -> Result<&BsonDocument> {
    match value {
        Bson::Document(doc) => {
            validate_document(doc)?;
            Ok(doc)
        }
        other => Err(QuarryError::InvalidDocument(format!(
            "expected a document, got '{}'",
            bson_type_name(other)
        ))),
    }
}

/// Fails unless `docs` has at least one element
pub fn validate_array_document<T>(docs: &[T]) -> Result<()> {
    if docs.is_empty() {
        return Err(QuarryError::InvalidArray(
            "array must have at least one element".to_string(),
        ));
    }
    Ok(())
}

/// Fails unless `filter` has at least one key and is free of JavaScript operators.
///
/// An empty filter is never accepted here; match-all is only reachable through
/// an explicit `find` with an empty document.
pub fn validate_query_document(filter: &BsonDocument) -> Result<()> {
    if filter.is_empty() {
        return Err(QuarryError::InvalidQuery(
            "query filter must have at least one field".to_string(),
        ));
    }
    validate_query_operators(filter)
}

/// Rejects server-side JavaScript operators anywhere in `filter`
pub fn validate_query_operators(filter: &BsonDocument) -> Result<()> {
    for (key, value) in filter {
        if DANGEROUS_OPERATORS.contains(&key.as_str()) {
            return Err(QuarryError::InvalidQuery(format!(
                "operator '{}' is not allowed",
                key
            )));
        }
        check_nested_operators(value)?;
    }
    Ok(())
}

fn check_nested_operators(value: &Bson) -> Result<()> {
    match value {
        Bson::Document(doc) => validate_query_operators(doc),
        Bson::Array(items) => items.iter().try_for_each(check_nested_operators),
        _ => Ok(()),
    }
}

/// Parses `id` as an identifier.
///
/// Fails with `InvalidObjectId` unless `id` is 24 lowercase hex characters.
pub fn validate_identifier(id: &str) -> Result<ObjectId> {
    if !OBJECT_ID_PATTERN.is_match(id) {
        return Err(QuarryError::InvalidObjectId(format!(
            "'{}' is not a 24-character lowercase hex identifier",
            id
        )));
    }
    Ok(ObjectId::parse_str(id)?)
}

/// Like [`validate_identifier`], but an empty `id` is a missing argument
pub fn require_identifier(id: &str) -> Result<ObjectId> {
    if id.is_empty() {
        return Err(QuarryError::InvalidQuery("ObjectId is required".to_string()));
    }
    validate_identifier(id)
}

/// Validates and converts the `_id` of a filter.
///
/// String identifiers, including those inside `$eq`/`$ne`/`$in`/`$nin`, are
/// checked and replaced with the identifier type. Other values pass through.
pub fn normalize_id_filter(filter: &mut BsonDocument) -> Result<()> {
    let Some(value) = filter.get_mut("_id") else {
        return Ok(());
    };
    if let Bson::Document(operators) = value {
        for (operator, operand) in operators.iter_mut() {
            match operator.as_str() {
                "$eq" | "$ne" => convert_identifier(operand)?,
                "$in" | "$nin" => {
                    if let Bson::Array(ids) = operand {
                        for id in ids.iter_mut() {
                            convert_identifier(id)?;
                        }
                    }
                }
                _ => {}
            }
        }
        return Ok(());
    }
    convert_identifier(value)
}

fn convert_identifier(value: &mut Bson) -> Result<()> {
    if let Bson::String(raw) = value {
        let oid = validate_identifier(raw)?;
        *value = Bson::ObjectId(oid);
    }
    Ok(())
}

/// Checks field names of a patch document.
///
/// Patches are applied through `$set`, so operator keys and empty names are
/// rejected.
pub fn validate_patch_field_names(patch: &BsonDocument) -> Result<()> {
    for key in patch.keys() {
        if key.is_empty() {
            return Err(QuarryError::InvalidDocument(
                "field name cannot be empty".to_string(),
            ));
        }
        if key.len() > MAX_FIELD_NAME_LENGTH {
            return Err(QuarryError::InvalidDocument(format!(
                "field name exceeds maximum length of {} characters",
                MAX_FIELD_NAME_LENGTH
            )));
        }
        if key.contains('\0') {
            return Err(QuarryError::InvalidDocument(
                "field name cannot contain null bytes".to_string(),
            ));
        }
        if key.starts_with('$') {
            return Err(QuarryError::InvalidDocument(format!(
                "field name cannot start with '$' (reserved for operators): '{}'",
                key
            )));
        }
    }
    Ok(())
}

/// Validated collection name
///
/// # Guarantees
/// - Not empty
/// - Maximum 120 characters
/// - No null bytes
/// - No "system." prefix (system collections)
/// - No $ characters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCollectionName {
    name: String,
}

impl ValidatedCollectionName {
    pub fn new(name: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(QuarryError::Definition(
                "Collection name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(QuarryError::Definition(format!(
                "Collection name exceeds maximum length of {} characters: '{}'",
                MAX_COLLECTION_NAME_LENGTH, name
            )));
        }

        if name.contains('\0') {
            return Err(QuarryError::Definition(
                "Collection name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with("system.") {
            return Err(QuarryError::Definition(format!(
                "Collection name cannot start with 'system.' (reserved): '{}'",
                name
            )));
        }

        if name.contains('$') {
            return Err(QuarryError::Definition(format!(
                "Collection name cannot contain '$' character: '{}'",
                name
            )));
        }

        if name.contains("..") || name.contains("//") {
            warn!(collection = name, "Collection name contains suspicious pattern");
        }

        Ok(ValidatedCollectionName {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedCollectionName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Get the BSON type name for error messages
fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::Timestamp(_) => "timestamp",
        Bson::Binary(_) => "binary",
        Bson::ObjectId(_) => "objectid",
        Bson::DateTime(_) => "datetime",
        Bson::Symbol(_) => "symbol",
        Bson::Decimal128(_) => "decimal128",
        _ => "unknown",
    }
}

/// Checks every key present in both `doc` and `fields` against its declared kind.
///
/// Keys missing from `doc` are not checked; presence is enforced through the
/// required-field list of the collection validator.
pub fn validate_field_types(fields: &FieldSet, doc: &BsonDocument) -> Result<()> {
    for (name, descriptor) in fields.iter() {
        if let Some(value) = doc.get(name) {
            validate_field(name, value, descriptor)?;
        }
    }
    Ok(())
}

/// Validate a field value against its descriptor
///
/// # Arguments
/// * `field_path` - Dot-notation path to the field (e.g., "address.city")
/// * `value` - The BSON value to validate
/// * `expected` - The expected descriptor
pub fn validate_field(field_path: &str, value: &Bson, expected: &FieldDescriptor) -> Result<()> {
    let matches = match (&expected.kind, value) {
        (FieldKind::String, Bson::String(_)) => true,
        (
            FieldKind::Number,
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_),
        ) => true,
        (FieldKind::Boolean, Bson::Boolean(_)) => true,
        (FieldKind::Date, Bson::DateTime(_)) => true,
        (FieldKind::Reference(_), Bson::ObjectId(_)) => true,
        (FieldKind::Object(children), Bson::Document(nested)) => {
            for (name, descriptor) in children.iter() {
                if let Some(child) = nested.get(name) {
                    validate_field(&format!("{}.{}", field_path, name), child, descriptor)?;
                }
            }
            true
        }
        (FieldKind::Array(item), Bson::Array(elements)) => {
            for (index, element) in elements.iter().enumerate() {
                validate_field(&format!("{}[{}]", field_path, index), element, item)?;
            }
            true
        }
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(QuarryError::SchemaValidation(format!(
            "field '{}' expected type '{}', got '{}'",
            field_path,
            expected.kind.type_name(),
            bson_type_name(value)
        )))
    }
}
