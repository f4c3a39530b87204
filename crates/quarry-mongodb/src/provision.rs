//! Collection provisioning
//!
//! Creates or modifies a collection so its validator and unique indexes match
//! a field set. Every step is safe to repeat, so recovery from a failure part
//! way through is simply running provisioning again.

use quarry_common::{QuarryError, Result};
use tracing::{debug, info, instrument};

use crate::config::ValidationLevel;
use crate::field::FieldSet;
use crate::store::{ascending_index_keys, DocumentStore};
use crate::translate::{translate, unique_fields};

/// Plural form of a collection name: appends `s` unless already present
pub fn pluralize(name: &str) -> String {
    if name.ends_with('s') {
        name.to_string()
    } else {
        format!("{}s", name)
    }
}

/// What a provisioning run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    /// Whether the collection had to be created
    pub created: bool,
    /// Fields that received a unique index
    pub unique_indexes: Vec<String>,
}

/// Applies the validator translated from `fields` to `collection`, creating
/// the collection first when missing, then builds one ascending unique index
/// per unique field.
///
/// Every failure is reported as `QuarryError::Collection`.
#[instrument(skip(store, fields), fields(db = store.database_name()))]
pub async fn provision(
    store: &dyn DocumentStore,
    collection: &str,
    fields: &FieldSet,
    level: ValidationLevel,
) -> Result<ProvisionOutcome> {
    run(store, collection, fields, level)
        .await
        .map_err(QuarryError::into_collection_error)
}

async fn run(
    store: &dyn DocumentStore,
    collection: &str,
    fields: &FieldSet,
    level: ValidationLevel,
) -> Result<ProvisionOutcome> {
    if fields.is_empty() {
        return Err(QuarryError::Collection(format!(
            "schema for '{}' declares no fields",
            collection
        )));
    }

    let validator = translate(fields);
    let existing = store.list_collection_names().await?;
    let created = !existing.iter().any(|name| name == collection);

    if created {
        info!(collection, "Creating collection");
        store.create_collection(collection).await?;
    }

    let command = validator.to_coll_mod(collection, level);
    debug!(collection, validator = %command, "Applying validator");
    store.run_command(command).await?;

    let unique = unique_fields(fields);
    for field in &unique {
        debug!(collection, field = field.as_str(), "Ensuring unique index");
        store
            .create_index(collection, ascending_index_keys(field), true)
            .await?;
    }

    info!(collection, created, unique_indexes = unique.len(), "Collection provisioned");
    Ok(ProvisionOutcome {
        created,
        unique_indexes: unique,
    })
}
