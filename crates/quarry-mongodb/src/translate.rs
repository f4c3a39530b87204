//! Schema to validator translation
//!
//! Turns a [`FieldSet`] into the `$jsonSchema` validator MongoDB enforces on a
//! collection, plus the required and unique field lists. Translation is pure
//! and deterministic: the same field set always yields the same documents, which
//! is what makes re-running provisioning safe.

use bson::{doc, Bson, Document as BsonDocument};

use crate::config::ValidationLevel;
use crate::field::{FieldDescriptor, FieldKind, FieldSet};

/// Validator derived from a field set
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorDocument {
    /// Top-level required fields, in declaration order
    pub required: Vec<String>,
    /// Property specs keyed by field name, in declaration order
    pub properties: BsonDocument,
}

impl ValidatorDocument {
    /// The `{ $jsonSchema: { ... } }` validator document.
    ///
    /// `required` is omitted when no field is required, since the server
    /// rejects an empty `required` array.
    pub fn to_json_schema(&self) -> BsonDocument {
        let mut schema = doc! { "bsonType": "object" };
        if !self.required.is_empty() {
            let required: Vec<Bson> = self.required.iter().cloned().map(Bson::String).collect();
            schema.insert("required", required);
        }
        schema.insert("properties", self.properties.clone());
        doc! { "$jsonSchema": schema }
    }

    /// The `collMod` command applying this validator to `collection`
    pub fn to_coll_mod(&self, collection: &str, level: ValidationLevel) -> BsonDocument {
        doc! {
            "collMod": collection,
            "validator": self.to_json_schema(),
            "validationLevel": level.as_str(),
        }
    }
}

/// Translates a field set into its validator
pub fn translate(fields: &FieldSet) -> ValidatorDocument {
    ValidatorDocument {
        required: required_fields(fields),
        properties: translate_properties(fields),
    }
}

/// Names of top-level fields marked required, in declaration order
pub fn required_fields(fields: &FieldSet) -> Vec<String> {
    fields
        .iter()
        .filter(|(_, descriptor)| descriptor.required)
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Names of top-level fields marked unique, in declaration order
pub fn unique_fields(fields: &FieldSet) -> Vec<String> {
    fields
        .iter()
        .filter(|(_, descriptor)| descriptor.unique)
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Property specs for every field of `fields`
pub fn translate_properties(fields: &FieldSet) -> BsonDocument {
    let mut properties = BsonDocument::new();
    for (name, descriptor) in fields.iter() {
        properties.insert(name, property_spec(descriptor));
    }
    properties
}

/// Property spec for one field.
///
/// `required`/`unique` are consumed here and never forwarded; reference
/// metadata is left for the population pipeline.
pub fn property_spec(descriptor: &FieldDescriptor) -> BsonDocument {
    let mut spec = doc! { "bsonType": descriptor.kind.bson_type() };
    match &descriptor.kind {
        FieldKind::Object(children) if !children.is_empty() => {
            spec.insert("properties", translate_properties(children));
        }
        FieldKind::Array(item) => {
            spec.insert("items", property_spec(item));
        }
        _ => {}
    }
    spec
}
