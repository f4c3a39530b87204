//! Population (join) pipeline generation
//!
//! Resolves reference fields into `$lookup` stages. Scalar references are
//! flattened back into one embedded document with `$unwind`; arrays of
//! references keep the joined array as is.
//!
//! Pipelines are plain data and never touch the database.

use std::collections::HashMap;

use bson::{doc, Document as BsonDocument};
use quarry_common::{QuarryError, Result};

use crate::field::FieldSet;
use crate::provision::pluralize;
use crate::store::FindSpec;

/// Builds the aggregation pipeline joining `populate_fields`.
///
/// A non-empty `base_filter` becomes a leading `$match` stage.
pub fn build_pipeline(
    fields: &FieldSet,
    populate_fields: &[String],
    base_filter: &BsonDocument,
    projections: &HashMap<String, BsonDocument>,
) -> Result<Vec<BsonDocument>> {
    build_pipeline_with(
        fields,
        populate_fields,
        base_filter,
        projections,
        &FindSpec::default(),
    )
}

/// Like [`build_pipeline`], with a `$sort` stage between the match and the
/// joins and a trailing `$limit`.
///
/// The limit counts joined documents: a scalar join drops documents whose
/// reference does not resolve, so limiting earlier could return fewer results
/// than exist. Non-positive limits add no stage.
pub fn build_pipeline_with(
    fields: &FieldSet,
    populate_fields: &[String],
    base_filter: &BsonDocument,
    projections: &HashMap<String, BsonDocument>,
    spec: &FindSpec,
) -> Result<Vec<BsonDocument>> {
    // Resolve every field first so an unknown name fails before anything is built
    let joins = lookup_stages(fields, populate_fields, projections)?;

    let mut pipeline = Vec::with_capacity(joins.len() + 3);
    if !base_filter.is_empty() {
        pipeline.push(doc! { "$match": base_filter.clone() });
    }
    if let Some(sort) = &spec.sort {
        pipeline.push(doc! { "$sort": sort.clone() });
    }
    pipeline.extend(joins);
    if let Some(limit) = spec.limit.filter(|limit| *limit > 0) {
        pipeline.push(doc! { "$limit": limit });
    }
    Ok(pipeline)
}

/// Join stages for each populated field, in request order
pub fn lookup_stages(
    fields: &FieldSet,
    populate_fields: &[String],
    projections: &HashMap<String, BsonDocument>,
) -> Result<Vec<BsonDocument>> {
    let mut stages = Vec::new();

    for name in populate_fields {
        let descriptor = fields.get(name).ok_or_else(|| {
            QuarryError::ReferenceNotFound(format!("field '{}' is not defined in the schema", name))
        })?;
        let (reference, is_array) = descriptor.as_reference().ok_or_else(|| {
            QuarryError::ReferenceNotFound(format!("field '{}' is not a reference", name))
        })?;
        let target = reference.target.as_deref().ok_or_else(|| {
            QuarryError::ReferenceNotFound(format!(
                "field '{}' does not name a referenced collection",
                name
            ))
        })?;

        let mut lookup = doc! {
            "from": pluralize(target),
            "localField": name.as_str(),
            "foreignField": reference.key_field.as_str(),
            "as": name.as_str(),
        };
        if let Some(projection) = projections.get(name).filter(|p| !p.is_empty()) {
            lookup.insert("pipeline", vec![doc! { "$project": projection.clone() }]);
        }
        stages.push(doc! { "$lookup": lookup });

        if !is_array {
            stages.push(doc! { "$unwind": format!("${}", name) });
        }
    }

    Ok(stages)
}
