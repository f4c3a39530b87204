//! Deferred query state and its execution
//!
//! [`QueryState`] accumulates filter, sort, limit and population intent across
//! chained builder calls. Nothing runs until [`QueryState::execute`], which
//! consumes the state.

use std::collections::HashMap;

use bson::Document as BsonDocument;
use quarry_common::{QuarryError, Result};
use tracing::debug;

use crate::field::FieldSet;
use crate::populate::build_pipeline_with;
use crate::store::{DocumentStore, FindSpec};
use crate::validation::{normalize_id_filter, validate_query_document, validate_query_operators};

/// Whether a query returns many documents or at most one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Many,
    Single,
}

/// Accumulated query intent between `find`/`find_one` and `exec`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    /// `None` while idle
    mode: Option<QueryMode>,
    filter: BsonDocument,
    sort: Option<BsonDocument>,
    limit: Option<i64>,
    populate: Vec<String>,
    projections: HashMap<String, BsonDocument>,
}

impl QueryState {
    /// Starts a new query, discarding anything accumulated so far
    pub fn begin(&mut self, mode: QueryMode, filter: BsonDocument) {
        *self = Self {
            mode: Some(mode),
            filter,
            ..Default::default()
        };
    }

    pub fn set_sort(&mut self, sort: BsonDocument) {
        self.sort = Some(sort);
    }

    pub fn set_limit(&mut self, limit: i64) {
        self.limit = Some(limit);
    }

    /// Queues `field` for population, with an optional projection on the
    /// joined documents. Requesting the same field twice keeps one join.
    pub fn add_populate(&mut self, field: impl Into<String>, projection: Option<BsonDocument>) {
        let field = field.into();
        match projection {
            Some(projection) => {
                self.projections.insert(field.clone(), projection);
            }
            None => {
                self.projections.remove(&field);
            }
        }
        if !self.populate.contains(&field) {
            self.populate.push(field);
        }
    }

    pub fn mode(&self) -> Option<QueryMode> {
        self.mode
    }

    pub fn is_idle(&self) -> bool {
        self.mode.is_none()
    }

    pub fn filter(&self) -> &BsonDocument {
        &self.filter
    }

    pub fn sort(&self) -> Option<&BsonDocument> {
        self.sort.as_ref()
    }

    pub fn limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn populate_fields(&self) -> &[String] {
        &self.populate
    }

    pub fn projection(&self, field: &str) -> Option<&BsonDocument> {
        self.projections.get(field)
    }

    /// Validates and normalizes the stored filter.
    ///
    /// A single-document query needs a non-empty filter; a many-document query
    /// treats the empty filter as match-all.
    fn prepared_filter(&mut self, mode: QueryMode) -> Result<BsonDocument> {
        let mut filter = std::mem::take(&mut self.filter);
        match mode {
            QueryMode::Single => validate_query_document(&filter)?,
            QueryMode::Many => validate_query_operators(&filter)?,
        }
        normalize_id_filter(&mut filter)?;
        Ok(filter)
    }

    /// Runs the query against `collection`.
    pub(crate) async fn execute(
        mut self,
        store: &dyn DocumentStore,
        collection: &str,
        fields: &FieldSet,
    ) -> Result<QueryResult> {
        let mode = self.mode.ok_or_else(|| {
            QuarryError::InvalidQuery(
                "no query to execute; call find or find_one first".to_string(),
            )
        })?;
        let filter = self.prepared_filter(mode)?;

        // Zero and negative limits mean no limit on either read path
        let spec = match mode {
            QueryMode::Many => FindSpec {
                sort: self.sort.take(),
                limit: self.limit.take().filter(|limit| *limit > 0),
            },
            QueryMode::Single => FindSpec::default(),
        };

        if !self.populate.is_empty() {
            let spec = match mode {
                QueryMode::Many => spec,
                QueryMode::Single => FindSpec {
                    sort: None,
                    limit: Some(1),
                },
            };
            let pipeline =
                build_pipeline_with(fields, &self.populate, &filter, &self.projections, &spec)?;
            debug!(collection, stages = pipeline.len(), "Running population pipeline");
            let docs = store.aggregate(collection, pipeline).await?;
            return Ok(match mode {
                QueryMode::Many => QueryResult::Many(docs),
                QueryMode::Single => QueryResult::One(docs.into_iter().next()),
            });
        }

        debug!(collection, ?mode, filter = %filter, "Running query");
        match mode {
            QueryMode::Many => Ok(QueryResult::Many(store.find(collection, filter, spec).await?)),
            QueryMode::Single => Ok(QueryResult::One(store.find_one(collection, filter).await?)),
        }
    }
}

/// Result of a terminal `exec`
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Many(Vec<BsonDocument>),
    One(Option<BsonDocument>),
}

impl QueryResult {
    /// All returned documents; a single-document result yields zero or one
    pub fn into_many(self) -> Vec<BsonDocument> {
        match self {
            QueryResult::Many(docs) => docs,
            QueryResult::One(doc) => doc.into_iter().collect(),
        }
    }

    /// The first returned document, if any
    pub fn into_one(self) -> Option<BsonDocument> {
        match self {
            QueryResult::Many(docs) => docs.into_iter().next(),
            QueryResult::One(doc) => doc,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QueryResult::Many(docs) => docs.len(),
            QueryResult::One(doc) => usize::from(doc.is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
