//! In-memory `DocumentStore` for offline integration tests.
//!
//! Implements the subset of MongoDB behavior the engine relies on: equality and
//! comparison filters, `$set`/`$unset` update pipelines with the `$literal`,
//! `$cond`, `$eq`, `$type`, `$max` and `$add` expressions, unique indexes, and
//! the `$match`, `$sort`, `$limit`, `$project`, `$lookup`, `$unwind`
//! aggregation stages.

#![allow(dead_code)]


pub use logging::init_tracing;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use parking_lot::Mutex;
use quarry_mongodb::{
    DeleteAck, DocumentStore, FindSpec, InsertManyAck, InsertOneAck, QuarryError, Result, UpdateAck,
};

#[derive(Default)]
struct State {
    collections: BTreeMap<String, Vec<Document>>,
    /// Unique field names per collection
    unique: BTreeMap<String, Vec<String>>,
    commands: Vec<Document>,
    indexes: Vec<(String, Document, bool)>,
    pipelines: Vec<Vec<Document>>,
    calls: Vec<&'static str>,
    failing: bool,
}

pub struct MemoryStore {
    name: String,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// Inserts documents directly, bypassing unique checks
    pub fn seed(&self, collection: &str, docs: Vec<Document>) {
        let mut state = self.state.lock();
        let stored = state.collections.entry(collection.to_string()).or_default();
        for mut doc in docs {
            if !doc.contains_key("_id") {
                doc.insert("_id", ObjectId::new());
            }
            stored.push(doc);
        }
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state
            .lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Commands passed to `run_command`, in order
    pub fn commands(&self) -> Vec<Document> {
        self.state.lock().commands.clone()
    }

    /// `(collection, keys, unique)` for every index created
    pub fn indexes(&self) -> Vec<(String, Document, bool)> {
        self.state.lock().indexes.clone()
    }

    /// Pipelines passed to `aggregate`, in order
    pub fn pipelines(&self) -> Vec<Vec<Document>> {
        self.state.lock().pipelines.clone()
    }

    /// Names of the store methods called so far
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Makes every data operation fail with a driver error
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    fn enter(&self, call: &'static str) -> Result<parking_lot::MutexGuard<'_, State>> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.failing {
            return Err(QuarryError::Operation(format!("{} failed: connection reset", call)));
        }
        Ok(state)
    }
}

impl State {
    fn check_unique(&self, collection: &str, doc: &Document, skip: Option<usize>) -> Result<()> {
        let stored = match self.collections.get(collection) {
            Some(stored) => stored,
            None => return Ok(()),
        };
        let mut fields = vec!["_id".to_string()];
        if let Some(unique) = self.unique.get(collection) {
            fields.extend(unique.iter().cloned());
        }
        for field in &fields {
            let Some(value) = doc.get(field) else { continue };
            let clash = stored
                .iter()
                .enumerate()
                .filter(|(index, _)| Some(*index) != skip)
                .any(|(_, other)| other.get(field).is_some_and(|v| values_equal(v, value)));
            if clash {
                return Err(QuarryError::Operation(format!(
                    "E11000 duplicate key error collection: {} index: {}_1 dup key: {{ {}: {} }}",
                    collection, field, field, value
                )));
            }
        }
        Ok(())
    }

    fn insert(&mut self, collection: &str, mut doc: Document) -> Result<Bson> {
        if !doc.contains_key("_id") {
            doc.insert("_id", ObjectId::new());
        }
        self.check_unique(collection, &doc, None)?;
        let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        Ok(id)
    }

    /// Applies the `update` pipeline to the document at `index`; returns
    /// whether it changed
    fn update_at(&mut self, collection: &str, index: usize, update: &[Document]) -> Result<bool> {
        let current = self.collections[collection][index].clone();
        let updated = apply_update(&current, update)?;
        self.check_unique(collection, &updated, Some(index))?;
        let changed = updated != current;
        if let Some(stored) = self.collections.get_mut(collection) {
            stored[index] = updated;
        }
        Ok(changed)
    }

    fn matching_indexes(&self, collection: &str, filter: &Document) -> Vec<usize> {
        self.collections
            .get(collection)
            .map(|stored| {
                stored
                    .iter()
                    .enumerate()
                    .filter(|(_, doc)| matches_filter(doc, filter))
                    .map(|(index, _)| index)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn run_pipeline(&self, collection: &str, pipeline: &[Document]) -> Result<Vec<Document>> {
        let docs = self.collections.get(collection).cloned().unwrap_or_default();
        self.apply_stages(docs, pipeline)
    }

    fn apply_stages(&self, mut docs: Vec<Document>, pipeline: &[Document]) -> Result<Vec<Document>> {
        for stage in pipeline {
            let (name, spec) = stage
                .iter()
                .next()
                .ok_or_else(|| QuarryError::Operation("empty pipeline stage".to_string()))?;
            docs = match (name.as_str(), spec) {
                ("$match", Bson::Document(filter)) => {
                    docs.into_iter().filter(|doc| matches_filter(doc, filter)).collect()
                }
                ("$sort", Bson::Document(sort)) => {
                    sort_documents(&mut docs, sort);
                    docs
                }
                ("$limit", limit) => {
                    let limit = as_i64(limit).unwrap_or(0).max(0) as usize;
                    docs.truncate(limit);
                    docs
                }
                ("$project", Bson::Document(projection)) => {
                    docs.iter().map(|doc| project(doc, projection)).collect()
                }
                ("$lookup", Bson::Document(lookup)) => self.lookup(docs, lookup)?,
                ("$unwind", Bson::String(path)) => unwind(docs, path.trim_start_matches('$')),
                (other, _) => {
                    return Err(QuarryError::Operation(format!(
                        "unsupported pipeline stage '{}'",
                        other
                    )))
                }
            };
        }
        Ok(docs)
    }

    fn lookup(&self, docs: Vec<Document>, lookup: &Document) -> Result<Vec<Document>> {
        let field = |key: &str| {
            lookup
                .get_str(key)
                .map_err(|_| QuarryError::Operation(format!("$lookup requires '{}'", key)))
        };
        let from = field("from")?;
        let local = field("localField")?;
        let foreign = field("foreignField")?;
        let as_field = field("as")?;
        let inner: Vec<Document> = match lookup.get_array("pipeline") {
            Ok(stages) => stages
                .iter()
                .filter_map(|stage| stage.as_document().cloned())
                .collect(),
            Err(_) => Vec::new(),
        };
        let foreign_docs = self.collections.get(from).cloned().unwrap_or_default();

        let mut joined = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let local_values: Vec<Bson> = match doc.get(local) {
                Some(Bson::Array(values)) => values.clone(),
                Some(value) => vec![value.clone()],
                None => vec![Bson::Null],
            };
            let matched: Vec<Document> = foreign_docs
                .iter()
                .filter(|candidate| {
                    let value = candidate.get(foreign).unwrap_or(&Bson::Null);
                    local_values.iter().any(|local| values_equal(local, value))
                })
                .cloned()
                .collect();
            let matched = self.apply_stages(matched, &inner)?;
            doc.insert(as_field, matched.into_iter().map(Bson::Document).collect::<Vec<_>>());
            joined.push(doc);
        }
        Ok(joined)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn database_name(&self) -> &str {
        &self.name
    }

    async fn list_collection_names(&self) -> Result<Vec<String>> {
        let state = self.enter("list_collection_names")?;
        Ok(state.collections.keys().cloned().collect())
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        let mut state = self.enter("create_collection")?;
        if state.collections.contains_key(name) {
            return Err(QuarryError::Operation(format!(
                "Collection already exists. NS: {}.{}",
                self.name, name
            )));
        }
        state.collections.insert(name.to_string(), Vec::new());
        Ok(())
    }

    async fn run_command(&self, command: Document) -> Result<Document> {
        let mut state = self.enter("run_command")?;
        if let Ok(target) = command.get_str("collMod") {
            if !state.collections.contains_key(target) {
                return Err(QuarryError::Operation(format!("ns does not exist: {}", target)));
            }
        }
        state.commands.push(command);
        Ok(bson::doc! { "ok": 1 })
    }

    async fn create_index(&self, collection: &str, keys: Document, unique: bool) -> Result<()> {
        let mut state = self.enter("create_index")?;
        if state
            .indexes
            .iter()
            .any(|(c, k, u)| c == collection && *k == keys && *u == unique)
        {
            return Ok(());
        }
        if unique {
            let fields: Vec<String> = keys.keys().cloned().collect();
            let docs = state.collections.get(collection).cloned().unwrap_or_default();
            for field in &fields {
                let values: Vec<&Bson> = docs.iter().filter_map(|doc| doc.get(field)).collect();
                for (i, a) in values.iter().enumerate() {
                    if values[i + 1..].iter().any(|b| values_equal(a, b)) {
                        return Err(QuarryError::Operation(format!(
                            "E11000 duplicate key error building index on {}.{}",
                            collection, field
                        )));
                    }
                }
            }
            state
                .unique
                .entry(collection.to_string())
                .or_default()
                .extend(fields);
        }
        state.indexes.push((collection.to_string(), keys, unique));
        Ok(())
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<InsertOneAck> {
        let mut state = self.enter("insert_one")?;
        let inserted_id = state.insert(collection, doc)?;
        Ok(InsertOneAck {
            acknowledged: true,
            inserted_id,
        })
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<InsertManyAck> {
        let mut state = self.enter("insert_many")?;
        let mut inserted_ids = Vec::with_capacity(docs.len());
        for doc in docs {
            inserted_ids.push(state.insert(collection, doc)?);
        }
        Ok(InsertManyAck {
            acknowledged: true,
            inserted_count: inserted_ids.len() as u64,
            inserted_ids,
        })
    }

    async fn find(&self, collection: &str, filter: Document, spec: FindSpec) -> Result<Vec<Document>> {
        let state = self.enter("find")?;
        let mut docs: Vec<Document> = state
            .collections
            .get(collection)
            .map(|stored| {
                stored
                    .iter()
                    .filter(|doc| matches_filter(doc, &filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(sort) = &spec.sort {
            sort_documents(&mut docs, sort);
        }
        if let Some(limit) = spec.limit {
            if limit > 0 {
                docs.truncate(limit as usize);
            }
        }
        Ok(docs)
    }

    async fn find_one(&self, collection: &str, filter: Document) -> Result<Option<Document>> {
        let state = self.enter("find_one")?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|stored| stored.iter().find(|doc| matches_filter(doc, &filter)).cloned()))
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Vec<Document>,
    ) -> Result<Option<Document>> {
        let mut state = self.enter("find_one_and_update")?;
        let Some(index) = state.matching_indexes(collection, &filter).into_iter().next() else {
            return Ok(None);
        };
        state.update_at(collection, index, &update)?;
        Ok(Some(state.collections[collection][index].clone()))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Vec<Document>,
    ) -> Result<UpdateAck> {
        let mut state = self.enter("update_many")?;
        let indexes = state.matching_indexes(collection, &filter);
        let mut modified = 0;
        for index in &indexes {
            if state.update_at(collection, *index, &update)? {
                modified += 1;
            }
        }
        Ok(UpdateAck {
            acknowledged: true,
            matched_count: indexes.len() as u64,
            modified_count: modified,
        })
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<DeleteAck> {
        let mut state = self.enter("delete_one")?;
        let deleted = match state.matching_indexes(collection, &filter).first() {
            Some(&index) => {
                if let Some(stored) = state.collections.get_mut(collection) {
                    stored.remove(index);
                }
                1
            }
            None => 0,
        };
        Ok(DeleteAck {
            acknowledged: true,
            deleted_count: deleted,
        })
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<DeleteAck> {
        let mut state = self.enter("delete_many")?;
        let mut deleted = 0;
        if let Some(stored) = state.collections.get_mut(collection) {
            let before = stored.len();
            stored.retain(|doc| !matches_filter(doc, &filter));
            deleted = (before - stored.len()) as u64;
        }
        Ok(DeleteAck {
            acknowledged: true,
            deleted_count: deleted,
        })
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let mut state = self.enter("aggregate")?;
        state.pipelines.push(pipeline.clone());
        state.run_pipeline(collection, &pipeline)
    }
}

// =====================
// Matching helpers
// =====================

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(*v as i64),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) => Some(*v as i64),
        _ => None,
    }
}

fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match compare(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

/// Equality against a stored value; arrays match when any element does
fn value_matches(stored: Option<&Bson>, expected: &Bson) -> bool {
    match stored {
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
        None => matches!(expected, Bson::Null),
    }
}

fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, expected)| match key.as_str() {
        "$and" => expected
            .as_array()
            .is_some_and(|clauses| clauses.iter().all(|c| c.as_document().is_some_and(|f| matches_filter(doc, f)))),
        "$or" => expected
            .as_array()
            .is_some_and(|clauses| clauses.iter().any(|c| c.as_document().is_some_and(|f| matches_filter(doc, f)))),
        _ => {
            let stored = lookup_path(doc, key);
            match expected {
                Bson::Document(operators) if operators.keys().all(|k| k.starts_with('$')) && !operators.is_empty() => {
                    operators.iter().all(|(op, operand)| matches_operator(stored, op, operand))
                }
                _ => value_matches(stored, expected),
            }
        }
    })
}

fn matches_operator(stored: Option<&Bson>, op: &str, operand: &Bson) -> bool {
    let ordered = |accept: fn(Ordering) -> bool| {
        stored
            .and_then(|value| compare(value, operand))
            .is_some_and(accept)
    };
    match op {
        "$eq" => value_matches(stored, operand),
        "$ne" => !value_matches(stored, operand),
        "$in" => operand
            .as_array()
            .is_some_and(|values| values.iter().any(|v| value_matches(stored, v))),
        "$nin" => !operand
            .as_array()
            .is_some_and(|values| values.iter().any(|v| value_matches(stored, v))),
        "$gt" => ordered(|o| o == Ordering::Greater),
        "$gte" => ordered(|o| o != Ordering::Less),
        "$lt" => ordered(|o| o == Ordering::Less),
        "$lte" => ordered(|o| o != Ordering::Greater),
        "$exists" => stored.is_some() == operand.as_bool().unwrap_or(true),
        _ => false,
    }
}

fn sort_documents(docs: &mut [Document], sort: &Document) {
    docs.sort_by(|a, b| {
        for (key, direction) in sort {
            let ordering = match (lookup_path(a, key), lookup_path(b, key)) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
            };
            let ordering = if as_i64(direction).unwrap_or(1) < 0 {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn unsupported(what: &str) -> QuarryError {
    QuarryError::Operation(format!("unsupported {}", what))
}

fn apply_update(doc: &Document, pipeline: &[Document]) -> Result<Document> {
    let mut updated = doc.clone();
    for stage in pipeline {
        let (name, spec) = stage
            .iter()
            .next()
            .ok_or_else(|| QuarryError::Operation("empty update stage".to_string()))?;
        match (name.as_str(), spec) {
            ("$set" | "$addFields", Bson::Document(fields)) => {
                // Expressions see the document as it was before the stage
                let snapshot = updated.clone();
                set_fields(&mut updated, fields, &snapshot)?;
            }
            ("$unset", Bson::String(field)) => {
                updated.remove(field);
            }
            ("$unset", Bson::Array(fields)) => {
                for field in fields.iter().filter_map(Bson::as_str) {
                    updated.remove(field);
                }
            }
            (other, _) => return Err(unsupported(&format!("update stage '{}'", other))),
        }
    }
    if updated.get("_id") != doc.get("_id") {
        return Err(QuarryError::Operation(
            "Performing an update on the path '_id' would modify the immutable field '_id'"
                .to_string(),
        ));
    }
    Ok(updated)
}

fn is_expression_object(spec: &Document) -> bool {
    spec.keys().next().is_some_and(|key| key.starts_with('$'))
}

/// `$set` stage semantics: plain nested documents merge into embedded documents
fn set_fields(target: &mut Document, fields: &Document, root: &Document) -> Result<()> {
    for (key, spec) in fields {
        match spec {
            Bson::Document(nested) if !is_expression_object(nested) => {
                let mut inner = match target.get(key) {
                    Some(Bson::Document(existing)) => existing.clone(),
                    _ => Document::new(),
                };
                set_fields(&mut inner, nested, root)?;
                target.insert(key.clone(), inner);
            }
            _ => {
                target.insert(key.clone(), evaluate(spec, root)?);
            }
        }
    }
    Ok(())
}

fn type_name(value: Option<&Bson>) -> &'static str {
    match value {
        None => "missing",
        Some(Bson::Null) => "null",
        Some(Bson::DateTime(_)) => "date",
        Some(Bson::String(_)) => "string",
        Some(Bson::Int32(_)) => "int",
        Some(Bson::Int64(_)) => "long",
        Some(Bson::Double(_)) => "double",
        Some(Bson::Boolean(_)) => "bool",
        Some(Bson::ObjectId(_)) => "objectId",
        Some(Bson::Document(_)) => "object",
        Some(Bson::Array(_)) => "array",
        Some(_) => "other",
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Null => false,
        other => as_f64(other).map_or(true, |n| n != 0.0),
    }
}

fn expression_args(operand: &Bson) -> Vec<Bson> {
    match operand {
        Bson::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Evaluates an aggregation expression against `root`
fn evaluate(expr: &Bson, root: &Document) -> Result<Bson> {
    match expr {
        Bson::String(path) if path.starts_with('$') => {
            Ok(lookup_path(root, &path[1..]).cloned().unwrap_or(Bson::Null))
        }
        Bson::Array(items) => Ok(Bson::Array(
            items.iter().map(|item| evaluate(item, root)).collect::<Result<_>>()?,
        )),
        Bson::Document(spec) if is_expression_object(spec) => {
            let (op, operand) = spec
                .iter()
                .next()
                .ok_or_else(|| unsupported("empty expression"))?;
            evaluate_operator(op, operand, root)
        }
        Bson::Document(spec) => {
            let mut object = Document::new();
            for (key, value) in spec {
                object.insert(key.clone(), evaluate(value, root)?);
            }
            Ok(Bson::Document(object))
        }
        other => Ok(other.clone()),
    }
}

fn evaluate_operator(op: &str, operand: &Bson, root: &Document) -> Result<Bson> {
    match op {
        "$literal" => Ok(operand.clone()),
        "$type" => Ok(Bson::String(
            match operand {
                Bson::String(path) if path.starts_with('$') => type_name(lookup_path(root, &path[1..])),
                other => type_name(Some(&evaluate(other, root)?)),
            }
            .to_string(),
        )),
        "$eq" => {
            let args = expression_args(operand);
            let [a, b] = args.as_slice() else {
                return Err(unsupported("$eq arity"));
            };
            Ok(Bson::Boolean(values_equal(&evaluate(a, root)?, &evaluate(b, root)?)))
        }
        "$cond" => {
            let (condition, then, otherwise) = match operand {
                Bson::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                Bson::Document(branches) => {
                    let branch = |key: &str| {
                        branches
                            .get(key)
                            .ok_or_else(|| unsupported(&format!("$cond without '{}'", key)))
                    };
                    (branch("if")?, branch("then")?, branch("else")?)
                }
                _ => return Err(unsupported("$cond form")),
            };
            if truthy(&evaluate(condition, root)?) {
                evaluate(then, root)
            } else {
                evaluate(otherwise, root)
            }
        }
        "$max" => {
            let mut best: Option<Bson> = None;
            for arg in expression_args(operand) {
                let value = evaluate(&arg, root)?;
                if matches!(value, Bson::Null) {
                    continue;
                }
                let replace = match &best {
                    Some(current) => compare(&value, current) == Some(Ordering::Greater),
                    None => true,
                };
                if replace {
                    best = Some(value);
                }
            }
            Ok(best.unwrap_or(Bson::Null))
        }
        "$add" => {
            let mut date: Option<i64> = None;
            let mut total = 0_i64;
            for arg in expression_args(operand) {
                match evaluate(&arg, root)? {
                    Bson::Null => return Ok(Bson::Null),
                    Bson::DateTime(at) if date.is_none() => date = Some(at.timestamp_millis()),
                    value => total += as_i64(&value).ok_or_else(|| unsupported("$add operand"))?,
                }
            }
            Ok(match date {
                Some(millis) => Bson::DateTime(bson::DateTime::from_millis(millis + total)),
                None => Bson::Int64(total),
            })
        }
        other => Err(unsupported(&format!("expression '{}'", other))),
    }
}

fn project(doc: &Document, projection: &Document) -> Document {
    let included = |value: &Bson| match value {
        Bson::Boolean(flag) => *flag,
        other => as_i64(other).unwrap_or(1) != 0,
    };
    let inclusion = projection
        .iter()
        .any(|(key, value)| key != "_id" && included(value));

    if inclusion {
        let mut projected = Document::new();
        let keep_id = projection.get("_id").map(included).unwrap_or(true);
        for (key, value) in doc {
            let listed = projection.get(key).is_some_and(included);
            if (key == "_id" && keep_id) || (key != "_id" && listed) {
                projected.insert(key.clone(), value.clone());
            }
        }
        projected
    } else {
        let mut projected = doc.clone();
        for (key, value) in projection {
            if !included(value) {
                projected.remove(key);
            }
        }
        projected
    }
}

fn unwind(docs: Vec<Document>, field: &str) -> Vec<Document> {
    let mut unwound = Vec::new();
    for doc in docs {
        let items = match doc.get(field) {
            Some(Bson::Array(items)) => items.clone(),
            Some(Bson::Null) | None => continue,
            Some(_) => {
                unwound.push(doc);
                continue;
            }
        };
        for item in items {
            let mut copy = doc.clone();
            copy.insert(field, item);
            unwound.push(copy);
        }
    }
    unwound
}
