//! Field type model for schema definitions
//!
//! A schema is an ordered set of named [`FieldDescriptor`]s. The shape of each
//! field (scalar, nested object, array, reference) is decided once, when the
//! descriptor is built, as a closed [`FieldKind`] variant.

use quarry_common::{QuarryError, Result};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Key field used when a reference does not name one
pub const DEFAULT_REFERENCE_KEY: &str = "_id";

/// Target of a reference field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Referenced collection name; `None` declares a bare identifier field
    pub target: Option<String>,
    /// Field on the referenced collection that the stored value matches
    pub key_field: String,
}

/// Kind of a field, with its nested shape where one applies
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Date,
    /// Embedded document with its own field set (possibly empty)
    Object(FieldSet),
    /// Homogeneous array; every element conforms to the item descriptor
    Array(Box<FieldDescriptor>),
    /// Identifier pointing at a document in another collection
    Reference(Reference),
}

impl FieldKind {
    /// The `bsonType` tag emitted into validator documents
    pub fn bson_type(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "bool",
            FieldKind::Date => "date",
            FieldKind::Object(_) => "object",
            FieldKind::Array(_) => "array",
            FieldKind::Reference(_) => "objectId",
        }
    }

    /// Human-readable name used in error messages
    pub fn type_name(&self) -> String {
        match self {
            FieldKind::Array(item) => format!("array<{}>", item.kind.type_name()),
            FieldKind::Reference(_) => "reference".to_string(),
            FieldKind::Boolean => "boolean".to_string(),
            other => other.bson_type().to_string(),
        }
    }
}

/// Descriptor for one field of a schema
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub kind: FieldKind,
    pub required: bool,
    pub unique: bool,
}

impl FieldDescriptor {
    /// Creates an optional, non-unique descriptor of the given kind
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: false,
            unique: false,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    pub fn number() -> Self {
        Self::new(FieldKind::Number)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn date() -> Self {
        Self::new(FieldKind::Date)
    }

    /// Nested object with the given child fields
    pub fn object(fields: FieldSet) -> Self {
        Self::new(FieldKind::Object(fields))
    }

    /// Array whose elements all follow `item`
    pub fn array(item: FieldDescriptor) -> Self {
        Self::new(FieldKind::Array(Box::new(item)))
    }

    /// Reference to `target`, matched on `_id`
    pub fn reference(target: impl Into<String>) -> Self {
        Self::new(FieldKind::Reference(Reference {
            target: Some(target.into()),
            key_field: DEFAULT_REFERENCE_KEY.to_string(),
        }))
    }

    /// Identifier field with no target collection
    pub fn object_id() -> Self {
        Self::new(FieldKind::Reference(Reference {
            target: None,
            key_field: DEFAULT_REFERENCE_KEY.to_string(),
        }))
    }

    /// Marks the field as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field as unique (single-field ascending unique index)
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the key field a reference matches on.
    ///
    /// Has no effect on non-reference kinds.
    pub fn key_field(mut self, key: impl Into<String>) -> Self {
        if let FieldKind::Reference(ref mut reference) = self.kind {
            reference.key_field = key.into();
        }
        self
    }

    /// The reference this field resolves through, if any.
    ///
    /// Returns the reference and whether the field holds an array of them.
    pub fn as_reference(&self) -> Option<(&Reference, bool)> {
        match &self.kind {
            FieldKind::Reference(reference) => Some((reference, false)),
            FieldKind::Array(item) => match &item.kind {
                FieldKind::Reference(reference) => Some((reference, true)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Parses one descriptor from its JSON notation
    pub fn from_json(path: &str, value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::Array(items) => {
                // The first element defines the item schema; later ones are ignored
                let first = items.first().ok_or_else(|| {
                    QuarryError::Definition(format!(
                        "array field '{}' needs an item descriptor",
                        path
                    ))
                })?;
                let item = Self::from_json(&format!("{}[]", path), first)?;
                Ok(Self::array(item))
            }
            JsonValue::Object(map) => match map.get("type") {
                Some(JsonValue::String(tag)) => Self::from_typed_json(path, tag, map),
                _ => Ok(Self::object(FieldSet::from_json_map(path, map)?)),
            },
            _ => Err(QuarryError::Definition(format!(
                "field '{}' must be a descriptor object or an array",
                path
            ))),
        }
    }

    fn from_typed_json(path: &str, tag: &str, map: &JsonMap<String, JsonValue>) -> Result<Self> {
        let mut descriptor = match tag {
            "string" => Self::string(),
            "number" => Self::number(),
            "bool" | "boolean" => Self::boolean(),
            "date" => Self::date(),
            "object" => match map.get("properties") {
                Some(JsonValue::Object(children)) => {
                    Self::object(FieldSet::from_json_map(path, children)?)
                }
                Some(_) => {
                    return Err(QuarryError::Definition(format!(
                        "field '{}': 'properties' must be an object",
                        path
                    )))
                }
                None => Self::object(FieldSet::new()),
            },
            "array" => {
                let items = map.get("items").ok_or_else(|| {
                    QuarryError::Definition(format!(
                        "array field '{}' needs an 'items' descriptor",
                        path
                    ))
                })?;
                Self::array(Self::from_json(&format!("{}[]", path), items)?)
            }
            "ref" | "objectId" => {
                let target = match map.get("ref") {
                    Some(JsonValue::String(target)) if !target.is_empty() => Some(target.clone()),
                    Some(_) => {
                        return Err(QuarryError::Definition(format!(
                            "reference field '{}': 'ref' must be a non-empty string",
                            path
                        )))
                    }
                    None if tag == "ref" => {
                        return Err(QuarryError::Definition(format!(
                            "reference field '{}' needs a 'ref' collection",
                            path
                        )))
                    }
                    None => None,
                };
                let key_field = match map.get("refField") {
                    Some(JsonValue::String(key)) if !key.is_empty() => key.clone(),
                    Some(_) => {
                        return Err(QuarryError::Definition(format!(
                            "reference field '{}': 'refField' must be a non-empty string",
                            path
                        )))
                    }
                    None => DEFAULT_REFERENCE_KEY.to_string(),
                };
                Self::new(FieldKind::Reference(Reference { target, key_field }))
            }
            other => {
                return Err(QuarryError::Definition(format!(
                    "field '{}' has unknown type '{}'",
                    path, other
                )))
            }
        };

        descriptor.required = json_flag(path, map, "required")?;
        descriptor.unique = json_flag(path, map, "unique")?;
        Ok(descriptor)
    }
}

fn json_flag(path: &str, map: &JsonMap<String, JsonValue>, key: &str) -> Result<bool> {
    match map.get(key) {
        None | Some(JsonValue::Null) => Ok(false),
        Some(JsonValue::Bool(flag)) => Ok(*flag),
        Some(_) => Err(QuarryError::Definition(format!(
            "field '{}': '{}' must be a boolean",
            path, key
        ))),
    }
}

/// Ordered mapping of field names to descriptors
///
/// Declaration order is preserved; it drives the order of the required-field
/// list and of the emitted validator properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet {
    entries: Vec<(String, FieldDescriptor)>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, builder style
    pub fn field(mut self, name: impl Into<String>, descriptor: FieldDescriptor) -> Self {
        self.insert(name, descriptor);
        self
    }

    /// Inserts a field. Replacing an existing name keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, descriptor: FieldDescriptor) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = descriptor,
            None => self.entries.push((name, descriptor)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, descriptor)| descriptor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldDescriptor)> {
        self.entries.iter().map(|(name, descriptor)| (name.as_str(), descriptor))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses a field set from its JSON notation.
    ///
    /// # Example
    ///
    /// ```
    /// use quarry_mongodb::FieldSet;
    ///
    /// let fields = FieldSet::from_json(&serde_json::json!({
    ///     "name": { "type": "string", "required": true },
    ///     "user": { "type": "ref", "ref": "users", "refField": "_id" },
    ///     "tags": [ { "type": "string" } ],
    /// })).unwrap();
    /// assert_eq!(fields.len(), 3);
    /// ```
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::Object(map) => Self::from_json_map("", map),
            _ => Err(QuarryError::Definition(
                "schema definition must be an object".to_string(),
            )),
        }
    }

    fn from_json_map(parent: &str, map: &JsonMap<String, JsonValue>) -> Result<Self> {
        let mut set = Self::new();
        for (name, value) in map {
            let path = if parent.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", parent, name)
            };
            set.insert(name.clone(), FieldDescriptor::from_json(&path, value)?);
        }
        Ok(set)
    }
}

impl<'a> IntoIterator for &'a FieldSet {
    type Item = &'a (String, FieldDescriptor);
    type IntoIter = std::slice::Iter<'a, (String, FieldDescriptor)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
