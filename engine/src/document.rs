//! Document types for collection items.

use crate::{error::Result, CollectionPath, DocumentId, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Field map of a document. All fields are optional and untyped from the
/// engine's point of view.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Address of a single document in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    pub collection: CollectionPath,
    pub id: DocumentId,
}

impl DocumentRef {
    pub fn new(collection: impl Into<CollectionPath>, id: impl Into<DocumentId>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// How `set_document` treats fields already present on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Replace the whole document
    #[default]
    Overwrite,
    /// Write only the given fields, keep the rest
    Merge,
}

impl WriteMode {
    /// Write `fields` over `current`.
    pub fn apply(self, current: &mut Fields, fields: Fields) {
        match self {
            WriteMode::Overwrite => *current = fields,
            WriteMode::Merge => current.extend(fields),
        }
    }
}

/// One item of a synchronized collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Identifier assigned by the remote store
    pub id: DocumentId,
    /// Field values
    #[serde(default)]
    pub fields: Fields,
}

impl Document {
    /// Create a document. Non-object values produce an empty field map.
    pub fn new(id: impl Into<DocumentId>, fields: serde_json::Value) -> Self {
        let fields = match fields {
            serde_json::Value::Object(map) => map,
            _ => Fields::new(),
        };
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }

    /// Get a string field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }

    /// Read a field holding an array of strings as a set.
    ///
    /// A missing or null field is an empty set. Any other shape, or an array
    /// holding a non-string element, is rejected.
    pub fn string_set(&self, field: &str) -> Result<BTreeSet<String>> {
        match self.fields.get(field) {
            None | Some(serde_json::Value::Null) => Ok(BTreeSet::new()),
            Some(serde_json::Value::Array(values)) => values
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_owned).ok_or_else(|| {
                        Error::InvalidDocument(format!(
                            "{}: field '{}' holds a non-string element",
                            self.id, field
                        ))
                    })
                })
                .collect(),
            Some(_) => Err(Error::InvalidDocument(format!(
                "{}: field '{}' is not an array",
                self.id, field
            ))),
        }
    }
}

/// Union of the string arrays stored under `field` across `documents`.
///
/// Documents whose field has the wrong shape are skipped.
pub fn union_string_sets<'a, I>(documents: I, field: &str) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a Document>,
{
    documents
        .into_iter()
        .filter_map(|doc| doc.string_set(field).ok())
        .flatten()
        .collect()
}
