//! Field mutations for partial document updates.
//!
//! An update is a list of field mutations applied in order. The set-add and
//! set-remove primitives make membership toggles commutative on the remote
//! side: two clients adding different ids never overwrite each other.

use crate::document::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single change to one field of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FieldMutation {
    /// Replace the field value
    Set { field: String, value: Value },
    /// Remove the field
    Delete { field: String },
    /// Append each value not already present in the array
    ArrayUnion { field: String, values: Vec<Value> },
    /// Remove every element equal to one of the values
    ArrayRemove { field: String, values: Vec<Value> },
}

impl FieldMutation {
    pub fn set(field: impl Into<String>, value: Value) -> Self {
        FieldMutation::Set {
            field: field.into(),
            value,
        }
    }

    pub fn delete(field: impl Into<String>) -> Self {
        FieldMutation::Delete {
            field: field.into(),
        }
    }

    pub fn array_union(field: impl Into<String>, values: Vec<Value>) -> Self {
        FieldMutation::ArrayUnion {
            field: field.into(),
            values,
        }
    }

    pub fn array_remove(field: impl Into<String>, values: Vec<Value>) -> Self {
        FieldMutation::ArrayRemove {
            field: field.into(),
            values,
        }
    }

    /// Name of the field this mutation touches.
    pub fn field(&self) -> &str {
        match self {
            FieldMutation::Set { field, .. }
            | FieldMutation::Delete { field }
            | FieldMutation::ArrayUnion { field, .. }
            | FieldMutation::ArrayRemove { field, .. } => field,
        }
    }

    /// Apply the mutation to a field map.
    ///
    /// A missing or non-array field is treated as an empty array by the
    /// array primitives.
    pub fn apply(&self, fields: &mut Fields) {
        match self {
            FieldMutation::Set { field, value } => {
                fields.insert(field.clone(), value.clone());
            }
            FieldMutation::Delete { field } => {
                fields.remove(field);
            }
            FieldMutation::ArrayUnion { field, values } => {
                let mut current = take_array(fields, field);
                for value in values {
                    if !current.contains(value) {
                        current.push(value.clone());
                    }
                }
                fields.insert(field.clone(), Value::Array(current));
            }
            FieldMutation::ArrayRemove { field, values } => {
                let mut current = take_array(fields, field);
                current.retain(|v| !values.contains(v));
                fields.insert(field.clone(), Value::Array(current));
            }
        }
    }
}

/// Apply a batch of mutations in order.
pub fn apply_all(fields: &mut Fields, mutations: &[FieldMutation]) {
    for mutation in mutations {
        mutation.apply(fields);
    }
}

fn take_array(fields: &mut Fields, field: &str) -> Vec<Value> {
    match fields.remove(field) {
        Some(Value::Array(values)) => values,
        _ => Vec::new(),
    }
}
