use crate::core::{Result, SyncError};
use crate::protocol::schema::{field_kind, validate_field_name};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One buffered top-level field.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    /// Sub-keys of a mergeable container; merged key by key.
    Container(Map<String, Value>),
    /// Any other value; the newest one replaces older ones.
    Replace(Value),
}

impl PatchValue {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Container(map) => Value::Object(map.clone()),
            Self::Replace(value) => value.clone(),
        }
    }
}

/// Unsaved edits for one character, keyed by top-level field.
///
/// Every field held here is the most recent value not yet confirmed saved.
///
/// # Examples
///
/// ```
/// use sheetsync::PendingPatch;
/// use serde_json::json;
///
/// let mut patch = PendingPatch::from_value(json!({ "identity": { "name": "Vex" } })).unwrap();
/// patch.merge(PendingPatch::from_value(json!({ "identity": { "race": "Elf" }, "level": 2 })).unwrap());
/// assert_eq!(
///     patch.to_value(),
///     json!({ "identity": { "name": "Vex", "race": "Elf" }, "level": 2 })
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingPatch {
    fields: BTreeMap<String, PatchValue>,
}

impl PendingPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a patch from a JSON object of top-level fields.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Err(SyncError::Validation(
                "patch must be a JSON object".to_string(),
            ));
        };

        let mut patch = Self::new();
        for (field, value) in fields {
            patch.insert(field, value)?;
        }
        Ok(patch)
    }

    /// Adds one field, merging with anything already buffered for it.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Result<()> {
        let field = field.into();
        validate_field_name(&field)?;

        let entry = if field_kind(&field).is_container() {
            match value {
                Value::Object(map) => PatchValue::Container(map),
                other => {
                    return Err(SyncError::Validation(format!(
                        "container field '{}' expects an object, got {}",
                        field,
                        json_type_name(&other)
                    )));
                }
            }
        } else {
            PatchValue::Replace(value)
        };

        self.merge_entry(field, entry);
        Ok(())
    }

    /// Folds `newer` into `self`; `newer` wins on every overlapping key.
    pub fn merge(&mut self, newer: PendingPatch) {
        for (field, entry) in newer.fields {
            self.merge_entry(field, entry);
        }
    }

    fn merge_entry(&mut self, field: String, entry: PatchValue) {
        match entry {
            PatchValue::Container(incoming) => match self.fields.get_mut(&field) {
                Some(PatchValue::Container(existing)) => existing.extend(incoming),
                _ => {
                    self.fields.insert(field, PatchValue::Container(incoming));
                }
            },
            replace => {
                self.fields.insert(field, replace);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn get(&self, field: &str) -> Option<&PatchValue> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PatchValue)> {
        self.fields.iter().map(|(field, entry)| (field.as_str(), entry))
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(field, entry)| (field.clone(), entry.to_value()))
                .collect(),
        )
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
