use crate::core::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A remote character as the protocol sees it.
///
/// `version` grows by exactly one per accepted write and is the only
/// conflict-detection signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedDocument {
    pub id: String,
    pub fields: Map<String, Value>,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl VersionedDocument {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>, version: u64) -> Self {
        Self {
            id: id.into(),
            fields,
            version,
            updated_at: None,
        }
    }

    /// Looks up a dot-addressed leaf such as `identity.name`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        segments.try_fold(self.fields.get(first)?, |current, segment| {
            current.as_object()?.get(segment)
        })
    }
}

/// Outcome of a version-checked write. Conflicts are data, never errors.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateResult {
    Success { new_version: u64 },
    Conflict { remote: VersionedDocument },
}

impl UpdateResult {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn new_version(&self) -> Option<u64> {
        match self {
            Self::Success { new_version } => Some(*new_version),
            Self::Conflict { .. } => None,
        }
    }

    /// For callers that treat a conflict as a failure.
    pub fn into_version(self, expected: u64) -> Result<u64> {
        match self {
            Self::Success { new_version } => Ok(new_version),
            Self::Conflict { remote } => Err(SyncError::VersionConflict {
                expected,
                actual: remote.version,
            }),
        }
    }
}

/// Dot-addressed leaf writes, e.g. `identity.name -> "Vex"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldPathPatch {
    paths: BTreeMap<String, Value>,
}

impl FieldPathPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: impl Into<String>, value: Value) {
        self.paths.insert(path.into(), value);
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.paths.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    /// Writes every leaf into `fields`, creating intermediate objects and
    /// leaving untouched siblings alone.
    pub fn apply_to(&self, fields: &mut Map<String, Value>) -> Result<()> {
        for (path, value) in &self.paths {
            let segments: Vec<&str> = path.split('.').collect();
            if segments.iter().any(|segment| segment.is_empty()) {
                return Err(SyncError::Validation(format!(
                    "malformed field path '{}'",
                    path
                )));
            }

            let (leaf, parents) = segments
                .split_last()
                .ok_or_else(|| SyncError::Validation("empty field path".to_string()))?;

            let mut target = &mut *fields;
            for segment in parents {
                let slot = target
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                target = slot.as_object_mut().ok_or_else(|| {
                    SyncError::Internal(format!("field path '{}' has no object parent", path))
                })?;
            }
            target.insert(leaf.to_string(), value.clone());
        }
        Ok(())
    }
}

impl FromIterator<(String, Value)> for FieldPathPatch {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}
