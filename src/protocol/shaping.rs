use super::document::FieldPathPatch;
use super::schema::{FieldKind, field_kind};
use crate::autosave::patch::{PatchValue, PendingPatch, json_type_name};
use crate::core::{Result, SyncError};
use serde_json::Value;

/// Turns a partial update into the smallest field-path write.
///
/// - container sub-keys become `container.leaf` paths
/// - collections are normalised item by item and replace the stored array
/// - everything else is written as-is
pub fn shape_payload(updates: &PendingPatch) -> Result<FieldPathPatch> {
    let mut payload = FieldPathPatch::new();

    for (field, entry) in updates.iter() {
        match (field_kind(field), entry) {
            (FieldKind::Container, PatchValue::Container(leaves)) => {
                for (leaf, value) in leaves {
                    if leaf.is_empty() || leaf.contains('.') {
                        return Err(SyncError::Validation(format!(
                            "invalid key '{}' in container '{}'",
                            leaf, field
                        )));
                    }
                    payload.set(format!("{}.{}", field, leaf), value.clone());
                }
            }
            (FieldKind::Collection(mapper), PatchValue::Replace(Value::Array(items))) => {
                let mapped = items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| mapper(field, index, item))
                    .collect::<Result<Vec<_>>>()?;
                payload.set(field, Value::Array(mapped));
            }
            (FieldKind::Collection(_), PatchValue::Replace(other)) => {
                return Err(SyncError::Validation(format!(
                    "collection '{}' expects an array, got {}",
                    field,
                    json_type_name(other)
                )));
            }
            (FieldKind::Scalar, PatchValue::Replace(value)) => {
                payload.set(field, value.clone());
            }
            (_, entry) => {
                return Err(SyncError::Validation(format!(
                    "field '{}' cannot hold {}",
                    field,
                    json_type_name(&entry.to_value())
                )));
            }
        }
    }

    Ok(payload)
}
