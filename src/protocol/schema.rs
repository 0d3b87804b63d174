//! Static description of the character document.
//!
//! Every top-level field resolves to one of three kinds at compile time:
//! mergeable containers (sub-keys merged, written as dot paths), collections
//! (arrays replaced wholesale after per-item normalisation) and opaque scalar
//! fields (replaced as-is).

use crate::core::{Result, SyncError};
use serde_json::{Map, Value};

/// Normalises one collection item into its stored shape.
pub type CollectionMapper = fn(&str, usize, &Value) -> Result<Value>;

#[derive(Clone, Copy)]
pub enum FieldKind {
    Container,
    Collection(CollectionMapper),
    Scalar,
}

impl FieldKind {
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container)
    }
}

struct FieldSpec {
    name: &'static str,
    kind: FieldKind,
}

static CHARACTER_FIELDS: &[FieldSpec] = &[
    FieldSpec { name: "identity", kind: FieldKind::Container },
    FieldSpec { name: "status", kind: FieldKind::Container },
    FieldSpec { name: "attributes", kind: FieldKind::Container },
    FieldSpec { name: "currency", kind: FieldKind::Container },
    FieldSpec { name: "attacks", kind: FieldKind::Collection(map_attack) },
    FieldSpec { name: "inventory", kind: FieldKind::Collection(map_inventory_item) },
    FieldSpec { name: "spells", kind: FieldKind::Collection(map_spell) },
];

/// Fields owned by the store; patches may not touch them.
pub const RESERVED_FIELDS: &[&str] = &["id", "version", "updated_at"];

pub fn field_kind(name: &str) -> FieldKind {
    CHARACTER_FIELDS
        .iter()
        .find(|entry| entry.name == name)
        .map(|entry| entry.kind)
        .unwrap_or(FieldKind::Scalar)
}

pub fn container_fields() -> impl Iterator<Item = &'static str> {
    CHARACTER_FIELDS
        .iter()
        .filter(|entry| entry.kind.is_container())
        .map(|entry| entry.name)
}

/// Rejects names that cannot be addressed as a single path segment.
pub fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::Validation("field name must not be empty".to_string()));
    }
    if name.contains('.') {
        return Err(SyncError::Validation(format!(
            "field name '{}' must not contain '.'",
            name
        )));
    }
    if RESERVED_FIELDS.contains(&name) {
        return Err(SyncError::Validation(format!(
            "field '{}' is managed by the store",
            name
        )));
    }
    Ok(())
}

fn item_object<'a>(field: &str, index: usize, item: &'a Value) -> Result<&'a Map<String, Value>> {
    item.as_object().ok_or_else(|| {
        SyncError::Validation(format!("{}[{}] must be an object", field, index))
    })
}

fn required_name(field: &str, index: usize, item: &Map<String, Value>) -> Result<Value> {
    match item.get("name").and_then(Value::as_str).map(str::trim) {
        Some(name) if !name.is_empty() => Ok(Value::String(name.to_string())),
        _ => Err(SyncError::Validation(format!(
            "{}[{}].name is required",
            field, index
        ))),
    }
}

fn integer_or(
    field: &str,
    index: usize,
    item: &Map<String, Value>,
    key: &str,
    default: i64,
) -> Result<i64> {
    match item.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value.as_i64().ok_or_else(|| {
            SyncError::Validation(format!("{}[{}].{} must be an integer", field, index, key))
        }),
    }
}

fn copy_id(item: &Map<String, Value>, out: &mut Map<String, Value>) {
    if let Some(id) = item.get("id").filter(|id| id.is_string()) {
        out.insert("id".to_string(), id.clone());
    }
}

fn map_attack(field: &str, index: usize, item: &Value) -> Result<Value> {
    let item = item_object(field, index, item)?;
    let mut out = Map::new();
    copy_id(item, &mut out);
    out.insert("name".to_string(), required_name(field, index, item)?);
    out.insert(
        "bonus".to_string(),
        Value::from(integer_or(field, index, item, "bonus", 0)?),
    );
    let damage = item.get("damage").and_then(Value::as_str).unwrap_or_default();
    out.insert("damage".to_string(), Value::from(damage));
    Ok(Value::Object(out))
}

fn map_inventory_item(field: &str, index: usize, item: &Value) -> Result<Value> {
    let item = item_object(field, index, item)?;
    let mut out = Map::new();
    copy_id(item, &mut out);
    out.insert("name".to_string(), required_name(field, index, item)?);

    let quantity = integer_or(field, index, item, "quantity", 1)?;
    if quantity < 0 {
        return Err(SyncError::Validation(format!(
            "{}[{}].quantity must not be negative",
            field, index
        )));
    }
    out.insert("quantity".to_string(), Value::from(quantity));

    let weight = item.get("weight").and_then(Value::as_f64).unwrap_or(0.0);
    out.insert("weight".to_string(), Value::from(weight));
    let equipped = item.get("equipped").and_then(Value::as_bool).unwrap_or(false);
    out.insert("equipped".to_string(), Value::from(equipped));
    Ok(Value::Object(out))
}

fn map_spell(field: &str, index: usize, item: &Value) -> Result<Value> {
    let item = item_object(field, index, item)?;
    let mut out = Map::new();
    copy_id(item, &mut out);
    out.insert("name".to_string(), required_name(field, index, item)?);

    let level = integer_or(field, index, item, "level", 0)?;
    if !(0..=9).contains(&level) {
        return Err(SyncError::Validation(format!(
            "{}[{}].level must be between 0 and 9",
            field, index
        )));
    }
    out.insert("level".to_string(), Value::from(level));
    let prepared = item.get("prepared").and_then(Value::as_bool).unwrap_or(false);
    out.insert("prepared".to_string(), Value::from(prepared));
    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_kinds() {
        assert!(field_kind("identity").is_container());
        assert!(field_kind("status").is_container());
        assert!(matches!(field_kind("inventory"), FieldKind::Collection(_)));
        assert!(matches!(field_kind("notes"), FieldKind::Scalar));
        assert_eq!(
            container_fields().collect::<Vec<_>>(),
            vec!["identity", "status", "attributes", "currency"]
        );
    }

    #[test]
    fn test_field_name_rules() {
        assert!(validate_field_name("notes").is_ok());
        assert!(validate_field_name("").is_err());
        assert!(validate_field_name("identity.name").is_err());
        assert!(validate_field_name("version").is_err());
    }

    #[test]
    fn test_inventory_item_defaults() {
        let mapped = map_inventory_item("inventory", 0, &json!({ "name": " Rope " })).unwrap();
        assert_eq!(
            mapped,
            json!({ "name": "Rope", "quantity": 1, "weight": 0.0, "equipped": false })
        );
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let err = map_attack("attacks", 2, &json!({ "bonus": 3 })).unwrap_err();
        assert_eq!(err, SyncError::Validation("attacks[2].name is required".into()));
    }

    #[test]
    fn test_spell_level_range() {
        assert!(map_spell("spells", 0, &json!({ "name": "Wish", "level": 9 })).is_ok());
        assert!(map_spell("spells", 0, &json!({ "name": "Wish", "level": 10 })).is_err());
    }

    #[test]
    fn test_id_is_preserved() {
        let mapped =
            map_attack("attacks", 0, &json!({ "id": "a1", "name": "Dagger", "damage": "1d4" }))
                .unwrap();
        assert_eq!(
            mapped,
            json!({ "id": "a1", "name": "Dagger", "bonus": 0, "damage": "1d4" })
        );
    }
}
