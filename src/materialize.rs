//! Hydrates result rows into records.
//!
//! Rows are first decoded into [`RowValues`] (column name + JSON value), then
//! assembled into a JSON object shaped like the target record and handed to
//! serde. Column names resolve through a per-type [`PropertyMap`]:
//!
//! * `name` matches a scalar property (case-insensitive)
//! * `area_name` matches property `name` of the nested record `area`
//! * `packages` matches a list property and carries a JSON array payload

use std::{any::TypeId, collections::HashMap, sync::Arc};

use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::repository::interface::Error;
use crate::schema::{Field, FieldKind, Record, ScalarType, ID_PROPERTY};

mod pg;

pub use pg::row_values;

/// Column values of one result row, in result order
pub type RowValues = Vec<(String, Value)>;

#[derive(Debug, Clone, Copy)]
enum Slot {
    Scalar {
        property: &'static str,
        ty: ScalarType,
        nullable: bool,
    },
    Nested {
        parent: &'static str,
        property: &'static str,
        ty: ScalarType,
        nullable: bool,
    },
    List {
        property: &'static str,
        element: fn() -> Vec<Field>,
    },
}

/// Lower-cased column name to the property it fills
#[derive(Debug)]
pub struct PropertyMap {
    slots: HashMap<String, Slot>,
    /// Nested properties and whether their record has an id
    nested: Vec<(&'static str, bool)>,
    lists: Vec<&'static str>,
}

impl PropertyMap {
    fn build(fields: Vec<Field>) -> Self {
        let mut slots = HashMap::new();
        let mut nested = vec![];
        let mut lists = vec![];

        for field in fields {
            match field.kind {
                FieldKind::Scalar { ty, nullable } => {
                    slots.insert(
                        field.name.to_lowercase(),
                        Slot::Scalar {
                            property: field.name,
                            ty,
                            nullable,
                        },
                    );
                }
                FieldKind::Nested(inner) => {
                    let inner = inner();
                    nested.push((
                        field.name,
                        inner.iter().any(|f| f.name.eq_ignore_ascii_case(ID_PROPERTY)),
                    ));
                    for sub in inner {
                        if let FieldKind::Scalar { ty, nullable } = sub.kind {
                            slots.insert(
                                format!("{}_{}", field.name, sub.name).to_lowercase(),
                                Slot::Nested {
                                    parent: field.name,
                                    property: sub.name,
                                    ty,
                                    nullable,
                                },
                            );
                        }
                    }
                }
                FieldKind::List(element) => {
                    lists.push(field.name);
                    slots.insert(
                        field.name.to_lowercase(),
                        Slot::List {
                            property: field.name,
                            element,
                        },
                    );
                }
            }
        }

        Self {
            slots,
            nested,
            lists,
        }
    }

    fn slot(&self, column: &str) -> Option<&Slot> {
        self.slots.get(&column.to_lowercase())
    }
}

/// Coerces a decoded column value to what serde expects for the property.
pub(crate) fn coerce(value: Value, ty: ScalarType, nullable: bool) -> Result<Value, String> {
    let mismatch = |v: &Value| format!("cannot read {v} as {ty:?}");

    Ok(match (ty, value) {
        (_, Value::Null) => Value::Null,
        (ScalarType::Uuid, Value::String(s)) => {
            let trimmed = s.trim();
            let nil = Uuid::parse_str(trimmed).map_or(false, |id| id.is_nil());
            if nullable && (trimmed.is_empty() || nil) {
                Value::Null
            } else {
                let id = Uuid::parse_str(trimmed).map_err(|_| mismatch(&Value::String(s.clone())))?;
                Value::String(id.to_string())
            }
        }
        (ScalarType::Int | ScalarType::BigInt, Value::String(s)) => Value::from(
            s.trim()
                .parse::<i64>()
                .map_err(|_| mismatch(&Value::String(s.clone())))?,
        ),
        (ScalarType::Int | ScalarType::BigInt, Value::Bool(b)) => Value::from(i64::from(b)),
        (ScalarType::Float, Value::String(s)) => Value::from(
            s.trim()
                .parse::<f64>()
                .map_err(|_| mismatch(&Value::String(s.clone())))?,
        ),
        (ScalarType::Bool, Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" => Value::Bool(true),
            "false" | "f" | "0" => Value::Bool(false),
            _ => return Err(mismatch(&Value::String(s))),
        },
        (ScalarType::Bool, Value::Number(n)) => Value::Bool(n.as_f64().map_or(false, |n| n != 0.0)),
        (ScalarType::Text, Value::String(s)) => Value::String(s),
        (ScalarType::Text, other) => Value::String(other.to_string()),
        (ScalarType::Json, Value::String(s)) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        (_, other) => other,
    })
}

/// Parses a JSON-aggregated list payload into an array of objects keyed by
/// the element record's property names.
fn list_payload(value: Value, element: fn() -> Vec<Field>) -> Result<Value, String> {
    let items = match value {
        Value::Null => return Ok(Value::Array(vec![])),
        Value::String(s) if s.trim().is_empty() || s.trim() == "[]" => {
            return Ok(Value::Array(vec![]))
        }
        Value::String(s) => match serde_json::from_str(&s) {
            Ok(Value::Array(items)) => items,
            Ok(other) => return Err(format!("expected a JSON array, got {other}")),
            Err(e) => return Err(e.to_string()),
        },
        Value::Array(items) => items,
        other => return Err(format!("expected a JSON array, got {other}")),
    };

    let fields = element();
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(object) => {
                let mut normalized = Map::new();
                for (key, value) in object {
                    match fields.iter().find(|f| f.name.eq_ignore_ascii_case(&key)) {
                        Some(Field {
                            name,
                            kind: FieldKind::Scalar { ty, nullable },
                        }) => {
                            normalized.insert(name.to_string(), coerce(value, *ty, *nullable)?);
                        }
                        Some(field) => {
                            normalized.insert(field.name.to_string(), value);
                        }
                        None => {}
                    }
                }
                Ok(Value::Object(normalized))
            }
            other => Err(format!("expected a JSON object, got {other}")),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

fn is_absent_id(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => Uuid::parse_str(s.trim()).map_or(false, |id| id.is_nil()),
        _ => false,
    }
}

/// Turns rows into records, caching one [`PropertyMap`] per target type.
#[derive(Debug, Default)]
pub struct Materializer {
    maps: DashMap<TypeId, Arc<PropertyMap>>,
}

impl Materializer {
    pub fn new() -> Self {
        Self::default()
    }

    fn property_map<T: Record>(&self) -> Arc<PropertyMap> {
        self.maps
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                debug!("Building property map for {}", T::NAME);
                Arc::new(PropertyMap::build(T::fields()))
            })
            .clone()
    }

    /// Builds the property map of `T` ahead of the first query
    pub fn preload<T: Record>(&self) {
        self.property_map::<T>();
    }

    pub fn materialize<T: Record>(&self, row: RowValues) -> Result<T, Error> {
        let map = self.property_map::<T>();
        let fail = |reason: String| Error::Materialization {
            entity: T::NAME.to_string(),
            reason,
        };

        let mut object = Map::new();
        for (column, value) in row {
            // Helper columns (row numbers, totals) have no slot
            let Some(slot) = map.slot(&column) else {
                continue;
            };

            match *slot {
                Slot::Scalar {
                    property,
                    ty,
                    nullable,
                } => {
                    let value = coerce(value, ty, nullable)
                        .map_err(|e| fail(format!("column {column}: {e}")))?;
                    object.insert(property.to_string(), value);
                }
                Slot::Nested {
                    parent,
                    property,
                    ty,
                    nullable,
                } => {
                    let value = coerce(value, ty, nullable)
                        .map_err(|e| fail(format!("column {column}: {e}")))?;
                    let nested = object
                        .entry(parent.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(nested) = nested {
                        nested.insert(property.to_string(), value);
                    }
                }
                Slot::List { property, element } => {
                    let value = list_payload(value, element)
                        .map_err(|e| fail(format!("column {column}: {e}")))?;
                    object.insert(property.to_string(), value);
                }
            }
        }

        // A list the query didn't project is empty
        for list in &map.lists {
            object
                .entry(list.to_string())
                .or_insert_with(|| Value::Array(vec![]));
        }

        // An outer join that matched nothing yields a nested record with a
        // null or nil id
        for (parent, has_id) in &map.nested {
            if !has_id {
                continue;
            }
            let missing_id = match object.get(*parent) {
                Some(Value::Object(nested)) => nested
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(ID_PROPERTY))
                    .map_or(true, |(_, v)| is_absent_id(v)),
                _ => false,
            };
            if missing_id {
                object.insert(parent.to_string(), Value::Null);
            }
        }

        serde_json::from_value(Value::Object(object)).map_err(|e| fail(e.to_string()))
    }

    pub fn materialize_all<T: Record>(&self, rows: Vec<RowValues>) -> Result<Vec<T>, Error> {
        rows.into_iter().map(|row| self.materialize(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::testutils::{ExtArea, ExtPackage, Package};

    use super::*;

    fn row(values: &[(&str, Value)]) -> RowValues {
        values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_materialize_scalars_case_insensitive() {
        let materializer = Materializer::new();
        let id = Uuid::new_v4();
        let area_id = Uuid::new_v4();

        let package: Package = materializer
            .materialize(row(&[
                ("ID", json!(id.to_string())),
                ("Name", json!("Core")),
                ("areaid", json!(area_id.to_string())),
                ("_rownum", json!(1)),
            ]))
            .unwrap();

        assert_eq!(
            package,
            Package {
                id,
                name: "Core".to_string(),
                description: None,
                area_id: Some(area_id),
            }
        );
    }

    #[test]
    fn test_nested_record_is_hydrated() {
        let materializer = Materializer::new();
        let id = Uuid::new_v4();
        let area_id = Uuid::new_v4();

        let package: ExtPackage = materializer
            .materialize(row(&[
                ("id", json!(id.to_string())),
                ("name", json!("Core")),
                ("description", Value::Null),
                ("areaId", json!(area_id.to_string())),
                ("area_id", json!(area_id.to_string())),
                ("area_name", json!("Nord")),
            ]))
            .unwrap();

        let area = package.area.unwrap();
        assert_eq!(area.id, area_id);
        assert_eq!(area.name, "Nord");
    }

    #[test]
    fn test_nested_record_without_id_is_null() {
        let materializer = Materializer::new();

        // Outer join with no match: every joined column is null
        let package: ExtPackage = materializer
            .materialize(row(&[
                ("id", json!(Uuid::new_v4().to_string())),
                ("name", json!("Orphan")),
                ("areaId", Value::Null),
                ("area_id", Value::Null),
                ("area_name", Value::Null),
            ]))
            .unwrap();

        assert_eq!(package.area, None);
        assert_eq!(package.area_id, None);
    }

    #[test]
    fn test_nullable_uuid_empty_or_nil_is_null() {
        let materializer = Materializer::new();

        for empty in [json!(""), json!(Uuid::nil().to_string())] {
            let package: Package = materializer
                .materialize(row(&[
                    ("id", json!(Uuid::new_v4().to_string())),
                    ("name", json!("Core")),
                    ("areaId", empty),
                ]))
                .unwrap();
            assert_eq!(package.area_id, None);
        }
    }

    #[test]
    fn test_list_payloads() {
        let materializer = Materializer::new();
        let area_id = Uuid::new_v4();
        let package_id = Uuid::new_v4();

        let area: ExtArea = materializer
            .materialize(row(&[
                ("id", json!(area_id.to_string())),
                ("name", json!("Nord")),
                (
                    "packages",
                    json!([{"ID": package_id.to_string(), "name": "Core", "areaId": area_id.to_string()}]),
                ),
            ]))
            .unwrap();
        assert_eq!(area.packages.len(), 1);
        assert_eq!(area.packages[0].id, package_id);
        assert_eq!(area.packages[0].area_id, Some(area_id));

        for empty in [json!("[]"), Value::Null, json!([])] {
            let area: ExtArea = materializer
                .materialize(row(&[
                    ("id", json!(area_id.to_string())),
                    ("name", json!("Nord")),
                    ("packages", empty),
                ]))
                .unwrap();
            assert!(area.packages.is_empty());
        }

        // Text payloads are parsed too
        let area: ExtArea = materializer
            .materialize(row(&[
                ("id", json!(area_id.to_string())),
                ("name", json!("Nord")),
                (
                    "packages",
                    json!(format!(r#"[{{"id": "{package_id}", "name": "Core"}}]"#)),
                ),
            ]))
            .unwrap();
        assert_eq!(area.packages[0].name, "Core");
    }

    #[test]
    fn test_missing_list_column_is_empty() {
        let materializer = Materializer::new();

        let area: ExtArea = materializer
            .materialize(row(&[
                ("id", json!(Uuid::new_v4().to_string())),
                ("name", json!("Nord")),
            ]))
            .unwrap();
        assert!(area.packages.is_empty());
    }

    #[test]
    fn test_nested_record_with_nil_id_is_null() {
        let materializer = Materializer::new();

        let package: ExtPackage = materializer
            .materialize(row(&[
                ("id", json!(Uuid::new_v4().to_string())),
                ("name", json!("Orphan")),
                ("areaId", Value::Null),
                ("area_id", json!(Uuid::nil().to_string())),
                ("area_name", json!("")),
            ]))
            .unwrap();

        assert_eq!(package.area, None);
    }

    #[test]
    fn test_coercions() {
        assert_eq!(coerce(json!("42"), ScalarType::Int, false).unwrap(), json!(42));
        assert_eq!(coerce(json!("t"), ScalarType::Bool, false).unwrap(), json!(true));
        assert_eq!(coerce(json!(0), ScalarType::Bool, false).unwrap(), json!(false));
        assert_eq!(coerce(json!(1.5), ScalarType::Text, false).unwrap(), json!("1.5"));
        assert!(coerce(json!("nope"), ScalarType::Uuid, false).is_err());
        // A nil id stays a value on non-nullable columns
        assert_eq!(
            coerce(json!(Uuid::nil().to_string()), ScalarType::Uuid, false).unwrap(),
            json!(Uuid::nil().to_string())
        );
    }

    #[test]
    fn test_preload_caches_map() {
        let materializer = Materializer::new();
        materializer.preload::<ExtPackage>();
        materializer.preload::<ExtPackage>();
        assert_eq!(materializer.maps.len(), 1);
    }
}
