use std::fmt::{self, Display};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::schema::ScalarType;

/// Looks up a serialized property, falling back to a case-insensitive match
pub(crate) fn property_value<'v>(values: &'v Value, property: &str) -> Option<&'v Value> {
    let object = values.as_object()?;
    object.get(property).or_else(|| {
        object
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(property))
            .map(|(_, v)| v)
    })
}

/// A value bound as a statement parameter.
///
/// `Null` keeps its column type so the parameter is sent to Postgres with the
/// right OID (an untyped text NULL can't be assigned to a UUID column).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null(ScalarType),
    Uuid(Uuid),
    Text(String),
    Int(i32),
    BigInt(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Json(Value),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Converts a serialized property into a parameter of the column's type.
    pub fn from_json(value: &Value, ty: ScalarType) -> Result<Self, String> {
        if value.is_null() {
            return Ok(SqlValue::Null(ty));
        }

        let mismatch = || format!("cannot convert {value} to {ty:?}");

        let converted = match ty {
            ScalarType::Uuid => SqlValue::Uuid(
                value
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(mismatch)?,
            ),
            ScalarType::Text => match value {
                Value::String(s) => SqlValue::Text(s.clone()),
                other => SqlValue::Text(other.to_string()),
            },
            ScalarType::Int => SqlValue::Int(
                value
                    .as_i64()
                    .and_then(|i| i32::try_from(i).ok())
                    .ok_or_else(mismatch)?,
            ),
            ScalarType::BigInt => SqlValue::BigInt(value.as_i64().ok_or_else(mismatch)?),
            ScalarType::Float => SqlValue::Float(value.as_f64().ok_or_else(mismatch)?),
            ScalarType::Bool => SqlValue::Bool(value.as_bool().ok_or_else(mismatch)?),
            ScalarType::Timestamp => SqlValue::Timestamp(
                value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|ts| ts.with_timezone(&Utc))
                    .ok_or_else(mismatch)?,
            ),
            ScalarType::Date => SqlValue::Date(
                value
                    .as_str()
                    .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                    .ok_or_else(mismatch)?,
            ),
            ScalarType::Json => SqlValue::Json(value.clone()),
        };

        Ok(converted)
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            SqlValue::Null(ty) => *ty,
            SqlValue::Uuid(_) => ScalarType::Uuid,
            SqlValue::Text(_) => ScalarType::Text,
            SqlValue::Int(_) => ScalarType::Int,
            SqlValue::BigInt(_) => ScalarType::BigInt,
            SqlValue::Float(_) => ScalarType::Float,
            SqlValue::Bool(_) => ScalarType::Bool,
            SqlValue::Timestamp(_) => ScalarType::Timestamp,
            SqlValue::Date(_) => ScalarType::Date,
            SqlValue::Json(_) => ScalarType::Json,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null(_) => Value::Null,
            SqlValue::Uuid(v) => Value::String(v.to_string()),
            SqlValue::Text(v) => Value::String(v.clone()),
            SqlValue::Int(v) => Value::from(*v),
            SqlValue::BigInt(v) => Value::from(*v),
            SqlValue::Float(v) => Value::from(*v),
            SqlValue::Bool(v) => Value::Bool(*v),
            SqlValue::Timestamp(v) => Value::String(v.to_rfc3339()),
            SqlValue::Date(v) => Value::String(v.to_string()),
            SqlValue::Json(v) => v.clone(),
        }
    }

    /// Converts a caller-supplied value (often text from a query string) to
    /// the type of the column it is compared with or assigned to.
    pub fn coerce(self, ty: ScalarType) -> Result<Self, String> {
        if self.scalar_type() == ty {
            return Ok(self);
        }

        match self {
            SqlValue::Null(_) => Ok(SqlValue::Null(ty)),
            SqlValue::Text(s) => {
                let value = match ty {
                    ScalarType::Int | ScalarType::BigInt | ScalarType::Float | ScalarType::Bool => {
                        serde_json::from_str(s.trim()).unwrap_or(Value::String(s))
                    }
                    _ => Value::String(s),
                };
                Self::from_json(&value, ty)
            }
            other => Self::from_json(&other.to_json(), ty),
        }
    }

    /// Text used inside a LIKE pattern
    pub fn pattern_text(&self) -> String {
        match self {
            SqlValue::Text(s) => s.clone(),
            SqlValue::Null(_) => String::new(),
            other => other.to_string(),
        }
    }
}

impl Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null(_) => write!(f, "NULL"),
            SqlValue::Uuid(v) => write!(f, "{v}"),
            SqlValue::Text(v) => write!(f, "{v:?}"),
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::BigInt(v) => write!(f, "{v}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Bool(v) => write!(f, "{v}"),
            SqlValue::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            SqlValue::Date(v) => write!(f, "{v}"),
            SqlValue::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        SqlValue::Uuid(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::BigInt(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        SqlValue::Date(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_from_json_scalars() {
        let id = Uuid::new_v4();
        assert_eq!(
            SqlValue::from_json(&json!(id.to_string()), ScalarType::Uuid).unwrap(),
            SqlValue::Uuid(id)
        );
        assert_eq!(
            SqlValue::from_json(&json!(42), ScalarType::Int).unwrap(),
            SqlValue::Int(42)
        );
        assert_eq!(
            SqlValue::from_json(&json!("2024-02-29"), ScalarType::Date).unwrap(),
            SqlValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(
            SqlValue::from_json(&Value::Null, ScalarType::Text).unwrap(),
            SqlValue::Null(ScalarType::Text)
        );
    }

    #[test]
    fn test_from_json_timestamp_normalizes_to_utc() {
        let value =
            SqlValue::from_json(&json!("2024-01-01T12:00:00+02:00"), ScalarType::Timestamp)
                .unwrap();
        assert_eq!(value.to_string(), "2024-01-01T10:00:00+00:00");
    }

    #[test]
    fn test_coerce_text_to_column_type() {
        let id = Uuid::new_v4();
        assert_eq!(
            SqlValue::from(id.to_string()).coerce(ScalarType::Uuid).unwrap(),
            SqlValue::Uuid(id)
        );
        assert_eq!(
            SqlValue::from("17").coerce(ScalarType::Int).unwrap(),
            SqlValue::Int(17)
        );
        assert_eq!(
            SqlValue::from("true").coerce(ScalarType::Bool).unwrap(),
            SqlValue::Bool(true)
        );
        assert_eq!(
            SqlValue::Int(3).coerce(ScalarType::BigInt).unwrap(),
            SqlValue::BigInt(3)
        );
        assert_eq!(
            SqlValue::Null(ScalarType::Text)
                .coerce(ScalarType::Uuid)
                .unwrap(),
            SqlValue::Null(ScalarType::Uuid)
        );
        assert!(SqlValue::from("abc").coerce(ScalarType::Int).is_err());
    }

    #[test]
    fn test_from_json_mismatch() {
        assert!(SqlValue::from_json(&json!("not-a-uuid"), ScalarType::Uuid).is_err());
        assert!(SqlValue::from_json(&json!(i64::MAX), ScalarType::Int).is_err());
        assert!(SqlValue::from_json(&json!("yes"), ScalarType::Bool).is_err());
    }
}
