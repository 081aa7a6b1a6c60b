use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgRow, Column, Row, TypeInfo};
use uuid::Uuid;

use super::RowValues;
use crate::repository::{executor::DbExecutor, interface::Error};

fn unsupported(column: &str, type_name: &str, reason: impl std::fmt::Display) -> Error {
    Error::Materialization {
        entity: format!("column {column}"),
        reason: format!("cannot read Postgres type {type_name}: {reason}"),
    }
}

/// Decodes the column types with a fixed JSON mapping; `None` for any other type
fn decode_known(
    row: &PgRow,
    index: usize,
    type_name: &str,
) -> Option<Result<Option<Value>, sqlx::Error>> {
    Some(match type_name {
        "UUID" => row
            .try_get::<Option<Uuid>, _>(index)
            .map(|v| v.map(|v| Value::String(v.to_string()))),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row
            .try_get::<Option<String>, _>(index)
            .map(|v| v.map(Value::String)),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .map(|v| v.map(Value::from)),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .map(|v| v.map(Value::from)),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .map(|v| v.map(Value::from)),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .map(|v| v.map(|v| Value::from(f64::from(v)))),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .map(|v| v.map(Value::from)),
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .map(|v| v.map(Value::Bool)),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .map(|v| v.map(|v| Value::String(v.to_rfc3339()))),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map(|v| v.map(|v| Value::String(v.and_utc().to_rfc3339()))),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)
            .map(|v| v.map(|v| Value::String(v.to_string()))),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index),
        _ => return None,
    })
}

/// Decodes a Postgres row into column name/value pairs, by column type.
///
/// Types without a mapping are read as text when the driver accepts that;
/// otherwise the row fails rather than losing the value.
pub fn row_values(row: &PgRow) -> Result<RowValues, Error> {
    let mut values = Vec::with_capacity(row.columns().len());

    for column in row.columns() {
        let index = column.ordinal();
        let type_name = column.type_info().name();
        let value = match decode_known(row, index, type_name) {
            Some(decoded) => decoded.map_err(DbExecutor::interpret_error)?,
            None => row
                .try_get::<Option<String>, _>(index)
                .map_err(|e| unsupported(column.name(), type_name, e))?
                .map(Value::String),
        };

        values.push((column.name().to_string(), value.unwrap_or(Value::Null)));
    }

    Ok(values)
}
