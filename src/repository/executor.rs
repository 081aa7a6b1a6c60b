use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::{
    postgres::{PgArguments, PgRow},
    query::Query,
    PgPool, Postgres,
};
use tracing::{debug, error};
use uuid::Uuid;

use crate::{
    materialize::{row_values, RowValues},
    query::{CompiledQuery, SqlValue},
    schema::ScalarType,
};

use super::interface::{Error, Result};

/// Session setting read by the store's point-in-time visibility rules
pub const AS_OF_SETTING: &str = "x.asof";

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value.clone() {
        SqlValue::Null(ty) => match ty {
            ScalarType::Uuid => query.bind(None::<Uuid>),
            ScalarType::Text => query.bind(None::<String>),
            ScalarType::Int => query.bind(None::<i32>),
            ScalarType::BigInt => query.bind(None::<i64>),
            ScalarType::Float => query.bind(None::<f64>),
            ScalarType::Bool => query.bind(None::<bool>),
            ScalarType::Timestamp => query.bind(None::<DateTime<Utc>>),
            ScalarType::Date => query.bind(None::<NaiveDate>),
            ScalarType::Json => query.bind(None::<Value>),
        },
        SqlValue::Uuid(v) => query.bind(v),
        SqlValue::Text(v) => query.bind(v),
        SqlValue::Int(v) => query.bind(v),
        SqlValue::BigInt(v) => query.bind(v),
        SqlValue::Float(v) => query.bind(v),
        SqlValue::Bool(v) => query.bind(v),
        SqlValue::Timestamp(v) => query.bind(v),
        SqlValue::Date(v) => query.bind(v),
        SqlValue::Json(v) => query.bind(v),
    }
}

fn prepare(compiled: &CompiledQuery) -> Query<'_, Postgres, PgArguments> {
    compiled
        .params
        .iter()
        .fold(sqlx::query(&compiled.sql), |query, (_, value)| {
            bind_value(query, value)
        })
}

/// Runs compiled statements against the pool. Failures are logged with the
/// statement and its parameters before being returned.
#[derive(Debug, Clone)]
pub struct DbExecutor {
    pool: PgPool,
}

impl DbExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn interpret_error(error: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref d) = error {
            // Reference: https://www.postgresql.org/docs/current/errcodes-appendix.html
            if let Some(code) = d.code() {
                if code == "23505" {
                    return Error::UniqueConstraintViolation(error);
                } else if code == "23503" {
                    return Error::FKConstraintViolation(error);
                }
            }
        }
        Error::SqlxError(error)
    }

    fn fail(compiled: &CompiledQuery, error: sqlx::Error) -> Error {
        error!(
            sql = %compiled.sql,
            params = %compiled.describe_params(),
            "Statement failed: {error}"
        );
        Self::interpret_error(error)
    }

    async fn fetch_rows(&self, compiled: &CompiledQuery) -> std::result::Result<Vec<PgRow>, sqlx::Error> {
        match compiled.as_of {
            Some(as_of) => {
                // The setting is transaction-local, so the read shares its transaction
                let mut tx = self.pool.begin().await?;
                sqlx::query("SELECT set_config($1, $2, true)")
                    .bind(AS_OF_SETTING)
                    .bind(as_of.to_rfc3339())
                    .execute(&mut *tx)
                    .await?;
                let rows = prepare(compiled).fetch_all(&mut *tx).await?;
                tx.commit().await?;
                Ok(rows)
            }
            None => prepare(compiled).fetch_all(&self.pool).await,
        }
    }

    pub async fn fetch(&self, compiled: &CompiledQuery) -> Result<Vec<RowValues>> {
        let rows = self
            .fetch_rows(compiled)
            .await
            .map_err(|e| Self::fail(compiled, e))?;
        debug!(sql = %compiled.sql, rows = rows.len(), "Fetched rows");

        rows.iter().map(row_values).collect()
    }

    /// Runs a write and returns the number of affected rows
    pub async fn execute(&self, compiled: &CompiledQuery) -> Result<u64> {
        let result = prepare(compiled)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::fail(compiled, e))?;
        debug!(
            sql = %compiled.sql,
            rows_affected = result.rows_affected(),
            "Executed statement"
        );
        Ok(result.rows_affected())
    }
}
