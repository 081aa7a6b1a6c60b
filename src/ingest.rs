use std::time::Duration;

use itertools::Itertools;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};

use crate::{
    context::DbContext,
    query::property_value,
    repository::{executor::DbExecutor, Error, Result},
    schema::{Definition, Entity, Ident, TableRef},
};

mod copy;

pub use copy::{encode_field, CopyEncoder, WireType};

// Flush the COPY buffer to the server once it grows past this
const FLUSH_THRESHOLD: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    /// Rows between progress reports
    pub batch_size: usize,
    pub timeout: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: 10000,
            timeout: Duration::from_secs(600),
        }
    }
}

/// A column as the live table reports it
#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub column_name: String,
    pub udt_name: String,
    pub is_nullable: String,
}

impl LiveColumn {
    pub fn nullable(&self) -> bool {
        self.is_nullable.eq_ignore_ascii_case("YES")
    }
}

/// Reads the current column list of a table, in ordinal order
pub async fn probe_columns(pool: &PgPool, table: &TableRef) -> Result<Vec<LiveColumn>> {
    sqlx::query_as(
        r#"SELECT column_name::text AS column_name, udt_name::text AS udt_name,
        is_nullable::text AS is_nullable
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2
        ORDER BY ordinal_position"#,
    )
    .bind(table.schema.as_str())
    .bind(table.table.as_str())
    .fetch_all(pool)
    .await
    .map_err(DbExecutor::interpret_error)
}

/// A column both the live table and the definition know about
#[derive(Debug, Clone, PartialEq)]
pub struct TransferColumn {
    pub name: Ident,
    pub property: &'static str,
    pub wire: WireType,
    pub nullable: bool,
}

/// Intersects the live columns with the definition's, keeping the live order.
/// Live columns without a definition counterpart are left to their defaults.
pub fn transfer_columns(definition: &Definition, live: &[LiveColumn]) -> Vec<TransferColumn> {
    live.iter()
        .filter_map(|column| {
            let declared = definition
                .columns
                .iter()
                .find(|c| c.name.as_str().eq_ignore_ascii_case(&column.column_name))?;

            let wire = WireType::from_udt_name(&column.udt_name).unwrap_or_else(|| {
                warn!(
                    entity = definition.entity,
                    column = %column.column_name,
                    "No binary encoder for type {}, sending text",
                    column.udt_name
                );
                WireType::Text
            });

            Some(TransferColumn {
                name: declared.name.clone(),
                property: declared.property,
                wire,
                nullable: column.nullable(),
            })
        })
        .collect()
}

fn copy_statement(table: &TableRef, columns: &[TransferColumn]) -> String {
    format!(
        "COPY {table} ({}) FROM STDIN WITH (FORMAT binary)",
        columns.iter().map(|c| c.name.to_string()).join(", ")
    )
}

/// Streams a batch of entities into the base table with binary COPY.
///
/// A field that can't be encoded is sent as NULL with a warning. If the column
/// doesn't accept NULL the whole transfer is aborted; rows already streamed
/// are discarded by the server along with it.
pub struct BulkImporter<'a> {
    context: &'a DbContext,
}

impl<'a> BulkImporter<'a> {
    pub fn new(context: &'a DbContext) -> Self {
        Self { context }
    }

    pub async fn ingest<T: Entity>(&self, definition: &Definition, entities: &[T]) -> Result<u64> {
        let timeout = self.context.ingest.timeout;
        tokio::time::timeout(timeout, self.run(definition, entities))
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }

    async fn run<T: Entity>(&self, definition: &Definition, entities: &[T]) -> Result<u64> {
        if entities.is_empty() {
            return Ok(0);
        }

        let table = definition.base_table(false);
        let live = probe_columns(self.context.pool(), &table).await?;
        let columns = transfer_columns(definition, &live);
        if columns.is_empty() {
            return Err(Error::Ingest {
                entity: definition.entity.to_string(),
                column: table.to_string(),
                reason: "no live column matches the definition".to_string(),
            });
        }

        let statement = copy_statement(&table, &columns);
        let batch_size = self.context.ingest.batch_size.max(1);

        let mut conn = self
            .context
            .pool()
            .acquire()
            .await
            .map_err(DbExecutor::interpret_error)?;
        let mut copy = conn
            .copy_in_raw(&statement)
            .await
            .map_err(DbExecutor::interpret_error)?;

        let mut encoder = CopyEncoder::new();
        let mut written = 0u64;

        for entity in entities {
            let values = serde_json::to_value(entity)?;
            encoder.start_row(columns.len());

            for column in &columns {
                let value = property_value(&values, column.property).unwrap_or(&Value::Null);
                match encode_field(value, column.wire) {
                    Ok(field) => encoder.write(field.as_deref()),
                    Err(reason) => {
                        warn!(
                            entity = definition.entity,
                            column = column.name.as_str(),
                            "Failed to write field, writing null instead: {reason}"
                        );
                        if !column.nullable {
                            let error = Error::Ingest {
                                entity: definition.entity.to_string(),
                                column: column.name.as_str().to_string(),
                                reason: format!("{reason}; column doesn't accept null"),
                            };
                            copy.abort(error.to_string())
                                .await
                                .map_err(DbExecutor::interpret_error)?;
                            return Err(error);
                        }
                        encoder.write_null();
                    }
                }
            }

            written += 1;
            if encoder.len() >= FLUSH_THRESHOLD {
                copy.send(encoder.take())
                    .await
                    .map_err(DbExecutor::interpret_error)?;
            }
            if written % batch_size as u64 == 0 {
                info!(entity = definition.entity, rows = written, "Ingest progress");
            }
        }

        encoder.finish();
        copy.send(encoder.take())
            .await
            .map_err(DbExecutor::interpret_error)?;
        let rows = copy.finish().await.map_err(DbExecutor::interpret_error)?;

        info!(entity = definition.entity, rows, "Ingest complete");
        Ok(rows)
    }
}
