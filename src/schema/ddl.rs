//! DDL for the tables a registry describes.
//!
//! Each entity gets a table in the base schema and, when enabled, a
//! translation table and history copies. Foreign keys are added once every
//! table exists, so the statements don't depend on registration order.

use itertools::Itertools;

use super::{
    ColumnDefinition, Definition, DefinitionError, DefinitionRegistry, SchemaNames, TableRef,
    LANGUAGE_COLUMN,
};

/// Constraint names may contain `-` (`UC_Package_name-areaId`), so they are
/// quoted without going through `Ident`. Their parts are validated names.
fn quote_name(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_sql(column: &ColumnDefinition, force_nullable: bool) -> String {
    let mut sql = format!("{} {}", column.name, column.ty.sql_type(column.length));
    if !column.nullable && !force_nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        sql.push_str(&format!(" DEFAULT {}", default.to_sql()));
    }
    sql
}

fn storage_columns(
    definition: &Definition,
    properties: &[&'static str],
) -> Result<String, DefinitionError> {
    Ok(properties
        .iter()
        .map(|p| definition.require_column(p).map(|c| c.name.to_string()))
        .collect::<Result<Vec<_>, _>>()?
        .join(", "))
}

pub fn create_schemas(schemas: &SchemaNames) -> Vec<String> {
    schemas
        .all()
        .iter()
        .unique()
        .map(|schema| format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
        .collect()
}

fn create_table(
    table: &TableRef,
    columns: &[String],
    constraints: &[String],
) -> String {
    let body = columns.iter().chain(constraints.iter()).join(",\n    ");
    format!("CREATE TABLE IF NOT EXISTS {table} (\n    {body}\n)")
}

/// Tables of a single definition, without foreign keys.
pub fn create_tables(definition: &Definition) -> Result<Vec<String>, DefinitionError> {
    let id = definition.id_column()?;
    let mut statements = vec![];

    let columns = definition
        .columns
        .iter()
        .map(|c| column_sql(c, false))
        .collect::<Vec<_>>();
    let constraints = definition
        .constraints
        .iter()
        .map(|c| {
            let kind = if c.name.starts_with("PK_") {
                "PRIMARY KEY"
            } else {
                "UNIQUE"
            };
            Ok(format!(
                "CONSTRAINT {} {kind} ({})",
                quote_name(&c.name),
                storage_columns(definition, &c.columns)?
            ))
        })
        .collect::<Result<Vec<_>, DefinitionError>>()?;

    statements.push(create_table(
        &definition.base_table(false),
        &columns,
        &constraints,
    ));

    // History rows repeat per version, so they carry no key
    if definition.has_history {
        let history_columns = definition
            .columns
            .iter()
            .map(|c| column_sql(c, true))
            .collect::<Vec<_>>();
        statements.push(create_table(
            &definition.base_table(true),
            &history_columns,
            &[],
        ));
    }

    if definition.has_translation {
        let mut columns = vec![
            column_sql(id, false),
            format!("\"{LANGUAGE_COLUMN}\" VARCHAR(16) NOT NULL"),
        ];
        columns.extend(definition.text_columns().map(|c| column_sql(c, true)));

        let translation = definition.translation_table(false);
        let constraints = vec![
            format!(
                "CONSTRAINT {} PRIMARY KEY ({}, \"{LANGUAGE_COLUMN}\")",
                quote_name(&format!("PK_T_{}", definition.entity)),
                id.name
            ),
            format!(
                "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE CASCADE",
                quote_name(&format!("FK_T_{}", definition.entity)),
                id.name,
                definition.base_table(false),
                id.name
            ),
        ];
        statements.push(create_table(&translation, &columns, &constraints));

        if definition.has_history {
            statements.push(create_table(&definition.translation_table(true), &columns, &[]));
        }
    }

    Ok(statements)
}

/// Foreign keys of a definition. List edges are owned by the referenced side
/// and produce no constraint here.
pub fn create_foreign_keys(
    definition: &Definition,
    registry: &DefinitionRegistry,
) -> Result<Vec<String>, DefinitionError> {
    definition
        .foreign_keys
        .iter()
        .filter(|edge| !edge.list)
        .map(|edge| {
            let referenced = registry.get_by_type_id(edge.referenced_type, edge.referenced)?;
            let local = definition.require_column(edge.local_property)?;
            let target = referenced.require_column(edge.referenced_property)?;

            let name = quote_name(&edge.name);
            let table = definition.base_table(false);
            Ok(format!(
                "DO $$ BEGIN IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = '{}' \
                 AND conrelid = '{table}'::regclass) THEN \
                 ALTER TABLE {table} ADD CONSTRAINT {name} FOREIGN KEY ({}) REFERENCES {} ({}){}; \
                 END IF; END $$",
                edge.name,
                local.name,
                referenced.base_table(false),
                target.name,
                if edge.cascade_delete {
                    " ON DELETE CASCADE"
                } else {
                    ""
                },
            ))
        })
        .collect()
}

/// Every statement needed to create the registry's storage from scratch.
pub fn create_all(registry: &DefinitionRegistry) -> Result<Vec<String>, DefinitionError> {
    let mut definitions = registry.definitions().collect::<Vec<_>>();
    definitions.sort_by_key(|d| d.entity);

    let mut statements = create_schemas(registry.schemas());
    for definition in &definitions {
        statements.extend(create_tables(definition)?);
    }
    for definition in &definitions {
        statements.extend(create_foreign_keys(definition, registry)?);
    }
    Ok(statements)
}
