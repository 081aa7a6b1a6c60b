use std::sync::Arc;

use itertools::Itertools;
use serde_json::Value;
use uuid::Uuid;

use crate::schema::{
    ColumnDefinition, CrossSide, Definition, DefinitionError, DefinitionRegistry, EdgeFilter,
    ForeignKeyDefinition, Ident, LANGUAGE_COLUMN,
};

use super::{
    property_value, CompiledQuery, FilterOperator, Filters, PartialUpdate, RequestOptions,
    SqlValue,
};

const LANGUAGE_PARAM: &str = "_language";
const ROWNUM_COLUMN: &str = "_rownum";
pub(crate) const TOTAL_ITEMS_COLUMN: &str = "totalitems";

/// Positional parameters of a statement being compiled
#[derive(Debug, Default)]
struct Params(Vec<(String, SqlValue)>);

impl Params {
    fn bind(&mut self, name: &str, value: SqlValue) -> String {
        self.0.push((name.to_string(), value));
        format!("${}", self.0.len())
    }

    /// Binds a value once and hands out the same placeholder on every call
    fn bind_shared(&mut self, name: &str, value: SqlValue) -> String {
        match self.0.iter().position(|(n, _)| n == name) {
            Some(pos) => format!("${}", pos + 1),
            None => self.bind(name, value),
        }
    }
}

fn language_column() -> Ident {
    Ident::trusted(LANGUAGE_COLUMN)
}

/// Reads a column's value out of a serialized record. Missing properties bind
/// as typed NULLs.
fn column_value(
    definition: &Definition,
    column: &ColumnDefinition,
    values: &Value,
) -> Result<SqlValue, DefinitionError> {
    let value = property_value(values, column.property);

    SqlValue::from_json(value.unwrap_or(&Value::Null), column.ty).map_err(|reason| {
        DefinitionError::InvalidValue {
            entity: definition.entity.to_string(),
            property: column.property.to_string(),
            reason,
        }
    })
}

fn coerce(
    definition: &Definition,
    column: &ColumnDefinition,
    value: SqlValue,
) -> Result<SqlValue, DefinitionError> {
    value
        .coerce(column.ty)
        .map_err(|reason| DefinitionError::InvalidValue {
            entity: definition.entity.to_string(),
            property: column.property.to_string(),
            reason,
        })
}

/// Columns in write order (lexicographic by storage name)
fn sorted<'a>(columns: impl Iterator<Item = &'a ColumnDefinition>) -> Vec<&'a ColumnDefinition> {
    columns.sorted_by(|a, b| a.name.as_str().cmp(b.name.as_str())).collect()
}

/// Accumulates the pieces of a SELECT
struct Select<'a> {
    options: &'a RequestOptions,
    params: Params,
    columns: Vec<String>,
    joins: Vec<String>,
    predicates: Vec<String>,
}

impl<'a> Select<'a> {
    fn new(options: &'a RequestOptions) -> Self {
        Self {
            options,
            params: Params::default(),
            columns: vec![],
            joins: vec![],
            predicates: vec![],
        }
    }

    /// Point-in-time reads go to the history schemas. A definition without
    /// history tables can't answer one.
    fn history(&self, definition: &Definition) -> Result<bool, DefinitionError> {
        match self.options.as_of {
            Some(_) if !definition.has_history => Err(DefinitionError::HistoryNotEnabled {
                entity: definition.entity.to_string(),
            }),
            as_of => Ok(as_of.is_some()),
        }
    }

    /// Lateral join against the single translation row for the requested
    /// language. Returns the alias to coalesce text columns from.
    fn join_translation(
        &mut self,
        definition: &Definition,
        alias: &Ident,
    ) -> Result<Option<Ident>, DefinitionError> {
        let language = match self.options.requested_language() {
            Some(language) if definition.has_translation => language.to_string(),
            _ => return Ok(None),
        };

        let translation_alias = alias.prefixed("T_")?;
        let id = &definition.id_column()?.name;
        let placeholder = self
            .params
            .bind_shared(LANGUAGE_PARAM, SqlValue::Text(language));
        let table = definition.translation_table(self.history(definition)?);

        self.joins.push(format!(
            "LEFT JOIN LATERAL (SELECT * FROM {table} AS \"T\" WHERE \"T\".{id} = {alias}.{id} AND \"T\".{} = {placeholder}) AS {translation_alias} ON TRUE",
            language_column(),
        ));
        Ok(Some(translation_alias))
    }

    fn column_expr(column: &ColumnDefinition, alias: &Ident, translation: Option<&Ident>) -> String {
        match translation {
            Some(t) if column.ty.is_text() => {
                format!("COALESCE({t}.{name}, {alias}.{name})", name = column.name)
            }
            _ => format!("{alias}.{}", column.name),
        }
    }

    fn project(
        &mut self,
        definition: &Definition,
        alias: &Ident,
        translation: Option<&Ident>,
        prefix: Option<&Ident>,
    ) -> Result<(), DefinitionError> {
        for column in &definition.columns {
            let label = match prefix {
                Some(prefix) => prefix.joined(&column.alias())?,
                None => column.alias(),
            };
            self.columns.push(format!(
                "{} AS {label}",
                Self::column_expr(column, alias, translation)
            ));
        }
        Ok(())
    }

    fn edge_conditions(
        &mut self,
        edge: &ForeignKeyDefinition,
        base: &Definition,
        base_alias: &Ident,
        referenced: &Definition,
        ref_alias: &Ident,
    ) -> Result<Vec<String>, DefinitionError> {
        let mut conditions = vec![format!(
            "{ref_alias}.{} = {base_alias}.{}",
            referenced.require_column(edge.referenced_property)?.name,
            base.require_column(edge.local_property)?.name,
        )];

        for filter in &edge.filters {
            conditions.push(match filter {
                EdgeFilter::Column { local, referenced: r } => format!(
                    "{base_alias}.{} = {ref_alias}.{}",
                    base.require_column(local)?.name,
                    referenced.require_column(r)?.name,
                ),
                EdgeFilter::Value { referenced: r, value } => {
                    let column = referenced.require_column(r)?;
                    let value = coerce(referenced, column, value.clone())?;
                    let placeholder = self.params.bind(column.property, value);
                    format!("{ref_alias}.{} = {placeholder}", column.name)
                }
            });
        }

        Ok(conditions)
    }

    /// Joins a single referenced record and projects it as `{projected}_{column}`
    fn join_edge(
        &mut self,
        edge: &ForeignKeyDefinition,
        base: &Definition,
        base_alias: &Ident,
        referenced: &Definition,
    ) -> Result<(), DefinitionError> {
        let projected = edge.projected_ident();
        let ref_alias = projected.prefixed("_")?;
        let conditions = self.edge_conditions(edge, base, base_alias, referenced, &ref_alias)?;
        let table = referenced.base_table(self.history(referenced)?);
        let join = if edge.optional {
            "LEFT JOIN"
        } else {
            "INNER JOIN"
        };

        self.joins.push(format!(
            "{join} {table} AS {ref_alias} ON {}",
            conditions.join(" AND "),
        ));

        let translation = self.join_translation(referenced, &ref_alias)?;
        self.project(referenced, &ref_alias, translation.as_ref(), Some(&projected))
    }

    /// Projects every matching referenced row as one JSON array column
    fn aggregate_edge(
        &mut self,
        edge: &ForeignKeyDefinition,
        base: &Definition,
        base_alias: &Ident,
        referenced: &Definition,
    ) -> Result<(), DefinitionError> {
        let ref_alias = Ident::trusted("ref");
        let conditions = self.edge_conditions(edge, base, base_alias, referenced, &ref_alias)?;
        let columns = referenced
            .columns
            .iter()
            .map(|c| format!("{ref_alias}.{} AS {}", c.name, c.alias()))
            .join(", ");
        let table = referenced.base_table(self.history(referenced)?);

        self.columns.push(format!(
            "COALESCE((SELECT json_agg(row_to_json(x)) FROM (SELECT {columns} FROM {table} AS {ref_alias} WHERE {}) AS x), '[]') AS {}",
            conditions.join(" AND "),
            edge.projected_ident(),
        ));
        Ok(())
    }

    fn filter(
        &mut self,
        definition: &Definition,
        alias: &Ident,
        filters: &Filters,
    ) -> Result<(), DefinitionError> {
        for filter in filters.iter() {
            let column = definition.require_column(&filter.property)?;
            let target = format!("{alias}.{}", column.name);

            let predicate = match filter.operator {
                FilterOperator::Equal if filter.value.is_null() => format!("{target} IS NULL"),
                FilterOperator::NotEqual if filter.value.is_null() => {
                    format!("{target} IS NOT NULL")
                }
                op if op.is_pattern() => {
                    let target = if column.ty.is_text() {
                        target
                    } else {
                        format!("{target}::text")
                    };
                    let pattern = op.pattern(&filter.value.pattern_text());
                    let placeholder = self.params.bind(column.property, SqlValue::Text(pattern));
                    format!("{target} {} {placeholder}", op.sql())
                }
                op => {
                    let value = coerce(definition, column, filter.value.clone())?;
                    let placeholder = self.params.bind(column.property, value);
                    format!("{target} {} {placeholder}", op.sql())
                }
            };
            self.predicates.push(predicate);
        }
        Ok(())
    }

    fn body(&self, from: &str) -> String {
        let mut sql = format!("SELECT {} FROM {from}", self.columns.join(", "));
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates.join(" AND "));
        }
        sql
    }
}

/// The association join of a cross-reference read: `target` rows linked to
/// the id on the `other` side.
struct CrossJoin<'a> {
    association: &'a Definition,
    target: &'a CrossSide,
    other: &'a CrossSide,
    id: Uuid,
}

/// Compiles reads and writes for registered definitions.
///
/// Output is plain SQL text with `$n` placeholders: every identifier is an
/// [`Ident`], every value a bound parameter.
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    registry: Arc<DefinitionRegistry>,
}

impl QueryCompiler {
    pub fn new(registry: Arc<DefinitionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<DefinitionRegistry> {
        &self.registry
    }

    /// Flat read of the definition's own columns
    pub fn select(
        &self,
        definition: &Definition,
        filters: &Filters,
        options: &RequestOptions,
    ) -> Result<CompiledQuery, DefinitionError> {
        self.compile_select(definition, false, filters, options, None)
    }

    /// Read with every foreign-key edge joined or aggregated
    pub fn select_extended(
        &self,
        definition: &Definition,
        filters: &Filters,
        options: &RequestOptions,
    ) -> Result<CompiledQuery, DefinitionError> {
        self.compile_select(definition, true, filters, options, None)
    }

    pub fn select_by_id(
        &self,
        definition: &Definition,
        id: Uuid,
        extended: bool,
        options: &RequestOptions,
    ) -> Result<CompiledQuery, DefinitionError> {
        let id_column = definition.id_column()?;
        let filters = Filters::new().equal(id_column.property, id);
        let options = RequestOptions {
            use_paging: false,
            ..options.clone()
        };
        self.compile_select(definition, extended, &filters, &options, None)
    }

    /// Rows of `target` linked through the cross-reference `association` to
    /// `id` on its other side.
    pub fn select_cross(
        &self,
        association: &Definition,
        target: &Definition,
        id: Uuid,
        options: &RequestOptions,
    ) -> Result<CompiledQuery, DefinitionError> {
        let cross =
            association
                .cross_reference
                .as_ref()
                .ok_or_else(|| DefinitionError::NotCrossReference {
                    entity: association.entity.to_string(),
                })?;

        let (target_side, other) = if cross.a.type_id == target.type_id {
            (&cross.a, &cross.b)
        } else if cross.b.type_id == target.type_id {
            (&cross.b, &cross.a)
        } else {
            return Err(DefinitionError::CrossTypeMismatch {
                entity: association.entity.to_string(),
                expected: format!("{} and {}", cross.a.entity, cross.b.entity),
                actual: target.entity.to_string(),
            });
        };

        let join = CrossJoin {
            association,
            target: target_side,
            other,
            id,
        };
        self.compile_select(target, false, &Filters::new(), options, Some(join))
    }

    fn compile_select(
        &self,
        definition: &Definition,
        extended: bool,
        filters: &Filters,
        options: &RequestOptions,
        cross: Option<CrossJoin<'_>>,
    ) -> Result<CompiledQuery, DefinitionError> {
        let mut select = Select::new(options);
        let alias = definition.table.clone();
        let from = format!(
            "{} AS {alias}",
            definition.base_table(select.history(definition)?)
        );

        let translation = select.join_translation(definition, &alias)?;
        select.project(definition, &alias, translation.as_ref(), None)?;

        if extended {
            for edge in &definition.foreign_keys {
                let referenced = self
                    .registry
                    .get_by_type_id(edge.referenced_type, edge.referenced)?;
                if edge.list {
                    select.aggregate_edge(edge, definition, &alias, &referenced)?;
                } else {
                    select.join_edge(edge, definition, &alias, &referenced)?;
                }
            }
        }

        if let Some(cross) = cross {
            let association = cross.association;
            let association_alias = association.table.prefixed("X_")?;
            let table = association.base_table(select.history(association)?);
            select.joins.push(format!(
                "INNER JOIN {table} AS {association_alias} ON {association_alias}.{} = {alias}.{}",
                association.require_column(cross.target.local_property)?.name,
                definition.require_column(cross.target.referenced_property)?.name,
            ));

            let key = association.require_column(cross.other.local_property)?;
            let placeholder = select.params.bind(key.property, SqlValue::Uuid(cross.id));
            select
                .predicates
                .push(format!("{association_alias}.{} = {placeholder}", key.name));
        }

        select.filter(definition, &alias, filters)?;

        let order_column = match options.order_by.as_deref().and_then(|o| definition.column(o)) {
            Some(column) => Some(column),
            None if options.use_paging => Some(definition.id_column()?),
            None => None,
        };
        let order_expr =
            order_column.map(|c| Select::column_expr(c, &alias, translation.as_ref()));

        let sql = if options.use_paging {
            let order_expr = order_expr.unwrap_or_default();
            select.columns.push(format!(
                "ROW_NUMBER() OVER (ORDER BY {order_expr}) AS \"{ROWNUM_COLUMN}\""
            ));
            format!(
                "WITH \"pagedresult\" AS ({}) SELECT * FROM \"pagedresult\", (SELECT MAX(\"{ROWNUM_COLUMN}\") AS \"{TOTAL_ITEMS_COLUMN}\" FROM \"pagedresult\") AS \"pageinfo\" ORDER BY \"{ROWNUM_COLUMN}\" OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                select.body(&from),
                options.offset(),
                options.limit(),
            )
        } else {
            let mut sql = select.body(&from);
            if let Some(order_expr) = order_expr {
                sql.push_str(&format!(" ORDER BY {order_expr}"));
            }
            sql
        };

        Ok(CompiledQuery {
            sql,
            params: select.params.0,
            as_of: options.as_of,
        })
    }

    /// `INSERT` of every column, values taken from the serialized record
    pub fn insert(
        &self,
        definition: &Definition,
        values: &Value,
    ) -> Result<CompiledQuery, DefinitionError> {
        let columns = sorted(definition.columns.iter());
        let mut params = Params::default();
        let placeholders = columns
            .iter()
            .map(|c| Ok(params.bind(c.property, column_value(definition, c, values)?)))
            .collect::<Result<Vec<_>, DefinitionError>>()?;

        Ok(CompiledQuery {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                definition.base_table(false),
                columns.iter().map(|c| c.name.to_string()).join(", "),
                placeholders.join(", "),
            ),
            params: params.0,
            as_of: None,
        })
    }

    /// `UPDATE` of every non-id column of the row with the given id
    pub fn update(
        &self,
        definition: &Definition,
        id: Uuid,
        values: &Value,
    ) -> Result<CompiledQuery, DefinitionError> {
        let id_column = definition.id_column()?;
        let mut params = Params::default();
        let assignments = sorted(definition.columns.iter())
            .into_iter()
            .filter(|c| c.name != id_column.name)
            .map(|c| {
                let placeholder = params.bind(c.property, column_value(definition, c, values)?);
                Ok(format!("{} = {placeholder}", c.name))
            })
            .collect::<Result<Vec<_>, DefinitionError>>()?;

        if assignments.is_empty() {
            return Err(DefinitionError::EmptyUpdate {
                entity: definition.entity.to_string(),
            });
        }

        let id_placeholder = params.bind(id_column.property, SqlValue::Uuid(id));
        Ok(CompiledQuery {
            sql: format!(
                "UPDATE {} SET {} WHERE {} = {id_placeholder}",
                definition.base_table(false),
                assignments.join(", "),
                id_column.name,
            ),
            params: params.0,
            as_of: None,
        })
    }

    /// `UPDATE` of only the supplied properties
    pub fn update_partial(
        &self,
        definition: &Definition,
        id: Uuid,
        updates: &[PartialUpdate],
    ) -> Result<CompiledQuery, DefinitionError> {
        if updates.is_empty() {
            return Err(DefinitionError::EmptyUpdate {
                entity: definition.entity.to_string(),
            });
        }

        let id_column = definition.id_column()?;
        let mut params = Params::default();
        let assignments = updates
            .iter()
            .map(|update| {
                let column = definition.require_column(&update.property)?;
                let value = coerce(definition, column, update.value.clone())?;
                let placeholder = params.bind(column.property, value);
                Ok(format!("{} = {placeholder}", column.name))
            })
            .collect::<Result<Vec<_>, DefinitionError>>()?;

        let id_placeholder = params.bind(id_column.property, SqlValue::Uuid(id));
        Ok(CompiledQuery {
            sql: format!(
                "UPDATE {} SET {} WHERE {} = {id_placeholder}",
                definition.base_table(false),
                assignments.join(", "),
                id_column.name,
            ),
            params: params.0,
            as_of: None,
        })
    }

    /// `INSERT ... ON CONFLICT DO UPDATE` keyed on the primary key (or id).
    /// The given id replaces the record's own.
    pub fn upsert(
        &self,
        definition: &Definition,
        id: Uuid,
        values: &Value,
    ) -> Result<CompiledQuery, DefinitionError> {
        let id_column = definition.id_column()?;
        let conflict = match definition.primary_key() {
            Some(pk) => pk
                .columns
                .iter()
                .map(|p| definition.require_column(p))
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![id_column],
        };

        let columns = sorted(definition.columns.iter());
        let mut params = Params::default();
        let placeholders = columns
            .iter()
            .map(|c| {
                let value = if c.name == id_column.name {
                    SqlValue::Uuid(id)
                } else {
                    column_value(definition, c, values)?
                };
                Ok(params.bind(c.property, value))
            })
            .collect::<Result<Vec<_>, DefinitionError>>()?;

        let assignments = columns
            .iter()
            .filter(|c| c.name != id_column.name && !conflict.iter().any(|k| k.name == c.name))
            .map(|c| format!("{name} = EXCLUDED.{name}", name = c.name))
            .collect::<Vec<_>>();
        let action = if assignments.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", assignments.join(", "))
        };

        Ok(CompiledQuery {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {action}",
                definition.base_table(false),
                columns.iter().map(|c| c.name.to_string()).join(", "),
                placeholders.join(", "),
                conflict.iter().map(|c| c.name.to_string()).join(", "),
            ),
            params: params.0,
            as_of: None,
        })
    }

    pub fn delete(&self, definition: &Definition, id: Uuid) -> Result<CompiledQuery, DefinitionError> {
        let id_column = definition.id_column()?;
        let mut params = Params::default();
        let placeholder = params.bind(id_column.property, SqlValue::Uuid(id));

        Ok(CompiledQuery {
            sql: format!(
                "DELETE FROM {} WHERE {} = {placeholder}",
                definition.base_table(false),
                id_column.name
            ),
            params: params.0,
            as_of: None,
        })
    }

    /// Translation row columns: id, language and the text columns, in write order
    fn translation_values(
        definition: &Definition,
        id: Uuid,
        values: &Value,
        language: &str,
        params: &mut Params,
    ) -> Result<Vec<(String, String)>, DefinitionError> {
        let id_column = definition.id_column()?;
        let mut entries = vec![
            (
                id_column.name.to_string(),
                params.bind(id_column.property, SqlValue::Uuid(id)),
            ),
            (
                language_column().to_string(),
                params.bind(LANGUAGE_PARAM, SqlValue::Text(language.to_string())),
            ),
        ];
        for column in sorted(definition.text_columns()) {
            let value = column_value(definition, column, values)?;
            entries.push((column.name.to_string(), params.bind(column.property, value)));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    /// Insert of a translation row. The caller checks the definition has
    /// translations enabled.
    pub fn insert_translation(
        &self,
        definition: &Definition,
        id: Uuid,
        values: &Value,
        language: &str,
    ) -> Result<CompiledQuery, DefinitionError> {
        let mut params = Params::default();
        let entries = Self::translation_values(definition, id, values, language, &mut params)?;

        Ok(CompiledQuery {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                definition.translation_table(false),
                entries.iter().map(|(c, _)| c).join(", "),
                entries.iter().map(|(_, p)| p).join(", "),
            ),
            params: params.0,
            as_of: None,
        })
    }

    pub fn update_translation(
        &self,
        definition: &Definition,
        id: Uuid,
        values: &Value,
        language: &str,
    ) -> Result<CompiledQuery, DefinitionError> {
        let id_column = definition.id_column()?;
        let mut params = Params::default();
        let assignments = sorted(definition.text_columns())
            .into_iter()
            .map(|c| {
                let placeholder = params.bind(c.property, column_value(definition, c, values)?);
                Ok(format!("{} = {placeholder}", c.name))
            })
            .collect::<Result<Vec<_>, DefinitionError>>()?;

        if assignments.is_empty() {
            return Err(DefinitionError::EmptyUpdate {
                entity: definition.entity.to_string(),
            });
        }

        let id_placeholder = params.bind(id_column.property, SqlValue::Uuid(id));
        let language_placeholder =
            params.bind(LANGUAGE_PARAM, SqlValue::Text(language.to_string()));
        Ok(CompiledQuery {
            sql: format!(
                "UPDATE {} SET {} WHERE {} = {id_placeholder} AND {} = {language_placeholder}",
                definition.translation_table(false),
                assignments.join(", "),
                id_column.name,
                language_column(),
            ),
            params: params.0,
            as_of: None,
        })
    }

    pub fn upsert_translation(
        &self,
        definition: &Definition,
        id: Uuid,
        values: &Value,
        language: &str,
    ) -> Result<CompiledQuery, DefinitionError> {
        let id_column = definition.id_column()?;
        let mut params = Params::default();
        let entries = Self::translation_values(definition, id, values, language, &mut params)?;

        let assignments = sorted(definition.text_columns())
            .into_iter()
            .map(|c| format!("{name} = EXCLUDED.{name}", name = c.name))
            .collect::<Vec<_>>();
        let action = if assignments.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", assignments.join(", "))
        };

        Ok(CompiledQuery {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}, {}) {action}",
                definition.translation_table(false),
                entries.iter().map(|(c, _)| c).join(", "),
                entries.iter().map(|(_, p)| p).join(", "),
                id_column.name,
                language_column(),
            ),
            params: params.0,
            as_of: None,
        })
    }
}
