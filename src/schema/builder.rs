use std::{any::TypeId, marker::PhantomData};

use itertools::Itertools;

use crate::query::SqlValue;

use super::{
    ColumnDefault, ColumnDefinition, ConstraintDefinition, CrossReferenceDefinition, CrossSide,
    Definition, DefinitionError, EdgeFilter, Field, FieldKind, ForeignKeyDefinition, Ident,
    Record, SchemaNames,
};

/// Optional column settings
#[derive(Debug, Clone, Default)]
pub struct ColumnOptions {
    nullable: bool,
    default: Option<ColumnDefault>,
    length: Option<u32>,
    storage_name: Option<String>,
}

impl ColumnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn default_value(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    /// Stores the property under a different column name
    pub fn storage_name(mut self, name: impl Into<String>) -> Self {
        self.storage_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct EdgeOptions {
    optional: bool,
    list: bool,
    cascade_delete: bool,
    column_filters: Vec<(String, String)>,
    value_filters: Vec<(String, SqlValue)>,
}

impl EdgeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Left outer join instead of an inner join
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// One-to-many: aggregate all matching rows into a JSON array
    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    pub fn cascade_delete(mut self) -> Self {
        self.cascade_delete = true;
        self
    }

    /// Adds `local.{local} = ref.{referenced}` to the join condition
    pub fn filter_column(mut self, local: impl Into<String>, referenced: impl Into<String>) -> Self {
        self.column_filters.push((local.into(), referenced.into()));
        self
    }

    /// Adds `ref.{referenced} = value` to the join condition
    pub fn filter_value(mut self, referenced: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.value_filters.push((referenced.into(), value.into()));
        self
    }
}

/// Builds the [`Definition`] of `T`. Every property reference is resolved
/// against `T`'s declared fields (or the joined record's) as soon as it's
/// passed in, so a typo fails registration rather than a query.
pub struct DefinitionBuilder<T: Record> {
    definition: Definition,
    _marker: PhantomData<fn() -> T>,
}

fn resolve<R: Record>(property: &str) -> Result<Field, DefinitionError> {
    let field = R::field(property).ok_or_else(|| DefinitionError::UnknownProperty {
        entity: R::NAME.to_string(),
        property: property.to_string(),
    })?;
    // Property names end up as aliases in generated SQL
    Ident::new(field.name)?;
    Ok(field)
}

fn resolve_scalar<R: Record>(property: &str) -> Result<Field, DefinitionError> {
    let field = resolve::<R>(property)?;
    match field.kind {
        FieldKind::Scalar { .. } => Ok(field),
        _ => Err(not_a_scalar::<R>(&field)),
    }
}

fn not_a_scalar<R: Record>(field: &Field) -> DefinitionError {
    DefinitionError::WrongPropertyKind {
        entity: R::NAME.to_string(),
        property: field.name.to_string(),
        expected: "a scalar",
    }
}

impl<T: Record> DefinitionBuilder<T> {
    pub fn new(schemas: SchemaNames) -> Result<Self, DefinitionError> {
        Ok(Self {
            definition: Definition {
                entity: T::NAME,
                type_id: TypeId::of::<T>(),
                table: Ident::new(T::NAME)?,
                columns: vec![],
                foreign_keys: vec![],
                constraints: vec![],
                cross_reference: None,
                has_translation: false,
                has_history: false,
                schemas,
            },
            _marker: PhantomData,
        })
    }

    pub fn translation(&mut self, value: bool) -> &mut Self {
        self.definition.has_translation = value;
        self
    }

    pub fn history(&mut self, value: bool) -> &mut Self {
        self.definition.has_history = value;
        self
    }

    pub fn schemas(&mut self, schemas: SchemaNames) -> &mut Self {
        self.definition.schemas = schemas;
        self
    }

    pub fn column(&mut self, property: &str) -> Result<&mut Self, DefinitionError> {
        self.column_with(property, ColumnOptions::default())
    }

    pub fn column_with(
        &mut self,
        property: &str,
        options: ColumnOptions,
    ) -> Result<&mut Self, DefinitionError> {
        let field = resolve::<T>(property)?;
        let FieldKind::Scalar { ty, nullable } = field.kind else {
            return Err(not_a_scalar::<T>(&field));
        };

        let name = match options.storage_name {
            Some(name) => Ident::new(name)?,
            None => Ident::new(field.name)?,
        };

        let column = ColumnDefinition {
            property: field.name,
            name,
            ty,
            nullable: nullable || options.nullable,
            default: options.default,
            length: options.length,
        };

        // Re-declaring a column replaces it in place
        match self
            .definition
            .columns
            .iter_mut()
            .find(|c| c.property == field.name)
        {
            Some(existing) => *existing = column,
            None => self.definition.columns.push(column),
        }

        Ok(self)
    }

    fn constraint_columns(properties: &[&str]) -> Result<Vec<&'static str>, DefinitionError> {
        properties
            .iter()
            .map(|p| resolve_scalar::<T>(p).map(|f| f.name))
            .collect()
    }

    pub fn primary_key(&mut self, properties: &[&str]) -> Result<&mut Self, DefinitionError> {
        let columns = Self::constraint_columns(properties)?;
        let name = format!("PK_{}", T::NAME);

        self.definition.constraints.retain(|c| c.name != name);
        self.definition.constraints.push(ConstraintDefinition {
            name,
            entity: T::NAME,
            columns,
            unique: true,
        });
        Ok(self)
    }

    pub fn unique(&mut self, properties: &[&str]) -> Result<&mut Self, DefinitionError> {
        let columns = Self::constraint_columns(properties)?;
        let name = format!("UC_{}_{}", T::NAME, columns.iter().join("-"));

        self.definition.constraints.retain(|c| c.name != name);
        self.definition.constraints.push(ConstraintDefinition {
            name,
            entity: T::NAME,
            columns,
            unique: true,
        });
        Ok(self)
    }

    /// Declares a foreign key from `T.local` to `R.referenced`, projected into
    /// the `projected` property of the extended record `E`.
    pub fn extended<E: Record, R: Record>(
        &mut self,
        local: &str,
        referenced: &str,
        projected: &str,
        options: EdgeOptions,
    ) -> Result<&mut Self, DefinitionError> {
        let local = resolve_scalar::<T>(local)?;
        let referenced = resolve_scalar::<R>(referenced)?;
        let projected = resolve::<E>(projected)?;

        match (projected.kind, options.list) {
            (FieldKind::Nested(_), false) | (FieldKind::List(_), true) => {}
            (_, list) => {
                return Err(DefinitionError::WrongPropertyKind {
                    entity: E::NAME.to_string(),
                    property: projected.name.to_string(),
                    expected: if list { "a list" } else { "a nested record" },
                })
            }
        }

        let mut filters = vec![];
        for (local, referenced) in &options.column_filters {
            filters.push(EdgeFilter::Column {
                local: resolve_scalar::<T>(local)?.name,
                referenced: resolve_scalar::<R>(referenced)?.name,
            });
        }
        for (referenced, value) in options.value_filters {
            filters.push(EdgeFilter::Value {
                referenced: resolve_scalar::<R>(&referenced)?.name,
                value,
            });
        }

        self.definition.foreign_keys.push(ForeignKeyDefinition {
            name: format!("FK_{}_{}_{}", T::NAME, projected.name, R::NAME),
            base: T::NAME,
            referenced: R::NAME,
            referenced_type: TypeId::of::<R>(),
            local_property: local.name,
            referenced_property: referenced.name,
            projected: projected.name,
            optional: options.optional,
            list: options.list,
            cascade_delete: options.cascade_delete,
            filters,
        });
        Ok(self)
    }

    /// Marks `T` as the association between `A` and `B`. Each side is
    /// `(key on T, referenced property, projected property on E)`; both are also
    /// registered as foreign keys so the extended view joins them.
    pub fn cross_reference<E: Record, A: Record, B: Record>(
        &mut self,
        a: (&str, &str, &str),
        b: (&str, &str, &str),
    ) -> Result<&mut Self, DefinitionError> {
        self.extended::<E, A>(a.0, a.1, a.2, EdgeOptions::default())?;
        self.extended::<E, B>(b.0, b.1, b.2, EdgeOptions::default())?;

        self.definition.cross_reference = Some(CrossReferenceDefinition {
            a: CrossSide {
                entity: A::NAME,
                type_id: TypeId::of::<A>(),
                local_property: resolve_scalar::<T>(a.0)?.name,
                referenced_property: resolve_scalar::<A>(a.1)?.name,
            },
            b: CrossSide {
                entity: B::NAME,
                type_id: TypeId::of::<B>(),
                local_property: resolve_scalar::<T>(b.0)?.name,
                referenced_property: resolve_scalar::<B>(b.1)?.name,
            },
        });
        Ok(self)
    }

    pub fn build(self) -> Definition {
        self.definition
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::{DefinitionError, SchemaNames};
    use crate::testutils::{Area, ExtArea, ExtPackage, Package};

    use super::*;

    fn builder<T: Record>() -> DefinitionBuilder<T> {
        DefinitionBuilder::new(SchemaNames::default()).unwrap()
    }

    #[test]
    fn test_build_columns_and_constraints() {
        let mut def = builder::<Package>();
        def.translation(true).history(true);
        def.primary_key(&["id"])
            .unwrap()
            .column("id")
            .unwrap()
            .column_with("name", ColumnOptions::new().length(150))
            .unwrap()
            .column("description")
            .unwrap()
            .column("areaId")
            .unwrap()
            .unique(&["name", "areaId"])
            .unwrap();
        let definition = def.build();

        assert!(definition.has_translation);
        assert!(definition.has_history);
        assert_eq!(
            definition
                .columns
                .iter()
                .map(|c| c.property)
                .collect::<Vec<_>>(),
            vec!["id", "name", "description", "areaId"]
        );
        assert_eq!(definition.column("NAME").unwrap().length, Some(150));
        assert_eq!(definition.primary_key().unwrap().columns, vec!["id"]);
        assert_eq!(definition.constraints[1].name, "UC_Package_name-areaId");
    }

    #[test]
    fn test_unknown_property_fails_immediately() {
        let mut def = builder::<Area>();
        let err = def.primary_key(&["identifier"]).err().unwrap();
        assert_eq!(
            err.to_string(),
            "Area does not contain the property 'identifier'"
        );

        let err = def.unique(&["name", "missing"]).err().unwrap();
        assert!(matches!(err, DefinitionError::UnknownProperty { .. }));
    }

    #[test]
    fn test_extended_edge_validation() {
        let mut def = builder::<Package>();
        def.extended::<ExtPackage, Area>("areaId", "id", "area", EdgeOptions::new())
            .unwrap();
        let definition = def.build();
        let edge = &definition.foreign_keys[0];
        assert_eq!(edge.name, "FK_Package_area_Area");
        assert_eq!(edge.local_property, "areaId");
        assert_eq!(edge.referenced_property, "id");
        assert!(!edge.optional && !edge.list);

        // The referenced property has to exist on the joined record
        let mut def = builder::<Package>();
        let err = def
            .extended::<ExtPackage, Area>("areaId", "areaKey", "area", EdgeOptions::new())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Area does not contain the property 'areaKey'");
    }

    #[test]
    fn test_list_edge_requires_list_property() {
        let mut def = builder::<Area>();
        def.extended::<ExtArea, Package>("id", "areaId", "packages", EdgeOptions::new().list())
            .unwrap();

        let mut def = builder::<Area>();
        let err = def
            .extended::<ExtArea, Package>("id", "areaId", "packages", EdgeOptions::new())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            DefinitionError::WrongPropertyKind {
                expected: "a nested record",
                ..
            }
        ));
    }

    #[test]
    fn test_storage_name_must_be_an_identifier() {
        let mut def = builder::<Area>();
        let err = def
            .column_with("name", ColumnOptions::new().storage_name("name; --"))
            .err()
            .unwrap();
        assert!(matches!(err, DefinitionError::InvalidIdentifier(_)));
    }
}
