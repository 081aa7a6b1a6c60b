use std::any::TypeId;

use crate::query::SqlValue;

mod builder;
pub mod ddl;
mod ident;
mod record;
mod registry;

pub use builder::{ColumnOptions, DefinitionBuilder, EdgeOptions};
pub use ident::{Ident, TableRef};
pub use record::{Entity, Field, FieldKind, Record, ScalarType, ID_PROPERTY};
pub use registry::{DefinitionRegistry, RedefinitionPolicy};

pub const DEFAULT_BASE_SCHEMA: &str = "dbo";
pub const DEFAULT_TRANSLATION_SCHEMA: &str = "translation";
pub const DEFAULT_BASE_HISTORY_SCHEMA: &str = "dbo_history";
pub const DEFAULT_TRANSLATION_HISTORY_SCHEMA: &str = "translation_history";

/// Column in every translation table holding the language code
pub const LANGUAGE_COLUMN: &str = "language";

/// Configuration errors: a bad definition, or a query that can't be compiled
/// against one. These are never retried.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("{entity} does not contain the property '{property}'")]
    UnknownProperty { entity: String, property: String },

    #[error("No definition registered for {entity}")]
    DefinitionNotFound { entity: String },

    #[error("A definition for {entity} is already registered")]
    DefinitionAlreadyRegistered { entity: String },

    #[error("{entity} references {referenced} through {edge}, but {referenced} has no definition")]
    MissingForeignDefinition {
        entity: String,
        edge: String,
        referenced: String,
    },

    #[error("Comparer '{0}' is not supported")]
    UnsupportedOperator(String),

    #[error("Invalid SQL identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("{entity} has no column for the 'id' property")]
    MissingIdColumn { entity: String },

    #[error("{entity} is not registered as a cross reference")]
    NotCrossReference { entity: String },

    #[error("{entity} cross references {expected}, not {actual}")]
    CrossTypeMismatch {
        entity: String,
        expected: String,
        actual: String,
    },

    #[error("Cannot bind {entity}.{property}: {reason}")]
    InvalidValue {
        entity: String,
        property: String,
        reason: String,
    },

    #[error("{entity} keeps no history, so it can't be read as of a point in time")]
    HistoryNotEnabled { entity: String },

    #[error("Nothing to update for {entity}")]
    EmptyUpdate { entity: String },

    #[error("Property '{property}' of {entity} must be {expected}")]
    WrongPropertyKind {
        entity: String,
        property: String,
        expected: &'static str,
    },
}

/// Schemas holding the four table variants of an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNames {
    pub base: Ident,
    pub translation: Ident,
    pub base_history: Ident,
    pub translation_history: Ident,
}

impl SchemaNames {
    pub fn new(
        base: &str,
        translation: &str,
        base_history: &str,
        translation_history: &str,
    ) -> Result<Self, DefinitionError> {
        Ok(Self {
            base: Ident::new(base)?,
            translation: Ident::new(translation)?,
            base_history: Ident::new(base_history)?,
            translation_history: Ident::new(translation_history)?,
        })
    }

    pub fn all(&self) -> [&Ident; 4] {
        [
            &self.base,
            &self.translation,
            &self.base_history,
            &self.translation_history,
        ]
    }
}

impl Default for SchemaNames {
    fn default() -> Self {
        Self {
            base: Ident::trusted(DEFAULT_BASE_SCHEMA),
            translation: Ident::trusted(DEFAULT_TRANSLATION_SCHEMA),
            base_history: Ident::trusted(DEFAULT_BASE_HISTORY_SCHEMA),
            translation_history: Ident::trusted(DEFAULT_TRANSLATION_HISTORY_SCHEMA),
        }
    }
}

/// Default value of a column, rendered into DDL.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    Text(String),
    Int(i64),
    Bool(bool),
    /// A SQL expression fixed in source code, e.g. `now()`
    Expression(&'static str),
}

impl ColumnDefault {
    pub fn to_sql(&self) -> String {
        match self {
            ColumnDefault::Text(s) => format!("'{}'", s.replace('\'', "''")),
            ColumnDefault::Int(i) => i.to_string(),
            ColumnDefault::Bool(b) => b.to_string(),
            ColumnDefault::Expression(e) => e.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    /// Property on the record
    pub property: &'static str,
    /// Storage name
    pub name: Ident,
    pub ty: ScalarType,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
    pub length: Option<u32>,
}

impl ColumnDefinition {
    /// Alias the column is projected as (the property name)
    pub fn alias(&self) -> Ident {
        Ident::trusted(self.property)
    }
}

/// Extra equality condition on a join
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeFilter {
    /// `local.{local} = ref.{referenced}`
    Column {
        local: &'static str,
        referenced: &'static str,
    },
    /// `ref.{referenced} = $n`
    Value {
        referenced: &'static str,
        value: SqlValue,
    },
}

#[derive(Debug, Clone)]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub base: &'static str,
    pub referenced: &'static str,
    pub referenced_type: TypeId,
    pub local_property: &'static str,
    pub referenced_property: &'static str,
    /// Property of the extended record the joined data lands in
    pub projected: &'static str,
    pub optional: bool,
    pub list: bool,
    pub cascade_delete: bool,
    pub filters: Vec<EdgeFilter>,
}

impl ForeignKeyDefinition {
    pub fn projected_ident(&self) -> Ident {
        Ident::trusted(self.projected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintDefinition {
    pub name: String,
    pub entity: &'static str,
    pub columns: Vec<&'static str>,
    pub unique: bool,
}

/// One side of a many-to-many association
#[derive(Debug, Clone)]
pub struct CrossSide {
    pub entity: &'static str,
    pub type_id: TypeId,
    /// Property on the association record holding the key
    pub local_property: &'static str,
    /// Property on the side's record the key points at
    pub referenced_property: &'static str,
}

#[derive(Debug, Clone)]
pub struct CrossReferenceDefinition {
    pub a: CrossSide,
    pub b: CrossSide,
}

/// Storage description of one entity type.
#[derive(Debug, Clone)]
pub struct Definition {
    pub entity: &'static str,
    pub type_id: TypeId,
    pub table: Ident,
    pub columns: Vec<ColumnDefinition>,
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    pub constraints: Vec<ConstraintDefinition>,
    pub cross_reference: Option<CrossReferenceDefinition>,
    pub has_translation: bool,
    pub has_history: bool,
    pub schemas: SchemaNames,
}

impl Definition {
    pub fn base_table(&self, history: bool) -> TableRef {
        let schema = if history {
            &self.schemas.base_history
        } else {
            &self.schemas.base
        };
        TableRef {
            schema: schema.clone(),
            table: self.table.clone(),
        }
    }

    pub fn translation_table(&self, history: bool) -> TableRef {
        let schema = if history {
            &self.schemas.translation_history
        } else {
            &self.schemas.translation
        };
        TableRef {
            schema: schema.clone(),
            table: self.table.clone(),
        }
    }

    /// Case-insensitive column lookup by property name
    pub fn column(&self, property: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.property.eq_ignore_ascii_case(property))
    }

    pub fn require_column(&self, property: &str) -> Result<&ColumnDefinition, DefinitionError> {
        self.column(property)
            .ok_or_else(|| DefinitionError::UnknownProperty {
                entity: self.entity.to_string(),
                property: property.to_string(),
            })
    }

    pub fn id_column(&self) -> Result<&ColumnDefinition, DefinitionError> {
        self.column(ID_PROPERTY)
            .ok_or_else(|| DefinitionError::MissingIdColumn {
                entity: self.entity.to_string(),
            })
    }

    pub fn text_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.iter().filter(|c| c.ty.is_text())
    }

    pub fn primary_key(&self) -> Option<&ConstraintDefinition> {
        let name = format!("PK_{}", self.entity);
        self.constraints.iter().find(|c| c.name == name)
    }

    /// Whether a read with the given language overlays translations
    pub fn uses_translation(&self, language: Option<&str>) -> bool {
        self.has_translation && language.map_or(false, |l| !l.is_empty())
    }
}
