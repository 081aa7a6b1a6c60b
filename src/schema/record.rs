use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

/// Storage-level type of a scalar property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Uuid,
    Text,
    Int,
    BigInt,
    Float,
    Bool,
    Timestamp,
    Date,
    Json,
}

impl ScalarType {
    pub fn is_text(&self) -> bool {
        matches!(self, ScalarType::Text)
    }

    /// Column type used when generating DDL
    pub fn sql_type(&self, length: Option<u32>) -> String {
        match (self, length) {
            (ScalarType::Text, Some(length)) => format!("VARCHAR({length})"),
            (ScalarType::Text, None) => "TEXT".to_string(),
            (ScalarType::Uuid, _) => "UUID".to_string(),
            (ScalarType::Int, _) => "INTEGER".to_string(),
            (ScalarType::BigInt, _) => "BIGINT".to_string(),
            (ScalarType::Float, _) => "DOUBLE PRECISION".to_string(),
            (ScalarType::Bool, _) => "BOOLEAN".to_string(),
            (ScalarType::Timestamp, _) => "TIMESTAMPTZ".to_string(),
            (ScalarType::Date, _) => "DATE".to_string(),
            (ScalarType::Json, _) => "JSONB".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Scalar { ty: ScalarType, nullable: bool },
    /// A single joined record, hydrated from `{name}_{column}` columns
    Nested(fn() -> Vec<Field>),
    /// A collection hydrated from a JSON array payload
    List(fn() -> Vec<Field>),
}

/// One declared property of a [`Record`]. The name is the serde name of the
/// property, which is also the default storage name of its column.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Field {
    pub fn scalar(name: &'static str, ty: ScalarType) -> Self {
        Self {
            name,
            kind: FieldKind::Scalar {
                ty,
                nullable: false,
            },
        }
    }

    pub fn nullable(name: &'static str, ty: ScalarType) -> Self {
        Self {
            name,
            kind: FieldKind::Scalar { ty, nullable: true },
        }
    }

    pub fn nested<R: Record>(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Nested(R::fields),
        }
    }

    pub fn list<R: Record>(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::List(R::fields),
        }
    }

    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self.kind {
            FieldKind::Scalar { ty, .. } => Some(ty),
            _ => None,
        }
    }
}

/// A type that rows can be materialized into.
///
/// This replaces runtime reflection: every record declares its properties up
/// front, and both the definition builder and the materializer resolve names
/// against that list only.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// pub struct Area {
///     pub id: Uuid,
///     pub name: String,
/// }
///
/// impl Record for Area {
///     const NAME: &'static str = "Area";
///     fn fields() -> Vec<Field> {
///         vec![
///             Field::scalar("id", ScalarType::Uuid),
///             Field::scalar("name", ScalarType::Text),
///         ]
///     }
/// }
/// ```
pub trait Record: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    /// Type name, also the table name in every schema
    const NAME: &'static str;

    fn fields() -> Vec<Field>;

    fn field(name: &str) -> Option<Field> {
        Self::fields()
            .into_iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// A record with its own table and a mandatory unique `id`.
pub trait Entity: Record {
    fn id(&self) -> Uuid;
}

/// The property every entity is keyed by.
pub const ID_PROPERTY: &str = "id";
