use std::fmt::{self, Display};

use super::DefinitionError;

/// Postgres truncates identifiers longer than this (NAMEDATALEN - 1).
const MAX_IDENT_LEN: usize = 63;

/// A validated SQL identifier (schema, table, column or alias name).
///
/// This is the only way names coming from definitions reach generated SQL:
/// an `Ident` can't be built without passing validation, and it always renders
/// double-quoted, so case is preserved and no keyword can be mistaken for a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    pub fn new(name: impl Into<String>) -> Result<Self, DefinitionError> {
        let name = name.into();
        if is_valid(&name) {
            Ok(Self(name))
        } else {
            Err(DefinitionError::InvalidIdentifier(name))
        }
    }

    /// Joins two validated identifiers with an underscore, e.g. `area` + `id`
    /// gives the `area_id` projection alias. Both halves are already valid, so
    /// only the length can make the result unusable.
    pub fn joined(&self, other: &Ident) -> Result<Self, DefinitionError> {
        Self::new(format!("{}_{}", self.0, other.0))
    }

    pub fn prefixed(&self, prefix: &str) -> Result<Self, DefinitionError> {
        Self::new(format!("{prefix}{}", self.0))
    }

    /// For names fixed in this crate's source, which are known to be valid.
    pub(crate) fn trusted(name: &'static str) -> Self {
        debug_assert!(is_valid(name), "invalid built-in identifier {name}");
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }

    name.len() <= MAX_IDENT_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

/// A schema-qualified table reference, e.g. `"dbo"."Area"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Ident,
    pub table: Ident,
}

impl Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}
