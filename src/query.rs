use std::str::FromStr;

use chrono::{DateTime, Utc};
use strum_macros::{Display, EnumString};

use crate::schema::DefinitionError;

mod compiler;
mod value;

pub use compiler::QueryCompiler;
pub(crate) use compiler::TOTAL_ITEMS_COLUMN;
pub use value::SqlValue;
pub(crate) use value::property_value;

pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Per-call read options
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// Overlays translated text columns when the definition has translations
    pub language: Option<String>,
    /// Reads from the history schemas as of this point in time
    pub as_of: Option<DateTime<Utc>>,
    pub use_paging: bool,
    /// 1-based
    pub page_number: u32,
    pub page_size: u32,
    /// Property to order by; falls back to `id`
    pub order_by: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            language: None,
            as_of: None,
            use_paging: false,
            page_number: 1,
            page_size: DEFAULT_PAGE_SIZE,
            order_by: None,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn page(mut self, page_number: u32, page_size: u32) -> Self {
        self.use_paging = true;
        self.page_number = page_number;
        self.page_size = page_size;
        self
    }

    pub fn order_by(mut self, property: impl Into<String>) -> Self {
        self.order_by = Some(property.into());
        self
    }

    /// The requested language, if any non-empty one was given
    pub fn requested_language(&self) -> Option<&str> {
        self.language.as_deref().filter(|l| !l.is_empty())
    }

    /// Zero-based offset of the first row on the requested page
    pub fn offset(&self) -> u64 {
        u64::from(self.page_number.max(1) - 1) * u64::from(self.limit())
    }

    pub fn limit(&self) -> u32 {
        self.page_size.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum FilterOperator {
    #[strum(serialize = "eq")]
    Equal,
    #[strum(serialize = "ne")]
    NotEqual,
    #[strum(serialize = "gt")]
    GreaterThan,
    #[strum(serialize = "gte")]
    GreaterOrEqual,
    #[strum(serialize = "lt")]
    LessThan,
    #[strum(serialize = "lte")]
    LessOrEqual,
    StartsWith,
    EndsWith,
    Contains,
}

impl FilterOperator {
    /// Parses an operator name, failing with a configuration error on
    /// anything unrecognized.
    pub fn parse(name: &str) -> Result<Self, DefinitionError> {
        Self::from_str(name).map_err(|_| DefinitionError::UnsupportedOperator(name.to_string()))
    }

    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            FilterOperator::StartsWith | FilterOperator::EndsWith | FilterOperator::Contains
        )
    }

    pub(crate) fn sql(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "=",
            FilterOperator::NotEqual => "<>",
            FilterOperator::GreaterThan => ">",
            FilterOperator::GreaterOrEqual => ">=",
            FilterOperator::LessThan => "<",
            FilterOperator::LessOrEqual => "<=",
            FilterOperator::StartsWith | FilterOperator::EndsWith | FilterOperator::Contains => {
                "ILIKE"
            }
        }
    }

    /// Wraps `text` with the wildcards of a pattern operator. LIKE
    /// metacharacters in `text` match literally.
    pub(crate) fn pattern(&self, text: &str) -> String {
        let escaped = text
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        match self {
            FilterOperator::StartsWith => format!("{escaped}%"),
            FilterOperator::EndsWith => format!("%{escaped}"),
            _ => format!("%{escaped}%"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub property: String,
    pub operator: FilterOperator,
    pub value: SqlValue,
}

/// A conjunction of filter predicates.
///
/// ```ignore
/// let filters = Filters::new()
///     .equal("areaId", area_id)
///     .add("name", "startswith", "Nor")?;
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(Vec<Filter>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equal(self, property: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.with(property, FilterOperator::Equal, value)
    }

    pub fn with(
        mut self,
        property: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<SqlValue>,
    ) -> Self {
        self.0.push(Filter {
            property: property.into(),
            operator,
            value: value.into(),
        });
        self
    }

    /// Adds a predicate with the operator given by name (`eq`, `startswith`...).
    pub fn add(
        self,
        property: impl Into<String>,
        operator: &str,
        value: impl Into<SqlValue>,
    ) -> Result<Self, DefinitionError> {
        Ok(self.with(property, FilterOperator::parse(operator)?, value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.0.iter()
    }
}

/// A single `SET property = value` of a partial update
#[derive(Debug, Clone, PartialEq)]
pub struct PartialUpdate {
    pub property: String,
    pub value: SqlValue,
}

impl PartialUpdate {
    pub fn new(property: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }
}

/// SQL text plus its positional parameters. Parameter `$n` is
/// `params[n - 1]`; the name records which property it was bound for.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<(String, SqlValue)>,
    /// Session value the store uses for point-in-time visibility
    pub as_of: Option<DateTime<Utc>>,
}

impl CompiledQuery {
    /// Parameter values for logging
    pub fn describe_params(&self) -> String {
        self.params
            .iter()
            .enumerate()
            .map(|(i, (name, value))| format!("${} ({name}) = {value}", i + 1))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
