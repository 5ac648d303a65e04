use std::fmt;

use crate::{AcademicYear, ResourceKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    EmptyYear,
    InvalidYear(String),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::EmptyYear => f.write_str("academic year must not be empty"),
            SchemaError::InvalidYear(year) => write!(f, "invalid academic year `{year}`"),
        }
    }
}

impl std::error::Error for SchemaError {}

/// Resolves the physical relation backing `kind` for `year`.
pub fn resolve(kind: ResourceKind, year: &str) -> Result<String, SchemaError> {
    let year = AcademicYear::parse(year)?;
    Ok(relation_name(kind, &year))
}

pub fn relation_name(kind: ResourceKind, year: &AcademicYear) -> String {
    format!("{}_{}", kind.as_str(), year.as_str())
}

/// The five relations of a year, in creation order.
pub fn year_relations(year: &AcademicYear) -> [(ResourceKind, String); 5] {
    ResourceKind::CREATION_ORDER.map(|kind| (kind, relation_name(kind, year)))
}

/// Quotes a relation name for interpolation into DDL/DML. Only ever called
/// with names produced by [`relation_name`] or a [`crate::GlobalTable`].
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `LIKE` pattern matching every catalog name ending in `_<year>`. The
/// underscores are escaped so they match literally (use with `ESCAPE '\'`).
pub fn year_suffix_pattern(year: &AcademicYear) -> String {
    format!("%\\_{}", year.as_str().replace('_', "\\_"))
}
