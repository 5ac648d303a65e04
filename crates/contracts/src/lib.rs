use std::fmt;

use serde::{Deserialize, Serialize};

pub mod schema;
pub mod validation;

pub use schema::SchemaError;

/// Wildcard value stored in the `stage` and `year` columns of a grant.
pub const WILDCARD: &str = "all";
/// Sentinel `table_id` of a grant that covers every registered table.
pub const ALL_TABLES_ID: i64 = -1;
/// Sentinel `subject_id` of a grant that covers every subject.
pub const ALL_SUBJECTS_ID: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Stage {
    First,
    Second,
    Third,
    Fourth,
    Fifth,
    Sixth,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::First,
        Stage::Second,
        Stage::Third,
        Stage::Fourth,
        Stage::Fifth,
        Stage::Sixth,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::First => "الاولى",
            Stage::Second => "الثانية",
            Stage::Third => "الثالثة",
            Stage::Fourth => "الرابعة",
            Stage::Fifth => "الخامسة",
            Stage::Sixth => "السادسة",
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Stage::First => 1,
            Stage::Second => 2,
            Stage::Third => 3,
            Stage::Fourth => 4,
            Stage::Fifth => 5,
            Stage::Sixth => 6,
        }
    }

    /// Maps the numeric path code `1`..`6` onto a stage.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(Stage::First),
            "2" => Some(Stage::Second),
            "3" => Some(Stage::Third),
            "4" => Some(Stage::Fourth),
            "5" => Some(Stage::Fifth),
            "6" => Some(Stage::Sixth),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|stage| stage.as_str() == name)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Stage {
    type Error = ParseValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Stage::from_name(&value).ok_or_else(|| ParseValueError::new("stage", value))
    }
}

impl From<Stage> for String {
    fn from(value: Stage) -> Self {
        value.as_str().to_string()
    }
}

/// A stage as it appears on a grant or in a request path: one concrete stage
/// or the `all` wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StageScope {
    All,
    Only(Stage),
}

impl StageScope {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value == WILDCARD {
            return Some(StageScope::All);
        }
        Stage::from_name(value).map(StageScope::Only)
    }

    /// Parses the `{stage}` path segment: `1`..`6` or `all`. Anything else is
    /// rejected.
    pub fn from_path_code(code: &str) -> Option<Self> {
        let code = code.trim();
        if code == WILDCARD {
            return Some(StageScope::All);
        }
        Stage::from_code(code).map(StageScope::Only)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageScope::All => WILDCARD,
            StageScope::Only(stage) => stage.as_str(),
        }
    }

    pub fn stage(self) -> Option<Stage> {
        match self {
            StageScope::All => None,
            StageScope::Only(stage) => Some(stage),
        }
    }

    /// Whether a grant carrying this scope answers a request for `requested`.
    /// The wildcard answers everything; a concrete stage answers only itself,
    /// so a request for `all` is only answered by a wildcard grant.
    pub fn covers(self, requested: StageScope) -> bool {
        match self {
            StageScope::All => true,
            StageScope::Only(_) => self == requested,
        }
    }
}

impl From<Stage> for StageScope {
    fn from(value: Stage) -> Self {
        StageScope::Only(value)
    }
}

impl fmt::Display for StageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for StageScope {
    type Error = ParseValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StageScope::parse(&value).ok_or_else(|| ParseValueError::new("stage", value))
    }
}

impl From<StageScope> for String {
    fn from(value: StageScope) -> Self {
        value.as_str().to_string()
    }
}

/// Academic year key `YYYY_YYYY`, second year exactly one after the first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AcademicYear(String);

impl AcademicYear {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SchemaError::EmptyYear);
        }
        if !is_valid_academic_year(raw) {
            return Err(SchemaError::InvalidYear(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn first_year(&self) -> u32 {
        self.0[..4].parse().unwrap_or_default()
    }
}

impl fmt::Display for AcademicYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AcademicYear {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AcademicYear::parse(&value)
    }
}

impl From<AcademicYear> for String {
    fn from(value: AcademicYear) -> Self {
        value.0
    }
}

pub fn is_valid_academic_year(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 9 || bytes[4] != b'_' {
        return false;
    }
    if !bytes[..4].iter().chain(&bytes[5..]).all(u8::is_ascii_digit) {
        return false;
    }

    let (Ok(first), Ok(second)) = (value[..4].parse::<u32>(), value[5..].parse::<u32>()) else {
        return false;
    };
    second == first + 1
}

/// Year column of a grant: a single academic year or the `all` wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum YearScope {
    All,
    Year(AcademicYear),
}

impl YearScope {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        if raw.trim() == WILDCARD {
            return Ok(YearScope::All);
        }
        AcademicYear::parse(raw).map(YearScope::Year)
    }

    pub fn as_str(&self) -> &str {
        match self {
            YearScope::All => WILDCARD,
            YearScope::Year(year) => year.as_str(),
        }
    }

    pub fn covers(&self, year: &AcademicYear) -> bool {
        match self {
            YearScope::All => true,
            YearScope::Year(own) => own == year,
        }
    }
}

impl fmt::Display for YearScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for YearScope {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        YearScope::parse(&value)
    }
}

impl From<YearScope> for String {
    fn from(value: YearScope) -> Self {
        value.as_str().to_string()
    }
}

/// The five relations every academic year owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Students,
    Subjects,
    Carryovers,
    Exempted,
    Marks,
}

impl ResourceKind {
    /// Creation order; dependents come after `students` and `subjects`.
    pub const CREATION_ORDER: [ResourceKind; 5] = [
        ResourceKind::Students,
        ResourceKind::Subjects,
        ResourceKind::Carryovers,
        ResourceKind::Exempted,
        ResourceKind::Marks,
    ];

    pub const DROP_ORDER: [ResourceKind; 5] = [
        ResourceKind::Marks,
        ResourceKind::Exempted,
        ResourceKind::Carryovers,
        ResourceKind::Students,
        ResourceKind::Subjects,
    ];

    /// Relation prefix. `exempted` is singular, unlike the other four.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Students => "students",
            ResourceKind::Subjects => "subjects",
            ResourceKind::Carryovers => "carryovers",
            ResourceKind::Exempted => "exempted",
            ResourceKind::Marks => "marks",
        }
    }

    /// Carryovers, exempted and marks rows carry no stage of their own; their
    /// stage is the referenced student's stage.
    pub fn stage_from_student(self) -> bool {
        matches!(
            self,
            ResourceKind::Carryovers | ResourceKind::Exempted | ResourceKind::Marks
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Singleton relations whose grants are always global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalTable {
    Users,
    Privileges,
    Years,
}

impl GlobalTable {
    pub const ALL: [GlobalTable; 3] = [GlobalTable::Users, GlobalTable::Privileges, GlobalTable::Years];

    pub fn as_str(self) -> &'static str {
        match self {
            GlobalTable::Users => "users",
            GlobalTable::Privileges => "privileges",
            GlobalTable::Years => "years",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|table| table.as_str() == value.trim())
    }
}

/// A table a grant can reference, addressed structurally rather than by a
/// concatenated string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableRef {
    Partitioned {
        kind: ResourceKind,
        year: AcademicYear,
    },
    Global(GlobalTable),
}

impl TableRef {
    pub fn partitioned(kind: ResourceKind, year: &AcademicYear) -> Self {
        TableRef::Partitioned {
            kind,
            year: year.clone(),
        }
    }

    /// Physical relation name. This is the only place a table name is built.
    pub fn table_name(&self) -> String {
        match self {
            TableRef::Partitioned { kind, year } => schema::relation_name(*kind, year),
            TableRef::Global(table) => table.as_str().to_string(),
        }
    }

    /// Classifies a catalog `table_name`. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(table) = GlobalTable::parse(name) {
            return Some(TableRef::Global(table));
        }

        ResourceKind::CREATION_ORDER.into_iter().find_map(|kind| {
            let year = name.strip_prefix(kind.as_str())?.strip_prefix('_')?;
            if !is_valid_academic_year(year) {
                return None;
            }
            AcademicYear::parse(year)
                .ok()
                .map(|year| TableRef::Partitioned { kind, year })
        })
    }

    pub fn year(&self) -> Option<&AcademicYear> {
        match self {
            TableRef::Partitioned { year, .. } => Some(year),
            TableRef::Global(_) => None,
        }
    }

    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            TableRef::Partitioned { kind, .. } => Some(*kind),
            TableRef::Global(_) => None,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, TableRef::Global(_))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.table_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseValueError {
    what: &'static str,
    value: String,
}

impl ParseValueError {
    fn new(what: &'static str, value: String) -> Self {
        Self { what, value }
    }
}

impl fmt::Display for ParseValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} `{}`", self.what, self.value)
    }
}

impl std::error::Error for ParseValueError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn academic_year_requires_consecutive_years() {
        assert!(is_valid_academic_year("2023_2024"));
        assert!(is_valid_academic_year("1999_2000"));

        for bad in ["2023_2023", "2023_2025", "abcd_efgh", "2023-2024", "2024_2023", "23_24"] {
            assert!(!is_valid_academic_year(bad), "{bad} must be rejected");
        }
    }

    #[test]
    fn academic_year_parse_distinguishes_empty_from_invalid() {
        assert_eq!(AcademicYear::parse("   "), Err(SchemaError::EmptyYear));
        assert_eq!(
            AcademicYear::parse("2023_2025"),
            Err(SchemaError::InvalidYear("2023_2025".to_string()))
        );

        let year = AcademicYear::parse(" 2023_2024 ").expect("year should parse");
        assert_eq!(year.as_str(), "2023_2024");
        assert_eq!(year.first_year(), 2023);
    }

    #[test]
    fn stage_path_codes_map_to_arabic_names() {
        assert_eq!(StageScope::from_path_code("1"), Some(StageScope::Only(Stage::First)));
        assert_eq!(
            StageScope::from_path_code("6").map(StageScope::as_str),
            Some("السادسة")
        );
        assert_eq!(StageScope::from_path_code("all"), Some(StageScope::All));
        assert_eq!(StageScope::from_path_code("7"), None);
        assert_eq!(StageScope::from_path_code("0"), None);
        assert_eq!(StageScope::from_path_code("الاولى"), None);
    }

    #[test]
    fn wildcard_stage_covers_every_request_but_concrete_stage_does_not() {
        let first = StageScope::Only(Stage::First);
        let second = StageScope::Only(Stage::Second);

        assert!(StageScope::All.covers(first));
        assert!(StageScope::All.covers(StageScope::All));
        assert!(first.covers(first));
        assert!(!first.covers(second));
        assert!(!first.covers(StageScope::All));
    }

    #[test]
    fn stage_serializes_as_arabic_name() {
        let json = serde_json::to_value(Stage::Third).expect("stage should serialize");
        assert_eq!(json, serde_json::json!("الثالثة"));

        let parsed: StageScope =
            serde_json::from_value(serde_json::json!("all")).expect("wildcard should parse");
        assert_eq!(parsed, StageScope::All);

        assert!(serde_json::from_value::<Stage>(serde_json::json!("first")).is_err());
    }

    #[test]
    fn table_ref_classifies_catalog_names() {
        let year = AcademicYear::parse("2023_2024").expect("year should parse");

        assert_eq!(
            TableRef::parse("exempted_2023_2024"),
            Some(TableRef::partitioned(ResourceKind::Exempted, &year))
        );
        assert_eq!(
            TableRef::parse("privileges"),
            Some(TableRef::Global(GlobalTable::Privileges))
        );
        assert_eq!(TableRef::parse("exempteds_2023_2024"), None);
        assert_eq!(TableRef::parse("marks_2023_2025"), None);
        assert_eq!(TableRef::parse("tables"), None);
    }

    #[test]
    fn year_scope_wildcard_covers_any_year() {
        let year = AcademicYear::parse("2024_2025").expect("year should parse");
        let other = AcademicYear::parse("2025_2026").expect("year should parse");

        assert!(YearScope::All.covers(&year));
        assert!(YearScope::Year(year.clone()).covers(&year));
        assert!(!YearScope::Year(year).covers(&other));
        assert!(YearScope::parse("2024-2025").is_err());
    }
}
