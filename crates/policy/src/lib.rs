use std::cmp::Reverse;

use collegecm_contracts::validation::{FieldErrors, labels, messages};
use collegecm_contracts::{
    ALL_SUBJECTS_ID, ALL_TABLES_ID, AcademicYear, ResourceKind, StageScope, TableRef, YearScope,
};
use serde::{Deserialize, Serialize};

/// A stored privilege row, joined with the catalog name of its table when the
/// table id is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub user_id: i64,
    pub year: YearScope,
    pub table_id: i64,
    pub table_name: Option<String>,
    pub stage: StageScope,
    pub subject_id: i64,
    pub can_read: bool,
    pub can_write: bool,
}

impl Grant {
    pub fn is_wildcard_table(&self) -> bool {
        self.table_id == ALL_TABLES_ID
    }

    /// A wildcard-table grant covers partitioned tables of its year (or of
    /// every year) and covers global tables only when its year is `all`.
    pub fn applies_to(&self, table: &TableRef) -> bool {
        if self.is_wildcard_table() {
            return match table.year() {
                Some(year) => self.year.covers(year),
                None => self.year == YearScope::All,
            };
        }
        self.table_name.as_deref() == Some(table.table_name().as_str())
    }

    pub fn permits(&self, operation: Operation) -> bool {
        match operation {
            Operation::Read => self.can_read,
            Operation::Write => self.can_write,
        }
    }

    fn specificity(&self) -> (bool, bool, bool, bool, Reverse<i64>) {
        (
            !self.is_wildcard_table(),
            self.stage != StageScope::All,
            self.year != YearScope::All,
            self.subject_id != ALL_SUBJECTS_ID,
            Reverse(self.subject_id),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
        }
    }
}

/// Outcome of an access check. `Absent` means no grant matched at all;
/// `Denied` means a grant matched but its flag is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Absent,
    Denied,
    Allowed,
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        self == AccessDecision::Allowed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessDecision::Absent => "absent",
            AccessDecision::Denied => "denied",
            AccessDecision::Allowed => "allowed",
        }
    }
}

/// Picks the single grant answering `(table, stage)`, preferring the exact
/// table, then the exact stage, then the exact year, then a specific subject.
pub fn select_grant<'a>(grants: &'a [Grant], table: &TableRef, stage: StageScope) -> Option<&'a Grant> {
    grants
        .iter()
        .filter(|grant| grant.applies_to(table) && grant.stage.covers(stage))
        .max_by_key(|grant| grant.specificity())
}

/// Evaluates `operation` on `table`. With a stage, the most specific matching
/// grant decides. Without one (the coarse write gate), any grant on the table
/// that permits the operation allows it.
pub fn decide(
    grants: &[Grant],
    table: &TableRef,
    stage: Option<StageScope>,
    operation: Operation,
) -> AccessDecision {
    match stage {
        Some(stage) => match select_grant(grants, table, stage) {
            None => AccessDecision::Absent,
            Some(grant) if grant.permits(operation) => AccessDecision::Allowed,
            Some(_) => AccessDecision::Denied,
        },
        None => {
            let mut matched = grants.iter().filter(|grant| grant.applies_to(table)).peekable();
            if matched.peek().is_none() {
                return AccessDecision::Absent;
            }
            if matched.any(|grant| grant.permits(operation)) {
                AccessDecision::Allowed
            } else {
                AccessDecision::Denied
            }
        }
    }
}

/// Which sections of the composite student view a user may see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CustomAccess {
    #[serde(rename = "can_see_students")]
    pub students: bool,
    #[serde(rename = "can_see_subjects")]
    pub subjects: bool,
    #[serde(rename = "can_see_carryovers")]
    pub carryovers: bool,
    #[serde(rename = "can_see_exempted")]
    pub exempted: bool,
    #[serde(rename = "can_see_marks")]
    pub marks: bool,
}

impl CustomAccess {
    pub fn set(&mut self, kind: ResourceKind, decision: AccessDecision) {
        let slot = match kind {
            ResourceKind::Students => &mut self.students,
            ResourceKind::Subjects => &mut self.subjects,
            ResourceKind::Carryovers => &mut self.carryovers,
            ResourceKind::Exempted => &mut self.exempted,
            ResourceKind::Marks => &mut self.marks,
        };
        *slot = decision.is_allowed();
    }

    pub fn get(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Students => self.students,
            ResourceKind::Subjects => self.subjects,
            ResourceKind::Carryovers => self.carryovers,
            ResourceKind::Exempted => self.exempted,
            ResourceKind::Marks => self.marks,
        }
    }
}

/// Computes the five read capabilities for `year`/`stage` from one user's
/// grants. A missing grant turns off its own section only.
pub fn custom_access(grants: &[Grant], year: &AcademicYear, stage: StageScope) -> CustomAccess {
    let mut access = CustomAccess::default();
    for kind in ResourceKind::CREATION_ORDER {
        let table = TableRef::partitioned(kind, year);
        access.set(kind, decide(grants, &table, Some(stage), Operation::Read));
    }
    access
}

fn default_subject_id() -> Option<i64> {
    Some(ALL_SUBJECTS_ID)
}

/// Admin payload for creating or updating a grant.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrantRequest {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub table_id: Option<i64>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default = "default_subject_id")]
    pub subject_id: Option<i64>,
    #[serde(default)]
    pub can_read: bool,
    #[serde(default)]
    pub can_write: bool,
}

/// What the catalog says about a request's `table_id`.
#[derive(Debug, Clone, Copy)]
pub enum TableLookup<'a> {
    Wildcard,
    Registered(&'a TableRef),
    Unknown,
}

/// A validated grant ready to be upserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedGrant {
    pub user_id: i64,
    pub year: YearScope,
    pub table_id: i64,
    pub stage: StageScope,
    pub subject_id: i64,
    pub can_read: bool,
    pub can_write: bool,
}

pub fn normalize_grant(
    request: &GrantRequest,
    lookup: TableLookup<'_>,
) -> Result<NormalizedGrant, FieldErrors> {
    let mut errors = FieldErrors::new();

    let user_id = positive_id(request.user_id, labels::USER, &mut errors);

    let table_id = match request.table_id {
        None => {
            errors.add(labels::TABLE, messages::REQUIRED);
            None
        }
        Some(ALL_TABLES_ID) => Some(ALL_TABLES_ID),
        Some(id) if id <= 0 => {
            errors.add(labels::TABLE, messages::NOT_POSITIVE);
            None
        }
        Some(id) => {
            if matches!(lookup, TableLookup::Unknown | TableLookup::Wildcard) {
                errors.add(labels::TABLE, messages::UNKNOWN_TABLE);
            }
            Some(id)
        }
    };

    // Account-management tables are scoped all/all/-1 whatever the caller sent.
    if let TableLookup::Registered(table) = lookup
        && table.year().is_none()
    {
        let (Some(user_id), Some(table_id)) = (user_id, table_id) else {
            return Err(errors);
        };
        errors.into_result()?;
        return Ok(NormalizedGrant {
            user_id,
            year: YearScope::All,
            table_id,
            stage: StageScope::All,
            subject_id: ALL_SUBJECTS_ID,
            can_read: request.can_read,
            can_write: request.can_write,
        });
    }

    let stage = parse_required(request.stage.as_deref(), labels::STAGE, &mut errors)
        .and_then(|raw| {
            let parsed = StageScope::parse(raw);
            errors.check(parsed.is_some(), labels::STAGE, messages::INVALID_STAGE);
            parsed
        });

    let year = parse_required(request.year.as_deref(), labels::ACADEMIC_YEAR, &mut errors)
        .and_then(|raw| match YearScope::parse(raw) {
            Ok(year) => Some(year),
            Err(_) => {
                errors.add(labels::ACADEMIC_YEAR, messages::INVALID_YEAR);
                None
            }
        });

    let subject_id = match request.subject_id {
        None => {
            errors.add(labels::SUBJECT, messages::REQUIRED);
            None
        }
        Some(ALL_SUBJECTS_ID) => Some(ALL_SUBJECTS_ID),
        Some(id) if id <= 0 => {
            errors.add(labels::SUBJECT, messages::NOT_POSITIVE);
            None
        }
        Some(id) => Some(id),
    };

    let (Some(user_id), Some(table_id), Some(stage), Some(mut year), Some(subject_id)) =
        (user_id, table_id, stage, year, subject_id)
    else {
        return Err(errors);
    };
    errors.into_result()?;

    if let TableLookup::Registered(table) = lookup
        && let Some(table_year) = table.year()
    {
        if let YearScope::Year(own) = &year
            && own != table_year
        {
            let mut errors = FieldErrors::new();
            errors.add(labels::ACADEMIC_YEAR, messages::YEAR_MISMATCH);
            return Err(errors);
        }
        year = YearScope::Year(table_year.clone());
    }

    Ok(NormalizedGrant {
        user_id,
        year,
        table_id,
        stage,
        subject_id,
        can_read: request.can_read,
        can_write: request.can_write,
    })
}

/// Exact key of a grant to revoke. `year` narrows the match when present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrantKeyRequest {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub table_id: Option<i64>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default = "default_subject_id")]
    pub subject_id: Option<i64>,
    #[serde(default)]
    pub year: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantKey {
    pub user_id: i64,
    pub table_id: i64,
    pub stage: StageScope,
    pub subject_id: i64,
    pub year: Option<YearScope>,
}

pub fn parse_grant_key(request: &GrantKeyRequest) -> Result<GrantKey, FieldErrors> {
    let mut errors = FieldErrors::new();

    let user_id = positive_id(request.user_id, labels::USER, &mut errors);
    let table_id = match request.table_id {
        Some(id) if id == ALL_TABLES_ID || id > 0 => Some(id),
        Some(_) => {
            errors.add(labels::TABLE, messages::NOT_POSITIVE);
            None
        }
        None => {
            errors.add(labels::TABLE, messages::REQUIRED);
            None
        }
    };
    let stage = parse_required(request.stage.as_deref(), labels::STAGE, &mut errors)
        .and_then(|raw| {
            let parsed = StageScope::parse(raw);
            errors.check(parsed.is_some(), labels::STAGE, messages::INVALID_STAGE);
            parsed
        });
    let subject_id = match request.subject_id {
        Some(id) if id == ALL_SUBJECTS_ID || id > 0 => Some(id),
        Some(_) => {
            errors.add(labels::SUBJECT, messages::NOT_POSITIVE);
            None
        }
        None => {
            errors.add(labels::SUBJECT, messages::REQUIRED);
            None
        }
    };
    let year = match request.year.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match YearScope::parse(raw) {
            Ok(year) => Some(year),
            Err(_) => {
                errors.add(labels::ACADEMIC_YEAR, messages::INVALID_YEAR);
                None
            }
        },
    };

    match (user_id, table_id, stage, subject_id) {
        (Some(user_id), Some(table_id), Some(stage), Some(subject_id)) if errors.is_empty() => {
            Ok(GrantKey {
                user_id,
                table_id,
                stage,
                subject_id,
                year,
            })
        }
        _ => Err(errors),
    }
}

fn positive_id(value: Option<i64>, field: &str, errors: &mut FieldErrors) -> Option<i64> {
    match value {
        None => {
            errors.add(field, messages::REQUIRED);
            None
        }
        Some(id) if id <= 0 => {
            errors.add(field, messages::NOT_POSITIVE);
            None
        }
        Some(id) => Some(id),
    }
}

fn parse_required<'a>(value: Option<&'a str>, field: &str, errors: &mut FieldErrors) -> Option<&'a str> {
    match value.map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(raw),
        _ => {
            errors.add(field, messages::REQUIRED);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collegecm_contracts::{GlobalTable, Stage};

    fn year(raw: &str) -> AcademicYear {
        AcademicYear::parse(raw).expect("year should parse")
    }

    fn grant(table_id: i64, table: Option<&TableRef>, stage: StageScope, read: bool, write: bool) -> Grant {
        Grant {
            user_id: 5,
            year: table
                .and_then(TableRef::year)
                .cloned()
                .map(YearScope::Year)
                .unwrap_or(YearScope::All),
            table_id,
            table_name: table.map(TableRef::table_name),
            stage,
            subject_id: ALL_SUBJECTS_ID,
            can_read: read,
            can_write: write,
        }
    }

    const FIRST: StageScope = StageScope::Only(Stage::First);
    const SECOND: StageScope = StageScope::Only(Stage::Second);

    #[test]
    fn stage_specific_read_grant_matches_only_its_stage() {
        let students = TableRef::partitioned(ResourceKind::Students, &year("2023_2024"));
        let grants = vec![grant(11, Some(&students), FIRST, true, false)];

        assert!(select_grant(&grants, &students, FIRST).is_some());
        assert!(select_grant(&grants, &students, SECOND).is_none());
        assert_eq!(
            decide(&grants, &students, Some(FIRST), Operation::Read),
            AccessDecision::Allowed
        );
        assert_eq!(
            decide(&grants, &students, Some(SECOND), Operation::Read),
            AccessDecision::Absent
        );
        assert_eq!(
            decide(&grants, &students, Some(FIRST), Operation::Write),
            AccessDecision::Denied
        );
        assert!(!decide(&grants, &students, Some(FIRST), Operation::Write).is_allowed());
    }

    #[test]
    fn wildcard_stage_grant_matches_every_concrete_stage() {
        let marks = TableRef::partitioned(ResourceKind::Marks, &year("2023_2024"));
        let grants = vec![grant(12, Some(&marks), StageScope::All, true, true)];

        for stage in Stage::ALL {
            assert_eq!(
                decide(&grants, &marks, Some(StageScope::Only(stage)), Operation::Write),
                AccessDecision::Allowed
            );
        }
    }

    #[test]
    fn grant_on_other_table_is_absent() {
        let marks = TableRef::partitioned(ResourceKind::Marks, &year("2023_2024"));
        let next_marks = TableRef::partitioned(ResourceKind::Marks, &year("2024_2025"));
        let grants = vec![grant(12, Some(&marks), StageScope::All, true, true)];

        assert_eq!(
            decide(&grants, &next_marks, Some(FIRST), Operation::Read),
            AccessDecision::Absent
        );
    }

    #[test]
    fn most_specific_grant_wins() {
        let students = TableRef::partitioned(ResourceKind::Students, &year("2023_2024"));
        let grants = vec![
            grant(11, Some(&students), StageScope::All, true, true),
            grant(11, Some(&students), FIRST, true, false),
            grant(ALL_TABLES_ID, None, FIRST, true, true),
        ];

        assert_eq!(
            decide(&grants, &students, Some(FIRST), Operation::Write),
            AccessDecision::Denied
        );
        assert_eq!(
            decide(&grants, &students, Some(SECOND), Operation::Write),
            AccessDecision::Allowed
        );
    }

    #[test]
    fn coarse_write_gate_ignores_stage() {
        let subjects = TableRef::partitioned(ResourceKind::Subjects, &year("2023_2024"));
        let readonly = vec![grant(13, Some(&subjects), FIRST, true, false)];
        let mixed = vec![
            grant(13, Some(&subjects), FIRST, true, false),
            grant(13, Some(&subjects), SECOND, true, true),
        ];

        assert_eq!(decide(&[], &subjects, None, Operation::Write), AccessDecision::Absent);
        assert_eq!(
            decide(&readonly, &subjects, None, Operation::Write),
            AccessDecision::Denied
        );
        assert_eq!(decide(&mixed, &subjects, None, Operation::Write), AccessDecision::Allowed);
    }

    #[test]
    fn wildcard_table_grant_respects_year_and_global_tables() {
        let this_year = year("2023_2024");
        let students = TableRef::partitioned(ResourceKind::Students, &this_year);
        let other = TableRef::partitioned(ResourceKind::Students, &year("2024_2025"));
        let users = TableRef::Global(GlobalTable::Users);

        let mut scoped = grant(ALL_TABLES_ID, None, StageScope::All, true, true);
        scoped.year = YearScope::Year(this_year);
        assert!(scoped.applies_to(&students));
        assert!(!scoped.applies_to(&other));
        assert!(!scoped.applies_to(&users));

        let everything = grant(ALL_TABLES_ID, None, StageScope::All, true, true);
        assert!(everything.applies_to(&other));
        assert!(everything.applies_to(&users));
    }

    #[test]
    fn custom_access_sets_each_section_independently() {
        let y = year("2024_2025");
        let students = TableRef::partitioned(ResourceKind::Students, &y);
        let marks = TableRef::partitioned(ResourceKind::Marks, &y);
        let grants = vec![
            grant(21, Some(&students), StageScope::All, true, false),
            grant(25, Some(&marks), StageScope::All, true, false),
        ];

        let access = custom_access(&grants, &y, FIRST);
        assert_eq!(
            access,
            CustomAccess {
                students: true,
                subjects: false,
                carryovers: false,
                exempted: false,
                marks: true,
            }
        );

        let json = serde_json::to_value(access).expect("access should serialize");
        assert_eq!(json["can_see_marks"], serde_json::json!(true));
        assert_eq!(json["can_see_exempted"], serde_json::json!(false));
    }

    fn request(table_id: i64, stage: &str, year: &str) -> GrantRequest {
        GrantRequest {
            user_id: Some(5),
            year: Some(year.to_string()),
            table_id: Some(table_id),
            stage: Some(stage.to_string()),
            subject_id: Some(ALL_SUBJECTS_ID),
            can_read: true,
            can_write: false,
        }
    }

    #[test]
    fn global_table_grants_are_forced_to_wildcards() {
        let users = TableRef::Global(GlobalTable::Users);
        let mut req = request(1, "الاولى", "2023_2024");
        req.subject_id = Some(7);

        let normalized =
            normalize_grant(&req, TableLookup::Registered(&users)).expect("grant should normalize");
        assert_eq!(normalized.year, YearScope::All);
        assert_eq!(normalized.stage, StageScope::All);
        assert_eq!(normalized.subject_id, ALL_SUBJECTS_ID);
    }

    #[test]
    fn global_table_grants_ignore_scope_fields_entirely() {
        let users = TableRef::Global(GlobalTable::Users);
        let req = GrantRequest {
            user_id: Some(5),
            year: None,
            table_id: Some(1),
            stage: Some("bogus".to_string()),
            subject_id: Some(0),
            can_read: true,
            can_write: true,
        };

        let normalized =
            normalize_grant(&req, TableLookup::Registered(&users)).expect("grant should normalize");
        assert_eq!(normalized.user_id, 5);
        assert_eq!(normalized.table_id, 1);
        assert_eq!(normalized.year, YearScope::All);
        assert_eq!(normalized.stage, StageScope::All);
        assert_eq!(normalized.subject_id, ALL_SUBJECTS_ID);
        assert!(normalized.can_write);

        let mut missing_user = req.clone();
        missing_user.user_id = None;
        let errors = normalize_grant(&missing_user, TableLookup::Registered(&users))
            .expect_err("user is still required");
        assert_eq!(errors.get(labels::USER), Some(messages::REQUIRED));
        assert_eq!(errors.get(labels::STAGE), None);
    }

    #[test]
    fn partitioned_grant_takes_the_table_year() {
        let y = year("2023_2024");
        let students = TableRef::partitioned(ResourceKind::Students, &y);

        let normalized = normalize_grant(&request(4, "all", "all"), TableLookup::Registered(&students))
            .expect("grant should normalize");
        assert_eq!(normalized.year, YearScope::Year(y));

        let errors = normalize_grant(
            &request(4, "all", "2024_2025"),
            TableLookup::Registered(&students),
        )
        .expect_err("mismatched year should fail");
        assert_eq!(errors.get(labels::ACADEMIC_YEAR), Some(messages::YEAR_MISMATCH));
    }

    #[test]
    fn invalid_grant_fields_are_reported_in_arabic() {
        let mut req = request(0, "السابعة", "2023_2025");
        req.user_id = None;
        req.subject_id = Some(0);

        let errors = normalize_grant(&req, TableLookup::Unknown).expect_err("request should fail");
        assert_eq!(errors.get(labels::USER), Some(messages::REQUIRED));
        assert_eq!(errors.get(labels::TABLE), Some(messages::NOT_POSITIVE));
        assert_eq!(errors.get(labels::STAGE), Some(messages::INVALID_STAGE));
        assert_eq!(errors.get(labels::ACADEMIC_YEAR), Some(messages::INVALID_YEAR));
        assert_eq!(errors.get(labels::SUBJECT), Some(messages::NOT_POSITIVE));

        let errors = normalize_grant(&request(99, "all", "all"), TableLookup::Unknown)
            .expect_err("unknown table should fail");
        assert_eq!(errors.get(labels::TABLE), Some(messages::UNKNOWN_TABLE));
    }

    #[test]
    fn wildcard_table_keeps_requested_scope() {
        let normalized = normalize_grant(&request(ALL_TABLES_ID, "الثانية", "2023_2024"), TableLookup::Wildcard)
            .expect("grant should normalize");
        assert_eq!(normalized.table_id, ALL_TABLES_ID);
        assert_eq!(normalized.stage, SECOND);
        assert_eq!(normalized.year, YearScope::Year(year("2023_2024")));
    }

    #[test]
    fn grant_key_requires_exact_fields() {
        let key = parse_grant_key(&GrantKeyRequest {
            user_id: Some(5),
            table_id: Some(ALL_TABLES_ID),
            stage: Some("all".to_string()),
            subject_id: Some(ALL_SUBJECTS_ID),
            year: None,
        })
        .expect("key should parse");
        assert_eq!(key.stage, StageScope::All);
        assert_eq!(key.year, None);

        let errors = parse_grant_key(&GrantKeyRequest::default()).expect_err("empty key should fail");
        assert_eq!(errors.get(labels::USER), Some(messages::REQUIRED));
        assert_eq!(errors.get(labels::STAGE), Some(messages::REQUIRED));
    }
}
