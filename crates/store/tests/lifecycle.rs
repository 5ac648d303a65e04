use collegecm_contracts::{AcademicYear, ResourceKind, Stage, StageScope, TableRef};
use collegecm_policy::GrantRequest;
use collegecm_store::{
    LinkInput, MarkInput, NewUser, Store, StoreError, StoreTimeouts, StudentInput, SubjectInput,
};

fn test_db_url() -> Option<String> {
    std::env::var("COLLEGECM_TEST_DB_URL")
        .ok()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn schema_db_url(base: &str, schema: &str) -> String {
    let separator = if base.contains('?') { "&" } else { "?" };
    format!("{base}{separator}options=-csearch_path%3D{schema}")
}

struct Fixture {
    admin: sqlx::PgPool,
    schema: String,
    store: Store,
}

impl Fixture {
    async fn start(db_url: &str) -> Self {
        let schema = format!("collegecm_test_{}", ulid::Ulid::new()).to_lowercase();

        let admin = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(db_url)
            .await
            .expect("DB connect should succeed");
        sqlx::query(&format!("CREATE SCHEMA {}", schema))
            .execute(&admin)
            .await
            .expect("create schema should succeed");

        let store = Store::connect_and_migrate(
            &schema_db_url(db_url, &schema),
            4,
            StoreTimeouts::default(),
        )
        .await
        .expect("store should connect and migrate");

        Self {
            admin,
            schema,
            store,
        }
    }

    async fn finish(self) {
        self.store.close().await;
        let _ = sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
            .execute(&self.admin)
            .await;
        self.admin.close().await;
    }
}

fn student(id: i64, stage: &str) -> StudentInput {
    StudentInput {
        student_id: Some(id),
        student_name: Some(format!("طالب {id}")),
        stage: Some(stage.to_string()),
        state: Some("مستمر".to_string()),
    }
}

fn subject(id: i64, stage: &str) -> SubjectInput {
    SubjectInput {
        subject_id: Some(id),
        subject_name: Some(format!("مادة {id}")),
        subject_name_english: Some(format!("Subject {id}")),
        stage: Some(stage.to_string()),
        semester: Some("الاول".to_string()),
        department: Some("العلوم الاساسية".to_string()),
        max_theory_mark: Some(60),
        max_lab_mark: Some(40),
        max_semester_mark: Some(40),
        max_final_exam: Some(60),
        credits: Some(3),
        active: Some("نعم".to_string()),
        ministerial: Some("لا".to_string()),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn open_year_creates_registers_and_rejects_reopen() {
    let Some(db_url) = test_db_url() else {
        eprintln!("skipping year lifecycle test; set COLLEGECM_TEST_DB_URL to enable");
        return;
    };
    let fixture = Fixture::start(&db_url).await;
    let store = &fixture.store;
    let year = AcademicYear::parse("2023_2024").expect("year should parse");

    let opened = store.open_year(&year).await.expect("open should succeed");
    assert_eq!(opened.year, year);

    let names: Vec<String> = store
        .list_tables()
        .await
        .expect("catalog should list")
        .into_iter()
        .map(|entry| entry.table_name)
        .collect();
    for expected in [
        "users",
        "privileges",
        "years",
        "students_2023_2024",
        "subjects_2023_2024",
        "carryovers_2023_2024",
        "exempted_2023_2024",
        "marks_2023_2024",
    ] {
        assert!(names.iter().any(|name| name == expected), "missing {expected}");
    }

    let reopened = store.open_year(&year).await;
    assert!(matches!(reopened, Err(StoreError::Conflict)));
    assert_eq!(
        store.list_tables().await.expect("catalog should list").len(),
        names.len()
    );
    assert_eq!(store.list_years().await.expect("years should list").len(), 1);

    fixture.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn link_writes_resolve_the_students_current_stage() {
    let Some(db_url) = test_db_url() else {
        eprintln!("skipping record stage test; set COLLEGECM_TEST_DB_URL to enable");
        return;
    };
    let fixture = Fixture::start(&db_url).await;
    let store = &fixture.store;
    let year = AcademicYear::parse("2024_2025").expect("year should parse");
    store.open_year(&year).await.expect("open should succeed");

    let new_student = student(1001, "الاولى").validate(None).expect("student valid");
    let created = store
        .insert_student(&year, &new_student)
        .await
        .expect("insert student should succeed");
    let new_subject = subject(11, "الاولى").validate(None).expect("subject valid");
    store
        .insert_subject(&year, &new_subject)
        .await
        .expect("insert subject should succeed");

    let link = LinkInput {
        student_id: Some(1001),
        subject_id: Some(11),
    }
    .validate()
    .expect("link valid");
    let carryover = store
        .insert_link(ResourceKind::Carryovers, &year, link)
        .await
        .expect("insert carryover should succeed");
    assert_eq!(carryover.subject_name, "مادة 11");

    let duplicate = store.insert_link(ResourceKind::Carryovers, &year, link).await;
    assert!(matches!(duplicate, Err(StoreError::Conflict)));

    let unknown = LinkInput {
        student_id: Some(4242),
        subject_id: Some(11),
    }
    .validate()
    .expect("link valid");
    let missing = store.insert_link(ResourceKind::Exempted, &year, unknown).await;
    assert!(matches!(missing, Err(StoreError::MissingReference)));

    assert_eq!(
        store
            .record_stage(ResourceKind::Carryovers, &year, carryover.id)
            .await
            .expect("stage should resolve"),
        Stage::First
    );

    let clerk = store
        .create_user(&NewUser {
            username: "clerk".to_string(),
            password: "clerk-pass".to_string(),
        })
        .await
        .expect("create user should succeed");
    let carryovers = TableRef::partitioned(ResourceKind::Carryovers, &year);
    let carryovers_id = store
        .table_by_name(&carryovers.table_name())
        .await
        .expect("catalog lookup should succeed")
        .expect("carryovers table should be registered")
        .id;
    store
        .upsert_grant(&GrantRequest {
            user_id: Some(clerk.id),
            year: Some(year.as_str().to_string()),
            table_id: Some(carryovers_id),
            stage: Some("الاولى".to_string()),
            subject_id: Some(-1),
            can_read: true,
            can_write: true,
        })
        .await
        .expect("grant should be stored");

    let governing = store
        .record_stage(ResourceKind::Carryovers, &year, carryover.id)
        .await
        .expect("stage should resolve");
    assert!(
        store
            .check_stage_write_access(clerk.id, &carryovers, StageScope::Only(governing))
            .await
            .expect("check should succeed")
    );

    let moved = StudentInput {
        stage: Some("الثانية".to_string()),
        ..StudentInput::default()
    }
    .validate(Some(&created))
    .expect("update valid");
    store
        .update_student(&year, &moved)
        .await
        .expect("update should succeed");

    assert_eq!(
        store
            .record_stage(ResourceKind::Carryovers, &year, carryover.id)
            .await
            .expect("stage should resolve"),
        Stage::Second
    );
    let governing = store
        .record_stage(ResourceKind::Carryovers, &year, carryover.id)
        .await
        .expect("stage should resolve");
    assert!(
        !store
            .check_stage_write_access(clerk.id, &carryovers, StageScope::Only(governing))
            .await
            .expect("check should succeed")
    );

    let limits = store
        .subject_limits(&year, 11)
        .await
        .expect("limits should load");
    let mark = MarkInput {
        student_id: Some(1001),
        subject_id: Some(11),
        semester_mark: Some(35),
        final_mark: Some(50),
    }
    .validate(None, limits)
    .expect("mark valid");
    let mark = store.insert_mark(&year, mark).await.expect("insert mark");
    assert_eq!(mark.max_final_exam, 60);

    let second_stage = store
        .list_marks(&year, StageScope::Only(Stage::Second))
        .await
        .expect("marks should list");
    assert_eq!(second_stage.len(), 1);
    assert!(
        store
            .list_marks(&year, StageScope::Only(Stage::First))
            .await
            .expect("marks should list")
            .is_empty()
    );

    let missing = store.record_stage(ResourceKind::Marks, &year, 987_654).await;
    assert!(matches!(missing, Err(StoreError::NotFound)));

    fixture.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_year_removes_relations_and_catalog_rows() {
    let Some(db_url) = test_db_url() else {
        eprintln!("skipping year close test; set COLLEGECM_TEST_DB_URL to enable");
        return;
    };
    let fixture = Fixture::start(&db_url).await;
    let store = &fixture.store;
    let year = AcademicYear::parse("2025_2026").expect("year should parse");
    let other = AcademicYear::parse("2026_2027").expect("year should parse");

    store.open_year(&year).await.expect("open should succeed");
    store.open_year(&other).await.expect("open should succeed");
    let new_student = student(7, "الثالثة").validate(None).expect("student valid");
    store
        .insert_student(&year, &new_student)
        .await
        .expect("insert student should succeed");

    let closed = store.close_year(&year).await.expect("close should succeed");
    assert_eq!(closed.catalog_rows_removed, 5);
    assert_eq!(
        closed.dropped_tables,
        vec![
            "marks_2025_2026",
            "exempted_2025_2026",
            "carryovers_2025_2026",
            "students_2025_2026",
            "subjects_2025_2026",
        ]
    );

    let names: Vec<String> = store
        .list_tables()
        .await
        .expect("catalog should list")
        .into_iter()
        .map(|entry| entry.table_name)
        .collect();
    assert!(!names.iter().any(|name| name.ends_with("2025_2026")));
    assert!(names.iter().any(|name| name == "students_2026_2027"));

    let gone = store.student(&year, 7).await;
    assert!(matches!(gone, Err(StoreError::NotFound)));
    let listed = store.list_students(&year, StageScope::All).await;
    assert!(matches!(listed, Err(StoreError::NotFound)));

    let again = store.close_year(&year).await;
    assert!(matches!(again, Err(StoreError::NotFound)));
    assert!(!store.year_exists(&year).await.expect("lookup should succeed"));
    assert!(store.year_exists(&other).await.expect("lookup should succeed"));

    fixture.finish().await;
}
