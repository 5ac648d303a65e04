use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const YEAR: &str = "2023_2024";

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

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn smoke_admin_opens_year_grants_clerk_and_closes_year() {
    let Some(db_url) = test_db_url() else {
        eprintln!("skipping e2e smoke test; set COLLEGECM_TEST_DB_URL to enable");
        return;
    };
    init_test_tracing();

    let schema = format!("collegecm_smoke_{}", ulid::Ulid::new()).to_lowercase();
    let admin_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(&db_url)
        .await
        .expect("DB connect should succeed");
    sqlx::query(&format!("CREATE SCHEMA {}", schema))
        .execute(&admin_pool)
        .await
        .expect("create schema should succeed");

    let config = collegecm_api::config::ApiConfig::from_kv(&HashMap::from([
        ("COLLEGECM_BIND_ADDR".to_string(), "127.0.0.1:0".to_string()),
        (
            "COLLEGECM_DB_URL".to_string(),
            schema_db_url(&db_url, &schema),
        ),
        (
            "COLLEGECM_BOOTSTRAP_ADMIN".to_string(),
            "admin:admin-pass".to_string(),
        ),
    ]))
    .expect("api config should be valid");

    let (addr, shutdown, task) = spawn_server(
        collegecm_api::http::router(config)
            .await
            .expect("api router should init"),
    )
    .await;
    let base = format!("http://{}", addr);

    let admin = cookie_client();
    wait_for_healthz(&admin, addr).await;

    let ready = admin
        .get(format!("{base}/readyz"))
        .send()
        .await
        .expect("readyz should respond");
    assert_eq!(ready.status(), StatusCode::OK);

    let anonymous = admin
        .get(format!("{base}/v1/years"))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let (status, _) = send(admin.post(format!("{base}/v1/login")).json(&json!({
        "username": "admin",
        "password": "wrong",
    })))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(admin.post(format!("{base}/v1/login")).json(&json!({
        "username": "admin",
        "password": "admin-pass",
    })))
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    assert_eq!(body["user"]["username"], "admin");

    let (status, _) = send(admin.get(format!("{base}/v1/auth/status"))).await;
    assert_eq!(status, StatusCode::OK);

    // Year lifecycle.
    let (status, body) =
        send(admin.post(format!("{base}/v1/years")).json(&json!({ "year": YEAR }))).await;
    assert_eq!(status, StatusCode::CREATED, "open year failed: {body}");
    let (status, body) =
        send(admin.post(format!("{base}/v1/years")).json(&json!({ "year": YEAR }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ERR_CONFLICT");
    let (status, body) =
        send(admin.post(format!("{base}/v1/years")).json(&json!({ "year": "2023-24" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "ERR_VALIDATION");

    let (status, body) = send(admin.get(format!("{base}/v1/tables"))).await;
    assert_eq!(status, StatusCode::OK);
    let table_id = |name: &str| -> i64 {
        body["tables"]
            .as_array()
            .expect("tables should be an array")
            .iter()
            .find(|entry| entry["table_name"] == name)
            .and_then(|entry| entry["id"].as_i64())
            .unwrap_or_else(|| panic!("catalog should list {name}"))
    };
    let students_table = table_id(&format!("students_{YEAR}"));
    let subjects_table = table_id(&format!("subjects_{YEAR}"));
    let marks_table = table_id(&format!("marks_{YEAR}"));

    // A clerk who may read and write first-stage students, read every
    // subject and read first-stage marks.
    let (status, body) = send(admin.post(format!("{base}/v1/users")).json(&json!({
        "username": "clerk",
        "password": "clerk-pass",
    })))
    .await;
    assert_eq!(status, StatusCode::CREATED, "create user failed: {body}");
    let clerk_id = body["user"]["id"].as_i64().expect("user id should exist");

    for (table, stage, write) in [
        (students_table, "الاولى", true),
        (subjects_table, "all", false),
        (marks_table, "الاولى", false),
    ] {
        let (status, body) = send(admin.post(format!("{base}/v1/privileges")).json(&json!({
            "user_id": clerk_id,
            "year": YEAR,
            "table_id": table,
            "stage": stage,
            "can_read": true,
            "can_write": write,
        })))
        .await;
        assert_eq!(status, StatusCode::CREATED, "grant failed: {body}");
    }

    let (status, body) = send(admin.post(format!("{base}/v1/privileges")).json(&json!({
        "user_id": 999_999,
        "year": YEAR,
        "table_id": students_table,
        "stage": "all",
        "can_read": true,
    })))
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    // Records entered by the admin.
    let (status, body) = send(
        admin
            .post(format!("{base}/v1/students/{YEAR}"))
            .json(&student_json(1001, "الاولى")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create student failed: {body}");
    let (status, _) = send(
        admin
            .post(format!("{base}/v1/students/{YEAR}"))
            .json(&student_json(2001, "الثانية")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(
        admin
            .post(format!("{base}/v1/students/{YEAR}"))
            .json(&student_json(1001, "الاولى")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, body) = send(admin.post(format!("{base}/v1/subjects/{YEAR}")).json(&json!({
        "subject_id": 10,
        "subject_name": "رياضيات",
        "subject_name_english": "Mathematics",
        "stage": "الاولى",
        "semester": "الاول",
        "department": "العلوم الاساسية",
        "max_theory_mark": 60,
        "max_lab_mark": 40,
        "max_semester_mark": 40,
        "max_final_exam": 60,
        "credits": 3,
        "active": "نعم",
        "ministerial": "لا",
    })))
    .await;
    assert_eq!(status, StatusCode::CREATED, "create subject failed: {body}");

    let (status, body) = send(
        admin
            .post(format!("{base}/v1/carryovers/{YEAR}"))
            .json(&json!({ "student_id": 1001, "subject_id": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create carryover failed: {body}");

    let (status, body) = send(
        admin
            .post(format!("{base}/v1/carryovers/{YEAR}"))
            .json(&json!({ "student_id": 1001, "subject_id": 77 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (status, body) = send(admin.post(format!("{base}/v1/marks/{YEAR}")).json(&json!({
        "student_id": 1001,
        "subject_id": 10,
        "semester_mark": 55,
        "final_mark": 50,
    })))
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (status, body) = send(admin.post(format!("{base}/v1/marks/{YEAR}")).json(&json!({
        "student_id": 1001,
        "subject_id": 10,
        "semester_mark": 35,
        "final_mark": 50,
    })))
    .await;
    assert_eq!(status, StatusCode::CREATED, "create mark failed: {body}");

    // The clerk, scoped to the first stage.
    let clerk = cookie_client();
    let (status, _) = send(clerk.post(format!("{base}/v1/login")).json(&json!({
        "username": "clerk",
        "password": "clerk-pass",
    })))
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(clerk.get(format!("{base}/v1/students/{YEAR}/1"))).await;
    assert_eq!(status, StatusCode::OK);
    let students = body["students"].as_array().expect("students array");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["student_id"], 1001);

    let (status, body) = send(clerk.get(format!("{base}/v1/students/{YEAR}/2"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "ERR_ACCESS_DENIED");

    let (status, _) = send(clerk.get(format!("{base}/v1/students/{YEAR}/9"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        clerk
            .post(format!("{base}/v1/students/{YEAR}"))
            .json(&student_json(2002, "الثانية")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        clerk
            .post(format!("{base}/v1/students/{YEAR}"))
            .json(&student_json(1002, "الاولى")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "clerk create failed: {body}");

    let (status, _) = send(
        clerk
            .patch(format!("{base}/v1/students/{YEAR}/1002"))
            .json(&json!({ "stage": "الثانية" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(clerk.delete(format!("{base}/v1/students/{YEAR}/2001"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(clerk.get(format!("{base}/v1/users"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(clerk.get(format!("{base}/v1/custom/{YEAR}/1001"))).await;
    assert_eq!(status, StatusCode::OK, "custom view failed: {body}");
    assert_eq!(body["access"]["can_see_students"], true);
    assert_eq!(body["access"]["can_see_subjects"], true);
    assert_eq!(body["access"]["can_see_marks"], true);
    assert_eq!(body["access"]["can_see_carryovers"], false);
    assert_eq!(body["student_data"]["student"]["student_id"], 1001);
    assert!(body["student_data"].get("carryovers").is_none());
    assert_eq!(
        body["student_data"]["marks"]
            .as_array()
            .expect("marks should be present")
            .len(),
        1
    );

    // Only the all-stage subjects grant reaches a second-stage student.
    let (status, body) = send(clerk.get(format!("{base}/v1/custom/{YEAR}/2001"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access"]["can_see_students"], false);
    assert_eq!(body["access"]["can_see_subjects"], true);
    assert_eq!(body["student_data"]["student"]["student_id"], 2001);
    assert!(body["student_data"].get("marks").is_none());

    let (status, _) = send(clerk.post(format!("{base}/v1/logout"))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(clerk.get(format!("{base}/v1/years"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Closing the year leaves the clerk's grants dangling.
    let (status, body) = send(admin.delete(format!("{base}/v1/years/{YEAR}"))).await;
    assert_eq!(status, StatusCode::OK, "close year failed: {body}");
    assert_eq!(
        body["year"]["dropped_tables"]
            .as_array()
            .expect("dropped tables")
            .len(),
        5
    );

    let (status, _) = send(admin.delete(format!("{base}/v1/years/{YEAR}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(admin.get(format!("{base}/v1/privileges/dangling"))).await;
    assert_eq!(status, StatusCode::OK);
    let dangling = body["privileges"].as_array().expect("privileges array");
    assert_eq!(
        dangling
            .iter()
            .filter(|grant| grant["user_id"] == clerk_id)
            .count(),
        3
    );

    let (status, body) = send(admin.delete(format!("{base}/v1/privileges")).json(&json!({
        "user_id": clerk_id,
        "table_id": students_table,
        "stage": "الاولى",
    })))
    .await;
    assert_eq!(status, StatusCode::OK, "delete grant failed: {body}");

    let metrics = admin
        .get(format!("{base}/metrics"))
        .send()
        .await
        .expect("metrics should respond")
        .text()
        .await
        .expect("metrics should be text");
    assert!(metrics.contains("collegecm_http_requests_total"));
    assert!(metrics.contains("collegecm_year_lifecycle_total"));

    let (status, _) = send(admin.post(format!("{base}/v1/logout"))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(admin.get(format!("{base}/v1/auth/status"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let _ = shutdown.send(());
    let _ = task.await;
    let _ = sqlx::query(&format!("DROP SCHEMA {} CASCADE", schema))
        .execute(&admin_pool)
        .await;
    admin_pool.close().await;
}

fn student_json(id: i64, stage: &str) -> Value {
    json!({
        "student_id": id,
        "student_name": format!("طالب {id}"),
        "stage": stage,
        "state": "مستمر",
    })
}

fn cookie_client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .expect("client should build")
}

async fn send(request: reqwest::RequestBuilder) -> (StatusCode, Value) {
    let response = request.send().await.expect("request should succeed");
    let status = response.status();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

async fn spawn_server(
    app: Router,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local_addr should succeed");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    (addr, shutdown_tx, handle)
}

async fn wait_for_healthz(client: &reqwest::Client, addr: SocketAddr) {
    let url = format!("http://{}/healthz", addr);

    for _ in 0..50 {
        if let Ok(response) = client.get(&url).send().await
            && response.status().is_success()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    panic!("server did not become ready at {}", url);
}

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}
