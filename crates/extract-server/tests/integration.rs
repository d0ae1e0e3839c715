use axum::http::StatusCode;
use extract_core::config::Config;
use extract_core::connector::{Connector, Product};
use extract_core::process::Process;
use extract_core::request::Request;
use extract_core::state::State;
use extract_core::types::{Profile, RequestStatus};
use extract_core::user::{User, UserDirectory};
use extract_server::{build_router, AppState};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Bootstrap a minimal Extract instance inside the given temp directory.
fn init_instance(dir: &TempDir) -> AppState {
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    Config::new("test").save(dir.path()).unwrap();
    State::new("test").save(dir.path()).unwrap();
    let mut users = UserDirectory::default();
    users
        .add(User::new("admin", "Admin", "admin@example.ch", Profile::Admin))
        .unwrap();
    users.save(dir.path()).unwrap();
    AppState::open(dir.path().to_path_buf()).unwrap()
}

fn product() -> Product {
    Product {
        order_label: "ORD-1".into(),
        product_label: "Cadastre".into(),
        client: "Jean Dupont".into(),
        perimeter: Some("POLYGON((0 0,1 0,1 1,0 1,0 0))".into()),
        ..Default::default()
    }
}

/// Store a request in `status`, optionally with an output folder under `data/`.
fn seed_request(dir: &TempDir, status: RequestStatus, with_output: bool) -> Request {
    let mut request = Request::from_product(1, &product());
    request.status = status;
    if with_output {
        request.folder_out = Some("r1/output".into());
        std::fs::create_dir_all(dir.path().join("data/r1/output")).unwrap();
    }
    Request::create(dir.path(), request).unwrap()
}

async fn send(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = axum::http::Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Send a GET request via `oneshot` and return (status, parsed JSON body).
async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "GET", uri, None).await
}

/// Send a POST request with a JSON body via `oneshot`.
async fn post_json(
    app: axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send(app, "POST", uri, Some(body)).await
}

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

#[tokio::test]
async fn state_reports_counts_per_status() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    seed_request(&dir, RequestStatus::Standby, false);
    seed_request(&dir, RequestStatus::Finished, false);

    let (status, json) = get(build_router(app), "/api/state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["instance"], "test");
    assert_eq!(json["counts"]["standby"], 1);
    assert_eq!(json["counts"]["finished"], 1);
    assert_eq!(json["counts"]["ongoing"], 0);
    assert_eq!(json["working_state"], "running");
}

#[tokio::test]
async fn uninitialized_root_is_a_bad_request() {
    let dir = TempDir::new().unwrap();
    let app = AppState::open(dir.path().to_path_buf()).unwrap();
    let (status, json) = get(build_router(app), "/api/state").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn orchestrator_reports_schedule() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let (status, json) = get(build_router(app), "/api/orchestrator").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["frequency_secs"], 20);
    assert_eq!(json["mode"], "on");
    assert_eq!(json["running"], serde_json::json!([]));
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_filters_by_status() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let standby = seed_request(&dir, RequestStatus::Standby, false);
    seed_request(&dir, RequestStatus::Error, false);

    let (status, json) = get(build_router(app.clone()), "/api/requests?status=standby").await;
    assert_eq!(status, StatusCode::OK);
    let list = json.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], standby.id);

    let (status, _) = get(build_router(app), "/api/requests?status=nonsense").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn request_detail_and_missing_request() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let r = seed_request(&dir, RequestStatus::Imported, false);

    let (status, json) = get(build_router(app.clone()), &format!("/api/requests/{}", r.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["request"]["order_label"], "ORD-1");
    assert_eq!(json["history"], serde_json::json!([]));
    assert_eq!(json["running"], false);

    let (status, _) = get(build_router(app), "/api/requests/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn request_detail_shows_focus_parameters_and_folders() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let mut config = Config::load(dir.path()).unwrap();
    config.validation_focus_properties = vec!["FORMAT".into(), "REMARK".into()];
    config.save(dir.path()).unwrap();

    let mut request = Request::from_product(1, &product());
    request.parameters = serde_json::json!({"format": "DXF", "PROJECTION": "EPSG:2056"});
    request.folder_in = Some("r1/input".into());
    request.folder_out = Some("r1/output".into());
    let r = Request::create(dir.path(), request).unwrap();

    let (status, json) = get(build_router(app.clone()), &format!("/api/requests/{}", r.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["focus_parameters"], serde_json::json!({"FORMAT": "DXF"}));
    assert!(json["folders"].is_null());

    config.display_temp_folder = true;
    config.save(dir.path()).unwrap();
    let (_, json) = get(build_router(app), &format!("/api/requests/{}", r.id)).await;
    let output = json["folders"]["output"].as_str().unwrap();
    assert!(output.ends_with("r1/output"), "{output}");
}

#[tokio::test]
async fn retry_matching_sends_unmatched_request_back() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let r = seed_request(&dir, RequestStatus::Unmatched, false);

    let (status, json) = post_json(
        build_router(app),
        &format!("/api/requests/{}/retry-matching", r.id),
        serde_json::json!({ "user": "admin" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "imported");

    let state = State::load(dir.path()).unwrap();
    let last = state.events.last().unwrap();
    assert_eq!(last.action, "retry_matching");
    assert_eq!(last.user, "admin");
}

#[tokio::test]
async fn reject_requires_a_remark_and_a_waiting_request() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let waiting = seed_request(&dir, RequestStatus::Unmatched, false);
    let imported = seed_request(&dir, RequestStatus::Imported, false);

    let (status, _) = post_json(
        build_router(app.clone()),
        &format!("/api/requests/{}/reject", waiting.id),
        serde_json::json!({ "remark": "  " }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(
        build_router(app.clone()),
        &format!("/api/requests/{}/reject", imported.id),
        serde_json::json!({ "remark": "Hors périmètre" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, json) = post_json(
        build_router(app),
        &format!("/api/requests/{}/reject", waiting.id),
        serde_json::json!({ "remark": "Hors périmètre" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "to_export");
    assert_eq!(json["rejected"], true);
}

#[tokio::test]
async fn unknown_action_is_not_found() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let r = seed_request(&dir, RequestStatus::Error, false);
    let (status, _) = post_json(
        build_router(app),
        &format!("/api/requests/{}/explode", r.id),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn running_request_refuses_actions() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let r = seed_request(&dir, RequestStatus::Error, false);
    let _guard = app.running.claim(r.id).unwrap();

    let (status, _) = post_json(
        build_router(app.clone()),
        &format!("/api/requests/{}/restart-task", r.id),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        build_router(app),
        "DELETE",
        &format!("/api/requests/{}", r.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(Request::load(dir.path(), r.id).is_ok());
}

#[tokio::test]
async fn delete_request_removes_it() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let r = seed_request(&dir, RequestStatus::Finished, false);
    let (status, json) = send(
        build_router(app),
        "DELETE",
        &format!("/api/requests/{}", r.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deleted"], r.id);
    assert!(Request::load(dir.path(), r.id).is_err());
}

#[tokio::test]
async fn output_files_upload_list_and_remove() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let r = seed_request(&dir, RequestStatus::Error, true);

    let req = axum::http::Request::builder()
        .method("PUT")
        .uri(format!("/api/requests/{}/files/report.txt", r.id))
        .body(axum::body::Body::from("hello"))
        .unwrap();
    let response = build_router(app.clone()).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let written = std::fs::read_to_string(dir.path().join("data/r1/output/report.txt")).unwrap();
    assert_eq!(written, "hello");

    let (status, json) = get(
        build_router(app.clone()),
        &format!("/api/requests/{}/files", r.id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, serde_json::json!(["report.txt"]));

    let (status, _) = send(
        build_router(app),
        "DELETE",
        &format!("/api/requests/{}/files/report.txt", r.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!dir.path().join("data/r1/output/report.txt").exists());
}

#[tokio::test]
async fn output_files_are_locked_while_ongoing() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let r = seed_request(&dir, RequestStatus::Ongoing, true);
    let req = axum::http::Request::builder()
        .method("PUT")
        .uri(format!("/api/requests/{}/files/report.txt", r.id))
        .body(axum::body::Body::from("hello"))
        .unwrap();
    let response = build_router(app).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// ---------------------------------------------------------------------------
// Connectors and rules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connector_creation_checks_the_plugin() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);

    let (status, _) = post_json(
        build_router(app.clone()),
        "/api/connectors",
        serde_json::json!({ "code": "easysdi", "name": "Geoshop" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = post_json(
        build_router(app.clone()),
        "/api/connectors",
        serde_json::json!({
            "code": "folder",
            "name": "Dépôt",
            "parameters": { "inbox": "/tmp/in", "outbox": "/tmp/out" },
            "import_frequency_secs": 120
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], "FOLDER");
    assert_eq!(json["import_frequency_secs"], 120);

    let (status, json) = get(build_router(app), "/api/connectors").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["in_error"], false);
}

#[tokio::test]
async fn rules_are_validated_before_saving() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let c = Connector::create(dir.path(), Connector::new("FOLDER", "Inbox")).unwrap();
    let p = Process::create(dir.path(), "Cadastre").unwrap();
    let uri = format!("/api/connectors/{}/rules", c.id);

    let (status, json) = post_json(
        build_router(app.clone()),
        &uri,
        serde_json::json!({ "expression": "client ==", "process_id": p.id }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("rule"));

    let (status, _) = post_json(
        build_router(app.clone()),
        &uri,
        serde_json::json!({ "expression": "TRUE", "process_id": 999 }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = post_json(
        build_router(app),
        &uri,
        serde_json::json!({ "expression": "productlabel == 'Cadastre'", "process_id": p.id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["position"], 1);

    let stored = Connector::load(dir.path(), c.id).unwrap();
    assert_eq!(stored.rules.len(), 1);
    assert_eq!(stored.rules[0].process_id, p.id);
}

#[tokio::test]
async fn rule_test_evaluates_against_a_request() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let r = seed_request(&dir, RequestStatus::Imported, false);

    let (status, json) = post_json(
        build_router(app.clone()),
        "/api/rules/test",
        serde_json::json!({ "expression": "client == 'Jean Dupont'", "request_id": r.id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["matches"], true);

    let (status, json) = post_json(
        build_router(app),
        "/api/rules/test",
        serde_json::json!({ "expression": "client == 'Autre'", "request_id": r.id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["matches"], false);
}

#[tokio::test]
async fn connector_with_active_requests_cannot_be_deleted() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let c = Connector::create(dir.path(), Connector::new("FOLDER", "Inbox")).unwrap();
    Request::create(dir.path(), Request::from_product(c.id, &product())).unwrap();

    let (status, _) = send(
        build_router(app),
        "DELETE",
        &format!("/api/connectors/{}", c.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn process_with_tasks_and_copy() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);

    let (status, json) = post_json(
        build_router(app.clone()),
        "/api/processes",
        serde_json::json!({ "name": "Cadastre" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let pid = json["id"].as_u64().unwrap();

    let (status, json) = post_json(
        build_router(app.clone()),
        &format!("/api/processes/{pid}/tasks"),
        serde_json::json!({ "code": "remark", "parameters": { "remark": "Merci" } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], "REMARK");
    assert_eq!(json["position"], 1);

    let (status, _) = post_json(
        build_router(app.clone()),
        &format!("/api/processes/{pid}/tasks"),
        serde_json::json!({ "code": "FME2017" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = post_json(
        build_router(app.clone()),
        &format!("/api/processes/{pid}/copy"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "Cadastre - Copie");
    assert_eq!(json["tasks"].as_array().unwrap().len(), 1);

    let (status, json) = get(build_router(app), "/api/processes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn process_tasks_are_locked_while_requests_run() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);
    let p = Process::create(dir.path(), "Cadastre").unwrap();
    let mut r = Request::from_product(1, &product());
    r.process_id = Some(p.id);
    r.status = RequestStatus::Ongoing;
    Request::create(dir.path(), r).unwrap();

    let (status, _) = post_json(
        build_router(app),
        &format!("/api/processes/{}/tasks", p.id),
        serde_json::json!({ "code": "REMARK" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ---------------------------------------------------------------------------
// Users, settings, catalogues
// ---------------------------------------------------------------------------

#[tokio::test]
async fn users_are_unique_and_the_last_admin_stays() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);

    let (status, _) = post_json(
        build_router(app.clone()),
        "/api/users",
        serde_json::json!({ "login": "ADMIN", "name": "Other" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = post_json(
        build_router(app.clone()),
        "/api/users",
        serde_json::json!({ "login": "op", "name": "Operator", "email": "op@example.ch" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["profile"], "operator");

    let (status, _) = send(build_router(app.clone()), "DELETE", "/api/users/admin", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(build_router(app), "DELETE", "/api/users/op", None).await;
    assert_eq!(status, StatusCode::OK);
    let users = UserDirectory::load(dir.path()).unwrap();
    assert_eq!(users.users.len(), 1);
}

#[tokio::test]
async fn settings_refuse_errors_and_keep_warnings() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);

    let (status, json) = get(build_router(app.clone()), "/api/settings").await;
    assert_eq!(status, StatusCode::OK);
    let mut config = json["config"].clone();

    config["scheduler"]["frequency_secs"] = serde_json::json!(0);
    let req = axum::http::Request::builder()
        .method("PUT")
        .uri("/api/settings")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&config).unwrap()))
        .unwrap();
    let response = build_router(app.clone()).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    config["scheduler"]["frequency_secs"] = serde_json::json!(45);
    let (status, _) = send(build_router(app), "PUT", "/api/settings", Some(config)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(Config::load(dir.path()).unwrap().scheduler.frequency_secs, 45);
}

#[tokio::test]
async fn plugin_catalogues_list_builtins() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);

    let (status, json) = get(build_router(app.clone()), "/api/plugins").await;
    assert_eq!(status, StatusCode::OK);
    let codes: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["code"].as_str().unwrap())
        .collect();
    assert!(codes.contains(&"VALIDATION"));
    assert!(codes.contains(&"ARCHIVE"));
    assert!(codes.contains(&"PYTHON"));

    let (status, json) = get(build_router(app), "/api/connector-plugins").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json[0]["code"], "FOLDER");
}

#[tokio::test]
async fn remark_templates_crud() {
    let dir = TempDir::new().unwrap();
    let app = init_instance(&dir);

    let (status, json) = post_json(
        build_router(app.clone()),
        "/api/remarks",
        serde_json::json!({ "kind": "rejection", "title": "Hors zone", "content": "Périmètre hors canton" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = json["id"].as_u64().unwrap();

    let (_, json) = get(build_router(app.clone()), "/api/remarks").await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    let (status, _) = send(
        build_router(app.clone()),
        "DELETE",
        &format!("/api/remarks/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(build_router(app), "DELETE", &format!("/api/remarks/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
