pub mod error;
pub mod orchestrator;
pub mod routes;
pub mod state;

use axum::routing::{get, post, put};
use axum::Router;
use std::path::PathBuf;
use tower_http::cors::{Any, CorsLayer};

pub use state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Dashboard
        .route("/api/state", get(routes::state::get_state))
        .route("/api/orchestrator", get(routes::state::get_orchestrator))
        // Requests
        .route("/api/requests", get(routes::requests::list_requests))
        .route(
            "/api/requests/{id}",
            get(routes::requests::get_request).delete(routes::requests::delete_request),
        )
        .route(
            "/api/requests/{id}/{action}",
            post(routes::requests::request_action),
        )
        .route("/api/requests/{id}/files", get(routes::requests::list_files))
        .route(
            "/api/requests/{id}/files/{*path}",
            put(routes::requests::put_file).delete(routes::requests::delete_file),
        )
        // Connectors and rules
        .route(
            "/api/connectors",
            get(routes::connectors::list_connectors).post(routes::connectors::create_connector),
        )
        .route(
            "/api/connectors/{id}",
            get(routes::connectors::get_connector)
                .put(routes::connectors::update_connector)
                .delete(routes::connectors::delete_connector),
        )
        .route(
            "/api/connectors/{id}/import",
            post(routes::connectors::import_now),
        )
        .route(
            "/api/connectors/{id}/rules",
            post(routes::connectors::add_rule),
        )
        .route(
            "/api/connectors/{id}/rules/{rule_id}",
            put(routes::connectors::update_rule).delete(routes::connectors::delete_rule),
        )
        .route("/api/rules/test", post(routes::connectors::test_rule))
        // Processes and tasks
        .route(
            "/api/processes",
            get(routes::processes::list_processes).post(routes::processes::create_process),
        )
        .route(
            "/api/processes/{id}",
            get(routes::processes::get_process)
                .put(routes::processes::update_process)
                .delete(routes::processes::delete_process),
        )
        .route(
            "/api/processes/{id}/copy",
            post(routes::processes::copy_process),
        )
        .route(
            "/api/processes/{id}/tasks",
            post(routes::processes::add_task),
        )
        .route(
            "/api/processes/{id}/tasks/{task_id}",
            put(routes::processes::update_task).delete(routes::processes::delete_task),
        )
        // Users and groups
        .route(
            "/api/users",
            get(routes::users::list_users).post(routes::users::create_user),
        )
        .route(
            "/api/users/{login}",
            put(routes::users::update_user).delete(routes::users::delete_user),
        )
        .route(
            "/api/groups",
            get(routes::users::list_groups).post(routes::users::create_group),
        )
        .route(
            "/api/groups/{id}",
            axum::routing::delete(routes::users::delete_group),
        )
        // Remark templates
        .route(
            "/api/remarks",
            get(routes::remarks::list_remarks).post(routes::remarks::create_remark),
        )
        .route(
            "/api/remarks/{id}",
            axum::routing::delete(routes::remarks::delete_remark),
        )
        // Catalogues and settings
        .route("/api/plugins", get(routes::plugins::list_plugins))
        .route(
            "/api/connector-plugins",
            get(routes::plugins::list_connector_plugins),
        )
        .route(
            "/api/settings",
            get(routes::settings::get_settings).put(routes::settings::put_settings),
        )
        .layer(cors)
        .with_state(app_state)
}

/// Start the HTTP API and, unless disabled, the orchestrator loop.
pub async fn serve(
    root: PathBuf,
    port: u16,
    open_browser: bool,
    run_orchestrator: bool,
) -> anyhow::Result<()> {
    let app_state = AppState::open(root)?;

    let orchestrator = run_orchestrator.then(|| orchestrator::spawn(app_state.clone()));
    if orchestrator.is_none() {
        tracing::info!("orchestrator disabled, serving the API only");
    }

    let app = build_router(app_state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Extract server listening on http://localhost:{port}");

    if open_browser {
        let url = format!("http://localhost:{port}/api/state");
        let _ = open::that(&url);
    }

    let result = axum::serve(listener, app).await;
    if let Some(handle) = orchestrator {
        handle.abort();
    }
    result?;
    Ok(())
}
