use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::Json;
use extract_core::config::Config;
use extract_core::error::ExtractError;
use extract_core::process::Process;
use extract_core::remark::{Remark, RemarkCatalog, RemarkKind};
use extract_core::request::{perform_action, OperatorAction, Request};
use extract_core::types::RequestStatus;
use serde::Deserialize;

use super::{blocking, WEB_USER};
use crate::error::AppError;
use crate::state::AppState;

fn summary(r: &Request) -> serde_json::Value {
    serde_json::json!({
        "id": r.id,
        "order_label": r.order_label,
        "product_label": r.product_label,
        "client": r.client,
        "organism": r.organism,
        "status": r.status,
        "connector_id": r.connector_id,
        "process_id": r.process_id,
        "tasknum": r.tasknum,
        "rejected": r.rejected,
        "start_date": r.start_date,
        "end_date": r.end_date,
    })
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub connector: Option<u64>,
}

/// GET /api/requests: list requests, optionally filtered by status and connector.
pub async fn list_requests(
    State(app): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(s.parse::<RequestStatus>()?),
        None => None,
    };
    let root = app.root.clone();
    let result = blocking(move || {
        let list: Vec<serde_json::Value> = Request::list(&root)?
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .filter(|r| query.connector.map_or(true, |c| r.connector_id == c))
            .map(summary)
            .collect();
        Ok(serde_json::json!(list))
    })
    .await?;

    Ok(Json(result))
}

/// GET /api/requests/:id: request detail with its history, current task and
/// the remark templates the current task offers.
pub async fn get_request(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let history = app.history.clone();
    let running = app.running.contains(id);
    let result = blocking(move || {
        let request = Request::load(&root, id)?;
        let config = Config::load(&root)?;
        let data_root = config.data_root(&root);
        let records = history.for_request(id)?;

        let process = match request.process_id {
            Some(pid) => Some(Process::load(&root, pid)?),
            None => None,
        };
        let current_task = process
            .as_ref()
            .and_then(|p| request.current_task(&p.tasks))
            .cloned();

        let catalog = RemarkCatalog::load(&root)?;
        let (validation_templates, rejection_templates): (Vec<Remark>, Vec<Remark>) = match &current_task {
            Some(task) => (
                catalog
                    .select(RemarkKind::Validation, &task.validation_message_ids())
                    .into_iter()
                    .cloned()
                    .collect(),
                catalog
                    .select(RemarkKind::Rejection, &task.rejection_message_ids())
                    .into_iter()
                    .cloned()
                    .collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };

        let files: Vec<String> = request
            .output_files(&data_root)?
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        let folders = config.display_temp_folder.then(|| {
            serde_json::json!({
                "input": request.input_dir(&data_root),
                "output": request.output_dir(&data_root),
            })
        });

        Ok(serde_json::json!({
            "request": request,
            "focus_parameters": request.focus_parameters(&config.validation_focus_properties),
            "folders": folders,
            "process": process.as_ref().map(|p| serde_json::json!({"id": p.id, "name": p.name})),
            "task_count": process.as_ref().map_or(0, |p| p.tasks.len()),
            "current_task": current_task,
            "history": records,
            "validation_templates": validation_templates,
            "rejection_templates": rejection_templates,
            "output_files": files,
            "running": running,
        }))
    })
    .await?;

    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// Operator actions
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct ActionBody {
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub active_step: Option<u32>,
}

fn parse_action(name: &str, remark: Option<String>) -> Option<OperatorAction> {
    let action = match name {
        "validate" => OperatorAction::Validate {
            remark: remark.unwrap_or_default(),
        },
        "reject" => OperatorAction::Reject {
            remark: remark.unwrap_or_default(),
        },
        "relaunch" => OperatorAction::Relaunch,
        "restart-task" => OperatorAction::RestartTask,
        "skip-task" => OperatorAction::SkipTask,
        "retry-export" => OperatorAction::RetryExport,
        "retry-matching" => OperatorAction::RetryMatching,
        _ => return None,
    };
    Some(action)
}

/// POST /api/requests/:id/:action: apply an operator action.
///
/// Refused with 409 while the orchestrator is running the request.
pub async fn request_action(
    State(app): State<AppState>,
    Path((id, name)): Path<(u64, String)>,
    Json(body): Json<ActionBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let action = parse_action(&name, body.remark)
        .ok_or_else(|| AppError::not_found(format!("unknown request action: {name}")))?;
    let user = body.user.unwrap_or_else(|| WEB_USER.to_string());
    let root = app.root.clone();
    let history = app.history.clone();
    let running = app.running.clone();
    let result = blocking(move || {
        let _guard = running.claim(id).ok_or(ExtractError::RequestBusy(id))?;
        let data_root = Config::load(&root)?.data_root(&root);
        let request = perform_action(
            &root,
            &history,
            &data_root,
            id,
            &action,
            &user,
            body.active_step,
        )?;
        Ok(summary(&request))
    })
    .await?;

    Ok(Json(result))
}

/// DELETE /api/requests/:id: delete a request, its history and its folders.
pub async fn delete_request(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let history = app.history.clone();
    let running = app.running.clone();
    blocking(move || {
        let _guard = running.claim(id).ok_or(ExtractError::RequestBusy(id))?;
        let data_root = Config::load(&root)?.data_root(&root);
        Request::delete(&root, &history, &data_root, id)
    })
    .await?;

    Ok(Json(serde_json::json!({ "deleted": id })))
}

// ---------------------------------------------------------------------------
// Output files
// ---------------------------------------------------------------------------

/// GET /api/requests/:id/files: files in the output folder.
pub async fn list_files(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let request = Request::load(&root, id)?;
        let data_root = Config::load(&root)?.data_root(&root);
        let files: Vec<String> = request
            .output_files(&data_root)?
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        Ok(serde_json::json!(files))
    })
    .await?;

    Ok(Json(result))
}

/// PUT /api/requests/:id/files/:name: upload a file into the output folder.
pub async fn put_file(
    State(app): State<AppState>,
    Path((id, name)): Path<(u64, String)>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let running = app.running.clone();
    let size = body.len();
    blocking(move || {
        let _guard = running.claim(id).ok_or(ExtractError::RequestBusy(id))?;
        let request = Request::load(&root, id)?;
        let data_root = Config::load(&root)?.data_root(&root);
        request.add_output_file(&data_root, &name, &body)?;
        tracing::info!(request = id, file = %name, size, "output file added");
        Ok(())
    })
    .await?;

    Ok(Json(serde_json::json!({ "request_id": id, "size": size })))
}

/// DELETE /api/requests/:id/files/*path: remove a file from the output folder.
pub async fn delete_file(
    State(app): State<AppState>,
    Path((id, path)): Path<(u64, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let running = app.running.clone();
    let removed = path.clone();
    blocking(move || {
        let _guard = running.claim(id).ok_or(ExtractError::RequestBusy(id))?;
        let request = Request::load(&root, id)?;
        let data_root = Config::load(&root)?.data_root(&root);
        request.remove_output_file(&data_root, &path)?;
        tracing::info!(request = id, file = %path, "output file removed");
        Ok(())
    })
    .await?;

    Ok(Json(serde_json::json!({ "request_id": id, "removed": removed })))
}
