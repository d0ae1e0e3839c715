use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use extract_core::error::ExtractError;
use extract_core::process::Process;
use extract_core::user::UserDirectory;
use serde::Deserialize;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

/// GET /api/processes: list processes by name.
pub async fn list_processes(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let mut list = Vec::new();
        for p in Process::list(&root)? {
            list.push(serde_json::json!({
                "id": p.id,
                "name": p.name,
                "tasks": p.tasks.len(),
                "operators": p.operators,
                "groups": p.groups,
                "can_be_deleted": p.can_be_deleted(&root)?,
            }));
        }
        Ok(serde_json::json!(list))
    })
    .await?;

    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct CreateProcessBody {
    pub name: String,
}

/// POST /api/processes: create an empty process.
pub async fn create_process(
    State(app): State<AppState>,
    Json(body): Json<CreateProcessBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let process = Process::create(&root, &body.name)?;
        tracing::info!(process = process.id, name = %process.name, "process created");
        Ok(serde_json::json!(process))
    })
    .await?;

    Ok(Json(result))
}

/// GET /api/processes/:id: process with its tasks and resolved operators.
pub async fn get_process(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let process = Process::load(&root, id)?;
        let directory = UserDirectory::load(&root)?;
        let operators: Vec<&str> = process
            .distinct_operators(&directory)
            .iter()
            .map(|u| u.login.as_str())
            .collect();
        Ok(serde_json::json!({
            "process": process,
            "resolved_operators": operators,
            "can_be_edited": process.can_be_edited(&root)?,
            "can_be_deleted": process.can_be_deleted(&root)?,
        }))
    })
    .await?;

    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct UpdateProcessBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub operators: Option<Vec<String>>,
    #[serde(default)]
    pub groups: Option<Vec<u64>>,
}

/// PUT /api/processes/:id: rename or reassign operators. Unknown logins and
/// groups are refused.
pub async fn update_process(
    State(app): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<UpdateProcessBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let mut process = Process::load(&root, id)?;
        let directory = UserDirectory::load(&root)?;
        if let Some(name) = body.name {
            if name.trim().is_empty() {
                return Err(ExtractError::InvalidParameter(
                    "process name cannot be empty".into(),
                ));
            }
            process.name = name.trim().to_string();
        }
        if let Some(operators) = body.operators {
            for login in &operators {
                directory.get(login)?;
            }
            process.operators = operators;
        }
        if let Some(groups) = body.groups {
            for gid in &groups {
                directory.group(*gid)?;
            }
            process.groups = groups;
        }
        process.save(&root)?;
        Ok(serde_json::json!(process))
    })
    .await?;

    Ok(Json(result))
}

/// DELETE /api/processes/:id: refused while requests or rules use the process.
pub async fn delete_process(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    blocking(move || Process::delete(&root, id)).await?;
    tracing::info!(process = id, "process deleted");
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// POST /api/processes/:id/copy: duplicate a process with its tasks.
pub async fn copy_process(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let copy = Process::load(&root, id)?.create_copy(&root)?;
        tracing::info!(source = id, process = copy.id, "process copied");
        Ok(serde_json::json!(copy))
    })
    .await?;

    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AddTaskBody {
    pub code: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// POST /api/processes/:id/tasks: append a task running a registered plugin.
pub async fn add_task(
    State(app): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<AddTaskBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Some(plugin) = app.plugins.get(&body.code) else {
        return Err(ExtractError::PluginNotFound(body.code.clone()).into());
    };
    let code = plugin.code();
    let label = body.label.unwrap_or_else(|| plugin.label().to_string());
    let root = app.root.clone();
    let result = blocking(move || {
        let mut process = Process::load(&root, id)?;
        process.ensure_editable(&root)?;
        let task_id = process.add_task(&root, code, &label, body.parameters)?;
        process.save(&root)?;
        Ok(serde_json::json!(process.task(task_id)?))
    })
    .await?;

    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct UpdateTaskBody {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub position: Option<u32>,
}

/// PUT /api/processes/:id/tasks/:task_id: edit, reconfigure or move a task.
pub async fn update_task(
    State(app): State<AppState>,
    Path((id, task_id)): Path<(u64, u64)>,
    Json(body): Json<UpdateTaskBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let mut process = Process::load(&root, id)?;
        process.ensure_editable(&root)?;
        let task = process.task_mut(task_id)?;
        if let Some(label) = body.label {
            task.label = label;
        }
        if let Some(parameters) = body.parameters {
            task.update_parameters(parameters);
        }
        if let Some(position) = body.position {
            process.move_task(task_id, position)?;
        }
        process.save(&root)?;
        Ok(serde_json::json!(process.tasks))
    })
    .await?;

    Ok(Json(result))
}

/// DELETE /api/processes/:id/tasks/:task_id
pub async fn delete_task(
    State(app): State<AppState>,
    Path((id, task_id)): Path<(u64, u64)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let mut process = Process::load(&root, id)?;
        process.ensure_editable(&root)?;
        process.remove_task(task_id)?;
        process.save(&root)?;
        Ok(serde_json::json!(process.tasks))
    })
    .await?;

    Ok(Json(result))
}
