use axum::extract::{Path, State};
use axum::Json;
use extract_core::remark::{RemarkCatalog, RemarkKind};
use serde::Deserialize;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

/// GET /api/remarks: validation and rejection message templates.
pub async fn list_remarks(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let catalog = RemarkCatalog::load(&root)?;
        Ok(serde_json::json!(catalog.remarks))
    })
    .await?;

    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct CreateRemarkBody {
    pub kind: RemarkKind,
    pub title: String,
    pub content: String,
}

/// POST /api/remarks
pub async fn create_remark(
    State(app): State<AppState>,
    Json(body): Json<CreateRemarkBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.title.trim().is_empty() {
        return Err(AppError::bad_request("remark title cannot be empty"));
    }
    let root = app.root.clone();
    let result = blocking(move || {
        let mut catalog = RemarkCatalog::load(&root)?;
        let id = catalog.add(&root, body.kind, body.title.trim(), &body.content)?;
        catalog.save(&root)?;
        Ok(serde_json::json!({
            "id": id,
            "kind": body.kind,
            "title": body.title.trim(),
            "content": body.content,
        }))
    })
    .await?;

    Ok(Json(result))
}

/// DELETE /api/remarks/:id
pub async fn delete_remark(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    blocking(move || {
        let mut catalog = RemarkCatalog::load(&root)?;
        catalog.remove(id)?;
        catalog.save(&root)
    })
    .await?;

    Ok(Json(serde_json::json!({ "deleted": id })))
}
