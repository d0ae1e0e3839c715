use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use extract_core::connector::{Connector, Rule};
use extract_core::error::ExtractError;
use extract_core::jobs::import::run_import;
use extract_core::matching::{evaluate_rule, validate_rule};
use extract_core::process::Process;
use extract_core::request::Request;
use serde::Deserialize;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

fn summary(c: &Connector) -> serde_json::Value {
    serde_json::json!({
        "id": c.id,
        "code": c.code,
        "name": c.name,
        "active": c.active,
        "import_frequency_secs": c.import_frequency_secs,
        "last_import_date": c.last_import_date,
        "last_import_message": c.last_import_message,
        "in_error": c.is_in_error(),
        "rules": c.rules.len(),
    })
}

// ---------------------------------------------------------------------------
// Connectors
// ---------------------------------------------------------------------------

/// GET /api/connectors: list configured connectors.
pub async fn list_connectors(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let list: Vec<serde_json::Value> = Connector::list(&root)?.iter().map(summary).collect();
        Ok(serde_json::json!(list))
    })
    .await?;

    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct CreateConnectorBody {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub import_frequency_secs: Option<u64>,
    #[serde(default)]
    pub maximum_retries: Option<u32>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// POST /api/connectors: create a connector for a registered connector plugin.
pub async fn create_connector(
    State(app): State<AppState>,
    Json(body): Json<CreateConnectorBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Some(plugin) = app.connectors.get(&body.code) else {
        return Err(ExtractError::PluginNotFound(body.code.clone()).into());
    };
    let mut connector = Connector::new(plugin.code(), &body.name);
    connector.parameters = body.parameters;
    if let Some(freq) = body.import_frequency_secs {
        connector.import_frequency_secs = freq;
    }
    if let Some(retries) = body.maximum_retries {
        connector.maximum_retries = retries;
    }
    if let Some(active) = body.active {
        connector.active = active;
    }

    let root = app.root.clone();
    let result = blocking(move || {
        let created = Connector::create(&root, connector)?;
        tracing::info!(connector = created.id, code = %created.code, "connector created");
        Ok(serde_json::json!(created))
    })
    .await?;

    Ok(Json(result))
}

/// GET /api/connectors/:id: full connector with its rules.
pub async fn get_connector(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let connector = Connector::load(&root, id)?;
        Ok(serde_json::json!({
            "connector": connector,
            "in_error": connector.is_in_error(),
        }))
    })
    .await?;

    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct UpdateConnectorBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub import_frequency_secs: Option<u64>,
    #[serde(default)]
    pub maximum_retries: Option<u32>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// PUT /api/connectors/:id: update connector settings.
pub async fn update_connector(
    State(app): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<UpdateConnectorBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let mut connector = Connector::load(&root, id)?;
        if let Some(name) = body.name {
            if name.trim().is_empty() {
                return Err(ExtractError::InvalidParameter(
                    "connector name cannot be empty".into(),
                ));
            }
            connector.name = name.trim().to_string();
        }
        if let Some(parameters) = body.parameters {
            connector.parameters = parameters;
        }
        if let Some(freq) = body.import_frequency_secs {
            if freq == 0 {
                return Err(ExtractError::InvalidParameter(
                    "import frequency must be at least 1 second".into(),
                ));
            }
            connector.import_frequency_secs = freq;
        }
        if let Some(retries) = body.maximum_retries {
            connector.maximum_retries = retries;
        }
        if let Some(active) = body.active {
            connector.active = active;
        }
        connector.save(&root)?;
        Ok(serde_json::json!(connector))
    })
    .await?;

    Ok(Json(result))
}

/// DELETE /api/connectors/:id: refused while the connector has active requests.
pub async fn delete_connector(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    blocking(move || Connector::delete(&root, id)).await?;
    tracing::info!(connector = id, "connector deleted");
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// POST /api/connectors/:id/import: run an import now, outside the schedule.
pub async fn import_now(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let ctx = app.clone();
    let result = blocking(move || {
        let job = ctx.job_context()?;
        let outcome = run_import(&job, id)?;
        Ok(serde_json::json!(outcome))
    })
    .await?;

    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AddRuleBody {
    pub expression: String,
    pub process_id: u64,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// POST /api/connectors/:id/rules: append a rule. The expression must parse.
pub async fn add_rule(
    State(app): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<AddRuleBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        validate_rule(&body.expression)?;
        Process::load(&root, body.process_id)?;
        let mut connector = Connector::load(&root, id)?;
        let rule_id = connector.add_rule(&root, &body.expression, body.process_id, body.active)?;
        connector.save(&root)?;
        let rule: Rule = connector.rule(rule_id)?.clone();
        Ok(serde_json::json!(rule))
    })
    .await?;

    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct UpdateRuleBody {
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub process_id: Option<u64>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub position: Option<u32>,
}

/// PUT /api/connectors/:id/rules/:rule_id: edit or move a rule.
pub async fn update_rule(
    State(app): State<AppState>,
    Path((id, rule_id)): Path<(u64, u64)>,
    Json(body): Json<UpdateRuleBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        if let Some(expr) = &body.expression {
            validate_rule(expr)?;
        }
        if let Some(pid) = body.process_id {
            Process::load(&root, pid)?;
        }
        let mut connector = Connector::load(&root, id)?;
        connector.update_rule(
            rule_id,
            body.expression.as_deref(),
            body.process_id,
            body.active,
        )?;
        if let Some(position) = body.position {
            connector.move_rule(rule_id, position)?;
        }
        connector.save(&root)?;
        Ok(serde_json::json!(connector.rules))
    })
    .await?;

    Ok(Json(result))
}

/// DELETE /api/connectors/:id/rules/:rule_id
pub async fn delete_rule(
    State(app): State<AppState>,
    Path((id, rule_id)): Path<(u64, u64)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let mut connector = Connector::load(&root, id)?;
        connector.remove_rule(rule_id)?;
        connector.save(&root)?;
        Ok(serde_json::json!(connector.rules))
    })
    .await?;

    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct TestRuleBody {
    pub expression: String,
    pub request_id: u64,
}

/// POST /api/rules/test: evaluate an expression against an existing request.
pub async fn test_rule(
    State(app): State<AppState>,
    Json(body): Json<TestRuleBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let request = Request::load(&root, body.request_id)?;
        let matches = evaluate_rule(&body.expression, &request)?;
        Ok(serde_json::json!({
            "request_id": body.request_id,
            "expression": body.expression,
            "matches": matches,
        }))
    })
    .await?;

    Ok(Json(result))
}
