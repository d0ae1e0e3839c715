use axum::extract::State;
use axum::Json;
use extract_core::config::{Config, WarnLevel};
use extract_core::error::ExtractError;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

/// GET /api/settings: current configuration with its validation warnings.
pub async fn get_settings(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let config = Config::load(&root)?;
        let warnings = config.validate(&root);
        Ok(serde_json::json!({
            "config": config,
            "warnings": warnings,
        }))
    })
    .await?;

    Ok(Json(result))
}

/// PUT /api/settings: replace the configuration.
///
/// Error-level findings refuse the save; warnings are returned alongside the
/// stored configuration.
pub async fn put_settings(
    State(app): State<AppState>,
    Json(config): Json<Config>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let warnings = config.validate(&root);
        let errors: Vec<&str> = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message.as_str())
            .collect();
        if !errors.is_empty() {
            return Err(ExtractError::InvalidParameter(errors.join("; ")));
        }
        config.save(&root)?;
        tracing::info!(
            mode = %config.scheduler.mode,
            frequency_secs = config.scheduler.frequency_secs,
            "settings updated"
        );
        Ok(serde_json::json!({
            "config": config,
            "warnings": warnings,
        }))
    })
    .await?;

    Ok(Json(result))
}
