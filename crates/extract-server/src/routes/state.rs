use axum::extract::State;
use axum::Json;
use chrono::Local;
use extract_core::config::Config;
use extract_core::request::Request;
use extract_core::state::State as InstanceState;
use extract_core::types::RequestStatus;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

/// Events shown on the dashboard, newest first.
const RECENT_EVENTS: usize = 30;

/// GET /api/state: request counts per status, orchestrator state and recent events.
pub async fn get_state(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let running = app.running.ids();
    let result = blocking(move || {
        let state = InstanceState::load(&root)?;
        let config = Config::load(&root)?;
        let requests = Request::list(&root)?;

        let counts: serde_json::Map<String, serde_json::Value> = RequestStatus::all()
            .iter()
            .map(|s| {
                let n = requests.iter().filter(|r| r.status == *s).count();
                (s.as_str().to_string(), serde_json::json!(n))
            })
            .collect();
        let attention = requests
            .iter()
            .filter(|r| r.status.needs_attention())
            .count();
        let events: Vec<_> = state.events.iter().rev().take(RECENT_EVENTS).collect();

        Ok(serde_json::json!({
            "instance": state.instance,
            "counts": counts,
            "attention": attention,
            "working_state": config.scheduler.state(Local::now().naive_local()),
            "orchestrator": state.orchestrator,
            "running": running,
            "events": events,
            "last_updated": state.last_updated,
        }))
    })
    .await?;

    Ok(Json(result))
}

/// GET /api/orchestrator: working state, tick frequency and requests being processed.
pub async fn get_orchestrator(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let running = app.running.ids();
    let result = blocking(move || {
        let config = Config::load(&root)?;
        let state = InstanceState::load(&root)?;
        let now = Local::now().naive_local();
        Ok(serde_json::json!({
            "working_state": config.scheduler.state(now),
            "working": config.scheduler.is_working(now),
            "mode": config.scheduler.mode,
            "frequency_secs": config.scheduler.frequency_secs,
            "ranges": config.scheduler.ranges,
            "last_tick": state.orchestrator.map(|o| o.last_tick),
            "running": running,
        }))
    })
    .await?;

    Ok(Json(result))
}
