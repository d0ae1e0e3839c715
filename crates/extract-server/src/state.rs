use std::path::{Path, PathBuf};
use std::sync::Arc;

use extract_core::config::Config;
use extract_core::connector::ConnectorRegistry;
use extract_core::history::HistoryDb;
use extract_core::jobs::{JobContext, RunningSet};
use extract_core::notify::{Mailer, OutboxMailer};
use extract_core::paths;
use extract_core::plugin::PluginRegistry;
use extract_core::state::State;
use tokio::sync::broadcast;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub root: PathBuf,
    /// Opened once: the store holds an exclusive file lock.
    pub history: Arc<HistoryDb>,
    pub plugins: Arc<PluginRegistry>,
    pub connectors: Arc<ConnectorRegistry>,
    pub mailer: Arc<dyn Mailer>,
    pub running: RunningSet,
    /// Carries the JSON payload of each SSE `update` event.
    pub event_tx: broadcast::Sender<String>,
}

impl AppState {
    pub fn open(root: PathBuf) -> extract_core::Result<Self> {
        let history = HistoryDb::open(&paths::history_db_path(&root))?;
        let mailer: Arc<dyn Mailer> = Arc::new(OutboxMailer::for_root(&root));
        Ok(Self::with_parts(
            root,
            Arc::new(history),
            Arc::new(PluginRegistry::with_builtins()),
            Arc::new(ConnectorRegistry::with_builtins()),
            mailer,
        ))
    }

    pub fn with_parts(
        root: PathBuf,
        history: Arc<HistoryDb>,
        plugins: Arc<PluginRegistry>,
        connectors: Arc<ConnectorRegistry>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let (tx, _) = broadcast::channel(64);
        let state = Self {
            root,
            history,
            plugins,
            connectors,
            mailer,
            running: RunningSet::new(),
            event_tx: tx.clone(),
        };

        // Watch .extract/state.yaml mtime and broadcast when it changes.
        // Catches web mutations, orchestrator progress and CLI updates alike.
        // Only spawned inside a Tokio runtime.
        if tokio::runtime::Handle::try_current().is_ok() {
            let root = state.root.clone();
            let state_file = paths::state_path(&root);
            tokio::spawn(async move {
                let mut last_mtime = None::<std::time::SystemTime>;
                loop {
                    tokio::time::sleep(std::time::Duration::from_millis(800)).await;
                    if let Ok(meta) = tokio::fs::metadata(&state_file).await {
                        if let Ok(mtime) = meta.modified() {
                            if last_mtime != Some(mtime) {
                                last_mtime = Some(mtime);
                                let root = root.clone();
                                let payload =
                                    tokio::task::spawn_blocking(move || update_payload(&root))
                                        .await
                                        .unwrap_or_default();
                                let _ = tx.send(payload);
                            }
                        }
                    }
                }
            });
        }

        state
    }

    /// Job context over the current `config.yaml`.
    pub fn job_context(&self) -> extract_core::Result<JobContext> {
        let config = Config::load(&self.root)?;
        Ok(JobContext::new(
            &self.root,
            config,
            self.history.clone(),
            self.plugins.clone(),
            self.connectors.clone(),
            self.mailer.clone(),
        ))
    }
}

/// Working state and latest event, sent with each `update`. An unreadable
/// state file still produces an update with an empty object.
fn update_payload(root: &Path) -> String {
    let body = match State::load(root) {
        Ok(state) => serde_json::json!({
            "working_state": state.orchestrator.map(|o| o.state),
            "last_event": state.events.last(),
            "last_updated": state.last_updated,
        }),
        Err(_) => serde_json::json!({}),
    };
    body.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_history_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(state.root, dir.path());
        assert!(paths::history_db_path(dir.path()).exists());
        assert!(state.running.ids().is_empty());
    }

    #[test]
    fn update_payload_carries_latest_event() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(update_payload(dir.path()), "{}");

        let mut state = State::new("test");
        state.record_event(Some(3), "validate", "web", "to_export");
        state.save(dir.path()).unwrap();
        let payload: serde_json::Value =
            serde_json::from_str(&update_payload(dir.path())).unwrap();
        assert_eq!(payload["last_event"]["request_id"], 3);
        assert_eq!(payload["last_event"]["action"], "validate");
    }
}
