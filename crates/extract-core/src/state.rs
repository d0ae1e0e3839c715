use crate::error::{ExtractError, Result};
use crate::paths;
use crate::types::WorkingState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

/// Serializes read-modify-write cycles on `state.yaml` within the process.
static STATE_LOCK: Mutex<()> = Mutex::new(());

const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Request,
    Connector,
    Rule,
    Process,
    Task,
    Group,
    Remark,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdCounters {
    #[serde(default)]
    pub request: u64,
    #[serde(default)]
    pub connector: u64,
    #[serde(default)]
    pub rule: u64,
    #[serde(default)]
    pub process: u64,
    #[serde(default)]
    pub task: u64,
    #[serde(default)]
    pub group: u64,
    #[serde(default)]
    pub remark: u64,
}

impl IdCounters {
    fn slot(&mut self, kind: IdKind) -> &mut u64 {
        match kind {
            IdKind::Request => &mut self.request,
            IdKind::Connector => &mut self.connector,
            IdKind::Rule => &mut self.rule,
            IdKind::Process => &mut self.process,
            IdKind::Task => &mut self.task,
            IdKind::Group => &mut self.group,
            IdKind::Remark => &mut self.remark,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub action: String,
    pub user: String,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSnapshot {
    pub state: WorkingState,
    pub last_tick: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    #[serde(default = "default_version")]
    pub version: u32,
    pub instance: String,
    #[serde(default)]
    pub ids: IdCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrator: Option<OrchestratorSnapshot>,
    #[serde(default)]
    pub events: Vec<EventEntry>,
    pub last_updated: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl State {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            version: 1,
            instance: instance.into(),
            ids: IdCounters::default(),
            orchestrator: None,
            events: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    // ---------------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------------

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::state_path(root);
        if !path.exists() {
            return Err(ExtractError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let state: State = serde_yaml::from_str(&data)?;
        Ok(state)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::state_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Load, mutate and save under the process-wide state lock.
    pub fn update<T>(root: &Path, f: impl FnOnce(&mut State) -> T) -> Result<T> {
        let _guard = STATE_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let mut state = Self::load(root)?;
        let out = f(&mut state);
        state.last_updated = Utc::now();
        state.save(root)?;
        Ok(out)
    }

    // ---------------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------------

    /// Allocate the next identifier of `kind`.
    pub fn next_id(root: &Path, kind: IdKind) -> Result<u64> {
        Self::update(root, |s| {
            let slot = s.ids.slot(kind);
            *slot += 1;
            *slot
        })
    }

    pub fn record_event(
        &mut self,
        request_id: Option<u64>,
        action: &str,
        user: &str,
        outcome: &str,
    ) {
        self.events.push(EventEntry {
            request_id,
            action: action.to_string(),
            user: user.to_string(),
            outcome: outcome.to_string(),
            timestamp: Utc::now(),
        });
        if self.events.len() > MAX_EVENTS {
            self.events.drain(..self.events.len() - MAX_EVENTS);
        }
        self.last_updated = Utc::now();
    }

    /// Append an event to the persisted state.
    pub fn log_event(
        root: &Path,
        request_id: Option<u64>,
        action: &str,
        user: &str,
        outcome: &str,
    ) -> Result<()> {
        Self::update(root, |s| s.record_event(request_id, action, user, outcome))
    }

    pub fn set_orchestrator(&mut self, state: WorkingState) {
        self.orchestrator = Some(OrchestratorSnapshot {
            state,
            last_tick: Utc::now(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn next_id_is_sequential_per_kind() {
        let dir = TempDir::new().unwrap();
        State::new("test").save(dir.path()).unwrap();

        assert_eq!(State::next_id(dir.path(), IdKind::Request).unwrap(), 1);
        assert_eq!(State::next_id(dir.path(), IdKind::Request).unwrap(), 2);
        assert_eq!(State::next_id(dir.path(), IdKind::Process).unwrap(), 1);

        let state = State::load(dir.path()).unwrap();
        assert_eq!(state.ids.request, 2);
        assert_eq!(state.ids.process, 1);
    }

    #[test]
    fn next_id_requires_initialized_instance() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            State::next_id(dir.path(), IdKind::Rule),
            Err(ExtractError::NotInitialized)
        ));
    }

    #[test]
    fn events_are_capped() {
        let mut state = State::new("test");
        for i in 0..(MAX_EVENTS + 25) {
            state.record_event(Some(i as u64), "validate", "op", "ok");
        }
        assert_eq!(state.events.len(), MAX_EVENTS);
        assert_eq!(state.events[0].request_id, Some(25));
    }

    #[test]
    fn concurrent_allocation_yields_distinct_ids() {
        let dir = TempDir::new().unwrap();
        State::new("test").save(dir.path()).unwrap();
        let root = dir.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let root = root.clone();
                std::thread::spawn(move || State::next_id(&root, IdKind::Request).unwrap())
            })
            .collect();
        let mut ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        assert_eq!(ids, (1..=8).collect::<Vec<_>>());
    }
}
