//! Orchestrator jobs: import, matching, task execution, export and reminders.
//!
//! Every job is synchronous and works on the file store; the server wraps
//! them in blocking tasks, the CLI calls [`run_cycle`] directly.

pub mod export;
pub mod import;
pub mod matching;
pub mod reminder;
pub mod runner;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::config::Config;
use crate::connector::ConnectorRegistry;
use crate::error::Result;
use crate::history::HistoryDb;
use crate::notify::{Mailer, Notifier, OutboxMailer};
use crate::paths;
use crate::plugin::PluginRegistry;

pub use export::{run_export, ExportOutcome};
pub use import::{run_import, run_imports, ImportOutcome};
pub use matching::{run_matching, MatchingOutcome};
pub use reminder::run_reminders;
pub use runner::{recover_interrupted, run_tasks, TaskOutcome, TaskRunner};

// ---------------------------------------------------------------------------
// JobContext
// ---------------------------------------------------------------------------

/// Shared handles every job needs.
#[derive(Clone)]
pub struct JobContext {
    pub root: PathBuf,
    pub config: Config,
    pub data_root: PathBuf,
    pub history: Arc<HistoryDb>,
    pub plugins: Arc<PluginRegistry>,
    pub connectors: Arc<ConnectorRegistry>,
    pub notifier: Notifier,
    mailer: Arc<dyn Mailer>,
}

impl JobContext {
    pub fn new(
        root: &Path,
        config: Config,
        history: Arc<HistoryDb>,
        plugins: Arc<PluginRegistry>,
        connectors: Arc<ConnectorRegistry>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let notifier = Notifier::new(root, config.email.clone(), mailer.clone());
        Self {
            root: root.to_path_buf(),
            data_root: config.data_root(root),
            config,
            history,
            plugins,
            connectors,
            notifier,
            mailer,
        }
    }

    /// Context with the built-in plugins, the file outbox and the instance history store.
    pub fn open(root: &Path) -> Result<Self> {
        let config = Config::load(root)?;
        let history = HistoryDb::open(&paths::history_db_path(root))?;
        Ok(Self::new(
            root,
            config,
            Arc::new(history),
            Arc::new(PluginRegistry::with_builtins()),
            Arc::new(ConnectorRegistry::with_builtins()),
            Arc::new(OutboxMailer::for_root(root)),
        ))
    }

    /// Re-read `config.yaml` so settings changes apply on the next job.
    pub fn reload_config(&mut self) -> Result<()> {
        let config = Config::load(&self.root)?;
        self.data_root = config.data_root(&self.root);
        self.notifier = Notifier::new(&self.root, config.email.clone(), self.mailer.clone());
        self.config = config;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Running set
// ---------------------------------------------------------------------------

/// Ids of the requests whose tasks are executing right now.
#[derive(Clone, Default)]
pub struct RunningSet(Arc<Mutex<BTreeSet<u64>>>);

impl RunningSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut BTreeSet<u64>) -> T) -> T {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Mark a request as running. `None` when it already is.
    pub fn claim(&self, id: u64) -> Option<RunningGuard> {
        self.with(|set| set.insert(id)).then(|| RunningGuard {
            set: self.clone(),
            id,
        })
    }

    pub fn contains(&self, id: u64) -> bool {
        self.with(|set| set.contains(&id))
    }

    pub fn ids(&self) -> Vec<u64> {
        self.with(|set| set.iter().copied().collect())
    }
}

/// Releases its request from the [`RunningSet`] when dropped.
pub struct RunningGuard {
    set: RunningSet,
    id: u64,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let id = self.id;
        self.set.with(|set| set.remove(&id));
    }
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
pub struct CycleReport {
    pub exported: usize,
    pub export_failed: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub recovered: usize,
    pub tasks: Vec<TaskOutcome>,
    pub reminders: usize,
}

/// One pass of every non-import job: export, matching, interrupted-run
/// recovery, task execution, then reminders.
pub fn run_cycle(ctx: &JobContext, running: &RunningSet) -> Result<CycleReport> {
    let export = run_export(ctx)?;
    let matching = run_matching(ctx)?;
    let recovered = recover_interrupted(ctx, running)?;
    let tasks = run_tasks(ctx, running)?;
    let reminders = run_reminders(ctx, chrono::Utc::now())?;
    let report = CycleReport {
        exported: export.exported,
        export_failed: export.failed,
        matched: matching.matched,
        unmatched: matching.unmatched,
        recovered,
        tasks,
        reminders,
    };
    tracing::debug!(
        exported = report.exported,
        matched = report.matched,
        tasks = report.tasks.len(),
        "cycle complete"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
