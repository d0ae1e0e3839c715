//! Background scheduler driving the jobs of `extract_core::jobs`.
//!
//! Every `scheduler.frequency_secs` the loop reloads the configuration,
//! records its working state in `state.yaml` and, inside the working window,
//! runs export, matching, recovery, task execution and reminders. Each active
//! connector gets its own import task ticking at the connector's frequency.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{Local, Utc};
use extract_core::connector::Connector;
use extract_core::jobs::{
    recover_interrupted, run_export, run_import, run_matching, run_reminders, JobContext,
    TaskRunner,
};
use extract_core::request::Request;
use extract_core::state::State;
use extract_core::types::{RequestStatus, WorkingState};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

/// Pause after a tick that could not read its configuration.
const RETRY_SECS: u64 = 20;

struct ImportJob {
    frequency: u64,
    handle: JoinHandle<()>,
}

pub struct Orchestrator {
    app: AppState,
    imports: BTreeMap<u64, ImportJob>,
}

/// Start the orchestrator loop on the current runtime.
pub fn spawn(app: AppState) -> JoinHandle<()> {
    tokio::spawn(async move { Orchestrator::new(app).run().await })
}

impl Orchestrator {
    pub fn new(app: AppState) -> Self {
        Self {
            app,
            imports: BTreeMap::new(),
        }
    }

    pub async fn run(mut self) {
        info!(root = %self.app.root.display(), "orchestrator started");
        loop {
            let wait = match self.tick().await {
                Ok(frequency) => frequency,
                Err(e) => {
                    warn!(error = %e, "orchestrator tick failed");
                    RETRY_SECS
                }
            };
            tokio::time::sleep(Duration::from_secs(wait.max(1))).await;
        }
    }

    /// One scheduler pass. Returns the seconds to wait before the next one.
    pub async fn tick(&mut self) -> anyhow::Result<u64> {
        let app = self.app.clone();
        let (ctx, working, connectors) = tokio::task::spawn_blocking(move || {
            let ctx = app.job_context()?;
            let working = ctx.config.scheduler.state(Local::now().naive_local());
            State::update(&app.root, |s| s.set_orchestrator(working))?;
            let connectors = Connector::list(&app.root)?;
            Ok::<_, extract_core::ExtractError>((ctx, working, connectors))
        })
        .await??;
        let frequency = u64::from(ctx.config.scheduler.frequency_secs);

        if working != WorkingState::Running {
            if !self.imports.is_empty() {
                info!(state = %working, "orchestrator outside its working window");
            }
            self.stop_imports();
            return Ok(frequency);
        }

        self.schedule_imports(&connectors);

        let job = ctx.clone();
        let running = self.app.running.clone();
        let ongoing = tokio::task::spawn_blocking(move || {
            let export = run_export(&job)?;
            let matching = run_matching(&job)?;
            let recovered = recover_interrupted(&job, &running)?;
            debug!(
                exported = export.exported,
                export_failed = export.failed,
                matched = matching.matched,
                unmatched = matching.unmatched,
                recovered,
                "orchestrator jobs done"
            );
            Request::list_by_status(&job.root, RequestStatus::Ongoing)
        })
        .await??;

        for request in ongoing {
            self.spawn_runner(&ctx, request.id);
        }

        let job = ctx.clone();
        let reminders = tokio::task::spawn_blocking(move || run_reminders(&job, Utc::now())).await??;
        if reminders > 0 {
            debug!(reminders, "standby reminders sent");
        }

        Ok(frequency)
    }

    /// Run a request's tasks on the blocking pool unless it is already running.
    fn spawn_runner(&self, ctx: &JobContext, request_id: u64) {
        let Some(guard) = self.app.running.claim(request_id) else {
            return;
        };
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            match TaskRunner::new(&ctx).run(request_id) {
                Ok(outcome) => debug!(
                    request = request_id,
                    status = %outcome.status,
                    completed = outcome.completed,
                    "task run finished"
                ),
                Err(e) => error!(request = request_id, error = %e, "task execution aborted"),
            }
        });
    }

    // -----------------------------------------------------------------------
    // Import jobs
    // -----------------------------------------------------------------------

    /// Align the import tasks with the active connectors: new connectors get a
    /// task, changed frequencies are rescheduled, removed or inactive ones stop.
    fn schedule_imports(&mut self, connectors: &[Connector]) {
        let wanted: BTreeMap<u64, u64> = connectors
            .iter()
            .filter(|c| c.active)
            .map(|c| (c.id, c.import_frequency_secs.max(1)))
            .collect();

        self.imports.retain(|id, job| {
            let keep = wanted.get(id) == Some(&job.frequency) && !job.handle.is_finished();
            if !keep {
                job.handle.abort();
                debug!(connector = id, "import job cancelled");
            }
            keep
        });

        for (id, frequency) in wanted {
            if self.imports.contains_key(&id) {
                continue;
            }
            let handle = tokio::spawn(import_loop(self.app.clone(), id, frequency));
            debug!(connector = id, frequency, "import job scheduled");
            self.imports.insert(id, ImportJob { frequency, handle });
        }
    }

    fn stop_imports(&mut self) {
        for (id, job) in std::mem::take(&mut self.imports) {
            job.handle.abort();
            debug!(connector = id, "import job cancelled");
        }
    }

    pub fn scheduled_imports(&self) -> Vec<u64> {
        self.imports.keys().copied().collect()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop_imports();
    }
}

/// Import a connector every `frequency` seconds, the first time one period
/// after scheduling.
async fn import_loop(app: AppState, connector_id: u64, frequency: u64) {
    let period = Duration::from_secs(frequency);
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let app = app.clone();
        let result = tokio::task::spawn_blocking(move || {
            let ctx = app.job_context()?;
            run_import(&ctx, connector_id)
        })
        .await;
        match result {
            Ok(Ok(outcome)) => {
                if let Some(e) = &outcome.error {
                    warn!(connector = connector_id, error = %e, "import failed");
                } else if outcome.imported > 0 {
                    info!(connector = connector_id, imported = outcome.imported, "requests imported");
                }
            }
            Ok(Err(e)) => warn!(connector = connector_id, error = %e, "import job error"),
            Err(e) => error!(connector = connector_id, error = %e, "import job panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract_core::config::Config;
    use extract_core::types::SchedulerMode;
    use tempfile::TempDir;

    fn setup() -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        Config::new("test").save(dir.path()).unwrap();
        State::new("test").save(dir.path()).unwrap();
        let app = AppState::open(dir.path().to_path_buf()).unwrap();
        (dir, app)
    }

    #[tokio::test]
    async fn tick_records_state_and_schedules_imports() {
        let (dir, app) = setup();
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        let mut c = Connector::new("FOLDER", "Inbox");
        c.parameters.insert("inbox".into(), inbox.display().to_string());
        c.parameters.insert("outbox".into(), dir.path().join("outbox").display().to_string());
        let c = Connector::create(dir.path(), c).unwrap();

        let mut orchestrator = Orchestrator::new(app);
        let wait = orchestrator.tick().await.unwrap();
        assert_eq!(wait, 20);
        assert_eq!(orchestrator.scheduled_imports(), vec![c.id]);

        let state = State::load(dir.path()).unwrap();
        assert_eq!(state.orchestrator.unwrap().state, WorkingState::Running);
    }

    #[tokio::test]
    async fn stopped_scheduler_cancels_imports() {
        let (dir, app) = setup();
        Connector::create(dir.path(), Connector::new("FOLDER", "Inbox")).unwrap();
        let mut orchestrator = Orchestrator::new(app);
        orchestrator.tick().await.unwrap();
        assert_eq!(orchestrator.scheduled_imports().len(), 1);

        let mut config = Config::load(dir.path()).unwrap();
        config.scheduler.mode = SchedulerMode::Off;
        config.save(dir.path()).unwrap();
        orchestrator.tick().await.unwrap();
        assert!(orchestrator.scheduled_imports().is_empty());
        let state = State::load(dir.path()).unwrap();
        assert_eq!(state.orchestrator.unwrap().state, WorkingState::Stopped);
    }

    #[tokio::test]
    async fn deactivated_connector_loses_its_import_job() {
        let (dir, app) = setup();
        let mut c = Connector::create(dir.path(), Connector::new("FOLDER", "Inbox")).unwrap();
        let mut orchestrator = Orchestrator::new(app);
        orchestrator.tick().await.unwrap();
        assert_eq!(orchestrator.scheduled_imports(), vec![c.id]);

        c.active = false;
        c.save(dir.path()).unwrap();
        orchestrator.tick().await.unwrap();
        assert!(orchestrator.scheduled_imports().is_empty());
    }
}
