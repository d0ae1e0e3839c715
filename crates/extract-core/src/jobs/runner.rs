//! Executes the tasks of ongoing requests, one plugin call at a time.

use chrono::Utc;
use serde::Serialize;

use super::{JobContext, RunningSet};
use crate::error::Result;
use crate::history::{HistoryRecord, SYSTEM_USER};
use crate::plugin::{TaskRequest, TaskResult, TaskStatus};
use crate::process::{Process, Task};
use crate::request::Request;
use crate::state::State;
use crate::types::{HistoryStatus, RequestStatus};

pub const INTERRUPTED_MESSAGE: &str = "The task was interrupted before it completed";

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub request_id: u64,
    pub status: RequestStatus,
    /// Tasks that ran to completion during this call.
    pub completed: u32,
}

enum Flow {
    Next,
    Stop,
}

pub struct TaskRunner<'a> {
    ctx: &'a JobContext,
}

impl<'a> TaskRunner<'a> {
    pub fn new(ctx: &'a JobContext) -> Self {
        Self { ctx }
    }

    /// Run the tasks of an ongoing request until it waits, fails, is retried
    /// later or has no task left.
    pub fn run(&self, request_id: u64) -> Result<TaskOutcome> {
        let mut request = Request::load(&self.ctx.root, request_id)?;
        let tasks = match request.process_id {
            Some(pid) => Process::load(&self.ctx.root, pid)?.tasks,
            None => Vec::new(),
        };

        let mut completed = 0;
        while request.is_ongoing() {
            match self.step(&mut request, &tasks)? {
                Flow::Next => completed += 1,
                Flow::Stop => break,
            }
        }
        Ok(TaskOutcome {
            request_id,
            status: request.status,
            completed,
        })
    }

    fn step(&self, request: &mut Request, tasks: &[Task]) -> Result<Flow> {
        let ctx = self.ctx;
        let task = match request.current_task(tasks) {
            Some(task) if !request.rejected => task,
            _ => {
                request.status = RequestStatus::ToExport;
                request.save(&ctx.root)?;
                return Ok(Flow::Stop);
            }
        };

        let mut record = ctx.history.append(
            request.id,
            task.position,
            &task.label,
            HistoryStatus::Ongoing,
            SYSTEM_USER,
        )?;

        let Some(plugin) = ctx.plugins.get(&task.code) else {
            let message = format!("Plugin {} not found.", task.code);
            self.fail(request, &mut record, task, &message)?;
            return Ok(Flow::Stop);
        };

        tracing::debug!(request = request.id, task = %task.label, plugin = %task.code, "running task");
        let snapshot = TaskRequest {
            request: request.clone(),
            input_dir: request.input_dir(&ctx.data_root),
            output_dir: request.output_dir(&ctx.data_root),
        };
        let result = plugin.execute(
            &snapshot,
            &task.parameters,
            ctx.notifier.settings(),
            ctx.notifier.mailer(),
        );

        match result.status {
            TaskStatus::Error => {
                let message = error_message(&result);
                self.fail(request, &mut record, task, &message)?;
                Ok(Flow::Stop)
            }
            TaskStatus::NotRun => {
                ctx.history.remove(request.id, record.step)?;
                tracing::info!(request = request.id, task = %task.label, "task not run, retrying later");
                Ok(Flow::Stop)
            }
            TaskStatus::Standby => {
                record.status = HistoryStatus::Standby;
                record.set_message(&result.message);
                ctx.history.update(&record)?;
                request.status = RequestStatus::Standby;
                request.last_reminder = Some(Utc::now());
                request.save(&ctx.root)?;
                State::log_event(&ctx.root, Some(request.id), "task", SYSTEM_USER, "standby")?;
                if let Err(e) = ctx.notifier.standby(request, &task.label) {
                    tracing::warn!(request = request.id, error = %e, "could not notify operators");
                }
                Ok(Flow::Stop)
            }
            TaskStatus::Success => {
                if let Err(message) = apply_request_data(request, &result) {
                    self.fail(request, &mut record, task, &message)?;
                    return Ok(Flow::Stop);
                }
                record.set_message(&result.message);
                record.finish(SYSTEM_USER);
                ctx.history.update(&record)?;
                request.tasknum = Some(task.position + 1);
                request.save(&ctx.root)?;
                Ok(Flow::Next)
            }
        }
    }

    fn fail(
        &self,
        request: &mut Request,
        record: &mut HistoryRecord,
        task: &Task,
        message: &str,
    ) -> Result<()> {
        let ctx = self.ctx;
        record.set_to_error(message)?;
        ctx.history.update(record)?;
        request.status = RequestStatus::Error;
        request.save(&ctx.root)?;
        tracing::warn!(request = request.id, task = %task.label, error = message, "task failed");
        State::log_event(&ctx.root, Some(request.id), "task", SYSTEM_USER, "error")?;
        if let Err(e) = ctx.notifier.task_failed(request, &task.label, message) {
            tracing::warn!(request = request.id, error = %e, "could not notify operators");
        }
        Ok(())
    }
}

fn error_message(result: &TaskResult) -> String {
    let message = if result.message.trim().is_empty() {
        "The task failed without a message"
    } else {
        result.message.as_str()
    };
    format!("{message} ({})", result.error_code)
}

/// Copy the remark and rejection flag a plugin returned.
fn apply_request_data(request: &mut Request, result: &TaskResult) -> std::result::Result<(), String> {
    let Some(data) = &result.request_data else {
        return Ok(());
    };
    if data.rejected {
        if data.remark.trim().is_empty() {
            return Err("The task rejected the request without a remark".into());
        }
        request.set_remark(&data.remark).map_err(|e| e.to_string())?;
        request.rejected = true;
    } else if data.remark != request.remark {
        request.set_remark(&data.remark).map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Close runs cut short by a shutdown: an ongoing request that nobody is
/// running but whose last history record is still ongoing goes to error.
pub fn recover_interrupted(ctx: &JobContext, running: &RunningSet) -> Result<usize> {
    let mut recovered = 0;
    for mut request in Request::list_by_status(&ctx.root, RequestStatus::Ongoing)? {
        if running.contains(request.id) {
            continue;
        }
        let Some(mut last) = ctx.history.last_for(request.id)? else {
            continue;
        };
        if last.status != HistoryStatus::Ongoing {
            continue;
        }
        last.set_to_error(INTERRUPTED_MESSAGE)?;
        ctx.history.update(&last)?;
        request.status = RequestStatus::Error;
        request.save(&ctx.root)?;
        State::log_event(&ctx.root, Some(request.id), "recover", SYSTEM_USER, "error")?;
        tracing::warn!(request = request.id, task = %last.task_label, "interrupted task marked as failed");
        recovered += 1;
    }
    Ok(recovered)
}

/// Run every ongoing request that is not already running.
pub fn run_tasks(ctx: &JobContext, running: &RunningSet) -> Result<Vec<TaskOutcome>> {
    let runner = TaskRunner::new(ctx);
    let mut outcomes = Vec::new();
    for request in Request::list_by_status(&ctx.root, RequestStatus::Ongoing)? {
        let Some(_guard) = running.claim(request.id) else {
            continue;
        };
        match runner.run(request.id) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => tracing::error!(request = request.id, error = %e, "task execution aborted"),
        }
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::*;
    use crate::connector::Product;
    use crate::plugin::{ParamSpec, PluginRegistry, TaskProcessor};
    use crate::config::EmailSettings;
    use crate::notify::Mailer;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Ongoing request on a fresh process made of `tasks`.
    fn ongoing(h: &Harness, tasks: &[(&str, &[(&str, &str)])]) -> Request {
        let process = h.process(tasks);
        let connector = h.folder_connector();
        let mut request = Request::from_product(
            connector.id,
            &Product {
                order_label: "ORD".into(),
                perimeter: Some("POINT(1 1)".into()),
                ..Default::default()
            },
        );
        request.status = RequestStatus::Ongoing;
        request.process_id = Some(process.id);
        request.tasknum = Some(1);
        request.folder_in = Some("r/input".into());
        request.folder_out = Some("r/output".into());
        Request::create(h.root(), request).unwrap()
    }

    fn statuses(h: &Harness, id: u64) -> Vec<(String, HistoryStatus)> {
        h.ctx
            .history
            .for_request(id)
            .unwrap()
            .into_iter()
            .map(|r| (r.task_label, r.status))
            .collect()
    }

    #[test]
    fn successful_tasks_run_through_to_export() {
        let h = Harness::new();
        let req = ongoing(
            &h,
            &[
                ("REMARK", &[("remark", "Première")]),
                ("REMARK", &[("remark", "Seconde")]),
            ],
        );

        let outcome = TaskRunner::new(&h.ctx).run(req.id).unwrap();
        assert_eq!(outcome.completed, 2);
        assert_eq!(outcome.status, RequestStatus::ToExport);

        let req = Request::load(h.root(), req.id).unwrap();
        assert_eq!(req.remark, "Première\r\nSeconde");
        assert_eq!(req.tasknum, Some(3));
        assert_eq!(
            statuses(&h, req.id),
            vec![
                ("REMARK".to_string(), HistoryStatus::Finished),
                ("REMARK".to_string(), HistoryStatus::Finished),
            ]
        );
    }

    #[test]
    fn standby_stops_and_notifies_operators() {
        let h = Harness::new();
        let req = ongoing(&h, &[("VALIDATION", &[]), ("REMARK", &[("remark", "x")])]);

        let outcome = TaskRunner::new(&h.ctx).run(req.id).unwrap();
        assert_eq!(outcome.status, RequestStatus::Standby);
        let req = Request::load(h.root(), req.id).unwrap();
        assert!(req.last_reminder.is_some());
        assert_eq!(req.tasknum, Some(1));
        assert_eq!(statuses(&h, req.id), vec![("VALIDATION".to_string(), HistoryStatus::Standby)]);
        assert_eq!(h.recipients(), vec![vec!["op@example.ch".to_string()]]);
    }

    #[test]
    fn reject_task_sends_request_to_export() {
        let h = Harness::new();
        let req = ongoing(
            &h,
            &[("REJECT", &[("remark", "Hors zone")]), ("REMARK", &[("remark", "x")])],
        );
        let outcome = TaskRunner::new(&h.ctx).run(req.id).unwrap();
        assert_eq!(outcome.status, RequestStatus::ToExport);
        let req = Request::load(h.root(), req.id).unwrap();
        assert!(req.rejected);
        assert_eq!(req.remark, "Hors zone");
        assert_eq!(statuses(&h, req.id).len(), 1);
    }

    #[test]
    fn error_message_always_carries_the_code() {
        assert_eq!(error_message(&TaskResult::error("Bad input", "42")), "Bad input (42)");
        assert_eq!(error_message(&TaskResult::error("Bad input", "")), "Bad input ()");
        assert_eq!(
            error_message(&TaskResult::error("  ", "-1")),
            "The task failed without a message (-1)"
        );
    }

    #[test]
    fn plugin_error_and_missing_plugin() {
        let h = Harness::new();
        let req = ongoing(&h, &[("REJECT", &[("remark", "  ")])]);
        TaskRunner::new(&h.ctx).run(req.id).unwrap();
        let record = h.ctx.history.last_for(req.id).unwrap().unwrap();
        assert_eq!(record.status, HistoryStatus::Error);
        assert!(record.message.ends_with("(-1)"), "{}", record.message);
        assert_eq!(Request::load(h.root(), req.id).unwrap().status, RequestStatus::Error);
        assert_eq!(h.recipients(), vec![vec!["op@example.ch".to_string()]]);

        let h = Harness::new();
        let req = ongoing(&h, &[("FME2017", &[])]);
        TaskRunner::new(&h.ctx).run(req.id).unwrap();
        let record = h.ctx.history.last_for(req.id).unwrap().unwrap();
        assert_eq!(record.message, "Plugin FME2017 not found.");
    }

    struct NotReady;

    impl TaskProcessor for NotReady {
        fn code(&self) -> &'static str {
            "WAIT"
        }
        fn label(&self) -> &'static str {
            "Wait"
        }
        fn description(&self) -> &'static str {
            ""
        }
        fn help(&self) -> &'static str {
            ""
        }
        fn picto_class(&self) -> &'static str {
            ""
        }
        fn params(&self) -> Vec<ParamSpec> {
            Vec::new()
        }
        fn execute(
            &self,
            _request: &TaskRequest,
            _params: &BTreeMap<String, String>,
            _email: &EmailSettings,
            _mailer: &dyn Mailer,
        ) -> TaskResult {
            TaskResult::not_run("resource busy")
        }
    }

    #[test]
    fn not_run_leaves_no_trace() {
        let mut h = Harness::new();
        let mut plugins = PluginRegistry::with_builtins();
        plugins.register(Box::new(NotReady));
        h.ctx.plugins = Arc::new(plugins);

        let req = ongoing(&h, &[("WAIT", &[])]);
        let outcome = TaskRunner::new(&h.ctx).run(req.id).unwrap();
        assert_eq!(outcome.status, RequestStatus::Ongoing);
        assert_eq!(outcome.completed, 0);
        assert!(h.ctx.history.for_request(req.id).unwrap().is_empty());
    }

    #[test]
    fn interrupted_runs_are_recovered_unless_running() {
        let h = Harness::new();
        let req = ongoing(&h, &[("REMARK", &[("remark", "x")])]);
        h.ctx
            .history
            .append(req.id, 1, "REMARK", HistoryStatus::Ongoing, SYSTEM_USER)
            .unwrap();

        let running = RunningSet::new();
        let guard = running.claim(req.id).unwrap();
        assert_eq!(recover_interrupted(&h.ctx, &running).unwrap(), 0);
        drop(guard);

        assert_eq!(recover_interrupted(&h.ctx, &running).unwrap(), 1);
        let record = h.ctx.history.last_for(req.id).unwrap().unwrap();
        assert_eq!(record.status, HistoryStatus::Error);
        assert_eq!(record.message, INTERRUPTED_MESSAGE);
        assert_eq!(Request::load(h.root(), req.id).unwrap().status, RequestStatus::Error);
    }

    #[test]
    fn run_tasks_skips_claimed_requests() {
        let h = Harness::new();
        let req = ongoing(&h, &[("REMARK", &[("remark", "x")])]);
        let running = RunningSet::new();
        let _guard = running.claim(req.id).unwrap();
        assert!(run_tasks(&h.ctx, &running).unwrap().is_empty());
    }
}
