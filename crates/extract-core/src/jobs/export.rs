use chrono::Utc;
use serde::Serialize;

use super::JobContext;
use crate::connector::{Connector, ExportRequest};
use crate::error::Result;
use crate::history::SYSTEM_USER;
use crate::process::Process;
use crate::request::Request;
use crate::state::State;
use crate::types::{HistoryStatus, RequestStatus};

pub const EXPORT_LABEL: &str = "Export";

#[derive(Debug, Default, Serialize)]
pub struct ExportOutcome {
    pub exported: usize,
    pub failed: usize,
}

/// Send the result of every request waiting for export back to its connector.
pub fn run_export(ctx: &JobContext) -> Result<ExportOutcome> {
    let mut outcome = ExportOutcome::default();
    for mut request in Request::list_by_status(&ctx.root, RequestStatus::ToExport)? {
        let connector = match Connector::load(&ctx.root, request.connector_id) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(request = request.id, error = %e, "export postponed");
                continue;
            }
        };
        let Some(plugin) = ctx.connectors.get(&connector.code) else {
            tracing::warn!(request = request.id, plugin = %connector.code, "connector plugin not found, export postponed");
            continue;
        };

        let task_count = match request.process_id {
            Some(pid) => Process::load(&ctx.root, pid).map(|p| p.tasks.len()).unwrap_or(0),
            None => 0,
        };
        let mut record = ctx.history.append(
            request.id,
            task_count as u32 + 1,
            EXPORT_LABEL,
            HistoryStatus::Ongoing,
            SYSTEM_USER,
        )?;

        let result = plugin.export_result(
            &connector.parameters,
            &ExportRequest::from_request(&request, &ctx.data_root),
        );

        if result.success {
            record.set_message(&result.message);
            record.finish(SYSTEM_USER);
            ctx.history.update(&record)?;
            request.status = RequestStatus::Finished;
            request.end_date = Some(Utc::now());
            request.save(&ctx.root)?;
            if let Err(e) = request.purge_folders(&ctx.data_root) {
                tracing::warn!(request = request.id, error = %e, "could not remove data folders");
            }
            outcome.exported += 1;
            tracing::info!(request = request.id, "request exported");
        } else {
            let message = match (result.message.trim(), result.details.trim()) {
                ("", "") => "The export failed".to_string(),
                (m, "") => m.to_string(),
                ("", d) => d.to_string(),
                (m, d) => format!("{m} - {d}"),
            };
            record.set_to_error(&message)?;
            ctx.history.update(&record)?;
            request.status = RequestStatus::ExportFail;
            request.save(&ctx.root)?;
            outcome.failed += 1;
            tracing::warn!(request = request.id, error = %message, "export failed");
            if let Err(e) = ctx.notifier.export_failed(&request, &message) {
                tracing::warn!(request = request.id, error = %e, "could not send export failure");
            }
        }
        State::log_event(&ctx.root, Some(request.id), "export", SYSTEM_USER, request.status.as_str())?;
    }
    Ok(outcome)
}
