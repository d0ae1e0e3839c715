use crate::output::{or_dash, print_json, print_table};
use anyhow::Context;
use extract_core::jobs::{run_cycle, run_imports, JobContext, RunningSet};
use extract_server::{orchestrator::Orchestrator, AppState};
use std::path::Path;

pub fn run(root: &Path, once: bool, json: bool) -> anyhow::Result<()> {
    if once {
        return run_once(root, json);
    }

    let app = AppState::open(root.to_path_buf()).context("failed to open instance")?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        tokio::select! {
            _ = Orchestrator::new(app).run() => {}
            _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
        }
    });
    Ok(())
}

fn run_once(root: &Path, json: bool) -> anyhow::Result<()> {
    let ctx = JobContext::open(root).context("failed to open instance")?;
    let imports = run_imports(&ctx).context("import failed")?;
    let report = run_cycle(&ctx, &RunningSet::new()).context("job cycle failed")?;

    if json {
        return print_json(&serde_json::json!({
            "imports": imports,
            "cycle": report,
        }));
    }

    if imports.is_empty() {
        println!("No active connectors.");
    } else {
        let rows = imports
            .iter()
            .map(|i| {
                vec![
                    i.connector_id.to_string(),
                    i.imported.to_string(),
                    i.invalid.to_string(),
                    or_dash(i.error.as_deref()),
                ]
            })
            .collect();
        print_table(&["CONNECTOR", "IMPORTED", "INVALID", "ERROR"], rows);
    }

    println!();
    println!(
        "Matched {} ({} unmatched), exported {} ({} failed), recovered {}, reminders sent {}.",
        report.matched,
        report.unmatched,
        report.exported,
        report.export_failed,
        report.recovered,
        report.reminders,
    );
    for task in &report.tasks {
        println!(
            "  request {}: {} task(s) completed, now {}",
            task.request_id, task.completed, task.status
        );
    }
    Ok(())
}
