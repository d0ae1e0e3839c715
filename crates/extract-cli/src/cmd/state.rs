use crate::output::{or_dash, print_json, print_table};
use anyhow::Context;
use chrono::Local;
use extract_core::{config::Config, request::Request, state::State, types::RequestStatus};
use std::path::Path;

const RECENT_EVENTS: usize = 10;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let state = State::load(root).context("failed to load state")?;
    let config = Config::load(root).context("failed to load config")?;
    let requests = Request::list(root).context("failed to list requests")?;
    let working_state = config.scheduler.state(Local::now().naive_local());

    let counts: Vec<(RequestStatus, usize)> = RequestStatus::all()
        .iter()
        .map(|s| (*s, requests.iter().filter(|r| r.status == *s).count()))
        .collect();

    if json {
        let counts: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(s, n)| (s.as_str().to_string(), serde_json::json!(n)))
            .collect();
        return print_json(&serde_json::json!({
            "instance": state.instance,
            "counts": counts,
            "working_state": working_state,
            "orchestrator": state.orchestrator,
            "events": state.events.iter().rev().take(RECENT_EVENTS).collect::<Vec<_>>(),
        }));
    }

    println!("Instance: {}", state.instance);
    println!("Orchestrator: {working_state}");
    if let Some(snapshot) = &state.orchestrator {
        println!(
            "Last tick: {} ({})",
            snapshot.last_tick.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            snapshot.state
        );
    }

    println!();
    let rows = counts
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(s, n)| vec![s.to_string(), n.to_string()])
        .collect::<Vec<_>>();
    if rows.is_empty() {
        println!("No requests yet.");
    } else {
        print_table(&["STATUS", "REQUESTS"], rows);
    }

    if !state.events.is_empty() {
        println!("\nRecent events:");
        let rows = state
            .events
            .iter()
            .rev()
            .take(RECENT_EVENTS)
            .map(|e| {
                vec![
                    e.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
                    or_dash(e.request_id),
                    e.action.clone(),
                    e.user.clone(),
                    e.outcome.clone(),
                ]
            })
            .collect();
        print_table(&["WHEN", "REQUEST", "ACTION", "USER", "OUTCOME"], rows);
    }
    Ok(())
}
