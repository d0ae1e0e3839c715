use super::{data_root, open_history};
use crate::output::{or_dash, print_json, print_table};
use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use clap::Subcommand;
use extract_core::{
    config::Config,
    process::Process,
    request::{perform_action, OperatorAction, Request},
    types::RequestStatus,
};
use std::path::Path;

/// Actor recorded for CLI actions when `--user` is not given.
const CLI_USER: &str = "admin";

#[derive(Subcommand)]
pub enum RequestSubcommand {
    /// List requests
    List {
        /// Only requests in this status (e.g. error, standby, to_export)
        #[arg(long)]
        status: Option<String>,
        /// Only requests imported by this connector
        #[arg(long)]
        connector: Option<u64>,
    },
    /// Show a request with its processing history
    Show { id: u64 },
    /// Validate the task waiting in standby
    Validate {
        id: u64,
        #[arg(long)]
        remark: Option<String>,
        #[command(flatten)]
        actor: Actor,
    },
    /// Reject the request; it is exported with the remark as the reason
    Reject {
        id: u64,
        #[arg(long)]
        remark: String,
        #[command(flatten)]
        actor: Actor,
    },
    /// Restart the process from its first task
    Relaunch {
        id: u64,
        #[command(flatten)]
        actor: Actor,
    },
    /// Run the current task again
    RestartTask {
        id: u64,
        #[command(flatten)]
        actor: Actor,
    },
    /// Skip the current task and go on with the next one
    SkipTask {
        id: u64,
        #[command(flatten)]
        actor: Actor,
    },
    /// Queue a failed export again
    RetryExport {
        id: u64,
        #[command(flatten)]
        actor: Actor,
    },
    /// Match an unmatched request against the rules again
    RetryMatching {
        id: u64,
        #[command(flatten)]
        actor: Actor,
    },
    /// Delete a request with its history and folders
    Delete { id: u64 },
}

#[derive(clap::Args)]
pub struct Actor {
    /// Login recorded as the author of the action
    #[arg(long, default_value = CLI_USER)]
    user: String,
    /// Task position the operator acted upon; refused if the request moved on
    #[arg(long, value_name = "N")]
    step: Option<u32>,
}

pub fn run(root: &Path, subcmd: RequestSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        RequestSubcommand::List { status, connector } => {
            list(root, status.as_deref(), connector, json)
        }
        RequestSubcommand::Show { id } => show(root, id, json),
        RequestSubcommand::Validate { id, remark, actor } => act(
            root,
            id,
            OperatorAction::Validate {
                remark: remark.unwrap_or_default(),
            },
            actor,
            json,
        ),
        RequestSubcommand::Reject { id, remark, actor } => {
            act(root, id, OperatorAction::Reject { remark }, actor, json)
        }
        RequestSubcommand::Relaunch { id, actor } => {
            act(root, id, OperatorAction::Relaunch, actor, json)
        }
        RequestSubcommand::RestartTask { id, actor } => {
            act(root, id, OperatorAction::RestartTask, actor, json)
        }
        RequestSubcommand::SkipTask { id, actor } => {
            act(root, id, OperatorAction::SkipTask, actor, json)
        }
        RequestSubcommand::RetryExport { id, actor } => {
            act(root, id, OperatorAction::RetryExport, actor, json)
        }
        RequestSubcommand::RetryMatching { id, actor } => {
            act(root, id, OperatorAction::RetryMatching, actor, json)
        }
        RequestSubcommand::Delete { id } => delete(root, id, json),
    }
}

fn local(date: &DateTime<Utc>) -> String {
    date.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn list(
    root: &Path,
    status: Option<&str>,
    connector: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let status = status
        .map(|s| s.parse::<RequestStatus>())
        .transpose()
        .context("invalid --status")?;
    let requests: Vec<Request> = Request::list(root)
        .context("failed to list requests")?
        .into_iter()
        .filter(|r| status.map_or(true, |s| r.status == s))
        .filter(|r| connector.map_or(true, |c| r.connector_id == c))
        .collect();

    if json {
        return print_json(&requests);
    }

    if requests.is_empty() {
        println!("No requests.");
        return Ok(());
    }

    let rows = requests
        .iter()
        .map(|r| {
            vec![
                r.id.to_string(),
                r.status.to_string(),
                r.order_label.clone(),
                r.product_label.clone(),
                r.client.clone(),
                or_dash(r.process_id),
                or_dash(r.tasknum),
                local(&r.start_date),
            ]
        })
        .collect();
    print_table(
        &["ID", "STATUS", "ORDER", "PRODUCT", "CLIENT", "PROCESS", "TASK", "RECEIVED"],
        rows,
    );
    Ok(())
}

fn show(root: &Path, id: u64, json: bool) -> anyhow::Result<()> {
    let request = Request::load(root, id).with_context(|| format!("request {id} not found"))?;
    let history = open_history(root)?;
    let records = history
        .for_request(id)
        .context("failed to read request history")?;
    let process = request
        .process_id
        .map(|pid| Process::load(root, pid))
        .transpose()
        .context("failed to load the request's process")?;
    let config = Config::load(root).context("failed to load config")?;
    let data = config.data_root(root);
    let files = request
        .output_files(&data)
        .context("failed to list output files")?;
    let focus = request.focus_parameters(&config.validation_focus_properties);

    if json {
        return print_json(&serde_json::json!({
            "request": request,
            "focus_parameters": focus,
            "process": process.as_ref().map(|p| serde_json::json!({"id": p.id, "name": p.name})),
            "history": records,
            "output_files": files,
        }));
    }

    println!("Request {}: {} / {}", request.id, request.order_label, request.product_label);
    println!("  Status:    {}{}", request.status, if request.rejected { " (rejected)" } else { "" });
    println!("  Client:    {}", request.client);
    if !request.organism.is_empty() {
        println!("  Organism:  {}", request.organism);
    }
    if !request.tiers.is_empty() {
        println!("  Third party: {}", request.tiers);
    }
    println!("  Connector: {}", request.connector_id);
    match &process {
        Some(p) => {
            let task = request
                .current_task(&p.tasks)
                .map(|t| format!(", task {}: {}", t.position, t.label))
                .unwrap_or_default();
            println!("  Process:   {} ({}){task}", p.name, p.id);
        }
        None => println!("  Process:   -"),
    }
    println!("  Received:  {}", local(&request.start_date));
    if let Some(end) = &request.end_date {
        println!("  Ended:     {}", local(end));
    }
    if let Some(surface) = request.surface {
        println!("  Surface:   {surface:.0} m²");
    }
    if !request.remark.is_empty() {
        println!("  Remark:    {}", request.remark);
    }
    for (key, value) in &focus {
        println!("  * {key}: {value}");
    }
    if config.display_temp_folder {
        if let Some(dir) = request.output_dir(&data) {
            println!("  Folder:    {}", dir.display());
        }
    }

    if !files.is_empty() {
        println!("\nOutput files:");
        for f in &files {
            println!("  {}", f.display());
        }
    }

    if !records.is_empty() {
        println!();
        let rows = records
            .iter()
            .map(|h| {
                vec![
                    h.step.to_string(),
                    h.task_label.clone(),
                    h.status.to_string(),
                    h.user.clone(),
                    local(&h.start_date),
                    h.message.clone(),
                ]
            })
            .collect();
        print_table(&["STEP", "TASK", "STATUS", "USER", "STARTED", "MESSAGE"], rows);
    }
    Ok(())
}

fn act(
    root: &Path,
    id: u64,
    action: OperatorAction,
    actor: Actor,
    json: bool,
) -> anyhow::Result<()> {
    let history = open_history(root)?;
    let data_root = data_root(root)?;
    let request = perform_action(
        root,
        &history,
        &data_root,
        id,
        &action,
        &actor.user,
        actor.step,
    )
    .with_context(|| format!("failed to {} request {id}", action.as_str().replace('_', " ")))?;

    if json {
        print_json(&request)?;
    } else {
        println!("Request {id}: {} -> {}.", action.as_str(), request.status);
    }
    Ok(())
}

fn delete(root: &Path, id: u64, json: bool) -> anyhow::Result<()> {
    let history = open_history(root)?;
    Request::delete(root, &history, &data_root(root)?, id)
        .with_context(|| format!("failed to delete request {id}"))?;

    if json {
        print_json(&serde_json::json!({ "deleted": id }))?;
    } else {
        println!("Deleted request {id}.");
    }
    Ok(())
}
