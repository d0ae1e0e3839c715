use crate::output::{print_json, print_table};
use anyhow::{bail, Context};
use clap::Subcommand;
use extract_core::{process::Process, user::UserDirectory};
use std::path::Path;

#[derive(Subcommand)]
pub enum ProcessSubcommand {
    /// Create an empty process
    Create {
        name: String,
        /// Operator login (repeatable)
        #[arg(long = "operator")]
        operators: Vec<String>,
        /// Operator group id (repeatable)
        #[arg(long = "group")]
        groups: Vec<u64>,
    },
    /// List processes
    List,
    /// Show a process with its tasks and operators
    Show { id: u64 },
    /// Rename a process or replace its operators
    Update {
        id: u64,
        #[arg(long)]
        name: Option<String>,
        /// Operator login; replaces the current operators (repeatable)
        #[arg(long = "operator")]
        operators: Vec<String>,
        /// Operator group id; replaces the current groups (repeatable)
        #[arg(long = "group")]
        groups: Vec<u64>,
    },
    /// Delete a process no request or rule uses
    Delete { id: u64 },
    /// Duplicate a process with its tasks
    Copy { id: u64 },
}

pub fn run(root: &Path, subcmd: ProcessSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ProcessSubcommand::Create {
            name,
            operators,
            groups,
        } => {
            let mut process = Process::create(root, &name).context("failed to create process")?;
            if !operators.is_empty() || !groups.is_empty() {
                assign(root, &mut process, operators, groups)?;
                process.save(root).context("failed to save process")?;
            }
            if json {
                print_json(&process)?;
            } else {
                println!("Created process {} '{}'.", process.id, process.name);
            }
            Ok(())
        }
        ProcessSubcommand::List => list(root, json),
        ProcessSubcommand::Show { id } => show(root, id, json),
        ProcessSubcommand::Update {
            id,
            name,
            operators,
            groups,
        } => {
            let mut process = load(root, id)?;
            if let Some(name) = name {
                if name.trim().is_empty() {
                    bail!("process name cannot be empty");
                }
                process.name = name.trim().to_string();
            }
            if !operators.is_empty() || !groups.is_empty() {
                assign(root, &mut process, operators, groups)?;
            }
            process.save(root).context("failed to save process")?;
            if json {
                print_json(&process)?;
            } else {
                println!("Process {} '{}' updated.", process.id, process.name);
            }
            Ok(())
        }
        ProcessSubcommand::Delete { id } => {
            Process::delete(root, id).with_context(|| format!("failed to delete process {id}"))?;
            if json {
                print_json(&serde_json::json!({ "deleted": id }))?;
            } else {
                println!("Deleted process {id}.");
            }
            Ok(())
        }
        ProcessSubcommand::Copy { id } => {
            let copy = load(root, id)?
                .create_copy(root)
                .with_context(|| format!("failed to copy process {id}"))?;
            if json {
                print_json(&copy)?;
            } else {
                println!("Created process {} '{}'.", copy.id, copy.name);
            }
            Ok(())
        }
    }
}

pub(crate) fn load(root: &Path, id: u64) -> anyhow::Result<Process> {
    Process::load(root, id).with_context(|| format!("process {id} not found"))
}

fn assign(
    root: &Path,
    process: &mut Process,
    operators: Vec<String>,
    groups: Vec<u64>,
) -> anyhow::Result<()> {
    let directory = UserDirectory::load(root).context("failed to load users")?;
    for login in &operators {
        directory.get(login)?;
    }
    for gid in &groups {
        directory.group(*gid)?;
    }
    process.operators = operators;
    process.groups = groups;
    Ok(())
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let processes = Process::list(root).context("failed to list processes")?;

    if json {
        return print_json(&processes);
    }

    if processes.is_empty() {
        println!("No processes yet.");
        return Ok(());
    }

    let rows = processes
        .iter()
        .map(|p| {
            vec![
                p.id.to_string(),
                p.name.clone(),
                p.tasks.len().to_string(),
                p.operators.join(", "),
            ]
        })
        .collect();
    print_table(&["ID", "NAME", "TASKS", "OPERATORS"], rows);
    Ok(())
}

fn show(root: &Path, id: u64, json: bool) -> anyhow::Result<()> {
    let process = load(root, id)?;
    let directory = UserDirectory::load(root).context("failed to load users")?;
    let operators: Vec<String> = process
        .distinct_operators(&directory)
        .iter()
        .map(|u| u.login.clone())
        .collect();

    if json {
        return print_json(&serde_json::json!({
            "process": process,
            "resolved_operators": operators,
            "can_be_edited": process.can_be_edited(root)?,
            "can_be_deleted": process.can_be_deleted(root)?,
        }));
    }

    println!("Process {}: {}", process.id, process.name);
    if operators.is_empty() {
        println!("  Operators: -");
    } else {
        println!("  Operators: {}", operators.join(", "));
    }
    if !process.can_be_edited(root)? {
        println!("  Locked: requests are being processed");
    }

    if process.tasks.is_empty() {
        println!("\nNo tasks yet.");
        return Ok(());
    }

    println!();
    let rows = process
        .tasks
        .iter()
        .map(|t| {
            let params = t
                .parameters
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" ");
            vec![
                t.position.to_string(),
                t.id.to_string(),
                t.code.clone(),
                t.label.clone(),
                params,
            ]
        })
        .collect();
    print_table(&["POS", "ID", "PLUGIN", "LABEL", "PARAMETERS"], rows);
    Ok(())
}
