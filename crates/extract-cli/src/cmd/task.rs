use super::{into_params, parse_param, process::load};
use crate::output::print_json;
use anyhow::{bail, Context};
use clap::Subcommand;
use extract_core::plugin::PluginRegistry;
use std::path::Path;

#[derive(Subcommand)]
pub enum TaskSubcommand {
    /// Append a task to a process
    Add {
        process: u64,
        /// Task plugin code (see `extract plugin list`)
        #[arg(long)]
        code: String,
        /// Label shown to operators; defaults to the plugin label
        #[arg(long)]
        label: Option<String>,
        /// Plugin parameter (repeatable: --param path=/srv/archive/{ORDERLABEL})
        #[arg(long = "param", value_parser = parse_param, value_name = "KEY=VALUE")]
        params: Vec<(String, String)>,
    },
    /// Change the label or parameters of a task
    Update {
        process: u64,
        task: u64,
        #[arg(long)]
        label: Option<String>,
        /// Plugin parameter to set (repeatable)
        #[arg(long = "param", value_parser = parse_param, value_name = "KEY=VALUE")]
        params: Vec<(String, String)>,
    },
    /// Remove a task
    Remove { process: u64, task: u64 },
    /// Move a task to a new position (1-based)
    Move {
        process: u64,
        task: u64,
        position: u32,
    },
}

pub fn run(root: &Path, subcmd: TaskSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        TaskSubcommand::Add {
            process,
            code,
            label,
            params,
        } => {
            let registry = PluginRegistry::with_builtins();
            let Some(plugin) = registry.get(&code) else {
                bail!("unknown task plugin '{code}'");
            };
            let label = label.unwrap_or_else(|| plugin.label().to_string());
            let mut p = load(root, process)?;
            p.ensure_editable(root)?;
            let id = p.add_task(root, plugin.code(), &label, into_params(params))?;
            p.save(root).context("failed to save process")?;
            let task = p.task(id)?;
            if json {
                print_json(task)?;
            } else {
                println!(
                    "Added task {id} '{}' to process {process} at position {}.",
                    task.label, task.position
                );
            }
            Ok(())
        }
        TaskSubcommand::Update {
            process,
            task,
            label,
            params,
        } => {
            let mut p = load(root, process)?;
            p.ensure_editable(root)?;
            let t = p.task_mut(task)?;
            if let Some(label) = label {
                t.label = label;
            }
            if !params.is_empty() {
                let mut values = t.parameters.clone();
                values.extend(params);
                t.update_parameters(values);
            }
            p.save(root).context("failed to save process")?;
            if json {
                print_json(p.task(task)?)?;
            } else {
                println!("Task {task} updated.");
            }
            Ok(())
        }
        TaskSubcommand::Remove { process, task } => {
            let mut p = load(root, process)?;
            p.ensure_editable(root)?;
            let removed = p.remove_task(task)?;
            p.save(root).context("failed to save process")?;
            if json {
                print_json(&serde_json::json!({ "deleted": removed.id }))?;
            } else {
                println!("Removed task {} '{}' from process {process}.", removed.id, removed.label);
            }
            Ok(())
        }
        TaskSubcommand::Move {
            process,
            task,
            position,
        } => {
            let mut p = load(root, process)?;
            p.ensure_editable(root)?;
            p.move_task(task, position)?;
            p.save(root).context("failed to save process")?;
            let moved = p.task(task)?;
            if json {
                print_json(moved)?;
            } else {
                println!("Task {task} is now at position {}.", moved.position);
            }
            Ok(())
        }
    }
}
