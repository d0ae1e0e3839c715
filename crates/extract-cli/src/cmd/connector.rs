use super::{into_params, parse_param};
use crate::output::{or_dash, print_json, print_table};
use anyhow::{bail, Context};
use clap::Subcommand;
use extract_core::{
    connector::{Connector, ConnectorRegistry},
    jobs::{run_import, JobContext},
};
use std::path::Path;

#[derive(Subcommand)]
pub enum ConnectorSubcommand {
    /// Create a connector
    Create {
        /// Connector plugin code (see `extract plugin list --connectors`)
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        /// Plugin parameter (repeatable: --param inbox=/srv/in --param outbox=/srv/out)
        #[arg(long = "param", value_parser = parse_param, value_name = "KEY=VALUE")]
        params: Vec<(String, String)>,
        /// Seconds between two imports
        #[arg(long, value_name = "SECS")]
        frequency: Option<u64>,
        /// Consecutive import failures before administrators are alerted
        #[arg(long)]
        max_retries: Option<u32>,
        /// Create the connector inactive
        #[arg(long)]
        inactive: bool,
    },
    /// List connectors
    List,
    /// Show a connector with its rules
    Show { id: u64 },
    /// Update connector settings
    Update {
        id: u64,
        #[arg(long)]
        name: Option<String>,
        /// Plugin parameter to set (repeatable)
        #[arg(long = "param", value_parser = parse_param, value_name = "KEY=VALUE")]
        params: Vec<(String, String)>,
        #[arg(long, value_name = "SECS")]
        frequency: Option<u64>,
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Activate a connector
    Enable { id: u64 },
    /// Deactivate a connector; its imports stop
    Disable { id: u64 },
    /// Delete a connector without active requests
    Delete { id: u64 },
    /// Import the connector's pending orders now
    Import { id: u64 },
}

pub fn run(root: &Path, subcmd: ConnectorSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConnectorSubcommand::Create {
            code,
            name,
            params,
            frequency,
            max_retries,
            inactive,
        } => {
            let registry = ConnectorRegistry::with_builtins();
            let Some(plugin) = registry.get(&code) else {
                bail!("unknown connector plugin '{code}'");
            };
            let mut connector = Connector::new(plugin.code(), &name);
            connector.parameters = into_params(params);
            if let Some(freq) = frequency {
                connector.import_frequency_secs = check_frequency(freq)?;
            }
            if let Some(retries) = max_retries {
                connector.maximum_retries = retries;
            }
            connector.active = !inactive;
            let created = Connector::create(root, connector).context("failed to create connector")?;
            if json {
                print_json(&created)?;
            } else {
                println!("Created connector {} '{}' ({}).", created.id, created.name, created.code);
            }
            Ok(())
        }
        ConnectorSubcommand::List => list(root, json),
        ConnectorSubcommand::Show { id } => show(root, id, json),
        ConnectorSubcommand::Update {
            id,
            name,
            params,
            frequency,
            max_retries,
        } => update(root, id, json, |c| {
            if let Some(name) = name {
                if name.trim().is_empty() {
                    bail!("connector name cannot be empty");
                }
                c.name = name;
            }
            c.parameters.extend(params);
            if let Some(freq) = frequency {
                c.import_frequency_secs = check_frequency(freq)?;
            }
            if let Some(retries) = max_retries {
                c.maximum_retries = retries;
            }
            Ok(())
        }),
        ConnectorSubcommand::Enable { id } => update(root, id, json, |c| {
            c.active = true;
            Ok(())
        }),
        ConnectorSubcommand::Disable { id } => update(root, id, json, |c| {
            c.active = false;
            Ok(())
        }),
        ConnectorSubcommand::Delete { id } => {
            Connector::delete(root, id).with_context(|| format!("failed to delete connector {id}"))?;
            if json {
                print_json(&serde_json::json!({ "deleted": id }))?;
            } else {
                println!("Deleted connector {id}.");
            }
            Ok(())
        }
        ConnectorSubcommand::Import { id } => import(root, id, json),
    }
}

fn check_frequency(secs: u64) -> anyhow::Result<u64> {
    if secs == 0 {
        bail!("import frequency must be at least one second");
    }
    Ok(secs)
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let connectors = Connector::list(root).context("failed to list connectors")?;

    if json {
        return print_json(&connectors);
    }

    if connectors.is_empty() {
        println!("No connectors yet.");
        return Ok(());
    }

    let rows = connectors
        .iter()
        .map(|c| {
            let state = match (c.active, c.is_in_error()) {
                (false, _) => "inactive",
                (true, true) => "error",
                (true, false) => "active",
            };
            vec![
                c.id.to_string(),
                c.code.clone(),
                c.name.clone(),
                state.to_string(),
                format!("{}s", c.import_frequency_secs),
                c.rules.len().to_string(),
                or_dash(c.last_import_date.map(|d| d.format("%Y-%m-%d %H:%M"))),
            ]
        })
        .collect();
    print_table(
        &["ID", "CODE", "NAME", "STATE", "EVERY", "RULES", "LAST IMPORT"],
        rows,
    );
    Ok(())
}

fn show(root: &Path, id: u64, json: bool) -> anyhow::Result<()> {
    let connector =
        Connector::load(root, id).with_context(|| format!("connector {id} not found"))?;

    if json {
        return print_json(&connector);
    }

    println!("Connector {}: {} ({})", connector.id, connector.name, connector.code);
    println!("  Active:    {}", connector.active);
    println!("  Every:     {}s", connector.import_frequency_secs);
    println!(
        "  Errors:    {}/{}",
        connector.error_count, connector.maximum_retries
    );
    if !connector.last_import_message.is_empty() {
        println!("  Last import: {}", connector.last_import_message);
    }
    for (key, value) in &connector.parameters {
        println!("  {key} = {value}");
    }

    if !connector.rules.is_empty() {
        println!();
        super::rule::print_rules(&connector);
    }
    Ok(())
}

fn update(
    root: &Path,
    id: u64,
    json: bool,
    apply: impl FnOnce(&mut Connector) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let mut connector =
        Connector::load(root, id).with_context(|| format!("connector {id} not found"))?;
    apply(&mut connector)?;
    connector.save(root).context("failed to save connector")?;

    if json {
        print_json(&connector)?;
    } else {
        println!(
            "Connector {} '{}' updated ({}).",
            connector.id,
            connector.name,
            if connector.active { "active" } else { "inactive" }
        );
    }
    Ok(())
}

fn import(root: &Path, id: u64, json: bool) -> anyhow::Result<()> {
    let ctx = JobContext::open(root).context("failed to open instance")?;
    let outcome = run_import(&ctx, id).with_context(|| format!("import of connector {id} failed"))?;

    if json {
        return print_json(&outcome);
    }

    match &outcome.error {
        Some(e) => println!("Import of connector {id} failed: {e}"),
        None => println!(
            "Imported {} request(s) from connector {id} ({} without a valid perimeter).",
            outcome.imported, outcome.invalid
        ),
    }
    Ok(())
}
