use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use extract_core::{
    connector::Connector,
    matching::{evaluate_rule, validate_rule},
    process::Process,
    request::Request,
};
use std::path::Path;

#[derive(Subcommand)]
pub enum RuleSubcommand {
    /// Append a routing rule to a connector
    Add {
        connector: u64,
        /// Process receiving the requests the rule matches
        #[arg(long)]
        process: u64,
        /// Rule expression, e.g. `productguid == "abc" and surface < 10000`
        #[arg(long = "expr")]
        expression: String,
        /// Create the rule inactive
        #[arg(long)]
        inactive: bool,
    },
    /// List the rules of a connector in evaluation order
    List { connector: u64 },
    /// Change a rule
    Update {
        connector: u64,
        rule: u64,
        #[arg(long = "expr")]
        expression: Option<String>,
        #[arg(long)]
        process: Option<u64>,
        #[arg(long)]
        active: Option<bool>,
        /// New position in evaluation order (1-based)
        #[arg(long)]
        position: Option<u32>,
    },
    /// Remove a rule
    Remove { connector: u64, rule: u64 },
    /// Evaluate an expression against an existing request
    Test {
        #[arg(long = "expr")]
        expression: String,
        #[arg(long)]
        request: u64,
    },
}

pub fn run(root: &Path, subcmd: RuleSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        RuleSubcommand::Add {
            connector,
            process,
            expression,
            inactive,
        } => add(root, connector, process, &expression, !inactive, json),
        RuleSubcommand::List { connector } => {
            let connector = load(root, connector)?;
            if json {
                return print_json(&connector.rules);
            }
            if connector.rules.is_empty() {
                println!("No rules yet.");
                return Ok(());
            }
            print_rules(&connector);
            Ok(())
        }
        RuleSubcommand::Update {
            connector,
            rule,
            expression,
            process,
            active,
            position,
        } => {
            let mut c = load(root, connector)?;
            if let Some(expr) = &expression {
                validate_rule(expr).context("invalid rule expression")?;
            }
            if let Some(pid) = process {
                Process::load(root, pid).with_context(|| format!("process {pid} not found"))?;
            }
            c.update_rule(rule, expression.as_deref(), process, active)?;
            if let Some(pos) = position {
                c.move_rule(rule, pos)?;
            }
            c.save(root).context("failed to save connector")?;
            let updated = c.rule(rule)?;
            if json {
                print_json(updated)?;
            } else {
                println!("Rule {rule} updated (position {}).", updated.position);
            }
            Ok(())
        }
        RuleSubcommand::Remove { connector, rule } => {
            let mut c = load(root, connector)?;
            c.remove_rule(rule)?;
            c.save(root).context("failed to save connector")?;
            if json {
                print_json(&serde_json::json!({ "deleted": rule }))?;
            } else {
                println!("Removed rule {rule} from connector {connector}.");
            }
            Ok(())
        }
        RuleSubcommand::Test {
            expression,
            request,
        } => {
            let r = Request::load(root, request)
                .with_context(|| format!("request {request} not found"))?;
            let matches = evaluate_rule(&expression, &r).context("invalid rule expression")?;
            if json {
                print_json(&serde_json::json!({
                    "request_id": request,
                    "expression": expression,
                    "matches": matches,
                }))?;
            } else if matches {
                println!("Request {request} matches.");
            } else {
                println!("Request {request} does not match.");
            }
            Ok(())
        }
    }
}

fn load(root: &Path, id: u64) -> anyhow::Result<Connector> {
    Connector::load(root, id).with_context(|| format!("connector {id} not found"))
}

fn add(
    root: &Path,
    connector: u64,
    process: u64,
    expression: &str,
    active: bool,
    json: bool,
) -> anyhow::Result<()> {
    validate_rule(expression).context("invalid rule expression")?;
    Process::load(root, process).with_context(|| format!("process {process} not found"))?;
    let mut c = load(root, connector)?;
    let id = c.add_rule(root, expression, process, active)?;
    c.save(root).context("failed to save connector")?;

    let rule = c.rule(id)?;
    if json {
        print_json(rule)?;
    } else {
        println!(
            "Added rule {id} to connector {connector} at position {} -> process {process}.",
            rule.position
        );
    }
    Ok(())
}

pub(crate) fn print_rules(connector: &Connector) {
    let mut rules: Vec<_> = connector.rules.iter().collect();
    rules.sort_by_key(|r| r.position);
    let rows = rules
        .iter()
        .map(|r| {
            vec![
                r.position.to_string(),
                r.id.to_string(),
                if r.active { "yes" } else { "no" }.to_string(),
                r.process_id.to_string(),
                r.expression.clone(),
            ]
        })
        .collect();
    print_table(&["POS", "ID", "ACTIVE", "PROCESS", "EXPRESSION"], rows);
}
