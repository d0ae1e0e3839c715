use crate::output::{print_json, print_table};
use clap::Subcommand;
use extract_core::{connector::ConnectorRegistry, plugin::PluginRegistry};

#[derive(Subcommand)]
pub enum PluginSubcommand {
    /// List task plugins, or connector plugins with --connectors
    List {
        #[arg(long)]
        connectors: bool,
    },
    /// Show the parameters a plugin accepts
    Show {
        code: String,
        #[arg(long)]
        connector: bool,
    },
}

pub fn run(subcmd: PluginSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        PluginSubcommand::List { connectors: true } => {
            let list = ConnectorRegistry::with_builtins().list();
            if json {
                return print_json(&list);
            }
            let rows = list
                .iter()
                .map(|p| vec![p.code.clone(), p.label.clone(), p.description.clone()])
                .collect();
            print_table(&["CODE", "LABEL", "DESCRIPTION"], rows);
        }
        PluginSubcommand::List { connectors: false } => {
            let list = PluginRegistry::with_builtins().list();
            if json {
                return print_json(&list);
            }
            let rows = list
                .iter()
                .map(|p| vec![p.code.clone(), p.label.clone(), p.description.clone()])
                .collect();
            print_table(&["CODE", "LABEL", "DESCRIPTION"], rows);
        }
        PluginSubcommand::Show { code, connector } => {
            let found = if connector {
                ConnectorRegistry::with_builtins()
                    .get(&code)
                    .map(|p| (p.label(), p.help(), p.params()))
            } else {
                PluginRegistry::with_builtins()
                    .get(&code)
                    .map(|p| (p.label(), p.help(), p.params()))
            };
            let Some((label, help, params)) = found else {
                anyhow::bail!("unknown plugin '{code}'");
            };
            if json {
                return print_json(&serde_json::json!({
                    "code": code.to_uppercase(),
                    "label": label,
                    "help": help,
                    "params": params,
                }));
            }
            println!("{} ({})", label, code.to_uppercase());
            if !help.is_empty() {
                println!("{help}");
            }
            println!();
            let rows = params
                .iter()
                .map(|p| {
                    vec![
                        p.code.clone(),
                        p.label.clone(),
                        format!("{:?}", p.kind).to_lowercase(),
                        if p.required { "yes" } else { "no" }.to_string(),
                    ]
                })
                .collect();
            print_table(&["PARAM", "LABEL", "KIND", "REQUIRED"], rows);
        }
    }
    Ok(())
}
