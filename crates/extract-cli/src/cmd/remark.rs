use crate::output::{print_json, print_table};
use anyhow::{bail, Context};
use clap::{Subcommand, ValueEnum};
use extract_core::remark::{RemarkCatalog, RemarkKind};
use std::path::Path;

#[derive(Clone, Copy, ValueEnum)]
pub enum KindArg {
    Validation,
    Rejection,
}

impl From<KindArg> for RemarkKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Validation => RemarkKind::Validation,
            KindArg::Rejection => RemarkKind::Rejection,
        }
    }
}

#[derive(Subcommand)]
pub enum RemarkSubcommand {
    /// Add a message template offered to operators
    Add {
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long)]
        title: String,
        /// Message text
        #[arg(long)]
        content: String,
    },
    /// List message templates
    List,
    /// Remove a message template
    Remove { id: u64 },
}

pub fn run(root: &Path, subcmd: RemarkSubcommand, json: bool) -> anyhow::Result<()> {
    let mut catalog = RemarkCatalog::load(root).context("failed to load remarks")?;

    match subcmd {
        RemarkSubcommand::Add {
            kind,
            title,
            content,
        } => {
            if title.trim().is_empty() {
                bail!("remark title cannot be empty");
            }
            let id = catalog.add(root, kind.into(), title.trim(), &content)?;
            catalog.save(root).context("failed to save remarks")?;
            if json {
                print_json(&serde_json::json!({ "id": id, "title": title.trim() }))?;
            } else {
                println!("Added remark {id} '{}'.", title.trim());
            }
        }
        RemarkSubcommand::List => {
            if json {
                return print_json(&catalog.remarks);
            }
            if catalog.remarks.is_empty() {
                println!("No remarks yet.");
                return Ok(());
            }
            let rows = catalog
                .remarks
                .iter()
                .map(|r| {
                    let kind = match r.kind {
                        RemarkKind::Validation => "validation",
                        RemarkKind::Rejection => "rejection",
                    };
                    vec![r.id.to_string(), kind.to_string(), r.title.clone()]
                })
                .collect();
            print_table(&["ID", "KIND", "TITLE"], rows);
        }
        RemarkSubcommand::Remove { id } => {
            catalog.remove(id)?;
            catalog.save(root).context("failed to save remarks")?;
            if json {
                print_json(&serde_json::json!({ "deleted": id }))?;
            } else {
                println!("Removed remark {id}.");
            }
        }
    }
    Ok(())
}
