use crate::output::{print_json, print_table};
use anyhow::{bail, Context};
use clap::Subcommand;
use extract_core::user::UserDirectory;
use std::path::Path;

#[derive(Subcommand)]
pub enum GroupSubcommand {
    /// Create a group of existing users
    Add {
        name: String,
        /// Member login (repeatable)
        #[arg(long = "member")]
        members: Vec<String>,
    },
    /// List groups
    List,
    /// Replace the members of a group
    Members {
        id: u64,
        /// Member login (repeatable)
        #[arg(long = "member")]
        members: Vec<String>,
    },
    /// Remove a group no process is assigned to
    Remove { id: u64 },
}

pub fn run(root: &Path, subcmd: GroupSubcommand, json: bool) -> anyhow::Result<()> {
    let mut directory = UserDirectory::load(root).context("failed to load users")?;

    match subcmd {
        GroupSubcommand::Add { name, members } => {
            if name.trim().is_empty() {
                bail!("group name cannot be empty");
            }
            let id = directory.add_group(root, name.trim(), members)?;
            directory.save(root).context("failed to save users")?;
            if json {
                print_json(directory.group(id)?)?;
            } else {
                println!("Created group {id} '{}'.", name.trim());
            }
        }
        GroupSubcommand::List => {
            if json {
                return print_json(&directory.groups);
            }
            if directory.groups.is_empty() {
                println!("No groups yet.");
                return Ok(());
            }
            let rows = directory
                .groups
                .iter()
                .map(|g| vec![g.id.to_string(), g.name.clone(), g.users.join(", ")])
                .collect();
            print_table(&["ID", "NAME", "MEMBERS"], rows);
        }
        GroupSubcommand::Members { id, members } => {
            directory.set_group_members(id, members)?;
            directory.save(root).context("failed to save users")?;
            if json {
                print_json(directory.group(id)?)?;
            } else {
                println!("Group {id} updated.");
            }
        }
        GroupSubcommand::Remove { id } => {
            let removed = directory.remove_unassigned_group(root, id)?;
            directory.save(root).context("failed to save users")?;
            if json {
                print_json(&serde_json::json!({ "deleted": removed.id }))?;
            } else {
                println!("Removed group {} '{}'.", removed.id, removed.name);
            }
        }
    }
    Ok(())
}
