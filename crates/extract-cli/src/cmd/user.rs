use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use extract_core::{
    types::Profile,
    user::{User, UserDirectory},
};
use std::path::Path;

#[derive(Subcommand)]
pub enum UserSubcommand {
    /// Add a user
    Add {
        login: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        email: String,
        /// admin or operator
        #[arg(long, default_value = "operator")]
        profile: String,
    },
    /// List users
    List,
    /// Change a user
    Update {
        login: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        profile: Option<String>,
        #[arg(long)]
        active: Option<bool>,
        /// Receive notification e-mails
        #[arg(long)]
        mail: Option<bool>,
    },
    /// Remove a user no process lists as operator
    Remove { login: String },
}

pub fn run(root: &Path, subcmd: UserSubcommand, json: bool) -> anyhow::Result<()> {
    let mut directory = UserDirectory::load(root).context("failed to load users")?;

    match subcmd {
        UserSubcommand::Add {
            login,
            name,
            email,
            profile,
        } => {
            let profile: Profile = profile.parse()?;
            let user = User::new(&login, &name, &email, profile);
            directory.add(user.clone())?;
            directory.save(root).context("failed to save users")?;
            if json {
                print_json(&user)?;
            } else {
                println!("Added {} '{}'.", user.profile, user.login);
            }
        }
        UserSubcommand::List => {
            if json {
                return print_json(&directory.users);
            }
            if directory.users.is_empty() {
                println!("No users yet.");
                return Ok(());
            }
            let rows = directory
                .users
                .iter()
                .map(|u| {
                    vec![
                        u.login.clone(),
                        u.name.clone(),
                        u.email.clone(),
                        u.profile.to_string(),
                        if u.active { "yes" } else { "no" }.to_string(),
                    ]
                })
                .collect();
            print_table(&["LOGIN", "NAME", "EMAIL", "PROFILE", "ACTIVE"], rows);
        }
        UserSubcommand::Update {
            login,
            name,
            email,
            profile,
            active,
            mail,
        } => {
            let mut user = directory.get(&login)?.clone();
            if let Some(name) = name {
                user.name = name;
            }
            if let Some(email) = email {
                user.email = email;
            }
            if let Some(profile) = profile {
                user.profile = profile.parse()?;
            }
            if let Some(active) = active {
                user.active = active;
            }
            if let Some(mail) = mail {
                user.mail_active = mail;
            }
            directory.update(user.clone())?;
            directory.ensure_admin()?;
            directory.save(root).context("failed to save users")?;
            if json {
                print_json(&user)?;
            } else {
                println!("User '{}' updated.", user.login);
            }
        }
        UserSubcommand::Remove { login } => {
            let removed = directory.remove_unassigned(root, &login)?;
            directory.save(root).context("failed to save users")?;
            if json {
                print_json(&serde_json::json!({ "deleted": removed.login }))?;
            } else {
                println!("Removed user '{}'.", removed.login);
            }
        }
    }
    Ok(())
}
