use anyhow::Context;
use extract_core::{
    config::Config,
    history::HistoryDb,
    io, paths,
    remark::RemarkCatalog,
    state::State,
    types::Profile,
    user::{User, UserDirectory},
};
use std::path::Path;

pub fn run(root: &Path, admin: &str, email: &str, json: bool) -> anyhow::Result<()> {
    let instance = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "extract".to_string());

    if !json {
        println!("Initializing Extract in: {}", root.display());
    }

    let dirs = [
        paths::EXTRACT_DIR,
        paths::CONNECTORS_DIR,
        paths::PROCESSES_DIR,
        paths::REQUESTS_DIR,
        paths::OUTBOX_DIR,
    ];
    for dir in dirs {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let mut created = Vec::new();

    if !paths::config_path(root).exists() {
        Config::new(&instance)
            .save(root)
            .context("failed to write config.yaml")?;
        created.push("config.yaml");
    }

    if !paths::state_path(root).exists() {
        State::new(&instance)
            .save(root)
            .context("failed to write state.yaml")?;
        created.push("state.yaml");
    }

    if !paths::users_path(root).exists() {
        let mut directory = UserDirectory::default();
        directory
            .add(User::new(admin, "Administrator", email, Profile::Admin))
            .with_context(|| format!("failed to create administrator '{admin}'"))?;
        directory.save(root).context("failed to write users.yaml")?;
        created.push("users.yaml");
    }

    if !paths::remarks_path(root).exists() {
        RemarkCatalog::default()
            .save(root)
            .context("failed to write remarks.yaml")?;
        created.push("remarks.yaml");
    }

    HistoryDb::open(&paths::history_db_path(root)).context("failed to open history store")?;

    let config = Config::load(root).context("failed to load config")?;
    let data_root = config.data_root(root);
    io::ensure_dir(&data_root)
        .with_context(|| format!("failed to create {}", data_root.display()))?;

    if json {
        crate::output::print_json(&serde_json::json!({
            "root": root,
            "instance": config.instance,
            "created": created,
            "data_root": data_root,
        }))?;
    } else {
        for name in &created {
            println!("  created: .extract/{name}");
        }
        println!("  data:    {}", data_root.display());
        println!("\nExtract initialized. Next: `extract connector create` and `extract process create`.");
    }
    Ok(())
}
