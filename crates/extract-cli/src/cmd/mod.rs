pub mod config;
pub mod connector;
pub mod group;
pub mod init;
pub mod plugin;
pub mod process;
pub mod remark;
pub mod request;
pub mod rule;
pub mod run;
pub mod serve;
pub mod state;
pub mod task;
pub mod user;

use anyhow::Context;
use extract_core::{config::Config, history::HistoryDb, paths};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Open the history store. Fails while a server holds the instance.
pub(crate) fn open_history(root: &Path) -> anyhow::Result<HistoryDb> {
    HistoryDb::open(&paths::history_db_path(root))
        .context("failed to open history store (is `extract serve` running?)")
}

pub(crate) fn data_root(root: &Path) -> anyhow::Result<PathBuf> {
    let config = Config::load(root).context("failed to load config")?;
    Ok(config.data_root(root))
}

/// Parse `key=value` for repeatable `--param` flags.
pub(crate) fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub(crate) fn into_params(pairs: Vec<(String, String)>) -> BTreeMap<String, String> {
    pairs.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_splits_on_first_equals() {
        assert_eq!(
            parse_param("path=/srv/out=1").unwrap(),
            ("path".to_string(), "/srv/out=1".to_string())
        );
        assert_eq!(parse_param(" to =").unwrap(), ("to".to_string(), String::new()));
    }

    #[test]
    fn param_without_equals_is_refused() {
        assert!(parse_param("path").is_err());
        assert!(parse_param("=value").is_err());
    }
}
