use crate::error::{ExtractError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const EXTRACT_DIR: &str = ".extract";
pub const CONNECTORS_DIR: &str = ".extract/connectors";
pub const PROCESSES_DIR: &str = ".extract/processes";
pub const REQUESTS_DIR: &str = ".extract/requests";
pub const OUTBOX_DIR: &str = ".extract/outbox";

pub const CONFIG_FILE: &str = ".extract/config.yaml";
pub const STATE_FILE: &str = ".extract/state.yaml";
pub const USERS_FILE: &str = ".extract/users.yaml";
pub const REMARKS_FILE: &str = ".extract/remarks.yaml";
pub const HISTORY_DB: &str = ".extract/history.db";

pub const INPUT_FOLDER: &str = "input";
pub const OUTPUT_FOLDER: &str = "output";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn extract_dir(root: &Path) -> PathBuf {
    root.join(EXTRACT_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn state_path(root: &Path) -> PathBuf {
    root.join(STATE_FILE)
}

pub fn users_path(root: &Path) -> PathBuf {
    root.join(USERS_FILE)
}

pub fn remarks_path(root: &Path) -> PathBuf {
    root.join(REMARKS_FILE)
}

pub fn history_db_path(root: &Path) -> PathBuf {
    root.join(HISTORY_DB)
}

pub fn outbox_dir(root: &Path) -> PathBuf {
    root.join(OUTBOX_DIR)
}

pub fn connectors_dir(root: &Path) -> PathBuf {
    root.join(CONNECTORS_DIR)
}

pub fn connector_manifest(root: &Path, id: u64) -> PathBuf {
    connectors_dir(root).join(format!("{id}.yaml"))
}

pub fn processes_dir(root: &Path) -> PathBuf {
    root.join(PROCESSES_DIR)
}

pub fn process_manifest(root: &Path, id: u64) -> PathBuf {
    processes_dir(root).join(format!("{id}.yaml"))
}

pub fn requests_dir(root: &Path) -> PathBuf {
    root.join(REQUESTS_DIR)
}

pub fn request_manifest(root: &Path, id: u64) -> PathBuf {
    requests_dir(root).join(format!("{id}.yaml"))
}

/// Resolve the data base path: absolute paths are kept, relative ones hang off `root`.
pub fn resolve_base_path(root: &Path, base_path: &Path) -> PathBuf {
    if base_path.is_absolute() {
        base_path.to_path_buf()
    } else {
        root.join(base_path)
    }
}

/// Parse the numeric id out of a `<id>.yaml` manifest file name.
pub fn manifest_id(path: &Path) -> Option<u64> {
    if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

// ---------------------------------------------------------------------------
// Login validation
// ---------------------------------------------------------------------------

static LOGIN_RE: OnceLock<Regex> = OnceLock::new();

fn login_re() -> &'static Regex {
    LOGIN_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*$").expect("login pattern is valid")
    })
}

pub fn validate_login(login: &str) -> Result<()> {
    if login.is_empty() || login.len() > 50 || !login_re().is_match(login) {
        return Err(ExtractError::InvalidLogin(login.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_pattern_compiles() {
        assert!(login_re().is_match("admin"));
    }

    #[test]
    fn valid_logins() {
        for login in ["admin", "j.doe", "op_1", "A-team"] {
            validate_login(login).unwrap_or_else(|_| panic!("expected valid: {login}"));
        }
    }

    #[test]
    fn invalid_logins() {
        let long = "x".repeat(51);
        for login in ["", ".hidden", "has space", "semi;colon", long.as_str()] {
            assert!(validate_login(login).is_err(), "expected invalid: {login}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/srv/extract");
        assert_eq!(
            config_path(root),
            PathBuf::from("/srv/extract/.extract/config.yaml")
        );
        assert_eq!(
            request_manifest(root, 42),
            PathBuf::from("/srv/extract/.extract/requests/42.yaml")
        );
        assert_eq!(
            connector_manifest(root, 3),
            PathBuf::from("/srv/extract/.extract/connectors/3.yaml")
        );
    }

    #[test]
    fn base_path_resolution() {
        let root = Path::new("/srv/extract");
        assert_eq!(
            resolve_base_path(root, Path::new("data")),
            PathBuf::from("/srv/extract/data")
        );
        assert_eq!(
            resolve_base_path(root, Path::new("/var/extract")),
            PathBuf::from("/var/extract")
        );
    }

    #[test]
    fn manifest_ids() {
        assert_eq!(manifest_id(Path::new("/x/17.yaml")), Some(17));
        assert_eq!(manifest_id(Path::new("/x/17.yml")), None);
        assert_eq!(manifest_id(Path::new("/x/notes.yaml")), None);
    }
}
