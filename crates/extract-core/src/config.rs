use crate::error::{ExtractError, Result};
use crate::paths;
use crate::schedule::OrchestratorSettings;
use crate::types::SchedulerMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// EmailSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sender_name")]
    pub sender_name: String,
    #[serde(default)]
    pub sender_address: String,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_user: Option<String>,
    #[serde(default)]
    pub smtp_ssl: bool,
}

fn default_sender_name() -> String {
    "Extract".into()
}

fn default_smtp_port() -> u16 {
    25
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            sender_name: default_sender_name(),
            sender_address: String::new(),
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            smtp_user: None,
            smtp_ssl: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config (system parameters)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_instance")]
    pub instance: String,
    /// Root of the per-request data folders, relative to the instance root unless absolute.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    #[serde(default)]
    pub scheduler: OrchestratorSettings,
    /// Days between two reminders for a request left in standby. 0 disables reminders.
    #[serde(default = "default_reminder_days")]
    pub standby_reminder_days: u32,
    #[serde(default)]
    pub email: EmailSettings,
    /// Parameter keys highlighted on the detail of a request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_focus_properties: Vec<String>,
    /// Show the absolute data folders on the detail of a request.
    #[serde(default)]
    pub display_temp_folder: bool,
}

fn default_version() -> u32 {
    1
}

fn default_instance() -> String {
    "extract".into()
}

fn default_base_path() -> PathBuf {
    PathBuf::from("data")
}

fn default_reminder_days() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self::new(default_instance())
    }
}

impl Config {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            version: default_version(),
            instance: instance.into(),
            base_path: default_base_path(),
            scheduler: OrchestratorSettings::default(),
            standby_reminder_days: default_reminder_days(),
            email: EmailSettings::default(),
            validation_focus_properties: Vec::new(),
            display_temp_folder: false,
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(ExtractError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Absolute path of the data folders root.
    pub fn data_root(&self, root: &Path) -> PathBuf {
        paths::resolve_base_path(root, &self.base_path)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self, root: &Path) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let error = |message: String| ConfigWarning {
            level: WarnLevel::Error,
            message,
        };
        let warning = |message: String| ConfigWarning {
            level: WarnLevel::Warning,
            message,
        };

        if self.scheduler.frequency_secs == 0 {
            warnings.push(error("scheduler.frequency_secs must be at least 1".into()));
        }

        if self.scheduler.mode == SchedulerMode::Ranges && self.scheduler.ranges.is_empty() {
            warnings.push(error(
                "scheduler.mode is 'ranges' but no time range is defined".into(),
            ));
        }

        for (i, range) in self.scheduler.ranges.iter().enumerate() {
            if !range.check_validity() {
                warnings.push(error(format!("scheduler.ranges[{i}] is invalid: {range}")));
            }
        }

        if self.email.enabled && self.email.sender_address.trim().is_empty() {
            warnings.push(warning(
                "email is enabled but email.sender_address is empty".into(),
            ));
        }

        if self.standby_reminder_days > 365 {
            warnings.push(warning(format!(
                "standby_reminder_days={} (>365 is unusual)",
                self.standby_reminder_days
            )));
        }

        let data_root = self.data_root(root);
        if !data_root.is_dir() {
            warnings.push(warning(format!(
                "base_path '{}' is not a directory",
                data_root.display()
            )));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
