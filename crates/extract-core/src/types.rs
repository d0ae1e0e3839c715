use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ExtractError;

/// Lowercase and drop separators so `TOEXPORT`, `to_export` and `ToExport` compare equal.
fn normalize(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(|c| c.to_lowercase())
        .collect()
}

// ---------------------------------------------------------------------------
// RequestStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    ImportFail,
    Imported,
    Ongoing,
    Unmatched,
    Error,
    Standby,
    ToExport,
    ExportFail,
    Finished,
}

impl RequestStatus {
    pub fn all() -> &'static [RequestStatus] {
        &[
            RequestStatus::ImportFail,
            RequestStatus::Imported,
            RequestStatus::Ongoing,
            RequestStatus::Unmatched,
            RequestStatus::Error,
            RequestStatus::Standby,
            RequestStatus::ToExport,
            RequestStatus::ExportFail,
            RequestStatus::Finished,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::ImportFail => "import_fail",
            RequestStatus::Imported => "imported",
            RequestStatus::Ongoing => "ongoing",
            RequestStatus::Unmatched => "unmatched",
            RequestStatus::Error => "error",
            RequestStatus::Standby => "standby",
            RequestStatus::ToExport => "to_export",
            RequestStatus::ExportFail => "export_fail",
            RequestStatus::Finished => "finished",
        }
    }

    /// Statuses that wait for an operator decision.
    pub fn needs_attention(self) -> bool {
        matches!(
            self,
            RequestStatus::ImportFail
                | RequestStatus::Unmatched
                | RequestStatus::Error
                | RequestStatus::Standby
                | RequestStatus::ExportFail
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize(s);
        RequestStatus::all()
            .iter()
            .copied()
            .find(|st| normalize(st.as_str()) == key)
            .ok_or_else(|| ExtractError::InvalidStatus(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// HistoryStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Ongoing,
    Standby,
    Error,
    Finished,
    Skipped,
}

impl HistoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryStatus::Ongoing => "ongoing",
            HistoryStatus::Standby => "standby",
            HistoryStatus::Error => "error",
            HistoryStatus::Finished => "finished",
            HistoryStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Admin,
    Operator,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Admin => "admin",
            Profile::Operator => "operator",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Profile {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "admin" => Ok(Profile::Admin),
            "operator" => Ok(Profile::Operator),
            _ => Err(ExtractError::InvalidProfile(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// SchedulerMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerMode {
    On,
    Ranges,
    Off,
}

impl SchedulerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerMode::On => "on",
            SchedulerMode::Ranges => "ranges",
            SchedulerMode::Off => "off",
        }
    }
}

impl fmt::Display for SchedulerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SchedulerMode {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "on" => Ok(SchedulerMode::On),
            "ranges" => Ok(SchedulerMode::Ranges),
            "off" => Ok(SchedulerMode::Off),
            _ => Err(ExtractError::InvalidMode(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkingState
// ---------------------------------------------------------------------------

/// What the orchestrator is doing right now, derived from its settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkingState {
    Running,
    ScheduledStop,
    Stopped,
    ScheduleConfigError,
}

impl WorkingState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkingState::Running => "running",
            WorkingState::ScheduledStop => "scheduled_stop",
            WorkingState::Stopped => "stopped",
            WorkingState::ScheduleConfigError => "schedule_config_error",
        }
    }
}

impl fmt::Display for WorkingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
