use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("not initialized: run 'extract init'")]
    NotInitialized,

    #[error("request not found: {0}")]
    RequestNotFound(u64),

    #[error("connector not found: {0}")]
    ConnectorNotFound(u64),

    #[error("process not found: {0}")]
    ProcessNotFound(u64),

    #[error("task not found: {0}")]
    TaskNotFound(u64),

    #[error("rule not found: {0}")]
    RuleNotFound(u64),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("user group not found: {0}")]
    GroupNotFound(u64),

    #[error("remark not found: {0}")]
    RemarkNotFound(u64),

    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("user already exists: {0}")]
    UserExists(String),

    #[error("process in use: {0}")]
    ProcessInUse(String),

    #[error("connector in use: {0}")]
    ConnectorInUse(String),

    #[error("request {0} is currently being processed")]
    RequestBusy(u64),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid request status: {0}")]
    InvalidStatus(String),

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("invalid scheduler mode: {0}")]
    InvalidMode(String),

    #[error("invalid login '{0}': must be alphanumeric with dots, dashes or underscores")]
    InvalidLogin(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("history store error: {0}")]
    HistoryDb(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExtractError>;
