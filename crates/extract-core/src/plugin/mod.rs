//! Task plugins: the steps a process is made of.
//!
//! A plugin receives a snapshot of the request plus its own parameters and
//! returns a [`TaskResult`]. It never touches the store; the task runner
//! applies the result.

pub mod archive;
pub mod email;
pub mod fields;
pub mod python;
pub mod reject;
pub mod remark;
pub mod validation;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::EmailSettings;
use crate::notify::Mailer;
use crate::request::Request;

// ---------------------------------------------------------------------------
// Parameter descriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Text,
    Multitext,
    Email,
    Pass,
    Boolean,
    Numeric,
    /// Comma-separated ids of remark templates.
    Remarks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub code: String,
    pub label: String,
    pub kind: ParamKind,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

impl ParamSpec {
    pub fn new(code: &str, label: &str, kind: ParamKind, required: bool) -> Self {
        Self {
            code: code.to_string(),
            label: label.to_string(),
            kind,
            required,
            max_length: None,
        }
    }

    pub fn max_length(mut self, max: u32) -> Self {
        self.max_length = Some(max);
        self
    }
}

// ---------------------------------------------------------------------------
// Request snapshot and result
// ---------------------------------------------------------------------------

/// What a plugin sees of the request it processes.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub request: Request,
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Error,
    Standby,
    NotRun,
}

/// Request fields a plugin may change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestData {
    pub remark: String,
    pub rejected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub message: String,
    #[serde(default)]
    pub error_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<RequestData>,
}

impl TaskResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Success,
            message: message.into(),
            error_code: String::new(),
            request_data: None,
        }
    }

    pub fn error(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Error,
            message: message.into(),
            error_code: code.into(),
            request_data: None,
        }
    }

    pub fn standby(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Standby,
            message: message.into(),
            error_code: String::new(),
            request_data: None,
        }
    }

    pub fn not_run(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::NotRun,
            message: message.into(),
            error_code: String::new(),
            request_data: None,
        }
    }

    pub fn with_request_data(mut self, remark: impl Into<String>, rejected: bool) -> Self {
        self.request_data = Some(RequestData {
            remark: remark.into(),
            rejected,
        });
        self
    }
}

// ---------------------------------------------------------------------------
// TaskProcessor
// ---------------------------------------------------------------------------

pub trait TaskProcessor: Send + Sync {
    fn code(&self) -> &'static str;
    fn label(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn help(&self) -> &'static str;
    fn picto_class(&self) -> &'static str;
    fn params(&self) -> Vec<ParamSpec>;

    fn execute(
        &self,
        request: &TaskRequest,
        params: &BTreeMap<String, String>,
        email: &EmailSettings,
        mailer: &dyn Mailer,
    ) -> TaskResult;

    fn info(&self) -> PluginInfo {
        PluginInfo {
            code: self.code().to_string(),
            label: self.label().to_string(),
            description: self.description().to_string(),
            help: self.help().to_string(),
            picto_class: self.picto_class().to_string(),
            params: self.params(),
        }
    }
}

/// Serializable catalogue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub code: String,
    pub label: String,
    pub description: String,
    pub help: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub picto_class: String,
    pub params: Vec<ParamSpec>,
}

/// Read a boolean parameter the way form checkboxes submit them.
pub(crate) fn param_flag(params: &BTreeMap<String, String>, key: &str) -> bool {
    params
        .get(key)
        .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes"))
}

// ---------------------------------------------------------------------------
// PluginRegistry
// ---------------------------------------------------------------------------

/// Task plugins keyed by upper-case code.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Box<dyn TaskProcessor>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(remark::RemarkPlugin));
        registry.register(Box::new(reject::RejectPlugin));
        registry.register(Box::new(validation::ValidationPlugin));
        registry.register(Box::new(archive::ArchivePlugin));
        registry.register(Box::new(email::EmailPlugin));
        registry.register(Box::new(python::PythonPlugin::default()));
        registry
    }

    pub fn register(&mut self, plugin: Box<dyn TaskProcessor>) {
        self.plugins
            .insert(plugin.code().to_ascii_uppercase(), plugin);
    }

    pub fn get(&self, code: &str) -> Option<&dyn TaskProcessor> {
        self.plugins
            .get(&code.to_ascii_uppercase())
            .map(|p| p.as_ref())
    }

    pub fn list(&self) -> Vec<PluginInfo> {
        self.plugins.values().map(|p| p.info()).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
