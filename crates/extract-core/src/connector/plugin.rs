//! Connector plugins: where products come from and where results go back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::plugin::ParamSpec;
use crate::request::Request;

/// One ordered product as delivered by an import source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default)]
    pub order_label: String,
    #[serde(default)]
    pub order_guid: String,
    #[serde(default)]
    pub product_guid: String,
    #[serde(default)]
    pub product_label: String,
    #[serde(default)]
    pub organism: String,
    #[serde(default)]
    pub organism_guid: String,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub client_guid: String,
    #[serde(default)]
    pub client_details: String,
    #[serde(default)]
    pub tiers: String,
    #[serde(default)]
    pub tiers_guid: String,
    #[serde(default)]
    pub tiers_details: String,
    #[serde(default)]
    pub perimeter: Option<String>,
    #[serde(default)]
    pub surface: Option<f64>,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub external_url: Option<String>,
}

/// What a connector needs to report a processed request back to its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub request_id: u64,
    pub order_label: String,
    pub order_guid: String,
    pub product_label: String,
    pub product_guid: String,
    pub remark: String,
    pub rejected: bool,
    pub output_dir: Option<PathBuf>,
    pub external_url: Option<String>,
    pub parameters: serde_json::Value,
}

impl ExportRequest {
    pub fn from_request(request: &Request, data_root: &Path) -> Self {
        Self {
            request_id: request.id,
            order_label: request.order_label.clone(),
            order_guid: request.order_guid.clone(),
            product_label: request.product_label.clone(),
            product_guid: request.product_guid.clone(),
            remark: request.remark.clone(),
            rejected: request.rejected,
            output_dir: request.output_dir(data_root),
            external_url: request.external_url.clone(),
            parameters: request.parameters.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub details: String,
}

impl ExportResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: details.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectorPlugin
// ---------------------------------------------------------------------------

pub trait ConnectorPlugin: Send + Sync {
    fn code(&self) -> &'static str;
    fn label(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn help(&self) -> &'static str;
    fn params(&self) -> Vec<ParamSpec>;

    /// Fetch the products waiting at the source. The error is shown to administrators.
    fn import_commands(
        &self,
        params: &BTreeMap<String, String>,
    ) -> std::result::Result<Vec<Product>, String>;

    fn export_result(&self, params: &BTreeMap<String, String>, request: &ExportRequest)
        -> ExportResult;

    fn info(&self) -> ConnectorPluginInfo {
        ConnectorPluginInfo {
            code: self.code().to_string(),
            label: self.label().to_string(),
            description: self.description().to_string(),
            help: self.help().to_string(),
            params: self.params(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorPluginInfo {
    pub code: String,
    pub label: String,
    pub description: String,
    pub help: String,
    pub params: Vec<ParamSpec>,
}

// ---------------------------------------------------------------------------
// ConnectorRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ConnectorRegistry {
    plugins: BTreeMap<String, Box<dyn ConnectorPlugin>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(super::folder::FolderConnector));
        registry
    }

    pub fn register(&mut self, plugin: Box<dyn ConnectorPlugin>) {
        self.plugins
            .insert(plugin.code().to_ascii_uppercase(), plugin);
    }

    pub fn get(&self, code: &str) -> Option<&dyn ConnectorPlugin> {
        self.plugins
            .get(&code.to_ascii_uppercase())
            .map(|p| p.as_ref())
    }

    pub fn list(&self) -> Vec<ConnectorPluginInfo> {
        self.plugins.values().map(|p| p.info()).collect()
    }
}
