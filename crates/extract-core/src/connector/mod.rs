//! Connectors (import sources) and the rules that route their requests.

pub mod folder;
pub mod plugin;

use crate::error::{ExtractError, Result};
use crate::paths;
use crate::request::Request;
use crate::state::{IdKind, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub use plugin::{ConnectorPlugin, ConnectorRegistry, ExportRequest, ExportResult, Product};

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: u64,
    pub expression: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub position: u32,
    pub process_id: u64,
}

impl Rule {
    pub fn is_usable(&self) -> bool {
        self.active && !self.expression.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub id: u64,
    /// Code of the connector plugin.
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default = "default_import_frequency")]
    pub import_frequency_secs: u64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_import_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_import_message: String,
    #[serde(default = "default_max_retries")]
    pub maximum_retries: u32,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn default_true() -> bool {
    true
}

fn default_import_frequency() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

impl Connector {
    pub fn new(code: &str, name: &str) -> Self {
        Self {
            id: 0,
            code: code.to_string(),
            name: name.to_string(),
            parameters: BTreeMap::new(),
            import_frequency_secs: default_import_frequency(),
            active: true,
            last_import_date: None,
            last_import_message: String::new(),
            maximum_retries: default_max_retries(),
            error_count: 0,
            rules: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Store
    // -----------------------------------------------------------------------

    pub fn create(root: &Path, mut connector: Connector) -> Result<Connector> {
        if connector.name.trim().is_empty() {
            return Err(ExtractError::InvalidParameter(
                "connector name cannot be empty".into(),
            ));
        }
        if connector.import_frequency_secs == 0 {
            return Err(ExtractError::InvalidParameter(
                "import frequency must be at least 1 second".into(),
            ));
        }
        connector.id = State::next_id(root, IdKind::Connector)?;
        connector.save(root)?;
        Ok(connector)
    }

    pub fn load(root: &Path, id: u64) -> Result<Self> {
        let path = paths::connector_manifest(root, id);
        if !path.exists() {
            return Err(ExtractError::ConnectorNotFound(id));
        }
        let data = std::fs::read_to_string(&path)?;
        let connector: Connector = serde_yaml::from_str(&data)?;
        Ok(connector)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::connector_manifest(root, self.id);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn list(root: &Path) -> Result<Vec<Connector>> {
        let dir = paths::connectors_dir(root);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut connectors = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(id) = paths::manifest_id(&entry.path()) {
                connectors.push(Self::load(root, id)?);
            }
        }
        connectors.sort_by_key(|c| c.id);
        Ok(connectors)
    }

    pub fn delete(root: &Path, id: u64) -> Result<()> {
        let connector = Self::load(root, id)?;
        let active = Request::list(root)?
            .iter()
            .filter(|r| r.connector_id == id && r.is_active())
            .count();
        if active > 0 {
            return Err(ExtractError::ConnectorInUse(format!(
                "'{}' still has {active} active request(s)",
                connector.name
            )));
        }
        std::fs::remove_file(paths::connector_manifest(root, id))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Import bookkeeping
    // -----------------------------------------------------------------------

    pub fn is_in_error(&self) -> bool {
        !self.last_import_message.is_empty()
    }

    /// Count a failed import. Returns true when the administrators must be told:
    /// the retries are exhausted and the failure is new or its message changed.
    pub fn record_import_failure(&mut self, message: &str) -> bool {
        self.last_import_date = Some(Utc::now());
        let count = self.error_count + 1;
        if count <= self.maximum_retries {
            self.error_count = count;
            return false;
        }
        if !self.is_in_error() || self.last_import_message != message {
            self.last_import_message = message.to_string();
            return true;
        }
        false
    }

    pub fn record_import_success(&mut self) {
        self.last_import_date = Some(Utc::now());
        self.error_count = 0;
        self.last_import_message.clear();
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    pub fn rule(&self, rule_id: u64) -> Result<&Rule> {
        self.rules
            .iter()
            .find(|r| r.id == rule_id)
            .ok_or(ExtractError::RuleNotFound(rule_id))
    }

    /// Append a rule after the existing ones. Returns its id.
    pub fn add_rule(
        &mut self,
        root: &Path,
        expression: &str,
        process_id: u64,
        active: bool,
    ) -> Result<u64> {
        let id = State::next_id(root, IdKind::Rule)?;
        let position = self.rules.iter().map(|r| r.position).max().unwrap_or(0) + 1;
        self.rules.push(Rule {
            id,
            expression: expression.to_string(),
            active,
            position,
            process_id,
        });
        Ok(id)
    }

    pub fn update_rule(
        &mut self,
        rule_id: u64,
        expression: Option<&str>,
        process_id: Option<u64>,
        active: Option<bool>,
    ) -> Result<()> {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or(ExtractError::RuleNotFound(rule_id))?;
        if let Some(expr) = expression {
            rule.expression = expr.to_string();
        }
        if let Some(pid) = process_id {
            rule.process_id = pid;
        }
        if let Some(a) = active {
            rule.active = a;
        }
        Ok(())
    }

    pub fn remove_rule(&mut self, rule_id: u64) -> Result<Rule> {
        self.rules.sort_by_key(|r| r.position);
        let idx = self
            .rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or(ExtractError::RuleNotFound(rule_id))?;
        let removed = self.rules.remove(idx);
        self.renumber_rules();
        Ok(removed)
    }

    /// Move a rule to `position` (1-based, clamped).
    pub fn move_rule(&mut self, rule_id: u64, position: u32) -> Result<()> {
        self.rules.sort_by_key(|r| r.position);
        let idx = self
            .rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or(ExtractError::RuleNotFound(rule_id))?;
        let rule = self.rules.remove(idx);
        let target = (position.max(1) as usize - 1).min(self.rules.len());
        self.rules.insert(target, rule);
        self.renumber_rules();
        Ok(())
    }

    fn renumber_rules(&mut self) {
        for (i, rule) in self.rules.iter_mut().enumerate() {
            rule.position = i as u32 + 1;
        }
    }

    /// Active, non-empty rules in evaluation order.
    pub fn active_rules(&self) -> Vec<&Rule> {
        let mut rules: Vec<&Rule> = self.rules.iter().filter(|r| r.is_usable()).collect();
        rules.sort_by_key(|r| r.position);
        rules
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
