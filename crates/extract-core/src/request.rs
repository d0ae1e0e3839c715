//! Requests: one imported product moving through matching, processing and export.
//!
//! The status machine:
//!
//! ```text
//! import ──► Imported ──match──► Ongoing ──tasks──► ToExport ──► Finished
//!    │           │                 │  ▲                 │
//!    ▼           ▼                 ▼  │                 ▼
//! ImportFail  Unmatched        Error / Standby      ExportFail
//! ```
//!
//! Operator actions move requests out of the waiting states; every one of
//! them is guarded by the current status and, when the caller supplies it,
//! the task cursor the operator was looking at.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connector::plugin::Product;
use crate::error::{ExtractError, Result};
use crate::history::{HistoryDb, HistoryRecord, MAX_MESSAGE_LENGTH};
use crate::paths;
use crate::process::{Process, Task};
use crate::state::{IdKind, State};
use crate::types::{HistoryStatus, RequestStatus};

pub const MAX_REMARK_LENGTH: usize = MAX_MESSAGE_LENGTH;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub connector_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u64>,

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

    /// Ordered area as WKT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perimeter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface: Option<f64>,
    #[serde(default = "empty_object")]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub remark: String,

    /// Relative to the data base path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_in: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_out: Option<String>,

    pub start_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,

    /// 1-based cursor into the process tasks. Past the last task once processing is over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasknum: Option<u32>,
    pub status: RequestStatus,
    #[serde(default)]
    pub rejected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reminder: Option<DateTime<Utc>>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl Request {
    /// Build a request from an imported product. The id is assigned by [`Request::create`].
    pub fn from_product(connector_id: u64, product: &Product) -> Self {
        let perimeter = product
            .perimeter
            .as_ref()
            .filter(|p| !p.trim().is_empty())
            .cloned();
        let status = if perimeter.is_some() {
            RequestStatus::Imported
        } else {
            RequestStatus::ImportFail
        };
        let parameters = match &product.parameters {
            serde_json::Value::Null => empty_object(),
            other => other.clone(),
        };
        Self {
            id: 0,
            connector_id,
            process_id: None,
            order_label: product.order_label.clone(),
            order_guid: product.order_guid.clone(),
            product_guid: product.product_guid.clone(),
            product_label: product.product_label.clone(),
            organism: product.organism.clone(),
            organism_guid: product.organism_guid.clone(),
            client: product.client.clone(),
            client_guid: product.client_guid.clone(),
            client_details: product.client_details.clone(),
            tiers: product.tiers.clone(),
            tiers_guid: product.tiers_guid.clone(),
            tiers_details: product.tiers_details.clone(),
            perimeter,
            surface: product.surface,
            parameters,
            remark: String::new(),
            folder_in: None,
            folder_out: None,
            start_date: Utc::now(),
            end_date: None,
            tasknum: None,
            status,
            rejected: false,
            external_url: product.external_url.clone(),
            last_reminder: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status != RequestStatus::Finished
    }

    pub fn is_ongoing(&self) -> bool {
        self.status == RequestStatus::Ongoing
    }

    /// Task the cursor points at, if any.
    pub fn current_task<'a>(&self, tasks: &'a [Task]) -> Option<&'a Task> {
        let num = self.tasknum?;
        tasks.iter().find(|t| t.position == num)
    }

    pub fn set_remark(&mut self, remark: &str) -> Result<()> {
        if remark.chars().count() > MAX_REMARK_LENGTH {
            return Err(ExtractError::InvalidParameter(format!(
                "remark exceeds {MAX_REMARK_LENGTH} characters"
            )));
        }
        self.remark = remark.to_string();
        Ok(())
    }

    /// Mark the request as rejected and send it straight to export.
    pub fn reject(&mut self, remark: &str, task_count: usize) -> Result<()> {
        if remark.trim().is_empty() {
            return Err(ExtractError::InvalidParameter(
                "the rejection remark cannot be empty".into(),
            ));
        }
        self.set_remark(remark)?;
        self.tasknum = Some(if self.process_id.is_some() {
            task_count as u32 + 1
        } else {
            1
        });
        self.status = RequestStatus::ToExport;
        self.rejected = true;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Data folders
    // -----------------------------------------------------------------------

    pub fn input_dir(&self, data_root: &Path) -> Option<PathBuf> {
        self.folder_in.as_ref().map(|f| data_root.join(f))
    }

    pub fn output_dir(&self, data_root: &Path) -> Option<PathBuf> {
        self.folder_out.as_ref().map(|f| data_root.join(f))
    }

    /// Remove the request's data folders (the `<uuid>` directory holding input and output).
    pub fn purge_folders(&self, data_root: &Path) -> Result<()> {
        for folder in [&self.folder_in, &self.folder_out].into_iter().flatten() {
            let full = data_root.join(folder);
            let target = match full.parent() {
                Some(parent) if parent != data_root => parent.to_path_buf(),
                _ => full,
            };
            crate::io::remove_dir_if_exists(&target)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rule language fields
    // -----------------------------------------------------------------------

    /// Value of a named field as seen by matching rules and text templates.
    ///
    /// Names compare case-insensitively and ignore underscores; `PARAMETERS.KEY`
    /// reads a key of the parameters object. Empty text fields yield `None`.
    pub fn field_value(&self, name: &str) -> Option<String> {
        let normalized: String = name
            .trim()
            .chars()
            .filter(|c| *c != '_')
            .flat_map(|c| c.to_lowercase())
            .collect();

        if let Some(key) = normalized.strip_prefix("parameters.") {
            return self.parameter_value(key);
        }

        let text = |s: &String| Some(s.clone()).filter(|v| !v.is_empty());
        match normalized.as_str() {
            "orderlabel" => text(&self.order_label),
            "orderguid" => text(&self.order_guid),
            "productlabel" => text(&self.product_label),
            "productguid" => text(&self.product_guid),
            "organism" => text(&self.organism),
            "organismguid" => text(&self.organism_guid),
            "client" => text(&self.client),
            "clientguid" => text(&self.client_guid),
            "clientdetails" => text(&self.client_details),
            "tiers" => text(&self.tiers),
            "tiersguid" => text(&self.tiers_guid),
            "tiersdetails" => text(&self.tiers_details),
            "perimeter" => self.perimeter.clone(),
            "surface" => self.surface.map(|s| s.to_string()),
            "remark" => text(&self.remark),
            "startdate" => Some(self.start_date.format("%Y-%m-%d").to_string()),
            _ => None,
        }
    }

    /// Case-insensitive, underscore-insensitive lookup in the parameters object.
    /// Values of the given parameter keys, keyed as configured. Absent keys are skipped.
    pub fn focus_parameters(&self, keys: &[String]) -> BTreeMap<String, String> {
        keys.iter()
            .filter_map(|k| self.parameter_value(k).map(|v| (k.clone(), v)))
            .collect()
    }

    pub fn parameter_value(&self, key: &str) -> Option<String> {
        let wanted: String = key
            .chars()
            .filter(|c| *c != '_')
            .flat_map(|c| c.to_lowercase())
            .collect();
        let obj = self.parameters.as_object()?;
        obj.iter()
            .find(|(k, _)| {
                k.chars()
                    .filter(|c| *c != '_')
                    .flat_map(|c| c.to_lowercase())
                    .eq(wanted.chars())
            })
            .and_then(|(_, v)| match v {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
    }

    // -----------------------------------------------------------------------
    // Store
    // -----------------------------------------------------------------------

    /// Persist a new request under a freshly allocated id.
    pub fn create(root: &Path, mut request: Request) -> Result<Request> {
        request.id = State::next_id(root, IdKind::Request)?;
        request.save(root)?;
        Ok(request)
    }

    pub fn load(root: &Path, id: u64) -> Result<Self> {
        let path = paths::request_manifest(root, id);
        if !path.exists() {
            return Err(ExtractError::RequestNotFound(id));
        }
        let data = std::fs::read_to_string(&path)?;
        let request: Request = serde_yaml::from_str(&data)?;
        Ok(request)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::request_manifest(root, self.id);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// All requests, sorted by id.
    pub fn list(root: &Path) -> Result<Vec<Request>> {
        let dir = paths::requests_dir(root);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut requests = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(id) = paths::manifest_id(&entry.path()) {
                requests.push(Self::load(root, id)?);
            }
        }
        requests.sort_by_key(|r| r.id);
        Ok(requests)
    }

    pub fn list_by_status(root: &Path, status: RequestStatus) -> Result<Vec<Request>> {
        Ok(Self::list(root)?
            .into_iter()
            .filter(|r| r.status == status)
            .collect())
    }

    /// Delete a request together with its data folders and history.
    pub fn delete(root: &Path, history: &HistoryDb, data_root: &Path, id: u64) -> Result<()> {
        let request = Self::load(root, id)?;
        request.purge_folders(data_root)?;
        history.purge_request(id)?;
        std::fs::remove_file(paths::request_manifest(root, id))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Operator actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OperatorAction {
    Validate { remark: String },
    Reject { remark: String },
    Relaunch,
    RestartTask,
    SkipTask,
    RetryExport,
    RetryMatching,
}

impl OperatorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorAction::Validate { .. } => "validate",
            OperatorAction::Reject { .. } => "reject",
            OperatorAction::Relaunch => "relaunch",
            OperatorAction::RestartTask => "restart_task",
            OperatorAction::SkipTask => "skip_task",
            OperatorAction::RetryExport => "retry_export",
            OperatorAction::RetryMatching => "retry_matching",
        }
    }

    fn target(&self) -> RequestStatus {
        match self {
            OperatorAction::Reject { .. } | OperatorAction::RetryExport => RequestStatus::ToExport,
            OperatorAction::RetryMatching => RequestStatus::Imported,
            _ => RequestStatus::Ongoing,
        }
    }
}

/// Everything an operator action needs besides the request itself.
pub struct ActionContext<'a> {
    pub history: &'a HistoryDb,
    pub data_root: &'a Path,
    /// Tasks of the request's process, in position order. Empty without a process.
    pub tasks: &'a [Task],
    pub user: &'a str,
    /// Cursor the operator acted upon; `None` skips the staleness check.
    pub active_step: Option<u32>,
}

impl Request {
    fn refuse(&self, action: &OperatorAction, reason: impl Into<String>) -> ExtractError {
        ExtractError::InvalidTransition {
            from: self.status.to_string(),
            to: action.target().to_string(),
            reason: reason.into(),
        }
    }

    fn check_active_step(&self, action: &OperatorAction, active_step: Option<u32>) -> Result<()> {
        let Some(step) = active_step else {
            return Ok(());
        };
        let current = match self.tasknum {
            None => step < 1,
            Some(n) => step == n,
        };
        if !current {
            return Err(self.refuse(action, "the request moved on since it was displayed"));
        }
        Ok(())
    }

    fn require_status(&self, action: &OperatorAction, allowed: &[RequestStatus]) -> Result<()> {
        if !allowed.contains(&self.status) {
            return Err(self.refuse(action, format!("not allowed while {}", self.status)));
        }
        Ok(())
    }

    /// Apply an operator action. History records are written immediately; the
    /// caller persists the request.
    pub fn apply(&mut self, action: &OperatorAction, ctx: &ActionContext<'_>) -> Result<()> {
        if !matches!(action, OperatorAction::RetryMatching) {
            self.check_active_step(action, ctx.active_step)?;
        }

        match action {
            OperatorAction::Validate { remark } => {
                self.require_status(action, &[RequestStatus::Standby])?;
                self.set_remark(remark)?;
                if let Some(mut record) = ctx.history.last_for(self.id)? {
                    record.finish(ctx.user);
                    ctx.history.update(&record)?;
                }
                self.status = RequestStatus::Ongoing;
                self.tasknum = Some(self.tasknum.unwrap_or(0) + 1);
            }

            OperatorAction::Reject { remark } => {
                self.require_status(
                    action,
                    &[
                        RequestStatus::Error,
                        RequestStatus::Standby,
                        RequestStatus::ExportFail,
                        RequestStatus::Unmatched,
                        RequestStatus::ImportFail,
                    ],
                )?;
                if self.rejected && self.status != RequestStatus::ExportFail {
                    return Err(self.refuse(action, "the request is already rejected"));
                }
                if remark.trim().is_empty() {
                    return Err(ExtractError::InvalidParameter(
                        "the rejection remark cannot be empty".into(),
                    ));
                }
                self.close_standby_record(ctx)?;
                if self.process_id.is_some() {
                    let cursor = self.tasknum.unwrap_or(0);
                    for task in ctx.tasks.iter().filter(|t| t.position > cursor) {
                        self.record_skipped(ctx, task)?;
                    }
                }
                self.reject(remark, ctx.tasks.len())?;
            }

            OperatorAction::Relaunch => {
                self.require_status(
                    action,
                    &[
                        RequestStatus::Standby,
                        RequestStatus::Error,
                        RequestStatus::ExportFail,
                    ],
                )?;
                if self.rejected {
                    return Err(self.refuse(action, "a rejected request cannot be relaunched"));
                }
                self.close_standby_record(ctx)?;
                if let Some(out) = self.output_dir(ctx.data_root) {
                    crate::io::clear_dir(&out)?;
                }
                self.tasknum = Some(1);
                self.status = RequestStatus::Ongoing;
            }

            OperatorAction::RestartTask => {
                self.require_status(action, &[RequestStatus::Error])?;
                self.status = RequestStatus::Ongoing;
            }

            OperatorAction::SkipTask => {
                self.require_status(action, &[RequestStatus::Error])?;
                if let Some(task) = self.current_task(ctx.tasks) {
                    self.record_skipped(ctx, task)?;
                }
                self.tasknum = Some(self.tasknum.unwrap_or(0) + 1);
                self.status = RequestStatus::Ongoing;
            }

            OperatorAction::RetryExport => {
                self.require_status(action, &[RequestStatus::ExportFail])?;
                self.status = RequestStatus::ToExport;
            }

            OperatorAction::RetryMatching => {
                if self.tasknum.is_some() {
                    return Err(self.refuse(action, "the request already went through matching"));
                }
                self.require_status(action, &[RequestStatus::Unmatched])?;
                self.status = RequestStatus::Imported;
            }
        }
        Ok(())
    }

    /// Finish the open standby record of a request waiting for an operator.
    fn close_standby_record(&self, ctx: &ActionContext<'_>) -> Result<()> {
        if self.status != RequestStatus::Standby {
            return Ok(());
        }
        if let Some(mut record) = ctx.history.last_for(self.id)? {
            if record.status == HistoryStatus::Standby {
                record.finish(ctx.user);
                ctx.history.update(&record)?;
            }
        }
        Ok(())
    }

        fn record_skipped(&self, ctx: &ActionContext<'_>, task: &Task) -> Result<HistoryRecord> {
        let mut record = ctx.history.append(
            self.id,
            task.position,
            &task.label,
            HistoryStatus::Skipped,
            ctx.user,
        )?;
        record.skip(ctx.user);
        record.end_date = Some(record.start_date);
        ctx.history.update(&record)?;
        Ok(record)
    }
}

/// Load a request, apply an operator action, save it and log the event.
pub fn perform_action(
    root: &Path,
    history: &HistoryDb,
    data_root: &Path,
    id: u64,
    action: &OperatorAction,
    user: &str,
    active_step: Option<u32>,
) -> Result<Request> {
    let mut request = Request::load(root, id)?;
    let tasks = match request.process_id {
        Some(pid) => Process::load(root, pid)?.tasks,
        None => Vec::new(),
    };
    let ctx = ActionContext {
        history,
        data_root,
        tasks: &tasks,
        user,
        active_step,
    };
    request.apply(action, &ctx)?;
    request.save(root)?;
    State::log_event(root, Some(id), action.as_str(), user, request.status.as_str())?;
    tracing::info!(
        request = id,
        action = action.as_str(),
        user,
        status = %request.status,
        "operator action applied"
    );
    Ok(request)
}

// ---------------------------------------------------------------------------
// Output files
// ---------------------------------------------------------------------------

const OUTPUT_EDITABLE: &[RequestStatus] = &[
    RequestStatus::Error,
    RequestStatus::ExportFail,
    RequestStatus::ImportFail,
    RequestStatus::Standby,
    RequestStatus::Unmatched,
];

impl Request {
    /// Files currently in the output folder, relative to it.
    pub fn output_files(&self, data_root: &Path) -> Result<Vec<PathBuf>> {
        match self.output_dir(data_root) {
            Some(dir) => crate::io::list_files(&dir),
            None => Ok(Vec::new()),
        }
    }

    fn editable_output(&self, data_root: &Path) -> Result<PathBuf> {
        if !OUTPUT_EDITABLE.contains(&self.status) {
            return Err(ExtractError::InvalidTransition {
                from: self.status.to_string(),
                to: self.status.to_string(),
                reason: "output files can only change while the request waits for an operator"
                    .into(),
            });
        }
        self.output_dir(data_root).ok_or_else(|| {
            ExtractError::InvalidParameter(format!("request {} has no output folder", self.id))
        })
    }

    /// Add a file to the output folder. `name` must be a plain file name.
    pub fn add_output_file(&self, data_root: &Path, name: &str, content: &[u8]) -> Result<PathBuf> {
        let dir = self.editable_output(data_root)?;
        let file_name = Path::new(name)
            .file_name()
            .filter(|f| f.to_str() == Some(name))
            .ok_or_else(|| ExtractError::InvalidParameter(format!("invalid file name: {name}")))?;
        let target = dir.join(file_name);
        crate::io::atomic_write(&target, content)?;
        Ok(target)
    }

    /// Remove a file from the output folder. `relative` may not escape it.
    pub fn remove_output_file(&self, data_root: &Path, relative: &str) -> Result<()> {
        let dir = self.editable_output(data_root)?;
        let rel = Path::new(relative);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(ExtractError::InvalidParameter(format!(
                "invalid output path: {relative}"
            )));
        }
        std::fs::remove_file(dir.join(rel))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::SYSTEM_USER;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        history: HistoryDb,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            State::new("test").save(dir.path()).unwrap();
            let history = HistoryDb::open(&paths::history_db_path(dir.path())).unwrap();
            Self { dir, history }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn data_root(&self) -> PathBuf {
            self.dir.path().join("data")
        }
    }

    fn product(perimeter: Option<&str>) -> Product {
        Product {
            order_label: "ORD-1".into(),
            order_guid: "o-guid".into(),
            product_label: "Cadastre".into(),
            product_guid: "p-guid".into(),
            client: "Jean Dupont".into(),
            organism: "Commune".into(),
            perimeter: perimeter.map(str::to_string),
            parameters: serde_json::json!({"FORMAT": "DXF", "crs_code": 2056}),
            ..Default::default()
        }
    }

    fn tasks(n: u32) -> Vec<Task> {
        (1..=n)
            .map(|i| Task {
                id: i as u64,
                code: "REMARK".into(),
                label: format!("Task {i}"),
                parameters: BTreeMap::new(),
                position: i,
            })
            .collect()
    }

    fn matched(status: RequestStatus, tasknum: u32) -> Request {
        let mut r = Request::from_product(1, &product(Some("POINT(1 1)")));
        r.id = 5;
        r.process_id = Some(1);
        r.tasknum = Some(tasknum);
        r.status = status;
        r.folder_in = Some("abc/input".into());
        r.folder_out = Some("abc/output".into());
        r
    }

    fn ctx<'a>(fx: &'a Fixture, data_root: &'a Path, tasks: &'a [Task]) -> ActionContext<'a> {
        ActionContext {
            history: &fx.history,
            data_root,
            tasks,
            user: "op",
            active_step: None,
        }
    }

    #[test]
    fn from_product_without_perimeter_fails_import() {
        assert_eq!(
            Request::from_product(1, &product(Some("POLYGON((0 0,1 0,1 1,0 0))"))).status,
            RequestStatus::Imported
        );
        assert_eq!(
            Request::from_product(1, &product(Some("  "))).status,
            RequestStatus::ImportFail
        );
        assert_eq!(
            Request::from_product(1, &product(None)).status,
            RequestStatus::ImportFail
        );
    }

    #[test]
    fn reject_requires_remark_and_jumps_past_last_task() {
        let mut r = matched(RequestStatus::Error, 2);
        assert!(r.reject("  ", 3).is_err());
        r.reject("Hors périmètre", 3).unwrap();
        assert_eq!(r.tasknum, Some(4));
        assert_eq!(r.status, RequestStatus::ToExport);
        assert!(r.rejected);

        let mut unmatched = Request::from_product(1, &product(Some("POINT(0 0)")));
        unmatched.reject("no process", 0).unwrap();
        assert_eq!(unmatched.tasknum, Some(1));
    }

    #[test]
    fn field_values_are_name_insensitive() {
        let r = Request::from_product(1, &product(Some("POINT(1 1)")));
        assert_eq!(r.field_value("ORDER_LABEL").as_deref(), Some("ORD-1"));
        assert_eq!(r.field_value("productLabel").as_deref(), Some("Cadastre"));
        assert_eq!(r.field_value("PARAMETERS.format").as_deref(), Some("DXF"));
        assert_eq!(r.field_value("parameters.CRSCODE").as_deref(), Some("2056"));
        assert_eq!(r.field_value("tiers"), None);
        assert_eq!(r.field_value("nonsense"), None);
    }

    #[test]
    fn focus_parameters_pick_configured_keys() {
        let r = Request::from_product(1, &product(Some("POINT(1 1)")));
        let keys = vec!["format".to_string(), "CRS_CODE".to_string(), "MISSING".to_string()];
        let focus = r.focus_parameters(&keys);
        assert_eq!(focus.len(), 2);
        assert_eq!(focus["format"], "DXF");
        assert_eq!(focus["CRS_CODE"], "2056");
    }

    #[test]
    fn store_round_trip_and_listing() {
        let fx = Fixture::new();
        let a = Request::create(fx.root(), Request::from_product(1, &product(Some("POINT(0 0)"))))
            .unwrap();
        let b = Request::create(fx.root(), Request::from_product(1, &product(None))).unwrap();
        assert_eq!((a.id, b.id), (1, 2));

        assert_eq!(Request::load(fx.root(), 1).unwrap(), a);
        assert_eq!(Request::list(fx.root()).unwrap().len(), 2);
        let failed = Request::list_by_status(fx.root(), RequestStatus::ImportFail).unwrap();
        assert_eq!(failed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);
        assert!(matches!(
            Request::load(fx.root(), 9),
            Err(ExtractError::RequestNotFound(9))
        ));
    }

    #[test]
    fn validate_closes_standby_record() {
        let fx = Fixture::new();
        let data = fx.data_root();
        let tasks = tasks(3);
        let mut r = matched(RequestStatus::Standby, 2);
        fx.history
            .append(r.id, 2, "Task 2", HistoryStatus::Standby, SYSTEM_USER)
            .unwrap();

        r.apply(
            &OperatorAction::Validate {
                remark: "OK pour livraison".into(),
            },
            &ctx(&fx, &data, &tasks),
        )
        .unwrap();
        assert_eq!(r.status, RequestStatus::Ongoing);
        assert_eq!(r.tasknum, Some(3));
        assert_eq!(r.remark, "OK pour livraison");

        let last = fx.history.last_for(r.id).unwrap().unwrap();
        assert_eq!(last.status, HistoryStatus::Finished);
        assert_eq!(last.user, "op");
    }

    #[test]
    fn validate_refuses_other_statuses_and_stale_steps() {
        let fx = Fixture::new();
        let data = fx.data_root();
        let tasks = tasks(3);
        let action = OperatorAction::Validate { remark: String::new() };

        let mut r = matched(RequestStatus::Error, 2);
        assert!(matches!(
            r.apply(&action, &ctx(&fx, &data, &tasks)),
            Err(ExtractError::InvalidTransition { .. })
        ));

        let mut r = matched(RequestStatus::Standby, 2);
        let mut stale = ctx(&fx, &data, &tasks);
        stale.active_step = Some(1);
        assert!(r.apply(&action, &stale).is_err());
        assert_eq!(r.status, RequestStatus::Standby);
    }

    #[test]
    fn operator_reject_skips_remaining_tasks() {
        let fx = Fixture::new();
        let data = fx.data_root();
        let tasks = tasks(4);
        let mut r = matched(RequestStatus::Standby, 2);
        fx.history
            .append(r.id, 2, "Task 2", HistoryStatus::Standby, SYSTEM_USER)
            .unwrap();

        r.apply(
            &OperatorAction::Reject {
                remark: "Données indisponibles".into(),
            },
            &ctx(&fx, &data, &tasks),
        )
        .unwrap();
        assert_eq!(r.status, RequestStatus::ToExport);
        assert_eq!(r.tasknum, Some(5));
        assert!(r.rejected);

        let records = fx.history.for_request(r.id).unwrap();
        let statuses: Vec<HistoryStatus> = records.iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![
                HistoryStatus::Finished,
                HistoryStatus::Skipped,
                HistoryStatus::Skipped
            ]
        );
        assert_eq!(records[2].task_label, "Task 4");
    }

    #[test]
    fn reject_twice_only_from_export_failure() {
        let fx = Fixture::new();
        let data = fx.data_root();
        let tasks = tasks(1);
        let action = OperatorAction::Reject {
            remark: "again".into(),
        };

        let mut r = matched(RequestStatus::Error, 1);
        r.rejected = true;
        assert!(r.apply(&action, &ctx(&fx, &data, &tasks)).is_err());

        r.status = RequestStatus::ExportFail;
        r.apply(&action, &ctx(&fx, &data, &tasks)).unwrap();
        assert_eq!(r.status, RequestStatus::ToExport);
    }

    #[test]
    fn relaunch_purges_output_and_restarts() {
        let fx = Fixture::new();
        let data = fx.data_root();
        let tasks = tasks(2);
        let mut r = matched(RequestStatus::Error, 2);
        let out = r.output_dir(&data).unwrap();
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("result.zip"), b"zip").unwrap();

        r.apply(&OperatorAction::Relaunch, &ctx(&fx, &data, &tasks))
            .unwrap();
        assert_eq!(r.tasknum, Some(1));
        assert_eq!(r.status, RequestStatus::Ongoing);
        assert!(out.is_dir());
        assert!(r.output_files(&data).unwrap().is_empty());

        let mut rejected = matched(RequestStatus::ExportFail, 3);
        rejected.rejected = true;
        assert!(rejected
            .apply(&OperatorAction::Relaunch, &ctx(&fx, &data, &tasks))
            .is_err());
    }

    #[test]
    fn relaunch_from_standby_closes_the_waiting_record() {
        let fx = Fixture::new();
        let data = fx.data_root();
        let tasks = tasks(2);
        let mut r = matched(RequestStatus::Standby, 1);
        fx.history
            .append(r.id, 1, "Task 1", HistoryStatus::Standby, SYSTEM_USER)
            .unwrap();

        r.apply(&OperatorAction::Relaunch, &ctx(&fx, &data, &tasks))
            .unwrap();
        assert_eq!(r.status, RequestStatus::Ongoing);
        assert_eq!(r.tasknum, Some(1));
        let last = fx.history.last_for(r.id).unwrap().unwrap();
        assert_eq!(last.status, HistoryStatus::Finished);
        assert!(last.end_date.is_some());
        assert_eq!(last.user, "op");
    }

    #[test]
    fn skip_and_restart_from_error() {
        let fx = Fixture::new();
        let data = fx.data_root();
        let tasks = tasks(3);

        let mut r = matched(RequestStatus::Error, 2);
        r.apply(&OperatorAction::SkipTask, &ctx(&fx, &data, &tasks))
            .unwrap();
        assert_eq!(r.tasknum, Some(3));
        assert_eq!(r.status, RequestStatus::Ongoing);
        let last = fx.history.last_for(r.id).unwrap().unwrap();
        assert_eq!(last.status, HistoryStatus::Skipped);
        assert_eq!(last.task_label, "Task 2");

        let mut r = matched(RequestStatus::Error, 2);
        r.apply(&OperatorAction::RestartTask, &ctx(&fx, &data, &tasks))
            .unwrap();
        assert_eq!((r.status, r.tasknum), (RequestStatus::Ongoing, Some(2)));

        let mut r = matched(RequestStatus::Standby, 2);
        assert!(r
            .apply(&OperatorAction::RestartTask, &ctx(&fx, &data, &tasks))
            .is_err());
    }

    #[test]
    fn retry_export_and_matching() {
        let fx = Fixture::new();
        let data = fx.data_root();

        let mut r = matched(RequestStatus::ExportFail, 3);
        r.apply(&OperatorAction::RetryExport, &ctx(&fx, &data, &[]))
            .unwrap();
        assert_eq!(r.status, RequestStatus::ToExport);

        let mut u = Request::from_product(1, &product(Some("POINT(0 0)")));
        u.status = RequestStatus::Unmatched;
        let mut c = ctx(&fx, &data, &[]);
        c.active_step = Some(7);
        u.apply(&OperatorAction::RetryMatching, &c).unwrap();
        assert_eq!(u.status, RequestStatus::Imported);

        let mut stuck = matched(RequestStatus::Unmatched, 1);
        assert!(stuck
            .apply(&OperatorAction::RetryMatching, &ctx(&fx, &data, &[]))
            .is_err());
    }

    #[test]
    fn delete_purges_folders_and_history() {
        let fx = Fixture::new();
        let data = fx.data_root();
        let mut r = Request::create(fx.root(), matched(RequestStatus::Error, 1)).unwrap();
        r.folder_in = Some("uuid-1/input".into());
        r.folder_out = Some("uuid-1/output".into());
        r.save(fx.root()).unwrap();
        std::fs::create_dir_all(data.join("uuid-1/input")).unwrap();
        std::fs::create_dir_all(data.join("uuid-1/output")).unwrap();
        fx.history
            .append(r.id, 0, "Import", HistoryStatus::Finished, SYSTEM_USER)
            .unwrap();

        Request::delete(fx.root(), &fx.history, &data, r.id).unwrap();
        assert!(!data.join("uuid-1").exists());
        assert!(data.is_dir());
        assert!(fx.history.for_request(r.id).unwrap().is_empty());
        assert!(Request::load(fx.root(), r.id).is_err());
    }

    #[test]
    fn output_files_editable_only_while_waiting() {
        let fx = Fixture::new();
        let data = fx.data_root();
        let r = matched(RequestStatus::Standby, 1);
        r.add_output_file(&data, "extract.dxf", b"0\nSECTION").unwrap();
        assert_eq!(
            r.output_files(&data).unwrap(),
            vec![PathBuf::from("extract.dxf")]
        );
        assert!(r.add_output_file(&data, "../escape.txt", b"x").is_err());
        assert!(r.remove_output_file(&data, "../abc").is_err());
        r.remove_output_file(&data, "extract.dxf").unwrap();

        let busy = matched(RequestStatus::Ongoing, 1);
        assert!(busy.add_output_file(&data, "late.txt", b"x").is_err());
    }
}
