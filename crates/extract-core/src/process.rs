use crate::connector::Connector;
use crate::error::{ExtractError, Result};
use crate::paths;
use crate::request::Request;
use crate::state::{IdKind, State};
use crate::types::RequestStatus;
use crate::user::{User, UserDirectory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Value sent back by clients in place of a stored secret they never saw.
pub const PASSWORD_PLACEHOLDER: &str = "*****";

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    /// Code of the task plugin that executes this step.
    pub code: String,
    pub label: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub position: u32,
}

impl Task {
    /// Replace the parameters with `values`. Keys absent from `values` are
    /// dropped; a placeholder value keeps what was stored.
    pub fn update_parameters(&mut self, values: BTreeMap<String, String>) {
        let mut next = BTreeMap::new();
        for (key, value) in values {
            if value == PASSWORD_PLACEHOLDER {
                if let Some(previous) = self.parameters.get(&key) {
                    next.insert(key, previous.clone());
                    continue;
                }
            }
            next.insert(key, value);
        }
        self.parameters = next;
    }

    pub fn validation_message_ids(&self) -> Vec<u64> {
        self.id_list("valid_msgs")
    }

    pub fn rejection_message_ids(&self) -> Vec<u64> {
        self.id_list("reject_msgs")
    }

    fn id_list(&self, key: &str) -> Vec<u64> {
        self.parameters
            .get(key)
            .map(|v| {
                v.split(',')
                    .filter_map(|s| s.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: u64,
    pub name: String,
    /// Logins of the users assigned directly.
    #[serde(default)]
    pub operators: Vec<String>,
    /// Ids of the user groups assigned.
    #[serde(default)]
    pub groups: Vec<u64>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Process {
    pub fn create(root: &Path, name: &str) -> Result<Process> {
        if name.trim().is_empty() {
            return Err(ExtractError::InvalidParameter(
                "process name cannot be empty".into(),
            ));
        }
        let process = Process {
            id: State::next_id(root, IdKind::Process)?,
            name: name.trim().to_string(),
            operators: Vec::new(),
            groups: Vec::new(),
            tasks: Vec::new(),
        };
        process.save(root)?;
        Ok(process)
    }

    pub fn load(root: &Path, id: u64) -> Result<Self> {
        let path = paths::process_manifest(root, id);
        if !path.exists() {
            return Err(ExtractError::ProcessNotFound(id));
        }
        let data = std::fs::read_to_string(&path)?;
        let process: Process = serde_yaml::from_str(&data)?;
        Ok(process)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::process_manifest(root, self.id);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn list(root: &Path) -> Result<Vec<Process>> {
        let dir = paths::processes_dir(root);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut processes = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(id) = paths::manifest_id(&entry.path()) {
                processes.push(Self::load(root, id)?);
            }
        }
        processes.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(processes)
    }

    // -----------------------------------------------------------------------
    // Usage checks
    // -----------------------------------------------------------------------

    /// A process can go once no active request uses it and no rule points at it.
    pub fn can_be_deleted(&self, root: &Path) -> Result<bool> {
        let in_use = Request::list(root)?
            .iter()
            .any(|r| r.process_id == Some(self.id) && r.is_active());
        if in_use {
            return Ok(false);
        }
        let referenced = Connector::list(root)?
            .iter()
            .flat_map(|c| c.rules.iter())
            .any(|rule| rule.process_id == self.id);
        Ok(!referenced)
    }

    /// Tasks may only change while no request is being processed with them.
    pub fn can_be_edited(&self, root: &Path) -> Result<bool> {
        Ok(!Request::list(root)?
            .iter()
            .any(|r| r.process_id == Some(self.id) && r.status == RequestStatus::Ongoing))
    }

    pub fn ensure_editable(&self, root: &Path) -> Result<()> {
        if !self.can_be_edited(root)? {
            return Err(ExtractError::ProcessInUse(format!(
                "'{}' has requests being processed",
                self.name
            )));
        }
        Ok(())
    }

    pub fn delete(root: &Path, id: u64) -> Result<()> {
        let process = Self::load(root, id)?;
        if !process.can_be_deleted(root)? {
            return Err(ExtractError::ProcessInUse(format!(
                "'{}' is referenced by active requests or rules",
                process.name
            )));
        }
        std::fs::remove_file(paths::process_manifest(root, id))?;
        Ok(())
    }

    /// Duplicate the process under a new id and name, with fresh task ids.
    pub fn create_copy(&self, root: &Path) -> Result<Process> {
        let mut tasks = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            tasks.push(Task {
                id: State::next_id(root, IdKind::Task)?,
                ..task.clone()
            });
        }
        let copy = Process {
            id: State::next_id(root, IdKind::Process)?,
            name: format!("{} - Copie", self.name),
            operators: self.operators.clone(),
            groups: self.groups.clone(),
            tasks,
        };
        copy.save(root)?;
        Ok(copy)
    }

    /// Active users assigned directly or through a group, without duplicates.
    pub fn distinct_operators<'a>(&self, directory: &'a UserDirectory) -> Vec<&'a User> {
        let mut logins: Vec<&str> = self.operators.iter().map(String::as_str).collect();
        for gid in &self.groups {
            if let Ok(group) = directory.group(*gid) {
                logins.extend(group.users.iter().map(String::as_str));
            }
        }

        let mut out: Vec<&User> = Vec::new();
        for login in logins {
            if let Some(user) = directory.find(login) {
                if user.active && !out.iter().any(|u| u.login == user.login) {
                    out.push(user);
                }
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub fn task(&self, task_id: u64) -> Result<&Task> {
        self.tasks
            .iter()
            .find(|t| t.id == task_id)
            .ok_or(ExtractError::TaskNotFound(task_id))
    }

    pub fn task_mut(&mut self, task_id: u64) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or(ExtractError::TaskNotFound(task_id))
    }

    /// Append a task at the end of the process. Returns its id.
    pub fn add_task(
        &mut self,
        root: &Path,
        code: &str,
        label: &str,
        parameters: BTreeMap<String, String>,
    ) -> Result<u64> {
        let id = State::next_id(root, IdKind::Task)?;
        self.tasks.push(Task {
            id,
            code: code.to_string(),
            label: label.to_string(),
            parameters,
            position: self.tasks.len() as u32 + 1,
        });
        Ok(id)
    }

    pub fn remove_task(&mut self, task_id: u64) -> Result<Task> {
        let idx = self
            .tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or(ExtractError::TaskNotFound(task_id))?;
        let removed = self.tasks.remove(idx);
        self.renumber();
        Ok(removed)
    }

    /// Move a task to `position` (1-based, clamped to the task count).
    pub fn move_task(&mut self, task_id: u64, position: u32) -> Result<()> {
        let idx = self
            .tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or(ExtractError::TaskNotFound(task_id))?;
        let task = self.tasks.remove(idx);
        let target = (position.max(1) as usize - 1).min(self.tasks.len());
        self.tasks.insert(target, task);
        self.renumber();
        Ok(())
    }

    fn renumber(&mut self) {
        for (i, task) in self.tasks.iter_mut().enumerate() {
            task.position = i as u32 + 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
