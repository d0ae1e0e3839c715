//! E-mail notifications sent to operators and administrators.
//!
//! Messages go through a [`Mailer`]. The default [`OutboxMailer`] drops each
//! message as a YAML file in `.extract/outbox/` for an external relay to pick
//! up; [`MemoryMailer`] keeps them in memory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EmailSettings;
use crate::connector::Connector;
use crate::error::Result;
use crate::paths;
use crate::process::Process;
use crate::request::Request;
use crate::user::{User, UserDirectory};

// ---------------------------------------------------------------------------
// Email / Mailer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Email {
    pub fn new(settings: &EmailSettings, to: Vec<String>, subject: &str, body: &str) -> Self {
        let from = if settings.sender_name.trim().is_empty() {
            settings.sender_address.clone()
        } else {
            format!("{} <{}>", settings.sender_name, settings.sender_address)
        };
        Self {
            from,
            to,
            subject: subject.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
        }
    }
}

pub trait Mailer: Send + Sync {
    fn send(&self, email: &Email) -> Result<()>;
}

/// Writes every message to `<dir>/<timestamp>-<uuid>.yaml`.
pub struct OutboxMailer {
    dir: PathBuf,
}

impl OutboxMailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn for_root(root: &Path) -> Self {
        Self::new(paths::outbox_dir(root))
    }
}

impl Mailer for OutboxMailer {
    fn send(&self, email: &Email) -> Result<()> {
        let name = format!(
            "{}-{}.yaml",
            email.created_at.format("%Y%m%dT%H%M%S%3f"),
            uuid::Uuid::new_v4().simple()
        );
        let path = self.dir.join(name);
        let data = serde_yaml::to_string(email)?;
        crate::io::atomic_write(&path, data.as_bytes())?;
        tracing::info!(to = ?email.to, subject = %email.subject, "notification queued");
        Ok(())
    }
}

/// Keeps sent messages in memory.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Email>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }
}

impl Mailer for MemoryMailer {
    fn send(&self, email: &Email) -> Result<()> {
        let mut sent = self.sent.lock().unwrap_or_else(|p| p.into_inner());
        sent.push(email.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Builds system notifications and sends them to the relevant users.
///
/// Every method returns whether at least one message went out.
#[derive(Clone)]
pub struct Notifier {
    root: PathBuf,
    settings: EmailSettings,
    mailer: Arc<dyn Mailer>,
}

impl Notifier {
    pub fn new(root: &Path, settings: EmailSettings, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            root: root.to_path_buf(),
            settings,
            mailer,
        }
    }

    pub fn settings(&self) -> &EmailSettings {
        &self.settings
    }

    pub fn mailer(&self) -> &dyn Mailer {
        self.mailer.as_ref()
    }

    pub fn task_failed(&self, request: &Request, task_label: &str, message: &str) -> Result<bool> {
        let subject = format!("[Extract] Task failed: {}", describe(request));
        let body = format!(
            "The task \"{task_label}\" failed for request {}.\n\nError: {message}\n\n{}",
            request.id,
            details(request)
        );
        self.send_to_operators(request, &subject, &body)
    }

    pub fn standby(&self, request: &Request, task_label: &str) -> Result<bool> {
        let subject = format!("[Extract] Validation required: {}", describe(request));
        let body = format!(
            "The task \"{task_label}\" is waiting for an operator to validate request {}.\n\n{}",
            request.id,
            details(request)
        );
        self.send_to_operators(request, &subject, &body)
    }

    pub fn standby_reminder(&self, request: &Request) -> Result<bool> {
        let subject = format!("[Extract] Reminder, still waiting: {}", describe(request));
        let since = request
            .last_reminder
            .unwrap_or(request.start_date)
            .format("%Y-%m-%d %H:%M");
        let body = format!(
            "Request {} has been waiting for validation since {since}.\n\n{}",
            request.id,
            details(request)
        );
        self.send_to_operators(request, &subject, &body)
    }

    pub fn unmatched(&self, request: &Request, connector_name: &str) -> Result<bool> {
        let subject = format!("[Extract] No rule matched: {}", describe(request));
        let body = format!(
            "No rule of connector \"{connector_name}\" matched request {}.\n\n{}",
            request.id,
            details(request)
        );
        self.send_to_admins(&subject, &body)
    }

    pub fn import_failed(&self, connector: &Connector, message: &str) -> Result<bool> {
        let subject = format!("[Extract] Import failed for connector {}", connector.name);
        let body = format!(
            "The import of connector \"{}\" failed at {}.\n\nError: {message}",
            connector.name,
            connector
                .last_import_date
                .unwrap_or_else(Utc::now)
                .format("%Y-%m-%d %H:%M:%S")
        );
        self.send_to_admins(&subject, &body)
    }

    pub fn invalid_product(&self, request: &Request, connector_name: &str) -> Result<bool> {
        let subject = format!("[Extract] Invalid product imported: {}", describe(request));
        let body = format!(
            "Connector \"{connector_name}\" imported request {} without a geographic perimeter.\n\n{}",
            request.id,
            details(request)
        );
        self.send_to_admins(&subject, &body)
    }

    pub fn export_failed(&self, request: &Request, message: &str) -> Result<bool> {
        let subject = format!("[Extract] Export failed: {}", describe(request));
        let body = format!(
            "The export of request {} failed.\n\nError: {message}\n\n{}",
            request.id,
            details(request)
        );
        if !self.settings.enabled {
            return Ok(false);
        }
        let users = UserDirectory::load(&self.root)?;
        let mut recipients = self.operators(&users, request)?;
        for admin in users.active_admins() {
            if !recipients.iter().any(|u| u.login == admin.login) {
                recipients.push(admin);
            }
        }
        Ok(self.deliver(&recipients, &subject, &body))
    }

    // -----------------------------------------------------------------------
    // Recipients and delivery
    // -----------------------------------------------------------------------

    fn operators<'a>(&self, users: &'a UserDirectory, request: &Request) -> Result<Vec<&'a User>> {
        match request.process_id {
            Some(pid) => Ok(Process::load(&self.root, pid)?.distinct_operators(users)),
            None => Ok(Vec::new()),
        }
    }

    fn send_to_operators(&self, request: &Request, subject: &str, body: &str) -> Result<bool> {
        if !self.settings.enabled {
            tracing::debug!(request = request.id, "notifications disabled");
            return Ok(false);
        }
        let users = UserDirectory::load(&self.root)?;
        let recipients = self.operators(&users, request)?;
        Ok(self.deliver(&recipients, subject, body))
    }

    fn send_to_admins(&self, subject: &str, body: &str) -> Result<bool> {
        if !self.settings.enabled {
            tracing::debug!("notifications disabled");
            return Ok(false);
        }
        let users = UserDirectory::load(&self.root)?;
        Ok(self.deliver(&users.active_admins(), subject, body))
    }

    /// One message per eligible recipient. Delivery failures are logged, not raised.
    fn deliver(&self, recipients: &[&User], subject: &str, body: &str) -> bool {
        let mut sent = false;
        for user in recipients.iter().filter(|u| u.can_receive_mail()) {
            let email = Email::new(&self.settings, vec![user.email.clone()], subject, body);
            match self.mailer.send(&email) {
                Ok(()) => sent = true,
                Err(e) => tracing::warn!(user = %user.login, "could not send notification: {e}"),
            }
        }
        if !sent {
            tracing::warn!(subject, "no recipient could be notified");
        }
        sent
    }
}

fn describe(request: &Request) -> String {
    format!("{} / {}", request.order_label, request.product_label)
}

fn details(request: &Request) -> String {
    let mut out = format!(
        "Order: {}\nProduct: {}\nClient: {}",
        request.order_label, request.product_label, request.client
    );
    if !request.organism.is_empty() {
        out.push_str(&format!("\nOrganism: {}", request.organism));
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
