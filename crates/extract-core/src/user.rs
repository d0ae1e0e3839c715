use crate::error::{ExtractError, Result};
use crate::history::SYSTEM_USER;
use crate::paths;
use crate::process::Process;
use crate::state::{IdKind, State};
use crate::types::Profile;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub profile: Profile,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_true")]
    pub mail_active: bool,
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_true() -> bool {
    true
}

fn default_locale() -> String {
    "fr".into()
}

impl User {
    pub fn new(
        login: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        profile: Profile,
    ) -> Self {
        Self {
            login: login.into(),
            name: name.into(),
            email: email.into(),
            profile,
            active: true,
            mail_active: true,
            locale: default_locale(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.profile == Profile::Admin
    }

    pub fn can_receive_mail(&self) -> bool {
        self.active && self.mail_active && !self.email.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// UserGroup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserGroup {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub users: Vec<String>,
}

// ---------------------------------------------------------------------------
// UserDirectory
// ---------------------------------------------------------------------------

/// Users and groups, persisted together in `users.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserDirectory {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub groups: Vec<UserGroup>,
}

impl UserDirectory {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::users_path(root);
        if !path.exists() {
            if paths::extract_dir(root).is_dir() {
                return Ok(Self::default());
            }
            return Err(ExtractError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let dir: UserDirectory = serde_yaml::from_str(&data)?;
        Ok(dir)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::users_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub fn find(&self, login: &str) -> Option<&User> {
        self.users
            .iter()
            .find(|u| u.login.eq_ignore_ascii_case(login))
    }

    pub fn get(&self, login: &str) -> Result<&User> {
        self.find(login)
            .ok_or_else(|| ExtractError::UserNotFound(login.to_string()))
    }

    pub fn add(&mut self, user: User) -> Result<()> {
        paths::validate_login(&user.login)?;
        if user.login.eq_ignore_ascii_case(SYSTEM_USER) {
            return Err(ExtractError::InvalidLogin(user.login));
        }
        if self.find(&user.login).is_some() {
            return Err(ExtractError::UserExists(user.login));
        }
        self.users.push(user);
        Ok(())
    }

    /// Replace the stored user with the same login.
    pub fn update(&mut self, user: User) -> Result<()> {
        let slot = self
            .users
            .iter_mut()
            .find(|u| u.login.eq_ignore_ascii_case(&user.login))
            .ok_or_else(|| ExtractError::UserNotFound(user.login.clone()))?;
        *slot = user;
        Ok(())
    }

    /// Remove a user and its group memberships.
    pub fn remove(&mut self, login: &str) -> Result<User> {
        let idx = self
            .users
            .iter()
            .position(|u| u.login.eq_ignore_ascii_case(login))
            .ok_or_else(|| ExtractError::UserNotFound(login.to_string()))?;
        for group in &mut self.groups {
            group.users.retain(|m| !m.eq_ignore_ascii_case(login));
        }
        Ok(self.users.remove(idx))
    }

    pub fn active_admins(&self) -> Vec<&User> {
        self.users
            .iter()
            .filter(|u| u.active && u.is_admin())
            .collect()
    }

    /// An instance always keeps one active administrator.
    pub fn ensure_admin(&self) -> Result<()> {
        if self.active_admins().is_empty() {
            return Err(ExtractError::InvalidParameter(
                "at least one active administrator is required".into(),
            ));
        }
        Ok(())
    }

    /// Remove a user that no process lists as operator.
    pub fn remove_unassigned(&mut self, root: &Path, login: &str) -> Result<User> {
        let login = self.get(login)?.login.clone();
        if let Some(p) = Process::list(root)?
            .into_iter()
            .find(|p| p.operators.iter().any(|o| o.eq_ignore_ascii_case(&login)))
        {
            return Err(ExtractError::ProcessInUse(format!(
                "'{}' lists {login} as an operator",
                p.name
            )));
        }
        let removed = self.remove(&login)?;
        self.ensure_admin()?;
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    pub fn group(&self, id: u64) -> Result<&UserGroup> {
        self.groups
            .iter()
            .find(|g| g.id == id)
            .ok_or(ExtractError::GroupNotFound(id))
    }

    /// Create a group; every member must be a known user.
    pub fn add_group(&mut self, root: &Path, name: &str, members: Vec<String>) -> Result<u64> {
        for login in &members {
            self.get(login)?;
        }
        let id = State::next_id(root, IdKind::Group)?;
        self.groups.push(UserGroup {
            id,
            name: name.to_string(),
            users: members,
        });
        Ok(id)
    }

    pub fn set_group_members(&mut self, id: u64, members: Vec<String>) -> Result<()> {
        for login in &members {
            self.get(login)?;
        }
        let group = self
            .groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or(ExtractError::GroupNotFound(id))?;
        group.users = members;
        Ok(())
    }

    /// Remove a group that no process is assigned to.
    pub fn remove_unassigned_group(&mut self, root: &Path, id: u64) -> Result<UserGroup> {
        if let Some(p) = Process::list(root)?
            .into_iter()
            .find(|p| p.groups.contains(&id))
        {
            return Err(ExtractError::ProcessInUse(format!(
                "'{}' is assigned to group {id}",
                p.name
            )));
        }
        self.remove_group(id)
    }

    pub fn remove_group(&mut self, id: u64) -> Result<UserGroup> {
        let idx = self
            .groups
            .iter()
            .position(|g| g.id == id)
            .ok_or(ExtractError::GroupNotFound(id))?;
        Ok(self.groups.remove(idx))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init(dir: &TempDir) {
        State::new("test").save(dir.path()).unwrap();
    }

    #[test]
    fn add_rejects_duplicates_and_reserved_login() {
        let mut d = UserDirectory::default();
        d.add(User::new("jdoe", "John", "j@x.ch", Profile::Operator))
            .unwrap();
        assert!(matches!(
            d.add(User::new("JDOE", "Other", "", Profile::Admin)),
            Err(ExtractError::UserExists(_))
        ));
        assert!(matches!(
            d.add(User::new("system", "Sys", "", Profile::Admin)),
            Err(ExtractError::InvalidLogin(_))
        ));
        assert!(d.add(User::new("bad login", "x", "", Profile::Admin)).is_err());
    }

    #[test]
    fn mail_eligibility() {
        let mut u = User::new("a", "A", "a@x.ch", Profile::Operator);
        assert!(u.can_receive_mail());
        u.mail_active = false;
        assert!(!u.can_receive_mail());
        u.mail_active = true;
        u.email = " ".into();
        assert!(!u.can_receive_mail());
    }

    #[test]
    fn active_admins_skip_inactive_and_operators() {
        let mut d = UserDirectory::default();
        d.add(User::new("admin", "Admin", "a@x.ch", Profile::Admin))
            .unwrap();
        let mut off = User::new("old", "Old", "o@x.ch", Profile::Admin);
        off.active = false;
        d.add(off).unwrap();
        d.add(User::new("op", "Op", "op@x.ch", Profile::Operator))
            .unwrap();

        let logins: Vec<&str> = d.active_admins().iter().map(|u| u.login.as_str()).collect();
        assert_eq!(logins, vec!["admin"]);
    }

    #[test]
    fn groups_round_trip_and_member_removal() {
        let dir = TempDir::new().unwrap();
        init(&dir);
        let mut d = UserDirectory::load(dir.path()).unwrap();
        d.add(User::new("op1", "Op 1", "1@x.ch", Profile::Operator))
            .unwrap();
        d.add(User::new("op2", "Op 2", "2@x.ch", Profile::Operator))
            .unwrap();
        let gid = d
            .add_group(dir.path(), "Cadastre", vec!["op1".into(), "op2".into()])
            .unwrap();
        assert!(d.add_group(dir.path(), "Bad", vec!["ghost".into()]).is_err());
        d.save(dir.path()).unwrap();

        let mut d = UserDirectory::load(dir.path()).unwrap();
        d.remove("op1").unwrap();
        assert_eq!(d.group(gid).unwrap().users, vec!["op2".to_string()]);

        d.remove_group(gid).unwrap();
        assert!(matches!(d.group(gid), Err(ExtractError::GroupNotFound(_))));
    }

    #[test]
    fn checked_removal_keeps_assigned_users_and_last_admin() {
        let dir = TempDir::new().unwrap();
        init(&dir);
        let mut d = UserDirectory::default();
        d.add(User::new("admin", "Admin", "a@x.ch", Profile::Admin))
            .unwrap();
        d.add(User::new("op", "Op", "op@x.ch", Profile::Operator))
            .unwrap();
        let gid = d.add_group(dir.path(), "Team", vec!["op".into()]).unwrap();

        let mut process = Process::create(dir.path(), "Cadastre").unwrap();
        process.operators = vec!["OP".into()];
        process.groups = vec![gid];
        process.save(dir.path()).unwrap();

        assert!(matches!(
            d.remove_unassigned(dir.path(), "op"),
            Err(ExtractError::ProcessInUse(_))
        ));
        assert!(matches!(
            d.remove_unassigned_group(dir.path(), gid),
            Err(ExtractError::ProcessInUse(_))
        ));
        assert!(matches!(
            d.remove_unassigned(dir.path(), "admin"),
            Err(ExtractError::InvalidParameter(_))
        ));

        process.operators.clear();
        process.groups.clear();
        process.save(dir.path()).unwrap();
        assert_eq!(d.remove_unassigned(dir.path(), "op").unwrap().login, "op");
        assert_eq!(d.remove_unassigned_group(dir.path(), gid).unwrap().id, gid);
    }

    #[test]
    fn load_without_instance_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            UserDirectory::load(dir.path()),
            Err(ExtractError::NotInitialized)
        ));
    }
}
