use axum::extract::{Path, State};
use axum::Json;
use extract_core::types::Profile;
use extract_core::user::{User, UserDirectory};
use serde::Deserialize;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// GET /api/users
pub async fn list_users(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let directory = UserDirectory::load(&root)?;
        Ok(serde_json::json!(directory.users))
    })
    .await?;

    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct CreateUserBody {
    pub login: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub mail_active: Option<bool>,
    #[serde(default)]
    pub locale: Option<String>,
}

/// POST /api/users: add a user. Profile defaults to `operator`.
pub async fn create_user(
    State(app): State<AppState>,
    Json(body): Json<CreateUserBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let profile = match body.profile.as_deref() {
        Some(p) => p.parse::<Profile>()?,
        None => Profile::Operator,
    };
    let mut user = User::new(&body.login, &body.name, &body.email, profile);
    if let Some(active) = body.active {
        user.active = active;
    }
    if let Some(mail_active) = body.mail_active {
        user.mail_active = mail_active;
    }
    if let Some(locale) = body.locale {
        user.locale = locale;
    }

    let root = app.root.clone();
    let result = blocking(move || {
        let mut directory = UserDirectory::load(&root)?;
        directory.add(user.clone())?;
        directory.save(&root)?;
        tracing::info!(login = %user.login, profile = %user.profile, "user added");
        Ok(serde_json::json!(user))
    })
    .await?;

    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct UpdateUserBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub mail_active: Option<bool>,
    #[serde(default)]
    pub locale: Option<String>,
}

/// PUT /api/users/:login
pub async fn update_user(
    State(app): State<AppState>,
    Path(login): Path<String>,
    Json(body): Json<UpdateUserBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let profile = match body.profile.as_deref() {
        Some(p) => Some(p.parse::<Profile>()?),
        None => None,
    };
    let root = app.root.clone();
    let result = blocking(move || {
        let mut directory = UserDirectory::load(&root)?;
        let mut user = directory.get(&login)?.clone();
        if let Some(name) = body.name {
            user.name = name;
        }
        if let Some(email) = body.email {
            user.email = email;
        }
        if let Some(profile) = profile {
            user.profile = profile;
        }
        if let Some(active) = body.active {
            user.active = active;
        }
        if let Some(mail_active) = body.mail_active {
            user.mail_active = mail_active;
        }
        if let Some(locale) = body.locale {
            user.locale = locale;
        }
        directory.update(user.clone())?;
        directory.ensure_admin()?;
        directory.save(&root)?;
        Ok(serde_json::json!(user))
    })
    .await?;

    Ok(Json(result))
}

/// DELETE /api/users/:login: refused for the last administrator and for
/// operators still assigned to a process.
pub async fn delete_user(
    State(app): State<AppState>,
    Path(login): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let mut directory = UserDirectory::load(&root)?;
        let user = directory.remove_unassigned(&root, &login)?;
        directory.save(&root)?;
        tracing::info!(login = %user.login, "user removed");
        Ok(serde_json::json!({ "deleted": user.login }))
    })
    .await?;

    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// GET /api/groups
pub async fn list_groups(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let result = blocking(move || {
        let directory = UserDirectory::load(&root)?;
        Ok(serde_json::json!(directory.groups))
    })
    .await?;

    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct CreateGroupBody {
    pub name: String,
    #[serde(default)]
    pub users: Vec<String>,
}

/// POST /api/groups: create a group of existing users.
pub async fn create_group(
    State(app): State<AppState>,
    Json(body): Json<CreateGroupBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::bad_request("group name cannot be empty"));
    }
    let root = app.root.clone();
    let result = blocking(move || {
        let mut directory = UserDirectory::load(&root)?;
        let id = directory.add_group(&root, body.name.trim(), body.users)?;
        directory.save(&root)?;
        Ok(serde_json::json!(directory.group(id)?))
    })
    .await?;

    Ok(Json(result))
}

/// DELETE /api/groups/:id: refused while a process is assigned to the group.
pub async fn delete_group(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    blocking(move || {
        let mut directory = UserDirectory::load(&root)?;
        directory.remove_unassigned_group(&root, id)?;
        directory.save(&root)
    })
    .await?;

    Ok(Json(serde_json::json!({ "deleted": id })))
}
