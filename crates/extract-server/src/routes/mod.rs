pub mod connectors;
pub mod events;
pub mod plugins;
pub mod processes;
pub mod remarks;
pub mod requests;
pub mod settings;
pub mod state;
pub mod users;

use crate::error::AppError;

/// Login recorded when a web request does not name its user.
pub const WEB_USER: &str = "web";

/// Run store work on the blocking pool and lift its error into an [`AppError`].
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> extract_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let value = tokio::task::spawn_blocking(f)
        .await
        .map_err(AppError::join)??;
    Ok(value)
}
