use tower_sessions::Session;
use uuid::Uuid;

use super::session::SESSION_KEY_USER_ID;
use crate::error::AppError;

/// The user bound to the current session
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

/// Extracts the authenticated user ID from the session
pub async fn get_authenticated_user(session: &Session) -> Result<AuthenticatedUser, AppError> {
    let user_id: Uuid = session
        .get(SESSION_KEY_USER_ID)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session error: {}", e)))?
        .ok_or(AppError::Unauthorized)?;

    Ok(AuthenticatedUser { user_id })
}
