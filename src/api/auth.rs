use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_sessions::Session;

use crate::api::middleware::{
    auth::get_authenticated_user,
    session::{AppState, SESSION_KEY_USER_ID},
};
use crate::db;
use crate::error::{AppError, Result};
use crate::models::user::{CreateUserData, User};
use crate::services::password;

const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
}

impl RegisterRequest {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("Name is required".to_string()));
        }
        let email = self.email.trim();
        if email.len() < 3 || !email.contains('@') {
            return Err(AppError::Validation("A valid email is required".to_string()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
}

async fn start_session(session: &Session, user: &User) -> Result<()> {
    // New id on login to avoid session fixation
    session
        .cycle_id()
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session error: {}", e)))?;
    session
        .insert(SESSION_KEY_USER_ID, user.id)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session error: {}", e)))?;
    Ok(())
}

async fn register(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>)> {
    request.validate()?;

    let password_hash = password::hash_password(&request.password)
        .map_err(|e| AppError::Internal(e.into()))?;

    let user = User::create(
        &state.pool,
        CreateUserData {
            name: request.name.trim().to_string(),
            email: request.email.trim().to_string(),
            phone: request.phone.filter(|p| !p.trim().is_empty()),
            password_hash,
        },
    )
    .await
    .map_err(|e| {
        if db::is_unique_violation(&e) {
            AppError::Conflict("Email is already registered".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    start_session(&session, &user).await?;

    tracing::info!(user_id = %user.id, "User registered");

    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<LoginRequest>,
) -> Result<Json<User>> {
    let user = User::find_by_email(&state.pool, request.email.trim())
        .await?
        .filter(|u| password::verify_password(&request.password, &u.password_hash))
        .ok_or_else(|| {
            // Same answer whether the email or the password was wrong
            tracing::info!("Rejected login attempt");
            AppError::Unauthorized
        })?;

    start_session(&session, &user).await?;

    tracing::info!(user_id = %user.id, "User logged in");

    Ok(Json(user))
}

async fn logout(session: Session) -> Result<StatusCode> {
    session
        .flush()
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session error: {}", e)))?;

    Ok(StatusCode::NO_CONTENT)
}

async fn me(State(state): State<AppState>, session: Session) -> Result<Json<User>> {
    let auth = get_authenticated_user(&session).await?;

    let user = User::find_by_id(&state.pool, auth.user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    Ok(Json(user))
}

async fn update_me(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<User>> {
    let auth = get_authenticated_user(&session).await?;

    let name = request.name.map(|n| n.trim().to_string());
    if matches!(&name, Some(n) if n.is_empty()) {
        return Err(AppError::Validation("Name cannot be empty".to_string()));
    }

    let user = User::update_profile(&state.pool, auth.user_id, name, request.phone).await?;

    Ok(Json(user))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/me", get(me).patch(update_me))
}
