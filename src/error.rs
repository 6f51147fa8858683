use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::access_credential::CredentialError;
use crate::services::booking::BookingError;
use crate::services::payment_processor::PaymentError;
use crate::services::slot_availability::SlotError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Machine-readable error kind included in every error body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Unavailable(_) => "unavailable",
            AppError::Unauthorized => "unauthorized",
            AppError::ExternalService(_) => "external_service_error",
            AppError::Database(_) | AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::Unavailable(_) => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Server-side failures are logged in full and answered generically.
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error while handling request");
                "Internal server error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "Unexpected error while handling request");
                "Internal server error".to_string()
            }
            AppError::ExternalService(detail) => {
                tracing::error!(error = %detail, "External service failure");
                "Payment provider unavailable, please try again".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.kind(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<SlotError> for AppError {
    fn from(e: SlotError) -> Self {
        match e {
            SlotError::InvalidDate => AppError::Validation(e.to_string()),
            SlotError::LocationNotFound => AppError::NotFound(e.to_string()),
            SlotError::LocationUnavailable => AppError::Unavailable(e.to_string()),
            SlotError::DatabaseError(e) => AppError::Database(e),
        }
    }
}

impl From<BookingError> for AppError {
    fn from(e: BookingError) -> Self {
        match e {
            BookingError::DatabaseError(e) => AppError::Database(e),
            BookingError::PetNotFound
            | BookingError::LocationNotFound
            | BookingError::AppointmentNotFound => AppError::NotFound(e.to_string()),
            BookingError::InvalidStartTime(_)
            | BookingError::SlotInPast
            | BookingError::InvalidAmount => AppError::Validation(e.to_string()),
            BookingError::SlotUnavailable | BookingError::AlreadyCancelled => {
                AppError::Conflict(e.to_string())
            }
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::DatabaseError(e) => AppError::Database(e),
            PaymentError::GatewayError(e) => AppError::ExternalService(e.to_string()),
            PaymentError::CredentialError(e) => AppError::Internal(e.into()),
            PaymentError::AppointmentNotFound | PaymentError::PaymentNotFound => {
                AppError::NotFound(e.to_string())
            }
            PaymentError::AppointmentCancelled | PaymentError::AlreadyPaid => {
                AppError::Conflict(e.to_string())
            }
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(e: CredentialError) -> Self {
        AppError::Internal(e.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
