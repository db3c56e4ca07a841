use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use ipwarden_types::ips::{ErrorResponse, Rejection};
use uuid::Uuid;

use crate::assign::AssignmentError;
use crate::db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("{address}: {reason}")]
    Rejected {
        device_id: Uuid,
        location_id: Uuid,
        address: String,
        reason: Rejection,
    },

    #[error("internal server error")]
    Internal,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_)
            | Self::Rejected {
                reason: Rejection::Collision,
                ..
            } => StatusCode::CONFLICT,
            Self::Validation(_) | Self::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            Self::Rejected {
                device_id,
                location_id,
                address,
                reason,
            } => ErrorResponse {
                error: self.to_string(),
                device_id: Some(*device_id),
                location_id: Some(*location_id),
                address: Some(address.clone()),
                reason: Some(*reason),
            },
            _ => ErrorResponse::message(self.to_string()),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateLocationName
            | StoreError::DuplicateUsername
            | StoreError::DuplicateDeviceName => Self::Conflict(err.to_string()),
            StoreError::Database(_) => {
                tracing::error!(error = %err, "store error");
                Self::Internal
            }
        }
    }
}

impl From<AssignmentError> for ApiError {
    fn from(err: AssignmentError) -> Self {
        match err {
            AssignmentError::Rejected {
                device_id,
                location_id,
                address,
                reason,
            } => Self::Rejected {
                device_id,
                location_id,
                address,
                reason,
            },
            AssignmentError::LocationNotFound
            | AssignmentError::UserNotFound
            | AssignmentError::DeviceNotFound
            | AssignmentError::DeviceNotInLocation { .. } => Self::NotFound(err.to_string()),
            AssignmentError::PoolExhausted { .. }
            | AssignmentError::AlreadyMember { .. }
            | AssignmentError::TransactionConflict => Self::Conflict(err.to_string()),
            AssignmentError::DuplicateEntry { .. } | AssignmentError::Invalid(_) => {
                Self::Validation(err.to_string())
            }
            AssignmentError::Store(err) => err.into(),
        }
    }
}
