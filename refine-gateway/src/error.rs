use r2e::prelude::*;
use r2e_macros::ApiError;

use crate::engine::EngineError;

/// Error taxonomy for the gateway's HTTP and WebSocket surfaces.
///
/// Every handler in this crate returns `Result<_, AppError>`; this is the
/// single translation point between internal failure modes and the wire.
#[derive(Debug, ApiError)]
pub enum AppError {
    #[error(status = UNAUTHORIZED, message = "{0}")]
    Unauthorized(String),

    #[error(status = FORBIDDEN, message = "{0}")]
    Forbidden(String),

    #[error(status = NOT_FOUND, message = "{0}")]
    NotFound(String),

    #[error(status = BAD_REQUEST, message = "{0}")]
    InvalidRequest(String),

    #[error(status = BAD_REQUEST, message = "{0}")]
    InvalidTransition(String),

    #[error(status = 503, message = "{0}")]
    EngineUnavailable(String),

    #[error(status = INTERNAL_SERVER_ERROR, message = "{0}")]
    Internal(String),

    #[error(transparent)]
    Security(#[from] r2e_security::SecurityError),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(format!("database error: {err}"))
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Tripped | EngineError::Unreachable(_) => {
                AppError::EngineUnavailable(err.to_string())
            }
            EngineError::Rejected(_) | EngineError::Malformed(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}
