use std::sync::Arc;

use r2e_core::http::extract::{FromRef, FromRequestParts, Path};
use r2e_core::http::header::{Parts, AUTHORIZATION};
use r2e_security::JwtClaimsValidator;
use sqlx::PgPool;
use uuid::Uuid;

use super::{access, token};
use crate::error::AppError;

/// Result of the authorization gate in front of `/ws/refinements/{thread_id}`.
///
/// Used as a handler parameter *before* the `WsStream` parameter: a
/// rejection here prevents the upgrade entirely, which is what "only after
/// all three [gate] checks pass is the connection upgraded" requires.
pub struct RefinementSessionAuth {
    pub thread_id: String,
    pub user_id: Uuid,
}

impl<S> FromRequestParts<S> for RefinementSessionAuth
where
    S: Send + Sync,
    PgPool: FromRef<S>,
    Arc<JwtClaimsValidator>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(thread_id) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

        let credential = extract_credential(parts)?;

        let validator = Arc::<JwtClaimsValidator>::from_ref(state);
        let user_id = token::validate(&validator, &credential)
            .await
            .map_err(|_| AppError::Unauthorized("invalid or expired token".into()))?;

        let pool = PgPool::from_ref(state);
        access::require_thread_owner(&pool, &thread_id, user_id).await?;

        Ok(RefinementSessionAuth { thread_id, user_id })
    }
}

/// Accepts a bearer credential from either a `token` query parameter or an
/// `Authorization: Bearer …` header. Neither present is an `Unauthorized`,
/// not a `Forbidden` — the caller never reached authorization.
fn extract_credential(parts: &Parts) -> Result<String, AppError> {
    if let Some(query) = parts.uri.query() {
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            if key == "token" && !value.is_empty() {
                return Ok(value.into_owned());
            }
        }
    }

    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing credential".into()))?;

    header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| AppError::Unauthorized("malformed authorization header".into()))
}
