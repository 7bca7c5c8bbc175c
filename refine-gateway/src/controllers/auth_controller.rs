use argon2::{Argon2, PasswordHash, PasswordVerifier};
use r2e::prelude::*;
use sqlx::PgPool;

use crate::auth::token;
use crate::config::AuthConfig;
use crate::models::{LoginRequest, LoginResponse};
use crate::repository;
use crate::state::AppState;

/// The only unauthenticated endpoint on the gateway.
#[derive(Controller)]
#[controller(state = AppState)]
pub struct AuthController {
    #[inject]
    pool: PgPool,

    #[config("auth.signing_secret")]
    signing_secret: String,

    #[config("auth.default_ttl")]
    default_ttl: i64,
}

#[routes]
impl AuthController {
    #[post("/auth/login")]
    async fn login(
        &self,
        Json(body): Json<LoginRequest>,
    ) -> Result<Json<LoginResponse>, AppError> {
        let user = repository::users::find_by_email(&self.pool, &body.email)
            .await?
            .ok_or_else(|| AppError::Unauthorized("invalid email or password".into()))?;

        let hash = user.hashed_password.clone();
        let password = body.password.clone();
        let verified = tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&hash)?;
            Argon2::default().verify_password(password.as_bytes(), &parsed)
        })
        .await
        .map_err(|e| AppError::Internal(format!("password verification task panicked: {e}")))?;

        verified.map_err(|_| AppError::Unauthorized("invalid email or password".into()))?;

        let config = AuthConfig {
            signing_secret: self.signing_secret.clone(),
            default_ttl: self.default_ttl,
        };
        let token = token::issue(user.id, &user.email, &config)?;

        Ok(Json(LoginResponse {
            token,
            user_id: user.id,
        }))
    }
}
