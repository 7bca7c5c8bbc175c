use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::User;

/// Looks a user up by email for the login path. `None` is not an error —
/// the controller maps it to the same 401 as a bad password.
pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, email, hashed_password, created_at FROM users WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, email, hashed_password, created_at FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

/// Fixture helper: users are otherwise owned externally — the gateway
/// never exposes a registration endpoint of its own.
pub async fn insert(pool: &PgPool, email: &str, hashed_password: &str) -> Result<User, AppError> {
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (email, hashed_password) VALUES ($1, $2) \
         RETURNING id, email, hashed_password, created_at",
    )
    .bind(email)
    .bind(hashed_password)
    .fetch_one(pool)
    .await?;
    Ok(user)
}
