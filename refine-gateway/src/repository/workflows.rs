use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Workflow;

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Workflow>, AppError> {
    let workflow = sqlx::query_as::<_, Workflow>(
        "SELECT id, name, description, created_by_user_id, created_at \
         FROM workflows WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(workflow)
}

/// Fixture helper: workflows are owned externally to the gateway, so
/// nothing but tests creates one directly.
pub async fn insert(
    pool: &PgPool,
    name: &str,
    description: Option<&str>,
    created_by_user_id: Uuid,
) -> Result<Workflow, AppError> {
    let workflow = sqlx::query_as::<_, Workflow>(
        "INSERT INTO workflows (name, description, created_by_user_id) VALUES ($1, $2, $3) \
         RETURNING id, name, description, created_by_user_id, created_at",
    )
    .bind(name)
    .bind(description)
    .bind(created_by_user_id)
    .fetch_one(pool)
    .await?;
    Ok(workflow)
}
