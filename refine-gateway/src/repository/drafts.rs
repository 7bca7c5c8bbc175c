use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Draft;

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Draft>, AppError> {
    let draft = sqlx::query_as::<_, Draft>(
        "SELECT id, workflow_id, created_by_user_id, name, status, updated_at \
         FROM drafts WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(draft)
}

/// A workflow's refinement target when a request names only the workflow
/// (`POST /workflows/{id}/refinements`): the most recently updated draft.
/// Callers get `InvalidRequest` when a workflow has none.
pub async fn find_latest_for_workflow(
    pool: &PgPool,
    workflow_id: Uuid,
) -> Result<Option<Draft>, AppError> {
    let draft = sqlx::query_as::<_, Draft>(
        "SELECT id, workflow_id, created_by_user_id, name, status, updated_at \
         FROM drafts WHERE workflow_id = $1 ORDER BY updated_at DESC LIMIT 1",
    )
    .bind(workflow_id)
    .fetch_optional(pool)
    .await?;
    Ok(draft)
}

/// Fixture helper: drafts are owned externally to the gateway.
pub async fn insert(
    pool: &PgPool,
    workflow_id: Uuid,
    created_by_user_id: Uuid,
    name: &str,
) -> Result<Draft, AppError> {
    let draft = sqlx::query_as::<_, Draft>(
        "INSERT INTO drafts (workflow_id, created_by_user_id, name) VALUES ($1, $2, $3) \
         RETURNING id, workflow_id, created_by_user_id, name, status, updated_at",
    )
    .bind(workflow_id)
    .bind(created_by_user_id)
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(draft)
}
