use r2e::r2e_data::{Page, Pageable};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ProposalRow, ProposalView};

const COLUMNS: &str = "id, draft_id, created_by_user_id, thread_id, user_prompt, \
     context_file_path, context_selection, generated_files, status, created_at, \
     completed_at, resolved_by_user_id, resolved_at, ai_generated_content";

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<ProposalRow>, AppError> {
    let row = sqlx::query_as::<_, ProposalRow>(&format!(
        "SELECT {COLUMNS} FROM proposals WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn find_by_thread_id(
    pool: &PgPool,
    thread_id: &str,
) -> Result<Option<ProposalRow>, AppError> {
    let row = sqlx::query_as::<_, ProposalRow>(&format!(
        "SELECT {COLUMNS} FROM proposals WHERE thread_id = $1"
    ))
    .bind(thread_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// A paginated projection of a workflow's proposals, joined through the
/// owning draft since proposals don't carry a `workflow_id` column
/// directly.
pub async fn list_for_workflow(
    pool: &PgPool,
    workflow_id: Uuid,
    pageable: &Pageable,
) -> Result<Page<ProposalView>, AppError> {
    let offset = pageable.offset();

    let total: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM proposals p JOIN drafts d ON d.id = p.draft_id \
         WHERE d.workflow_id = $1",
    )
    .bind(workflow_id)
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query_as::<_, ProposalRow>(&format!(
        "SELECT p.id, p.draft_id, p.created_by_user_id, p.thread_id, p.user_prompt, \
         p.context_file_path, p.context_selection, p.generated_files, p.status, \
         p.created_at, p.completed_at, p.resolved_by_user_id, p.resolved_at, \
         p.ai_generated_content \
         FROM proposals p JOIN drafts d ON d.id = p.draft_id \
         WHERE d.workflow_id = $1 \
         ORDER BY p.created_at DESC LIMIT $2 OFFSET $3"
    ))
    .bind(workflow_id)
    .bind(pageable.size as i64)
    .bind(offset as i64)
    .fetch_all(pool)
    .await?;

    let views: Vec<ProposalView> = rows.into_iter().map(ProposalView::from).collect();
    Ok(Page::new(views, pageable, total.0 as u64))
}
