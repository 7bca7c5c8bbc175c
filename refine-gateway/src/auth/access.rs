use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

/// Workflow access check: the user must own the workflow.
///
/// Missing workflow and wrong owner are folded into the same `Forbidden`
/// outcome so a caller cannot distinguish "doesn't exist" from "not yours".
pub async fn require_workflow_access(
    pool: &PgPool,
    workflow_id: Uuid,
    user_id: Uuid,
) -> Result<(), AppError> {
    let owner: Option<(Uuid,)> =
        sqlx::query_as("SELECT created_by_user_id FROM workflows WHERE id = $1")
            .bind(workflow_id)
            .fetch_optional(pool)
            .await?;

    match owner {
        Some((owner_id,)) if owner_id == user_id => Ok(()),
        _ => Err(AppError::Forbidden("workflow not accessible".into())),
    }
}

/// Proposal access check: `proposal_access` is the sole source of truth, not
/// the proposal's `created_by_user_id` column.
pub async fn require_proposal_access(
    pool: &PgPool,
    proposal_id: Uuid,
    user_id: Uuid,
) -> Result<(), AppError> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        "SELECT proposal_id FROM proposal_access WHERE proposal_id = $1 AND user_id = $2",
    )
    .bind(proposal_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(_) => Ok(()),
        None => Err(AppError::Forbidden("proposal not accessible".into())),
    }
}

/// Owner check behind the thread-bound WebSocket gate: joins `proposals` to
/// `drafts` and compares against the draft's owner. An unknown thread and a
/// known-but-foreign thread both resolve to the same `Forbidden`.
pub async fn require_thread_owner(
    pool: &PgPool,
    thread_id: &str,
    user_id: Uuid,
) -> Result<(), AppError> {
    let owner: Option<(Uuid,)> = sqlx::query_as(
        "SELECT d.created_by_user_id \
         FROM proposals p JOIN drafts d ON d.id = p.draft_id \
         WHERE p.thread_id = $1",
    )
    .bind(thread_id)
    .fetch_optional(pool)
    .await?;

    match owner {
        Some((owner_id,)) if owner_id == user_id => Ok(()),
        _ => Err(AppError::Forbidden("refinement session not accessible".into())),
    }
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;

    use super::*;

    async fn make_user(pool: &PgPool) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (id, email, hashed_password) VALUES ($1, $2, 'x')")
            .bind(id)
            .bind(format!("{id}@example.com"))
            .execute(pool)
            .await
            .unwrap();
        id
    }

    async fn make_workflow(pool: &PgPool, owner: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO workflows (id, name, created_by_user_id) VALUES ($1, 'wf', $2)")
            .bind(id)
            .bind(owner)
            .execute(pool)
            .await
            .unwrap();
        id
    }

    async fn make_draft(pool: &PgPool, workflow_id: Uuid, owner: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO drafts (id, workflow_id, created_by_user_id, name) VALUES ($1, $2, $3, 'd')",
        )
        .bind(id)
        .bind(workflow_id)
        .bind(owner)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    async fn make_proposal(pool: &PgPool, draft_id: Uuid, creator: Uuid, thread_id: &str) -> Uuid {
        let row: (Uuid,) = sqlx::query_as(
            "INSERT INTO proposals (draft_id, created_by_user_id, thread_id, user_prompt) \
             VALUES ($1, $2, $3, 'prompt') RETURNING id",
        )
        .bind(draft_id)
        .bind(creator)
        .bind(thread_id)
        .fetch_one(pool)
        .await
        .unwrap();
        row.0
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn workflow_access_allows_the_owner(pool: PgPool) {
        let owner = make_user(&pool).await;
        let workflow_id = make_workflow(&pool, owner).await;
        require_workflow_access(&pool, workflow_id, owner).await.unwrap();
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn workflow_access_forbids_a_non_owner(pool: PgPool) {
        let owner = make_user(&pool).await;
        let intruder = make_user(&pool).await;
        let workflow_id = make_workflow(&pool, owner).await;
        let err = require_workflow_access(&pool, workflow_id, intruder).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn workflow_access_forbids_a_nonexistent_workflow(pool: PgPool) {
        let someone = make_user(&pool).await;
        let err = require_workflow_access(&pool, Uuid::new_v4(), someone).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn proposal_access_is_driven_by_the_access_table_not_the_creator_column(pool: PgPool) {
        let creator = make_user(&pool).await;
        let viewer = make_user(&pool).await;
        let workflow_id = make_workflow(&pool, creator).await;
        let draft_id = make_draft(&pool, workflow_id, creator).await;
        let proposal_id = make_proposal(&pool, draft_id, creator, "thread-a").await;

        // The creator has no row in proposal_access in this fixture, only a
        // grant for `viewer` — access must still be denied to the creator.
        sqlx::query(
            "INSERT INTO proposal_access (proposal_id, user_id, access_type) VALUES ($1, $2, 'viewer')",
        )
        .bind(proposal_id)
        .bind(viewer)
        .execute(&pool)
        .await
        .unwrap();

        require_proposal_access(&pool, proposal_id, viewer).await.unwrap();
        let err = require_proposal_access(&pool, proposal_id, creator).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn thread_owner_check_follows_the_drafts_owner_not_the_proposal_creator(pool: PgPool) {
        let draft_owner = make_user(&pool).await;
        let other_creator = make_user(&pool).await;
        let workflow_id = make_workflow(&pool, draft_owner).await;
        let draft_id = make_draft(&pool, workflow_id, draft_owner).await;
        make_proposal(&pool, draft_id, other_creator, "thread-b").await;

        require_thread_owner(&pool, "thread-b", draft_owner).await.unwrap();
        let err = require_thread_owner(&pool, "thread-b", other_creator).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn thread_owner_check_forbids_unknown_thread(pool: PgPool) {
        let someone = make_user(&pool).await;
        let err = require_thread_owner(&pool, "no-such-thread", someone).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
