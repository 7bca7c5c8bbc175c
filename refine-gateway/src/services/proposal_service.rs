use std::sync::Arc;
use std::time::Duration;

use r2e::prelude::*;
use sqlx::types::Json as SqlxJson;
use sqlx::PgPool;
use uuid::Uuid;

use crate::engine::{EngineClient, EngineError, JobInputPayload, JobMessage, JobRequest};
use crate::error::AppError;
use crate::models::{
    ApproveResponse, CreateRefinementRequest, CreateRefinementResponse, GeneratedFiles,
    ProposalRow, ProposalStatus, ProposalView, RejectResponse,
};
use crate::repository;

use super::draft_service;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

const PROPOSAL_COLUMNS: &str = "id, draft_id, created_by_user_id, thread_id, user_prompt, \
     context_file_path, context_selection, generated_files, status, created_at, \
     completed_at, resolved_by_user_id, resolved_at, ai_generated_content";

/// Transactional proposal lifecycle: create, approve, reject, query.
///
/// Holds its own `PgPool` rather than going through the `#[managed] Tx`
/// handler helper, because `approve_proposal`/`reject_proposal` need a row
/// lock to span the whole method body, not just one HTTP handler's scope.
#[derive(Clone)]
pub struct ProposalService {
    pool: PgPool,
    engine_client: Arc<dyn EngineClient>,
}

#[bean]
impl ProposalService {
    pub fn new(pool: PgPool, engine_client: Arc<dyn EngineClient>) -> Self {
        Self { pool, engine_client }
    }

    /// Health-checks the engine, invokes it for a fresh `thread_id`, then
    /// inserts the `processing` proposal and its owner access row in one
    /// transaction.
    pub async fn create_refinement(
        &self,
        draft_id: Uuid,
        user_id: Uuid,
        req: &CreateRefinementRequest,
    ) -> Result<CreateRefinementResponse, AppError> {
        if !self.engine_client.is_healthy().await {
            return Err(AppError::EngineUnavailable(
                "refinement engine is not healthy".into(),
            ));
        }

        let thread_id = self.invoke_with_retry(req).await?;

        match self.insert_proposal(draft_id, user_id, &thread_id, req).await {
            Ok(row) => Ok(CreateRefinementResponse {
                proposal_id: row.id,
                thread_id: thread_id.clone(),
                status: "processing",
                websocket_url: format!("/ws/refinements/{thread_id}"),
                created_at: row.created_at.to_rfc3339(),
            }),
            Err(err) => {
                // Invoke already succeeded; the transaction failed after the
                // fact. Best-effort engine cleanup, never re-thrown past
                // whatever error the transaction produced.
                if let Err(cleanup_err) = self.engine_client.cleanup(&thread_id).await {
                    tracing::warn!(
                        thread_id = %thread_id,
                        error = %cleanup_err,
                        "engine cleanup after failed proposal insert also failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn insert_proposal(
        &self,
        draft_id: Uuid,
        user_id: Uuid,
        thread_id: &str,
        req: &CreateRefinementRequest,
    ) -> Result<ProposalRow, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ProposalRow>(&format!(
            "INSERT INTO proposals \
             (draft_id, created_by_user_id, thread_id, user_prompt, context_file_path, context_selection, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'processing') \
             RETURNING {PROPOSAL_COLUMNS}"
        ))
        .bind(draft_id)
        .bind(user_id)
        .bind(thread_id)
        .bind(&req.user_prompt)
        .bind(&req.context_file_path)
        .bind(req.context_selection.clone().map(SqlxJson))
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO proposal_access (proposal_id, user_id, access_type) VALUES ($1, $2, 'owner')",
        )
        .bind(row.id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    /// Retries a transient invoke failure up to 3 attempts total, with
    /// exponential backoff from a 200ms base capped at ~2s. A tripped
    /// breaker short-circuits immediately instead of retrying.
    async fn invoke_with_retry(&self, req: &CreateRefinementRequest) -> Result<String, AppError> {
        let job = JobRequest {
            trace_id: Uuid::new_v4().to_string(),
            job_id: Uuid::new_v4().to_string(),
            agent_definition: "refinement".to_string(),
            input_payload: JobInputPayload {
                messages: vec![JobMessage {
                    role: "user".to_string(),
                    content: req.user_prompt.clone(),
                }],
                context_file_path: req.context_file_path.clone(),
                context_selection: req.context_selection.clone(),
            },
        };

        let mut delay = RETRY_BASE_DELAY;
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.engine_client.invoke(job.clone()).await {
                Ok(thread_id) => return Ok(thread_id),
                Err(EngineError::Tripped) => return Err(AppError::EngineUnavailable(
                    "refinement engine circuit breaker is open".into(),
                )),
                Err(err) if attempt == RETRY_ATTEMPTS => return Err(AppError::from(err)),
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "engine invoke failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RETRY_MAX_DELAY);
                }
            }
        }
        unreachable!("loop always returns by the final attempt")
    }

    /// Read-only projection of a proposal for `GET /proposals/{id}`.
    pub async fn get_proposal(&self, proposal_id: Uuid) -> Result<ProposalView, AppError> {
        let row = repository::proposals::find_by_id(&self.pool, proposal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("proposal {proposal_id} not found")))?;
        Ok(ProposalView::from(row))
    }

    /// Locks the proposal row, validates the `completed → approved`
    /// transition, applies any generated files to the draft, and records
    /// the resolution — all under one transaction.
    pub async fn approve_proposal(
        &self,
        proposal_id: Uuid,
        user_id: Uuid,
    ) -> Result<ApproveResponse, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ProposalRow>(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE id = $1 FOR UPDATE"
        ))
        .bind(proposal_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("proposal {proposal_id} not found")))?;

        let status = parse_status(&row.status)?;
        if status != ProposalStatus::Completed {
            return Err(AppError::InvalidTransition(format!(
                "cannot approve a proposal in state {status}"
            )));
        }

        if !row.generated_files.0.is_empty() {
            draft_service::apply_generated_files(&mut tx, row.draft_id, &row.generated_files.0)
                .await?;
        }

        let now = chrono::Utc::now();
        append_resolution(&mut tx, proposal_id, "approved", user_id, now, "approved").await?;
        tx.commit().await?;

        self.spawn_cleanup(row.thread_id);

        Ok(ApproveResponse {
            proposal_id,
            approved_at: now.to_rfc3339(),
            message: "proposal approved",
        })
    }

    /// Same locking/audit discipline as [`Self::approve_proposal`], but
    /// never touches the draft.
    pub async fn reject_proposal(
        &self,
        proposal_id: Uuid,
        user_id: Uuid,
    ) -> Result<RejectResponse, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ProposalRow>(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE id = $1 FOR UPDATE"
        ))
        .bind(proposal_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("proposal {proposal_id} not found")))?;

        let status = parse_status(&row.status)?;
        if !matches!(
            status,
            ProposalStatus::Processing | ProposalStatus::Completed | ProposalStatus::Failed
        ) {
            return Err(AppError::InvalidTransition(format!(
                "cannot reject a proposal in state {status}"
            )));
        }

        let now = chrono::Utc::now();
        append_resolution(&mut tx, proposal_id, "rejected", user_id, now, "rejected").await?;
        tx.commit().await?;

        self.spawn_cleanup(row.thread_id);

        Ok(RejectResponse {
            proposal_id,
            message: "proposal rejected",
        })
    }

    /// Engine-side cleanup runs detached from the resolving request — by
    /// the time it matters the HTTP response has already been sent.
    fn spawn_cleanup(&self, thread_id: Option<String>) {
        let Some(thread_id) = thread_id else { return };
        let engine_client = self.engine_client.clone();
        tokio::spawn(async move {
            if let Err(e) = engine_client.cleanup(&thread_id).await {
                tracing::warn!(thread_id = %thread_id, error = %e, "post-resolution engine cleanup failed");
            }
        });
    }
}

fn parse_status(raw: &str) -> Result<ProposalStatus, AppError> {
    raw.parse()
        .map_err(|e: String| AppError::Internal(format!("corrupt proposal status: {e}")))
}

async fn append_resolution(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    proposal_id: Uuid,
    new_status: &str,
    user_id: Uuid,
    now: chrono::DateTime<chrono::Utc>,
    action: &str,
) -> Result<(), AppError> {
    let audit_entry = serde_json::json!([{
        "action": action,
        "user_id": user_id,
        "timestamp": now.to_rfc3339(),
    }]);

    sqlx::query(
        "UPDATE proposals SET status = $1, resolved_by_user_id = $2, resolved_at = $3, \
         ai_generated_content = jsonb_set( \
             coalesce(ai_generated_content, '{}'::jsonb), \
             '{audit_trail}', \
             coalesce(ai_generated_content -> 'audit_trail', '[]'::jsonb) || $4::jsonb, \
             true \
         ) \
         WHERE id = $5",
    )
    .bind(new_status)
    .bind(user_id)
    .bind(now)
    .bind(audit_entry)
    .bind(proposal_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Runs from the WebSocket proxy's detached task after the engine's `end`
/// event. Guarded by status so a late write never regresses an
/// already-resolved proposal.
pub async fn write_terminal_snapshot(
    pool: &PgPool,
    thread_id: &str,
    generated_files: &GeneratedFiles,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE proposals SET generated_files = $1, status = 'completed', completed_at = now() \
         WHERE thread_id = $2 AND status IN ('processing', 'pending', 'failed')",
    )
    .bind(SqlxJson(generated_files))
    .bind(thread_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Runs from the WebSocket proxy's detached task after a transport error
/// on the engine side while the session was not yet terminal.
pub async fn write_failed_status(
    pool: &PgPool,
    thread_id: &str,
    error_message: &str,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE proposals SET status = 'failed', \
         ai_generated_content = jsonb_set(coalesce(ai_generated_content, '{}'::jsonb), '{error}', $1::jsonb, true) \
         WHERE thread_id = $2 AND status IN ('processing', 'pending')",
    )
    .bind(serde_json::Value::String(error_message.to_string()))
    .bind(thread_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use super::*;
    use crate::engine::ExecutionState;

    /// Stand-in for the real HTTP/WS engine client. Tests configure the
    /// knobs they need (health, invoke failures) rather than hitting a
    /// transport, per the trait's own "tests substitute a fake
    /// implementation" contract.
    struct FakeEngineClient {
        healthy: bool,
        invoke_failures_then_ok: AtomicU32,
        cleanup_calls: Mutex<Vec<String>>,
    }

    impl FakeEngineClient {
        fn healthy() -> Self {
            Self {
                healthy: true,
                invoke_failures_then_ok: AtomicU32::new(0),
                cleanup_calls: Mutex::new(Vec::new()),
            }
        }

        fn unhealthy() -> Self {
            Self {
                healthy: false,
                ..Self::healthy()
            }
        }

        fn failing_then_ok(failures: u32) -> Self {
            Self {
                invoke_failures_then_ok: AtomicU32::new(failures),
                ..Self::healthy()
            }
        }
    }

    impl EngineClient for FakeEngineClient {
        async fn invoke(&self, _request: JobRequest) -> Result<String, EngineError> {
            if self.invoke_failures_then_ok.load(Ordering::SeqCst) > 0 {
                self.invoke_failures_then_ok.fetch_sub(1, Ordering::SeqCst);
                return Err(EngineError::Unreachable("simulated transport failure".into()));
            }
            Ok(format!("thread-{}", Uuid::new_v4()))
        }

        async fn stream(
            &self,
            _thread_id: &str,
        ) -> Result<(mpsc::Receiver<crate::engine::StreamItem>, crate::engine::EngineSink), EngineError>
        {
            let (_client_tx, client_rx) = mpsc::channel(1);
            let (engine_tx, _engine_rx) = mpsc::channel(1);
            Ok((client_rx, crate::engine::EngineSink { tx: engine_tx }))
        }

        async fn get_state(&self, thread_id: &str) -> Result<ExecutionState, EngineError> {
            Ok(ExecutionState {
                thread_id: thread_id.to_string(),
                status: crate::engine::ExecutionStatus::Running,
                result: None,
                generated_files: None,
                error: None,
            })
        }

        async fn is_healthy(&self) -> bool {
            self.healthy
        }

        async fn cleanup(&self, thread_id: &str) -> Result<(), EngineError> {
            self.cleanup_calls.lock().unwrap().push(thread_id.to_string());
            Ok(())
        }
    }

    impl FakeEngineClient {
        fn cleaned_up_threads(&self) -> Vec<String> {
            self.cleanup_calls.lock().unwrap().clone()
        }
    }

    struct Fixture {
        user_id: Uuid,
        draft_id: Uuid,
    }

    async fn seed(pool: &PgPool) -> Fixture {
        let user_id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (id, email, hashed_password) VALUES ($1, $2, 'x')")
            .bind(user_id)
            .bind(format!("{user_id}@example.com"))
            .execute(pool)
            .await
            .unwrap();

        let workflow_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO workflows (id, name, created_by_user_id) VALUES ($1, 'wf', $2)",
        )
        .bind(workflow_id)
        .bind(user_id)
        .execute(pool)
        .await
        .unwrap();

        let draft_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO drafts (id, workflow_id, created_by_user_id, name) VALUES ($1, $2, $3, 'draft')",
        )
        .bind(draft_id)
        .bind(workflow_id)
        .bind(user_id)
        .execute(pool)
        .await
        .unwrap();

        Fixture { user_id, draft_id }
    }

    async fn seed_proposal(pool: &PgPool, fx: &Fixture, status: &str) -> Uuid {
        let row: (Uuid,) = sqlx::query_as(
            "INSERT INTO proposals (draft_id, created_by_user_id, thread_id, user_prompt, status) \
             VALUES ($1, $2, $3, 'refine this', $4) RETURNING id",
        )
        .bind(fx.draft_id)
        .bind(fx.user_id)
        .bind(format!("thread-{}", Uuid::new_v4()))
        .bind(status)
        .fetch_one(pool)
        .await
        .unwrap();
        row.0
    }

    fn request() -> CreateRefinementRequest {
        CreateRefinementRequest {
            user_prompt: "refine this".into(),
            context_file_path: None,
            context_selection: None,
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn create_refinement_inserts_processing_proposal_and_owner_access(pool: PgPool) {
        let fx = seed(&pool).await;
        let engine: Arc<dyn EngineClient> = Arc::new(FakeEngineClient::healthy());
        let service = ProposalService::new(pool.clone(), engine);

        let resp = service
            .create_refinement(fx.draft_id, fx.user_id, &request())
            .await
            .unwrap();

        assert_eq!(resp.status, "processing");

        let row = repository::proposals::find_by_id(&pool, resp.proposal_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "processing");
        assert_eq!(row.thread_id.as_deref(), Some(resp.thread_id.as_str()));

        let access: (String,) = sqlx::query_as(
            "SELECT access_type FROM proposal_access WHERE proposal_id = $1 AND user_id = $2",
        )
        .bind(resp.proposal_id)
        .bind(fx.user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(access.0, "owner");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn create_refinement_rejects_when_engine_unhealthy(pool: PgPool) {
        let fx = seed(&pool).await;
        let engine: Arc<dyn EngineClient> = Arc::new(FakeEngineClient::unhealthy());
        let service = ProposalService::new(pool.clone(), engine);

        let err = service
            .create_refinement(fx.draft_id, fx.user_id, &request())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EngineUnavailable(_)));

        let count: (i64,) = sqlx::query_as("SELECT count(*) FROM proposals")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn create_refinement_retries_transient_failures_then_succeeds(pool: PgPool) {
        let fx = seed(&pool).await;
        let engine: Arc<dyn EngineClient> = Arc::new(FakeEngineClient::failing_then_ok(2));
        let service = ProposalService::new(pool.clone(), engine);

        let resp = service
            .create_refinement(fx.draft_id, fx.user_id, &request())
            .await
            .unwrap();
        assert_eq!(resp.status, "processing");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn create_refinement_cleans_up_engine_session_when_insert_fails(pool: PgPool) {
        let fx = seed(&pool).await;
        let engine = Arc::new(FakeEngineClient::healthy());
        let service = ProposalService::new(pool.clone(), engine.clone() as Arc<dyn EngineClient>);

        // A draft id with no matching row violates the FK constraint, so the
        // transaction fails after the engine invoke already succeeded.
        let bogus_draft_id = Uuid::new_v4();
        let err = service
            .create_refinement(bogus_draft_id, fx.user_id, &request())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(engine.cleaned_up_threads().len(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn approve_proposal_rejects_non_completed_status(pool: PgPool) {
        let fx = seed(&pool).await;
        let proposal_id = seed_proposal(&pool, &fx, "processing").await;
        let engine: Arc<dyn EngineClient> = Arc::new(FakeEngineClient::healthy());
        let service = ProposalService::new(pool.clone(), engine);

        let err = service
            .approve_proposal(proposal_id, fx.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn approve_proposal_applies_generated_files_and_marks_approved(pool: PgPool) {
        let fx = seed(&pool).await;
        let proposal_id = seed_proposal(&pool, &fx, "completed").await;

        let files = serde_json::json!({
            "spec.md": { "content": ["# Title", "body"] }
        });
        sqlx::query("UPDATE proposals SET generated_files = $1 WHERE id = $2")
            .bind(&files)
            .bind(proposal_id)
            .execute(&pool)
            .await
            .unwrap();

        let engine: Arc<dyn EngineClient> = Arc::new(FakeEngineClient::healthy());
        let service = ProposalService::new(pool.clone(), engine);

        service.approve_proposal(proposal_id, fx.user_id).await.unwrap();

        let row = repository::proposals::find_by_id(&pool, proposal_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "approved");
        assert_eq!(row.resolved_by_user_id, Some(fx.user_id));

        let file: (String,) = sqlx::query_as(
            "SELECT content FROM draft_specification_files WHERE draft_id = $1 AND file_path = 'spec.md'",
        )
        .bind(fx.draft_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(file.0, "# Title\nbody");

        let audit = row.ai_generated_content.0;
        assert_eq!(audit["audit_trail"][0]["action"], "approved");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn reject_proposal_allowed_from_processing_completed_and_failed(pool: PgPool) {
        let fx = seed(&pool).await;
        let engine: Arc<dyn EngineClient> = Arc::new(FakeEngineClient::healthy());
        let service = ProposalService::new(pool.clone(), engine);

        for status in ["processing", "completed", "failed"] {
            let proposal_id = seed_proposal(&pool, &fx, status).await;
            service
                .reject_proposal(proposal_id, fx.user_id)
                .await
                .unwrap_or_else(|e| panic!("reject from {status} should succeed, got {e}"));
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn reject_proposal_refuses_already_resolved(pool: PgPool) {
        let fx = seed(&pool).await;
        let proposal_id = seed_proposal(&pool, &fx, "approved").await;
        let engine: Arc<dyn EngineClient> = Arc::new(FakeEngineClient::healthy());
        let service = ProposalService::new(pool.clone(), engine);

        let err = service
            .reject_proposal(proposal_id, fx.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn write_terminal_snapshot_never_regresses_a_resolved_proposal(pool: PgPool) {
        let fx = seed(&pool).await;
        let proposal_id = seed_proposal(&pool, &fx, "approved").await;
        let thread_id: (Option<String>,) =
            sqlx::query_as("SELECT thread_id FROM proposals WHERE id = $1")
                .bind(proposal_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        let thread_id = thread_id.0.unwrap();

        let applied = write_terminal_snapshot(&pool, &thread_id, &GeneratedFiles::new())
            .await
            .unwrap();
        assert!(!applied, "a terminal proposal must not be overwritten by a late snapshot");

        let row = repository::proposals::find_by_id(&pool, proposal_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "approved");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn write_terminal_snapshot_completes_a_processing_proposal(pool: PgPool) {
        let fx = seed(&pool).await;
        let proposal_id = seed_proposal(&pool, &fx, "processing").await;
        let thread_id: (Option<String>,) =
            sqlx::query_as("SELECT thread_id FROM proposals WHERE id = $1")
                .bind(proposal_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        let thread_id = thread_id.0.unwrap();

        let applied = write_terminal_snapshot(&pool, &thread_id, &GeneratedFiles::new())
            .await
            .unwrap();
        assert!(applied);

        let row = repository::proposals::find_by_id(&pool, proposal_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "completed");
        assert!(row.completed_at.is_some());
    }
}
