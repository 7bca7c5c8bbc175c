use r2e::prelude::*;
use r2e::r2e_data::Pageable;
use r2e_security::AuthenticatedUser;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::access;
use crate::models::{
    ApproveResponse, CreateRefinementRequest, CreateRefinementResponse, ProposalView,
    RejectResponse,
};
use crate::repository;
use crate::services::ProposalService;
use crate::state::AppState;

/// The authenticated refinement surface: create/list/inspect/resolve
/// proposals against a workflow's drafts.
#[derive(Controller)]
#[controller(state = AppState)]
pub struct RefinementController {
    #[inject]
    proposal_service: ProposalService,

    #[inject]
    pool: PgPool,

    #[inject(identity)]
    user: AuthenticatedUser,
}

#[routes]
impl RefinementController {
    #[post("/workflows/{id}/refinements")]
    async fn create(
        &self,
        Path(workflow_id): Path<Uuid>,
        Json(body): Json<CreateRefinementRequest>,
    ) -> Result<Json<CreateRefinementResponse>, AppError> {
        let user_id = user_id(&self.user)?;
        access::require_workflow_access(&self.pool, workflow_id, user_id).await?;

        let draft = repository::drafts::find_latest_for_workflow(&self.pool, workflow_id)
            .await?
            .ok_or_else(|| AppError::InvalidRequest("workflow has no draft to refine".into()))?;

        let response = self
            .proposal_service
            .create_refinement(draft.id, user_id, &body)
            .await?;
        Ok(Json(response))
    }

    #[get("/workflows/{id}/proposals")]
    async fn list_for_workflow(
        &self,
        Path(workflow_id): Path<Uuid>,
        Query(pageable): Query<Pageable>,
    ) -> Result<Json<r2e::r2e_data::Page<ProposalView>>, AppError> {
        let user_id = user_id(&self.user)?;
        access::require_workflow_access(&self.pool, workflow_id, user_id).await?;

        let page = repository::proposals::list_for_workflow(&self.pool, workflow_id, &pageable)
            .await?;
        Ok(Json(page))
    }

    #[get("/proposals/{id}")]
    async fn get_one(&self, Path(proposal_id): Path<Uuid>) -> Result<Json<ProposalView>, AppError> {
        let user_id = user_id(&self.user)?;
        access::require_proposal_access(&self.pool, proposal_id, user_id).await?;

        let view = self.proposal_service.get_proposal(proposal_id).await?;
        Ok(Json(view))
    }

    #[post("/proposals/{id}/approve")]
    async fn approve(
        &self,
        Path(proposal_id): Path<Uuid>,
    ) -> Result<Json<ApproveResponse>, AppError> {
        let user_id = user_id(&self.user)?;
        access::require_proposal_access(&self.pool, proposal_id, user_id).await?;

        let response = self
            .proposal_service
            .approve_proposal(proposal_id, user_id)
            .await?;
        Ok(Json(response))
    }

    #[post("/proposals/{id}/reject")]
    async fn reject(
        &self,
        Path(proposal_id): Path<Uuid>,
    ) -> Result<Json<RejectResponse>, AppError> {
        let user_id = user_id(&self.user)?;
        access::require_proposal_access(&self.pool, proposal_id, user_id).await?;

        let response = self
            .proposal_service
            .reject_proposal(proposal_id, user_id)
            .await?;
        Ok(Json(response))
    }
}

fn user_id(user: &AuthenticatedUser) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.sub).map_err(|_| AppError::Unauthorized("token missing a valid subject".into()))
}
