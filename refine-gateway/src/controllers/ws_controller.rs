use std::sync::Arc;

use r2e::prelude::*;
use r2e::ws::WsStream;
use sqlx::PgPool;

use crate::auth::RefinementSessionAuth;
use crate::engine::EngineClient;
use crate::state::AppState;
use crate::ws::{proxy, BackgroundTasks};

/// The duplex refinement session endpoint. Authorization runs entirely in
/// `RefinementSessionAuth` before the socket is upgraded — a rejection
/// there never reaches `session`.
#[derive(Controller)]
#[controller(path = "/ws/refinements", state = AppState)]
pub struct WsRefinementController {
    #[inject]
    engine_client: Arc<dyn EngineClient>,

    #[inject]
    pool: PgPool,

    #[inject]
    background: BackgroundTasks,
}

#[routes]
impl WsRefinementController {
    #[ws("/{thread_id}")]
    async fn session(&self, auth: RefinementSessionAuth, ws: WsStream) {
        proxy::run(
            ws,
            auth.thread_id,
            self.engine_client.clone(),
            self.pool.clone(),
            self.background.clone(),
        )
        .await;
    }
}
