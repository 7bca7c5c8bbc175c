use std::sync::Arc;

use r2e::prelude::*;
use r2e_security::JwtClaimsValidator;
use sqlx::PgPool;

use crate::engine::EngineClient;
use crate::ws::BackgroundTasks;

/// Application state shared across every controller and background task.
///
/// `engine_client` is `Arc<dyn EngineClient>` rather than the concrete
/// `HttpEngineClient` so the proxy and proposal service depend only on the
/// capability set of [`EngineClient`] (see `engine` module docs) — tests
/// substitute a fake implementation without touching this struct.
#[derive(Clone, BeanState)]
pub struct AppState {
    pub pool: PgPool,
    pub config: R2eConfig,
    pub engine_client: Arc<dyn EngineClient>,
    pub jwt_validator: Arc<JwtClaimsValidator>,
    pub background: BackgroundTasks,
}

impl r2e_data_sqlx::HasPool<sqlx::Postgres> for AppState {
    fn pool(&self) -> &PgPool {
        &self.pool
    }
}
