use std::sync::Arc;

use r2e_core::health::{HealthIndicator, HealthStatus};
use sqlx::PgPool;

use crate::engine::EngineClient;

/// `SELECT 1` against the connection pool.
pub struct DbHealth {
    pool: PgPool,
}

impl DbHealth {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl HealthIndicator for DbHealth {
    fn name(&self) -> &str {
        "db"
    }

    async fn check(&self) -> HealthStatus {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => HealthStatus::Up,
            Err(e) => HealthStatus::Down(e.to_string()),
        }
    }
}

/// The circuit breaker's own view of the refinement engine, so an open
/// breaker shows up in readiness without issuing a probe request.
pub struct EngineHealth {
    engine_client: Arc<dyn EngineClient>,
}

impl EngineHealth {
    pub fn new(engine_client: Arc<dyn EngineClient>) -> Self {
        Self { engine_client }
    }
}

impl HealthIndicator for EngineHealth {
    fn name(&self) -> &str {
        "engine"
    }

    async fn check(&self) -> HealthStatus {
        if self.engine_client.is_healthy().await {
            HealthStatus::Up
        } else {
            HealthStatus::Down("circuit breaker open or engine unreachable".into())
        }
    }
}
