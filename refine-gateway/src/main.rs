use std::sync::Arc;
use std::time::Duration;

use r2e::prelude::*;
use r2e::r2e_observability::{Observability, ObservabilityConfig};
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, CorsLayer};

mod auth;
mod config;
mod controllers;
mod engine;
mod error;
mod health;
mod models;
mod repository;
mod services;
mod state;
mod ws;

use config::AppConfig;
use controllers::{AuthController, RefinementController, WsRefinementController};
use engine::{CircuitBreaker, EngineClient, HttpEngineClient};
use health::{DbHealth, EngineHealth};
use services::ProposalService;
use state::AppState;
use ws::BackgroundTasks;

#[r2e::main]
async fn main() {
    let config = R2eConfig::load("dev").unwrap_or_else(|_| R2eConfig::empty());
    let app_config = AppConfig::from_config(&config)
        .expect("invalid or missing configuration (auth.signing_secret and db.url are required)");

    let pool = PgPool::connect(&app_config.db.url)
        .await
        .expect("failed to connect to the proposal/draft database");

    let engine_base_url =
        url::Url::parse(&app_config.engine.base_url).expect("engine.base_url must be a valid URL");
    let breaker = Arc::new(CircuitBreaker::new(
        app_config.breaker.consecutive_failure_threshold,
        Duration::from_secs(app_config.breaker.open_dwell_secs),
        app_config.breaker.half_open_trials,
    ));
    let engine_client: Arc<dyn EngineClient> =
        Arc::new(HttpEngineClient::new(engine_base_url, breaker));

    let jwt_validator = Arc::new(auth::token::build_validator(&app_config.auth));
    let background = BackgroundTasks::new();
    let background_for_shutdown = background.clone();

    AppBuilder::new()
        .provide(config.clone())
        .provide(pool.clone())
        .provide(engine_client.clone())
        .provide(jwt_validator.clone())
        .provide(background)
        .with_bean::<ProposalService>()
        .build_state::<AppState>()
        .await
        .with_config(config)
        .with(
            Health::builder()
                .check(DbHealth::new(pool.clone()))
                .check(EngineHealth::new(engine_client.clone()))
                .build(),
        )
        .with(cors_plugin(&app_config.cors))
        .with(Observability::new(
            ObservabilityConfig::new("refine-gateway")
                .with_service_version(env!("CARGO_PKG_VERSION")),
        ))
        .with(ErrorHandling)
        .with_layer(tower_http::timeout::TimeoutLayer::new(Duration::from_secs(
            app_config.http.read_timeout,
        )))
        .on_start(|state: AppState| async move {
            sqlx::migrate!("./migrations")
                .run(&state.pool)
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
            tracing::info!("refine-gateway database migrations applied");
            Ok(())
        })
        .on_stop(|| async move {
            background_for_shutdown.drain().await;
            tracing::info!("refine-gateway shutting down");
        })
        .register_controller::<AuthController>()
        .register_controller::<RefinementController>()
        .register_controller::<WsRefinementController>()
        .serve(&format!("0.0.0.0:{}", app_config.http.listen_port))
        .await
        .unwrap();
}

/// `cors.allowed_origins` drives a locked-down `CorsLayer` when the list is
/// non-empty; an empty list (the default) falls back to `Cors::permissive()`
/// for local/dev profiles.
fn cors_plugin(cors: &config::CorsConfig) -> Cors {
    if cors.allowed_origins.is_empty() {
        return Cors::permissive();
    }

    let origins: Vec<_> = cors
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let layer = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Cors::custom(layer)
}
