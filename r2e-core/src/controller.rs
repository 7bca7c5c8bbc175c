//! The [`Controller`] trait: the contract generated `#[routes]` impls fulfil.
//!
//! Controllers never implement this by hand — `#[derive(Controller)]` plus
//! `#[routes]` generate it. `AppBuilder::register_controller` is the only
//! caller.

use crate::config::{MissingKeyError, R2eConfig};
use crate::http::Router;
use crate::meta::MetaRegistry;

/// Constructs a controller instance from shared application state.
///
/// Generated for controllers with no `#[inject(identity)]` fields (those
/// extract identity per-request instead and never implement this).
pub trait StatefulConstruct<State>: Sized {
    fn from_state(state: &State) -> Self;
}

/// Everything `AppBuilder::register_controller` needs from a controller.
///
/// `apply_pre_auth_guards`, `register_consumers`, and `scheduled_tasks_boxed`
/// are no-ops by default; `#[routes]` overrides them only when the
/// controller actually declares pre-auth guards, `#[consumer]` methods, or
/// `#[scheduled]` methods.
pub trait Controller<State>: Sized + 'static {
    /// Build this controller's `axum::Router`, nested under its path prefix.
    fn routes() -> Router<State>;

    /// Push this controller's route/SSE/WS metadata into the registry (for
    /// OpenAPI and similar meta-consumers).
    fn register_meta(_registry: &mut MetaRegistry) {}

    /// Re-wrap routes with pre-auth guard middleware. Only overridden when
    /// at least one route carries `#[pre_guard(...)]`.
    fn apply_pre_auth_guards(router: Router<State>, _state: &State) -> Router<State> {
        router
    }

    /// Subscribe this controller's `#[consumer]` methods to their event
    /// buses. Runs once, at `serve()` time.
    fn register_consumers(
        _state: State,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async {})
    }

    /// Validate that every `#[config(...)]` key this controller depends on
    /// is present, without constructing the controller itself.
    fn validate_config(_config: &R2eConfig) -> Vec<MissingKeyError> {
        Vec::new()
    }

    /// Type-erased `#[scheduled]` task definitions, boxed so `r2e-core`
    /// never needs to depend on `r2e-scheduler` directly.
    fn scheduled_tasks_boxed(_state: &State) -> Vec<Box<dyn std::any::Any + Send>> {
        Vec::new()
    }
}
