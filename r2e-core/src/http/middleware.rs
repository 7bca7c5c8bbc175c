//! Middleware helpers re-exported under the `r2e_core::http` namespace.

pub use axum::middleware::{from_fn, Next};
