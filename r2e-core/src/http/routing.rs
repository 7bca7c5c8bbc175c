//! Route registration helpers re-exported under the `r2e_core::http` namespace.

pub use axum::routing::{delete, get, patch, post, put, Route};
