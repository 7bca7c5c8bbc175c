//! Response types re-exported under the `r2e_core::http` namespace.

pub use axum::response::{Html, IntoResponse, Redirect, Response};
pub use axum::response::sse::{Event as SseEvent, KeepAlive as SseKeepAlive, Sse};
