//! Request/response body type.

pub use axum::body::Body;
