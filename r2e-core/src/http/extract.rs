//! Axum extractors re-exported under the `r2e_core::http` namespace.

pub use axum::extract::{
    ConnectInfo, DefaultBodyLimit, Form, FromRef, FromRequest, FromRequestParts, MatchedPath,
    OriginalUri, Path, Query, RawPathParams, Request, State,
};
