mod app;
mod jwt;

pub use app::{PathToken, TestApp, TestRequest, TestResponse, resolve_path, tokenize_path};
pub use jwt::{TestJwt, TokenBuilder};
