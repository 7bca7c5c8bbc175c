//! Guidance on running migrations with `sqlx::migrate!()`.
//!
//! This crate doesn't wrap migrations itself — `sqlx::migrate!` already
//! embeds a `migrations/` directory into the binary at compile time and
//! runs it against a pool:
//!
//! ```ignore
//! sqlx::migrate!("./migrations").run(&pool).await?;
//! ```
//!
//! Run it once at startup, before the pool is handed to any repository or
//! `#[managed] Tx<'_, _>` parameter — queries issued against tables the
//! migration hasn't created yet will fail.
