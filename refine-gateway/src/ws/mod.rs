//! The duplex WebSocket proxy between a client and an open engine session,
//! plus the registry that lets its background writes finish on shutdown.

mod background;
pub mod proxy;

pub use background::BackgroundTasks;
