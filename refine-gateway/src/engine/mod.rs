//! Client for the external refinement engine: invoke/stream/get-state/health,
//! wrapped in a process-wide circuit breaker.

mod breaker;
mod http_client;
mod trace;

pub use breaker::{CircuitBreaker, CircuitState};
pub use http_client::HttpEngineClient;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single chat-style message in an engine job request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub role: String,
    pub content: String,
}

/// The payload posted to the engine's `/invoke` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct JobRequest {
    pub trace_id: String,
    pub job_id: String,
    pub agent_definition: String,
    pub input_payload: JobInputPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInputPayload {
    pub messages: Vec<JobMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_selection: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct InvokeResponse {
    pub thread_id: String,
    #[allow(dead_code)]
    pub status: Option<String>,
}

/// A single event decoded from the engine's streamed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl StreamEvent {
    pub fn synthetic_error(message: impl Into<String>) -> Self {
        StreamEvent {
            event_type: "error".to_string(),
            data: serde_json::json!({ "error": message.into() }),
        }
    }

    /// The `data.files` mapping, when this is an `on_state_update` event that carries one.
    pub fn state_update_files(&self) -> Option<&serde_json::Value> {
        if self.event_type != "on_state_update" {
            return None;
        }
        self.data.get("files").filter(|v| v.is_object())
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type == "end"
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionState {
    pub thread_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub generated_files: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Internal engine-client vocabulary; mapped outward to `AppError` at the
/// service boundary (`EngineUnavailable` or `Internal`).
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Circuit breaker is open; call failed fast.
    Tripped,
    /// Network/timeout failure reaching the engine.
    Unreachable(String),
    /// The engine responded with a non-2xx status.
    Rejected(String),
    /// The response could not be decoded into the expected shape.
    Malformed(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Tripped => write!(f, "engine circuit breaker is open"),
            EngineError::Unreachable(msg) => write!(f, "engine unreachable: {msg}"),
            EngineError::Rejected(msg) => write!(f, "engine rejected request: {msg}"),
            EngineError::Malformed(msg) => write!(f, "malformed engine response: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// A single decoded message received over an open engine stream, or a
/// transport-level error terminating it.
pub type StreamItem = Result<StreamEvent, EngineError>;

/// Capability set exposed by the refinement engine, abstracted so the
/// WebSocket proxy and proposal service never depend on the concrete
/// transport. Tests substitute a fake implementation.
#[allow(async_fn_in_trait)]
pub trait EngineClient: Send + Sync + 'static {
    async fn invoke(&self, request: JobRequest) -> Result<String, EngineError>;

    /// Opens a duplex stream for an already-started session. Returns a
    /// receiver of decoded events and a sender for frames to forward to the
    /// engine (client→engine direction is retained for protocol parity).
    async fn stream(
        &self,
        thread_id: &str,
    ) -> Result<(tokio::sync::mpsc::Receiver<StreamItem>, EngineSink), EngineError>;

    async fn get_state(&self, thread_id: &str) -> Result<ExecutionState, EngineError>;

    async fn is_healthy(&self) -> bool;

    /// Best-effort engine-side cleanup for a thread. Failures are logged by
    /// the caller, never propagated as a hard error.
    async fn cleanup(&self, thread_id: &str) -> Result<(), EngineError>;
}

/// Sender half of an open engine stream: forwards raw client frames
/// (text) to the engine transport.
pub struct EngineSink {
    pub(crate) tx: tokio::sync::mpsc::Sender<String>,
}

impl EngineSink {
    pub async fn send_text(&self, text: String) -> Result<(), EngineError> {
        self.tx
            .send(text)
            .await
            .map_err(|_| EngineError::Unreachable("engine sink closed".into()))
    }
}
