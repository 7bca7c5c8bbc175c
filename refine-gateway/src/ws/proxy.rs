use std::sync::Arc;

use r2e_core::ws::WsStream;
use sqlx::PgPool;

use crate::engine::{EngineClient, StreamEvent};
use crate::models::{GeneratedFile, GeneratedFiles};
use crate::services::proposal_service::{write_failed_status, write_terminal_snapshot};

use super::BackgroundTasks;

/// Runs the duplex proxy for one `/ws/refinements/{thread_id}` connection
/// until the engine session ends or the transport breaks.
///
/// Opening the engine-side stream is the only place allowed to synthesize
/// an `error` event back to the client — once the duplex loop is running, a
/// transport failure closes the socket and records `failed` in the
/// background instead, so the client never sees a fabricated event mixed
/// in with genuine engine output.
pub async fn run(
    mut ws: WsStream,
    thread_id: String,
    engine_client: Arc<dyn EngineClient>,
    pool: PgPool,
    background: BackgroundTasks,
) {
    let (mut engine_rx, engine_sink) = match engine_client.stream(&thread_id).await {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ws
                .send_json(&StreamEvent::synthetic_error(e.to_string()))
                .await;
            return;
        }
    };

    let mut latest_files: Option<GeneratedFiles> = None;
    let mut outcome = Outcome::ClientClosed;

    loop {
        tokio::select! {
            client_msg = ws.next() => {
                match client_msg {
                    Some(Ok(r2e_core::http::ws::Message::Text(text))) => {
                        if engine_sink.send_text(text.to_string()).await.is_err() {
                            outcome = Outcome::TransportError("engine sink closed".into());
                            break;
                        }
                    }
                    Some(Ok(r2e_core::http::ws::Message::Close(_))) | None => {
                        outcome = Outcome::ClientClosed;
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary/ping/pong frames carry no protocol meaning here.
                    }
                    Some(Err(_)) => {
                        outcome = Outcome::ClientClosed;
                        break;
                    }
                }
            }
            engine_msg = engine_rx.recv() => {
                match engine_msg {
                    Some(Ok(event)) => {
                        if let Some(files) = event.state_update_files() {
                            if let Ok(parsed) =
                                serde_json::from_value::<std::collections::HashMap<String, GeneratedFile>>(
                                    files.clone(),
                                )
                            {
                                latest_files = Some(parsed);
                            }
                        }

                        let terminal = event.is_terminal();
                        let _ = ws.send_json(&event).await;

                        if terminal {
                            outcome = Outcome::Completed;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        outcome = Outcome::TransportError(e.to_string());
                        break;
                    }
                    None => {
                        outcome = Outcome::TransportError("engine stream closed unexpectedly".into());
                        break;
                    }
                }
            }
        }
    }

    match outcome {
        Outcome::Completed => {
            let files = latest_files.unwrap_or_default();
            background.spawn(async move {
                if let Err(e) = write_terminal_snapshot(&pool, &thread_id, &files).await {
                    tracing::warn!(thread_id = %thread_id, error = %e, "failed to persist terminal snapshot");
                }
            });
        }
        Outcome::TransportError(message) => {
            background.spawn(async move {
                if let Err(e) = write_failed_status(&pool, &thread_id, &message).await {
                    tracing::warn!(thread_id = %thread_id, error = %e, "failed to persist failed status");
                }
            });
        }
        Outcome::ClientClosed => {
            // The client hung up voluntarily; the engine session and its
            // eventual terminal state are left for the next reconnect or
            // for the client to resolve the proposal explicitly.
        }
    }
}

enum Outcome {
    Completed,
    TransportError(String),
    ClientClosed,
}
