use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, instrument, warn};

use super::trace::inject_trace_context;
use super::{
    CircuitBreaker, EngineClient, EngineError, EngineSink, ExecutionState, InvokeResponse,
    JobRequest, StreamEvent, StreamItem,
};

const INVOKE_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Production [`EngineClient`] backed by `reqwest` (invoke/get_state/cleanup/
/// health) and `tokio-tungstenite` (stream), guarded by a shared
/// [`CircuitBreaker`].
pub struct HttpEngineClient {
    http: reqwest::Client,
    base_url: url::Url,
    breaker: Arc<CircuitBreaker>,
}

impl HttpEngineClient {
    pub fn new(base_url: url::Url, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            breaker,
        }
    }

    fn http_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    /// Maps `http(s)` to `ws(s)` for the streaming endpoint; any other
    /// scheme is rejected per the engine client's transport contract.
    fn ws_url(&self, thread_id: &str) -> Result<url::Url, EngineError> {
        let scheme = match self.base_url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(EngineError::Malformed(format!(
                    "unsupported engine scheme for streaming: {other}"
                )))
            }
        };
        let mut url = self.base_url.clone();
        url.set_scheme(scheme)
            .map_err(|_| EngineError::Malformed("failed to rewrite engine URL scheme".into()))?;
        url.set_path(&format!("/stream/{thread_id}"));
        Ok(url)
    }
}

impl EngineClient for HttpEngineClient {
    #[instrument(name = "engine.invoke", skip(self, request))]
    async fn invoke(&self, request: JobRequest) -> Result<String, EngineError> {
        let breaker = self.breaker.clone();
        let http = self.http.clone();
        let url = self.http_url("/invoke");

        breaker
            .call(|| async move {
                let mut headers = http::HeaderMap::new();
                inject_trace_context(&mut headers);

                let resp = http
                    .post(&url)
                    .timeout(INVOKE_TIMEOUT)
                    .headers(headers)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| EngineError::Unreachable(e.to_string()))?;

                if !resp.status().is_success() {
                    return Err(EngineError::Rejected(format!(
                        "engine returned {}",
                        resp.status()
                    )));
                }

                let body: InvokeResponse = resp
                    .json()
                    .await
                    .map_err(|e| EngineError::Malformed(e.to_string()))?;

                if body.thread_id.is_empty() {
                    return Err(EngineError::Malformed("empty thread_id".into()));
                }

                Ok(body.thread_id)
            })
            .await
    }

    #[instrument(name = "engine.stream", skip(self))]
    async fn stream(
        &self,
        thread_id: &str,
    ) -> Result<(mpsc::Receiver<StreamItem>, EngineSink), EngineError> {
        let url = self.ws_url(thread_id)?;
        let breaker = self.breaker.clone();

        let ws_stream = breaker
            .call(|| async move {
                let mut request = url
                    .as_str()
                    .into_client_request()
                    .map_err(|e| EngineError::Malformed(e.to_string()))?;
                inject_trace_context(request.headers_mut());

                let (ws_stream, _) = tokio::time::timeout(
                    HANDSHAKE_TIMEOUT,
                    tokio_tungstenite::connect_async(request),
                )
                .await
                .map_err(|_| EngineError::Unreachable("handshake timed out".into()))?
                .map_err(|e| EngineError::Unreachable(e.to_string()))?;

                Ok(ws_stream)
            })
            .await?;

        let (mut write, mut read) = ws_stream.split();

        let (event_tx, event_rx) = mpsc::channel::<StreamItem>(64);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(64);

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if write.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let item = match msg {
                    Ok(WsMessage::Text(text)) => {
                        serde_json::from_str::<StreamEvent>(&text)
                            .map_err(|e| EngineError::Malformed(e.to_string()))
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => Err(EngineError::Unreachable(e.to_string())),
                };
                let is_err = item.is_err();
                if event_tx.send(item).await.is_err() || is_err {
                    break;
                }
            }
            debug!("engine stream reader exiting");
        });

        Ok((event_rx, EngineSink { tx: outbound_tx }))
    }

    #[instrument(name = "engine.get_state", skip(self))]
    async fn get_state(&self, thread_id: &str) -> Result<ExecutionState, EngineError> {
        let breaker = self.breaker.clone();
        let http = self.http.clone();
        let url = self.http_url(&format!("/state/{thread_id}"));

        breaker
            .call(|| async move {
                let mut headers = http::HeaderMap::new();
                inject_trace_context(&mut headers);

                let resp = http
                    .get(&url)
                    .headers(headers)
                    .send()
                    .await
                    .map_err(|e| EngineError::Unreachable(e.to_string()))?;

                if !resp.status().is_success() {
                    return Err(EngineError::Rejected(format!(
                        "engine returned {}",
                        resp.status()
                    )));
                }

                resp.json()
                    .await
                    .map_err(|e| EngineError::Malformed(e.to_string()))
            })
            .await
    }

    #[instrument(name = "engine.health", skip(self))]
    async fn is_healthy(&self) -> bool {
        if matches!(self.breaker.state(), super::CircuitState::Open) {
            return false;
        }

        let url = self.http_url("/health");
        match self
            .http
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "engine health probe failed");
                false
            }
        }
    }

    async fn cleanup(&self, thread_id: &str) -> Result<(), EngineError> {
        let breaker = self.breaker.clone();
        let http = self.http.clone();
        let url = self.http_url(&format!("/state/{thread_id}"));

        breaker
            .call(|| async move {
                let mut headers = http::HeaderMap::new();
                inject_trace_context(&mut headers);

                let resp = http
                    .delete(&url)
                    .headers(headers)
                    .send()
                    .await
                    .map_err(|e| EngineError::Unreachable(e.to_string()))?;

                if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
                    return Err(EngineError::Rejected(format!(
                        "engine returned {}",
                        resp.status()
                    )));
                }
                Ok(())
            })
            .await
    }
}
