use opentelemetry::propagation::Injector;

/// Adapts an [`http::HeaderMap`] to OpenTelemetry's `Injector` trait so the
/// current span's W3C trace context can be carried on outbound engine
/// requests (HTTP headers or the WebSocket handshake request).
pub struct HeaderInjector<'a>(pub &'a mut http::HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = http::header::HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(val) = http::HeaderValue::from_str(&value) {
                self.0.insert(name, val);
            }
        }
    }
}

/// Inject the current tracing span's context into `headers` as `traceparent`.
pub fn inject_trace_context(headers: &mut http::HeaderMap) {
    let cx = tracing_opentelemetry::OpenTelemetrySpanExt::context(&tracing::Span::current());
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&cx, &mut HeaderInjector(headers));
    });
}
