//! W3C Trace Context propagation for outbound callback deliveries.
//!
//! See: https://www.w3.org/TR/trace-context/

use crate::middleware::REQUEST_ID_HEADER;
use opentelemetry::trace::{SpanContext, TraceContextExt};
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

fn current_span_context() -> Option<SpanContext> {
    let context = Span::current().context();
    let span_context = context.span().span_context().clone();
    span_context.is_valid().then_some(span_context)
}

/// `version-trace_id-span_id-flags` for the active span, if it is sampled
/// into an OpenTelemetry trace.
pub fn traceparent() -> Option<String> {
    current_span_context().map(|ctx| {
        format!(
            "00-{}-{}-{:02x}",
            ctx.trace_id(),
            ctx.span_id(),
            ctx.trace_flags().to_u8()
        )
    })
}

pub fn inject_trace_context(headers: &mut HeaderMap) {
    let Some(ctx) = current_span_context() else {
        return;
    };
    if let Some(value) = traceparent().and_then(|v| HeaderValue::from_str(&v).ok()) {
        headers.insert(TRACEPARENT_HEADER, value);
    }
    let state = ctx.trace_state().header();
    if let Ok(value) = HeaderValue::from_str(&state) {
        if !state.is_empty() {
            headers.insert(TRACESTATE_HEADER, value);
        }
    }
}

/// Trace context plus the identity request the callback belongs to, so a
/// receiving node can correlate deliveries without parsing the body.
pub fn inject_trace_headers(headers: &mut HeaderMap, request_id: Option<&str>) {
    inject_trace_context(headers);

    if let Some(value) = request_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_span_means_no_trace_headers() {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);
        assert!(headers.is_empty());
        assert!(traceparent().is_none());
    }

    #[test]
    fn test_request_id_is_forwarded() {
        let mut headers = HeaderMap::new();
        inject_trace_headers(&mut headers, Some("9f2c"));
        assert_eq!(headers.get(REQUEST_ID_HEADER).unwrap(), "9f2c");
        assert!(headers.get(TRACEPARENT_HEADER).is_none());
    }

    #[test]
    fn test_unprintable_request_id_is_dropped() {
        let mut headers = HeaderMap::new();
        inject_trace_headers(&mut headers, Some("bad\nid"));
        assert!(headers.is_empty());
    }
}
