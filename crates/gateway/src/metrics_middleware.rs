//! HTTP request metrics middleware.
//!
//! Every request is timed from the moment it reaches this layer. The response
//! body is wrapped so that duration, sizes and the request counter are
//! recorded once the body has been fully handed to the transport, not when
//! the handler returns. A handler that panics is answered with a 500 inside
//! this layer and recorded like any other response. A response that is never
//! completed (client gone, handler hung, body error) records nothing.

use std::{
    any::Any,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::Instant,
};

use {
    axum::{
        body::Body,
        extract::{MatchedPath, Request, State},
        http::{HeaderMap, Method, header},
        middleware::Next,
        response::{IntoResponse, Response},
    },
    bytes::Bytes,
    http_body::{Body as _, Frame, SizeHint},
    tower::{Layer, ServiceExt},
    tower_http::catch_panic::CatchPanicLayer,
    tracing::{debug, error},
};

use {
    timetable_config::UnmatchedRoutes,
    timetable_metrics::{HttpExchange, MetricsHandle, Severity},
};

use crate::error::ApiError;

/// Route label used for every unmatched request under the collapse policy.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// State of the metrics middleware.
#[derive(Clone)]
pub struct HttpMetrics {
    handle: MetricsHandle,
    unmatched: UnmatchedRoutes,
}

impl HttpMetrics {
    pub fn new(handle: MetricsHandle, unmatched: UnmatchedRoutes) -> Self {
        Self { handle, unmatched }
    }

    /// The matched route template, or a label derived from the raw path.
    fn route_label(&self, request: &Request) -> String {
        let matched = request
            .extensions()
            .get::<MatchedPath>()
            .map(MatchedPath::as_str)
            .filter(|path| !path.contains("__private__axum_fallback"));
        if let Some(template) = matched {
            return template.to_string();
        }
        unmatched_label(self.unmatched, request.uri().path())
    }
}

fn unmatched_label(policy: UnmatchedRoutes, path: &str) -> String {
    match policy {
        UnmatchedRoutes::Collapse => UNMATCHED_ROUTE.to_string(),
        UnmatchedRoutes::Normalize => normalize_path(path),
        UnmatchedRoutes::RawPath => path.to_string(),
    }
}

/// Middleware that collects HTTP request metrics.
///
/// This records, labeled by method, route template and final status:
/// - `http_request_duration_seconds`
/// - `http_requests_total`
/// - `http_request_size_bytes` (without status)
/// - `http_response_size_bytes`, for JSON responses only
pub async fn http_metrics_middleware(
    State(metrics): State<HttpMetrics>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let route = metrics.route_label(&request);
    let declared_length = content_length(request.headers());

    let received = Arc::new(AtomicU64::new(0));
    let request = request.map(|body| {
        Body::new(CountingBody {
            inner: body,
            received: Arc::clone(&received),
        })
    });

    let response = match CatchPanicLayer::custom(handler_panicked)
        .layer(next)
        .oneshot(request)
        .await
    {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    };
    if response.extensions().get::<HandlerPanicked>().is_some() {
        metrics
            .handle
            .events()
            .record_error_with_severity("panic", Severity::Critical);
    }

    let pending = PendingExchange {
        handle: metrics.handle,
        is_head: method == Method::HEAD,
        method: method.to_string(),
        route,
        status: response.status().as_u16(),
        start,
        received,
        declared_length,
        is_json: is_json(response.headers()),
    };
    response.map(|body| {
        Body::new(InstrumentedBody {
            inner: body,
            sent: 0,
            pending: Some(pending),
        })
    })
}

/// Marks a response produced by [`handler_panicked`].
#[derive(Clone, Copy)]
struct HandlerPanicked;

fn handler_panicked(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    error!(panic = message, "handler panicked");
    let mut response = ApiError::Internal.into_response();
    response.extensions_mut().insert(HandlerPanicked);
    response
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

/// Request-side facts captured before the handler ran, recorded at finish.
struct PendingExchange {
    handle: MetricsHandle,
    method: String,
    is_head: bool,
    route: String,
    status: u16,
    start: Instant,
    received: Arc<AtomicU64>,
    declared_length: Option<u64>,
    is_json: bool,
}

impl PendingExchange {
    fn finish(self, sent: u64) {
        // Handlers that never read the body still report the declared length.
        let request_bytes = match self.received.load(Ordering::Acquire) {
            0 => self.declared_length.unwrap_or(0),
            n => n,
        };
        self.handle.record_http(&HttpExchange {
            method: &self.method,
            route: &self.route,
            status: self.status,
            duration_seconds: self.start.elapsed().as_secs_f64(),
            request_bytes,
            response_bytes: self.is_json.then_some(sent),
        });
    }
}

/// Request body wrapper counting the bytes the handler actually consumed.
struct CountingBody {
    inner: Body,
    received: Arc<AtomicU64>,
}

impl http_body::Body for CountingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let poll = Pin::new(&mut self.inner).poll_frame(cx);
        if let Poll::Ready(Some(Ok(frame))) = &poll
            && let Some(data) = frame.data_ref()
        {
            self.received
                .fetch_add(data.len() as u64, Ordering::AcqRel);
        }
        poll
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Response body wrapper that records the exchange once the last frame has
/// been taken by the transport.
struct InstrumentedBody {
    inner: Body,
    sent: u64,
    pending: Option<PendingExchange>,
}

impl InstrumentedBody {
    fn complete(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.finish(self.sent);
        }
    }
}

impl http_body::Body for InstrumentedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.sent += data.len() as u64;
                }
                if this.inner.is_end_stream() {
                    this.complete();
                }
                Poll::Ready(Some(Ok(frame)))
            },
            Poll::Ready(Some(Err(e))) => {
                if let Some(pending) = this.pending.take() {
                    debug!(route = %pending.route, error = %e, "response body failed, not recorded");
                }
                Poll::Ready(Some(Err(e)))
            },
            Poll::Ready(None) => {
                this.complete();
                Poll::Ready(None)
            },
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for InstrumentedBody {
    fn drop(&mut self) {
        // Empty bodies and HEAD responses may be dropped without ever being
        // polled; they are complete all the same.
        let head = self.pending.as_ref().is_some_and(|p| p.is_head);
        if self.inner.is_end_stream() || head {
            self.complete();
        }
    }
}

/// Normalize a URL path for metric labels.
///
/// This replaces dynamic segments (UUIDs, numeric IDs) with `{id}` to bound
/// label cardinality.
fn normalize_path(path: &str) -> String {
    let normalized = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let is_dynamic =
                looks_like_uuid(segment) || segment.chars().all(|c| c.is_ascii_digit());
            if is_dynamic { "{id}" } else { segment }
        })
        .collect::<Vec<_>>()
        .join("/");
    format!("/{normalized}")
}

/// Check if a string looks like a UUID, hyphenated or compact.
fn looks_like_uuid(s: &str) -> bool {
    match s.len() {
        36 => {
            let groups: Vec<&str> = s.split('-').collect();
            groups.iter().map(|g| g.len()).eq([8, 4, 4, 4, 12])
                && groups
                    .iter()
                    .all(|g| g.chars().all(|c| c.is_ascii_hexdigit()))
        },
        32 => s.chars().all(|c| c.is_ascii_hexdigit()),
        _ => false,
    }
}
