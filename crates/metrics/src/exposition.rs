//! Text exposition format (version 0.0.4) rendering.

use prometheus::{Encoder, TextEncoder};
use tracing::warn;

use crate::registry::MetricsRegistry;

/// Content type served with the rendered registry.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Encode every gathered family. Never fails: an encoder error is logged and
/// yields an empty body, so a scrape always gets a response.
pub(crate) fn render(registry: &MetricsRegistry) -> String {
    let families = registry.gather();
    let mut buffer = Vec::with_capacity(4096);
    if let Err(e) = TextEncoder::new().encode(&families, &mut buffer) {
        warn!(error = %e, families = families.len(), "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        warn!(error = %e, "metrics exposition is not valid UTF-8");
        String::new()
    })
}
