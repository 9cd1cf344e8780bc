//! Routing metrics.
//!
//! Uses the global OpenTelemetry meter provider, which must be installed
//! by the host application (parley-server). Without a provider every
//! instrument is a no-op.

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("parley-core"))
}

// ============================================================================
// Counters (Cumulative)
// ============================================================================

/// Counter for chat messages routed, labelled by forwarding outcome.
pub fn messages_routed() -> Counter<u64> {
    meter()
        .u64_counter("parley.messages.routed")
        .with_description("Total chat messages routed")
        .with_unit("message")
        .build()
}

/// Counter for handshake authentication attempts.
pub fn auth_attempts() -> Counter<u64> {
    meter()
        .u64_counter("parley.auth.attempts")
        .with_description("Total session authentication attempts")
        .with_unit("attempt")
        .build()
}

/// Counter for failed message log appends.
pub fn message_log_failures() -> Counter<u64> {
    meter()
        .u64_counter("parley.message_log.failures")
        .with_description("Total message log append failures")
        .with_unit("failure")
        .build()
}

// ============================================================================
// Gauges (Current State)
// ============================================================================

/// Gauge for sessions currently in the registry.
pub fn sessions_active() -> Gauge<i64> {
    meter()
        .i64_gauge("parley.sessions.active")
        .with_description("Current number of registered sessions")
        .with_unit("session")
        .build()
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record a routed message.
pub fn record_message_routed(outcome: &str) {
    messages_routed().add(1, &[KeyValue::new("outcome", outcome.to_string())]);
}

/// Record an authentication attempt.
pub fn record_auth_attempt(flow: &str, success: bool) {
    auth_attempts().add(
        1,
        &[
            KeyValue::new("flow", flow.to_string()),
            KeyValue::new("result", if success { "success" } else { "failure" }),
        ],
    );
}

/// Record a message log failure.
pub fn record_message_log_failure() {
    message_log_failures().add(1, &[]);
}

/// Record the registry size.
pub fn record_session_count(count: usize) {
    sessions_active().record(count as i64, &[]);
}
