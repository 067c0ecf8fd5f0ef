//! # Prometheus Metrics
//!
//! Operational metrics for the agent node, scraped at `/metrics` on the
//! metrics port. Counters are driven by the protocol event stream rather
//! than by the handlers, so inbound traffic and local API calls are counted
//! the same way.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] under the
//! `endorse` namespace.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use tokio::sync::broadcast;

use endorse_protocol::events::EventReceiver;
use endorse_protocol::ProtocolEvent;

/// Metric handles for the node. Clone-friendly.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Applied state transitions, by target state.
    pub transitions_total: IntCounterVec,
    /// Inbound messages rejected by the handler, by error kind.
    pub inbound_dropped_total: IntCounterVec,
    /// Inbound payloads that did not decode.
    pub malformed_messages_total: IntCounter,
    /// Messages handed to the outbound transport, by message type.
    pub outbound_messages_total: IntCounterVec,
    /// Latency of locally requested transitions, in seconds.
    pub transition_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("endorse".into()), None)
            .expect("failed to create prometheus registry");

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Applied transaction state transitions"),
            &["state"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(transitions_total.clone()))
            .expect("metric registration");

        let inbound_dropped_total = IntCounterVec::new(
            Opts::new(
                "inbound_dropped_total",
                "Inbound protocol messages dropped without a state change",
            ),
            &["reason"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(inbound_dropped_total.clone()))
            .expect("metric registration");

        let malformed_messages_total = IntCounter::new(
            "malformed_messages_total",
            "Inbound payloads that could not be decoded as protocol messages",
        )
        .expect("metric creation");
        registry
            .register(Box::new(malformed_messages_total.clone()))
            .expect("metric registration");

        let outbound_messages_total = IntCounterVec::new(
            Opts::new(
                "outbound_messages_total",
                "Protocol messages handed to the outbound transport",
            ),
            &["message_type"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(outbound_messages_total.clone()))
            .expect("metric registration");

        let transition_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "transition_latency_seconds",
                "Latency of locally requested transitions in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(transition_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            transitions_total,
            inbound_dropped_total,
            malformed_messages_total,
            outbound_messages_total,
            transition_latency_seconds,
        }
    }

    /// Count one protocol event.
    pub fn observe(&self, event: &ProtocolEvent) {
        match event {
            ProtocolEvent::TransitionApplied { to, .. } => {
                self.transitions_total.with_label_values(&[to.as_str()]).inc();
            }
            ProtocolEvent::MessageDropped { kind, .. } => {
                self.inbound_dropped_total
                    .with_label_values(&[kind.as_str()])
                    .inc();
            }
            ProtocolEvent::MalformedMessage { .. } => self.malformed_messages_total.inc(),
            ProtocolEvent::OutboundQueued { message_type, .. } => {
                let short = message_type.rsplit('/').next().unwrap_or(message_type);
                self.outbound_messages_total
                    .with_label_values(&[short])
                    .inc();
            }
        }
    }

    /// Encodes all registered metrics into the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics handle passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Feed every event from `rx` into `metrics` until the channel closes.
pub async fn record_events(metrics: SharedMetrics, mut rx: EventReceiver) {
    loop {
        match rx.recv().await {
            Ok(event) => metrics.observe(&event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("metrics recorder lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
