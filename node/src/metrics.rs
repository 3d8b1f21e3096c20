//! # Prometheus Metrics
//!
//! Operational counters for the authentication server, scraped by
//! Prometheus at `/metrics` on the metrics port.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] with the
//! `keyless` prefix so they do not collide with a global registry.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Handles are reference-counted internally, so cloning is cheap.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub challenges_issued_total: IntCounter,
    pub challenges_verified_total: IntCounter,
    /// Answers rejected for a bad payload, bad signature or missing challenge.
    pub challenges_failed_total: IntCounter,
    pub credentials_registered_total: IntCounter,
    pub membership_proofs_generated_total: IntCounter,
    pub membership_proofs_verified_total: IntCounter,
    /// Well-formed proofs that did not verify against the given root.
    pub membership_proofs_rejected_total: IntCounter,
    /// Entries removed by the expiry sweep.
    pub expired_entries_pruned_total: IntCounter,
    /// Leaves in the credential tree.
    pub registered_credentials: IntGauge,
    pub active_challenges: IntGauge,
    /// Wall time spent in Groth16 proving.
    pub proving_seconds: Histogram,
}

fn register<M>(registry: &Registry, metric: M) -> Result<M, prometheus::Error>
where
    M: Collector + Clone + 'static,
{
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("keyless".into()), None)?;

        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            register(&registry, IntCounter::new(name, help)?)
        };
        let gauge = |name: &str, help: &str| -> Result<IntGauge, prometheus::Error> {
            register(&registry, IntGauge::new(name, help)?)
        };

        let challenges_issued_total =
            counter("challenges_issued_total", "Challenges issued to clients")?;
        let challenges_verified_total = counter(
            "challenges_verified_total",
            "Challenge answers accepted and turned into sessions",
        )?;
        let challenges_failed_total =
            counter("challenges_failed_total", "Challenge answers rejected")?;
        let credentials_registered_total = counter(
            "credentials_registered_total",
            "Hashed credentials added to the registry",
        )?;
        let membership_proofs_generated_total = counter(
            "membership_proofs_generated_total",
            "Groth16 membership proofs produced",
        )?;
        let membership_proofs_verified_total = counter(
            "membership_proofs_verified_total",
            "Membership proofs that verified",
        )?;
        let membership_proofs_rejected_total = counter(
            "membership_proofs_rejected_total",
            "Membership proofs that did not verify against the given root",
        )?;
        let expired_entries_pruned_total = counter(
            "expired_entries_pruned_total",
            "Expired challenges and sessions removed by the sweep",
        )?;
        let registered_credentials =
            gauge("registered_credentials", "Leaves in the credential Merkle tree")?;
        let active_challenges = gauge("active_challenges", "Challenges awaiting an answer")?;

        let proving_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new("proving_seconds", "Groth16 membership proving time in seconds")
                    .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            )?,
        )?;

        Ok(Self {
            registry,
            challenges_issued_total,
            challenges_verified_total,
            challenges_failed_total,
            credentials_registered_total,
            membership_proofs_generated_total,
            membership_proofs_verified_total,
            membership_proofs_rejected_total,
            expired_entries_pruned_total,
            registered_credentials,
            active_challenges,
            proving_seconds,
        })
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

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
