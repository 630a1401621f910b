//! Prometheus-backed metrics and HTTP exporter.
//!
//! Defines a [`MetricsRegistry`] that owns a Prometheus registry and a set
//! of strongly-typed consensus metrics, and an async HTTP exporter that
//! serves `/metrics` using `hyper`.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode, body::Incoming, header, server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use prometheus::{self, Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Consensus-related Prometheus metrics.
#[derive(Clone)]
pub struct ConsensusMetrics {
    /// Latency of full block validation, in seconds.
    pub block_validation_seconds: Histogram,
    /// Total blocks accepted onto the active chain.
    pub blocks_validated_total: IntCounter,
    /// Rejections, labeled by the `ValidationError` variant name.
    pub blocks_rejected_total: IntCounterVec,
    /// Total reorgs performed.
    pub reorgs_total: IntCounter,
    /// Depth (in blocks) of each reorg.
    pub reorg_depth: Histogram,
    /// Current mempool size.
    pub mempool_size: IntGauge,
    /// Total proof-of-work hashes attempted by the local miner.
    pub mining_hashes_total: IntCounter,
    /// Current active-chain tip height.
    pub tip_height: IntGauge,
    /// Current active-chain difficulty.
    pub tip_difficulty: Gauge,
}

impl ConsensusMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let block_validation_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "consensus_block_validation_seconds",
                "Time to validate a block in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
        )?;
        registry.register(Box::new(block_validation_seconds.clone()))?;

        let blocks_validated_total = IntCounter::with_opts(Opts::new(
            "consensus_blocks_validated_total",
            "Total number of blocks accepted onto the active chain",
        ))?;
        registry.register(Box::new(blocks_validated_total.clone()))?;

        let blocks_rejected_total = IntCounterVec::new(
            Opts::new(
                "consensus_blocks_rejected_total",
                "Total number of rejected blocks, by validation error kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(blocks_rejected_total.clone()))?;

        let reorgs_total = IntCounter::with_opts(Opts::new(
            "consensus_reorgs_total",
            "Total number of chain reorganizations",
        ))?;
        registry.register(Box::new(reorgs_total.clone()))?;

        let reorg_depth = Histogram::with_opts(
            HistogramOpts::new("consensus_reorg_depth", "Depth in blocks of each reorg")
                .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 500.0, 1000.0]),
        )?;
        registry.register(Box::new(reorg_depth.clone()))?;

        let mempool_size = IntGauge::with_opts(Opts::new(
            "consensus_mempool_size",
            "Number of transactions currently pending in the mempool",
        ))?;
        registry.register(Box::new(mempool_size.clone()))?;

        let mining_hashes_total = IntCounter::with_opts(Opts::new(
            "consensus_mining_hashes_total",
            "Total proof-of-work hashes attempted by the local miner",
        ))?;
        registry.register(Box::new(mining_hashes_total.clone()))?;

        let tip_height = IntGauge::with_opts(Opts::new(
            "consensus_tip_height",
            "Current active-chain tip height",
        ))?;
        registry.register(Box::new(tip_height.clone()))?;

        let tip_difficulty = Gauge::with_opts(Opts::new(
            "consensus_tip_difficulty",
            "Current active-chain difficulty (leading zero bits required)",
        ))?;
        registry.register(Box::new(tip_difficulty.clone()))?;

        Ok(Self {
            block_validation_seconds,
            blocks_validated_total,
            blocks_rejected_total,
            reorgs_total,
            reorg_depth,
            mempool_size,
            mining_hashes_total,
            tip_height,
            tip_difficulty,
        })
    }
}

/// Wrapper around a Prometheus registry and the consensus metrics. Wrap in
/// an [`Arc`] and share across threads/tasks.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub consensus: ConsensusMetrics,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("ledger".to_string()), None)?;
        let consensus = ConsensusMetrics::register(&registry)?;
        Ok(Self { registry, consensus })
    }

    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Runs an HTTP server that exposes Prometheus metrics at `GET /metrics`.
/// All other paths return 404. Intended to be spawned onto a Tokio runtime.
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                tracing::warn!(error = %err, "prometheus HTTP connection error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = metrics.gather_text();
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(body)))
                .unwrap())
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found")))
            .unwrap()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn consensus_metrics_register_and_record() {
        let registry = Registry::new();
        let metrics = ConsensusMetrics::register(&registry).expect("register metrics");

        metrics.block_validation_seconds.observe(0.01);
        metrics.blocks_validated_total.inc();
        metrics.blocks_rejected_total.with_label_values(&["invalid_signature"]).inc();
        metrics.reorgs_total.inc();
        metrics.reorg_depth.observe(3.0);
        metrics.mempool_size.set(42);
        metrics.mining_hashes_total.inc_by(1_000_000);
        metrics.tip_height.set(7);
        metrics.tip_difficulty.set(12.0);

        let metric_families = registry.gather();
        assert!(!metric_families.is_empty());
    }

    #[test]
    fn metrics_registry_gather_text_works() {
        let registry = MetricsRegistry::new().expect("create metrics registry");
        registry.consensus.tip_height.set(1);
        let text = registry.gather_text();
        assert!(text.contains("consensus_tip_height"));
    }
}
