//! Prometheus metrics for the faucet

use crate::error::{FaucetError, FaucetResult};
use prometheus::{histogram_opts, opts, Encoder, Gauge, Histogram, IntCounterVec, Registry, TextEncoder};

pub struct FaucetMetrics {
    registry: Registry,

    /// Claims by terminal outcome (success, denied, failed, unavailable, unknown)
    pub claims_total: IntCounterVec,
    /// Wall time of transfer submissions, including the wait for the submission lock
    pub submit_duration: Histogram,
    /// Last observed faucet balance in the token's smallest unit
    pub balance: Gauge,
}

impl FaucetMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let claims_total = IntCounterVec::new(
            opts!("faucet_claims_total", "Claims processed, by outcome"),
            &["outcome"],
        )?;
        let submit_duration = Histogram::with_opts(histogram_opts!(
            "faucet_submit_duration_seconds",
            "Time spent submitting transfers to the node",
            vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        ))?;
        let balance = Gauge::with_opts(opts!(
            "faucet_balance_units",
            "Faucet wallet balance at the last check, in base units"
        ))?;

        registry.register(Box::new(claims_total.clone()))?;
        registry.register(Box::new(submit_duration.clone()))?;
        registry.register(Box::new(balance.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            claims_total,
            submit_duration,
            balance,
        })
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.claims_total.with_label_values(&[outcome]).inc();
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> FaucetResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| FaucetError::InternalError(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| FaucetError::InternalError(format!("Metrics are not UTF-8: {}", e)))
    }
}
