//! ## timewarp-telemetry::metrics
//! **Prometheus counters for the virtual-clock scheduler**

use prometheus::{IntCounter, IntGauge, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub clock_moves: IntCounter,
    pub resumptions: IntCounter,
    pub signals: IntCounter,
    pub settle_timeouts: IntCounter,
    pub suspended_threads: IntGauge,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let registry = Registry::new();
        let clock_moves = IntCounter::new(
            "timewarp_clock_moves_total",
            "Successful set/advance calls on the virtual clock",
        )
        .expect("static metric definition");
        let resumptions = IntCounter::new(
            "timewarp_resumptions_total",
            "Waiters resumed by a clock move",
        )
        .expect("static metric definition");
        let signals = IntCounter::new(
            "timewarp_signals_total",
            "Waiters resumed by notify or unpark",
        )
        .expect("static metric definition");
        let settle_timeouts = IntCounter::new(
            "timewarp_settle_timeouts_total",
            "wait_until_frozen calls that hit their deadline",
        )
        .expect("static metric definition");
        let suspended_threads = IntGauge::new(
            "timewarp_suspended_threads",
            "Threads currently suspended on the virtual clock",
        )
        .expect("static metric definition");

        for collector in [
            Box::new(clock_moves.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(resumptions.clone()),
            Box::new(signals.clone()),
            Box::new(settle_timeouts.clone()),
            Box::new(suspended_threads.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric names are unique within the registry");
        }

        Self {
            registry,
            clock_moves,
            resumptions,
            signals,
            settle_timeouts,
            suspended_threads,
        }
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
