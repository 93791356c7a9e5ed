use std::time::Duration;

use prometheus::{GaugeVec, IntCounterVec, Opts, Registry};

/// Receives per-message traffic and timing observations.
///
/// Implementations must be cheap; they are called on the read and write
/// paths of every stream.
pub trait MetricsSink: Send + Sync + 'static {
    /// A message of `bytes` payload bytes was written.
    fn record_outbound(&self, message_type: &str, bytes: usize);

    /// A message of `bytes` payload bytes was read.
    fn record_inbound(&self, message_type: &str, bytes: usize);

    /// One-way latency of an inbound message from the peer labeled `from`.
    /// Negative when clocks disagree.
    fn record_latency(&self, message_type: &str, from: &str, latency_nanos: i64);

    /// Time spent obtaining a stream and writing one message to it.
    fn record_send_timing(&self, _message_type: &str, _acquire: Duration, _write: Duration) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_outbound(&self, _message_type: &str, _bytes: usize) {}

    fn record_inbound(&self, _message_type: &str, _bytes: usize) {}

    fn record_latency(&self, _message_type: &str, _from: &str, _latency_nanos: i64) {}
}

/// Prometheus-backed sink registered into a caller-owned registry.
#[derive(Clone)]
pub struct PrometheusMetrics {
    bytes_out: IntCounterVec,
    packets_out: IntCounterVec,
    bytes_in: IntCounterVec,
    packets_in: IntCounterVec,
    latency: GaugeVec,
    acquire_stream_ms: GaugeVec,
    write_stream_ms: GaugeVec,
}

impl PrometheusMetrics {
    /// Create the collectors and register them with `registry`.
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = Self {
            bytes_out: IntCounterVec::new(
                Opts::new("peerlink_bytes_out_total", "Payload bytes written to peers"),
                &["mtype"],
            )?,
            packets_out: IntCounterVec::new(
                Opts::new("peerlink_packets_out_total", "Messages written to peers"),
                &["mtype"],
            )?,
            bytes_in: IntCounterVec::new(
                Opts::new("peerlink_bytes_in_total", "Payload bytes read from peers"),
                &["mtype"],
            )?,
            packets_in: IntCounterVec::new(
                Opts::new("peerlink_packets_in_total", "Messages read from peers"),
                &["mtype"],
            )?,
            latency: GaugeVec::new(
                Opts::new(
                    "peerlink_message_latency_nanoseconds",
                    "One-way latency of the last message from each peer",
                ),
                &["mtype", "from"],
            )?,
            acquire_stream_ms: GaugeVec::new(
                Opts::new(
                    "peerlink_acquire_stream_milliseconds",
                    "Time spent waiting for a stream",
                ),
                &["mtype"],
            )?,
            write_stream_ms: GaugeVec::new(
                Opts::new(
                    "peerlink_write_stream_milliseconds",
                    "Time spent writing one message",
                ),
                &["mtype"],
            )?,
        };

        registry.register(Box::new(metrics.bytes_out.clone()))?;
        registry.register(Box::new(metrics.packets_out.clone()))?;
        registry.register(Box::new(metrics.bytes_in.clone()))?;
        registry.register(Box::new(metrics.packets_in.clone()))?;
        registry.register(Box::new(metrics.latency.clone()))?;
        registry.register(Box::new(metrics.acquire_stream_ms.clone()))?;
        registry.register(Box::new(metrics.write_stream_ms.clone()))?;

        Ok(metrics)
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_outbound(&self, message_type: &str, bytes: usize) {
        self.bytes_out
            .with_label_values(&[message_type])
            .inc_by(bytes as u64);
        self.packets_out.with_label_values(&[message_type]).inc();
    }

    fn record_inbound(&self, message_type: &str, bytes: usize) {
        self.bytes_in
            .with_label_values(&[message_type])
            .inc_by(bytes as u64);
        self.packets_in.with_label_values(&[message_type]).inc();
    }

    fn record_latency(&self, message_type: &str, from: &str, latency_nanos: i64) {
        self.latency
            .with_label_values(&[message_type, from])
            .set(latency_nanos as f64);
    }

    fn record_send_timing(&self, message_type: &str, acquire: Duration, write: Duration) {
        self.acquire_stream_ms
            .with_label_values(&[message_type])
            .set(acquire.as_secs_f64() * 1000.0);
        self.write_stream_ms
            .with_label_values(&[message_type])
            .set(write.as_secs_f64() * 1000.0);
    }
}
