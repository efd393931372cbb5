//! Metrics export for simulation results.
//!
//! An in-memory recorder collects every `metrics` facade call made during a
//! run. At the end of the run a [`MetricsSnapshot`] is taken and written as
//! JSON or in the Prometheus text exposition format.
//!
//! Counters are reported three ways: the total per metric name, a per-node
//! breakdown (the `node` label), and a breakdown by each extra label such as
//! the drop `reason` or the PHY `state`.

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Labels that identify a node rather than a breakdown dimension.
const NODE_LABELS: &[&str] = &["node", "node_type", "groups"];

// ============================================================================
// Metrics Snapshot Types
// ============================================================================

/// Per-node metric values.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct NodeMetrics {
    /// Counter metrics for this node.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,
    /// Histogram metrics for this node.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub histograms: BTreeMap<String, HistogramSummary>,
}

/// Collected metric data for export.
#[derive(Debug, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Wall-clock time the snapshot was taken (RFC 3339).
    pub timestamp: String,
    /// Counter totals across all nodes.
    pub counters: BTreeMap<String, u64>,
    /// Histogram summaries across all nodes.
    pub histograms: BTreeMap<String, HistogramSummary>,
    /// Counter totals by extra label: metric name -> "label=value" -> total.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub breakdowns: BTreeMap<String, BTreeMap<String, u64>>,
    /// Per-node breakdown of metrics.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub nodes: BTreeMap<String, NodeMetrics>,
}

/// Summary statistics for a histogram metric.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HistogramSummary {
    /// Number of samples recorded.
    pub count: u64,
    /// Sum of all samples.
    pub sum: f64,
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
    /// Mean value.
    pub mean: f64,
    /// 50th percentile (median).
    pub p50: f64,
    /// 90th percentile.
    pub p90: f64,
    /// 99th percentile.
    pub p99: f64,
}

impl HistogramSummary {
    fn empty() -> Self {
        HistogramSummary {
            count: 0,
            sum: 0.0,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            p50: 0.0,
            p90: 0.0,
            p99: 0.0,
        }
    }
}

// ============================================================================
// Export Functions
// ============================================================================

/// Export metrics as JSON.
pub fn export_json<W: Write>(snapshot: &MetricsSnapshot, writer: &mut W) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, snapshot)?;
    writeln!(writer)?;
    Ok(())
}

/// Export metrics in Prometheus text exposition format.
pub fn export_prometheus<W: Write>(snapshot: &MetricsSnapshot, writer: &mut W) -> std::io::Result<()> {
    for (name, value) in &snapshot.counters {
        let prom_name = prometheus_name(name);
        writeln!(writer, "# TYPE {} counter", prom_name)?;
        writeln!(writer, "{} {}", prom_name, value)?;
        if let Some(by_label) = snapshot.breakdowns.get(name) {
            for (label, value) in by_label {
                let (key, val) = label.split_once('=').unwrap_or((label.as_str(), ""));
                writeln!(writer, "{}{{{}=\"{}\"}} {}", prom_name, key, val, value)?;
            }
        }
    }

    for (node_name, node_metrics) in &snapshot.nodes {
        for (name, value) in &node_metrics.counters {
            writeln!(writer, "{}{{node=\"{}\"}} {}", prometheus_name(name), node_name, value)?;
        }
    }

    for (name, summary) in &snapshot.histograms {
        let prom_name = prometheus_name(name);
        writeln!(writer, "# TYPE {} summary", prom_name)?;
        write_summary(writer, &prom_name, None, summary)?;
    }

    for (node_name, node_metrics) in &snapshot.nodes {
        for (name, summary) in &node_metrics.histograms {
            write_summary(writer, &prometheus_name(name), Some(node_name.as_str()), summary)?;
        }
    }

    Ok(())
}

/// Histogram as a Prometheus summary: count, sum, and quantiles.
fn write_summary<W: Write>(
    writer: &mut W,
    prom_name: &str,
    node: Option<&str>,
    summary: &HistogramSummary,
) -> std::io::Result<()> {
    let node_label = node.map(|n| format!("node=\"{}\"", n));
    let plain = node_label.as_ref().map(|l| format!("{{{}}}", l)).unwrap_or_default();
    writeln!(writer, "{}_count{} {}", prom_name, plain, summary.count)?;
    writeln!(writer, "{}_sum{} {}", prom_name, plain, summary.sum)?;
    for (quantile, value) in [("0.5", summary.p50), ("0.9", summary.p90), ("0.99", summary.p99)] {
        match &node_label {
            Some(label) => writeln!(writer, "{}{{{},quantile=\"{}\"}} {}", prom_name, label, quantile, value)?,
            None => writeln!(writer, "{}{{quantile=\"{}\"}} {}", prom_name, quantile, value)?,
        }
    }
    Ok(())
}

fn prometheus_name(name: &str) -> String {
    name.replace('.', "_")
}

// ============================================================================
// In-Memory Recorder
// ============================================================================

/// Thread-safe storage for a single counter value.
#[derive(Debug, Default)]
struct CounterState {
    value: AtomicU64,
}

impl CounterState {
    fn increment(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Maximum number of samples kept per histogram for percentiles.
const HISTOGRAM_RESERVOIR_SIZE: usize = 10_000;

/// Running totals of a histogram.
#[derive(Debug)]
struct HistogramTotals {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    /// xorshift64 state for reservoir replacement.
    rng_state: u64,
}

impl Default for HistogramTotals {
    fn default() -> Self {
        HistogramTotals {
            count: 0,
            sum: 0.0,
            min: f64::MAX,
            max: f64::MIN,
            rng_state: 0x9E37_79B9_7F4A_7C15,
        }
    }
}

impl HistogramTotals {
    fn next_random(&mut self) -> u64 {
        let mut state = self.rng_state;
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        self.rng_state = state;
        state
    }
}

/// Histogram samples kept with reservoir sampling (Algorithm R), so memory
/// stays bounded however many samples are recorded.
#[derive(Debug, Default)]
struct HistogramState {
    reservoir: RwLock<Vec<f64>>,
    totals: RwLock<HistogramTotals>,
}

impl HistogramState {
    fn record(&self, value: f64) {
        let slot = {
            let mut totals = self.totals.write();
            totals.count += 1;
            totals.sum += value;
            totals.min = totals.min.min(value);
            totals.max = totals.max.max(value);
            if totals.count as usize <= HISTOGRAM_RESERVOIR_SIZE {
                None
            } else {
                let n = totals.count;
                Some((totals.next_random() % n) as usize)
            }
        };

        let mut reservoir = self.reservoir.write();
        match slot {
            None => reservoir.push(value),
            Some(j) if j < HISTOGRAM_RESERVOIR_SIZE => reservoir[j] = value,
            Some(_) => {}
        }
    }

    fn summary(&self) -> HistogramSummary {
        let totals = self.totals.read();
        if totals.count == 0 {
            return HistogramSummary::empty();
        }
        let mut summary = compute_histogram_summary(&self.reservoir.read());
        summary.count = totals.count;
        summary.sum = totals.sum;
        summary.min = totals.min;
        summary.max = totals.max;
        summary.mean = totals.sum / totals.count as f64;
        summary
    }

    fn samples(&self) -> Vec<f64> {
        self.reservoir.read().clone()
    }

    fn clear(&self) {
        self.reservoir.write().clear();
        *self.totals.write() = HistogramTotals::default();
    }
}

/// Name and labels of a registered key.
#[derive(Debug, Clone)]
struct KeyMetadata {
    name: String,
    labels: Vec<(String, String)>,
}

impl KeyMetadata {
    fn from_key(key: &Key) -> Self {
        KeyMetadata {
            name: key.name().to_string(),
            labels: key
                .labels()
                .map(|l| (l.key().to_string(), l.value().to_string()))
                .collect(),
        }
    }

    fn node(&self) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == "node")
            .map(|(_, v)| v.as_str())
    }

    /// Labels other than the node identity, as "key=value".
    fn breakdown_labels(&self) -> impl Iterator<Item = String> + '_ {
        self.labels
            .iter()
            .filter(|(k, _)| !NODE_LABELS.contains(&k.as_str()))
            .map(|(k, v)| format!("{}={}", k, v))
    }
}

/// Build a unique key string from a metrics Key (including labels).
fn key_to_string(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();

    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}|{}", key.name(), labels.join(","))
    }
}

/// Shared state for the in-memory recorder.
#[derive(Debug, Default)]
struct RecorderState {
    counters: RwLock<BTreeMap<String, Arc<CounterState>>>,
    histograms: RwLock<BTreeMap<String, Arc<HistogramState>>>,
    key_metadata: RwLock<BTreeMap<String, KeyMetadata>>,
}

impl RecorderState {
    /// Reset every value. Registered keys survive so existing handles keep
    /// working.
    fn clear(&self) {
        for counter in self.counters.read().values() {
            counter.value.store(0, Ordering::Relaxed);
        }
        for histogram in self.histograms.read().values() {
            histogram.clear();
        }
    }

    fn remember(&self, key_str: &str, key: &Key) {
        let mut metadata = self.key_metadata.write();
        if !metadata.contains_key(key_str) {
            metadata.insert(key_str.to_string(), KeyMetadata::from_key(key));
        }
    }

    fn get_or_create<T: Default>(&self, map: &RwLock<BTreeMap<String, Arc<T>>>, key: &Key) -> Arc<T> {
        let key_str = key_to_string(key);
        if let Some(existing) = map.read().get(&key_str) {
            return Arc::clone(existing);
        }
        self.remember(&key_str, key);
        Arc::clone(map.write().entry(key_str).or_default())
    }

    fn get_or_create_counter(&self, key: &Key) -> Arc<CounterState> {
        self.get_or_create(&self.counters, key)
    }

    fn get_or_create_histogram(&self, key: &Key) -> Arc<HistogramState> {
        self.get_or_create(&self.histograms, key)
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let metadata = self.key_metadata.read();

        let mut counters: BTreeMap<String, u64> = BTreeMap::new();
        let mut histogram_samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut breakdowns: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
        let mut nodes: BTreeMap<String, NodeMetrics> = BTreeMap::new();

        for (key_str, counter) in self.counters.read().iter() {
            let Some(meta) = metadata.get(key_str) else { continue };
            let value = counter.get();
            *counters.entry(meta.name.clone()).or_insert(0) += value;
            for label in meta.breakdown_labels() {
                *breakdowns
                    .entry(meta.name.clone())
                    .or_default()
                    .entry(label)
                    .or_insert(0) += value;
            }
            if let Some(node) = meta.node() {
                let node_metrics = nodes.entry(node.to_string()).or_default();
                *node_metrics.counters.entry(meta.name.clone()).or_insert(0) += value;
            }
        }

        for (key_str, histogram) in self.histograms.read().iter() {
            let Some(meta) = metadata.get(key_str) else { continue };
            histogram_samples
                .entry(meta.name.clone())
                .or_default()
                .extend(histogram.samples());
            if let Some(node) = meta.node() {
                let node_metrics = nodes.entry(node.to_string()).or_default();
                node_metrics.histograms.insert(meta.name.clone(), histogram.summary());
            }
        }

        let histograms = histogram_samples
            .into_iter()
            .map(|(name, samples)| (name, compute_histogram_summary(&samples)))
            .collect();

        MetricsSnapshot {
            timestamp,
            counters,
            histograms,
            breakdowns,
            nodes,
        }
    }
}

fn compute_histogram_summary(samples: &[f64]) -> HistogramSummary {
    if samples.is_empty() {
        return HistogramSummary::empty();
    }

    let mut sorted: Vec<f64> = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let count = sorted.len() as u64;
    let sum: f64 = sorted.iter().sum();
    let percentile = |p: f64| -> f64 {
        let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    };

    HistogramSummary {
        count,
        sum,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean: sum / count as f64,
        p50: percentile(50.0),
        p90: percentile(90.0),
        p99: percentile(99.0),
    }
}

/// In-memory metrics recorder that collects metrics for later export.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecorder {
    state: Arc<RecorderState>,
}

impl InMemoryRecorder {
    /// Create a new in-memory recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a snapshot of all current metric values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state.snapshot()
    }

    /// Clear all recorded values, e.g. at the end of a warmup period.
    pub fn clear(&self) {
        self.state.clear();
    }
}

// ============================================================================
// Metric Handles
// ============================================================================

struct InMemoryCounter {
    state: Arc<CounterState>,
}

impl metrics::CounterFn for InMemoryCounter {
    fn increment(&self, value: u64) {
        self.state.increment(value);
    }

    fn absolute(&self, value: u64) {
        self.state.value.store(value, Ordering::Relaxed);
    }
}

struct InMemoryHistogram {
    state: Arc<HistogramState>,
}

impl metrics::HistogramFn for InMemoryHistogram {
    fn record(&self, value: f64) {
        self.state.record(value);
    }
}

impl Recorder for InMemoryRecorder {
    // Descriptions are listed by `hesim metrics`; the recorder does not keep them.
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let state = self.state.get_or_create_counter(key);
        Counter::from_arc(Arc::new(InMemoryCounter { state }))
    }

    // No gauges are emitted by the simulator.
    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        let state = self.state.get_or_create_histogram(key);
        Histogram::from_arc(Arc::new(InMemoryHistogram { state }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::Label;

    fn phy_key(name: &'static str, node: &str, extra: Option<(&'static str, &'static str)>) -> Key {
        let mut labels = vec![Label::new("node", node.to_string()), Label::new("node_type", "sta")];
        if let Some((k, v)) = extra {
            labels.push(Label::new(k, v));
        }
        Key::from_parts(name, labels)
    }

    #[test]
    fn test_counter_increment() {
        let recorder = InMemoryRecorder::new();
        let counter = recorder
            .state
            .get_or_create_counter(&Key::from_static_name("hesim.phy.tx_packets"));
        counter.increment(5);
        counter.increment(3);
        assert_eq!(counter.get(), 8);
    }

    #[test]
    fn test_same_key_shares_state() {
        let recorder = InMemoryRecorder::new();
        let key = phy_key("hesim.phy.rx_ok", "sta1", None);
        recorder.state.get_or_create_counter(&key).increment(1);
        recorder.state.get_or_create_counter(&key).increment(1);
        assert_eq!(recorder.snapshot().counters.get("hesim.phy.rx_ok"), Some(&2));
    }

    #[test]
    fn test_histogram_summary() {
        let recorder = InMemoryRecorder::new();
        let histogram = recorder
            .state
            .get_or_create_histogram(&Key::from_static_name("hesim.phy.rx_snr"));
        for i in 1..=100 {
            histogram.record(i as f64);
        }

        let summary = histogram.summary();
        assert_eq!(summary.count, 100);
        assert!((summary.min - 1.0).abs() < f64::EPSILON);
        assert!((summary.max - 100.0).abs() < f64::EPSILON);
        assert!((summary.mean - 50.5).abs() < f64::EPSILON);
        assert!((summary.p50 - 50.0).abs() < 2.0);
        assert!((summary.p90 - 90.0).abs() < 2.0);
        assert!((summary.p99 - 99.0).abs() < 2.0);
    }

    #[test]
    fn test_histogram_reservoir_is_bounded() {
        let state = HistogramState::default();
        for i in 0..(HISTOGRAM_RESERVOIR_SIZE * 2) {
            state.record(i as f64);
        }
        assert_eq!(state.samples().len(), HISTOGRAM_RESERVOIR_SIZE);
        let summary = state.summary();
        assert_eq!(summary.count, (HISTOGRAM_RESERVOIR_SIZE * 2) as u64);
        assert_eq!(summary.max, (HISTOGRAM_RESERVOIR_SIZE * 2 - 1) as f64);
    }

    #[test]
    fn test_clear_resets_values() {
        let recorder = InMemoryRecorder::new();
        let counter = recorder
            .state
            .get_or_create_counter(&Key::from_static_name("hesim.phy.tx_packets"));
        counter.increment(7);
        let histogram = recorder
            .state
            .get_or_create_histogram(&Key::from_static_name("hesim.phy.rx_snr"));
        histogram.record(20.0);

        recorder.clear();
        counter.increment(1);
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.counters.get("hesim.phy.tx_packets"), Some(&1));
        assert_eq!(snapshot.histograms["hesim.phy.rx_snr"].count, 0);
    }

    #[test]
    fn test_per_node_and_reason_breakdown() {
        let recorder = InMemoryRecorder::new();
        recorder
            .state
            .get_or_create_counter(&phy_key("hesim.phy.rx_dropped", "sta1", Some(("reason", "low_power"))))
            .increment(4);
        recorder
            .state
            .get_or_create_counter(&phy_key("hesim.phy.rx_dropped", "sta2", Some(("reason", "foreign_bss"))))
            .increment(2);
        recorder
            .state
            .get_or_create_counter(&phy_key("hesim.phy.rx_dropped", "sta2", Some(("reason", "low_power"))))
            .increment(1);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.counters.get("hesim.phy.rx_dropped"), Some(&7));
        let by_reason = &snapshot.breakdowns["hesim.phy.rx_dropped"];
        assert_eq!(by_reason.get("reason=low_power"), Some(&5));
        assert_eq!(by_reason.get("reason=foreign_bss"), Some(&2));
        assert!(!by_reason.keys().any(|k| k.starts_with("node")));
        assert_eq!(snapshot.nodes["sta1"].counters.get("hesim.phy.rx_dropped"), Some(&4));
        assert_eq!(snapshot.nodes["sta2"].counters.get("hesim.phy.rx_dropped"), Some(&3));
    }

    #[test]
    fn test_export_json() {
        let recorder = InMemoryRecorder::new();
        recorder
            .state
            .get_or_create_counter(&Key::from_static_name("hesim.phy.tx_packets"))
            .increment(10);

        let mut output = Vec::new();
        export_json(&recorder.snapshot(), &mut output).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["counters"]["hesim.phy.tx_packets"], 10);
        assert!(value.get("nodes").is_none());
    }

    #[test]
    fn test_export_prometheus() {
        let recorder = InMemoryRecorder::new();
        recorder
            .state
            .get_or_create_counter(&phy_key("hesim.phy.tx_dropped", "ap", Some(("reason", "sleeping"))))
            .increment(10);

        let mut output = Vec::new();
        export_prometheus(&recorder.snapshot(), &mut output).unwrap();

        let prom_str = String::from_utf8(output).unwrap();
        assert!(prom_str.contains("# TYPE hesim_phy_tx_dropped counter"));
        assert!(prom_str.contains("hesim_phy_tx_dropped 10"));
        assert!(prom_str.contains("hesim_phy_tx_dropped{reason=\"sleeping\"} 10"));
        assert!(prom_str.contains("hesim_phy_tx_dropped{node=\"ap\"} 10"));
        assert!(!prom_str.contains("gauge"));
    }
}
