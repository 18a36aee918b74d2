//! Metrics collection and reporting using metrics-rs.
//!
//! Session code records through the `metrics` macros; the CLI installs
//! [`CliRecorder`] when `--metrics` is given and prints a summary at exit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit, counter,
    describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use parking_lot::RwLock;

use crate::channel::ChannelId;

// ============================================================================
// Metric descriptions
// ============================================================================

/// Register metric descriptions. Call once at startup.
pub fn init() {
    describe_counter!(
        "armdiff_commands_total",
        Unit::Count,
        "Commands broadcast to the simulators"
    );
    describe_counter!(
        "armdiff_blocks_total",
        Unit::Count,
        "Framed output blocks received"
    );
    describe_counter!(
        "armdiff_read_timeouts_total",
        Unit::Count,
        "Responses that did not complete within the timeout"
    );
    describe_counter!(
        "armdiff_channel_failures_total",
        Unit::Count,
        "Channels that stopped accepting commands"
    );
    describe_counter!(
        "armdiff_discrepancies_total",
        Unit::Count,
        "State discrepancies reported"
    );
    describe_gauge!(
        "armdiff_live_channels",
        Unit::Count,
        "Simulators still accepting commands"
    );
    describe_histogram!(
        "armdiff_response_seconds",
        Unit::Seconds,
        "Time from dispatch to framed response"
    );
}

// ============================================================================
// Metric recording functions
// ============================================================================

fn labels(channel: ChannelId) -> [(&'static str, String); 1] {
    [("channel", channel.default_binary().to_string())]
}

pub fn record_command() {
    counter!("armdiff_commands_total").increment(1);
}

/// Record one framed block and, if it answered a command, its latency.
pub fn record_block(channel: ChannelId, latency: Option<Duration>) {
    let labels = labels(channel);
    counter!("armdiff_blocks_total", &labels).increment(1);
    if let Some(latency) = latency {
        histogram!("armdiff_response_seconds", &labels).record(latency.as_secs_f64());
    }
}

pub fn record_timeout(channel: ChannelId) {
    counter!("armdiff_read_timeouts_total", &labels(channel)).increment(1);
}

pub fn record_channel_failure(channel: ChannelId) {
    counter!("armdiff_channel_failures_total", &labels(channel)).increment(1);
}

pub fn record_live_channels(live: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("armdiff_live_channels").set(live as f64);
}

pub fn record_discrepancies(count: usize) {
    counter!("armdiff_discrepancies_total").increment(count as u64);
}

// ============================================================================
// CLI Recorder for terminal output
// ============================================================================

#[derive(Default)]
struct CounterStorage {
    values: RwLock<HashMap<String, u64>>,
}

#[derive(Default)]
struct GaugeStorage {
    values: RwLock<HashMap<String, f64>>,
}

#[derive(Default)]
struct HistogramStorage {
    values: RwLock<HashMap<String, Vec<f64>>>,
}

struct CliCounter {
    key: String,
    storage: Arc<CounterStorage>,
}

impl metrics::CounterFn for CliCounter {
    fn increment(&self, value: u64) {
        let mut values = self.storage.values.write();
        *values.entry(self.key.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        self.storage.values.write().insert(self.key.clone(), value);
    }
}

struct CliGauge {
    key: String,
    storage: Arc<GaugeStorage>,
}

impl metrics::GaugeFn for CliGauge {
    fn increment(&self, value: f64) {
        let mut values = self.storage.values.write();
        *values.entry(self.key.clone()).or_insert(0.0) += value;
    }

    fn decrement(&self, value: f64) {
        let mut values = self.storage.values.write();
        *values.entry(self.key.clone()).or_insert(0.0) -= value;
    }

    fn set(&self, value: f64) {
        self.storage.values.write().insert(self.key.clone(), value);
    }
}

struct CliHistogram {
    key: String,
    storage: Arc<HistogramStorage>,
}

impl metrics::HistogramFn for CliHistogram {
    fn record(&self, value: f64) {
        let mut values = self.storage.values.write();
        values.entry(self.key.clone()).or_default().push(value);
    }
}

/// In-memory recorder that prints a summary for CLI usage.
#[derive(Default)]
pub struct CliRecorder {
    counters: Arc<CounterStorage>,
    gauges: Arc<GaugeStorage>,
    histograms: Arc<HistogramStorage>,
}

impl CliRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install as the global recorder. `None` if one is already installed.
    #[must_use]
    pub fn install(self) -> Option<CliRecorderHandle> {
        let handle = CliRecorderHandle {
            counters: Arc::clone(&self.counters),
            gauges: Arc::clone(&self.gauges),
            histograms: Arc::clone(&self.histograms),
        };
        metrics::set_global_recorder(self).ok()?;
        Some(handle)
    }
}

fn key_to_string(key: &Key) -> String {
    let name = key.name();
    let labels = key.labels();
    if labels.len() == 0 {
        name.to_string()
    } else {
        let label_str: Vec<String> = labels
            .map(|l| format!("{}={}", l.key(), l.value()))
            .collect();
        format!("{}{{{}}}", name, label_str.join(","))
    }
}

impl Recorder for CliRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(CliCounter {
            key: key_to_string(key),
            storage: Arc::clone(&self.counters),
        }))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(CliGauge {
            key: key_to_string(key),
            storage: Arc::clone(&self.gauges),
        }))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(CliHistogram {
            key: key_to_string(key),
            storage: Arc::clone(&self.histograms),
        }))
    }
}

/// Handle for reading metrics after the recorder is installed.
pub struct CliRecorderHandle {
    counters: Arc<CounterStorage>,
    gauges: Arc<GaugeStorage>,
    histograms: Arc<HistogramStorage>,
}

impl CliRecorderHandle {
    /// Print all collected metrics, sorted by key.
    pub fn print_summary(&self) {
        let counters = self.counters.values.read();
        let gauges = self.gauges.values.read();
        let histograms = self.histograms.values.read();

        if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
            eprintln!("No metrics collected.");
            return;
        }

        eprintln!();
        eprintln!("## Metrics Summary");

        let mut keys: Vec<_> = counters.keys().collect();
        keys.sort();
        if !keys.is_empty() {
            eprintln!("### Counters");
            for key in keys {
                eprintln!("  {}: {}", key, counters[key]);
            }
        }

        let mut keys: Vec<_> = gauges.keys().collect();
        keys.sort();
        if !keys.is_empty() {
            eprintln!("### Gauges");
            for key in keys {
                eprintln!("  {}: {:.3}", key, gauges[key]);
            }
        }

        let mut keys: Vec<_> = histograms.keys().collect();
        keys.sort();
        if !keys.is_empty() {
            eprintln!("### Histograms");
            for key in keys {
                let values = &histograms[key];
                if values.is_empty() {
                    continue;
                }
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                #[allow(clippy::cast_precision_loss)]
                let avg = values.iter().sum::<f64>() / values.len() as f64;
                eprintln!(
                    "  {}: count={}, min={:.6}, max={:.6}, avg={:.6}",
                    key,
                    values.len(),
                    min,
                    max,
                    avg
                );
            }
        }
    }
}
