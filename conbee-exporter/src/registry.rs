//! Gauge registry that materializes sensor readings as Prometheus gauges.
//!
//! A gauge is identified by the sensor id (the subsystem) and measurement
//! name, and carries a fixed set of label keys. Gauges are created lazily on
//! first use and live until the process exits; every distinct tuple of label
//! values is a separate series of that gauge.
//!
//! The total number of series is bounded by `max_series`. At the limit a new
//! series of an existing gauge replaces that gauge's least recently updated
//! series, so the latest reading of every registered gauge stays visible.
//! Series of gauges that would be created at the limit are dropped.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Write;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::mapping::{LabelSet, SensorReadings, build_metric_name, sanitize_label_name};

/// Identity of a gauge within the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GaugeId {
    /// Sensor id.
    pub subsystem: String,
    /// Measurement name.
    pub name: String,
}

impl GaugeId {
    pub fn new(subsystem: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            subsystem: subsystem.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f64,
    /// Registry write sequence number of the last update.
    updated: u64,
}

/// A registered gauge and its series.
#[derive(Debug)]
struct Gauge {
    /// Exposed metric name, `{namespace}_{subsystem}_{name}`.
    metric_name: String,
    help: String,
    /// Sorted, sanitized label keys. Fixed once registered.
    label_keys: Vec<String>,
    /// Label values (ordered like `label_keys`) to current sample.
    series: HashMap<Vec<String>, Sample>,
}

impl Gauge {
    /// Label values of the least recently updated series.
    fn stalest_series(&self) -> Option<Vec<String>> {
        self.series
            .iter()
            .min_by_key(|(_, sample)| sample.updated)
            .map(|(values, _)| values.clone())
    }
}

#[derive(Debug, Default)]
struct Gauges {
    by_id: HashMap<GaugeId, Gauge>,
    /// Exposed metric name to the gauge that first claimed it.
    by_name: HashMap<String, GaugeId>,
    series_count: usize,
    /// Monotonic write counter used to order series by recency.
    clock: u64,
}

/// Exporter self-statistics, rendered alongside the sensor gauges.
#[derive(Debug, Clone, Default)]
pub struct ExporterStats {
    /// Poll cycles that fetched and published successfully.
    pub polls_completed: u64,
    /// Poll cycles that failed to fetch or decode.
    pub polls_failed: u64,
    /// Sensors whose readings were published.
    pub sensors_published: u64,
    /// Sensors skipped because their type has no mapping rule.
    pub sensors_unmapped: u64,
    /// Sensors skipped by the configured filters.
    pub sensors_filtered: u64,
    /// Sensor entries the gateway returned in an unexpected shape.
    pub sensors_rejected: u64,
    /// New series dropped because `max_series` was reached.
    pub series_dropped: u64,
    /// Stale series replaced by a newer one at the `max_series` limit.
    pub series_evicted: u64,
    /// Gauges whose sanitized metric name was already taken by another gauge.
    pub name_collisions: u64,
    /// Unix time of the last completed poll.
    pub last_success_unix: Option<i64>,
}

/// Outcome of one completed poll cycle, as counted in [`ExporterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub published: u64,
    pub unmapped: u64,
    pub filtered: u64,
    pub rejected: u64,
    /// Measurements written across all sensors.
    pub measurements: u64,
}

/// Process-wide gauge registry.
pub struct GaugeRegistry {
    namespace: String,
    max_series: usize,
    gauges: RwLock<Gauges>,
    stats: RwLock<ExporterStats>,
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<GaugeRegistry>;

impl GaugeRegistry {
    /// Create an empty registry.
    pub fn new(namespace: impl Into<String>, max_series: usize) -> Self {
        Self {
            namespace: namespace.into(),
            max_series,
            gauges: RwLock::new(Gauges::default()),
            stats: RwLock::new(ExporterStats::default()),
        }
    }

    /// Metric namespace prefix.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Set one measurement, registering its gauge on first use.
    ///
    /// Returns `false` when the value was dropped by the series limit.
    ///
    /// # Panics
    ///
    /// If the gauge was already registered with a different label key set.
    /// Sensor rules fix the label keys per type, so this is a programming
    /// error rather than a runtime condition.
    pub fn set(&self, sensor_id: &str, measurement: &str, value: f64, labels: &LabelSet) -> bool {
        let id = GaugeId::new(sensor_id, measurement);
        let (label_keys, label_values) = split_labels(labels);

        let mut guard = self.gauges.write();
        let gauges = &mut *guard;
        gauges.clock += 1;
        let sample = Sample {
            value,
            updated: gauges.clock,
        };
        let at_limit = gauges.series_count >= self.max_series;

        if let Some(gauge) = gauges.by_id.get_mut(&id) {
            assert_eq!(
                gauge.label_keys, label_keys,
                "gauge {} re-registered with a different label key set",
                gauge.metric_name
            );

            if let Some(existing) = gauge.series.get_mut(&label_values) {
                *existing = sample;
                return true;
            }

            if at_limit {
                if let Some(stalest) = gauge.stalest_series() {
                    gauge.series.remove(&stalest);
                    gauge.series.insert(label_values, sample);
                    drop(guard);
                    self.stats.write().series_evicted += 1;
                    debug!(
                        sensor = sensor_id,
                        measurement,
                        "Max series limit reached, replaced stalest series"
                    );
                    return true;
                }
            }
        }

        if at_limit {
            drop(guard);
            self.stats.write().series_dropped += 1;
            warn!(
                max_series = self.max_series,
                sensor = sensor_id,
                measurement,
                "Max series limit reached, dropping new series"
            );
            return false;
        }

        let mut collision = None;
        let gauge = match gauges.by_id.entry(id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let metric_name = build_metric_name(&self.namespace, sensor_id, measurement);
                match gauges.by_name.entry(metric_name.clone()) {
                    Entry::Occupied(owner) => collision = Some(owner.get().clone()),
                    Entry::Vacant(slot) => {
                        slot.insert(entry.key().clone());
                    }
                }
                debug!(metric = %metric_name, labels = ?label_keys, "Registered gauge");
                entry.insert(Gauge {
                    help: format!("{} reported by sensor {}", measurement, sensor_id),
                    metric_name,
                    label_keys,
                    series: HashMap::new(),
                })
            }
        };

        if gauge.series.insert(label_values, sample).is_none() {
            gauges.series_count += 1;
        }

        if let Some(owner) = collision {
            let metric_name = gauge.metric_name.clone();
            drop(guard);
            self.stats.write().name_collisions += 1;
            warn!(
                metric = %metric_name,
                sensor = sensor_id,
                measurement,
                other_sensor = %owner.subsystem,
                other_measurement = %owner.name,
                "Metric name already used by another gauge"
            );
        }

        true
    }

    /// Publish every measurement of one sensor. Returns the number written.
    pub fn publish(&self, sensor_id: &str, readings: &SensorReadings) -> usize {
        let mut written = 0;
        for (name, value) in &readings.measurements {
            if self.set(sensor_id, name, *value, &readings.labels) {
                written += 1;
            }
        }
        written
    }

    /// Current value of one series, if present.
    pub fn value(&self, sensor_id: &str, measurement: &str, labels: &LabelSet) -> Option<f64> {
        let (_, label_values) = split_labels(labels);
        self.gauges
            .read()
            .by_id
            .get(&GaugeId::new(sensor_id, measurement))
            .and_then(|gauge| gauge.series.get(&label_values))
            .map(|sample| sample.value)
    }

    /// Number of registered gauges.
    pub fn gauge_count(&self) -> usize {
        self.gauges.read().by_id.len()
    }

    /// Number of series across all gauges.
    pub fn series_count(&self) -> usize {
        self.gauges.read().series_count
    }

    /// Snapshot of the exporter statistics.
    pub fn stats(&self) -> ExporterStats {
        self.stats.read().clone()
    }

    /// Count a completed poll cycle.
    pub fn record_poll(&self, summary: &PollSummary, finished_unix: i64) {
        let mut stats = self.stats.write();
        stats.polls_completed += 1;
        stats.sensors_published += summary.published;
        stats.sensors_unmapped += summary.unmapped;
        stats.sensors_filtered += summary.filtered;
        stats.sensors_rejected += summary.rejected;
        stats.last_success_unix = Some(finished_unix);
    }

    /// Count a failed poll cycle.
    pub fn record_poll_failure(&self) {
        self.stats.write().polls_failed += 1;
    }

    /// Render all gauges in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let gauges = self.gauges.read();
        let mut output = String::with_capacity(gauges.series_count * 128);

        let mut sorted: Vec<&Gauge> = gauges.by_id.values().collect();
        sorted.sort_by(|a, b| a.metric_name.cmp(&b.metric_name));

        for gauge in sorted {
            writeln!(output, "# HELP {} {}", gauge.metric_name, escape_help(&gauge.help)).ok();
            writeln!(output, "# TYPE {} gauge", gauge.metric_name).ok();

            let mut series: Vec<_> = gauge.series.iter().collect();
            series.sort_by(|a, b| a.0.cmp(b.0));

            for (values, sample) in series {
                writeln!(
                    output,
                    "{}{} {}",
                    gauge.metric_name,
                    format_labels(&gauge.label_keys, values),
                    format_value(sample.value)
                )
                .ok();
            }
        }

        let gauge_count = gauges.by_id.len();
        let series_count = gauges.series_count;
        drop(gauges);

        let stats = self.stats();
        let ns = &self.namespace;
        writeln!(output).ok();
        let mut self_metric = |name: &str, kind: &str, help: &str, value: f64| {
            writeln!(output, "# HELP {ns}_exporter_{name} {help}").ok();
            writeln!(output, "# TYPE {ns}_exporter_{name} {kind}").ok();
            writeln!(output, "{ns}_exporter_{name} {}", format_value(value)).ok();
        };

        self_metric(
            "polls_completed_total",
            "counter",
            "Completed gateway poll cycles.",
            stats.polls_completed as f64,
        );
        self_metric(
            "polls_failed_total",
            "counter",
            "Gateway poll cycles that failed.",
            stats.polls_failed as f64,
        );
        self_metric(
            "sensors_published_total",
            "counter",
            "Sensors whose readings were published.",
            stats.sensors_published as f64,
        );
        self_metric(
            "sensors_unmapped_total",
            "counter",
            "Sensors skipped because their type is not supported.",
            stats.sensors_unmapped as f64,
        );
        self_metric(
            "sensors_filtered_total",
            "counter",
            "Sensors skipped by configured filters.",
            stats.sensors_filtered as f64,
        );
        self_metric(
            "sensors_rejected_total",
            "counter",
            "Sensor entries that could not be decoded.",
            stats.sensors_rejected as f64,
        );
        self_metric(
            "series_dropped_total",
            "counter",
            "New series dropped by the series limit.",
            stats.series_dropped as f64,
        );
        self_metric(
            "series_evicted_total",
            "counter",
            "Stale series replaced by newer ones at the series limit.",
            stats.series_evicted as f64,
        );
        self_metric(
            "metric_name_collisions_total",
            "counter",
            "Gauges whose metric name was already used by another gauge.",
            stats.name_collisions as f64,
        );
        self_metric("gauges", "gauge", "Registered sensor gauges.", gauge_count as f64);
        self_metric("series", "gauge", "Sensor series across all gauges.", series_count as f64);
        if let Some(ts) = stats.last_success_unix {
            self_metric(
                "last_success_timestamp_seconds",
                "gauge",
                "Unix time of the last completed poll.",
                ts as f64,
            );
        }

        output
    }
}

/// Sorted, sanitized keys and the matching values of a label set.
fn split_labels(labels: &LabelSet) -> (Vec<String>, Vec<String>) {
    let mut pairs: Vec<(String, &String)> = labels
        .iter()
        .map(|(k, v)| (sanitize_label_name(k), v))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs.into_iter().map(|(k, v)| (k, v.clone())).unzip()
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape HELP text: only backslash and newline are special there.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a label set for the exposition format, e.g. `{a="1",b="2"}`.
fn format_labels(keys: &[String], values: &[String]) -> String {
    if keys.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = keys
        .iter()
        .zip(values)
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn temperature_labels(lastupdated: &str) -> LabelSet {
        labels(&[
            ("Lastupdated", lastupdated),
            ("Name", "Kitchen"),
            ("Type", "ZHATemperature"),
        ])
    }

    #[test]
    fn test_set_registers_and_updates() {
        let registry = GaugeRegistry::new("conbee", 1000);
        let labels = temperature_labels("2023-01-01T00:00:00");

        assert!(registry.set("5", "Temperature", 2150.0, &labels));
        assert!(registry.set("5", "Temperature", 2200.0, &labels));

        assert_eq!(registry.gauge_count(), 1);
        assert_eq!(registry.series_count(), 1);
        assert_eq!(registry.value("5", "Temperature", &labels), Some(2200.0));
    }

    #[test]
    fn test_new_label_values_create_new_series() {
        let registry = GaugeRegistry::new("conbee", 1000);

        registry.set("5", "Temperature", 2150.0, &temperature_labels("2023-01-01T00:00:00"));
        registry.set("5", "Temperature", 2160.0, &temperature_labels("2023-01-01T00:05:00"));

        assert_eq!(registry.gauge_count(), 1);
        assert_eq!(registry.series_count(), 2);
    }

    #[test]
    #[should_panic(expected = "different label key set")]
    fn test_changing_label_keys_panics() {
        let registry = GaugeRegistry::new("conbee", 1000);

        registry.set("5", "Temperature", 1.0, &temperature_labels("none"));
        registry.set("5", "Temperature", 1.0, &labels(&[("Name", "Kitchen")]));
    }

    #[test]
    fn test_publish_writes_every_measurement() {
        let registry = GaugeRegistry::new("conbee", 1000);
        let readings = SensorReadings {
            measurements: [
                ("Alarm".to_string(), 1.0),
                ("Lowbattery".to_string(), 0.0),
                ("Tampered".to_string(), 1.0),
            ]
            .into_iter()
            .collect(),
            labels: labels(&[("Lastupdated", "none"), ("Name", "Siren"), ("Type", "ZHAAlarm")]),
        };

        assert_eq!(registry.publish("2", &readings), 3);
        assert_eq!(registry.gauge_count(), 3);
        assert_eq!(registry.value("2", "Tampered", &readings.labels), Some(1.0));
    }

    #[test]
    fn test_max_series_limit() {
        let registry = GaugeRegistry::new("conbee", 2);

        for i in 0..5 {
            registry.set(&i.to_string(), "Humidity", i as f64, &labels(&[("Name", "x")]));
        }

        assert_eq!(registry.series_count(), 2);
        assert_eq!(registry.gauge_count(), 2);
        assert_eq!(registry.stats().series_dropped, 3);

        // Updating an existing series still works at the limit.
        assert!(registry.set("0", "Humidity", 42.0, &labels(&[("Name", "x")])));
    }

    #[test]
    fn test_max_series_keeps_latest_reading() {
        let registry = GaugeRegistry::new("conbee", 2);
        let first = temperature_labels("2023-01-01T00:00:00");
        let second = temperature_labels("2023-01-01T00:05:00");
        let third = temperature_labels("2023-01-01T00:10:00");

        assert!(registry.set("5", "Temperature", 2150.0, &first));
        assert!(registry.set("5", "Temperature", 2160.0, &second));
        assert!(registry.set("5", "Temperature", 2170.0, &third));

        assert_eq!(registry.series_count(), 2);
        assert_eq!(registry.value("5", "Temperature", &third), Some(2170.0));
        assert_eq!(registry.value("5", "Temperature", &second), Some(2160.0));
        assert_eq!(registry.value("5", "Temperature", &first), None);

        let stats = registry.stats();
        assert_eq!(stats.series_evicted, 1);
        assert_eq!(stats.series_dropped, 0);
    }

    #[test]
    fn test_eviction_picks_least_recently_updated() {
        let registry = GaugeRegistry::new("conbee", 2);
        let first = temperature_labels("2023-01-01T00:00:00");
        let second = temperature_labels("2023-01-01T00:05:00");

        registry.set("5", "Temperature", 1.0, &first);
        registry.set("5", "Temperature", 2.0, &second);
        // Refresh the older series so the other one becomes the stalest.
        registry.set("5", "Temperature", 3.0, &first);
        registry.set("5", "Temperature", 4.0, &temperature_labels("none"));

        assert_eq!(registry.value("5", "Temperature", &first), Some(3.0));
        assert_eq!(registry.value("5", "Temperature", &second), None);
    }

    #[test]
    fn test_metric_name_collision_is_counted() {
        let registry = GaugeRegistry::new("conbee", 1000);
        let labels = labels(&[("Name", "x")]);

        registry.set("1-a", "Lux", 1.0, &labels);
        registry.set("1_a", "Lux", 2.0, &labels);
        registry.set("1_a", "Lux", 3.0, &labels);

        assert_eq!(registry.gauge_count(), 2);
        assert_eq!(registry.stats().name_collisions, 1);
        assert!(registry.render().contains("conbee_exporter_metric_name_collisions_total 1"));
    }

    #[test]
    fn test_render_output() {
        let registry = GaugeRegistry::new("conbee", 1000);
        registry.set("5", "Temperature", 2150.0, &temperature_labels("2023-01-01T00:00:00"));

        let output = registry.render();
        assert!(output.contains("# TYPE conbee_5_Temperature gauge"));
        assert!(output.contains(
            "conbee_5_Temperature{Lastupdated=\"2023-01-01T00:00:00\",Name=\"Kitchen\",Type=\"ZHATemperature\"} 2150"
        ));
        assert!(output.contains("conbee_exporter_gauges 1"));
        assert!(output.contains("conbee_exporter_polls_completed_total 0"));
        assert!(!output.contains("last_success_timestamp_seconds"));
    }

    #[test]
    fn test_render_is_sorted() {
        let registry = GaugeRegistry::new("conbee", 1000);
        let labels = labels(&[("Name", "n")]);
        registry.set("9", "Lux", 1.0, &labels);
        registry.set("10", "Lux", 2.0, &labels);
        registry.set("1", "Lux", 3.0, &labels);

        let output = registry.render();
        let first = output.find("conbee_10_Lux").unwrap();
        let second = output.find("conbee_1_Lux").unwrap();
        let third = output.find("conbee_9_Lux").unwrap();
        assert!(first < second);
        assert!(second < third);
    }

    #[test]
    fn test_record_poll_stats() {
        let registry = GaugeRegistry::new("conbee", 1000);
        let summary = PollSummary {
            published: 4,
            unmapped: 1,
            filtered: 2,
            rejected: 0,
            measurements: 9,
        };

        registry.record_poll(&summary, 1_700_000_000);
        registry.record_poll_failure();

        let stats = registry.stats();
        assert_eq!(stats.polls_completed, 1);
        assert_eq!(stats.polls_failed, 1);
        assert_eq!(stats.sensors_published, 4);
        assert_eq!(stats.sensors_unmapped, 1);
        assert_eq!(stats.sensors_filtered, 2);
        assert_eq!(stats.last_success_unix, Some(1_700_000_000));

        let output = registry.render();
        assert!(output.contains("conbee_exporter_last_success_timestamp_seconds 1700000000"));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(42.0), "42");
        assert_eq!(format_value(-450.0), "-450");
        assert_eq!(format_value(0.5), "0.5");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
    }
}
