//! In-process metrics collection (ambient stack addition, SPEC_FULL.md §4.8).
//!
//! A deliberately small counter/gauge/histogram store keyed by
//! `(name, tags)`, capped at a fixed retention so a long-running worker
//! can't accumulate unbounded series. `notepipe-server` exposes this
//! through a stub endpoint; nothing here depends on a particular metrics
//! backend, mirroring how the rest of the crate keeps transport out of
//! `notepipe-core`.

use std::collections::HashMap;
use std::sync::Mutex;

const DEFAULT_RETENTION: usize = 100;

pub type Tags = Vec<(String, String)>;

#[derive(Debug, Clone, Default)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl HistogramSummary {
    fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

fn series_key(name: &str, tags: &Tags) -> String {
    let mut sorted = tags.clone();
    sorted.sort();
    let tag_str = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}|{tag_str}")
}

/// Counter/gauge/histogram store, capped at `retention` distinct series
/// per kind. Oldest series are not evicted by recency here — insertion
/// past the cap is simply a no-op, logged once at debug level.
pub struct MetricsCollector {
    retention: usize,
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, f64>>,
    histograms: Mutex<HashMap<String, HistogramSummary>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl MetricsCollector {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }

    pub fn increment_counter(&self, name: &str, tags: &Tags) {
        self.increment_counter_by(name, tags, 1);
    }

    pub fn increment_counter_by(&self, name: &str, tags: &Tags, delta: u64) {
        let key = series_key(name, tags);
        let mut counters = self.counters.lock().unwrap();
        if !counters.contains_key(&key) && counters.len() >= self.retention {
            tracing::debug!(name, "metrics retention cap reached, dropping new counter series");
            return;
        }
        *counters.entry(key).or_insert(0) += delta;
    }

    pub fn set_gauge(&self, name: &str, tags: &Tags, value: f64) {
        let key = series_key(name, tags);
        let mut gauges = self.gauges.lock().unwrap();
        if !gauges.contains_key(&key) && gauges.len() >= self.retention {
            tracing::debug!(name, "metrics retention cap reached, dropping new gauge series");
            return;
        }
        gauges.insert(key, value);
    }

    pub fn observe_histogram(&self, name: &str, tags: &Tags, value: f64) {
        let key = series_key(name, tags);
        let mut histograms = self.histograms.lock().unwrap();
        if !histograms.contains_key(&key) && histograms.len() >= self.retention {
            tracing::debug!(name, "metrics retention cap reached, dropping new histogram series");
            return;
        }
        histograms.entry(key).or_default().record(value);
    }

    pub fn counter_value(&self, name: &str, tags: &Tags) -> Option<u64> {
        self.counters.lock().unwrap().get(&series_key(name, tags)).copied()
    }

    pub fn gauge_value(&self, name: &str, tags: &Tags) -> Option<f64> {
        self.gauges.lock().unwrap().get(&series_key(name, tags)).copied()
    }

    pub fn histogram_summary(&self, name: &str, tags: &Tags) -> Option<HistogramSummary> {
        self.histograms.lock().unwrap().get(&series_key(name, tags)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates_across_calls() {
        let metrics = MetricsCollector::new(10);
        let tags: Tags = vec![("queue".into(), "note".into())];
        metrics.increment_counter("jobs_processed", &tags);
        metrics.increment_counter("jobs_processed", &tags);
        assert_eq!(metrics.counter_value("jobs_processed", &tags), Some(2));
    }

    #[test]
    fn distinct_tag_sets_are_distinct_series() {
        let metrics = MetricsCollector::new(10);
        metrics.increment_counter("jobs_processed", &vec![("queue".into(), "note".into())]);
        metrics.increment_counter("jobs_processed", &vec![("queue".into(), "image".into())]);
        assert_eq!(metrics.counter_value("jobs_processed", &vec![("queue".into(), "note".into())]), Some(1));
        assert_eq!(metrics.counter_value("jobs_processed", &vec![("queue".into(), "image".into())]), Some(1));
    }

    #[test]
    fn histogram_tracks_min_max_mean() {
        let metrics = MetricsCollector::new(10);
        let tags: Tags = vec![];
        metrics.observe_histogram("latency_ms", &tags, 10.0);
        metrics.observe_histogram("latency_ms", &tags, 30.0);
        let summary = metrics.histogram_summary("latency_ms", &tags).unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 30.0);
        assert_eq!(summary.mean(), 20.0);
    }

    #[test]
    fn retention_cap_drops_new_series_past_limit() {
        let metrics = MetricsCollector::new(1);
        metrics.increment_counter("a", &vec![]);
        metrics.increment_counter("b", &vec![]);
        assert_eq!(metrics.counter_value("a", &vec![]), Some(1));
        assert_eq!(metrics.counter_value("b", &vec![]), None);
    }
}
