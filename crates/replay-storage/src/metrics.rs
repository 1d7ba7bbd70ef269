//! Prometheus-compatible metrics for the session upload pipeline.
//!
//! Counters and histograms are plain atomics so preparation tasks, the upload
//! worker and a scraper can all touch them without locking. Observations are
//! informational only; nothing in the pipeline reads them back.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bucket upper bounds for byte-size histograms.
pub const SIZE_BUCKETS: &[f64] = &[
    1_024.0,
    10_240.0,
    102_400.0,
    1_048_576.0,
    10_485_760.0,
    104_857_600.0,
    524_288_000.0,
];

/// Bucket upper bounds for millisecond duration histograms.
pub const DURATION_BUCKETS_MS: &[f64] = &[1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1_000.0, 5_000.0, 30_000.0];

/// The type of metric: counter or histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A histogram with buckets.
    Histogram,
}

/// The value of a metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// A counter value.
    Counter(u64),
    /// A histogram with sum, count, and cumulative bucket counts.
    Histogram {
        /// Sum of all observed values.
        sum: f64,
        /// Total count of observations.
        count: u64,
        /// `(upper bound, cumulative count)` pairs.
        buckets: Vec<(f64, u64)>,
    },
}

/// A single metric with metadata and value.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageMetric {
    /// The metric name.
    pub name: String,
    /// Help text describing the metric.
    pub help: String,
    /// The kind of metric.
    pub kind: MetricKind,
    /// The metric value.
    pub value: MetricValue,
}

/// Fixed-bucket histogram over `f64` observations.
#[derive(Debug)]
pub struct Histogram {
    bounds: &'static [f64],
    /// One slot per bound plus the `+Inf` overflow slot.
    buckets: Vec<AtomicU64>,
    sum_bits: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a histogram with the given ascending bucket bounds.
    pub fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            buckets: (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            sum_bits: AtomicU64::new(0f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    /// Record one observation.
    pub fn observe(&self, value: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|b| value <= *b)
            .unwrap_or(self.bounds.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let mut current = self.sum_bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self.sum_bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Number of observations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of all observations.
    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }

    fn value(&self) -> MetricValue {
        let mut cumulative = 0u64;
        let mut buckets = Vec::with_capacity(self.bounds.len() + 1);
        for (i, slot) in self.buckets.iter().enumerate() {
            cumulative += slot.load(Ordering::Relaxed);
            let bound = self.bounds.get(i).copied().unwrap_or(f64::INFINITY);
            buckets.push((bound, cumulative));
        }
        MetricValue::Histogram {
            sum: self.sum(),
            count: self.count(),
            buckets,
        }
    }
}

/// Thread-safe metrics for the session upload pipeline.
#[derive(Debug)]
pub struct StorageMetrics {
    /// Sessions whose task reached the hand-off queue.
    sessions_total: AtomicU64,
    /// Segments dropped during preparation (missing, too big, unreadable).
    segments_skipped: AtomicU64,
    /// Objects written to the object store.
    objects_uploaded: AtomicU64,
    /// Bytes written to the object store.
    upload_bytes: AtomicU64,
    /// Puts that failed after all attempts.
    upload_failures: AtomicU64,
    /// Raw DOM capture size.
    dom_size: Histogram,
    /// Raw devtools capture size.
    devtools_size: Histogram,
    /// Time spent reading capture files.
    reading_duration: Histogram,
    /// Time spent encrypting and compressing.
    archiving_duration: Histogram,
    /// Time spent uploading one task.
    upload_duration: Histogram,
}

impl StorageMetrics {
    /// Create a new StorageMetrics with all counters initialized to zero.
    pub fn new() -> Self {
        Self {
            sessions_total: AtomicU64::new(0),
            segments_skipped: AtomicU64::new(0),
            objects_uploaded: AtomicU64::new(0),
            upload_bytes: AtomicU64::new(0),
            upload_failures: AtomicU64::new(0),
            dom_size: Histogram::new(SIZE_BUCKETS),
            devtools_size: Histogram::new(SIZE_BUCKETS),
            reading_duration: Histogram::new(DURATION_BUCKETS_MS),
            archiving_duration: Histogram::new(DURATION_BUCKETS_MS),
            upload_duration: Histogram::new(DURATION_BUCKETS_MS),
        }
    }

    /// Record a session task handed to the upload worker.
    #[inline]
    pub fn record_session(&self) {
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a segment that was left out of its task.
    #[inline]
    pub fn record_segment_skipped(&self) {
        self.segments_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the raw size of a DOM capture.
    #[inline]
    pub fn record_dom_size(&self, bytes: u64) {
        self.dom_size.observe(bytes as f64);
    }

    /// Record the raw size of a devtools capture.
    #[inline]
    pub fn record_devtools_size(&self, bytes: u64) {
        self.devtools_size.observe(bytes as f64);
    }

    /// Record how long reading a capture file took.
    #[inline]
    pub fn record_read(&self, elapsed: Duration) {
        self.reading_duration.observe(as_millis(elapsed));
    }

    /// Record how long encrypting and compressing a capture took.
    #[inline]
    pub fn record_archive(&self, elapsed: Duration) {
        self.archiving_duration.observe(as_millis(elapsed));
    }

    /// Record one successful put.
    #[inline]
    pub fn record_upload(&self, bytes: u64) {
        self.objects_uploaded.fetch_add(1, Ordering::Relaxed);
        self.upload_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a put that exhausted its attempts.
    #[inline]
    pub fn record_upload_failure(&self) {
        self.upload_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the wall time of uploading one task.
    #[inline]
    pub fn record_task_upload(&self, elapsed: Duration) {
        self.upload_duration.observe(as_millis(elapsed));
    }

    /// Collect all metrics for export.
    pub fn collect(&self) -> Vec<StorageMetric> {
        let counter = |name: &str, help: &str, v: &AtomicU64| StorageMetric {
            name: name.to_string(),
            help: help.to_string(),
            kind: MetricKind::Counter,
            value: MetricValue::Counter(v.load(Ordering::Relaxed)),
        };
        let histogram = |name: &str, help: &str, h: &Histogram| StorageMetric {
            name: name.to_string(),
            help: help.to_string(),
            kind: MetricKind::Histogram,
            value: h.value(),
        };

        vec![
            counter(
                "replay_storage_sessions_total",
                "Total sessions handed to the upload worker",
                &self.sessions_total,
            ),
            counter(
                "replay_storage_segments_skipped_total",
                "Capture segments left out of a task (missing, oversized or unreadable)",
                &self.segments_skipped,
            ),
            counter(
                "replay_storage_objects_uploaded_total",
                "Total objects written to the object store",
                &self.objects_uploaded,
            ),
            counter(
                "replay_storage_upload_bytes_total",
                "Total bytes written to the object store",
                &self.upload_bytes,
            ),
            counter(
                "replay_storage_upload_failures_total",
                "Puts that failed after all attempts",
                &self.upload_failures,
            ),
            histogram(
                "replay_storage_sessions_size_bytes",
                "Raw DOM capture size",
                &self.dom_size,
            ),
            histogram(
                "replay_storage_sessions_dt_size_bytes",
                "Raw devtools capture size",
                &self.devtools_size,
            ),
            histogram(
                "replay_storage_reading_duration_ms",
                "Time spent reading a capture file",
                &self.reading_duration,
            ),
            histogram(
                "replay_storage_archiving_duration_ms",
                "Time spent encrypting and compressing a capture file",
                &self.archiving_duration,
            ),
            histogram(
                "replay_storage_upload_duration_ms",
                "Time spent uploading all segments of one session",
                &self.upload_duration,
            ),
        ]
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        for metric in self.collect() {
            let kind = match metric.kind {
                MetricKind::Counter => "counter",
                MetricKind::Histogram => "histogram",
            };
            let _ = writeln!(out, "# HELP {} {}", metric.name, metric.help);
            let _ = writeln!(out, "# TYPE {} {}", metric.name, kind);
            match metric.value {
                MetricValue::Counter(v) => {
                    let _ = writeln!(out, "{} {}", metric.name, v);
                }
                MetricValue::Histogram {
                    sum,
                    count,
                    buckets,
                } => {
                    for (bound, cumulative) in buckets {
                        let le = if bound.is_infinite() {
                            "+Inf".to_string()
                        } else {
                            bound.to_string()
                        };
                        let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", metric.name, le, cumulative);
                    }
                    let _ = writeln!(out, "{}_sum {}", metric.name, sum);
                    let _ = writeln!(out, "{}_count {}", metric.name, count);
                }
            }
        }
        out
    }

    /// Take a point-in-time snapshot of the counters and histogram totals.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            segments_skipped: self.segments_skipped.load(Ordering::Relaxed),
            objects_uploaded: self.objects_uploaded.load(Ordering::Relaxed),
            upload_bytes: self.upload_bytes.load(Ordering::Relaxed),
            upload_failures: self.upload_failures.load(Ordering::Relaxed),
            dom_captures: self.dom_size.count(),
            dom_bytes: self.dom_size.sum() as u64,
            devtools_captures: self.devtools_size.count(),
            devtools_bytes: self.devtools_size.sum() as u64,
        }
    }
}

impl Default for StorageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn as_millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1_000.0
}

/// A point-in-time snapshot of the pipeline metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Sessions handed to the upload worker.
    pub sessions_total: u64,
    /// Segments left out of their task.
    pub segments_skipped: u64,
    /// Objects written to the object store.
    pub objects_uploaded: u64,
    /// Bytes written to the object store.
    pub upload_bytes: u64,
    /// Puts that failed after all attempts.
    pub upload_failures: u64,
    /// DOM captures read.
    pub dom_captures: u64,
    /// Raw DOM bytes read.
    pub dom_bytes: u64,
    /// Devtools captures read.
    pub devtools_captures: u64,
    /// Raw devtools bytes read.
    pub devtools_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_metrics_are_zero() {
        let metrics = StorageMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let h = Histogram::new(&[10.0, 100.0]);
        h.observe(5.0);
        h.observe(50.0);
        h.observe(500.0);
        assert_eq!(h.count(), 3);
        assert!((h.sum() - 555.0).abs() < f64::EPSILON);

        match h.value() {
            MetricValue::Histogram { buckets, .. } => {
                assert_eq!(buckets[0], (10.0, 1));
                assert_eq!(buckets[1], (100.0, 2));
                assert_eq!(buckets[2].1, 3);
                assert!(buckets[2].0.is_infinite());
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_record_sizes() {
        let metrics = StorageMetrics::new();
        metrics.record_dom_size(1000);
        metrics.record_dom_size(3000);
        metrics.record_devtools_size(42);

        let snap = metrics.snapshot();
        assert_eq!(snap.dom_captures, 2);
        assert_eq!(snap.dom_bytes, 4000);
        assert_eq!(snap.devtools_captures, 1);
        assert_eq!(snap.devtools_bytes, 42);
    }

    #[test]
    fn test_record_uploads() {
        let metrics = StorageMetrics::new();
        metrics.record_session();
        metrics.record_upload(100);
        metrics.record_upload(50);
        metrics.record_upload_failure();
        metrics.record_segment_skipped();

        let snap = metrics.snapshot();
        assert_eq!(snap.sessions_total, 1);
        assert_eq!(snap.objects_uploaded, 2);
        assert_eq!(snap.upload_bytes, 150);
        assert_eq!(snap.upload_failures, 1);
        assert_eq!(snap.segments_skipped, 1);
    }

    #[test]
    fn test_collect_metric_names() {
        let metrics = StorageMetrics::new();
        let names: Vec<_> = metrics.collect().into_iter().map(|m| m.name).collect();

        for expected in [
            "replay_storage_sessions_total",
            "replay_storage_sessions_size_bytes",
            "replay_storage_sessions_dt_size_bytes",
            "replay_storage_reading_duration_ms",
            "replay_storage_archiving_duration_ms",
            "replay_storage_upload_duration_ms",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[test]
    fn test_render_prometheus() {
        let metrics = StorageMetrics::new();
        metrics.record_session();
        metrics.record_read(Duration::from_millis(3));

        let text = metrics.render_prometheus();
        assert!(text.contains("# TYPE replay_storage_sessions_total counter"));
        assert!(text.contains("replay_storage_sessions_total 1"));
        assert!(text.contains("replay_storage_reading_duration_ms_bucket{le=\"5\"} 1"));
        assert!(text.contains("replay_storage_reading_duration_ms_bucket{le=\"+Inf\"} 1"));
        assert!(text.contains("replay_storage_reading_duration_ms_count 1"));
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(StorageMetrics::new());
        let mut handles = Vec::new();

        for _ in 0..4 {
            let m = Arc::clone(&metrics);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    m.record_upload(1);
                    m.record_dom_size(2);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.objects_uploaded, 400);
        assert_eq!(snap.dom_captures, 400);
        assert_eq!(snap.dom_bytes, 800);
    }
}
