use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency samples kept per series; older ones are dropped
pub const SAMPLE_WINDOW: usize = 1024;

/// Pipeline stages with a recorded duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detect,
    Fuse,
    Translate,
    Render,
}

impl Stage {
    const ALL: [Stage; 4] = [Stage::Detect, Stage::Fuse, Stage::Translate, Stage::Render];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Detect => "detect",
            Stage::Fuse => "fuse",
            Stage::Translate => "translate",
            Stage::Render => "render",
        }
    }
}

/// Process-wide counters for the overlay service.
///
/// Cheap to clone; every clone records into the same counters.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    backend_calls_total: AtomicUsize,
    backend_calls_failed: AtomicUsize,
    texts_translated: AtomicUsize,
    backend_latency_ms: RwLock<VecDeque<u64>>,

    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    cache_size: AtomicUsize,

    stage_duration_ms: [RwLock<VecDeque<u64>>; 4],

    runs_completed: AtomicUsize,
    runs_failed: AtomicUsize,
    runs_rejected: AtomicUsize,
    regions_fused: AtomicUsize,

    endpoint_counters: DashMap<String, AtomicUsize>,
    circuit_breaker_trips: AtomicUsize,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                backend_calls_total: AtomicUsize::new(0),
                backend_calls_failed: AtomicUsize::new(0),
                texts_translated: AtomicUsize::new(0),
                backend_latency_ms: RwLock::new(VecDeque::new()),
                cache_hits: AtomicUsize::new(0),
                cache_misses: AtomicUsize::new(0),
                cache_size: AtomicUsize::new(0),
                stage_duration_ms: Default::default(),
                runs_completed: AtomicUsize::new(0),
                runs_failed: AtomicUsize::new(0),
                runs_rejected: AtomicUsize::new(0),
                regions_fused: AtomicUsize::new(0),
                endpoint_counters: DashMap::new(),
                circuit_breaker_trips: AtomicUsize::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    /// One translation backend call carrying `texts` source strings
    pub fn record_backend_call(&self, success: bool, duration: Duration, texts: usize) {
        self.inner.backend_calls_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.inner.texts_translated.fetch_add(texts, Ordering::Relaxed);
        } else {
            self.inner.backend_calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        push_sample(&self.inner.backend_latency_ms, duration);
    }

    pub fn record_cache_hits(&self, hits: usize) {
        self.inner.cache_hits.fetch_add(hits, Ordering::Relaxed);
    }

    pub fn record_cache_misses(&self, misses: usize) {
        self.inner.cache_misses.fetch_add(misses, Ordering::Relaxed);
    }

    pub fn update_cache_size(&self, size: usize) {
        self.inner.cache_size.store(size, Ordering::Relaxed);
    }

    pub fn record_stage(&self, stage: Stage, duration: Duration) {
        push_sample(&self.inner.stage_duration_ms[stage.index()], duration);
    }

    pub fn record_run(&self, success: bool, regions: usize) {
        if success {
            self.inner.runs_completed.fetch_add(1, Ordering::Relaxed);
            self.inner.regions_fused.fetch_add(regions, Ordering::Relaxed);
        } else {
            self.inner.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A request refused because a run was already in flight
    pub fn record_run_rejected(&self) {
        self.inner.runs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_breaker_trip(&self) {
        self.inner.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (latency_avg, latency_p50, latency_p95) = {
            let latency: Vec<u64> = self.inner.backend_latency_ms.read().iter().copied().collect();
            (
                avg(&latency),
                percentile(&latency, 0.5),
                percentile(&latency, 0.95),
            )
        };

        let stage_avg_ms = Stage::ALL
            .iter()
            .map(|s| {
                let durations: Vec<u64> =
                    self.inner.stage_duration_ms[s.index()].read().iter().copied().collect();
                (s.name().to_string(), avg(&durations))
            })
            .collect();

        let endpoints = self
            .inner
            .endpoint_counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();

        let cache_hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;

        MetricsSnapshot {
            backend_calls_total: self.inner.backend_calls_total.load(Ordering::Relaxed),
            backend_calls_failed: self.inner.backend_calls_failed.load(Ordering::Relaxed),
            texts_translated: self.inner.texts_translated.load(Ordering::Relaxed),
            backend_latency_avg_ms: latency_avg,
            backend_latency_p50_ms: latency_p50,
            backend_latency_p95_ms: latency_p95,
            cache_hits,
            cache_misses,
            cache_hit_rate: if lookups > 0 {
                cache_hits as f64 / lookups as f64
            } else {
                0.0
            },
            cache_size: self.inner.cache_size.load(Ordering::Relaxed),
            stage_avg_ms,
            runs_completed: self.inner.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.inner.runs_failed.load(Ordering::Relaxed),
            runs_rejected: self.inner.runs_rejected.load(Ordering::Relaxed),
            regions_fused: self.inner.regions_fused.load(Ordering::Relaxed),
            endpoints,
            circuit_breaker_trips: self.inner.circuit_breaker_trips.load(Ordering::Relaxed),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Prometheus text exposition of the current snapshot
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();

        let mut metric = |name: &str, kind: &str, help: &str, samples: &[(String, String)]| {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} {}", name, kind);
            for (labels, value) in samples {
                let _ = writeln!(out, "{}{{{}}} {}", name, labels, value);
            }
            out.push('\n');
        };
        let plain = |v: String| vec![(String::new(), v)];

        metric(
            "translation_backend_calls_total",
            "counter",
            "Translation backend batch calls",
            &plain(s.backend_calls_total.to_string()),
        );
        metric(
            "translation_backend_calls_failed",
            "counter",
            "Translation backend calls that fell back to source text",
            &plain(s.backend_calls_failed.to_string()),
        );
        metric(
            "translation_texts_total",
            "counter",
            "Source strings translated by the backend",
            &plain(s.texts_translated.to_string()),
        );
        metric(
            "translation_latency_avg_ms",
            "gauge",
            "Average backend latency in milliseconds",
            &plain(s.backend_latency_avg_ms.to_string()),
        );
        metric(
            "cache_hit_rate",
            "gauge",
            "Translation cache hit rate (0.0 to 1.0)",
            &plain(s.cache_hit_rate.to_string()),
        );
        metric(
            "cache_size",
            "gauge",
            "Entries in the translation cache",
            &plain(s.cache_size.to_string()),
        );
        let stages: Vec<_> = s
            .stage_avg_ms
            .iter()
            .map(|(stage, ms)| (format!("stage=\"{}\"", stage), ms.to_string()))
            .collect();
        metric(
            "stage_avg_duration_ms",
            "gauge",
            "Average pipeline stage duration in milliseconds",
            &stages,
        );
        metric(
            "runs_completed_total",
            "counter",
            "Pipeline runs that produced an image",
            &plain(s.runs_completed.to_string()),
        );
        metric(
            "runs_failed_total",
            "counter",
            "Pipeline runs that failed",
            &plain(s.runs_failed.to_string()),
        );
        metric(
            "runs_rejected_total",
            "counter",
            "Requests refused while a run was in flight",
            &plain(s.runs_rejected.to_string()),
        );
        metric(
            "regions_fused_total",
            "counter",
            "Regions that survived fusion",
            &plain(s.regions_fused.to_string()),
        );
        metric(
            "circuit_breaker_trips_total",
            "counter",
            "Translation circuit breaker trips",
            &plain(s.circuit_breaker_trips.to_string()),
        );
        metric(
            "uptime_seconds",
            "counter",
            "Process uptime in seconds",
            &plain(s.uptime_seconds.to_string()),
        );

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub backend_calls_total: usize,
    pub backend_calls_failed: usize,
    pub texts_translated: usize,
    pub backend_latency_avg_ms: u64,
    pub backend_latency_p50_ms: u64,
    pub backend_latency_p95_ms: u64,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub cache_size: usize,
    pub stage_avg_ms: BTreeMap<String, u64>,
    pub runs_completed: usize,
    pub runs_failed: usize,
    pub runs_rejected: usize,
    pub regions_fused: usize,
    pub endpoints: BTreeMap<String, usize>,
    pub circuit_breaker_trips: usize,
    pub uptime_seconds: u64,
}

fn push_sample(window: &RwLock<VecDeque<u64>>, duration: Duration) {
    let mut samples = window.write();
    if samples.len() == SAMPLE_WINDOW {
        samples.pop_front();
    }
    samples.push_back(duration.as_millis() as u64);
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted[((sorted.len() as f64 - 1.0) * p) as usize]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
