// Service metrics
//
// Process-wide counters, gauges, and histograms for:
// - Session lifecycle (active, total, handshake failures)
// - Runs started per language and how they ended
// - Compile rejections and spawn failures
// - Scratch directory cleanup failures

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::Language;

/// Counter metric (monotonically increasing)
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// Gauge metric (can go up or down, never below zero)
#[derive(Debug)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Histogram bucket for duration tracking
#[derive(Debug)]
pub struct HistogramBucket {
    pub le: f64, // less than or equal to (upper bound in seconds)
    pub count: AtomicU64,
}

/// Histogram metric for latency/duration tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    sum: AtomicU64, // sum in microseconds
    count: AtomicU64,
}

impl Histogram {
    fn with_bounds(bounds: &[f64]) -> Self {
        let buckets = bounds
            .iter()
            .map(|le| HistogramBucket {
                le: *le,
                count: AtomicU64::new(0),
            })
            .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Standard latency buckets (in seconds)
    pub fn new_latency() -> Self {
        Self::with_bounds(&[
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ])
    }

    /// Interactive runs last from milliseconds to many minutes
    pub fn new_run_duration() -> Self {
        Self::with_bounds(&[0.05, 0.25, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0])
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        let micros = value.as_micros() as u64;

        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for bucket in &self.buckets {
            if seconds <= bucket.le {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.buckets
            .iter()
            .find(|b| (b.le - le).abs() < 0.0001)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn export(&self, name: &str, help: &str, output: &mut String) {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} histogram\n", name));
        for bucket in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                name,
                bucket.le,
                bucket.count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, self.get_count()));
        output.push_str(&format!(
            "{}_sum {}\n",
            name,
            self.get_sum_micros() as f64 / 1_000_000.0
        ));
        output.push_str(&format!("{}_count {}\n", name, self.get_count()));
    }
}

/// How a run ended, as far as the service is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Exited,
    Killed,
    CompileRejected,
    SpawnFailed,
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    // Sessions
    pub sessions_active: Gauge,
    pub sessions_total: Counter,
    pub auth_failures: Counter,

    // Runs started, per language
    pub runs_python: Counter,
    pub runs_cpp: Counter,
    pub runs_java: Counter,
    pub runs_active: Gauge,

    // Run outcomes
    pub runs_exited: Counter,
    pub runs_killed: Counter,
    pub compile_failures: Counter,
    pub spawn_failures: Counter,

    // Rejected before a run was allocated
    pub toolchain_rejections: Counter,

    // Cleanup
    pub cleanup_failures: Counter,

    // Histograms
    pub run_duration: Histogram,
    pub compile_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            sessions_active: Gauge::new(),
            sessions_total: Counter::new(),
            auth_failures: Counter::new(),

            runs_python: Counter::new(),
            runs_cpp: Counter::new(),
            runs_java: Counter::new(),
            runs_active: Gauge::new(),

            runs_exited: Counter::new(),
            runs_killed: Counter::new(),
            compile_failures: Counter::new(),
            spawn_failures: Counter::new(),

            toolchain_rejections: Counter::new(),

            cleanup_failures: Counter::new(),

            run_duration: Histogram::new_run_duration(),
            compile_duration: Histogram::new_latency(),
        }
    }

    pub fn record_session_opened(&self) {
        self.sessions_total.inc();
        self.sessions_active.inc();
    }

    pub fn record_session_closed(&self) {
        self.sessions_active.dec();
    }

    /// Record a run being accepted for `language`
    pub fn record_run_started(&self, language: Language) {
        match language {
            Language::Python => self.runs_python.inc(),
            Language::Cpp => self.runs_cpp.inc(),
            Language::Java => self.runs_java.inc(),
        }
        self.runs_active.inc();
    }

    /// Record how a run finished. Every started run reports exactly one outcome.
    pub fn record_run_finished(&self, outcome: RunOutcome, elapsed: Option<Duration>) {
        self.runs_active.dec();
        match outcome {
            RunOutcome::Exited => self.runs_exited.inc(),
            RunOutcome::Killed => self.runs_killed.inc(),
            RunOutcome::CompileRejected => self.compile_failures.inc(),
            RunOutcome::SpawnFailed => self.spawn_failures.inc(),
        }
        if let Some(elapsed) = elapsed {
            self.run_duration.observe(elapsed);
        }
    }

    pub fn record_cleanup(&self, success: bool) {
        if !success {
            self.cleanup_failures.inc();
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP sandterm_sessions_active Currently connected sessions\n");
        output.push_str("# TYPE sandterm_sessions_active gauge\n");
        output.push_str(&format!(
            "sandterm_sessions_active {}\n",
            self.sessions_active.get()
        ));

        output.push_str("# HELP sandterm_sessions_total Sessions opened since start\n");
        output.push_str("# TYPE sandterm_sessions_total counter\n");
        output.push_str(&format!(
            "sandterm_sessions_total {}\n",
            self.sessions_total.get()
        ));

        output.push_str("# HELP sandterm_auth_failures_total Rejected handshakes\n");
        output.push_str("# TYPE sandterm_auth_failures_total counter\n");
        output.push_str(&format!(
            "sandterm_auth_failures_total {}\n",
            self.auth_failures.get()
        ));

        output.push_str("# HELP sandterm_runs_started_total Runs started by language\n");
        output.push_str("# TYPE sandterm_runs_started_total counter\n");
        for (language, counter) in [
            (Language::Python, &self.runs_python),
            (Language::Cpp, &self.runs_cpp),
            (Language::Java, &self.runs_java),
        ] {
            output.push_str(&format!(
                "sandterm_runs_started_total{{language=\"{}\"}} {}\n",
                language,
                counter.get()
            ));
        }

        output.push_str("# HELP sandterm_runs_active Runs currently compiling or running\n");
        output.push_str("# TYPE sandterm_runs_active gauge\n");
        output.push_str(&format!("sandterm_runs_active {}\n", self.runs_active.get()));

        output.push_str("# HELP sandterm_runs_finished_total Finished runs by outcome\n");
        output.push_str("# TYPE sandterm_runs_finished_total counter\n");
        for (outcome, counter) in [
            ("exited", &self.runs_exited),
            ("killed", &self.runs_killed),
            ("compile_rejected", &self.compile_failures),
            ("spawn_failed", &self.spawn_failures),
        ] {
            output.push_str(&format!(
                "sandterm_runs_finished_total{{outcome=\"{}\"}} {}\n",
                outcome,
                counter.get()
            ));
        }

        output.push_str(
            "# HELP sandterm_toolchain_rejections_total Runs refused for a missing toolchain\n",
        );
        output.push_str("# TYPE sandterm_toolchain_rejections_total counter\n");
        output.push_str(&format!(
            "sandterm_toolchain_rejections_total {}\n",
            self.toolchain_rejections.get()
        ));

        output.push_str("# HELP sandterm_cleanup_failures_total Scratch directories left behind\n");
        output.push_str("# TYPE sandterm_cleanup_failures_total counter\n");
        output.push_str(&format!(
            "sandterm_cleanup_failures_total {}\n",
            self.cleanup_failures.get()
        ));

        self.run_duration.export(
            "sandterm_run_duration_seconds",
            "Wall time from spawn to exit",
            &mut output,
        );
        self.compile_duration.export(
            "sandterm_compile_duration_seconds",
            "Compile step wall time",
            &mut output,
        );

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}
