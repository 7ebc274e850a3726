use std::sync::{Arc, OnceLock};

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    scheduler_ready_segments: GaugeVec,
    scheduler_inflight_tasks: GaugeVec,
    scheduler_dispatched_tasks: CounterVec,
    scheduler_retries: CounterVec,
    scheduler_resource_sends: CounterVec,
    scheduler_segments_finished: CounterVec,
    scheduler_cancels_issued: CounterVec,
    scheduler_round_seconds: HistogramVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn set_ready_segments(&self, query_id: &str, ready: u64) {
        self.inner
            .scheduler_ready_segments
            .with_label_values(&[query_id])
            .set(ready as f64);
    }

    pub fn set_inflight_tasks(&self, query_id: &str, inflight: u64) {
        self.inner
            .scheduler_inflight_tasks
            .with_label_values(&[query_id])
            .set(inflight as f64);
    }

    pub fn inc_dispatched_tasks(&self, query_id: &str, segment_id: u64, n: u64) {
        self.inner
            .scheduler_dispatched_tasks
            .with_label_values(&[query_id, &segment_id.to_string()])
            .inc_by(n as f64);
    }

    pub fn inc_retries(&self, query_id: &str, segment_id: u64) {
        self.inner
            .scheduler_retries
            .with_label_values(&[query_id, &segment_id.to_string()])
            .inc();
    }

    pub fn inc_resource_sends(&self, query_id: &str, worker: &str) {
        self.inner
            .scheduler_resource_sends
            .with_label_values(&[query_id, worker])
            .inc();
    }

    pub fn inc_segments_finished(&self, query_id: &str, outcome: &str) {
        self.inner
            .scheduler_segments_finished
            .with_label_values(&[query_id, outcome])
            .inc();
    }

    pub fn inc_cancels_issued(&self, query_id: &str) {
        self.inner
            .scheduler_cancels_issued
            .with_label_values(&[query_id])
            .inc();
    }

    pub fn observe_round(&self, query_id: &str, secs: f64) {
        self.inner
            .scheduler_round_seconds
            .with_label_values(&[query_id])
            .observe(secs.max(0.0));
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let scheduler_ready_segments = gauge_vec(
            &registry,
            "sgq_scheduler_ready_segments",
            "Segments currently in the ready queue",
            &["query_id"],
        );
        let scheduler_inflight_tasks = gauge_vec(
            &registry,
            "sgq_scheduler_inflight_tasks",
            "Task instances dispatched and not yet resolved",
            &["query_id"],
        );
        let scheduler_dispatched_tasks = counter_vec(
            &registry,
            "sgq_scheduler_dispatched_tasks_total",
            "Task instances issued to workers",
            &["query_id", "segment_id"],
        );
        let scheduler_retries = counter_vec(
            &registry,
            "sgq_scheduler_retries_total",
            "Task instance re-dispatches after a Wait result",
            &["query_id", "segment_id"],
        );
        let scheduler_resource_sends = counter_vec(
            &registry,
            "sgq_scheduler_resource_sends_total",
            "Resource bundles delivered to workers",
            &["query_id", "worker"],
        );
        let scheduler_segments_finished = counter_vec(
            &registry,
            "sgq_scheduler_segments_finished_total",
            "Segments reaching a terminal state",
            &["query_id", "outcome"],
        );
        let scheduler_cancels_issued = counter_vec(
            &registry,
            "sgq_scheduler_cancels_issued_total",
            "Best-effort cancel RPCs issued for outstanding tasks",
            &["query_id"],
        );
        let scheduler_round_seconds = histogram_vec(
            &registry,
            "sgq_scheduler_round_seconds",
            "Time spent per dispatch round",
            &["query_id"],
        );

        Self {
            registry,
            scheduler_ready_segments,
            scheduler_inflight_tasks,
            scheduler_dispatched_tasks,
            scheduler_retries,
            scheduler_resource_sends,
            scheduler_segments_finished,
            scheduler_cancels_issued,
            scheduler_round_seconds,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let g = GaugeVec::new(Opts::new(name, help), labels).expect("gauge vec");
    registry
        .register(Box::new(g.clone()))
        .expect("register gauge");
    g
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}
