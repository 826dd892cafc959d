//! Prometheus text-exposition sink (spec §4.6.6).
//!
//! Only events carrying a `duration` histogram annotation are series-worthy; everything
//! else is counted as `skipped`. The protobuf/text-format rendering itself is explicitly
//! out of scope (spec §1, "Prometheus text exposition details beyond the data it needs");
//! `render` below produces a minimal but valid exposition format sufficient for a scrape.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::event::Event;
use crate::histogram::Histogram;
use crate::scope::Scope;
use crate::submit::Submitter;
use crate::value::Value;

struct SeriesState {
    labels: String,
    duration: Histogram,
    success: Histogram,
    events: u64,
}

pub struct PrometheusSubmitter {
    namespace: String,
    buckets: Vec<f64>,
    series: Mutex<HashMap<String, SeriesState>>,
    received: AtomicU64,
    skipped: AtomicU64,
}

impl PrometheusSubmitter {
    pub fn new(namespace: impl Into<String>, mut buckets: Vec<f64>) -> Self {
        buckets.sort_by(|a, b| a.partial_cmp(b).unwrap());
        PrometheusSubmitter {
            namespace: namespace.into(),
            buckets,
            series: Mutex::new(HashMap::new()),
            received: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    fn series_key(ev: &Event) -> String {
        let mut labels: Vec<(&str, &str)> = ev
            .annotations()
            .iter()
            .filter(|a| !a.key.starts_with("agg:") && &*a.key != "duration")
            .filter_map(|a| {
                let (s, ok) = a.value.as_str();
                if ok { s.map(|s| (&*a.key, s)) } else { None }
            })
            .collect();
        labels.sort_by_key(|(k, _)| *k);
        labels
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Renders the current accumulated state as Prometheus text exposition.
    pub fn render(&self) -> String {
        let series = self.series.lock().unwrap();
        let ns = &self.namespace;
        let mut out = String::new();
        for state in series.values() {
            for &edge in &self.buckets {
                let cumulative = (state.duration.cdf(edge) * state.duration.count() as f64).round() as u64;
                let _ = writeln!(
                    out,
                    "{ns}_duration_bucket{{{},le=\"{edge}\"}} {cumulative}",
                    state.labels
                );
            }
            let _ = writeln!(
                out,
                "{ns}_duration_bucket{{{},le=\"+Inf\"}} {}",
                state.labels,
                state.duration.count()
            );
            let _ = writeln!(out, "{ns}_duration_sum{{{}}} {}", state.labels, state.duration.sum());
            let _ = writeln!(out, "{ns}_duration_count{{{}}} {}", state.labels, state.duration.count());
            let _ = writeln!(out, "{ns}_events_total{{{}}} {}", state.labels, state.events);
            let errors = if state.success.count() == 0 {
                0
            } else {
                (state.success.cdf(0.5) * state.success.count() as f64).round() as u64
            };
            let _ = writeln!(out, "{ns}_errors_total{{{}}} {errors}", state.labels);
        }
        let _ = writeln!(out, "{ns}_active_spans {}", crate::registry::global().active_span_count());
        out
    }
}

impl Submitter for PrometheusSubmitter {
    fn submit(&self, _scope: &Scope, ev: &Event) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let duration = match ev.get("duration") {
            Some(Value::Histogram(h)) => h,
            _ => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let key = Self::series_key(ev);
        let mut series = self.series.lock().unwrap();
        let state = series.entry(key.clone()).or_insert_with(|| SeriesState {
            labels: key,
            duration: Histogram::new(),
            success: Histogram::new(),
            events: 0,
        });
        state.duration.merge(duration);
        if let Some(success) = ev.get("success") {
            match success {
                Value::Histogram(h) => state.success.merge(h),
                Value::Bool(b) => state.success.observe(if *b { 1.0 } else { 0.0 }),
                _ => {}
            }
        }
        state.events += 1;
    }

    fn name(&self) -> &'static str {
        "prometheus"
    }

    fn stats(&self) -> Vec<(String, u64)> {
        vec![
            ("received".to_string(), self.received.load(Ordering::Relaxed)),
            ("skipped".to_string(), self.skipped.load(Ordering::Relaxed)),
        ]
    }

    fn extra_data(&self) -> serde_json::Value {
        serde_json::json!({ "namespace": self.namespace, "buckets": self.buckets })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
