//! Aggregates events into per-group, per-key histograms on a flush interval
//! (spec §4.6.3).

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ConfigError;
use crate::event::{Annotation, Event};
use crate::group::{GroupHandle, Grouper};
use crate::histogram::Histogram;
use crate::jitter::jittered;
use crate::scope::Scope;
use crate::submit::Submitter;
use crate::value::Value;

const MIN_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const MAX_FLUSH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

fn now_unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Coerces a value to its float observation for accumulation into a histogram, per
/// spec §4.6.3's "numerically observable" list. Durations and timestamps are observed in
/// seconds, matching the original's `agg:*` metadata units.
fn numeric_observation(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::UInt(u) => Some(*u as f64),
        Value::Duration(d) => Some(*d as f64 / 1e9),
        Value::Timestamp(t) => Some(*t as f64 / 1e9),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

struct GroupState {
    seed: Vec<Annotation>,
    created_ns: i64,
    hist_index: HashMap<Arc<str>, usize>,
    histograms: Vec<(Arc<str>, Histogram)>,
    excluded: Vec<Arc<str>>,
}

impl GroupState {
    fn new(seed: Vec<Annotation>) -> Self {
        GroupState {
            seed,
            created_ns: now_unix_nanos(),
            hist_index: HashMap::new(),
            histograms: Vec::new(),
            excluded: Vec::new(),
        }
    }

    fn is_seed_key(&self, key: &str) -> bool {
        self.seed.iter().any(|a| &*a.key == key)
    }

    fn is_excluded(&self, key: &str) -> bool {
        self.excluded.iter().any(|k| &**k == key)
    }

    fn merge_histogram(&mut self, key: &Arc<str>, h: &Histogram) {
        match self.hist_index.get(key) {
            Some(&idx) => self.histograms[idx].1.merge(h),
            None => {
                self.hist_index.insert(key.clone(), self.histograms.len());
                self.histograms.push((key.clone(), h.clone()));
            }
        }
    }

    fn observe(&mut self, key: &Arc<str>, v: f64) {
        match self.hist_index.get(key) {
            Some(&idx) => self.histograms[idx].1.observe(v),
            None => {
                let mut h = Histogram::new();
                h.observe(v);
                self.hist_index.insert(key.clone(), self.histograms.len());
                self.histograms.push((key.clone(), h));
            }
        }
    }
}

pub struct GrouperSubmitter {
    grouper: Grouper,
    flush_interval: Duration,
    child: Arc<dyn Submitter>,
    state: Mutex<HashMap<GroupHandle, GroupState>>,
    received: AtomicU64,
    flushes: AtomicU64,
}

impl GrouperSubmitter {
    pub fn new(
        grouper: Grouper,
        flush_interval: Duration,
        child: Arc<dyn Submitter>,
    ) -> Result<Self, ConfigError> {
        if flush_interval < MIN_FLUSH_INTERVAL || flush_interval > MAX_FLUSH_INTERVAL {
            return Err(ConfigError::FlushIntervalOutOfRange(flush_interval));
        }
        Ok(GrouperSubmitter {
            grouper,
            flush_interval,
            child,
            state: Mutex::new(HashMap::new()),
            received: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        })
    }

    fn accumulate(&self, ev: &Event, seed: Vec<Annotation>, handle: GroupHandle) {
        let mut state = self.state.lock().unwrap();
        let group = state
            .entry(handle)
            .or_insert_with(|| GroupState::new(seed));
        for a in ev.annotations() {
            if group.is_seed_key(&a.key) || group.is_excluded(&a.key) {
                continue;
            }
            match &a.value {
                Value::Histogram(h) => group.merge_histogram(&a.key, h),
                other => match numeric_observation(other) {
                    Some(v) => group.observe(&a.key, v),
                    None => group.excluded.push(a.key.clone()),
                },
            }
        }
    }

    /// Flushes every accumulated group to the downstream submitter and clears all state.
    /// A flush over an empty map is a no-op (spec §8 invariant 6: idempotent when empty).
    pub fn flush(&self) {
        let groups: Vec<GroupState> = {
            let mut state = self.state.lock().unwrap();
            if state.is_empty() {
                return;
            }
            state.drain().map(|(_, g)| g).collect()
        };
        for g in groups {
            let end_ns = now_unix_nanos();
            let mut ev = Event::with_capacity(g.seed.len() + g.histograms.len() + 4);
            for a in g.seed {
                ev.push_annotation(a);
            }
            ev.push("agg:start_time", Value::timestamp(g.created_ns));
            ev.push("agg:end_time", Value::timestamp(end_ns));
            ev.push("agg:duration", Value::duration(end_ns - g.created_ns));
            if !g.excluded.is_empty() {
                let mut names: Vec<&str> = g.excluded.iter().map(|k| &**k).collect();
                names.sort_unstable();
                ev.push("agg:excluded", Value::string(names.join(",")));
            }
            for (key, hist) in g.histograms {
                ev.push(key, Value::histogram(hist));
            }
            self.child.submit(&Scope::new(), &ev);
        }
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl Submitter for GrouperSubmitter {
    fn submit(&self, _scope: &Scope, ev: &Event) {
        self.received.fetch_add(1, Ordering::Relaxed);
        if let Some((seed, handle)) = self.grouper.resolve(ev) {
            self.accumulate(ev, seed, handle);
        }
    }

    fn children(&self) -> Vec<Arc<dyn Submitter>> {
        vec![self.child.clone()]
    }

    fn name(&self) -> &'static str {
        "grouper"
    }

    fn stats(&self) -> Vec<(String, u64)> {
        vec![
            ("received".to_string(), self.received.load(Ordering::Relaxed)),
            ("flushes".to_string(), self.flushes.load(Ordering::Relaxed)),
        ]
    }

    fn extra_data(&self) -> serde_json::Value {
        serde_json::json!({
            "group_by": self.grouper.keys(),
            "flush_interval_secs": self.flush_interval.as_secs(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Flushes on a jittered interval; on cancellation, flushes once more (draining
    /// whatever accumulated since the last tick) and returns.
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.flush();
                    return;
                }
                _ = tokio::time::sleep(jittered(self.flush_interval)) => {
                    self.flush();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::MissingKeyBehavior;
    use crate::submit::null::NullSubmitter;

    fn event_with(pairs: &[(&str, Value)]) -> Event {
        let mut ev = Event::new();
        for (k, v) in pairs {
            ev.push(*k, v.clone());
        }
        ev
    }

    #[test]
    fn rejects_out_of_range_flush_interval() {
        let g = Grouper::new(vec!["name".into()], MissingKeyBehavior::Omit);
        let child = Arc::new(NullSubmitter::new(4));
        assert!(GrouperSubmitter::new(g, Duration::from_secs(1), child).is_err());
    }

    #[test]
    fn accumulates_and_flushes_with_seed_and_histograms() {
        let g = Grouper::new(vec!["name".into()], MissingKeyBehavior::Omit);
        let child = Arc::new(NullSubmitter::new(8));
        let gs = GrouperSubmitter::new(g, Duration::from_secs(30), child.clone()).unwrap();

        gs.submit(&Scope::new(), &event_with(&[("name", Value::string("req")), ("latency_ms", Value::int(5))]));
        gs.submit(&Scope::new(), &event_with(&[("name", Value::string("req")), ("latency_ms", Value::int(15))]));
        gs.flush();

        let received = child.live().unwrap().get();
        assert_eq!(received.len(), 1);
        let (h, ok) = received[0].get("latency_ms").unwrap().as_histogram();
        assert!(ok);
        assert_eq!(h.unwrap().count(), 2);
        assert_eq!(h.unwrap().sum(), 20.0);
    }

    #[test]
    fn second_flush_of_empty_state_is_a_no_op() {
        let g = Grouper::new(vec!["name".into()], MissingKeyBehavior::Omit);
        let child = Arc::new(NullSubmitter::new(8));
        let gs = GrouperSubmitter::new(g, Duration::from_secs(30), child.clone()).unwrap();
        gs.submit(&Scope::new(), &event_with(&[("name", Value::string("req"))]));
        gs.flush();
        gs.flush();
        assert_eq!(child.live().unwrap().len(), 1);
    }

    #[test]
    fn non_numeric_non_histogram_values_are_excluded() {
        let g = Grouper::new(vec!["name".into()], MissingKeyBehavior::Omit);
        let child = Arc::new(NullSubmitter::new(8));
        let gs = GrouperSubmitter::new(g, Duration::from_secs(30), child.clone()).unwrap();
        gs.submit(
            &Scope::new(),
            &event_with(&[("name", Value::string("req")), ("trace_id", Value::trace_id(&[1u8; 16]))]),
        );
        gs.flush();
        let received = child.live().unwrap().get();
        let (excluded, ok) = received[0].get("agg:excluded").unwrap().as_str();
        assert!(ok);
        assert_eq!(excluded, Some("trace_id"));
    }
}
