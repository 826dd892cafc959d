//! Correlates spans into traces, keyed by trace-id, with a ring-buffered retention
//! policy over completed traces (spec §4.6.8).

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::event::Event;
use crate::filter::{eval, Filter};
use crate::scope::Scope;
use crate::submit::Submitter;
use crate::value::Value;

#[derive(Clone)]
pub struct TraceEntry {
    pub trace_id: [u8; 16],
    pub spans: Vec<Event>,
}

struct State {
    ring: Vec<Option<TraceEntry>>,
    completed: HashMap<[u8; 16], usize>,
    pending: HashMap<[u8; 16], Vec<Event>>,
    position: usize,
}

/// Parameters: retention capacity and an optional filter applied only to a trace's root
/// span, deciding whether the whole trace is retained.
pub struct TraceBufferSubmitter {
    capacity: usize,
    root_filter: Option<Filter>,
    state: Mutex<State>,
    received: AtomicU64,
    evicted: AtomicU64,
    filtered: AtomicU64,
    dropped: AtomicU64,
}

fn extract_ids(ev: &Event) -> Option<([u8; 16], [u8; 8], [u8; 8])> {
    let (trace_id, ok1) = ev.get("trace_id")?.as_trace_id();
    let (span_id, ok2) = ev.get("span_id")?.as_span_id();
    let (parent_id, ok3) = ev.get("parent_id")?.as_span_id();
    if ok1 && ok2 && ok3 {
        Some((trace_id, span_id, parent_id))
    } else {
        None
    }
}

impl TraceBufferSubmitter {
    pub fn new(capacity: usize, root_filter: Option<Filter>) -> Self {
        let capacity = capacity.max(1);
        TraceBufferSubmitter {
            capacity,
            root_filter,
            state: Mutex::new(State {
                ring: vec![None; capacity],
                completed: HashMap::new(),
                pending: HashMap::new(),
                position: 0,
            }),
            received: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn root_passes(&self, root: &Event) -> bool {
        match &self.root_filter {
            Some(f) => eval(f, root),
            None => true,
        }
    }

    fn insert_ring(state: &mut State, entry: TraceEntry, evicted: &AtomicU64) {
        let slot = state.position % state.capacity;
        if let Some(old) = state.ring[slot].take() {
            state.completed.remove(&old.trace_id);
            evicted.fetch_add(1, Ordering::Relaxed);
        }
        state.completed.insert(entry.trace_id, slot);
        state.ring[slot] = Some(entry);
        state.position += 1;
    }

    /// Returns retained completed traces, newest first.
    pub fn traces(&self) -> Vec<TraceEntry> {
        let state = self.state.lock().unwrap();
        let mut out = Vec::with_capacity(state.completed.len());
        for i in 0..state.capacity {
            let idx = (state.position + state.capacity - 1 - i) % state.capacity;
            if let Some(entry) = &state.ring[idx] {
                out.push(entry.clone());
            }
        }
        out
    }

    pub fn pending_traces(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }
}

impl Submitter for TraceBufferSubmitter {
    fn submit(&self, _scope: &Scope, ev: &Event) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let Some((trace_id, span_id, parent_id)) = extract_ids(ev) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let is_root = span_id == parent_id;
        let mut state = self.state.lock().unwrap();

        if let Some(&slot) = state.completed.get(&trace_id) {
            if let Some(entry) = state.ring[slot].as_mut() {
                entry.spans.push(ev.clone());
            }
            return;
        }

        if let Some(mut spans) = state.pending.remove(&trace_id) {
            spans.push(ev.clone());
            if is_root {
                if self.root_passes(ev) {
                    Self::insert_ring(&mut state, TraceEntry { trace_id, spans }, &self.evicted);
                } else {
                    self.filtered.fetch_add(1, Ordering::Relaxed);
                }
            } else {
                state.pending.insert(trace_id, spans);
            }
            return;
        }

        if is_root {
            if self.root_passes(ev) {
                Self::insert_ring(
                    &mut state,
                    TraceEntry {
                        trace_id,
                        spans: vec![ev.clone()],
                    },
                    &self.evicted,
                );
            } else {
                self.filtered.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            state.pending.insert(trace_id, vec![ev.clone()]);
        }
    }

    fn name(&self) -> &'static str {
        "trace_buffer"
    }

    fn stats(&self) -> Vec<(String, u64)> {
        vec![
            ("received".to_string(), self.received.load(Ordering::Relaxed)),
            ("evicted".to_string(), self.evicted.load(Ordering::Relaxed)),
            ("filtered".to_string(), self.filtered.load(Ordering::Relaxed)),
            ("dropped".to_string(), self.dropped.load(Ordering::Relaxed)),
        ]
    }

    fn extra_data(&self) -> serde_json::Value {
        serde_json::json!({ "capacity": self.capacity, "pending": self.pending_traces() })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span_event(trace: u8, span: u8, parent: u8) -> Event {
        let mut ev = Event::new();
        ev.push("trace_id", Value::trace_id(&[trace; 16]));
        ev.push("span_id", Value::span_id(&[span; 8]));
        ev.push("parent_id", Value::span_id(&[parent; 8]));
        ev
    }

    #[test]
    fn single_root_span_becomes_a_completed_trace() {
        let tb = TraceBufferSubmitter::new(4, None);
        tb.submit(&Scope::new(), &span_event(1, 1, 1));
        assert_eq!(tb.traces().len(), 1);
    }

    #[test]
    fn child_before_root_is_pending_then_promoted() {
        let tb = TraceBufferSubmitter::new(4, None);
        tb.submit(&Scope::new(), &span_event(1, 2, 1)); // child, parent==root span_id 1
        assert_eq!(tb.pending_traces(), 1);
        tb.submit(&Scope::new(), &span_event(1, 1, 1)); // root
        assert_eq!(tb.pending_traces(), 0);
        assert_eq!(tb.traces()[0].spans.len(), 2);
    }

    #[test]
    fn capacity_two_evicts_oldest() {
        let tb = TraceBufferSubmitter::new(2, None);
        tb.submit(&Scope::new(), &span_event(1, 1, 1));
        tb.submit(&Scope::new(), &span_event(2, 1, 1));
        tb.submit(&Scope::new(), &span_event(3, 1, 1));
        assert_eq!(tb.traces().len(), 2);
        assert_eq!(tb.stats()[1], ("evicted".to_string(), 1));
    }

    #[test]
    fn late_arrival_after_completion_appends_to_the_ring_slot() {
        let tb = TraceBufferSubmitter::new(4, None);
        tb.submit(&Scope::new(), &span_event(1, 1, 1));
        tb.submit(&Scope::new(), &span_event(1, 2, 1));
        assert_eq!(tb.traces()[0].spans.len(), 2);
    }

    #[test]
    fn events_missing_propagation_ids_are_dropped() {
        let tb = TraceBufferSubmitter::new(4, None);
        tb.submit(&Scope::new(), &Event::new());
        assert_eq!(tb.stats()[3], ("dropped".to_string(), 1));
    }
}
