//! Evaluates a compiled filter against each event, forwarding only matches (spec §4.6.2).

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::event::Event;
use crate::filter::{eval, Filter};
use crate::ring::RingBuffer;
use crate::scope::Scope;
use crate::submit::Submitter;

const LIVE_CAPACITY: usize = 256;

pub struct FilterSubmitter {
    filter: Filter,
    child: Arc<dyn Submitter>,
    live: RingBuffer<Event>,
    received: AtomicU64,
    passed: AtomicU64,
    filtered: AtomicU64,
}

impl FilterSubmitter {
    pub fn new(filter: Filter, child: Arc<dyn Submitter>) -> Self {
        FilterSubmitter {
            filter,
            child,
            live: RingBuffer::new(LIVE_CAPACITY),
            received: AtomicU64::new(0),
            passed: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
        }
    }

    pub fn source(&self) -> &str {
        self.filter.source()
    }
}

impl Submitter for FilterSubmitter {
    fn submit(&self, scope: &Scope, ev: &Event) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.live.add(ev.clone());
        if eval(&self.filter, ev) {
            self.passed.fetch_add(1, Ordering::Relaxed);
            self.child.submit(scope, ev);
        } else {
            self.filtered.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn children(&self) -> Vec<Arc<dyn Submitter>> {
        vec![self.child.clone()]
    }

    fn name(&self) -> &'static str {
        "filter"
    }

    fn stats(&self) -> Vec<(String, u64)> {
        vec![
            ("received".to_string(), self.received.load(Ordering::Relaxed)),
            ("passed".to_string(), self.passed.load(Ordering::Relaxed)),
            ("filtered".to_string(), self.filtered.load(Ordering::Relaxed)),
        ]
    }

    fn extra_data(&self) -> serde_json::Value {
        serde_json::json!({ "filter": self.filter.source() })
    }

    fn live(&self) -> Option<&RingBuffer<Event>> {
        Some(&self.live)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{compile, Environment};
    use crate::submit::null::NullSubmitter;
    use crate::value::Value;

    #[test]
    fn forwards_only_matching_events() {
        let env = Arc::new(Environment::new());
        let f = compile("eq(key(status), ok)", env).unwrap();
        let child = Arc::new(NullSubmitter::new(4));
        let fs = FilterSubmitter::new(f, child.clone());

        let mut pass = Event::new();
        pass.push("status", Value::string("ok"));
        let mut fail = Event::new();
        fail.push("status", Value::string("bad"));

        fs.submit(&Scope::new(), &pass);
        fs.submit(&Scope::new(), &fail);

        assert_eq!(child.stats(), vec![("received".to_string(), 1)]);
        assert_eq!(
            fs.stats(),
            vec![
                ("received".to_string(), 2),
                ("passed".to_string(), 1),
                ("filtered".to_string(), 1),
            ]
        );
    }
}
