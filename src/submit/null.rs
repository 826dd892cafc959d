//! Discards every event after recording it (spec §4.6.9).

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::Event;
use crate::ring::RingBuffer;
use crate::scope::Scope;
use crate::submit::Submitter;

pub struct NullSubmitter {
    live: RingBuffer<Event>,
    received: AtomicU64,
}

impl NullSubmitter {
    pub fn new(live_capacity: usize) -> Self {
        NullSubmitter {
            live: RingBuffer::new(live_capacity),
            received: AtomicU64::new(0),
        }
    }
}

impl Submitter for NullSubmitter {
    fn submit(&self, _scope: &Scope, ev: &Event) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.live.add(ev.clone());
    }

    fn name(&self) -> &'static str {
        "null"
    }

    fn stats(&self) -> Vec<(String, u64)> {
        vec![("received".to_string(), self.received.load(Ordering::Relaxed))]
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
    use crate::value::Value;

    #[test]
    fn discards_but_records_in_live_ring() {
        let n = NullSubmitter::new(4);
        let mut ev = Event::new();
        ev.push("x", Value::int(1));
        n.submit(&Scope::new(), &ev);
        assert_eq!(n.stats(), vec![("received".to_string(), 1)]);
        assert_eq!(n.live().unwrap().len(), 1);
    }
}
