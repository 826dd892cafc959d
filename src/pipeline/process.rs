//! Process-wide annotations attached to batch exports (spec §6.2 `process_fields`).
//!
//! A handful of annotations describe the process rather than any single event
//! (hostname, start time). They are registered once, ambiently, and each `http`/`otel`
//! submitter config selects the subset it wants to ship alongside its batches.

use std::sync::{Mutex, OnceLock};

use crate::event::{is_reserved, Annotation, Event};

/// A process-wide registry of annotations available for selection by `process_fields`.
pub struct ProcessStore {
    annotations: Mutex<Vec<Annotation>>,
}

impl ProcessStore {
    fn new() -> Self {
        ProcessStore {
            annotations: Mutex::new(Vec::new()),
        }
    }

    /// Registers process-level annotations. Panics if a caller tries to register one of
    /// the reserved system keys — a programming error caught at startup, not a runtime
    /// condition.
    pub fn register(&self, annotations: impl IntoIterator<Item = Annotation>) {
        let mut guard = self.annotations.lock().unwrap();
        for a in annotations {
            assert!(!is_reserved(&a.key), "{:?} is a reserved annotation key", a.key);
            guard.push(a);
        }
    }

    pub fn annotations(&self) -> Vec<Annotation> {
        self.annotations.lock().unwrap().clone()
    }

    /// Builds an [`Event`] containing only the registered annotations named in `fields`.
    pub fn select(&self, fields: &[String]) -> Event {
        let guard = self.annotations.lock().unwrap();
        let mut ev = Event::with_capacity(fields.len());
        for a in guard.iter() {
            if fields.iter().any(|f| f.as_str() == &*a.key) {
                ev.push_annotation(a.clone());
            }
        }
        ev
    }
}

static STORE: OnceLock<ProcessStore> = OnceLock::new();

/// The process-wide store, created empty on first use.
pub fn global() -> &'static ProcessStore {
    STORE.get_or_init(ProcessStore::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn select_filters_to_named_fields() {
        let store = ProcessStore::new();
        store.register([
            Annotation::new("os.hostname", Value::string("box-1")),
            Annotation::new("proc.starttime", Value::timestamp(0)),
        ]);

        let selected = store.select(&["os.hostname".to_string()]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected.get("os.hostname"), Some(&Value::string("box-1")));
    }

    #[test]
    #[should_panic(expected = "reserved")]
    fn reserved_keys_cannot_be_registered() {
        let store = ProcessStore::new();
        store.register([Annotation::new("name", Value::string("x"))]);
    }
}
