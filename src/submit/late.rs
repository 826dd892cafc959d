//! One-shot forward reference, used to break a named cycle during construction
//! (spec §4.6.10).
//!
//! Every entry in a pipeline config's `submitters` map gets a `Late` up front so
//! recursive construction can resolve a forward name reference to *something* before the
//! real submitter it names has been built. Once construction finishes, every `Late` is
//! bound exactly once and becomes a transparent forwarder.

use std::any::Any;
use std::sync::{Arc, OnceLock};

use crate::event::Event;
use crate::scope::Scope;
use crate::submit::Submitter;

pub struct LateSubmitter {
    name: String,
    bound: OnceLock<Arc<dyn Submitter>>,
}

impl LateSubmitter {
    pub fn new(name: impl Into<String>) -> Self {
        LateSubmitter {
            name: name.into(),
            bound: OnceLock::new(),
        }
    }

    /// Binds the forwarding target. Returns `false` if this `Late` was already bound; the
    /// constructor treats a second bind attempt as a building bug, not a runtime error.
    pub fn bind(&self, target: Arc<dyn Submitter>) -> bool {
        self.bound.set(target).is_ok()
    }

    pub fn is_bound(&self) -> bool {
        self.bound.get().is_some()
    }

    pub fn referenced_name(&self) -> &str {
        &self.name
    }
}

impl Submitter for LateSubmitter {
    fn submit(&self, scope: &Scope, ev: &Event) {
        if let Some(target) = self.bound.get() {
            target.submit(scope, ev);
        } else {
            tracing::warn!(name = %self.name, "late submitter used before binding, event dropped");
        }
    }

    fn children(&self) -> Vec<Arc<dyn Submitter>> {
        match self.bound.get() {
            Some(target) => vec![target.clone()],
            None => Vec::new(),
        }
    }

    fn name(&self) -> &'static str {
        "late"
    }

    fn extra_data(&self) -> serde_json::Value {
        serde_json::json!({ "refers_to": self.name })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submit::null::NullSubmitter;
    use crate::value::Value;

    #[test]
    fn forwards_after_binding() {
        let late = LateSubmitter::new("downstream");
        let target = Arc::new(NullSubmitter::new(4));
        assert!(late.bind(target.clone()));

        let mut ev = Event::new();
        ev.push("x", Value::int(1));
        late.submit(&Scope::new(), &ev);
        assert_eq!(target.stats(), vec![("received".to_string(), 1)]);
    }

    #[test]
    fn second_bind_is_rejected() {
        let late = LateSubmitter::new("downstream");
        assert!(late.bind(Arc::new(NullSubmitter::new(4))));
        assert!(!late.bind(Arc::new(NullSubmitter::new(4))));
    }

    #[test]
    fn submit_before_bind_is_a_silent_drop() {
        let late = LateSubmitter::new("downstream");
        late.submit(&Scope::new(), &Event::new()); // must not panic
        assert!(!late.is_bound());
    }
}
