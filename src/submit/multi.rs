//! Fan-out to every child in order (spec §4.6.1).

use std::any::Any;
use std::sync::Arc;

use crate::event::Event;
use crate::scope::Scope;
use crate::submit::Submitter;

pub struct MultiSubmitter {
    children: Vec<Arc<dyn Submitter>>,
}

impl MultiSubmitter {
    pub fn new(children: Vec<Arc<dyn Submitter>>) -> Self {
        MultiSubmitter { children }
    }
}

impl Submitter for MultiSubmitter {
    fn submit(&self, scope: &Scope, ev: &Event) {
        for child in &self.children {
            child.submit(scope, ev);
        }
    }

    fn children(&self) -> Vec<Arc<dyn Submitter>> {
        self.children.clone()
    }

    fn name(&self) -> &'static str {
        "multi"
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
    fn forwards_to_every_child() {
        let a = Arc::new(NullSubmitter::new(4));
        let b = Arc::new(NullSubmitter::new(4));
        let multi = MultiSubmitter::new(vec![a.clone(), b.clone()]);
        let mut ev = Event::new();
        ev.push("x", Value::int(1));
        multi.submit(&Scope::new(), &ev);
        assert_eq!(a.stats(), vec![("received".to_string(), 1)]);
        assert_eq!(b.stats(), vec![("received".to_string(), 1)]);
    }

    #[test]
    fn a_failing_child_does_not_affect_siblings() {
        // "failure" in this graph only ever manifests as a dropped/counted event, never a
        // propagated error, so the only thing to test is that both children still see it.
        let a = Arc::new(NullSubmitter::new(0));
        let b = Arc::new(NullSubmitter::new(4));
        let multi = MultiSubmitter::new(vec![a.clone(), b.clone()]);
        multi.submit(&Scope::new(), &Event::new());
        assert_eq!(a.stats(), vec![("received".to_string(), 1)]);
        assert_eq!(b.stats(), vec![("received".to_string(), 1)]);
    }
}
