//! Span lifecycle (spec §4.8).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

use crate::event::{Annotation, Event};
use crate::pipeline;
use crate::registry::{Registry, RegistryHandle};
use crate::scope::Scope;
use crate::submit::Submitter;
use crate::value::Value;

fn now_unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn random_nonzero<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    loop {
        rand::thread_rng().fill_bytes(&mut buf);
        if buf.iter().any(|b| *b != 0) {
            return buf;
        }
    }
}

/// An open or closed event with reserved timing and identity annotations (spec §3).
pub struct Span {
    span_id: [u8; 8],
    parent_id: [u8; 8],
    trace_id: [u8; 16],
    start_ns: i64,
    annotations: Mutex<Event>,
    done: AtomicBool,
    submitter: Arc<dyn Submitter>,
    registry_handle: Mutex<Option<RegistryHandle>>,
}

impl Span {
    pub fn span_id(&self) -> [u8; 8] {
        self.span_id
    }

    pub fn parent_id(&self) -> [u8; 8] {
        self.parent_id
    }

    pub fn trace_id(&self) -> [u8; 16] {
        self.trace_id
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Appends another annotation to the still-open span. A no-op, aside from the
    /// wasted annotation, once the span is done.
    pub fn annotate(&self, key: impl Into<std::sync::Arc<str>>, value: Value) {
        if self.is_done() {
            return;
        }
        self.annotations.lock().unwrap().push(key, value);
    }

    /// Closes the span exactly once: appends `timestamp`, `duration`, and `success`,
    /// removes it from the active registry, and submits the finished event to the
    /// submitter captured at construction. Calling `done` again is a no-op.
    pub fn done(&self, err: Option<&(dyn std::error::Error + Send + Sync + 'static)>) {
        if self
            .done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(handle) = self.registry_handle.lock().unwrap().take() {
            crate::registry::global().unregister(handle);
        }
        let end_ns = now_unix_nanos();
        let mut ev = self.annotations.lock().unwrap().clone();
        ev.push("timestamp", Value::timestamp(end_ns));
        ev.push("duration", Value::duration(end_ns - self.start_ns));
        ev.push("success", Value::bool(err.is_none()));
        self.submitter.submit(&Scope::new(), &ev);
    }
}

/// `StartSpanNamed(ctx, name, annotations...)`: starts a span under the process-global
/// registry and default pipeline, returning the span and a scope carrying it forward.
pub fn start_span_named(
    scope: &Scope,
    name: impl Into<Arc<str>>,
    annotations: Vec<Annotation>,
) -> (Arc<Span>, Scope) {
    start_span_named_in(crate::registry::global(), scope, name, annotations)
}

/// Like [`start_span_named`] but against an explicit registry, so tests don't compete for
/// the process-global one.
pub fn start_span_named_in(
    registry: &Registry,
    scope: &Scope,
    name: impl Into<Arc<str>>,
    annotations: Vec<Annotation>,
) -> (Arc<Span>, Scope) {
    let name = name.into();
    let (trace_id, parent_id) = match scope.span() {
        Some(parent) => (parent.trace_id(), parent.span_id()),
        None => (random_nonzero::<16>(), [0u8; 8]),
    };
    let span_id = random_nonzero::<8>();
    let parent_id = if scope.span().is_some() { parent_id } else { span_id };
    let start_ns = now_unix_nanos();

    let mut ev = Event::with_capacity(5 + annotations.len());
    ev.push("name", Value::string(name.to_string()));
    ev.push("start", Value::timestamp(start_ns));
    ev.push("span_id", Value::span_id(&span_id));
    ev.push("parent_id", Value::span_id(&parent_id));
    ev.push("trace_id", Value::trace_id(&trace_id));
    for a in annotations {
        ev.push_annotation(a);
    }

    let submitter = scope
        .submitter()
        .cloned()
        .unwrap_or_else(pipeline::global_submitter);

    let span = Arc::new(Span {
        span_id,
        parent_id,
        trace_id,
        start_ns,
        annotations: Mutex::new(ev),
        done: AtomicBool::new(false),
        submitter,
        registry_handle: Mutex::new(None),
    });
    let handle = registry.register(span.clone());
    *span.registry_handle.lock().unwrap() = Some(handle);

    let new_scope = scope.with_span(span.clone());
    (span, new_scope)
}

/// `StartRemoteSpanNamed`: like [`start_span_named`] but with explicit propagation ids.
/// All-zero `trace_id`/`span_id` mean "generate a fresh identity", matching the W3C
/// "unset" sentinel used by [`crate::propagation`].
pub fn start_remote_span_named(
    scope: &Scope,
    name: impl Into<Arc<str>>,
    parent_id: [u8; 8],
    trace_id: [u8; 16],
    annotations: Vec<Annotation>,
) -> (Arc<Span>, Scope) {
    let trace_id = if trace_id == [0u8; 16] {
        random_nonzero::<16>()
    } else {
        trace_id
    };
    let span_id = random_nonzero::<8>();
    let start_ns = now_unix_nanos();

    let mut ev = Event::with_capacity(5 + annotations.len());
    let name = name.into();
    ev.push("name", Value::string(name.to_string()));
    ev.push("start", Value::timestamp(start_ns));
    ev.push("span_id", Value::span_id(&span_id));
    ev.push("parent_id", Value::span_id(&parent_id));
    ev.push("trace_id", Value::trace_id(&trace_id));
    for a in annotations {
        ev.push_annotation(a);
    }

    let submitter = scope
        .submitter()
        .cloned()
        .unwrap_or_else(pipeline::global_submitter);

    let span = Arc::new(Span {
        span_id,
        parent_id,
        trace_id,
        start_ns,
        annotations: Mutex::new(ev),
        done: AtomicBool::new(false),
        submitter,
        registry_handle: Mutex::new(None),
    });
    let handle = crate::registry::global().register(span.clone());
    *span.registry_handle.lock().unwrap() = Some(handle);

    let new_scope = scope.with_span(span.clone());
    (span, new_scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submit::null::NullSubmitter;

    #[test]
    fn root_span_has_parent_id_equal_to_span_id() {
        let scope = Scope::new().with_submitter(Arc::new(NullSubmitter::new(8)));
        let (span, _) = start_span_named(&scope, "root", Vec::new());
        assert_eq!(span.span_id(), span.parent_id());
    }

    #[test]
    fn child_span_inherits_trace_and_parents_to_caller_span() {
        let scope = Scope::new().with_submitter(Arc::new(NullSubmitter::new(8)));
        let (root, root_scope) = start_span_named(&scope, "root", Vec::new());
        let (child, _) = start_span_named(&root_scope, "child", Vec::new());
        assert_eq!(child.trace_id(), root.trace_id());
        assert_eq!(child.parent_id(), root.span_id());
        assert_ne!(child.span_id(), root.span_id());
    }

    #[test]
    fn done_is_idempotent() {
        let scope = Scope::new().with_submitter(Arc::new(NullSubmitter::new(8)));
        let (span, _) = start_span_named(&scope, "root", Vec::new());
        span.done(None);
        assert!(span.is_done());
        span.done(None); // must not panic or double-submit
    }

    #[test]
    fn annotate_after_done_is_ignored() {
        let scope = Scope::new().with_submitter(Arc::new(NullSubmitter::new(8)));
        let (span, _) = start_span_named(&scope, "root", Vec::new());
        span.done(None);
        span.annotate("late", Value::int(1));
    }
}
