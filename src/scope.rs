//! Explicit propagation scope (spec §9, "`context` carrying spans/submitters").
//!
//! The original threads a Go `context.Context` carrying the active span and submitter.
//! Rust has no ambient per-call context; the idiomatic replacement is a small value
//! passed by reference, the way `opentelemetry`'s `Context` stands in for the same thing.
//! `Scope` is deliberately thin: it holds at most one span and one submitter, and
//! `with_span`/`with_submitter` return a new child scope rather than mutating in place so
//! callers can hand a derived scope down without affecting their own.

use std::sync::Arc;

use crate::span::Span;
use crate::submit::Submitter;

#[derive(Clone, Default)]
pub struct Scope {
    span: Option<Arc<Span>>,
    submitter: Option<Arc<dyn Submitter>>,
}

impl Scope {
    pub fn new() -> Self {
        Scope::default()
    }

    pub fn with_submitter(&self, sub: Arc<dyn Submitter>) -> Scope {
        Scope {
            span: self.span.clone(),
            submitter: Some(sub),
        }
    }

    pub fn with_span(&self, span: Arc<Span>) -> Scope {
        Scope {
            span: Some(span),
            submitter: self.submitter.clone(),
        }
    }

    pub fn span(&self) -> Option<&Arc<Span>> {
        self.span.as_ref()
    }

    pub fn submitter(&self) -> Option<&Arc<dyn Submitter>> {
        self.submitter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submit::null::NullSubmitter;

    #[test]
    fn with_submitter_preserves_span_and_replaces_submitter() {
        let base = Scope::new();
        let null: Arc<dyn Submitter> = Arc::new(NullSubmitter::new(4));
        let derived = base.with_submitter(null);
        assert!(derived.span().is_none());
        assert!(derived.submitter().is_some());
    }
}
