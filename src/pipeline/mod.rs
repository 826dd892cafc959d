//! Pipeline construction and hot-swap reload (spec §4.7).
//!
//! A [`Config`] describes a tree of submitter nodes; [`construct::build`] turns it into
//! a live [`crate::submit::Submitter`] tree plus the background tasks its stateful nodes
//! need spawned. [`Handle`] holds the currently-live tree behind a swappable pointer so
//! [`reload::Reloader`] can replace it without any caller ever finding nowhere to submit
//! to. [`global`] is the ambient default pipeline spans fall back to when their [`Scope`]
//! doesn't carry one explicitly (spec §9 "process-scoped registry... default
//! submitter").
//!
//! [`Scope`]: crate::scope::Scope

pub mod config;
pub mod construct;
pub mod process;
pub mod reload;

use std::sync::{Arc, OnceLock};

pub use config::{Config, SubmitterCfg};
pub use construct::{build, Environment};
pub use reload::{Handle, Reloader};

use crate::submit::null::NullSubmitter;
use crate::submit::Submitter;

const DEFAULT_AMBIENT_NULL_LIVE_CAPACITY: usize = 16;

static GLOBAL: OnceLock<Arc<Handle>> = OnceLock::new();

/// The process-wide default pipeline, created lazily on first access as a lone `null`
/// node if nothing has installed one yet. Tests that need a known pipeline should use
/// [`set_global`] (or, more commonly, build a [`crate::scope::Scope`] with
/// [`crate::scope::Scope::with_submitter`] and avoid the global entirely).
pub fn global() -> &'static Arc<Handle> {
    GLOBAL.get_or_init(|| {
        let root: Arc<dyn Submitter> = Arc::new(NullSubmitter::new(DEFAULT_AMBIENT_NULL_LIVE_CAPACITY));
        Handle::with_runnables(root, Vec::new())
    })
}

/// Installs `handle` as the process-wide default pipeline. Returns `false` if a global
/// pipeline was already installed (first write wins, matching [`OnceLock`] semantics) —
/// callers that need to replace an already-running default should reload through the
/// installed [`Handle`] instead of calling this twice.
pub fn set_global(handle: Arc<Handle>) -> bool {
    GLOBAL.set(handle).is_ok()
}

/// The submitter [`crate::span::start_span_named`] falls back to when its scope carries
/// none of its own.
pub fn global_submitter() -> Arc<dyn Submitter> {
    global().submitter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_defaults_to_a_null_submitter_without_panicking() {
        let sub = global_submitter();
        assert!(!sub.name().is_empty());
    }
}
