//! Active-span registry (spec §4.2).
//!
//! The original shards a cache-line-padded array of intrusive linked-list roots and walks
//! them lock-free via atomic next pointers. An intrusive list needs `unsafe` to implement
//! safely in Rust for little benefit here: nothing in this crate iterates spans on a hot
//! path, so a sharded `HashMap<u64, Arc<Span>>` behind a per-shard mutex gives the same
//! externally observable contract (registration on construction, O(1) removal on `Done`,
//! approximate live count, snapshot iteration) without unsafe code. Sharding still matters
//! so concurrent `StartSpan` calls from different threads don't serialize on one lock.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::span::Span;

thread_local! {
    static SHARD_HINT: Cell<usize> = Cell::new(0);
}

/// Opaque token identifying where a span was registered, so `Done` can remove it in O(1)
/// without scanning every shard.
#[derive(Debug, Clone, Copy)]
pub struct RegistryHandle {
    shard: usize,
    id: u64,
}

pub struct Registry {
    shards: Vec<Mutex<HashMap<u64, Arc<Span>>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        let shard_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .max(1);
        Registry {
            shards: (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect(),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_shard(&self) -> usize {
        SHARD_HINT.with(|hint| {
            let h = hint.get();
            hint.set((h + 1) % self.shards.len());
            h % self.shards.len()
        })
    }

    /// Inserts `span` into a round-robin-chosen shard and returns the handle `Done` must
    /// present to remove it again.
    pub fn register(&self, span: Arc<Span>) -> RegistryHandle {
        let shard = self.next_shard();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.shards[shard].lock().unwrap().insert(id, span);
        RegistryHandle { shard, id }
    }

    pub fn unregister(&self, handle: RegistryHandle) {
        self.shards[handle.shard].lock().unwrap().remove(&handle.id);
    }

    /// Approximate number of live (not yet `Done`) spans.
    pub fn active_span_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().len()).sum()
    }

    /// Snapshots each shard's spans under its lock, then invokes `f` for every span whose
    /// `done` flag is false, outside any lock. A span that completes between the snapshot
    /// and the callback is simply skipped by the `is_done` check rather than by the lock.
    pub fn iterate_spans(&self, mut f: impl FnMut(&Arc<Span>)) {
        for shard in &self.shards {
            let snapshot: Vec<Arc<Span>> = shard.lock().unwrap().values().cloned().collect();
            for span in &snapshot {
                if !span.is_done() {
                    f(span);
                }
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry, initialized on first access and never torn down (spec §9,
/// "global mutable state").
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(Registry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;
    use crate::span::start_span_named_in;

    #[test]
    fn active_span_count_matches_iteration() {
        let registry = Registry::new();
        let scope = Scope::new();
        let mut spans = Vec::new();
        for i in 0..5 {
            let (span, _) = start_span_named_in(&registry, &scope, format!("s{i}"), Vec::new());
            spans.push(span);
        }
        let mut counted = 0;
        registry.iterate_spans(|_| counted += 1);
        assert_eq!(counted, registry.active_span_count());
        assert_eq!(counted, 5);
    }

    #[test]
    fn done_span_is_removed_from_registry() {
        let registry = Registry::new();
        let scope = Scope::new();
        let (span, _) = start_span_named_in(&registry, &scope, "s", Vec::new());
        assert_eq!(registry.active_span_count(), 1);
        span.done(None);
        assert_eq!(registry.active_span_count(), 0);
    }
}
