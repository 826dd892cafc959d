//! Submitter nodes: the pipeline graph's vertices (spec §4.6).
//!
//! Every node implements [`Submitter`]: a synchronous, non-blocking `submit`, tree
//! introspection (`children`, `name`, `extra_data`), and per-node counters via `stats`.
//! A subset (grouper, HTTP, OTel) also run a background task; `run` defaults to an
//! immediately-returning no-op so only those nodes need to override it.

pub mod filter;
pub mod grouper;
pub mod http;
pub mod hydrator;
pub mod late;
pub mod multi;
pub mod null;
pub mod otel;
pub mod prometheus;
pub mod tracebuf;

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::event::Event;
use crate::ring::RingBuffer;
use crate::scope::Scope;

#[async_trait]
pub trait Submitter: Send + Sync + 'static {
    /// Accepts one event. Must return quickly and never block beyond a short
    /// mutex-guarded critical section (spec §5).
    fn submit(&self, scope: &Scope, ev: &Event);

    /// Direct children, for `/tree` introspection. Leaf nodes return an empty vec.
    fn children(&self) -> Vec<Arc<dyn Submitter>> {
        Vec::new()
    }

    /// Node type name, e.g. `"multi"`, `"filter"`, `"grouper"`.
    fn name(&self) -> &'static str;

    /// Per-node counters as `(name, value)` pairs, surfaced at `/stats`.
    fn stats(&self) -> Vec<(String, u64)> {
        Vec::new()
    }

    /// Node-type-specific JSON fragment for `/tree`.
    fn extra_data(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// The node's recent-events ring, if it keeps one, for `/live`.
    fn live(&self) -> Option<&RingBuffer<Event>> {
        None
    }

    /// Enables downcasting to a concrete node type for the typed HTTP extensions
    /// (`/query`, `/metrics`, `/traces`).
    fn as_any(&self) -> &dyn Any;

    /// Background loop for runnable nodes (grouper, HTTP, OTel). Default is a no-op for
    /// nodes that only react to `submit`.
    async fn run(self: Arc<Self>, _cancel: CancellationToken) {}
}
