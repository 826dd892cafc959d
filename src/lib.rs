//! # signaltree
//!
//! An in-process telemetry pipeline: structured events flow through a recursively
//! constructed graph of submitter nodes (fan-out, filtering, grouping/aggregation,
//! batched HTTP/OTel export, Prometheus exposition, an ad-hoc metric store, trace
//! assembly) that can be hot-swapped from a remote JSON config without dropping events
//! in flight. A small filter expression language selects which events reach which
//! nodes; a tagged [`value::Value`] scalar and [`event::Event`] annotation list carry
//! the data itself.
//!
//! Typical use starts a span, annotates it, and lets it submit itself on completion:
//!
//! ```
//! use signaltree::scope::Scope;
//! use signaltree::span::start_span_named;
//! use signaltree::value::Value;
//!
//! let scope = Scope::new();
//! let (span, child_scope) = start_span_named(&scope, "handle_request", Vec::new());
//! span.annotate("route", Value::string("/health"));
//! drop(child_scope);
//! span.done(None);
//! ```

pub mod codec;
pub mod error;
pub mod event;
pub mod filter;
pub mod group;
pub mod histogram;
pub mod http_api;
pub mod jitter;
pub mod pipeline;
pub mod propagation;
pub mod registry;
pub mod ring;
pub mod scope;
pub mod span;
pub mod submit;
pub mod value;

pub use event::{Annotation, Event};
pub use scope::Scope;
pub use span::{start_remote_span_named, start_span_named, Span};
pub use submit::Submitter;
pub use value::Value;
