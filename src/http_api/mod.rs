//! HTTP inspection surface (spec §6.3).
//!
//! [`json`] renders submitter nodes, stats, and events as JSON (no relation to the wire
//! format in §6.1 — this exists only to make a running pipeline legible over HTTP).
//! [`router::Api`] dispatches `/tree`, `/live`, `/stats`, `/sub/<i>`, and the
//! node-specific `/query`, `/metrics`, `/traces` endpoints against whatever pipeline a
//! [`crate::pipeline::Handle`] currently points at.

pub mod json;
pub mod router;

pub use router::{Api, ResponseBody};
