//! JSON rendering for the inspection surface (spec §6.3). None of this is the wire
//! format from §6.1 — it exists only to make a running pipeline legible over HTTP, the
//! way `opentelemetry-zpages` renders its `TracezResponse` for `/tracez/api`.

use serde_json::{json, Value as Json};

use crate::event::Event;
use crate::submit::Submitter;
use crate::value::Value;

pub fn value_to_json(v: &Value) -> Json {
    match v {
        Value::Empty => Json::Null,
        Value::Str(s) => json!(s.as_ref()),
        Value::Bytes(b) => json!(hex_encode(b)),
        Value::Histogram(h) => json!({
            "count": h.count(),
            "sum": h.sum(),
            "min": h.min(),
            "max": h.max(),
            "mean": h.mean(),
        }),
        Value::TraceId(id) => json!(hex_encode(id)),
        Value::SpanId(id) => json!(hex_encode(id)),
        Value::Int(i) => json!(i),
        Value::UInt(u) => json!(u),
        Value::Duration(d) => json!(d),
        Value::Float(f) => json!(f),
        Value::Bool(b) => json!(b),
        Value::Timestamp(t) => json!(t),
        Value::Ident(i) => json!(i),
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Renders an event as an ordered array of `{key, value}`, preserving duplicate keys the
/// way the wire format does (spec §3 "last write wins at lookup, not at storage").
pub fn event_to_json(ev: &Event) -> Json {
    Json::Array(
        ev.annotations()
            .iter()
            .map(|a| json!({ "key": &*a.key, "value": value_to_json(&a.value) }))
            .collect(),
    )
}

pub fn stats_to_json(stats: &[(String, u64)]) -> Json {
    Json::Array(
        stats
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect(),
    )
}

/// Recursively renders a node and its descendants (the `/tree` endpoint).
pub fn tree_json(node: &std::sync::Arc<dyn Submitter>) -> Json {
    json!({
        "name": node.name(),
        "stats": stats_to_json(&node.stats()),
        "extra": node.extra_data(),
        "has_live": node.live().is_some(),
        "children": node.children().iter().map(tree_json).collect::<Vec<_>>(),
    })
}
