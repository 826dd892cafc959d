//! Annotations and events (spec §3, §6.1).
//!
//! An [`Event`] is an ordered sequence of [`Annotation`]s. Lookup is last-write-wins:
//! later annotations with the same key shadow earlier ones, but nothing is removed from
//! the backing vector, so the wire encoding still round-trips duplicates byte for byte.

use std::sync::Arc;

use crate::codec::{put_bytes, put_varint, Reader};
use crate::error::DecodeError;
use crate::value::Value;

/// Keys with system-assigned meaning on spans and logs. A process-level or user
/// annotation must not use one of these (spec §3); callers that build events from
/// untrusted annotation sets should check [`is_reserved`] before inserting.
pub const RESERVED_KEYS: &[&str] = &[
    "file", "func", "line", "message", "timestamp", "name", "start", "span_id",
    "parent_id", "trace_id", "duration", "success",
];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub key: Arc<str>,
    pub value: Value,
}

impl Annotation {
    pub fn new(key: impl Into<Arc<str>>, value: Value) -> Self {
        Annotation {
            key: key.into(),
            value,
        }
    }
}

/// An ordered sequence of annotations. Construction never deduplicates; [`Event::get`]
/// resolves duplicates by scanning from the end so the last write wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    annotations: Vec<Annotation>,
}

impl Event {
    pub fn new() -> Self {
        Event::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Event {
            annotations: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, key: impl Into<Arc<str>>, value: Value) {
        self.annotations.push(Annotation::new(key, value));
    }

    pub fn push_annotation(&mut self, a: Annotation) {
        self.annotations.push(a);
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Last-write-wins lookup: returns the value of the most recently pushed annotation
    /// with this key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.annotations
            .iter()
            .rev()
            .find(|a| &*a.key == key)
            .map(|a| &a.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn append_to(&self, buf: &mut Vec<u8>) {
        put_varint(buf, self.annotations.len() as u64);
        for a in &self.annotations {
            put_varint(buf, a.key.len() as u64);
            put_bytes(buf, a.key.as_bytes());
            a.value.append_to(buf);
        }
    }

    pub fn read_from(r: &mut Reader<'_>) -> Result<Event, DecodeError> {
        let n = r.read_varint();
        if r.has_error() {
            return Err(DecodeError::ShortBuffer);
        }
        let mut annotations = Vec::with_capacity(n.min(4096) as usize);
        for _ in 0..n {
            let klen = r.read_varint();
            let kbytes = r.read_bytes(klen);
            if r.has_error() {
                return Err(DecodeError::ShortBuffer);
            }
            let key = std::str::from_utf8(kbytes).map_err(|_| DecodeError::BadLength)?;
            let value = Value::read_from(r)?;
            annotations.push(Annotation::new(key, value));
        }
        if r.has_error() {
            return Err(DecodeError::ShortBuffer);
        }
        Ok(Event { annotations })
    }
}

impl FromIterator<Annotation> for Event {
    fn from_iter<T: IntoIterator<Item = Annotation>>(iter: T) -> Self {
        Event {
            annotations: iter.into_iter().collect(),
        }
    }
}

/// Reads one length-prefixed event from `buf`, returning the event and the number of
/// bytes consumed. Generalizes the original implementation's framing helpers
/// (`protocol/protocol.go`) so the HTTP batch exporter and any future persistence layer
/// share one implementation.
pub fn read_event(buf: &[u8]) -> Result<(Event, usize), DecodeError> {
    let mut r = Reader::new(buf);
    let ev = Event::read_from(&mut r)?;
    let consumed = buf.len() - r.remaining().len();
    Ok((ev, consumed))
}

/// Appends one length-prefixed event to `buf`. The prefix is implicit: an event's wire
/// form already begins with its own annotation count, so no additional framing is added
/// here beyond what [`Event::append_to`] writes; this wrapper exists for symmetry with
/// [`read_event`] and as the single call site callers should use.
pub fn write_event(buf: &mut Vec<u8>, ev: &Event) {
    ev.append_to(buf);
}
