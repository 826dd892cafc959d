//! Packed, polymorphic scalar (spec §4.1).
//!
//! The original representation packs a pointer-sized slot and a 64-bit data slot, telling
//! primitive and pointer-bearing variants apart by an address-range test against a
//! sentinel table. That trick buys compactness at the cost of being unsound outside a GC'd
//! or otherwise pointer-tagging-friendly runtime. Here it is replaced with a native tagged
//! union (`REDESIGN FLAGS`, unsafe pointer packing of Value): a plain `Kind` discriminant
//! plus an enum holding each variant's natural Rust representation. Variable-length
//! payloads still carry an explicit length bound so callers refusing oversized input keeps
//! the same observable behavior as before.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::codec::{put_bytes, put_varint, Reader};
use crate::error::DecodeError;
use crate::histogram::Histogram;

/// Maximum length, in bytes, of a string or byte-sequence value. Oversize input is not an
/// error; constructors silently fall back to [`Value::Empty`], matching the packed
/// representation's "refuse values exceeding the bound" rule for `append_to`/`read_from`.
pub const MAX_BYTES_LEN: usize = 1 << 24;

/// Discriminant for [`Value`]. Numeric values are stable and used as the wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Kind {
    Empty = 0,
    Str = 1,
    Bytes = 2,
    Histogram = 3,
    TraceId = 4,
    SpanId = 5,
    Int = 6,
    UInt = 7,
    Duration = 8,
    Float = 9,
    Bool = 10,
    Timestamp = 11,
    Ident = 12,
}

impl Kind {
    fn from_tag(tag: u8) -> Option<Kind> {
        use Kind::*;
        Some(match tag {
            0 => Empty,
            1 => Str,
            2 => Bytes,
            3 => Histogram,
            4 => TraceId,
            5 => SpanId,
            6 => Int,
            7 => UInt,
            8 => Duration,
            9 => Float,
            10 => Bool,
            11 => Timestamp,
            12 => Ident,
            _ => return None,
        })
    }
}

/// A single polymorphic value. Cheap to clone: strings/bytes/histograms are reference
/// counted, everything else is `Copy`-sized data inline.
#[derive(Debug, Clone)]
pub enum Value {
    Empty,
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    Histogram(Arc<Histogram>),
    TraceId([u8; 16]),
    SpanId([u8; 8]),
    Int(i64),
    UInt(u64),
    Duration(i64),
    Float(f64),
    Bool(bool),
    Timestamp(i64),
    Ident(u64),
}

impl Default for Value {
    fn default() -> Self {
        Value::Empty
    }
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Empty => Kind::Empty,
            Value::Str(_) => Kind::Str,
            Value::Bytes(_) => Kind::Bytes,
            Value::Histogram(_) => Kind::Histogram,
            Value::TraceId(_) => Kind::TraceId,
            Value::SpanId(_) => Kind::SpanId,
            Value::Int(_) => Kind::Int,
            Value::UInt(_) => Kind::UInt,
            Value::Duration(_) => Kind::Duration,
            Value::Float(_) => Kind::Float,
            Value::Bool(_) => Kind::Bool,
            Value::Timestamp(_) => Kind::Timestamp,
            Value::Ident(_) => Kind::Ident,
        }
    }

    /// Returns [`Value::Empty`] if `s` exceeds [`MAX_BYTES_LEN`].
    pub fn string(s: impl Into<Arc<str>>) -> Value {
        let s = s.into();
        if s.len() > MAX_BYTES_LEN {
            return Value::Empty;
        }
        Value::Str(s)
    }

    /// Returns [`Value::Empty`] if `b` exceeds [`MAX_BYTES_LEN`].
    pub fn bytes(b: impl Into<Arc<[u8]>>) -> Value {
        let b = b.into();
        if b.len() > MAX_BYTES_LEN {
            return Value::Empty;
        }
        Value::Bytes(b)
    }

    pub fn histogram(h: Histogram) -> Value {
        Value::Histogram(Arc::new(h))
    }

    /// Returns [`Value::Empty`] if `id` is not exactly 16 bytes.
    pub fn trace_id(id: &[u8]) -> Value {
        match <[u8; 16]>::try_from(id) {
            Ok(arr) => Value::TraceId(arr),
            Err(_) => Value::Empty,
        }
    }

    /// Returns [`Value::Empty`] if `id` is not exactly 8 bytes.
    pub fn span_id(id: &[u8]) -> Value {
        match <[u8; 8]>::try_from(id) {
            Ok(arr) => Value::SpanId(arr),
            Err(_) => Value::Empty,
        }
    }

    pub fn int(v: i64) -> Value {
        Value::Int(v)
    }

    pub fn uint(v: u64) -> Value {
        Value::UInt(v)
    }

    pub fn duration(v: i64) -> Value {
        Value::Duration(v)
    }

    pub fn float(v: f64) -> Value {
        Value::Float(v)
    }

    pub fn bool(v: bool) -> Value {
        Value::Bool(v)
    }

    pub fn timestamp(v: i64) -> Value {
        Value::Timestamp(v)
    }

    pub fn ident(v: u64) -> Value {
        Value::Ident(v)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn as_str(&self) -> (Option<&str>, bool) {
        match self {
            Value::Str(s) => (Some(s), true),
            _ => (None, false),
        }
    }

    pub fn as_bytes(&self) -> (Option<&[u8]>, bool) {
        match self {
            Value::Bytes(b) => (Some(b), true),
            _ => (None, false),
        }
    }

    pub fn as_histogram(&self) -> (Option<&Arc<Histogram>>, bool) {
        match self {
            Value::Histogram(h) => (Some(h), true),
            _ => (None, false),
        }
    }

    pub fn as_trace_id(&self) -> (Option<[u8; 16]>, bool) {
        match self {
            Value::TraceId(t) => (Some(*t), true),
            _ => (None, false),
        }
    }

    pub fn as_span_id(&self) -> (Option<[u8; 8]>, bool) {
        match self {
            Value::SpanId(s) => (Some(*s), true),
            _ => (None, false),
        }
    }

    pub fn as_int(&self) -> (i64, bool) {
        match self {
            Value::Int(v) => (*v, true),
            _ => (0, false),
        }
    }

    pub fn as_uint(&self) -> (u64, bool) {
        match self {
            Value::UInt(v) => (*v, true),
            _ => (0, false),
        }
    }

    pub fn as_duration(&self) -> (i64, bool) {
        match self {
            Value::Duration(v) => (*v, true),
            _ => (0, false),
        }
    }

    pub fn as_float(&self) -> (f64, bool) {
        match self {
            Value::Float(v) => (*v, true),
            _ => (0.0, false),
        }
    }

    pub fn as_bool(&self) -> (bool, bool) {
        match self {
            Value::Bool(v) => (*v, true),
            _ => (false, false),
        }
    }

    pub fn as_timestamp(&self) -> (i64, bool) {
        match self {
            Value::Timestamp(v) => (*v, true),
            _ => (0, false),
        }
    }

    pub fn as_ident(&self) -> (u64, bool) {
        match self {
            Value::Ident(v) => (*v, true),
            _ => (0, false),
        }
    }

    /// Structural equality. Cross-`Kind` comparisons are always unequal (spec §4.1).
    pub fn equal(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Empty, Empty) => true,
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Histogram(a), Histogram(b)) => Arc::ptr_eq(a, b) || **a == **b,
            (TraceId(a), TraceId(b)) => a == b,
            (SpanId(a), SpanId(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (UInt(a), UInt(b)) => a == b,
            (Duration(a), Duration(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (Ident(a), Ident(b)) => a == b,
            _ => false,
        }
    }

    /// Totally ordered within a `Kind`; `(false, false)` means "incomparable" across
    /// `Kind`s. Bool order is `false < true`; histogram order is by minimum observed
    /// value.
    pub fn less(&self, other: &Value) -> (bool, bool) {
        use Value::*;
        match (self, other) {
            (Empty, Empty) => (false, true),
            (Str(a), Str(b)) => (a < b, true),
            (Bytes(a), Bytes(b)) => (a < b, true),
            (Histogram(a), Histogram(b)) => (a.min() < b.min(), true),
            (TraceId(a), TraceId(b)) => (a < b, true),
            (SpanId(a), SpanId(b)) => (a < b, true),
            (Int(a), Int(b)) => (a < b, true),
            (UInt(a), UInt(b)) => (a < b, true),
            (Duration(a), Duration(b)) => (a < b, true),
            (Float(a), Float(b)) => (a < b, true),
            (Bool(a), Bool(b)) => (!a & b, true),
            (Timestamp(a), Timestamp(b)) => (a < b, true),
            (Ident(a), Ident(b)) => (a < b, true),
            _ => (false, false),
        }
    }

    /// Upcasts a single operand toward a common numeric representation, mirroring the
    /// original's `upcastNumeric` (spec §4.3): an `Int` becomes a `Float` only if that
    /// conversion round-trips exactly, else a non-negative `Int` becomes a `UInt`; a
    /// `UInt` becomes a `Float` only if that conversion round-trips exactly. Every other
    /// `Kind` (including `Duration` and `Timestamp`, which are deliberately excluded from
    /// numeric upcast) passes through unchanged. Callers only apply this when the two
    /// operands' `Kind`s differ to begin with — same-`Kind` operands compare directly.
    pub fn upcast_numeric(&self) -> Value {
        let mut v = self.clone();
        if let Value::Int(i) = v {
            if i as f64 as i64 == i {
                v = Value::Float(i as f64);
            } else if i >= 0 {
                v = Value::UInt(i as u64);
            }
        }
        if let Value::UInt(u) = v {
            if u as f64 as u64 == u {
                v = Value::Float(u as f64);
            }
        }
        v
    }

    pub fn append_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.kind() as u8);
        match self {
            Value::Empty => {}
            Value::Str(s) => {
                put_varint(buf, s.len() as u64);
                put_bytes(buf, s.as_bytes());
            }
            Value::Bytes(b) => {
                put_varint(buf, b.len() as u64);
                put_bytes(buf, b);
            }
            Value::Histogram(h) => h.append_to(buf),
            Value::TraceId(t) => put_bytes(buf, t),
            Value::SpanId(s) => put_bytes(buf, s),
            Value::Int(v) => put_varint(buf, *v as u64),
            Value::UInt(v) => put_varint(buf, *v),
            Value::Duration(v) => put_varint(buf, *v as u64),
            Value::Float(v) => put_varint(buf, v.to_bits()),
            Value::Bool(v) => put_varint(buf, *v as u64),
            Value::Timestamp(v) => put_varint(buf, *v as u64),
            Value::Ident(v) => put_varint(buf, *v),
        }
    }

    pub fn read_from(r: &mut Reader<'_>) -> Result<Value, DecodeError> {
        let tag = r.read_u8();
        if r.has_error() {
            return Err(DecodeError::ShortBuffer);
        }
        let kind = Kind::from_tag(tag).ok_or(DecodeError::BadKind)?;
        let v = match kind {
            Kind::Empty => Value::Empty,
            Kind::Str => {
                let n = r.read_varint();
                if n as usize > MAX_BYTES_LEN {
                    return Err(DecodeError::BadLength);
                }
                let bytes = r.read_bytes(n);
                if r.has_error() {
                    return Err(DecodeError::ShortBuffer);
                }
                let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::BadLength)?;
                Value::Str(Arc::from(s))
            }
            Kind::Bytes => {
                let n = r.read_varint();
                if n as usize > MAX_BYTES_LEN {
                    return Err(DecodeError::BadLength);
                }
                let bytes = r.read_bytes(n);
                if r.has_error() {
                    return Err(DecodeError::ShortBuffer);
                }
                Value::Bytes(Arc::from(bytes))
            }
            Kind::Histogram => Value::Histogram(Arc::new(Histogram::read_from(r)?)),
            Kind::TraceId => {
                let bytes = r.read_bytes(16);
                if r.has_error() {
                    return Err(DecodeError::ShortBuffer);
                }
                Value::TraceId(bytes.try_into().map_err(|_| DecodeError::BadLength)?)
            }
            Kind::SpanId => {
                let bytes = r.read_bytes(8);
                if r.has_error() {
                    return Err(DecodeError::ShortBuffer);
                }
                Value::SpanId(bytes.try_into().map_err(|_| DecodeError::BadLength)?)
            }
            Kind::Int => Value::Int(r.read_varint() as i64),
            Kind::UInt => Value::UInt(r.read_varint()),
            Kind::Duration => Value::Duration(r.read_varint() as i64),
            Kind::Float => Value::Float(f64::from_bits(r.read_varint())),
            Kind::Bool => Value::Bool(r.read_varint() != 0),
            Kind::Timestamp => Value::Timestamp(r.read_varint() as i64),
            Kind::Ident => Value::Ident(r.read_varint()),
        };
        if r.has_error() {
            return Err(DecodeError::ShortBuffer);
        }
        Ok(v)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.equal(other) {
            return Some(Ordering::Equal);
        }
        let (less, ok) = self.less(other);
        if !ok {
            return None;
        }
        Some(if less { Ordering::Less } else { Ordering::Greater })
    }
}
