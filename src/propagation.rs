//! W3C trace-context propagation (spec §6.5).
//!
//! Only the `traceparent` header is modeled; `tracestate` and vendor-specific formats are
//! out of scope (spec §1 treats propagation format parsing as covered, nothing else).

pub const TRACEPARENT_HEADER: &str = "traceparent";

const VERSION: &str = "00";

/// Ids extracted from a `traceparent` header. Malformed input (wrong field count, bad hex,
/// wrong length, all-zero trace or span id) yields [`Extracted::INVALID`], which callers
/// should treat as "start a fresh trace."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extracted {
    pub trace_id: [u8; 16],
    pub span_id: [u8; 8],
    pub sampled: bool,
}

impl Extracted {
    pub const INVALID: Extracted = Extracted {
        trace_id: [0u8; 16],
        span_id: [0u8; 8],
        sampled: false,
    };

    pub fn is_valid(&self) -> bool {
        self.trace_id != [0u8; 16] && self.span_id != [0u8; 8]
    }
}

/// Parses a `traceparent` header value. Any parse failure returns [`Extracted::INVALID`]
/// rather than an error, matching the spec's "malformed input yields zero ids" contract.
pub fn extract(header: &str) -> Extracted {
    let parts: Vec<&str> = header.trim().split('-').collect();
    if parts.len() != 4 {
        return Extracted::INVALID;
    }
    let [version, trace_hex, span_hex, flags_hex] = [parts[0], parts[1], parts[2], parts[3]];
    if version.len() != 2 || trace_hex.len() != 32 || span_hex.len() != 16 || flags_hex.len() != 2 {
        return Extracted::INVALID;
    }
    if version == "ff" {
        return Extracted::INVALID;
    }
    let trace_id = match decode_hex_16(trace_hex) {
        Some(t) => t,
        None => return Extracted::INVALID,
    };
    let span_id = match decode_hex_8(span_hex) {
        Some(s) => s,
        None => return Extracted::INVALID,
    };
    if trace_id == [0u8; 16] || span_id == [0u8; 8] {
        return Extracted::INVALID;
    }
    let flags = match u8::from_str_radix(flags_hex, 16) {
        Ok(f) => f,
        Err(_) => return Extracted::INVALID,
    };
    Extracted {
        trace_id,
        span_id,
        sampled: flags & 0x01 != 0,
    }
}

/// Renders a `traceparent` header value for the given ids. Always sampled (`01`); this
/// crate has no sampling concept to propagate.
pub fn inject(trace_id: [u8; 16], span_id: [u8; 8]) -> String {
    format!("{VERSION}-{}-{}-01", hex(&trace_id), hex(&span_id))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex_16(s: &str) -> Option<[u8; 16]> {
    let mut out = [0u8; 16];
    decode_hex_into(s, &mut out)?;
    Some(out)
}

fn decode_hex_8(s: &str) -> Option<[u8; 8]> {
    let mut out = [0u8; 8];
    decode_hex_into(s, &mut out)?;
    Some(out)
}

fn decode_hex_into(s: &str, out: &mut [u8]) -> Option<()> {
    if s.len() != out.len() * 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let byte_str = std::str::from_utf8(chunk).ok()?;
        out[i] = u8::from_str_radix(byte_str, 16).ok()?;
    }
    Some(())
}
