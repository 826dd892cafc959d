//! Grouping key (spec §4.4).
//!
//! A deterministic fingerprint over a chosen, lexicographically sorted subset of an
//! event's annotations, with a per-key atomic hint so repeat lookups on events whose
//! shape doesn't change skip the reverse scan.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::event::{Annotation, Event};

const VALID_BIT: u32 = 1 << 31;
const INDEX_MASK: u32 = VALID_BIT - 1;

/// An interned fingerprint handle. Two handles produced from byte-identical group-key
/// buffers compare equal and hash equal; in practice they are also the same `Arc`,
/// because [`Interner::intern`] always returns the pooled copy.
pub type GroupHandle = Arc<[u8]>;

struct Interner {
    pool: Mutex<HashSet<Arc<[u8]>>>,
}

impl Interner {
    fn new() -> Self {
        Interner {
            pool: Mutex::new(HashSet::new()),
        }
    }

    fn intern(&self, bytes: &[u8]) -> GroupHandle {
        let mut pool = self.pool.lock().unwrap();
        if let Some(existing) = pool.get(bytes) {
            return existing.clone();
        }
        let arc: Arc<[u8]> = Arc::from(bytes);
        pool.insert(arc.clone());
        arc
    }
}

/// How the grouper handles an event missing one of its configured keys. The spec leaves
/// this an open question ("Implementer MUST pick one and document"); see `DESIGN.md` for
/// the rationale behind defaulting to [`MissingKeyBehavior::Omit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingKeyBehavior {
    /// Silently omit the missing key from both the fingerprint and the seed annotations.
    Omit,
    /// Drop the whole event: [`Grouper::resolve`] returns `None`.
    DropEvent,
}

/// Computes a group fingerprint over a fixed, sorted set of annotation keys.
pub struct Grouper {
    keys: Vec<Arc<str>>,
    hints: Vec<AtomicU32>,
    interner: Interner,
    on_missing: MissingKeyBehavior,
}

impl Grouper {
    pub fn new(mut keys: Vec<String>, on_missing: MissingKeyBehavior) -> Self {
        keys.sort();
        keys.dedup();
        let hints = keys.iter().map(|_| AtomicU32::new(0)).collect();
        Grouper {
            keys: keys.into_iter().map(Arc::from).collect(),
            hints,
            interner: Interner::new(),
            on_missing,
        }
    }

    pub fn keys(&self) -> &[Arc<str>] {
        &self.keys
    }

    /// Resolves the configured keys against `ev`, returning the seed annotations (in
    /// configured key order) and the interned fingerprint, or `None` if a key is missing
    /// and `on_missing` is [`MissingKeyBehavior::DropEvent`].
    pub fn resolve(&self, ev: &Event) -> Option<(Vec<Annotation>, GroupHandle)> {
        let mut seed = Vec::with_capacity(self.keys.len());
        let mut buf = Vec::new();
        for (i, key) in self.keys.iter().enumerate() {
            let found = self.lookup(i, key, ev);
            match found {
                Some(idx) => {
                    let ann = &ev.annotations()[idx];
                    buf.extend_from_slice(&(key.len() as u64).to_be_bytes());
                    buf.extend_from_slice(key.as_bytes());
                    ann.value.append_to(&mut buf);
                    seed.push(ann.clone());
                }
                None => match self.on_missing {
                    MissingKeyBehavior::Omit => continue,
                    MissingKeyBehavior::DropEvent => return None,
                },
            }
        }
        let handle = self.interner.intern(&buf);
        Some((seed, handle))
    }

    fn lookup(&self, hint_idx: usize, key: &str, ev: &Event) -> Option<usize> {
        let annotations = ev.annotations();
        let hint = self.hints[hint_idx].load(Ordering::Relaxed);
        if hint & VALID_BIT != 0 {
            let idx = (hint & INDEX_MASK) as usize;
            if idx < annotations.len() && &*annotations[idx].key == key {
                return Some(idx);
            }
        }
        for idx in (0..annotations.len()).rev() {
            if &*annotations[idx].key == key {
                self.hints[hint_idx].store(idx as u32 | VALID_BIT, Ordering::Relaxed);
                return Some(idx);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn event_with(pairs: &[(&str, Value)]) -> Event {
        let mut ev = Event::new();
        for (k, v) in pairs {
            ev.push(*k, v.clone());
        }
        ev
    }

    #[test]
    fn identical_keyed_values_yield_identical_handle() {
        let g = Grouper::new(vec!["name".into(), "success".into()], MissingKeyBehavior::Omit);
        let e1 = event_with(&[
            ("name", Value::string("req")),
            ("success", Value::bool(true)),
            ("unrelated", Value::int(1)),
        ]);
        let e2 = event_with(&[
            ("unrelated", Value::int(99)),
            ("name", Value::string("req")),
            ("success", Value::bool(true)),
        ]);
        let (seed1, h1) = g.resolve(&e1).unwrap();
        let (seed2, h2) = g.resolve(&e2).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(seed1.len(), 2);
        assert_eq!(seed2.len(), 2);
    }

    #[test]
    fn different_values_yield_different_handle() {
        let g = Grouper::new(vec!["name".into()], MissingKeyBehavior::Omit);
        let e1 = event_with(&[("name", Value::string("a"))]);
        let e2 = event_with(&[("name", Value::string("b"))]);
        let (_, h1) = g.resolve(&e1).unwrap();
        let (_, h2) = g.resolve(&e2).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn missing_key_omit_still_resolves() {
        let g = Grouper::new(vec!["name".into(), "missing".into()], MissingKeyBehavior::Omit);
        let e = event_with(&[("name", Value::string("a"))]);
        let (seed, _) = g.resolve(&e).unwrap();
        assert_eq!(seed.len(), 1);
    }

    #[test]
    fn missing_key_drop_event_returns_none() {
        let g = Grouper::new(vec!["missing".into()], MissingKeyBehavior::DropEvent);
        let e = event_with(&[("name", Value::string("a"))]);
        assert!(g.resolve(&e).is_none());
    }

    #[test]
    fn last_write_wins_feeds_the_fingerprint() {
        let g = Grouper::new(vec!["name".into()], MissingKeyBehavior::Omit);
        let mut e = Event::new();
        e.push("name", Value::string("first"));
        e.push("name", Value::string("second"));
        let (seed, _) = g.resolve(&e).unwrap();
        let (s, _) = seed[0].value.as_str();
        assert_eq!(s, Some("second"));
    }
}
