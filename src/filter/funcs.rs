//! Built-in filter functions (spec §4.3 "Built-ins", §6.4).
//!
//! `key` and `has` are intrinsics dispatched directly by the evaluator against the event
//! being tested (indices 0 and 1 are reserved for them and never appear in
//! [`Environment`]'s function table); everything else here is a plain value-to-value
//! function with no access to the event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::error::ParseError;
use crate::value::Value;

pub const KEY_INDEX: u32 = 0;
pub const HAS_INDEX: u32 = 1;

pub type BuiltinFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// The name→index function table a compiled [`crate::filter::Filter`] closes over.
/// Indices 0 and 1 are reserved slots for the `key`/`has` intrinsics; they hold no
/// callable and exist only so [`Environment::lookup`] resolves those names to the
/// indices the evaluator special-cases.
pub struct Environment {
    names: HashMap<String, u32>,
    funcs: Vec<Option<(usize, BuiltinFn)>>,
}

fn now_unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Mirrors the original's `popForCompare`/`valuesLess`: operands of differing `Kind`s are
/// upcast toward a common numeric representation (spec §4.3) before comparing; operands
/// that still differ in `Kind` afterward (e.g. a `Duration` against an `Int`, or a `Float`
/// against a `UInt` too large to round-trip) are incomparable, not silently coerced.
fn coerced_cmp(args: &[Value]) -> Option<(std::cmp::Ordering, bool)> {
    let (a, b) = (args.first()?, args.get(1)?);
    let (a, b) = if a.kind() != b.kind() {
        (a.upcast_numeric(), b.upcast_numeric())
    } else {
        (a.clone(), b.clone())
    };
    if a.equal(&b) {
        return Some((std::cmp::Ordering::Equal, true));
    }
    let (less, ok) = a.less(&b);
    if !ok {
        return None;
    }
    Some((
        if less {
            std::cmp::Ordering::Less
        } else {
            std::cmp::Ordering::Greater
        },
        true,
    ))
}

impl Environment {
    pub fn new() -> Self {
        let mut env = Environment {
            names: HashMap::new(),
            funcs: vec![None, None],
        };
        env.names.insert("key".to_string(), KEY_INDEX);
        env.names.insert("has".to_string(), HAS_INDEX);

        env.register_builtin("eq", 2, |a| {
            Value::bool(matches!(coerced_cmp(a), Some((std::cmp::Ordering::Equal, true))))
        });
        env.register_builtin("lt", 2, |a| {
            Value::bool(matches!(coerced_cmp(a), Some((std::cmp::Ordering::Less, true))))
        });
        env.register_builtin("lte", 2, |a| {
            Value::bool(matches!(
                coerced_cmp(a),
                Some((std::cmp::Ordering::Less | std::cmp::Ordering::Equal, true))
            ))
        });
        env.register_builtin("gt", 2, |a| {
            Value::bool(matches!(coerced_cmp(a), Some((std::cmp::Ordering::Greater, true))))
        });
        env.register_builtin("gte", 2, |a| {
            Value::bool(matches!(
                coerced_cmp(a),
                Some((std::cmp::Ordering::Greater | std::cmp::Ordering::Equal, true))
            ))
        });
        env.register_builtin("not", 1, |a| {
            let (b, ok) = a.first().map(|v| v.as_bool()).unwrap_or((false, false));
            Value::bool(ok && !b)
        });
        env.register_builtin("true", 0, |_| Value::bool(true));
        env.register_builtin("false", 0, |_| Value::bool(false));
        env.register_builtin("rand", 0, |_| Value::float(rand::thread_rng().gen_range(0.0..1.0)));
        env.register_builtin("since", 1, |a| match a.first() {
            Some(v) => {
                let (ts, ok) = v.as_timestamp();
                if ok {
                    Value::duration(now_unix_nanos() - ts)
                } else {
                    Value::Empty
                }
            }
            None => Value::Empty,
        });
        env
    }

    fn register_builtin(
        &mut self,
        name: &str,
        arity: usize,
        f: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) {
        let idx = self.funcs.len() as u32;
        self.funcs.push(Some((arity, Arc::new(f))));
        self.names.insert(name.to_string(), idx);
    }

    /// Registers a user-supplied function. Overriding `key` or `has` is always rejected
    /// (spec §6.4: "User environments MUST reject attempts to override `key` or `has`").
    pub fn register(
        &mut self,
        name: &str,
        arity: usize,
        f: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Result<(), ParseError> {
        if name == "key" || name == "has" {
            return Err(ParseError::ReservedFunctionName(name.to_string()));
        }
        self.register_builtin(name, arity, f);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.names.get(name).copied()
    }

    pub fn arity(&self, idx: u32) -> Option<usize> {
        self.funcs.get(idx as usize)?.as_ref().map(|(a, _)| *a)
    }

    pub fn call(&self, idx: u32, args: &[Value]) -> Option<Value> {
        self.funcs.get(idx as usize)?.as_ref().map(|(_, f)| f(args))
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

/// Test-only counter a seeded `panic()` function can bump so scenario tests can assert it
/// was never called without actually unwinding.
#[derive(Default)]
pub struct CallCounter(AtomicU64);

impl CallCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(CallCounter::default())
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_compares_equal_kinds() {
        let env = Environment::new();
        let idx = env.lookup("eq").unwrap();
        let r = env.call(idx, &[Value::int(3), Value::int(3)]).unwrap();
        assert_eq!(r, Value::bool(true));
    }

    #[test]
    fn eq_coerces_int_and_float() {
        let env = Environment::new();
        let idx = env.lookup("eq").unwrap();
        let r = env.call(idx, &[Value::int(3), Value::float(3.0)]).unwrap();
        assert_eq!(r, Value::bool(true));
    }

    #[test]
    fn lt_treats_duration_and_int_as_incomparable() {
        let env = Environment::new();
        let idx = env.lookup("lt").unwrap();
        let r = env.call(idx, &[Value::duration(5), Value::int(10)]).unwrap();
        assert_eq!(r, Value::bool(false));
    }

    #[test]
    fn lt_treats_lossy_uint_against_float_as_incomparable() {
        let env = Environment::new();
        let idx = env.lookup("lt").unwrap();
        // 1u64 << 60 doesn't round-trip through f64 exactly, so it must stay incomparable
        // against a Float rather than silently casting (spec §4.3, §8 scenario grounding).
        let r = env.call(idx, &[Value::float(0.5), Value::uint(1u64 << 60)]).unwrap();
        assert_eq!(r, Value::bool(false));
    }

    #[test]
    fn lt_respects_ordering() {
        let env = Environment::new();
        let idx = env.lookup("lt").unwrap();
        let r = env.call(idx, &[Value::int(1), Value::int(2)]).unwrap();
        assert_eq!(r, Value::bool(true));
    }

    #[test]
    fn cannot_register_over_key_or_has() {
        let mut env = Environment::new();
        assert!(env.register("key", 1, |_| Value::Empty).is_err());
        assert!(env.register("has", 1, |_| Value::Empty).is_err());
    }

    #[test]
    fn since_computes_a_duration() {
        let env = Environment::new();
        let idx = env.lookup("since").unwrap();
        let r = env.call(idx, &[Value::timestamp(0)]).unwrap();
        let (d, ok) = r.as_duration();
        assert!(ok);
        assert!(d > 0);
    }

    #[test]
    fn rand_is_in_unit_interval() {
        let env = Environment::new();
        let idx = env.lookup("rand").unwrap();
        let r = env.call(idx, &[]).unwrap();
        let (f, ok) = r.as_float();
        assert!(ok);
        assert!((0.0..1.0).contains(&f));
    }
}
