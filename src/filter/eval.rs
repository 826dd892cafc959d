//! Stack-based evaluator for compiled filters (spec §4.3 "Evaluator").

use crate::event::Event;
use crate::filter::funcs::{HAS_INDEX, KEY_INDEX};
use crate::filter::inst::Inst;
use crate::filter::parse::Filter;
use crate::value::Value;

/// Evaluates `filter` against `ev`. Every failure mode named in spec §4.3 (`PushVal`
/// out-of-range, `Call` out-of-range, `Key` on a missing annotation, a type mismatch in
/// an `And`/`Or` pop) aborts evaluation and yields `false`, matching §7's "Lookup-miss ...
/// program returns false; not signaled as an error."
pub fn eval(filter: &Filter, ev: &Event) -> bool {
    let code = filter.code();
    if code.is_empty() {
        return true;
    }
    let mut stack: Vec<Value> = Vec::with_capacity(code.len());
    let mut pc: usize = 0;
    while pc < code.len() {
        match code[pc] {
            Inst::Nop => {}
            Inst::PushStr(idx) => match filter.strings().get(idx as usize) {
                Some(s) => stack.push(Value::Str(s.clone())),
                None => return false,
            },
            Inst::PushVal(idx) => match filter.consts().get(idx as usize) {
                Some(v) => stack.push(v.clone()),
                None => return false,
            },
            Inst::Key(idx) => {
                let key = match filter.strings().get(idx as usize) {
                    Some(s) => s,
                    None => return false,
                };
                match ev.get(key) {
                    Some(v) => stack.push(v.clone()),
                    None => return false,
                }
            }
            Inst::Has(idx) => {
                let key = match filter.strings().get(idx as usize) {
                    Some(s) => s,
                    None => return false,
                };
                stack.push(Value::bool(ev.contains_key(key)));
            }
            Inst::Call(idx) => {
                if idx == KEY_INDEX || idx == HAS_INDEX {
                    let arg = match stack.pop() {
                        Some(v) => v,
                        None => return false,
                    };
                    let (key, ok) = arg.as_str();
                    let key = match (key, ok) {
                        (Some(k), true) => k,
                        _ => return false,
                    };
                    if idx == HAS_INDEX {
                        stack.push(Value::bool(ev.contains_key(key)));
                    } else {
                        match ev.get(key) {
                            Some(v) => stack.push(v.clone()),
                            None => return false,
                        }
                    }
                } else {
                    let arity = match filter.env().arity(idx) {
                        Some(a) => a,
                        None => return false,
                    };
                    if stack.len() < arity {
                        return false;
                    }
                    let args: Vec<Value> = stack.split_off(stack.len() - arity);
                    match filter.env().call(idx, &args) {
                        Some(v) => stack.push(v),
                        None => return false,
                    }
                }
            }
            Inst::And | Inst::Or => {
                let (b, ok_b) = match stack.pop() {
                    Some(v) => v.as_bool(),
                    None => return false,
                };
                let (a, ok_a) = match stack.pop() {
                    Some(v) => v.as_bool(),
                    None => return false,
                };
                if !ok_a || !ok_b {
                    return false;
                }
                stack.push(Value::bool(if code[pc] == Inst::And { a && b } else { a || b }));
            }
            Inst::JumpFalse(rel) => {
                let (v, ok) = match stack.last() {
                    Some(v) => v.as_bool(),
                    None => return false,
                };
                if !ok {
                    return false;
                }
                if !v {
                    pc = (pc as i64 + 1 + rel as i64) as usize;
                    continue;
                }
            }
            Inst::JumpTrue(rel) => {
                let (v, ok) = match stack.last() {
                    Some(v) => v.as_bool(),
                    None => return false,
                };
                if !ok {
                    return false;
                }
                if v {
                    pc = (pc as i64 + 1 + rel as i64) as usize;
                    continue;
                }
            }
        }
        pc += 1;
    }
    match stack.pop() {
        Some(Value::Bool(b)) => b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::funcs::Environment;
    use crate::filter::parse::compile;
    use std::sync::Arc;

    fn ev(pairs: &[(&str, Value)]) -> Event {
        let mut e = Event::new();
        for (k, v) in pairs {
            e.push(*k, v.clone());
        }
        e
    }

    fn env() -> Arc<Environment> {
        Arc::new(Environment::new())
    }

    #[test]
    fn scenario_1_combined_predicate() {
        let f = compile(
            "eq(key(foo), bar) && has(test) && lt(rand(), 1) && gte(key(dur), 1m)",
            env(),
        )
        .unwrap();
        let e = ev(&[
            ("foo", Value::string("bar")),
            ("dur", Value::duration(60_000_000_000)),
            ("test", Value::int(42)),
        ]);
        assert!(eval(&f, &e));
    }

    #[test]
    fn scenario_2_double_indirection() {
        let f = compile("eq(key(key(foo)), bar)", env()).unwrap();
        let e = ev(&[("foo", Value::string("inner")), ("inner", Value::string("bar"))]);
        assert!(eval(&f, &e));
    }

    #[test]
    fn scenario_3_empty_filter_is_true() {
        let f = compile("", env()).unwrap();
        let e = Event::new();
        assert!(eval(&f, &e));
    }

    #[test]
    fn scenario_4_short_circuit_and() {
        let mut environment = Environment::new();
        let counter = crate::filter::funcs::CallCounter::new();
        let c = counter.clone();
        environment.register("panic", 0, move |_| {
            c.bump();
            Value::bool(true)
        }).unwrap();
        let f = compile("false() && panic()", Arc::new(environment)).unwrap();
        let e = Event::new();
        assert!(!eval(&f, &e));
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn short_circuit_or() {
        let mut environment = Environment::new();
        let counter = crate::filter::funcs::CallCounter::new();
        let c = counter.clone();
        environment.register("panic", 0, move |_| {
            c.bump();
            Value::bool(false)
        }).unwrap();
        let f = compile("true() || panic()", Arc::new(environment)).unwrap();
        let e = Event::new();
        assert!(eval(&f, &e));
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn missing_key_fails_program() {
        let f = compile("eq(key(missing), bar)", env()).unwrap();
        let e = Event::new();
        assert!(!eval(&f, &e));
    }

    #[test]
    fn has_never_fails_on_missing_key() {
        let f = compile("not(has(missing))", env()).unwrap();
        let e = Event::new();
        assert!(eval(&f, &e));
    }
}
