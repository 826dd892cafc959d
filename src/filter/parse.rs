//! Recursive-descent compiler and peephole optimizer for the filter language
//! (spec §4.3 "Grammar", "Compilation", "Peephole optimizations").

use std::sync::Arc;

use crate::error::ParseError;
use crate::filter::funcs::{Environment, HAS_INDEX, KEY_INDEX};
use crate::filter::inst::Inst;
use crate::filter::token::{tokenize, unescape, Token, TokenKind};
use crate::value::Value;

pub const MAX_QUERY_LEN: usize = 8192;

/// An immutable, compiled filter program (spec §3, "Filter").
pub struct Filter {
    source: Arc<str>,
    consts: Vec<Value>,
    strings: Vec<Arc<str>>,
    code: Vec<Inst>,
    env: Arc<Environment>,
}

impl Filter {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn code(&self) -> &[Inst] {
        &self.code
    }

    pub fn consts(&self) -> &[Value] {
        &self.consts
    }

    pub fn strings(&self) -> &[Arc<str>] {
        &self.strings
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }
}

/// Parses and compiles `source` against `env`, already past-peephole-optimized.
pub fn compile(source: &str, env: Arc<Environment>) -> Result<Filter, ParseError> {
    let tokens = tokenize(source, MAX_QUERY_LEN)?;
    let mut compiler = Compiler {
        source,
        tokens: &tokens,
        pos: 0,
        code: Vec::new(),
        consts: Vec::new(),
        strings: Vec::new(),
        env: &env,
    };
    if !tokens.is_empty() {
        compiler.compile_compound()?;
        if compiler.pos != tokens.len() {
            let off = tokens[compiler.pos].start;
            return Err(ParseError::UnexpectedToken(off));
        }
    }
    if compiler.code.len() == 1 && matches!(compiler.code[0], Inst::PushVal(_) | Inst::PushStr(_)) {
        return Err(ParseError::NotBoolean);
    }
    let mut code = compiler.code;
    optimize(&mut code);
    Ok(Filter {
        source: Arc::from(source),
        consts: compiler.consts,
        strings: compiler.strings,
        code,
        env,
    })
}

struct Compiler<'a> {
    source: &'a str,
    tokens: &'a [Token],
    pos: usize,
    code: Vec<Inst>,
    consts: Vec<Value>,
    strings: Vec<Arc<str>>,
    env: &'a Environment,
}

impl<'a> Compiler<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).copied();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn intern_string(&mut self, s: String) -> u32 {
        let arc: Arc<str> = Arc::from(s);
        if let Some(idx) = self.strings.iter().position(|existing| *existing == arc) {
            return idx as u32;
        }
        self.strings.push(arc);
        (self.strings.len() - 1) as u32
    }

    fn push_const(&mut self, v: Value) -> u32 {
        self.consts.push(v);
        (self.consts.len() - 1) as u32
    }

    fn compile_compound(&mut self) -> Result<(), ParseError> {
        self.compile_expr()?;
        loop {
            let op_kind = match self.peek().map(|t| t.kind) {
                Some(TokenKind::And) => Inst::JumpFalse(0),
                Some(TokenKind::Or) => Inst::JumpTrue(0),
                _ => break,
            };
            self.bump();
            let placeholder = self.code.len();
            self.code.push(op_kind);
            self.compile_expr()?;
            let rel = (self.code.len() - (placeholder + 1)) as i32;
            self.code[placeholder] = match op_kind {
                Inst::JumpFalse(_) => Inst::JumpFalse(rel),
                Inst::JumpTrue(_) => Inst::JumpTrue(rel),
                _ => unreachable!(),
            };
            self.code.push(match op_kind {
                Inst::JumpFalse(_) => Inst::And,
                Inst::JumpTrue(_) => Inst::Or,
                _ => unreachable!(),
            });
        }
        Ok(())
    }

    fn compile_expr(&mut self) -> Result<(), ParseError> {
        let tok = match self.peek() {
            Some(t) => *t,
            None => return Err(ParseError::UnexpectedToken(self.source.len())),
        };
        match tok.kind {
            TokenKind::LParen => {
                self.bump();
                self.compile_compound()?;
                match self.bump() {
                    Some(t) if t.kind == TokenKind::RParen => Ok(()),
                    Some(t) => Err(ParseError::ExpectedCloseParen(t.start)),
                    None => Err(ParseError::ExpectedCloseParen(self.source.len())),
                }
            }
            TokenKind::Literal => {
                self.bump();
                let raw = tok.text(self.source);
                let text = if tok.quoted { unescape(raw) } else { raw.to_string() };
                if matches!(self.peek().map(|t| t.kind), Some(TokenKind::LParen)) {
                    self.compile_call(&text)
                } else {
                    self.compile_literal(text);
                    Ok(())
                }
            }
            _ => Err(ParseError::UnexpectedToken(tok.start)),
        }
    }

    fn compile_call(&mut self, name: &str) -> Result<(), ParseError> {
        self.bump(); // '('
        let mut argc = 0usize;
        if !matches!(self.peek().map(|t| t.kind), Some(TokenKind::RParen)) {
            loop {
                self.compile_expr()?;
                argc += 1;
                match self.peek().map(|t| t.kind) {
                    Some(TokenKind::Comma) => {
                        self.bump();
                    }
                    _ => break,
                }
            }
        }
        match self.bump() {
            Some(t) if t.kind == TokenKind::RParen => {}
            Some(t) => return Err(ParseError::ExpectedCloseParen(t.start)),
            None => return Err(ParseError::ExpectedCloseParen(self.source.len())),
        }
        let idx = self
            .env
            .lookup(name)
            .ok_or_else(|| ParseError::UnknownFunction(name.to_string()))?;
        let _ = argc;
        self.code.push(Inst::Call(idx));
        Ok(())
    }

    fn compile_literal(&mut self, text: String) {
        if let Ok(v) = text.parse::<i64>() {
            let idx = self.push_const(Value::int(v));
            self.code.push(Inst::PushVal(idx));
            return;
        }
        if let Ok(v) = text.parse::<u64>() {
            let idx = self.push_const(Value::uint(v));
            self.code.push(Inst::PushVal(idx));
            return;
        }
        if let Some(d) = parse_duration(&text) {
            let idx = self.push_const(Value::duration(d));
            self.code.push(Inst::PushVal(idx));
            return;
        }
        if let Ok(v) = text.parse::<f64>() {
            let idx = self.push_const(Value::float(v));
            self.code.push(Inst::PushVal(idx));
            return;
        }
        let idx = self.intern_string(text);
        self.code.push(Inst::PushStr(idx));
    }
}

/// Parses a Go-style duration literal (`"1m"`, `"500ms"`, `"1h30m"`) into nanoseconds.
pub fn parse_duration(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    let (sign, rest) = match s.strip_prefix('-') {
        Some(r) => (-1i64, r),
        None => (1i64, s.strip_prefix('+').unwrap_or(s)),
    };
    if rest.is_empty() {
        return None;
    }
    let mut total: f64 = 0.0;
    let mut chars = rest.char_indices().peekable();
    let mut any = false;
    while let Some(&(start, c)) = chars.peek() {
        if !c.is_ascii_digit() && c != '.' {
            return None;
        }
        let mut end = start;
        while let Some(&(i, c2)) = chars.peek() {
            if c2.is_ascii_digit() || c2 == '.' {
                end = i + c2.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let number: f64 = rest[start..end].parse().ok()?;
        let unit_start = end;
        let mut unit_end = unit_start;
        for (i, c2) in rest[unit_start..].char_indices() {
            if c2.is_ascii_digit() || c2 == '.' {
                break;
            }
            unit_end = unit_start + i + c2.len_utf8();
        }
        if unit_end == unit_start {
            return None;
        }
        let unit = &rest[unit_start..unit_end];
        let ns_per_unit: f64 = match unit {
            "ns" => 1.0,
            "us" | "\u{b5}s" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 3_600.0 * 1_000_000_000.0,
            _ => return None,
        };
        total += number * ns_per_unit;
        any = true;
        for _ in 0..unit.chars().count() {
            chars.next();
        }
    }
    if !any {
        return None;
    }
    Some(sign * total as i64)
}

/// Runs the peephole passes described in spec §4.3 in order: literal fast-paths, jump
/// retargeting, then Nop removal (which must run last since it's the only pass that
/// changes instruction positions).
fn optimize(code: &mut Vec<Inst>) {
    fuse_key_has(code);
    retarget_chained_jumps(code);
    remove_nops(code);
}

fn fuse_key_has(code: &mut [Inst]) {
    let mut i = 0;
    while i + 1 < code.len() {
        if let Inst::PushStr(s) = code[i] {
            match code[i + 1] {
                Inst::Call(idx) if idx == KEY_INDEX => {
                    code[i] = Inst::Key(s);
                    code[i + 1] = Inst::Nop;
                }
                Inst::Call(idx) if idx == HAS_INDEX => {
                    code[i] = Inst::Has(s);
                    code[i + 1] = Inst::Nop;
                }
                _ => {}
            }
        }
        i += 1;
    }
}

fn jump_target(code: &[Inst], i: usize) -> Option<usize> {
    match code[i] {
        Inst::JumpFalse(rel) | Inst::JumpTrue(rel) => Some((i as i64 + 1 + rel as i64) as usize),
        _ => None,
    }
}

fn is_same_jump_kind(a: Inst, b: Inst) -> bool {
    matches!(
        (a, b),
        (Inst::JumpFalse(_), Inst::JumpFalse(_)) | (Inst::JumpTrue(_), Inst::JumpTrue(_))
    )
}

fn retarget_chained_jumps(code: &mut [Inst]) {
    for i in (0..code.len()).rev() {
        if let Some(target) = jump_target(code, i) {
            if target < code.len() && is_same_jump_kind(code[i], code[target]) {
                if let Some(final_target) = jump_target(code, target) {
                    let new_rel = (final_target as i64 - (i as i64 + 1)) as i32;
                    code[i] = match code[i] {
                        Inst::JumpFalse(_) => Inst::JumpFalse(new_rel),
                        Inst::JumpTrue(_) => Inst::JumpTrue(new_rel),
                        other => other,
                    };
                }
            }
        }
    }
}

fn remove_nops(code: &mut Vec<Inst>) {
    let n = code.len();
    let mut removed_before = vec![0usize; n + 1];
    for i in 0..n {
        removed_before[i + 1] = removed_before[i] + usize::from(code[i] == Inst::Nop);
    }
    for i in 0..n {
        if let Some(target) = jump_target(code, i) {
            let new_i = i - removed_before[i];
            let new_target = target - removed_before[target.min(n)];
            let new_rel = (new_target as i64 - (new_i as i64 + 1)) as i32;
            code[i] = match code[i] {
                Inst::JumpFalse(_) => Inst::JumpFalse(new_rel),
                Inst::JumpTrue(_) => Inst::JumpTrue(new_rel),
                other => other,
            };
        }
    }
    code.retain(|inst| *inst != Inst::Nop);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_compiles_to_empty_program() {
        let env = Arc::new(Environment::new());
        let f = compile("", env).unwrap();
        assert!(f.code().is_empty());
    }

    #[test]
    fn bare_literal_is_not_boolean() {
        let env = Arc::new(Environment::new());
        assert!(matches!(compile("42", env), Err(ParseError::NotBoolean)));
    }

    #[test]
    fn key_has_fuse_into_intrinsics() {
        let env = Arc::new(Environment::new());
        let f = compile("has(foo)", env).unwrap();
        assert!(matches!(f.code(), [Inst::Has(_)]));
    }

    #[test]
    fn unknown_function_is_rejected() {
        let env = Arc::new(Environment::new());
        assert!(matches!(
            compile("nope(1)", env),
            Err(ParseError::UnknownFunction(_))
        ));
    }

    #[test]
    fn unterminated_group_is_rejected() {
        let env = Arc::new(Environment::new());
        assert!(matches!(
            compile("(true()", env),
            Err(ParseError::ExpectedCloseParen(_))
        ));
    }

    #[test]
    fn duration_literal_parses() {
        assert_eq!(parse_duration("1m"), Some(60_000_000_000));
        assert_eq!(parse_duration("500ms"), Some(500_000_000));
        assert_eq!(parse_duration("1h30m"), Some(5_400_000_000_000));
        assert_eq!(parse_duration("bogus"), None);
    }

    #[test]
    fn and_compiles_with_jump_and_and_op() {
        let env = Arc::new(Environment::new());
        let f = compile("true() && false()", env).unwrap();
        assert!(f.code().iter().any(|i| matches!(i, Inst::JumpFalse(_))));
        assert!(f.code().iter().any(|i| matches!(i, Inst::And)));
    }
}
