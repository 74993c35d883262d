//! Reader and writer for the textual database format.
//!
//! A database file is a whitespace-separated sequence of s-expression
//! values. Atoms are integers (decimal, `0xHEX`, or `?c` character
//! literals), symbols (backslash escapes any delimiter), and `"…"`
//! texts with the usual escapes. `;` starts a comment running to the
//! end of the line. The same grammar is written back by [`write_value`],
//! which the input-method configuration saver relies on.

use crate::error::{Error, Result};
use crate::symbol::Symbol;
use std::fmt::Write as _;

/// One parsed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Symbol(Symbol),
    Int(i64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Value::Symbol(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// True for the symbol `nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Symbol(s) if s.is_nil())
    }
}

struct Reader<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Reader {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn err(&self, msg: &str) -> Error {
        Error::Plist {
            line: self.line,
            col: self.col,
            msg: msg.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn skip_space(&mut self) {
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.bump();
                }
                b';' => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_value(&mut self) -> Result<Value> {
        self.skip_space();
        match self.peek() {
            None => Err(self.err("unexpected end of input")),
            Some(b'(') => self.read_list(),
            Some(b'"') => self.read_text(),
            Some(b'?') => self.read_char_literal(),
            Some(b) if b.is_ascii_digit() => self.read_number(false),
            Some(b'-') | Some(b'+') => {
                // A sign starts a number only when a digit follows.
                if self
                    .src
                    .get(self.pos + 1)
                    .map(|c| c.is_ascii_digit())
                    .unwrap_or(false)
                {
                    self.read_number(true)
                } else {
                    self.read_symbol()
                }
            }
            Some(b')') => Err(self.err("unbalanced ')'")),
            Some(_) => self.read_symbol(),
        }
    }

    fn read_list(&mut self) -> Result<Value> {
        self.bump(); // consume '('
        let mut items = Vec::new();
        loop {
            self.skip_space();
            match self.peek() {
                None => return Err(self.err("unterminated list")),
                Some(b')') => {
                    self.bump();
                    return Ok(Value::List(items));
                }
                Some(_) => items.push(self.read_value()?),
            }
        }
    }

    fn read_text(&mut self) -> Result<Value> {
        self.bump(); // consume '"'
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string")),
                Some(b'"') => return Ok(Value::Text(out)),
                Some(b'\\') => {
                    let esc = self.bump().ok_or_else(|| self.err("dangling escape"))?;
                    match esc {
                        b'n' => out.push('\n'),
                        b't' => out.push('\t'),
                        b'r' => out.push('\r'),
                        b'e' => out.push('\x1b'),
                        b'0' => out.push('\0'),
                        b'x' | b'u' => {
                            let mut code: u32 = 0;
                            let mut ndigits = 0;
                            while let Some(c) = self.peek() {
                                if let Some(d) = (c as char).to_digit(16) {
                                    code = code * 16 + d;
                                    ndigits += 1;
                                    self.bump();
                                    if ndigits == if esc == b'x' { 2 } else { 6 } {
                                        break;
                                    }
                                } else {
                                    break;
                                }
                            }
                            if ndigits == 0 {
                                return Err(self.err("empty hex escape"));
                            }
                            let ch = char::from_u32(code)
                                .ok_or_else(|| self.err("hex escape is not a character"))?;
                            out.push(ch);
                        }
                        other => out.push(other as char),
                    }
                }
                Some(b) => {
                    // Re-assemble UTF-8 sequences byte-wise.
                    if b < 0x80 {
                        out.push(b as char);
                    } else {
                        let start = self.pos - 1;
                        let need = utf8_len(b);
                        for _ in 1..need {
                            self.bump();
                        }
                        let chunk = &self.src[start..self.pos];
                        let s = std::str::from_utf8(chunk)
                            .map_err(|_| self.err("invalid UTF-8 in string"))?;
                        out.push_str(s);
                    }
                }
            }
        }
    }

    fn read_char_literal(&mut self) -> Result<Value> {
        self.bump(); // consume '?'
        let b = self.bump().ok_or_else(|| self.err("dangling '?'"))?;
        let code = if b < 0x80 {
            b as u32
        } else {
            let start = self.pos - 1;
            let need = utf8_len(b);
            for _ in 1..need {
                self.bump();
            }
            let chunk = &self.src[start..self.pos];
            let s =
                std::str::from_utf8(chunk).map_err(|_| self.err("invalid UTF-8 after '?'"))?;
            s.chars().next().unwrap_or('\u{FFFD}') as u32
        };
        Ok(Value::Int(code as i64))
    }

    fn read_number(&mut self, signed: bool) -> Result<Value> {
        let mut neg = false;
        if signed {
            let sign = self.bump().unwrap_or(b'+');
            neg = sign == b'-';
        }
        let mut tok = String::new();
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() {
                tok.push(b as char);
                self.bump();
            } else {
                break;
            }
        }
        let value = if let Some(hex) = tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).map_err(|_| self.err("bad hexadecimal integer"))?
        } else {
            tok.parse::<i64>().map_err(|_| self.err("bad integer"))?
        };
        Ok(Value::Int(if neg { -value } else { value }))
    }

    fn read_symbol(&mut self) -> Result<Value> {
        let mut name = String::new();
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\r' | b'\n' | b'(' | b')' | b'"' | b';' => break,
                b'\\' => {
                    self.bump();
                    let esc = self
                        .bump()
                        .ok_or_else(|| self.err("dangling escape in symbol"))?;
                    name.push(esc as char);
                }
                _ => {
                    if b < 0x80 {
                        name.push(b as char);
                        self.bump();
                    } else {
                        let start = self.pos;
                        let need = utf8_len(b);
                        for _ in 0..need {
                            self.bump();
                        }
                        let chunk = &self.src[start..self.pos];
                        let s = std::str::from_utf8(chunk)
                            .map_err(|_| self.err("invalid UTF-8 in symbol"))?;
                        name.push_str(s);
                    }
                }
            }
        }
        if name.is_empty() {
            return Err(self.err("empty symbol"));
        }
        Ok(Value::Symbol(Symbol::intern(&name)))
    }
}

fn utf8_len(lead: u8) -> usize {
    match lead {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}

/// Parse every top-level value in `src`.
pub fn parse_all(src: &str) -> Result<Vec<Value>> {
    let mut rd = Reader::new(src);
    let mut out = Vec::new();
    loop {
        rd.skip_space();
        if rd.peek().is_none() {
            return Ok(out);
        }
        out.push(rd.read_value()?);
    }
}

/// Parse a single value; trailing content is an error.
pub fn parse_one(src: &str) -> Result<Value> {
    let mut rd = Reader::new(src);
    let v = rd.read_value()?;
    rd.skip_space();
    if rd.peek().is_some() {
        return Err(rd.err("trailing content after value"));
    }
    Ok(v)
}

/// Append the textual form of `value` to `out`.
pub fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Int(i) => {
            let _ = write!(out, "{}", i);
        }
        Value::Symbol(s) => {
            let name = s.name();
            for ch in name.chars() {
                if matches!(ch, ' ' | '\t' | '\n' | '(' | ')' | '"' | ';' | '\\') {
                    out.push('\\');
                }
                out.push(ch);
            }
        }
        Value::Text(t) => {
            out.push('"');
            for ch in t.chars() {
                match ch {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    _ => out.push(ch),
                }
            }
            out.push('"');
        }
        Value::List(items) => {
            out.push('(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_value(out, item);
            }
            out.push(')');
        }
    }
}

/// The textual form of `value`.
pub fn to_string(value: &Value) -> String {
    let mut s = String::new();
    write_value(&mut s, value);
    s
}
