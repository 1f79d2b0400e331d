//! Lenient literal parser for attribute values that look like JSON but are not.
//!
//! Dashboard widgets frequently store structures with single-quoted strings,
//! `True`/`False`/`None`, tuples and trailing commas. This accepts that subset
//! and produces a `serde_json::Value`. Anything else is rejected.

use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};

const MAX_DEPTH: usize = 64;

pub(crate) fn parse_literal(src: &str) -> Result<Value> {
    let mut parser = LiteralParser {
        chars: src.chars().collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(value)
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl LiteralParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: char) -> Result<()> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            _ => Err(self.error(&format!("expected '{}'", want))),
        }
    }

    fn error(&self, msg: &str) -> Error {
        Error::Parse(format!("literal: {} at offset {}", msg, self.pos))
    }

    fn value(&mut self) -> Result<Value> {
        self.skip_ws();
        match self.peek() {
            Some('{') => self.nested(|p| p.mapping()),
            Some('[') => self.nested(|p| p.sequence('[', ']').map(|(items, _)| Value::Array(items))),
            Some('(') => self.nested(|p| p.tuple()),
            Some('\'') | Some('"') => self.string().map(Value::String),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.keyword(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self) -> Result<Value>) -> Result<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    /// Comma separated items between `open` and `close`. Returns the items and
    /// whether a trailing comma was present.
    fn sequence(&mut self, open: char, close: char) -> Result<(Vec<Value>, bool)> {
        self.expect(open)?;
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok((items, trailing_comma));
            }
            items.push(self.value()?);
            trailing_comma = false;
            self.skip_ws();
            match self.bump() {
                Some(',') => trailing_comma = true,
                Some(c) if c == close => return Ok((items, false)),
                _ => return Err(self.error("expected ',' or closing bracket")),
            }
        }
    }

    fn tuple(&mut self) -> Result<Value> {
        let (mut items, trailing_comma) = self.sequence('(', ')')?;
        // `(x)` is a parenthesized expression, `(x,)` is a one-tuple.
        if items.len() == 1 && !trailing_comma {
            return Ok(items.remove(0));
        }
        Ok(Value::Array(items))
    }

    fn mapping(&mut self) -> Result<Value> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }
            let key = match self.value()? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => (if b { "True" } else { "False" }).to_string(),
                Value::Null => "None".to_string(),
                _ => return Err(self.error("unhashable mapping key")),
            };
            self.expect(':')?;
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.bump() {
                Some(',') => {}
                Some('}') => return Ok(Value::Object(map)),
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn string(&mut self) -> Result<String> {
        let quote = self.bump().ok_or_else(|| self.error("expected string"))?;
        let mut out = String::new();
        loop {
            let c = self.bump().ok_or_else(|| self.error("unterminated string"))?;
            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let esc = self.bump().ok_or_else(|| self.error("unterminated escape"))?;
            match esc {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\\' | '\'' | '"' => out.push(esc),
                'x' => out.push(self.hex_escape(2)?),
                'u' => out.push(self.hex_escape(4)?),
                '\n' => {}
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    fn hex_escape(&mut self, len: usize) -> Result<char> {
        let end = self.pos + len;
        if end > self.chars.len() {
            return Err(self.error("truncated escape"));
        }
        let digits: String = self.chars[self.pos..end].iter().collect();
        self.pos = end;
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("invalid escape"))
    }

    fn number(&mut self) -> Result<Value> {
        let start = self.pos;
        let mut negative = false;
        while let Some(sign) = self.peek().filter(|c| *c == '-' || *c == '+') {
            if sign == '-' {
                negative = !negative;
            }
            self.pos += 1;
            self.skip_ws();
        }
        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => text.push(c),
                '_' => {}
                '.' => {
                    is_float = true;
                    text.push(c);
                }
                'e' | 'E' => {
                    is_float = true;
                    text.push(c);
                    if let Some(sign) = self.chars.get(self.pos + 1).filter(|s| **s == '-' || **s == '+') {
                        text.push(*sign);
                        self.pos += 1;
                    }
                }
                _ => break,
            }
            self.pos += 1;
        }
        if text.is_empty() || text == "." {
            self.pos = start;
            return Err(self.error("invalid number"));
        }
        if !is_float {
            if let Ok(n) = text.parse::<i64>() {
                return Ok(Value::from(if negative { -n } else { n }));
            }
        }
        let f: f64 = text.parse().map_err(|_| self.error("invalid number"))?;
        let f = if negative { -f } else { f };
        Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| self.error("non-finite number"))
    }

    fn keyword(&mut self) -> Result<Value> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            _ => {
                self.pos = start;
                Err(self.error("unknown identifier"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_single_quoted_mapping() {
        let v = parse_literal("{'points': [10, 20, 30.5, 40, -5, 6], 'enabled': True}").unwrap();
        assert_eq!(v, json!({"points": [10, 20, 30.5, 40, -5, 6], "enabled": true}));
    }

    #[test]
    fn parses_tuples_and_trailing_commas() {
        let v = parse_literal("[(1, 2), (3, 4), (5, 6),]").unwrap();
        assert_eq!(v, json!([[1, 2], [3, 4], [5, 6]]));
        assert_eq!(parse_literal("(7)").unwrap(), json!(7));
        assert_eq!(parse_literal("(7,)").unwrap(), json!([7]));
    }

    #[test]
    fn parses_none_and_escapes() {
        let v = parse_literal(r#"{'a': None, "b": 'it\'s'}"#).unwrap();
        assert_eq!(v, json!({"a": null, "b": "it's"}));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_literal("not a literal").is_err());
        assert!(parse_literal("[1, 2").is_err());
        assert!(parse_literal("{'a' 1}").is_err());
        assert!(parse_literal("[1] extra").is_err());
    }
}
