/// Evaluation of stored expression results
///
/// Only literal arithmetic is accepted:
///
/// ```text
/// expr    := term (('+' | '-') term)*
/// term    := unary (('*' | '/') unary)*
/// unary   := '-' unary | atom
/// atom    := INT | FLOAT | STRING | True | False | None | '[' (expr (',' expr)*)? ']' | '(' expr ')'
/// ```
///
/// Names, calls, attribute access and indexing are rejected. `/` always
/// produces a float.
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Op(char),
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '_') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                i += 1;
                if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().filter(|&&c| c != '_').collect();
            let token = match text.parse::<i64>() {
                Ok(n) => Token::Int(n),
                Err(_) => Token::Float(
                    text.parse()
                        .map_err(|_| Error::Expression(format!("invalid number '{}'", text)))?,
                ),
            };
            tokens.push(token);
        } else if c == '\'' || c == '"' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            loop {
                let Some(&c) = chars.get(i) else {
                    return Err(Error::Expression("unterminated string".into()));
                };
                i += 1;
                match c {
                    '\\' => {
                        let escaped = chars
                            .get(i)
                            .ok_or_else(|| Error::Expression("unterminated string".into()))?;
                        i += 1;
                        s.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => *other,
                        });
                    }
                    c if c == quote => break,
                    c => s.push(c),
                }
            }
            tokens.push(Token::Str(s));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if "+-*/()[],".contains(c) {
            tokens.push(Token::Op(c));
            i += 1;
        } else {
            return Err(Error::Expression(format!("unexpected character '{}'", c)));
        }
    }

    Ok(tokens)
}

/// Deepest nesting of parentheses, lists and unary minus
const MAX_DEPTH: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, op: char) -> bool {
        if self.peek() == Some(&Token::Op(op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: char) -> Result<()> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(Error::Expression(format!("expected '{}'", op)))
        }
    }

    fn expr(&mut self) -> Result<Value> {
        let mut left = self.term()?;
        loop {
            if self.eat('+') {
                left = add(left, self.term()?)?;
            } else if self.eat('-') {
                left = arith(left, self.term()?, '-')?;
            } else {
                return Ok(left);
            }
        }
    }

    fn term(&mut self) -> Result<Value> {
        let mut left = self.unary()?;
        loop {
            if self.eat('*') {
                left = arith(left, self.unary()?, '*')?;
            } else if self.eat('/') {
                left = arith(left, self.unary()?, '/')?;
            } else {
                return Ok(left);
            }
        }
    }

    // every nested construct passes through here
    fn unary(&mut self) -> Result<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::Expression(format!(
                "expression nested deeper than {} levels",
                MAX_DEPTH
            )));
        }
        self.depth += 1;
        let value = if self.eat('-') {
            self.unary().and_then(|v| arith(Value::from(0), v, '-'))
        } else {
            self.atom()
        };
        self.depth -= 1;
        value
    }

    fn atom(&mut self) -> Result<Value> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| Error::Expression("unexpected end of expression".into()))?;
        self.pos += 1;

        match token {
            Token::Int(n) => Ok(Value::from(n)),
            Token::Float(f) => Ok(Value::from(f)),
            Token::Str(s) => Ok(Value::String(s)),
            Token::Ident(name) => match name.as_str() {
                "True" | "true" => Ok(Value::Bool(true)),
                "False" | "false" => Ok(Value::Bool(false)),
                "None" | "null" => Ok(Value::Null),
                other => Err(Error::Expression(format!("names are not allowed: '{}'", other))),
            },
            Token::Op('(') => {
                let value = self.expr()?;
                self.expect(')')?;
                Ok(value)
            }
            Token::Op('[') => {
                let mut items = Vec::new();
                if !self.eat(']') {
                    loop {
                        items.push(self.expr()?);
                        if self.eat(']') {
                            break;
                        }
                        self.expect(',')?;
                        // trailing comma
                        if self.eat(']') {
                            break;
                        }
                    }
                }
                Ok(Value::Array(items))
            }
            Token::Op(op) => Err(Error::Expression(format!("unexpected '{}'", op))),
        }
    }
}

enum Num {
    Int(i64),
    Float(f64),
}

fn num(value: &Value) -> Option<Num> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Num::Int)
            .or_else(|| n.as_f64().map(Num::Float)),
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        _ => None,
    }
}

fn float_value(f: f64) -> Result<Value> {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| Error::Expression(format!("result {} is not a finite number", f)))
}

fn add(left: Value, right: Value) -> Result<Value> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (a, b) => arith(a, b, '+'),
    }
}

fn arith(left: Value, right: Value, op: char) -> Result<Value> {
    let (Some(a), Some(b)) = (num(&left), num(&right)) else {
        return Err(Error::Expression(format!(
            "unsupported operands for '{}': {} and {}",
            op, left, right
        )));
    };

    if op == '/' {
        let (a, b) = (to_f64(a), to_f64(b));
        if b == 0.0 {
            return Err(Error::Expression("division by zero".into()));
        }
        return float_value(a / b);
    }

    match (a, b) {
        (Num::Int(a), Num::Int(b)) => {
            let result = match op {
                '+' => a.checked_add(b),
                '-' => a.checked_sub(b),
                _ => a.checked_mul(b),
            };
            result
                .map(Value::from)
                .ok_or_else(|| Error::Expression("integer overflow".into()))
        }
        (a, b) => {
            let (a, b) = (to_f64(a), to_f64(b));
            float_value(match op {
                '+' => a + b,
                '-' => a - b,
                _ => a * b,
            })
        }
    }
}

fn to_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

/// Evaluate a literal expression
pub fn evaluate(src: &str) -> Result<Value> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::Expression(format!("trailing input in '{}'", src)));
    }
    Ok(value)
}
