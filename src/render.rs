/// Template rendering for definition files
///
/// The template document of a definition is YAML with `{{ ... }}`
/// placeholders. A placeholder is a dotted path whose segments may carry call
/// arguments:
///
/// ```text
/// {{ post.content }}
/// {{ post.parent.humor.value }}
/// {{ post.humor(temperature=0.0).mean }}
/// {{ compare(post0, post1) }}
/// {{ posts.1.content }}
/// ```
///
/// Names are looked up through a [`Scope`]; each segment name is first
/// replaced through the definition's alias table. An undefined name is a
/// configuration error. A value spanning several lines is indented to the
/// column of the line holding the placeholder, so block scalars stay valid.
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::edit::{format_timestamp, Edit};
use crate::error::{Error, Result};
use crate::output::Response;
use crate::quest::args::Args;

/// A value produced while evaluating a placeholder
#[derive(Debug, Clone)]
pub enum Resolved {
    Edit(Arc<Edit>),
    Edits(Vec<Arc<Edit>>),
    Response(Arc<Response>),
    Json(Value),
    /// A cached-only lookup found nothing
    Missing,
}

impl Resolved {
    /// Text inserted into the rendered document
    pub fn render(&self) -> Result<String> {
        match self {
            Resolved::Edit(edit) => edit.content(),
            Resolved::Edits(edits) => Ok(edits
                .iter()
                .map(|e| e.content())
                .collect::<Result<Vec<_>>>()?
                .join("\n\n")),
            Resolved::Response(response) => Ok(response.output.to_string()),
            Resolved::Json(Value::String(s)) => Ok(s.clone()),
            Resolved::Json(other) => Ok(other.to_string()),
            Resolved::Missing => Ok("None".to_string()),
        }
    }

    /// Value passed as a keyword argument
    pub fn to_json(&self) -> Result<Value> {
        match self {
            Resolved::Json(v) => Ok(v.clone()),
            Resolved::Response(r) => r.value(),
            Resolved::Missing => Ok(Value::Null),
            other => Ok(Value::String(other.render()?)),
        }
    }
}

/// Names visible to a template
pub trait Scope {
    /// Value of a root name: an argument, `post`, `post<i>` or `posts`
    fn root(&self, name: &str) -> Option<Resolved>;

    /// Whether `name` resolves to a quest
    fn is_quest(&self, name: &str) -> bool;

    /// Invoke a quest on edits with caller overrides
    fn invoke(&self, quest: &str, edits: Vec<Arc<Edit>>, overrides: Args) -> Result<Resolved>;
}

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Literal(Value),
    Path(Vec<Segment>),
}

#[derive(Debug, Clone, PartialEq)]
struct Call {
    positional: Vec<Arg>,
    keywords: Vec<(String, Arg)>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Name { name: String, call: Option<Call> },
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Placeholder(Vec<Segment>),
}

#[derive(Debug, Clone, PartialEq)]
struct Line {
    indent: usize,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    lines: Vec<Line>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let lines = source
            .lines()
            .enumerate()
            .map(|(number, line)| {
                parse_line(line).map_err(|e| Error::config(format!("line {}: {}", number + 1, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { lines })
    }

    /// Render against a scope, substituting aliased names
    pub fn render(&self, scope: &dyn Scope, alias: &HashMap<String, String>) -> Result<String> {
        let renderer = Renderer { scope, alias };
        let mut out = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            let mut rendered = String::new();
            for part in &line.parts {
                match part {
                    Part::Text(text) => rendered.push_str(text),
                    Part::Placeholder(path) => {
                        let text = renderer.eval(path)?.render()?;
                        rendered.push_str(&indent(&text, line.indent));
                    }
                }
            }
            out.push(rendered);
        }
        Ok(out.join("\n"))
    }

    /// Whether the template contains any placeholder
    pub fn is_static(&self) -> bool {
        self.lines
            .iter()
            .all(|l| l.parts.iter().all(|p| matches!(p, Part::Text(_))))
    }
}

/// Indent every line after the first by `width` spaces
fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    let mut lines = text.split('\n');
    let mut out = lines.next().unwrap_or_default().to_string();
    for line in lines {
        out.push('\n');
        if !line.is_empty() {
            out.push_str(&pad);
        }
        out.push_str(line);
    }
    out
}

struct Renderer<'a> {
    scope: &'a dyn Scope,
    alias: &'a HashMap<String, String>,
}

impl Renderer<'_> {
    fn name<'n>(&'n self, name: &'n str) -> &'n str {
        self.alias.get(name).map(String::as_str).unwrap_or(name)
    }

    fn eval(&self, path: &[Segment]) -> Result<Resolved> {
        let (first, rest) = path
            .split_first()
            .ok_or_else(|| Error::config("empty placeholder"))?;

        let mut current = match first {
            Segment::Index(i) => return Err(Error::config(format!("placeholder cannot start with {}", i))),
            Segment::Name { name, call: None } => {
                let name = self.name(name);
                self.scope
                    .root(name)
                    .ok_or_else(|| Error::config(format!("'{}' is undefined", name)))?
            }
            Segment::Name { name, call: Some(call) } => {
                let name = self.name(name);
                if !self.scope.is_quest(name) {
                    return Err(Error::config(format!("'{}' is not a quest", name)));
                }
                self.call(name, Vec::new(), call)?
            }
        };

        for segment in rest {
            current = self.attribute(current, segment)?;
        }
        Ok(current)
    }

    fn call(&self, quest: &str, mut edits: Vec<Arc<Edit>>, call: &Call) -> Result<Resolved> {
        for arg in &call.positional {
            match self.arg(arg)? {
                Resolved::Edit(edit) => edits.push(edit),
                Resolved::Edits(more) => edits.extend(more),
                other => {
                    return Err(Error::config(format!(
                        "positional arguments of '{}' must be posts, got {:?}",
                        quest, other
                    )))
                }
            }
        }

        let mut overrides = Args::new();
        for (key, arg) in &call.keywords {
            overrides.insert(key.clone(), self.arg(arg)?.to_json()?);
        }

        self.scope.invoke(quest, edits, overrides)
    }

    fn arg(&self, arg: &Arg) -> Result<Resolved> {
        match arg {
            Arg::Literal(value) => Ok(Resolved::Json(value.clone())),
            Arg::Path(path) => self.eval(path),
        }
    }

    fn attribute(&self, current: Resolved, segment: &Segment) -> Result<Resolved> {
        let (name, call) = match segment {
            Segment::Index(i) => return index(current, *i),
            Segment::Name { name, call } => (self.name(name), call.as_ref()),
        };

        match current {
            Resolved::Edit(edit) => {
                if self.scope.is_quest(name) {
                    let empty = Call {
                        positional: Vec::new(),
                        keywords: Vec::new(),
                    };
                    return self.call(name, vec![edit], call.unwrap_or(&empty));
                }
                if call.is_some() {
                    return Err(Error::config(format!("'{}' is not a quest", name)));
                }
                edit_attribute(&edit, name)
            }
            Resolved::Edits(edits) => {
                // attribute of every post, joined
                let parts = edits
                    .into_iter()
                    .map(|e| self.attribute(Resolved::Edit(e), segment)?.render())
                    .collect::<Result<Vec<_>>>()?;
                Ok(Resolved::Json(Value::String(parts.join("\n\n"))))
            }
            Resolved::Response(response) => response_attribute(&response, name),
            Resolved::Json(value) => json_field(&value, name),
            Resolved::Missing => Ok(Resolved::Missing),
        }
    }
}

fn edit_attribute(edit: &Arc<Edit>, name: &str) -> Result<Resolved> {
    match name {
        "content" => Ok(Resolved::Json(Value::String(edit.content()?))),
        "id" => Ok(Resolved::Json(Value::String(edit.id().to_string()))),
        "timestamp" => Ok(Resolved::Json(Value::String(format_timestamp(&edit.timestamp())))),
        "parent" => Ok(edit
            .parent()?
            .map(Resolved::Edit)
            .unwrap_or(Resolved::Json(Value::Null))),
        "ancestors" => Ok(Resolved::Edits(edit.ancestors()?)),
        other => edit
            .field(other)?
            .map(Resolved::Json)
            .ok_or_else(|| Error::config(format!("post has no attribute '{}'", other))),
    }
}

fn response_attribute(response: &Response, name: &str) -> Result<Resolved> {
    match name {
        "value" => Ok(Resolved::Json(response.value()?)),
        "text" => Ok(Resolved::Json(Value::String(response.output.text()))),
        "mean" => response
            .output
            .mean()
            .and_then(serde_json::Number::from_f64)
            .map(|n| Resolved::Json(Value::Number(n)))
            .ok_or_else(|| Error::config("mean is only defined for numeric annotations")),
        "timestamp" => Ok(Resolved::Json(Value::String(format_timestamp(&response.timestamp)))),
        other => json_field(&response.value()?, other),
    }
}

fn json_field(value: &Value, name: &str) -> Result<Resolved> {
    value
        .get(name)
        .cloned()
        .map(Resolved::Json)
        .ok_or_else(|| Error::config(format!("'{}' is undefined on {}", name, value)))
}

fn index(current: Resolved, i: usize) -> Result<Resolved> {
    match current {
        Resolved::Edits(edits) => edits
            .get(i)
            .cloned()
            .map(Resolved::Edit)
            .ok_or_else(|| Error::config(format!("index {} out of range", i))),
        Resolved::Json(value) => value
            .get(i)
            .cloned()
            .map(Resolved::Json)
            .ok_or_else(|| Error::config(format!("index {} out of range", i))),
        Resolved::Response(response) => index(Resolved::Json(response.value()?), i),
        Resolved::Missing => Ok(Resolved::Missing),
        Resolved::Edit(_) => Err(Error::config("a post cannot be indexed")),
    }
}

// ---- parsing ----

#[derive(Debug)]
struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type ParseResult<T> = std::result::Result<T, ParseError>;

fn parse_line(line: &str) -> ParseResult<Line> {
    let indent = line.len() - line.trim_start().len();
    let mut parts = Vec::new();
    let mut rest = line;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            parts.push(Part::Text(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| ParseError("unterminated '{{'".into()))?;
        parts.push(Part::Placeholder(parse_expression(&after[..end])?));
        rest = &after[end + 2..];
    }
    if !rest.is_empty() {
        parts.push(Part::Text(rest.to_string()));
    }

    Ok(Line { indent, parts })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(String),
    Float(f64),
    Str(String),
    Punct(char),
}

fn tokenize(src: &str) -> ParseResult<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            i += 1;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            // `1.5` is a float; `posts.1.content` is an index followed by a field
            let is_float = chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(char::is_ascii_digit);
            if is_float {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse()
                    .map_err(|_| ParseError(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Float(value));
            } else {
                tokens.push(Token::Int(chars[start..i].iter().collect()));
            }
        } else if c == '"' || c == '\'' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(ParseError("unterminated string".into())),
                    Some('\\') => {
                        if let Some(&escaped) = chars.get(i + 1) {
                            s.push(escaped);
                        }
                        i += 2;
                    }
                    Some(&c) if c == quote => {
                        i += 1;
                        break;
                    }
                    Some(&c) => {
                        s.push(c);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(s));
        } else if ".(),=".contains(c) {
            tokens.push(Token::Punct(c));
            i += 1;
        } else {
            return Err(ParseError(format!("unexpected character '{}'", c)));
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn path(&mut self) -> ParseResult<Vec<Segment>> {
        let mut segments = vec![self.segment(true)?];
        while self.eat('.') {
            segments.push(self.segment(false)?);
        }
        Ok(segments)
    }

    fn segment(&mut self, first: bool) -> ParseResult<Segment> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                let call = if self.eat('(') { Some(self.call()?) } else { None };
                Ok(Segment::Name { name, call })
            }
            Some(Token::Int(digits)) if !first => {
                self.pos += 1;
                digits
                    .parse()
                    .map(Segment::Index)
                    .map_err(|_| ParseError(format!("invalid index '{}'", digits)))
            }
            other => Err(ParseError(format!("expected a name, found {:?}", other))),
        }
    }

    fn call(&mut self) -> ParseResult<Call> {
        let mut call = Call {
            positional: Vec::new(),
            keywords: Vec::new(),
        };
        if self.eat(')') {
            return Ok(call);
        }
        loop {
            let keyword = match (self.peek(), self.peek_at(1)) {
                (Some(Token::Ident(name)), Some(Token::Punct('='))) => Some(name.clone()),
                _ => None,
            };
            match keyword {
                Some(name) => {
                    self.pos += 2;
                    call.keywords.push((name, self.arg()?));
                }
                None => {
                    if !call.keywords.is_empty() {
                        return Err(ParseError("positional argument after keyword argument".into()));
                    }
                    call.positional.push(self.arg()?);
                }
            }
            if self.eat(')') {
                return Ok(call);
            }
            if !self.eat(',') {
                return Err(ParseError("expected ',' or ')'".into()));
            }
        }
    }

    fn arg(&mut self) -> ParseResult<Arg> {
        let literal = match self.peek() {
            Some(Token::Int(digits)) => Some(
                digits
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| ParseError(format!("invalid integer '{}'", digits)))?,
            ),
            Some(Token::Float(f)) => serde_json::Number::from_f64(*f).map(Value::Number),
            Some(Token::Str(s)) => Some(Value::String(s.clone())),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" | "True" => Some(Value::Bool(true)),
                "false" | "False" => Some(Value::Bool(false)),
                "none" | "None" | "null" => Some(Value::Null),
                _ => None,
            },
            _ => None,
        };

        match literal {
            Some(value) => {
                self.pos += 1;
                Ok(Arg::Literal(value))
            }
            None => Ok(Arg::Path(self.path()?)),
        }
    }
}

fn parse_expression(src: &str) -> ParseResult<Vec<Segment>> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
    };
    let path = parser.path()?;
    if parser.pos != parser.tokens.len() {
        return Err(ParseError(format!("unexpected input in '{{{{{}}}}}'", src)));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Output, StaticOutput};
    use serde_json::json;
    use std::cell::RefCell;

    struct TestScope {
        post: Arc<Edit>,
        args: Args,
        calls: RefCell<Vec<(String, usize, Args)>>,
    }

    impl TestScope {
        fn new() -> Self {
            Self {
                post: Edit::from_text("first line\nsecond line"),
                args: json!({"model": "small", "n": 2}).as_object().unwrap().clone(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Scope for TestScope {
        fn root(&self, name: &str) -> Option<Resolved> {
            match name {
                "post" | "post0" => Some(Resolved::Edit(self.post.clone())),
                "posts" => Some(Resolved::Edits(vec![self.post.clone(), Edit::from_text("other")])),
                other => self.args.get(other).cloned().map(Resolved::Json),
            }
        }

        fn is_quest(&self, name: &str) -> bool {
            name.starts_with("humor")
        }

        fn invoke(&self, quest: &str, edits: Vec<Arc<Edit>>, overrides: Args) -> Result<Resolved> {
            self.calls
                .borrow_mut()
                .push((quest.to_string(), edits.len(), overrides));
            Ok(Resolved::Response(Arc::new(Response::new(Output::Static(
                StaticOutput {
                    value: json!({"score": 7}),
                },
            )))))
        }
    }

    fn render(src: &str, scope: &TestScope) -> Result<String> {
        let alias = HashMap::from([("funny".to_string(), "humor_1".to_string())]);
        Template::parse(src)?.render(scope, &alias)
    }

    #[test]
    fn test_plain_text() {
        let scope = TestScope::new();
        assert_eq!(render("method: static\nvalue: 1", &scope).unwrap(), "method: static\nvalue: 1");
        assert!(Template::parse("a: b").unwrap().is_static());
    }

    #[test]
    fn test_args_and_post() {
        let scope = TestScope::new();
        assert_eq!(render("model: {{ model }} n={{n}}", &scope).unwrap(), "model: small n=2");
        assert_eq!(render("id: {{ post.id }}", &scope).unwrap(), "id: 0");
    }

    #[test]
    fn test_multiline_indented() {
        let scope = TestScope::new();
        let rendered = render("prompt:\n  - user: |\n      {{ post.content }}", &scope).unwrap();
        assert_eq!(rendered, "prompt:\n  - user: |\n      first line\n      second line");
    }

    #[test]
    fn test_alias_and_nested_invocation() {
        let scope = TestScope::new();
        let rendered = render("score: {{ post.funny(temperature=0.5).score }}", &scope).unwrap();
        assert_eq!(rendered, "score: 7");

        let calls = scope.calls.borrow();
        assert_eq!(calls[0].0, "humor_1");
        assert_eq!(calls[0].1, 1);
        assert_eq!(calls[0].2["temperature"], json!(0.5));
    }

    #[test]
    fn test_function_call_with_posts() {
        let scope = TestScope::new();
        render("{{ humor(post0, posts) }}", &scope).unwrap();
        assert_eq!(scope.calls.borrow()[0].1, 3);
    }

    #[test]
    fn test_index() {
        let scope = TestScope::new();
        assert_eq!(render("{{ posts.1.content }}", &scope).unwrap(), "other");
    }

    #[test]
    fn test_undefined_is_config_error() {
        let scope = TestScope::new();
        let err = render("{{ temprature }}", &scope).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("temprature"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Template::parse("{{ post.content").is_err());
        assert!(Template::parse("{{ post. }}").is_err());
        assert!(Template::parse("{{ humor(k=1, post) }}").is_err());
        assert!(Template::parse("{{ a + b }}").is_err());
    }
}
