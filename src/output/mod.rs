//! Result model
//!
//! Every invocation produces one [`Output`]:
//!
//! - [`RankedOutput`]: candidates returned by a generative backend, best first
//! - [`StaticOutput`]: a fixed value declared in the definition
//! - [`ExprOutput`]: a literal expression evaluated when read
//!
//! Outputs serialize to and from the store's record format. Interpolation into
//! a parent template goes through the explicit [`Output::value`] accessor.

pub mod expr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::backend::legality::AnswerType;
use crate::error::{Error, Result};
use crate::hashing::canonical_json;
use crate::quest::args::Args;
use crate::store::pattern::{Term, Triple};

/// One candidate annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub annotation: Value,
    pub rank: u32,
    /// Summed token log-likelihood
    pub logprob: f64,
    pub text: String,
}

impl Candidate {
    pub fn probability(&self) -> f64 {
        self.logprob.exp()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedOutput {
    /// Sorted by rank, best first; never empty
    pub candidates: Vec<Candidate>,
    /// Backend arguments worth keeping (method, legal_answer_type, max_tokens, ...)
    pub info: Args,
}

impl RankedOutput {
    pub fn best(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    /// Normalized probability of each candidate annotation
    ///
    /// Only meaningful when every candidate is a single token, so it is
    /// `None` unless the output was produced with `max_tokens = 1`.
    pub fn distribution(&self) -> Option<Vec<(Value, f64)>> {
        if self.info.get("max_tokens").and_then(Value::as_i64) != Some(1) {
            return None;
        }
        let total: f64 = self.candidates.iter().map(Candidate::probability).sum();
        if total <= 0.0 {
            return None;
        }
        Some(
            self.candidates
                .iter()
                .map(|c| (c.annotation.clone(), c.probability() / total))
                .collect(),
        )
    }

    /// Mean of the candidate annotations, when all are numeric
    pub fn mean(&self) -> Option<f64> {
        if self.candidates.is_empty() {
            return None;
        }
        let values: Option<Vec<f64>> = self
            .candidates
            .iter()
            .map(|c| c.annotation.as_f64())
            .collect();
        let values = values?;
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    fn method(&self) -> &str {
        self.info
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("openai")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticOutput {
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprOutput {
    pub expr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Output {
    Ranked(RankedOutput),
    Static(StaticOutput),
    Expr(ExprOutput),
}

impl Output {
    /// Primary scalar of the output
    pub fn value(&self) -> Result<Value> {
        match self {
            Output::Ranked(ranked) => ranked
                .best()
                .map(|c| c.annotation.clone())
                .ok_or_else(|| Error::Legality("output has no candidates".into())),
            Output::Static(s) => Ok(s.value.clone()),
            Output::Expr(e) => expr::evaluate(&e.expr),
        }
    }

    /// Raw text of the output (best candidate's text for ranked outputs)
    pub fn text(&self) -> String {
        match self {
            Output::Ranked(ranked) => ranked.best().map(|c| c.text.clone()).unwrap_or_default(),
            Output::Static(s) => display_value(&s.value),
            Output::Expr(e) => e.expr.clone(),
        }
    }

    pub fn mean(&self) -> Option<f64> {
        match self {
            Output::Ranked(ranked) => ranked.mean(),
            other => other.value().ok().and_then(|v| v.as_f64()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Output::Ranked(_) => "ranked",
            Output::Static(_) => "static",
            Output::Expr(_) => "expr",
        }
    }

    /// Triples describing this output under `resp:<id>`
    pub fn to_triples(&self, id: &Uuid) -> Vec<Triple> {
        let subject = Term::iri("resp", id);
        let prop = |key: &str, object: Term| Triple::new(subject.clone(), Term::iri("resp", key), object);

        match self {
            Output::Static(s) => vec![
                prop("method", Term::str("static")),
                prop("value", Term::str(canonical_json(&s.value))),
            ],
            Output::Expr(e) => vec![
                prop("method", Term::str("expr")),
                prop("expr", Term::str(e.expr.clone())),
            ],
            Output::Ranked(ranked) => {
                let mut triples = vec![
                    prop("method", Term::str(ranked.method())),
                    prop("info", Term::str(canonical_json(&Value::Object(ranked.info.clone())))),
                ];
                if let Some(legal) = ranked.info.get("legal_answer_type").and_then(Value::as_str) {
                    triples.push(prop("legal_answer_type", Term::str(legal)));
                }
                for candidate in &ranked.candidates {
                    let item = Term::iri("item", Uuid::new_v4());
                    triples.push(prop("item", item.clone()));
                    let field = |key: &str, object: Term| Triple::new(item.clone(), Term::iri("item", key), object);
                    triples.push(field("annotation", Term::str(canonical_json(&candidate.annotation))));
                    triples.push(field("rank", Term::Int(candidate.rank as i64)));
                    triples.push(field("logprob", Term::str(candidate.logprob.to_string())));
                    triples.push(field("text", Term::str(candidate.text.clone())));
                }
                triples
            }
        }
    }

    /// Rebuild an output from its stored properties
    ///
    /// `props` are the `resp:` properties (keys without prefix), `items` the
    /// `item:` properties of each candidate. Records written by an
    /// incompatible format fail with [`Error::IncompatibleCache`].
    pub fn from_record(props: &[(String, Term)], items: &[Vec<(String, Term)>]) -> Result<Output> {
        let get = |key: &str| props.iter().find(|(k, _)| k == key).map(|(_, v)| v);
        let method = get("method").map(Term::lexical);

        match method.as_deref() {
            Some("static") => {
                let raw = get("value")
                    .ok_or_else(|| Error::incompatible("static output without value"))?
                    .lexical();
                let value = serde_json::from_str(&raw).map_err(|_| {
                    Error::incompatible(format!("static value '{}' is not JSON encoded", raw))
                })?;
                Ok(Output::Static(StaticOutput { value }))
            }
            Some("expr") => {
                let expr = get("expr")
                    .ok_or_else(|| Error::incompatible("expression output without expr"))?
                    .lexical();
                Ok(Output::Expr(ExprOutput { expr }))
            }
            _ => {
                let legal = get("legal_answer_type")
                    .map(Term::lexical)
                    .ok_or_else(|| Error::incompatible("legal_answer_type is not recorded"))?;
                let answer_type: AnswerType = legal
                    .parse()
                    .map_err(|_| Error::incompatible(format!("unknown legal_answer_type '{}'", legal)))?;

                let mut info = match get("info") {
                    Some(raw) => match serde_json::from_str(&raw.lexical()) {
                        Ok(Value::Object(map)) => map,
                        _ => return Err(Error::incompatible("info is not a JSON map")),
                    },
                    None => Args::new(),
                };
                if let Some(method) = method {
                    info.insert("method".into(), Value::String(method));
                }
                info.insert("legal_answer_type".into(), Value::String(legal));

                let mut candidates = items
                    .iter()
                    .map(|item| candidate_from_record(item, answer_type))
                    .collect::<Result<Vec<_>>>()?;
                if candidates.is_empty() {
                    return Err(Error::incompatible("ranked output without items"));
                }
                candidates.sort_by_key(|c| c.rank);

                Ok(Output::Ranked(RankedOutput { candidates, info }))
            }
        }
    }
}

fn candidate_from_record(item: &[(String, Term)], answer_type: AnswerType) -> Result<Candidate> {
    let get = |key: &str| {
        item.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::incompatible(format!("response item without {}", key)))
    };

    let raw = get("annotation")?.lexical();
    let annotation = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(_) => answer_type
            .coerce(&raw)
            .ok_or_else(|| Error::incompatible(format!("annotation '{}' is not {}", raw, answer_type)))?,
    };

    let rank = get("rank")?
        .as_int()
        .and_then(|r| u32::try_from(r).ok())
        .ok_or_else(|| Error::incompatible("rank is not an integer"))?;
    let logprob = get("logprob")?
        .lexical()
        .parse()
        .map_err(|_| Error::incompatible("logprob is not a float"))?;
    let text = get("text")?.lexical();

    Ok(Candidate {
        annotation,
        rank,
        logprob,
        text,
    })
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Ok(value) => write!(f, "{}", display_value(&value)),
            Err(_) => write!(f, "{}", self.text()),
        }
    }
}

/// An output with the time it was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub output: Output,
    pub timestamp: DateTime<Utc>,
}

impl Response {
    pub fn new(output: Output) -> Self {
        Self {
            output,
            timestamp: Utc::now(),
        }
    }

    pub fn value(&self) -> Result<Value> {
        self.output.value()
    }
}
