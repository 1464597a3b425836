/// Coercion of raw backend text into typed annotations
///
/// A definition declares `legal_answer_type` (`int`, `str`, `float`, `bool` or
/// `json`) and optionally `legal_answers`. Candidates that cannot be coerced,
/// or whose value is not among the legal answers, are dropped.
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::RawCandidate;
use crate::error::{Error, Result};
use crate::output::Candidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerType {
    Int,
    Str,
    Float,
    /// `0` or `1`
    Bool,
    Json,
}

impl FromStr for AnswerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "int" => Ok(AnswerType::Int),
            "str" => Ok(AnswerType::Str),
            "float" => Ok(AnswerType::Float),
            "bool" => Ok(AnswerType::Bool),
            "json" => Ok(AnswerType::Json),
            other => Err(Error::config(format!(
                "unknown legal_answer_type '{}': expected int, str, float, bool or json",
                other
            ))),
        }
    }
}

impl fmt::Display for AnswerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnswerType::Int => "int",
            AnswerType::Str => "str",
            AnswerType::Float => "float",
            AnswerType::Bool => "bool",
            AnswerType::Json => "json",
        };
        f.write_str(name)
    }
}

impl AnswerType {
    /// Convert raw text, or `None` if it does not have this type
    pub fn coerce(&self, text: &str) -> Option<Value> {
        let trimmed = text.trim();
        match self {
            AnswerType::Int => trimmed.parse::<i64>().ok().map(Value::from),
            AnswerType::Float => trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            AnswerType::Str => Some(Value::String(text.to_string())),
            AnswerType::Bool => match trimmed.parse::<i64>() {
                Ok(0) => Some(Value::Bool(false)),
                Ok(1) => Some(Value::Bool(true)),
                _ => None,
            },
            AnswerType::Json => serde_json::from_str(trimmed).ok(),
        }
    }
}

/// Keep the candidates that coerce to a legal answer, best rank first
///
/// Ranks are the candidates' positions in `raw`. Returns
/// [`Error::Legality`] when nothing survives.
pub fn legal_candidates(
    raw: &[RawCandidate],
    answer_type: AnswerType,
    legal_answers: Option<&[Value]>,
) -> Result<Vec<Candidate>> {
    let mut candidates: Vec<Candidate> = raw
        .iter()
        .enumerate()
        .filter_map(|(rank, candidate)| {
            let annotation = answer_type.coerce(&candidate.text)?;
            // json answers are not checked against legal_answers
            if answer_type != AnswerType::Json {
                if let Some(legal) = legal_answers {
                    if !legal.iter().any(|l| same_answer(l, &annotation)) {
                        return None;
                    }
                }
            }
            Some(Candidate {
                annotation,
                rank: rank as u32,
                logprob: candidate.logprob,
                text: candidate.text.clone(),
            })
        })
        .collect();

    if candidates.is_empty() {
        let texts: Vec<&str> = raw.iter().map(|c| c.text.as_str()).collect();
        return Err(Error::Legality(format!("{:?}", texts)));
    }

    candidates.sort_by_key(|c| c.rank);
    Ok(candidates)
}

fn same_answer(legal: &Value, annotation: &Value) -> bool {
    match (legal.as_f64(), annotation.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => legal == annotation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(texts: &[&str]) -> Vec<RawCandidate> {
        texts
            .iter()
            .map(|t| RawCandidate {
                text: t.to_string(),
                logprob: -0.1,
            })
            .collect()
    }

    #[test]
    fn test_coerce() {
        assert_eq!(AnswerType::Int.coerce(" 7\n"), Some(json!(7)));
        assert_eq!(AnswerType::Int.coerce("seven"), None);
        assert_eq!(AnswerType::Float.coerce("0.25"), Some(json!(0.25)));
        assert_eq!(AnswerType::Bool.coerce("1"), Some(json!(true)));
        assert_eq!(AnswerType::Bool.coerce("2"), None);
        assert_eq!(AnswerType::Json.coerce("{\"a\": 1}"), Some(json!({"a": 1})));
        assert_eq!(AnswerType::Str.coerce("yes"), Some(json!("yes")));
    }

    #[test]
    fn test_illegal_candidates_dropped() {
        let legal = [json!(0), json!(1), json!(2)];
        let candidates =
            legal_candidates(&raw(&["x", "2", "5", "0"]), AnswerType::Int, Some(&legal)).unwrap();
        let ranks: Vec<u32> = candidates.iter().map(|c| c.rank).collect();
        assert_eq!(ranks, vec![1, 3]);
        assert_eq!(candidates[0].annotation, json!(2));
    }

    #[test]
    fn test_no_legal_candidates() {
        let err = legal_candidates(&raw(&["x", "y"]), AnswerType::Int, None).unwrap_err();
        assert!(matches!(err, Error::Legality(_)));
    }

    #[test]
    fn test_unknown_type() {
        assert!("list".parse::<AnswerType>().is_err());
        assert_eq!("bool".parse::<AnswerType>().unwrap(), AnswerType::Bool);
    }
}
