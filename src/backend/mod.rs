/// Execution backend
///
/// Turns a rendered definition (a map of backend arguments) into an
/// [`Output`]. Dispatches on `method`:
///
/// - `static`: returns `value` unchanged
/// - `expr`: stores the literal expression in `expr`
/// - anything else: a registered [`Generator`] (`openai`, `vllm`, ...)
pub mod legality;
pub mod openai;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::output::{ExprOutput, Output, RankedOutput, StaticOutput};
use crate::quest::args::Args;
use legality::{legal_candidates, AnswerType};

pub use openai::OpenAiGenerator;

/// Method used when a rendered definition does not name one
pub const DEFAULT_METHOD: &str = "openai";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// One prompt for a generative backend
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub num_answers: u32,
    /// Remaining backend parameters (model, temperature, max_tokens, ...)
    pub params: Args,
}

impl GenerationRequest {
    pub fn max_tokens(&self) -> Option<i64> {
        self.params.get("max_tokens").and_then(Value::as_i64)
    }
}

/// Untyped candidate as returned by a generator, in rank order
#[derive(Debug, Clone, PartialEq)]
pub struct RawCandidate {
    pub text: String,
    pub logprob: f64,
}

/// A generative model endpoint
pub trait Generator: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> Result<Vec<RawCandidate>>;
}

/// Dispatches rendered definitions to the method they name
#[derive(Clone, Default)]
pub struct Executor {
    generators: HashMap<String, Arc<dyn Generator>>,
}

impl Executor {
    /// Executor that only knows `static` and `expr`
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator(mut self, method: impl Into<String>, generator: Arc<dyn Generator>) -> Self {
        self.generators.insert(method.into(), generator);
        self
    }

    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = ["static", "expr"].iter().map(|s| s.to_string()).collect();
        let mut generated: Vec<String> = self.generators.keys().cloned().collect();
        generated.sort();
        methods.extend(generated);
        methods
    }

    /// Run one invocation
    ///
    /// `args` is the rendered definition with effective arguments merged
    /// over it.
    pub fn execute(&self, mut args: Args) -> Result<Output> {
        let method = match args.remove("method") {
            Some(Value::String(m)) => m,
            Some(other) => return Err(Error::config(format!("`method` must be a string, got {}", other))),
            None => DEFAULT_METHOD.to_string(),
        };

        match method.as_str() {
            "static" => {
                let value = args
                    .remove("value")
                    .ok_or_else(|| Error::config("static method requires `value`"))?;
                Ok(Output::Static(StaticOutput { value }))
            }
            "expr" => match args.remove("expr") {
                Some(Value::String(expr)) => Ok(Output::Expr(ExprOutput { expr })),
                Some(other) => Ok(Output::Expr(ExprOutput {
                    expr: other.to_string(),
                })),
                None => Err(Error::config("expr method requires `expr`")),
            },
            _ => self.generate(&method, args),
        }
    }

    fn generate(&self, method: &str, mut args: Args) -> Result<Output> {
        let generator = self
            .generators
            .get(method)
            .ok_or_else(|| Error::Backend(format!("method '{}' is not configured", method)))?;

        let prompt = args
            .remove("prompt")
            .ok_or_else(|| Error::config(format!("method '{}' requires `prompt`", method)))?;
        let legal_type = match args.remove("legal_answer_type") {
            Some(Value::String(t)) => t,
            _ => return Err(Error::config("`legal_answer_type` must be declared")),
        };
        let answer_type: AnswerType = legal_type.parse()?;
        let num_answers = match args.remove("num_answers") {
            None => 1,
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .filter(|&n| n > 0)
                .ok_or_else(|| Error::config(format!("num_answers must be a positive integer, got {}", v)))?,
        };
        let legal_answers = match args.remove("legal_answers") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(items),
            Some(other) => {
                return Err(Error::config(format!("`legal_answers` must be a list, got {}", other)))
            }
        };

        let request = GenerationRequest {
            messages: messages(&prompt)?,
            num_answers,
            params: args,
        };

        info!(method = %method, num_answers, "calling generator");
        for message in &request.messages {
            debug!(role = %message.role, "{}", message.content);
        }

        let raw = generator.generate(&request)?;
        let candidates = legal_candidates(&raw, answer_type, legal_answers.as_deref())?;

        let mut info = request.params;
        info.insert("method".into(), Value::String(method.to_string()));
        info.insert("legal_answer_type".into(), Value::String(legal_type));
        Ok(Output::Ranked(RankedOutput { candidates, info }))
    }
}

/// Convert `[{system: ...}, {user: ...}]` into chat messages
///
/// Roles other than `system`, `user` and `assistant` are ignored.
fn messages(prompt: &Value) -> Result<Vec<Message>> {
    let items = prompt
        .as_array()
        .ok_or_else(|| Error::config("`prompt` must be a list of {role: content} maps"))?;

    let mut messages = Vec::new();
    for item in items {
        let map = item
            .as_object()
            .ok_or_else(|| Error::config("`prompt` entries must be {role: content} maps"))?;
        for (role, content) in map {
            if !matches!(role.as_str(), "system" | "user" | "assistant") {
                continue;
            }
            let content = match content {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            messages.push(Message {
                role: role.clone(),
                content,
            });
        }
    }
    Ok(messages)
}
