use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{GenerationRequest, Generator, RawCandidate};
use crate::error::{Error, Result};

/// OpenAI-compatible chat completions endpoint
///
/// Serves both `openai` and self-hosted `vllm` servers. With `max_tokens = 1`
/// the candidates are the `top_logprobs` alternatives of the single token;
/// otherwise they are `n` independent choices scored by their summed token
/// log-likelihood.
pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    logprobs: Option<ChoiceLogprobs>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceLogprobs {
    #[serde(default)]
    content: Vec<TokenLogprob>,
}

#[derive(Deserialize)]
struct TokenLogprob {
    logprob: f64,
    #[serde(default)]
    top_logprobs: Vec<TopLogprob>,
}

#[derive(Deserialize)]
struct TopLogprob {
    token: String,
    logprob: f64,
}

impl OpenAiGenerator {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn body(&self, request: &GenerationRequest) -> Result<Value> {
        let mut body = request.params.clone();
        body.insert("messages".into(), serde_json::to_value(&request.messages)?);
        body.insert("logprobs".into(), Value::Bool(true));
        if request.max_tokens() == Some(1) {
            body.insert("top_logprobs".into(), Value::from(request.num_answers));
        } else {
            body.insert("n".into(), Value::from(request.num_answers));
        }
        Ok(Value::Object(body))
    }
}

impl Generator for OpenAiGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<Vec<RawCandidate>> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, "chat completion request");

        let mut http = self.client.post(&url).json(&self.body(request)?);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Backend(format!("{} returned {}: {}", url, status, body)));
        }

        let chat: ChatResponse = response.json()?;
        candidates(chat, request.max_tokens() == Some(1))
    }
}

fn candidates(chat: ChatResponse, single_token: bool) -> Result<Vec<RawCandidate>> {
    if single_token {
        let first = chat
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Backend("response has no choices".into()))?;
        let token = first
            .logprobs
            .and_then(|l| l.content.into_iter().next())
            .ok_or_else(|| Error::Backend("response has no token logprobs".into()))?;
        return Ok(token
            .top_logprobs
            .into_iter()
            .map(|t| RawCandidate {
                text: t.token,
                logprob: t.logprob,
            })
            .collect());
    }

    Ok(chat
        .choices
        .into_iter()
        .map(|choice| {
            let logprob = choice
                .logprobs
                .map(|l| l.content.iter().map(|t| t.logprob).sum())
                .unwrap_or(0.0);
            RawCandidate {
                text: choice.message.content.unwrap_or_default(),
                logprob,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> ChatResponse {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_choices_sum_logprobs() {
        let chat = parse(json!({
            "choices": [
                {"index": 0, "message": {"content": "12"}, "logprobs": {"content": [
                    {"token": "1", "logprob": -0.5, "top_logprobs": []},
                    {"token": "2", "logprob": -0.25, "top_logprobs": []}
                ]}},
                {"index": 1, "message": {"content": "3"}, "logprobs": null}
            ]
        }));
        let result = candidates(chat, false).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].text, "12");
        assert!((result[0].logprob + 0.75).abs() < 1e-9);
        assert_eq!(result[1].logprob, 0.0);
    }

    #[test]
    fn test_single_token_uses_top_logprobs() {
        let chat = parse(json!({
            "choices": [
                {"message": {"content": "3"}, "logprobs": {"content": [
                    {"token": "3", "logprob": -0.1, "top_logprobs": [
                        {"token": "3", "logprob": -0.1},
                        {"token": "4", "logprob": -2.3}
                    ]}
                ]}}
            ]
        }));
        let result = candidates(chat, true).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[1].text, "4");
    }

    #[test]
    fn test_request_body() {
        let generator = OpenAiGenerator::new("http://localhost:8000/v1/", None).unwrap();
        let mut params = crate::quest::args::Args::new();
        params.insert("max_tokens".into(), json!(1));
        let request = GenerationRequest {
            messages: vec![],
            num_answers: 5,
            params,
        };
        let body = generator.body(&request).unwrap();
        assert_eq!(body["top_logprobs"], json!(5));
        assert!(body.get("n").is_none());
        assert_eq!(generator.base_url, "http://localhost:8000/v1");
    }
}
