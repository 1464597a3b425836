//! Content sources: where edits get their text and history from

use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Read-only access to posts and their edit history
pub trait ContentSource: Send + Sync {
    /// Current metadata of a post
    fn status(&self, id: &str) -> Result<Value>;

    /// Every revision of a post, oldest first; each carries `created_at`
    fn history(&self, id: &str) -> Result<Vec<Value>>;

    /// Thread context with `ancestors` and `descendants`
    fn context(&self, id: &str) -> Result<Value>;
}

/// Mastodon-compatible REST API, e.g. `https://mastodon.social/api`
pub struct MastodonSource {
    client: Client,
    base_url: String,
}

impl MastodonSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_json(&self, url: &str) -> Result<Value> {
        debug!(url = %url, "fetching");
        let response = self.client.get(url).send()?;
        let status = response.status();
        let body: Value = response.json()?;

        if body.get("error").and_then(Value::as_str) == Some("Record not found") {
            return Err(Error::NotFound(format!("record not found at {}", url)));
        }
        if !status.is_success() {
            return Err(Error::Backend(format!("{} returned {}: {}", url, status, body)));
        }
        Ok(body)
    }
}

impl ContentSource for MastodonSource {
    fn status(&self, id: &str) -> Result<Value> {
        self.request_json(&format!("{}/v1/statuses/{}", self.base_url, id))
    }

    fn history(&self, id: &str) -> Result<Vec<Value>> {
        match self.request_json(&format!("{}/v1/statuses/{}/history", self.base_url, id))? {
            Value::Array(items) => Ok(items),
            other => Err(Error::Backend(format!("history of {} is not a list: {}", id, other))),
        }
    }

    fn context(&self, id: &str) -> Result<Value> {
        self.request_json(&format!("{}/v1/statuses/{}/context", self.base_url, id))
    }
}

/// Source used when no content source is configured
///
/// Every lookup fails with [`Error::NotFound`]; text and file edits still work.
pub struct NoSource;

impl ContentSource for NoSource {
    fn status(&self, id: &str) -> Result<Value> {
        Err(Error::NotFound(format!("post {}: no content source configured", id)))
    }

    fn history(&self, id: &str) -> Result<Vec<Value>> {
        Err(Error::NotFound(format!("post {}: no content source configured", id)))
    }

    fn context(&self, id: &str) -> Result<Value> {
        Err(Error::NotFound(format!("post {}: no content source configured", id)))
    }
}
