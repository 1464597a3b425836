/// Immutable content snapshots ("edits")
///
/// An edit is one revision of a post, identified by the post id and the time
/// the revision was created. Remote edits load their data lazily from a
/// [`ContentSource`] and are interned by an [`EditPool`], so each revision is
/// fetched at most once per pool. Text and file edits carry their content
/// directly.
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::hashing::hash_by_lines;
use crate::source::ContentSource;

/// Id given to edits that do not come from a content source
pub const LOCAL_ID: &str = "0";

fn local_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::config(format!("invalid timestamp '{}': {}", s, e)))
}

enum Origin {
    Remote(Weak<PoolInner>),
    Local { content: String, label: String },
}

#[derive(Default)]
struct EditState {
    data: Option<Map<String, Value>>,
    content: Option<String>,
    /// `Some(None)` once loaded for a post that is not a reply
    parent: Option<Option<Arc<Edit>>>,
    ancestors: Option<Vec<Arc<Edit>>>,
}

pub struct Edit {
    id: String,
    timestamp: DateTime<Utc>,
    origin: Origin,
    state: Mutex<EditState>,
}

impl Edit {
    /// Edit holding literal text
    pub fn from_text(text: impl Into<String>) -> Arc<Edit> {
        let content = text.into();
        let label = content.chars().take(32).collect();
        Arc::new(Self::local(content, label))
    }

    /// Edit holding the content of a file
    pub fn from_file(path: &Path) -> Result<Arc<Edit>> {
        let content = fs::read_to_string(path)?;
        Ok(Arc::new(Self::local(content, path.display().to_string())))
    }

    fn local(content: String, label: String) -> Self {
        Self {
            id: LOCAL_ID.to_string(),
            timestamp: local_timestamp(),
            origin: Origin::Local { content, label },
            state: Mutex::new(EditState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, EditState>> {
        self.state
            .lock()
            .map_err(|_| Error::Backend(format!("edit {} state poisoned", self.id)))
    }

    fn pool(&self) -> Result<EditPool> {
        match &self.origin {
            Origin::Remote(pool) => pool
                .upgrade()
                .map(|inner| EditPool { inner })
                .ok_or_else(|| Error::Backend(format!("edit pool of {} was dropped", self.id))),
            Origin::Local { .. } => Err(Error::NotFound(format!(
                "edit {} has no content source",
                self.id
            ))),
        }
    }

    /// Post metadata merged with the matching history entry
    ///
    /// The history entry's `created_at` is exposed as `timestamp`.
    pub fn data(&self) -> Result<Map<String, Value>> {
        let mut state = self.lock()?;
        if let Some(data) = &state.data {
            return Ok(data.clone());
        }
        let data = self.load()?;
        state.data = Some(data.clone());
        Ok(data)
    }

    fn load(&self) -> Result<Map<String, Value>> {
        match &self.origin {
            Origin::Local { content, .. } => {
                let mut data = Map::new();
                data.insert("id".into(), Value::String(self.id.clone()));
                data.insert("content".into(), Value::String(content.clone()));
                data.insert("timestamp".into(), Value::String(format_timestamp(&self.timestamp)));
                Ok(data)
            }
            Origin::Remote(_) => {
                let pool = self.pool()?;
                let source = &pool.inner.source;
                debug!(id = %self.id, timestamp = %format_timestamp(&self.timestamp), "loading edit");

                let mut data = match source.status(&self.id)? {
                    Value::Object(map) => map,
                    other => {
                        return Err(Error::Backend(format!(
                            "status of {} is not an object: {}",
                            self.id, other
                        )))
                    }
                };

                let revision = source
                    .history(&self.id)?
                    .into_iter()
                    .filter_map(|entry| match entry {
                        Value::Object(map) => Some(map),
                        _ => None,
                    })
                    .find(|entry| created_at(entry).ok() == Some(self.timestamp))
                    .ok_or_else(|| {
                        Error::NotFound(format!(
                            "no revision of post {} at {}",
                            self.id,
                            format_timestamp(&self.timestamp)
                        ))
                    })?;

                for (key, value) in revision {
                    if key == "created_at" {
                        data.insert("timestamp".into(), value);
                    } else {
                        data.insert(key, value);
                    }
                }
                Ok(data)
            }
        }
    }

    /// Text content with markup tags removed
    pub fn content(&self) -> Result<String> {
        if let Some(content) = &self.lock()?.content {
            return Ok(content.clone());
        }

        let content = match &self.origin {
            Origin::Local { content, .. } => content.clone(),
            Origin::Remote(_) => {
                let data = self.data()?;
                let raw = data.get("content").and_then(Value::as_str).unwrap_or_default();
                clean(raw)
            }
        };

        self.lock()?.content = Some(content.clone());
        Ok(content)
    }

    /// Any other field of the post metadata
    pub fn field(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.data()?.get(name).cloned())
    }

    /// Identity digest over id, timestamp and content
    pub fn digest(&self) -> Result<String> {
        let content = self.content()?;
        Ok(hash_by_lines(&[
            &self.id,
            &format_timestamp(&self.timestamp),
            &content,
        ]))
    }

    /// The post this edit replies to, as it was at this edit's time
    pub fn parent(&self) -> Result<Option<Arc<Edit>>> {
        if let Origin::Local { .. } = self.origin {
            return Ok(None);
        }

        let mut state = self.lock()?;
        if let Some(parent) = &state.parent {
            return Ok(parent.clone());
        }

        let data = match &state.data {
            Some(data) => data.clone(),
            None => {
                let data = self.load()?;
                state.data = Some(data.clone());
                data
            }
        };

        let parent = match data.get("in_reply_to_id") {
            Some(Value::String(id)) => Some(self.pool()?.post(id).latest(Some(self.timestamp))?),
            Some(Value::Number(id)) => Some(self.pool()?.post(&id.to_string()).latest(Some(self.timestamp))?),
            _ => None,
        };
        state.parent = Some(parent.clone());
        Ok(parent)
    }

    /// Every post above this one in its thread, as they were at this edit's time
    pub fn ancestors(&self) -> Result<Vec<Arc<Edit>>> {
        if let Origin::Local { .. } = self.origin {
            return Ok(Vec::new());
        }

        let mut state = self.lock()?;
        if let Some(ancestors) = &state.ancestors {
            return Ok(ancestors.clone());
        }

        let pool = self.pool()?;
        let context = pool.inner.source.context(&self.id)?;
        let ancestors = context
            .get("ancestors")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter_map(|a| a.get("id").and_then(Value::as_str).map(str::to_string))
            .map(|id| pool.post(&id).latest(Some(self.timestamp)))
            .collect::<Result<Vec<_>>>()?;

        state.ancestors = Some(ancestors.clone());
        Ok(ancestors)
    }
}

impl fmt::Debug for Edit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Origin::Remote(_) => write!(f, "Edit({}, {})", self.id, format_timestamp(&self.timestamp)),
            Origin::Local { label, .. } => write!(f, "Edit({:?})", label),
        }
    }
}

fn created_at(entry: &Map<String, Value>) -> Result<DateTime<Utc>> {
    let raw = entry
        .get("created_at")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Backend("history entry without created_at".into()))?;
    parse_timestamp(raw)
}

fn pattern(cell: &'static OnceLock<Option<Regex>>, source: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| {
        Regex::new(source)
            .map_err(|e| warn!(pattern = source, error = %e, "invalid pattern"))
            .ok()
    })
    .as_ref()
}

/// Replace markup tags by spaces and collapse runs of spaces
///
/// Only complete `<...>` pairs on one line are tags; a lone `<` is text.
pub fn clean(raw: &str) -> String {
    static TAGS: OnceLock<Option<Regex>> = OnceLock::new();
    static SPACES: OnceLock<Option<Regex>> = OnceLock::new();

    let stripped = match pattern(&TAGS, "<.*?>") {
        Some(tags) => tags.replace_all(raw, " "),
        None => Cow::Borrowed(raw),
    };
    match pattern(&SPACES, " {2,}") {
        Some(spaces) => spaces.replace_all(&stripped, " ").into_owned(),
        None => stripped.into_owned(),
    }
}

struct PoolInner {
    source: Arc<dyn ContentSource>,
    edits: Mutex<HashMap<(String, DateTime<Utc>), Arc<Edit>>>,
}

/// Interns remote edits by `(id, timestamp)`
#[derive(Clone)]
pub struct EditPool {
    inner: Arc<PoolInner>,
}

impl EditPool {
    pub fn new(source: Arc<dyn ContentSource>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                source,
                edits: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The unique edit for this revision
    pub fn edit(&self, id: &str, timestamp: DateTime<Utc>) -> Result<Arc<Edit>> {
        let mut edits = self
            .inner
            .edits
            .lock()
            .map_err(|_| Error::Backend("edit pool poisoned".into()))?;
        let edit = edits
            .entry((id.to_string(), timestamp))
            .or_insert_with(|| {
                Arc::new(Edit {
                    id: id.to_string(),
                    timestamp,
                    origin: Origin::Remote(Arc::downgrade(&self.inner)),
                    state: Mutex::new(EditState::default()),
                })
            });
        Ok(edit.clone())
    }

    pub fn post(&self, id: &str) -> Post {
        Post {
            id: id.to_string(),
            pool: self.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.edits.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A post without a fixed revision
pub struct Post {
    id: String,
    pool: EditPool,
}

impl Post {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest revision created at or before `cutoff` (or the latest overall)
    pub fn latest(&self, cutoff: Option<DateTime<Utc>>) -> Result<Arc<Edit>> {
        let history = self.pool.inner.source.history(&self.id)?;
        let mut timestamps = history
            .iter()
            .filter_map(|entry| entry.as_object())
            .map(created_at)
            .collect::<Result<Vec<_>>>()?;
        if let Some(cutoff) = cutoff {
            timestamps.retain(|ts| *ts <= cutoff);
        }

        // history is returned oldest first
        let latest = timestamps.last().copied().ok_or_else(|| {
            Error::NotFound(match cutoff {
                Some(cutoff) => format!(
                    "no revision of post {} at or before {}",
                    self.id,
                    format_timestamp(&cutoff)
                ),
                None => format!("post {} has no revisions", self.id),
            })
        })?;

        self.pool.edit(&self.id, latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Two-post thread: 2 replies to 1; post 1 was edited once
    struct Thread {
        status_calls: AtomicUsize,
    }

    impl ContentSource for Thread {
        fn status(&self, id: &str) -> Result<Value> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            match id {
                "1" => Ok(json!({"id": "1", "content": "<p>v2</p>", "in_reply_to_id": null, "language": "en"})),
                "2" => Ok(json!({"id": "2", "content": "<p>reply  <b>x</b></p>", "in_reply_to_id": "1"})),
                _ => Err(Error::NotFound(id.into())),
            }
        }

        fn history(&self, id: &str) -> Result<Vec<Value>> {
            match id {
                "1" => Ok(vec![
                    json!({"content": "<p>v1</p>", "created_at": "2024-01-01T00:00:00Z"}),
                    json!({"content": "<p>v2</p>", "created_at": "2024-01-03T00:00:00Z"}),
                ]),
                "2" => Ok(vec![json!({"content": "<p>reply  <b>x</b></p>", "created_at": "2024-01-02T00:00:00Z"})]),
                _ => Err(Error::NotFound(id.into())),
            }
        }

        fn context(&self, id: &str) -> Result<Value> {
            match id {
                "2" => Ok(json!({"ancestors": [{"id": "1"}], "descendants": []})),
                _ => Ok(json!({"ancestors": [], "descendants": []})),
            }
        }
    }

    fn pool() -> (EditPool, Arc<Thread>) {
        let source = Arc::new(Thread {
            status_calls: AtomicUsize::new(0),
        });
        (EditPool::new(source.clone()), source)
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean("<p>hello  <b>world</b></p>"), " hello world ");
    }

    #[test]
    fn test_clean_keeps_unmatched_angle_bracket() {
        assert_eq!(clean("score a < b then c"), "score a < b then c");
        assert_eq!(clean("<p>a</p> < b"), " a < b");
        assert_eq!(clean("x > y"), "x > y");
    }

    #[test]
    fn test_text_edit() {
        let edit = Edit::from_text("plain text");
        assert_eq!(edit.id(), "0");
        assert_eq!(format_timestamp(&edit.timestamp()), "2000-01-01T00:00:00Z");
        assert_eq!(edit.content().unwrap(), "plain text");
        assert!(edit.parent().unwrap().is_none());
        assert_eq!(edit.digest().unwrap(), Edit::from_text("plain text").digest().unwrap());
    }

    #[test]
    fn test_latest_respects_cutoff() {
        let (pool, _) = pool();
        let latest = pool.post("1").latest(None).unwrap();
        assert_eq!(latest.content().unwrap(), " v2 ");

        let cutoff = parse_timestamp("2024-01-02T00:00:00Z").unwrap();
        let earlier = pool.post("1").latest(Some(cutoff)).unwrap();
        assert_eq!(earlier.content().unwrap(), " v1 ");

        let too_early = parse_timestamp("2023-01-01T00:00:00Z").unwrap();
        assert!(matches!(pool.post("1").latest(Some(too_early)), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_edits_are_interned_and_loaded_once() {
        let (pool, source) = pool();
        let a = pool.post("1").latest(None).unwrap();
        let b = pool.post("1").latest(None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        a.content().unwrap();
        b.data().unwrap();
        assert_eq!(source.status_calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.field("language").unwrap(), Some(json!("en")));
    }

    #[test]
    fn test_parent_and_ancestors_at_edit_time() {
        let (pool, _) = pool();
        let reply = pool.post("2").latest(None).unwrap();
        let parent = reply.parent().unwrap().unwrap();
        assert_eq!(parent.id(), "1");
        assert_eq!(parent.content().unwrap(), " v1 ");

        let ancestors = reply.ancestors().unwrap();
        assert_eq!(ancestors.len(), 1);
        assert!(Arc::ptr_eq(&ancestors[0], &parent));
    }

    #[test]
    fn test_missing_revision() {
        let (pool, _) = pool();
        let ts = parse_timestamp("2024-05-05T00:00:00Z").unwrap();
        let edit = pool.edit("1", ts).unwrap();
        assert!(matches!(edit.content(), Err(Error::NotFound(_))));
    }
}
