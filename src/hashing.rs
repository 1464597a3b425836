/// Identity hashing for quests, edits and call arguments
///
/// Every identity in the cache is a SHA256 digest computed line by line:
/// each part is split into lines and the lines are fed to the hasher without
/// their terminators. Trailing newlines therefore never change a digest, while
/// any change to line content does.
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Process-wide memo of already computed digests
fn memo() -> &'static Mutex<HashMap<Vec<String>, String>> {
    static MEMO: OnceLock<Mutex<HashMap<Vec<String>, String>>> = OnceLock::new();
    MEMO.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Hash the lines of every part, in order
///
/// Returns the lowercase hex SHA256 digest. Results are memoized for the
/// lifetime of the process.
pub fn hash_by_lines(parts: &[&str]) -> String {
    let key: Vec<String> = parts.iter().map(|p| p.to_string()).collect();

    if let Ok(memo) = memo().lock() {
        if let Some(digest) = memo.get(&key) {
            return digest.clone();
        }
    }

    let mut hasher = Sha256::new();
    for part in parts {
        for line in part.lines() {
            hasher.update(line.as_bytes());
        }
    }
    let digest = hex::encode(hasher.finalize());

    if let Ok(mut memo) = memo().lock() {
        memo.insert(key, digest.clone());
    }

    digest
}

/// Hash a JSON value through its canonical (sorted-key) serialization
pub fn hash_json(value: &Value) -> String {
    hash_by_lines(&[&canonical_json(value)])
}

/// Serialize with object keys in sorted order
///
/// `serde_json::Map` is ordered by key unless `preserve_order` is enabled,
/// which this crate does not enable.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
