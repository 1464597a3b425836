/// Argument merging for quest invocations
///
/// Precedence, lowest to highest:
/// 1. Defaults declared in the definition's `args`
/// 2. Overrides supplied by the caller (e.g. a parent template)
/// 3. Context-level overrides (command line)
///
/// Overrides may only replace keys that the defaults declare. A new key
/// almost always means a typo, so strict merging rejects it.
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Error, Result};

pub type Args = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Unknown keys are a configuration error
    #[default]
    Strict,
    /// Unknown keys are logged and ignored
    Lenient,
}

/// Merge the three tiers into a fresh map
pub fn effective_args(
    defaults: &Args,
    caller: &Args,
    context: &Args,
    mode: MergeMode,
) -> Result<Args> {
    let mut args = defaults.clone();
    merge_into(&mut args, caller, mode)?;
    merge_into(&mut args, context, mode)?;
    Ok(args)
}

/// Overwrite values of `base` with those of `overrides`, recursing into maps
pub fn merge_into(base: &mut Args, overrides: &Args, mode: MergeMode) -> Result<()> {
    for (key, new) in overrides {
        let Some(old) = base.get_mut(key) else {
            match mode {
                MergeMode::Strict => {
                    return Err(Error::config(format!(
                        "override '{}' is not declared in `args`; overrides may only replace declared arguments",
                        key
                    )))
                }
                MergeMode::Lenient => {
                    warn!(key = %key, "ignoring override not declared in `args`");
                    continue;
                }
            }
        };

        if !same_kind(old, new) {
            return Err(Error::config(format!(
                "type mismatch for '{}': declared {} but override is {}",
                key,
                kind(old),
                kind(new)
            )));
        }

        match (old, new) {
            (Value::Object(old_map), Value::Object(new_map)) => {
                merge_into(old_map, new_map, mode)?;
            }
            (old, new) => *old = new.clone(),
        }
    }
    Ok(())
}

fn same_kind(old: &Value, new: &Value) -> bool {
    // An undeclared (null) default accepts any value
    old.is_null() || kind(old) == kind(new)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Parse a `key=value` override, trying integer, then float, then string
pub fn parse_override(pair: &str) -> Result<(String, Value)> {
    let (key, raw) = pair
        .split_once('=')
        .ok_or_else(|| Error::config(format!("override '{}' is not key=value", pair)))?;

    let value = if let Ok(i) = raw.parse::<i64>() {
        Value::from(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::from(f)
    } else {
        Value::String(raw.to_string())
    };

    Ok((key.to_string(), value))
}
