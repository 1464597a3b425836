use anyhow::Result;
use std::env;

/// Expand environment references in configuration text
///
/// - `${VAR}`: value of `VAR`, an error if unset
/// - `${VAR:-fallback}`: value of `VAR`, or `fallback` if unset
/// - `$$`: a literal `$`
///
/// ```
/// # std::env::set_var("ANNOT_DOC_STORE", "memory://");
/// let input = "url = \"${ANNOT_DOC_STORE}\"\ndir = \"${ANNOT_DOC_MISSING:-quests}\"";
/// let expanded = annot::config_expansion::expand_env_vars(input).unwrap();
/// assert_eq!(expanded, "url = \"memory://\"\ndir = \"quests\"");
/// ```
pub fn expand_env_vars(content: &str) -> Result<String> {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
        } else if let Some(body) = after.strip_prefix('{') {
            let end = closing_brace(body)
                .ok_or_else(|| anyhow::anyhow!("Unterminated '${{' in configuration"))?;
            out.push_str(&resolve(&body[..end])?);
            rest = &body[end + 1..];
        } else {
            out.push('$');
            rest = after;
        }
    }
    out.push_str(rest);

    Ok(out)
}

/// Byte offset of the brace closing an already opened `{`
fn closing_brace(body: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn resolve(expr: &str) -> Result<String> {
    let (name, fallback) = match expr.split_once(":-") {
        Some((name, fallback)) => (name, Some(fallback)),
        None => (expr, None),
    };

    match (env::var(name), fallback) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(fallback)) => Ok(fallback.to_string()),
        (Err(_), None) => anyhow::bail!(
            "Environment variable '{}' is required but not set. Use ${{{}:-default}} to provide a default value.",
            name,
            name
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_required_var() {
        env::set_var("ANNOT_TEST_STORE", "rocksdb:///tmp/store");
        let output = expand_env_vars(r#"url = "${ANNOT_TEST_STORE}""#).unwrap();
        assert_eq!(output, r#"url = "rocksdb:///tmp/store""#);
        env::remove_var("ANNOT_TEST_STORE");
    }

    #[test]
    #[serial]
    fn test_fallback_and_override() {
        env::remove_var("ANNOT_TEST_DIR");
        assert_eq!(
            expand_env_vars(r#"dir = "${ANNOT_TEST_DIR:-quests}""#).unwrap(),
            r#"dir = "quests""#
        );

        env::set_var("ANNOT_TEST_DIR", "defs");
        assert_eq!(
            expand_env_vars(r#"dir = "${ANNOT_TEST_DIR:-quests}""#).unwrap(),
            r#"dir = "defs""#
        );
        env::remove_var("ANNOT_TEST_DIR");
    }

    #[test]
    #[serial]
    fn test_missing_required_var() {
        env::remove_var("ANNOT_TEST_REQUIRED");
        let err = expand_env_vars("key = \"${ANNOT_TEST_REQUIRED}\"").unwrap_err();
        assert!(err
            .to_string()
            .contains("Environment variable 'ANNOT_TEST_REQUIRED' is required"));
    }

    #[test]
    fn test_dollar_forms() {
        assert_eq!(expand_env_vars("cost = \"$$5\"").unwrap(), "cost = \"$5\"");
        assert_eq!(expand_env_vars("a = \"$x\"").unwrap(), "a = \"$x\"");
        assert!(expand_env_vars("a = \"${OPEN\"").is_err());
    }

    #[test]
    #[serial]
    fn test_braces_in_fallback() {
        env::remove_var("ANNOT_TEST_MISSING");
        let output = expand_env_vars(r#"v = '${ANNOT_TEST_MISSING:-{"a": 1}}'"#).unwrap();
        assert_eq!(output, r#"v = '{"a": 1}'"#);
    }
}
