/// Definition file parsing
///
/// A definition file holds exactly two YAML documents:
///
/// ```yaml
/// args:
///   temperature: 0.0
///   model: gpt-4o-mini
/// alias:
///   humor: humor_1
/// ---
/// method: openai
/// legal_answer_type: int
/// prompt:
///   - system: You rate posts.
///   - user: |
///       {{ post.content }}
/// ```
///
/// The first document declares default arguments and an alias table used by
/// the template. The second is the template itself; after rendering it must
/// parse as a YAML map of backend arguments.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use super::args::Args;
use super::Quest;
use crate::error::{Error, Result};
use crate::hashing::hash_json;
use crate::render::Template;

#[derive(Debug, Clone)]
pub struct Definition {
    pub path: PathBuf,
    pub name: String,
    /// Version as requested through the resolving alias (`None` = any)
    pub major: Option<u32>,
    pub minor: Option<u32>,
    /// Version encoded in the filename
    pub parsed_major: u32,
    pub parsed_minor: u32,
    pub default_args: Args,
    pub alias: HashMap<String, String>,
    /// Context-level overrides for the alias this definition was resolved by
    pub overrides: Args,
    spec_doc: String,
    template_doc: String,
    template: Template,
    digest: String,
}

impl Definition {
    /// Load and parse a definition file
    pub fn load(path: &Path, name: &str, major: u32, minor: u32) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read definition {}: {}", path.display(), e))
        })?;
        Self::parse(path, &content, name, major, minor)
    }

    pub fn parse(path: &Path, content: &str, name: &str, major: u32, minor: u32) -> Result<Self> {
        let documents = split_documents(content);
        let [spec_doc, template_doc]: [String; 2] = documents.try_into().map_err(|docs: Vec<String>| {
            Error::config(format!(
                "{} must contain exactly two yaml documents, found {}",
                path.display(),
                docs.len()
            ))
        })?;

        let spec: serde_yaml::Value = serde_yaml::from_str(&spec_doc).map_err(|e| {
            Error::config(format!("invalid spec document in {}: {}", path.display(), e))
        })?;
        let spec: Value = if spec.is_null() {
            Value::Object(Args::new())
        } else {
            serde_json::to_value(spec).map_err(|e| {
                Error::config(format!("spec document in {} is not a map: {}", path.display(), e))
            })?
        };

        let default_args = match spec.get("args") {
            None | Some(Value::Null) => Args::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(Error::config(format!(
                    "`args` in {} must be a map, got {}",
                    path.display(),
                    other
                )))
            }
        };

        let alias = match spec.get("alias") {
            None | Some(Value::Null) => HashMap::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| match v.as_str() {
                    Some(target) => Ok((k.clone(), target.to_string())),
                    None => Err(Error::config(format!(
                        "alias '{}' in {} must map to a name",
                        k,
                        path.display()
                    ))),
                })
                .collect::<Result<_>>()?,
            Some(other) => {
                return Err(Error::config(format!(
                    "`alias` in {} must be a map, got {}",
                    path.display(),
                    other
                )))
            }
        };

        let template = Template::parse(&template_doc)
            .map_err(|e| Error::config(format!("invalid template in {}: {}", path.display(), e)))?;

        // hashed as one array so part boundaries stay unambiguous
        let digest = hash_json(&json!([name, major, minor, spec_doc, template_doc]));

        Ok(Self {
            path: path.to_path_buf(),
            name: name.to_string(),
            major: Some(major),
            minor: Some(minor),
            parsed_major: major,
            parsed_minor: minor,
            default_args,
            alias,
            overrides: Args::new(),
            spec_doc,
            template_doc,
            template,
            digest,
        })
    }

    /// The same definition, reachable under a looser version request
    pub fn aliased(&self, major: Option<u32>, minor: Option<u32>, overrides: Args) -> Self {
        Self {
            major,
            minor,
            overrides,
            ..self.clone()
        }
    }

    /// Digest of name, concrete version and full file content
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Identity as requested (used on the call stack and for lookups)
    pub fn quest(&self) -> Quest {
        Quest::new(&self.name, self.major, self.minor, &self.digest)
    }

    /// Identity with the concrete version (used when writing records)
    pub fn stored_quest(&self) -> Quest {
        Quest::new(
            &self.name,
            Some(self.parsed_major),
            Some(self.parsed_minor),
            &self.digest,
        )
    }

    /// Fully versioned name, e.g. `humor_1_3`
    pub fn full_name(&self) -> String {
        format!("{}_{}_{}", self.name, self.parsed_major, self.parsed_minor)
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn spec_document(&self) -> &str {
        &self.spec_doc
    }

    pub fn template_document(&self) -> &str {
        &self.template_doc
    }

    /// The `method` declared in the defaults, if any
    pub fn default_method(&self) -> Option<&str> {
        self.default_args.get("method").and_then(Value::as_str)
    }
}

/// Split on lines consisting of `---`
///
/// A leading separator before the first document is ignored.
fn split_documents(content: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut seen_content = false;

    for line in content.lines() {
        if line.trim_end() == "---" {
            if seen_content {
                documents.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        seen_content = true;
        current.push(line);
    }
    documents.push(current.join("\n"));
    documents
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HUMOR: &str = r#"args:
  temperature: 0.0
  model: small
alias:
  tone: tone_1
---
method: openai
legal_answer_type: int
prompt:
  - user: "{{ post.content }}"
"#;

    #[test]
    fn test_parse_definition() {
        let def = Definition::parse(Path::new("humor_1_2.yaml"), HUMOR, "humor", 1, 2).unwrap();
        assert_eq!(def.name, "humor");
        assert_eq!(def.major, Some(1));
        assert_eq!(def.minor, Some(2));
        assert_eq!(def.default_args["model"], json!("small"));
        assert_eq!(def.alias["tone"], "tone_1");
        assert_eq!(def.full_name(), "humor_1_2");
        assert!(def.template_document().contains("legal_answer_type"));
    }

    #[test]
    fn test_empty_spec_document() {
        let content = "---\nmethod: static\nvalue: 3\n";
        // leading separator, then only one document
        assert!(Definition::parse(Path::new("x_0_0.yaml"), content, "x", 0, 0).is_err());

        let content = "\n---\nmethod: static\nvalue: 3\n";
        let def = Definition::parse(Path::new("x_0_0.yaml"), content, "x", 0, 0).unwrap();
        assert!(def.default_args.is_empty());
    }

    #[test]
    fn test_three_documents_rejected() {
        let content = "args: {}\n---\na: 1\n---\nb: 2\n";
        let err = Definition::parse(Path::new("x_0_0.yaml"), content, "x", 0, 0).unwrap_err();
        assert!(err.to_string().contains("exactly two"));
    }

    #[test]
    fn test_digest_depends_on_content_and_version() {
        let a = Definition::parse(Path::new("h_1_2.yaml"), HUMOR, "humor", 1, 2).unwrap();
        let b = Definition::parse(Path::new("h_1_3.yaml"), HUMOR, "humor", 1, 3).unwrap();
        let c = Definition::parse(
            Path::new("h_1_2.yaml"),
            &HUMOR.replace("small", "large"),
            "humor",
            1,
            2,
        )
        .unwrap();
        assert_ne!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_digest_separates_major_and_minor() {
        let a = Definition::parse(Path::new("q_1_11.yaml"), HUMOR, "q", 1, 11).unwrap();
        let b = Definition::parse(Path::new("q_11_1.yaml"), HUMOR, "q", 11, 1).unwrap();
        assert_ne!(a.digest(), b.digest());

        let c = Definition::parse(Path::new("q1_1_1.yaml"), HUMOR, "q1", 1, 1).unwrap();
        let d = Definition::parse(Path::new("q_11_1.yaml"), HUMOR, "q", 11, 1).unwrap();
        assert_ne!(c.digest(), d.digest());
    }

    #[test]
    fn test_aliased_keeps_digest() {
        let def = Definition::parse(Path::new("h_1_2.yaml"), HUMOR, "humor", 1, 2).unwrap();
        let alias = def.aliased(None, None, Args::new());
        assert_eq!(alias.digest(), def.digest());
        assert_eq!(alias.quest().major, None);
        assert_eq!(alias.stored_quest().major, Some(1));
    }
}
