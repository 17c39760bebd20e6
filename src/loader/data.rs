//! Structured-data sources for the loader.
//!
//! `=.file`, `=.json`, `=.yaml` and `=.env` read external data into the
//! tree. The json/yaml walker shares one rule: filesystem segments are
//! consumed until an existing plain file is found, the file is parsed
//! (and closed) inside the command, and the remaining segments project
//! through the parsed structure — string keys on maps, numeric indices
//! on arrays. Anything else is a [`Error::LoadData`], never a guess.

use crate::error::{Error, Result};
use crate::tree::{CheckPolicy, ItemId, ItemKind};
use crate::Instance;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Which parser the walker hands the file to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StructuredFormat {
    Json,
    Yaml,
}

/// Reads a whole file relative to the instance root; one trailing
/// newline is stripped.
pub(crate) fn read_file(root: &Path, path: &str) -> Result<String> {
    let full = resolve(root, path);
    let content = fs::read_to_string(&full).map_err(|e| Error::LoadData {
        path: full.display().to_string(),
        reason: format!("cannot read file: {e}"),
    })?;
    Ok(content
        .strip_suffix('\n')
        .map_or_else(|| content.clone(), str::to_string))
}

fn resolve(root: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    }
}

/// Walks a `file/segments…` spec: consumes path segments until a plain
/// file exists, parses it, then projects the remaining segments.
pub(crate) fn load_structured(
    root: &Path,
    spec: &str,
    format: StructuredFormat,
) -> Result<Value> {
    let segments: Vec<&str> = spec.split('/').filter(|s| !s.is_empty()).collect();
    let mut file_path = if spec.starts_with('/') {
        PathBuf::from("/")
    } else {
        root.to_path_buf()
    };
    let mut consumed = 0;
    for segment in &segments {
        file_path.push(segment);
        consumed += 1;
        if file_path.is_file() {
            break;
        }
    }
    if !file_path.is_file() {
        return Err(Error::LoadData {
            path: spec.to_string(),
            reason: "no plain file found along the path".to_string(),
        });
    }

    let text = fs::read_to_string(&file_path)?;
    let mut remaining = &segments[consumed..];

    let parsed = match format {
        StructuredFormat::Json => {
            serde_json::from_str(&text).map_err(|e| Error::LoadData {
                path: file_path.display().to_string(),
                reason: format!("invalid JSON: {e}"),
            })?
        }
        StructuredFormat::Yaml => {
            // A leading `N#` segment selects one document of a
            // multi-document stream; default is the first.
            let mut doc_index = 0usize;
            if let Some(first) = remaining.first() {
                if let Some(number) = first.strip_suffix('#') {
                    if let Ok(index) = number.parse() {
                        doc_index = index;
                        remaining = &remaining[1..];
                    }
                }
            }
            let mut selected = None;
            for (i, document) in serde_yaml::Deserializer::from_str(&text).enumerate() {
                let value = serde_yaml::Value::deserialize(document).map_err(|e| {
                    Error::LoadData {
                        path: file_path.display().to_string(),
                        reason: format!("invalid YAML: {e}"),
                    }
                })?;
                if i == doc_index {
                    selected = Some(value);
                    break;
                }
            }
            let yaml = selected.ok_or_else(|| Error::LoadData {
                path: file_path.display().to_string(),
                reason: format!("YAML stream has no document {doc_index}"),
            })?;
            serde_json::to_value(yaml).map_err(|e| Error::LoadData {
                path: file_path.display().to_string(),
                reason: format!("cannot represent YAML document: {e}"),
            })?
        }
    };

    project(spec, parsed, remaining)
}

fn project(spec: &str, mut value: Value, segments: &[&str]) -> Result<Value> {
    for segment in segments {
        value = match value {
            Value::Object(mut map) => map.remove(*segment).ok_or_else(|| Error::LoadData {
                path: spec.to_string(),
                reason: format!("map has no key '{segment}'"),
            })?,
            Value::Array(mut array) => {
                let index: usize = segment.parse().map_err(|_| Error::LoadData {
                    path: spec.to_string(),
                    reason: format!("array index '{segment}' is not an integer"),
                })?;
                if index >= array.len() {
                    return Err(Error::LoadData {
                        path: spec.to_string(),
                        reason: format!("array has no index {index}"),
                    });
                }
                array.swap_remove(index)
            }
            other => {
                return Err(Error::LoadData {
                    path: spec.to_string(),
                    reason: format!(
                        "cannot descend into {} with '{segment}'",
                        kind_name(&other)
                    ),
                })
            }
        };
    }
    Ok(value)
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

/// Converts a projected value to leaf text.
pub(crate) fn expect_scalar(spec: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(Error::LoadData {
            path: spec.to_string(),
            reason: format!("expected a scalar, found {}", kind_name(other)),
        }),
    }
}

/// Applies a projected structure to a collection: maps feed hashes,
/// arrays feed lists.
pub(crate) fn apply_to_collection(
    instance: &mut Instance,
    coll: ItemId,
    spec: &str,
    value: &Value,
    check: CheckPolicy,
) -> Result<()> {
    match (instance.kind_of(coll), value) {
        (ItemKind::Hash, Value::Object(map)) => {
            for (key, entry) in map {
                let scalar = expect_scalar(spec, entry)?;
                instance.coll_store(coll, key, Some(&scalar), check)?;
            }
            Ok(())
        }
        (ItemKind::List, Value::Array(array)) => {
            let scalars: Vec<String> = array
                .iter()
                .map(|entry| expect_scalar(spec, entry))
                .collect::<Result<_>>()?;
            let strs: Vec<&str> = scalars.iter().map(String::as_str).collect();
            instance.coll_load(coll, &strs, check)
        }
        (kind, other) => Err(Error::LoadData {
            path: spec.to_string(),
            reason: format!("cannot load {} into a {kind}", kind_name(other)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_file_strips_one_trailing_newline() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("note.txt"), "hello\n").unwrap();
        assert_eq!(read_file(dir.path(), "note.txt").unwrap(), "hello");
        fs::write(dir.path().join("two.txt"), "hello\n\n").unwrap();
        assert_eq!(read_file(dir.path(), "two.txt").unwrap(), "hello\n");
    }

    #[test]
    fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(read_file(dir.path(), "absent.txt").is_err());
    }

    #[test]
    fn test_json_projection() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("conf.json"),
            r#"{"a": {"b": [10, 20, 30]}}"#,
        )
        .unwrap();
        let value =
            load_structured(dir.path(), "conf.json/a/b/1", StructuredFormat::Json).unwrap();
        assert_eq!(expect_scalar("conf.json/a/b/1", &value).unwrap(), "20");
    }

    #[test]
    fn test_json_missing_key_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("conf.json"), r#"{"a": 1}"#).unwrap();
        let result = load_structured(dir.path(), "conf.json/zz", StructuredFormat::Json);
        assert!(result.is_err());
    }

    #[test]
    fn test_json_numeric_segment_on_map_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("conf.json"), r#"{"a": 1}"#).unwrap();
        let result = load_structured(dir.path(), "conf.json/0", StructuredFormat::Json);
        assert!(result.is_err());
    }

    #[test]
    fn test_json_descend_into_scalar_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("conf.json"), r#"{"a": 1}"#).unwrap();
        let result = load_structured(dir.path(), "conf.json/a/b", StructuredFormat::Json);
        assert!(result.is_err());
    }

    #[test]
    fn test_yaml_document_selection() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("conf.yaml"), "a: 1\n---\na: 2\n").unwrap();
        let value =
            load_structured(dir.path(), "conf.yaml/1#/a", StructuredFormat::Yaml).unwrap();
        assert_eq!(expect_scalar("conf.yaml/1#/a", &value).unwrap(), "2");
        let value = load_structured(dir.path(), "conf.yaml/a", StructuredFormat::Yaml).unwrap();
        assert_eq!(expect_scalar("conf.yaml/a", &value).unwrap(), "1");
    }

    #[test]
    fn test_walker_stops_at_first_plain_file() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("etc");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("conf.json"), r#"{"key": "value"}"#).unwrap();
        let value = load_structured(
            dir.path(),
            "etc/conf.json/key",
            StructuredFormat::Json,
        )
        .unwrap();
        assert_eq!(expect_scalar("etc/conf.json/key", &value).unwrap(), "value");
    }

    #[test]
    fn test_no_file_along_path() {
        let dir = TempDir::new().unwrap();
        let result = load_structured(dir.path(), "missing/conf.json/a", StructuredFormat::Json);
        assert!(result.is_err());
    }
}
