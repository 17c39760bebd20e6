//! Backend interface: reading and writing the tree through files.
//!
//! Backends populate the tree through the same store operations user
//! code uses, invoked by the instance in initial-load mode, and write it
//! back from the `backend` fetch mode. The engine ships one built-in
//! [`YamlBackend`]; anything else registers through [`BackendRegistry`].

use crate::error::{Error, Result};
use crate::loader::data::expect_scalar;
use crate::tree::{CheckPolicy, FetchMode, ItemId, ItemKind};
use crate::Instance;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// A file-format backend.
///
/// `read` is invoked in initial-load mode: stores made through the
/// instance do not pollute the change log unless a model transform
/// alters the incoming value. `write` serializes what the `backend`
/// fetch mode resolves.
pub trait Backend {
    /// Registry name of the backend.
    fn name(&self) -> &str;

    /// Whether the backend round-trips annotations (comments).
    fn supports_annotation(&self) -> bool {
        false
    }

    /// Populates `node` from `dir/file`. Returns false when the file
    /// does not exist (which is not an error).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Syntax`] (or any store error) on malformed
    /// content.
    fn read(
        &self,
        instance: &mut Instance,
        node: ItemId,
        dir: &Path,
        file: &str,
        check: CheckPolicy,
    ) -> Result<bool>;

    /// Writes `node` to `dir/file`. Returns false when there was nothing
    /// to write.
    ///
    /// # Errors
    ///
    /// Returns I/O or serialization errors.
    fn write(&self, instance: &mut Instance, node: ItemId, dir: &Path, file: &str)
        -> Result<bool>;
}

/// Maps backend names to boxed implementations.
#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Box<dyn Backend>>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend under its own name; a previous backend of the
    /// same name is replaced.
    pub fn register(&mut self, backend: Box<dyn Backend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    /// Looks up a backend.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Backend> {
        self.backends.get(name).map(AsRef::as_ref)
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Built-in YAML backend: maps become nodes and hashes, sequences become
/// lists, scalars become leaves.
#[derive(Debug, Default)]
pub struct YamlBackend;

impl Backend for YamlBackend {
    fn name(&self) -> &str {
        "yaml"
    }

    fn read(
        &self,
        instance: &mut Instance,
        node: ItemId,
        dir: &Path,
        file: &str,
        check: CheckPolicy,
    ) -> Result<bool> {
        let path = dir.join(file);
        if !path.exists() {
            return Ok(false);
        }
        let text = std::fs::read_to_string(&path)?;
        let yaml: serde_yaml::Value = serde_yaml::from_str(&text)
            .map_err(|e| Error::from(e).with_location(&path.display().to_string(), 0))?;
        let value = serde_json::to_value(yaml).map_err(|e| Error::Syntax {
            file: path.display().to_string(),
            line: 0,
            reason: e.to_string(),
        })?;
        apply_to_node(instance, node, &value, check)?;
        Ok(true)
    }

    fn write(
        &self,
        instance: &mut Instance,
        node: ItemId,
        dir: &Path,
        file: &str,
    ) -> Result<bool> {
        let value = node_to_value(instance, node)?;
        if value.as_object().is_some_and(Map::is_empty) {
            return Ok(false);
        }
        let text = serde_yaml::to_string(&value).map_err(Error::from)?;
        std::fs::write(dir.join(file), text)?;
        Ok(true)
    }
}

/// Applies a parsed map onto a node through the regular store
/// operations.
pub fn apply_to_node(
    instance: &mut Instance,
    node: ItemId,
    value: &Value,
    check: CheckPolicy,
) -> Result<()> {
    let Value::Object(map) = value else {
        return Err(Error::LoadData {
            path: instance.path_of(node),
            reason: format!("expected a map for a node, found {value}"),
        });
    };
    for (name, entry) in map {
        let Some(element) = instance.fetch_element(node, name, check, true, false)? else {
            continue;
        };
        apply_to_item(instance, element, entry, check)?;
    }
    Ok(())
}

fn apply_to_item(
    instance: &mut Instance,
    item: ItemId,
    value: &Value,
    check: CheckPolicy,
) -> Result<()> {
    // A null marks an entry that exists without content.
    if value.is_null() {
        return Ok(());
    }
    let path = instance.path_of(item);
    match instance.kind_of(item) {
        ItemKind::Leaf => {
            let scalar = expect_scalar(&path, value)?;
            instance.store(item, Some(&scalar), check, false)?;
        }
        ItemKind::Node => apply_to_node(instance, item, value, check)?,
        ItemKind::Hash => {
            let Value::Object(map) = value else {
                return Err(Error::LoadData {
                    path,
                    reason: format!("expected a map for a hash, found {value}"),
                });
            };
            for (key, entry) in map {
                let Some(cargo) = instance.coll_get(item, key, true)? else {
                    continue;
                };
                apply_to_item(instance, cargo, entry, check)?;
            }
        }
        ItemKind::List => {
            let Value::Array(array) = value else {
                return Err(Error::LoadData {
                    path,
                    reason: format!("expected a sequence for a list, found {value}"),
                });
            };
            for (index, entry) in array.iter().enumerate() {
                let Some(cargo) = instance.coll_get(item, &index.to_string(), true)? else {
                    continue;
                };
                apply_to_item(instance, cargo, entry, check)?;
            }
        }
        ItemKind::CheckList => {
            let Value::Array(array) = value else {
                return Err(Error::LoadData {
                    path,
                    reason: format!("expected a sequence for a check_list, found {value}"),
                });
            };
            let items: Vec<String> = array
                .iter()
                .map(|entry| expect_scalar(&path, entry))
                .collect::<Result<_>>()?;
            instance.checklist_store(item, &items.join(","))?;
        }
    }
    Ok(())
}

/// Serializes what the `backend` fetch mode resolves into a JSON value
/// (written out as YAML by the built-in backend).
pub fn node_to_value(instance: &mut Instance, node: ItemId) -> Result<Value> {
    let mut map = Map::new();
    for name in instance.children(node, true)? {
        let Some(element) = instance.fetch_element(node, &name, CheckPolicy::Skip, false, true)?
        else {
            continue;
        };
        let value = item_to_value(instance, element)?;
        if !value.is_null() {
            map.insert(name, value);
        }
    }
    Ok(Value::Object(map))
}

fn item_to_value(instance: &mut Instance, item: ItemId) -> Result<Value> {
    match instance.kind_of(item) {
        ItemKind::Leaf => {
            if !instance.has_data(item)? {
                return Ok(Value::Null);
            }
            let content = instance.fetch(item, FetchMode::Backend, CheckPolicy::Skip, true)?;
            Ok(content.map_or(Value::Null, Value::String))
        }
        ItemKind::Node => {
            let value = node_to_value(instance, item)?;
            if value.as_object().is_some_and(Map::is_empty) {
                Ok(Value::Null)
            } else {
                Ok(value)
            }
        }
        ItemKind::Hash => {
            let write_empty = instance.coll_data(item)?.spec.write_empty_value;
            let mut map = Map::new();
            for key in instance.coll_keys(item)? {
                let Some(cargo) = instance.coll_get(item, &key, false)? else {
                    continue;
                };
                let value = item_to_value(instance, cargo)?;
                if !value.is_null() || write_empty {
                    map.insert(key, value);
                }
            }
            if map.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::Object(map))
            }
        }
        ItemKind::List => {
            let write_empty = instance.coll_data(item)?.spec.write_empty_value;
            let mut array = Vec::new();
            for key in instance.coll_keys(item)? {
                let Some(cargo) = instance.coll_get(item, &key, false)? else {
                    continue;
                };
                let value = item_to_value(instance, cargo)?;
                if !value.is_null() || write_empty {
                    array.push(value);
                }
            }
            if array.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::Array(array))
            }
        }
        ItemKind::CheckList => {
            let checked = instance.checklist_checked(item)?;
            if checked.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::Array(checked.into_iter().map(Value::String).collect()))
            }
        }
    }
}
