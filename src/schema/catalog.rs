//! The catalog: registry of configuration classes.

use crate::error::{Error, Result};
use crate::schema::class::{ConfigClass, ElementKind};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maps class names to their immutable [`ConfigClass`] definitions.
///
/// The catalog is built once, checked for cross-class consistency, then
/// shared (via `Arc`) by every instance using it.
///
/// # Examples
///
/// ```
/// use arbor::schema::{Catalog, ConfigClass};
///
/// let mut catalog = Catalog::new();
/// catalog.add_class(ConfigClass::new("Master").build().unwrap()).unwrap();
/// assert!(catalog.get("Master").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    classes: BTreeMap<String, Arc<ConfigClass>>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] when a class of that name already exists.
    pub fn add_class(&mut self, class: ConfigClass) -> Result<()> {
        if self.classes.contains_key(&class.name) {
            return Err(Error::model(format!(
                "class '{}' is already registered",
                class.name
            )));
        }
        self.classes.insert(class.name.clone(), Arc::new(class));
        Ok(())
    }

    /// Looks up a class by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ConfigClass>> {
        self.classes.get(name).cloned()
    }

    /// Looks up a class, failing with a model error when absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] when the class is unknown.
    pub fn require(&self, name: &str) -> Result<Arc<ConfigClass>> {
        self.get(name)
            .ok_or_else(|| Error::model(format!("unknown config class '{name}'")))
    }

    /// Registered class names, sorted.
    #[must_use]
    pub fn class_names(&self) -> Vec<&str> {
        self.classes.keys().map(String::as_str).collect()
    }

    /// Verifies cross-class consistency: every node element and every
    /// warp rule must reference a registered class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] naming the first dangling reference.
    pub fn check(&self) -> Result<()> {
        for class in self.classes.values() {
            for element in &class.elements {
                match &element.kind {
                    ElementKind::Node { class: target } => {
                        if !self.classes.contains_key(target) {
                            return Err(Error::model(format!(
                                "element '{}' of class '{}' references unknown class '{target}'",
                                element.name, class.name
                            )));
                        }
                    }
                    ElementKind::WarpedNode(warp) => {
                        for rule in &warp.rules {
                            if let Some(ref target) = rule.effects.node_class {
                                if !self.classes.contains_key(target) {
                                    return Err(Error::model(format!(
                                        "warp rule of element '{}' in class '{}' references \
                                         unknown class '{target}'",
                                        element.name, class.name
                                    )));
                                }
                            }
                        }
                    }
                    ElementKind::Hash(spec) | ElementKind::List(spec) => {
                        if let crate::schema::collection::CargoSpec::Node { class: target } =
                            &spec.cargo
                        {
                            if !self.classes.contains_key(target) {
                                return Err(Error::model(format!(
                                    "cargo of element '{}' in class '{}' references unknown \
                                     class '{target}'",
                                    element.name, class.name
                                )));
                            }
                        }
                    }
                    ElementKind::Leaf(_) | ElementKind::CheckList(_) => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::class::ElementSpec;
    use crate::schema::collection::{CargoSpec, CollectionSpec};
    use crate::schema::value::{ValueSpec, ValueType};

    #[test]
    fn test_duplicate_class_rejected() {
        let mut catalog = Catalog::new();
        catalog
            .add_class(ConfigClass::new("A").build().unwrap())
            .unwrap();
        assert!(catalog
            .add_class(ConfigClass::new("A").build().unwrap())
            .is_err());
    }

    #[test]
    fn test_require_unknown_class() {
        let catalog = Catalog::new();
        assert!(catalog.require("Nope").is_err());
    }

    #[test]
    fn test_check_catches_dangling_node_class() {
        let mut catalog = Catalog::new();
        catalog
            .add_class(
                ConfigClass::new("Root")
                    .element(ElementSpec::new(
                        "child",
                        ElementKind::Node {
                            class: "Missing".to_string(),
                        },
                    ))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        assert!(catalog.check().is_err());
    }

    #[test]
    fn test_check_catches_dangling_cargo_class() {
        let mut catalog = Catalog::new();
        let hash = CollectionSpec::hash(CargoSpec::Node {
            class: "Missing".to_string(),
        })
        .build()
        .unwrap();
        catalog
            .add_class(
                ConfigClass::new("Root")
                    .element(ElementSpec::new(
                        "entries",
                        ElementKind::Hash(std::sync::Arc::new(hash)),
                    ))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        assert!(catalog.check().is_err());
    }

    #[test]
    fn test_check_passes_consistent_catalog() {
        let mut catalog = Catalog::new();
        let leaf = std::sync::Arc::new(ValueSpec::builder(ValueType::String).build().unwrap());
        catalog
            .add_class(
                ConfigClass::new("Child")
                    .element(ElementSpec::new("leaf", ElementKind::Leaf(leaf)))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        catalog
            .add_class(
                ConfigClass::new("Root")
                    .element(ElementSpec::new(
                        "child",
                        ElementKind::Node {
                            class: "Child".to_string(),
                        },
                    ))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        assert!(catalog.check().is_ok());
        assert_eq!(catalog.class_names(), vec!["Child", "Root"]);
    }
}
