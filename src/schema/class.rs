//! Configuration classes: the named records of the catalog.
//!
//! A [`ConfigClass`] is an immutable, ordered list of element
//! specifications plus accept rules for dynamically named elements and an
//! optional read/write backend binding.

use crate::error::{Error, Result};
use crate::schema::collection::{CheckListSpec, CollectionSpec};
use crate::schema::value::ValueSpec;
use crate::schema::warp::WarpSpec;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Display level of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Should be shown prominently.
    Important,
    /// Regular element.
    #[default]
    Normal,
    /// Skipped by default element access and iteration.
    Hidden,
}

/// Lifecycle status of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Regular element.
    #[default]
    Standard,
    /// Usable, but access warns once per process.
    Deprecated,
    /// Access fails.
    Obsolete,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Deprecated => write!(f, "deprecated"),
            Self::Obsolete => write!(f, "obsolete"),
        }
    }
}

/// The kind (and kind-specific schema) of an element.
#[derive(Debug, Clone)]
pub enum ElementKind {
    /// A typed leaf.
    Leaf(Arc<ValueSpec>),
    /// A keyed collection.
    Hash(Arc<CollectionSpec>),
    /// An ordered collection.
    List(Arc<CollectionSpec>),
    /// An ordered choice set with per-choice checked flags.
    CheckList(Arc<CheckListSpec>),
    /// A nested node of a fixed class.
    Node {
        /// Class name, resolved against the catalog.
        class: String,
    },
    /// A nested node whose class is chosen by warp masters.
    WarpedNode(Arc<WarpSpec>),
}

impl ElementKind {
    /// Short kind name used in error messages.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Leaf(_) => "leaf",
            Self::Hash(_) => "hash",
            Self::List(_) => "list",
            Self::CheckList(_) => "check_list",
            Self::Node { .. } => "node",
            Self::WarpedNode(_) => "warped_node",
        }
    }
}

/// The schema of one named element of a class.
#[derive(Debug, Clone)]
pub struct ElementSpec {
    /// Element name.
    pub name: String,
    /// Kind and kind-specific schema.
    pub kind: ElementKind,
    /// Display level.
    pub level: Level,
    /// Lifecycle status.
    pub status: Status,
    /// Long description.
    pub description: Option<String>,
    /// One-line summary.
    pub summary: Option<String>,
    /// Optional property warp following master leaves.
    pub warp: Option<Arc<WarpSpec>>,
}

impl ElementSpec {
    /// Creates a standard, normal-level element.
    #[must_use]
    pub fn new(name: &str, kind: ElementKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            level: Level::default(),
            status: Status::default(),
            description: None,
            summary: None,
            warp: None,
        }
    }

    /// Sets the display level.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Sets the lifecycle status.
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Sets the long description.
    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Sets the one-line summary.
    #[must_use]
    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = Some(summary.to_string());
        self
    }

    /// Attaches a property warp.
    #[must_use]
    pub fn with_warp(mut self, warp: WarpSpec) -> Self {
        self.warp = Some(Arc::new(warp));
        self
    }
}

/// Accept rule: unknown element names matching the pattern are admitted
/// using a cloned template spec.
#[derive(Debug, Clone)]
pub struct AcceptSpec {
    /// Names must fully match this pattern.
    pub pattern: Regex,
    /// Template cloned into the live model under the accepted name.
    pub template: ElementSpec,
    /// Element after which accepted names are inserted in order.
    pub after: Option<String>,
}

/// Read/write backend binding of a class.
#[derive(Debug, Clone)]
pub struct RwConfig {
    /// Registered backend name.
    pub backend: String,
    /// Directory relative to the instance root.
    pub config_dir: Option<PathBuf>,
    /// File name the backend reads and writes.
    pub file: Option<String>,
    /// Create the file on write-back when missing.
    pub auto_create: bool,
}

/// A named, immutable configuration class.
///
/// # Examples
///
/// ```
/// use arbor::schema::{ConfigClass, ElementKind, ElementSpec, ValueSpec, ValueType};
/// use std::sync::Arc;
///
/// let leaf = Arc::new(ValueSpec::builder(ValueType::String).build().unwrap());
/// let class = ConfigClass::new("Host")
///     .element(ElementSpec::new("fqdn", ElementKind::Leaf(leaf)))
///     .build()
///     .unwrap();
/// assert!(class.element("fqdn").is_some());
/// ```
#[derive(Debug, Clone)]
pub struct ConfigClass {
    /// Class name.
    pub name: String,
    /// Ordered element specifications.
    pub elements: Vec<ElementSpec>,
    /// Accept rules for dynamically named elements.
    pub accept: Vec<AcceptSpec>,
    /// Class documentation.
    pub class_description: Option<String>,
    /// Gist template with `{elt}` holes.
    pub gist: Option<String>,
    /// Backend binding, if the class is read from and written to a file.
    pub rw_config: Option<RwConfig>,
}

impl ConfigClass {
    /// Starts building a class.
    #[must_use]
    pub fn new(name: &str) -> ConfigClassBuilder {
        ConfigClassBuilder {
            name: name.to_string(),
            elements: Vec::new(),
            accept: Vec::new(),
            class_description: None,
            gist: None,
            rw_config: None,
        }
    }

    /// Looks up an element spec by name.
    #[must_use]
    pub fn element(&self, name: &str) -> Option<&ElementSpec> {
        self.elements.iter().find(|e| e.name == name)
    }

    /// Finds the accept rule matching an unknown name, if any.
    #[must_use]
    pub fn accept_for(&self, name: &str) -> Option<&AcceptSpec> {
        self.accept.iter().find(|a| a.pattern.is_match(name))
    }
}

/// Builder for [`ConfigClass`].
#[derive(Debug, Clone)]
pub struct ConfigClassBuilder {
    name: String,
    elements: Vec<ElementSpec>,
    accept: Vec<(String, ElementSpec, Option<String>)>,
    class_description: Option<String>,
    gist: Option<String>,
    rw_config: Option<RwConfig>,
}

impl ConfigClassBuilder {
    /// Appends an element.
    #[must_use]
    pub fn element(mut self, spec: ElementSpec) -> Self {
        self.elements.push(spec);
        self
    }

    /// Adds an accept rule.
    #[must_use]
    pub fn accept(mut self, pattern: &str, template: ElementSpec, after: Option<&str>) -> Self {
        self.accept
            .push((pattern.to_string(), template, after.map(str::to_string)));
        self
    }

    /// Sets the class documentation.
    #[must_use]
    pub fn description(mut self, text: &str) -> Self {
        self.class_description = Some(text.to_string());
        self
    }

    /// Sets the gist template.
    #[must_use]
    pub fn gist(mut self, template: &str) -> Self {
        self.gist = Some(template.to_string());
        self
    }

    /// Binds the class to a backend.
    #[must_use]
    pub fn rw_config(mut self, rw: RwConfig) -> Self {
        self.rw_config = Some(rw);
        self
    }

    /// Builds the class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] for duplicate element names, an empty
    /// class name, invalid accept patterns, or an `accept_after` target
    /// that is not a declared element.
    pub fn build(self) -> Result<ConfigClass> {
        if self.name.is_empty() {
            return Err(Error::model("config class requires a name"));
        }
        for (i, element) in self.elements.iter().enumerate() {
            if element.name.is_empty() {
                return Err(Error::model(format!(
                    "class '{}' has an unnamed element",
                    self.name
                )));
            }
            if self.elements[..i].iter().any(|e| e.name == element.name) {
                return Err(Error::model(format!(
                    "class '{}' declares element '{}' twice",
                    self.name, element.name
                )));
            }
        }

        let accept = self
            .accept
            .into_iter()
            .map(|(pattern, template, after)| {
                if let Some(ref target) = after {
                    if !self.elements.iter().any(|e| &e.name == target) {
                        return Err(Error::model(format!(
                            "accept_after '{target}' is not an element of class '{}'",
                            self.name
                        )));
                    }
                }
                Regex::new(&format!("^(?:{pattern})$"))
                    .map(|re| AcceptSpec {
                        pattern: re,
                        template,
                        after,
                    })
                    .map_err(|e| Error::model(format!("invalid accept pattern /{pattern}/: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ConfigClass {
            name: self.name,
            elements: self.elements,
            accept,
            class_description: self.class_description,
            gist: self.gist,
            rw_config: self.rw_config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::value::ValueType;

    fn leaf() -> ElementKind {
        ElementKind::Leaf(Arc::new(
            ValueSpec::builder(ValueType::String).build().unwrap(),
        ))
    }

    #[test]
    fn test_element_lookup_preserves_order() {
        let class = ConfigClass::new("C")
            .element(ElementSpec::new("b", leaf()))
            .element(ElementSpec::new("a", leaf()))
            .build()
            .unwrap();
        let names: Vec<_> = class.elements.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(class.element("a").is_some());
        assert!(class.element("zz").is_none());
    }

    #[test]
    fn test_duplicate_element_rejected() {
        let result = ConfigClass::new("C")
            .element(ElementSpec::new("a", leaf()))
            .element(ElementSpec::new("a", leaf()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_accept_pattern_is_anchored() {
        let class = ConfigClass::new("C")
            .accept("ip.*", ElementSpec::new("", leaf()), None)
            .build()
            .unwrap();
        assert!(class.accept_for("iptables").is_some());
        assert!(class.accept_for("xiptables").is_none());
    }

    #[test]
    fn test_accept_after_must_exist() {
        let result = ConfigClass::new("C")
            .accept("x.*", ElementSpec::new("", leaf()), Some("missing"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", Status::Deprecated), "deprecated");
    }
}
