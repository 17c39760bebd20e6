//! Collection schema: hashes, lists and check-lists.
//!
//! A [`CollectionSpec`] governs what a hash or list may contain: the
//! index type and bounds, key whitelists and patterns, cardinality,
//! duplicate policy, default and migrated keys, and the cargo held at
//! each entry.

use crate::error::{Error, Result};
use crate::schema::value::{CaseConvert, ValueSpec};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Index type of a hash; lists always use dense integer indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// String keys.
    String,
    /// Integer keys (parsed and bound-checked).
    Integer,
}

/// What to do when `check_content` finds duplicate values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatesPolicy {
    /// Duplicates are fine.
    #[default]
    Allow,
    /// Duplicates are hard errors.
    Forbid,
    /// Duplicates are warnings; the fix removes later occurrences.
    Warn,
    /// Later occurrences are silently removed.
    Suppress,
}

impl fmt::Display for DuplicatesPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Forbid => write!(f, "forbid"),
            Self::Warn => write!(f, "warn"),
            Self::Suppress => write!(f, "suppress"),
        }
    }
}

/// What each collection entry holds.
#[derive(Debug, Clone)]
pub enum CargoSpec {
    /// Entries are leaves sharing this spec.
    Leaf(Arc<ValueSpec>),
    /// Entries are nodes of the named class.
    Node {
        /// Class name, resolved against the catalog.
        class: String,
    },
}

/// The immutable schema of one hash or list element.
///
/// # Examples
///
/// ```
/// use arbor::schema::{CargoSpec, CollectionSpec, ValueSpec, ValueType};
/// use std::sync::Arc;
///
/// let leaf = Arc::new(ValueSpec::builder(ValueType::String).build().unwrap());
/// let spec = CollectionSpec::hash(CargoSpec::Leaf(leaf))
///     .max_nb(8)
///     .build()
///     .unwrap();
/// assert_eq!(spec.max_nb, Some(8));
/// ```
#[derive(Debug, Clone)]
pub struct CollectionSpec {
    /// Hash index type. Lists ignore this and use dense integers.
    pub index_type: IndexType,
    /// Minimum legal integer index.
    pub min_index: Option<i64>,
    /// Maximum legal integer index.
    pub max_index: Option<i64>,
    /// Maximum number of entries.
    pub max_nb: Option<usize>,
    /// Keys created lazily when an empty collection is first enumerated.
    pub default_keys: Vec<String>,
    /// Like `default_keys`, but each key runs a loader program on its
    /// freshly created entry.
    pub default_with_init: Vec<(String, String)>,
    /// Legal keys are the live keys of this referenced collection.
    pub follow_keys_from: Option<String>,
    /// Explicit key whitelist.
    pub allow_keys: Vec<String>,
    /// Whitelist taken from the live keys of this referenced collection.
    pub allow_keys_from: Option<String>,
    /// Keys must match this pattern.
    pub allow_keys_matching: Option<Regex>,
    /// Hash keys created eagerly at instantiation.
    pub auto_create_keys: Vec<String>,
    /// Number of list ids created eagerly at instantiation.
    pub auto_create_ids: Option<usize>,
    /// Warn when a key matches.
    pub warn_if_key_match: Option<Regex>,
    /// Warn when a key does not match.
    pub warn_unless_key_match: Option<Regex>,
    /// Duplicate-value policy for `check_content`.
    pub duplicates: DuplicatesPolicy,
    /// Copy the keys of this collection once after initial load.
    pub migrate_keys_from: Option<String>,
    /// Copy keys and values of this collection once after initial load.
    pub migrate_values_from: Option<String>,
    /// Whether the hash preserves and exposes entry order operations.
    pub ordered: bool,
    /// Case conversion applied to keys.
    pub convert: Option<CaseConvert>,
    /// Whether a backend should write entries whose value is empty.
    pub write_empty_value: bool,
    /// What each entry holds.
    pub cargo: CargoSpec,
}

impl CollectionSpec {
    /// Starts building a hash spec.
    #[must_use]
    pub fn hash(cargo: CargoSpec) -> CollectionSpecBuilder {
        CollectionSpecBuilder::new(cargo, false)
    }

    /// Starts building a list spec.
    #[must_use]
    pub fn list(cargo: CargoSpec) -> CollectionSpecBuilder {
        CollectionSpecBuilder::new(cargo, true)
    }

    /// Applies key case conversion.
    #[must_use]
    pub fn convert_key(&self, key: &str) -> String {
        match self.convert {
            Some(convert) => convert.apply(key),
            None => key.to_string(),
        }
    }
}

/// Builder for [`CollectionSpec`].
#[derive(Debug, Clone)]
pub struct CollectionSpecBuilder {
    is_list: bool,
    index_type: IndexType,
    min_index: Option<i64>,
    max_index: Option<i64>,
    max_nb: Option<usize>,
    default_keys: Vec<String>,
    default_with_init: Vec<(String, String)>,
    follow_keys_from: Option<String>,
    allow_keys: Vec<String>,
    allow_keys_from: Option<String>,
    allow_keys_matching: Option<String>,
    auto_create_keys: Vec<String>,
    auto_create_ids: Option<usize>,
    warn_if_key_match: Option<String>,
    warn_unless_key_match: Option<String>,
    duplicates: DuplicatesPolicy,
    migrate_keys_from: Option<String>,
    migrate_values_from: Option<String>,
    ordered: bool,
    convert: Option<CaseConvert>,
    write_empty_value: bool,
    cargo: CargoSpec,
}

impl CollectionSpecBuilder {
    fn new(cargo: CargoSpec, is_list: bool) -> Self {
        Self {
            is_list,
            index_type: if is_list {
                IndexType::Integer
            } else {
                IndexType::String
            },
            min_index: None,
            max_index: None,
            max_nb: None,
            default_keys: Vec::new(),
            default_with_init: Vec::new(),
            follow_keys_from: None,
            allow_keys: Vec::new(),
            allow_keys_from: None,
            allow_keys_matching: None,
            auto_create_keys: Vec::new(),
            auto_create_ids: None,
            warn_if_key_match: None,
            warn_unless_key_match: None,
            duplicates: DuplicatesPolicy::default(),
            migrate_keys_from: None,
            migrate_values_from: None,
            ordered: false,
            convert: None,
            write_empty_value: false,
            cargo,
        }
    }

    /// Sets the hash index type.
    #[must_use]
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    /// Sets the minimum legal integer index.
    #[must_use]
    pub fn min_index(mut self, min: i64) -> Self {
        self.min_index = Some(min);
        self
    }

    /// Sets the maximum legal integer index.
    #[must_use]
    pub fn max_index(mut self, max: i64) -> Self {
        self.max_index = Some(max);
        self
    }

    /// Caps the number of entries.
    #[must_use]
    pub fn max_nb(mut self, max: usize) -> Self {
        self.max_nb = Some(max);
        self
    }

    /// Sets the lazily created default keys.
    #[must_use]
    pub fn default_keys(mut self, keys: &[&str]) -> Self {
        self.default_keys = keys.iter().map(|k| (*k).to_string()).collect();
        self
    }

    /// Adds a default key initialized by a loader program.
    #[must_use]
    pub fn default_with_init(mut self, key: &str, program: &str) -> Self {
        self.default_with_init
            .push((key.to_string(), program.to_string()));
        self
    }

    /// Legal keys follow the live keys of the referenced collection.
    #[must_use]
    pub fn follow_keys_from(mut self, path: &str) -> Self {
        self.follow_keys_from = Some(path.to_string());
        self
    }

    /// Sets the explicit key whitelist.
    #[must_use]
    pub fn allow_keys(mut self, keys: &[&str]) -> Self {
        self.allow_keys = keys.iter().map(|k| (*k).to_string()).collect();
        self
    }

    /// Whitelist from the live keys of the referenced collection.
    #[must_use]
    pub fn allow_keys_from(mut self, path: &str) -> Self {
        self.allow_keys_from = Some(path.to_string());
        self
    }

    /// Keys must match the pattern.
    #[must_use]
    pub fn allow_keys_matching(mut self, pattern: &str) -> Self {
        self.allow_keys_matching = Some(pattern.to_string());
        self
    }

    /// Hash keys created eagerly at instantiation.
    #[must_use]
    pub fn auto_create_keys(mut self, keys: &[&str]) -> Self {
        self.auto_create_keys = keys.iter().map(|k| (*k).to_string()).collect();
        self
    }

    /// Number of list ids created eagerly at instantiation.
    #[must_use]
    pub fn auto_create_ids(mut self, count: usize) -> Self {
        self.auto_create_ids = Some(count);
        self
    }

    /// Warn when a key matches the pattern.
    #[must_use]
    pub fn warn_if_key_match(mut self, pattern: &str) -> Self {
        self.warn_if_key_match = Some(pattern.to_string());
        self
    }

    /// Warn when a key does not match the pattern.
    #[must_use]
    pub fn warn_unless_key_match(mut self, pattern: &str) -> Self {
        self.warn_unless_key_match = Some(pattern.to_string());
        self
    }

    /// Sets the duplicate-value policy.
    #[must_use]
    pub fn duplicates(mut self, policy: DuplicatesPolicy) -> Self {
        self.duplicates = policy;
        self
    }

    /// Copies the keys of the referenced collection once after initial
    /// load.
    #[must_use]
    pub fn migrate_keys_from(mut self, path: &str) -> Self {
        self.migrate_keys_from = Some(path.to_string());
        self
    }

    /// Copies keys and values of the referenced collection once after
    /// initial load.
    #[must_use]
    pub fn migrate_values_from(mut self, path: &str) -> Self {
        self.migrate_values_from = Some(path.to_string());
        self
    }

    /// Marks the hash ordered (enables move/swap operations).
    #[must_use]
    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }

    /// Applies case conversion to keys.
    #[must_use]
    pub fn convert(mut self, convert: CaseConvert) -> Self {
        self.convert = Some(convert);
        self
    }

    /// Backends should write entries whose value is empty.
    #[must_use]
    pub fn write_empty_value(mut self) -> Self {
        self.write_empty_value = true;
        self
    }

    /// Builds the spec, performing the model consistency checks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] for inconsistent schemas: index bounds
    /// on a string-indexed hash, `ordered` on a list, list-only or
    /// hash-only options on the wrong variant, conflicting key sources,
    /// or invalid patterns.
    pub fn build(self) -> Result<CollectionSpec> {
        if self.is_list {
            if self.ordered {
                return Err(Error::model("lists are inherently ordered"));
            }
            if !self.auto_create_keys.is_empty() || !self.default_keys.is_empty() {
                return Err(Error::model(
                    "default_keys/auto_create_keys are hash options; lists use auto_create_ids",
                ));
            }
        } else if self.auto_create_ids.is_some() {
            return Err(Error::model(
                "auto_create_ids is a list option; hashes use auto_create_keys",
            ));
        }
        if self.index_type == IndexType::String
            && (self.min_index.is_some() || self.max_index.is_some())
            && !self.is_list
        {
            return Err(Error::model(
                "min_index/max_index require an integer index type",
            ));
        }
        let key_sources = [
            !self.allow_keys.is_empty(),
            self.allow_keys_from.is_some(),
            self.follow_keys_from.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count();
        if key_sources > 1 {
            return Err(Error::model(
                "allow_keys, allow_keys_from and follow_keys_from are mutually exclusive",
            ));
        }

        let compile = |pattern: Option<String>, what: &str| {
            pattern
                .map(|p| {
                    Regex::new(&p)
                        .map_err(|e| Error::model(format!("invalid {what} pattern /{p}/: {e}")))
                })
                .transpose()
        };
        let allow_keys_matching = compile(self.allow_keys_matching, "allow_keys_matching")?;
        let warn_if_key_match = compile(self.warn_if_key_match, "warn_if_key_match")?;
        let warn_unless_key_match = compile(self.warn_unless_key_match, "warn_unless_key_match")?;

        Ok(CollectionSpec {
            index_type: if self.is_list {
                IndexType::Integer
            } else {
                self.index_type
            },
            min_index: self.min_index,
            max_index: self.max_index,
            max_nb: self.max_nb,
            default_keys: self.default_keys,
            default_with_init: self.default_with_init,
            follow_keys_from: self.follow_keys_from,
            allow_keys: self.allow_keys,
            allow_keys_from: self.allow_keys_from,
            allow_keys_matching,
            auto_create_keys: self.auto_create_keys,
            auto_create_ids: self.auto_create_ids,
            warn_if_key_match,
            warn_unless_key_match,
            duplicates: self.duplicates,
            migrate_keys_from: self.migrate_keys_from,
            migrate_values_from: self.migrate_values_from,
            ordered: self.ordered,
            convert: self.convert,
            write_empty_value: self.write_empty_value,
            cargo: self.cargo,
        })
    }
}

/// Schema of a check-list element: an ordered choice set with a checked
/// flag per choice.
#[derive(Debug, Clone)]
pub struct CheckListSpec {
    /// The ordered choice set.
    pub choice: Vec<String>,
    /// Choices checked by default.
    pub default_checked: Vec<String>,
}

impl CheckListSpec {
    /// Creates a check-list spec.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] when the choice set is empty or a
    /// default is not a choice.
    pub fn new(choice: &[&str], default_checked: &[&str]) -> Result<Self> {
        if choice.is_empty() {
            return Err(Error::model("check_list requires a choice list"));
        }
        let choice: Vec<String> = choice.iter().map(|c| (*c).to_string()).collect();
        for item in default_checked {
            if !choice.iter().any(|c| c == item) {
                return Err(Error::model(format!(
                    "check_list default '{item}' is not a choice"
                )));
            }
        }
        Ok(Self {
            choice,
            default_checked: default_checked.iter().map(|c| (*c).to_string()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::value::ValueType;

    fn string_cargo() -> CargoSpec {
        CargoSpec::Leaf(Arc::new(
            ValueSpec::builder(ValueType::String).build().unwrap(),
        ))
    }

    #[test]
    fn test_hash_spec_defaults() {
        let spec = CollectionSpec::hash(string_cargo()).build().unwrap();
        assert_eq!(spec.index_type, IndexType::String);
        assert_eq!(spec.duplicates, DuplicatesPolicy::Allow);
        assert!(!spec.ordered);
    }

    #[test]
    fn test_list_rejects_hash_options() {
        assert!(CollectionSpec::list(string_cargo()).ordered().build().is_err());
        assert!(CollectionSpec::list(string_cargo())
            .default_keys(&["a"])
            .build()
            .is_err());
    }

    #[test]
    fn test_hash_rejects_auto_create_ids() {
        assert!(CollectionSpec::hash(string_cargo())
            .auto_create_ids(3)
            .build()
            .is_err());
    }

    #[test]
    fn test_index_bounds_require_integer_type() {
        assert!(CollectionSpec::hash(string_cargo())
            .min_index(0)
            .build()
            .is_err());
        assert!(CollectionSpec::hash(string_cargo())
            .index_type(IndexType::Integer)
            .min_index(0)
            .max_index(9)
            .build()
            .is_ok());
    }

    #[test]
    fn test_key_sources_mutually_exclusive() {
        assert!(CollectionSpec::hash(string_cargo())
            .allow_keys(&["a"])
            .follow_keys_from("- other")
            .build()
            .is_err());
    }

    #[test]
    fn test_invalid_key_pattern() {
        assert!(CollectionSpec::hash(string_cargo())
            .allow_keys_matching("[unclosed")
            .build()
            .is_err());
    }

    #[test]
    fn test_convert_key() {
        let spec = CollectionSpec::hash(string_cargo())
            .convert(CaseConvert::Lc)
            .build()
            .unwrap();
        assert_eq!(spec.convert_key("ABC"), "abc");
    }

    #[test]
    fn test_check_list_spec() {
        let spec = CheckListSpec::new(&["a", "b", "c"], &["b"]).unwrap();
        assert_eq!(spec.choice.len(), 3);
        assert!(CheckListSpec::new(&[], &[]).is_err());
        assert!(CheckListSpec::new(&["a"], &["z"]).is_err());
    }
}
