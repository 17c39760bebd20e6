//! The live configuration tree.
//!
//! An [`Instance`] exclusively owns one tree of nodes, collections and
//! leaves, laid out as an arena of [`Item`]s addressed by [`ItemId`].
//! Parent pointers, warp master edges and reference lookups are plain
//! ids — relations, never ownership — so back-edges cannot create
//! ownership cycles.
//!
//! All mutation goes through `Instance` methods: that is where the load
//! mode is consulted, changes are recorded, and warp notifications are
//! dispatched.

pub mod changes;
pub mod collection;
pub mod instance;
pub mod node;
pub mod path;
pub mod value;
pub mod warper;

pub use changes::{ChangeLog, ChangeRecord};
pub use instance::Instance;
pub use path::{parse_path, PathStep};

use serde::{Deserialize, Serialize};

/// Handle to an item in the instance arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub(crate) u32);

impl ItemId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// The load mode of an instance; decides which leaf slot stores write to
/// and whether changes are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Regular user mutation: stores hit the user slot, changes are
    /// recorded.
    #[default]
    Normal,
    /// Stores hit the preset slot.
    Preset,
    /// Stores hit the layered slot.
    Layered,
    /// Backend population: stores hit the user slot, change recording is
    /// suppressed unless a model transform altered the incoming value or
    /// consecutive stores conflict.
    InitialLoad,
}

/// Which slot a collection entry was created under; drives change
/// notification for stores made through the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataMode {
    /// Created by regular mutation.
    #[default]
    Normal,
    /// Created while the instance was in preset mode.
    Preset,
    /// Created while the instance was in layered mode.
    Layered,
}

/// How strictly an operation treats failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckPolicy {
    /// Fail: validation errors abort the operation.
    #[default]
    Yes,
    /// Store anyway, but record the error on the instance.
    No,
    /// Keep the prior value, record a soft error, emit a warning.
    Skip,
}

/// Which precedence slice a leaf read resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// First defined among user, preset, computed, default; what a
    /// backend writes out.
    Backend,
    /// Full precedence: user, preset, computed, layered, default,
    /// upstream default.
    #[default]
    User,
    /// The user slot, only when it differs from every lower source.
    Custom,
    /// The highest-precedence non-user value.
    Standard,
    /// The preset slot alone.
    Preset,
    /// The schema default alone.
    Default,
    /// The upstream default alone.
    UpstreamDefault,
    /// The layered slot alone.
    Layered,
    /// Full precedence without the upstream default.
    NonUpstreamDefault,
    /// Like `User`, but an empty mandatory leaf yields `None` instead of
    /// an error.
    AllowUndef,
}

/// Kind of a live item, for dispatch and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// A node with named elements.
    Node,
    /// A typed leaf.
    Leaf,
    /// A keyed collection.
    Hash,
    /// An ordered collection.
    List,
    /// A choice set with checked flags.
    CheckList,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Node => "node",
            Self::Leaf => "leaf",
            Self::Hash => "hash",
            Self::List => "list",
            Self::CheckList => "check_list",
        };
        write!(f, "{name}")
    }
}

/// One arena slot.
#[derive(Debug)]
pub(crate) enum Item {
    Node(node::NodeData),
    Value(value::ValueData),
    Collection(collection::CollectionData),
    CheckList(collection::CheckListData),
}

impl Item {
    pub(crate) fn kind(&self) -> ItemKind {
        match self {
            Self::Node(_) => ItemKind::Node,
            Self::Value(_) => ItemKind::Leaf,
            Self::Collection(data) => {
                if data.is_list() {
                    ItemKind::List
                } else {
                    ItemKind::Hash
                }
            }
            Self::CheckList(_) => ItemKind::CheckList,
        }
    }

    pub(crate) fn parent(&self) -> Option<ItemId> {
        match self {
            Self::Node(data) => data.parent,
            Self::Value(data) => data.parent,
            Self::Collection(data) => data.parent,
            Self::CheckList(data) => data.parent,
        }
    }

    pub(crate) fn key_in_parent(&self) -> &str {
        match self {
            Self::Node(data) => &data.key_in_parent,
            Self::Value(data) => &data.key_in_parent,
            Self::Collection(data) => &data.key_in_parent,
            Self::CheckList(data) => &data.key_in_parent,
        }
    }

    pub(crate) fn set_annotation(&mut self, note: Option<String>) {
        match self {
            Self::Node(data) => data.annotation = note,
            Self::Value(data) => data.annotation = note,
            Self::Collection(data) => data.annotation = note,
            Self::CheckList(data) => data.annotation = note,
        }
    }

    pub(crate) fn annotation(&self) -> Option<&str> {
        match self {
            Self::Node(data) => data.annotation.as_deref(),
            Self::Value(data) => data.annotation.as_deref(),
            Self::Collection(data) => data.annotation.as_deref(),
            Self::CheckList(data) => data.annotation.as_deref(),
        }
    }
}
