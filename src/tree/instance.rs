//! The instance: exclusive owner of one configuration tree.

use crate::backend::BackendRegistry;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::schema::{Catalog, RwConfig};
use crate::tree::node::NodeData;
use crate::tree::path::{parse_path, PathStep};
use crate::tree::{
    ChangeLog, ChangeRecord, CheckPolicy, FetchMode, Item, ItemId, ItemKind, LoadMode,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A node registered for write-back because its class carries an
/// `rw_config` block.
#[derive(Debug, Clone)]
pub(crate) struct WriteBackEntry {
    pub node: ItemId,
    pub rw: RwConfig,
}

/// Owns one configuration tree: the item arena, the load mode, the
/// change log, the per-path error map and the backend registry.
///
/// All reads and mutations of the tree go through instance methods so
/// that mode handling, change recording and warp notification stay in
/// one place.
///
/// # Examples
///
/// ```
/// use arbor::schema::{Catalog, ConfigClass, ElementKind, ElementSpec, ValueSpec, ValueType};
/// use arbor::{FetchMode, Instance};
/// use std::sync::Arc;
///
/// let leaf = Arc::new(
///     ValueSpec::builder(ValueType::String)
///         .default_value("booya")
///         .build()
///         .unwrap(),
/// );
/// let mut catalog = Catalog::new();
/// catalog
///     .add_class(
///         ConfigClass::new("Master")
///             .element(ElementSpec::new("greeting", ElementKind::Leaf(leaf)))
///             .build()
///             .unwrap(),
///     )
///     .unwrap();
///
/// let mut instance = Instance::new(Arc::new(catalog), "Master").unwrap();
/// let value = instance.fetch_path("greeting", FetchMode::User).unwrap();
/// assert_eq!(value.as_deref(), Some("booya"));
/// ```
pub struct Instance {
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) items: Vec<Item>,
    pub(crate) root: ItemId,
    pub(crate) mode: LoadMode,
    pub(crate) changes: ChangeLog,
    pub(crate) errors: BTreeMap<String, Vec<String>>,
    pub(crate) root_dir: PathBuf,
    pub(crate) logger: Logger,
    pub(crate) warp_edges: Vec<crate::tree::warper::WarpEdge>,
    pub(crate) warping: Vec<(ItemId, String)>,
    pub(crate) computing: Vec<ItemId>,
    pub(crate) write_backs: Vec<WriteBackEntry>,
    pub(crate) backends: BackendRegistry,
}

impl Instance {
    /// Creates an instance whose root node uses the given catalog class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] when the class is unknown or the catalog
    /// is inconsistent.
    pub fn new(catalog: Arc<Catalog>, root_class: &str) -> Result<Self> {
        catalog.check()?;
        let class = catalog.require(root_class)?;
        let mut instance = Self {
            catalog,
            items: Vec::new(),
            root: ItemId(0),
            mode: LoadMode::Normal,
            changes: ChangeLog::default(),
            errors: BTreeMap::new(),
            root_dir: PathBuf::from("."),
            logger: Logger::default(),
            warp_edges: Vec::new(),
            warping: Vec::new(),
            computing: Vec::new(),
            write_backs: Vec::new(),
            backends: BackendRegistry::default(),
        };
        let root = instance.alloc(Item::Node(NodeData::new(Arc::clone(&class), None, "")));
        instance.root = root;
        if let Some(rw) = class.rw_config.clone() {
            instance.write_backs.push(WriteBackEntry { node: root, rw });
        }
        Ok(instance)
    }

    /// Sets the root filesystem directory used by file/dir leaf checks
    /// and backends.
    #[must_use]
    pub fn with_root_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.root_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Replaces the logger.
    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Registers a backend under its own name.
    #[must_use]
    pub fn with_backend(mut self, backend: Box<dyn crate::backend::Backend>) -> Self {
        self.backends.register(backend);
        self
    }

    /// The root node of the tree.
    #[must_use]
    pub fn root(&self) -> ItemId {
        self.root
    }

    /// The instance root directory.
    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// The kind of an item.
    #[must_use]
    pub fn kind_of(&self, id: ItemId) -> ItemKind {
        self.items[id.index()].kind()
    }

    // ------------------------------------------------------------------
    // Modes
    // ------------------------------------------------------------------

    /// The current load mode.
    #[must_use]
    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    /// Enters preset mode: stores hit the preset slot.
    pub fn preset_start(&mut self) {
        self.mode = LoadMode::Preset;
    }

    /// Leaves preset mode.
    pub fn preset_stop(&mut self) {
        self.mode = LoadMode::Normal;
    }

    /// Enters layered mode: stores hit the layered slot.
    pub fn layered_start(&mut self) {
        self.mode = LoadMode::Layered;
    }

    /// Leaves layered mode.
    pub fn layered_stop(&mut self) {
        self.mode = LoadMode::Normal;
    }

    /// Enters initial-load mode: change recording is suppressed unless a
    /// model transform altered the incoming value or consecutive stores
    /// conflict.
    pub fn initial_load_start(&mut self) {
        self.mode = LoadMode::InitialLoad;
    }

    /// Leaves initial-load mode.
    pub fn initial_load_stop(&mut self) {
        self.mode = LoadMode::Normal;
    }

    /// Drops every layered slot in the tree.
    pub fn layered_clear(&mut self) {
        for item in &mut self.items {
            if let Item::Value(data) = item {
                data.layered = None;
            }
        }
    }

    // ------------------------------------------------------------------
    // Changes and errors
    // ------------------------------------------------------------------

    /// Number of recorded changes since the last save mark.
    #[must_use]
    pub fn needs_save(&self) -> usize {
        self.changes.needs_save()
    }

    /// Marks the current state as saved.
    pub fn save_done(&mut self) {
        self.changes.save_done();
    }

    /// The formatted change log, one line per change.
    #[must_use]
    pub fn list_changes(&self) -> String {
        self.changes.list()
    }

    /// All change records, oldest first.
    #[must_use]
    pub fn changes(&self) -> &[ChangeRecord] {
        self.changes.records()
    }

    /// The per-path map of recovered errors (check policies `skip` and
    /// `no` record here instead of failing).
    #[must_use]
    pub fn error_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.errors
    }

    pub(crate) fn record_error(&mut self, path: &str, message: String) {
        self.errors.entry(path.to_string()).or_default().push(message);
    }

    /// Central decision point for change recording; every store path
    /// funnels through here so initial-load suppression lives in exactly
    /// one place.
    pub(crate) fn record_value_change(
        &mut self,
        id: ItemId,
        old: Option<String>,
        new: Option<String>,
        note: Option<String>,
        transformed: bool,
    ) {
        if self.mode == LoadMode::InitialLoad {
            let conflict = old.is_some() && old != new;
            if !transformed && !conflict {
                return;
            }
        }
        let path = self.path_of(id);
        self.changes.push_value(path, old, new, note);
    }

    /// Records a note-only change, honoring initial-load suppression.
    pub(crate) fn record_note(&mut self, id: ItemId, note: impl Into<String>) {
        if self.mode == LoadMode::InitialLoad {
            return;
        }
        let path = self.path_of(id);
        self.changes.push_note(path, note);
    }

    // ------------------------------------------------------------------
    // Arena access
    // ------------------------------------------------------------------

    pub(crate) fn alloc(&mut self, item: Item) -> ItemId {
        let id = ItemId(u32::try_from(self.items.len()).expect("arena overflow"));
        self.items.push(item);
        id
    }

    pub(crate) fn item(&self, id: ItemId) -> &Item {
        &self.items[id.index()]
    }

    pub(crate) fn item_mut(&mut self, id: ItemId) -> &mut Item {
        &mut self.items[id.index()]
    }

    pub(crate) fn wrong_type(&self, id: ItemId, expected: &str) -> Error {
        Error::WrongType {
            path: self.path_of(id),
            expected: expected.to_string(),
            found: self.kind_of(id).to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    /// Renders the DSL-compatible path of an item.
    #[must_use]
    pub fn path_of(&self, id: ItemId) -> String {
        let mut segments = Vec::new();
        let mut current = id;
        while let Some(parent) = self.item(current).parent() {
            match self.item(parent) {
                Item::Collection(coll) => {
                    let key = self.item(current).key_in_parent().to_string();
                    segments.push(format!(
                        "{}:{}",
                        coll.key_in_parent,
                        crate::tree::path::quote(&key)
                    ));
                    match coll.parent {
                        Some(grandparent) => current = grandparent,
                        None => break,
                    }
                }
                _ => {
                    segments.push(self.item(current).key_in_parent().to_string());
                    current = parent;
                }
            }
        }
        segments.reverse();
        segments.join(" ")
    }

    /// Nearest ancestor that is a node (skipping enclosing collections);
    /// the root node for the root itself.
    pub(crate) fn parent_node(&self, id: ItemId) -> ItemId {
        let mut current = id;
        while let Some(parent) = self.item(current).parent() {
            if matches!(self.item(parent), Item::Node(_)) {
                return parent;
            }
            current = parent;
        }
        self.root
    }

    /// Resolves a parsed path starting from an item.
    ///
    /// Element steps create missing items on the way when `autoadd` is
    /// set; collection entries are only created with `autoadd`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`], [`Error::UnknownId`] or
    /// [`Error::WrongType`] when the path does not fit the tree.
    pub fn resolve_path(
        &mut self,
        start: ItemId,
        steps: &[PathStep],
        autoadd: bool,
    ) -> Result<ItemId> {
        let mut current = start;
        for step in steps {
            match step {
                PathStep::Root => current = self.root,
                PathStep::Up => current = self.parent_node(current),
                PathStep::Element(name) => {
                    let node = self.expect_node(current)?;
                    current = self
                        .fetch_element(node, name, CheckPolicy::Yes, true, false)?
                        .ok_or_else(|| Error::UnknownElement {
                            path: self.path_of(node),
                            name: name.clone(),
                            candidates: vec![],
                        })?;
                }
                PathStep::ElementId(name, key) => {
                    let node = self.expect_node(current)?;
                    let coll = self
                        .fetch_element(node, name, CheckPolicy::Yes, true, false)?
                        .ok_or_else(|| Error::UnknownElement {
                            path: self.path_of(node),
                            name: name.clone(),
                            candidates: vec![],
                        })?;
                    current = self.coll_get(coll, key, autoadd)?.ok_or_else(|| {
                        Error::UnknownId {
                            path: self.path_of(coll),
                            id: key.clone(),
                        }
                    })?;
                }
            }
        }
        Ok(current)
    }

    fn expect_node(&self, id: ItemId) -> Result<ItemId> {
        if matches!(self.item(id), Item::Node(_)) {
            Ok(id)
        } else {
            Err(self.wrong_type(id, "node"))
        }
    }

    /// Navigates to the item addressed by a textual path, creating
    /// missing items on the way.
    ///
    /// # Errors
    ///
    /// Returns path resolution errors; see [`Instance::resolve_path`].
    pub fn grab(&mut self, path: &str) -> Result<ItemId> {
        let steps = parse_path(path)?;
        self.resolve_path(self.root, &steps, true)
    }

    /// Fetches the leaf addressed by a textual path in the given mode.
    ///
    /// # Errors
    ///
    /// Returns path resolution errors, [`Error::WrongType`] when the
    /// path names a non-leaf, or read errors from the fetch protocol.
    pub fn fetch_path(&mut self, path: &str, mode: FetchMode) -> Result<Option<String>> {
        let id = self.grab(path)?;
        self.fetch(id, mode, CheckPolicy::Yes, false)
    }

    /// Stores into the leaf addressed by a textual path.
    ///
    /// # Errors
    ///
    /// Returns path resolution errors or store protocol errors.
    pub fn store_path(&mut self, path: &str, value: Option<&str>) -> Result<bool> {
        let id = self.grab(path)?;
        self.store(id, value, CheckPolicy::Yes, false)
    }

    // ------------------------------------------------------------------
    // Annotations
    // ------------------------------------------------------------------

    /// The annotation attached to an item.
    #[must_use]
    pub fn annotation(&self, id: ItemId) -> Option<&str> {
        self.item(id).annotation()
    }

    /// Attaches an annotation (comment) to an item.
    pub fn set_annotation(&mut self, id: ItemId, note: &str) {
        self.item_mut(id).set_annotation(Some(note.to_string()));
        self.record_note(id, "annotation set");
    }

    // ------------------------------------------------------------------
    // Backends
    // ------------------------------------------------------------------

    /// Registers a node for write-back under the given backend spec.
    ///
    /// Nodes whose class carries an `rw_config` block register
    /// themselves; this entry point exists for backends synthesized at
    /// run time.
    pub fn register_write_back(&mut self, node: ItemId, rw: RwConfig) {
        self.write_backs.push(WriteBackEntry { node, rw });
    }

    /// Reads every registered node through its backend, in initial-load
    /// mode.
    ///
    /// # Errors
    ///
    /// Returns the first backend error, with file context attached.
    pub fn read_config(&mut self, check: CheckPolicy) -> Result<()> {
        let entries = self.write_backs.clone();
        let registry = std::mem::take(&mut self.backends);
        let previous_mode = self.mode;
        self.mode = LoadMode::InitialLoad;
        let mut outcome = Ok(());
        for entry in entries {
            let Some(backend) = registry.get(&entry.rw.backend) else {
                outcome = Err(Error::model(format!(
                    "unknown backend '{}'",
                    entry.rw.backend
                )));
                break;
            };
            let dir = match entry.rw.config_dir {
                Some(ref d) => self.root_dir.join(d),
                None => self.root_dir.clone(),
            };
            let file = entry.rw.file.clone().unwrap_or_default();
            if let Err(e) = backend.read(self, entry.node, &dir, &file, check) {
                // Only parse failures get file context; store errors
                // propagate as themselves.
                let e = if matches!(e, Error::Syntax { .. }) {
                    e.with_location(&file, 0)
                } else {
                    e
                };
                outcome = Err(e);
                break;
            }
        }
        self.mode = previous_mode;
        self.backends = registry;
        outcome
    }

    /// Writes every registered node back through its backend.
    ///
    /// # Errors
    ///
    /// Returns the first backend error.
    pub fn write_back(&mut self) -> Result<()> {
        let entries = self.write_backs.clone();
        let registry = std::mem::take(&mut self.backends);
        let mut outcome = Ok(());
        for entry in entries {
            let Some(backend) = registry.get(&entry.rw.backend) else {
                outcome = Err(Error::model(format!(
                    "unknown backend '{}'",
                    entry.rw.backend
                )));
                break;
            };
            let dir = match entry.rw.config_dir {
                Some(ref d) => self.root_dir.join(d),
                None => self.root_dir.clone(),
            };
            let file = entry.rw.file.clone().unwrap_or_default();
            if !dir.exists() && entry.rw.auto_create {
                if let Err(e) = std::fs::create_dir_all(&dir) {
                    outcome = Err(e.into());
                    break;
                }
            }
            if let Err(e) = backend.write(self, entry.node, &dir, &file) {
                outcome = Err(e);
                break;
            }
        }
        self.backends = registry;
        if outcome.is_ok() {
            self.changes.save_done();
        }
        outcome
    }

    /// Runs a loader program against the tree root.
    ///
    /// # Errors
    ///
    /// Returns loader parse or execution errors; see the loader module.
    pub fn load(&mut self, program: &str, check: CheckPolicy) -> Result<()> {
        let root = self.root;
        crate::loader::run(self, root, program, check)
    }

    /// Runs a loader program against an arbitrary starting node.
    ///
    /// # Errors
    ///
    /// Returns loader parse or execution errors.
    pub fn load_from(&mut self, node: ItemId, program: &str, check: CheckPolicy) -> Result<()> {
        crate::loader::run(self, node, program, check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ConfigClass, ElementKind, ElementSpec, ValueSpec, ValueType};

    fn tiny_catalog() -> Arc<Catalog> {
        let leaf = Arc::new(ValueSpec::builder(ValueType::String).build().unwrap());
        let mut catalog = Catalog::new();
        catalog
            .add_class(
                ConfigClass::new("Master")
                    .element(ElementSpec::new("leaf", ElementKind::Leaf(leaf)))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        Arc::new(catalog)
    }

    #[test]
    fn test_new_requires_known_class() {
        assert!(Instance::new(tiny_catalog(), "Nope").is_err());
    }

    #[test]
    fn test_mode_transitions() {
        let mut instance = Instance::new(tiny_catalog(), "Master").unwrap();
        assert_eq!(instance.mode(), LoadMode::Normal);
        instance.preset_start();
        assert_eq!(instance.mode(), LoadMode::Preset);
        instance.preset_stop();
        instance.layered_start();
        assert_eq!(instance.mode(), LoadMode::Layered);
        instance.layered_stop();
        instance.initial_load_start();
        assert_eq!(instance.mode(), LoadMode::InitialLoad);
        instance.initial_load_stop();
        assert_eq!(instance.mode(), LoadMode::Normal);
    }

    #[test]
    fn test_root_path_is_empty() {
        let instance = Instance::new(tiny_catalog(), "Master").unwrap();
        assert_eq!(instance.path_of(instance.root()), "");
    }

    #[test]
    fn test_store_and_fetch_path() {
        let mut instance = Instance::new(tiny_catalog(), "Master").unwrap();
        instance.store_path("leaf", Some("hello")).unwrap();
        assert_eq!(
            instance.fetch_path("leaf", FetchMode::User).unwrap(),
            Some("hello".to_string())
        );
        assert_eq!(instance.needs_save(), 1);
    }

    #[test]
    fn test_annotation_round_trip() {
        let mut instance = Instance::new(tiny_catalog(), "Master").unwrap();
        let id = instance.grab("leaf").unwrap();
        instance.set_annotation(id, "a comment");
        assert_eq!(instance.annotation(id), Some("a comment"));
    }
}
