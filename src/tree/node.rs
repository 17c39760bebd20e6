//! Live nodes: element access, accept rules, iteration and gists.

use crate::error::{Error, Result};
use crate::schema::{ConfigClass, ElementKind, ElementSpec, Level, Status};
use crate::tree::collection::{CheckListData, CollectionData};
use crate::tree::value::ValueData;
use crate::tree::{CheckPolicy, DataMode, Item, ItemId, LoadMode};
use crate::Instance;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};
use std::sync::Arc;

/// One element slot of a live node: the (possibly accepted or warped)
/// spec, the lazily created item, and live level/status overrides.
#[derive(Debug)]
pub(crate) struct LiveElement {
    pub spec: ElementSpec,
    pub item: Option<ItemId>,
    pub level: Level,
    pub status: Status,
}

impl LiveElement {
    fn from_spec(spec: ElementSpec) -> Self {
        Self {
            level: spec.level,
            status: spec.status,
            spec,
            item: None,
        }
    }
}

/// Live state of one node.
#[derive(Debug)]
pub(crate) struct NodeData {
    pub class: Arc<ConfigClass>,
    pub parent: Option<ItemId>,
    pub key_in_parent: String,
    pub elements: Vec<LiveElement>,
    pub annotation: Option<String>,
}

impl NodeData {
    pub(crate) fn new(class: Arc<ConfigClass>, parent: Option<ItemId>, key_in_parent: &str) -> Self {
        let elements = class
            .elements
            .iter()
            .cloned()
            .map(LiveElement::from_spec)
            .collect();
        Self {
            class,
            parent,
            key_in_parent: key_in_parent.to_string(),
            elements,
            annotation: None,
        }
    }
}

/// Deprecated elements warn once per process; the registry remembers
/// which `class/element` pairs already did.
fn deprecation_registry() -> &'static Mutex<HashSet<String>> {
    static REGISTRY: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Plain Levenshtein distance, used for possible-typo warnings when an
/// accept rule admits a name close to a declared element.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

impl Instance {
    pub(crate) fn node_data(&self, id: ItemId) -> Result<&NodeData> {
        match self.item(id) {
            Item::Node(data) => Ok(data),
            _ => Err(self.wrong_type(id, "node")),
        }
    }

    pub(crate) fn node_data_mut(&mut self, id: ItemId) -> Result<&mut NodeData> {
        if matches!(self.item(id), Item::Node(_)) {
            match self.item_mut(id) {
                Item::Node(data) => Ok(data),
                _ => unreachable!(),
            }
        } else {
            Err(self.wrong_type(id, "node"))
        }
    }

    /// Fetches (and lazily creates) the element of a node.
    ///
    /// Unknown names may still be admitted by the class accept rules.
    /// Hidden elements need `accept_hidden`; obsolete elements fail;
    /// deprecated elements warn once per process.
    ///
    /// # Errors
    ///
    /// With `check` set to [`CheckPolicy::Yes`], returns
    /// [`Error::UnknownElement`] for unknown names and [`Error::User`]
    /// for hidden or obsolete elements. Softer policies return `None`.
    pub fn fetch_element(
        &mut self,
        node: ItemId,
        name: &str,
        check: CheckPolicy,
        autoadd: bool,
        accept_hidden: bool,
    ) -> Result<Option<ItemId>> {
        let found = self
            .node_data(node)?
            .elements
            .iter()
            .position(|e| e.spec.name == name);
        let index = match found {
            Some(index) => index,
            None => match self.try_accept(node, name)? {
                Some(index) => index,
                None => {
                    let path = self.path_of(node);
                    return match check {
                        CheckPolicy::Yes => Err(Error::UnknownElement {
                            path,
                            name: name.to_string(),
                            candidates: self.children(node, true)?,
                        }),
                        CheckPolicy::No => {
                            self.record_error(&path, format!("unknown element '{name}'"));
                            Ok(None)
                        }
                        CheckPolicy::Skip => Ok(None),
                    };
                }
            },
        };

        let (level, status) = {
            let element = &self.node_data(node)?.elements[index];
            (element.level, element.status)
        };

        if level == Level::Hidden && !accept_hidden {
            return match check {
                CheckPolicy::Yes => Err(Error::User {
                    path: self.path_of(node),
                    reason: format!("element '{name}' is hidden"),
                }),
                CheckPolicy::No | CheckPolicy::Skip => Ok(None),
            };
        }

        match status {
            Status::Obsolete => {
                let path = self.path_of(node);
                return match check {
                    CheckPolicy::Yes => Err(Error::User {
                        path,
                        reason: format!("element '{name}' is obsolete"),
                    }),
                    CheckPolicy::No => {
                        self.record_error(&path, format!("element '{name}' is obsolete"));
                        Ok(None)
                    }
                    CheckPolicy::Skip => Ok(None),
                };
            }
            Status::Deprecated if check == CheckPolicy::Yes => {
                let class = self.node_data(node)?.class.name.clone();
                let tag = format!("{class}/{name}");
                let first = deprecation_registry()
                    .lock()
                    .map(|mut seen| seen.insert(tag))
                    .unwrap_or(false);
                if first {
                    let path = self.path_of(node);
                    self.logger
                        .warn(&format!("{path}: element '{name}' is deprecated"));
                    self.record_note(node, format!("dropping deprecated parameter '{name}'"));
                }
            }
            _ => {}
        }

        let existing = self.node_data(node)?.elements[index].item;
        match existing {
            Some(item) => Ok(Some(item)),
            None if autoadd => Ok(Some(self.instantiate_element(node, index)?)),
            None => Ok(None),
        }
    }

    /// Declared element names in model order; hidden, obsolete and
    /// deprecated elements are filtered out unless `all` is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a node.
    pub fn children(&self, node: ItemId, all: bool) -> Result<Vec<String>> {
        let data = self.node_data(node)?;
        Ok(data
            .elements
            .iter()
            .filter(|e| {
                all || (e.level != Level::Hidden && e.status == Status::Standard)
            })
            .map(|e| e.spec.name.clone())
            .collect())
    }

    /// The next element after `name` in model order, honoring the status
    /// filters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a node.
    pub fn next_element(&self, node: ItemId, name: Option<&str>) -> Result<Option<String>> {
        let names = self.children(node, false)?;
        match name {
            None => Ok(names.first().cloned()),
            Some(name) => Ok(names
                .iter()
                .position(|n| n == name)
                .and_then(|i| names.get(i + 1))
                .cloned()),
        }
    }

    /// The element before `name` in model order, honoring the status
    /// filters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a node.
    pub fn previous_element(&self, node: ItemId, name: &str) -> Result<Option<String>> {
        let names = self.children(node, false)?;
        Ok(names
            .iter()
            .position(|n| n == name)
            .filter(|i| *i > 0)
            .and_then(|i| names.get(i - 1))
            .cloned())
    }

    /// Resolves the gist template of a node: `{elt}` holes are replaced
    /// by element content, missing values by the empty string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a node.
    pub fn gist(&mut self, node: ItemId) -> Result<String> {
        let Some(template) = self.node_data(node)?.class.gist.clone() else {
            return Ok(String::new());
        };
        let mut out = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let Some(close) = rest[open..].find('}') else {
                out.push_str(&rest[open..]);
                return Ok(out);
            };
            let name = &rest[open + 1..open + close];
            let value = match self.fetch_element(node, name, CheckPolicy::Skip, true, false)? {
                Some(element) => self
                    .fetch(element, crate::tree::FetchMode::AllowUndef, CheckPolicy::Skip, true)
                    .unwrap_or(None)
                    .unwrap_or_default(),
                None => String::new(),
            };
            out.push_str(&value);
            rest = &rest[open + close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Live level of an element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] for unknown names.
    pub fn element_level(&self, node: ItemId, name: &str) -> Result<Level> {
        self.live_element(node, name).map(|e| e.level)
    }

    /// Live status of an element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] for unknown names.
    pub fn element_status(&self, node: ItemId, name: &str) -> Result<Status> {
        self.live_element(node, name).map(|e| e.status)
    }

    fn live_element(&self, node: ItemId, name: &str) -> Result<&LiveElement> {
        self.node_data(node)?
            .elements
            .iter()
            .find(|e| e.spec.name == name)
            .ok_or_else(|| Error::UnknownElement {
                path: self.path_of(node),
                name: name.to_string(),
                candidates: vec![],
            })
    }

    fn try_accept(&mut self, node: ItemId, name: &str) -> Result<Option<usize>> {
        let class = Arc::clone(&self.node_data(node)?.class);
        let Some(accept) = class.accept_for(name) else {
            return Ok(None);
        };

        let declared: Vec<String> = self
            .node_data(node)?
            .elements
            .iter()
            .map(|e| e.spec.name.clone())
            .collect();
        if let Some(close) = declared
            .iter()
            .find(|d| d.as_str() != name && levenshtein(d, name) <= 2)
        {
            let path = self.path_of(node);
            self.logger.warn(&format!(
                "{path}: accepting element '{name}', possible typo of '{close}'"
            ));
        }

        let mut spec = accept.template.clone();
        spec.name = name.to_string();
        let insert_at = match accept.after {
            Some(ref after) => self
                .node_data(node)?
                .elements
                .iter()
                .position(|e| &e.spec.name == after)
                .map_or(declared.len(), |i| i + 1),
            None => declared.len(),
        };
        self.node_data_mut(node)?
            .elements
            .insert(insert_at, LiveElement::from_spec(spec));
        Ok(Some(insert_at))
    }

    fn instantiate_element(&mut self, node: ItemId, index: usize) -> Result<ItemId> {
        let spec = self.node_data(node)?.elements[index].spec.clone();
        let name = spec.name.clone();
        let data_mode = match self.mode {
            LoadMode::Preset => DataMode::Preset,
            LoadMode::Layered => DataMode::Layered,
            LoadMode::Normal | LoadMode::InitialLoad => DataMode::Normal,
        };

        let item = match &spec.kind {
            ElementKind::Leaf(value_spec) => {
                let mut effective = Arc::clone(value_spec);
                if let Some(ref warp) = spec.warp {
                    if let Some(effects) = self.warp_effects_for(node, warp)? {
                        if let Some(ref replacement) = effects.value {
                            effective = Arc::clone(replacement);
                        }
                    }
                }
                self.alloc(Item::Value(ValueData::new(
                    effective,
                    Some(node),
                    &name,
                    data_mode,
                )))
            }
            ElementKind::Hash(coll_spec) => {
                let id = self.alloc(Item::Collection(CollectionData::new(
                    Arc::clone(coll_spec),
                    false,
                    Some(node),
                    &name,
                )));
                let keys = coll_spec.auto_create_keys.clone();
                self.node_data_mut(node)?.elements[index].item = Some(id);
                for key in &keys {
                    self.coll_get(id, key, true)?;
                }
                id
            }
            ElementKind::List(coll_spec) => {
                let id = self.alloc(Item::Collection(CollectionData::new(
                    Arc::clone(coll_spec),
                    true,
                    Some(node),
                    &name,
                )));
                self.node_data_mut(node)?.elements[index].item = Some(id);
                if let Some(count) = coll_spec.auto_create_ids {
                    for i in 0..count {
                        self.coll_get(id, &i.to_string(), true)?;
                    }
                }
                id
            }
            ElementKind::CheckList(checklist_spec) => self.alloc(Item::CheckList(
                CheckListData::new(Arc::clone(checklist_spec), Some(node), &name),
            )),
            ElementKind::Node { class } => {
                let class = self.catalog.require(class)?;
                let rw = class.rw_config.clone();
                let id = self.alloc(Item::Node(NodeData::new(class, Some(node), &name)));
                if let Some(rw) = rw {
                    self.register_write_back(id, rw);
                }
                id
            }
            ElementKind::WarpedNode(warp) => {
                let effects = self.warp_effects_for(node, warp)?;
                let class_name = effects
                    .and_then(|e| e.node_class)
                    .ok_or_else(|| {
                        Error::model(format!(
                            "warp of element '{name}' cannot determine a node class"
                        ))
                    })?;
                let class = self.catalog.require(&class_name)?;
                self.alloc(Item::Node(NodeData::new(class, Some(node), &name)))
            }
        };

        self.node_data_mut(node)?.elements[index].item = Some(item);

        // Register warp edges so master changes re-apply the effects.
        if let Some(ref warp) = spec.warp {
            self.register_warp(node, &name, Arc::clone(warp))?;
        }
        if let ElementKind::WarpedNode(ref warp) = spec.kind {
            self.register_warp(node, &name, Arc::clone(warp))?;
        }

        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("abc", "abd"), 1);
        assert_eq!(levenshtein("abc", "ab"), 1);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
    }
}
