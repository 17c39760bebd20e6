//! Warp dispatch: property changes driven by master values.
//!
//! Warp edges are registered when a warped element is instantiated: each
//! master path resolves to a leaf, and a non-owning edge from that leaf
//! to the dependent element is recorded on the instance. When a master
//! changes, the first matching warp rule is re-applied to the element.
//! Cascading warps are allowed; re-entry on the same element is a schema
//! error.

use crate::error::{Error, Result};
use crate::schema::{WarpEffects, WarpSpec};
use crate::tree::path::parse_path;
use crate::tree::{CheckPolicy, FetchMode, Item, ItemId};
use crate::Instance;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A non-owning edge from a master leaf to a warped element.
#[derive(Debug, Clone)]
pub(crate) struct WarpEdge {
    pub master: ItemId,
    pub owner: ItemId,
    pub element: String,
    pub warp: Arc<WarpSpec>,
}

impl Instance {
    /// Resolves the warp variables of a spec and selects the first
    /// matching rule's effects.
    pub(crate) fn warp_effects_for(
        &mut self,
        owner: ItemId,
        warp: &WarpSpec,
    ) -> Result<Option<WarpEffects>> {
        let mut values: BTreeMap<String, Option<String>> = BTreeMap::new();
        for (var, path) in &warp.follow {
            let steps = parse_path(path)?;
            let value = match self.resolve_path(owner, &steps, true) {
                Ok(target) => self.fetch(target, FetchMode::User, CheckPolicy::Skip, true)?,
                Err(_) => None,
            };
            values.insert(var.clone(), value);
        }
        Ok(warp.select(&values).cloned())
    }

    /// Registers the warp edges of an element towards all its masters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] when a master path does not resolve to a
    /// leaf.
    pub(crate) fn register_warp(
        &mut self,
        owner: ItemId,
        element: &str,
        warp: Arc<WarpSpec>,
    ) -> Result<()> {
        for (_, path) in &warp.follow {
            let steps = parse_path(path)?;
            let master = self.resolve_path(owner, &steps, true)?;
            if !matches!(self.item(master), Item::Value(_)) {
                return Err(Error::model(format!(
                    "warp master '{path}' of element '{element}' is not a leaf"
                )));
            }
            let duplicate = self
                .warp_edges
                .iter()
                .any(|e| e.master == master && e.owner == owner && e.element == element);
            if !duplicate {
                self.warp_edges.push(WarpEdge {
                    master,
                    owner,
                    element: element.to_string(),
                    warp: Arc::clone(&warp),
                });
            }
        }
        Ok(())
    }

    /// Re-applies warp effects on every element following the given
    /// master.
    pub(crate) fn notify_dependants(&mut self, master: ItemId) -> Result<()> {
        let edges: Vec<(ItemId, String, Arc<WarpSpec>)> = self
            .warp_edges
            .iter()
            .filter(|e| e.master == master)
            .map(|e| (e.owner, e.element.clone(), Arc::clone(&e.warp)))
            .collect();
        for (owner, element, warp) in edges {
            self.apply_warp(owner, &element, &warp)?;
        }
        Ok(())
    }

    fn apply_warp(&mut self, owner: ItemId, element: &str, warp: &WarpSpec) -> Result<()> {
        let guard = (owner, element.to_string());
        if self.warping.contains(&guard) {
            return Err(Error::model(format!(
                "cyclic warp detected at '{} {element}'",
                self.path_of(owner)
            )));
        }
        self.warping.push(guard);
        let outcome = self.apply_warp_effects(owner, element, warp);
        self.warping.pop();
        outcome
    }

    fn apply_warp_effects(&mut self, owner: ItemId, element: &str, warp: &WarpSpec) -> Result<()> {
        let Some(effects) = self.warp_effects_for(owner, warp)? else {
            return Ok(());
        };
        let Some(index) = self
            .node_data(owner)?
            .elements
            .iter()
            .position(|e| e.spec.name == element)
        else {
            return Ok(());
        };

        {
            let live = &mut self.node_data_mut(owner)?.elements[index];
            if let Some(level) = effects.level {
                live.level = level;
            }
            if let Some(status) = effects.status {
                live.status = status;
            }
        }

        let Some(item) = self.node_data(owner)?.elements[index].item else {
            return Ok(());
        };

        if let Some(ref replacement) = effects.value {
            self.set_leaf_spec(item, Arc::clone(replacement))?;
            // A spec swap can change the effective content; cascade.
            self.notify_dependants(item)?;
        }

        if let Some(ref class_name) = effects.node_class {
            let current = self.node_data(item)?.class.name.clone();
            if &current != class_name {
                let class = self.catalog.require(class_name)?;
                let rebuilt = self.alloc(Item::Node(crate::tree::node::NodeData::new(
                    class,
                    Some(owner),
                    element,
                )));
                self.node_data_mut(owner)?.elements[index].item = Some(rebuilt);
                self.record_note(
                    rebuilt,
                    format!("warp changed node class from '{current}' to '{class_name}'"),
                );
            }
        }

        Ok(())
    }
}
