//! Live collections: hashes, lists and check-lists.
//!
//! Collection entries are created lazily on demand (autovivified), by
//! explicit store, or by the schema's default keys. Every mutation runs
//! the index checks of the spec and emits a change event with a path
//! suffix identifying the index.

use crate::error::{Error, Result};
use crate::schema::{CargoSpec, CheckListSpec, CollectionSpec, IndexType};
use crate::schema::DuplicatesPolicy;
use crate::tree::node::NodeData;
use crate::tree::path::parse_path;
use crate::tree::value::ValueData;
use crate::tree::{CheckPolicy, DataMode, FetchMode, Item, ItemId, LoadMode};
use crate::Instance;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Entry storage: keyed for hashes, dense for lists.
#[derive(Debug)]
pub(crate) enum Entries {
    Hash(Vec<(String, ItemId)>),
    List(Vec<ItemId>),
}

/// Live state of one hash or list.
#[derive(Debug)]
pub(crate) struct CollectionData {
    pub spec: Arc<CollectionSpec>,
    pub entries: Entries,
    pub parent: Option<ItemId>,
    pub key_in_parent: String,
    pub annotation: Option<String>,
    pub defaults_done: bool,
    pub keys_migrated: bool,
}

impl CollectionData {
    pub(crate) fn new(
        spec: Arc<CollectionSpec>,
        is_list: bool,
        parent: Option<ItemId>,
        key_in_parent: &str,
    ) -> Self {
        Self {
            spec,
            entries: if is_list {
                Entries::List(Vec::new())
            } else {
                Entries::Hash(Vec::new())
            },
            parent,
            key_in_parent: key_in_parent.to_string(),
            annotation: None,
            defaults_done: false,
            keys_migrated: false,
        }
    }

    pub(crate) fn is_list(&self) -> bool {
        matches!(self.entries, Entries::List(_))
    }

    fn len(&self) -> usize {
        match &self.entries {
            Entries::Hash(entries) => entries.len(),
            Entries::List(entries) => entries.len(),
        }
    }

    fn keys(&self) -> Vec<String> {
        match &self.entries {
            Entries::Hash(entries) => entries.iter().map(|(k, _)| k.clone()).collect(),
            Entries::List(entries) => (0..entries.len()).map(|i| i.to_string()).collect(),
        }
    }

    fn ids(&self) -> Vec<ItemId> {
        match &self.entries {
            Entries::Hash(entries) => entries.iter().map(|(_, id)| *id).collect(),
            Entries::List(entries) => entries.clone(),
        }
    }

    fn get(&self, key: &str) -> Option<ItemId> {
        match &self.entries {
            Entries::Hash(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, id)| *id),
            Entries::List(entries) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| entries.get(i).copied()),
        }
    }
}

/// Live state of one check-list.
#[derive(Debug)]
pub(crate) struct CheckListData {
    pub spec: Arc<CheckListSpec>,
    pub checked: BTreeSet<String>,
    pub parent: Option<ItemId>,
    pub key_in_parent: String,
    pub annotation: Option<String>,
}

impl CheckListData {
    pub(crate) fn new(
        spec: Arc<CheckListSpec>,
        parent: Option<ItemId>,
        key_in_parent: &str,
    ) -> Self {
        let checked = spec.default_checked.iter().cloned().collect();
        Self {
            spec,
            checked,
            parent,
            key_in_parent: key_in_parent.to_string(),
            annotation: None,
        }
    }
}

impl Instance {
    pub(crate) fn coll_data(&self, id: ItemId) -> Result<&CollectionData> {
        match self.item(id) {
            Item::Collection(data) => Ok(data),
            _ => Err(self.wrong_type(id, "hash or list")),
        }
    }

    pub(crate) fn coll_data_mut(&mut self, id: ItemId) -> Result<&mut CollectionData> {
        if matches!(self.item(id), Item::Collection(_)) {
            match self.item_mut(id) {
                Item::Collection(data) => Ok(data),
                _ => unreachable!(),
            }
        } else {
            Err(self.wrong_type(id, "hash or list"))
        }
    }

    /// Number of entries (without triggering lazy defaults).
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a collection.
    pub fn coll_len(&self, id: ItemId) -> Result<usize> {
        Ok(self.coll_data(id)?.len())
    }

    /// Current keys, without triggering lazy defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a collection.
    pub fn coll_keys(&self, id: ItemId) -> Result<Vec<String>> {
        Ok(self.coll_data(id)?.keys())
    }

    /// All keys, creating the schema's default keys first when the
    /// collection has never been enumerated, and running key migration
    /// once after initial load.
    ///
    /// # Errors
    ///
    /// Propagates creation errors.
    pub fn coll_keys_lazy(&mut self, id: ItemId) -> Result<Vec<String>> {
        self.ensure_lazy_defaults(id)?;
        self.coll_keys(id)
    }

    /// Entry ids in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a collection.
    pub fn coll_ids(&self, id: ItemId) -> Result<Vec<ItemId>> {
        Ok(self.coll_data(id)?.ids())
    }

    /// Fetches the entry at a key, autovivifying it when `autoadd` is
    /// set.
    ///
    /// # Errors
    ///
    /// Returns index check errors when creation is refused.
    pub fn coll_get(&mut self, id: ItemId, key: &str, autoadd: bool) -> Result<Option<ItemId>> {
        let spec = Arc::clone(&self.coll_data(id)?.spec);
        let key = spec.convert_key(key);
        if let Some(existing) = self.coll_data(id)?.get(&key) {
            return Ok(Some(existing));
        }
        if !autoadd {
            return Ok(None);
        }
        self.check_idx(id, &key, true)?;
        if self.coll_data(id)?.is_list() {
            let index: usize = key.parse().map_err(|_| Error::WrongValue {
                path: self.path_of(id),
                reason: format!("list index '{key}' is not an integer"),
            })?;
            if let Some(max_nb) = spec.max_nb {
                if index + 1 > max_nb {
                    return Err(Error::WrongValue {
                        path: self.path_of(id),
                        reason: format!("cannot create id {index}: max_nb ({max_nb}) reached"),
                    });
                }
            }
            // Lists are dense: fill up to the requested index.
            while self.coll_data(id)?.len() <= index {
                let next = self.coll_data(id)?.len().to_string();
                self.create_entry(id, &next)?;
            }
            Ok(self.coll_data(id)?.get(&key))
        } else {
            Ok(Some(self.create_entry(id, &key)?))
        }
    }

    /// Stores a value into the leaf cargo at a key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] for node cargo, index check errors,
    /// or store protocol errors.
    pub fn coll_store(
        &mut self,
        id: ItemId,
        key: &str,
        value: Option<&str>,
        check: CheckPolicy,
    ) -> Result<bool> {
        let entry = self.coll_get(id, key, true)?.ok_or_else(|| Error::UnknownId {
            path: self.path_of(id),
            id: key.to_string(),
        })?;
        self.store(entry, value, check, false)
    }

    /// Deletes the entry at a key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a collection.
    pub fn coll_delete(&mut self, id: ItemId, key: &str) -> Result<bool> {
        let spec = Arc::clone(&self.coll_data(id)?.spec);
        let key = spec.convert_key(key);
        let Some(entry) = self.coll_data(id)?.get(&key) else {
            return Ok(false);
        };
        let entry_path = self.path_of(entry);
        {
            let data = self.coll_data_mut(id)?;
            match &mut data.entries {
                Entries::Hash(entries) => entries.retain(|(k, _)| k != &key),
                Entries::List(entries) => {
                    if let Ok(index) = key.parse::<usize>() {
                        if index < entries.len() {
                            entries.remove(index);
                        }
                    }
                }
            }
        }
        if self.mode != LoadMode::InitialLoad {
            self.changes.push_note(entry_path, "deleted");
        }
        Ok(true)
    }

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a collection.
    pub fn coll_clear(&mut self, id: ItemId) -> Result<()> {
        let had_entries = self.coll_data(id)?.len() > 0;
        {
            let data = self.coll_data_mut(id)?;
            match &mut data.entries {
                Entries::Hash(entries) => entries.clear(),
                Entries::List(entries) => entries.clear(),
            }
            data.defaults_done = true;
        }
        if had_entries {
            self.record_note(id, "cleared");
        }
        Ok(())
    }

    /// Appends values to a list of leaves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] for hashes or node cargo, and
    /// cardinality errors from the index checks.
    pub fn coll_push(&mut self, id: ItemId, values: &[&str], check: CheckPolicy) -> Result<()> {
        self.expect_list(id)?;
        for value in values {
            let key = self.coll_data(id)?.len().to_string();
            let entry = self.coll_get(id, &key, true)?.ok_or_else(|| {
                Error::internal("list autovivification failed")
            })?;
            self.store(entry, Some(value), check, false)?;
        }
        Ok(())
    }

    /// Prepends values to a list of leaves.
    ///
    /// # Errors
    ///
    /// See [`Instance::coll_push`].
    pub fn coll_unshift(&mut self, id: ItemId, values: &[&str], check: CheckPolicy) -> Result<()> {
        self.coll_insert_at(id, 0, values, check)
    }

    /// Inserts values at a list position.
    ///
    /// # Errors
    ///
    /// See [`Instance::coll_push`].
    pub fn coll_insert_at(
        &mut self,
        id: ItemId,
        index: usize,
        values: &[&str],
        check: CheckPolicy,
    ) -> Result<()> {
        self.expect_list(id)?;
        let len = self.coll_data(id)?.len();
        let spec = Arc::clone(&self.coll_data(id)?.spec);
        if let Some(max_nb) = spec.max_nb {
            if len + values.len() > max_nb {
                return Err(Error::WrongValue {
                    path: self.path_of(id),
                    reason: format!(
                        "cannot insert {} entries: max_nb ({max_nb}) reached",
                        values.len()
                    ),
                });
            }
        }
        let index = index.min(len);
        let mut new_ids = Vec::new();
        for value in values {
            let entry = self.build_cargo(id, &(len + new_ids.len()).to_string())?;
            self.store(entry, Some(value), check, false)?;
            new_ids.push(entry);
        }
        {
            let data = self.coll_data_mut(id)?;
            if let Entries::List(entries) = &mut data.entries {
                for (offset, entry) in new_ids.iter().enumerate() {
                    entries.insert(index + offset, *entry);
                }
            }
        }
        self.record_note(id, format!("inserted {} entries at {index}", values.len()));
        Ok(())
    }

    /// Inserts values before the first entry equal to `anchor`, or at
    /// the end when no entry matches.
    ///
    /// # Errors
    ///
    /// See [`Instance::coll_push`].
    pub fn coll_insert_before(
        &mut self,
        id: ItemId,
        anchor: &str,
        values: &[&str],
        check: CheckPolicy,
    ) -> Result<()> {
        let position = self.coll_value_position(id, anchor)?;
        let index = position.unwrap_or(self.coll_data(id)?.len());
        self.coll_insert_at(id, index, values, check)
    }

    /// Inserts a value keeping the list sorted.
    ///
    /// # Errors
    ///
    /// See [`Instance::coll_push`].
    pub fn coll_insort(&mut self, id: ItemId, values: &[&str], check: CheckPolicy) -> Result<()> {
        self.expect_list(id)?;
        for value in values {
            let contents = self.coll_contents(id)?;
            let index = contents
                .iter()
                .position(|existing| existing.as_deref() > Some(*value))
                .unwrap_or(contents.len());
            self.coll_insert_at(id, index, &[value], check)?;
        }
        Ok(())
    }

    /// Appends a value unless an equal entry already exists.
    ///
    /// # Errors
    ///
    /// See [`Instance::coll_push`].
    pub fn coll_ensure(&mut self, id: ItemId, value: &str, check: CheckPolicy) -> Result<bool> {
        if self.coll_value_position(id, value)?.is_some() {
            return Ok(false);
        }
        self.coll_push(id, &[value], check)?;
        Ok(true)
    }

    /// Sorts the collection: lists of leaves by content, hashes by key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] for lists of nodes.
    pub fn coll_sort(&mut self, id: ItemId) -> Result<()> {
        if self.coll_data(id)?.is_list() {
            let contents = self.coll_contents(id)?;
            let mut paired: Vec<(Option<String>, ItemId)> = contents
                .into_iter()
                .zip(self.coll_ids(id)?)
                .collect();
            paired.sort_by(|a, b| a.0.cmp(&b.0));
            let data = self.coll_data_mut(id)?;
            if let Entries::List(entries) = &mut data.entries {
                *entries = paired.into_iter().map(|(_, e)| e).collect();
            }
        } else {
            let data = self.coll_data_mut(id)?;
            if let Entries::Hash(entries) = &mut data.entries {
                entries.sort_by(|a, b| a.0.cmp(&b.0));
            }
        }
        self.record_note(id, "sorted");
        Ok(())
    }

    /// Swaps two entries of an ordered collection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownId`] when either key is absent.
    pub fn coll_swap(&mut self, id: ItemId, key_a: &str, key_b: &str) -> Result<()> {
        let position_a = self.position_of(id, key_a)?;
        let position_b = self.position_of(id, key_b)?;
        let data = self.coll_data_mut(id)?;
        match &mut data.entries {
            Entries::Hash(entries) => entries.swap(position_a, position_b),
            Entries::List(entries) => entries.swap(position_a, position_b),
        }
        self.record_note(id, format!("swapped '{key_a}' and '{key_b}'"));
        Ok(())
    }

    /// Moves an entry one position towards the front.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownId`] when the key is absent.
    pub fn coll_move_up(&mut self, id: ItemId, key: &str) -> Result<()> {
        let position = self.position_of(id, key)?;
        if position > 0 {
            let data = self.coll_data_mut(id)?;
            match &mut data.entries {
                Entries::Hash(entries) => entries.swap(position, position - 1),
                Entries::List(entries) => entries.swap(position, position - 1),
            }
            self.record_note(id, format!("moved '{key}' up"));
        }
        Ok(())
    }

    /// Moves an entry one position towards the back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownId`] when the key is absent.
    pub fn coll_move_down(&mut self, id: ItemId, key: &str) -> Result<()> {
        let position = self.position_of(id, key)?;
        let len = self.coll_data(id)?.len();
        if position + 1 < len {
            let data = self.coll_data_mut(id)?;
            match &mut data.entries {
                Entries::Hash(entries) => entries.swap(position, position + 1),
                Entries::List(entries) => entries.swap(position, position + 1),
            }
            self.record_note(id, format!("moved '{key}' down"));
        }
        Ok(())
    }

    /// Renames (hash) or relocates (list) an entry; an existing target
    /// is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownId`] when `from` is absent, and index
    /// check errors for an illegal target key.
    pub fn coll_move(&mut self, id: ItemId, from: &str, to: &str) -> Result<()> {
        let spec = Arc::clone(&self.coll_data(id)?.spec);
        let from = spec.convert_key(from);
        let to = spec.convert_key(to);
        if self.coll_data(id)?.get(&from).is_none() {
            return Err(Error::UnknownId {
                path: self.path_of(id),
                id: from,
            });
        }
        self.check_idx(id, &to, false)?;
        if self.coll_data(id)?.is_list() {
            let from_index: usize = from.parse().map_err(|_| Error::WrongValue {
                path: self.path_of(id),
                reason: format!("list index '{from}' is not an integer"),
            })?;
            let to_index: usize = to.parse().map_err(|_| Error::WrongValue {
                path: self.path_of(id),
                reason: format!("list index '{to}' is not an integer"),
            })?;
            let data = self.coll_data_mut(id)?;
            if let Entries::List(entries) = &mut data.entries {
                let entry = entries.remove(from_index);
                let to_index = to_index.min(entries.len());
                entries.insert(to_index, entry);
            }
        } else {
            {
                let data = self.coll_data_mut(id)?;
                if let Entries::Hash(entries) = &mut data.entries {
                    if let Some(existing) = entries.iter().position(|(k, _)| k == &to) {
                        entries.remove(existing);
                    }
                    if let Some(pair) = entries.iter_mut().find(|(k, _)| k == &from) {
                        pair.0.clone_from(&to);
                    }
                }
            }
            let moved = self.coll_data(id)?.get(&to);
            self.set_key_in_parent(moved, &to);
        }
        self.record_note(id, format!("moved '{from}' to '{to}'"));
        Ok(())
    }

    /// Copies the data of one entry onto another (autovivified) entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownId`] when `from` is absent.
    pub fn coll_copy(&mut self, id: ItemId, from: &str, to: &str) -> Result<()> {
        let source = self.coll_get(id, from, false)?.ok_or_else(|| Error::UnknownId {
            path: self.path_of(id),
            id: from.to_string(),
        })?;
        let target = self.coll_get(id, to, true)?.ok_or_else(|| Error::UnknownId {
            path: self.path_of(id),
            id: to.to_string(),
        })?;
        self.copy_user_data(source, target)?;
        self.record_note(id, format!("copied '{from}' to '{to}'"));
        Ok(())
    }

    /// Replaces the whole content of a list of leaves.
    ///
    /// # Errors
    ///
    /// Cardinality over-runs are hard errors; nothing is truncated.
    pub fn coll_load(&mut self, id: ItemId, values: &[&str], check: CheckPolicy) -> Result<()> {
        self.expect_list(id)?;
        let spec = Arc::clone(&self.coll_data(id)?.spec);
        if let Some(max_nb) = spec.max_nb {
            if values.len() > max_nb {
                return Err(Error::WrongValue {
                    path: self.path_of(id),
                    reason: format!(
                        "cannot load {} entries: max_nb is {max_nb}",
                        values.len()
                    ),
                });
            }
        }
        self.coll_clear(id)?;
        self.coll_push(id, values, check)
    }

    /// The leaf contents of every entry, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] for node cargo.
    pub fn coll_contents(&mut self, id: ItemId) -> Result<Vec<Option<String>>> {
        let ids = self.coll_ids(id)?;
        let mut contents = Vec::with_capacity(ids.len());
        for entry in ids {
            contents.push(self.fetch(entry, FetchMode::AllowUndef, CheckPolicy::Skip, true)?);
        }
        Ok(contents)
    }

    // ------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------

    /// Runs the index checks of the spec on a candidate key.
    ///
    /// Index warnings (`warn_if_key_match`, `warn_unless_key_match`) are
    /// logged and never fail the check.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongValue`] for bound, whitelist, pattern or
    /// cardinality violations.
    pub fn check_idx(&mut self, id: ItemId, key: &str, adding: bool) -> Result<()> {
        let spec = Arc::clone(&self.coll_data(id)?.spec);
        let is_list = self.coll_data(id)?.is_list();
        let path = self.path_of(id);

        if is_list || spec.index_type == IndexType::Integer {
            let index: i64 = key.parse().map_err(|_| Error::WrongValue {
                path: path.clone(),
                reason: format!("index '{key}' is not an integer"),
            })?;
            if let Some(min) = spec.min_index {
                if index < min {
                    return Err(Error::WrongValue {
                        path,
                        reason: format!("index {index} is below min_index {min}"),
                    });
                }
            }
            if let Some(max) = spec.max_index {
                if index > max {
                    return Err(Error::WrongValue {
                        path,
                        reason: format!("index {index} is above max_index {max}"),
                    });
                }
            }
        }

        if let Some(ref pattern) = spec.allow_keys_matching {
            if !pattern.is_match(key) {
                return Err(Error::WrongValue {
                    path,
                    reason: format!("key '{key}' does not match /{}/", pattern.as_str()),
                });
            }
        }

        if !spec.allow_keys.is_empty() && !spec.allow_keys.iter().any(|k| k == key) {
            return Err(Error::WrongValue {
                path,
                reason: format!(
                    "key '{key}' is not allowed (allowed: {})",
                    spec.allow_keys.join(",")
                ),
            });
        }

        for source in [&spec.allow_keys_from, &spec.follow_keys_from]
            .into_iter()
            .flatten()
        {
            let steps = parse_path(source)?;
            let allowed = match self.resolve_path(id, &steps, true) {
                Ok(target) => self.coll_keys_lazy(target)?,
                Err(_) => Vec::new(),
            };
            if !allowed.iter().any(|k| k == key) {
                return Err(Error::WrongValue {
                    path,
                    reason: format!("key '{key}' is not a key of '{source}'"),
                });
            }
        }

        if adding {
            if let Some(max_nb) = spec.max_nb {
                if self.coll_data(id)?.len() + 1 > max_nb {
                    return Err(Error::WrongValue {
                        path,
                        reason: format!("cannot add '{key}': max_nb ({max_nb}) reached"),
                    });
                }
            }
        }

        if let Some(ref pattern) = spec.warn_if_key_match {
            if pattern.is_match(key) {
                self.logger
                    .warn(&format!("{path}: key '{key}' matches /{}/", pattern.as_str()));
            }
        }
        if let Some(ref pattern) = spec.warn_unless_key_match {
            if !pattern.is_match(key) {
                self.logger.warn(&format!(
                    "{path}: key '{key}' does not match /{}/",
                    pattern.as_str()
                ));
            }
        }

        Ok(())
    }

    /// Runs the content checks after bulk mutations; the built-in
    /// checker handles the duplicates policy.
    ///
    /// Returns the accumulated errors and warnings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a collection.
    pub fn check_content(
        &mut self,
        id: ItemId,
        apply_fix: bool,
        silent: bool,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let policy = self.coll_data(id)?.spec.duplicates;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        // Only leaf cargo has values to compare.
        let leaf_cargo = matches!(self.coll_data(id)?.spec.cargo, CargoSpec::Leaf(_));
        if policy == DuplicatesPolicy::Allow || !leaf_cargo {
            return Ok((errors, warnings));
        }

        let keys = self.coll_keys(id)?;
        let contents = self.coll_contents(id)?;
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut duplicate_keys = Vec::new();
        for (key, content) in keys.iter().zip(contents) {
            let Some(content) = content else { continue };
            if let Some(first) = seen.get(&content) {
                match policy {
                    DuplicatesPolicy::Forbid => errors.push(format!(
                        "duplicate value '{content}' at '{key}' (first at '{first}')"
                    )),
                    DuplicatesPolicy::Warn => {
                        warnings.push(format!(
                            "duplicate value '{content}' at '{key}' (first at '{first}')"
                        ));
                        if apply_fix {
                            duplicate_keys.push(key.clone());
                        }
                    }
                    DuplicatesPolicy::Suppress => duplicate_keys.push(key.clone()),
                    DuplicatesPolicy::Allow => {}
                }
            } else {
                seen.insert(content, key.clone());
            }
        }

        // Delete from the back so list indices stay valid.
        for key in duplicate_keys.iter().rev() {
            self.coll_delete(id, key)?;
        }

        if !silent {
            let path = self.path_of(id);
            for warning in &warnings {
                self.logger.warn(&format!("{path}: {warning}"));
            }
        }
        Ok((errors, warnings))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn expect_list(&self, id: ItemId) -> Result<()> {
        if self.coll_data(id)?.is_list() {
            Ok(())
        } else {
            Err(self.wrong_type(id, "list"))
        }
    }

    fn position_of(&self, id: ItemId, key: &str) -> Result<usize> {
        let data = self.coll_data(id)?;
        let position = match &data.entries {
            Entries::Hash(entries) => entries.iter().position(|(k, _)| k == key),
            Entries::List(entries) => key
                .parse::<usize>()
                .ok()
                .filter(|i| *i < entries.len()),
        };
        position.ok_or_else(|| Error::UnknownId {
            path: self.path_of(id),
            id: key.to_string(),
        })
    }

    fn coll_value_position(&mut self, id: ItemId, value: &str) -> Result<Option<usize>> {
        let contents = self.coll_contents(id)?;
        Ok(contents
            .iter()
            .position(|content| content.as_deref() == Some(value)))
    }

    fn set_key_in_parent(&mut self, entry: Option<ItemId>, key: &str) {
        if let Some(entry) = entry {
            match self.item_mut(entry) {
                Item::Node(data) => data.key_in_parent = key.to_string(),
                Item::Value(data) => data.key_in_parent = key.to_string(),
                Item::Collection(data) => data.key_in_parent = key.to_string(),
                Item::CheckList(data) => data.key_in_parent = key.to_string(),
            }
        }
    }

    /// Builds a cargo item without linking it into the entries.
    fn build_cargo(&mut self, coll_id: ItemId, key: &str) -> Result<ItemId> {
        let cargo = self.coll_data(coll_id)?.spec.cargo.clone();
        let data_mode = match self.mode {
            LoadMode::Preset => DataMode::Preset,
            LoadMode::Layered => DataMode::Layered,
            LoadMode::Normal | LoadMode::InitialLoad => DataMode::Normal,
        };
        let item = match cargo {
            CargoSpec::Leaf(spec) => {
                Item::Value(ValueData::new(spec, Some(coll_id), key, data_mode))
            }
            CargoSpec::Node { class } => {
                let class = self.catalog.require(&class)?;
                Item::Node(NodeData::new(class, Some(coll_id), key))
            }
        };
        Ok(self.alloc(item))
    }

    fn create_entry(&mut self, coll_id: ItemId, key: &str) -> Result<ItemId> {
        let entry = self.build_cargo(coll_id, key)?;
        {
            let data = self.coll_data_mut(coll_id)?;
            match &mut data.entries {
                Entries::Hash(entries) => entries.push((key.to_string(), entry)),
                Entries::List(entries) => entries.push(entry),
            }
        }
        if self.mode == LoadMode::Normal {
            self.record_note(entry, "created");
        }
        Ok(entry)
    }

    pub(crate) fn ensure_lazy_defaults(&mut self, id: ItemId) -> Result<()> {
        let (defaults_done, empty, keys_migrated) = {
            let data = self.coll_data(id)?;
            (data.defaults_done, data.len() == 0, data.keys_migrated)
        };
        if !defaults_done {
            self.coll_data_mut(id)?.defaults_done = true;
            if empty {
                let spec = Arc::clone(&self.coll_data(id)?.spec);
                for key in &spec.default_keys {
                    self.coll_get(id, key, true)?;
                }
                for (key, program) in &spec.default_with_init {
                    if let Some(entry) = self.coll_get(id, key, true)? {
                        if matches!(self.item(entry), Item::Node(_)) {
                            crate::loader::run(self, entry, program, CheckPolicy::Yes)?;
                        } else {
                            self.store(entry, Some(program), CheckPolicy::Yes, false)?;
                        }
                    }
                }
            }
        }
        if !keys_migrated && self.mode != LoadMode::InitialLoad {
            self.coll_data_mut(id)?.keys_migrated = true;
            let spec = Arc::clone(&self.coll_data(id)?.spec);
            if let Some(ref source) = spec.migrate_keys_from {
                let steps = parse_path(source)?;
                if let Ok(target) = self.resolve_path(id, &steps, true) {
                    for key in self.coll_keys_lazy(target)? {
                        self.coll_get(id, &key, true)?;
                    }
                }
            }
            if let Some(ref source) = spec.migrate_values_from {
                let steps = parse_path(source)?;
                if let Ok(target) = self.resolve_path(id, &steps, true) {
                    for key in self.coll_keys_lazy(target)? {
                        let Some(source_entry) = self.coll_get(target, &key, false)? else {
                            continue;
                        };
                        let value =
                            self.fetch(source_entry, FetchMode::User, CheckPolicy::Skip, true)?;
                        if let Some(value) = value {
                            self.coll_store(id, &key, Some(&value), CheckPolicy::Skip)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Recursively copies custom data from one item onto another of the
    /// same shape.
    pub(crate) fn copy_user_data(&mut self, source: ItemId, target: ItemId) -> Result<()> {
        match self.kind_of(source) {
            crate::tree::ItemKind::Leaf => {
                let value = self.fetch(source, FetchMode::Custom, CheckPolicy::Skip, true)?;
                if value.is_some() {
                    self.store(target, value.as_deref(), CheckPolicy::Skip, true)?;
                }
            }
            crate::tree::ItemKind::Hash | crate::tree::ItemKind::List => {
                for key in self.coll_keys(source)? {
                    let Some(source_entry) = self.coll_get(source, &key, false)? else {
                        continue;
                    };
                    if let Some(target_entry) = self.coll_get(target, &key, true)? {
                        self.copy_user_data(source_entry, target_entry)?;
                    }
                }
            }
            crate::tree::ItemKind::Node => {
                for name in self.children(source, true)? {
                    let Some(source_child) =
                        self.fetch_element(source, &name, CheckPolicy::Skip, false, true)?
                    else {
                        continue;
                    };
                    if !self.has_data(source_child)? {
                        continue;
                    }
                    if let Some(target_child) =
                        self.fetch_element(target, &name, CheckPolicy::Skip, true, true)?
                    {
                        self.copy_user_data(source_child, target_child)?;
                    }
                }
            }
            crate::tree::ItemKind::CheckList => {
                let checked = self.checklist_checked(source)?;
                let joined = checked.join(",");
                self.checklist_store(target, &joined)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Check-lists
    // ------------------------------------------------------------------

    pub(crate) fn checklist_data(&self, id: ItemId) -> Result<&CheckListData> {
        match self.item(id) {
            Item::CheckList(data) => Ok(data),
            _ => Err(self.wrong_type(id, "check_list")),
        }
    }

    pub(crate) fn checklist_data_mut(&mut self, id: ItemId) -> Result<&mut CheckListData> {
        if matches!(self.item(id), Item::CheckList(_)) {
            match self.item_mut(id) {
                Item::CheckList(data) => Ok(data),
                _ => unreachable!(),
            }
        } else {
            Err(self.wrong_type(id, "check_list"))
        }
    }

    /// The checked items, in choice order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a check-list.
    pub fn checklist_checked(&self, id: ItemId) -> Result<Vec<String>> {
        let data = self.checklist_data(id)?;
        Ok(data
            .spec
            .choice
            .iter()
            .filter(|c| data.checked.contains(*c))
            .cloned()
            .collect())
    }

    /// Checks one item.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongValue`] for unknown items.
    pub fn checklist_check(&mut self, id: ItemId, item: &str) -> Result<()> {
        let known = self
            .checklist_data(id)?
            .spec
            .choice
            .iter()
            .any(|c| c == item);
        if !known {
            let choices = self.checklist_data(id)?.spec.choice.join(",");
            return Err(Error::WrongValue {
                path: self.path_of(id),
                reason: format!("'{item}' is not of choice {choices}"),
            });
        }
        if self.checklist_data_mut(id)?.checked.insert(item.to_string()) {
            self.record_note(id, format!("checked '{item}'"));
        }
        Ok(())
    }

    /// Unchecks one item.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a check-list.
    pub fn checklist_uncheck(&mut self, id: ItemId, item: &str) -> Result<()> {
        let removed = self.checklist_data_mut(id)?.checked.remove(item);
        if removed {
            self.record_note(id, format!("unchecked '{item}'"));
        }
        Ok(())
    }

    /// Replaces the checked set with a comma-separated list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongValue`] for unknown items; nothing is
    /// changed in that case.
    pub fn checklist_store(&mut self, id: ItemId, items: &str) -> Result<()> {
        let wanted: Vec<String> = items
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        {
            let data = self.checklist_data(id)?;
            for item in &wanted {
                if !data.spec.choice.iter().any(|c| c == item) {
                    let choices = data.spec.choice.join(",");
                    let path = self.path_of(id);
                    return Err(Error::WrongValue {
                        path,
                        reason: format!("'{item}' is not of choice {choices}"),
                    });
                }
            }
        }
        self.checklist_data_mut(id)?.checked = wanted.into_iter().collect();
        self.record_note(id, "check list set");
        Ok(())
    }

    /// Resets the checked set to the schema defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a check-list.
    pub fn checklist_clear(&mut self, id: ItemId) -> Result<()> {
        {
            let data = self.checklist_data_mut(id)?;
            data.checked = data.spec.default_checked.iter().cloned().collect();
        }
        self.record_note(id, "check list reset");
        Ok(())
    }
}
