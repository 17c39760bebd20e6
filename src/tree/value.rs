//! Live leaves: the store and fetch protocols.
//!
//! A leaf holds up to three writable slots (user, preset, layered) on
//! top of the schema's computed content and defaults. Reads resolve the
//! precedence chain selected by the fetch mode; writes run the transform
//! and validation pipeline, pick their slot from the instance mode, and
//! fire change notification.

use crate::error::{Error, Result};
use crate::schema::{CheckContext, ComputeSpec, ValueSpec, ValueType};
use crate::tree::path::parse_path;
use crate::tree::{CheckPolicy, DataMode, FetchMode, Item, ItemId, LoadMode};
use crate::Instance;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Live state of one leaf.
#[derive(Debug)]
pub(crate) struct ValueData {
    pub spec: Arc<ValueSpec>,
    pub parent: Option<ItemId>,
    pub key_in_parent: String,
    pub user: Option<String>,
    pub preset: Option<String>,
    pub layered: Option<String>,
    pub data_mode: DataMode,
    pub annotation: Option<String>,
    pub migration_done: bool,
    pub pending_fixes: usize,
    /// Messages already emitted at warn level; repeats drop to debug
    /// until the value changes.
    pub warned: HashSet<String>,
}

impl ValueData {
    pub(crate) fn new(
        spec: Arc<ValueSpec>,
        parent: Option<ItemId>,
        key_in_parent: &str,
        data_mode: DataMode,
    ) -> Self {
        Self {
            spec,
            parent,
            key_in_parent: key_in_parent.to_string(),
            user: None,
            preset: None,
            layered: None,
            data_mode,
            annotation: None,
            migration_done: false,
            pending_fixes: 0,
            warned: HashSet::new(),
        }
    }
}

impl Instance {
    pub(crate) fn value_data(&self, id: ItemId) -> Result<&ValueData> {
        match self.item(id) {
            Item::Value(data) => Ok(data),
            _ => Err(self.wrong_type(id, "leaf")),
        }
    }

    pub(crate) fn value_data_mut(&mut self, id: ItemId) -> Result<&mut ValueData> {
        if matches!(self.item(id), Item::Value(_)) {
            match self.item_mut(id) {
                Item::Value(data) => Ok(data),
                _ => unreachable!(),
            }
        } else {
            Err(self.wrong_type(id, "leaf"))
        }
    }

    /// Stores a value into a leaf; `None` clears the slot selected by
    /// the instance mode.
    ///
    /// Returns whether the slot content actually changed.
    ///
    /// # Errors
    ///
    /// With `check` set to [`CheckPolicy::Yes`], returns
    /// [`Error::WrongValue`] on validation failure and refuses stores to
    /// computed leaves without `allow_override`. Softer policies record
    /// the error on the instance instead.
    pub fn store(
        &mut self,
        id: ItemId,
        value: Option<&str>,
        check: CheckPolicy,
        silent: bool,
    ) -> Result<bool> {
        let spec = Arc::clone(&self.value_data(id)?.spec);

        if let Some(ref compute) = spec.compute {
            if !compute.allow_override {
                return match check {
                    CheckPolicy::Yes => Err(Error::WrongValue {
                        path: self.path_of(id),
                        reason: "value is computed and cannot be overridden".to_string(),
                    }),
                    CheckPolicy::No | CheckPolicy::Skip => Ok(false),
                };
            }
        }

        let Some(raw) = value else {
            return self.store_slot(id, None, false);
        };

        let transformed = match spec.transform(raw) {
            Ok(v) => v,
            Err(e) => {
                let reason = match e {
                    Error::WrongValue { reason, .. } => reason,
                    other => other.to_string(),
                };
                let path = self.path_of(id);
                match check {
                    CheckPolicy::Yes => {
                        return Err(Error::WrongValue { path, reason });
                    }
                    CheckPolicy::Skip => {
                        self.record_error(&path, reason.clone());
                        if !silent {
                            self.warn_value(id, &reason)?;
                        }
                        return Ok(false);
                    }
                    CheckPolicy::No => {
                        self.record_error(&path, reason);
                        return self.store_slot(id, Some(raw.to_string()), false);
                    }
                }
            }
        };
        // Initial-load suppression only lifts when convert/replace
        // actually mutated the value; boolean spelling normalization
        // does not count as a model transform.
        let neutral = if spec.value_type == ValueType::Boolean {
            spec.normalize_boolean(raw)
                .unwrap_or_else(|_| raw.to_string())
        } else {
            raw.to_string()
        };
        let was_transformed = transformed != neutral;

        // An empty store on a mandatory leaf falls back to the resolved
        // non-user value.
        let mut candidate = transformed;
        if candidate.is_empty() && spec.mandatory {
            if let Some(standard) = self.fetch(id, FetchMode::Standard, CheckPolicy::Skip, true)? {
                candidate = standard;
            }
        }

        let ctx = self.check_context_for(id, &spec)?;
        let report = spec.check_value(&candidate, &ctx);
        self.value_data_mut(id)?.pending_fixes = report.fix_count();
        if !silent {
            for warning in report.warnings.clone() {
                self.warn_value(id, &warning)?;
            }
        }
        if !report.is_ok() {
            let reason = report.errors.join("; ");
            let path = self.path_of(id);
            match check {
                CheckPolicy::Yes => return Err(Error::WrongValue { path, reason }),
                CheckPolicy::Skip => {
                    self.record_error(&path, reason.clone());
                    if !silent {
                        self.logger.warn(&format!("{path}: skipped value: {reason}"));
                    }
                    return Ok(false);
                }
                CheckPolicy::No => {
                    self.record_error(&path, reason);
                }
            }
        }

        self.store_slot(id, Some(candidate), was_transformed)
    }

    /// Clears the leaf: the user slot is removed and precedence falls to
    /// the next source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a leaf.
    pub fn clear(&mut self, id: ItemId) -> Result<()> {
        self.store(id, None, CheckPolicy::Yes, false)?;
        Ok(())
    }

    /// Appends text to the current user-visible content.
    ///
    /// # Errors
    ///
    /// Returns store protocol errors.
    pub fn append(
        &mut self,
        id: ItemId,
        value: &str,
        check: CheckPolicy,
        silent: bool,
    ) -> Result<bool> {
        let current = self
            .fetch(id, FetchMode::User, CheckPolicy::Skip, true)?
            .unwrap_or_default();
        let combined = format!("{current}{value}");
        self.store(id, Some(&combined), check, silent)
    }

    fn store_slot(&mut self, id: ItemId, new: Option<String>, transformed: bool) -> Result<bool> {
        let mode = self.mode;
        let data = self.value_data_mut(id)?;
        let slot = match mode {
            LoadMode::Normal | LoadMode::InitialLoad => &mut data.user,
            LoadMode::Preset => &mut data.preset,
            LoadMode::Layered => &mut data.layered,
        };
        let old = slot.clone();
        if old == new {
            return Ok(false);
        }
        *slot = new.clone();
        data.warned.clear();
        self.record_value_change(id, old, new, None, transformed);
        self.notify_dependants(id)?;
        Ok(true)
    }

    /// Fetches the leaf content in the given mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::User`] when a mandatory leaf resolves to empty in
    /// a mode that requires content, and [`Error::WrongType`] when the
    /// item is not a leaf.
    pub fn fetch(
        &mut self,
        id: ItemId,
        mode: FetchMode,
        check: CheckPolicy,
        silent: bool,
    ) -> Result<Option<String>> {
        self.maybe_migrate(id, check)?;
        let spec = Arc::clone(&self.value_data(id)?.spec);

        let computed = match spec.compute {
            Some(ref compute) => self.eval_compute_guarded(id, compute)?,
            None => None,
        };

        let data = self.value_data(id)?;
        let user = data.user.clone();
        let preset = data.preset.clone();
        let layered = data.layered.clone();
        let default = spec.default.clone();
        let upstream = spec.upstream_default.clone();

        let standard = preset
            .clone()
            .or_else(|| computed.clone())
            .or_else(|| layered.clone())
            .or_else(|| default.clone())
            .or_else(|| upstream.clone());

        let mut resolved = match mode {
            FetchMode::Backend => user
                .clone()
                .or(preset)
                .or(computed)
                .or(default),
            FetchMode::User | FetchMode::AllowUndef => user.clone().or_else(|| standard.clone()),
            FetchMode::Custom => match user {
                Some(u) if standard.as_ref() != Some(&u) => Some(u),
                _ => None,
            },
            FetchMode::Standard => standard,
            FetchMode::Preset => preset,
            FetchMode::Default => default,
            FetchMode::UpstreamDefault => upstream,
            FetchMode::Layered => layered,
            FetchMode::NonUpstreamDefault => user
                .clone()
                .or(preset)
                .or(computed)
                .or(layered)
                .or(default),
        };

        if let Some(ref follow_path) = spec.replace_follow {
            let follow_path = follow_path.clone();
            if let Some(ref v) = resolved {
                let v = v.clone();
                if let Some(replacement) = self.follow_replacement(id, &follow_path, &v)? {
                    if replacement != v {
                        self.record_note(
                            id,
                            format!("replaced '{v}' with '{replacement}' (replace_follow)"),
                        );
                        resolved = Some(replacement);
                    }
                }
            }
        }

        let is_empty = resolved.as_deref().map_or(true, str::is_empty);
        let mandatory_applies = matches!(
            mode,
            FetchMode::Backend
                | FetchMode::User
                | FetchMode::Standard
                | FetchMode::NonUpstreamDefault
        );
        if is_empty && spec.mandatory && mandatory_applies {
            let path = self.path_of(id);
            match check {
                CheckPolicy::Yes => {
                    return Err(Error::User {
                        path,
                        reason: "mandatory value is not defined".to_string(),
                    })
                }
                CheckPolicy::No => {
                    self.record_error(&path, "mandatory value is not defined".to_string());
                    if !silent {
                        self.logger
                            .warn(&format!("{path}: mandatory value is not defined"));
                    }
                    return Ok(None);
                }
                CheckPolicy::Skip => return Ok(None),
            }
        }

        if spec.value_type == ValueType::Boolean {
            if let (Some([false_str, true_str]), Some(ref v)) = (&spec.write_as, &resolved) {
                resolved = Some(if v == "1" {
                    true_str.clone()
                } else {
                    false_str.clone()
                });
            }
        }

        Ok(resolved)
    }

    /// Whether reading in custom mode yields a value: the user slot
    /// differs from every lower source. For collections, whether any
    /// entry exists after lazy defaults; for nodes, whether any child
    /// has data.
    ///
    /// # Errors
    ///
    /// Propagates read errors.
    pub fn has_data(&mut self, id: ItemId) -> Result<bool> {
        match self.kind_of(id) {
            crate::tree::ItemKind::Leaf => Ok(self
                .fetch(id, FetchMode::Custom, CheckPolicy::Skip, true)?
                .is_some()),
            crate::tree::ItemKind::Hash | crate::tree::ItemKind::List => {
                Ok(!self.coll_keys_lazy(id)?.is_empty())
            }
            crate::tree::ItemKind::CheckList => Ok(!self.checklist_checked(id)?.is_empty()),
            crate::tree::ItemKind::Node => {
                let children = self.children(id, false)?;
                for name in children {
                    if let Some(child) =
                        self.fetch_element(id, &name, CheckPolicy::Skip, false, false)?
                    {
                        if self.has_data(child)? {
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }
        }
    }

    /// Number of fixes available from the last validation run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a leaf.
    pub fn has_fixes(&self, id: ItemId) -> Result<usize> {
        Ok(self.value_data(id)?.pending_fixes)
    }

    /// The data mode a leaf was created under (collection cargo is
    /// tagged with the instance mode at autovivification time).
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a leaf.
    pub fn data_mode(&self, id: ItemId) -> Result<DataMode> {
        Ok(self.value_data(id)?.data_mode)
    }

    /// Re-runs validation in fix mode, applying every available fix
    /// until none are left.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] when 20 iterations did not reach a fixed
    /// point.
    pub fn apply_fixes(&mut self, id: ItemId) -> Result<()> {
        for _ in 0..20 {
            let spec = Arc::clone(&self.value_data(id)?.spec);
            let Some(current) = self.fetch(id, FetchMode::User, CheckPolicy::Skip, true)? else {
                return Ok(());
            };
            let ctx = self.check_context_for(id, &spec)?;
            let report = spec.check_value(&current, &ctx);
            self.value_data_mut(id)?.pending_fixes = report.fix_count();
            if report.fixes.is_empty() {
                return Ok(());
            }
            let mut value = current.clone();
            let mut applied = Vec::new();
            for (msg, fix) in &report.fixes {
                value = fix(&value);
                applied.push(msg.clone());
            }
            if value == current {
                return Ok(());
            }
            {
                let data = self.value_data_mut(id)?;
                data.user = Some(value.clone());
                data.warned.clear();
            }
            self.record_value_change(
                id,
                Some(current),
                Some(value),
                Some(format!("applied fix: {}", applied.join("; "))),
                true,
            );
            self.notify_dependants(id)?;
        }
        Err(Error::model(format!(
            "fix loop exceeded 20 iterations at '{}'",
            self.path_of(id)
        )))
    }

    /// Swaps the spec of a live leaf, dropping slot contents that the
    /// new spec rejects.
    ///
    /// This is the entry point for schema updates and warp effects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a leaf.
    pub fn set_leaf_spec(&mut self, id: ItemId, spec: Arc<ValueSpec>) -> Result<()> {
        self.value_data_mut(id)?.spec = Arc::clone(&spec);
        let ctx = self.check_context_for(id, &spec)?;
        let slots = {
            let data = self.value_data(id)?;
            [
                (0usize, data.user.clone()),
                (1, data.preset.clone()),
                (2, data.layered.clone()),
            ]
        };
        for (slot_index, content) in slots {
            let Some(v) = content else { continue };
            let valid = spec
                .transform(&v)
                .map(|canonical| spec.check_value(&canonical, &ctx).is_ok())
                .unwrap_or(false);
            if !valid {
                {
                    let data = self.value_data_mut(id)?;
                    match slot_index {
                        0 => data.user = None,
                        1 => data.preset = None,
                        _ => data.layered = None,
                    }
                }
                self.record_value_change(
                    id,
                    Some(v),
                    None,
                    Some("dropping value invalid for new schema".to_string()),
                    true,
                );
            }
        }
        self.value_data_mut(id)?.warned.clear();
        Ok(())
    }

    /// The help text matching the current content, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongType`] when the item is not a leaf.
    pub fn help(&mut self, id: ItemId) -> Result<Option<String>> {
        let spec = Arc::clone(&self.value_data(id)?.spec);
        let content = self
            .fetch(id, FetchMode::AllowUndef, CheckPolicy::Skip, true)?
            .unwrap_or_default();
        Ok(spec.help_for(&content).map(str::to_string))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    pub(crate) fn check_context_for(
        &mut self,
        id: ItemId,
        spec: &ValueSpec,
    ) -> Result<CheckContext> {
        let mut ctx = CheckContext {
            refer_choices: None,
            root_dir: Some(self.root_dir.clone()),
        };
        let refer_path = if let Some(ref path) = spec.refer_to {
            Some(path.clone())
        } else if let Some(ref compute) = spec.computed_refer_to {
            self.eval_compute_guarded(id, compute)?
        } else {
            None
        };
        if let Some(path) = refer_path {
            let steps = parse_path(&path)?;
            ctx.refer_choices = match self.resolve_path(id, &steps, true) {
                Ok(target) => Some(self.coll_keys_lazy(target)?),
                Err(_) => Some(Vec::new()),
            };
        }
        Ok(ctx)
    }

    fn eval_compute_guarded(
        &mut self,
        id: ItemId,
        compute: &ComputeSpec,
    ) -> Result<Option<String>> {
        if self.computing.contains(&id) {
            return Err(Error::model(format!(
                "computed value at '{}' depends on itself",
                self.path_of(id)
            )));
        }
        self.computing.push(id);
        let outcome = self.eval_compute(id, compute);
        self.computing.pop();
        outcome
    }

    fn eval_compute(&mut self, id: ItemId, compute: &ComputeSpec) -> Result<Option<String>> {
        let mut values = BTreeMap::new();
        let mut missing = false;
        for (var, path) in &compute.variables {
            let steps = parse_path(path)?;
            let resolved = match self.resolve_path(id, &steps, true) {
                Ok(target) => self.fetch(target, FetchMode::User, CheckPolicy::Skip, true)?,
                Err(_) => None,
            };
            if resolved.is_none() {
                missing = true;
            }
            values.insert(var.clone(), resolved.unwrap_or_default());
        }
        if compute.use_eval {
            if missing {
                return Ok(None);
            }
            let substituted = compute.substitute(&values);
            let number = crate::schema::eval_arith(&substituted).map_err(|e| match e {
                Error::WrongValue { reason, .. } => Error::WrongValue {
                    path: self.path_of(id),
                    reason,
                },
                other => other,
            })?;
            return Ok(Some(number.to_string()));
        }
        let substituted = compute.substitute(&values);
        if substituted.is_empty() && missing {
            return Ok(None);
        }
        Ok(Some(substituted))
    }

    fn maybe_migrate(&mut self, id: ItemId, check: CheckPolicy) -> Result<()> {
        let (pending, user_set) = {
            let data = self.value_data(id)?;
            (
                data.spec.migrate_from.is_some() && !data.migration_done,
                data.user.is_some(),
            )
        };
        if !pending || self.mode == LoadMode::InitialLoad {
            return Ok(());
        }
        // Latch before evaluating so recursive reads terminate.
        self.value_data_mut(id)?.migration_done = true;
        if user_set {
            return Ok(());
        }
        let spec = Arc::clone(&self.value_data(id)?.spec);
        let migrate = spec.migrate_from.clone().unwrap_or_default();
        let Some(result) = self.eval_compute_guarded(id, &migrate)? else {
            return Ok(());
        };
        if result.is_empty() {
            return Ok(());
        }
        let canonical = spec.transform(&result)?;
        let ctx = self.check_context_for(id, &spec)?;
        let report = spec.check_value(&canonical, &ctx);
        if report.is_ok() {
            {
                let data = self.value_data_mut(id)?;
                data.user = Some(canonical.clone());
            }
            self.record_value_change(
                id,
                None,
                Some(canonical),
                Some("migrated value".to_string()),
                true,
            );
            self.notify_dependants(id)?;
        } else {
            let reason = report.errors.join("; ");
            let path = self.path_of(id);
            if check == CheckPolicy::Yes {
                return Err(Error::WrongValue { path, reason });
            }
            self.record_error(&path, reason);
        }
        Ok(())
    }

    fn follow_replacement(
        &mut self,
        id: ItemId,
        follow_path: &str,
        value: &str,
    ) -> Result<Option<String>> {
        let steps = parse_path(follow_path)?;
        let Ok(target) = self.resolve_path(id, &steps, true) else {
            return Ok(None);
        };
        let Some(entry) = self.coll_get(target, value, false)? else {
            return Ok(None);
        };
        self.fetch(entry, FetchMode::User, CheckPolicy::Skip, true)
    }

    /// Emits a warning for a leaf, once per identical message at warn
    /// level; repeats drop to debug until the value changes.
    pub(crate) fn warn_value(&mut self, id: ItemId, message: &str) -> Result<()> {
        let logger = self.logger;
        let path = self.path_of(id);
        let data = self.value_data_mut(id)?;
        if data.warned.insert(message.to_string()) {
            logger.warn(&format!("{path}: {message}"));
        } else {
            logger.debug(&format!("{path}: {message}"));
        }
        Ok(())
    }
}
