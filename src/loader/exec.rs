//! Command execution against the tree.
//!
//! A program runs left to right against a stack whose top is the current
//! node. Regex loops save the residual command tail at loop entry and
//! replay it once per matching key; a pop above the loop-starting node
//! ends the iteration.

use crate::error::{Error, Result};
use crate::loader::command::{Action, Command, ElementCmd, SubAction};
use crate::loader::data;
use crate::tree::{CheckPolicy, FetchMode, ItemId, ItemKind};
use crate::Instance;
use regex::Regex;

/// How a command sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Every command was consumed.
    Done,
    /// A pop went above the base of the stack; the index is the first
    /// unconsumed command.
    Exited(usize),
}

pub(crate) struct Executor<'a> {
    pub instance: &'a mut Instance,
    pub check: CheckPolicy,
    /// Non-zero while replaying a regex-loop tail: `!` does not move the
    /// stack then.
    loop_depth: usize,
}

impl<'a> Executor<'a> {
    pub(crate) fn new(instance: &'a mut Instance, check: CheckPolicy) -> Self {
        Self {
            instance,
            check,
            loop_depth: 0,
        }
    }

    /// Runs a full program from a starting node and applies the
    /// termination rules of `load()`.
    pub(crate) fn run(&mut self, start: ItemId, commands: &[Command]) -> Result<()> {
        let mut stack = vec![start];
        match self.exec_commands(&mut stack, commands)? {
            Flow::Done => Ok(()),
            Flow::Exited(next) => match commands.get(next) {
                None => Ok(()),
                Some(Command::Search(name)) => self.residual_error(
                    &format!("/{name}"),
                    format!("searched item '{name}' not found"),
                ),
                Some(residual) => {
                    let text = match residual {
                        Command::Root => "!".to_string(),
                        Command::Up => "-".to_string(),
                        Command::Search(name) => format!("/{name}"),
                        Command::Element(cmd) => cmd.raw.clone(),
                    };
                    self.residual_error(&text, "too many '-' in your command".to_string())
                }
            },
        }
    }

    fn residual_error(&mut self, command: &str, reason: String) -> Result<()> {
        match self.check {
            CheckPolicy::Yes => Err(Error::Load {
                command: command.to_string(),
                reason,
            }),
            CheckPolicy::No => {
                self.instance.record_error("", format!("{command}: {reason}"));
                Ok(())
            }
            CheckPolicy::Skip => Ok(()),
        }
    }

    /// Executes commands against the stack. The stack base (index 0) is
    /// the program's starting node; popping past it exits.
    fn exec_commands(&mut self, stack: &mut Vec<ItemId>, commands: &[Command]) -> Result<Flow> {
        let mut index = 0;
        while index < commands.len() {
            match &commands[index] {
                Command::Root => {
                    // Regex loops pin the stack; `!` is inert inside one.
                    if self.loop_depth == 0 {
                        stack.truncate(1);
                        stack[0] = self.instance.root();
                    }
                }
                Command::Up => {
                    stack.pop();
                    if stack.is_empty() {
                        return Ok(Flow::Exited(index + 1));
                    }
                }
                Command::Search(name) => {
                    let found = self.search_up(*stack.last().expect("non-empty stack"), name)?;
                    match found {
                        Some(node) => {
                            // Searching moves up: drop back to the found
                            // ancestor when it is already on the stack.
                            if let Some(position) = stack.iter().rposition(|i| *i == node) {
                                stack.truncate(position + 1);
                            } else {
                                stack.push(node);
                            }
                        }
                        None => {
                            return match self.check {
                                CheckPolicy::Yes => Err(Error::Load {
                                    command: format!("/{name}"),
                                    reason: format!("searched item '{name}' not found"),
                                }),
                                CheckPolicy::No => {
                                    self.instance.record_error(
                                        "",
                                        format!("searched item '{name}' not found"),
                                    );
                                    Ok(Flow::Done)
                                }
                                CheckPolicy::Skip => Ok(Flow::Done),
                            };
                        }
                    }
                }
                Command::Element(cmd) => {
                    if let Some(Action::LoopMatch(ref pattern)) = cmd.action {
                        self.exec_loop(stack, cmd, pattern, &commands[index + 1..])?;
                        return Ok(Flow::Done);
                    }
                    self.exec_element(stack, cmd)?;
                }
            }
            index += 1;
        }
        Ok(Flow::Done)
    }

    /// Walks up from the current node until one has the element.
    fn search_up(&mut self, from: ItemId, name: &str) -> Result<Option<ItemId>> {
        let mut current = self.instance.parent_node(from);
        if matches!(self.instance.kind_of(from), ItemKind::Node) {
            current = from;
        }
        loop {
            let has = self
                .instance
                .node_data(current)?
                .elements
                .iter()
                .any(|e| e.spec.name == name);
            if has {
                return Ok(Some(current));
            }
            let up = self.instance.parent_node(current);
            if up == current {
                return Ok(None);
            }
            current = up;
        }
    }

    /// Runs the residual tail once per matching key.
    fn exec_loop(
        &mut self,
        stack: &mut [ItemId],
        cmd: &ElementCmd,
        pattern: &str,
        tail: &[Command],
    ) -> Result<()> {
        let current = *stack.last().expect("non-empty stack");
        let Some(coll) = self.fetch_target(current, cmd)? else {
            return Ok(());
        };
        self.expect_collection(coll)?;
        let re = Regex::new(pattern).map_err(|e| Error::Load {
            command: cmd.raw.clone(),
            reason: format!("invalid loop pattern /{pattern}/: {e}"),
        })?;

        // An empty pattern matches every key.
        let keys: Vec<String> = self
            .instance
            .coll_keys_lazy(coll)?
            .into_iter()
            .filter(|k| pattern.is_empty() || re.is_match(k))
            .collect();

        for key in keys {
            let Some(cargo) = self.instance.coll_get(coll, &key, true)? else {
                continue;
            };
            // The tail restarts from the cargo for every key; popping
            // above the cargo ends the iteration.
            let mut loop_stack = vec![cargo];
            self.loop_depth += 1;
            let outcome = self.exec_commands(&mut loop_stack, tail);
            self.loop_depth -= 1;
            outcome?;
        }
        Ok(())
    }

    fn fetch_target(&mut self, node: ItemId, cmd: &ElementCmd) -> Result<Option<ItemId>> {
        if !matches!(self.instance.kind_of(node), ItemKind::Node) {
            return Err(Error::WrongType {
                path: self.instance.path_of(node),
                expected: "node".to_string(),
                found: self.instance.kind_of(node).to_string(),
            });
        }
        self.instance
            .fetch_element(node, &cmd.name, self.check, true, false)
    }

    fn expect_collection(&self, id: ItemId) -> Result<()> {
        match self.instance.kind_of(id) {
            ItemKind::Hash | ItemKind::List => Ok(()),
            other => Err(Error::WrongType {
                path: self.instance.path_of(id),
                expected: "hash or list".to_string(),
                found: other.to_string(),
            }),
        }
    }

    fn exec_element(&mut self, stack: &mut Vec<ItemId>, cmd: &ElementCmd) -> Result<()> {
        let current = *stack.last().expect("non-empty stack");
        let Some(element) = self.fetch_target(current, cmd)? else {
            // Unknown element under a soft check policy: consume silently.
            return Ok(());
        };
        let kind = self.instance.kind_of(element);

        let mut annotation_target = element;
        match kind {
            ItemKind::Node => {
                if cmd.action.is_some() || cmd.subaction.is_some() {
                    return Err(Error::WrongType {
                        path: self.instance.path_of(element),
                        expected: "leaf or collection".to_string(),
                        found: "node".to_string(),
                    });
                }
                stack.push(element);
            }
            ItemKind::Leaf => {
                match &cmd.action {
                    None => {}
                    Some(Action::Clear) => {
                        self.instance.store(element, None, self.check, false)?;
                    }
                    Some(other) => {
                        return Err(self.action_mismatch(element, &cmd.raw, other));
                    }
                }
                if let Some(ref subaction) = cmd.subaction {
                    self.exec_leaf_subaction(element, &cmd.raw, subaction)?;
                }
            }
            ItemKind::CheckList => match (&cmd.action, &cmd.subaction) {
                (None, Some(SubAction::Store(values))) => {
                    self.instance.checklist_store(element, values)?;
                }
                (Some(Action::Clear), None) | (None, Some(SubAction::Clear)) => {
                    self.instance.checklist_clear(element)?;
                }
                (None, None) => {}
                _ => {
                    return Err(Error::Load {
                        command: cmd.raw.clone(),
                        reason: "check_list supports '=a,b' and '~' only".to_string(),
                    })
                }
            },
            ItemKind::Hash | ItemKind::List => {
                if let Some(target) =
                    self.exec_collection(stack, element, cmd)?
                {
                    annotation_target = target;
                }
            }
        }

        if let Some(ref note) = cmd.annotation {
            self.instance.set_annotation(annotation_target, note);
        }
        Ok(())
    }

    fn action_mismatch(&self, id: ItemId, _raw: &str, _action: &Action) -> Error {
        Error::WrongType {
            path: self.instance.path_of(id),
            expected: "hash or list".to_string(),
            found: self.instance.kind_of(id).to_string(),
        }
    }

    /// Collection dispatch. Returns the item annotations should attach
    /// to when it is not the collection itself.
    fn exec_collection(
        &mut self,
        stack: &mut Vec<ItemId>,
        coll: ItemId,
        cmd: &ElementCmd,
    ) -> Result<Option<ItemId>> {
        let check = self.check;
        match (&cmd.action, &cmd.subaction) {
            (Some(Action::Id(key)), subaction) => {
                let cargo = self.instance.coll_get(coll, key, true)?.ok_or_else(|| {
                    Error::UnknownId {
                        path: self.instance.path_of(coll),
                        id: key.clone(),
                    }
                })?;
                match subaction {
                    Some(SubAction::Clear) => {
                        self.instance.store(cargo, None, check, false)?;
                    }
                    Some(subaction) => {
                        self.exec_leaf_subaction(cargo, &cmd.raw, subaction)?;
                    }
                    None => {
                        if matches!(self.instance.kind_of(cargo), ItemKind::Node) {
                            stack.push(cargo);
                        }
                    }
                }
                Ok(Some(cargo))
            }
            (Some(Action::Method(method, args)), None) => {
                self.exec_method(coll, cmd, method, args)?;
                Ok(None)
            }
            (Some(Action::Assign(values)), None) => {
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                self.instance.coll_load(coll, &values, check)?;
                Ok(None)
            }
            (Some(Action::Push(value)), None) => {
                self.instance.coll_push(coll, &[value], check)?;
                Ok(None)
            }
            (Some(Action::Unshift(value)), None) => {
                self.instance.coll_unshift(coll, &[value], check)?;
                Ok(None)
            }
            (Some(Action::Sort), None) => {
                self.instance.coll_sort(coll)?;
                Ok(None)
            }
            (Some(Action::RemoveId(key)), None) => {
                self.instance.coll_delete(coll, key)?;
                Ok(None)
            }
            (Some(Action::RemoveValue(value)), None) => {
                self.remove_matching(coll, |content| content == value)?;
                Ok(None)
            }
            (Some(Action::RemoveMatch(pattern)), None) => {
                let re = Regex::new(pattern).map_err(|e| Error::Load {
                    command: cmd.raw.clone(),
                    reason: format!("invalid pattern /{pattern}/: {e}"),
                })?;
                if self.instance.kind_of(coll) == ItemKind::Hash {
                    let keys: Vec<String> = self
                        .instance
                        .coll_keys(coll)?
                        .into_iter()
                        .filter(|k| re.is_match(k))
                        .collect();
                    for key in keys {
                        self.instance.coll_delete(coll, &key)?;
                    }
                } else {
                    self.remove_matching(coll, |content| re.is_match(content))?;
                }
                Ok(None)
            }
            (Some(Action::SubstAll(subst)), None) => {
                let keys = self.instance.coll_keys(coll)?;
                for key in keys {
                    let Some(entry) = self.instance.coll_get(coll, &key, false)? else {
                        continue;
                    };
                    let Some(content) =
                        self.instance
                            .fetch(entry, FetchMode::User, CheckPolicy::Skip, true)?
                    else {
                        continue;
                    };
                    let replaced = subst.apply(&content)?;
                    if replaced != content {
                        self.instance.store(entry, Some(&replaced), check, false)?;
                    }
                }
                Ok(None)
            }
            (None, Some(SubAction::Store(values))) => {
                // `list=a,b,c` assigns the whole content.
                let split: Vec<&str> = if values.is_empty() {
                    Vec::new()
                } else {
                    values.split(',').collect()
                };
                self.instance.coll_load(coll, &split, check)?;
                Ok(None)
            }
            (None, None) => Ok(None),
            _ => Err(Error::Load {
                command: cmd.raw.clone(),
                reason: format!(
                    "cannot apply this command to {} '{}'",
                    self.instance.kind_of(coll),
                    self.instance.path_of(coll)
                ),
            }),
        }
    }

    fn remove_matching(
        &mut self,
        coll: ItemId,
        predicate: impl Fn(&str) -> bool,
    ) -> Result<()> {
        let keys = self.instance.coll_keys(coll)?;
        let mut doomed = Vec::new();
        for key in keys {
            let Some(entry) = self.instance.coll_get(coll, &key, false)? else {
                continue;
            };
            let content = self
                .instance
                .fetch(entry, FetchMode::AllowUndef, CheckPolicy::Skip, true)?;
            if content.as_deref().is_some_and(&predicate) {
                doomed.push(key);
            }
        }
        for key in doomed.iter().rev() {
            self.instance.coll_delete(coll, key)?;
        }
        Ok(())
    }

    fn exec_method(
        &mut self,
        coll: ItemId,
        cmd: &ElementCmd,
        method: &str,
        args: &[String],
    ) -> Result<()> {
        let check = self.check;
        let strs: Vec<&str> = args.iter().map(String::as_str).collect();
        match method {
            "push" => self.instance.coll_push(coll, &strs, check),
            "unshift" => self.instance.coll_unshift(coll, &strs, check),
            "insert_at" => {
                let (first, rest) = strs.split_first().ok_or_else(|| Error::Load {
                    command: cmd.raw.clone(),
                    reason: "insert_at needs an index".to_string(),
                })?;
                let index: usize = first.parse().map_err(|_| Error::Load {
                    command: cmd.raw.clone(),
                    reason: format!("insert_at index '{first}' is not an integer"),
                })?;
                self.instance.coll_insert_at(coll, index, rest, check)
            }
            "insert_before" => {
                let (anchor, rest) = strs.split_first().ok_or_else(|| Error::Load {
                    command: cmd.raw.clone(),
                    reason: "insert_before needs an anchor value".to_string(),
                })?;
                self.instance.coll_insert_before(coll, anchor, rest, check)
            }
            "insort" => self.instance.coll_insort(coll, &strs, check),
            "sort" => self.instance.coll_sort(coll),
            "copy" => match strs.as_slice() {
                [from, to] => self.instance.coll_copy(coll, from, to),
                _ => Err(Error::Load {
                    command: cmd.raw.clone(),
                    reason: "copy needs (from,to)".to_string(),
                }),
            },
            "clear" => self.instance.coll_clear(coll),
            "rm" => match strs.as_slice() {
                [key] => self.instance.coll_delete(coll, key).map(|_| ()),
                _ => Err(Error::Load {
                    command: cmd.raw.clone(),
                    reason: "rm needs (key)".to_string(),
                }),
            },
            "ensure" => {
                for value in &strs {
                    self.instance.coll_ensure(coll, value, check)?;
                }
                Ok(())
            }
            "json" | "yaml" => {
                let spec = strs.first().ok_or_else(|| Error::Load {
                    command: cmd.raw.clone(),
                    reason: format!("{method} needs a path"),
                })?;
                let format = if method == "json" {
                    data::StructuredFormat::Json
                } else {
                    data::StructuredFormat::Yaml
                };
                let root_dir = self.instance.root_dir().to_path_buf();
                let value = data::load_structured(&root_dir, spec, format)?;
                data::apply_to_collection(self.instance, coll, spec, &value, check)
            }
            other => Err(Error::Load {
                command: cmd.raw.clone(),
                reason: format!("unknown collection method '{other}'"),
            }),
        }
    }

    fn exec_leaf_subaction(
        &mut self,
        leaf: ItemId,
        raw: &str,
        subaction: &SubAction,
    ) -> Result<()> {
        let check = self.check;
        match subaction {
            SubAction::Store(value) => {
                self.instance.store(leaf, Some(value), check, false)?;
            }
            SubAction::Append(value) => {
                self.instance.append(leaf, value, check, false)?;
            }
            SubAction::Clear => {
                self.instance.store(leaf, None, check, false)?;
            }
            SubAction::Subst(subst) => {
                let current = self
                    .instance
                    .fetch(leaf, FetchMode::User, CheckPolicy::Skip, true)?
                    .unwrap_or_default();
                let replaced = subst.apply(&current)?;
                if replaced != current {
                    self.instance.store(leaf, Some(&replaced), check, false)?;
                }
            }
            SubAction::FromFile(path) => {
                let root_dir = self.instance.root_dir().to_path_buf();
                let content = data::read_file(&root_dir, path)?;
                self.instance.store(leaf, Some(&content), check, false)?;
            }
            SubAction::FromJson(spec) => {
                let root_dir = self.instance.root_dir().to_path_buf();
                let value =
                    data::load_structured(&root_dir, spec, data::StructuredFormat::Json)?;
                let scalar = data::expect_scalar(spec, &value)?;
                self.instance.store(leaf, Some(&scalar), check, false)?;
            }
            SubAction::FromYaml(spec) => {
                let root_dir = self.instance.root_dir().to_path_buf();
                let value =
                    data::load_structured(&root_dir, spec, data::StructuredFormat::Yaml)?;
                let scalar = data::expect_scalar(spec, &value)?;
                self.instance.store(leaf, Some(&scalar), check, false)?;
            }
            SubAction::FromEnv(name) => match std::env::var(name) {
                Ok(value) if !value.is_empty() => {
                    self.instance.store(leaf, Some(&value), check, false)?;
                }
                _ => {
                    self.instance.logger.debug(&format!(
                        "{raw}: environment variable '{name}' is unset or empty, \
                         keeping prior value"
                    ));
                }
            },
        }
        Ok(())
    }
}
