//! The DSL printer.
//!
//! Dumping produces a load program that reproduces the tree's custom
//! content: any tree reachable by DSL commands is reproducible from its
//! own dump (up to element order).

use crate::error::Result;
use crate::tree::{CheckPolicy, FetchMode, ItemId, ItemKind};
use crate::Instance;

impl Instance {
    /// Prints the load program reproducing the custom content of the
    /// whole tree.
    ///
    /// # Errors
    ///
    /// Propagates read errors.
    pub fn dump(&mut self) -> Result<String> {
        let root = self.root();
        self.dump_from(root)
    }

    /// Prints the load program reproducing the custom content of a
    /// subtree.
    ///
    /// # Errors
    ///
    /// Propagates read errors.
    pub fn dump_from(&mut self, node: ItemId) -> Result<String> {
        let mut out = Vec::new();
        dump_node(self, node, &mut out)?;
        Ok(out.join(" "))
    }
}

/// Quotes a dumped token part; unlike bare value quoting this also
/// protects characters the command parser treats as structure.
fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.chars().any(|c| {
            c.is_whitespace()
                || matches!(c, '"' | '#' | ',' | '=' | ':' | '~' | '.' | '<' | '>' | '@' | '(')
        });
    if !needs_quotes {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn dump_node(instance: &mut Instance, node: ItemId, out: &mut Vec<String>) -> Result<()> {
    for name in instance.children(node, false)? {
        let Some(item) = instance.fetch_element(node, &name, CheckPolicy::Skip, false, false)?
        else {
            continue;
        };
        let annotation = instance.annotation(item).map(str::to_string);
        match instance.kind_of(item) {
            ItemKind::Leaf => {
                let custom = instance.fetch(item, FetchMode::Custom, CheckPolicy::Skip, true)?;
                match (custom, annotation) {
                    (Some(value), Some(note)) => {
                        out.push(format!("{name}={}#{}", quote(&value), quote(&note)));
                    }
                    (Some(value), None) => out.push(format!("{name}={}", quote(&value))),
                    (None, Some(note)) => out.push(format!("{name}#{}", quote(&note))),
                    (None, None) => {}
                }
            }
            ItemKind::Hash => {
                for key in instance.coll_keys(item)? {
                    let Some(cargo) = instance.coll_get(item, &key, false)? else {
                        continue;
                    };
                    if matches!(instance.kind_of(cargo), ItemKind::Node) {
                        out.push(format!("{name}:{}", quote(&key)));
                        dump_node(instance, cargo, out)?;
                        out.push("-".to_string());
                    } else {
                        match instance.fetch(cargo, FetchMode::Custom, CheckPolicy::Skip, true)? {
                            Some(value) => {
                                out.push(format!("{name}:{}={}", quote(&key), quote(&value)));
                            }
                            None => out.push(format!("{name}:{}", quote(&key))),
                        }
                    }
                }
            }
            ItemKind::List => {
                let ids = instance.coll_ids(item)?;
                if ids.is_empty() {
                    continue;
                }
                if ids
                    .iter()
                    .all(|id| matches!(instance.kind_of(*id), ItemKind::Leaf))
                {
                    let mut values = Vec::with_capacity(ids.len());
                    for id in ids {
                        let content = instance
                            .fetch(id, FetchMode::AllowUndef, CheckPolicy::Skip, true)?
                            .unwrap_or_default();
                        values.push(quote(&content));
                    }
                    out.push(format!("{name}:={}", values.join(",")));
                } else {
                    for (index, id) in ids.iter().enumerate() {
                        out.push(format!("{name}:{index}"));
                        dump_node(instance, *id, out)?;
                        out.push("-".to_string());
                    }
                }
            }
            ItemKind::CheckList => {
                if instance.has_data(item)? {
                    let checked = instance.checklist_checked(item)?;
                    out.push(format!("{name}={}", checked.join(",")));
                }
            }
            ItemKind::Node => {
                let before = out.len();
                out.push(name.clone());
                dump_node(instance, item, out)?;
                if out.len() == before + 1 {
                    // Nothing inside: drop the bare navigation.
                    out.pop();
                } else {
                    out.push("-".to_string());
                }
            }
        }
    }
    Ok(())
}
